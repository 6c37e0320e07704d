//! Rewriting of absolute links to local tenant hosts.
//!
//! Message bodies are markdown. Before persistence, every absolute URL whose
//! host belongs to a known local tenant is rewritten to its root-relative
//! equivalent so bodies survive tenant host renames and protocol changes.
//! Unknown hosts are left intact.
//!
//! Per URL match, in order:
//!
//! 1. Inside an inline code span (odd number of backticks on the line before
//!    the match) → unchanged.
//! 2. Inside an indented code block (the line and every non-blank line back
//!    to the last blank line start with four spaces) → unchanged.
//! 3. In markdown title position `[…]` → the URL text becomes the path.
//! 4. In markdown target position `(…)` → the URL text becomes the path.
//! 5. Anywhere else → the URL becomes a full link: `[path](path)`.
//!
//! The rewrite is idempotent: root-relative paths contain no scheme and are
//! never matched again.

use collegium_core::tenant::TenantDirectory;
use url::Url;

/// Characters that terminate a URL candidate inside markdown text.
const URL_TERMINATORS: &[char] = &[' ', '\t', ')', ']', '(', '[', '"', '\'', '`', '<', '>'];

/// Rewrite all local-host URLs in `body`.
#[must_use]
pub fn rewrite_local_urls(body: &str, tenants: &dyn TenantDirectory) -> String {
    let lines: Vec<&str> = body.split('\n').collect();
    let mut rewritten: Vec<String> = Vec::with_capacity(lines.len());

    for (idx, line) in lines.iter().enumerate() {
        if line_in_code_block(&lines, idx) {
            rewritten.push((*line).to_string());
        } else {
            rewritten.push(rewrite_line(line, tenants));
        }
    }

    rewritten.join("\n")
}

/// Whether `lines[idx]` sits inside a four-space indented code block: the
/// line itself and every non-blank line back to the last blank line must
/// start with at least four spaces.
fn line_in_code_block(lines: &[&str], idx: usize) -> bool {
    let indented = |line: &str| line.starts_with("    ");
    let blank = |line: &str| line.trim().is_empty();

    if blank(lines[idx]) || !indented(lines[idx]) {
        return false;
    }
    for line in lines[..idx].iter().rev() {
        if blank(line) {
            break;
        }
        if !indented(line) {
            return false;
        }
    }
    true
}

/// Rewrite one line, left to right.
fn rewrite_line(line: &str, tenants: &dyn TenantDirectory) -> String {
    let mut out = String::with_capacity(line.len());
    let mut cursor = 0;

    while let Some(rel) = line[cursor..].find("http") {
        let start = cursor + rel;
        let rest = &line[start..];
        let Some(scheme_len) = scheme_length(rest) else {
            out.push_str(&line[cursor..=start]);
            cursor = start + 1;
            continue;
        };

        let end = start
            + rest[scheme_len..]
                .find(URL_TERMINATORS)
                .map_or(rest.len(), |i| scheme_len + i);
        let candidate = &line[start..end];

        match rewrite_candidate(line, start, end, candidate, tenants) {
            Some(replacement) => {
                out.push_str(&line[cursor..start]);
                out.push_str(&replacement);
            }
            None => out.push_str(&line[cursor..end]),
        }
        cursor = end;
    }
    out.push_str(&line[cursor..]);
    out
}

/// Length of an `http://` or `https://` prefix, if present.
fn scheme_length(s: &str) -> Option<usize> {
    if s.starts_with("http://") {
        Some("http://".len())
    } else if s.starts_with("https://") {
        Some("https://".len())
    } else {
        None
    }
}

/// Decide the replacement text for one matched URL, or `None` to keep it.
fn rewrite_candidate(
    line: &str,
    start: usize,
    end: usize,
    candidate: &str,
    tenants: &dyn TenantDirectory,
) -> Option<String> {
    // Rule 1: an odd number of backticks before the match means we are
    // inside an inline code span.
    if line[..start].matches('`').count() % 2 == 1 {
        return None;
    }

    let parsed = Url::parse(candidate).ok()?;
    let host = parsed.host_str()?;
    let authority = match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    if !tenants.is_local_host(&authority) {
        return None;
    }

    let path = root_relative(&parsed);
    let before = line[..start].chars().next_back();
    let after = line[end..].chars().next();

    // Rules 3 and 4: inside an existing markdown link, only the URL text
    // changes. Rule 5: bare URLs become a full link.
    match (before, after) {
        (Some('['), Some(']')) | (Some('('), Some(')')) => Some(path),
        _ => Some(format!("[{path}]({path})")),
    }
}

/// Path, query and fragment of a URL, at least `/`.
fn root_relative(url: &Url) -> String {
    let mut path = url.path().to_string();
    if path.is_empty() {
        path.push('/');
    }
    if let Some(query) = url.query() {
        path.push('?');
        path.push_str(query);
    }
    if let Some(fragment) = url.fragment() {
        path.push('#');
        path.push_str(fragment);
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use collegium_core::tenant::{Tenant, TenantDirectory, TenantPrivacy};

    struct OneHost;

    impl TenantDirectory for OneHost {
        fn tenant(&self, alias: &str) -> Option<Tenant> {
            (alias == "cam").then(|| Tenant {
                alias: "cam".to_string(),
                display_name: "cam".to_string(),
                host: "tenant.example".to_string(),
                privacy: TenantPrivacy::Public,
            })
        }

        fn is_local_host(&self, host: &str) -> bool {
            host == "tenant.example"
        }
    }

    fn rw(body: &str) -> String {
        rewrite_local_urls(body, &OneHost)
    }

    #[test]
    fn bare_url_becomes_full_link() {
        assert_eq!(
            rw("see http://tenant.example/docs/1 please"),
            "see [/docs/1](/docs/1) please"
        );
    }

    #[test]
    fn unknown_host_is_untouched() {
        let body = "see http://elsewhere.example/docs please";
        assert_eq!(rw(body), body);
    }

    #[test]
    fn title_position_keeps_brackets() {
        assert_eq!(
            rw("[http://tenant.example/a](http://tenant.example/a)"),
            "[/a](/a)"
        );
    }

    #[test]
    fn code_span_is_skipped_but_rest_of_line_rewrites() {
        assert_eq!(
            rw("`http://tenant.example/x` and http://tenant.example/y"),
            "`http://tenant.example/x` and [/y](/y)"
        );
    }

    #[test]
    fn indented_code_block_is_skipped() {
        let body = "text\n\n    http://tenant.example/in-block\n    more code\n\nhttp://tenant.example/out";
        let expected =
            "text\n\n    http://tenant.example/in-block\n    more code\n\n[/out](/out)";
        assert_eq!(rw(body), expected);
    }

    #[test]
    fn indented_continuation_of_prose_still_rewrites() {
        // The indented line is attached to a non-indented paragraph, so it
        // is not a code block.
        let body = "intro line\n    http://tenant.example/a";
        assert_eq!(rw(body), "intro line\n    [/a](/a)");
    }

    #[test]
    fn query_and_fragment_survive() {
        assert_eq!(
            rw("http://tenant.example/p?x=1&y=2#frag"),
            "[/p?x=1&y=2#frag](/p?x=1&y=2#frag)"
        );
    }

    #[test]
    fn host_root_maps_to_slash() {
        assert_eq!(rw("http://tenant.example"), "[/](/)");
    }

    #[test]
    fn port_must_match_directory() {
        let body = "http://tenant.example:8443/a";
        // Directory knows the bare host only; a port makes it a different
        // authority.
        assert_eq!(rw(body), body);
    }

    #[test]
    fn rewrite_is_idempotent() {
        let once = rw("a http://tenant.example/x b [http://tenant.example/y](http://tenant.example/y)");
        assert_eq!(rw(&once), once);
    }

    #[test]
    fn https_is_rewritten_too() {
        assert_eq!(rw("https://tenant.example/s"), "[/s](/s)");
    }
}
