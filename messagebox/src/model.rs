//! Message model.

use crate::thread_key::ThreadKey;
use collegium_core::principal::PrincipalId;
use serde::{Deserialize, Serialize};

/// A message in a message box.
///
/// `created` is strictly unique within a box (enforced by the
/// unique-timestamp lock at creation), `id` is derived as
/// `<messageBoxId>#<created>`, and the thread key encodes the reply
/// hierarchy; `level` and `reply_to` are denormalized from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// `<messageBoxId>#<created>`.
    pub id: String,
    /// The box this message belongs to.
    pub message_box_id: String,
    /// Position in the thread hierarchy.
    pub thread_key: ThreadKey,
    /// Markdown body. `None` on a scrubbed deleted message.
    pub body: Option<String>,
    /// Creator principal. `None` on a scrubbed deleted message.
    pub created_by: Option<PrincipalId>,
    /// Creation timestamp, milliseconds.
    pub created: i64,
    /// Nesting depth, 0 for a root.
    pub level: usize,
    /// `created` of the parent message, `None` for a root.
    pub reply_to: Option<i64>,
    /// Soft-delete timestamp; `None` while the message is live.
    pub deleted: Option<i64>,
}

impl Message {
    /// Assemble a new live message.
    #[must_use]
    pub fn new(
        message_box_id: impl Into<String>,
        thread_key: ThreadKey,
        created_by: PrincipalId,
        body: String,
    ) -> Self {
        let message_box_id = message_box_id.into();
        let created = thread_key.created();
        Self {
            id: format!("{message_box_id}#{created}"),
            message_box_id,
            level: thread_key.level(),
            reply_to: thread_key.reply_to(),
            thread_key,
            body: Some(body),
            created_by: Some(created_by),
            created,
            deleted: None,
        }
    }

    /// Whether the message has been (soft- or hard-) deleted.
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted.is_some()
    }

    /// The scrubbed rendition used in listings: identity and position
    /// survive, content does not.
    #[must_use]
    pub fn scrubbed(&self) -> Self {
        Self {
            id: self.id.clone(),
            message_box_id: self.message_box_id.clone(),
            thread_key: self.thread_key.clone(),
            body: None,
            created_by: None,
            created: self.created,
            level: self.level,
            reply_to: self.reply_to,
            deleted: self.deleted,
        }
    }
}

/// What kind of delete the caller requested and, for [`DeleteType::Leaf`],
/// what actually happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteType {
    /// Timestamp the message; it stays in listings with a scrubbed body.
    Soft,
    /// Tombstone and unlist the message; the row keeps its body for
    /// recovery but is invisible.
    Hard,
    /// Hard when the message has no descendants, soft otherwise.
    Leaf,
}

impl DeleteType {
    /// Stable string form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Soft => "soft",
            Self::Hard => "hard",
            Self::Leaf => "leaf",
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)] // Test code can use expect
mod tests {
    use super::*;

    fn principal() -> PrincipalId {
        PrincipalId::parse("u:cam:alice").expect("valid principal")
    }

    #[test]
    fn new_message_denormalizes_the_thread_key() {
        let parent = ThreadKey::root(1000);
        let key = ThreadKey::reply(&parent, 1010);
        let msg = Message::new("mb-1", key, principal(), "hello".to_string());

        assert_eq!(msg.id, "mb-1#1010");
        assert_eq!(msg.created, 1010);
        assert_eq!(msg.level, 1);
        assert_eq!(msg.reply_to, Some(1000));
        assert!(!msg.is_deleted());
    }

    #[test]
    fn scrubbing_keeps_position_and_drops_content() {
        let mut msg = Message::new(
            "mb-1",
            ThreadKey::root(1000),
            principal(),
            "secret".to_string(),
        );
        msg.deleted = Some(2000);

        let scrubbed = msg.scrubbed();
        assert_eq!(scrubbed.id, msg.id);
        assert_eq!(scrubbed.thread_key, msg.thread_key);
        assert_eq!(scrubbed.deleted, Some(2000));
        assert!(scrubbed.body.is_none());
        assert!(scrubbed.created_by.is_none());
    }
}
