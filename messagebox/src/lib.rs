//! # Collegium Message Box
//!
//! Threaded message storage for any platform resource. A message box is the
//! logical container of comments, replies and chat attached to a resource
//! (content item, discussion, meeting, folder) and is identified by a stable
//! string.
//!
//! # Thread keys
//!
//! Every message carries a thread key encoding its position in the reply
//! hierarchy: the root message's creation timestamp, one `#<created>` segment
//! per nesting level, terminated by `|`. Reverse-lexicographic ordering of
//! thread keys yields most-recent-root-first traversal with descendants
//! nested immediately after their parent. It is the sole sort key for
//! pagination; no recursion required.
//!
//! ```text
//! 1020|            ← root B (newest root first)
//! 1000|            ← root A
//! 1000#1010|       ← reply to A
//! 1000#1010#1040|  ← reply to the reply
//! ```
//!
//! # Delete semantics
//!
//! Three delete types: **soft** (timestamped, message stays listed with a
//! scrubbed body), **hard** (tombstoned and unlisted, body retained on the
//! row for recovery), and **leaf** (hard when the message has no
//! descendants, soft otherwise; the caller learns which one happened).
//!
//! # URL rewriting
//!
//! Message bodies are rewritten on create and update: absolute links to
//! known local tenant hosts become root-relative markdown links, with code
//! spans and indented code blocks left untouched. See [`urls`].

pub mod events;
pub mod model;
pub mod service;
pub mod store;
pub mod thread_key;
pub mod urls;

#[cfg(any(test, feature = "test-utils"))]
pub mod mocks;

pub use events::MessageBoxEvent;
pub use model::{DeleteType, Message};
pub use service::MessageBox;
pub use store::MessageStore;
pub use thread_key::ThreadKey;
