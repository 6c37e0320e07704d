//! Message box domain events.
//!
//! Emitted after the corresponding storage mutation has committed. The
//! activity subsystem listens on these to post message-stream activities;
//! the message box itself does not know who listens.

use crate::model::{DeleteType, Message};

/// Events announced by the message box.
#[derive(Debug, Clone)]
pub enum MessageBoxEvent {
    /// A message was created.
    Created {
        /// The box the message landed in.
        message_box_id: String,
        /// The stored message, body already rewritten.
        message: Message,
    },
    /// A message body was updated.
    Updated {
        /// The box the message lives in.
        message_box_id: String,
        /// `created` of the updated message.
        created: i64,
    },
    /// A message was deleted.
    Deleted {
        /// The box the message lived in.
        message_box_id: String,
        /// `created` of the deleted message.
        created: i64,
        /// The delete that actually occurred (never [`DeleteType::Leaf`]).
        delete_type: DeleteType,
    },
}
