use serde::{Deserialize, Serialize};

use crate::types::{ConversationId, MessageId};

/// One decoded update from a streaming answer.
///
/// `message_text` is the whole assistant message generated so far, not the
/// increment since the previous event.  Use [`StreamEvent::delta_since`] to
/// get the part that is new.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEvent {
    /// Cumulative assistant text.
    pub message_text: String,

    /// The conversation the answer belongs to.
    pub conversation_id: ConversationId,

    /// The assistant message being generated; the parent of the next turn.
    pub parent_id: MessageId,
}

impl StreamEvent {
    /// Create a new stream event.
    pub fn new(
        message_text: impl Into<String>,
        conversation_id: ConversationId,
        parent_id: MessageId,
    ) -> Self {
        Self {
            message_text: message_text.into(),
            conversation_id,
            parent_id,
        }
    }

    /// The text this snapshot adds on top of `previous`.
    ///
    /// Snapshots usually extend the previous one.  When they do not (the
    /// service rewrote earlier text) the whole snapshot is returned.
    pub fn delta_since(&self, previous: &str) -> &str {
        self.message_text
            .strip_prefix(previous)
            .unwrap_or(&self.message_text)
    }
}
