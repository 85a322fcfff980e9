use serde::{Deserialize, Serialize};

use crate::types::{ConversationId, MessageId, Model};

/// Author role of a message.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User role.
    User,

    /// Assistant role.
    Assistant,

    /// System role.
    System,
}

/// Text content of an outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageContent {
    /// Always `"text"` for prompts.
    pub content_type: String,

    /// The prompt, as a single part.
    pub parts: Vec<String>,
}

impl MessageContent {
    /// Text content holding one part.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content_type: "text".to_string(),
            parts: vec![text.into()],
        }
    }
}

/// A message sent to the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Fresh id of the user message.
    pub id: MessageId,

    /// Author role.
    pub role: Role,

    /// Message content.
    pub content: MessageContent,
}

impl OutboundMessage {
    /// A user prompt with a freshly minted id.
    pub fn user(prompt: impl Into<String>) -> Self {
        Self {
            id: MessageId::generate(),
            role: Role::User,
            content: MessageContent::text(prompt),
        }
    }
}

/// Body of `POST api/conversation`.
///
/// `conversation_id` and `parent_message_id` serialize as `null` when absent;
/// the service starts a new conversation for a `null` conversation id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRequest {
    /// Always `"next"`.
    pub action: String,

    /// The prompt.
    pub messages: Vec<OutboundMessage>,

    /// Conversation to append to.
    pub conversation_id: Option<ConversationId>,

    /// Message the prompt replies to.
    pub parent_message_id: Option<MessageId>,

    /// Model to answer with.
    pub model: Model,
}

impl ConversationRequest {
    /// Build the request for the next turn of a conversation.
    pub fn next(
        prompt: impl Into<String>,
        conversation_id: Option<ConversationId>,
        parent_message_id: Option<MessageId>,
        model: Model,
    ) -> Self {
        Self {
            action: "next".to_string(),
            messages: vec![OutboundMessage::user(prompt)],
            conversation_id,
            parent_message_id,
            model,
        }
    }
}

/// Body of `POST api/conversation/gen_title/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleRequest {
    /// Message the title is generated from.
    pub message_id: MessageId,

    /// Model used to write the title.
    pub model: Model,
}

/// Body of `PATCH api/conversation/{id}` when renaming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleUpdate {
    /// New title.
    pub title: String,
}

/// Body of the soft-delete `PATCH` requests.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibilityUpdate {
    /// `false` hides the conversation.
    pub is_visible: bool,
}

impl VisibilityUpdate {
    /// Hide the target.
    pub fn hidden() -> Self {
        Self { is_visible: false }
    }
}
