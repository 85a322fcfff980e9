use serde::{Deserialize, Serialize};

use crate::types::ConversationId;

/// One entry of the conversation listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// Conversation id.
    pub id: ConversationId,

    /// Conversation title; untitled conversations have none.
    #[serde(default)]
    pub title: Option<String>,
}

/// Body of `GET api/conversations`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationList {
    /// Conversations on this page, most recent first.
    #[serde(default)]
    pub items: Vec<ConversationSummary>,

    /// Total conversations the account has.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

/// Paging parameters for listing conversations.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ConversationListParams {
    /// Number of conversations to skip.
    pub offset: u32,

    /// Number of conversations to return.
    pub limit: u32,
}

impl ConversationListParams {
    /// Create new paging parameters.
    pub fn new(offset: u32, limit: u32) -> Self {
        Self { offset, limit }
    }

    /// The query string for `api/conversations`.
    pub fn query(&self) -> String {
        format!("offset={}&limit={}", self.offset, self.limit)
    }
}

impl Default for ConversationListParams {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 20,
        }
    }
}
