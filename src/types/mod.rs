// Public modules
pub mod conversation_history;
pub mod conversation_list;
pub mod conversation_request;
pub mod ids;
pub mod model;
pub mod stream_event;

// Re-exports
pub use conversation_history::{
    Author, ConversationHistory, HistoryContent, HistoryMessage, HistoryNode,
};
pub use conversation_list::{ConversationList, ConversationListParams, ConversationSummary};
pub use conversation_request::{
    ConversationRequest, MessageContent, OutboundMessage, Role, TitleRequest, TitleUpdate,
    VisibilityUpdate,
};
pub use ids::{ConversationId, MessageId};
pub use model::Model;
pub use stream_event::StreamEvent;
