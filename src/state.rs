//! Conversation cursor, head mapping and rollback history.
//!
//! [`ConversationState`] decides where the next prompt attaches.  It is plain
//! data: resolving a target that needs a server lookup returns
//! [`Resolution::Lookup`] and leaves the fetching to the session.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::observability::{STATE_COMMITS, STATE_ROLLBACKS};
use crate::types::{ConversationId, MessageId, StreamEvent};

/// Where the next prompt will be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Conversation to append to; `None` starts a new one.
    pub conversation_id: Option<ConversationId>,
    /// Message the prompt replies to.
    pub parent_id: MessageId,
    /// True when neither id was known and a parent was minted; the new
    /// conversation should get a generated title.
    pub new_conversation: bool,
}

/// Outcome of [`ConversationState::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The target is known.
    Ready(Target),
    /// The conversation's head is unknown; refresh the mapping, then call
    /// [`ConversationState::resolve_after_lookup`].
    Lookup(ConversationId),
}

/// Session cursor plus everything needed to move it.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    conversation_id: Option<ConversationId>,
    parent_id: Option<MessageId>,
    mapping: HashMap<ConversationId, MessageId>,
    conversation_history: Vec<Option<ConversationId>>,
    parent_history: Vec<Option<MessageId>>,
}

impl ConversationState {
    /// An empty state: no conversation, no parent, nothing recorded.
    pub fn new() -> Self {
        Self::default()
    }

    /// A state whose cursor starts at the given ids.
    pub fn with_cursor(
        conversation_id: Option<ConversationId>,
        parent_id: Option<MessageId>,
    ) -> Self {
        Self {
            conversation_id,
            parent_id,
            ..Self::default()
        }
    }

    /// The cursor's conversation.
    pub fn conversation_id(&self) -> Option<&ConversationId> {
        self.conversation_id.as_ref()
    }

    /// The cursor's parent message.
    pub fn parent_id(&self) -> Option<&MessageId> {
        self.parent_id.as_ref()
    }

    /// The last observed head of a conversation.
    pub fn head(&self, conversation_id: &ConversationId) -> Option<&MessageId> {
        self.mapping.get(conversation_id)
    }

    /// Every known conversation head.
    pub fn mapping(&self) -> &HashMap<ConversationId, MessageId> {
        &self.mapping
    }

    /// How many turns [`rollback`](Self::rollback) can undo.
    pub fn rollback_depth(&self) -> usize {
        debug_assert_eq!(self.conversation_history.len(), self.parent_history.len());
        self.conversation_history.len()
    }

    /// Work out where a prompt goes, given optional explicit ids.
    ///
    /// Explicit ids win over the cursor.  Naming a conversation other than the
    /// cursor's drops the cursor's parent.  With no ids at all a parent is
    /// minted for a new conversation.  A conversation without a parent
    /// resolves through the head mapping.
    pub fn resolve(
        &self,
        conversation_id: Option<ConversationId>,
        parent_id: Option<MessageId>,
    ) -> Result<Resolution> {
        if parent_id.is_some() && conversation_id.is_none() {
            return Err(Error::invalid_request(
                "conversation_id must be set once parent_id is set",
            ));
        }
        let switching = conversation_id
            .as_ref()
            .is_some_and(|id| Some(id) != self.conversation_id.as_ref());
        let cursor_parent = if switching {
            None
        } else {
            self.parent_id.clone()
        };
        let conversation_id = conversation_id.or_else(|| self.conversation_id.clone());
        let parent_id = parent_id.or(cursor_parent);
        let resolution = match (conversation_id, parent_id) {
            (None, None) => Resolution::Ready(Target {
                conversation_id: None,
                parent_id: MessageId::generate(),
                new_conversation: true,
            }),
            (conversation_id, Some(parent_id)) => Resolution::Ready(Target {
                conversation_id,
                parent_id,
                new_conversation: false,
            }),
            (Some(conversation_id), None) => match self.mapping.get(&conversation_id) {
                Some(head) => Resolution::Ready(Target {
                    parent_id: head.clone(),
                    conversation_id: Some(conversation_id),
                    new_conversation: false,
                }),
                None => Resolution::Lookup(conversation_id),
            },
        };
        Ok(resolution)
    }

    /// Finish a [`Resolution::Lookup`] once the mapping has been refreshed.
    pub fn resolve_after_lookup(&self, conversation_id: ConversationId) -> Result<Target> {
        match self.mapping.get(&conversation_id) {
            Some(head) => Ok(Target {
                parent_id: head.clone(),
                conversation_id: Some(conversation_id),
                new_conversation: false,
            }),
            None => Err(Error::unknown_conversation(conversation_id.as_str())),
        }
    }

    /// Remember `head` as the current head of `conversation_id`.
    pub fn record_head(&mut self, conversation_id: ConversationId, head: MessageId) {
        self.mapping.insert(conversation_id, head);
    }

    /// Save the cursor so one more turn can be rolled back.
    pub fn push_history(&mut self) {
        self.conversation_history.push(self.conversation_id.clone());
        self.parent_history.push(self.parent_id.clone());
    }

    /// Fold the last event of a completed answer into the state.
    ///
    /// The conversation's head becomes the answer.  Empty ids never replace
    /// known ones.
    pub fn commit(&mut self, event: &StreamEvent) {
        STATE_COMMITS.click();
        if !event.conversation_id.is_empty() && !event.parent_id.is_empty() {
            self.mapping
                .insert(event.conversation_id.clone(), event.parent_id.clone());
        }
        if !event.parent_id.is_empty() {
            self.parent_id = Some(event.parent_id.clone());
        }
        if !event.conversation_id.is_empty() {
            self.conversation_id = Some(event.conversation_id.clone());
        }
    }

    /// Restore the cursor to where it was `turns` asks ago.
    ///
    /// Fails without changing anything when fewer turns were recorded.
    pub fn rollback(&mut self, turns: usize) -> Result<()> {
        let depth = self.rollback_depth();
        if turns > depth {
            return Err(Error::invalid_request(format!(
                "cannot roll back {turns} turns; only {depth} recorded"
            )));
        }
        let keep = depth - turns;
        let mut conversations = self.conversation_history.split_off(keep).into_iter();
        let mut parents = self.parent_history.split_off(keep).into_iter();
        if let (Some(conversation_id), Some(parent_id)) = (conversations.next(), parents.next()) {
            STATE_ROLLBACKS.click();
            self.conversation_id = conversation_id;
            self.parent_id = parent_id;
        }
        Ok(())
    }

    /// Leave the current conversation.  The next prompt starts a new one
    /// under a freshly minted parent.
    pub fn reset(&mut self) {
        self.conversation_id = None;
        self.parent_id = Some(MessageId::generate());
    }

    /// Point the cursor at `head` in `conversation_id`.
    pub fn switch_to(&mut self, conversation_id: ConversationId, head: MessageId) {
        self.mapping.insert(conversation_id.clone(), head.clone());
        self.conversation_id = Some(conversation_id);
        self.parent_id = Some(head);
    }

    /// Drop a deleted conversation, clearing the cursor if it pointed there.
    pub fn forget(&mut self, conversation_id: &ConversationId) {
        self.mapping.remove(conversation_id);
        if self.conversation_id.as_ref() == Some(conversation_id) {
            self.conversation_id = None;
            self.parent_id = None;
        }
    }
}
