use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::MessageId;

/// Author of a message in a conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    /// `"user"`, `"assistant"`, `"system"`, or a role this client does not know.
    pub role: String,
}

/// Content of a message in a conversation history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryContent {
    /// Content type, usually `"text"`.
    #[serde(default)]
    pub content_type: Option<String>,

    /// Content parts.  Text parts are strings; other kinds are kept verbatim.
    #[serde(default)]
    pub parts: Vec<Value>,
}

/// A message stored in a conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryMessage {
    /// Message id.
    #[serde(default)]
    pub id: Option<MessageId>,

    /// Who wrote the message.
    pub author: Author,

    /// The message content.
    #[serde(default)]
    pub content: HistoryContent,
}

impl HistoryMessage {
    /// True for messages the user wrote.
    pub fn is_user(&self) -> bool {
        self.author.role == "user"
    }

    /// The text parts of the message, one per line.
    pub fn text(&self) -> String {
        self.content
            .parts
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A node of the message tree.  The root node carries no message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryNode {
    /// Node id; equal to the message id for message nodes.
    #[serde(default)]
    pub id: Option<MessageId>,

    /// The message, if this node carries one.
    #[serde(default)]
    pub message: Option<HistoryMessage>,

    /// Parent node.
    #[serde(default)]
    pub parent: Option<MessageId>,

    /// Child nodes, one per branch.
    #[serde(default)]
    pub children: Vec<MessageId>,
}

/// Body of `GET api/conversation/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationHistory {
    /// Conversation title.
    #[serde(default)]
    pub title: Option<String>,

    /// Head of the branch the conversation currently shows.
    pub current_node: MessageId,

    /// Every node of the message tree, by id.
    #[serde(default)]
    pub mapping: HashMap<MessageId, HistoryNode>,
}

impl ConversationHistory {
    /// Messages on the branch ending at `current_node`, oldest first.
    ///
    /// Follows `parent` links from the head, so sibling branches are left out.
    /// A broken or cyclic chain stops the walk at the last reachable node.
    pub fn thread(&self) -> Vec<&HistoryMessage> {
        let mut messages = Vec::new();
        let mut cursor = Some(&self.current_node);
        let mut steps = 0;
        while let Some(id) = cursor {
            if steps > self.mapping.len() {
                break;
            }
            steps += 1;
            let Some(node) = self.mapping.get(id) else {
                break;
            };
            if let Some(message) = &node.message {
                messages.push(message);
            }
            cursor = node.parent.as_ref();
        }
        messages.reverse();
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HISTORY: &str = r#"{
        "title": "Greetings",
        "current_node": "a2",
        "mapping": {
            "root": {"id": "root", "message": null, "parent": null, "children": ["u1"]},
            "u1": {"id": "u1", "parent": "root", "children": ["a1", "a1b"],
                   "message": {"id": "u1", "author": {"role": "user"},
                               "content": {"content_type": "text", "parts": ["Hi"]}}},
            "a1b": {"id": "a1b", "parent": "u1", "children": [],
                    "message": {"id": "a1b", "author": {"role": "assistant"},
                                "content": {"content_type": "text", "parts": ["Abandoned"]}}},
            "a1": {"id": "a1", "parent": "u1", "children": ["u2"],
                   "message": {"id": "a1", "author": {"role": "assistant"},
                               "content": {"content_type": "text", "parts": ["Hello!"]}}},
            "u2": {"id": "u2", "parent": "a1", "children": ["a2"],
                   "message": {"id": "u2", "author": {"role": "user"},
                               "content": {"content_type": "text", "parts": ["Bye"]}}},
            "a2": {"id": "a2", "parent": "u2", "children": [],
                   "message": {"id": "a2", "author": {"role": "assistant"},
                               "content": {"content_type": "text", "parts": ["Goodbye"]}}}
        }
    }"#;

    #[test]
    fn thread_follows_the_current_branch() {
        let history: ConversationHistory = serde_json::from_str(HISTORY).unwrap();
        let texts: Vec<String> = history.thread().iter().map(|m| m.text()).collect();
        assert_eq!(texts, vec!["Hi", "Hello!", "Bye", "Goodbye"]);
        assert!(history.thread()[0].is_user());
        assert!(!history.thread()[1].is_user());
    }

    #[test]
    fn cyclic_chain_terminates() {
        let json = r#"{
            "current_node": "a",
            "mapping": {
                "a": {"parent": "b", "message": {"author": {"role": "user"}, "content": {"parts": ["x"]}}},
                "b": {"parent": "a", "message": {"author": {"role": "assistant"}, "content": {"parts": ["y"]}}}
            }
        }"#;
        let history: ConversationHistory = serde_json::from_str(json).unwrap();
        assert!(history.thread().len() <= 3);
    }

    #[test]
    fn non_text_parts_are_ignored_by_text() {
        let json = r#"{"author": {"role": "assistant"}, "content": {"parts": ["a", {"image": 1}, "b"]}}"#;
        let message: HistoryMessage = serde_json::from_str(json).unwrap();
        assert_eq!(message.text(), "a\nb");
    }
}
