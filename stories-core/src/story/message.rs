//! Local mirror of thread messages.

use crate::collection::Keyed;
use assistants::{Metadata, Role, ThreadMessage};
use serde::{Deserialize, Serialize};

/// One turn of the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    id: String,
    pub role: Role,
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Message {
    pub fn new(id: impl Into<String>, role: Role, text: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            id: id.into(),
            role,
            text: text.into(),
            metadata,
        }
    }

    /// The id assigned by the remote thread.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The `type` metadata tag (`prompt`, `narrative`, ...), if any.
    pub fn kind(&self) -> Option<&str> {
        self.metadata.get(crate::engine::TYPE_KEY).map(String::as_str)
    }
}

impl From<&ThreadMessage> for Message {
    fn from(message: &ThreadMessage) -> Self {
        Self {
            id: message.id.clone(),
            role: message.role,
            text: message.text(),
            metadata: message.metadata.clone(),
        }
    }
}

impl From<ThreadMessage> for Message {
    fn from(message: ThreadMessage) -> Self {
        Self::from(&message)
    }
}

impl Keyed for Message {
    fn key(&self) -> String {
        self.id.clone()
    }
}
