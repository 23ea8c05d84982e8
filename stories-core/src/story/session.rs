//! A single story thread and everything tracked alongside it.

use super::{Asset, Entity, Message};
use crate::collection::{Collection, Keyed};
use serde::{Deserialize, Serialize};

/// One conversation thread.
///
/// The id is the remote thread id and never changes. Messages are a cache
/// of the remote thread: they are skipped when serializing and rebuilt
/// whenever the session is activated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub theme: Option<String>,
    #[serde(default)]
    pub guidelines: Option<String>,
    #[serde(default)]
    pub entities: Collection<Entity>,
    #[serde(default)]
    pub assets: Collection<Asset>,
    #[serde(skip)]
    pub messages: Collection<Message>,
}

impl Session {
    /// A fresh session for a remote thread.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            theme: None,
            guidelines: None,
            entities: Collection::new(),
            assets: Collection::new(),
            messages: Collection::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The display name, or a short form of the thread id if unnamed.
    pub fn friendly_name(&self) -> String {
        match self.name.as_deref() {
            Some(name) if !name.trim().is_empty() => name.to_string(),
            _ => self.id.chars().take(8).collect(),
        }
    }
}

impl Keyed for Session {
    fn key(&self) -> String {
        self.id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assistants::{Metadata, Role};

    #[test]
    fn test_friendly_name() {
        let mut session = Session::new("thread_abc123xyz");
        assert_eq!(session.friendly_name(), "thread_a");

        session.name = Some("The Drowned Bell".to_string());
        assert_eq!(session.friendly_name(), "The Drowned Bell");

        session.name = Some("   ".to_string());
        assert_eq!(session.friendly_name(), "thread_a");
    }

    #[test]
    fn test_messages_not_serialized() {
        let mut session = Session::new("thread_1");
        session
            .messages
            .add(Message::new("msg_1", Role::User, "Begin", Metadata::new()));
        session
            .entities
            .add(Entity::new("character", "Mira", "A lighthouse keeper"));

        let json = serde_json::to_value(&session).unwrap();
        assert!(json.get("messages").is_none());
        assert_eq!(json["entities"][0]["name"], "Mira");

        let restored: Session = serde_json::from_value(json).unwrap();
        assert_eq!(restored.id(), "thread_1");
        assert!(restored.messages.is_empty());
        assert_eq!(restored.entities, session.entities);
    }
}
