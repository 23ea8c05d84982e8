//! The local story model: sessions and what they track.
//!
//! [`StoryState`] is the root aggregate. It serializes to a single JSON
//! document holding every session with its entities and assets. Messages
//! are deliberately left out of the document; the remote thread owns them.

mod asset;
mod entity;
mod message;
mod session;

pub use asset::Asset;
pub use entity::Entity;
pub use message::Message;
pub use session::Session;

use crate::collection::Collection;
use serde::{Deserialize, Serialize};

/// All sessions known locally.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoryState {
    #[serde(default)]
    pub sessions: Collection<Session>,
}

impl StoryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize to a document. Messages are not included.
    pub fn to_document(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Build a state from a document.
    pub fn from_document(document: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(document)
    }

    /// Replace this state entirely with the contents of a document.
    ///
    /// On error the current state is left untouched.
    pub fn restore(&mut self, document: serde_json::Value) -> Result<(), serde_json::Error> {
        *self = Self::from_document(document)?;
        Ok(())
    }

    pub fn session(&self, id: &str) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn session_mut(&mut self, id: &str) -> Option<&mut Session> {
        self.sessions.get_mut(id)
    }
}
