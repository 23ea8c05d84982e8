//! Story entities: named facts the assistant tracks per session.

use crate::collection::Keyed;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A named story fact (a character, place, item, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Free-form category chosen by the assistant.
    #[serde(rename = "type", default)]
    pub kind: String,
    name: String,
    #[serde(default)]
    pub desc: String,
}

impl Entity {
    pub fn new(kind: impl Into<String>, name: impl Into<String>, desc: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            desc: desc.into(),
        }
    }

    /// The entity's name, which is also its key within a session.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Keyed for Entity {
    fn key(&self) -> String {
        self.name.clone()
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) | {}", self.name, self.kind, self.desc)
    }
}
