//! Client-side functions the storyteller assistant can call.
//!
//! Each function has an arguments struct that derives its tool definition
//! with `#[derive(Tool)]`. [`Functions`] is the registry: it maps a call's
//! function name to a [`FunctionKind`] and decodes the JSON arguments into
//! a typed [`StoryFunction`]. Execution happens in the engine, which owns
//! the session state the functions act on.

use assistants::{FunctionCall, ToolDefinition};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use story_macros::Tool;
use thiserror::Error;

/// Errors from resolving or executing a function call.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Invalid arguments for {function}: {source}")]
    InvalidArguments {
        function: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    #[error("No active session")]
    NoActiveSession,

    #[error("No message to attach the asset to")]
    NoMessage,

    #[error("Gateway error: {0}")]
    Gateway(#[from] assistants::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Set the theme and guidelines of the current story.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Tool)]
#[tool(name = "set_story_config")]
pub struct SetStoryConfig {
    /// Overall theme or genre of the story.
    #[serde(default)]
    pub theme: Option<String>,
    /// Guidelines for how the story should be told.
    #[serde(default)]
    pub guidelines: Option<String>,
}

/// Get the theme and guidelines of the current story.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Tool)]
#[tool(name = "get_story_config")]
pub struct GetStoryConfig {}

/// List the names of every entity in the current story.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Tool)]
#[tool(name = "get_entity_names")]
pub struct GetEntityNames {}

/// Create or update the bio of a story entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Tool)]
#[tool(name = "set_entity_bio")]
pub struct SetEntityBio {
    /// Kind of entity, such as character, place or item.
    #[serde(rename = "type", default)]
    #[tool(rename = "type")]
    pub kind: String,
    /// Unique name of the entity.
    pub name: String,
    /// Description of the entity.
    #[serde(default)]
    pub desc: String,
}

/// Get the bio of a story entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Tool)]
#[tool(name = "get_entity_bio")]
pub struct GetEntityBio {
    /// Name of the entity.
    pub name: String,
}

/// Generate an image of the current scene and show it to the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Tool)]
#[tool(name = "get_generated_image")]
pub struct GetGeneratedImage {
    /// Description of the image to generate.
    pub desc: String,
    /// Names of entities in the image; their bios are added to the prompt.
    #[serde(default)]
    #[tool(optional)]
    pub entities: Vec<String>,
}

/// The tag of a registered function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionKind {
    SetStoryConfig,
    GetStoryConfig,
    GetEntityNames,
    SetEntityBio,
    GetEntityBio,
    GetGeneratedImage,
}

impl FunctionKind {
    /// Every built-in function, in registration order.
    pub const ALL: [FunctionKind; 6] = [
        FunctionKind::SetStoryConfig,
        FunctionKind::GetStoryConfig,
        FunctionKind::GetEntityNames,
        FunctionKind::SetEntityBio,
        FunctionKind::GetEntityBio,
        FunctionKind::GetGeneratedImage,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FunctionKind::SetStoryConfig => SetStoryConfig::tool_name(),
            FunctionKind::GetStoryConfig => GetStoryConfig::tool_name(),
            FunctionKind::GetEntityNames => GetEntityNames::tool_name(),
            FunctionKind::SetEntityBio => SetEntityBio::tool_name(),
            FunctionKind::GetEntityBio => GetEntityBio::tool_name(),
            FunctionKind::GetGeneratedImage => GetGeneratedImage::tool_name(),
        }
    }

    /// The tool definition advertised to the assistant.
    pub fn definition(self) -> ToolDefinition {
        match self {
            FunctionKind::SetStoryConfig => SetStoryConfig::as_tool(),
            FunctionKind::GetStoryConfig => GetStoryConfig::as_tool(),
            FunctionKind::GetEntityNames => GetEntityNames::as_tool(),
            FunctionKind::SetEntityBio => SetEntityBio::as_tool(),
            FunctionKind::GetEntityBio => GetEntityBio::as_tool(),
            FunctionKind::GetGeneratedImage => GetGeneratedImage::as_tool(),
        }
    }

    /// Decode JSON-encoded arguments for this function.
    pub fn decode(self, arguments: &str) -> Result<StoryFunction, ToolError> {
        Ok(match self {
            FunctionKind::SetStoryConfig => StoryFunction::SetStoryConfig(self.args(arguments)?),
            FunctionKind::GetStoryConfig => StoryFunction::GetStoryConfig(self.args(arguments)?),
            FunctionKind::GetEntityNames => StoryFunction::GetEntityNames(self.args(arguments)?),
            FunctionKind::SetEntityBio => StoryFunction::SetEntityBio(self.args(arguments)?),
            FunctionKind::GetEntityBio => StoryFunction::GetEntityBio(self.args(arguments)?),
            FunctionKind::GetGeneratedImage => {
                StoryFunction::GetGeneratedImage(self.args(arguments)?)
            }
        })
    }

    fn args<T: DeserializeOwned>(self, arguments: &str) -> Result<T, ToolError> {
        // Argument-less calls sometimes arrive with an empty string.
        let arguments = if arguments.trim().is_empty() {
            "{}"
        } else {
            arguments
        };
        serde_json::from_str(arguments).map_err(|source| ToolError::InvalidArguments {
            function: self.name().to_string(),
            source,
        })
    }
}

/// A decoded function call, ready to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoryFunction {
    SetStoryConfig(SetStoryConfig),
    GetStoryConfig(GetStoryConfig),
    GetEntityNames(GetEntityNames),
    SetEntityBio(SetEntityBio),
    GetEntityBio(GetEntityBio),
    GetGeneratedImage(GetGeneratedImage),
}

impl StoryFunction {
    pub fn kind(&self) -> FunctionKind {
        match self {
            StoryFunction::SetStoryConfig(_) => FunctionKind::SetStoryConfig,
            StoryFunction::GetStoryConfig(_) => FunctionKind::GetStoryConfig,
            StoryFunction::GetEntityNames(_) => FunctionKind::GetEntityNames,
            StoryFunction::SetEntityBio(_) => FunctionKind::SetEntityBio,
            StoryFunction::GetEntityBio(_) => FunctionKind::GetEntityBio,
            StoryFunction::GetGeneratedImage(_) => FunctionKind::GetGeneratedImage,
        }
    }
}

/// Registry of the functions the assistant may call, keyed by name.
#[derive(Debug, Clone)]
pub struct Functions {
    kinds: Vec<FunctionKind>,
    by_name: HashMap<&'static str, FunctionKind>,
}

impl Default for Functions {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Functions {
    /// The built-in story functions.
    pub fn builtin() -> Self {
        Self::with_kinds(FunctionKind::ALL)
    }

    /// A registry limited to the given functions.
    pub fn with_kinds(kinds: impl IntoIterator<Item = FunctionKind>) -> Self {
        let mut registry = Self {
            kinds: Vec::new(),
            by_name: HashMap::new(),
        };
        for kind in kinds {
            if registry.by_name.insert(kind.name(), kind).is_none() {
                registry.kinds.push(kind);
            }
        }
        registry
    }

    pub fn resolve(&self, name: &str) -> Result<FunctionKind, ToolError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| ToolError::UnknownFunction(name.to_string()))
    }

    /// Resolve a call by name and decode its arguments.
    pub fn decode(&self, call: &FunctionCall) -> Result<StoryFunction, ToolError> {
        self.resolve(&call.name)?.decode(&call.arguments)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Registered names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.kinds.iter().map(|kind| kind.name())
    }

    /// Tool definitions for every registered function.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.kinds.iter().map(|kind| kind.definition()).collect()
    }
}
