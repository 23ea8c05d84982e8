//! Interactive storytelling engine driving a remote AI assistant.
//!
//! This crate provides:
//! - A local mirror of story sessions (entities, assets, messages)
//! - Run orchestration: polling, tool-call dispatch and message sync
//! - Story functions the assistant calls to track entities and make images
//! - Snapshot persistence
//!
//! # Quick Start
//!
//! ```ignore
//! use assistants::Assistants;
//! use stories_core::{EngineConfig, StoryEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let gateway = Assistants::from_env()?;
//!     let mut engine = StoryEngine::new(gateway, EngineConfig::default());
//!
//!     engine.load().await?;
//!     engine.prompt_and_wait("Tell me a story about a lighthouse").await?;
//!
//!     if let Some(reply) = engine.messages().and_then(|m| m.last().ok()) {
//!         println!("{}", reply.text);
//!     }
//!     Ok(())
//! }
//! ```

pub mod collection;
pub mod config;
pub mod engine;
pub mod functions;
pub mod gateway;
pub mod persist;
pub mod run;
pub mod story;
pub mod testing;

// Re-export for convenience
pub use story_macros::Tool;

// Primary public API
pub use collection::{Collection, CollectionError, Keyed};
pub use config::{ConfigError, EngineConfig, ImageGenArgs, SpeechArgs, StorybotConfig};
pub use engine::{EngineError, StoryEngine};
pub use functions::{FunctionKind, Functions, StoryFunction, ToolError};
pub use gateway::{Gateway, GeneratedImage, MediaGenerator};
pub use persist::{PersistError, SaveFile};
pub use run::{PollPolicy, RunError, RunState};
pub use story::{Asset, Entity, Message, Session, StoryState};
pub use testing::{MockGateway, ScriptStep};

#[cfg(test)]
mod tests {
    use super::*;

    /// Describe a scene for the illustrator
    #[derive(Tool)]
    #[tool(name = "describe_scene")]
    #[allow(dead_code)]
    struct DescribeScene {
        /// Kind of scene, e.g. interior or landscape
        #[tool(rename = "type")]
        kind: String,
        mood: Option<String>,
        #[tool(optional)]
        entities: Vec<String>,
    }

    #[test]
    fn test_derived_tool_properties() {
        let schema = DescribeScene::input_schema();
        let properties = &schema["properties"];

        assert_eq!(properties["type"]["type"], "string");
        assert_eq!(
            properties["type"]["description"],
            "Kind of scene, e.g. interior or landscape"
        );
        assert!(properties.get("kind").is_none());
        assert!(properties["mood"].get("description").is_none());
        assert_eq!(properties["entities"]["type"], "array");
        assert_eq!(properties["entities"]["items"]["type"], "string");
    }

    #[test]
    fn test_derived_tool_requires_only_mandatory_fields() {
        let schema = DescribeScene::input_schema();
        assert_eq!(schema["required"], serde_json::json!(["type"]));
    }

    #[test]
    fn test_derived_tool_definition() {
        let assistants::ToolDefinition::Function { function } = DescribeScene::as_tool() else {
            panic!("derived tools are function tools");
        };
        assert_eq!(function.name, "describe_scene");
        assert_eq!(
            function.description.as_deref(),
            Some("Describe a scene for the illustrator")
        );
        assert_eq!(function.parameters, DescribeScene::input_schema());
    }
}
