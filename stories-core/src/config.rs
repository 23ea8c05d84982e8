//! Engine and storybot configuration.

use crate::functions::Functions;
use crate::run::PollPolicy;
use assistants::{AssistantParams, ImageRequest, SpeechRequest, ToolDefinition};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

/// Errors from loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid tools file {path}: {source}")]
    Tools {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Storybot config needs `instructions` or `instructions_file`")]
    MissingInstructions,
}

#[derive(Debug, Deserialize)]
struct BotsFile {
    storybot: StorybotEntry,
}

#[derive(Debug, Deserialize)]
struct StorybotEntry {
    name: String,
    #[serde(default)]
    desc: String,
    model: String,
    #[serde(default)]
    instructions: Option<String>,
    #[serde(default)]
    instructions_file: Option<PathBuf>,
    #[serde(default)]
    tools: Option<PathBuf>,
}

/// How the storyteller assistant is set up on the remote service.
#[derive(Debug, Clone, PartialEq)]
pub struct StorybotConfig {
    pub name: String,
    pub description: String,
    pub model: String,
    pub instructions: String,
    /// Explicit tool definitions. When absent, the function registry's
    /// derived definitions are used.
    pub tools: Option<Vec<ToolDefinition>>,
}

impl StorybotConfig {
    pub fn new(
        name: impl Into<String>,
        model: impl Into<String>,
        instructions: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            model: model.into(),
            instructions: instructions.into(),
            tools: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Load the `[storybot]` table of a TOML file.
    ///
    /// `instructions_file` and `tools` are resolved relative to the
    /// directory holding the config file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let base_dir = path.parent().unwrap_or_else(|| Path::new(""));

        let content = read(path).await?;
        let file: BotsFile = toml::from_str(&content).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })?;
        let entry = file.storybot;

        let instructions = match (entry.instructions, entry.instructions_file) {
            (Some(inline), _) => inline,
            (None, Some(file)) => read(&base_dir.join(file)).await?,
            (None, None) => return Err(ConfigError::MissingInstructions),
        };

        let tools = match entry.tools {
            Some(file) => {
                let tools_path = base_dir.join(file);
                let raw = read(&tools_path).await?;
                let tools = serde_json::from_str(&raw).map_err(|source| ConfigError::Tools {
                    path: tools_path,
                    source,
                })?;
                Some(tools)
            }
            None => None,
        };

        Ok(Self {
            name: entry.name,
            description: entry.desc,
            model: entry.model,
            instructions,
            tools,
        })
    }

    /// Parameters for creating or updating the assistant.
    pub fn assistant_params(&self, functions: &Functions) -> AssistantParams {
        let tools = self
            .tools
            .clone()
            .unwrap_or_else(|| functions.definitions());
        AssistantParams::new(&self.model)
            .with_name(&self.name)
            .with_description(&self.description)
            .with_instructions(&self.instructions)
            .with_tools(tools)
    }
}

async fn read(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })
}

/// Image generation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageGenArgs {
    pub model: String,
    pub style: String,
    pub quality: String,
    pub size: String,
}

impl Default for ImageGenArgs {
    fn default() -> Self {
        Self {
            model: "dall-e-3".to_string(),
            style: "natural".to_string(),
            quality: "standard".to_string(),
            size: "1024x1024".to_string(),
        }
    }
}

impl ImageGenArgs {
    pub fn request(&self, prompt: impl Into<String>) -> ImageRequest {
        ImageRequest {
            model: self.model.clone(),
            style: self.style.clone(),
            quality: self.quality.clone(),
            size: self.size.clone(),
            ..ImageRequest::new(prompt)
        }
    }
}

/// Speech synthesis settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechArgs {
    pub model: String,
    pub voice: String,
    /// Audio format, also used as the narration asset's extension.
    pub format: String,
}

impl Default for SpeechArgs {
    fn default() -> Self {
        Self {
            model: "tts-1".to_string(),
            voice: "alloy".to_string(),
            format: "opus".to_string(),
        }
    }
}

impl SpeechArgs {
    pub fn request(&self, input: impl Into<String>) -> SpeechRequest {
        SpeechRequest {
            model: self.model.clone(),
            input: input.into(),
            voice: self.voice.clone(),
            response_format: self.format.clone(),
        }
    }
}

/// Configuration for a [`crate::StoryEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// TOML file with the `[storybot]` table.
    pub bot_config: PathBuf,

    /// Snapshot file.
    pub save_file: PathBuf,

    /// Directory holding asset files.
    pub asset_dir: PathBuf,

    /// Save after every successful batch of tool calls.
    pub auto_save: bool,

    /// Run polling bounds.
    pub poll: PollPolicy,

    pub image: ImageGenArgs,

    pub speech: SpeechArgs,

    /// Storybot settings to use instead of reading `bot_config`.
    pub storybot: Option<StorybotConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bot_config: PathBuf::from("config/bots.toml"),
            save_file: PathBuf::from("save.json"),
            asset_dir: PathBuf::from("assets"),
            auto_save: true,
            poll: PollPolicy::default(),
            image: ImageGenArgs::default(),
            speech: SpeechArgs::default(),
            storybot: None,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bot_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.bot_config = path.into();
        self
    }

    pub fn with_save_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.save_file = path.into();
        self
    }

    pub fn with_asset_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.asset_dir = path.into();
        self
    }

    /// Keep the snapshot and assets under one directory.
    pub fn with_data_dir(self, dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        self.with_save_file(dir.join("save.json"))
            .with_asset_dir(dir.join("assets"))
    }

    pub fn with_auto_save(mut self, auto_save: bool) -> Self {
        self.auto_save = auto_save;
        self
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_image_args(mut self, image: ImageGenArgs) -> Self {
        self.image = image;
        self
    }

    pub fn with_speech_args(mut self, speech: SpeechArgs) -> Self {
        self.speech = speech;
        self
    }

    pub fn with_storybot(mut self, storybot: StorybotConfig) -> Self {
        self.storybot = Some(storybot);
        self
    }

    /// The storybot settings: the in-memory override, or `bot_config`.
    pub async fn load_storybot(&self) -> Result<StorybotConfig, ConfigError> {
        match &self.storybot {
            Some(storybot) => Ok(storybot.clone()),
            None => StorybotConfig::load(&self.bot_config).await,
        }
    }
}
