//! The story engine: sessions, runs, tool dispatch and persistence.
//!
//! [`StoryEngine`] owns the local [`StoryState`], the assistant id and the
//! active session pointer. It is the only thing that mutates sessions, so
//! remote calls and snapshots stay in step with the in-memory state.

use crate::collection::CollectionError;
use crate::config::{ConfigError, EngineConfig};
use crate::functions::{Functions, StoryFunction, ToolError};
use crate::gateway::{Gateway, MediaGenerator};
use crate::persist::{write_snapshot, PersistError, SaveFile};
use crate::run::{self, required_tool_calls, RunError, RunState};
use crate::story::{Asset, Entity, Message, Session, StoryState};
use crate::Collection;
use assistants::{FunctionCall, ListParams, Metadata, NewMessage, Run, ToolCall, ToolOutput};
use std::path::PathBuf;
use thiserror::Error;

/// Metadata key tagging what a message is.
pub const TYPE_KEY: &str = "type";

/// `type` of user prompts.
pub const PROMPT_TYPE: &str = "prompt";

/// `type` merged into assistant replies to a prompt.
pub const NARRATIVE_TYPE: &str = "narrative";

/// Entries kept in the action log; older ones are dropped first.
pub const ACTION_LOG_LIMIT: usize = 500;

/// Errors from engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Gateway error: {0}")]
    Gateway(#[from] assistants::Error),

    #[error(transparent)]
    Run(#[from] RunError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Persistence error: {0}")]
    Persist(#[from] PersistError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Collection(#[from] CollectionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No assistant configured")]
    NoAssistant,

    #[error("No active session")]
    NoActiveSession,

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Failed to delete thread: {0}")]
    DeleteFailed(String),
}

/// Drives a storyteller assistant across persistent sessions.
pub struct StoryEngine<G> {
    gateway: G,
    config: EngineConfig,
    functions: Functions,
    state: StoryState,
    storybot_id: Option<String>,
    active: Option<String>,
    action_log: Vec<String>,
}

impl<G> StoryEngine<G> {
    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn functions(&self) -> &Functions {
        &self.functions
    }

    pub fn state(&self) -> &StoryState {
        &self.state
    }

    pub fn sessions(&self) -> &Collection<Session> {
        &self.state.sessions
    }

    pub fn storybot_id(&self) -> Option<&str> {
        self.storybot_id.as_deref()
    }

    pub fn active_session_id(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn active_session(&self) -> Option<&Session> {
        self.active
            .as_deref()
            .and_then(|id| self.state.session(id))
    }

    /// Messages of the active session.
    pub fn messages(&self) -> Option<&Collection<Message>> {
        self.active_session().map(|session| &session.messages)
    }

    /// Entities of the active session.
    pub fn entities(&self) -> Option<&Collection<Entity>> {
        self.active_session().map(|session| &session.entities)
    }

    /// The most recent engine actions, oldest first.
    pub fn action_log(&self) -> &[String] {
        &self.action_log
    }

    fn log_action(&mut self, action: impl Into<String>) {
        let action = action.into();
        tracing::info!("{action}");
        self.action_log.push(action);
        if self.action_log.len() > ACTION_LOG_LIMIT {
            let excess = self.action_log.len() - ACTION_LOG_LIMIT;
            self.action_log.drain(..excess);
        }
    }

    fn active_session_mut(&mut self) -> Result<&mut Session, ToolError> {
        let id = self.active.as_deref().ok_or(ToolError::NoActiveSession)?;
        self.state
            .sessions
            .get_mut(id)
            .ok_or(ToolError::NoActiveSession)
    }

    fn require_active(&self) -> Result<&Session, ToolError> {
        self.active_session().ok_or(ToolError::NoActiveSession)
    }
}

impl<G: Gateway + MediaGenerator> StoryEngine<G> {
    /// Create an engine. Nothing is loaded until [`StoryEngine::load`].
    pub fn new(gateway: G, config: EngineConfig) -> Self {
        Self {
            gateway,
            config,
            functions: Functions::builtin(),
            state: StoryState::new(),
            storybot_id: None,
            active: None,
            action_log: Vec::new(),
        }
    }

    /// Replace the function registry.
    pub fn with_functions(mut self, functions: Functions) -> Self {
        self.functions = functions;
        self
    }

    /// Resume from the snapshot, or start fresh if there is none.
    ///
    /// A missing or deleted assistant is recreated. Always ends with an
    /// active session.
    pub async fn load(&mut self) -> Result<(), EngineError> {
        let save_file = self.config.save_file.clone();
        self.log_action(format!("Loading saved session from: {}", save_file.display()));

        match SaveFile::load(&save_file).await? {
            Some(save) => {
                self.state = save.storystate;
                self.storybot_id = save.storybotid;
                self.active = save.activesess;

                let assistant = match self.storybot_id.clone() {
                    Some(id) => self.gateway.assistant(&id).await?,
                    None => None,
                };
                if assistant.is_none() {
                    self.create_assistant().await?;
                }

                if self.active.is_none() {
                    self.active = self
                        .state
                        .sessions
                        .last()
                        .ok()
                        .map(|session| session.id().to_string());
                }
            }
            None => {
                self.log_action("No save file found. Creating a new assistant.");
                self.create_assistant().await?;
                self.active = None;
            }
        }

        let active = self.active.clone();
        self.activate_session(active.as_deref()).await
    }

    /// Write the snapshot.
    pub async fn save(&mut self) -> Result<(), EngineError> {
        self.log_action(format!(
            "Saving session to: {}",
            self.config.save_file.display()
        ));
        write_snapshot(
            &self.config.save_file,
            &self.state,
            self.storybot_id.as_deref(),
            self.active.as_deref(),
        )
        .await?;
        Ok(())
    }

    /// Save and release the engine.
    pub async fn shutdown(mut self) -> Result<G, EngineError> {
        self.save().await?;
        Ok(self.gateway)
    }

    /// Create the storyteller assistant from the storybot config.
    pub async fn create_assistant(&mut self) -> Result<String, EngineError> {
        self.log_action(format!(
            "Creating assistant from: {}",
            self.config.bot_config.display()
        ));
        let storybot = self.config.load_storybot().await?;
        let params = storybot.assistant_params(&self.functions);
        let assistant = self.gateway.add_assistant(&params).await?;
        self.storybot_id = Some(assistant.id.clone());
        Ok(assistant.id)
    }

    /// Push the current storybot config to the existing assistant.
    pub async fn update_assistant(&mut self) -> Result<(), EngineError> {
        let id = self.storybot_id.clone().ok_or(EngineError::NoAssistant)?;
        self.log_action(format!(
            "Updating assistant from: {}",
            self.config.bot_config.display()
        ));
        let storybot = self.config.load_storybot().await?;
        let params = storybot.assistant_params(&self.functions);
        self.gateway.update_assistant(&id, &params).await?;
        Ok(())
    }

    /// Make a session active, creating a new thread when no id is given.
    ///
    /// Unknown ids get a fresh local session. The snapshot is saved, then
    /// the session's messages are reloaded from the remote thread.
    pub async fn activate_session(&mut self, session_id: Option<&str>) -> Result<(), EngineError> {
        let id = match session_id {
            Some(id) => {
                self.log_action(format!("Activating session: {id}"));
                id.to_string()
            }
            None => {
                self.log_action("Creating a session.");
                self.gateway.add_thread().await?.id
            }
        };

        if !self.state.sessions.contains(&id) {
            self.state.sessions.add(Session::new(id.as_str()));
        }
        self.active = Some(id.clone());
        self.save().await?;

        let remote = self.gateway.messages(&id, &ListParams::asc()).await?;
        let session = self
            .state
            .session_mut(&id)
            .ok_or_else(|| EngineError::SessionNotFound(id.clone()))?;
        session.messages = remote.iter().map(Message::from).collect();
        Ok(())
    }

    /// Post a user message to a session's thread.
    pub async fn add_message(
        &mut self,
        session_id: &str,
        content: &str,
        metadata: Metadata,
    ) -> Result<Message, EngineError> {
        if !self.state.sessions.contains(session_id) {
            return Err(EngineError::SessionNotFound(session_id.to_string()));
        }
        let posted = self
            .gateway
            .add_message(session_id, &NewMessage::user(content).with_metadata(metadata))
            .await?;
        let message = Message::from(posted);
        if let Some(session) = self.state.session_mut(session_id) {
            session.messages.add(message.clone());
        }
        Ok(message)
    }

    /// Send a prompt to the active session and wait for the reply.
    ///
    /// The prompt is tagged `{type: prompt}`; replies are tagged
    /// `{type: narrative}`.
    pub async fn prompt_and_wait(&mut self, content: &str) -> Result<Run, EngineError> {
        let session_id = self.active.clone().ok_or(EngineError::NoActiveSession)?;
        let storybot_id = self.storybot_id.clone().ok_or(EngineError::NoAssistant)?;

        self.add_message(&session_id, content, type_tag(PROMPT_TYPE))
            .await?;
        let run = self.gateway.add_run(&session_id, &storybot_id).await?;
        self.wait_for_run(&session_id, &run.id, Some(&type_tag(NARRATIVE_TYPE)))
            .await
    }

    /// Drive a run to completion.
    ///
    /// Each time the run stops for tool output, the requested functions are
    /// executed and their outputs submitted in one batch, then polling
    /// resumes. If a function fails, the run is cancelled before the error
    /// is returned. Once the run completes, new thread messages are pulled
    /// into the session with `post_run_metadata` merged into them.
    pub async fn wait_for_run(
        &mut self,
        session_id: &str,
        run_id: &str,
        post_run_metadata: Option<&Metadata>,
    ) -> Result<Run, EngineError> {
        let mut run_id = run_id.to_string();

        loop {
            self.log_action(format!(
                "Waiting for run: {run_id} in session: {session_id} with post_run_metadata: {post_run_metadata:?}"
            ));

            let run =
                match run::wait_for_run(&self.gateway, session_id, &run_id, &self.config.poll).await
                {
                    Ok(run) => run,
                    Err(e) => {
                        if let RunError::Failed {
                            status,
                            code,
                            message,
                            ..
                        } = &e
                        {
                            self.log_action(format!(
                                "Run failed: {status}. Error: {code} - {message}"
                            ));
                        }
                        return Err(e.into());
                    }
                };

            if RunState::from(run.status) != RunState::NeedsToolOutput {
                self.log_action(format!("Run completed with status: {}", run.status));
                self.sync_messages(session_id, post_run_metadata).await?;
                return Ok(run);
            }

            let calls = required_tool_calls(&run)?.to_vec();
            self.log_action("Run requires function call results to be submitted.");

            let outputs = match self.call_functions(&calls).await {
                Ok(outputs) => outputs,
                Err(e) => {
                    self.log_action(format!("Error calling functions: {e}"));
                    // Cancel first so the thread is not left blocked by the run.
                    if let Err(cancel) = self.gateway.cancel_run(session_id, &run_id).await {
                        tracing::warn!(%run_id, error = %cancel, "failed to cancel run");
                    }
                    return Err(e);
                }
            };

            self.log_action("Submitting function call output.");
            let next = self
                .gateway
                .submit_tool_outputs(session_id, &run_id, &outputs)
                .await?;
            run_id = next.id;
        }
    }

    /// Pull thread messages newer than the last local one.
    async fn sync_messages(
        &mut self,
        session_id: &str,
        post_run_metadata: Option<&Metadata>,
    ) -> Result<(), EngineError> {
        let session = self
            .state
            .session(session_id)
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?;
        let mut params = ListParams::asc();
        if let Ok(last) = session.messages.last() {
            params = params.with_after(last.id());
        }

        let remote = self.gateway.messages(session_id, &params).await?;
        for remote_message in &remote {
            let mut message = Message::from(remote_message);

            if let Some(extra) = post_run_metadata {
                message
                    .metadata
                    .extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
                if message.metadata != remote_message.metadata {
                    self.log_action(format!("Updating message metadata: {:?}", message.metadata));
                    self.gateway
                        .update_message(session_id, message.id(), &message.metadata)
                        .await?;
                }
            }

            if let Some(session) = self.state.session_mut(session_id) {
                session.messages.add(message);
            }
        }
        Ok(())
    }

    /// Execute a batch of tool calls in order.
    ///
    /// The first failure aborts the batch. When every call succeeds and
    /// auto-save is on, the snapshot is saved.
    pub async fn call_functions(
        &mut self,
        calls: &[ToolCall],
    ) -> Result<Vec<ToolOutput>, EngineError> {
        let mut outputs = Vec::with_capacity(calls.len());
        for call in calls {
            self.log_action(format!(
                "Calling function: {} with arguments: {}",
                call.function.name, call.function.arguments
            ));
            let output = self.call_function(&call.function).await?;
            outputs.push(ToolOutput {
                tool_call_id: call.id.clone(),
                output,
            });
        }

        if self.config.auto_save {
            self.save().await?;
        }
        Ok(outputs)
    }

    /// Resolve and execute one function call.
    pub async fn call_function(&mut self, call: &FunctionCall) -> Result<String, ToolError> {
        let function = self.functions.decode(call)?;
        self.execute(function).await
    }

    async fn execute(&mut self, function: StoryFunction) -> Result<String, ToolError> {
        match function {
            StoryFunction::SetStoryConfig(args) => {
                self.set_story_config(args.theme, args.guidelines)
            }
            StoryFunction::GetStoryConfig(_) => self.get_story_config(),
            StoryFunction::GetEntityNames(_) => self.get_entity_names(),
            StoryFunction::SetEntityBio(args) => {
                self.set_entity_bio(&args.kind, &args.name, &args.desc)
            }
            StoryFunction::GetEntityBio(args) => self.get_entity_bio(&args.name),
            StoryFunction::GetGeneratedImage(args) => {
                self.get_generated_image(&args.desc, &args.entities).await
            }
        }
    }

    /// Delete a session here and on the remote service.
    ///
    /// Nothing changes locally unless the remote deletion is confirmed. If
    /// the active session is deleted, the most recent remaining session
    /// becomes active, or a new one is created.
    pub async fn delete_session(&mut self, session_id: &str) -> Result<(), EngineError> {
        self.log_action(format!("Deleting session: {session_id}"));
        if !self.gateway.delete_thread(session_id).await? {
            return Err(EngineError::DeleteFailed(session_id.to_string()));
        }

        self.state.sessions.remove(session_id);
        if self.active.as_deref() == Some(session_id) {
            self.active = None;
            let next = self
                .state
                .sessions
                .last()
                .ok()
                .map(|session| session.id().to_string());
            self.activate_session(next.as_deref()).await?;
        }
        self.save().await
    }

    /// Give a session a display name.
    pub async fn rename_session(&mut self, session_id: &str, name: &str) -> Result<(), EngineError> {
        let session = self
            .state
            .session_mut(session_id)
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?;
        session.name = Some(name.to_string());
        self.log_action(format!("Renamed session {session_id} to: {name}"));
        self.save().await
    }

    /// Generate narration audio for a message of the active session.
    ///
    /// The audio is written to storage before it is registered as the
    /// message's `narration` asset. Returns the asset's path.
    pub async fn narrate(&mut self, message_id: &str, text: &str) -> Result<PathBuf, EngineError> {
        let speech = self.config.speech.clone();
        self.log_action(format!(
            "Generating narration for message: {message_id} with text: {text} and voice: {} in format: {}",
            speech.voice, speech.format
        ));
        self.require_active()?;

        let audio = self.gateway.generate_speech(&speech.request(text)).await?;
        let asset = Asset::new(message_id, "narration", &speech.format, &self.config.asset_dir)
            .with_data(audio);
        asset.save().await?;
        let path = asset.path();
        self.active_session_mut()?.assets.add(asset);
        self.save().await?;
        Ok(path)
    }

    /// Look up an asset of the active session.
    pub fn asset(&self, message_id: &str, name: &str, format: &str) -> Option<&Asset> {
        self.active_session()?
            .assets
            .get(&Asset::filename(message_id, name, format))
    }

    /// An asset's bytes, read from storage on first access.
    pub async fn asset_content(
        &mut self,
        message_id: &str,
        name: &str,
        format: &str,
    ) -> Result<Option<&[u8]>, EngineError> {
        let key = Asset::filename(message_id, name, format);
        self.log_action(format!(
            "Getting asset: {name} for message: {message_id} in format: {format}"
        ));
        let session = self.active_session_mut()?;
        match session.assets.get_mut(&key) {
            Some(asset) => Ok(Some(asset.content().await?)),
            None => Ok(None),
        }
    }

    /// The most recent run of a session, if any.
    pub async fn last_run(&mut self, session_id: &str) -> Result<Option<Run>, EngineError> {
        self.log_action(format!("Getting last run for session: {session_id}"));
        let runs = self
            .gateway
            .runs(session_id, &ListParams::desc().with_limit(1))
            .await?;
        Ok(runs.into_iter().next())
    }

    // ------------------------------------------------------------------------
    // Assistant functions
    //
    // These run on behalf of the assistant and act on the active session.
    // They do not save; `call_functions` does once the batch succeeds.
    // ------------------------------------------------------------------------

    pub fn set_story_config(
        &mut self,
        theme: Option<String>,
        guidelines: Option<String>,
    ) -> Result<String, ToolError> {
        let session = self.active_session_mut()?;
        let output = format!(
            "Configured theme to {} and guidelines to {}",
            or_none(theme.as_deref()),
            or_none(guidelines.as_deref())
        );
        session.theme = theme;
        session.guidelines = guidelines;
        Ok(output)
    }

    pub fn get_story_config(&self) -> Result<String, ToolError> {
        let session = self.require_active()?;
        Ok(format!(
            "Theme: {} | Guidelines: {}",
            or_none(session.theme.as_deref()),
            or_none(session.guidelines.as_deref())
        ))
    }

    pub fn get_entity_names(&self) -> Result<String, ToolError> {
        let session = self.require_active()?;
        Ok(session.entities.keys().collect::<Vec<_>>().join(","))
    }

    /// Create an entity, or update the type and description of an existing one.
    pub fn set_entity_bio(
        &mut self,
        kind: &str,
        name: &str,
        desc: &str,
    ) -> Result<String, ToolError> {
        let session = self.active_session_mut()?;
        match session.entities.get_mut(name) {
            Some(entity) => {
                entity.kind = kind.to_string();
                entity.desc = desc.to_string();
            }
            None => {
                session.entities.add(Entity::new(kind, name, desc));
            }
        }
        Ok(format!("Entity: {name} of type: {kind} set to: {desc}"))
    }

    pub fn get_entity_bio(&self, name: &str) -> Result<String, ToolError> {
        let session = self.require_active()?;
        session
            .entities
            .get(name)
            .map(Entity::to_string)
            .ok_or_else(|| ToolError::EntityNotFound(name.to_string()))
    }

    /// Generate an image and attach it to the most recent message.
    ///
    /// Descriptions of the named entities are added to the prompt; names
    /// that are not known are skipped.
    pub async fn get_generated_image(
        &mut self,
        desc: &str,
        entities: &[String],
    ) -> Result<String, ToolError> {
        let session = self.require_active()?;
        let mut prompt = desc.to_string();
        let mut missing = Vec::new();
        for name in entities {
            match session.entities.get(name) {
                Some(entity) => prompt.push_str(&format!(
                    " Entity: {name} of type: {} is described as: {}",
                    entity.kind, entity.desc
                )),
                None => missing.push(name.clone()),
            }
        }
        let message_id = session
            .messages
            .last()
            .map(|message| message.id().to_string())
            .map_err(|_| ToolError::NoMessage)?;

        for name in missing {
            tracing::warn!(%name, "image prompt names an unknown entity");
            self.log_action(format!("Could not find entity: {name}"));
        }

        let image = self
            .gateway
            .generate_image(&self.config.image.request(prompt.as_str()))
            .await?;
        self.log_action(format!(
            "Generated image for prompt: {prompt} with revised prompt: {}",
            or_none(image.revised_prompt.as_deref())
        ));

        let asset = Asset::new(message_id, "visualization", "png", &self.config.asset_dir)
            .with_data(image.data);
        asset.save().await?;
        self.active_session_mut()?.assets.add(asset);
        Ok("Success! Image presented to the user.".to_string())
    }
}

fn type_tag(value: &str) -> Metadata {
    Metadata::from([(TYPE_KEY.to_string(), value.to_string())])
}

fn or_none(value: Option<&str>) -> &str {
    value.unwrap_or("none")
}
