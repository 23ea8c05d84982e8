//! Testing utilities for the story engine.
//!
//! This module provides tools for integration testing:
//! - `MockGateway`, an in-memory stand-in for the remote service
//! - `ScriptStep` for scripting how each run progresses
//! - A call log for asserting what the engine asked the service to do

use crate::gateway::{Gateway, GeneratedImage, MediaGenerator};
use assistants::{
    Assistant, AssistantParams, Error, ImageRequest, ListParams, MessageContent, Metadata,
    NewMessage, Order, RequiredAction, Role, Run, RunStatus, RunStep, SpeechRequest,
    SubmitToolOutputs, TextContent, Thread, ThreadMessage, ToolCall, ToolOutput,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

/// One observation of a scripted run.
///
/// Each status fetch consumes one step; the last step repeats forever.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptStep {
    /// Report this status (typically queued or in progress).
    Status(RunStatus),
    /// Ask the client to execute these function calls.
    RequiresTools(Vec<ToolCall>),
    /// Ask for a required action the client does not support.
    RequiresAction(String),
    /// Fail with a service error.
    Failed { code: String, message: String },
    /// Complete, appending these assistant replies to the thread.
    Complete(Vec<String>),
    /// The status fetch itself fails with a transient error.
    Unavailable,
}

impl ScriptStep {
    /// Complete with a single assistant reply.
    pub fn reply(text: impl Into<String>) -> Self {
        ScriptStep::Complete(vec![text.into()])
    }
}

/// A call the engine made, recorded in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Assistant(String),
    AddAssistant(String),
    UpdateAssistant(String),
    DeleteAssistant(String),
    AddThread,
    DeleteThread(String),
    Messages { thread_id: String, after: Option<String> },
    AddMessage { thread_id: String, content: String },
    UpdateMessage { message_id: String, metadata: Metadata },
    Run(String),
    Runs(String),
    AddRun { thread_id: String, assistant_id: String },
    UpdateRun(String),
    CancelRun(String),
    SubmitToolOutputs { run_id: String, outputs: Vec<ToolOutput> },
    Steps(String),
    GenerateImage(String),
    GenerateSpeech(String),
}

#[derive(Debug)]
struct MockRun {
    run: Run,
    steps: VecDeque<ScriptStep>,
    replied: bool,
}

#[derive(Debug, Default)]
struct MockState {
    next_id: u32,
    assistants: BTreeMap<String, Assistant>,
    threads: BTreeMap<String, Vec<ThreadMessage>>,
    runs: HashMap<String, MockRun>,
    scripts: VecDeque<Vec<ScriptStep>>,
    calls: Vec<Call>,
    refuse_thread_deletion: bool,
}

impl MockState {
    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}_{:04}", self.next_id)
    }

    fn thread_mut(&mut self, thread_id: &str) -> Result<&mut Vec<ThreadMessage>, Error> {
        self.threads
            .get_mut(thread_id)
            .ok_or_else(|| Error::NotFound(format!("No thread found with id '{thread_id}'")))
    }

    fn run_mut(&mut self, run_id: &str) -> Result<&mut MockRun, Error> {
        self.runs
            .get_mut(run_id)
            .ok_or_else(|| Error::NotFound(format!("No run found with id '{run_id}'")))
    }

    fn push_message(
        &mut self,
        thread_id: &str,
        role: Role,
        text: &str,
        metadata: Metadata,
    ) -> Result<ThreadMessage, Error> {
        let id = self.id("msg");
        let created_at = i64::from(self.next_id);
        let message = ThreadMessage {
            id,
            thread_id: thread_id.to_string(),
            role,
            content: vec![MessageContent::Text {
                text: TextContent {
                    value: text.to_string(),
                    annotations: Vec::new(),
                },
            }],
            run_id: None,
            created_at,
            metadata,
        };
        self.thread_mut(thread_id)?.push(message.clone());
        Ok(message)
    }

    fn next_script(&mut self) -> VecDeque<ScriptStep> {
        self.scripts
            .pop_front()
            .unwrap_or_else(|| vec![ScriptStep::Complete(Vec::new())])
            .into()
    }
}

/// A scripted, in-memory remote service.
///
/// Use this for deterministic engine tests without API calls. Threads,
/// messages and assistants behave like a tiny in-memory service; runs follow
/// the scripts queued with [`MockGateway::script_run`].
#[derive(Debug, Default)]
pub struct MockGateway {
    state: Mutex<MockState>,
}

impl MockGateway {
    /// Create an empty mock service.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue the script for the next run that is created, or for the
    /// continuation of a run after tool outputs are submitted.
    ///
    /// Runs with no queued script complete immediately without replies.
    pub fn script_run(&self, steps: Vec<ScriptStep>) {
        self.state().scripts.push_back(steps);
    }

    /// Make thread deletion report failure.
    pub fn refuse_thread_deletion(&self, refuse: bool) {
        self.state().refuse_thread_deletion = refuse;
    }

    /// Append a message directly to a remote thread, bypassing the call log.
    pub fn seed_message(
        &self,
        thread_id: &str,
        role: Role,
        text: &str,
        metadata: Metadata,
    ) -> Result<ThreadMessage, Error> {
        self.state().push_message(thread_id, role, text, metadata)
    }

    /// Create a thread directly, bypassing the call log.
    pub fn seed_thread(&self) -> String {
        let mut state = self.state();
        let id = state.id("thread");
        state.threads.insert(id.clone(), Vec::new());
        id
    }

    /// Remove an assistant directly, as if deleted elsewhere.
    pub fn forget_assistant(&self, assistant_id: &str) {
        self.state().assistants.remove(assistant_id);
    }

    /// The remote copy of a thread's messages, oldest first.
    pub fn thread_messages(&self, thread_id: &str) -> Vec<ThreadMessage> {
        self.state()
            .threads
            .get(thread_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn has_thread(&self, thread_id: &str) -> bool {
        self.state().threads.contains_key(thread_id)
    }

    pub fn assistant_ids(&self) -> Vec<String> {
        self.state().assistants.keys().cloned().collect()
    }

    /// Every call made so far.
    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    /// Count the calls matching a predicate.
    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.state().calls.iter().filter(|call| predicate(call)).count()
    }

    /// How many times a run's status was fetched.
    pub fn retrievals(&self, run_id: &str) -> usize {
        self.count(|call| matches!(call, Call::Run(id) if id == run_id))
    }

    /// How many runs were cancelled.
    pub fn cancellations(&self) -> usize {
        self.count(|call| matches!(call, Call::CancelRun(_)))
    }

    /// Every batch of submitted tool outputs.
    pub fn submitted_outputs(&self) -> Vec<Vec<ToolOutput>> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::SubmitToolOutputs { outputs, .. } => Some(outputs.clone()),
                _ => None,
            })
            .collect()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    fn record(&self, call: Call) {
        self.state().calls.push(call);
    }
}

fn observe(run: &mut Run, step: &ScriptStep) {
    run.required_action = None;
    run.last_error = None;
    match step {
        ScriptStep::Status(status) => run.status = *status,
        ScriptStep::RequiresTools(calls) => {
            run.status = RunStatus::RequiresAction;
            run.required_action = Some(RequiredAction {
                kind: RequiredAction::SUBMIT_TOOL_OUTPUTS.to_string(),
                submit_tool_outputs: Some(SubmitToolOutputs {
                    tool_calls: calls.clone(),
                }),
            });
        }
        ScriptStep::RequiresAction(kind) => {
            run.status = RunStatus::RequiresAction;
            run.required_action = Some(RequiredAction {
                kind: kind.clone(),
                submit_tool_outputs: None,
            });
        }
        ScriptStep::Failed { code, message } => {
            run.status = RunStatus::Failed;
            run.last_error = Some(assistants::LastError {
                code: code.clone(),
                message: message.clone(),
            });
        }
        ScriptStep::Complete(_) => run.status = RunStatus::Completed,
        ScriptStep::Unavailable => {}
    }
}

#[async_trait]
impl Gateway for MockGateway {
    async fn assistant(&self, assistant_id: &str) -> Result<Option<Assistant>, Error> {
        self.record(Call::Assistant(assistant_id.to_string()));
        Ok(self.state().assistants.get(assistant_id).cloned())
    }

    async fn assistants(&self, params: &ListParams) -> Result<Vec<Assistant>, Error> {
        let mut assistants: Vec<_> = self.state().assistants.values().cloned().collect();
        if params.order == Order::Desc {
            assistants.reverse();
        }
        if let Some(limit) = params.limit {
            assistants.truncate(limit as usize);
        }
        Ok(assistants)
    }

    async fn add_assistant(&self, params: &AssistantParams) -> Result<Assistant, Error> {
        let mut state = self.state();
        let id = state.id("asst");
        let assistant = Assistant {
            id: id.clone(),
            name: params.name.clone(),
            description: params.description.clone(),
            instructions: params.instructions.clone(),
            model: params.model.clone().unwrap_or_default(),
            tools: params.tools.clone().unwrap_or_default(),
            metadata: Metadata::new(),
        };
        state.assistants.insert(id.clone(), assistant.clone());
        state.calls.push(Call::AddAssistant(id));
        Ok(assistant)
    }

    async fn update_assistant(
        &self,
        assistant_id: &str,
        params: &AssistantParams,
    ) -> Result<Assistant, Error> {
        let mut state = self.state();
        state.calls.push(Call::UpdateAssistant(assistant_id.to_string()));
        let assistant = state
            .assistants
            .get_mut(assistant_id)
            .ok_or_else(|| Error::NotFound(format!("No assistant found with id '{assistant_id}'")))?;
        if let Some(model) = &params.model {
            assistant.model = model.clone();
        }
        if params.name.is_some() {
            assistant.name = params.name.clone();
        }
        if params.description.is_some() {
            assistant.description = params.description.clone();
        }
        if params.instructions.is_some() {
            assistant.instructions = params.instructions.clone();
        }
        if let Some(tools) = &params.tools {
            assistant.tools = tools.clone();
        }
        Ok(assistant.clone())
    }

    async fn delete_assistant(&self, assistant_id: &str) -> Result<bool, Error> {
        let mut state = self.state();
        state.calls.push(Call::DeleteAssistant(assistant_id.to_string()));
        Ok(state.assistants.remove(assistant_id).is_some())
    }

    async fn thread(&self, thread_id: &str) -> Result<Option<Thread>, Error> {
        Ok(self.state().threads.contains_key(thread_id).then(|| Thread {
            id: thread_id.to_string(),
            metadata: Metadata::new(),
        }))
    }

    async fn add_thread(&self) -> Result<Thread, Error> {
        let mut state = self.state();
        let id = state.id("thread");
        state.threads.insert(id.clone(), Vec::new());
        state.calls.push(Call::AddThread);
        Ok(Thread {
            id,
            metadata: Metadata::new(),
        })
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<bool, Error> {
        let mut state = self.state();
        state.calls.push(Call::DeleteThread(thread_id.to_string()));
        if state.refuse_thread_deletion {
            return Ok(false);
        }
        Ok(state.threads.remove(thread_id).is_some())
    }

    async fn messages(
        &self,
        thread_id: &str,
        params: &ListParams,
    ) -> Result<Vec<ThreadMessage>, Error> {
        let mut state = self.state();
        state.calls.push(Call::Messages {
            thread_id: thread_id.to_string(),
            after: params.after.clone(),
        });

        let mut messages = state.thread_mut(thread_id)?.clone();
        if params.order == Order::Desc {
            messages.reverse();
        }
        if let Some(after) = &params.after {
            if let Some(position) = messages.iter().position(|m| &m.id == after) {
                messages.drain(..=position);
            }
        }
        if let Some(before) = &params.before {
            if let Some(position) = messages.iter().position(|m| &m.id == before) {
                messages.truncate(position);
            }
        }
        if let Some(limit) = params.limit {
            messages.truncate(limit as usize);
        }
        Ok(messages)
    }

    async fn add_message(
        &self,
        thread_id: &str,
        message: &NewMessage,
    ) -> Result<ThreadMessage, Error> {
        let mut state = self.state();
        state.calls.push(Call::AddMessage {
            thread_id: thread_id.to_string(),
            content: message.content.clone(),
        });
        state.push_message(thread_id, message.role, &message.content, message.metadata.clone())
    }

    async fn update_message(
        &self,
        thread_id: &str,
        message_id: &str,
        metadata: &Metadata,
    ) -> Result<ThreadMessage, Error> {
        let mut state = self.state();
        state.calls.push(Call::UpdateMessage {
            message_id: message_id.to_string(),
            metadata: metadata.clone(),
        });
        let message = state
            .thread_mut(thread_id)?
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| Error::NotFound(format!("No message found with id '{message_id}'")))?;
        message.metadata = metadata.clone();
        Ok(message.clone())
    }

    async fn run(&self, thread_id: &str, run_id: &str) -> Result<Run, Error> {
        let mut state = self.state();
        state.calls.push(Call::Run(run_id.to_string()));

        let mock = state.run_mut(run_id)?;
        let step = if mock.steps.len() > 1 {
            mock.steps.pop_front()
        } else {
            mock.steps.front().cloned()
        }
        .unwrap_or(ScriptStep::Complete(Vec::new()));

        if step == ScriptStep::Unavailable {
            return Err(Error::Api {
                status: 503,
                message: "Service unavailable".to_string(),
            });
        }
        observe(&mut mock.run, &step);
        let run = mock.run.clone();

        if let ScriptStep::Complete(replies) = step {
            if !mock.replied {
                mock.replied = true;
                for reply in replies {
                    state.push_message(thread_id, Role::Assistant, &reply, Metadata::new())?;
                }
            }
        }
        Ok(run)
    }

    async fn runs(&self, thread_id: &str, params: &ListParams) -> Result<Vec<Run>, Error> {
        let mut state = self.state();
        state.calls.push(Call::Runs(thread_id.to_string()));
        let mut runs: Vec<_> = state
            .runs
            .values()
            .filter(|mock| mock.run.thread_id == thread_id)
            .map(|mock| mock.run.clone())
            .collect();
        // Ids are zero-padded sequence numbers, so they sort by creation.
        runs.sort_by(|a, b| a.id.cmp(&b.id));
        if params.order == Order::Desc {
            runs.reverse();
        }
        if let Some(limit) = params.limit {
            runs.truncate(limit as usize);
        }
        Ok(runs)
    }

    async fn add_run(&self, thread_id: &str, assistant_id: &str) -> Result<Run, Error> {
        let mut state = self.state();
        state.calls.push(Call::AddRun {
            thread_id: thread_id.to_string(),
            assistant_id: assistant_id.to_string(),
        });
        state.thread_mut(thread_id)?;

        let id = state.id("run");
        let run = Run {
            id: id.clone(),
            thread_id: thread_id.to_string(),
            assistant_id: assistant_id.to_string(),
            status: RunStatus::Queued,
            required_action: None,
            last_error: None,
            metadata: Metadata::new(),
        };
        let steps = state.next_script();
        state.runs.insert(
            id,
            MockRun {
                run: run.clone(),
                steps,
                replied: false,
            },
        );
        Ok(run)
    }

    async fn update_run(
        &self,
        _thread_id: &str,
        run_id: &str,
        metadata: &Metadata,
    ) -> Result<Run, Error> {
        let mut state = self.state();
        state.calls.push(Call::UpdateRun(run_id.to_string()));
        let mock = state.run_mut(run_id)?;
        mock.run.metadata = metadata.clone();
        Ok(mock.run.clone())
    }

    async fn cancel_run(&self, _thread_id: &str, run_id: &str) -> Result<Run, Error> {
        let mut state = self.state();
        state.calls.push(Call::CancelRun(run_id.to_string()));
        let mock = state.run_mut(run_id)?;
        mock.steps = VecDeque::from([ScriptStep::Status(RunStatus::Cancelled)]);
        mock.run.status = RunStatus::Cancelling;
        mock.run.required_action = None;
        Ok(mock.run.clone())
    }

    async fn submit_tool_outputs(
        &self,
        _thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<Run, Error> {
        let mut state = self.state();
        state.calls.push(Call::SubmitToolOutputs {
            run_id: run_id.to_string(),
            outputs: outputs.to_vec(),
        });
        if state.run_mut(run_id)?.run.status != RunStatus::RequiresAction {
            return Err(Error::Api {
                status: 400,
                message: format!("Run {run_id} is not waiting for tool outputs"),
            });
        }
        let steps = state.next_script();
        let mock = state.run_mut(run_id)?;
        mock.steps = steps;
        mock.run.status = RunStatus::Queued;
        mock.run.required_action = None;
        Ok(mock.run.clone())
    }

    async fn steps(
        &self,
        _thread_id: &str,
        run_id: &str,
        _params: &ListParams,
    ) -> Result<Vec<RunStep>, Error> {
        self.record(Call::Steps(run_id.to_string()));
        Ok(Vec::new())
    }
}

#[async_trait]
impl MediaGenerator for MockGateway {
    async fn generate_image(&self, request: &ImageRequest) -> Result<GeneratedImage, Error> {
        self.record(Call::GenerateImage(request.prompt.clone()));
        Ok(GeneratedImage {
            data: format!("image:{}", request.prompt).into_bytes(),
            revised_prompt: None,
        })
    }

    async fn generate_speech(&self, request: &SpeechRequest) -> Result<Vec<u8>, Error> {
        self.record(Call::GenerateSpeech(request.input.clone()));
        Ok(format!("speech:{}", request.input).into_bytes())
    }
}

/// Build a metadata map from pairs.
pub fn metadata<const N: usize>(pairs: [(&str, &str); N]) -> Metadata {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_last_step_repeats() {
        let gateway = MockGateway::new();
        let thread = gateway.add_thread().await.unwrap();
        gateway.script_run(vec![ScriptStep::Status(RunStatus::InProgress)]);
        let run = gateway.add_run(&thread.id, "asst_1").await.unwrap();

        for _ in 0..3 {
            let polled = gateway.run(&thread.id, &run.id).await.unwrap();
            assert_eq!(polled.status, RunStatus::InProgress);
        }
        assert_eq!(gateway.retrievals(&run.id), 3);
    }

    #[tokio::test]
    async fn test_replies_appended_once() {
        let gateway = MockGateway::new();
        let thread = gateway.add_thread().await.unwrap();
        gateway.script_run(vec![ScriptStep::reply("The fog rolls in.")]);
        let run = gateway.add_run(&thread.id, "asst_1").await.unwrap();

        gateway.run(&thread.id, &run.id).await.unwrap();
        gateway.run(&thread.id, &run.id).await.unwrap();

        let messages = gateway.thread_messages(&thread.id);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::Assistant);
        assert_eq!(messages[0].text(), "The fog rolls in.");
    }

    #[tokio::test]
    async fn test_message_listing_after_cursor() {
        let gateway = MockGateway::new();
        let thread_id = gateway.seed_thread();
        let first = gateway
            .seed_message(&thread_id, Role::User, "one", Metadata::new())
            .unwrap();
        gateway
            .seed_message(&thread_id, Role::Assistant, "two", Metadata::new())
            .unwrap();

        let after = gateway
            .messages(&thread_id, &ListParams::asc().with_after(first.id.as_str()))
            .await
            .unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].text(), "two");

        let newest = gateway
            .messages(&thread_id, &ListParams::desc().with_limit(1))
            .await
            .unwrap();
        assert_eq!(newest[0].text(), "two");
    }

    #[tokio::test]
    async fn test_refused_thread_deletion() {
        let gateway = MockGateway::new();
        let thread = gateway.add_thread().await.unwrap();
        gateway.refuse_thread_deletion(true);
        assert!(!gateway.delete_thread(&thread.id).await.unwrap());
        assert!(gateway.has_thread(&thread.id));
    }
}
