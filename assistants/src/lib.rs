//! Minimal OpenAI Assistants API client.
//!
//! This crate provides a focused client for the beta Assistants API with:
//! - Assistants, threads, messages, runs and run steps
//! - Tool output submission for client-side function calls
//! - Image generation and text-to-speech
//! - Fixed-backoff retry for transient failures

use base64::Engine as _;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

const API_BASE: &str = "https://api.openai.com/v1";
const BETA_HEADER: &str = "assistants=v2";
const PAGE_SIZE: u32 = 100;

/// Free-form key/value tags attached to assistants, threads, messages and runs.
pub type Metadata = BTreeMap<String, String>;

/// Errors that can occur when using the Assistants client.
#[derive(Debug, Error)]
pub enum Error {
    #[error("API key not configured")]
    NoApiKey,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Whether this failure is worth retrying (network trouble or a
    /// throttled / server-side status).
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Network(_) => true,
            Error::Api { status, .. } => matches!(status, 429 | 500 | 502 | 503 | 504),
            _ => false,
        }
    }

    /// Whether the remote object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

/// Fixed-backoff retry policy for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay between attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

/// Assistants API client.
#[derive(Clone)]
pub struct Assistants {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    retry: RetryPolicy,
}

impl Assistants {
    /// Create a new client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            api_key: api_key.into(),
            base_url: API_BASE.to_string(),
            retry: RetryPolicy::default(),
        }
    }

    /// Create a client from `OPENAI_API_KEY` (and optionally `OPENAI_BASE_URL`).
    pub fn from_env() -> Result<Self, Error> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| Error::NoApiKey)?;
        let mut client = Self::new(api_key);
        if let Ok(base_url) = std::env::var("OPENAI_BASE_URL") {
            client = client.with_base_url(base_url);
        }
        Ok(client)
    }

    /// Point the client at a different API root.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the retry policy used for transient failures.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    // ------------------------------------------------------------------------
    // Assistants
    // ------------------------------------------------------------------------

    pub async fn assistant(&self, assistant_id: &str) -> Result<Assistant, Error> {
        self.request(Method::GET, &format!("/assistants/{assistant_id}"), &[], None)
            .await
    }

    pub async fn list_assistants(&self, params: &ListParams) -> Result<Vec<Assistant>, Error> {
        self.list("/assistants", params).await
    }

    pub async fn create_assistant(&self, params: &AssistantParams) -> Result<Assistant, Error> {
        let body = to_body(params)?;
        self.request(Method::POST, "/assistants", &[], Some(&body))
            .await
    }

    pub async fn modify_assistant(
        &self,
        assistant_id: &str,
        params: &AssistantParams,
    ) -> Result<Assistant, Error> {
        let body = to_body(params)?;
        self.request(
            Method::POST,
            &format!("/assistants/{assistant_id}"),
            &[],
            Some(&body),
        )
        .await
    }

    pub async fn delete_assistant(&self, assistant_id: &str) -> Result<Deletion, Error> {
        self.request(Method::DELETE, &format!("/assistants/{assistant_id}"), &[], None)
            .await
    }

    // ------------------------------------------------------------------------
    // Threads
    // ------------------------------------------------------------------------

    pub async fn thread(&self, thread_id: &str) -> Result<Thread, Error> {
        self.request(Method::GET, &format!("/threads/{thread_id}"), &[], None)
            .await
    }

    pub async fn create_thread(&self) -> Result<Thread, Error> {
        let body = serde_json::json!({});
        self.request(Method::POST, "/threads", &[], Some(&body)).await
    }

    pub async fn delete_thread(&self, thread_id: &str) -> Result<Deletion, Error> {
        self.request(Method::DELETE, &format!("/threads/{thread_id}"), &[], None)
            .await
    }

    // ------------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------------

    pub async fn list_messages(
        &self,
        thread_id: &str,
        params: &ListParams,
    ) -> Result<Vec<ThreadMessage>, Error> {
        self.list(&format!("/threads/{thread_id}/messages"), params)
            .await
    }

    pub async fn create_message(
        &self,
        thread_id: &str,
        message: &NewMessage,
    ) -> Result<ThreadMessage, Error> {
        let body = to_body(message)?;
        self.request(
            Method::POST,
            &format!("/threads/{thread_id}/messages"),
            &[],
            Some(&body),
        )
        .await
    }

    pub async fn modify_message(
        &self,
        thread_id: &str,
        message_id: &str,
        metadata: &Metadata,
    ) -> Result<ThreadMessage, Error> {
        let body = serde_json::json!({ "metadata": metadata });
        self.request(
            Method::POST,
            &format!("/threads/{thread_id}/messages/{message_id}"),
            &[],
            Some(&body),
        )
        .await
    }

    // ------------------------------------------------------------------------
    // Runs
    // ------------------------------------------------------------------------

    pub async fn run(&self, thread_id: &str, run_id: &str) -> Result<Run, Error> {
        self.request(
            Method::GET,
            &format!("/threads/{thread_id}/runs/{run_id}"),
            &[],
            None,
        )
        .await
    }

    pub async fn list_runs(&self, thread_id: &str, params: &ListParams) -> Result<Vec<Run>, Error> {
        self.list(&format!("/threads/{thread_id}/runs"), params).await
    }

    pub async fn create_run(&self, thread_id: &str, assistant_id: &str) -> Result<Run, Error> {
        let body = serde_json::json!({ "assistant_id": assistant_id });
        self.request(
            Method::POST,
            &format!("/threads/{thread_id}/runs"),
            &[],
            Some(&body),
        )
        .await
    }

    pub async fn modify_run(
        &self,
        thread_id: &str,
        run_id: &str,
        metadata: &Metadata,
    ) -> Result<Run, Error> {
        let body = serde_json::json!({ "metadata": metadata });
        self.request(
            Method::POST,
            &format!("/threads/{thread_id}/runs/{run_id}"),
            &[],
            Some(&body),
        )
        .await
    }

    pub async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<Run, Error> {
        let body = serde_json::json!({});
        self.request(
            Method::POST,
            &format!("/threads/{thread_id}/runs/{run_id}/cancel"),
            &[],
            Some(&body),
        )
        .await
    }

    /// Submit the outputs of client-side function calls in one batch.
    pub async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<Run, Error> {
        let body = serde_json::json!({ "tool_outputs": outputs });
        self.request(
            Method::POST,
            &format!("/threads/{thread_id}/runs/{run_id}/submit_tool_outputs"),
            &[],
            Some(&body),
        )
        .await
    }

    pub async fn list_run_steps(
        &self,
        thread_id: &str,
        run_id: &str,
        params: &ListParams,
    ) -> Result<Vec<RunStep>, Error> {
        self.list(&format!("/threads/{thread_id}/runs/{run_id}/steps"), params)
            .await
    }

    // ------------------------------------------------------------------------
    // Images and audio
    // ------------------------------------------------------------------------

    pub async fn generate_image(&self, request: &ImageRequest) -> Result<ImageResponse, Error> {
        let body = to_body(request)?;
        self.request(Method::POST, "/images/generations", &[], Some(&body))
            .await
    }

    /// Synthesize speech, returning the raw audio bytes.
    pub async fn speech(&self, request: &SpeechRequest) -> Result<Vec<u8>, Error> {
        let body = to_body(request)?;
        let response = self
            .send(Method::POST, "/audio/speech", &[], Some(&body))
            .await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    // ------------------------------------------------------------------------
    // Transport
    // ------------------------------------------------------------------------

    fn build_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|e| Error::Config(format!("Invalid API key: {e}")))?,
        );
        headers.insert("OpenAI-Beta", HeaderValue::from_static(BETA_HEADER));
        Ok(headers)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&serde_json::Value>,
    ) -> Result<T, Error> {
        let response = self.send(method, path, query, body).await?;
        response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))
    }

    /// List a collection, following pagination when no explicit limit is set.
    async fn list<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &ListParams,
    ) -> Result<Vec<T>, Error> {
        if params.limit.is_some() {
            let page: Page<T> = self.request(Method::GET, path, &params.query(), None).await?;
            return Ok(page.data);
        }

        let mut items = Vec::new();
        let mut cursor = params.clone().with_limit(PAGE_SIZE);
        loop {
            let page: Page<T> = self.request(Method::GET, path, &cursor.query(), None).await?;
            items.extend(page.data);
            match page.last_id {
                Some(last_id) if page.has_more => cursor.after = Some(last_id),
                _ => break,
            }
        }
        Ok(items)
    }

    /// Send a request, retrying transient failures with a fixed delay.
    ///
    /// The last error is returned once the attempts are exhausted.
    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response, Error> {
        let headers = self.build_headers()?;
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let mut builder = self
                .client
                .request(method.clone(), self.url(path))
                .headers(headers.clone())
                .query(query);
            if let Some(body) = body {
                builder = builder.json(body);
            }

            match execute(builder).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    tracing::warn!(attempt, %path, error = %e, "transient assistants API failure");
                    tokio::time::sleep(self.retry.delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

async fn execute(builder: reqwest::RequestBuilder) -> Result<reqwest::Response, Error> {
    let response = builder
        .send()
        .await
        .map_err(|e| Error::Network(e.to_string()))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = parse_error_message(status, &body);
    if status == StatusCode::NOT_FOUND {
        return Err(Error::NotFound(message));
    }
    Err(Error::Api {
        status: status.as_u16(),
        message,
    })
}

fn to_body<T: Serialize>(value: &T) -> Result<serde_json::Value, Error> {
    serde_json::to_value(value).map_err(|e| Error::Parse(e.to_string()))
}

/// Pull the human-readable message out of an API error body.
fn parse_error_message(status: StatusCode, body: &str) -> String {
    #[derive(Deserialize)]
    struct Envelope {
        error: ApiError,
    }

    #[derive(Deserialize)]
    struct ApiError {
        message: String,
    }

    match serde_json::from_str::<Envelope>(body) {
        Ok(envelope) => envelope.error.message,
        Err(_) if !body.trim().is_empty() => body.trim().to_string(),
        Err(_) => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
    }
}

fn nullable_metadata<'de, D>(deserializer: D) -> Result<Metadata, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Metadata>::deserialize(deserializer)?.unwrap_or_default())
}

// ============================================================================
// Listing
// ============================================================================

/// Sort direction for list endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

impl Order {
    pub fn as_str(&self) -> &'static str {
        match self {
            Order::Asc => "asc",
            Order::Desc => "desc",
        }
    }
}

/// Ordering and pagination for list endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListParams {
    pub order: Order,
    /// Fetch a single page of at most this many items.
    pub limit: Option<u32>,
    /// Only items after this id.
    pub after: Option<String>,
    /// Only items before this id.
    pub before: Option<String>,
}

impl ListParams {
    pub fn asc() -> Self {
        Self::default()
    }

    pub fn desc() -> Self {
        Self {
            order: Order::Desc,
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_after(mut self, after: impl Into<String>) -> Self {
        self.after = Some(after.into());
        self
    }

    pub fn with_before(mut self, before: impl Into<String>) -> Self {
        self.before = Some(before.into());
        self
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = vec![("order", self.order.as_str().to_string())];
        if let Some(limit) = self.limit {
            query.push(("limit", limit.to_string()));
        }
        if let Some(ref after) = self.after {
            query.push(("after", after.clone()));
        }
        if let Some(ref before) = self.before {
            query.push(("before", before.clone()));
        }
        query
    }
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    data: Vec<T>,
    #[serde(default)]
    last_id: Option<String>,
    #[serde(default)]
    has_more: bool,
}

// ============================================================================
// Assistants and threads
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct Assistant {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
    pub model: String,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    #[serde(default, deserialize_with = "nullable_metadata")]
    pub metadata: Metadata,
}

/// Fields for creating or modifying an assistant. Unset fields are omitted.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AssistantParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
}

impl AssistantParams {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: Some(model.into()),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = Some(tools);
        self
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Thread {
    pub id: String,
    #[serde(default, deserialize_with = "nullable_metadata")]
    pub metadata: Metadata,
}

/// Result of a delete call.
#[derive(Debug, Clone, Deserialize)]
pub struct Deletion {
    pub id: String,
    pub deleted: bool,
}

/// A tool made available to an assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolDefinition {
    Function { function: FunctionDefinition },
    CodeInterpreter,
    FileSearch,
}

impl ToolDefinition {
    /// A client-side function tool.
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        ToolDefinition::Function {
            function: FunctionDefinition {
                name: name.into(),
                description: Some(description.into()),
                parameters,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

// ============================================================================
// Messages
// ============================================================================

/// The author of a thread message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThreadMessage {
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
    pub role: Role,
    #[serde(default)]
    pub content: Vec<MessageContent>,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default, deserialize_with = "nullable_metadata")]
    pub metadata: Metadata,
}

impl ThreadMessage {
    /// Text of the first content block, or a debug rendering of the content
    /// when the message does not start with text.
    pub fn text(&self) -> String {
        match self.content.first() {
            Some(MessageContent::Text { text }) => text.value.clone(),
            _ => format!("{:?}", self.content),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text { text: TextContent },
    ImageFile { image_file: serde_json::Value },
    ImageUrl { image_url: serde_json::Value },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextContent {
    pub value: String,
    #[serde(default)]
    pub annotations: Vec<serde_json::Value>,
}

/// A message to append to a thread.
#[derive(Debug, Clone, Serialize)]
pub struct NewMessage {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl NewMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

// ============================================================================
// Runs
// ============================================================================

/// Status of a run as reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Incomplete,
    Expired,
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::RequiresAction => "requires_action",
            RunStatus::Cancelling => "cancelling",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Failed => "failed",
            RunStatus::Completed => "completed",
            RunStatus::Incomplete => "incomplete",
            RunStatus::Expired => "expired",
            RunStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Run {
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub assistant_id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub required_action: Option<RequiredAction>,
    #[serde(default)]
    pub last_error: Option<LastError>,
    #[serde(default, deserialize_with = "nullable_metadata")]
    pub metadata: Metadata,
}

/// What the service needs from the client before a run can continue.
#[derive(Debug, Clone, Deserialize)]
pub struct RequiredAction {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub submit_tool_outputs: Option<SubmitToolOutputs>,
}

impl RequiredAction {
    pub const SUBMIT_TOOL_OUTPUTS: &'static str = "submit_tool_outputs";

    /// The requested tool calls, if this is a tool-output action.
    pub fn tool_calls(&self) -> Option<&[ToolCall]> {
        if self.kind != Self::SUBMIT_TOOL_OUTPUTS {
            return None;
        }
        self.submit_tool_outputs
            .as_ref()
            .map(|submit| submit.tool_calls.as_slice())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitToolOutputs {
    pub tool_calls: Vec<ToolCall>,
}

/// A function call the run wants the client to execute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

fn function_kind() -> String {
    "function".to_string()
}

impl ToolCall {
    pub fn function(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: function_kind(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments.
    pub arguments: String,
}

/// The string result of one tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LastError {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunStep {
    pub id: String,
    #[serde(default)]
    pub run_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    #[serde(default)]
    pub step_details: serde_json::Value,
}

// ============================================================================
// Images and audio
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ImageRequest {
    pub prompt: String,
    pub model: String,
    pub n: u32,
    pub quality: String,
    pub response_format: String,
    pub size: String,
    pub style: String,
}

impl ImageRequest {
    /// A single base64-encoded image with default generation settings.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: "dall-e-3".to_string(),
            n: 1,
            quality: "standard".to_string(),
            response_format: "b64_json".to_string(),
            size: "1024x1024".to_string(),
            style: "natural".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageResponse {
    pub data: Vec<ImageData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageData {
    #[serde(default)]
    pub b64_json: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub revised_prompt: Option<String>,
}

impl ImageData {
    /// Decode the base64 image payload.
    pub fn decode(&self) -> Result<Vec<u8>, Error> {
        let encoded = self
            .b64_json
            .as_deref()
            .ok_or_else(|| Error::Parse("image response has no b64_json payload".to_string()))?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| Error::Parse(format!("invalid image payload: {e}")))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SpeechRequest {
    pub model: String,
    pub input: String,
    pub voice: String,
    pub response_format: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = Assistants::new("test-key");
        assert_eq!(client.base_url, API_BASE);
        assert_eq!(client.retry, RetryPolicy::default());
    }

    #[test]
    fn test_client_with_base_url() {
        let client = Assistants::new("test-key").with_base_url("http://localhost:8080/v1/");
        assert_eq!(client.url("/threads"), "http://localhost:8080/v1/threads");
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::Network("reset".to_string()).is_transient());
        assert!(Error::Api { status: 503, message: String::new() }.is_transient());
        assert!(Error::Api { status: 429, message: String::new() }.is_transient());
        assert!(!Error::Api { status: 400, message: String::new() }.is_transient());
        assert!(!Error::NotFound("asst_1".to_string()).is_transient());
        assert!(Error::NotFound("asst_1".to_string()).is_not_found());
    }

    #[test]
    fn test_error_message_parsing() {
        let body = r#"{"error": {"message": "No thread found", "type": "invalid_request_error"}}"#;
        assert_eq!(
            parse_error_message(StatusCode::NOT_FOUND, body),
            "No thread found"
        );
        assert_eq!(
            parse_error_message(StatusCode::BAD_GATEWAY, ""),
            "Bad Gateway"
        );
    }

    #[test]
    fn test_list_params_query() {
        let params = ListParams::desc().with_limit(1).with_after("msg_1");
        let query = params.query();
        assert_eq!(query[0], ("order", "desc".to_string()));
        assert!(query.contains(&("limit", "1".to_string())));
        assert!(query.contains(&("after", "msg_1".to_string())));
    }

    #[test]
    fn test_run_requires_action_parsing() {
        let json = r#"{
            "id": "run_1",
            "thread_id": "thread_1",
            "assistant_id": "asst_1",
            "status": "requires_action",
            "required_action": {
                "type": "submit_tool_outputs",
                "submit_tool_outputs": {
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "get_story_config", "arguments": "{}"}
                    }]
                }
            },
            "last_error": null,
            "metadata": null
        }"#;
        let run: Run = serde_json::from_str(json).unwrap();
        assert_eq!(run.status, RunStatus::RequiresAction);
        assert!(run.metadata.is_empty());
        let calls = run.required_action.as_ref().unwrap().tool_calls().unwrap();
        assert_eq!(calls[0].function.name, "get_story_config");
    }

    #[test]
    fn test_unrecognized_run_status() {
        let run: Run = serde_json::from_str(r#"{"id": "run_1", "status": "paused"}"#).unwrap();
        assert_eq!(run.status, RunStatus::Unknown);
    }

    #[test]
    fn test_message_text() {
        let json = r#"{
            "id": "msg_1",
            "role": "assistant",
            "content": [{"type": "text", "text": {"value": "Once upon a time", "annotations": []}}],
            "metadata": {"type": "narrative"}
        }"#;
        let message: ThreadMessage = serde_json::from_str(json).unwrap();
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.text(), "Once upon a time");
        assert_eq!(message.metadata.get("type").map(String::as_str), Some("narrative"));
    }

    #[test]
    fn test_tool_definition_serialization() {
        let tool = ToolDefinition::function(
            "get_entity_names",
            "List entity names",
            serde_json::json!({"type": "object", "properties": {}}),
        );
        let value = serde_json::to_value(&tool).unwrap();
        assert_eq!(value["type"], "function");
        assert_eq!(value["function"]["name"], "get_entity_names");

        let code: ToolDefinition =
            serde_json::from_str(r#"{"type": "code_interpreter"}"#).unwrap();
        assert_eq!(code, ToolDefinition::CodeInterpreter);
    }

    #[test]
    fn test_image_decode() {
        let data = ImageData {
            b64_json: Some("aGVsbG8=".to_string()),
            url: None,
            revised_prompt: None,
        };
        assert_eq!(data.decode().unwrap(), b"hello");

        let empty = ImageData {
            b64_json: None,
            url: Some("https://example.com/img.png".to_string()),
            revised_prompt: None,
        };
        assert!(empty.decode().is_err());
    }
}
