//! Capability seams between the engine and the remote services.
//!
//! [`Gateway`] covers the conversation surface (assistants, threads,
//! messages, runs). [`MediaGenerator`] covers image and speech synthesis.
//! Both are implemented for [`assistants::Assistants`]; tests use
//! [`crate::testing::MockGateway`].

use assistants::{
    Assistant, AssistantParams, Assistants, Error, ImageRequest, ListParams, Metadata, NewMessage,
    Run, RunStep, SpeechRequest, Thread, ThreadMessage, ToolOutput,
};
use async_trait::async_trait;

/// The remote conversation service as seen by the engine.
///
/// Lookups of assistants and threads report a missing object as `None`
/// rather than an error, so callers can fall back (for example by creating
/// a new assistant).
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn assistant(&self, assistant_id: &str) -> Result<Option<Assistant>, Error>;

    async fn assistants(&self, params: &ListParams) -> Result<Vec<Assistant>, Error>;

    async fn add_assistant(&self, params: &AssistantParams) -> Result<Assistant, Error>;

    async fn update_assistant(
        &self,
        assistant_id: &str,
        params: &AssistantParams,
    ) -> Result<Assistant, Error>;

    /// Returns whether the service confirmed the deletion.
    async fn delete_assistant(&self, assistant_id: &str) -> Result<bool, Error>;

    async fn thread(&self, thread_id: &str) -> Result<Option<Thread>, Error>;

    async fn add_thread(&self) -> Result<Thread, Error>;

    /// Returns whether the service confirmed the deletion.
    async fn delete_thread(&self, thread_id: &str) -> Result<bool, Error>;

    async fn messages(
        &self,
        thread_id: &str,
        params: &ListParams,
    ) -> Result<Vec<ThreadMessage>, Error>;

    async fn add_message(
        &self,
        thread_id: &str,
        message: &NewMessage,
    ) -> Result<ThreadMessage, Error>;

    /// Replace a message's metadata.
    async fn update_message(
        &self,
        thread_id: &str,
        message_id: &str,
        metadata: &Metadata,
    ) -> Result<ThreadMessage, Error>;

    async fn run(&self, thread_id: &str, run_id: &str) -> Result<Run, Error>;

    async fn runs(&self, thread_id: &str, params: &ListParams) -> Result<Vec<Run>, Error>;

    async fn add_run(&self, thread_id: &str, assistant_id: &str) -> Result<Run, Error>;

    async fn update_run(
        &self,
        thread_id: &str,
        run_id: &str,
        metadata: &Metadata,
    ) -> Result<Run, Error>;

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<Run, Error>;

    /// Submit every output of a tool-call batch at once.
    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<Run, Error>;

    async fn steps(
        &self,
        thread_id: &str,
        run_id: &str,
        params: &ListParams,
    ) -> Result<Vec<RunStep>, Error>;
}

/// A generated image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub data: Vec<u8>,
    /// The prompt the service actually used, if it rewrote ours.
    pub revised_prompt: Option<String>,
}

/// Image and speech synthesis.
#[async_trait]
pub trait MediaGenerator: Send + Sync {
    async fn generate_image(&self, request: &ImageRequest) -> Result<GeneratedImage, Error>;

    async fn generate_speech(&self, request: &SpeechRequest) -> Result<Vec<u8>, Error>;
}

/// Turn a not-found error into an absent value.
fn absent<T>(result: Result<T, Error>) -> Result<Option<T>, Error> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl Gateway for Assistants {
    async fn assistant(&self, assistant_id: &str) -> Result<Option<Assistant>, Error> {
        absent(Assistants::assistant(self, assistant_id).await)
    }

    async fn assistants(&self, params: &ListParams) -> Result<Vec<Assistant>, Error> {
        self.list_assistants(params).await
    }

    async fn add_assistant(&self, params: &AssistantParams) -> Result<Assistant, Error> {
        self.create_assistant(params).await
    }

    async fn update_assistant(
        &self,
        assistant_id: &str,
        params: &AssistantParams,
    ) -> Result<Assistant, Error> {
        self.modify_assistant(assistant_id, params).await
    }

    async fn delete_assistant(&self, assistant_id: &str) -> Result<bool, Error> {
        Ok(Assistants::delete_assistant(self, assistant_id).await?.deleted)
    }

    async fn thread(&self, thread_id: &str) -> Result<Option<Thread>, Error> {
        absent(Assistants::thread(self, thread_id).await)
    }

    async fn add_thread(&self) -> Result<Thread, Error> {
        self.create_thread().await
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<bool, Error> {
        Ok(Assistants::delete_thread(self, thread_id).await?.deleted)
    }

    async fn messages(
        &self,
        thread_id: &str,
        params: &ListParams,
    ) -> Result<Vec<ThreadMessage>, Error> {
        self.list_messages(thread_id, params).await
    }

    async fn add_message(
        &self,
        thread_id: &str,
        message: &NewMessage,
    ) -> Result<ThreadMessage, Error> {
        self.create_message(thread_id, message).await
    }

    async fn update_message(
        &self,
        thread_id: &str,
        message_id: &str,
        metadata: &Metadata,
    ) -> Result<ThreadMessage, Error> {
        self.modify_message(thread_id, message_id, metadata).await
    }

    async fn run(&self, thread_id: &str, run_id: &str) -> Result<Run, Error> {
        Assistants::run(self, thread_id, run_id).await
    }

    async fn runs(&self, thread_id: &str, params: &ListParams) -> Result<Vec<Run>, Error> {
        self.list_runs(thread_id, params).await
    }

    async fn add_run(&self, thread_id: &str, assistant_id: &str) -> Result<Run, Error> {
        self.create_run(thread_id, assistant_id).await
    }

    async fn update_run(
        &self,
        thread_id: &str,
        run_id: &str,
        metadata: &Metadata,
    ) -> Result<Run, Error> {
        self.modify_run(thread_id, run_id, metadata).await
    }

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<Run, Error> {
        Assistants::cancel_run(self, thread_id, run_id).await
    }

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<Run, Error> {
        Assistants::submit_tool_outputs(self, thread_id, run_id, outputs).await
    }

    async fn steps(
        &self,
        thread_id: &str,
        run_id: &str,
        params: &ListParams,
    ) -> Result<Vec<RunStep>, Error> {
        self.list_run_steps(thread_id, run_id, params).await
    }
}

#[async_trait]
impl MediaGenerator for Assistants {
    async fn generate_image(&self, request: &ImageRequest) -> Result<GeneratedImage, Error> {
        let response = Assistants::generate_image(self, request).await?;
        let image = response
            .data
            .first()
            .ok_or_else(|| Error::Parse("image response contained no images".to_string()))?;
        Ok(GeneratedImage {
            data: image.decode()?,
            revised_prompt: image.revised_prompt.clone(),
        })
    }

    async fn generate_speech(&self, request: &SpeechRequest) -> Result<Vec<u8>, Error> {
        self.speech(request).await
    }
}
