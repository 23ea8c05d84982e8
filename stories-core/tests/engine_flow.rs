//! Engine flows against the scripted mock service.
//!
//! Run with: `cargo test -p stories-core --test engine_flow`

use assistants::{Metadata, Role, RunStatus, ToolCall, ToolOutput};
use std::time::Duration;
use stories_core::testing::{metadata, Call, MockGateway, ScriptStep};
use stories_core::{
    EngineConfig, EngineError, Gateway, PollPolicy, RunError, SaveFile, Session, StoryEngine,
    StorybotConfig, ToolError,
};
use tempfile::TempDir;

fn config(dir: &TempDir) -> EngineConfig {
    EngineConfig::new()
        .with_data_dir(dir.path())
        .with_poll_policy(PollPolicy::default().with_interval(Duration::ZERO))
        .with_storybot(StorybotConfig::new(
            "Storyteller",
            "gpt-4o",
            "Tell interactive stories.",
        ))
}

/// An engine that has gone through a first-run load.
async fn started(dir: &TempDir) -> StoryEngine<MockGateway> {
    let mut engine = StoryEngine::new(MockGateway::new(), config(dir));
    engine.load().await.expect("first run should load");
    engine
}

fn active_id(engine: &StoryEngine<MockGateway>) -> String {
    engine
        .active_session_id()
        .expect("engine should have an active session")
        .to_string()
}

// =============================================================================
// Tool dispatch
// =============================================================================

#[tokio::test]
async fn test_tool_outputs_follow_call_order() {
    let dir = TempDir::new().unwrap();
    let mut engine = started(&dir).await;

    engine.gateway().script_run(vec![ScriptStep::RequiresTools(vec![
        ToolCall::function(
            "call_1",
            "set_story_config",
            r#"{"theme": "noir", "guidelines": "short scenes"}"#,
        ),
        ToolCall::function("call_2", "get_story_config", ""),
    ])]);
    engine
        .gateway()
        .script_run(vec![ScriptStep::reply("The rain never stops.")]);

    let run = engine.prompt_and_wait("Begin").await.unwrap();
    assert_eq!(run.status, RunStatus::Completed);

    assert_eq!(
        engine.gateway().submitted_outputs(),
        vec![vec![
            ToolOutput {
                tool_call_id: "call_1".to_string(),
                output: "Configured theme to noir and guidelines to short scenes".to_string(),
            },
            ToolOutput {
                tool_call_id: "call_2".to_string(),
                output: "Theme: noir | Guidelines: short scenes".to_string(),
            },
        ]]
    );

    let session = engine.active_session().unwrap();
    assert_eq!(session.theme.as_deref(), Some("noir"));
    assert_eq!(session.guidelines.as_deref(), Some("short scenes"));
}

#[tokio::test]
async fn test_failing_call_cancels_run_without_submitting() {
    let dir = TempDir::new().unwrap();
    let mut engine = started(&dir).await;

    engine.gateway().script_run(vec![ScriptStep::RequiresTools(vec![
        ToolCall::function(
            "call_1",
            "set_entity_bio",
            r#"{"type": "character", "name": "Mira", "desc": "A lighthouse keeper"}"#,
        ),
        ToolCall::function("call_2", "get_entity_bio", r#"{"name": "Nobody"}"#),
    ])]);

    let err = engine.prompt_and_wait("Who is there?").await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Tool(ToolError::EntityNotFound(ref name)) if name == "Nobody"
    ));

    let gateway = engine.gateway();
    assert_eq!(gateway.cancellations(), 1);
    assert!(gateway.submitted_outputs().is_empty());
    assert!(matches!(gateway.calls().last(), Some(Call::CancelRun(_))));

    // The partial batch was not saved.
    let saved = SaveFile::load(&engine.config().save_file)
        .await
        .unwrap()
        .unwrap();
    let session = saved.storystate.session(&active_id(&engine)).unwrap();
    assert!(session.entities.is_empty());
}

#[tokio::test]
async fn test_unknown_function_cancels_run() {
    let dir = TempDir::new().unwrap();
    let mut engine = started(&dir).await;

    engine
        .gateway()
        .script_run(vec![ScriptStep::RequiresTools(vec![ToolCall::function(
            "call_1",
            "summon_dragon",
            "{}",
        )])]);

    let err = engine.prompt_and_wait("Summon it").await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Tool(ToolError::UnknownFunction(ref name)) if name == "summon_dragon"
    ));
    assert_eq!(engine.gateway().cancellations(), 1);
}

#[tokio::test]
async fn test_tool_chain_carries_post_run_metadata() {
    let dir = TempDir::new().unwrap();
    let mut engine = started(&dir).await;

    engine
        .gateway()
        .script_run(vec![ScriptStep::RequiresTools(vec![ToolCall::function(
            "call_1",
            "set_entity_bio",
            r#"{"type": "character", "name": "Mira", "desc": "A lighthouse keeper"}"#,
        )])]);
    engine
        .gateway()
        .script_run(vec![ScriptStep::RequiresTools(vec![ToolCall::function(
            "call_2",
            "get_entity_bio",
            r#"{"name": "Mira"}"#,
        )])]);
    engine
        .gateway()
        .script_run(vec![ScriptStep::reply("Mira waves from the gallery.")]);

    engine.prompt_and_wait("Introduce someone").await.unwrap();

    let outputs = engine.gateway().submitted_outputs();
    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs[1][0].output, "Mira (character) | A lighthouse keeper");

    let reply = engine.messages().unwrap().last().unwrap();
    assert_eq!(reply.role, Role::Assistant);
    assert_eq!(reply.kind(), Some("narrative"));

    // Auto-save persisted the entity once the batch succeeded.
    let saved = SaveFile::load(&engine.config().save_file)
        .await
        .unwrap()
        .unwrap();
    let session = saved.storystate.session(&active_id(&engine)).unwrap();
    assert!(session.entities.contains("Mira"));
}

#[tokio::test]
async fn test_unsupported_action_is_fatal() {
    let dir = TempDir::new().unwrap();
    let mut engine = started(&dir).await;

    engine
        .gateway()
        .script_run(vec![ScriptStep::RequiresAction("submit_client_vibes".to_string())]);

    let err = engine.prompt_and_wait("Begin").await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Run(RunError::UnsupportedAction(ref kind)) if kind == "submit_client_vibes"
    ));
    assert!(engine.gateway().submitted_outputs().is_empty());
}

// =============================================================================
// Runs and messages
// =============================================================================

#[tokio::test]
async fn test_prompt_and_reply_are_tagged() {
    let dir = TempDir::new().unwrap();
    let mut engine = started(&dir).await;

    engine.gateway().script_run(vec![
        ScriptStep::Status(RunStatus::Queued),
        ScriptStep::Status(RunStatus::InProgress),
        ScriptStep::reply("Once upon a time."),
    ]);
    engine.prompt_and_wait("Tell me a story").await.unwrap();

    let messages: Vec<_> = engine.messages().unwrap().iter().collect();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].text, "Tell me a story");
    assert_eq!(messages[0].kind(), Some("prompt"));
    assert_eq!(messages[1].text, "Once upon a time.");
    assert_eq!(messages[1].kind(), Some("narrative"));

    // The remote copy carries the same tag.
    let remote = engine.gateway().thread_messages(&active_id(&engine));
    assert_eq!(
        remote[1].metadata.get("type").map(String::as_str),
        Some("narrative")
    );
}

#[tokio::test]
async fn test_failed_run_is_reported() {
    let dir = TempDir::new().unwrap();
    let mut engine = started(&dir).await;

    engine.gateway().script_run(vec![
        ScriptStep::Status(RunStatus::Queued),
        ScriptStep::Failed {
            code: "rate_limit_exceeded".to_string(),
            message: "Slow down".to_string(),
        },
    ]);

    let err = engine.prompt_and_wait("Begin").await.unwrap_err();
    match err {
        EngineError::Run(RunError::Failed { code, message, .. }) => {
            assert_eq!(code, "rate_limit_exceeded");
            assert_eq!(message, "Slow down");
        }
        other => panic!("expected a failed run, got {other:?}"),
    }
    assert!(engine
        .action_log()
        .iter()
        .any(|entry| entry == "Run failed: failed. Error: rate_limit_exceeded - Slow down"));
}

#[tokio::test]
async fn test_only_newer_messages_are_appended() {
    let dir = TempDir::new().unwrap();
    let mut engine = started(&dir).await;
    let thread = active_id(&engine);

    let m1 = engine
        .gateway()
        .seed_message(&thread, Role::User, "Begin", metadata([("type", "prompt")]))
        .unwrap();
    engine.activate_session(Some(&thread)).await.unwrap();

    let m2 = engine
        .gateway()
        .seed_message(
            &thread,
            Role::Assistant,
            "The fog rolls in.",
            metadata([("mood", "tense")]),
        )
        .unwrap();
    let m3 = engine
        .gateway()
        .seed_message(
            &thread,
            Role::Assistant,
            "A bell tolls.",
            metadata([("type", "narrative")]),
        )
        .unwrap();

    engine
        .gateway()
        .script_run(vec![ScriptStep::Complete(Vec::new())]);
    let storybot = engine.storybot_id().unwrap().to_string();
    let run = engine.gateway().add_run(&thread, &storybot).await.unwrap();
    engine.gateway().clear_calls();

    engine
        .wait_for_run(&thread, &run.id, Some(&metadata([("type", "narrative")])))
        .await
        .unwrap();

    let messages = engine.messages().unwrap();
    let ids: Vec<_> = messages.keys().collect();
    assert_eq!(ids, vec![m1.id.as_str(), m2.id.as_str(), m3.id.as_str()]);

    assert_eq!(
        messages.get(&m1.id).unwrap().metadata,
        metadata([("type", "prompt")])
    );
    assert_eq!(
        messages.get(&m2.id).unwrap().metadata,
        metadata([("mood", "tense"), ("type", "narrative")])
    );
    assert_eq!(
        messages.get(&m3.id).unwrap().metadata,
        metadata([("type", "narrative")])
    );

    let calls = engine.gateway().calls();
    assert!(calls.contains(&Call::Messages {
        thread_id: thread.clone(),
        after: Some(m1.id.clone()),
    }));

    // Only the message whose metadata actually changed is pushed back.
    let updates: Vec<_> = calls
        .iter()
        .filter_map(|call| match call {
            Call::UpdateMessage { message_id, .. } => Some(message_id.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(updates, vec![m2.id.clone()]);
    assert_eq!(
        engine.gateway().thread_messages(&thread)[1].metadata,
        metadata([("mood", "tense"), ("type", "narrative")])
    );
}

#[tokio::test]
async fn test_last_run() {
    let dir = TempDir::new().unwrap();
    let mut engine = started(&dir).await;
    let thread = active_id(&engine);

    assert!(engine.last_run(&thread).await.unwrap().is_none());

    engine.prompt_and_wait("One").await.unwrap();
    let second = engine.prompt_and_wait("Two").await.unwrap();

    let last = engine.last_run(&thread).await.unwrap().unwrap();
    assert_eq!(last.id, second.id);
    assert_eq!(last.status, RunStatus::Completed);
}

// =============================================================================
// Sessions
// =============================================================================

#[tokio::test]
async fn test_deleting_only_session_starts_a_new_one() {
    let dir = TempDir::new().unwrap();
    let mut engine = started(&dir).await;
    let old = active_id(&engine);
    engine
        .set_entity_bio("character", "Mira", "A lighthouse keeper")
        .unwrap();

    engine.delete_session(&old).await.unwrap();

    let new = active_id(&engine);
    assert_ne!(new, old);
    assert_eq!(engine.sessions().len(), 1);
    assert!(engine.state().session(&old).is_none());
    assert!(engine.entities().unwrap().is_empty());
    assert!(!engine.gateway().has_thread(&old));

    let saved = SaveFile::load(&engine.config().save_file)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(saved.activesess.as_deref(), Some(new.as_str()));
    assert!(saved.storystate.session(&old).is_none());
}

#[tokio::test]
async fn test_deleting_active_session_falls_back_to_latest() {
    let dir = TempDir::new().unwrap();
    let mut engine = started(&dir).await;
    let first = active_id(&engine);
    engine.activate_session(None).await.unwrap();
    let second = active_id(&engine);
    engine.activate_session(Some(&first)).await.unwrap();

    engine.delete_session(&first).await.unwrap();

    assert_eq!(active_id(&engine), second);
    assert_eq!(engine.sessions().len(), 1);
}

#[tokio::test]
async fn test_deleting_inactive_session_keeps_active() {
    let dir = TempDir::new().unwrap();
    let mut engine = started(&dir).await;
    let first = active_id(&engine);
    engine.activate_session(None).await.unwrap();
    let second = active_id(&engine);

    engine.delete_session(&first).await.unwrap();

    assert_eq!(active_id(&engine), second);
    assert!(engine.state().session(&first).is_none());
}

#[tokio::test]
async fn test_refused_deletion_changes_nothing() {
    let dir = TempDir::new().unwrap();
    let mut engine = started(&dir).await;
    let thread = active_id(&engine);
    engine.gateway().refuse_thread_deletion(true);

    let err = engine.delete_session(&thread).await.unwrap_err();
    assert!(matches!(err, EngineError::DeleteFailed(ref id) if id == &thread));
    assert_eq!(active_id(&engine), thread);
    assert!(engine.state().session(&thread).is_some());
}

#[tokio::test]
async fn test_rename_session() {
    let dir = TempDir::new().unwrap();
    let mut engine = started(&dir).await;
    let thread = active_id(&engine);

    engine.rename_session(&thread, "The Drowned Bell").await.unwrap();
    assert_eq!(
        engine.active_session().unwrap().friendly_name(),
        "The Drowned Bell"
    );
    assert!(matches!(
        engine.rename_session("thread_missing", "x").await,
        Err(EngineError::SessionNotFound(_))
    ));
}

// =============================================================================
// Load and save
// =============================================================================

#[tokio::test]
async fn test_first_run_creates_assistant_and_session() {
    let dir = TempDir::new().unwrap();
    let engine = started(&dir).await;

    let gateway = engine.gateway();
    assert_eq!(gateway.count(|call| matches!(call, Call::AddAssistant(_))), 1);
    assert_eq!(gateway.count(|call| matches!(call, Call::AddThread)), 1);
    assert_eq!(engine.sessions().len(), 1);
    assert!(engine.storybot_id().is_some());

    let saved = SaveFile::load(&engine.config().save_file)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(saved.storybotid.as_deref(), engine.storybot_id());
    assert_eq!(saved.activesess.as_deref(), engine.active_session_id());
}

#[tokio::test]
async fn test_resume_restores_state_and_messages() {
    let dir = TempDir::new().unwrap();
    let mut engine = started(&dir).await;
    let thread = active_id(&engine);
    let storybot = engine.storybot_id().unwrap().to_string();

    engine
        .set_entity_bio("character", "Mira", "A lighthouse keeper")
        .unwrap();
    engine.rename_session(&thread, "Lighthouse").await.unwrap();
    engine
        .gateway()
        .seed_message(&thread, Role::User, "Hello", Metadata::new())
        .unwrap();

    let gateway = engine.shutdown().await.unwrap();
    let mut resumed = StoryEngine::new(gateway, config(&dir));
    resumed.load().await.unwrap();

    assert_eq!(active_id(&resumed), thread);
    assert_eq!(resumed.storybot_id(), Some(storybot.as_str()));
    assert_eq!(
        resumed.gateway().count(|call| matches!(call, Call::AddAssistant(_))),
        1
    );

    let session = resumed.active_session().unwrap();
    assert_eq!(session.friendly_name(), "Lighthouse");
    assert_eq!(session.entities.get("Mira").unwrap().desc, "A lighthouse keeper");
    assert_eq!(session.messages.len(), 1);
    assert_eq!(session.messages.first().unwrap().text, "Hello");
}

#[tokio::test]
async fn test_missing_assistant_is_recreated() {
    let dir = TempDir::new().unwrap();
    let engine = started(&dir).await;
    let old = engine.storybot_id().unwrap().to_string();

    let gateway = engine.shutdown().await.unwrap();
    gateway.forget_assistant(&old);

    let mut resumed = StoryEngine::new(gateway, config(&dir));
    resumed.load().await.unwrap();

    let new = resumed.storybot_id().unwrap().to_string();
    assert_ne!(new, old);
    assert_eq!(resumed.gateway().assistant_ids(), vec![new]);
}

#[tokio::test]
async fn test_snapshot_without_active_session_uses_latest() {
    let dir = TempDir::new().unwrap();
    let gateway = MockGateway::new();
    let first = gateway.seed_thread();
    let second = gateway.seed_thread();

    let mut save = SaveFile::default();
    save.storystate.sessions.add(Session::new(first.as_str()));
    save.storystate.sessions.add(Session::new(second.as_str()));
    let engine_config = config(&dir);
    save.save(&engine_config.save_file).await.unwrap();

    let mut engine = StoryEngine::new(gateway, engine_config);
    engine.load().await.unwrap();

    assert_eq!(active_id(&engine), second);
    assert!(engine.storybot_id().is_some());
    assert_eq!(
        engine.gateway().count(|call| matches!(call, Call::AddThread)),
        0
    );
}

// =============================================================================
// Assets
// =============================================================================

#[tokio::test]
async fn test_generated_image_attaches_to_latest_message() {
    let dir = TempDir::new().unwrap();
    let mut engine = started(&dir).await;
    engine
        .set_entity_bio("character", "Mira", "A lighthouse keeper")
        .unwrap();

    engine
        .gateway()
        .script_run(vec![ScriptStep::RequiresTools(vec![ToolCall::function(
            "call_1",
            "get_generated_image",
            r#"{"desc": "The lighthouse at dusk.", "entities": ["Mira", "Nobody"]}"#,
        )])]);
    engine
        .gateway()
        .script_run(vec![ScriptStep::reply("Behold.")]);

    engine.prompt_and_wait("Show me").await.unwrap();

    let prompt_id = engine.messages().unwrap().first().unwrap().id().to_string();
    let asset = engine
        .asset(&prompt_id, "visualization", "png")
        .expect("image asset should be attached to the prompt message");
    let expected_prompt =
        "The lighthouse at dusk. Entity: Mira of type: character is described as: A lighthouse keeper";
    assert_eq!(
        std::fs::read(asset.path()).unwrap(),
        format!("image:{expected_prompt}").into_bytes()
    );

    assert!(engine
        .gateway()
        .calls()
        .contains(&Call::GenerateImage(expected_prompt.to_string())));
    assert!(engine
        .action_log()
        .iter()
        .any(|entry| entry == "Could not find entity: Nobody"));
    assert_eq!(
        engine.gateway().submitted_outputs()[0][0].output,
        "Success! Image presented to the user."
    );
}

#[tokio::test]
async fn test_narration_round_trip() {
    let dir = TempDir::new().unwrap();
    let mut engine = started(&dir).await;

    let path = engine.narrate("msg_x", "Once upon a time").await.unwrap();
    assert_eq!(path, dir.path().join("assets").join("msg_x-narration.opus"));
    assert_eq!(std::fs::read(&path).unwrap(), b"speech:Once upon a time");
    assert!(engine.asset("msg_x", "narration", "opus").is_some());
    assert!(engine.asset("msg_x", "narration", "mp3").is_none());

    let gateway = engine.shutdown().await.unwrap();
    let mut resumed = StoryEngine::new(gateway, config(&dir));
    resumed.load().await.unwrap();

    let asset = resumed.asset("msg_x", "narration", "opus").unwrap();
    assert!(asset.cached().is_none());
    let content = resumed
        .asset_content("msg_x", "narration", "opus")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(content, b"speech:Once upon a time");
    assert!(resumed
        .asset_content("msg_x", "visualization", "png")
        .await
        .unwrap()
        .is_none());
}
