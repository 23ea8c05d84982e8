//! Line-oriented storyteller session.
//!
//! - Lines starting with `#` are commands (sessions, entities, narration)
//! - Every other line is a prompt for the storyteller

use assistants::{Assistants, Role};
use stories_core::{EngineConfig, EngineError, StoryEngine};
use std::io::{self, BufRead, Write};

const HELP: &[(&str, &str)] = &[
    ("#sessions", "List sessions"),
    ("#new", "Start a new session"),
    ("#load <id>", "Switch to a session"),
    ("#delete <id>", "Delete a session"),
    ("#rename <name>", "Rename the current session"),
    ("#entities", "Show the entities of the current session"),
    ("#narrate", "Narrate the latest story message"),
    ("#assets", "List the assets of the current session"),
    ("#log", "Show the engine's action log"),
    ("#update-assistant", "Push the storybot config to the assistant"),
    ("#quit", "Save and exit"),
    ("#help", "Show this help"),
];

/// Run the storyteller until `#quit` or end of input.
pub async fn run_headless(config: EngineConfig) -> Result<(), EngineError> {
    let client = Assistants::from_env()?;
    let mut engine = StoryEngine::new(client, config);
    engine.load().await?;

    println!("=== Stories ===");
    print_session(&engine);
    print_help();
    println!();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                eprintln!("Error reading input: {e}");
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('#') {
            let (name, rest) = command
                .split_once(char::is_whitespace)
                .map(|(name, rest)| (name, rest.trim()))
                .unwrap_or((command, ""));

            match name {
                "quit" | "exit" => break,
                "help" => print_help(),
                "sessions" => {
                    let active = engine.active_session_id();
                    for session in engine.sessions().iter() {
                        let marker = if Some(session.id()) == active { "*" } else { " " };
                        println!("{marker} {} {}", session.id(), session.friendly_name());
                    }
                }
                "new" => match engine.activate_session(None).await {
                    Ok(()) => print_session(&engine),
                    Err(e) => println!("{}", report(name, &e)),
                },
                "load" if !rest.is_empty() => {
                    if engine.state().session(rest).is_none() {
                        println!("[ERROR] No session with id {rest}");
                    } else {
                        match engine.activate_session(Some(rest)).await {
                            Ok(()) => {
                                print_session(&engine);
                                print_transcript(&engine, 0);
                            }
                            Err(e) => println!("{}", report(name, &e)),
                        }
                    }
                }
                "delete" if !rest.is_empty() => match engine.delete_session(rest).await {
                    Ok(()) => {
                        println!("[DELETED] {rest}");
                        print_session(&engine);
                    }
                    Err(e) => println!("{}", report(name, &e)),
                },
                "rename" if !rest.is_empty() => {
                    let Some(id) = engine.active_session_id().map(str::to_string) else {
                        println!("[ERROR] No active session");
                        continue;
                    };
                    match engine.rename_session(&id, rest).await {
                        Ok(()) => println!("[RENAMED] {rest}"),
                        Err(e) => println!("{}", report(name, &e)),
                    }
                }
                "entities" => match engine.entities() {
                    Some(entities) if !entities.is_empty() => {
                        for entity in entities.iter() {
                            println!("  {entity}");
                        }
                    }
                    _ => println!("  (none)"),
                },
                "narrate" => {
                    let latest = engine.messages().and_then(|messages| {
                        messages
                            .iter()
                            .filter(|message| message.role == Role::Assistant)
                            .last()
                            .map(|message| (message.id().to_string(), message.text.clone()))
                    });
                    match latest {
                        Some((id, text)) => match engine.narrate(&id, &text).await {
                            Ok(path) => println!("[NARRATION] {}", path.display()),
                            Err(e) => println!("{}", report(name, &e)),
                        },
                        None => println!("[ERROR] Nothing to narrate yet"),
                    }
                }
                "assets" => match engine.active_session() {
                    Some(session) if !session.assets.is_empty() => {
                        for asset in session.assets.iter() {
                            println!("  {}", asset.path().display());
                        }
                    }
                    _ => println!("  (none)"),
                },
                "log" => {
                    for entry in engine.action_log() {
                        println!("  {entry}");
                    }
                }
                "update-assistant" => match engine.update_assistant().await {
                    Ok(()) => println!("[UPDATED] Assistant configuration pushed"),
                    Err(e) => println!("{}", report(name, &e)),
                },
                "rename" => println!("[ERROR] Usage: #rename <name>"),
                "load" | "delete" => println!("[ERROR] Usage: #{name} <id>"),
                _ => println!("[ERROR] Unknown command. Type #help for help."),
            }
            stdout.flush().ok();
            continue;
        }

        print!("[THINKING]");
        stdout.flush().ok();

        let seen = engine.messages().map_or(0, |messages| messages.len());
        let result = engine.prompt_and_wait(line).await;

        print!("\r          \r");
        stdout.flush().ok();

        match result {
            Ok(_) => print_transcript(&engine, seen + 1),
            Err(e) => println!("{}", report("prompt", &e)),
        }
    }

    engine.shutdown().await?;
    println!("Goodbye!");
    Ok(())
}

/// Log a failed command and format it for the transcript.
fn report(command: &str, error: &EngineError) -> String {
    tracing::error!(command, %error, "command failed");
    format!("[ERROR] {error}")
}

/// Parse the engine configuration from command line arguments.
pub fn parse_config_from_args(args: &[String]) -> EngineConfig {
    let mut config = EngineConfig::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                if let Some(path) = args.get(i + 1) {
                    config = config.with_bot_config(path);
                    i += 1;
                }
            }
            "--save" => {
                if let Some(path) = args.get(i + 1) {
                    config = config.with_save_file(path);
                    i += 1;
                }
            }
            "--assets" => {
                if let Some(dir) = args.get(i + 1) {
                    config = config.with_asset_dir(dir);
                    i += 1;
                }
            }
            "--data-dir" => {
                if let Some(dir) = args.get(i + 1) {
                    config = config.with_data_dir(dir);
                    i += 1;
                }
            }
            "--no-autosave" => config = config.with_auto_save(false),
            _ => {}
        }
        i += 1;
    }

    config
}

fn print_help() {
    println!("Commands:");
    for (command, description) in HELP {
        println!("  {command:<20} - {description}");
    }
    println!("  (anything else is sent to the storyteller)");
}

fn print_session(engine: &StoryEngine<Assistants>) {
    if let Some(session) = engine.active_session() {
        println!("[SESSION] {} ({})", session.friendly_name(), session.id());
        if let Some(theme) = &session.theme {
            println!("  Theme: {theme}");
        }
        if let Some(guidelines) = &session.guidelines {
            println!("  Guidelines: {guidelines}");
        }
    }
}

/// Print the active session's messages from `skip` onward.
fn print_transcript(engine: &StoryEngine<Assistants>, skip: usize) {
    let Some(messages) = engine.messages() else {
        return;
    };
    for message in messages.iter().skip(skip) {
        match message.role {
            Role::User => println!("[YOU] {}", message.text),
            Role::Assistant => {
                println!("[STORY]");
                for para in message.text.split("\n\n") {
                    println!("{para}");
                }
                println!();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn args(line: &str) -> Vec<String> {
        line.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn test_report_formats_engine_errors() {
        let line = report("load", &EngineError::SessionNotFound("thread_1".to_string()));
        assert_eq!(line, "[ERROR] Session not found: thread_1");
        assert_eq!(
            report("prompt", &EngineError::NoAssistant),
            "[ERROR] No assistant configured"
        );
    }

    #[test]
    fn test_parse_defaults() {
        let config = parse_config_from_args(&args("stories"));
        assert_eq!(config.save_file, PathBuf::from("save.json"));
        assert!(config.auto_save);
    }

    #[test]
    fn test_parse_paths() {
        let config = parse_config_from_args(&args(
            "stories --config bots/alt.toml --data-dir data --no-autosave",
        ));
        assert_eq!(config.bot_config, PathBuf::from("bots/alt.toml"));
        assert_eq!(config.save_file, PathBuf::from("data").join("save.json"));
        assert_eq!(config.asset_dir, PathBuf::from("data").join("assets"));
        assert!(!config.auto_save);
    }
}
