//! Interactive storyteller.
//!
//! A line-oriented client for the storytelling engine. Every line is sent to
//! the storyteller as a prompt; lines starting with `#` are commands.
//!
//! ```bash
//! cargo run -p stories -- --data-dir ~/.stories --config config/bots.toml
//! ```

mod headless;

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("STORIES_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    // Check for API key
    if std::env::var("OPENAI_API_KEY").is_err() {
        eprintln!("Error: OPENAI_API_KEY environment variable not set.");
        eprintln!("Please set it in .env file or with: export OPENAI_API_KEY=your_key_here");
        std::process::exit(1);
    }

    let config = headless::parse_config_from_args(&args);
    headless::run_headless(config).await.map_err(|e| e.into())
}

fn print_help() {
    println!("Stories - interactive storytelling with an AI assistant");
    println!();
    println!("USAGE:");
    println!("  stories [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("  -h, --help            Show this help message");
    println!("  --config <PATH>       Storybot config (default: config/bots.toml)");
    println!("  --save <PATH>         Snapshot file (default: save.json)");
    println!("  --assets <DIR>        Asset directory (default: assets)");
    println!("  --data-dir <DIR>      Keep the snapshot and assets under DIR");
    println!("  --no-autosave         Do not save after each batch of tool calls");
    println!();
    println!("ENVIRONMENT:");
    println!("  OPENAI_API_KEY        API key for the assistants service (required)");
    println!("  OPENAI_BASE_URL       Alternate API root");
    println!("  STORIES_LOG           Log filter, e.g. info or stories_core=debug");
}
