use anyhow::Result;
use clap::{Parser, Subcommand};
use imagestudio::cli::{self, GenerateArgs};
use imagestudio::config::StudioConfig;
use imagestudio::telemetry;

#[derive(Parser)]
#[command(author, version, about = "Prompt-to-image studio for the Gemini image models")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the interactive studio session
    Repl,
    /// Generate a single image and exit
    Generate(GenerateArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();

    let args = Args::parse();
    let config = StudioConfig::load()?;
    tracing::debug!(
        api_base = %config.api_base,
        has_api_key = config.api_key.is_some(),
        "configuration loaded"
    );

    match args.command.unwrap_or(Command::Repl) {
        Command::Repl => cli::run_repl(config).await,
        Command::Generate(generate) => cli::run_once(config, generate).await,
    }
}
