use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::prelude::*;

use amora_realtime::AppDirs;
use amora_realtime::config::{FileConfig, Profile, load_config};

mod cli;

#[derive(Parser)]
#[command(name = "amora")]
#[command(about = "Chat with your Amora matches from the terminal")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Custom data directory (defaults to ~/.amora)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Server preset: local or production
    #[arg(long, global = true)]
    profile: Option<Profile>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the stored sign-in
    #[command(subcommand)]
    Session(SessionCommand),

    /// List conversations with their latest message
    Conversations,

    /// Open an interactive chat with another user
    Chat(ChatArgs),
}

#[derive(Subcommand)]
enum SessionCommand {
    /// Store a user id and session token
    Set { user_id: String, token: String },
    /// Print the signed-in user
    Show,
    /// Sign out
    Clear,
}

#[derive(Parser)]
struct ChatArgs {
    /// User id of the person to chat with
    user_id: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let dirs = AppDirs::new(cli.data_dir.clone()).context("Failed to prepare data directory")?;
    let config: FileConfig = load_config(&dirs.data_dir, cli.profile.as_ref())
        .extract()
        .with_context(|| format!("Invalid config in {}", dirs.config_toml_path().display()))?;

    match cli.command {
        Commands::Session(SessionCommand::Set { user_id, token }) => {
            cli::session::set_command(&dirs, &user_id, &token)
        }
        Commands::Session(SessionCommand::Show) => cli::session::show_command(&dirs),
        Commands::Session(SessionCommand::Clear) => cli::session::clear_command(&dirs),
        Commands::Conversations => cli::conversations_command(&dirs, &config).await,
        Commands::Chat(args) => cli::chat::chat_command(&dirs, &config, &args.user_id).await,
    }
}

/// Logs go to stderr so they never interleave with chat output on stdout.
fn init_logging(debug: bool) {
    let default_directive = if debug {
        "amora=debug,amora_realtime=debug,warn"
    } else {
        "amora=info,amora_realtime=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}
