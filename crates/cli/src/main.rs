//! Buddy CLI — the main entry point.
//!
//! Commands:
//! - `init`      — Write a default config file
//! - `chat`      — Interactive chat or single-message mode
//! - `history`   — Show recent turns
//! - `tasks`     — List captured tasks
//! - `task-done` — Mark a task completed
//! - `profile`   — Show what Buddy knows about a user
//! - `reindex`   — Index turns that were stored but never indexed
//! - `reset`     — Forget the conversation with a user

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "buddy",
    about = "Buddy — a personal assistant that remembers",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the config directory and a default config.toml
    Init,

    /// Chat with Buddy
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Who is talking
        #[arg(short, long, env = "BUDDY_USER", default_value = "user")]
        user: String,
    },

    /// Show recent conversation turns
    History {
        #[arg(short, long, env = "BUDDY_USER", default_value = "user")]
        user: String,

        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// List tasks
    Tasks {
        #[arg(short, long, env = "BUDDY_USER", default_value = "user")]
        user: String,

        /// pending, completed, cancelled or all
        #[arg(short, long, default_value = "pending")]
        status: String,
    },

    /// Mark a task as completed
    TaskDone {
        /// Task id as shown by `buddy tasks`
        id: i64,
    },

    /// Show the stored user profile
    Profile {
        #[arg(short, long, env = "BUDDY_USER", default_value = "user")]
        user: String,
    },

    /// Index turns left unindexed by an earlier failure
    Reindex {
        #[arg(short, long, default_value_t = 500)]
        limit: usize,
    },

    /// Forget the conversation history with a user (profile and tasks stay)
    Reset {
        #[arg(short, long, env = "BUDDY_USER", default_value = "user")]
        user: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Init => commands::init::run().await?,
        Commands::Chat { message, user } => commands::chat::run(&user, message).await?,
        Commands::History { user, limit } => commands::history::run(&user, limit).await?,
        Commands::Tasks { user, status } => commands::tasks::list(&user, &status).await?,
        Commands::TaskDone { id } => commands::tasks::done(id).await?,
        Commands::Profile { user } => commands::profile::run(&user).await?,
        Commands::Reindex { limit } => commands::reindex::run(limit).await?,
        Commands::Reset { user } => commands::reset::run(&user).await?,
    }

    Ok(())
}
