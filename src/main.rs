//! Remedi Chat - terminal client for the Remedi messaging backend
//!
//! Realtime chat with the admin team, individual users and the assistant
//! bot, plus polled notifications.

mod api;
mod auth;
mod chat;
mod config;
mod models;
mod notifications;
mod realtime;
mod tui;

use std::fs::OpenOptions;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chat::ConversationKind;

#[derive(Parser)]
#[command(name = "remedi-chat")]
#[command(about = "Terminal chat and notification client for Remedi", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Which conversation a command talks to. Defaults to the admin team.
#[derive(Args, Debug)]
#[group(multiple = false)]
struct Target {
    /// Direct conversation with this user id
    #[arg(long, value_name = "ID")]
    user: Option<String>,

    /// The shared admin team channel
    #[arg(long)]
    admin: bool,

    /// The assistant bot
    #[arg(long)]
    bot: bool,
}

impl Target {
    fn is_set(&self) -> bool {
        self.user.is_some() || self.admin || self.bot
    }

    fn into_kind(self) -> ConversationKind {
        match self.user {
            Some(counterpart_id) => ConversationKind::Direct { counterpart_id },
            None if self.bot => ConversationKind::Bot,
            None => ConversationKind::AdminPool,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Log in with email and password
    Login {
        #[arg(short, long)]
        email: String,

        /// Read from stdin when omitted
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Log out and clear cached credentials
    Logout,

    /// Show current authentication status
    Status,

    /// Read messages from a conversation
    Read {
        #[command(flatten)]
        target: Target,

        /// Maximum number of messages to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Send a message
    Send {
        #[command(flatten)]
        target: Target,

        /// Message content
        message: String,
    },

    /// Print pushed chat events as they arrive
    Listen {
        #[command(flatten)]
        target: Target,
    },

    /// Show notifications
    Notifications {
        /// Keep polling and print changes
        #[arg(short, long)]
        watch: bool,
    },

    /// Launch the terminal user interface
    Tui,
}

/// Log to stderr, or to a file in TUI mode so output does not corrupt the
/// alternate screen.
fn init_logging(verbose: bool, to_file: bool) -> Result<()> {
    let filter = if verbose { "debug" } else { "info" };
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    let (stderr_layer, file_layer) = if to_file {
        let path = config::Config::data_dir()?.join("remedi-chat.log");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        let layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(Mutex::new(file));
        (None, Some(layer))
    } else {
        (
            Some(tracing_subscriber::fmt::layer().with_target(false)),
            None,
        )
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose, matches!(cli.command, Commands::Tui))?;

    match cli.command {
        Commands::Login { email, password } => {
            tracing::info!("Logging in as {}...", email);
            auth::login(&email, password).await?;
        }
        Commands::Logout => {
            tracing::info!("Logging out...");
            auth::logout().await?;
        }
        Commands::Status => {
            auth::status().await?;
        }
        Commands::Read { target, limit } => {
            chat::read_conversation(target.into_kind(), limit).await?;
        }
        Commands::Send { target, message } => {
            tracing::info!("Sending message...");
            chat::send_to_conversation(target.into_kind(), &message).await?;
        }
        Commands::Listen { target } => {
            let kind = target.is_set().then(|| target.into_kind());
            realtime::listen(kind).await?;
        }
        Commands::Notifications { watch } => {
            notifications::show(watch).await?;
        }
        Commands::Tui => {
            tui::run().await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_defaults_to_admin_team() {
        let cli = Cli::try_parse_from(["remedi-chat", "send", "hello"]).unwrap();
        let Commands::Send { target, message } = cli.command else {
            panic!("expected send");
        };
        assert_eq!(message, "hello");
        assert_eq!(target.into_kind(), ConversationKind::AdminPool);
    }

    #[test]
    fn test_target_flags() {
        let cli = Cli::try_parse_from(["remedi-chat", "read", "--user", "42", "-l", "5"]).unwrap();
        let Commands::Read { target, limit } = cli.command else {
            panic!("expected read");
        };
        assert_eq!(limit, 5);
        assert_eq!(
            target.into_kind(),
            ConversationKind::Direct {
                counterpart_id: "42".into()
            }
        );

        let cli = Cli::try_parse_from(["remedi-chat", "listen", "--bot"]).unwrap();
        let Commands::Listen { target } = cli.command else {
            panic!("expected listen");
        };
        assert!(target.is_set());
        assert_eq!(target.into_kind(), ConversationKind::Bot);
    }

    #[test]
    fn test_targets_are_exclusive() {
        assert!(Cli::try_parse_from(["remedi-chat", "read", "--bot", "--admin"]).is_err());
    }
}
