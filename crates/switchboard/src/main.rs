//! Command-line client for the Switchboard sync core.

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use log::{debug, info};
use std::path::PathBuf;
use std::sync::Arc;
use switchboard::backend::{PollingChangeFeed, RestBackend, WebhookMessenger};
use switchboard::config::SwitchboardConfig;
use switchboard::core::{ConsoleView, Messenger, StreamState, SyncService};
use switchboard::protocol::Role;

/// Command-line options for the Switchboard client.
#[derive(Parser, Debug)]
#[command(name = "switchboard", version)]
struct Cli {
    /// Optional path to a switchboard.json5 config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum CliCommand {
    /// Follow the conversation list (and optionally one conversation) until Ctrl-C
    Watch {
        /// Conversation to open and follow
        #[arg(long)]
        conversation: Option<String>,
    },
    /// Send one message through the messaging webhook
    Send {
        /// Conversation id
        conversation: String,
        /// Message text
        text: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    switchboard::init_logging();

    let cli = Cli::parse();
    info!("starting switchboard (config_set={})", cli.config.is_some());
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        CliCommand::Watch { conversation } => watch(config, conversation).await,
        CliCommand::Send { conversation, text } => send(config, &conversation, &text).await,
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<SwitchboardConfig> {
    if let Some(path) = path {
        return SwitchboardConfig::load_from_path(path).context("failed to load config");
    }
    let cwd = std::env::current_dir().context("cwd")?;
    info!("loading layered config from cwd: {}", cwd.display());
    let layered = SwitchboardConfig::load_layered(&cwd).context("failed to load layered config")?;
    debug!("layered config loaded (layers={})", layered.layers.len());
    Ok(layered.config)
}

async fn watch(config: SwitchboardConfig, conversation: Option<String>) -> anyhow::Result<()> {
    let backend = Arc::new(RestBackend::new(&config.backend).context("invalid backend config")?);
    let feed = Arc::new(PollingChangeFeed::from_config(backend.clone(), &config.sync));
    let messenger = if config.messaging.webhook_url.is_some() {
        Some(WebhookMessenger::new(&config.messaging).context("invalid messaging config")?)
    } else {
        None
    };

    let mut service = SyncService::new(config, backend, feed);
    if let Some(messenger) = messenger {
        service = service.with_messenger(Arc::new(messenger));
    }
    let handle = service.start();
    if let Some(conversation) = conversation {
        handle
            .select_conversation(conversation)
            .await
            .context("failed to open conversation")?;
    }

    let mut view = handle.subscribe();
    let mut printer = ViewPrinter::default();
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for ctrl-c")?;
                info!("interrupt received, shutting down");
                break;
            }
            changed = view.changed() => {
                if changed.is_err() {
                    bail!("sync service stopped unexpectedly");
                }
                let snapshot = view.borrow_and_update().clone();
                printer.print(&snapshot);
            }
        }
    }
    handle.shutdown().await.context("failed to stop sync service")?;
    Ok(())
}

async fn send(config: SwitchboardConfig, conversation: &str, text: &str) -> anyhow::Result<()> {
    let messenger = WebhookMessenger::new(&config.messaging).context("invalid messaging config")?;
    messenger
        .send_message(conversation, text)
        .await
        .context("failed to send message")?;
    println!("sent to {conversation}");
    Ok(())
}

/// Prints only what changed between view snapshots.
#[derive(Default)]
struct ViewPrinter {
    list: Vec<(String, String, u32)>,
    printed_messages: usize,
    selected: Option<String>,
    error: Option<String>,
}

impl ViewPrinter {
    fn print(&mut self, view: &ConsoleView) {
        let list: Vec<(String, String, u32)> = view
            .conversations
            .iter()
            .map(|summary| {
                (
                    summary.id.clone(),
                    summary.last_message.clone(),
                    summary.unread_count,
                )
            })
            .collect();
        if list != self.list && !view.loading {
            println!("-- conversations ({}) --", view.conversations.len());
            for summary in &view.conversations {
                println!(
                    "{:>3} {:<24} {:>10}  {}",
                    summary.unread_count,
                    summary.display_name,
                    summary.last_message_time,
                    summary.last_message
                );
            }
            self.list = list;
        }

        if view.selected != self.selected {
            self.selected = view.selected.clone();
            self.printed_messages = 0;
        }
        if view.stream_state == StreamState::Ready {
            for message in view.messages.iter().skip(self.printed_messages) {
                let speaker = match message.role {
                    Role::User => "customer",
                    Role::Assistant => "business",
                };
                println!(
                    "[{}] {}: {}",
                    message.timestamp.format("%Y-%m-%d %H:%M"),
                    speaker,
                    message.content
                );
            }
            self.printed_messages = view.messages.len();
        }

        let error = view
            .error
            .as_ref()
            .map(|error| format!("{:?}: {}", error.source, error.message));
        if error != self.error {
            if let Some(error) = &error {
                eprintln!("error: {error}");
            }
            self.error = error;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Cli, CliCommand};
    use clap::Parser;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    #[test]
    fn parses_watch_with_conversation_and_config() {
        let cli = Cli::try_parse_from([
            "switchboard",
            "watch",
            "--conversation",
            "5511999990000",
            "--config",
            "local.json5",
        ])
        .expect("parse");
        assert_eq!(cli.config, Some(PathBuf::from("local.json5")));
        assert_eq!(
            cli.command,
            CliCommand::Watch {
                conversation: Some("5511999990000".to_string())
            }
        );
    }

    #[test]
    fn send_requires_conversation_and_text() {
        assert!(Cli::try_parse_from(["switchboard", "send", "only-id"]).is_err());
        let cli = Cli::try_parse_from(["switchboard", "send", "a", "olá"]).expect("parse");
        assert_eq!(
            cli.command,
            CliCommand::Send {
                conversation: "a".to_string(),
                text: "olá".to_string()
            }
        );
    }
}
