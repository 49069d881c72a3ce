//! Line-oriented user commands

use std::str::FromStr;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Actions a user can take on a running session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    /// Open the link, to the given port or the configured one
    Connect(Option<String>),
    /// Close the link
    Disconnect,
    /// Stop the sounding alert, keep it latched
    Silence,
    /// Clear the alert state
    Reset,
    /// Log available serial ports
    ListPorts,
    /// End the session
    Quit,
}

#[derive(Debug, Error)]
#[error("Unknown command '{0}' (c [port], d, s, r, p, q)")]
pub struct UnknownCommand(String);

impl FromStr for UserCommand {
    type Err = UnknownCommand;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let command = match words.next() {
            Some("c" | "connect") => UserCommand::Connect(words.next().map(str::to_string)),
            Some("d" | "disconnect") => UserCommand::Disconnect,
            Some("s" | "stop" | "silence") => UserCommand::Silence,
            Some("r" | "reset") => UserCommand::Reset,
            Some("p" | "ports") => UserCommand::ListPorts,
            Some("q" | "quit") => UserCommand::Quit,
            _ => return Err(UnknownCommand(line.trim().to_string())),
        };
        Ok(command)
    }
}

/// Forward commands typed on stdin until EOF
pub fn spawn_stdin_reader(commands: mpsc::Sender<UserCommand>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match line.parse::<UserCommand>() {
                    Ok(command) => {
                        if commands.send(command).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("{}", e),
                },
                Ok(None) => {
                    info!("stdin closed, command input disabled");
                    break;
                }
                Err(e) => {
                    warn!("stdin read failed: {}", e);
                    break;
                }
            }
        }
    })
}
