//! Line-oriented operator console used while the daemon runs.

use std::str::FromStr;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use crate::orchestrator::{Orchestrator, StartOutcome, StopOutcome};
use crate::store::{RecipientId, StoreError};

pub const HELP: &str = "\
Commands:
  start               start monitoring all remaining targets
  stop                stop monitoring
  status              show polling and per-target state
  reset               mark every target as not yet booked (stops monitoring)
  subscribe <id>      add a notification recipient
  help                show this help
  quit                exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Status,
    Reset,
    Subscribe(RecipientId),
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseCommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command {0:?}, type `help` for a list")]
    Unknown(String),
    #[error("usage: subscribe <id>")]
    MissingRecipient,
}

impl FromStr for Command {
    type Err = ParseCommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let command = words.next().ok_or(ParseCommandError::Empty)?;

        match command.to_ascii_lowercase().as_str() {
            "start" => Ok(Command::Start),
            "stop" => Ok(Command::Stop),
            "status" => Ok(Command::Status),
            "reset" => Ok(Command::Reset),
            "subscribe" => words
                .next()
                .map(|id| Command::Subscribe(id.into()))
                .ok_or(ParseCommandError::MissingRecipient),
            "help" | "?" => Ok(Command::Help),
            "quit" | "exit" => Ok(Command::Quit),
            _ => Err(ParseCommandError::Unknown(command.to_string())),
        }
    }
}

/// What to do after a command ran
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Quit,
}

pub async fn execute(orchestrator: &Orchestrator, command: Command) -> Result<Reply, StoreError> {
    let text = match command {
        Command::Start => match orchestrator.enable_polling().await? {
            StartOutcome::Started => "Monitoring started.".to_string(),
            StartOutcome::AlreadyRunning => "Monitoring is already running.".to_string(),
            StartOutcome::AllTargetsDone => {
                "All targets are already booked. Run `reset` to start over.".to_string()
            }
            StartOutcome::NoTargets => "No targets are configured.".to_string(),
        },
        Command::Stop => match orchestrator.disable_polling().await? {
            StopOutcome::Stopped => "Monitoring stopped.".to_string(),
            StopOutcome::AlreadyStopped => "Monitoring is already stopped.".to_string(),
        },
        Command::Status => orchestrator.query_status().await.to_string(),
        Command::Reset => {
            let stopped = orchestrator.reset_all_targets().await?;
            if stopped {
                "Target state reset, monitoring stopped.".to_string()
            } else {
                "Target state reset.".to_string()
            }
        }
        Command::Subscribe(recipient) => {
            if orchestrator.subscribe(recipient.clone()).await? {
                format!("Subscribed {recipient}.")
            } else {
                format!("{recipient} is already subscribed.")
            }
        }
        Command::Help => HELP.to_string(),
        Command::Quit => return Ok(Reply::Quit),
    };

    Ok(Reply::Text(text))
}

/// Why the console loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleExit {
    Quit,
    EndOfInput,
}

/// Read commands from `input` until EOF or `quit`, writing replies to `output`
pub async fn run<R, W>(
    orchestrator: &Orchestrator,
    input: R,
    mut output: W,
) -> std::io::Result<ConsoleExit>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let reply = match line.parse::<Command>() {
            Ok(command) => {
                info!(?command, "Console command");
                match execute(orchestrator, command).await {
                    Ok(Reply::Quit) => return Ok(ConsoleExit::Quit),
                    Ok(Reply::Text(text)) => text,
                    Err(error) => {
                        warn!(%error, "Console command failed");
                        format!("error: {error}")
                    }
                }
            }
            Err(error) => error.to_string(),
        };

        output.write_all(reply.trim_end().as_bytes()).await?;
        output.write_all(b"\n").await?;
        output.flush().await?;
    }

    Ok(ConsoleExit::EndOfInput)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!("start".parse::<Command>(), Ok(Command::Start));
        assert_eq!("  STOP ".parse::<Command>(), Ok(Command::Stop));
        assert_eq!("subscribe 12345".parse::<Command>(), Ok(Command::Subscribe("12345".into())));
        assert_eq!("exit".parse::<Command>(), Ok(Command::Quit));
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!("".parse::<Command>(), Err(ParseCommandError::Empty));
        assert_eq!("subscribe".parse::<Command>(), Err(ParseCommandError::MissingRecipient));
        assert_eq!(
            "book now".parse::<Command>(),
            Err(ParseCommandError::Unknown("book".into()))
        );
    }
}
