//! Line commands accepted by the interactive client.
//!
//! `ConsoleCommand` covers what a user types, including meta-commands such as
//! HELP and EXIT that never reach a datacenter. Only reads and writes turn
//! into wire [`crate::message::Message`]s.

use anyhow::{Result, anyhow};

use crate::message::Message;

#[derive(Debug, PartialEq)]
pub enum ConsoleCommand {
    Write { key: String, value: String },
    Read { key: String },
    Help,
    Exit,
}

impl ConsoleCommand {
    /// Parses one line of input.
    ///
    /// The command word is case-insensitive and has a one-letter alias:
    /// - `write <key> <value>` (`w`)
    /// - `read <key>` (`r`)
    /// - `help` (`h`)
    /// - `exit` (`e`, also `quit`)
    pub fn parse(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(first) = parts.first() else {
            return Err(anyhow!("empty command"));
        };

        let cmd = first.to_lowercase();
        let normalized = match cmd.as_str() {
            "w" => "write",
            "r" => "read",
            "h" => "help",
            "e" | "quit" => "exit",
            other => other,
        };

        match (normalized, parts.len()) {
            ("exit", _) => Ok(ConsoleCommand::Exit),
            ("help", _) => Ok(ConsoleCommand::Help),
            ("read", 2) => Ok(ConsoleCommand::Read {
                key: parts[1].to_string(),
            }),
            ("write", 3) => Ok(ConsoleCommand::Write {
                key: parts[1].to_string(),
                value: parts[2].to_string(),
            }),
            ("read", _) => Err(anyhow!("read requires exactly one argument: read <key>")),
            ("write", _) => Err(anyhow!(
                "write requires exactly two arguments: write <key> <value>"
            )),
            _ => Err(anyhow!(
                "invalid command. Try: write/w <key> <value>, read/r <key>, help/h, exit/e"
            )),
        }
    }

    /// The request to send, if this command talks to a datacenter.
    pub fn into_message(self) -> Option<Message> {
        match self {
            ConsoleCommand::Write { key, value } => Some(Message::Write { key, value }),
            ConsoleCommand::Read { key } => Some(Message::Read { key }),
            ConsoleCommand::Help | ConsoleCommand::Exit => None,
        }
    }
}

pub const HELP: &str = "Causal consistency store\n\
Commands (case-insensitive):\n  \
write <key> <value>  (alias: w)\n  \
read <key>           (alias: r)\n  \
help                 (alias: h)\n  \
exit                 (alias: e)";
