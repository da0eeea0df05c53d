use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::{MachineError, MachineResult};

use super::Commander;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An in-memory [`Commander`] that records commands and replies with canned output.
///
/// Rules are checked in the order they were added and the first match wins. A command that matches
/// no rule succeeds with empty output.
#[derive(Debug, Default)]
pub struct FakeCommander {
    rules: Mutex<Vec<FakeRule>>,
    commands: Mutex<Vec<String>>,
}

/// How a rule recognizes a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandMatch {
    /// The command must be exactly this string.
    Exact(String),

    /// The command must start with this string.
    Prefix(String),

    /// The command must contain this string.
    Contains(String),
}

/// What a matching command returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeReply {
    /// The command succeeds with this output.
    Output(String),

    /// The command exits with a non-zero code.
    Fail {
        /// The exit code.
        exit_code: i32,

        /// The output printed before failing.
        output: String,
    },

    /// The host cannot be reached.
    Unavailable(String),
}

#[derive(Debug, Clone)]
struct FakeRule {
    matcher: CommandMatch,
    reply: FakeReply,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl FakeCommander {
    /// Creates a fake that answers every command with empty output.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule.
    pub fn with_rule(self, matcher: CommandMatch, reply: FakeReply) -> Self {
        lock(&self.rules).push(FakeRule { matcher, reply });
        self
    }

    /// Replies with `output` to exactly `command`.
    pub fn with_output(self, command: impl Into<String>, output: impl Into<String>) -> Self {
        self.with_rule(
            CommandMatch::Exact(command.into()),
            FakeReply::Output(output.into()),
        )
    }

    /// Fails every command containing `fragment`.
    pub fn with_failure(self, fragment: impl Into<String>, exit_code: i32) -> Self {
        self.with_rule(
            CommandMatch::Contains(fragment.into()),
            FakeReply::Fail {
                exit_code,
                output: String::new(),
            },
        )
    }

    /// All commands run so far, in order.
    pub fn commands(&self) -> Vec<String> {
        lock(&self.commands).clone()
    }

    /// Whether any command run so far contains `fragment`.
    pub fn ran(&self, fragment: &str) -> bool {
        lock(&self.commands).iter().any(|c| c.contains(fragment))
    }

    /// Forgets the recorded commands.
    pub fn clear(&self) {
        lock(&self.commands).clear();
    }
}

impl CommandMatch {
    fn matches(&self, command: &str) -> bool {
        match self {
            CommandMatch::Exact(expected) => command == expected,
            CommandMatch::Prefix(prefix) => command.starts_with(prefix.as_str()),
            CommandMatch::Contains(fragment) => command.contains(fragment.as_str()),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl Commander for FakeCommander {
    async fn run(&self, command: &str) -> MachineResult<String> {
        lock(&self.commands).push(command.to_string());

        let reply = lock(&self.rules)
            .iter()
            .find(|rule| rule.matcher.matches(command))
            .map(|rule| rule.reply.clone());

        match reply {
            None => Ok(String::new()),
            Some(FakeReply::Output(output)) => Ok(output),
            Some(FakeReply::Fail { exit_code, output }) => Err(MachineError::CommandFailed {
                command: command.to_string(),
                exit_code: Some(exit_code),
                output,
            }),
            Some(FakeReply::Unavailable(reason)) => Err(MachineError::BackendUnavailable(reason)),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test(tokio::test)]
    async fn test_fake_commander_records_and_replies() -> anyhow::Result<()> {
        let commander = FakeCommander::new()
            .with_output("hostname", "dev\n")
            .with_rule(
                CommandMatch::Prefix("sudo systemctl".into()),
                FakeReply::Output("ok".into()),
            )
            .with_failure("iptables", 4)
            .with_rule(
                CommandMatch::Exact("unreachable".into()),
                FakeReply::Unavailable("no route".into()),
            );

        assert_eq!(commander.run("hostname").await?, "dev\n");
        assert_eq!(commander.run("sudo systemctl restart docker").await?, "ok");
        assert_eq!(commander.run("uname").await?, "");
        assert!(matches!(
            commander.run("sudo iptables -A INPUT").await,
            Err(MachineError::CommandFailed { exit_code: Some(4), .. })
        ));
        assert!(matches!(
            commander.run("unreachable").await,
            Err(MachineError::BackendUnavailable(_))
        ));

        assert_eq!(commander.commands().len(), 5);
        assert_eq!(commander.commands()[2], "uname");
        assert!(commander.ran("iptables"));

        commander.clear();
        assert!(commander.commands().is_empty());
        Ok(())
    }
}
