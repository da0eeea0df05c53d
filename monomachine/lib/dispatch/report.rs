use std::{error::Error, fmt};

use crate::{MachineError, MachineResult};

use super::LifecycleAction;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// What happened to one host in a batch.
#[derive(Debug)]
pub struct HostOutcome {
    /// The host name.
    pub name: String,

    /// The result of the action on this host.
    pub result: MachineResult<()>,
}

/// The per-host outcomes of one action, in the order the hosts were given.
#[derive(Debug)]
pub struct BatchReport {
    action: LifecycleAction,
    outcomes: Vec<HostOutcome>,
}

/// The failures of a batch, one entry per failed host.
#[derive(Debug)]
pub struct BatchError {
    /// The action that was run.
    pub action: LifecycleAction,

    /// Each failed host with its error.
    pub failures: Vec<(String, MachineError)>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl BatchReport {
    /// Creates a report.
    pub fn new(action: LifecycleAction, outcomes: Vec<HostOutcome>) -> Self {
        Self { action, outcomes }
    }

    /// The action.
    pub fn action(&self) -> LifecycleAction {
        self.action
    }

    /// Every outcome.
    pub fn outcomes(&self) -> &[HostOutcome] {
        &self.outcomes
    }

    /// The hosts the action succeeded on.
    pub fn succeeded(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.result.is_ok())
            .map(|o| o.name.as_str())
            .collect()
    }

    /// The hosts the action failed on, with their errors.
    pub fn failed(&self) -> Vec<(&str, &MachineError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.name.as_str(), e)))
            .collect()
    }

    /// Whether every host succeeded.
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    /// Succeeds if every host succeeded, otherwise fails with all failures.
    pub fn into_result(self) -> Result<(), BatchError> {
        let failures: Vec<_> = self
            .outcomes
            .into_iter()
            .filter_map(|o| o.result.err().map(|e| (o.name, e)))
            .collect();

        if failures.is_empty() {
            return Ok(());
        }

        Err(BatchError {
            action: self.action,
            failures,
        })
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Error for BatchError {}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed for {} host(s)",
            self.action,
            self.failures.len()
        )?;
        for (name, error) in &self.failures {
            write!(f, "\n  {name}: {error}")?;
        }
        Ok(())
    }
}
