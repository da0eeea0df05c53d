use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::MachineError;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The lifecycle state of a machine as reported by its backend.
///
/// A cached `HostState` is only informational. Decisions that depend on the state always query the
/// driver first.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostState {
    /// Not yet queried, or the backend reported something unrecognized.
    #[default]
    None,

    /// The machine is booting.
    Starting,

    /// The machine is powered on.
    Running,

    /// The machine is powered off.
    Stopped,

    /// The machine is shutting down.
    Stopping,

    /// The machine's memory has been saved to disk.
    Saved,

    /// The machine is paused.
    Paused,

    /// The backend reports the machine as broken.
    Error,

    /// The backend did not answer in time.
    Timeout,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl HostState {
    /// All states in declaration order.
    pub const ALL: [HostState; 9] = [
        HostState::None,
        HostState::Starting,
        HostState::Running,
        HostState::Stopped,
        HostState::Stopping,
        HostState::Saved,
        HostState::Paused,
        HostState::Error,
        HostState::Timeout,
    ];

    /// The name used in listings and in persisted host records.
    pub fn as_str(&self) -> &'static str {
        match self {
            HostState::None => "",
            HostState::Starting => "Starting",
            HostState::Running => "Running",
            HostState::Stopped => "Stopped",
            HostState::Stopping => "Stopping",
            HostState::Saved => "Saved",
            HostState::Paused => "Paused",
            HostState::Error => "Error",
            HostState::Timeout => "Timeout",
        }
    }

    /// Whether the machine is on its way up or already up.
    pub fn is_up(&self) -> bool {
        matches!(self, HostState::Starting | HostState::Running)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HostState {
    type Err = MachineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HostState::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| MachineError::InvalidConfig(format!("unknown host state: {s}")))
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_state_round_trips_through_its_name() {
        for state in HostState::ALL {
            assert_eq!(state.to_string().parse::<HostState>().unwrap(), state);
        }
        assert_eq!("running".parse::<HostState>().unwrap(), HostState::Running);
        assert!("exploded".parse::<HostState>().is_err());
    }

    #[test]
    fn test_host_state_default_is_none() {
        assert_eq!(HostState::default(), HostState::None);
        assert!(HostState::Running.is_up());
        assert!(!HostState::Saved.is_up());
    }
}
