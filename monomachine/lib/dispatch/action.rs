use std::{fmt, str::FromStr};

use crate::MachineError;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A lifecycle action the dispatcher can run against a set of hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleAction {
    /// Create the machine of a prepared host record, wait for it and provision it.
    Create,

    /// Power the machine on.
    Start,

    /// Stop the machine gracefully.
    Stop,

    /// Stop and start the machine, killing it if it does not stop.
    Restart,

    /// Power the machine off.
    Kill,

    /// Delete the machine and its host record.
    Remove,

    /// Upgrade the machine's boot image or its engine.
    Upgrade,

    /// Run the provisioning pipeline again.
    Provision,

    /// Issue a new server certificate and restart the engine.
    RegenerateCerts {
        /// Replace the CA and client certificate too.
        ca: bool,
    },
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl LifecycleAction {
    /// The action name as accepted by [`FromStr`].
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleAction::Create => "create",
            LifecycleAction::Start => "start",
            LifecycleAction::Stop => "stop",
            LifecycleAction::Restart => "restart",
            LifecycleAction::Kill => "kill",
            LifecycleAction::Remove => "remove",
            LifecycleAction::Upgrade => "upgrade",
            LifecycleAction::Provision => "provision",
            LifecycleAction::RegenerateCerts { .. } => "regenerate-certs",
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleAction {
    type Err = MachineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "create" => LifecycleAction::Create,
            "start" => LifecycleAction::Start,
            "stop" => LifecycleAction::Stop,
            "restart" => LifecycleAction::Restart,
            "kill" => LifecycleAction::Kill,
            "remove" | "rm" => LifecycleAction::Remove,
            "upgrade" => LifecycleAction::Upgrade,
            "provision" => LifecycleAction::Provision,
            "regenerate-certs" => LifecycleAction::RegenerateCerts { ca: false },
            other => return Err(MachineError::InvalidAction(other.to_string())),
        })
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_actions() -> anyhow::Result<()> {
        assert_eq!("rm".parse::<LifecycleAction>()?, LifecycleAction::Remove);
        assert_eq!(
            "regenerate-certs".parse::<LifecycleAction>()?,
            LifecycleAction::RegenerateCerts { ca: false }
        );
        assert_eq!(LifecycleAction::Provision.to_string(), "provision");
        assert!(matches!(
            "reboot".parse::<LifecycleAction>(),
            Err(MachineError::InvalidAction(_))
        ));
        Ok(())
    }
}
