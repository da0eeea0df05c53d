use std::sync::Arc;

use getset::Getters;
use machutils::{Sleeper, TokioSleeper};

use crate::{remote::Commander, MachineResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The host a provisioner works on: its name, its address and a way to run commands on it.
#[derive(Clone, Getters)]
#[getset(get = "pub with_prefix")]
pub struct ProvisionTarget {
    /// The host name, which also becomes the remote hostname.
    machine_name: String,

    /// The address the engine is reached at.
    ip: String,

    /// The command channel.
    commander: Arc<dyn Commander>,

    /// Sleeps between engine readiness checks.
    sleeper: Arc<dyn Sleeper>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ProvisionTarget {
    /// Creates a target that waits in real time.
    pub fn new(
        machine_name: impl Into<String>,
        ip: impl Into<String>,
        commander: Arc<dyn Commander>,
    ) -> Self {
        Self {
            machine_name: machine_name.into(),
            ip: ip.into(),
            commander,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Uses `sleeper` for waits.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Runs `command` on the host.
    pub async fn run(&self, command: &str) -> MachineResult<String> {
        tracing::debug!("[{}] {command}", self.machine_name);
        self.commander.run(command).await
    }
}
