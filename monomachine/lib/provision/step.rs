use std::{fmt, future::Future};

use serde::{Deserialize, Serialize};

use crate::{MachineError, MachineResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A step of the provisioning pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProvisionStep {
    /// Sets the remote hostname to the host's name.
    SetHostname,

    /// Creates the daemon options directory.
    MakeOptionsDir,

    /// Installs base packages and the engine where the image does not ship them.
    InstallEngine,

    /// Creates or reuses the certificates and installs them on the host.
    BootstrapTls,

    /// Writes the daemon configuration and restarts the engine.
    ConfigureAuth,

    /// Starts the swarm containers.
    ConfigureSwarm,

    /// Opens the engine port.
    Firewall,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ProvisionStep {
    /// The step name as shown to users.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisionStep::SetHostname => "set-hostname",
            ProvisionStep::MakeOptionsDir => "make-options-dir",
            ProvisionStep::InstallEngine => "install-engine",
            ProvisionStep::BootstrapTls => "bootstrap-tls",
            ProvisionStep::ConfigureAuth => "configure-auth",
            ProvisionStep::ConfigureSwarm => "configure-swarm",
            ProvisionStep::Firewall => "firewall",
        }
    }

    /// Runs `work` as this step, tagging any failure with the step.
    pub async fn run<T>(self, work: impl Future<Output = MachineResult<T>>) -> MachineResult<T> {
        tracing::debug!("provisioning step: {self}");
        work.await.map_err(|source| MachineError::ProvisioningStepFailed {
            step: self,
            source: Box::new(source),
        })
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for ProvisionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
