use async_trait::async_trait;

use crate::MachineResult;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Executes shell commands on one host.
#[async_trait]
pub trait Commander: Send + Sync {
    /// Runs `command` through the host's shell and returns its combined output.
    ///
    /// A non-zero exit fails with
    /// [`MachineError::CommandFailed`](crate::MachineError::CommandFailed) and a transport
    /// problem with [`MachineError::BackendUnavailable`](crate::MachineError::BackendUnavailable).
    async fn run(&self, command: &str) -> MachineResult<String>;
}
