use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;

use crate::{
    config::DEFAULT_ENGINE_PORT,
    host::HostState,
    remote::{Commander, SshCommander},
    MachineResult,
};

use super::{engine_url, CreateFlag, DriverOptions};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The lifecycle contract every virtualization backend implements.
///
/// A driver instance is bound to exactly one machine. State-dependent decisions always go through
/// a fresh [`Driver::get_state`] call; nothing here caches the backend's view of the machine.
#[async_trait]
pub trait Driver: Send + Sync {
    /// The backend name, e.g. `vmwarevsphere`.
    fn driver_name(&self) -> &str;

    /// The name of the machine this driver manages.
    fn machine_name(&self) -> &str;

    /// The options this driver accepts at creation time.
    fn create_flags(&self) -> Vec<CreateFlag>;

    /// Applies resolved create options.
    fn set_config_from_flags(&mut self, options: &DriverOptions) -> MachineResult<()>;

    /// Serializes the driver configuration for the host record.
    fn config(&self) -> MachineResult<serde_json::Value>;

    /// The user to log in as.
    fn ssh_username(&self) -> String;

    /// The SSH port.
    fn ssh_port(&self) -> u16 {
        22
    }

    /// The private key used for SSH, if the driver manages one.
    fn ssh_key_path(&self) -> Option<PathBuf>;

    /// The port the container engine listens on.
    fn engine_port(&self) -> u16 {
        DEFAULT_ENGINE_PORT
    }

    /// The address to reach the machine over SSH.
    async fn ssh_hostname(&self) -> MachineResult<String> {
        self.get_ip().await
    }

    /// A command channel to the machine.
    async fn commander(&self) -> MachineResult<Arc<dyn Commander>> {
        let builder = SshCommander::builder()
            .hostname(self.ssh_hostname().await?)
            .port(self.ssh_port())
            .username(self.ssh_username());

        let commander = match self.ssh_key_path() {
            Some(key_path) => builder.key_path(key_path).build(),
            None => builder.build(),
        };

        Ok(Arc::new(commander))
    }

    /// Validates every resource the machine will reference without changing anything.
    async fn pre_create_check(&mut self) -> MachineResult<()>;

    /// Creates and powers on the machine.
    async fn create(&mut self) -> MachineResult<()>;

    /// Powers on the machine. Succeeds without touching the backend when it is already running.
    async fn start(&mut self) -> MachineResult<()>;

    /// Asks the guest to shut down.
    async fn stop(&mut self) -> MachineResult<()>;

    /// Stops and starts the machine, killing it when it does not stop in time.
    async fn restart(&mut self) -> MachineResult<()>;

    /// Powers the machine off without asking the guest.
    async fn kill(&mut self) -> MachineResult<()>;

    /// Force-stops and deletes the machine. Resources that are already gone are not an error.
    async fn remove(&mut self) -> MachineResult<()>;

    /// Upgrades the machine's boot image. May fail with `UnsupportedOperation`.
    async fn upgrade(&mut self) -> MachineResult<()>;

    /// Queries the backend for the machine's current state.
    async fn get_state(&self) -> MachineResult<HostState>;

    /// The machine's address. Fails with `HostNotRunning` unless the machine is running.
    async fn get_ip(&self) -> MachineResult<String>;

    /// The engine URL, or an empty string when the machine has no address yet.
    async fn get_url(&self) -> MachineResult<String> {
        let ip = self.get_ip().await?;
        Ok(engine_url(&ip, self.engine_port()))
    }
}
