use async_trait::async_trait;

use crate::{config::HostOptions, MachineResult};

use super::{DaemonConfig, EngineConfigContext, PackageAction, ProvisionTarget};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The engine package installed by the engine install script.
pub const DEFAULT_ENGINE_PACKAGE: &str = "docker-ce";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Sets up the container engine on one family of operating systems.
///
/// A provisioner is chosen by detection for every provisioning run and holds no per-host state;
/// the host is passed in as a [`ProvisionTarget`].
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// The name the provisioner is registered under.
    fn name(&self) -> &str;

    /// The directory on the host that holds the daemon configuration and certificates.
    fn options_dir(&self) -> &str;

    /// The name of the engine package.
    fn engine_package(&self) -> &str {
        DEFAULT_ENGINE_PACKAGE
    }

    /// Renders the daemon configuration in the shape this OS family expects.
    fn daemon_config(&self, context: &EngineConfigContext) -> MachineResult<DaemonConfig>;

    /// Installs, removes or upgrades a package. Provisioners for immutable images do nothing.
    async fn package(
        &self,
        target: &ProvisionTarget,
        name: &str,
        action: PackageAction,
    ) -> MachineResult<()>;

    /// Restarts the engine so it picks up a new configuration.
    async fn restart_engine(&self, target: &ProvisionTarget) -> MachineResult<()>;

    /// Runs the provisioning pipeline and returns the options as they were applied, with the
    /// remote certificate paths and the effective storage driver filled in.
    async fn provision(
        &self,
        target: &ProvisionTarget,
        options: &HostOptions,
    ) -> MachineResult<HostOptions>;

    /// Upgrades the engine package and restarts the engine.
    async fn upgrade_engine(&self, target: &ProvisionTarget) -> MachineResult<()> {
        tracing::info!(
            "upgrading {} on {} with {}",
            self.engine_package(),
            target.get_machine_name(),
            self.name()
        );
        self.package(target, self.engine_package(), PackageAction::Upgrade)
            .await?;
        self.restart_engine(target).await
    }
}
