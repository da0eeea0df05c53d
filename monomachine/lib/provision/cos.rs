use async_trait::async_trait;

use crate::{config::HostOptions, MachineResult};

use super::{
    DaemonConfig, DaemonConfigLayout, EngineConfigContext, GenericSteps, PackageAction,
    ProvisionTarget, Provisioner, SystemdProvisioner, SYSTEMD_OPTIONS_DIR,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The name of the Container-Optimized OS provisioner, matching its os-release `ID`.
pub const COS_NAME: &str = "cos";

/// The flat daemon configuration file on Container-Optimized OS.
pub const COS_DAEMON_FILE: &str = "/etc/default/docker";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Provisions Container-Optimized OS.
///
/// The image is immutable and ships the engine, so packages are left alone. The host runs
/// systemd, but the engine unit already reads `/etc/default/docker`, which gets the full flag set.
#[derive(Debug, Clone)]
pub struct CosProvisioner {
    systemd: SystemdProvisioner,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl CosProvisioner {
    /// Creates the provisioner.
    pub fn new() -> Self {
        Self {
            systemd: SystemdProvisioner::with_steps(
                COS_NAME,
                GenericSteps::new(SYSTEMD_OPTIONS_DIR),
            ),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for CosProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provisioner for CosProvisioner {
    fn name(&self) -> &str {
        COS_NAME
    }

    fn options_dir(&self) -> &str {
        self.systemd.options_dir()
    }

    fn daemon_config(&self, context: &EngineConfigContext) -> MachineResult<DaemonConfig> {
        DaemonConfigLayout::Flat(COS_DAEMON_FILE.to_string()).render(context)
    }

    async fn package(
        &self,
        _target: &ProvisionTarget,
        name: &str,
        action: PackageAction,
    ) -> MachineResult<()> {
        tracing::debug!("{COS_NAME} images are immutable, skipping {action} {name}");
        Ok(())
    }

    async fn restart_engine(&self, target: &ProvisionTarget) -> MachineResult<()> {
        self.systemd.restart_engine(target).await
    }

    async fn provision(
        &self,
        target: &ProvisionTarget,
        options: &HostOptions,
    ) -> MachineResult<HostOptions> {
        self.systemd.steps().provision(self, target, options).await
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
