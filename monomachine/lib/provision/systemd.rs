use async_trait::async_trait;

use crate::{config::HostOptions, MachineResult};

use super::{
    DaemonConfig, DaemonConfigLayout, EngineConfigContext, GenericSteps, PackageAction,
    PackageManager, ProvisionTarget, Provisioner, DEFAULT_ENGINE_PACKAGE,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The daemon options directory on systemd distributions.
pub const SYSTEMD_OPTIONS_DIR: &str = "/etc/docker";

/// Name of the provisioner used for systemd hosts no distribution provisioner claims.
pub const SYSTEMD_FALLBACK_NAME: &str = "systemd";

const SYSTEMD_RESTART_ENGINE: &str =
    "sudo systemctl daemon-reload && sudo systemctl enable docker && sudo systemctl restart docker";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Provisions systemd distributions: a drop-in override for the engine unit and the
/// distribution's package manager. Everything else is [`GenericSteps`].
#[derive(Debug, Clone)]
pub struct SystemdProvisioner {
    name: String,
    engine_package: String,
    steps: GenericSteps,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SystemdProvisioner {
    /// A provisioner installing `packages` with `package_manager` before the engine.
    pub fn new(
        name: impl Into<String>,
        package_manager: PackageManager,
        packages: &[&str],
    ) -> Self {
        Self::with_steps(
            name,
            GenericSteps::new(SYSTEMD_OPTIONS_DIR)
                .with_packages(package_manager, packages.iter().copied()),
        )
    }

    /// A provisioner running `steps`.
    pub fn with_steps(name: impl Into<String>, steps: GenericSteps) -> Self {
        Self {
            name: name.into(),
            engine_package: DEFAULT_ENGINE_PACKAGE.to_string(),
            steps,
        }
    }

    /// Uses a different engine package name.
    pub fn with_engine_package(mut self, package: impl Into<String>) -> Self {
        self.engine_package = package.into();
        self
    }

    /// Ubuntu.
    pub fn ubuntu() -> Self {
        Self::new("ubuntu", PackageManager::Apt, &["curl"])
    }

    /// Debian.
    pub fn debian() -> Self {
        Self::new("debian", PackageManager::Apt, &["curl"])
    }

    /// CentOS.
    pub fn centos() -> Self {
        Self::new("centos", PackageManager::Yum, &["curl"])
    }

    /// Red Hat Enterprise Linux.
    pub fn rhel() -> Self {
        Self::new("rhel", PackageManager::Yum, &["curl"])
    }

    /// Fedora.
    pub fn fedora() -> Self {
        Self::new("fedora", PackageManager::Dnf, &["curl"])
    }

    /// Arch Linux, which packages the engine itself.
    pub fn arch() -> Self {
        Self::new("arch", PackageManager::Pacman, &["curl", "docker"]).with_engine_package("docker")
    }

    /// Any other systemd host. The engine comes from its install script alone.
    pub fn fallback() -> Self {
        Self::new(SYSTEMD_FALLBACK_NAME, PackageManager::None, &[])
    }

    /// The shared steps.
    pub fn steps(&self) -> &GenericSteps {
        &self.steps
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl Provisioner for SystemdProvisioner {
    fn name(&self) -> &str {
        &self.name
    }

    fn options_dir(&self) -> &str {
        self.steps.get_options_dir()
    }

    fn engine_package(&self) -> &str {
        &self.engine_package
    }

    fn daemon_config(&self, context: &EngineConfigContext) -> MachineResult<DaemonConfig> {
        DaemonConfigLayout::SystemdDropIn.render(context)
    }

    async fn package(
        &self,
        target: &ProvisionTarget,
        name: &str,
        action: PackageAction,
    ) -> MachineResult<()> {
        self.steps.package(target, name, action).await
    }

    async fn restart_engine(&self, target: &ProvisionTarget) -> MachineResult<()> {
        target.run(SYSTEMD_RESTART_ENGINE).await?;
        Ok(())
    }

    async fn provision(
        &self,
        target: &ProvisionTarget,
        options: &HostOptions,
    ) -> MachineResult<HostOptions> {
        self.steps.provision(self, target, options).await
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
