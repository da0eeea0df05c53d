use async_trait::async_trait;

use crate::{config::HostOptions, MachineResult};

use super::{
    DaemonConfig, DaemonConfigLayout, EngineConfigContext, GenericSteps, PackageAction,
    ProvisionTarget, Provisioner,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The name of the boot2docker provisioner, matching its os-release `ID`.
pub const BOOT2DOCKER_NAME: &str = "boot2docker";

/// The persistent directory that holds the daemon options on boot2docker.
pub const BOOT2DOCKER_OPTIONS_DIR: &str = "/var/lib/boot2docker";

/// The profile the boot2docker init script sources before starting the engine.
pub const BOOT2DOCKER_PROFILE: &str = "/var/lib/boot2docker/profile";

const BOOT2DOCKER_HOSTNAME_FILE: &str = "/var/lib/boot2docker/etc/hostname";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Provisions boot2docker, a RAM-booted image without systemd or a package manager.
///
/// Only `/var/lib/boot2docker` survives a reboot, so the daemon options, certificates and
/// hostname all live there.
#[derive(Debug, Clone)]
pub struct Boot2DockerProvisioner {
    steps: GenericSteps,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Boot2DockerProvisioner {
    /// Creates the provisioner.
    pub fn new() -> Self {
        Self {
            steps: GenericSteps::new(BOOT2DOCKER_OPTIONS_DIR)
                .with_hostname_file(BOOT2DOCKER_HOSTNAME_FILE),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for Boot2DockerProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provisioner for Boot2DockerProvisioner {
    fn name(&self) -> &str {
        BOOT2DOCKER_NAME
    }

    fn options_dir(&self) -> &str {
        self.steps.get_options_dir()
    }

    fn daemon_config(&self, context: &EngineConfigContext) -> MachineResult<DaemonConfig> {
        DaemonConfigLayout::Flat(BOOT2DOCKER_PROFILE.to_string()).render(context)
    }

    async fn package(
        &self,
        _target: &ProvisionTarget,
        name: &str,
        action: PackageAction,
    ) -> MachineResult<()> {
        tracing::debug!("{BOOT2DOCKER_NAME} has no package manager, skipping {action} {name}");
        Ok(())
    }

    async fn restart_engine(&self, target: &ProvisionTarget) -> MachineResult<()> {
        target.run("sudo /etc/init.d/docker restart").await?;
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

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use machutils::InstantSleeper;

    use super::*;
    use crate::{config::AuthOptions, remote::FakeCommander};

    #[test_log::test(tokio::test)]
    async fn test_writes_one_flat_profile_and_no_packages() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let commander = Arc::new(FakeCommander::new());
        let target = ProvisionTarget::new("dev", "10.0.0.5", commander.clone())
            .with_sleeper(Arc::new(InstantSleeper::new()));
        let options = HostOptions::builder()
            .auth(AuthOptions::for_cert_dir(dir.path().join("certs")))
            .build();

        let applied = Boot2DockerProvisioner::new().provision(&target, &options).await?;

        let writes: Vec<String> = commander
            .commands()
            .into_iter()
            .filter(|c| c.contains("| sudo tee /") && !c.ends_with(".pem > /dev/null"))
            .collect();
        assert_eq!(writes.len(), 2);
        assert!(writes[0].ends_with("sudo tee /var/lib/boot2docker/etc/hostname > /dev/null"));
        assert!(writes[1].ends_with("sudo tee /var/lib/boot2docker/profile > /dev/null"));
        assert!(!commander.ran("systemd"));
        assert!(!commander.ran("get.docker.com"));
        assert!(commander.ran("sudo /etc/init.d/docker restart"));
        assert_eq!(
            applied.get_auth().get_remote_server_key_path(),
            "/var/lib/boot2docker/server-key.pem"
        );
        Ok(())
    }
}
