use getset::Getters;
use machutils::{shell_quote, wait_for, write_file_command};

use crate::{
    config::{HostOptions, DEFAULT_ENGINE_POLL},
    tls::{bootstrap_certificates, CertRequest},
    MachineError, MachineResult,
};

use super::{
    configure_swarm, DaemonConfig, EngineConfigContext, PackageAction, PackageManager,
    ProvisionStep, ProvisionTarget, Provisioner,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const HOSTNAME_FILE: &str = "/etc/hostname";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The provisioning steps shared by every operating system.
///
/// Provisioners hold one of these and call into it explicitly; whatever differs between OS
/// families (daemon configuration shape, engine restart, package handling) comes from the
/// [`Provisioner`] passed to [`GenericSteps::provision`].
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub with_prefix")]
pub struct GenericSteps {
    /// The daemon options directory on the host.
    options_dir: String,

    /// The file the hostname is persisted in.
    hostname_file: String,

    /// The native package manager.
    package_manager: PackageManager,

    /// Packages installed before the engine.
    packages: Vec<String>,

    /// Whether the engine is installed by the pipeline. Images that ship the engine skip it.
    install_engine: bool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl GenericSteps {
    /// Steps for a host with the given options directory that has the engine preinstalled and no
    /// package manager.
    pub fn new(options_dir: impl Into<String>) -> Self {
        Self {
            options_dir: options_dir.into(),
            hostname_file: HOSTNAME_FILE.to_string(),
            package_manager: PackageManager::None,
            packages: Vec::new(),
            install_engine: false,
        }
    }

    /// Installs `packages` with `package_manager`, then the engine.
    pub fn with_packages<S: Into<String>>(
        mut self,
        package_manager: PackageManager,
        packages: impl IntoIterator<Item = S>,
    ) -> Self {
        self.package_manager = package_manager;
        self.packages = packages.into_iter().map(Into::into).collect();
        self.install_engine = true;
        self
    }

    /// Persists the hostname in `path` instead of `/etc/hostname`.
    pub fn with_hostname_file(mut self, path: impl Into<String>) -> Self {
        self.hostname_file = path.into();
        self
    }

    /// Runs the whole pipeline for `provisioner` against `target`.
    pub async fn provision(
        &self,
        provisioner: &dyn Provisioner,
        target: &ProvisionTarget,
        options: &HostOptions,
    ) -> MachineResult<HostOptions> {
        tracing::info!(
            "provisioning {} with {}",
            target.get_machine_name(),
            provisioner.name()
        );

        let mut engine = options.get_engine().clone();
        let auth = options.get_auth().with_remote_dir(&self.options_dir)?;
        let context = EngineConfigContext::new(auth.clone(), engine.clone(), &self.options_dir);
        engine.set_storage_driver(Some(context.storage_driver().to_string()));

        ProvisionStep::SetHostname
            .run(self.set_hostname(target))
            .await?;
        ProvisionStep::MakeOptionsDir
            .run(self.make_options_dir(target))
            .await?;

        if self.install_engine {
            ProvisionStep::InstallEngine
                .run(self.install_engine(provisioner, target, engine.get_install_url()))
                .await?;
        }

        ProvisionStep::BootstrapTls
            .run(async {
                let request = CertRequest::for_target(target, &auth);
                bootstrap_certificates(target, &auth, &request).await
            })
            .await?;

        ProvisionStep::ConfigureAuth
            .run(async {
                let config = provisioner.daemon_config(&context)?;
                self.write_daemon_config(target, &config).await?;
                provisioner.restart_engine(target).await?;
                self.wait_for_engine(target).await
            })
            .await?;

        ProvisionStep::ConfigureSwarm
            .run(configure_swarm(
                target,
                options.get_swarm(),
                &auth,
                *context.get_engine_port(),
            ))
            .await?;

        ProvisionStep::Firewall
            .run(self.open_ports(target, options))
            .await?;

        tracing::info!("{} is provisioned", target.get_machine_name());
        Ok(HostOptions::builder()
            .engine(engine)
            .swarm(options.get_swarm().clone())
            .auth(auth)
            .build())
    }

    /// Sets the hostname, persists it and maps it to the loopback address in `/etc/hosts`.
    pub async fn set_hostname(&self, target: &ProvisionTarget) -> MachineResult<()> {
        let name = target.get_machine_name();
        validate_hostname(name)?;

        target
            .run(&format!(
                "sudo hostname {name} && echo {name} | sudo tee {} > /dev/null",
                shell_quote(&self.hostname_file)
            ))
            .await?;

        target
            .run(&format!(
                "if ! grep -xq '.*\\s{name}' /etc/hosts; then \
                 if grep -xq '127.0.1.1\\s.*' /etc/hosts; then \
                 sudo sed -i 's/^127.0.1.1\\s.*/127.0.1.1 {name}/g' /etc/hosts; \
                 else echo '127.0.1.1 {name}' | sudo tee -a /etc/hosts > /dev/null; fi; fi"
            ))
            .await?;
        Ok(())
    }

    /// Creates the daemon options directory.
    pub async fn make_options_dir(&self, target: &ProvisionTarget) -> MachineResult<()> {
        target
            .run(&format!("sudo mkdir -p {}", shell_quote(&self.options_dir)))
            .await?;
        Ok(())
    }

    /// Applies `action` to a package with the native package manager.
    pub async fn package(
        &self,
        target: &ProvisionTarget,
        name: &str,
        action: PackageAction,
    ) -> MachineResult<()> {
        match self.package_manager.command(name, action) {
            Some(command) => {
                tracing::debug!("{action} {name} with {}", self.package_manager);
                target.run(&command).await?;
            }
            None => tracing::debug!("packages are not managed, skipping {action} {name}"),
        }
        Ok(())
    }

    /// Installs the base packages, then the engine through its install script when missing.
    pub async fn install_engine(
        &self,
        provisioner: &dyn Provisioner,
        target: &ProvisionTarget,
        install_url: &str,
    ) -> MachineResult<()> {
        for package in &self.packages {
            provisioner
                .package(target, package, PackageAction::Install)
                .await?;
        }

        target
            .run(&format!(
                "if ! type docker > /dev/null 2>&1; then curl -sSL {} | sh -; fi",
                shell_quote(install_url)
            ))
            .await?;
        Ok(())
    }

    /// Writes every file of `config`.
    pub async fn write_daemon_config(
        &self,
        target: &ProvisionTarget,
        config: &DaemonConfig,
    ) -> MachineResult<()> {
        for file in config.files() {
            if let Some((dir, _)) = file.path.rsplit_once('/').filter(|(dir, _)| !dir.is_empty()) {
                target.run(&format!("sudo mkdir -p {}", shell_quote(dir))).await?;
            }
            target
                .run(&write_file_command(&file.path, &file.contents))
                .await?;
        }
        Ok(())
    }

    /// Waits until the engine answers on its local socket.
    pub async fn wait_for_engine(&self, target: &ProvisionTarget) -> MachineResult<()> {
        wait_for(
            "the engine to answer",
            &DEFAULT_ENGINE_POLL,
            target.get_sleeper().as_ref(),
            move || async move {
                match target.run("sudo docker version").await {
                    Ok(_) => Ok(true),
                    Err(MachineError::CommandFailed { .. }) => Ok(false),
                    Err(e) => Err(e),
                }
            },
        )
        .await
    }

    /// Allows inbound connections to the engine port, and to the swarm master port on masters.
    pub async fn open_ports(
        &self,
        target: &ProvisionTarget,
        options: &HostOptions,
    ) -> MachineResult<()> {
        let mut ports = vec![*options.get_engine().get_port()];
        if *options.get_swarm().get_enabled() && *options.get_swarm().get_master() {
            ports.push(*options.get_swarm().get_master_port());
        }

        for port in ports {
            let rule = format!("INPUT -p tcp --dport {port} -j ACCEPT");
            target
                .run(&format!(
                    "sudo iptables -w -C {rule} > /dev/null 2>&1 || sudo iptables -w -A {rule}"
                ))
                .await?;
        }
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn validate_hostname(name: &str) -> MachineResult<()> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');

    if !valid {
        return Err(MachineError::InvalidConfig(format!(
            "invalid hostname: {name}"
        )));
    }
    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
