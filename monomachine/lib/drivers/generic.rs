use std::{path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;

use crate::{
    config::DEFAULT_ENGINE_PORT,
    host::HostState,
    remote::{Commander, SshCommander},
    MachineError, MachineResult,
};

use super::{CreateFlag, Driver, DriverOptions};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The name of the generic driver.
pub const GENERIC_DRIVER_NAME: &str = "generic";

const FLAG_IP_ADDRESS: &str = "generic-ip-address";
const FLAG_SSH_USER: &str = "generic-ssh-user";
const FLAG_SSH_KEY: &str = "generic-ssh-key";
const FLAG_SSH_PORT: &str = "generic-ssh-port";
const FLAG_ENGINE_PORT: &str = "generic-engine-port";

const DEFAULT_SSH_USER: &str = "root";
const REACH_TIMEOUT: Duration = Duration::from_secs(3);

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The persisted configuration of a generic machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericConfig {
    /// The machine name.
    pub machine_name: String,

    /// The machine's address.
    pub ip_address: String,

    /// The SSH user.
    pub ssh_user: String,

    /// The SSH port.
    pub ssh_port: u16,

    /// The private key for SSH. Without one the SSH agent is used.
    pub ssh_key_path: Option<PathBuf>,

    /// The engine port.
    pub engine_port: u16,
}

/// Drives an existing machine that is reachable over SSH.
///
/// There is no hypervisor to ask, so the machine counts as running while its SSH port accepts
/// connections. Power operations become shutdown commands and removal forgets the machine
/// without touching it.
pub struct GenericDriver {
    config: GenericConfig,
    commander: Option<Arc<dyn Commander>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl GenericConfig {
    /// The defaults for a new machine.
    pub fn new(machine_name: impl Into<String>) -> Self {
        Self {
            machine_name: machine_name.into(),
            ip_address: String::new(),
            ssh_user: DEFAULT_SSH_USER.to_string(),
            ssh_port: 22,
            ssh_key_path: None,
            engine_port: DEFAULT_ENGINE_PORT,
        }
    }
}

impl GenericDriver {
    /// Creates a driver.
    pub fn new(config: GenericConfig) -> Self {
        Self {
            config,
            commander: None,
        }
    }

    /// Runs commands through `commander` instead of SSH.
    pub fn with_commander(mut self, commander: Arc<dyn Commander>) -> Self {
        self.commander = Some(commander);
        self
    }

    /// The driver configuration.
    pub fn get_config(&self) -> &GenericConfig {
        &self.config
    }

    fn address(&self) -> MachineResult<&str> {
        if self.config.ip_address.is_empty() {
            return Err(MachineError::InvalidConfig(format!(
                "{FLAG_IP_ADDRESS} is required"
            )));
        }
        Ok(&self.config.ip_address)
    }

    fn channel(&self) -> MachineResult<Arc<dyn Commander>> {
        if let Some(commander) = &self.commander {
            return Ok(commander.clone());
        }

        let builder = SshCommander::builder()
            .hostname(self.address()?)
            .port(self.config.ssh_port)
            .username(self.config.ssh_user.clone());

        Ok(match &self.config.ssh_key_path {
            Some(key_path) => Arc::new(builder.key_path(key_path.clone()).build()),
            None => Arc::new(builder.build()),
        })
    }

    /// Runs a command that takes the machine down with the connection it arrived on.
    async fn power_command(&self, command: &str) -> MachineResult<()> {
        match self.channel()?.run(command).await {
            Ok(_) => Ok(()),
            Err(MachineError::BackendUnavailable(reason)) => {
                tracing::debug!("connection closed after `{command}`: {reason}");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl Driver for GenericDriver {
    fn driver_name(&self) -> &str {
        GENERIC_DRIVER_NAME
    }

    fn machine_name(&self) -> &str {
        &self.config.machine_name
    }

    fn create_flags(&self) -> Vec<CreateFlag> {
        vec![
            CreateFlag::string(FLAG_IP_ADDRESS, "GENERIC_IP_ADDRESS", "IP Address of machine", ""),
            CreateFlag::string(FLAG_SSH_USER, "GENERIC_SSH_USER", "SSH user", DEFAULT_SSH_USER),
            CreateFlag::string(FLAG_SSH_KEY, "GENERIC_SSH_KEY", "SSH private key path", ""),
            CreateFlag::int(FLAG_SSH_PORT, "GENERIC_SSH_PORT", "SSH port", 22),
            CreateFlag::int(
                FLAG_ENGINE_PORT,
                "GENERIC_ENGINE_PORT",
                "Docker engine port",
                DEFAULT_ENGINE_PORT.into(),
            ),
        ]
    }

    fn set_config_from_flags(&mut self, options: &DriverOptions) -> MachineResult<()> {
        let port = |name: &str, current: u16| -> MachineResult<u16> {
            if !options.contains(name) {
                return Ok(current);
            }
            u16::try_from(options.get_int(name)?)
                .map_err(|_| MachineError::InvalidConfig(format!("{name} is not a port")))
        };

        self.config.ip_address = options.get_string(FLAG_IP_ADDRESS)?;
        let user = options.get_string(FLAG_SSH_USER)?;
        if !user.is_empty() {
            self.config.ssh_user = user;
        }
        let key = options.get_string(FLAG_SSH_KEY)?;
        self.config.ssh_key_path = (!key.is_empty()).then(|| PathBuf::from(key));
        self.config.ssh_port = port(FLAG_SSH_PORT, self.config.ssh_port)?;
        self.config.engine_port = port(FLAG_ENGINE_PORT, self.config.engine_port)?;

        self.address()?;
        Ok(())
    }

    fn config(&self) -> MachineResult<serde_json::Value> {
        Ok(serde_json::to_value(&self.config)?)
    }

    fn ssh_username(&self) -> String {
        self.config.ssh_user.clone()
    }

    fn ssh_port(&self) -> u16 {
        self.config.ssh_port
    }

    fn ssh_key_path(&self) -> Option<PathBuf> {
        self.config.ssh_key_path.clone()
    }

    fn engine_port(&self) -> u16 {
        self.config.engine_port
    }

    async fn ssh_hostname(&self) -> MachineResult<String> {
        Ok(self.address()?.to_string())
    }

    async fn commander(&self) -> MachineResult<Arc<dyn Commander>> {
        self.channel()
    }

    async fn pre_create_check(&mut self) -> MachineResult<()> {
        self.address()?;
        if let Some(key_path) = &self.config.ssh_key_path {
            if !tokio::fs::try_exists(key_path).await? {
                return Err(MachineError::InvalidConfig(format!(
                    "ssh key does not exist: {}",
                    key_path.display()
                )));
            }
        }
        Ok(())
    }

    async fn create(&mut self) -> MachineResult<()> {
        tracing::info!("importing existing machine at {}", self.address()?);
        if self.get_state().await? != HostState::Running {
            return Err(MachineError::BackendUnavailable(format!(
                "{}:{} does not accept connections",
                self.config.ip_address, self.config.ssh_port
            )));
        }
        Ok(())
    }

    async fn start(&mut self) -> MachineResult<()> {
        if self.get_state().await? == HostState::Running {
            return Ok(());
        }
        Err(MachineError::unsupported(GENERIC_DRIVER_NAME, "start"))
    }

    async fn stop(&mut self) -> MachineResult<()> {
        self.power_command("sudo shutdown -h now").await
    }

    async fn restart(&mut self) -> MachineResult<()> {
        self.power_command("sudo shutdown -r now").await
    }

    async fn kill(&mut self) -> MachineResult<()> {
        self.power_command("sudo shutdown -P now").await
    }

    async fn remove(&mut self) -> MachineResult<()> {
        tracing::debug!(
            "forgetting {}, the machine itself is left alone",
            self.config.machine_name
        );
        Ok(())
    }

    async fn upgrade(&mut self) -> MachineResult<()> {
        Err(MachineError::unsupported(GENERIC_DRIVER_NAME, "upgrade"))
    }

    async fn get_state(&self) -> MachineResult<HostState> {
        let address = format!("{}:{}", self.address()?, self.config.ssh_port);
        match tokio::time::timeout(REACH_TIMEOUT, TcpStream::connect(&address)).await {
            Ok(Ok(_)) => Ok(HostState::Running),
            Ok(Err(e)) => {
                tracing::debug!("{address} refused connection: {e}");
                Ok(HostState::Stopped)
            }
            Err(_) => {
                tracing::debug!("{address} did not answer within {REACH_TIMEOUT:?}");
                Ok(HostState::Stopped)
            }
        }
    }

    async fn get_ip(&self) -> MachineResult<String> {
        let state = self.get_state().await?;
        if state != HostState::Running {
            return Err(MachineError::HostNotRunning(format!(
                "{} is {state}",
                self.config.machine_name
            )));
        }
        Ok(self.address()?.to_string())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
