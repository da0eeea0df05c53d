use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::json;

use crate::{host::HostState, MachineError, MachineResult};

use super::{CreateFlag, Driver, DriverOptions};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Stands in for a backend that cannot run on this platform.
///
/// The host record stays loadable and listable; every operation on the machine fails with
/// `UnsupportedOperation`.
#[derive(Debug, Clone)]
pub struct NotSupportedDriver {
    driver_name: String,
    machine_name: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl NotSupportedDriver {
    /// Creates a placeholder for `driver_name`.
    pub fn new(driver_name: impl Into<String>, machine_name: impl Into<String>) -> Self {
        Self {
            driver_name: driver_name.into(),
            machine_name: machine_name.into(),
        }
    }

    fn unsupported<T>(&self, operation: &str) -> MachineResult<T> {
        Err(MachineError::unsupported(
            format!("{} on this platform", self.driver_name),
            operation,
        ))
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl Driver for NotSupportedDriver {
    fn driver_name(&self) -> &str {
        &self.driver_name
    }

    fn machine_name(&self) -> &str {
        &self.machine_name
    }

    fn create_flags(&self) -> Vec<CreateFlag> {
        Vec::new()
    }

    fn set_config_from_flags(&mut self, _options: &DriverOptions) -> MachineResult<()> {
        self.unsupported("configure")
    }

    fn config(&self) -> MachineResult<serde_json::Value> {
        Ok(json!({ "machine_name": self.machine_name }))
    }

    fn ssh_username(&self) -> String {
        String::new()
    }

    fn ssh_key_path(&self) -> Option<PathBuf> {
        None
    }

    async fn pre_create_check(&mut self) -> MachineResult<()> {
        self.unsupported("create")
    }

    async fn create(&mut self) -> MachineResult<()> {
        self.unsupported("create")
    }

    async fn start(&mut self) -> MachineResult<()> {
        self.unsupported("start")
    }

    async fn stop(&mut self) -> MachineResult<()> {
        self.unsupported("stop")
    }

    async fn restart(&mut self) -> MachineResult<()> {
        self.unsupported("restart")
    }

    async fn kill(&mut self) -> MachineResult<()> {
        self.unsupported("kill")
    }

    async fn remove(&mut self) -> MachineResult<()> {
        self.unsupported("remove")
    }

    async fn upgrade(&mut self) -> MachineResult<()> {
        self.unsupported("upgrade")
    }

    async fn get_state(&self) -> MachineResult<HostState> {
        self.unsupported("state")
    }

    async fn get_ip(&self) -> MachineResult<String> {
        self.unsupported("ip")
    }

    async fn get_url(&self) -> MachineResult<String> {
        self.unsupported("url")
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
