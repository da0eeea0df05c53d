use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    host::Host,
    utils::{machine_dir, CACHE_SUBDIR},
    MachineError, MachineResult,
};

use super::{
    vsphere::{
        UnconfiguredConnector, VsphereConfig, VsphereConnector, VsphereDriver,
        VSPHERE_DRIVER_NAME,
    },
    Driver, GenericConfig, GenericDriver, NotSupportedDriver, GENERIC_DRIVER_NAME,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Backends known by name that cannot run in this build.
const UNSUPPORTED_DRIVERS: &[&str] = &["vmwarefusion"];

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Builds driver instances by backend name.
///
/// Every call returns a fresh instance; drivers are never shared between hosts or actions.
pub trait DriverFactory: Send + Sync {
    /// The backend names this factory knows.
    fn driver_names(&self) -> Vec<String>;

    /// A driver for a machine that does not exist yet, with default configuration.
    fn new_driver(&self, driver_name: &str, machine_name: &str) -> MachineResult<Box<dyn Driver>>;

    /// The driver of a stored host, configured from its record.
    fn load_driver(&self, host: &Host) -> MachineResult<Box<dyn Driver>>;
}

/// The drivers shipped with monomachine.
#[derive(Clone)]
pub struct BuiltinDrivers {
    home: PathBuf,
    vsphere_connector: Arc<dyn VsphereConnector>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl BuiltinDrivers {
    /// Creates the factory for a monomachine home directory.
    ///
    /// The vSphere driver starts out without a control-plane client; see
    /// [`BuiltinDrivers::with_vsphere_connector`].
    pub fn new(home: impl AsRef<Path>) -> Self {
        Self {
            home: home.as_ref().to_path_buf(),
            vsphere_connector: Arc::new(UnconfiguredConnector),
        }
    }

    /// Uses `connector` to reach vSphere.
    pub fn with_vsphere_connector(mut self, connector: Arc<dyn VsphereConnector>) -> Self {
        self.vsphere_connector = connector;
        self
    }

    fn vsphere(&self, config: VsphereConfig) -> Box<dyn Driver> {
        Box::new(VsphereDriver::new(
            config,
            self.vsphere_connector.clone(),
            self.home.join(CACHE_SUBDIR),
        ))
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl DriverFactory for BuiltinDrivers {
    fn driver_names(&self) -> Vec<String> {
        [GENERIC_DRIVER_NAME, VSPHERE_DRIVER_NAME]
            .iter()
            .chain(UNSUPPORTED_DRIVERS)
            .map(|name| name.to_string())
            .collect()
    }

    fn new_driver(&self, driver_name: &str, machine_name: &str) -> MachineResult<Box<dyn Driver>> {
        match driver_name {
            GENERIC_DRIVER_NAME => Ok(Box::new(GenericDriver::new(GenericConfig::new(
                machine_name,
            )))),
            VSPHERE_DRIVER_NAME => Ok(self.vsphere(VsphereConfig::new(
                machine_name,
                machine_dir(&self.home, machine_name),
            ))),
            name if UNSUPPORTED_DRIVERS.contains(&name) => {
                Ok(Box::new(NotSupportedDriver::new(name, machine_name)))
            }
            other => Err(MachineError::InvalidConfig(format!("unknown driver: {other}"))),
        }
    }

    fn load_driver(&self, host: &Host) -> MachineResult<Box<dyn Driver>> {
        let config = host.get_driver_config().clone();
        match host.get_driver_name().as_str() {
            GENERIC_DRIVER_NAME => Ok(Box::new(GenericDriver::new(serde_json::from_value(
                config,
            )?))),
            VSPHERE_DRIVER_NAME => Ok(self.vsphere(serde_json::from_value(config)?)),
            name if UNSUPPORTED_DRIVERS.contains(&name) => {
                Ok(Box::new(NotSupportedDriver::new(name, host.get_name())))
            }
            other => Err(MachineError::InvalidConfig(format!("unknown driver: {other}"))),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthOptions, HostOptions};

    #[test]
    fn test_new_and_load_round_trip_through_host_record() -> anyhow::Result<()> {
        let home = tempfile::tempdir()?;
        let drivers = BuiltinDrivers::new(home.path());

        let driver = drivers.new_driver("vmwarevsphere", "dev")?;
        assert_eq!(driver.driver_name(), "vmwarevsphere");
        assert_eq!(
            driver.ssh_key_path(),
            Some(home.path().join("machines/dev/id_ed25519"))
        );

        let options = HostOptions::builder()
            .auth(AuthOptions::for_cert_dir(home.path().join("certs")))
            .build();
        let host = Host::new("dev", "vmwarevsphere", driver.config()?, options);
        let loaded = drivers.load_driver(&host)?;
        assert_eq!(loaded.machine_name(), "dev");
        assert_eq!(loaded.config()?, driver.config()?);
        Ok(())
    }

    #[test]
    fn test_unknown_and_unsupported_drivers() -> anyhow::Result<()> {
        let drivers = BuiltinDrivers::new("/tmp/monomachine");
        assert!(matches!(
            drivers.new_driver("virtualbox", "dev"),
            Err(MachineError::InvalidConfig(_))
        ));
        assert_eq!(
            drivers.new_driver("vmwarefusion", "dev")?.driver_name(),
            "vmwarefusion"
        );
        assert!(drivers.driver_names().contains(&"generic".to_string()));
        Ok(())
    }
}
