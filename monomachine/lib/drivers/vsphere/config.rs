use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    drivers::{CreateFlag, DriverOptions},
    MachineError, MachineResult,
};

use super::VsphereEndpoint;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The name of the vSphere driver.
pub const VSPHERE_DRIVER_NAME: &str = "vmwarevsphere";

/// The ISO file name, both in the machine directory and on the datastore.
pub const ISO_FILENAME: &str = "boot2docker.iso";

/// The guest user of boot2docker, used for SSH and guest operations.
pub const B2D_USER: &str = "docker";

/// The guest password of boot2docker, used for guest operations.
pub const B2D_PASS: &str = "tcuser";

const DEFAULT_CPUS: i64 = 2;
const DEFAULT_MEMORY_MB: i64 = 2048;
const DEFAULT_DISK_SIZE_MB: i64 = 20480;
const DEFAULT_SDK_PORT: i64 = 443;
const DEFAULT_NETWORK: &str = "VM Network";

const FLAG_CPU_COUNT: &str = "vmwarevsphere-cpu-count";
const FLAG_MEMORY_SIZE: &str = "vmwarevsphere-memory-size";
const FLAG_DISK_SIZE: &str = "vmwarevsphere-disk-size";
const FLAG_BOOT2DOCKER_URL: &str = "vmwarevsphere-boot2docker-url";
const FLAG_VCENTER: &str = "vmwarevsphere-vcenter";
const FLAG_VCENTER_PORT: &str = "vmwarevsphere-vcenter-port";
const FLAG_USERNAME: &str = "vmwarevsphere-username";
const FLAG_PASSWORD: &str = "vmwarevsphere-password";
const FLAG_NETWORK: &str = "vmwarevsphere-network";
const FLAG_DATASTORE: &str = "vmwarevsphere-datastore";
const FLAG_DATACENTER: &str = "vmwarevsphere-datacenter";
const FLAG_FOLDER: &str = "vmwarevsphere-folder";
const FLAG_POOL: &str = "vmwarevsphere-pool";
const FLAG_HOSTSYSTEM: &str = "vmwarevsphere-hostsystem";
const FLAG_CFGPARAM: &str = "vmwarevsphere-cfgparam";
const FLAG_CLOUDINIT: &str = "vmwarevsphere-cloudinit";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The persisted configuration of a vSphere machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VsphereConfig {
    /// The machine name.
    pub machine_name: String,

    /// The machine's local directory, holding the ISO, the SSH key and the key bundle.
    pub store_path: PathBuf,

    /// Number of virtual CPUs.
    pub cpu_count: i64,

    /// Memory in MiB.
    pub memory_mb: i64,

    /// Disk size in MiB.
    pub disk_size_mb: i64,

    /// Where to get the boot2docker ISO. Empty means the cached or latest release.
    pub boot2docker_url: String,

    /// The vCenter or ESXi address.
    pub vcenter: String,

    /// The SDK port.
    pub vcenter_port: u16,

    /// The vSphere user.
    pub username: String,

    /// The vSphere password.
    pub password: String,

    /// The networks to attach, one NIC each.
    pub networks: Vec<String>,

    /// The datastore. Empty means the default.
    pub datastore: String,

    /// The datacenter. Empty means the default.
    pub datacenter: String,

    /// The VM folder, relative to the datacenter's VM folder, without surrounding slashes.
    pub folder: String,

    /// The resource pool.
    pub pool: String,

    /// The host system.
    pub host_system: String,

    /// Extra configuration in `key=value` form.
    pub cfg_params: Vec<String>,

    /// A cloud-init URL or local file.
    pub cloud_init: String,

    /// The SSH user.
    pub ssh_user: String,

    /// The SSH port.
    pub ssh_port: u16,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl VsphereConfig {
    /// The defaults for a new machine.
    pub fn new(machine_name: impl Into<String>, store_path: impl AsRef<Path>) -> Self {
        Self {
            machine_name: machine_name.into(),
            store_path: store_path.as_ref().to_path_buf(),
            cpu_count: DEFAULT_CPUS,
            memory_mb: DEFAULT_MEMORY_MB,
            disk_size_mb: DEFAULT_DISK_SIZE_MB,
            boot2docker_url: String::new(),
            vcenter: String::new(),
            vcenter_port: DEFAULT_SDK_PORT as u16,
            username: String::new(),
            password: String::new(),
            networks: Vec::new(),
            datastore: String::new(),
            datacenter: String::new(),
            folder: String::new(),
            pool: String::new(),
            host_system: String::new(),
            cfg_params: Vec::new(),
            cloud_init: String::new(),
            ssh_user: B2D_USER.to_string(),
            ssh_port: 22,
        }
    }

    /// The flags the driver accepts.
    pub fn create_flags() -> Vec<CreateFlag> {
        vec![
            CreateFlag::int(
                FLAG_CPU_COUNT,
                "VSPHERE_CPU_COUNT",
                "vSphere CPU number for docker VM",
                DEFAULT_CPUS,
            ),
            CreateFlag::int(
                FLAG_MEMORY_SIZE,
                "VSPHERE_MEMORY_SIZE",
                "vSphere size of memory for docker VM (in MB)",
                DEFAULT_MEMORY_MB,
            ),
            CreateFlag::int(
                FLAG_DISK_SIZE,
                "VSPHERE_DISK_SIZE",
                "vSphere size of disk for docker VM (in MB)",
                DEFAULT_DISK_SIZE_MB,
            ),
            CreateFlag::string(
                FLAG_BOOT2DOCKER_URL,
                "VSPHERE_BOOT2DOCKER_URL",
                "vSphere URL for boot2docker image",
                "",
            ),
            CreateFlag::string(
                FLAG_VCENTER,
                "VSPHERE_VCENTER",
                "vSphere IP/hostname for vCenter",
                "",
            ),
            CreateFlag::int(
                FLAG_VCENTER_PORT,
                "VSPHERE_VCENTER_PORT",
                "vSphere Port for vCenter",
                DEFAULT_SDK_PORT,
            ),
            CreateFlag::string(
                FLAG_USERNAME,
                "VSPHERE_USERNAME",
                "vSphere username",
                "",
            ),
            CreateFlag::string(
                FLAG_PASSWORD,
                "VSPHERE_PASSWORD",
                "vSphere password",
                "",
            ),
            CreateFlag::string_slice(
                FLAG_NETWORK,
                "VSPHERE_NETWORK",
                "vSphere network where the docker VM will be attached",
            ),
            CreateFlag::string(
                FLAG_DATASTORE,
                "VSPHERE_DATASTORE",
                "vSphere datastore for docker VM",
                "",
            ),
            CreateFlag::string(
                FLAG_DATACENTER,
                "VSPHERE_DATACENTER",
                "vSphere datacenter for docker VM",
                "",
            ),
            CreateFlag::string(
                FLAG_FOLDER,
                "VSPHERE_FOLDER",
                "vSphere folder for the docker VM. \
                 This folder must already exist in the datacenter.",
                "",
            ),
            CreateFlag::string(
                FLAG_POOL,
                "VSPHERE_POOL",
                "vSphere resource pool for docker VM",
                "",
            ),
            CreateFlag::string(
                FLAG_HOSTSYSTEM,
                "VSPHERE_HOSTSYSTEM",
                "vSphere compute resource where the docker VM will be instantiated. \
                 This can be omitted if using a cluster with DRS.",
                "",
            ),
            CreateFlag::string_slice(
                FLAG_CFGPARAM,
                "VSPHERE_CFGPARAM",
                "vSphere vm configuration parameters (used for guestinfo)",
            ),
            CreateFlag::string(
                FLAG_CLOUDINIT,
                "VSPHERE_CLOUDINIT",
                "vSphere cloud-init file or url to set in the guestinfo",
                "",
            ),
        ]
    }

    /// Applies resolved create options. Absent options keep their current value.
    pub fn apply(&mut self, options: &DriverOptions) -> MachineResult<()> {
        let int = |name: &str, current: i64| -> MachineResult<i64> {
            if options.contains(name) {
                options.get_int(name)
            } else {
                Ok(current)
            }
        };

        self.cpu_count = int(FLAG_CPU_COUNT, self.cpu_count)?;
        self.memory_mb = int(FLAG_MEMORY_SIZE, self.memory_mb)?;
        self.disk_size_mb = int(FLAG_DISK_SIZE, self.disk_size_mb)?;
        self.vcenter_port = u16::try_from(int(FLAG_VCENTER_PORT, self.vcenter_port.into())?)
            .map_err(|_| {
                MachineError::InvalidConfig(format!("{FLAG_VCENTER_PORT} is not a port"))
            })?;

        self.boot2docker_url = options.get_string(FLAG_BOOT2DOCKER_URL)?;
        self.vcenter = options.get_string(FLAG_VCENTER)?;
        self.username = options.get_string(FLAG_USERNAME)?;
        self.password = options.get_string(FLAG_PASSWORD)?;
        self.networks = options.get_string_slice(FLAG_NETWORK)?;
        self.datastore = options.get_string(FLAG_DATASTORE)?;
        self.datacenter = options.get_string(FLAG_DATACENTER)?;
        self.folder = options.get_string(FLAG_FOLDER)?.trim_matches('/').to_string();
        self.pool = options.get_string(FLAG_POOL)?;
        self.host_system = options.get_string(FLAG_HOSTSYSTEM)?;
        self.cfg_params = options.get_string_slice(FLAG_CFGPARAM)?;
        self.cloud_init = options.get_string(FLAG_CLOUDINIT)?;
        self.ssh_user = B2D_USER.to_string();
        self.ssh_port = 22;

        if self.cpu_count < 1 || self.memory_mb < 1 || self.disk_size_mb < 1 {
            return Err(MachineError::InvalidConfig(
                "cpu count, memory and disk size must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// The login endpoint.
    pub fn endpoint(&self) -> VsphereEndpoint {
        VsphereEndpoint {
            host: self.vcenter.clone(),
            port: self.vcenter_port,
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }

    /// The networks to attach. Falls back to `VM Network` when none was configured.
    pub fn effective_networks(&self) -> Vec<String> {
        if self.networks.is_empty() {
            vec![DEFAULT_NETWORK.to_string()]
        } else {
            self.networks.clone()
        }
    }

    /// The inventory path of the machine.
    pub fn vm_path(&self) -> String {
        if self.folder.is_empty() {
            self.machine_name.clone()
        } else {
            format!("{}/{}", self.folder, self.machine_name)
        }
    }

    /// The local ISO copy.
    pub fn iso_path(&self) -> PathBuf {
        self.store_path.join(ISO_FILENAME)
    }

    /// The ISO path relative to the datastore root.
    pub fn datastore_iso_path(&self) -> String {
        format!("{}/{ISO_FILENAME}", self.machine_name)
    }

    /// The private SSH key.
    pub fn ssh_key_path(&self) -> PathBuf {
        self.store_path.join("id_ed25519")
    }

    /// The boot2docker key bundle.
    pub fn userdata_path(&self) -> PathBuf {
        self.store_path.join("userdata.tar")
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::FlagValue;

    #[test]
    fn test_apply_keeps_defaults_and_trims_folder() -> anyhow::Result<()> {
        let mut config = VsphereConfig::new("dev", "/tmp/dev");
        let options = DriverOptions::new()
            .with(FLAG_VCENTER, FlagValue::String("vc.local".into()))
            .with(FLAG_FOLDER, FlagValue::String("/docker/hosts/".into()))
            .with(FLAG_MEMORY_SIZE, FlagValue::Int(4096));

        config.apply(&options)?;

        assert_eq!(config.cpu_count, DEFAULT_CPUS);
        assert_eq!(config.memory_mb, 4096);
        assert_eq!(config.vcenter_port, 443);
        assert_eq!(config.folder, "docker/hosts");
        assert_eq!(config.vm_path(), "docker/hosts/dev");
        assert_eq!(config.endpoint().sdk_url(), "https://vc.local:443/sdk");
        assert_eq!(config.effective_networks(), ["VM Network"]);
        Ok(())
    }

    #[test]
    fn test_apply_rejects_bad_port() {
        let mut config = VsphereConfig::new("dev", "/tmp/dev");
        let options = DriverOptions::new().with(FLAG_VCENTER_PORT, FlagValue::Int(70000));
        assert!(matches!(
            config.apply(&options),
            Err(MachineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_flags_carry_env_vars() {
        let flags = VsphereConfig::create_flags();
        assert_eq!(flags.len(), 16);
        assert!(flags
            .iter()
            .all(|flag| flag.env_var.as_deref().is_some_and(|v| v.starts_with("VSPHERE_"))));
    }
}
