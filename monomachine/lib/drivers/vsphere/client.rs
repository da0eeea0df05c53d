//! The boundary between the vSphere driver and the control plane it talks to.
//!
//! The driver only ever sees [`VsphereConnector`] and [`VsphereSession`]. A session is one
//! authenticated login; the driver opens one per operation and logs out when done.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{MachineError, MachineResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Where and as whom to log in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VsphereEndpoint {
    /// The vCenter or ESXi address.
    pub host: String,

    /// The SDK port.
    pub port: u16,

    /// The user name.
    pub username: String,

    /// The password.
    pub password: String,
}

/// A reference to an inventory object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    /// The managed object id, e.g. `vm-42`.
    pub id: String,

    /// The inventory name.
    pub name: String,
}

/// The power state of a virtual machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    /// Powered on.
    PoweredOn,

    /// Powered off.
    PoweredOff,

    /// Suspended.
    Suspended,
}

/// A device added to a virtual machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VirtualDevice {
    /// A SCSI controller of the given type, e.g. `pvscsi`.
    ScsiController(String),

    /// A disk on the SCSI controller.
    Disk {
        /// The datastore holding the disk.
        datastore: ObjectRef,

        /// The datastore path of the disk file.
        path: String,

        /// The capacity in KiB.
        capacity_kb: i64,
    },

    /// A CD-ROM drive on the IDE controller with an ISO inserted.
    Cdrom {
        /// The datastore path of the ISO.
        iso_path: String,
    },

    /// A network card of the given type, e.g. `vmxnet3`.
    EthernetCard {
        /// The card type.
        card_type: String,

        /// The network it is attached to.
        network: ObjectRef,
    },
}

/// The initial configuration of a new virtual machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmSpec {
    /// The machine name.
    pub name: String,

    /// The guest operating system id.
    pub guest_id: String,

    /// Where the machine's files live, e.g. `[datastore1]`.
    pub vm_path_name: String,

    /// The number of virtual CPUs.
    pub num_cpus: i32,

    /// The memory in MiB.
    pub memory_mb: i64,

    /// Devices present at creation.
    pub devices: Vec<VirtualDevice>,
}

/// Credentials for guest operations through VMware Tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestAuth {
    /// The guest user.
    pub username: String,

    /// The guest password.
    pub password: String,
}

/// Opens sessions against a vSphere endpoint.
#[async_trait]
pub trait VsphereConnector: Send + Sync {
    /// Logs in.
    async fn login(&self, endpoint: &VsphereEndpoint) -> MachineResult<Box<dyn VsphereSession>>;
}

/// One authenticated session.
///
/// Lookups that take a name treat an empty name as "the default one" and fail with
/// [`MachineError::NotFound`] when nothing matches. Folder paths are relative to the datacenter's
/// VM folder.
#[async_trait]
pub trait VsphereSession: Send + Sync {
    /// Finds a datacenter.
    async fn datacenter(&self, name: &str) -> MachineResult<ObjectRef>;

    /// Finds a VM folder. An empty path is the VM folder itself.
    async fn folder(&self, datacenter: &ObjectRef, path: &str) -> MachineResult<ObjectRef>;

    /// Finds a datastore.
    async fn datastore(&self, datacenter: &ObjectRef, name: &str) -> MachineResult<ObjectRef>;

    /// Finds a network.
    async fn network(&self, datacenter: &ObjectRef, name: &str) -> MachineResult<ObjectRef>;

    /// Finds a host system.
    async fn host_system(&self, datacenter: &ObjectRef, name: &str) -> MachineResult<ObjectRef>;

    /// Finds a resource pool by name.
    async fn resource_pool(&self, datacenter: &ObjectRef, name: &str) -> MachineResult<ObjectRef>;

    /// The resource pool of a host system.
    async fn host_resource_pool(&self, host: &ObjectRef) -> MachineResult<ObjectRef>;

    /// The default resource pool of a datacenter.
    async fn default_resource_pool(&self, datacenter: &ObjectRef) -> MachineResult<ObjectRef>;

    /// Creates a virtual machine.
    async fn create_vm(
        &self,
        folder: &ObjectRef,
        spec: &VmSpec,
        pool: &ObjectRef,
        host: Option<&ObjectRef>,
    ) -> MachineResult<ObjectRef>;

    /// Finds a virtual machine by its inventory path.
    async fn find_vm(&self, datacenter: &ObjectRef, path: &str) -> MachineResult<ObjectRef>;

    /// Uploads a local file to a datastore.
    async fn upload_datastore_file(
        &self,
        datacenter: &ObjectRef,
        datastore: &ObjectRef,
        local: &Path,
        path: &str,
    ) -> MachineResult<()>;

    /// Deletes a datastore file. Fails with [`MachineError::NotFound`] when it does not exist.
    async fn delete_datastore_file(
        &self,
        datacenter: &ObjectRef,
        datastore: &ObjectRef,
        path: &str,
    ) -> MachineResult<()>;

    /// Adds devices to a virtual machine.
    async fn add_devices(&self, vm: &ObjectRef, devices: &[VirtualDevice]) -> MachineResult<()>;

    /// Sets `guestinfo` and other extra configuration keys.
    async fn set_extra_config(
        &self,
        vm: &ObjectRef,
        options: &[(String, String)],
    ) -> MachineResult<()>;

    /// The machine's power state.
    async fn power_state(&self, vm: &ObjectRef) -> MachineResult<PowerState>;

    /// Powers the machine on and waits for the task.
    async fn power_on(&self, vm: &ObjectRef) -> MachineResult<()>;

    /// Powers the machine off and waits for the task.
    async fn power_off(&self, vm: &ObjectRef) -> MachineResult<()>;

    /// Asks the guest to shut down.
    async fn shutdown_guest(&self, vm: &ObjectRef) -> MachineResult<()>;

    /// Destroys the machine and its files.
    async fn destroy(&self, vm: &ObjectRef) -> MachineResult<()>;

    /// Waits for VMware Tools to report addresses, one list per NIC in device order.
    async fn wait_for_ips(&self, vm: &ObjectRef) -> MachineResult<Vec<Vec<String>>>;

    /// Copies a local file into the guest.
    async fn upload_guest_file(
        &self,
        vm: &ObjectRef,
        auth: &GuestAuth,
        local: &Path,
        guest_path: &str,
        mode: u32,
    ) -> MachineResult<()>;

    /// Starts a program in the guest.
    async fn start_guest_program(
        &self,
        vm: &ObjectRef,
        auth: &GuestAuth,
        program: &str,
        arguments: &str,
    ) -> MachineResult<()>;

    /// Ends the session.
    async fn logout(&self) -> MachineResult<()>;
}

/// A connector for builds without a vSphere client. Every login fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredConnector;

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl VsphereEndpoint {
    /// The SDK URL, without credentials.
    pub fn sdk_url(&self) -> String {
        format!("https://{}:{}/sdk", self.host, self.port)
    }
}

impl ObjectRef {
    /// Creates a reference.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// A path in this datastore, e.g. `[datastore1] dev/boot2docker.iso`.
    pub fn datastore_path(&self, path: &str) -> String {
        format!("[{}] {}", self.name, path)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl VsphereConnector for UnconfiguredConnector {
    async fn login(&self, endpoint: &VsphereEndpoint) -> MachineResult<Box<dyn VsphereSession>> {
        Err(MachineError::BackendUnavailable(format!(
            "no vSphere client is configured to reach {}",
            endpoint.sdk_url()
        )))
    }
}
