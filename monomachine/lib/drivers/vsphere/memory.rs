use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;

use crate::{MachineError, MachineResult};

use super::{
    GuestAuth, ObjectRef, PowerState, VirtualDevice, VmSpec, VsphereConnector, VsphereEndpoint,
    VsphereSession,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An in-memory vSphere inventory.
///
/// It serves as both connector and session. Clones share the inventory. Mutating calls are
/// recorded in [`MemoryVsphere::operations`]; lookups are not.
#[derive(Debug, Clone, Default)]
pub struct MemoryVsphere {
    inner: Arc<Mutex<Inventory>>,
}

/// A snapshot of one virtual machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryVm {
    /// The creation spec.
    pub spec: VmSpec,

    /// The power state.
    pub power: PowerState,

    /// Devices added after creation.
    pub devices: Vec<VirtualDevice>,

    /// Extra configuration.
    pub extra_config: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct Inventory {
    datacenters: Vec<String>,
    folders: BTreeSet<String>,
    datastores: Vec<String>,
    networks: Vec<String>,
    host_systems: Vec<String>,
    pools: Vec<String>,
    vms: BTreeMap<String, MemoryVm>,
    datastore_files: BTreeSet<String>,
    guest_files: Vec<(String, u32)>,
    guest_programs: Vec<String>,
    addresses: Vec<Vec<String>>,
    ignore_guest_shutdown: bool,
    operations: Vec<String>,
    open_sessions: i64,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl MemoryVsphere {
    /// An inventory with one datacenter `DC0`, datastore `datastore1`, network `VM Network`, host
    /// `esx1` and resource pool `Resources`.
    pub fn with_defaults() -> Self {
        let memory = Self::default();
        {
            let mut inventory = memory.lock();
            inventory.datacenters.push("DC0".into());
            inventory.datastores.push("datastore1".into());
            inventory.networks.push("VM Network".into());
            inventory.host_systems.push("esx1".into());
            inventory.pools.push("Resources".into());
            inventory.addresses = vec![vec!["10.0.0.21".into()]];
        }
        memory
    }

    /// Adds a VM folder.
    pub fn add_folder(&self, path: &str) {
        self.lock().folders.insert(path.to_string());
    }

    /// Adds a network.
    pub fn add_network(&self, name: &str) {
        self.lock().networks.push(name.to_string());
    }

    /// Sets the addresses VMware Tools reports, one list per NIC.
    pub fn set_addresses(&self, addresses: Vec<Vec<String>>) {
        self.lock().addresses = addresses;
    }

    /// Makes guest shutdown requests do nothing.
    pub fn ignore_guest_shutdown(&self) {
        self.lock().ignore_guest_shutdown = true;
    }

    /// Suspends a machine behind the driver's back.
    pub fn suspend(&self, path: &str) {
        if let Some(vm) = self.lock().vms.get_mut(path) {
            vm.power = PowerState::Suspended;
        }
    }

    /// Deletes a datastore file behind the driver's back.
    pub fn delete_file_out_of_band(&self, path: &str) {
        self.lock().datastore_files.remove(path);
    }

    /// A snapshot of a machine by inventory path.
    pub fn vm(&self, path: &str) -> Option<MemoryVm> {
        self.lock().vms.get(path).cloned()
    }

    /// The datastore files, as datastore paths.
    pub fn datastore_files(&self) -> Vec<String> {
        self.lock().datastore_files.iter().cloned().collect()
    }

    /// Guest files uploaded with their modes.
    pub fn guest_files(&self) -> Vec<(String, u32)> {
        self.lock().guest_files.clone()
    }

    /// Guest programs started, as `program arguments`.
    pub fn guest_programs(&self) -> Vec<String> {
        self.lock().guest_programs.clone()
    }

    /// The mutating operations performed so far.
    pub fn operations(&self) -> Vec<String> {
        self.lock().operations.clone()
    }

    /// Sessions logged in but not yet logged out.
    pub fn open_sessions(&self) -> i64 {
        self.lock().open_sessions
    }

    fn lock(&self) -> MutexGuard<'_, Inventory> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, operation: String) -> MutexGuard<'_, Inventory> {
        let mut inventory = self.lock();
        inventory.operations.push(operation);
        inventory
    }
}

impl Inventory {
    fn vm_mut(&mut self, vm: &ObjectRef) -> MachineResult<&mut MemoryVm> {
        self.vms
            .get_mut(&vm.id)
            .ok_or_else(|| MachineError::NotFound(format!("virtual machine {}", vm.name)))
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl VsphereConnector for MemoryVsphere {
    async fn login(&self, endpoint: &VsphereEndpoint) -> MachineResult<Box<dyn VsphereSession>> {
        if endpoint.host.is_empty() {
            return Err(MachineError::BackendUnavailable(
                "no vCenter address configured".to_string(),
            ));
        }

        self.lock().open_sessions += 1;
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl VsphereSession for MemoryVsphere {
    async fn datacenter(&self, name: &str) -> MachineResult<ObjectRef> {
        lookup(&self.lock().datacenters, "datacenter", name)
    }

    async fn folder(&self, _datacenter: &ObjectRef, path: &str) -> MachineResult<ObjectRef> {
        if path.is_empty() || self.lock().folders.contains(path) {
            Ok(ObjectRef::new(format!("folder:{path}"), path))
        } else {
            Err(MachineError::NotFound(format!("folder {path}")))
        }
    }

    async fn datastore(&self, _datacenter: &ObjectRef, name: &str) -> MachineResult<ObjectRef> {
        lookup(&self.lock().datastores, "datastore", name)
    }

    async fn network(&self, _datacenter: &ObjectRef, name: &str) -> MachineResult<ObjectRef> {
        lookup(&self.lock().networks, "network", name)
    }

    async fn host_system(&self, _datacenter: &ObjectRef, name: &str) -> MachineResult<ObjectRef> {
        lookup(&self.lock().host_systems, "host system", name)
    }

    async fn resource_pool(&self, _datacenter: &ObjectRef, name: &str) -> MachineResult<ObjectRef> {
        lookup(&self.lock().pools, "resource pool", name)
    }

    async fn host_resource_pool(&self, _host: &ObjectRef) -> MachineResult<ObjectRef> {
        lookup(&self.lock().pools, "resource pool", "")
    }

    async fn default_resource_pool(&self, _datacenter: &ObjectRef) -> MachineResult<ObjectRef> {
        lookup(&self.lock().pools, "resource pool", "")
    }

    async fn create_vm(
        &self,
        folder: &ObjectRef,
        spec: &VmSpec,
        _pool: &ObjectRef,
        _host: Option<&ObjectRef>,
    ) -> MachineResult<ObjectRef> {
        let path = if folder.name.is_empty() {
            spec.name.clone()
        } else {
            format!("{}/{}", folder.name, spec.name)
        };

        let mut inventory = self.record(format!("create_vm {path}"));
        if inventory.vms.contains_key(&path) {
            return Err(MachineError::BackendUnavailable(format!(
                "virtual machine {path} already exists"
            )));
        }

        inventory.vms.insert(
            path.clone(),
            MemoryVm {
                spec: spec.clone(),
                power: PowerState::PoweredOff,
                devices: Vec::new(),
                extra_config: Vec::new(),
            },
        );
        Ok(ObjectRef::new(path, spec.name.clone()))
    }

    async fn find_vm(&self, _datacenter: &ObjectRef, path: &str) -> MachineResult<ObjectRef> {
        match self.lock().vms.get(path) {
            Some(vm) => Ok(ObjectRef::new(path, vm.spec.name.clone())),
            None => Err(MachineError::NotFound(format!("virtual machine {path}"))),
        }
    }

    async fn upload_datastore_file(
        &self,
        _datacenter: &ObjectRef,
        datastore: &ObjectRef,
        local: &Path,
        path: &str,
    ) -> MachineResult<()> {
        if !tokio::fs::try_exists(local).await? {
            return Err(MachineError::NotFound(local.display().to_string()));
        }

        let target = datastore.datastore_path(path);
        let mut inventory = self.record(format!("upload {target}"));
        inventory.datastore_files.insert(target);
        Ok(())
    }

    async fn delete_datastore_file(
        &self,
        _datacenter: &ObjectRef,
        datastore: &ObjectRef,
        path: &str,
    ) -> MachineResult<()> {
        let target = datastore.datastore_path(path);
        let mut inventory = self.record(format!("delete {target}"));
        if inventory.datastore_files.remove(&target) {
            Ok(())
        } else {
            Err(MachineError::NotFound(target))
        }
    }

    async fn add_devices(&self, vm: &ObjectRef, devices: &[VirtualDevice]) -> MachineResult<()> {
        let mut inventory = self.record(format!("add_devices {}", vm.id));
        inventory.vm_mut(vm)?.devices.extend_from_slice(devices);
        Ok(())
    }

    async fn set_extra_config(
        &self,
        vm: &ObjectRef,
        options: &[(String, String)],
    ) -> MachineResult<()> {
        let mut inventory = self.record(format!("set_extra_config {}", vm.id));
        inventory
            .vm_mut(vm)?
            .extra_config
            .extend_from_slice(options);
        Ok(())
    }

    async fn power_state(&self, vm: &ObjectRef) -> MachineResult<PowerState> {
        Ok(self.lock().vm_mut(vm)?.power)
    }

    async fn power_on(&self, vm: &ObjectRef) -> MachineResult<()> {
        let mut inventory = self.record(format!("power_on {}", vm.id));
        inventory.vm_mut(vm)?.power = PowerState::PoweredOn;
        Ok(())
    }

    async fn power_off(&self, vm: &ObjectRef) -> MachineResult<()> {
        let mut inventory = self.record(format!("power_off {}", vm.id));
        inventory.vm_mut(vm)?.power = PowerState::PoweredOff;
        Ok(())
    }

    async fn shutdown_guest(&self, vm: &ObjectRef) -> MachineResult<()> {
        let mut inventory = self.record(format!("shutdown_guest {}", vm.id));
        let ignore = inventory.ignore_guest_shutdown;
        let machine = inventory.vm_mut(vm)?;
        if !ignore {
            machine.power = PowerState::PoweredOff;
        }
        Ok(())
    }

    async fn destroy(&self, vm: &ObjectRef) -> MachineResult<()> {
        let mut inventory = self.record(format!("destroy {}", vm.id));
        inventory
            .vms
            .remove(&vm.id)
            .map(|_| ())
            .ok_or_else(|| MachineError::NotFound(format!("virtual machine {}", vm.name)))
    }

    async fn wait_for_ips(&self, vm: &ObjectRef) -> MachineResult<Vec<Vec<String>>> {
        let mut inventory = self.lock();
        if inventory.vm_mut(vm)?.power != PowerState::PoweredOn {
            return Err(MachineError::HostNotRunning(vm.name.clone()));
        }
        Ok(inventory.addresses.clone())
    }

    async fn upload_guest_file(
        &self,
        vm: &ObjectRef,
        _auth: &GuestAuth,
        local: &Path,
        guest_path: &str,
        mode: u32,
    ) -> MachineResult<()> {
        if !tokio::fs::try_exists(local).await? {
            return Err(MachineError::NotFound(local.display().to_string()));
        }

        let mut inventory = self.record(format!("upload_guest_file {guest_path}"));
        inventory.vm_mut(vm)?;
        inventory.guest_files.push((guest_path.to_string(), mode));
        Ok(())
    }

    async fn start_guest_program(
        &self,
        vm: &ObjectRef,
        _auth: &GuestAuth,
        program: &str,
        arguments: &str,
    ) -> MachineResult<()> {
        let mut inventory = self.record(format!("start_guest_program {}", vm.id));
        inventory.vm_mut(vm)?;
        inventory
            .guest_programs
            .push(format!("{program} {arguments}"));
        Ok(())
    }

    async fn logout(&self) -> MachineResult<()> {
        self.lock().open_sessions -= 1;
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn lookup(names: &[String], kind: &str, name: &str) -> MachineResult<ObjectRef> {
    let found = if name.is_empty() {
        names.first()
    } else {
        names.iter().find(|candidate| *candidate == name)
    };

    found
        .map(|found| ObjectRef::new(format!("{kind}:{found}"), found.clone()))
        .ok_or_else(|| MachineError::NotFound(format!("{kind} '{name}'")))
}
