use std::{
    collections::{HashMap, VecDeque},
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use machutils::{InstantSleeper, Sleeper};
use serde_json::json;

use crate::{
    config::DEFAULT_RESTART_POLL,
    host::{Host, HostState},
    remote::{Commander, FakeCommander},
    MachineError, MachineResult,
};

use super::{
    restart_with_fallback, select_preferred_ip, CreateFlag, Driver, DriverFactory, DriverOptions,
    RestartPolicy,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The name of the fake driver.
pub const FAKE_DRIVER_NAME: &str = "fake";

const FAKE_ADDRESS_FLAG: &str = "fake-address";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A backend API call made by [`FakeDriver`]. State queries are counted separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeCall {
    /// Resource validation before creation.
    PreCreateCheck,

    /// Machine creation.
    CreateVm,

    /// Power on.
    PowerOn,

    /// Guest shutdown.
    Shutdown,

    /// Power off.
    PowerOff,

    /// Machine deletion.
    Destroy,

    /// Boot image upgrade.
    Upgrade,
}

/// The scripted state of a fake virtualization backend.
///
/// Clones share the same state, so several driver instances built for the same host observe and
/// record into one backend.
#[derive(Debug, Clone, Default)]
pub struct FakeBackend {
    inner: Arc<Mutex<FakeBackendState>>,
}

#[derive(Debug)]
struct FakeBackendState {
    state: HostState,
    scripted_states: VecDeque<HostState>,
    addresses: Vec<String>,
    exists: bool,
    stop_converges: bool,
    upgrade_supported: bool,
    failures: HashMap<FakeCall, String>,
    calls: Vec<FakeCall>,
    state_queries: usize,
}

/// Builds [`FakeDriver`]s whose backends and command channels persist across instances.
///
/// Hosts are registered up front; each gets its own backend and [`FakeCommander`].
#[derive(Debug, Default)]
pub struct FakeDriverFactory {
    hosts: Mutex<HashMap<String, (FakeBackend, Arc<FakeCommander>)>>,
}

/// A driver backed by [`FakeBackend`], for exercising lifecycle and provisioning logic without a
/// real hypervisor.
pub struct FakeDriver {
    machine_name: String,
    backend: FakeBackend,
    commander: Arc<FakeCommander>,
    restart_policy: RestartPolicy,
    sleeper: Arc<dyn Sleeper>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl FakeBackend {
    /// Sets the state reported once the scripted states are used up.
    pub fn set_state(&self, state: HostState) {
        self.lock().state = state;
    }

    /// Queues states returned by the next state queries, in order.
    pub fn script_states(&self, states: impl IntoIterator<Item = HostState>) {
        self.lock().scripted_states.extend(states);
    }

    /// Sets the addresses the machine reports, in NIC order.
    pub fn set_addresses<S: Into<String>>(&self, addresses: impl IntoIterator<Item = S>) {
        self.lock().addresses = addresses.into_iter().map(Into::into).collect();
    }

    /// Whether a guest shutdown actually stops the machine.
    pub fn set_stop_converges(&self, converges: bool) {
        self.lock().stop_converges = converges;
    }

    /// Whether the backend supports boot image upgrades.
    pub fn set_upgrade_supported(&self, supported: bool) {
        self.lock().upgrade_supported = supported;
    }

    /// Makes `call` fail as if the backend were unreachable.
    pub fn fail(&self, call: FakeCall, message: impl Into<String>) {
        self.lock().failures.insert(call, message.into());
    }

    /// Deletes the machine behind the driver's back.
    pub fn delete_out_of_band(&self) {
        let mut inner = self.lock();
        inner.exists = false;
        inner.state = HostState::None;
    }

    /// Whether the machine exists.
    pub fn exists(&self) -> bool {
        self.lock().exists
    }

    /// The backend calls made so far.
    pub fn calls(&self) -> Vec<FakeCall> {
        self.lock().calls.clone()
    }

    /// How many times the state was queried.
    pub fn state_queries(&self) -> usize {
        self.lock().state_queries
    }

    fn call(&self, call: FakeCall) -> MachineResult<MutexGuard<'_, FakeBackendState>> {
        let mut inner = self.lock();
        inner.calls.push(call);
        match inner.failures.get(&call) {
            Some(message) => Err(MachineError::BackendUnavailable(message.clone())),
            None => Ok(inner),
        }
    }

    fn query_state(&self) -> HostState {
        let mut inner = self.lock();
        inner.state_queries += 1;
        match inner.scripted_states.pop_front() {
            Some(state) => state,
            None => inner.state,
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeBackendState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FakeDriver {
    /// A driver for a machine that does not exist yet.
    pub fn new(machine_name: impl Into<String>) -> Self {
        Self {
            machine_name: machine_name.into(),
            backend: FakeBackend::default(),
            commander: Arc::new(FakeCommander::new()),
            restart_policy: DEFAULT_RESTART_POLL,
            sleeper: Arc::new(InstantSleeper::new()),
        }
    }

    /// A driver for an existing, running machine with one address.
    pub fn running(machine_name: impl Into<String>) -> Self {
        let driver = Self::new(machine_name);
        {
            let mut inner = driver.backend.lock();
            inner.exists = true;
            inner.state = HostState::Running;
            inner.addresses = vec!["192.168.99.100".to_string()];
        }
        driver
    }

    /// Uses a shared backend.
    pub fn with_backend(mut self, backend: FakeBackend) -> Self {
        self.backend = backend;
        self
    }

    /// Uses `commander` as the machine's command channel.
    pub fn with_commander(mut self, commander: Arc<FakeCommander>) -> Self {
        self.commander = commander;
        self
    }

    /// Uses a different restart policy.
    pub fn with_restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart_policy = policy;
        self
    }

    /// The backend.
    pub fn backend(&self) -> &FakeBackend {
        &self.backend
    }

    /// Shorthand for `backend().calls()`.
    pub fn backend_calls(&self) -> Vec<FakeCall> {
        self.backend.calls()
    }
}

impl FakeDriverFactory {
    /// Creates a factory with no hosts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a host whose machine does not exist yet.
    pub fn add_host(&self, name: &str, commander: FakeCommander) -> FakeBackend {
        let backend = FakeBackend::default();
        backend.set_addresses(["192.168.99.100"]);
        self.hosts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), (backend.clone(), Arc::new(commander)));
        backend
    }

    /// The backend and command channel of a registered host.
    pub fn get(&self, name: &str) -> Option<(FakeBackend, Arc<FakeCommander>)> {
        self.hosts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn driver(&self, machine_name: &str) -> MachineResult<Box<dyn Driver>> {
        let (backend, commander) = self
            .get(machine_name)
            .ok_or_else(|| MachineError::NotFound(format!("fake host {machine_name}")))?;

        Ok(Box::new(
            FakeDriver::new(machine_name)
                .with_backend(backend)
                .with_commander(commander),
        ))
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl DriverFactory for FakeDriverFactory {
    fn driver_names(&self) -> Vec<String> {
        vec![FAKE_DRIVER_NAME.to_string()]
    }

    fn new_driver(&self, driver_name: &str, machine_name: &str) -> MachineResult<Box<dyn Driver>> {
        if driver_name != FAKE_DRIVER_NAME {
            return Err(MachineError::InvalidConfig(format!("unknown driver: {driver_name}")));
        }
        self.driver(machine_name)
    }

    fn load_driver(&self, host: &Host) -> MachineResult<Box<dyn Driver>> {
        self.new_driver(host.get_driver_name(), host.get_name())
    }
}

impl Default for FakeBackendState {
    fn default() -> Self {
        Self {
            state: HostState::None,
            scripted_states: VecDeque::new(),
            addresses: Vec::new(),
            exists: false,
            stop_converges: true,
            upgrade_supported: false,
            failures: HashMap::new(),
            calls: Vec::new(),
            state_queries: 0,
        }
    }
}

#[async_trait]
impl Driver for FakeDriver {
    fn driver_name(&self) -> &str {
        FAKE_DRIVER_NAME
    }

    fn machine_name(&self) -> &str {
        &self.machine_name
    }

    fn create_flags(&self) -> Vec<CreateFlag> {
        vec![CreateFlag::string_slice(
            FAKE_ADDRESS_FLAG,
            "FAKE_ADDRESS",
            "Addresses the fake machine reports",
        )]
    }

    fn set_config_from_flags(&mut self, options: &DriverOptions) -> MachineResult<()> {
        let addresses = options.get_string_slice(FAKE_ADDRESS_FLAG)?;
        if !addresses.is_empty() {
            self.backend.set_addresses(addresses);
        }
        Ok(())
    }

    fn config(&self) -> MachineResult<serde_json::Value> {
        Ok(json!({ "machine_name": self.machine_name }))
    }

    fn ssh_username(&self) -> String {
        "docker".to_string()
    }

    fn ssh_key_path(&self) -> Option<PathBuf> {
        None
    }

    async fn commander(&self) -> MachineResult<Arc<dyn Commander>> {
        Ok(self.commander.clone())
    }

    async fn pre_create_check(&mut self) -> MachineResult<()> {
        drop(self.backend.call(FakeCall::PreCreateCheck)?);
        Ok(())
    }

    async fn create(&mut self) -> MachineResult<()> {
        let mut inner = self.backend.call(FakeCall::CreateVm)?;
        inner.exists = true;
        inner.state = HostState::Running;
        Ok(())
    }

    async fn start(&mut self) -> MachineResult<()> {
        if self.get_state().await? == HostState::Running {
            tracing::debug!("{} is already running", self.machine_name);
            return Ok(());
        }

        self.backend.call(FakeCall::PowerOn)?.state = HostState::Running;
        Ok(())
    }

    async fn stop(&mut self) -> MachineResult<()> {
        let mut inner = self.backend.call(FakeCall::Shutdown)?;
        if inner.stop_converges {
            inner.state = HostState::Stopped;
        }
        Ok(())
    }

    async fn restart(&mut self) -> MachineResult<()> {
        let policy = self.restart_policy;
        let sleeper = self.sleeper.clone();
        restart_with_fallback(self, &policy, sleeper.as_ref()).await
    }

    async fn kill(&mut self) -> MachineResult<()> {
        self.backend.call(FakeCall::PowerOff)?.state = HostState::Stopped;
        Ok(())
    }

    async fn remove(&mut self) -> MachineResult<()> {
        if !self.backend.exists() {
            tracing::warn!("{} is already gone from the backend", self.machine_name);
            return Ok(());
        }

        if self.get_state().await? == HostState::Running {
            self.kill().await?;
        }

        let mut inner = self.backend.call(FakeCall::Destroy)?;
        inner.exists = false;
        inner.state = HostState::None;
        Ok(())
    }

    async fn upgrade(&mut self) -> MachineResult<()> {
        let inner = self.backend.call(FakeCall::Upgrade)?;
        if !inner.upgrade_supported {
            return Err(MachineError::unsupported(FAKE_DRIVER_NAME, "upgrade"));
        }
        Ok(())
    }

    async fn get_state(&self) -> MachineResult<HostState> {
        Ok(self.backend.query_state())
    }

    async fn get_ip(&self) -> MachineResult<String> {
        let state = self.get_state().await?;
        if state != HostState::Running {
            return Err(MachineError::HostNotRunning(format!(
                "{} is {state}",
                self.machine_name
            )));
        }

        let addresses = self.backend.lock().addresses.clone();
        Ok(select_preferred_ip(&addresses).unwrap_or_default())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test(tokio::test)]
    async fn test_pre_create_check_records_and_releases_backend() -> anyhow::Result<()> {
        let mut driver = FakeDriver::new("dev");
        driver.pre_create_check().await?;
        driver.create().await?;
        assert_eq!(
            driver.backend_calls(),
            vec![FakeCall::PreCreateCheck, FakeCall::CreateVm]
        );

        driver.backend().fail(FakeCall::PreCreateCheck, "datastore missing");
        assert!(matches!(
            driver.pre_create_check().await,
            Err(MachineError::BackendUnavailable(_))
        ));
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_start_on_running_machine_is_a_noop() -> anyhow::Result<()> {
        let mut driver = FakeDriver::running("dev");
        driver.start().await?;
        assert!(driver.backend_calls().is_empty());
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_start_powers_on_stopped_machine() -> anyhow::Result<()> {
        let mut driver = FakeDriver::running("dev");
        driver.backend().set_state(HostState::Stopped);
        driver.start().await?;
        assert_eq!(driver.backend_calls(), vec![FakeCall::PowerOn]);
        assert_eq!(driver.get_state().await?, HostState::Running);
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_get_ip_requires_running() -> anyhow::Result<()> {
        let driver = FakeDriver::running("dev");
        for state in HostState::ALL {
            driver.backend().set_state(state);
            let result = driver.get_ip().await;
            if state == HostState::Running {
                assert_eq!(result?, "192.168.99.100");
            } else {
                assert!(matches!(result, Err(MachineError::HostNotRunning(_))));
            }
        }
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_get_ip_prefers_global_ipv4() -> anyhow::Result<()> {
        let driver = FakeDriver::running("dev");
        driver
            .backend()
            .set_addresses(["fe80::20c:29ff", "172.17.0.1", "10.20.30.40"]);
        assert_eq!(driver.get_ip().await?, "10.20.30.40");
        assert_eq!(driver.get_url().await?, "tcp://10.20.30.40:2376");

        driver.backend().set_addresses(Vec::<String>::new());
        assert_eq!(driver.get_url().await?, "");
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_remove_tolerates_missing_machine() -> anyhow::Result<()> {
        let mut driver = FakeDriver::running("dev");
        driver.backend().delete_out_of_band();
        driver.remove().await?;
        assert!(driver.backend_calls().is_empty());
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_remove_kills_running_machine_first() -> anyhow::Result<()> {
        let mut driver = FakeDriver::running("dev");
        driver.remove().await?;
        assert_eq!(
            driver.backend_calls(),
            vec![FakeCall::PowerOff, FakeCall::Destroy]
        );
        assert!(!driver.backend().exists());
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_upgrade_unsupported_by_default() {
        let mut driver = FakeDriver::running("dev");
        let result = driver.upgrade().await;
        assert!(matches!(result, Err(e) if e.is_unsupported()));
    }
}
