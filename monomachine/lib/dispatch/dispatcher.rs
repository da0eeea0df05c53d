use std::{sync::Arc, time::Duration};

use futures::future::join_all;
use machutils::{wait_for, PollPolicy, Sleeper, TokioSleeper};
use typed_builder::TypedBuilder;

use crate::{
    config::{
        HostOptions, DEFAULT_ACTION_TIMEOUT, DEFAULT_RUNNING_POLL, DEFAULT_SSH_POLL,
    },
    drivers::{wait_for_state, Driver, DriverFactory, DriverOptions},
    host::{Host, HostState, HostStore},
    provision::{registry, ProvisionTarget, Provisioner, ProvisionerRegistry},
    tls::{regenerate_certificates, CertRequest},
    MachineError, MachineResult,
};

use super::{BatchReport, HostOutcome, LifecycleAction};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Runs lifecycle actions against stored hosts.
///
/// Hosts in one batch run concurrently and independently, each bounded by `action_timeout`. A
/// failing host never stops the others. Two actions against the same host must not run at the
/// same time; that is up to the caller.
#[derive(TypedBuilder)]
pub struct Dispatcher {
    /// Where host records live.
    store: Arc<dyn HostStore>,

    /// Builds the driver of each host.
    drivers: Arc<dyn DriverFactory>,

    /// Picks provisioners for detected hosts.
    #[builder(default = registry())]
    provisioners: Arc<ProvisionerRegistry>,

    /// Sleeps between polls.
    #[builder(default = Arc::new(TokioSleeper) as Arc<dyn Sleeper>)]
    sleeper: Arc<dyn Sleeper>,

    /// The deadline for one action on one host.
    #[builder(default = DEFAULT_ACTION_TIMEOUT)]
    action_timeout: Duration,

    /// How long to wait for a machine to reach a requested state.
    #[builder(default = DEFAULT_RUNNING_POLL)]
    state_poll: PollPolicy,

    /// How long to wait for a new machine to accept commands.
    #[builder(default = DEFAULT_SSH_POLL)]
    ssh_poll: PollPolicy,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Dispatcher {
    /// Runs `action` on every named host and reports each outcome.
    pub async fn run(&self, action: LifecycleAction, names: &[String]) -> BatchReport {
        tracing::info!("{action}: {}", names.join(", "));

        let futures = names.iter().map(|name| async move {
            let deadline = tokio::time::timeout(self.action_timeout, self.run_one(action, name));
            let result = match deadline.await {
                Ok(result) => result,
                Err(_) => Err(MachineError::Timeout(format!(
                    "{action} on {name} did not finish within {:?}",
                    self.action_timeout
                ))),
            };

            match &result {
                Ok(()) => tracing::info!("{action} succeeded on {name}"),
                Err(e) => tracing::error!("{action} failed on {name}: {e}"),
            }

            HostOutcome {
                name: name.clone(),
                result,
            }
        });

        BatchReport::new(action, join_all(futures).await)
    }

    /// Stores a new host record for a machine that does not exist yet.
    ///
    /// The driver is configured from `flags`, which are already resolved. The machine itself is
    /// made by running [`LifecycleAction::Create`] on the host.
    pub async fn prepare_host(
        &self,
        name: &str,
        driver_name: &str,
        flags: &DriverOptions,
        options: HostOptions,
    ) -> MachineResult<Host> {
        if self.store.exists(name).await? {
            return Err(MachineError::HostAlreadyExists(name.to_string()));
        }

        let mut driver = self.drivers.new_driver(driver_name, name)?;
        driver.set_config_from_flags(flags)?;

        let host = Host::new(name, driver_name, driver.config()?, options);
        self.store.save(&host).await?;
        Ok(host)
    }

    /// The driver of a stored host.
    pub async fn driver(&self, name: &str) -> MachineResult<(Host, Box<dyn Driver>)> {
        let host = self.store.load(name).await?;
        let driver = self.drivers.load_driver(&host)?;
        Ok((host, driver))
    }

    /// The host store.
    pub fn store(&self) -> &Arc<dyn HostStore> {
        &self.store
    }

    async fn run_one(&self, action: LifecycleAction, name: &str) -> MachineResult<()> {
        let (mut host, mut driver) = self.driver(name).await?;
        let result = self.apply(action, &mut host, driver.as_mut()).await;

        if action == LifecycleAction::Remove && result.is_ok() {
            return self.store.remove(name).await;
        }

        let saved = async {
            self.refresh(&mut host, driver.as_ref()).await?;
            self.store.save(&host).await
        }
        .await;

        match (result, saved) {
            (Err(e), Err(save_error)) => {
                tracing::warn!("could not save {name} after {action} failed: {save_error}");
                Err(e)
            }
            (result, saved) => saved.and(result),
        }
    }

    async fn apply(
        &self,
        action: LifecycleAction,
        host: &mut Host,
        driver: &mut dyn Driver,
    ) -> MachineResult<()> {
        match action {
            LifecycleAction::Create => self.create(host, driver).await,
            LifecycleAction::Start => {
                driver.start().await?;
                self.wait_for(driver, HostState::Running).await
            }
            LifecycleAction::Stop => {
                driver.stop().await?;
                self.wait_for(driver, HostState::Stopped).await
            }
            LifecycleAction::Restart => {
                driver.restart().await?;
                self.wait_for(driver, HostState::Running).await
            }
            LifecycleAction::Kill => {
                driver.kill().await?;
                self.wait_for(driver, HostState::Stopped).await
            }
            LifecycleAction::Remove => driver.remove().await,
            LifecycleAction::Upgrade => self.upgrade(host, driver).await,
            LifecycleAction::Provision => self.provision(host, driver).await,
            LifecycleAction::RegenerateCerts { ca } => {
                self.regenerate_certs(host, driver, ca).await
            }
        }
    }

    /// Creates the machine, waits until it runs and accepts commands, then provisions it.
    ///
    /// Nothing is rolled back on failure; the host record stays so the machine can be removed.
    async fn create(&self, host: &mut Host, driver: &mut dyn Driver) -> MachineResult<()> {
        tracing::info!("creating {} with {}", host.get_name(), driver.driver_name());
        driver.pre_create_check().await?;
        driver.create().await?;
        host.set_driver_config(driver.config()?);
        self.store.save(host).await?;

        self.wait_for(driver, HostState::Running).await?;
        self.wait_for_commands(driver).await?;
        self.provision(host, driver).await
    }

    async fn provision(&self, host: &mut Host, driver: &dyn Driver) -> MachineResult<()> {
        let (target, provisioner) = self.detect(host, driver).await?;
        let applied = provisioner.provision(&target, host.get_options()).await?;
        host.set_options(applied);
        Ok(())
    }

    /// Upgrades through the driver, or the engine package when the driver declines.
    async fn upgrade(&self, host: &Host, driver: &mut dyn Driver) -> MachineResult<()> {
        match driver.upgrade().await {
            Err(e) if e.is_unsupported() => {
                tracing::info!("{e}, upgrading the engine package instead");
                let (target, provisioner) = self.detect(host, driver).await?;
                provisioner.upgrade_engine(&target).await
            }
            other => other,
        }
    }

    async fn regenerate_certs(
        &self,
        host: &mut Host,
        driver: &dyn Driver,
        regenerate_ca: bool,
    ) -> MachineResult<()> {
        let (target, provisioner) = self.detect(host, driver).await?;
        let auth = host
            .get_options()
            .get_auth()
            .with_remote_dir(provisioner.options_dir())?;
        let request = CertRequest::for_target(&target, &auth);

        regenerate_certificates(&target, &auth, &request, regenerate_ca).await?;
        provisioner.restart_engine(&target).await?;

        let options = HostOptions::builder()
            .engine(host.get_options().get_engine().clone())
            .swarm(host.get_options().get_swarm().clone())
            .auth(auth)
            .build();
        host.set_options(options);
        Ok(())
    }

    async fn detect(
        &self,
        host: &Host,
        driver: &dyn Driver,
    ) -> MachineResult<(ProvisionTarget, Box<dyn Provisioner>)> {
        let target = self.target(host, driver).await?;
        let provisioner = self.provisioners.detect(&target).await?;
        Ok((target, provisioner))
    }

    async fn target(&self, host: &Host, driver: &dyn Driver) -> MachineResult<ProvisionTarget> {
        let ip = driver.get_ip().await?;
        let commander = driver.commander().await?;
        Ok(ProvisionTarget::new(host.get_name(), ip, commander).with_sleeper(self.sleeper.clone()))
    }

    async fn wait_for(&self, driver: &dyn Driver, state: HostState) -> MachineResult<()> {
        wait_for_state(driver, state, &self.state_poll, self.sleeper.as_ref()).await
    }

    async fn wait_for_commands(&self, driver: &dyn Driver) -> MachineResult<()> {
        let commander = driver.commander().await?;
        let what = format!("{} to accept commands", driver.machine_name());
        wait_for(&what, &self.ssh_poll, self.sleeper.as_ref(), || {
            let commander = commander.clone();
            async move {
                match commander.run("exit 0").await {
                    Ok(_) => Ok(true),
                    Err(
                        MachineError::BackendUnavailable(_) | MachineError::CommandFailed { .. },
                    ) => Ok(false),
                    Err(e) => Err(e),
                }
            }
        })
        .await
    }

    async fn refresh(&self, host: &mut Host, driver: &dyn Driver) -> MachineResult<()> {
        match driver.get_state().await {
            Ok(state) => host.set_state(state),
            Err(e) => tracing::warn!("could not refresh the state of {}: {e}", host.get_name()),
        }
        host.set_driver_config(driver.config()?);
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::{
        path::Path,
        sync::atomic::{AtomicBool, Ordering},
    };

    use async_trait::async_trait;
    use machutils::InstantSleeper;

    use super::*;
    use crate::{
        config::AuthOptions,
        drivers::{FakeCall, FakeDriverFactory},
        host::MemoryHostStore,
        provision::{INIT_SYSTEM_COMMAND, OS_RELEASE_COMMAND},
        remote::FakeCommander,
    };

    const UBUNTU_RELEASE: &str =
        "NAME=\"Ubuntu\"\nID=ubuntu\nID_LIKE=debian\nVERSION_ID=\"22.04\"\n";

    fn ubuntu() -> FakeCommander {
        FakeCommander::new().with_output("cat /etc/os-release", UBUNTU_RELEASE)
    }

    fn dispatcher(drivers: Arc<FakeDriverFactory>) -> Dispatcher {
        let poll = PollPolicy::new(Duration::from_millis(1), 5);
        Dispatcher::builder()
            .store(Arc::new(MemoryHostStore::new()))
            .drivers(drivers)
            .provisioners(Arc::new(ProvisionerRegistry::with_defaults()))
            .sleeper(Arc::new(InstantSleeper::new()))
            .state_poll(poll)
            .ssh_poll(poll)
            .build()
    }

    async fn prepare(dispatcher: &Dispatcher, dir: &Path, names: &[&str]) -> anyhow::Result<()> {
        for name in names {
            let options = HostOptions::builder()
                .auth(AuthOptions::for_cert_dir(dir.join(name)))
                .build();
            dispatcher
                .prepare_host(name, "fake", &DriverOptions::new(), options)
                .await?;
        }
        Ok(())
    }

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    /// A store that starts refusing writes once `lock` is called.
    #[derive(Default)]
    struct LockableStore {
        inner: MemoryHostStore,
        locked: AtomicBool,
    }

    impl LockableStore {
        fn lock(&self) {
            self.locked.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl HostStore for LockableStore {
        async fn exists(&self, name: &str) -> MachineResult<bool> {
            self.inner.exists(name).await
        }

        async fn load(&self, name: &str) -> MachineResult<Host> {
            self.inner.load(name).await
        }

        async fn save(&self, host: &Host) -> MachineResult<()> {
            if self.locked.load(Ordering::SeqCst) {
                return Err(MachineError::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "store is read-only",
                )));
            }
            self.inner.save(host).await
        }

        async fn remove(&self, name: &str) -> MachineResult<()> {
            self.inner.remove(name).await
        }

        async fn list(&self) -> MachineResult<Vec<String>> {
            self.inner.list().await
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_failing_host_does_not_stop_the_batch() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let drivers = Arc::new(FakeDriverFactory::new());
        drivers.add_host("a", ubuntu());
        drivers
            .add_host("b", ubuntu())
            .fail(FakeCall::CreateVm, "quota exceeded");

        let dispatcher = dispatcher(drivers.clone());
        prepare(&dispatcher, dir.path(), &["a", "b"]).await?;

        let report = dispatcher
            .run(LifecycleAction::Create, &names(&["a", "b"]))
            .await;

        assert_eq!(report.succeeded(), vec!["a"]);
        let failed = report.failed();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, "b");
        assert!(matches!(failed[0].1, MachineError::BackendUnavailable(_)));

        let a = dispatcher.store().load("a").await?;
        assert_eq!(*a.get_state(), HostState::Running);
        assert_eq!(
            a.get_options().get_auth().get_remote_ca_cert_path(),
            "/etc/docker/ca.pem"
        );

        let (_, commander) = drivers.get("a").ok_or_else(|| anyhow::anyhow!("no host a"))?;
        assert!(commander.ran("sudo systemctl restart docker"));

        // The failed host keeps its record so it can be removed later.
        assert!(dispatcher.store().exists("b").await?);

        let error = report.into_result().err().ok_or_else(|| anyhow::anyhow!("expected failure"))?;
        assert_eq!(error.action, LifecycleAction::Create);
        assert_eq!(error.failures.len(), 1);
        assert!(error.to_string().contains("b: "));
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_failed_save_keeps_the_action_error() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let drivers = Arc::new(FakeDriverFactory::new());
        drivers.add_host("a", ubuntu());
        drivers
            .add_host("b", ubuntu())
            .fail(FakeCall::CreateVm, "quota exceeded");

        let store = Arc::new(LockableStore::default());
        let poll = PollPolicy::new(Duration::from_millis(1), 5);
        let dispatcher = Dispatcher::builder()
            .store(store.clone())
            .drivers(drivers)
            .provisioners(Arc::new(ProvisionerRegistry::with_defaults()))
            .sleeper(Arc::new(InstantSleeper::new()))
            .state_poll(poll)
            .ssh_poll(poll)
            .build();
        prepare(&dispatcher, dir.path(), &["a", "b"]).await?;
        store.lock();

        let report = dispatcher
            .run(LifecycleAction::Create, &names(&["a", "b"]))
            .await;

        let failed = report.failed();
        assert_eq!(failed.len(), 2);
        // The action itself went through on `a`; only the record could not be written.
        assert_eq!(failed[0].0, "a");
        assert!(matches!(failed[0].1, MachineError::Io(_)));
        assert_eq!(failed[1].0, "b");
        assert!(
            matches!(
                failed[1].1,
                MachineError::BackendUnavailable(ref msg) if msg == "quota exceeded"
            ),
            "{:?}",
            failed[1].1
        );
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_provision_on_unknown_os_sends_only_read_only_commands() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let drivers = Arc::new(FakeDriverFactory::new());
        let backend = drivers.add_host(
            "a",
            FakeCommander::new()
                .with_output(OS_RELEASE_COMMAND, "NAME=\"Plan 9\"\nID=plan9\n")
                .with_output(INIT_SYSTEM_COMMAND, "init\n"),
        );
        backend.set_state(HostState::Running);

        let dispatcher = dispatcher(drivers.clone());
        prepare(&dispatcher, dir.path(), &["a"]).await?;

        let report = dispatcher
            .run(LifecycleAction::Provision, &names(&["a"]))
            .await;

        let failed = report.failed();
        assert_eq!(failed.len(), 1);
        assert!(
            matches!(failed[0].1, MachineError::UnknownOperatingSystem(_)),
            "{:?}",
            failed[0].1
        );

        let (_, commander) = drivers.get("a").ok_or_else(|| anyhow::anyhow!("no host a"))?;
        assert_eq!(commander.commands(), vec![OS_RELEASE_COMMAND, INIT_SYSTEM_COMMAND]);
        assert!(!tokio::fs::try_exists(dir.path().join("a/ca.pem")).await?);
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_remove_deletes_record_even_when_machine_is_gone() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let drivers = Arc::new(FakeDriverFactory::new());
        let a = drivers.add_host("a", ubuntu());
        let b = drivers.add_host("b", ubuntu());

        let dispatcher = dispatcher(drivers);
        prepare(&dispatcher, dir.path(), &["a", "b"]).await?;
        dispatcher
            .run(LifecycleAction::Create, &names(&["a", "b"]))
            .await
            .into_result()?;

        b.delete_out_of_band();
        dispatcher
            .run(LifecycleAction::Remove, &names(&["a", "b"]))
            .await
            .into_result()?;

        assert!(a.calls().contains(&FakeCall::Destroy));
        assert!(!b.calls().contains(&FakeCall::Destroy));
        assert!(dispatcher.store().list().await?.is_empty());
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_start_on_running_host_does_not_power_on() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let drivers = Arc::new(FakeDriverFactory::new());
        let backend = drivers.add_host("a", ubuntu());

        let dispatcher = dispatcher(drivers);
        prepare(&dispatcher, dir.path(), &["a"]).await?;
        dispatcher
            .run(LifecycleAction::Create, &names(&["a"]))
            .await
            .into_result()?;

        dispatcher
            .run(LifecycleAction::Start, &names(&["a"]))
            .await
            .into_result()?;
        assert!(!backend.calls().contains(&FakeCall::PowerOn));

        dispatcher
            .run(LifecycleAction::Stop, &names(&["a"]))
            .await
            .into_result()?;
        assert_eq!(dispatcher.state("a").await?, HostState::Stopped);
        assert_eq!(
            *dispatcher.store().load("a").await?.get_state(),
            HostState::Stopped
        );
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_upgrade_falls_back_to_engine_package() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let drivers = Arc::new(FakeDriverFactory::new());
        drivers.add_host("a", ubuntu());

        let dispatcher = dispatcher(drivers.clone());
        prepare(&dispatcher, dir.path(), &["a"]).await?;
        dispatcher
            .run(LifecycleAction::Create, &names(&["a"]))
            .await
            .into_result()?;

        let (backend, commander) = drivers.get("a").ok_or_else(|| anyhow::anyhow!("no host a"))?;
        commander.clear();
        dispatcher
            .run(LifecycleAction::Upgrade, &names(&["a"]))
            .await
            .into_result()?;

        assert!(backend.calls().contains(&FakeCall::Upgrade));
        assert!(commander.ran("--force-confnew docker-ce"));
        assert!(commander.ran("sudo systemctl restart docker"));
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_unknown_host_and_slow_host_fail_independently() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let drivers = Arc::new(FakeDriverFactory::new());
        let backend = drivers.add_host("slow", ubuntu());

        let dispatcher = Dispatcher::builder()
            .store(Arc::new(MemoryHostStore::new()))
            .drivers(drivers)
            .action_timeout(Duration::from_millis(50))
            .state_poll(PollPolicy::new(Duration::from_millis(10), 1_000))
            .build();
        prepare(&dispatcher, dir.path(), &["slow"]).await?;
        backend.set_state(HostState::Running);
        backend.set_stop_converges(false);

        let report = dispatcher
            .run(LifecycleAction::Stop, &names(&["slow", "ghost"]))
            .await;

        let failed = report.failed();
        assert_eq!(failed.len(), 2);
        assert!(matches!(failed[0].1, MachineError::Timeout(_)));
        assert!(matches!(failed[1].1, MachineError::HostNotFound(_)));
        Ok(())
    }
}
