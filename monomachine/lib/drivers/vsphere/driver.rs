use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use machutils::{Sleeper, TokioSleeper};

use crate::{
    config::DEFAULT_RESTART_POLL,
    drivers::{
        restart_with_fallback, select_preferred_ip, CreateFlag, Driver, DriverOptions,
        RestartPolicy,
    },
    host::HostState,
    remote::{generate_ssh_key, public_key_path},
    MachineError, MachineResult,
};

use super::{
    copy_iso_to_machine_dir, write_key_bundle, GuestAuth, ObjectRef, PowerState, VirtualDevice,
    VmSpec, VsphereConfig, VsphereConnector, VsphereSession, B2D_PASS, B2D_USER,
    VSPHERE_DRIVER_NAME,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const GUEST_ID: &str = "otherLinux64Guest";
const SCSI_CONTROLLER: &str = "pvscsi";
const ETHERNET_CARD: &str = "vmxnet3";
const GUEST_USERDATA_PATH: &str = "/home/docker/userdata.tar";
const CLOUD_INIT_URL_KEY: &str = "guestinfo.cloud-init.config.url";
const CLOUD_INIT_DATA_KEY: &str = "guestinfo.cloud-init.config.data";
const CLOUD_INIT_ENCODING_KEY: &str = "guestinfo.cloud-init.data.encoding";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Runs boot2docker machines on vSphere.
pub struct VsphereDriver {
    config: VsphereConfig,
    connector: Arc<dyn VsphereConnector>,
    cache_dir: PathBuf,
    restart_policy: RestartPolicy,
    sleeper: Arc<dyn Sleeper>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl VsphereDriver {
    /// Creates a driver.
    ///
    /// `cache_dir` holds the downloaded boot2docker ISO shared by all machines.
    pub fn new(
        config: VsphereConfig,
        connector: Arc<dyn VsphereConnector>,
        cache_dir: impl AsRef<Path>,
    ) -> Self {
        Self {
            config,
            connector,
            cache_dir: cache_dir.as_ref().to_path_buf(),
            restart_policy: DEFAULT_RESTART_POLL,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Uses a different restart policy and sleeper.
    pub fn with_restart_policy(mut self, policy: RestartPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        self.restart_policy = policy;
        self.sleeper = sleeper;
        self
    }

    /// The driver configuration.
    pub fn get_config(&self) -> &VsphereConfig {
        &self.config
    }

    async fn login(&self) -> MachineResult<Box<dyn VsphereSession>> {
        self.connector.login(&self.config.endpoint()).await
    }

    async fn fetch_vm(&self, session: &dyn VsphereSession) -> MachineResult<ObjectRef> {
        let datacenter = session.datacenter(&self.config.datacenter).await?;
        session.find_vm(&datacenter, &self.config.vm_path()).await
    }

    async fn check_resources(&self, session: &dyn VsphereSession) -> MachineResult<()> {
        let datacenter = session.datacenter(&self.config.datacenter).await?;

        if !self.config.folder.is_empty() {
            session
                .folder(&datacenter, &self.config.folder)
                .await
                .map_err(|e| match e {
                    MachineError::NotFound(_) => MachineError::NotFound(format!(
                        "failed to find VM folder '{}'",
                        self.config.folder
                    )),
                    other => other,
                })?;
        }

        session.datastore(&datacenter, &self.config.datastore).await?;

        for network in self.config.effective_networks() {
            session.network(&datacenter, &network).await?;
        }

        self.resource_pool(session, &datacenter).await?;
        Ok(())
    }

    async fn resource_pool(
        &self,
        session: &dyn VsphereSession,
        datacenter: &ObjectRef,
    ) -> MachineResult<(ObjectRef, Option<ObjectRef>)> {
        let host = if self.config.host_system.is_empty() {
            None
        } else {
            Some(session.host_system(datacenter, &self.config.host_system).await?)
        };

        let pool = match (&self.config.pool, &host) {
            (pool, _) if !pool.is_empty() => session.resource_pool(datacenter, pool).await?,
            (_, Some(host)) => session.host_resource_pool(host).await?,
            _ => session.default_resource_pool(datacenter).await?,
        };

        Ok((pool, host))
    }

    async fn create_in(&self, session: &dyn VsphereSession) -> MachineResult<()> {
        let config = &self.config;
        let datacenter = session.datacenter(&config.datacenter).await?;
        let datastore = session.datastore(&datacenter, &config.datastore).await?;

        let mut networks = Vec::new();
        for name in config.effective_networks() {
            networks.push((session.network(&datacenter, &name).await?, name));
        }

        let (pool, host) = self.resource_pool(session, &datacenter).await?;
        let folder = session.folder(&datacenter, &config.folder).await?;

        let spec = VmSpec {
            name: config.machine_name.clone(),
            guest_id: GUEST_ID.to_string(),
            vm_path_name: format!("[{}]", datastore.name),
            num_cpus: i32::try_from(config.cpu_count)
                .map_err(|_| MachineError::InvalidConfig("cpu count out of range".into()))?,
            memory_mb: config.memory_mb,
            devices: vec![VirtualDevice::ScsiController(SCSI_CONTROLLER.to_string())],
        };

        tracing::info!("creating VM {}", config.machine_name);
        let vm = session.create_vm(&folder, &spec, &pool, host.as_ref()).await?;

        tracing::info!("uploading boot2docker ISO");
        session
            .upload_datastore_file(
                &datacenter,
                &datastore,
                &config.iso_path(),
                &config.datastore_iso_path(),
            )
            .await?;

        let mut devices = vec![
            VirtualDevice::Disk {
                datastore: datastore.clone(),
                path: datastore.datastore_path(&format!(
                    "{0}/{0}.vmdk",
                    config.machine_name
                )),
                capacity_kb: config.disk_size_mb * 1024,
            },
            VirtualDevice::Cdrom {
                iso_path: datastore.datastore_path(&config.datastore_iso_path()),
            },
        ];
        for (network, name) in networks {
            tracing::info!("adding network: {name}");
            devices.push(VirtualDevice::EthernetCard {
                card_type: ETHERNET_CARD.to_string(),
                network,
            });
        }

        tracing::info!("reconfiguring VM");
        session.add_devices(&vm, &devices).await?;

        let extra_config = self.extra_config().await?;
        session.set_extra_config(&vm, &extra_config).await?;

        Ok(())
    }

    /// The `guestinfo` options from cfgparams and cloud-init.
    async fn extra_config(&self) -> MachineResult<Vec<(String, String)>> {
        let mut options: Vec<(String, String)> = self
            .config
            .cfg_params
            .iter()
            .map(|param| match param.split_once('=') {
                Some((key, value)) => (key.to_string(), value.to_string()),
                None => (param.clone(), String::new()),
            })
            .collect();

        let cloud_init = &self.config.cloud_init;
        if cloud_init.is_empty() {
            return Ok(options);
        }

        if is_request_uri(cloud_init) {
            tracing::info!("setting {CLOUD_INIT_URL_KEY} to {cloud_init}");
            options.push((CLOUD_INIT_URL_KEY.to_string(), cloud_init.clone()));
        } else if tokio::fs::try_exists(cloud_init).await? {
            tracing::info!("setting {CLOUD_INIT_DATA_KEY} to encoded content of {cloud_init}");
            let contents = tokio::fs::read(cloud_init).await?;
            options.push((CLOUD_INIT_DATA_KEY.to_string(), STANDARD.encode(contents)));
            options.push((CLOUD_INIT_ENCODING_KEY.to_string(), "base64".to_string()));
        } else {
            tracing::warn!(
                "cloud-init {cloud_init} is neither a URL nor a readable file, ignoring"
            );
        }

        Ok(options)
    }

    /// Copies the key bundle into the guest and unpacks it where boot2docker looks for it.
    async fn install_key_bundle(&self, session: &dyn VsphereSession) -> MachineResult<()> {
        let vm = self.fetch_vm(session).await?;
        let auth = GuestAuth {
            username: B2D_USER.to_string(),
            password: B2D_PASS.to_string(),
        };

        session
            .upload_guest_file(
                &vm,
                &auth,
                &self.config.userdata_path(),
                GUEST_USERDATA_PATH,
                0o660,
            )
            .await?;

        session
            .start_guest_program(
                &vm,
                &auth,
                "/usr/bin/sudo",
                &format!(
                    "/usr/bin/sudo /bin/sh -c \"tar xvf {GUEST_USERDATA_PATH} -C /home/docker \
                     > /var/log/userdata.log 2>&1 && chown -R docker:staff /home/docker\""
                ),
            )
            .await?;

        session
            .start_guest_program(
                &vm,
                &auth,
                "/usr/bin/sudo",
                &format!("/bin/mv {GUEST_USERDATA_PATH} /var/lib/boot2docker/userdata.tar"),
            )
            .await
    }

    async fn remove_in(&self, session: &dyn VsphereSession) -> MachineResult<()> {
        let datacenter = session.datacenter(&self.config.datacenter).await?;
        let datastore = session.datastore(&datacenter, &self.config.datastore).await?;

        match session
            .delete_datastore_file(&datacenter, &datastore, &self.config.datastore_iso_path())
            .await
        {
            Err(e) if e.is_not_found() => {
                tracing::warn!("boot2docker ISO of {} is already gone", self.config.machine_name)
            }
            result => result?,
        }

        match session.find_vm(&datacenter, &self.config.vm_path()).await {
            Ok(vm) => session.destroy(&vm).await,
            Err(e) if e.is_not_found() => {
                tracing::warn!("VM {} is already gone", self.config.machine_name);
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
impl Driver for VsphereDriver {
    fn driver_name(&self) -> &str {
        VSPHERE_DRIVER_NAME
    }

    fn machine_name(&self) -> &str {
        &self.config.machine_name
    }

    fn create_flags(&self) -> Vec<CreateFlag> {
        VsphereConfig::create_flags()
    }

    fn set_config_from_flags(&mut self, options: &DriverOptions) -> MachineResult<()> {
        self.config.apply(options)
    }

    fn config(&self) -> MachineResult<serde_json::Value> {
        Ok(serde_json::to_value(&self.config)?)
    }

    fn ssh_username(&self) -> String {
        if self.config.ssh_user.is_empty() {
            B2D_USER.to_string()
        } else {
            self.config.ssh_user.clone()
        }
    }

    fn ssh_port(&self) -> u16 {
        self.config.ssh_port
    }

    fn ssh_key_path(&self) -> Option<PathBuf> {
        Some(self.config.ssh_key_path())
    }

    async fn pre_create_check(&mut self) -> MachineResult<()> {
        tracing::debug!("connecting to vSphere for pre-create checks");
        let session = self.login().await?;
        let result = self.check_resources(session.as_ref()).await;
        logout(session, result).await?;

        // Persist the network default only once every resource checked out.
        self.config.networks = self.config.effective_networks();
        Ok(())
    }

    async fn create(&mut self) -> MachineResult<()> {
        copy_iso_to_machine_dir(
            &self.config.boot2docker_url,
            &self.cache_dir,
            &self.config.iso_path(),
        )
        .await?;

        tracing::info!("generating SSH keypair");
        generate_ssh_key(&self.config.ssh_key_path()).await?;

        let session = self.login().await?;
        let result = self.create_in(session.as_ref()).await;
        logout(session, result).await?;

        self.start().await?;

        tracing::info!("provisioning ssh keys");
        let public_key = public_key_path(&self.config.ssh_key_path());
        write_key_bundle(&public_key, &self.config.userdata_path()).await?;
        let session = self.login().await?;
        let result = self.install_key_bundle(session.as_ref()).await;
        logout(session, result).await
    }

    async fn start(&mut self) -> MachineResult<()> {
        match self.get_state().await? {
            HostState::Running => {
                tracing::info!("VM {} has already been started", self.config.machine_name);
                Ok(())
            }
            HostState::Stopped => {
                let session = self.login().await?;
                let result = async {
                    let vm = self.fetch_vm(session.as_ref()).await?;
                    session.power_on(&vm).await
                }
                .await;
                logout(session, result).await?;

                tracing::info!("waiting for VMware Tools to come online");
                self.get_ip().await?;
                Ok(())
            }
            state => Err(MachineError::HostErrorState(format!(
                "cannot start {} while it is {state}",
                self.config.machine_name
            ))),
        }
    }

    async fn stop(&mut self) -> MachineResult<()> {
        let session = self.login().await?;
        let result = async {
            let vm = self.fetch_vm(session.as_ref()).await?;
            session.shutdown_guest(&vm).await
        }
        .await;
        logout(session, result).await
    }

    async fn restart(&mut self) -> MachineResult<()> {
        let policy = self.restart_policy;
        let sleeper = self.sleeper.clone();
        restart_with_fallback(self, &policy, sleeper.as_ref()).await
    }

    async fn kill(&mut self) -> MachineResult<()> {
        let session = self.login().await?;
        let result = async {
            let vm = self.fetch_vm(session.as_ref()).await?;
            session.power_off(&vm).await
        }
        .await;
        logout(session, result).await
    }

    async fn remove(&mut self) -> MachineResult<()> {
        match self.get_state().await {
            Ok(HostState::Running) => self.kill().await?,
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                tracing::warn!("VM {} not found, cleaning up", self.config.machine_name)
            }
            Err(e) => return Err(e),
        }

        let session = self.login().await?;
        let result = self.remove_in(session.as_ref()).await;
        logout(session, result).await
    }

    async fn upgrade(&mut self) -> MachineResult<()> {
        Err(MachineError::unsupported(VSPHERE_DRIVER_NAME, "upgrade"))
    }

    async fn get_state(&self) -> MachineResult<HostState> {
        let session = self.login().await?;
        let result = async {
            let vm = self.fetch_vm(session.as_ref()).await?;
            Ok(match session.power_state(&vm).await? {
                PowerState::PoweredOn => HostState::Running,
                PowerState::PoweredOff => HostState::Stopped,
                PowerState::Suspended => HostState::None,
            })
        }
        .await;
        logout(session, result).await
    }

    async fn get_ip(&self) -> MachineResult<String> {
        let state = self.get_state().await?;
        if state != HostState::Running {
            return Err(MachineError::HostNotRunning(format!(
                "{} is {state}",
                self.config.machine_name
            )));
        }

        let session = self.login().await?;
        let result = async {
            let vm = self.fetch_vm(session.as_ref()).await?;
            session.wait_for_ips(&vm).await
        }
        .await;
        let nics = logout(session, result).await?;

        nics.iter()
            .find_map(|ips| select_preferred_ip(ips))
            .ok_or_else(|| {
                MachineError::NoIpAddress(format!(
                    "{}: check DHCP status",
                    self.config.machine_name
                ))
            })
    }

    async fn get_url(&self) -> MachineResult<String> {
        match self.get_ip().await {
            Ok(ip) => Ok(crate::drivers::engine_url(&ip, self.engine_port())),
            Err(MachineError::NoIpAddress(_)) => Ok(String::new()),
            Err(e) => Err(e),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Ends a session and passes `result` through. A failed logout is only logged.
async fn logout<T>(session: Box<dyn VsphereSession>, result: MachineResult<T>) -> MachineResult<T> {
    if let Err(e) = session.logout().await {
        tracing::warn!("failed to log out of vSphere: {e}");
    }
    result
}

fn is_request_uri(value: &str) -> bool {
    match value.split_once("://") {
        Some((scheme, rest)) => {
            !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
                && !rest.is_empty()
        }
        None => false,
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use machutils::InstantSleeper;

    use super::*;
    use crate::drivers::{vsphere::MemoryVsphere, FlagValue};

    struct Fixture {
        _dir: tempfile::TempDir,
        vsphere: MemoryVsphere,
        driver: VsphereDriver,
    }

    async fn fixture(options: DriverOptions) -> anyhow::Result<Fixture> {
        let dir = tempfile::tempdir()?;
        let store_path = dir.path().join("machines/dev");
        tokio::fs::create_dir_all(&store_path).await?;

        let iso = dir.path().join("custom.iso");
        tokio::fs::write(&iso, b"iso").await?;
        tokio::fs::write(store_path.join("id_ed25519"), "private").await?;
        tokio::fs::write(store_path.join("id_ed25519.pub"), "ssh-ed25519 AAAA dev").await?;

        let options = options
            .with("vmwarevsphere-vcenter", FlagValue::String("vc.local".into()))
            .with(
                "vmwarevsphere-boot2docker-url",
                FlagValue::String(iso.display().to_string()),
            );

        let vsphere = MemoryVsphere::with_defaults();
        let mut driver = VsphereDriver::new(
            VsphereConfig::new("dev", &store_path),
            Arc::new(vsphere.clone()),
            dir.path().join("cache"),
        )
        .with_restart_policy(
            RestartPolicy::new(Duration::from_secs(2), 3),
            Arc::new(InstantSleeper::new()),
        );
        driver.set_config_from_flags(&options)?;

        Ok(Fixture {
            _dir: dir,
            vsphere,
            driver,
        })
    }

    #[test_log::test(tokio::test)]
    async fn test_pre_create_check_has_no_side_effects() -> anyhow::Result<()> {
        let mut f = fixture(DriverOptions::new()).await?;

        f.driver.pre_create_check().await?;

        assert!(f.vsphere.operations().is_empty());
        assert_eq!(f.driver.get_config().networks, ["VM Network"]);
        assert_eq!(f.vsphere.open_sessions(), 0);
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_pre_create_check_reports_missing_folder_and_network() -> anyhow::Result<()> {
        let mut f = fixture(
            DriverOptions::new().with("vmwarevsphere-folder", FlagValue::String("/docker/".into())),
        )
        .await?;
        let err = f.driver.pre_create_check().await.unwrap_err();
        assert!(err.to_string().contains("failed to find VM folder 'docker'"));

        let mut f = fixture(DriverOptions::new().with(
            "vmwarevsphere-network",
            FlagValue::StringSlice(vec!["VM Network".into(), "Storage".into()]),
        ))
        .await?;
        assert!(f.driver.pre_create_check().await.unwrap_err().is_not_found());
        assert!(f.vsphere.operations().is_empty());
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_create_builds_and_boots_machine() -> anyhow::Result<()> {
        let cloud_init = tempfile::NamedTempFile::new()?;
        tokio::fs::write(cloud_init.path(), "#cloud-config\n").await?;

        let mut f = fixture(
            DriverOptions::new()
                .with("vmwarevsphere-disk-size", FlagValue::Int(10))
                .with(
                    "vmwarevsphere-cfgparam",
                    FlagValue::StringSlice(vec!["guestinfo.role=worker".into(), "flag".into()]),
                )
                .with(
                    "vmwarevsphere-cloudinit",
                    FlagValue::String(cloud_init.path().display().to_string()),
                ),
        )
        .await?;

        f.driver.pre_create_check().await?;
        f.driver.create().await?;

        let vm = f.vsphere.vm("dev").expect("vm exists");
        assert_eq!(vm.power, PowerState::PoweredOn);
        assert_eq!(vm.spec.guest_id, "otherLinux64Guest");
        assert_eq!(vm.spec.vm_path_name, "[datastore1]");
        assert_eq!(
            vm.spec.devices,
            vec![VirtualDevice::ScsiController("pvscsi".into())]
        );
        assert!(vm.devices.contains(&VirtualDevice::Disk {
            datastore: ObjectRef::new("datastore:datastore1", "datastore1"),
            path: "[datastore1] dev/dev.vmdk".into(),
            capacity_kb: 10 * 1024,
        }));
        assert!(vm.devices.contains(&VirtualDevice::Cdrom {
            iso_path: "[datastore1] dev/boot2docker.iso".into(),
        }));
        assert!(vm.devices.iter().any(|d| matches!(
            d,
            VirtualDevice::EthernetCard { card_type, .. } if card_type == "vmxnet3"
        )));
        assert_eq!(
            vm.extra_config,
            vec![
                ("guestinfo.role".to_string(), "worker".to_string()),
                ("flag".to_string(), String::new()),
                (
                    "guestinfo.cloud-init.config.data".to_string(),
                    STANDARD.encode("#cloud-config\n")
                ),
                (
                    "guestinfo.cloud-init.data.encoding".to_string(),
                    "base64".to_string()
                ),
            ]
        );

        assert_eq!(
            f.vsphere.guest_files(),
            vec![("/home/docker/userdata.tar".to_string(), 0o660)]
        );
        let programs = f.vsphere.guest_programs();
        assert_eq!(programs.len(), 2);
        assert!(programs[0].contains("tar xvf /home/docker/userdata.tar"));
        assert!(programs[1].contains("/var/lib/boot2docker/userdata.tar"));
        assert_eq!(f.vsphere.open_sessions(), 0);
        assert_eq!(f.driver.get_url().await?, "tcp://10.0.0.21:2376");
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_cloud_init_url_goes_into_guestinfo() -> anyhow::Result<()> {
        let f = fixture(DriverOptions::new().with(
            "vmwarevsphere-cloudinit",
            FlagValue::String("https://example.com/user-data".into()),
        ))
        .await?;
        assert_eq!(
            f.driver.extra_config().await?,
            vec![(
                "guestinfo.cloud-init.config.url".to_string(),
                "https://example.com/user-data".to_string()
            )]
        );
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_start_and_restart() -> anyhow::Result<()> {
        let mut f = fixture(DriverOptions::new()).await?;
        f.driver.pre_create_check().await?;
        f.driver.create().await?;
        let created = f.vsphere.operations().len();

        f.driver.start().await?;
        assert_eq!(f.vsphere.operations().len(), created);

        f.vsphere.ignore_guest_shutdown();
        f.driver.restart().await?;
        assert_eq!(
            f.vsphere.operations()[created..],
            ["shutdown_guest dev", "power_off dev", "power_on dev"]
        );
        assert_eq!(f.driver.get_state().await?, HostState::Running);
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_start_refuses_suspended_machine() -> anyhow::Result<()> {
        let mut f = fixture(DriverOptions::new()).await?;
        f.driver.pre_create_check().await?;
        f.driver.create().await?;
        let created = f.vsphere.operations().len();

        f.vsphere.suspend("dev");
        let result = f.driver.start().await;
        assert!(
            matches!(result, Err(MachineError::HostErrorState(ref msg)) if msg.contains("dev")),
            "{result:?}"
        );
        assert_eq!(f.vsphere.operations().len(), created);
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_get_ip_requires_running() -> anyhow::Result<()> {
        let mut f = fixture(DriverOptions::new()).await?;
        f.driver.pre_create_check().await?;
        f.driver.create().await?;
        f.driver.kill().await?;

        assert!(matches!(
            f.driver.get_ip().await,
            Err(MachineError::HostNotRunning(_))
        ));

        f.driver.start().await?;
        f.vsphere.set_addresses(vec![
            vec!["fe80::1".into(), "172.17.0.1".into(), "10.0.0.30".into()],
            vec!["10.0.0.31".into()],
        ]);
        assert_eq!(f.driver.get_ip().await?, "10.0.0.30");

        f.vsphere.set_addresses(Vec::new());
        assert!(matches!(
            f.driver.get_ip().await,
            Err(MachineError::NoIpAddress(_))
        ));
        assert_eq!(f.driver.get_url().await?, "");
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_remove_tolerates_missing_iso() -> anyhow::Result<()> {
        let mut f = fixture(DriverOptions::new()).await?;
        f.driver.pre_create_check().await?;
        f.driver.create().await?;
        f.vsphere
            .delete_file_out_of_band("[datastore1] dev/boot2docker.iso");

        f.driver.remove().await?;

        assert!(f.vsphere.vm("dev").is_none());
        let operations = f.vsphere.operations();
        assert!(operations.ends_with(&[
            "power_off dev".to_string(),
            "delete [datastore1] dev/boot2docker.iso".to_string(),
            "destroy dev".to_string(),
        ]));

        // A second remove finds nothing left and still succeeds.
        f.driver.remove().await?;
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_upgrade_is_unsupported() -> anyhow::Result<()> {
        let mut f = fixture(DriverOptions::new()).await?;
        assert!(f.driver.upgrade().await.unwrap_err().is_unsupported());
        Ok(())
    }
}
