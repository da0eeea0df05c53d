use std::{sync::Arc, time::Duration};

use machutils::{InstantSleeper, PollPolicy};
use monomachine::{
    config::{AuthOptions, HostOptions, SwarmOptions},
    dispatch::{Dispatcher, LifecycleAction},
    drivers::{DriverOptions, FakeCall, FakeDriverFactory},
    host::{FileHostStore, HostState},
    provision::ProvisionerRegistry,
    remote::FakeCommander,
    utils::machine_cert_dir,
};
use tempfile::tempdir;
use tokio::fs;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const UBUNTU_RELEASE: &str = "NAME=\"Ubuntu\"\nID=ubuntu\nID_LIKE=debian\nVERSION_ID=\"22.04\"\n";

const BOOT2DOCKER_RELEASE: &str = "NAME=Boot2Docker\nID=boot2docker\nVERSION_ID=19.03.12\n";

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[test_log::test(tokio::test)]
async fn test_host_lifecycle_through_file_store() -> anyhow::Result<()> {
    let home = tempdir()?;
    let drivers = Arc::new(FakeDriverFactory::new());
    let backend = drivers.add_host(
        "dev",
        FakeCommander::new().with_output("cat /etc/os-release", UBUNTU_RELEASE),
    );
    let dispatcher = helper::dispatcher(home.path(), drivers.clone());
    let hosts = vec!["dev".to_string()];

    let options = HostOptions::builder()
        .swarm(
            SwarmOptions::builder()
                .enabled(true)
                .master(true)
                .discovery("token://abc")
                .build(),
        )
        .auth(AuthOptions::for_cert_dir(machine_cert_dir(home.path(), "dev")))
        .build();
    dispatcher
        .prepare_host("dev", "fake", &DriverOptions::new(), options)
        .await?;
    dispatcher
        .run(LifecycleAction::Create, &hosts)
        .await
        .into_result()?;

    // The record survives on disk with the applied options.
    let host = dispatcher.store().load("dev").await?;
    assert_eq!(*host.get_state(), HostState::Running);
    assert_eq!(
        host.get_options().get_auth().get_remote_server_cert_path(),
        "/etc/docker/server.pem"
    );
    assert_eq!(
        host.get_options().get_engine().get_storage_driver().as_deref(),
        Some("overlay2")
    );

    let cert_dir = machine_cert_dir(home.path(), "dev");
    for file in ["ca.pem", "ca-key.pem", "cert.pem", "key.pem", "server.pem", "server-key.pem"] {
        assert!(fs::try_exists(cert_dir.join(file)).await?, "missing {file}");
    }
    let ca = fs::read(cert_dir.join("ca.pem")).await?;

    let (_, commander) = drivers
        .get("dev")
        .ok_or_else(|| anyhow::anyhow!("no fake host"))?;
    assert!(commander.ran("manage --tlsverify"));
    assert!(commander.ran("--dport 3376 -j ACCEPT"));

    assert_eq!(dispatcher.url("dev").await?, "tcp://192.168.99.100:2376");
    let listings = dispatcher.list().await?;
    assert_eq!(listings.len(), 1);
    assert_eq!(listings[0].state, HostState::Running);
    assert_eq!(listings[0].url, "tcp://192.168.99.100:2376");

    dispatcher
        .run(LifecycleAction::Stop, &hosts)
        .await
        .into_result()?;
    assert_eq!(
        *dispatcher.store().load("dev").await?.get_state(),
        HostState::Stopped
    );
    assert!(dispatcher.url("dev").await.is_err());

    dispatcher
        .run(LifecycleAction::Start, &hosts)
        .await
        .into_result()?;
    assert!(backend.calls().contains(&FakeCall::PowerOn));

    // Provisioning again keeps the CA.
    dispatcher
        .run(LifecycleAction::Provision, &hosts)
        .await
        .into_result()?;
    assert_eq!(fs::read(cert_dir.join("ca.pem")).await?, ca);

    // Regenerating with the CA replaces it and restarts the engine.
    commander.clear();
    dispatcher
        .run(LifecycleAction::RegenerateCerts { ca: true }, &hosts)
        .await
        .into_result()?;
    assert_ne!(fs::read(cert_dir.join("ca.pem")).await?, ca);
    assert!(commander.ran("sudo systemctl restart docker"));

    dispatcher
        .run(LifecycleAction::Remove, &hosts)
        .await
        .into_result()?;
    assert!(!backend.exists());
    assert!(!dispatcher.store().exists("dev").await?);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_each_host_gets_its_own_provisioner() -> anyhow::Result<()> {
    let home = tempdir()?;
    let drivers = Arc::new(FakeDriverFactory::new());
    drivers.add_host(
        "ubuntu",
        FakeCommander::new().with_output("cat /etc/os-release", UBUNTU_RELEASE),
    );
    drivers.add_host(
        "b2d",
        FakeCommander::new().with_output("cat /etc/os-release", BOOT2DOCKER_RELEASE),
    );
    drivers.add_host(
        "mystery",
        FakeCommander::new().with_output("cat /etc/os-release", "ID=plan9\n"),
    );
    let dispatcher = helper::dispatcher(home.path(), drivers.clone());

    let names = ["ubuntu", "b2d", "mystery"];
    for name in names {
        let options = HostOptions::builder()
            .auth(AuthOptions::for_cert_dir(machine_cert_dir(home.path(), name)))
            .build();
        dispatcher
            .prepare_host(name, "fake", &DriverOptions::new(), options)
            .await?;
    }

    let hosts: Vec<String> = names.iter().map(|n| n.to_string()).collect();
    let report = dispatcher.run(LifecycleAction::Create, &hosts).await;
    assert_eq!(report.succeeded(), vec!["ubuntu", "b2d"]);
    assert_eq!(report.failed().len(), 1);
    assert_eq!(report.failed()[0].0, "mystery");

    // Nothing but read-only commands reached the unknown host.
    let (_, mystery) = drivers
        .get("mystery")
        .ok_or_else(|| anyhow::anyhow!("no fake host"))?;
    assert!(mystery
        .commands()
        .iter()
        .all(|c| c == "exit 0" || c.starts_with("cat ")));

    let b2d = dispatcher.store().load("b2d").await?;
    assert_eq!(
        b2d.get_options().get_auth().get_remote_ca_cert_path(),
        "/var/lib/boot2docker/ca.pem"
    );

    let (_, commander) = drivers
        .get("b2d")
        .ok_or_else(|| anyhow::anyhow!("no fake host"))?;
    assert!(commander.ran("sudo /etc/init.d/docker restart"));
    assert!(!commander.ran("systemctl"));
    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Helpers
//--------------------------------------------------------------------------------------------------

mod helper {
    use super::*;

    pub(super) fn dispatcher(
        home: &std::path::Path,
        drivers: Arc<FakeDriverFactory>,
    ) -> Dispatcher {
        let poll = PollPolicy::new(Duration::from_millis(1), 5);
        Dispatcher::builder()
            .store(Arc::new(FileHostStore::new(home)))
            .drivers(drivers)
            .provisioners(Arc::new(ProvisionerRegistry::with_defaults()))
            .sleeper(Arc::new(InstantSleeper::new()))
            .state_poll(poll)
            .ssh_poll(poll)
            .build()
    }
}
