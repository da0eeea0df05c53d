use machutils::shell_quote;

use crate::{
    config::{AuthOptions, SwarmOptions},
    MachineError, MachineResult,
};

use super::ProvisionTarget;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const SWARM_AGENT_CONTAINER: &str = "swarm-agent";
const SWARM_MASTER_CONTAINER: &str = "swarm-agent-master";

/// The port the master listens on inside its container.
const SWARM_MASTER_CONTAINER_PORT: u16 = 3376;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// The commands that start the swarm containers on a host, master first.
///
/// Existing swarm containers are replaced. Returns nothing when swarm is disabled.
pub fn swarm_commands(
    swarm: &SwarmOptions,
    auth: &AuthOptions,
    advertise_ip: &str,
    engine_port: u16,
) -> MachineResult<Vec<String>> {
    if !swarm.get_enabled() {
        return Ok(Vec::new());
    }

    if swarm.get_discovery().is_empty() {
        return Err(MachineError::InvalidConfig(
            "swarm discovery is required to join a swarm".to_string(),
        ));
    }

    let image = shell_quote(swarm.get_image());
    let discovery = shell_quote(swarm.get_discovery());
    let mut commands = Vec::new();

    if *swarm.get_master() {
        let master_port = swarm.get_master_port();
        let ca = auth.get_remote_ca_cert_path();
        let cert = auth.get_remote_server_cert_path();
        let key = auth.get_remote_server_key_path();
        let options_dir = ca
            .rsplit_once('/')
            .map(|(dir, _)| dir)
            .filter(|dir| !dir.is_empty())
            .unwrap_or("/");

        let mut manage = vec![
            "manage".to_string(),
            "--tlsverify".to_string(),
            format!("--tlscacert={ca}"),
            format!("--tlscert={cert}"),
            format!("--tlskey={key}"),
            format!("-H tcp://0.0.0.0:{SWARM_MASTER_CONTAINER_PORT}"),
            format!("--strategy {}", shell_quote(swarm.get_strategy())),
        ];
        manage.extend(
            swarm
                .get_arbitrary_flags()
                .iter()
                .map(|flag| format!("--{}", flag.trim_start_matches('-'))),
        );
        manage.push(format!("--advertise {advertise_ip}:{master_port}"));
        manage.push(discovery.clone());

        commands.push(replace_container(SWARM_MASTER_CONTAINER));
        commands.push(format!(
            "sudo docker run -d --restart=always --name {SWARM_MASTER_CONTAINER} \
             -p {master_port}:{SWARM_MASTER_CONTAINER_PORT} -v {options_dir}:{options_dir} \
             {image} {}",
            manage.join(" ")
        ));
    }

    commands.push(replace_container(SWARM_AGENT_CONTAINER));
    commands.push(format!(
        "sudo docker run -d --restart=always --name {SWARM_AGENT_CONTAINER} {image} \
         join --advertise {advertise_ip}:{engine_port} {discovery}"
    ));

    Ok(commands)
}

/// Starts the swarm containers on the target.
pub async fn configure_swarm(
    target: &ProvisionTarget,
    swarm: &SwarmOptions,
    auth: &AuthOptions,
    engine_port: u16,
) -> MachineResult<()> {
    let commands = swarm_commands(swarm, auth, target.get_ip(), engine_port)?;
    if commands.is_empty() {
        tracing::debug!("swarm disabled for {}", target.get_machine_name());
        return Ok(());
    }

    tracing::info!(
        "joining {} to swarm {}",
        target.get_machine_name(),
        swarm.get_discovery()
    );
    for command in commands {
        target.run(&command).await?;
    }
    Ok(())
}

fn replace_container(name: &str) -> String {
    format!("sudo docker rm -f {name} > /dev/null 2>&1 || true")
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
