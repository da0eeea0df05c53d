use std::{path::PathBuf, sync::LazyLock, time::Duration};

use machutils::PollPolicy;

use crate::utils::MONOMACHINE_HOME_DIR;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The port the engine listens on for TLS connections.
pub const DEFAULT_ENGINE_PORT: u16 = 2376;

/// The port a swarm master listens on.
pub const DEFAULT_SWARM_MASTER_PORT: u16 = 3376;

/// The image used to run swarm agents and masters.
pub const DEFAULT_SWARM_IMAGE: &str = "swarm:latest";

/// The scheduling strategy of a swarm master.
pub const DEFAULT_SWARM_STRATEGY: &str = "spread";

/// The storage driver used when none is configured.
pub const DEFAULT_STORAGE_DRIVER: &str = "overlay2";

/// The script that installs the engine on package-capable hosts.
pub const DEFAULT_ENGINE_INSTALL_URL: &str = "https://get.docker.com";

/// The default address of the engine's bridge network gateway.
pub const DEFAULT_BRIDGE_IP: &str = "172.17.0.1";

/// Restart waits this long between two state checks after a graceful stop.
pub const DEFAULT_RESTART_POLL: PollPolicy = PollPolicy::new(Duration::from_secs(2), 60);

/// How long create waits for a new machine to report `Running`.
pub const DEFAULT_RUNNING_POLL: PollPolicy = PollPolicy::new(Duration::from_secs(3), 60);

/// How long create waits for the remote command channel to accept commands.
pub const DEFAULT_SSH_POLL: PollPolicy = PollPolicy::new(Duration::from_secs(3), 60);

/// How long the engine may take to answer after it has been restarted.
pub const DEFAULT_ENGINE_POLL: PollPolicy = PollPolicy::new(Duration::from_secs(3), 20);

/// The longest a single remote command may run.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// The longest a single lifecycle action may take for one host.
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// The path where all monomachine global data is stored.
pub static DEFAULT_MONOMACHINE_HOME: LazyLock<PathBuf> = LazyLock::new(|| {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(MONOMACHINE_HOME_DIR)
});
