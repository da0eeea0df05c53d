use std::path::Path;

use clap::{Args, Parser};

use crate::config::{
    AuthOptions, EngineOptions, HostOptions, SwarmOptions, DEFAULT_ENGINE_INSTALL_URL,
    DEFAULT_ENGINE_PORT, DEFAULT_SWARM_IMAGE, DEFAULT_SWARM_MASTER_PORT, DEFAULT_SWARM_STRATEGY,
};

use super::styles;

//-------------------------------------------------------------------------------------------------
// Types
//-------------------------------------------------------------------------------------------------

/// monomachine - create and provision hosts that run a container engine
#[derive(Debug, Parser)]
#[command(name = "monomachine", author, about, version, styles=styles::styles())]
pub struct MachineArgs {
    /// The subcommand to run
    #[command(subcommand)]
    pub subcommand: Option<MachineSubcommand>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available subcommands for managing hosts
#[derive(Debug, Parser)]
pub enum MachineSubcommand {
    /// Create and provision a host
    #[command(name = "create")]
    Create {
        /// Name of the host
        #[arg(required = true)]
        name: String,

        /// Create options
        #[command(flatten)]
        args: CreateArgs,
    },

    /// Start hosts
    #[command(name = "start")]
    Start {
        /// Names of the hosts
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Stop hosts gracefully
    #[command(name = "stop")]
    Stop {
        /// Names of the hosts
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Restart hosts
    #[command(name = "restart")]
    Restart {
        /// Names of the hosts
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Power hosts off
    #[command(name = "kill")]
    Kill {
        /// Names of the hosts
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Remove hosts and their records
    #[command(name = "rm", alias = "remove")]
    Remove {
        /// Names of the hosts
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Upgrade the boot image or engine of hosts
    #[command(name = "upgrade")]
    Upgrade {
        /// Names of the hosts
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Provision existing hosts again
    #[command(name = "provision")]
    Provision {
        /// Names of the hosts
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Issue new engine certificates for hosts
    #[command(name = "regenerate-certs")]
    RegenerateCerts {
        /// Replace the CA and client certificate too
        #[arg(long)]
        ca: bool,

        /// Names of the hosts
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// List hosts
    #[command(name = "ls")]
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show the stored record of a host
    #[command(name = "inspect")]
    Inspect {
        /// Name of the host
        #[arg(required = true)]
        name: String,
    },

    /// Show the state of a host
    #[command(name = "status")]
    Status {
        /// Name of the host
        #[arg(required = true)]
        name: String,
    },

    /// Show the address of a host
    #[command(name = "ip")]
    Ip {
        /// Name of the host
        #[arg(required = true)]
        name: String,
    },

    /// Show the engine URL of a host
    #[command(name = "url")]
    Url {
        /// Name of the host
        #[arg(required = true)]
        name: String,
    },

    /// List drivers and the options they accept
    #[command(name = "drivers")]
    Drivers,
}

/// Options for creating a host.
#[derive(Debug, Clone, Args)]
pub struct CreateArgs {
    /// Driver to create the machine with
    #[arg(short, long, env = "MACHINE_DRIVER", default_value = "generic")]
    pub driver: String,

    /// Port the engine listens on
    #[arg(long, default_value_t = DEFAULT_ENGINE_PORT)]
    pub engine_port: u16,

    /// Engine storage driver
    #[arg(long)]
    pub engine_storage_driver: Option<String>,

    /// Engine labels
    #[arg(long = "engine-label")]
    pub engine_labels: Vec<String>,

    /// Registries the engine may reach without TLS
    #[arg(long = "engine-insecure-registry")]
    pub engine_insecure_registries: Vec<String>,

    /// Registry mirrors
    #[arg(long = "engine-registry-mirror")]
    pub engine_registry_mirrors: Vec<String>,

    /// Extra engine flags, without the leading dashes
    #[arg(long = "engine-opt")]
    pub engine_opts: Vec<String>,

    /// Environment variables for the engine
    #[arg(long = "engine-env")]
    pub engine_env: Vec<String>,

    /// Script that installs the engine
    #[arg(long, default_value = DEFAULT_ENGINE_INSTALL_URL)]
    pub engine_install_url: String,

    /// Join a swarm
    #[arg(long)]
    pub swarm: bool,

    /// Run the swarm manager
    #[arg(long)]
    pub swarm_master: bool,

    /// Swarm discovery URL
    #[arg(long, default_value = "")]
    pub swarm_discovery: String,

    /// Swarm image
    #[arg(long, default_value = DEFAULT_SWARM_IMAGE)]
    pub swarm_image: String,

    /// Swarm scheduling strategy
    #[arg(long, default_value = DEFAULT_SWARM_STRATEGY)]
    pub swarm_strategy: String,

    /// Port of the swarm manager
    #[arg(long, default_value_t = DEFAULT_SWARM_MASTER_PORT)]
    pub swarm_master_port: u16,

    /// Extra swarm manager flags, without the leading dashes
    #[arg(long = "swarm-opt")]
    pub swarm_opts: Vec<String>,

    /// Extra subject alternative names for the engine certificate
    #[arg(long = "tls-san")]
    pub tls_sans: Vec<String>,
}

//-------------------------------------------------------------------------------------------------
// Methods
//-------------------------------------------------------------------------------------------------

impl CreateArgs {
    /// The host options these arguments describe, with certificates kept in `cert_dir`.
    pub fn host_options(&self, cert_dir: impl AsRef<Path>) -> HostOptions {
        let mut engine = EngineOptions::builder()
            .port(self.engine_port)
            .labels(self.engine_labels.clone())
            .insecure_registries(self.engine_insecure_registries.clone())
            .registry_mirrors(self.engine_registry_mirrors.clone())
            .arbitrary_flags(self.engine_opts.clone())
            .env(self.engine_env.clone())
            .install_url(self.engine_install_url.clone())
            .build();
        engine.set_storage_driver(self.engine_storage_driver.clone());

        let swarm = SwarmOptions::builder()
            .enabled(self.swarm || self.swarm_master)
            .master(self.swarm_master)
            .discovery(self.swarm_discovery.clone())
            .image(self.swarm_image.clone())
            .strategy(self.swarm_strategy.clone())
            .master_port(self.swarm_master_port)
            .arbitrary_flags(self.swarm_opts.clone())
            .build();

        let mut auth = AuthOptions::for_cert_dir(cert_dir);
        auth.set_server_cert_sans(self.tls_sans.clone());

        HostOptions::builder()
            .engine(engine)
            .swarm(swarm)
            .auth(auth)
            .build()
    }
}

//-------------------------------------------------------------------------------------------------
// Tests
//-------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        MachineArgs::command().debug_assert();
    }

    #[test]
    fn test_create_args_to_host_options() -> anyhow::Result<()> {
        let args = MachineArgs::try_parse_from([
            "monomachine",
            "create",
            "-d",
            "vmwarevsphere",
            "--engine-label",
            "tier=db",
            "--engine-storage-driver",
            "btrfs",
            "--swarm-master",
            "--swarm-discovery",
            "token://abc",
            "--tls-san",
            "dev.example.com",
            "dev",
        ])?;

        let Some(MachineSubcommand::Create { name, args }) = args.subcommand else {
            anyhow::bail!("expected create");
        };
        assert_eq!(name, "dev");
        assert_eq!(args.driver, "vmwarevsphere");

        let options = args.host_options("/tmp/certs");
        assert_eq!(*options.get_engine().get_port(), DEFAULT_ENGINE_PORT);
        assert_eq!(options.get_engine().get_storage_driver().as_deref(), Some("btrfs"));
        assert_eq!(options.get_engine().get_labels(), &vec!["tier=db".to_string()]);
        assert!(*options.get_swarm().get_enabled());
        assert!(*options.get_swarm().get_master());
        assert_eq!(options.get_swarm().get_discovery(), "token://abc");
        assert_eq!(
            options.get_auth().get_server_cert_sans(),
            &vec!["dev.example.com".to_string()]
        );
        Ok(())
    }

    #[test]
    fn test_batch_commands_take_several_hosts() -> anyhow::Result<()> {
        let args = MachineArgs::try_parse_from(["monomachine", "rm", "a", "b"])?;
        assert!(matches!(
            args.subcommand,
            Some(MachineSubcommand::Remove { ref names }) if names == &["a", "b"]
        ));

        let args = MachineArgs::try_parse_from(["monomachine", "regenerate-certs", "--ca", "a"])?;
        assert!(matches!(
            args.subcommand,
            Some(MachineSubcommand::RegenerateCerts { ca: true, .. })
        ));
        Ok(())
    }
}
