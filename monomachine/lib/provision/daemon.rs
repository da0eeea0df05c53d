//! Engine daemon configuration in the two on-host shapes.

use getset::Getters;
use machutils::remote_join;

use crate::{
    config::{AuthOptions, EngineOptions, DEFAULT_STORAGE_DRIVER},
    MachineResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The directory holding drop-in overrides of the engine unit.
pub const SYSTEMD_DROP_IN_DIR: &str = "/etc/systemd/system/docker.service.d";

/// The drop-in override fragment written for the engine unit.
pub const SYSTEMD_DROP_IN_FILENAME: &str = "10-machine.conf";

/// The flag file the drop-in override reads, inside the daemon options directory.
pub const SYSTEMD_FLAG_FILENAME: &str = "machine.env";

const ENGINE_SOCKET: &str = "unix:///var/run/docker.sock";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Everything that goes into the engine's daemon configuration.
#[derive(Debug, Clone, PartialEq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct EngineConfigContext {
    /// The port the engine listens on.
    engine_port: u16,

    /// The certificate layout, with remote paths set.
    auth: AuthOptions,

    /// The engine options.
    engine: EngineOptions,

    /// The daemon options directory on the host.
    options_dir: String,
}

/// Where a provisioner puts the daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonConfigLayout {
    /// A drop-in override of the engine's systemd unit plus a flag file in the options directory.
    SystemdDropIn,

    /// One environment-style file at this path.
    Flat(String),
}

/// A file to write on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// The absolute path.
    pub path: String,

    /// The contents.
    pub contents: String,
}

/// Rendered daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonConfig {
    /// An override fragment that points the engine unit at a separately managed flag file.
    SystemdDropIn {
        /// The unit override fragment.
        unit_override: RemoteFile,

        /// The flag file the fragment loads.
        flag_file: RemoteFile,
    },

    /// One file carrying the full flag set.
    Flat(RemoteFile),
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl EngineConfigContext {
    /// Creates the context. The engine port comes from the engine options.
    pub fn new(auth: AuthOptions, engine: EngineOptions, options_dir: impl Into<String>) -> Self {
        Self {
            engine_port: *engine.get_port(),
            auth,
            engine,
            options_dir: options_dir.into(),
        }
    }

    /// The storage driver, falling back to the default.
    pub fn storage_driver(&self) -> &str {
        self.engine
            .get_storage_driver()
            .as_deref()
            .filter(|driver| !driver.is_empty())
            .unwrap_or(DEFAULT_STORAGE_DRIVER)
    }

    /// The daemon flags, one element per flag with its value.
    pub fn engine_flags(&self) -> Vec<String> {
        let mut flags = vec![
            format!("-H tcp://0.0.0.0:{}", self.engine_port),
            format!("-H {ENGINE_SOCKET}"),
            format!("--storage-driver {}", self.storage_driver()),
            "--tlsverify".to_string(),
            format!("--tlscacert {}", self.auth.get_remote_ca_cert_path()),
            format!("--tlscert {}", self.auth.get_remote_server_cert_path()),
            format!("--tlskey {}", self.auth.get_remote_server_key_path()),
        ];

        flags.extend(self.engine.get_labels().iter().map(|l| format!("--label {l}")));
        flags.extend(
            self.engine
                .get_insecure_registries()
                .iter()
                .map(|r| format!("--insecure-registry {r}")),
        );
        flags.extend(
            self.engine
                .get_registry_mirrors()
                .iter()
                .map(|m| format!("--registry-mirror {m}")),
        );
        flags.extend(
            self.engine
                .get_arbitrary_flags()
                .iter()
                .map(|f| format!("--{}", f.trim_start_matches('-'))),
        );
        flags
    }

    /// The environment file body: `DOCKER_OPTS` followed by the engine environment.
    fn environment(&self) -> String {
        let mut body = format!("DOCKER_OPTS=\"{}\"\n", self.engine_flags().join(" "));
        for var in self.engine.get_env() {
            body.push_str(var);
            body.push('\n');
        }
        body
    }
}

impl DaemonConfigLayout {
    /// Renders the configuration for `context` in this layout.
    pub fn render(&self, context: &EngineConfigContext) -> MachineResult<DaemonConfig> {
        Ok(match self {
            DaemonConfigLayout::SystemdDropIn => {
                let flag_path = remote_join(&context.options_dir, SYSTEMD_FLAG_FILENAME)?;
                let unit_override = format!(
                    "[Service]\n\
                     EnvironmentFile={flag_path}\n\
                     ExecStart=\n\
                     ExecStart=/usr/bin/dockerd $DOCKER_OPTS\n\
                     MountFlags=slave\n\
                     LimitNOFILE=1048576\n\
                     LimitNPROC=1048576\n\
                     LimitCORE=infinity\n"
                );
                DaemonConfig::SystemdDropIn {
                    unit_override: RemoteFile {
                        path: remote_join(SYSTEMD_DROP_IN_DIR, SYSTEMD_DROP_IN_FILENAME)?,
                        contents: unit_override,
                    },
                    flag_file: RemoteFile {
                        path: flag_path,
                        contents: context.environment(),
                    },
                }
            }
            DaemonConfigLayout::Flat(path) => DaemonConfig::Flat(RemoteFile {
                path: path.clone(),
                contents: context.environment(),
            }),
        })
    }
}

impl DaemonConfig {
    /// The files to write, in order.
    pub fn files(&self) -> Vec<&RemoteFile> {
        match self {
            DaemonConfig::SystemdDropIn {
                unit_override,
                flag_file,
            } => vec![flag_file, unit_override],
            DaemonConfig::Flat(file) => vec![file],
        }
    }

    /// The file that carries `DOCKER_OPTS`.
    pub fn flag_file(&self) -> &RemoteFile {
        match self {
            DaemonConfig::SystemdDropIn { flag_file, .. } => flag_file,
            DaemonConfig::Flat(file) => file,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> anyhow::Result<EngineConfigContext> {
        let auth = AuthOptions::for_cert_dir("/tmp/certs").with_remote_dir("/etc/docker")?;
        let engine = EngineOptions::builder()
            .port(2377)
            .labels(vec!["tier=db".into()])
            .insecure_registries(vec!["registry.local:5000".into()])
            .arbitrary_flags(vec!["debug".into()])
            .env(vec!["HTTP_PROXY=http://proxy:3128".into()])
            .build();
        Ok(EngineConfigContext::new(auth, engine, "/etc/docker"))
    }

    #[test]
    fn test_systemd_emits_override_and_flag_file() -> anyhow::Result<()> {
        let config = DaemonConfigLayout::SystemdDropIn.render(&context()?)?;
        let files = config.files();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, "/etc/docker/machine.env");
        assert_eq!(
            files[1].path,
            "/etc/systemd/system/docker.service.d/10-machine.conf"
        );
        assert!(files[1]
            .contents
            .contains("EnvironmentFile=/etc/docker/machine.env"));
        assert!(!files[1].contents.contains("--tlsverify"));
        Ok(())
    }

    #[test]
    fn test_both_shapes_carry_identical_flags() -> anyhow::Result<()> {
        let context = context()?;
        let systemd = DaemonConfigLayout::SystemdDropIn.render(&context)?;
        let flat =
            DaemonConfigLayout::Flat("/var/lib/boot2docker/profile".into()).render(&context)?;

        assert_eq!(flat.files().len(), 1);
        assert_eq!(systemd.flag_file().contents, flat.flag_file().contents);

        let contents = &flat.flag_file().contents;
        for expected in [
            "-H tcp://0.0.0.0:2377",
            "-H unix:///var/run/docker.sock",
            "--storage-driver overlay2",
            "--tlsverify",
            "--tlscacert /etc/docker/ca.pem",
            "--tlscert /etc/docker/server.pem",
            "--tlskey /etc/docker/server-key.pem",
            "--label tier=db",
            "--insecure-registry registry.local:5000",
            "--debug",
        ] {
            assert!(contents.contains(expected), "missing {expected} in {contents}");
        }
        assert!(contents.ends_with("HTTP_PROXY=http://proxy:3128\n"));
        Ok(())
    }

    #[test]
    fn test_configured_storage_driver_wins() -> anyhow::Result<()> {
        let auth = AuthOptions::for_cert_dir("/tmp/certs");
        let engine = EngineOptions::builder().storage_driver("btrfs").build();
        let context = EngineConfigContext::new(auth, engine, "/etc/docker");
        assert_eq!(context.storage_driver(), "btrfs");
        Ok(())
    }
}
