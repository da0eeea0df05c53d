//! Engine, swarm and certificate options carried by every host.

use std::path::{Path, PathBuf};

use getset::{Getters, Setters};
use machutils::remote_join;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::MachineResult;

use super::{
    DEFAULT_ENGINE_INSTALL_URL, DEFAULT_ENGINE_PORT, DEFAULT_SWARM_IMAGE,
    DEFAULT_SWARM_MASTER_PORT, DEFAULT_SWARM_STRATEGY,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const CA_CERT_FILENAME: &str = "ca.pem";
const CA_KEY_FILENAME: &str = "ca-key.pem";
const CLIENT_CERT_FILENAME: &str = "cert.pem";
const CLIENT_KEY_FILENAME: &str = "key.pem";
const SERVER_CERT_FILENAME: &str = "server.pem";
const SERVER_KEY_FILENAME: &str = "server-key.pem";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Options for the container engine installed on a host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder, Getters, Setters)]
#[getset(get = "pub with_prefix", set = "pub with_prefix")]
pub struct EngineOptions {
    /// The port the engine listens on.
    #[serde(default = "EngineOptions::default_port")]
    #[builder(default = DEFAULT_ENGINE_PORT)]
    port: u16,

    /// The storage driver. Provisioners fill in their default when this is empty.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default, setter(strip_option, into))]
    storage_driver: Option<String>,

    /// Engine labels in `key=value` form.
    #[serde(default)]
    #[builder(default)]
    labels: Vec<String>,

    /// Registries the engine may reach without TLS.
    #[serde(default)]
    #[builder(default)]
    insecure_registries: Vec<String>,

    /// Registry mirrors.
    #[serde(default)]
    #[builder(default)]
    registry_mirrors: Vec<String>,

    /// Additional daemon flags, given without the leading `--`.
    #[serde(default)]
    #[builder(default)]
    arbitrary_flags: Vec<String>,

    /// Environment variables for the daemon in `KEY=value` form.
    #[serde(default)]
    #[builder(default)]
    env: Vec<String>,

    /// The script used to install the engine on package-capable hosts.
    #[serde(default = "EngineOptions::default_install_url")]
    #[builder(default = DEFAULT_ENGINE_INSTALL_URL.to_string(), setter(into))]
    install_url: String,
}

/// Options for joining a host to a swarm cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
pub struct SwarmOptions {
    /// Whether the host joins a swarm at all.
    #[serde(default)]
    #[builder(default)]
    enabled: bool,

    /// Whether the host also runs the swarm master.
    #[serde(default)]
    #[builder(default)]
    master: bool,

    /// The discovery backend, e.g. `token://...` or `consul://...`.
    #[serde(default)]
    #[builder(default, setter(into))]
    discovery: String,

    /// The swarm image.
    #[serde(default = "SwarmOptions::default_image")]
    #[builder(default = DEFAULT_SWARM_IMAGE.to_string(), setter(into))]
    image: String,

    /// The scheduling strategy of the master.
    #[serde(default = "SwarmOptions::default_strategy")]
    #[builder(default = DEFAULT_SWARM_STRATEGY.to_string(), setter(into))]
    strategy: String,

    /// The port the master listens on.
    #[serde(default = "SwarmOptions::default_master_port")]
    #[builder(default = DEFAULT_SWARM_MASTER_PORT)]
    master_port: u16,

    /// Additional flags passed to `manage`.
    #[serde(default)]
    #[builder(default)]
    arbitrary_flags: Vec<String>,
}

/// Where the certificates of one host live, locally and on the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Getters)]
#[getset(get = "pub with_prefix")]
pub struct AuthOptions {
    /// The local directory holding this host's certificates.
    cert_dir: PathBuf,

    /// The local CA certificate.
    ca_cert_path: PathBuf,

    /// The local CA private key.
    ca_key_path: PathBuf,

    /// The local client certificate.
    client_cert_path: PathBuf,

    /// The local client private key.
    client_key_path: PathBuf,

    /// The local copy of the server certificate.
    server_cert_path: PathBuf,

    /// The local copy of the server private key.
    server_key_path: PathBuf,

    /// The CA certificate on the host.
    #[serde(default)]
    remote_ca_cert_path: String,

    /// The server certificate on the host.
    #[serde(default)]
    remote_server_cert_path: String,

    /// The server private key on the host.
    #[serde(default)]
    remote_server_key_path: String,

    /// Extra subject alternative names for the server certificate.
    #[serde(default)]
    server_cert_sans: Vec<String>,
}

/// Everything a host needs to be provisioned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
pub struct HostOptions {
    /// The engine options.
    #[builder(default)]
    engine: EngineOptions,

    /// The swarm options.
    #[builder(default)]
    swarm: SwarmOptions,

    /// The certificate layout.
    auth: AuthOptions,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl EngineOptions {
    fn default_port() -> u16 {
        DEFAULT_ENGINE_PORT
    }

    fn default_install_url() -> String {
        DEFAULT_ENGINE_INSTALL_URL.to_string()
    }
}

impl SwarmOptions {
    fn default_image() -> String {
        DEFAULT_SWARM_IMAGE.to_string()
    }

    fn default_strategy() -> String {
        DEFAULT_SWARM_STRATEGY.to_string()
    }

    fn default_master_port() -> u16 {
        DEFAULT_SWARM_MASTER_PORT
    }
}

impl AuthOptions {
    /// Creates the certificate layout for a local certificate directory.
    ///
    /// Remote paths stay empty until a provisioner places them with
    /// [`AuthOptions::with_remote_dir`].
    pub fn for_cert_dir(cert_dir: impl AsRef<Path>) -> Self {
        let cert_dir = cert_dir.as_ref().to_path_buf();
        Self {
            ca_cert_path: cert_dir.join(CA_CERT_FILENAME),
            ca_key_path: cert_dir.join(CA_KEY_FILENAME),
            client_cert_path: cert_dir.join(CLIENT_CERT_FILENAME),
            client_key_path: cert_dir.join(CLIENT_KEY_FILENAME),
            server_cert_path: cert_dir.join(SERVER_CERT_FILENAME),
            server_key_path: cert_dir.join(SERVER_KEY_FILENAME),
            cert_dir,
            remote_ca_cert_path: String::new(),
            remote_server_cert_path: String::new(),
            remote_server_key_path: String::new(),
            server_cert_sans: Vec::new(),
        }
    }

    /// Sets the extra subject alternative names for the server certificate.
    pub fn set_server_cert_sans(&mut self, sans: Vec<String>) -> &mut Self {
        self.server_cert_sans = sans;
        self
    }

    /// Returns a copy whose remote paths point into the daemon options directory.
    pub fn with_remote_dir(&self, options_dir: &str) -> MachineResult<Self> {
        let mut options = self.clone();
        options.remote_ca_cert_path = remote_join(options_dir, CA_CERT_FILENAME)?;
        options.remote_server_cert_path = remote_join(options_dir, SERVER_CERT_FILENAME)?;
        options.remote_server_key_path = remote_join(options_dir, SERVER_KEY_FILENAME)?;
        Ok(options)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for EngineOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Default for SwarmOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_options_layout() -> anyhow::Result<()> {
        let auth = AuthOptions::for_cert_dir("/home/me/.monomachine/machines/dev/certs");
        assert_eq!(
            auth.get_ca_cert_path(),
            Path::new("/home/me/.monomachine/machines/dev/certs/ca.pem")
        );
        assert!(auth.get_remote_ca_cert_path().is_empty());

        let remote = auth.with_remote_dir("/etc/docker/")?;
        assert_eq!(remote.get_remote_ca_cert_path(), "/etc/docker/ca.pem");
        assert_eq!(remote.get_remote_server_cert_path(), "/etc/docker/server.pem");
        assert_eq!(remote.get_remote_server_key_path(), "/etc/docker/server-key.pem");
        assert_eq!(remote.get_client_key_path(), auth.get_client_key_path());
        Ok(())
    }

    #[test]
    fn test_engine_options_deserialize_defaults() -> anyhow::Result<()> {
        let engine: EngineOptions = serde_json::from_str(r#"{"labels":["tier=db"]}"#)?;
        assert_eq!(*engine.get_port(), DEFAULT_ENGINE_PORT);
        assert_eq!(engine.get_install_url(), DEFAULT_ENGINE_INSTALL_URL);
        assert_eq!(engine.get_labels(), &vec!["tier=db".to_string()]);
        assert!(engine.get_storage_driver().is_none());
        Ok(())
    }
}
