use std::path::{Path, PathBuf};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The directory under the user's home directory where monomachine data is stored.
pub const MONOMACHINE_HOME_DIR: &str = ".monomachine";

/// The environment variable that overrides the monomachine home directory.
pub const MONOMACHINE_HOME_ENV_VAR: &str = "MONOMACHINE_HOME";

/// The sub directory holding one directory per host.
pub const MACHINES_SUBDIR: &str = "machines";

/// The sub directory of a host directory holding its certificates.
pub const CERTS_SUBDIR: &str = "certs";

/// The sub directory holding downloaded boot images.
pub const CACHE_SUBDIR: &str = "cache";

/// The filename of a persisted host record.
pub const HOST_CONFIG_FILENAME: &str = "config.json";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// The directory holding all files that belong to one host.
pub fn machine_dir(home: impl AsRef<Path>, name: &str) -> PathBuf {
    home.as_ref().join(MACHINES_SUBDIR).join(name)
}

/// The per-host certificate directory.
///
/// Certificates are scoped per host so concurrent provisioning of different hosts never writes
/// the same files.
pub fn machine_cert_dir(home: impl AsRef<Path>, name: &str) -> PathBuf {
    machine_dir(home, name).join(CERTS_SUBDIR)
}
