use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use tokio::{fs, io::AsyncWriteExt, sync::Mutex};

use crate::{
    utils::{machine_dir, HOST_CONFIG_FILENAME, MACHINES_SUBDIR},
    MachineError, MachineResult,
};

use super::Host;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Persistence for host records.
#[async_trait]
pub trait HostStore: Send + Sync {
    /// Whether a host with this name exists.
    async fn exists(&self, name: &str) -> MachineResult<bool>;

    /// Loads a host record.
    async fn load(&self, name: &str) -> MachineResult<Host>;

    /// Creates or replaces a host record.
    async fn save(&self, host: &Host) -> MachineResult<()>;

    /// Deletes a host record and everything stored next to it.
    async fn remove(&self, name: &str) -> MachineResult<()>;

    /// Lists the names of all stored hosts, sorted.
    async fn list(&self) -> MachineResult<Vec<String>>;
}

/// Stores each host as `<home>/machines/<name>/config.json`.
#[derive(Debug, Clone)]
pub struct FileHostStore {
    home: PathBuf,
}

/// Keeps host records in memory.
#[derive(Debug, Default)]
pub struct MemoryHostStore {
    hosts: Mutex<BTreeMap<String, Host>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl FileHostStore {
    /// Creates a store rooted at the monomachine home directory.
    pub fn new(home: impl AsRef<Path>) -> Self {
        Self {
            home: home.as_ref().to_path_buf(),
        }
    }

    /// The monomachine home directory.
    pub fn get_home(&self) -> &Path {
        &self.home
    }

    fn config_path(&self, name: &str) -> PathBuf {
        machine_dir(&self.home, name).join(HOST_CONFIG_FILENAME)
    }
}

impl MemoryHostStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl HostStore for FileHostStore {
    async fn exists(&self, name: &str) -> MachineResult<bool> {
        Ok(fs::try_exists(self.config_path(name)).await?)
    }

    async fn load(&self, name: &str) -> MachineResult<Host> {
        let path = self.config_path(name);
        if !fs::try_exists(&path).await? {
            return Err(MachineError::HostNotFound(name.to_string()));
        }

        let contents = fs::read_to_string(&path).await?;
        Ok(serde_json::from_str(&contents)?)
    }

    async fn save(&self, host: &Host) -> MachineResult<()> {
        let dir = machine_dir(&self.home, host.get_name());
        fs::create_dir_all(&dir).await?;

        // Write then rename so a crash never leaves a truncated record behind.
        let tmp_path = dir.join(format!("{HOST_CONFIG_FILENAME}.tmp"));
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(serde_json::to_string_pretty(host)?.as_bytes())
            .await?;
        file.flush().await?;
        fs::rename(&tmp_path, dir.join(HOST_CONFIG_FILENAME)).await?;

        Ok(())
    }

    async fn remove(&self, name: &str) -> MachineResult<()> {
        let dir = machine_dir(&self.home, name);
        if !fs::try_exists(&dir).await? {
            return Err(MachineError::HostNotFound(name.to_string()));
        }

        fs::remove_dir_all(&dir).await?;
        Ok(())
    }

    async fn list(&self) -> MachineResult<Vec<String>> {
        let machines_dir = self.home.join(MACHINES_SUBDIR);
        if !fs::try_exists(&machines_dir).await? {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        let mut entries = fs::read_dir(&machines_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if fs::try_exists(entry.path().join(HOST_CONFIG_FILENAME)).await? {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }

        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl HostStore for MemoryHostStore {
    async fn exists(&self, name: &str) -> MachineResult<bool> {
        Ok(self.hosts.lock().await.contains_key(name))
    }

    async fn load(&self, name: &str) -> MachineResult<Host> {
        self.hosts
            .lock()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| MachineError::HostNotFound(name.to_string()))
    }

    async fn save(&self, host: &Host) -> MachineResult<()> {
        self.hosts
            .lock()
            .await
            .insert(host.get_name().clone(), host.clone());
        Ok(())
    }

    async fn remove(&self, name: &str) -> MachineResult<()> {
        self.hosts
            .lock()
            .await
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| MachineError::HostNotFound(name.to_string()))
    }

    async fn list(&self) -> MachineResult<Vec<String>> {
        Ok(self.hosts.lock().await.keys().cloned().collect())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        config::{AuthOptions, HostOptions},
        host::HostState,
    };

    fn test_host(home: &Path, name: &str) -> Host {
        let options = HostOptions::builder()
            .auth(AuthOptions::for_cert_dir(home.join(name).join("certs")))
            .build();
        Host::new(name, "generic", json!({ "ip_address": "10.0.0.5" }), options)
    }

    #[test_log::test(tokio::test)]
    async fn test_file_host_store_save_load_remove() -> anyhow::Result<()> {
        let home = tempfile::tempdir()?;
        let store = FileHostStore::new(home.path());

        let mut host = test_host(home.path(), "dev");
        host.set_state(HostState::Running);
        store.save(&host).await?;
        store.save(&test_host(home.path(), "alpha")).await?;

        assert!(store.exists("dev").await?);
        assert_eq!(store.load("dev").await?, host);
        assert_eq!(store.list().await?, vec!["alpha", "dev"]);

        store.remove("dev").await?;
        assert!(!store.exists("dev").await?);
        assert!(matches!(
            store.load("dev").await,
            Err(MachineError::HostNotFound(name)) if name == "dev"
        ));
        assert!(matches!(
            store.remove("dev").await,
            Err(MachineError::HostNotFound(_))
        ));
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_file_host_store_list_without_machines_dir() -> anyhow::Result<()> {
        let home = tempfile::tempdir()?;
        let store = FileHostStore::new(home.path().join("missing"));
        assert!(store.list().await?.is_empty());
        Ok(())
    }
}
