use std::path::{Path, PathBuf};

use ssh_key::{rand_core::OsRng, Algorithm, LineEnding, PrivateKey};
use tokio::{fs, io::AsyncWriteExt};

use crate::{MachineError, MachineResult};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Generates an Ed25519 key pair at `path` (OpenSSH format, mode 0600) and `path.pub`.
///
/// An existing key is kept as is.
pub async fn generate_ssh_key(path: &Path) -> MachineResult<()> {
    if fs::try_exists(path).await? {
        tracing::debug!("reusing existing ssh key at {}", path.display());
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).map_err(key_error)?;
    let private = key.to_openssh(LineEnding::LF).map_err(key_error)?;
    let public = key.public_key().to_openssh().map_err(key_error)?;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
        .await?;
    file.write_all(private.as_bytes()).await?;
    file.flush().await?;

    fs::write(public_key_path(path), format!("{public}\n")).await?;
    Ok(())
}

/// The public half of the key at `path`.
pub fn public_key_path(path: &Path) -> PathBuf {
    let mut public = path.as_os_str().to_owned();
    public.push(".pub");
    PathBuf::from(public)
}

fn key_error(error: ssh_key::Error) -> MachineError {
    MachineError::custom(anyhow::anyhow!("ssh key generation failed: {error}"))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    #[test_log::test(tokio::test)]
    async fn test_generated_key_loads_for_authentication() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("machines/dev/id_ed25519");

        generate_ssh_key(&path).await?;

        russh_keys::load_secret_key(&path, None)?;
        let mode = fs::metadata(&path).await?.permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let public = fs::read_to_string(public_key_path(&path)).await?;
        assert!(public.starts_with("ssh-ed25519 "));
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_existing_key_is_kept() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("id_ed25519");
        fs::write(&path, "existing").await?;

        generate_ssh_key(&path).await?;

        assert_eq!(fs::read_to_string(&path).await?, "existing");
        assert!(!fs::try_exists(public_key_path(&path)).await?);
        Ok(())
    }
}
