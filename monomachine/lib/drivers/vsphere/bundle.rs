//! The boot2docker `userdata.tar` that carries the machine's SSH key into the guest.

use std::path::{Path, PathBuf};

use tar::{Builder, EntryType, Header};

use crate::MachineResult;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The first entry of the bundle. boot2docker uses it to recognize who wrote the archive.
pub const BUNDLE_MAGIC: &str = "boot2docker, this is vmware speaking";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Writes the key bundle for `public_key_path` to `bundle_path`.
///
/// The archive holds the magic entry, a `.ssh` directory (0700) and the public key as both
/// `.ssh/authorized_keys` and `.ssh/authorized_keys2` (0644).
pub async fn write_key_bundle(public_key_path: &Path, bundle_path: &Path) -> MachineResult<()> {
    tracing::debug!("creating key bundle {}", bundle_path.display());

    let public_key = tokio::fs::read(public_key_path).await?;
    let bundle_path: PathBuf = bundle_path.to_path_buf();

    tokio::task::spawn_blocking(move || -> MachineResult<()> {
        let file = std::fs::File::create(&bundle_path)?;
        let mut tar = Builder::new(file);

        append_file(&mut tar, BUNDLE_MAGIC, BUNDLE_MAGIC.as_bytes(), 0o644)?;

        let mut dir = Header::new_gnu();
        dir.set_entry_type(EntryType::Directory);
        dir.set_mode(0o700);
        dir.set_size(0);
        tar.append_data(&mut dir, ".ssh", std::io::empty())?;

        append_file(&mut tar, ".ssh/authorized_keys", &public_key, 0o644)?;
        append_file(&mut tar, ".ssh/authorized_keys2", &public_key, 0o644)?;

        tar.into_inner()?;
        Ok(())
    })
    .await??;

    Ok(())
}

fn append_file<W: std::io::Write>(
    tar: &mut Builder<W>,
    name: &str,
    contents: &[u8],
    mode: u32,
) -> MachineResult<()> {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_mode(mode);
    header.set_size(contents.len() as u64);
    tar.append_data(&mut header, name, contents)?;
    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    #[test_log::test(tokio::test)]
    async fn test_key_bundle_layout() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let public_key = dir.path().join("id_ed25519.pub");
        let bundle = dir.path().join("userdata.tar");
        tokio::fs::write(&public_key, "ssh-ed25519 AAAA test@dev\n").await?;

        write_key_bundle(&public_key, &bundle).await?;

        let mut archive = tar::Archive::new(std::fs::File::open(&bundle)?);
        let mut entries = Vec::new();
        for entry in archive.entries()? {
            let mut entry = entry?;
            let path = entry.path()?.to_string_lossy().trim_end_matches('/').to_string();
            let mode = entry.header().mode()?;
            let mut contents = String::new();
            entry.read_to_string(&mut contents)?;
            entries.push((path, mode, contents));
        }

        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0], (BUNDLE_MAGIC.to_string(), 0o644, BUNDLE_MAGIC.to_string()));
        assert_eq!(entries[1].0, ".ssh");
        assert_eq!(entries[1].1, 0o700);
        assert_eq!(entries[2].0, ".ssh/authorized_keys");
        assert_eq!(entries[3].0, ".ssh/authorized_keys2");
        assert_eq!(entries[3].2, "ssh-ed25519 AAAA test@dev\n");
        Ok(())
    }
}
