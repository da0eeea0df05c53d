//! `machutils::path` is a module containing helpers for paths on remote unix hosts.

use typed_path::{Utf8UnixComponent, Utf8UnixPathBuf};

use crate::{MachutilsError, MachutilsResult};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Normalizes an absolute path on a remote unix host.
///
/// `.` components and duplicate separators are dropped and `..` is resolved. Relative paths and
/// paths that climb above `/` are rejected, since every file the provisioner writes must land at a
/// predictable location.
pub fn normalize_remote_path(path: &str) -> MachutilsResult<String> {
    if path.is_empty() {
        return Err(MachutilsError::PathValidation(
            "remote path cannot be empty".to_string(),
        ));
    }

    let path = Utf8UnixPathBuf::from(path);
    if !path.is_absolute() {
        return Err(MachutilsError::PathValidation(format!(
            "remote path must be absolute: {path}"
        )));
    }

    let mut parts: Vec<&str> = Vec::new();
    for component in path.components() {
        match component {
            Utf8UnixComponent::RootDir | Utf8UnixComponent::CurDir => continue,
            Utf8UnixComponent::ParentDir => {
                if parts.pop().is_none() {
                    return Err(MachutilsError::PathValidation(format!(
                        "remote path traverses above root: {path}"
                    )));
                }
            }
            Utf8UnixComponent::Normal(c) => parts.push(c),
        }
    }

    Ok(format!("/{}", parts.join("/")))
}

/// Joins a file name onto a remote directory and normalizes the result.
pub fn remote_join(dir: &str, file: &str) -> MachutilsResult<String> {
    if file.starts_with('/') {
        return Err(MachutilsError::PathValidation(format!(
            "cannot join absolute path {file} onto {dir}"
        )));
    }

    normalize_remote_path(&format!("{dir}/{file}"))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
