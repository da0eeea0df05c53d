use std::fmt;

use machutils::shell_quote;
use serde::{Deserialize, Serialize};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// What to do with a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageAction {
    /// Install the package.
    Install,

    /// Remove the package.
    Remove,

    /// Upgrade the package to the latest version.
    Upgrade,
}

/// A distribution's native package manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    /// Debian and derivatives.
    Apt,

    /// Older Red Hat derivatives.
    Yum,

    /// Fedora and newer Red Hat derivatives.
    Dnf,

    /// Arch Linux.
    Pacman,

    /// Immutable images that bundle everything at build time.
    None,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl PackageManager {
    /// The command that applies `action` to `name`, or `None` when packages are not managed.
    pub fn command(&self, name: &str, action: PackageAction) -> Option<String> {
        let name = shell_quote(name);
        let command = match (self, action) {
            (PackageManager::None, _) => return None,
            (PackageManager::Apt, PackageAction::Remove) => {
                format!("sudo DEBIAN_FRONTEND=noninteractive apt-get remove -y {name}")
            }
            (PackageManager::Apt, _) => format!(
                "sudo apt-get update && sudo DEBIAN_FRONTEND=noninteractive apt-get install -y \
                 -o Dpkg::Options::=--force-confnew {name}"
            ),
            (PackageManager::Yum | PackageManager::Dnf, action) => {
                let verb = match action {
                    PackageAction::Install => "install",
                    PackageAction::Remove => "remove",
                    PackageAction::Upgrade => "upgrade",
                };
                format!("sudo -E {self} {verb} -y {name}")
            }
            (PackageManager::Pacman, PackageAction::Install) => {
                format!("sudo pacman -Sy --noconfirm --needed {name}")
            }
            (PackageManager::Pacman, PackageAction::Upgrade) => {
                format!("sudo pacman -Sy --noconfirm {name}")
            }
            (PackageManager::Pacman, PackageAction::Remove) => {
                format!("sudo pacman -R --noconfirm {name}")
            }
        };
        Some(command)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PackageManager::Apt => "apt-get",
            PackageManager::Yum => "yum",
            PackageManager::Dnf => "dnf",
            PackageManager::Pacman => "pacman",
            PackageManager::None => "none",
        })
    }
}

impl fmt::Display for PackageAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PackageAction::Install => "install",
            PackageAction::Remove => "remove",
            PackageAction::Upgrade => "upgrade",
        })
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_commands() {
        assert_eq!(
            PackageManager::Dnf.command("docker-ce", PackageAction::Upgrade),
            Some("sudo -E dnf upgrade -y docker-ce".to_string())
        );
        assert_eq!(
            PackageManager::Pacman.command("curl", PackageAction::Install),
            Some("sudo pacman -Sy --noconfirm --needed curl".to_string())
        );
        assert!(PackageManager::Apt
            .command("curl", PackageAction::Install)
            .is_some_and(|c| c.starts_with("sudo apt-get update && ")));
        assert_eq!(PackageManager::None.command("curl", PackageAction::Install), None);
    }
}
