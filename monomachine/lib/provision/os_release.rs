use std::{fmt, str::FromStr};

use getset::Getters;
use serde::{Deserialize, Serialize};

use crate::MachineError;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The identity of a Linux distribution as described by `/etc/os-release`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Getters)]
#[getset(get = "pub with_prefix")]
pub struct OsRelease {
    /// `ID`, lowercased.
    id: String,

    /// `ID_LIKE`, split into lowercased family tokens.
    id_like: Vec<String>,

    /// `NAME`.
    name: String,

    /// `VERSION_ID`.
    version_id: String,

    /// `PRETTY_NAME`.
    pretty_name: String,
}

/// The process running as PID 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InitSystem {
    /// systemd, which supports drop-in unit overrides.
    Systemd,

    /// Anything else, by process name.
    Other(String),
}

/// What the read-only identity commands learned about a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    /// The distribution identity.
    pub os_release: OsRelease,

    /// The init system.
    pub init_system: InitSystem,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl OsRelease {
    /// A release with just an id, mostly for tests.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into().to_lowercase(),
            ..Default::default()
        }
    }

    /// Adds `ID_LIKE` family tokens.
    pub fn with_id_like<S: AsRef<str>>(mut self, families: impl IntoIterator<Item = S>) -> Self {
        self.id_like = families
            .into_iter()
            .map(|family| family.as_ref().to_lowercase())
            .collect();
        self
    }

    /// A human-readable name, preferring `PRETTY_NAME`.
    pub fn display_name(&self) -> &str {
        [&self.pretty_name, &self.name, &self.id]
            .into_iter()
            .find(|s| !s.is_empty())
            .map(String::as_str)
            .unwrap_or("unknown")
    }
}

impl InitSystem {
    /// Interprets the contents of `/proc/1/comm`.
    pub fn from_comm(comm: &str) -> Self {
        match comm.trim() {
            "systemd" => InitSystem::Systemd,
            other => InitSystem::Other(other.to_string()),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn unquote(value: &str) -> String {
    let value = value.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|v| v.strip_suffix(quote))
        {
            return inner.replace(&format!("\\{quote}"), &quote.to_string());
        }
    }
    value.to_string()
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl FromStr for OsRelease {
    type Err = MachineError;

    /// Parses `KEY=value` lines. Comments, blank lines and unknown keys are skipped.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut release = OsRelease::default();
        for line in s.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                tracing::debug!("skipping malformed os-release line: {line}");
                continue;
            };

            let value = unquote(value);
            match key.trim() {
                "ID" => release.id = value.to_lowercase(),
                "ID_LIKE" => {
                    release.id_like = value
                        .split_whitespace()
                        .map(str::to_lowercase)
                        .collect()
                }
                "NAME" => release.name = value,
                "VERSION_ID" => release.version_id = value,
                "PRETTY_NAME" => release.pretty_name = value,
                _ => {}
            }
        }

        Ok(release)
    }
}

impl fmt::Display for InitSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitSystem::Systemd => f.write_str("systemd"),
            InitSystem::Other(name) => f.write_str(name),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
