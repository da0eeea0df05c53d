//! The configuration surface a driver declares for host creation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{MachineError, MachineResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A value of a create flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagValue {
    /// A boolean switch.
    Bool(bool),

    /// An integer.
    Int(i64),

    /// A list of strings, given by repeating the flag.
    StringSlice(Vec<String>),

    /// A string.
    String(String),
}

/// The kind of value a flag takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagKind {
    /// See [`FlagValue::Bool`].
    Bool,

    /// See [`FlagValue::Int`].
    Int,

    /// See [`FlagValue::StringSlice`].
    StringSlice,

    /// See [`FlagValue::String`].
    String,
}

/// Describes one option a driver accepts at creation time.
///
/// This is metadata only. Reading environment variables and applying defaults happens before a
/// driver sees its [`DriverOptions`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateFlag {
    /// The flag name, e.g. `vmwarevsphere-cpu-count`.
    pub name: String,

    /// The environment variable that may provide the value.
    pub env_var: Option<String>,

    /// A one-line description.
    pub usage: String,

    /// The value used when neither the flag nor the environment variable is set.
    pub default: FlagValue,
}

/// Resolved create options, keyed by flag name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverOptions {
    values: HashMap<String, FlagValue>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl FlagValue {
    /// The kind of this value.
    pub fn kind(&self) -> FlagKind {
        match self {
            FlagValue::Bool(_) => FlagKind::Bool,
            FlagValue::Int(_) => FlagKind::Int,
            FlagValue::StringSlice(_) => FlagKind::StringSlice,
            FlagValue::String(_) => FlagKind::String,
        }
    }

    /// Parses raw text into a value of the given kind.
    ///
    /// String slices are split on commas so that environment variables can carry several values.
    pub fn parse(kind: FlagKind, raw: &str) -> MachineResult<FlagValue> {
        match kind {
            FlagKind::Bool => match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(FlagValue::Bool(true)),
                "0" | "false" | "no" | "off" | "" => Ok(FlagValue::Bool(false)),
                other => Err(MachineError::InvalidConfig(format!(
                    "invalid boolean value: {other}"
                ))),
            },
            FlagKind::Int => raw
                .trim()
                .parse()
                .map(FlagValue::Int)
                .map_err(|e| MachineError::InvalidConfig(format!("invalid integer {raw}: {e}"))),
            FlagKind::StringSlice => Ok(FlagValue::StringSlice(
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect(),
            )),
            FlagKind::String => Ok(FlagValue::String(raw.to_string())),
        }
    }
}

impl CreateFlag {
    /// A string flag.
    pub fn string(name: &str, env_var: &str, usage: &str, default: &str) -> Self {
        Self::new(name, env_var, usage, FlagValue::String(default.to_string()))
    }

    /// An integer flag.
    pub fn int(name: &str, env_var: &str, usage: &str, default: i64) -> Self {
        Self::new(name, env_var, usage, FlagValue::Int(default))
    }

    /// A repeatable string flag.
    pub fn string_slice(name: &str, env_var: &str, usage: &str) -> Self {
        Self::new(name, env_var, usage, FlagValue::StringSlice(Vec::new()))
    }

    /// A boolean flag.
    pub fn bool(name: &str, env_var: &str, usage: &str) -> Self {
        Self::new(name, env_var, usage, FlagValue::Bool(false))
    }

    fn new(name: &str, env_var: &str, usage: &str, default: FlagValue) -> Self {
        Self {
            name: name.to_string(),
            env_var: (!env_var.is_empty()).then(|| env_var.to_string()),
            usage: usage.to_string(),
            default,
        }
    }
}

impl DriverOptions {
    /// Creates empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a value.
    pub fn set(&mut self, name: impl Into<String>, value: FlagValue) -> &mut Self {
        self.values.insert(name.into(), value);
        self
    }

    /// Builder-style [`DriverOptions::set`].
    pub fn with(mut self, name: impl Into<String>, value: FlagValue) -> Self {
        self.set(name, value);
        self
    }

    /// Whether a value is present.
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// A string value, empty when absent.
    pub fn get_string(&self, name: &str) -> MachineResult<String> {
        match self.values.get(name) {
            None => Ok(String::new()),
            Some(FlagValue::String(value)) => Ok(value.clone()),
            Some(other) => Err(mismatch(name, FlagKind::String, other)),
        }
    }

    /// An integer value, zero when absent.
    pub fn get_int(&self, name: &str) -> MachineResult<i64> {
        match self.values.get(name) {
            None => Ok(0),
            Some(FlagValue::Int(value)) => Ok(*value),
            Some(other) => Err(mismatch(name, FlagKind::Int, other)),
        }
    }

    /// A string list value, empty when absent.
    pub fn get_string_slice(&self, name: &str) -> MachineResult<Vec<String>> {
        match self.values.get(name) {
            None => Ok(Vec::new()),
            Some(FlagValue::StringSlice(value)) => Ok(value.clone()),
            Some(FlagValue::String(value)) => Ok(vec![value.clone()]),
            Some(other) => Err(mismatch(name, FlagKind::StringSlice, other)),
        }
    }

    /// A boolean value, false when absent.
    pub fn get_bool(&self, name: &str) -> MachineResult<bool> {
        match self.values.get(name) {
            None => Ok(false),
            Some(FlagValue::Bool(value)) => Ok(*value),
            Some(other) => Err(mismatch(name, FlagKind::Bool, other)),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn mismatch(name: &str, expected: FlagKind, found: &FlagValue) -> MachineError {
    MachineError::InvalidConfig(format!(
        "option {name} expects {expected:?}, got {:?}",
        found.kind()
    ))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_options_typed_access() -> anyhow::Result<()> {
        let options = DriverOptions::new()
            .with("cpu-count", FlagValue::Int(4))
            .with("network", FlagValue::StringSlice(vec!["a".into(), "b".into()]))
            .with("folder", FlagValue::String("vms".into()));

        assert_eq!(options.get_int("cpu-count")?, 4);
        assert_eq!(options.get_string_slice("network")?, ["a", "b"]);
        assert_eq!(options.get_string_slice("folder")?, ["vms"]);
        assert_eq!(options.get_string("missing")?, "");
        assert!(!options.get_bool("missing")?);
        assert!(matches!(
            options.get_int("folder"),
            Err(MachineError::InvalidConfig(_))
        ));
        Ok(())
    }

    #[test]
    fn test_flag_value_parse() -> anyhow::Result<()> {
        assert_eq!(FlagValue::parse(FlagKind::Int, " 2048 ")?, FlagValue::Int(2048));
        assert_eq!(FlagValue::parse(FlagKind::Bool, "yes")?, FlagValue::Bool(true));
        assert_eq!(
            FlagValue::parse(FlagKind::StringSlice, "VM Network, Backup,")?,
            FlagValue::StringSlice(vec!["VM Network".into(), "Backup".into()])
        );
        assert!(FlagValue::parse(FlagKind::Int, "many").is_err());
        assert!(FlagValue::parse(FlagKind::Bool, "maybe").is_err());
        Ok(())
    }

    #[test]
    fn test_create_flag_without_env_var() {
        let flag = CreateFlag::string("name", "", "usage", "x");
        assert_eq!(flag.env_var, None);
        assert_eq!(flag.default.kind(), FlagKind::String);
    }
}
