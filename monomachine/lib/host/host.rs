use chrono::{DateTime, Utc};
use getset::Getters;
use serde::{Deserialize, Serialize};

use crate::config::HostOptions;

use super::HostState;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// One managed machine.
///
/// The network address and the SSH credentials belong to the driver and live inside
/// `driver_config`, which is opaque to everything but the driver that wrote it. A host has a
/// single writer at a time; callers serialize actions against the same host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Getters)]
#[getset(get = "pub with_prefix")]
pub struct Host {
    /// The unique name of the host.
    name: String,

    /// The name of the backend driver that owns the machine.
    driver_name: String,

    /// The driver's own serialized configuration.
    driver_config: serde_json::Value,

    /// The last state observed by a lifecycle action.
    #[serde(default)]
    state: HostState,

    /// Engine, swarm and certificate options.
    options: HostOptions,

    /// When the host record was created.
    created_at: DateTime<Utc>,

    /// When the host record was last modified.
    modified_at: DateTime<Utc>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Host {
    /// Creates a new host record.
    pub fn new(
        name: impl Into<String>,
        driver_name: impl Into<String>,
        driver_config: serde_json::Value,
        options: HostOptions,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            driver_name: driver_name.into(),
            driver_config,
            state: HostState::None,
            options,
            created_at: now,
            modified_at: now,
        }
    }

    /// Records the latest observed state.
    pub fn set_state(&mut self, state: HostState) {
        self.state = state;
        self.modified_at = Utc::now();
    }

    /// Replaces the driver configuration after an action changed it.
    pub fn set_driver_config(&mut self, driver_config: serde_json::Value) {
        self.driver_config = driver_config;
        self.modified_at = Utc::now();
    }

    /// Replaces the host options.
    pub fn set_options(&mut self, options: HostOptions) {
        self.options = options;
        self.modified_at = Utc::now();
    }
}
