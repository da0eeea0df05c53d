use futures::future::join_all;
use serde::Serialize;

use crate::{host::HostState, MachineResult};

use super::Dispatcher;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// One row of a host listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostListing {
    /// The host name.
    pub name: String,

    /// The backend driver.
    pub driver_name: String,

    /// The live state, or the cached one if the backend could not be asked.
    pub state: HostState,

    /// The engine URL, empty when the host has no address.
    pub url: String,

    /// Why the live state could not be read.
    pub error: Option<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Dispatcher {
    /// The live state of a host.
    pub async fn state(&self, name: &str) -> MachineResult<HostState> {
        let (_, driver) = self.driver(name).await?;
        driver.get_state().await
    }

    /// The address of a running host.
    pub async fn ip(&self, name: &str) -> MachineResult<String> {
        let (_, driver) = self.driver(name).await?;
        driver.get_ip().await
    }

    /// The engine URL of a running host.
    pub async fn url(&self, name: &str) -> MachineResult<String> {
        let (_, driver) = self.driver(name).await?;
        driver.get_url().await
    }

    /// Lists every stored host with its live state, asking all backends concurrently.
    pub async fn list(&self) -> MachineResult<Vec<HostListing>> {
        let names = self.store().list().await?;
        let listings = join_all(names.iter().map(|name| self.listing(name))).await;
        listings.into_iter().collect()
    }

    async fn listing(&self, name: &str) -> MachineResult<HostListing> {
        let (host, driver) = self.driver(name).await?;
        let mut listing = HostListing {
            name: name.to_string(),
            driver_name: host.get_driver_name().clone(),
            state: *host.get_state(),
            url: String::new(),
            error: None,
        };

        match driver.get_state().await {
            Ok(state) => {
                listing.state = state;
                if state == HostState::Running {
                    listing.url = driver.get_url().await.unwrap_or_default();
                }
            }
            Err(e) => listing.error = Some(e.to_string()),
        }

        Ok(listing)
    }
}
