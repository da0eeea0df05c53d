//! `monomachine` creates virtual machines on pluggable backends and provisions them to run a
//! container engine.
//!
//! # Overview
//!
//! A host goes through two independent halves:
//! - A driver owns the machine on its backend: create, power, destroy, state and address.
//! - A provisioner owns the operating system inside it: engine install, TLS, daemon configuration,
//!   swarm membership and firewall.
//!
//! The [`dispatch::Dispatcher`] ties both together and runs lifecycle actions across many hosts
//! at once, reporting each host's outcome separately.
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use monomachine::{
//!     config::{AuthOptions, HostOptions},
//!     dispatch::{Dispatcher, LifecycleAction},
//!     drivers::{BuiltinDrivers, DriverOptions},
//!     host::FileHostStore,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let dispatcher = Dispatcher::builder()
//!         .store(Arc::new(FileHostStore::new("/path/to/home")))
//!         .drivers(Arc::new(BuiltinDrivers::new("/path/to/home")))
//!         .build();
//!
//!     let options = HostOptions::builder()
//!         .auth(AuthOptions::for_cert_dir("/path/to/home/machines/dev/certs"))
//!         .build();
//!     dispatcher
//!         .prepare_host("dev", "generic", &DriverOptions::new(), options)
//!         .await?;
//!
//!     dispatcher
//!         .run(LifecycleAction::Create, &["dev".to_string()])
//!         .await
//!         .into_result()?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`cli`] - Command-line interface and argument parsing
//! - [`config`] - Engine, swarm and certificate options and defaults
//! - [`dispatch`] - Lifecycle actions across batches of hosts
//! - [`drivers`] - Machine drivers and their create flags
//! - [`host`] - Host records, states and stores
//! - [`provision`] - Operating system detection and the provisioning pipeline
//! - [`remote`] - Remote command channels
//! - [`tls`] - Certificate authority and engine certificates
//! - [`utils`] - Paths and environment helpers

#![warn(missing_docs)]
#![allow(clippy::module_inception)]

mod error;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod cli;
pub mod config;
pub mod dispatch;
pub mod drivers;
pub mod host;
pub mod provision;
pub mod remote;
pub mod tls;
pub mod utils;

pub use error::*;
