//! The VMware vSphere driver.
//!
//! Machines boot the boot2docker ISO, which is uploaded to the datastore next to the machine and
//! attached as a CD-ROM. The SSH key reaches the guest through VMware Tools guest operations as a
//! `userdata.tar` bundle. All control-plane access goes through [`VsphereConnector`].

mod bundle;
mod client;
mod config;
mod driver;
mod iso;
mod memory;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use bundle::*;
pub use client::*;
pub use config::*;
pub use driver::*;
pub use iso::*;
pub use memory::*;
