//! Running shell commands on provisioned hosts.
//!
//! Everything above this module talks to a host through [`Commander`]. [`SshCommander`] opens an
//! SSH session authenticated with the host's key. [`FakeCommander`] answers from memory and
//! records every command, which is how the provisioning pipeline is tested without a live machine.

mod commander;
mod fake;
mod keygen;
mod ssh;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use commander::*;
pub use fake::*;
pub use keygen::*;
pub use ssh::*;
