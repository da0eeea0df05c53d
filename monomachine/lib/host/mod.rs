//! Hosts, their lifecycle states and their persistence.

mod host;
mod state;
mod store;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use host::*;
pub use state::*;
pub use store::*;
