//! Lifecycle actions run concurrently across a batch of hosts.

mod action;
mod dispatcher;
mod query;
mod report;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use action::*;
pub use dispatcher::*;
pub use query::*;
pub use report::*;
