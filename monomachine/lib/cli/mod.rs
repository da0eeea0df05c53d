//! Command-line interface and argument parsing.

mod args;
mod resolve;
mod styles;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use args::*;
pub use resolve::*;
pub use styles::*;
