//! `machutils` is a library containing general utilities for the monomachine project.

#![warn(missing_docs)]
#![allow(clippy::module_inception)]

pub mod error;
pub mod path;
pub mod poll;
pub mod shell;
pub mod term;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use error::*;
pub use path::*;
pub use poll::*;
pub use shell::*;
