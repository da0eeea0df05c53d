//! Machine drivers.
//!
//! A [`Driver`] owns one machine on one backend: it creates, powers and destroys it and reports
//! its state and address. Drivers never touch the operating system inside the machine; that is
//! the provisioner's job. [`DriverFactory`] builds drivers by backend name, either fresh for a
//! new machine or from a stored host record.

mod driver;
mod factory;
mod fake;
mod flags;
mod generic;
mod ip;
mod lifecycle;
mod not_supported;
pub mod vsphere;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use driver::*;
pub use factory::*;
pub use fake::*;
pub use flags::*;
pub use generic::*;
pub use ip::*;
pub use lifecycle::*;
pub use not_supported::*;
