//! Certificates for the engine's TLS endpoint.
//!
//! Every host gets its own CA under its machine directory. The CA signs a server certificate for
//! the engine and a client certificate for talking to it. The CA certificate and the server pair
//! are installed on the host; the CA key never leaves the local machine.

mod bootstrap;
mod certs;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use bootstrap::*;
pub use certs::*;
