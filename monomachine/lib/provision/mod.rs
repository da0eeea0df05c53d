//! Engine provisioning.
//!
//! Once a machine runs, detection reads its distribution and init system and the
//! [`ProvisionerRegistry`] picks a [`Provisioner`]. Every provisioner runs the same pipeline from
//! [`GenericSteps`]: hostname, options directory, engine install where needed, TLS, daemon
//! configuration, swarm and firewall. What differs is the daemon configuration shape and how
//! packages and the engine service are handled.

mod boot2docker;
mod cos;
mod daemon;
mod generic;
mod os_release;
mod package;
mod provisioner;
mod registry;
mod step;
mod swarm;
mod systemd;
mod target;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use boot2docker::*;
pub use cos::*;
pub use daemon::*;
pub use generic::*;
pub use os_release::*;
pub use package::*;
pub use provisioner::*;
pub use registry::*;
pub use step::*;
pub use swarm::*;
pub use systemd::*;
pub use target::*;
