use std::{
    fmt,
    sync::{Arc, OnceLock},
};

use crate::{MachineError, MachineResult};

use super::{
    Boot2DockerProvisioner, CosProvisioner, Detection, InitSystem, OsRelease, ProvisionTarget,
    Provisioner, SystemdProvisioner, BOOT2DOCKER_NAME, COS_NAME, SYSTEMD_FALLBACK_NAME,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Reads the distribution identity.
pub const OS_RELEASE_COMMAND: &str = "cat /etc/os-release";

/// Reads the name of PID 1.
pub const INIT_SYSTEM_COMMAND: &str = "cat /proc/1/comm";

static REGISTRY: OnceLock<Arc<ProvisionerRegistry>> = OnceLock::new();

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Builds a provisioner.
pub type ProvisionerConstructor = fn() -> Box<dyn Provisioner>;

/// When a registered provisioner applies to a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchRule {
    /// The os-release `ID` is this value, or `ID_LIKE` names it as a family.
    OsId(String),

    /// No distribution matched and PID 1 is this init system.
    InitSystem(InitSystem),
}

/// A provisioner known to the registry.
#[derive(Clone)]
pub struct RegisteredProvisioner {
    name: String,
    rule: MatchRule,
    constructor: ProvisionerConstructor,
}

/// All provisioners available to detection, in registration order.
///
/// Built once at startup with [`init_registry`] and read-only afterwards.
#[derive(Clone, Default)]
pub struct ProvisionerRegistry {
    entries: Vec<RegisteredProvisioner>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ProvisionerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The provisioners shipped with monomachine.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry
            .register("ubuntu", MatchRule::OsId("ubuntu".into()), || {
                Box::new(SystemdProvisioner::ubuntu())
            })
            .register("debian", MatchRule::OsId("debian".into()), || {
                Box::new(SystemdProvisioner::debian())
            })
            .register("centos", MatchRule::OsId("centos".into()), || {
                Box::new(SystemdProvisioner::centos())
            })
            .register("rhel", MatchRule::OsId("rhel".into()), || {
                Box::new(SystemdProvisioner::rhel())
            })
            .register("fedora", MatchRule::OsId("fedora".into()), || {
                Box::new(SystemdProvisioner::fedora())
            })
            .register("arch", MatchRule::OsId("arch".into()), || {
                Box::new(SystemdProvisioner::arch())
            })
            .register(COS_NAME, MatchRule::OsId(COS_NAME.into()), || {
                Box::new(CosProvisioner::new())
            })
            .register(BOOT2DOCKER_NAME, MatchRule::OsId(BOOT2DOCKER_NAME.into()), || {
                Box::new(Boot2DockerProvisioner::new())
            })
            .register(
                SYSTEMD_FALLBACK_NAME,
                MatchRule::InitSystem(InitSystem::Systemd),
                || Box::new(SystemdProvisioner::fallback()),
            );
        registry
    }

    /// Adds a provisioner. Earlier registrations win ties within a tier.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        rule: MatchRule,
        constructor: ProvisionerConstructor,
    ) -> &mut Self {
        self.entries.push(RegisteredProvisioner {
            name: name.into(),
            rule,
            constructor,
        });
        self
    }

    /// The registered names, in order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// Picks the best provisioner for a detected host.
    ///
    /// An exact `ID` match wins over an `ID_LIKE` family match, which wins over an init system
    /// fallback. Families are tried in the order `ID_LIKE` lists them.
    pub fn select(&self, detection: &Detection) -> MachineResult<Box<dyn Provisioner>> {
        let release = &detection.os_release;
        let by_id = |id: &str| {
            self.entries
                .iter()
                .find(|e| !id.is_empty() && e.rule == MatchRule::OsId(id.to_string()))
        };

        let entry = by_id(release.get_id())
            .or_else(|| release.get_id_like().iter().find_map(|family| by_id(family)))
            .or_else(|| {
                self.entries
                    .iter()
                    .find(|e| e.rule == MatchRule::InitSystem(detection.init_system.clone()))
            });

        match entry {
            Some(entry) => {
                tracing::info!(
                    "detected {} (init: {}), using the {} provisioner",
                    release.display_name(),
                    detection.init_system,
                    entry.name
                );
                Ok((entry.constructor)())
            }
            None => Err(MachineError::UnknownOperatingSystem(format!(
                "{} (id: {:?}, like: {:?}, init: {})",
                release.display_name(),
                release.get_id(),
                release.get_id_like(),
                detection.init_system
            ))),
        }
    }

    /// Identifies the target and picks its provisioner. Only read-only commands are run.
    pub async fn detect(&self, target: &ProvisionTarget) -> MachineResult<Box<dyn Provisioner>> {
        let detection = identify(target).await?;
        self.select(&detection)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Reads the target's os-release and init system.
///
/// A read that fails on the host yields an empty result rather than an error, so an unreadable
/// `/etc/os-release` ends in `UnknownOperatingSystem` unless the init system still matches.
pub async fn identify(target: &ProvisionTarget) -> MachineResult<Detection> {
    let os_release = match target.run(OS_RELEASE_COMMAND).await {
        Ok(output) => output.parse()?,
        Err(MachineError::CommandFailed { output, .. }) => {
            tracing::debug!("reading os-release failed: {output}");
            OsRelease::default()
        }
        Err(e) => return Err(e),
    };

    let init_system = match target.run(INIT_SYSTEM_COMMAND).await {
        Ok(output) => InitSystem::from_comm(&output),
        Err(MachineError::CommandFailed { output, .. }) => {
            tracing::debug!("reading the init system failed: {output}");
            InitSystem::Other(String::new())
        }
        Err(e) => return Err(e),
    };

    Ok(Detection {
        os_release,
        init_system,
    })
}

/// Installs the process-wide registry. Fails if one is installed already.
pub fn init_registry(registry: ProvisionerRegistry) -> MachineResult<Arc<ProvisionerRegistry>> {
    let registry = Arc::new(registry);
    REGISTRY
        .set(registry.clone())
        .map_err(|_| {
            MachineError::InvalidConfig("provisioner registry is already initialized".into())
        })?;
    Ok(registry)
}

/// The process-wide registry, installing the defaults if [`init_registry`] was never called.
pub fn registry() -> Arc<ProvisionerRegistry> {
    REGISTRY
        .get_or_init(|| Arc::new(ProvisionerRegistry::with_defaults()))
        .clone()
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Debug for RegisteredProvisioner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredProvisioner")
            .field("name", &self.name)
            .field("rule", &self.rule)
            .finish()
    }
}

impl fmt::Debug for ProvisionerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.entries).finish()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
