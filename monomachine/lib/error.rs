use std::{
    error::Error,
    fmt::{self, Display},
};

use machutils::MachutilsError;
use thiserror::Error;

use crate::{dispatch::BatchError, provision::ProvisionStep};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a monomachine-related operation.
pub type MachineResult<T> = Result<T, MachineError>;

/// An error that occurred while managing a host.
#[derive(pretty_error_debug::Debug, Error)]
pub enum MachineError {
    /// An address or state query was made while the backend reports anything but `Running`.
    #[error("host is not running: {0}")]
    HostNotRunning(String),

    /// Detection could not match the host's operating system to any registered provisioner.
    #[error("unknown operating system: {0}")]
    UnknownOperatingSystem(String),

    /// The virtualization control plane or the remote command channel could not be reached.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A step of the provisioning pipeline failed.
    #[error("provisioning step `{step}` failed: {source}")]
    ProvisioningStepFailed {
        /// The step that failed.
        step: ProvisionStep,

        /// The underlying cause.
        #[source]
        source: Box<MachineError>,
    },

    /// The backend reports the machine in its error state.
    #[error("host reported an error state: {0}")]
    HostErrorState(String),

    /// A bounded wait ran out of time before the target state was reached.
    #[error("timed out: {0}")]
    Timeout(String),

    /// A driver or provisioner deliberately declines an operation.
    #[error("{operation} is not supported by {driver}")]
    UnsupportedOperation {
        /// The driver or provisioner that declined.
        driver: String,

        /// The declined operation.
        operation: String,
    },

    /// A lifecycle action failed on some hosts of a batch.
    #[error(transparent)]
    Batch(#[from] BatchError),

    /// A backend resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// No host record exists with the given name.
    #[error("host does not exist: {0}")]
    HostNotFound(String),

    /// A host record with the given name already exists.
    #[error("host already exists: {0}")]
    HostAlreadyExists(String),

    /// A remote command exited with a non-zero status.
    #[error("command `{command}` failed with exit code {exit_code:?}: {output}")]
    CommandFailed {
        /// The command that was run.
        command: String,

        /// The exit code, if the command exited normally.
        exit_code: Option<i32>,

        /// The combined output of the command.
        output: String,
    },

    /// The driver or host configuration is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The backend never reported an address for the machine.
    #[error("no IP address despite waiting for one: {0}")]
    NoIpAddress(String),

    /// An unknown lifecycle action was requested.
    #[error("unknown action: {0}")]
    InvalidAction(String),

    /// Certificate generation or loading failed.
    #[error("tls error: {0}")]
    Tls(String),

    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON (de)serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// An error that occurred during an HTTP request.
    #[error("http request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// An error from the HTTP middleware.
    #[error("http middleware error: {0}")]
    HttpMiddleware(#[from] reqwest_middleware::Error),

    /// An error from the utilities library.
    #[error("utils error: {0}")]
    Utils(MachutilsError),

    /// An error that occurred when a join handle returned an error.
    #[error("join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    /// An error that can represent any error.
    #[error(transparent)]
    Custom(#[from] AnyError),
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl MachineError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> MachineError {
        MachineError::Custom(AnyError {
            error: error.into(),
        })
    }

    /// Creates an [`MachineError::UnsupportedOperation`].
    pub fn unsupported(driver: impl Into<String>, operation: impl Into<String>) -> MachineError {
        MachineError::UnsupportedOperation {
            driver: driver.into(),
            operation: operation.into(),
        }
    }

    /// Whether this error reports a missing backend resource.
    pub fn is_not_found(&self) -> bool {
        matches!(self, MachineError::NotFound(_))
    }

    /// Whether this error is a deliberate refusal to perform an operation.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, MachineError::UnsupportedOperation { .. })
    }
}

impl AnyError {
    /// Downcasts the error to a `T`.
    pub fn downcast<T>(&self) -> Option<&T>
    where
        T: Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<T>()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates an `Ok` `MachineResult`.
#[allow(non_snake_case)]
pub fn Ok<T>(value: T) -> MachineResult<T> {
    Result::Ok(value)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl From<MachutilsError> for MachineError {
    fn from(error: MachutilsError) -> Self {
        match error {
            MachutilsError::PollExhausted { .. } => {
                MachineError::Timeout(error.to_string())
            }
            MachutilsError::PathValidation(msg) => MachineError::InvalidConfig(msg),
            other => MachineError::Utils(other),
        }
    }
}

impl From<rcgen::Error> for MachineError {
    fn from(error: rcgen::Error) -> Self {
        MachineError::Tls(error.to_string())
    }
}

impl PartialEq for AnyError {
    fn eq(&self, other: &Self) -> bool {
        self.error.to_string() == other.error.to_string()
    }
}

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}
