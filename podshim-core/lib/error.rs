use std::{
    error::Error,
    fmt::{self, Display},
    time::Duration,
};
use thiserror::Error;

use crate::models::SandboxState;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a podshim-related operation.
pub type PodshimResult<T> = Result<T, PodshimError>;

/// An error that occurred while tearing down a pod sandbox or talking to one of its collaborators.
#[derive(pretty_error_debug::Debug, Error)]
pub enum PodshimError {
    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A system call failed.
    #[error("system call error: {0}")]
    Nix(#[from] nix::Error),

    /// The persisted state or a config file could not be (de)serialized.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A JSON payload could not be (de)serialized.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// No sandbox matches the given ID.
    #[error("sandbox {0:?} not found")]
    SandboxNotFound(String),

    /// The given ID prefix matches more than one sandbox.
    #[error("sandbox id prefix {0:?} is ambiguous, matches: {1:?}")]
    AmbiguousSandboxId(String, Vec<String>),

    /// No container matches the given ID.
    #[error("container {0:?} not found")]
    ContainerNotFound(String),

    /// The task backing a container does not exist.
    #[error("task for container {0:?} not found")]
    TaskNotFound(String),

    /// The caller's context ended while waiting for the sandbox to stop.
    #[error("wait sandbox container {id:?} is cancelled")]
    Cancelled {
        /// The sandbox being waited on.
        id: String,
    },

    /// The sandbox did not report its stop within the allotted time.
    #[error("wait sandbox container {id:?} stop timeout after {timeout:?}")]
    Timeout {
        /// The sandbox being waited on.
        id: String,

        /// How long we waited.
        timeout: Duration,
    },

    /// Network teardown was requested but no network plugin is configured.
    #[error("cni config not initialized")]
    NetworkPluginNotConfigured,

    /// A configuration value is invalid.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// A CNI plugin reported a failure.
    #[error("cni plugin {plugin:?} failed with code {code}: {msg}")]
    Cni {
        /// The plugin type that failed.
        plugin: String,

        /// The CNI error code.
        code: u32,

        /// The CNI error message.
        msg: String,
    },

    /// A lifecycle transition that the state machine does not allow.
    #[error("invalid sandbox state transition from {from} to {to}")]
    InvalidTransition {
        /// The current state.
        from: SandboxState,

        /// The requested state.
        to: SandboxState,
    },

    /// The task runtime failed.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// A step of the sandbox teardown failed.
    #[error("failed to {step} for sandbox {id:?}")]
    Step {
        /// The full sandbox ID.
        id: String,

        /// The step that failed.
        step: StopStep,

        /// The underlying error.
        #[source]
        source: Box<PodshimError>,
    },

    /// Custom error.
    #[error(transparent)]
    Custom(#[from] AnyError),
}

/// The teardown step during which an error happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopStep {
    /// Looking the sandbox up in the registry.
    Lookup,

    /// Force-stopping a member container.
    StopContainer(String),

    /// Unmounting sandbox-level files.
    UnmountFiles,

    /// Stopping the infra container.
    StopInfraContainer(SandboxState),

    /// Checking whether the network namespace is already closed.
    CheckNetNsClosed,

    /// Tearing down the pod network.
    TeardownNetwork,

    /// Removing the network namespace.
    RemoveNetNs,
}

/// The coarse kind of a [`PodshimError`], as seen by a caller deciding whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A sandbox, container or task is absent.
    NotFound,

    /// The caller's context ended first.
    Cancelled,

    /// A bounded wait ran out.
    Timeout,

    /// The runtime is missing required configuration.
    Config,

    /// Any other collaborator failure.
    Upstream,
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl PodshimError {
    /// Wraps any error as a custom podshim error.
    pub fn custom(error: impl Into<anyhow::Error>) -> PodshimError {
        PodshimError::Custom(AnyError {
            error: error.into(),
        })
    }

    /// Wraps this error with the sandbox ID and the teardown step that produced it.
    pub fn in_step(self, id: impl Into<String>, step: StopStep) -> PodshimError {
        PodshimError::Step {
            id: id.into(),
            step,
            source: Box::new(self),
        }
    }

    /// Returns the innermost error, looking through step wrappers.
    pub fn root_cause(&self) -> &PodshimError {
        match self {
            PodshimError::Step { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Returns the kind of the root cause.
    pub fn kind(&self) -> ErrorKind {
        match self.root_cause() {
            PodshimError::SandboxNotFound(_)
            | PodshimError::ContainerNotFound(_)
            | PodshimError::TaskNotFound(_) => ErrorKind::NotFound,
            PodshimError::Cancelled { .. } => ErrorKind::Cancelled,
            PodshimError::Timeout { .. } => ErrorKind::Timeout,
            PodshimError::NetworkPluginNotConfigured | PodshimError::InvalidConfig(_) => {
                ErrorKind::Config
            }
            _ => ErrorKind::Upstream,
        }
    }

    /// Whether the root cause is a missing sandbox, container or task.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
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
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for StopStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopStep::Lookup => write!(f, "find sandbox"),
            StopStep::StopContainer(id) => write!(f, "stop container {:?}", id),
            StopStep::UnmountFiles => write!(f, "unmount sandbox files"),
            StopStep::StopInfraContainer(state) => {
                write!(f, "stop sandbox container in {} state", state)
            }
            StopStep::CheckNetNsClosed => write!(f, "check network namespace closed"),
            StopStep::TeardownNetwork => write!(f, "destroy network"),
            StopStep::RemoveNetNs => write!(f, "remove network namespace"),
        }
    }
}

impl PartialEq for AnyError {
    fn eq(&self, other: &Self) -> bool {
        self.error.to_string() == other.error.to_string()
    }
}

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_looks_through_steps() {
        let err = PodshimError::NetworkPluginNotConfigured
            .in_step("sb-1", StopStep::TeardownNetwork);

        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(matches!(
            err.root_cause(),
            PodshimError::NetworkPluginNotConfigured
        ));
        assert_eq!(err.to_string(), "failed to destroy network for sandbox \"sb-1\"");
    }

    #[test]
    fn test_not_found_kinds() {
        assert!(PodshimError::TaskNotFound("c1".into()).is_not_found());
        assert!(PodshimError::SandboxNotFound("s1".into())
            .in_step("s1", StopStep::Lookup)
            .is_not_found());
        assert!(!PodshimError::Runtime("boom".into()).is_not_found());
        assert_eq!(
            PodshimError::Runtime("boom".into()).kind(),
            ErrorKind::Upstream
        );
    }
}
