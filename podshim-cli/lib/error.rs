use podshim_core::PodshimError;
use podshim_utils::PodshimUtilsError;
use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a podshim CLI operation.
pub type PodshimCliResult<T> = Result<T, PodshimCliError>;

/// An error that occurred while running a podshim command.
#[derive(pretty_error_debug::Debug, Error)]
pub enum PodshimCliError {
    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A teardown or registry error.
    #[error(transparent)]
    Core(#[from] PodshimError),

    /// A shared utility error.
    #[error(transparent)]
    Utils(#[from] PodshimUtilsError),
}
