use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a podshim-utils related operation.
pub type PodshimUtilsResult<T> = Result<T, PodshimUtilsError>;

/// An error that occurred in one of the podshim utilities.
#[derive(pretty_error_debug::Debug, Error)]
pub enum PodshimUtilsError {
    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An environment variable holds a value that cannot be used.
    #[error("invalid value for {0}: {1:?}")]
    InvalidEnvValue(String, String),
}
