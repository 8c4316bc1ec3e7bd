//! Utility functions for working with environment variables.

use std::{path::PathBuf, time::Duration};

use crate::{PodshimUtilsError, PodshimUtilsResult, DEFAULT_PODSHIM_HOME};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Environment variable for the podshim home directory
pub const PODSHIM_HOME_ENV_VAR: &str = "PODSHIM_HOME";

/// Environment variable overriding the kill timeout, in seconds
pub const KILL_TIMEOUT_ENV_VAR: &str = "PODSHIM_KILL_TIMEOUT_SECS";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns the path to the podshim home directory.
/// If the PODSHIM_HOME environment variable is set, returns that path.
/// Otherwise, returns the default podshim home path.
pub fn get_podshim_home_path() -> PathBuf {
    get_podshim_home_override().unwrap_or_else(|| DEFAULT_PODSHIM_HOME.to_owned())
}

/// Returns the podshim home directory set through PODSHIM_HOME, if any.
pub fn get_podshim_home_override() -> Option<PathBuf> {
    std::env::var_os(PODSHIM_HOME_ENV_VAR).map(PathBuf::from)
}

/// Returns the kill timeout set through PODSHIM_KILL_TIMEOUT_SECS, if any.
pub fn get_kill_timeout() -> PodshimUtilsResult<Option<Duration>> {
    match std::env::var(KILL_TIMEOUT_ENV_VAR) {
        Ok(value) => {
            let secs = value.trim().parse::<u64>().map_err(|_| {
                PodshimUtilsError::InvalidEnvValue(KILL_TIMEOUT_ENV_VAR.to_string(), value.clone())
            })?;
            Ok(Some(Duration::from_secs(secs)))
        }
        Err(_) => Ok(None),
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_podshim_home_from_env() {
        std::env::set_var(PODSHIM_HOME_ENV_VAR, "/tmp/podshim-home");
        assert_eq!(get_podshim_home_path(), PathBuf::from("/tmp/podshim-home"));
        assert_eq!(
            get_podshim_home_override(),
            Some(PathBuf::from("/tmp/podshim-home"))
        );

        std::env::remove_var(PODSHIM_HOME_ENV_VAR);
        assert_eq!(get_podshim_home_path(), *DEFAULT_PODSHIM_HOME);
        assert_eq!(get_podshim_home_override(), None);
    }

    #[test]
    #[serial]
    fn test_kill_timeout_from_env() {
        std::env::remove_var(KILL_TIMEOUT_ENV_VAR);
        assert_eq!(get_kill_timeout().unwrap(), None);

        std::env::set_var(KILL_TIMEOUT_ENV_VAR, " 15 ");
        assert_eq!(get_kill_timeout().unwrap(), Some(Duration::from_secs(15)));

        std::env::set_var(KILL_TIMEOUT_ENV_VAR, "soon");
        assert!(matches!(
            get_kill_timeout(),
            Err(PodshimUtilsError::InvalidEnvValue(_, _))
        ));

        std::env::remove_var(KILL_TIMEOUT_ENV_VAR);
    }
}
