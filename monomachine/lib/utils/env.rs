use std::path::PathBuf;

use crate::config::DEFAULT_MONOMACHINE_HOME;

use super::MONOMACHINE_HOME_ENV_VAR;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns the monomachine home directory.
///
/// `MONOMACHINE_HOME` wins when set and non-empty, otherwise `~/.monomachine` is used.
pub fn get_monomachine_home_path() -> PathBuf {
    match std::env::var(MONOMACHINE_HOME_ENV_VAR) {
        Ok(home) if !home.is_empty() => PathBuf::from(home),
        _ => {
            tracing::debug!(
                "{MONOMACHINE_HOME_ENV_VAR} is not set, using default: {}",
                DEFAULT_MONOMACHINE_HOME.display()
            );
            DEFAULT_MONOMACHINE_HOME.clone()
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    #[serial]
    fn test_home_path_from_env() {
        let previous = std::env::var(MONOMACHINE_HOME_ENV_VAR).ok();

        std::env::set_var(MONOMACHINE_HOME_ENV_VAR, "/tmp/monomachine-test");
        assert_eq!(
            get_monomachine_home_path(),
            PathBuf::from("/tmp/monomachine-test")
        );

        std::env::set_var(MONOMACHINE_HOME_ENV_VAR, "");
        assert_eq!(get_monomachine_home_path(), *DEFAULT_MONOMACHINE_HOME);

        match previous {
            Some(value) => std::env::set_var(MONOMACHINE_HOME_ENV_VAR, value),
            None => std::env::remove_var(MONOMACHINE_HOME_ENV_VAR),
        }
    }
}
