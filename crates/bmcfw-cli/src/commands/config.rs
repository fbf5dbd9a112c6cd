//! `bmcfw config`: validate an update configuration file

use std::path::Path;

use anyhow::{Context, Result};
use bmcfw_firmware_update::UpdateConfig;

use crate::output;

/// Load and validate `file`, or the defaults when no file is given.
///
/// # Errors
///
/// I/O failure, malformed JSON, or a configuration `validate` rejects.
pub fn load(file: Option<&Path>) -> Result<UpdateConfig> {
    let Some(file) = file else {
        return Ok(UpdateConfig::default());
    };
    let text =
        std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let config =
        UpdateConfig::from_json(&text).with_context(|| format!("loading {}", file.display()))?;
    Ok(config)
}

/// Execute the config command.
pub fn execute(file: Option<&Path>, json: bool) -> Result<()> {
    let config = load(file)?;
    output::print_config(&config, json)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use bmcfw_test_helpers::prelude::*;

    #[test]
    fn test_defaults_without_file() -> TestResult {
        assert_eq!(load(None)?, UpdateConfig::default());
        Ok(())
    }

    #[test]
    fn test_partial_file() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("update.json");
        std::fs::write(&path, r#"{"host_ready_polls": 10, "bios_verify": true}"#)?;

        let config = load(Some(&path))?;
        assert_eq!(config.host_ready_polls, 10);
        assert!(config.bios_verify);
        assert_eq!(config.lease_ttl, Duration::from_secs(60));
        Ok(())
    }

    #[test]
    fn test_invalid_file_is_a_config_error() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("update.json");
        std::fs::write(&path, r#"{"status_poll_limit": 0}"#)?;

        let err = must_err(load(Some(&path)));
        assert_eq!(crate::error::exit_code(&err), 4);
        Ok(())
    }
}
