//! Error types for the bmcfw CLI

use bmcfw_errors::{ErrorCategory, UpdateError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Cannot determine image format of {0}, pass --format")]
    UnknownFormat(String),
}

/// Process exit code for a failed command.
///
/// Engine errors map by category; the `anyhow` context chain is searched,
/// so wrapping an error with context keeps its code.
pub fn exit_code(error: &anyhow::Error) -> u8 {
    if let Some(update) = error.downcast_ref::<UpdateError>() {
        return category_code(update.category());
    }
    if let Some(CliError::UnknownFormat(_)) = error.downcast_ref::<CliError>() {
        return 2;
    }
    if error.downcast_ref::<std::io::Error>().is_some() {
        return 5;
    }
    1
}

fn category_code(category: ErrorCategory) -> u8 {
    match category {
        ErrorCategory::Image => 3,
        ErrorCategory::Config => 4,
        ErrorCategory::IO => 5,
        ErrorCategory::Checksum => 6,
        ErrorCategory::Transport
        | ErrorCategory::Device
        | ErrorCategory::Wear
        | ErrorCategory::Recovery
        | ErrorCategory::Lease => 7,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use bmcfw_errors::ImageError;

    #[test]
    fn test_image_errors_keep_their_category_through_context() {
        let result: Result<(), UpdateError> =
            Err(UpdateError::from(ImageError::syntax(3, "bad record")));
        let error = result.context("parsing vccin.hex").err();
        assert_eq!(error.as_ref().map(exit_code), Some(3));
    }

    #[test]
    fn test_cli_errors() {
        let unknown = anyhow::Error::new(CliError::UnknownFormat("a.bin".into()));
        assert_eq!(exit_code(&unknown), 2);

        let io = anyhow::Error::new(std::io::Error::from(std::io::ErrorKind::NotFound))
            .context("reading a.bin");
        assert_eq!(exit_code(&io), 5);

        assert_eq!(exit_code(&anyhow::anyhow!("other")), 1);
    }

    #[test]
    fn test_config_errors() {
        let error = anyhow::Error::new(UpdateError::config("lease_ttl must exceed refresh"));
        assert_eq!(exit_code(&error), 4);
    }
}
