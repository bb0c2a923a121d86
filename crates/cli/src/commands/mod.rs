//! Command implementations.

mod info;
mod run;
mod validate;

pub use info::run_info;
pub use run::run_pipeline;
pub use validate::run_validate;

use std::path::Path;

use contracts::ServiceConfig;

use crate::error::{CliError, Result};

/// Load and validate a configuration file, failing early when it is missing.
pub(crate) fn load_config(path: &Path) -> Result<ServiceConfig> {
    if !path.exists() {
        return Err(CliError::config_not_found(path.display().to_string()));
    }
    Ok(config_loader::ConfigLoader::load_from_path(path)?)
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Path::new("/nonexistent/concentrator.toml")).unwrap_err();
        assert!(matches!(err, CliError::ConfigNotFound { .. }));
    }

    #[test]
    fn test_load_config() {
        let file = write_config(SAMPLE_TOML);
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.total_signals(), 6);
    }
}
