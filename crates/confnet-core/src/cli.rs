//! Shared CLI helpers for workspace tools.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::{Error, Result};

pub fn setup_cli_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to initialize logger: {e}")))?;

    Ok(())
}

pub fn load_toml_config<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned,
{
    let content = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config {}: {e}", path.display())))?;

    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse config {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RunConfig;
    use tempfile::TempDir;

    #[test]
    fn test_load_toml_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.toml");
        fs::write(&path, "epochs = 3\nbaseline = true\n").unwrap();

        let config: RunConfig = load_toml_config(&path).unwrap();
        assert_eq!(config.epochs, 3);
        assert!(config.baseline);
    }

    #[test]
    fn test_missing_config_is_config_error() {
        let err = load_toml_config::<RunConfig>(Path::new("/nonexistent/run.toml")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
