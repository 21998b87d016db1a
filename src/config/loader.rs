//! Configuration loading from disk.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};
use crate::routing::command::{self, ParseError};
use crate::routing::RouteDef;

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
    #[error("cannot read routes file {}: {source}", path.display())]
    RoutesFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("routes file: {0}")]
    Command(#[from] ParseError),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
///
/// A relative `routes_file` is resolved against the config file's directory.
pub fn load_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config: ProxyConfig = toml::from_str(&content)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    if let (Some(routes_file), Some(dir)) = (config.routes_file.as_mut(), path.parent()) {
        if routes_file.is_relative() {
            *routes_file = dir.join(&*routes_file);
        }
    }

    Ok(config)
}

impl ProxyConfig {
    /// Inline routes followed by the routes file's commands.
    pub fn route_defs(&self) -> Result<Vec<RouteDef>, ConfigError> {
        let mut defs: Vec<RouteDef> = self.routes.iter().map(RouteDef::from).collect();

        if let Some(path) = &self.routes_file {
            let text = fs::read_to_string(path).map_err(|source| ConfigError::RoutesFile {
                path: path.clone(),
                source,
            })?;
            defs.extend(command::parse(&text)?);
        }

        Ok(defs)
    }
}
