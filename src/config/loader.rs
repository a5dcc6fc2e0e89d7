//! Configuration loading from disk.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::schema::ServerConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, io::Error),
    Parse(PathBuf, toml::de::Error),
    Validation(Vec<ValidationError>),
    InvalidPath(PathBuf, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "IO error reading {}: {}", path.display(), e),
            ConfigError::Parse(path, e) => write!(f, "Parse error in {}: {}", path.display(), e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
            ConfigError::InvalidPath(path, reason) => write!(f, "{}: {}", path.display(), reason),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(_, e) => Some(e),
            ConfigError::Parse(_, e) => Some(e),
            _ => None,
        }
    }
}

/// Parse a TOML file without validating it.
pub fn parse_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
    toml::from_str(&content).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    let config = parse_config(path)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Canonicalize the document root; it must be an existing directory.
pub fn resolve_target(path: &Path) -> Result<PathBuf, ConfigError> {
    let resolved = fs::canonicalize(path)
        .map_err(|e| ConfigError::InvalidPath(path.to_path_buf(), e.to_string()))?;
    if !resolved.is_dir() {
        return Err(ConfigError::InvalidPath(path.to_path_buf(), "not a directory".into()));
    }
    Ok(resolved)
}

/// Make a log output path absolute. The file itself may not exist yet,
/// but its directory must.
pub fn resolve_log_output(path: &Path) -> Result<PathBuf, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidPath(path.to_path_buf(), reason);

    let file_name = path
        .file_name()
        .ok_or_else(|| invalid("not a file path".into()))?;
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let parent = fs::canonicalize(parent).map_err(|e| invalid(e.to_string()))?;
    if !parent.is_dir() {
        return Err(invalid("parent is not a directory".into()));
    }
    Ok(parent.join(file_name))
}
