use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read file {0}: {1}")]
    FileRead(PathBuf, std::io::Error),

    #[error("Failed to write file {0}: {1}")]
    FileWrite(PathBuf, std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Failed to serialize TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Profile '{0}' not found")]
    ProfileNotFound(String),

    #[error("Duplicate profile name: {0}")]
    DuplicateProfileName(String),

    #[error("Duplicate profile id: {0}")]
    DuplicateProfileId(String),

    #[error(
        "No profile selected. Run 'proxydash profiles use <name>' or pass --profile <name>."
    )]
    NoActiveProfile,
}

pub type Result<T> = std::result::Result<T, ConfigError>;
