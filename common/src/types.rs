//! Common types used throughout the daemon.

use thiserror::Error;

/// Variant value carried by device option get/set calls. The management
/// surface transports options as loosely-typed values; each option name
/// expects a specific shape (bool, string, number or object).
pub type OptionValue = serde_json::Value;

/// Errors reported through the management surface
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Device already has a disc loaded")]
    AlreadyLoaded,

    #[error("Device is locked")]
    DeviceLocked,

    #[error("Daemon error: {0}")]
    Daemon(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ioctl error: {0}")]
    Ioctl(#[from] nix::Error),
}
