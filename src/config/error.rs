//! Error types for configuration validation

use std::path::PathBuf;
use thiserror::Error;

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading and validating a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a file
    #[error("failed to read file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML or the document does not match the schema
    #[error("failed to parse configuration: {source}")]
    ParseYaml {
        #[source]
        source: serde_yaml::Error,
    },

    /// Invalid configuration value
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    /// ID is not a valid identifier
    #[error("invalid ID '{id}': must start with a letter or underscore and contain only letters, digits and underscores")]
    InvalidId { id: String },

    /// The same ID is declared twice
    #[error("ID '{id}' is declared more than once")]
    DuplicateId { id: String },

    /// No UART bus is declared
    #[error("component '{component}' requires a UART bus but none is declared")]
    NoUartBus { component: String },

    /// uart_id does not match a declared bus
    #[error("UART bus '{id}' referenced by '{component}' is not declared")]
    UnknownUartBus { component: String, id: String },

    /// Several buses are declared and none is selected
    #[error("{count} UART buses are declared, set 'uart_id' on '{component}' to pick one")]
    AmbiguousUartBus { component: String, count: usize },

    /// A pin the device needs is not configured on its bus
    #[error("component {component} requires '{pin}' to be set in the UART bus '{bus}'")]
    MissingUartPin {
        component: String,
        bus: String,
        pin: &'static str,
    },

    /// The bus does not run at the baud rate the device needs
    #[error("component {component} requires baud rate {expected} for UART bus '{bus}', got {actual}")]
    BaudRate {
        component: String,
        bus: String,
        expected: u32,
        actual: u32,
    },

    /// A text sensor reference does not match a declared text sensor
    #[error("'{key}' references text sensor '{id}' which is not declared")]
    UnknownTextSensor { key: String, id: String },
}
