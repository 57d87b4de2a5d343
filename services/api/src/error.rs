//! services/api/src/error.rs
//!
//! The startup and process-level error type for the `api` binary. Request
//! failures never reach this type: handlers map `PortError` to HTTP status
//! codes in the web layer instead.

use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Configuration could not be loaded from the environment.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The database pool could not be set up or migrations failed.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Binding or serving the listening socket failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything else that prevents the service from starting.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}
