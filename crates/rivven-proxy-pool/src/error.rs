//! Error types for rivven-proxy-pool
//!
//! Errors are split by who has to act on them:
//! - Caller errors (unknown pool, unknown connection, missing init)
//! - Capacity errors (pool exhausted, pool shut down)
//! - Backend errors (transport open failure, handshake failure)

use std::fmt;
use thiserror::Error;

use crate::connection::ConnectionId;

/// Result type for rivven-proxy-pool operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Invalid pool configuration
    Configuration,
    /// API misuse by the caller
    Usage,
    /// No connection could be handed out
    PoolExhausted,
    /// Transport could not be opened (retriable)
    Connection,
    /// Backend rejected the handshake
    Authentication,
    /// Pool manager has been shut down
    ShutDown,
}

impl ErrorCategory {
    /// Whether errors in this category are generally retriable
    #[inline]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Connection | Self::PoolExhausted)
    }
}

/// Main error type for rivven-proxy-pool
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    /// Invalid capacity or server settings
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// `PoolManager::init` has not been called yet
    #[error("pool manager is not initialized")]
    NotInitialized,

    /// Pool name was never registered
    #[error("unknown pool: {pool}")]
    UnknownPool { pool: String },

    /// Connection is not checked out of any pool
    #[error("unknown connection: {id}")]
    UnknownConnection { id: ConnectionId },

    /// A parked fetch was woken without a connection
    #[error("pool exhausted: {pool} - {message}")]
    PoolExhausted { pool: String, message: String },

    /// Transport to the backend could not be opened
    #[error("cannot connect to {host}:{port} for pool {pool}")]
    ConnectFailed {
        pool: String,
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// Handshake failed on every attempt of the retry budget
    #[error("cannot authenticate to {host}:{port} for pool {pool} after {attempts} attempts")]
    AuthFailed {
        pool: String,
        host: String,
        port: u16,
        attempts: u32,
    },

    /// Pool manager has been shut down
    #[error("pool manager is shut down")]
    ShutDown,
}

impl Error {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::NotInitialized | Self::UnknownPool { .. } | Self::UnknownConnection { .. } => {
                ErrorCategory::Usage
            }
            Self::PoolExhausted { .. } => ErrorCategory::PoolExhausted,
            Self::ConnectFailed { .. } => ErrorCategory::Connection,
            Self::AuthFailed { .. } => ErrorCategory::Authentication,
            Self::ShutDown => ErrorCategory::ShutDown,
        }
    }

    /// Whether this error is retriable
    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an unknown pool error
    pub fn unknown_pool(pool: impl Into<String>) -> Self {
        Self::UnknownPool { pool: pool.into() }
    }

    /// Create a pool exhausted error
    pub fn exhausted(pool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PoolExhausted {
            pool: pool.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Usage => write!(f, "usage"),
            Self::PoolExhausted => write!(f, "pool_exhausted"),
            Self::Connection => write!(f, "connection"),
            Self::Authentication => write!(f, "authentication"),
            Self::ShutDown => write!(f, "shut_down"),
        }
    }
}
