//! # rivven-proxy-pool
//!
//! Backend connection pooling for the Rivven database proxy front end.
//!
//! Each logical pool name owns a bounded set of authenticated backend
//! connections. Serving tasks check connections out with
//! [`PoolManager::fetch`] and hand them back with [`PoolManager::recycle`].
//!
//! ## Features
//!
//! - **LIFO reuse**: the most recently returned (warmest) connection is handed out first
//! - **Capacity accounting**: spare, busy, parked and in-flight connections all count against `maxConns`
//! - **FIFO backpressure**: fetches on a saturated pool park in arrival order until a recycle wakes them
//! - **Idle eviction**: connections returned while the spare list is full are closed once idle long enough
//! - **Dead-connection replacement**: disconnected spares are transparently replaced by the factory
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rivven_proxy_pool::prelude::*;
//!
//! let manager = PoolManager::new(Arc::new(MyTransports::default()));
//! manager.init([(
//!     "db_main",
//!     PoolConfig::new(ServerInfo::new("127.0.0.1", 3306))
//!         .with_max_conns(2)
//!         .with_max_spare_conns(1),
//! )])?;
//!
//! let conn = manager.fetch("db_main", RequesterContext::new("front", 7)).await?;
//! manager.recycle(conn).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod error;
pub mod factory;
pub mod manager;
pub mod state;

mod serde_utils;
mod waiter;

pub use manager::{PoolManager, PoolManagerBuilder};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{
        database_for_pool, pool_configs_from_yaml, PoolConfig, PoolConfigs, ServerInfo,
        DEFAULT_CHARSET, DEFAULT_CONNECT_TIMEOUT, DEFAULT_DATABASE,
    };
    pub use crate::connection::{
        BackendConnection, ConnectionId, HandshakeParams, RequesterContext, Transport,
        TransportFactory,
    };
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::factory::DEFAULT_AUTH_ATTEMPTS;
    pub use crate::manager::{PoolManager, PoolManagerBuilder};
    pub use crate::state::PoolStatus;
}
