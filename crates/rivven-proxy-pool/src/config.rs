//! Pool configuration
//!
//! Each logical pool name maps to one [`PoolConfig`]. The configuration shape
//! mirrors the proxy's YAML/JSON configuration file:
//!
//! ```yaml
//! db_main:
//!   maxSpareConns: 1
//!   maxConns: 2
//!   maxSpareExp: 30
//!   serverInfo:
//!     host: 127.0.0.1
//!     port: 3306
//!     timeout: 0.5
//!   account: root
//!   charset: utf8mb4
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::serde_utils::duration_secs;

/// Default transport open timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(100);

/// Default character set negotiated with the backend
pub const DEFAULT_CHARSET: &str = "utf8mb4";

/// Database selected when the pool name carries no `_{database}` suffix
pub const DEFAULT_DATABASE: &str = "0";

/// All pools keyed by logical pool name
pub type PoolConfigs = BTreeMap<String, PoolConfig>;

/// Backend server address and transport options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    /// Backend host
    pub host: String,
    /// Backend port
    pub port: u16,
    /// Transport open timeout
    #[serde(with = "duration_secs", default = "default_timeout")]
    pub timeout: Duration,
    /// Transport-specific open flag
    #[serde(default)]
    pub flag: u32,
}

fn default_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

fn default_charset() -> String {
    DEFAULT_CHARSET.to_string()
}

impl ServerInfo {
    /// Create server info with default timeout and flag
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: DEFAULT_CONNECT_TIMEOUT,
            flag: 0,
        }
    }

    /// Set transport open timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set transport open flag
    pub fn with_flag(mut self, flag: u32) -> Self {
        self.flag = flag;
        self
    }

    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration of a single named pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
    /// Spare connections kept before idle eviction kicks in
    pub max_spare_conns: usize,
    /// Hard cap on spare + busy + waiting + initializing
    pub max_conns: usize,
    /// Minimum idle duration before an over-threshold connection is closed
    #[serde(with = "duration_secs", default)]
    pub max_spare_exp: Duration,
    /// Backend address
    pub server_info: ServerInfo,
    /// Account used for the backend handshake
    #[serde(default)]
    pub account: String,
    /// Character set used for the backend handshake
    #[serde(default = "default_charset")]
    pub charset: String,
}

impl PoolConfig {
    /// Create a pool configuration for the given backend
    pub fn new(server_info: ServerInfo) -> Self {
        Self {
            max_spare_conns: 1,
            max_conns: 1,
            max_spare_exp: Duration::ZERO,
            server_info,
            account: String::new(),
            charset: default_charset(),
        }
    }

    /// Set spare connection threshold
    pub fn with_max_spare_conns(mut self, max: usize) -> Self {
        self.max_spare_conns = max;
        self
    }

    /// Set total connection cap
    pub fn with_max_conns(mut self, max: usize) -> Self {
        self.max_conns = max;
        self
    }

    /// Set idle eviction window
    pub fn with_max_spare_exp(mut self, exp: Duration) -> Self {
        self.max_spare_exp = exp;
        self
    }

    /// Set handshake account
    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = account.into();
        self
    }

    /// Set handshake charset
    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = charset.into();
        self
    }

    /// Check capacity and server settings for the named pool
    pub fn validate(&self, pool_name: &str) -> Result<()> {
        if self.max_spare_conns == 0 || self.max_conns == 0 {
            return Err(Error::config(format!(
                "invalid maxSpareConns or maxConns in {}",
                pool_name
            )));
        }
        if self.server_info.host.is_empty() {
            return Err(Error::config(format!("empty server host in {}", pool_name)));
        }
        if self.server_info.port == 0 {
            return Err(Error::config(format!("invalid server port in {}", pool_name)));
        }
        Ok(())
    }
}

/// Parse a pool name to configuration map from YAML
pub fn pool_configs_from_yaml(yaml: &str) -> Result<PoolConfigs> {
    serde_yaml::from_str(yaml)
        .map_err(|e| Error::config(format!("invalid pool configuration: {}", e)))
}

/// Database selected by a pool name of the form `{logical}_{database}`
pub fn database_for_pool(pool_name: &str) -> &str {
    match pool_name.split_once('_') {
        Some((_, database)) if !database.is_empty() => database,
        _ => DEFAULT_DATABASE,
    }
}
