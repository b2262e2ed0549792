//! Backend connection and transport abstractions
//!
//! The pool never speaks the backend wire protocol itself. It drives a
//! [`Transport`] through open, handshake and close, and tracks the resulting
//! [`BackendConnection`] by its [`ConnectionId`].

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a backend connection, unique within the process.
///
/// Ids are never reused, so a connection from one [`PoolManager`](crate::PoolManager)
/// cannot alias a live connection of another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wrap a raw id
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocate the next process-wide id
    pub(crate) fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id value
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// The front-end requester a connection is serving
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequesterContext {
    /// Name of the accepting server
    pub server: String,
    /// Client socket descriptor on that server
    pub fd: i32,
}

impl RequesterContext {
    /// Create a requester context
    pub fn new(server: impl Into<String>, fd: i32) -> Self {
        Self {
            server: server.into(),
            fd,
        }
    }
}

/// Parameters handed to the backend handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeParams {
    /// Pool the connection is created for
    pub pool_name: String,
    /// Database selected from the pool name
    pub database: String,
    /// Handshake account
    pub account: String,
    /// Handshake charset
    pub charset: String,
}

/// Transport to a backend server
#[async_trait]
pub trait Transport: Send + Sync {
    /// Whether the transport is still connected
    fn is_connected(&self) -> bool;

    /// Open the transport
    async fn open(&mut self, host: &str, port: u16, timeout: Duration, flag: u32) -> io::Result<()>;

    /// Run the authentication handshake and wait for its completion signal.
    ///
    /// Returns `false` when the backend rejected or aborted the handshake.
    async fn handshake(&mut self, params: &HandshakeParams) -> bool;

    /// Close the transport
    async fn close(&mut self);
}

/// Creates unopened transports for a pool
pub trait TransportFactory: Send + Sync {
    /// Create a fresh transport for the named pool
    fn create(&self, pool_name: &str) -> Box<dyn Transport>;
}

/// A ready-to-use, authenticated backend connection
pub struct BackendConnection {
    id: ConnectionId,
    pool_name: String,
    transport: Box<dyn Transport>,
    /// Requester currently served by this connection
    pub requester: Option<RequesterContext>,
    /// Selected database
    pub database: String,
    /// Handshake account
    pub account: String,
    /// Handshake charset
    pub charset: String,
}

impl BackendConnection {
    pub(crate) fn new(
        id: ConnectionId,
        transport: Box<dyn Transport>,
        params: HandshakeParams,
    ) -> Self {
        Self {
            id,
            pool_name: params.pool_name,
            transport,
            requester: None,
            database: params.database,
            account: params.account,
            charset: params.charset,
        }
    }

    /// Connection identity
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Pool this connection belongs to for its whole lifetime
    pub fn pool_name(&self) -> &str {
        &self.pool_name
    }

    /// Whether the underlying transport is still connected
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Borrow the transport
    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Mutably borrow the transport
    pub fn transport_mut(&mut self) -> &mut dyn Transport {
        self.transport.as_mut()
    }

    pub(crate) async fn close(&mut self) {
        self.transport.close().await;
    }
}

impl fmt::Debug for BackendConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConnection")
            .field("id", &self.id)
            .field("pool_name", &self.pool_name)
            .field("connected", &self.is_connected())
            .field("requester", &self.requester)
            .field("database", &self.database)
            .field("account", &self.account)
            .field("charset", &self.charset)
            .finish()
    }
}
