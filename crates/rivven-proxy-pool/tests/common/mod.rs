//! Shared mock backend for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use rivven_proxy_pool::prelude::*;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Install a test subscriber once; honours RUST_LOG.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// In-memory backend that hands out mock transports.
#[derive(Default)]
pub struct MockBackend {
    /// Transports created so far
    pub created: AtomicU32,
    /// Handshakes attempted so far
    pub handshakes: AtomicU32,
    /// Transports closed by the pool
    pub closed: AtomicU32,
    /// Remaining handshakes to reject
    pub reject_handshakes: AtomicU32,
    /// Refuse every open
    pub refuse: AtomicBool,
    /// Delay inside the handshake
    pub handshake_delay: Mutex<Option<Duration>>,
    /// Link flags of authenticated transports, in authentication order
    links: Mutex<Vec<Arc<AtomicBool>>>,
    /// Params seen by the last successful handshake
    pub last_params: Mutex<Option<HandshakeParams>>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created(&self) -> u32 {
        self.created.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> u32 {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn handshakes(&self) -> u32 {
        self.handshakes.load(Ordering::SeqCst)
    }

    /// Number of connections that completed the handshake
    pub fn authenticated(&self) -> usize {
        self.links.lock().len()
    }

    /// Drop the link of the n-th authenticated connection (0-based)
    pub fn disconnect(&self, nth: usize) {
        self.links.lock()[nth].store(false, Ordering::SeqCst);
    }

    pub fn set_handshake_delay(&self, delay: Duration) {
        *self.handshake_delay.lock() = Some(delay);
    }
}

struct MockTransportFactory(Arc<MockBackend>);

impl TransportFactory for MockTransportFactory {
    fn create(&self, _pool_name: &str) -> Box<dyn Transport> {
        self.0.created.fetch_add(1, Ordering::SeqCst);
        Box::new(MockTransport {
            backend: Arc::clone(&self.0),
            link: Arc::new(AtomicBool::new(false)),
        })
    }
}

/// Transport factory backed by `backend`
pub fn transports(backend: &Arc<MockBackend>) -> Arc<dyn TransportFactory> {
    Arc::new(MockTransportFactory(Arc::clone(backend)))
}

struct MockTransport {
    backend: Arc<MockBackend>,
    link: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for MockTransport {
    fn is_connected(&self) -> bool {
        self.link.load(Ordering::SeqCst)
    }

    async fn open(&mut self, _host: &str, _port: u16, _timeout: Duration, _flag: u32) -> io::Result<()> {
        if self.backend.refuse.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"));
        }
        self.link.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn handshake(&mut self, params: &HandshakeParams) -> bool {
        self.backend.handshakes.fetch_add(1, Ordering::SeqCst);
        let delay = *self.backend.handshake_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let rejected = self
            .backend
            .reject_handshakes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return false;
        }

        self.backend.links.lock().push(Arc::clone(&self.link));
        *self.backend.last_params.lock() = Some(params.clone());
        true
    }

    async fn close(&mut self) {
        self.link.store(false, Ordering::SeqCst);
        self.backend.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Pool configuration pointing at the mock backend
pub fn pool_config(max_conns: usize, max_spare_conns: usize) -> PoolConfig {
    PoolConfig::new(ServerInfo::new("127.0.0.1", 3306))
        .with_max_conns(max_conns)
        .with_max_spare_conns(max_spare_conns)
        .with_account("proxy")
}

/// Manager with a single initialized pool
pub fn manager(backend: &Arc<MockBackend>, pool: &str, config: PoolConfig) -> Arc<PoolManager> {
    init_tracing();
    let manager = PoolManager::new(transports(backend));
    manager.init([(pool, config)]).expect("valid pool configuration");
    Arc::new(manager)
}

pub fn requester(fd: i32) -> RequesterContext {
    RequesterContext::new("front", fd)
}
