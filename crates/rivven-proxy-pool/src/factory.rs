//! Connection factory
//!
//! Opens a transport to the pool's backend, drives the authentication
//! handshake with a bounded number of attempts and registers the result as
//! busy. A capacity slot is held in `initializing_count` for the whole
//! unauthenticated window through an [`InitReservation`].

use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::database_for_pool;
use crate::connection::{BackendConnection, ConnectionId, HandshakeParams, TransportFactory};
use crate::error::{Error, Result};
use crate::state::{OwnerMap, Pool, PoolState};

/// Default number of handshake attempts per factory call
pub const DEFAULT_AUTH_ATTEMPTS: u32 = 3;

/// Capacity slot held while a connection is being established.
///
/// Released on drop unless the factory completed and moved the slot into
/// `busy`, so failed or cancelled factory calls never leak capacity.
pub(crate) struct InitReservation {
    pool: Arc<Pool>,
    active: bool,
}

impl InitReservation {
    /// Take a slot. The caller already holds the pool lock.
    pub(crate) fn reserve(pool: &Arc<Pool>, state: &mut PoolState) -> Self {
        state.initializing_count += 1;
        Self {
            pool: Arc::clone(pool),
            active: true,
        }
    }

    fn complete(mut self, state: &mut PoolState) {
        state.initializing_count -= 1;
        self.active = false;
    }
}

impl Drop for InitReservation {
    fn drop(&mut self) {
        if self.active {
            self.pool.state.lock().initializing_count -= 1;
        }
    }
}

/// Produces authenticated backend connections, already marked busy
pub(crate) struct ConnectionFactory {
    transports: Arc<dyn TransportFactory>,
    auth_attempts: u32,
}

impl ConnectionFactory {
    /// Create a factory with the given handshake budget (at least one attempt)
    pub(crate) fn new(transports: Arc<dyn TransportFactory>, auth_attempts: u32) -> Self {
        Self {
            transports,
            auth_attempts: auth_attempts.max(1),
        }
    }

    #[cfg(test)]
    pub(crate) fn auth_attempts(&self) -> u32 {
        self.auth_attempts
    }

    /// Establish a new connection for `pool` using an already taken slot.
    pub(crate) async fn init_conn(
        &self,
        pool: &Arc<Pool>,
        reservation: InitReservation,
        owners: &OwnerMap,
    ) -> Result<BackendConnection> {
        let server = &pool.config.server_info;
        let params = HandshakeParams {
            pool_name: pool.name.clone(),
            database: database_for_pool(&pool.name).to_string(),
            account: pool.config.account.clone(),
            charset: pool.config.charset.clone(),
        };

        let mut attempt = 0;
        let transport = loop {
            attempt += 1;
            let mut transport = self.transports.create(&pool.name);

            if let Err(source) = transport
                .open(&server.host, server.port, server.timeout, server.flag)
                .await
            {
                warn!(pool = %pool.name, address = %server.address(), error = %source, "Cannot open backend transport");
                return Err(Error::ConnectFailed {
                    pool: pool.name.clone(),
                    host: server.host.clone(),
                    port: server.port,
                    source,
                });
            }

            if transport.handshake(&params).await {
                break transport;
            }
            transport.close().await;

            if attempt >= self.auth_attempts {
                warn!(pool = %pool.name, attempts = attempt, "Backend handshake failed, giving up");
                return Err(Error::AuthFailed {
                    pool: pool.name.clone(),
                    host: server.host.clone(),
                    port: server.port,
                    attempts: attempt,
                });
            }
            debug!(pool = %pool.name, attempt, "Backend handshake failed, retrying");
        };

        let id = ConnectionId::next();
        owners.lock().insert(id, pool.name.clone());
        {
            let mut state = pool.state.lock();
            state.mark_busy(id, Instant::now());
            reservation.complete(&mut state);
        }

        info!(pool = %pool.name, conn_id = %id, database = %params.database, "Created backend connection");
        Ok(BackendConnection::new(id, transport, params))
    }
}

impl std::fmt::Debug for ConnectionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionFactory")
            .field("auth_attempts", &self.auth_attempts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PoolConfig, ServerInfo};
    use crate::connection::Transport;
    use async_trait::async_trait;
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Fails the first `failures` handshakes, refuses to open when `refuse` is set.
    struct Flaky {
        failures: u32,
        refuse: bool,
        handshakes: Arc<AtomicU32>,
    }

    struct FlakyTransport {
        fail: bool,
        refuse: bool,
        connected: bool,
    }

    impl TransportFactory for Flaky {
        fn create(&self, _pool_name: &str) -> Box<dyn Transport> {
            let n = self.handshakes.fetch_add(1, Ordering::SeqCst);
            Box::new(FlakyTransport {
                fail: n < self.failures,
                refuse: self.refuse,
                connected: false,
            })
        }
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        fn is_connected(&self) -> bool {
            self.connected
        }

        async fn open(&mut self, _: &str, _: u16, _: Duration, _: u32) -> io::Result<()> {
            if self.refuse {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
            }
            self.connected = true;
            Ok(())
        }

        async fn handshake(&mut self, _: &HandshakeParams) -> bool {
            !self.fail
        }

        async fn close(&mut self) {
            self.connected = false;
        }
    }

    fn pool(name: &str) -> Arc<Pool> {
        let config = PoolConfig::new(ServerInfo::new("localhost", 3306))
            .with_max_conns(2)
            .with_account("proxy");
        Arc::new(Pool::new(name.to_string(), config))
    }

    fn factory(failures: u32, refuse: bool, attempts: u32) -> (ConnectionFactory, Arc<AtomicU32>) {
        let handshakes = Arc::new(AtomicU32::new(0));
        let transports = Flaky {
            failures,
            refuse,
            handshakes: Arc::clone(&handshakes),
        };
        (ConnectionFactory::new(Arc::new(transports), attempts), handshakes)
    }

    async fn run(factory: &ConnectionFactory, pool: &Arc<Pool>, owners: &OwnerMap) -> Result<BackendConnection> {
        let reservation = {
            let mut state = pool.state.lock();
            InitReservation::reserve(pool, &mut state)
        };
        factory.init_conn(pool, reservation, owners).await
    }

    #[tokio::test]
    async fn test_init_conn_marks_busy() {
        let (factory, _) = factory(0, false, 3);
        let pool = pool("db_main");
        let owners = OwnerMap::default();

        let conn = run(&factory, &pool, &owners).await.unwrap();
        assert_eq!(conn.database, "main");
        assert_eq!(conn.account, "proxy");

        let status = pool.status();
        assert_eq!(status.busy, 1);
        assert_eq!(status.initializing, 0);
        assert_eq!(owners.lock().get(&conn.id()).map(String::as_str), Some("db_main"));
    }

    #[tokio::test]
    async fn test_init_conn_retries_handshake() {
        let (factory, handshakes) = factory(2, false, 3);
        let pool = pool("db");
        let owners = OwnerMap::default();

        let conn = run(&factory, &pool, &owners).await.unwrap();
        assert_eq!(conn.database, "0");
        assert_eq!(handshakes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_init_conn_auth_budget_exhausted() {
        let (factory, handshakes) = factory(u32::MAX, false, 3);
        let pool = pool("db");
        let owners = OwnerMap::default();

        let err = run(&factory, &pool, &owners).await.unwrap_err();
        assert!(matches!(err, Error::AuthFailed { attempts: 3, .. }));
        assert_eq!(handshakes.load(Ordering::SeqCst), 3);
        assert_eq!(pool.status().initializing, 0);
        assert!(owners.lock().is_empty());
    }

    #[tokio::test]
    async fn test_init_conn_open_failure_is_not_retried() {
        let (factory, handshakes) = factory(0, true, 3);
        let pool = pool("db");
        let owners = OwnerMap::default();

        let err = run(&factory, &pool, &owners).await.unwrap_err();
        assert!(matches!(err, Error::ConnectFailed { port: 3306, .. }));
        assert_eq!(handshakes.load(Ordering::SeqCst), 1);
        assert_eq!(pool.status().initializing, 0);
    }

    #[test]
    fn test_zero_attempts_is_clamped() {
        let (factory, _) = factory(0, false, 0);
        assert_eq!(factory.auth_attempts(), 1);
    }
}
