//! Pool manager: the public fetch / recycle / reconnect surface
//!
//! A [`PoolManager`] owns a registry of named pools. Fetches reuse the most
//! recently returned spare connection, create a new one through the
//! connection factory while capacity allows, and otherwise park on the
//! pool's FIFO wait queue until a recycle hands them a spare.
//!
//! # Example
//!
//! ```rust,ignore
//! use rivven_proxy_pool::prelude::*;
//!
//! let manager = PoolManager::new(Arc::new(MySqlTransports::default()));
//! manager.init(pool_configs_from_yaml(&yaml)?)?;
//!
//! let conn = manager.fetch("db_main", RequesterContext::new("front", fd)).await?;
//! // ... proxy queries over conn.transport_mut() ...
//! manager.recycle(conn).await?;
//! ```

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::PoolConfig;
use crate::connection::{BackendConnection, RequesterContext, TransportFactory};
use crate::error::{Error, Result};
use crate::factory::{ConnectionFactory, InitReservation, DEFAULT_AUTH_ATTEMPTS};
use crate::state::{OwnerMap, Pool, PoolState, PoolStatus};
use crate::waiter::WakeReceiver;

/// A connection popped off the spare list
enum Spare {
    /// Already marked busy
    Healthy(BackendConnection),
    /// Forgotten; its slot moved into the reservation
    Dead(BackendConnection, InitReservation),
}

/// What a fetch does once the pool lock is released
enum Next {
    Spare(Spare),
    /// Capacity available for a new connection
    Create(InitReservation),
    /// Saturated pool; wait for a recycle
    Park(WakeReceiver),
}

/// What happens to a connection handed back through `recycle`
enum Disposal {
    Pooled { woke_waiter: bool },
    Evicted(BackendConnection),
    Dead,
}

/// A fetch parked on the wait queue.
///
/// If the fetch future is dropped while parked, the guard withdraws it from
/// `pending_fetch_count` and passes an already received wake on to the next
/// waiter so the reserved spare is not stranded.
struct ParkedFetch {
    pool: Arc<Pool>,
    rx: WakeReceiver,
    resolved: bool,
}

impl Drop for ParkedFetch {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }
        let mut state = self.pool.state.lock();
        state.pending_fetch_count -= 1;
        self.rx.close();
        if let Ok(token) = self.rx.try_recv() {
            state.resume_fetch_count -= 1;
            state.wake_next(token);
        }
        debug!(pool = %self.pool.name, "Parked fetch cancelled");
    }
}

/// Registry of named backend connection pools
pub struct PoolManager {
    pools: OnceLock<HashMap<String, Arc<Pool>>>,
    owners: OwnerMap,
    factory: ConnectionFactory,
}

/// Builder for [`PoolManager`]
pub struct PoolManagerBuilder {
    transports: Arc<dyn TransportFactory>,
    auth_attempts: u32,
}

impl PoolManagerBuilder {
    /// Total handshake attempts per new connection
    pub fn auth_attempts(mut self, attempts: u32) -> Self {
        self.auth_attempts = attempts;
        self
    }

    /// Build the manager. Pools are registered later through `init`.
    pub fn build(self) -> PoolManager {
        PoolManager {
            pools: OnceLock::new(),
            owners: OwnerMap::default(),
            factory: ConnectionFactory::new(self.transports, self.auth_attempts),
        }
    }
}

impl PoolManager {
    /// Create a manager with default settings
    pub fn new(transports: Arc<dyn TransportFactory>) -> Self {
        Self::builder(transports).build()
    }

    /// Create a manager builder
    pub fn builder(transports: Arc<dyn TransportFactory>) -> PoolManagerBuilder {
        PoolManagerBuilder {
            transports,
            auth_attempts: DEFAULT_AUTH_ATTEMPTS,
        }
    }

    /// Register all pools.
    ///
    /// Every configuration is validated before any pool becomes usable. Only
    /// the first successful call has an effect; later calls are no-ops.
    pub fn init<I, K>(&self, configs: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, PoolConfig)>,
        K: Into<String>,
    {
        if self.pools.get().is_some() {
            debug!("Pool manager already initialized, ignoring init");
            return Ok(());
        }

        let mut pools = HashMap::new();
        for (name, config) in configs {
            let name = name.into();
            config.validate(&name)?;
            pools.insert(name.clone(), Arc::new(Pool::new(name, config)));
        }

        let count = pools.len();
        if self.pools.set(pools).is_ok() {
            info!(pools = count, "Initialized connection pools");
        }
        Ok(())
    }

    /// Whether `init` has completed
    pub fn is_initialized(&self) -> bool {
        self.pools.get().is_some()
    }

    /// Names of all registered pools
    pub fn pool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .pools
            .get()
            .map(|pools| pools.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Counters of the named pool
    pub fn status(&self, pool_name: &str) -> Result<PoolStatus> {
        Ok(self.pool(pool_name)?.status())
    }

    fn pool(&self, pool_name: &str) -> Result<&Arc<Pool>> {
        self.pools
            .get()
            .ok_or(Error::NotInitialized)?
            .get(pool_name)
            .ok_or_else(|| Error::unknown_pool(pool_name))
    }

    /// Check out a connection from the named pool for `requester`.
    ///
    /// Waits without timeout while the pool is saturated.
    pub async fn fetch(
        &self,
        pool_name: &str,
        requester: RequesterContext,
    ) -> Result<BackendConnection> {
        let pool = self.pool(pool_name)?;

        let next = {
            let mut state = pool.state.lock();
            if state.shut_down {
                return Err(Error::ShutDown);
            }
            let spare = if state.has_unreserved_spare() {
                take_spare(pool, &mut state)
            } else {
                None
            };

            if let Some(spare) = spare {
                Next::Spare(spare)
            } else if state.occupied() >= pool.config.max_conns {
                state.pending_fetch_count += 1;
                debug!(
                    pool = %pool.name,
                    pending = state.pending_fetch_count,
                    "Pool saturated, parking fetch"
                );
                Next::Park(state.waiters.park())
            } else {
                Next::Create(InitReservation::reserve(pool, &mut state))
            }
        };

        let mut conn = match next {
            Next::Spare(spare) => self.claim(pool, spare).await?,
            Next::Create(reservation) => {
                self.factory
                    .init_conn(pool, reservation, &self.owners)
                    .await?
            }
            Next::Park(rx) => self.wait_for_spare(pool, rx).await?,
        };
        conn.requester = Some(requester);
        Ok(conn)
    }

    async fn wait_for_spare(&self, pool: &Arc<Pool>, rx: WakeReceiver) -> Result<BackendConnection> {
        let mut parked = ParkedFetch {
            pool: Arc::clone(pool),
            rx,
            resolved: false,
        };
        let woke = (&mut parked.rx).await;

        let spare = {
            let mut state = pool.state.lock();
            parked.resolved = true;
            state.pending_fetch_count -= 1;

            let token = match woke {
                Ok(token) => token,
                Err(_) => {
                    warn!(pool = %pool.name, "Parked fetch woken without a connection");
                    return Err(Error::exhausted(
                        &pool.name,
                        "reached max connections, cannot pend fetch",
                    ));
                }
            };
            state.resume_fetch_count -= 1;
            trace!(pool = %pool.name, token = %token, "Parked fetch resumed");

            take_spare(pool, &mut state).ok_or_else(|| {
                Error::exhausted(&pool.name, "woken but no spare connection is left")
            })?
        };

        self.claim(pool, spare).await
    }

    async fn claim(&self, pool: &Arc<Pool>, spare: Spare) -> Result<BackendConnection> {
        match spare {
            Spare::Healthy(conn) => Ok(conn),
            Spare::Dead(dead, reservation) => self.replace(pool, dead, reservation).await,
        }
    }

    /// Hand a connection back to its pool.
    ///
    /// Healthy connections are pooled (waking one parked fetch) unless the
    /// spare list is at its threshold and the connection has been idle for
    /// the eviction window, in which case it is closed. Disconnected
    /// connections are dropped from the bookkeeping.
    pub async fn recycle(&self, mut conn: BackendConnection) -> Result<()> {
        let id = conn.id();
        let pool_name = self
            .owners
            .lock()
            .get(&id)
            .cloned()
            .ok_or(Error::UnknownConnection { id })?;
        let pool = self.pool(&pool_name)?;

        let disposal = {
            let mut state = pool.state.lock();
            if !state.busy.remove(&id) {
                return Err(Error::UnknownConnection { id });
            }

            if !conn.is_connected() {
                state.forget(id);
                Disposal::Dead
            } else if state.shut_down || state.should_evict(id, &pool.config, Instant::now()) {
                state.forget(id);
                Disposal::Evicted(conn)
            } else {
                conn.requester = None;
                Disposal::Pooled {
                    woke_waiter: state.push_spare(conn),
                }
            }
        };

        match disposal {
            Disposal::Pooled { woke_waiter } => {
                debug!(pool = %pool.name, conn_id = %id, woke_waiter, "Connection returned to spare list");
            }
            Disposal::Evicted(mut conn) => {
                self.owners.lock().remove(&id);
                conn.close().await;
                debug!(pool = %pool.name, conn_id = %id, "Closed connection over spare threshold");
            }
            Disposal::Dead => {
                self.owners.lock().remove(&id);
                debug!(pool = %pool.name, conn_id = %id, "Dropped disconnected connection");
            }
        }
        Ok(())
    }

    /// Replace a disconnected connection with a freshly created one.
    ///
    /// A connection that is still connected is returned unchanged. Fails with
    /// `UnknownConnection` unless `conn` is checked out of `pool_name`.
    pub async fn reconnect(
        &self,
        conn: BackendConnection,
        pool_name: &str,
    ) -> Result<BackendConnection> {
        let pool = self.pool(pool_name)?;
        let id = conn.id();
        let owned = self
            .owners
            .lock()
            .get(&id)
            .is_some_and(|owner| owner == pool_name);
        if !owned {
            return Err(Error::UnknownConnection { id });
        }
        if conn.is_connected() {
            return Ok(conn);
        }

        let reservation = {
            let mut state = pool.state.lock();
            if !state.busy.contains(&id) {
                return Err(Error::UnknownConnection { id });
            }
            state.forget(id);
            InitReservation::reserve(pool, &mut state)
        };
        self.replace(pool, conn, reservation).await
    }

    async fn replace(
        &self,
        pool: &Arc<Pool>,
        mut dead: BackendConnection,
        reservation: InitReservation,
    ) -> Result<BackendConnection> {
        self.owners.lock().remove(&dead.id());
        warn!(pool = %pool.name, conn_id = %dead.id(), "Replacing disconnected connection");
        dead.close().await;

        let requester = dead.requester.take();
        let mut conn = self
            .factory
            .init_conn(pool, reservation, &self.owners)
            .await?;
        conn.requester = requester;
        Ok(conn)
    }

    /// Tear down every pool.
    ///
    /// Parked fetches fail with `PoolExhausted`, spare connections are
    /// closed and later fetches fail with `ShutDown`. Busy connections are
    /// closed when they are recycled.
    pub async fn shutdown(&self) {
        let Some(pools) = self.pools.get() else {
            return;
        };

        for pool in pools.values() {
            let (spare, woken) = {
                let mut state = pool.state.lock();
                state.shut_down = true;
                let woken = state.waiters.close();
                let spare = std::mem::take(&mut state.spare);
                for conn in &spare {
                    state.forget(conn.id());
                }
                (spare, woken)
            };

            let closed = spare.len();
            for mut conn in spare {
                self.owners.lock().remove(&conn.id());
                conn.close().await;
            }
            info!(pool = %pool.name, closed, woken, "Pool shut down");
        }
    }
}

/// Pop the most recently returned spare. A healthy one is marked busy; a
/// disconnected one is forgotten and its slot carried into a reservation.
fn take_spare(pool: &Arc<Pool>, state: &mut PoolState) -> Option<Spare> {
    let conn = state.spare.pop()?;
    let id = conn.id();
    if conn.is_connected() {
        state.mark_busy(id, Instant::now());
        debug!(pool = %pool.name, conn_id = %id, "Reusing spare connection");
        Some(Spare::Healthy(conn))
    } else {
        state.forget(id);
        Some(Spare::Dead(conn, InitReservation::reserve(pool, state)))
    }
}

impl std::fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolManager")
            .field("pools", &self.pool_names())
            .field("live_connections", &self.owners.lock().len())
            .field("factory", &self.factory)
            .finish()
    }
}
