//! Bounded Connection Pool
//!
//! Holds reusable connections to the primary backend with:
//! - A hard cap on open connections (semaphore permits)
//! - Callers that wait, rather than fail, up to the acquire timeout
//! - Connection return via the RAII pattern
//! - Discarding of connections abandoned mid-statement
//!
//! # Connection Lifecycle
//!
//! 1. `acquire()` - Pop an idle connection or open a new one
//! 2. Use the connection through the `PooledConnection` guard
//! 3. `PooledConnection::Drop` - Sends the connection back over a channel
//!
//! `Drop` cannot be async, so returns travel over an unbounded mpsc channel
//! and are folded back into the idle list on the next `acquire()`. A guard
//! dropped while marked busy (the caller's future was cancelled mid-query)
//! closes its connection instead of returning it, since the session may
//! still be running the abandoned statement.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, OwnedSemaphorePermit, Semaphore};

// ============================================================================
// Connector
// ============================================================================

/// Opens and closes connections for a pool
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: Send + 'static;

    async fn connect(&self) -> Result<Self::Connection, PoolError>;

    /// Gracefully close a connection leaving the pool
    async fn disconnect(&self, _connection: Self::Connection) {}
}

// ============================================================================
// Pool Types
// ============================================================================

#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Connections opened eagerly by `warm_up`
    pub min_size: usize,
    /// Maximum connections open at once
    pub max_size: usize,
    /// How long `acquire` waits for a free slot
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 2,
            max_size: 10,
            acquire_timeout: Duration::from_secs(10),
        }
    }
}

/// Statistics for a connection pool
#[derive(Clone, Debug, Default, Serialize)]
pub struct PoolStats {
    /// Total connections created
    pub connections_created: u64,
    /// Total connections closed or discarded
    pub connections_closed: u64,
    /// Connections currently checked out
    pub active_connections: usize,
    /// Connections idle in the pool
    pub idle_connections: usize,
    /// Callers waiting for a slot
    pub waiting_requests: usize,
    /// Connection errors
    pub connection_errors: u64,
    /// Connections put back for reuse
    pub connections_reused: u64,
    /// Acquires that gave up waiting
    pub acquire_timeouts: u64,
}

#[derive(Debug, Default)]
struct PoolStatsAtomic {
    connections_created: AtomicU64,
    connections_closed: AtomicU64,
    active_connections: AtomicUsize,
    waiting_requests: AtomicUsize,
    connection_errors: AtomicU64,
    connections_reused: AtomicU64,
    acquire_timeouts: AtomicU64,
}

impl PoolStatsAtomic {
    fn snapshot(&self) -> PoolStats {
        PoolStats {
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            idle_connections: 0, // Calculated separately
            waiting_requests: self.waiting_requests.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            connections_reused: self.connections_reused.load(Ordering::Relaxed),
            acquire_timeouts: self.acquire_timeouts.load(Ordering::Relaxed),
        }
    }
}

/// A connection on its way back to the pool
struct Returned<T> {
    connection: T,
    reusable: bool,
}

// ============================================================================
// Connection Pool
// ============================================================================

pub struct ConnectionPool<C: Connector> {
    connector: C,
    config: PoolConfig,
    /// Idle connections, most recently returned last
    idle: Mutex<Vec<C::Connection>>,
    /// One permit per connection that may be checked out
    semaphore: Arc<Semaphore>,
    stats: Arc<PoolStatsAtomic>,
    closed: AtomicBool,
    return_tx: mpsc::UnboundedSender<Returned<C::Connection>>,
    /// Taken on close so late returns are dropped rather than queued
    return_rx: Mutex<Option<mpsc::UnboundedReceiver<Returned<C::Connection>>>>,
}

impl<C: Connector> ConnectionPool<C> {
    #[must_use]
    pub fn new(connector: C, config: PoolConfig) -> Arc<Self> {
        let (return_tx, return_rx) = mpsc::unbounded_channel();
        let max = config.max_size.max(1);

        Arc::new(Self {
            connector,
            idle: Mutex::new(Vec::with_capacity(max)),
            semaphore: Arc::new(Semaphore::new(max)),
            stats: Arc::new(PoolStatsAtomic::default()),
            closed: AtomicBool::new(false),
            return_tx,
            return_rx: Mutex::new(Some(return_rx)),
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Open `min_size` connections up front
    ///
    /// Succeeds if at least one connection opened (or `min_size` is zero).
    ///
    /// # Errors
    ///
    /// Returns the last connect error when no connection could be opened.
    pub async fn warm_up(&self) -> Result<usize, PoolError> {
        let target = self.config.min_size.min(self.config.max_size);
        let mut opened = 0;
        let mut last_error = None;

        for _ in 0..target {
            match self.create_connection().await {
                Ok(conn) => {
                    self.idle.lock().await.push(conn);
                    opened += 1;
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Pool warm-up connection failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if opened == 0 => Err(e),
            _ => Ok(opened),
        }
    }

    /// Fold connections returned by dropped guards back into the idle list
    pub async fn process_returns(&self) {
        let mut rx_guard = self.return_rx.lock().await;
        let Some(rx) = rx_guard.as_mut() else {
            return;
        };

        let mut discarded = Vec::new();
        while let Ok(returned) = rx.try_recv() {
            if returned.reusable && !self.is_closed() {
                self.idle.lock().await.push(returned.connection);
                self.stats
                    .connections_reused
                    .fetch_add(1, Ordering::Relaxed);
            } else {
                discarded.push(returned.connection);
            }
        }
        drop(rx_guard);

        for conn in discarded {
            self.close_connection(conn).await;
        }
    }

    /// Check out a connection, waiting up to `acquire_timeout` for a free slot
    ///
    /// # Errors
    ///
    /// `PoolClosed` after `close()`, `Timeout` when no slot freed up in time,
    /// or `ConnectionFailed` when a new connection could not be opened.
    pub async fn acquire(&self) -> Result<PooledConnection<C::Connection>, PoolError> {
        if self.is_closed() {
            return Err(PoolError::PoolClosed);
        }

        self.process_returns().await;

        self.stats.waiting_requests.fetch_add(1, Ordering::Relaxed);
        let acquired = tokio::time::timeout(
            self.config.acquire_timeout,
            self.semaphore.clone().acquire_owned(),
        )
        .await;
        self.stats.waiting_requests.fetch_sub(1, Ordering::Relaxed);

        let permit = match acquired {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::PoolClosed),
            Err(_) => {
                self.stats.acquire_timeouts.fetch_add(1, Ordering::Relaxed);
                return Err(PoolError::Timeout(self.config.acquire_timeout));
            }
        };

        // A guard may have been dropped while we waited for its permit
        self.process_returns().await;

        let idle = self.idle.lock().await.pop();
        let connection = match idle {
            Some(conn) => conn,
            None => match self.create_connection().await {
                Ok(conn) => conn,
                Err(e) => {
                    drop(permit);
                    return Err(e);
                }
            },
        };

        self.stats
            .active_connections
            .fetch_add(1, Ordering::Relaxed);

        Ok(PooledConnection {
            connection: Some(connection),
            busy: false,
            healthy: true,
            return_tx: self.return_tx.clone(),
            stats: Arc::clone(&self.stats),
            _permit: permit,
        })
    }

    async fn create_connection(&self) -> Result<C::Connection, PoolError> {
        match self.connector.connect().await {
            Ok(conn) => {
                self.stats
                    .connections_created
                    .fetch_add(1, Ordering::Relaxed);
                Ok(conn)
            }
            Err(e) => {
                self.stats.connection_errors.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    async fn close_connection(&self, conn: C::Connection) {
        self.connector.disconnect(conn).await;
        self.stats
            .connections_closed
            .fetch_add(1, Ordering::Relaxed);
    }

    pub async fn stats(&self) -> PoolStats {
        self.process_returns().await;

        let mut stats = self.stats.snapshot();
        stats.idle_connections = self.idle.lock().await.len();
        stats
    }

    /// Close all idle connections
    pub async fn drain(&self) {
        self.process_returns().await;

        let idle: Vec<_> = self.idle.lock().await.drain(..).collect();
        for conn in idle {
            self.close_connection(conn).await;
        }
    }

    /// Stop handing out connections and close everything idle
    ///
    /// Waiters fail with `PoolClosed`. Connections still checked out are
    /// closed when their guards drop. Safe to call more than once.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.semaphore.close();
        self.drain().await;
        // Late returns now fail to send and the connection is dropped
        self.return_rx.lock().await.take();

        tracing::info!("Connection pool closed");
    }
}

// ============================================================================
// Pooled Connection (RAII Guard)
// ============================================================================

/// A connection borrowed from the pool
///
/// Derefs to the underlying connection. Returned to the pool on drop unless
/// it was marked unhealthy or dropped while busy.
#[derive(Debug)]
pub struct PooledConnection<T: Send + 'static> {
    connection: Option<T>,
    busy: bool,
    healthy: bool,
    return_tx: mpsc::UnboundedSender<Returned<T>>,
    stats: Arc<PoolStatsAtomic>,
    _permit: OwnedSemaphorePermit,
}

impl<T: Send + 'static> PooledConnection<T> {
    /// Flag that a statement is in flight on this connection
    pub fn mark_busy(&mut self) {
        self.busy = true;
    }

    /// Flag that the in-flight statement completed
    pub fn mark_idle(&mut self) {
        self.busy = false;
    }

    /// Close instead of returning on release
    pub fn mark_unhealthy(&mut self) {
        self.healthy = false;
    }

    fn reusable(&self) -> bool {
        self.healthy && !self.busy
    }
}

impl<T: Send + 'static> Deref for PooledConnection<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Only `Drop` takes the connection out
        match self.connection.as_ref() {
            Some(conn) => conn,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl<T: Send + 'static> DerefMut for PooledConnection<T> {
    fn deref_mut(&mut self) -> &mut T {
        match self.connection.as_mut() {
            Some(conn) => conn,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl<T: Send + 'static> Drop for PooledConnection<T> {
    fn drop(&mut self) {
        self.stats
            .active_connections
            .fetch_sub(1, Ordering::Relaxed);

        let reusable = self.reusable();
        if !reusable {
            tracing::debug!(busy = self.busy, "Discarding pooled connection");
        }

        if let Some(connection) = self.connection.take() {
            if self
                .return_tx
                .send(Returned {
                    connection,
                    reusable,
                })
                .is_err()
            {
                // Pool closed; the connection is dropped here
                self.stats
                    .connections_closed
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
        // Permit drops after this, freeing the slot
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Pool errors
#[derive(Clone, Debug, Error)]
pub enum PoolError {
    #[error("Connection pool is closed")]
    PoolClosed,

    /// Timed out waiting for a free connection slot
    #[error("Timed out after {0:?} waiting for a connection")]
    Timeout(Duration),

    #[error("Failed to create connection: {0}")]
    ConnectionFailed(String),
}
