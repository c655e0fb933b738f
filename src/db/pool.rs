//! Fixed-size pool of live backing-store connections.
//!
//! The pool hands out exclusive ownership of an entry via an RAII guard
//! and reclaims it when the guard drops. Acquire is fail-fast: an empty
//! pool returns `None` immediately, it never blocks and never grows.
//! Every pool operation is a short critical section; the lock is never
//! held across a backing-store call.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_postgres::NoTls;
use tracing::{debug, info, warn};

use crate::config::DbConfig;

/// A live, reusable backing-store connection handle.
pub trait PoolEntry: Send + 'static {
    /// Cheap validity probe. A stale entry is still released back to the
    /// pool; callers decide what to do with an invalid one.
    fn is_valid(&self) -> bool;
}

/// Bounded collection of available entries, shared across workers.
///
/// Entries are checked out LIFO. At any instant each entry is either in
/// the available stack or exclusively owned by one guard, never both.
pub struct ConnectionPool<C: PoolEntry> {
    available: Mutex<Vec<C>>,
    capacity: usize,
    closed: AtomicBool,
}

impl<C: PoolEntry> ConnectionPool<C> {
    /// Build a pool over an existing set of entries. Capacity is fixed to
    /// the number of entries given.
    pub fn from_entries(entries: Vec<C>) -> Self {
        Self {
            capacity: entries.len(),
            available: Mutex::new(entries),
            closed: AtomicBool::new(false),
        }
    }

    /// Pop an entry, or `None` if the pool is exhausted or closed.
    pub fn acquire(self: &Arc<Self>) -> Option<PooledConn<C>> {
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        let entry = self.available.lock().pop()?;
        Some(PooledConn {
            entry: Some(entry),
            pool: Arc::clone(self),
        })
    }

    /// Number of entries currently available for checkout.
    pub fn available(&self) -> usize {
        self.available.lock().len()
    }

    /// Total number of entries the pool was built with.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drain the available set and drop every entry. Idempotent; entries
    /// still checked out are dropped when their guard returns.
    pub fn close_all(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let drained: Vec<C> = {
            let mut available = self.available.lock();
            available.drain(..).collect()
        };
        for entry in drained {
            if !entry.is_valid() {
                debug!("closing connection that was already dead");
            }
            drop(entry);
        }
        info!("connection pool closed");
    }

    fn release(&self, entry: C) {
        if self.closed.load(Ordering::SeqCst) {
            // Pool already drained; the late entry is closed instead of
            // resurrected into a closed pool.
            drop(entry);
            return;
        }
        let mut available = self.available.lock();
        available.push(entry);
        debug!(available = available.len(), "connection released to pool");
    }
}

/// Exclusive ownership of one pool entry for the duration of a borrow.
///
/// Dropping the guard returns the entry to the pool exactly once.
pub struct PooledConn<C: PoolEntry> {
    entry: Option<C>,
    pool: Arc<ConnectionPool<C>>,
}

impl<C: PoolEntry> Deref for PooledConn<C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.entry.as_ref().expect("entry present until drop")
    }
}

impl<C: PoolEntry> DerefMut for PooledConn<C> {
    fn deref_mut(&mut self) -> &mut C {
        self.entry.as_mut().expect("entry present until drop")
    }
}

impl<C: PoolEntry> Drop for PooledConn<C> {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            self.pool.release(entry);
        }
    }
}

/// A pooled PostgreSQL client plus its spawned connection driver.
pub struct PgConn {
    client: tokio_postgres::Client,
}

impl PgConn {
    /// Establish one connection and spawn its driver task. The driver
    /// terminates when the client is dropped.
    pub async fn connect(db: &DbConfig) -> Result<Self, tokio_postgres::Error> {
        let config = db.pg_config()?;
        let (client, connection) = config.connect(NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "database connection terminated");
            }
        });
        Ok(Self { client })
    }
}

impl Deref for PgConn {
    type Target = tokio_postgres::Client;

    fn deref(&self) -> &tokio_postgres::Client {
        &self.client
    }
}

impl DerefMut for PgConn {
    fn deref_mut(&mut self) -> &mut tokio_postgres::Client {
        &mut self.client
    }
}

impl PoolEntry for PgConn {
    fn is_valid(&self) -> bool {
        !self.client.is_closed()
    }
}

impl ConnectionPool<PgConn> {
    /// Eagerly establish `size` connections. An entry that fails to
    /// connect is logged and skipped, so the pool may come up smaller
    /// than requested; construction itself never fails.
    pub async fn connect(db: &DbConfig, size: usize) -> Arc<Self> {
        let mut entries = Vec::with_capacity(size);
        for i in 1..=size {
            match PgConn::connect(db).await {
                Ok(conn) => {
                    debug!(n = i, "connection created and added to pool");
                    entries.push(conn);
                }
                Err(e) => {
                    warn!(n = i, error = %e, "could not create pool connection");
                }
            }
        }
        info!(size = entries.len(), requested = size, "connection pool ready");
        Arc::new(Self::from_entries(entries))
    }
}
