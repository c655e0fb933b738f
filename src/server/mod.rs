//! Accept loop and coordinated shutdown.
//!
//! One worker task per accepted socket, tracked in a `JoinSet` and
//! guarded by the shutdown coordinator. On shutdown the loop stops
//! accepting, cancels workers, drains them within the configured
//! timeout, and the pool is closed exactly once afterwards.

pub mod worker;

use std::io;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::db::{ConnectionPool, Dao};
use crate::service::AccountService;
use crate::shutdown::{DrainResult, ShutdownCoordinator};
use worker::Worker;

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Owns the listening socket and the worker registry.
pub struct Server {
    listener: TcpListener,
    service: Arc<dyn AccountService>,
    coordinator: ShutdownCoordinator,
    max_frame_size: usize,
    shutdown_timeout: std::time::Duration,
}

impl Server {
    pub fn new(
        listener: TcpListener,
        service: Arc<dyn AccountService>,
        max_frame_size: usize,
        shutdown_timeout: std::time::Duration,
    ) -> Self {
        Self {
            listener,
            service,
            coordinator: ShutdownCoordinator::new(),
            max_frame_size,
            shutdown_timeout,
        }
    }

    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept until cancelled or the listener faults, then drain.
    ///
    /// An accept fault is fatal to the loop but not to workers already
    /// running; they are drained the same way as on a requested
    /// shutdown.
    pub async fn serve(self, cancel: CancellationToken) {
        let mut workers = JoinSet::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("shutdown requested, no longer accepting");
                    break;
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let Some(guard) = self.coordinator.track() else {
                                debug!(%peer, "draining, connection refused");
                                continue;
                            };
                            debug!(%peer, "client connected");
                            let worker =
                                Worker::new(stream, Arc::clone(&self.service), self.max_frame_size);
                            let cancel = cancel.clone();
                            workers.spawn(async move {
                                let _guard = guard;
                                tokio::select! {
                                    _ = cancel.cancelled() => {
                                        debug!(%peer, "worker interrupted by shutdown");
                                    }
                                    _ = worker.run() => {}
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "accept failed, stopping server loop");
                            break;
                        }
                    }
                }
            }

            // Reap finished workers without blocking the accept loop.
            while workers.try_join_next().is_some() {}
        }

        cancel.cancel();
        match self.coordinator.initiate(self.shutdown_timeout).await {
            DrainResult::Complete => info!("all workers drained"),
            DrainResult::Timeout { remaining } => {
                warn!(remaining, "drain timed out, aborting remaining workers");
            }
        }
        workers.shutdown().await;
    }
}

/// Wire everything from configuration and run until shutdown.
///
/// Construction is explicit: pool and DAO are built once here and
/// passed down; nothing hides behind a global.
pub async fn run(config: ServerConfig, cancel: CancellationToken) -> Result<(), ServeError> {
    let pool = ConnectionPool::connect(&config.db, config.pool_size).await;
    if pool.capacity() == 0 {
        warn!("pool came up with zero connections; requests will see CONNECTION_ERROR");
    }

    let dao: Arc<dyn AccountService> = Arc::new(Dao::new(Arc::clone(&pool)));
    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(port = config.port, "server listening");

    let server = Server::new(
        listener,
        dao,
        config.max_frame_size,
        config.shutdown_timeout,
    );
    server.serve(cancel).await;

    pool.close_all();
    info!("server stopped");
    Ok(())
}
