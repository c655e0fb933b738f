//! Coordinated shutdown for the server loop.
//!
//! Tracks in-flight workers with RAII guards and drains them before the
//! pool is closed. `Running → Draining → Stopped`.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

const RUNNING: u8 = 0;
const DRAINING: u8 = 1;
const STOPPED: u8 = 2;

/// Shutdown state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Draining,
    Stopped,
}

/// Outcome of a drain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainResult {
    Complete,
    Timeout { remaining: u32 },
}

/// Coordinates worker draining at shutdown.
pub struct ShutdownCoordinator {
    state: AtomicU8,
    in_flight: Arc<AtomicU32>,
    drained: Arc<Notify>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(RUNNING),
            in_flight: Arc::new(AtomicU32::new(0)),
            drained: Arc::new(Notify::new()),
        }
    }

    pub fn state(&self) -> ShutdownState {
        match self.state.load(Ordering::SeqCst) {
            RUNNING => ShutdownState::Running,
            DRAINING => ShutdownState::Draining,
            _ => ShutdownState::Stopped,
        }
    }

    /// Track one worker. `None` once shutdown has begun, so the accept
    /// loop stops admitting new work.
    pub fn track(&self) -> Option<WorkerGuard> {
        if self.state.load(Ordering::SeqCst) != RUNNING {
            return None;
        }
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Some(WorkerGuard {
            in_flight: Arc::clone(&self.in_flight),
            drained: Arc::clone(&self.drained),
        })
    }

    pub fn in_flight(&self) -> u32 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Stop admitting workers and wait for the in-flight ones to finish,
    /// bounded by `timeout`.
    pub async fn initiate(&self, timeout: Duration) -> DrainResult {
        self.state.store(DRAINING, Ordering::SeqCst);
        let result = self.wait_for_drain(timeout).await;
        self.state.store(STOPPED, Ordering::SeqCst);
        result
    }

    async fn wait_for_drain(&self, timeout: Duration) -> DrainResult {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = self.in_flight();
            if remaining == 0 {
                return DrainResult::Complete;
            }
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            if left.is_zero() {
                return DrainResult::Timeout { remaining };
            }
            tokio::select! {
                _ = self.drained.notified() => {}
                _ = tokio::time::sleep(left) => {
                    let remaining = self.in_flight();
                    if remaining == 0 {
                        return DrainResult::Complete;
                    }
                    return DrainResult::Timeout { remaining };
                }
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for one in-flight worker.
pub struct WorkerGuard {
    in_flight: Arc<AtomicU32>,
    drained: Arc<Notify>,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.drained.notify_one();
    }
}
