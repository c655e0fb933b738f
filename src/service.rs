//! Dispatch seam between the worker and the data-access layer.

use async_trait::async_trait;

use crate::protocol::{Message, User};

/// The operations a worker can dispatch a request to.
///
/// Implementations translate every internal fault into the [`Message`]
/// taxonomy; no backing-store error crosses this boundary.
#[async_trait]
pub trait AccountService: Send + Sync {
    /// Register a new user. Atomic two-row insert.
    async fn sign_up(&self, user: User) -> Message;

    /// Authenticate a user by login and password.
    async fn sign_in(&self, user: User) -> Message;

    /// Authenticate and return the full profile.
    async fn get_user(&self, user: User) -> Message;

    /// Ordered region names for the configured country.
    async fn countries(&self) -> Message;
}
