//! authd — concurrent sign-up/sign-in socket server.
//!
//! A client opens a TCP connection, sends one length-prefixed request
//! and receives one response. Requests dispatch through the
//! [`service::AccountService`] seam to the data-access layer, which
//! borrows persistent PostgreSQL connections from a fixed-size,
//! fail-fast [`db::ConnectionPool`].
//!
//! # Invariants
//!
//! - A pool entry is either available or exclusively checked out, never
//!   both; the pool never grows past its construction size.
//! - The partner and credentials rows of a user are created in one
//!   transaction; a credentials row never exists without its partner.
//! - Every worker closes its socket and returns its connection on every
//!   exit path, including faults and shutdown.

pub mod config;
pub mod db;
pub mod logging;
pub mod protocol;
pub mod server;
pub mod service;
pub mod shutdown;

pub use config::{ConfigError, DbConfig, ServerConfig};
pub use protocol::{Message, MessageKind, User};
pub use server::{run, ServeError, Server};
pub use service::AccountService;
