//! PostgreSQL backing store: connection pool, credentials hashing, and
//! the data-access layer.

pub mod dao;
pub mod password;
pub mod pool;

pub use dao::Dao;
pub use pool::{ConnectionPool, PgConn, PoolEntry, PooledConn};
