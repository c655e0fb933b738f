//! Data-access operations over pooled PostgreSQL connections.
//!
//! Each operation borrows one connection, runs its statements, and lets
//! the RAII guard return the connection on every exit path. All faults
//! are translated into the wire taxonomy here; no database error crosses
//! into the worker.
//!
//! A user is two joined rows created together: the partner row
//! (identity/address) and the credentials row referencing it.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_postgres::error::SqlState;
use tokio_postgres::Transaction;
use tracing::{error, info, warn};

use crate::db::password::{hash_password, verify_password};
use crate::db::pool::{ConnectionPool, PgConn, PoolEntry, PooledConn};
use crate::protocol::{Message, MessageKind, User};
use crate::service::AccountService;

const SQL_INSERT_PARTNER: &str = "INSERT INTO res_partner \
     (company_id, name, display_name, street, zip, city, email) \
     VALUES (1, $1, $2, $3, $4, $5, $6) RETURNING id";

const SQL_INSERT_USER: &str = "INSERT INTO res_users \
     (company_id, partner_id, active, login, password, notification_type) \
     VALUES (1, $1, $2, $3, $4, 'Email') RETURNING id";

const SQL_SIGN_IN: &str = "SELECT p.name, u.active, u.password \
     FROM res_users u JOIN res_partner p ON u.partner_id = p.id \
     WHERE u.login = $1";

const SQL_GET_USER: &str = "SELECT p.name, p.street, p.zip, p.city, u.active, u.password \
     FROM res_users u JOIN res_partner p ON u.partner_id = p.id \
     WHERE u.login = $1";

const SQL_REGIONS: &str = "SELECT s.name \
     FROM res_country_state s JOIN res_country c ON s.country_id = c.id \
     WHERE c.code = $1 ORDER BY s.name";

/// Directory lookups are scoped to one country.
const REGION_COUNTRY_CODE: &str = "ES";

/// Stateless-per-call data access over a shared connection pool.
pub struct Dao {
    pool: Arc<ConnectionPool<PgConn>>,
}

impl Dao {
    pub fn new(pool: Arc<ConnectionPool<PgConn>>) -> Self {
        Self { pool }
    }

    /// Borrow a valid connection, or `None` with the exhaustion logged.
    fn checkout(&self) -> Option<PooledConn<PgConn>> {
        let conn = self.pool.acquire();
        match conn {
            Some(conn) if conn.is_valid() => Some(conn),
            Some(_) => {
                warn!("pooled connection failed the validity probe");
                None
            }
            None => {
                warn!("no database connection available");
                None
            }
        }
    }
}

#[async_trait]
impl AccountService for Dao {
    async fn sign_up(&self, user: User) -> Message {
        let Some(mut conn) = self.checkout() else {
            return Message::with_user(MessageKind::ConnectionError, &scrubbed(&user));
        };

        let hashed = match hash_password(&user.password) {
            Ok(hashed) => hashed,
            Err(e) => {
                error!(error = %e, "password hashing failed");
                return Message::with_user(MessageKind::BadResponse, &scrubbed(&user));
            }
        };

        match register(&mut conn, &user, &hashed).await {
            Ok(message) => message,
            Err(e) if e.code() == Some(&SqlState::UNIQUE_VIOLATION) => {
                warn!(login = %user.login, "login already registered");
                Message::with_user(MessageKind::LoginExistError, &scrubbed(&user))
            }
            Err(e) => {
                error!(error = %e, login = %user.login, "registration transaction failed");
                Message::with_user(MessageKind::BadResponse, &scrubbed(&user))
            }
        }
    }

    async fn sign_in(&self, user: User) -> Message {
        let Some(conn) = self.checkout() else {
            return Message::with_user(MessageKind::ConnectionError, &scrubbed(&user));
        };

        let row = match conn.query_opt(SQL_SIGN_IN, &[&user.login]).await {
            Ok(row) => row,
            Err(e) => {
                error!(error = %e, "sign-in query failed");
                return Message::new(MessageKind::BadResponse);
            }
        };

        // Unknown login and wrong password are deliberately the same
        // outcome.
        let Some(row) = row else {
            return Message::new(MessageKind::SigninError);
        };
        let stored: String = row.get("password");
        if !verify_password(&user.password, &stored) {
            return Message::new(MessageKind::SigninError);
        }

        let active: bool = row.get("active");
        if !active {
            return Message::new(MessageKind::NonActive);
        }

        let found = User {
            login: user.login,
            name: row.get("name"),
            active,
            ..User::default()
        };
        Message::with_user(MessageKind::LoginOk, &found)
    }

    async fn get_user(&self, user: User) -> Message {
        let Some(conn) = self.checkout() else {
            return Message::with_user(MessageKind::ConnectionError, &scrubbed(&user));
        };

        let row = match conn.query_opt(SQL_GET_USER, &[&user.login]).await {
            Ok(row) => row,
            Err(e) => {
                error!(error = %e, "profile query failed");
                return Message::new(MessageKind::BadResponse);
            }
        };

        let Some(row) = row else {
            return Message::new(MessageKind::GetFail);
        };
        let stored: String = row.get("password");
        if !verify_password(&user.password, &stored) {
            return Message::new(MessageKind::GetFail);
        }

        let found = User {
            login: user.login,
            name: row.get("name"),
            street: row.get("street"),
            zip: row.get("zip"),
            city: row.get("city"),
            active: row.get("active"),
            ..User::default()
        };
        Message::with_user(MessageKind::GetOk, &found)
    }

    async fn countries(&self) -> Message {
        let Some(conn) = self.checkout() else {
            return Message::new(MessageKind::CountriesError);
        };

        match conn.query(SQL_REGIONS, &[&REGION_COUNTRY_CODE]).await {
            Ok(rows) => {
                let names: Vec<String> = rows.iter().map(|row| row.get(0)).collect();
                Message::with_names(MessageKind::CountriesOk, &names)
            }
            Err(e) => {
                error!(error = %e, "region lookup failed");
                Message::new(MessageKind::CountriesError)
            }
        }
    }
}

/// The atomic two-row insert. Partner first, credentials second, one
/// transaction. A missing generated id rolls back and degrades to
/// `SQL_ERROR`; driver errors bubble up to the caller for taxonomy
/// mapping.
async fn register(
    conn: &mut PooledConn<PgConn>,
    user: &User,
    hashed: &str,
) -> Result<Message, tokio_postgres::Error> {
    let tx = conn.transaction().await?;

    let partner = tx
        .query_opt(
            SQL_INSERT_PARTNER,
            &[
                &user.name,
                &user.name,
                &user.street,
                &user.zip,
                &user.city,
                &user.login,
            ],
        )
        .await?;
    let Some(partner) = partner else {
        error!(login = %user.login, "partner insert produced no row");
        rollback(tx).await;
        return Ok(Message::with_user(MessageKind::SqlError, &scrubbed(user)));
    };
    let partner_id: i32 = partner.get(0);

    let credentials = tx
        .query_opt(
            SQL_INSERT_USER,
            &[&partner_id, &user.active, &user.login, &hashed],
        )
        .await?;
    let Some(credentials) = credentials else {
        error!(login = %user.login, "credentials insert produced no row");
        rollback(tx).await;
        return Ok(Message::with_user(MessageKind::SqlError, &scrubbed(user)));
    };
    let user_id: i32 = credentials.get(0);

    tx.commit().await?;
    info!(login = %user.login, id = user_id, "user registered");

    let mut registered = scrubbed(user);
    registered.id = Some(user_id);
    Ok(Message::with_user(MessageKind::OkResponse, &registered))
}

/// A rollback failure is logged but never changes the client-visible
/// outcome.
async fn rollback(tx: Transaction<'_>) {
    if let Err(e) = tx.rollback().await {
        error!(error = %e, "rollback failed");
    }
}

/// Copy of a user with the password removed. Responses never echo
/// credentials.
fn scrubbed(user: &User) -> User {
    User {
        password: String::new(),
        ..user.clone()
    }
}
