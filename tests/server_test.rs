//! Integration tests for the server loop.
//!
//! Runs the real accept loop and workers over TCP against an in-memory
//! account service backed by the crate's own connection pool, so the
//! whole triad (pool, dispatch, worker lifecycle) is exercised without
//! a database.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use authd::db::{ConnectionPool, PoolEntry};
use authd::protocol::{decode_message, encode_message, Message, MessageKind, User};
use authd::server::worker::{read_frame, write_frame};
use authd::server::Server;
use authd::service::AccountService;

const MAX_FRAME: usize = 64 * 1024;

struct FakeConn;

impl PoolEntry for FakeConn {
    fn is_valid(&self) -> bool {
        true
    }
}

/// In-memory account store that borrows a pooled connection per call,
/// holding it for `hold` to make exhaustion observable.
struct MemoryAccounts {
    pool: Arc<ConnectionPool<FakeConn>>,
    users: Mutex<HashMap<String, User>>,
    hold: Duration,
}

impl MemoryAccounts {
    fn new(pool_size: usize, hold: Duration) -> Arc<Self> {
        let entries = (0..pool_size).map(|_| FakeConn).collect();
        Arc::new(Self {
            pool: Arc::new(ConnectionPool::from_entries(entries)),
            users: Mutex::new(HashMap::new()),
            hold,
        })
    }
}

#[async_trait]
impl AccountService for MemoryAccounts {
    async fn sign_up(&self, mut user: User) -> Message {
        let Some(_conn) = self.pool.acquire() else {
            return Message::new(MessageKind::ConnectionError);
        };
        tokio::time::sleep(self.hold).await;

        let mut users = self.users.lock();
        if users.contains_key(&user.login) {
            return Message::new(MessageKind::LoginExistError);
        }
        user.id = Some(users.len() as i32 + 1);
        users.insert(user.login.clone(), user.clone());
        Message::with_user(MessageKind::OkResponse, &user)
    }

    async fn sign_in(&self, user: User) -> Message {
        let Some(_conn) = self.pool.acquire() else {
            return Message::new(MessageKind::ConnectionError);
        };
        tokio::time::sleep(self.hold).await;

        let users = self.users.lock();
        match users.get(&user.login) {
            Some(found) if found.password == user.password && found.active => {
                Message::with_user(MessageKind::LoginOk, found)
            }
            Some(found) if found.password == user.password => {
                Message::new(MessageKind::NonActive)
            }
            _ => Message::new(MessageKind::SigninError),
        }
    }

    async fn get_user(&self, user: User) -> Message {
        let Some(_conn) = self.pool.acquire() else {
            return Message::new(MessageKind::ConnectionError);
        };
        let users = self.users.lock();
        match users.get(&user.login) {
            Some(found) if found.password == user.password => {
                Message::with_user(MessageKind::GetOk, found)
            }
            _ => Message::new(MessageKind::GetFail),
        }
    }

    async fn countries(&self) -> Message {
        let Some(_conn) = self.pool.acquire() else {
            return Message::new(MessageKind::CountriesError);
        };
        let names = vec!["Araba".to_string(), "Bizkaia".to_string(), "Gipuzkoa".to_string()];
        Message::with_names(MessageKind::CountriesOk, &names)
    }
}

async fn start_server(
    service: Arc<dyn AccountService>,
) -> (std::net::SocketAddr, CancellationToken, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server = Server::new(listener, service, MAX_FRAME, Duration::from_secs(5));
    let addr = server.local_addr().unwrap();
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(server.serve(cancel.clone()));
    (addr, cancel, handle)
}

/// One full request/response exchange on a fresh connection.
async fn request(addr: std::net::SocketAddr, message: &Message) -> Message {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    write_frame(&mut stream, &encode_message(message).unwrap())
        .await
        .unwrap();
    let frame = read_frame(&mut stream, MAX_FRAME).await.unwrap();
    decode_message(&frame).unwrap()
}

fn user(login: &str, password: &str) -> User {
    User {
        login: login.into(),
        password: password.into(),
        name: "Ana".into(),
        street: "Calle Mayor 1".into(),
        zip: "48001".into(),
        city: "Bilbao".into(),
        active: true,
        id: None,
    }
}

#[tokio::test]
async fn register_then_sign_in() {
    let service = MemoryAccounts::new(4, Duration::ZERO);
    let (addr, cancel, handle) = start_server(service).await;

    let response = request(
        addr,
        &Message::with_user(MessageKind::SignUpRequest, &user("a@x.com", "p")),
    )
    .await;
    assert_eq!(response.kind, MessageKind::OkResponse);
    assert!(response.user().unwrap().id.is_some());

    let response = request(
        addr,
        &Message::with_user(MessageKind::SignInRequest, &user("a@x.com", "p")),
    )
    .await;
    assert_eq!(response.kind, MessageKind::LoginOk);

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn duplicate_login_is_detected_once() {
    let service = MemoryAccounts::new(4, Duration::ZERO);
    let (addr, cancel, handle) = start_server(service).await;

    let sign_up = Message::with_user(MessageKind::SignUpRequest, &user("dup@x.com", "p"));
    assert_eq!(request(addr, &sign_up).await.kind, MessageKind::OkResponse);
    assert_eq!(request(addr, &sign_up).await.kind, MessageKind::LoginExistError);

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn wrong_password_and_inactive_account() {
    let service = MemoryAccounts::new(4, Duration::ZERO);
    let (addr, cancel, handle) = start_server(service).await;

    let mut inactive = user("off@x.com", "p");
    inactive.active = false;
    request(addr, &Message::with_user(MessageKind::SignUpRequest, &inactive)).await;

    let response = request(
        addr,
        &Message::with_user(MessageKind::SignInRequest, &user("off@x.com", "wrong")),
    )
    .await;
    assert_eq!(response.kind, MessageKind::SigninError);

    let response = request(
        addr,
        &Message::with_user(MessageKind::SignInRequest, &user("off@x.com", "p")),
    )
    .await;
    assert_eq!(response.kind, MessageKind::NonActive);

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn countries_roundtrip() {
    let service = MemoryAccounts::new(2, Duration::ZERO);
    let (addr, cancel, handle) = start_server(service).await;

    let response = request(addr, &Message::new(MessageKind::CountriesRequest)).await;
    assert_eq!(response.kind, MessageKind::CountriesOk);
    assert_eq!(response.names().unwrap().len(), 3);

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn pool_of_two_rejects_the_third_concurrent_client() {
    let service = MemoryAccounts::new(2, Duration::from_millis(300));
    request_seed(&service).await;
    let (addr, cancel, handle) = start_server(service.clone()).await;

    let sign_in = Message::with_user(MessageKind::SignInRequest, &user("c@x.com", "p"));
    let mut tasks = Vec::new();
    for _ in 0..3 {
        let sign_in = sign_in.clone();
        tasks.push(tokio::spawn(async move { request(addr, &sign_in).await }));
    }

    let mut ok = 0;
    let mut exhausted = 0;
    for task in tasks {
        match task.await.unwrap().kind {
            MessageKind::LoginOk => ok += 1,
            MessageKind::ConnectionError => exhausted += 1,
            other => panic!("unexpected response kind: {other:?}"),
        }
    }
    assert_eq!(ok, 2);
    assert_eq!(exhausted, 1);

    // Once connections are released the next client succeeds again.
    let response = request(addr, &sign_in).await;
    assert_eq!(response.kind, MessageKind::LoginOk);

    cancel.cancel();
    handle.await.unwrap();
}

/// Seed one account directly, bypassing the wire.
async fn request_seed(service: &Arc<MemoryAccounts>) {
    let response = service.sign_up(user("c@x.com", "p")).await;
    assert_eq!(response.kind, MessageKind::OkResponse);
}

#[tokio::test]
async fn connections_return_to_the_pool_after_each_worker() {
    let service = MemoryAccounts::new(3, Duration::ZERO);
    let pool = Arc::clone(&service.pool);
    let (addr, cancel, handle) = start_server(service).await;

    for i in 0..5 {
        let login = format!("u{i}@x.com");
        request(
            addr,
            &Message::with_user(MessageKind::SignUpRequest, &user(&login, "p")),
        )
        .await;
    }
    assert_eq!(pool.available(), pool.capacity());

    cancel.cancel();
    handle.await.unwrap();
    assert_eq!(pool.available(), pool.capacity());
}

#[tokio::test]
async fn shutdown_stops_accepting_and_drains() {
    let service = MemoryAccounts::new(2, Duration::ZERO);
    let pool = Arc::clone(&service.pool);
    let (addr, cancel, handle) = start_server(service).await;

    // A connected but idle client; shutdown interrupts its worker.
    let idle = TcpStream::connect(addr).await.unwrap();

    cancel.cancel();
    handle.await.unwrap();
    drop(idle);

    assert!(TcpStream::connect(addr).await.is_err());

    // The caller closes the pool exactly once after the drain.
    pool.close_all();
    assert_eq!(pool.available(), 0);
    pool.close_all();
    assert_eq!(pool.available(), 0);
}

#[tokio::test]
async fn garbage_request_gets_no_response() {
    let service = MemoryAccounts::new(2, Duration::ZERO);
    let (addr, cancel, handle) = start_server(service).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    write_frame(&mut stream, b"definitely not an envelope")
        .await
        .unwrap();
    let result = read_frame(&mut stream, MAX_FRAME).await;
    assert!(result.is_err());

    cancel.cancel();
    handle.await.unwrap();
}
