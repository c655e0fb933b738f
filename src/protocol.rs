//! Wire format for the one-shot request/response exchange.
//!
//! Every client connection carries exactly one request frame and at most
//! one response frame. The envelope is a kind discriminant plus a body
//! whose shape depends on the kind (a [`User`], a list of strings, or
//! nothing). Size limits are enforced before parsing.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Maximum encoded message size. Checked before any parse.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid message format: {0}")]
    InvalidFormat(String),

    #[error("Body does not match message kind: {0}")]
    BadBody(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// Request and response discriminants.
///
/// An unrecognized discriminant decodes to [`MessageKind::Unknown`] so the
/// worker can answer `BAD_RESPONSE` instead of dropping the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    SignUpRequest,
    SignInRequest,
    #[serde(rename = "GET_USER")]
    GetUserRequest,
    CountriesRequest,

    OkResponse,
    LoginOk,
    GetOk,
    CountriesOk,
    LoginExistError,
    SigninError,
    NonActive,
    GetFail,
    CountriesError,
    SqlError,
    ConnectionError,
    BadResponse,

    #[serde(other)]
    Unknown,
}

impl MessageKind {
    /// True for the kinds a client may open a connection with.
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            MessageKind::SignUpRequest
                | MessageKind::SignInRequest
                | MessageKind::GetUserRequest
                | MessageKind::CountriesRequest
        )
    }
}

/// A registration/authentication record.
///
/// Backed by two joined rows: the partner row (identity/address) and the
/// credentials row (login/password/active). `id` is the credentials row
/// identifier, assigned after a successful insert.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub login: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub street: String,
    #[serde(default)]
    pub zip: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub id: Option<i32>,
}

/// The request/response envelope. Constructed fresh for every exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub kind: MessageKind,
    #[serde(default)]
    pub body: Value,
}

impl Message {
    /// An envelope with no body.
    pub fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            body: Value::Null,
        }
    }

    /// An envelope carrying a user payload.
    pub fn with_user(kind: MessageKind, user: &User) -> Self {
        Self {
            kind,
            // Serializing a plain struct cannot fail in practice.
            body: serde_json::to_value(user).unwrap_or_default(),
        }
    }

    /// An envelope carrying an ordered list of strings.
    pub fn with_names(kind: MessageKind, names: &[String]) -> Self {
        Self {
            kind,
            body: serde_json::to_value(names).unwrap_or_default(),
        }
    }

    /// Parse the body as a [`User`].
    pub fn user(&self) -> Result<User, ProtocolError> {
        serde_json::from_value(self.body.clone())
            .map_err(|e| ProtocolError::BadBody(e.to_string()))
    }

    /// Parse the body as a list of strings.
    pub fn names(&self) -> Result<Vec<String>, ProtocolError> {
        serde_json::from_value(self.body.clone())
            .map_err(|e| ProtocolError::BadBody(e.to_string()))
    }
}

/// Encode a message with the size limit enforced.
pub fn encode_message(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    let bytes = serde_json::to_vec(message)?;
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: bytes.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(bytes)
}

/// Decode a message. The size check happens before parsing so oversized
/// input never reaches the deserializer.
pub fn decode_message(bytes: &[u8]) -> Result<Message, ProtocolError> {
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: bytes.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(serde_json::from_slice(bytes)?)
}
