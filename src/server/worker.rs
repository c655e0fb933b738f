//! Per-connection worker: one request, one response, then close.
//!
//! `OPEN → READ_REQUEST → DISPATCH → WRITE_RESPONSE → CLOSED`. A frame
//! that cannot be read or decoded drops the connection without a
//! response; a request whose body fails to parse, or whose kind is not
//! recognized, is answered with `BAD_RESPONSE`. The socket is closed on
//! every exit path when the worker drops.

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::protocol::{decode_message, encode_message, Message, MessageKind};
use crate::service::AccountService;

/// Handler owning one client socket for one request/response cycle.
pub struct Worker<S> {
    stream: S,
    service: Arc<dyn AccountService>,
    max_frame_size: usize,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Worker<S> {
    pub fn new(stream: S, service: Arc<dyn AccountService>, max_frame_size: usize) -> Self {
        Self {
            stream,
            service,
            max_frame_size,
        }
    }

    /// Run the single exchange to completion.
    pub async fn run(mut self) {
        let frame = match read_frame(&mut self.stream, self.max_frame_size).await {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "dropping connection: unreadable request frame");
                return;
            }
        };

        let request = match decode_message(&frame) {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, "dropping connection: undecodable request");
                return;
            }
        };

        let response = dispatch(self.service.as_ref(), request).await;

        let bytes = match encode_message(&response) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "response failed to encode");
                return;
            }
        };
        if let Err(e) = write_frame(&mut self.stream, &bytes).await {
            warn!(error = %e, "response write failed");
        }
    }
}

/// Map one request to one data-access operation.
async fn dispatch(service: &dyn AccountService, request: Message) -> Message {
    if !request.kind.is_request() {
        debug!(kind = ?request.kind, "request kind not dispatchable");
        return Message::new(MessageKind::BadResponse);
    }
    match request.kind {
        MessageKind::SignUpRequest => match request.user() {
            Ok(user) => service.sign_up(user).await,
            Err(e) => bad_body(e),
        },
        MessageKind::SignInRequest => match request.user() {
            Ok(user) => service.sign_in(user).await,
            Err(e) => bad_body(e),
        },
        MessageKind::GetUserRequest => match request.user() {
            Ok(user) => service.get_user(user).await,
            Err(e) => bad_body(e),
        },
        // The guard above leaves only request kinds.
        _ => service.countries().await,
    }
}

fn bad_body(e: crate::protocol::ProtocolError) -> Message {
    debug!(error = %e, "request body did not match its kind");
    Message::new(MessageKind::BadResponse)
}

/// Read one length-prefixed frame (u32 little-endian prefix). The size
/// check happens before the payload is allocated.
pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R, max: usize) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > max {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds limit of {max}"),
        ));
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Write one length-prefixed frame and flush it.
pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, data: &[u8]) -> io::Result<()> {
    let len = data.len() as u32;
    w.write_all(&len.to_le_bytes()).await?;
    w.write_all(data).await?;
    w.flush().await
}
