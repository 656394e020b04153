//! Client connection (spec.md §4.4, §3 "ClientConnection"): the core crate
//! stays transport-agnostic (it never depends on `axum` or `tokio-tungstenite`
//! directly — the teacher's own `common` crate is transport-agnostic too, with
//! `web_server.rs` in the `server` crate owning the actual `WebSocket`). The
//! `ClientTransport` trait is the seam; the server crate implements it over
//! an axum WebSocket split sink.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;

use crate::size::Size;

#[derive(Debug, thiserror::Error)]
#[error("client write failed: {0}")]
pub struct TransportError(pub String);

/// One outbound WebSocket connection, as seen by the Session. Implementors
/// must NOT do their own internal write-interleaving; `ClientConnection`'s
/// `write_mu` is the single serialization point (spec.md §3 invariant: "No
/// goroutine writes to a ClientConnection without holding its writeMu").
#[async_trait]
pub trait ClientTransport: Send + Sync {
    async fn send_binary(&mut self, bytes: Bytes) -> Result<(), TransportError>;
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;
}

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque, process-unique handle so a Session can key its `clients` /
/// `clientSizes` collections without hashing the transport itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

impl ClientId {
    pub fn next() -> Self {
        ClientId(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A WebSocket attached to exactly one Session for its lifetime (spec.md §3).
pub struct ClientConnection {
    pub id: ClientId,
    write_mu: Mutex<Box<dyn ClientTransport>>,
    user_name: StdMutex<Option<String>>,
    size: StdMutex<Option<Size>>,
}

impl ClientConnection {
    pub fn new(transport: Box<dyn ClientTransport>) -> Self {
        ClientConnection {
            id: ClientId::next(),
            write_mu: Mutex::new(transport),
            user_name: StdMutex::new(None),
            size: StdMutex::new(None),
        }
    }

    /// Serialized binary write (PTY bytes or a snapshot). The only writer of
    /// these frames is the Session's PTY reader (spec.md §4.3).
    pub async fn send_binary(&self, bytes: Bytes) -> Result<(), TransportError> {
        let mut guard = self.write_mu.lock().await;
        guard.send_binary(bytes).await
    }

    /// Serialized text write (control frames: chat, status, upload result,
    /// exit). May be called by any component; `write_mu` is still the only
    /// serialization point, per spec.md §3.
    pub async fn send_text(&self, text: String) -> Result<(), TransportError> {
        let mut guard = self.write_mu.lock().await;
        guard.send_text(text).await
    }

    pub fn user_name(&self) -> Option<String> {
        self.user_name.lock().expect("user_name mutex").clone()
    }

    pub fn set_user_name(&self, name: String) {
        *self.user_name.lock().expect("user_name mutex") = Some(name);
    }

    pub fn size(&self) -> Option<Size> {
        *self.size.lock().expect("size mutex")
    }

    pub fn set_size(&self, size: Size) {
        *self.size.lock().expect("size mutex") = Some(size);
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection").field("id", &self.id).finish()
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Mutex as AsyncMutex;

    /// In-memory transport for unit/integration tests: records every frame
    /// sent so tests can assert on ordering (spec.md §8 property 1) without
    /// a real socket.
    #[derive(Default)]
    pub struct RecordingTransport {
        pub frames: Arc<AsyncMutex<Vec<Frame>>>,
        pub fail_next: Arc<std::sync::atomic::AtomicBool>,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Frame {
        Binary(Vec<u8>),
        Text(String),
    }

    impl RecordingTransport {
        pub fn new() -> (Self, Arc<AsyncMutex<Vec<Frame>>>) {
            let frames = Arc::new(AsyncMutex::new(Vec::new()));
            (
                RecordingTransport { frames: frames.clone(), fail_next: Arc::new(std::sync::atomic::AtomicBool::new(false)) },
                frames,
            )
        }
    }

    #[async_trait]
    impl ClientTransport for RecordingTransport {
        async fn send_binary(&mut self, bytes: Bytes) -> Result<(), TransportError> {
            if self.fail_next.swap(false, std::sync::atomic::Ordering::SeqCst) {
                return Err(TransportError("forced failure".into()));
            }
            self.frames.lock().await.push(Frame::Binary(bytes.to_vec()));
            Ok(())
        }

        async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
            self.frames.lock().await.push(Frame::Text(text));
            Ok(())
        }
    }
}
