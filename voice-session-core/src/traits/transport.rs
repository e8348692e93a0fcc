use async_trait::async_trait;
use tokio::sync::watch;

use crate::models::audio_models::CaptureChunk;
use crate::models::error::SessionError;
use crate::models::state::ConnectionStatus;

/// What happened to one chunk handed to `Transport::send`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    /// Not connected; the chunk was discarded without queuing.
    Dropped,
}

/// "Send a chunk to a remote sink", over a socket or an agent session.
///
/// Implementations use interior mutability: the recorder's chunker task and
/// the background connect share one `Arc<dyn Transport>`.
#[async_trait]
pub trait Transport: Send + Sync {
    fn status(&self) -> ConnectionStatus;

    /// Observe status changes.
    fn watch_status(&self) -> watch::Receiver<ConnectionStatus>;

    /// Open the connection. A no-op when already connected.
    async fn connect(&self) -> Result<(), SessionError>;

    /// Forward one chunk. Returns `Dropped` unless connected.
    async fn send(&self, chunk: &CaptureChunk) -> Result<SendOutcome, SessionError>;

    /// Close the connection. Idempotent.
    async fn close(&self);
}
