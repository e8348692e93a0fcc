use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::models::error::SessionError;

/// Plays reply audio.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play `bytes` (a WAV reply) and resolve once playback has finished.
    async fn play(&self, bytes: &[u8]) -> Result<(), SessionError>;

    /// Cut off anything still playing.
    fn stop(&self) {}
}

/// Discards audio; counts what it was given.
#[derive(Debug, Default)]
pub struct NullSink {
    played: AtomicU64,
}

impl NullSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn played(&self) -> u64 {
        self.played.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioSink for NullSink {
    async fn play(&self, _bytes: &[u8]) -> Result<(), SessionError> {
        self.played.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
