use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::models::config::AgentDescriptor;
use crate::models::error::SessionError;

/// Messages from the remote agent, consumed by the session's pump task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    /// Raw bytes of one audio reply.
    AudioReply(Vec<u8>),
    /// The agent finished speaking.
    ReplyEnd,
    /// The remote side closed the link.
    Closed,
    Failed(String),
}

/// Opens realtime links to the agent.
#[async_trait]
pub trait RealtimeConnector: Send + Sync {
    /// Perform the handshake. Events are posted to `events` until the link closes.
    async fn connect(
        &self,
        descriptor: &AgentDescriptor,
        credential: &str,
        events: mpsc::UnboundedSender<AgentEvent>,
    ) -> Result<Box<dyn RealtimeLink>, SessionError>;
}

/// An open realtime link.
#[async_trait]
pub trait RealtimeLink: Send + Sync {
    /// Push one buffer of captured audio. Replies arrive out of band.
    async fn send_audio(&self, bytes: &[u8]) -> Result<(), SessionError>;

    async fn close(&self);
}
