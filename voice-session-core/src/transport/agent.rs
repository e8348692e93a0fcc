use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use super::credentials::CredentialClient;
use crate::models::audio_models::CaptureChunk;
use crate::models::error::SessionError;
use crate::models::state::ConnectionStatus;
use crate::session::agent::AgentSession;
use crate::traits::transport::{SendOutcome, Transport};

/// Streams chunks into a conversational agent session.
///
/// The session owns the connection; closing this transport only unbinds it
/// from the recorder and leaves the session connected for replies.
pub struct AgentSessionTransport {
    session: Arc<AgentSession>,
    credentials: Option<(CredentialClient, String)>,
}

impl AgentSessionTransport {
    /// Bind to a session that is connected by someone else.
    pub fn new(session: Arc<AgentSession>) -> Self {
        Self {
            session,
            credentials: None,
        }
    }

    /// Bind to a session and let `connect` fetch a credential for `model`.
    pub fn with_credentials(session: Arc<AgentSession>, credentials: CredentialClient, model: impl Into<String>) -> Self {
        Self {
            session,
            credentials: Some((credentials, model.into())),
        }
    }

    pub fn session(&self) -> &Arc<AgentSession> {
        &self.session
    }
}

#[async_trait]
impl Transport for AgentSessionTransport {
    fn status(&self) -> ConnectionStatus {
        self.session.status()
    }

    fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.session.watch_status()
    }

    async fn connect(&self) -> Result<(), SessionError> {
        if self.session.status().is_connected() {
            return Ok(());
        }
        match &self.credentials {
            Some((client, model)) => {
                self.session.ensure_initialized().await?;
                self.session.connect_with(client, model).await
            }
            None => Err(SessionError::TransportError(
                "agent session is not connected and no credential source is configured".into(),
            )),
        }
    }

    async fn send(&self, chunk: &CaptureChunk) -> Result<SendOutcome, SessionError> {
        if !self.session.status().is_connected() {
            return Ok(SendOutcome::Dropped);
        }
        self.session.send_audio(&chunk.bytes).await?;
        Ok(SendOutcome::Delivered)
    }

    async fn close(&self) {
        log::debug!("agent transport unbound");
    }
}
