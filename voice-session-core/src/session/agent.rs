use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;

use crate::models::config::{AgentDescriptor, SessionConfig};
use crate::models::error::SessionError;
use crate::models::state::{AgentState, ConnectionStatus};
use crate::traits::realtime::{AgentEvent, RealtimeConnector, RealtimeLink};
use crate::transport::credentials::CredentialClient;

/// Unbounded FIFO of reply audio, drained one reply at a time.
#[derive(Debug, Default)]
pub struct ReplyQueue {
    replies: Mutex<VecDeque<Vec<u8>>>,
    notify: Notify,
}

impl ReplyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, reply: Vec<u8>) {
        self.replies.lock().push_back(reply);
        self.notify.notify_one();
    }

    /// Remove the head, if any.
    pub fn try_pop(&self) -> Option<Vec<u8>> {
        self.replies.lock().pop_front()
    }

    /// Wait for the next reply.
    pub async fn pop(&self) -> Vec<u8> {
        loop {
            if let Some(reply) = self.try_pop() {
                return reply;
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.replies.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.replies.lock().is_empty()
    }

    pub fn clear(&self) {
        self.replies.lock().clear();
    }
}

struct AgentInner {
    state: AgentState,
    descriptor: Option<AgentDescriptor>,
    /// Bumped whenever the session object is replaced or disconnected.
    generation: u64,
    link: Option<Arc<dyn RealtimeLink>>,
    pump: Option<JoinHandle<()>>,
    error: Option<SessionError>,
}

struct AgentShared {
    inner: Mutex<AgentInner>,
    status_tx: watch::Sender<ConnectionStatus>,
    replies: ReplyQueue,
    speaking: AtomicBool,
}

impl AgentShared {
    /// Apply a transition from the table, publishing the matching connection status.
    fn transition(&self, inner: &mut AgentInner, next: AgentState) -> Result<(), SessionError> {
        if inner.state == next {
            return Ok(());
        }
        if !inner.state.can_transition_to(next) {
            return Err(SessionError::invalid_transition(inner.state, next));
        }
        log::debug!("agent session {} -> {}", inner.state, next);
        inner.state = next;

        let status = match next {
            AgentState::Connecting => ConnectionStatus::Connecting,
            AgentState::Connected => ConnectionStatus::Connected,
            AgentState::Disconnected if inner.error.is_some() => ConnectionStatus::Error,
            _ => ConnectionStatus::Disconnected,
        };
        self.status_tx.send_replace(status);
        Ok(())
    }

    fn link_lost(&self, generation: u64, error: Option<SessionError>) {
        let mut inner = self.inner.lock();
        if inner.generation != generation || inner.state != AgentState::Connected {
            return;
        }
        match &error {
            Some(e) => log::error!("agent link failed: {}", e),
            None => log::info!("agent link closed by remote"),
        }
        inner.error = error;
        inner.link = None;
        inner.pump = None;
        self.speaking.store(false, Ordering::SeqCst);
        // Connected -> Disconnected is always in the table.
        let _ = self.transition(&mut inner, AgentState::Disconnected);
    }
}

async fn pump_events(shared: Arc<AgentShared>, mut events: mpsc::UnboundedReceiver<AgentEvent>, generation: u64) {
    let mut failure = None;
    while let Some(event) = events.recv().await {
        match event {
            AgentEvent::AudioReply(bytes) => {
                log::debug!("agent reply of {} bytes queued", bytes.len());
                shared.replies.push(bytes);
                shared.speaking.store(true, Ordering::SeqCst);
            }
            AgentEvent::ReplyEnd => shared.speaking.store(false, Ordering::SeqCst),
            AgentEvent::Closed => break,
            AgentEvent::Failed(reason) => {
                failure = Some(SessionError::TransportError(reason));
                break;
            }
        }
    }
    shared.link_lost(generation, failure);
}

/// Conversational-agent session.
///
/// Remote events arrive on a channel drained by a single pump task, so
/// replies are queued in arrival order.
pub struct AgentSession {
    connector: Arc<dyn RealtimeConnector>,
    default_descriptor: AgentDescriptor,
    connect_timeout: Duration,
    shared: Arc<AgentShared>,
}

impl AgentSession {
    pub fn new(connector: Arc<dyn RealtimeConnector>, descriptor: AgentDescriptor, connect_timeout: Duration) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            connector,
            default_descriptor: descriptor,
            connect_timeout,
            shared: Arc::new(AgentShared {
                inner: Mutex::new(AgentInner {
                    state: AgentState::Uninitialized,
                    descriptor: None,
                    generation: 0,
                    link: None,
                    pump: None,
                    error: None,
                }),
                status_tx,
                replies: ReplyQueue::new(),
                speaking: AtomicBool::new(false),
            }),
        }
    }

    pub fn from_config(connector: Arc<dyn RealtimeConnector>, config: &SessionConfig) -> Self {
        Self::new(connector, config.agent_descriptor(), config.connect_timeout())
    }

    pub fn state(&self) -> AgentState {
        self.shared.inner.lock().state
    }

    pub fn descriptor(&self) -> Option<AgentDescriptor> {
        self.shared.inner.lock().descriptor.clone()
    }

    /// Error recorded by the last failed connect or link failure.
    pub fn last_error(&self) -> Option<SessionError> {
        self.shared.inner.lock().error.clone()
    }

    pub fn is_agent_speaking(&self) -> bool {
        self.shared.speaking.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.shared.status_tx.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Create the agent descriptor and session object.
    ///
    /// An existing session is disconnected first.
    pub async fn initialize(&self, descriptor: AgentDescriptor) -> Result<(), SessionError> {
        if self.state().is_initialized() {
            self.disconnect().await;
        }
        let mut inner = self.shared.inner.lock();
        self.shared.transition(&mut inner, AgentState::Initialized)?;
        log::info!("agent session initialized for '{}'", descriptor.name);
        inner.descriptor = Some(descriptor);
        inner.generation += 1;
        inner.error = None;
        Ok(())
    }

    /// Initialize with the default descriptor unless a session already exists.
    pub async fn ensure_initialized(&self) -> Result<(), SessionError> {
        if self.state().is_initialized() {
            return Ok(());
        }
        self.initialize(self.default_descriptor.clone()).await
    }

    /// Perform the remote handshake with `credential`.
    ///
    /// Fails with `SessionNotInitialized` before `initialize`, leaving the
    /// state untouched. Any other failure is recorded in `last_error`, leaves
    /// the session disconnected, and is returned.
    pub async fn connect(&self, credential: &str) -> Result<(), SessionError> {
        let (descriptor, generation) = {
            let mut inner = self.shared.inner.lock();
            match inner.state {
                AgentState::Uninitialized => return Err(SessionError::SessionNotInitialized),
                AgentState::Connected => return Ok(()),
                AgentState::Connecting => {
                    return Err(SessionError::invalid_transition(AgentState::Connecting, "connect"))
                }
                _ => {}
            }
            let Some(descriptor) = inner.descriptor.clone() else {
                return Err(SessionError::SessionNotInitialized);
            };
            self.shared.transition(&mut inner, AgentState::Connecting)?;
            (descriptor, inner.generation)
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let attempt = tokio::time::timeout(self.connect_timeout, self.connector.connect(&descriptor, credential, tx)).await;
        let link: Arc<dyn RealtimeLink> = match attempt {
            Ok(Ok(link)) => Arc::from(link),
            Ok(Err(e)) => return Err(self.connect_failed(generation, e)),
            Err(_) => return Err(self.connect_failed(generation, SessionError::Timeout)),
        };

        let stale = {
            let mut inner = self.shared.inner.lock();
            if inner.generation != generation || inner.state != AgentState::Connecting {
                true
            } else {
                let pump = tokio::spawn(pump_events(Arc::clone(&self.shared), rx, generation));
                inner.link = Some(Arc::clone(&link));
                inner.pump = Some(pump);
                inner.error = None;
                self.shared.transition(&mut inner, AgentState::Connected)?;
                false
            }
        };
        if stale {
            link.close().await;
            return Err(SessionError::TransportError("session was reset while connecting".into()));
        }

        log::info!("agent session connected");
        Ok(())
    }

    fn connect_failed(&self, generation: u64, error: SessionError) -> SessionError {
        log::error!("agent connect failed: {}", error);
        let mut inner = self.shared.inner.lock();
        if inner.generation == generation && inner.state == AgentState::Connecting {
            inner.error = Some(error.clone());
            let _ = self.shared.transition(&mut inner, AgentState::Disconnected);
        }
        error
    }

    /// Fetch a credential for `model`, then connect with it.
    pub async fn connect_with(&self, credentials: &CredentialClient, model: &str) -> Result<(), SessionError> {
        if !self.state().is_initialized() {
            return Err(SessionError::SessionNotInitialized);
        }
        let credential = match credentials.fetch(model).await {
            Ok(key) => key,
            Err(e) => {
                log::error!("credential fetch failed: {}", e);
                self.shared.inner.lock().error = Some(e.clone());
                return Err(e);
            }
        };
        self.connect(&credential).await
    }

    /// Forward one buffer of captured audio to the agent.
    pub async fn send_audio(&self, bytes: &[u8]) -> Result<(), SessionError> {
        let link = {
            let inner = self.shared.inner.lock();
            match (&inner.link, inner.state) {
                (Some(link), AgentState::Connected) => Arc::clone(link),
                _ => return Err(SessionError::TransportError("agent session is not connected".into())),
            }
        };
        link.send_audio(bytes).await
    }

    /// Close the link. Safe to call repeatedly or before ever connecting.
    pub async fn disconnect(&self) {
        let (link, pump) = {
            let mut inner = self.shared.inner.lock();
            if matches!(inner.state, AgentState::Uninitialized | AgentState::Disconnected) {
                return;
            }
            inner.generation += 1;
            inner.error = None;
            let _ = self.shared.transition(&mut inner, AgentState::Disconnected);
            (inner.link.take(), inner.pump.take())
        };
        self.shared.speaking.store(false, Ordering::SeqCst);
        if let Some(pump) = pump {
            pump.abort();
        }
        if let Some(link) = link {
            link.close().await;
        }
        log::info!("agent session disconnected");
    }

    pub fn replies(&self) -> &ReplyQueue {
        &self.shared.replies
    }

    /// Wait for the next reply, in arrival order.
    pub async fn next_reply(&self) -> Vec<u8> {
        self.shared.replies.pop().await
    }

    pub fn try_next_reply(&self) -> Option<Vec<u8>> {
        self.shared.replies.try_pop()
    }
}

impl std::fmt::Debug for AgentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSession")
            .field("state", &self.state())
            .field("speaking", &self.is_agent_speaking())
            .field("pending_replies", &self.shared.replies.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockConnector;

    fn descriptor() -> AgentDescriptor {
        SessionConfig::default().agent_descriptor()
    }

    fn session(connector: &MockConnector) -> AgentSession {
        AgentSession::new(Arc::new(connector.clone()), descriptor(), Duration::from_secs(10))
    }

    #[test]
    fn reply_queue_is_fifo() {
        let queue = ReplyQueue::new();
        queue.push(b"R1".to_vec());
        queue.push(b"R2".to_vec());
        queue.push(b"R3".to_vec());

        assert_eq!(queue.try_pop().as_deref(), Some(&b"R1"[..]));
        assert_eq!(queue.try_pop().as_deref(), Some(&b"R2"[..]));
        assert_eq!(queue.try_pop().as_deref(), Some(&b"R3"[..]));
        assert!(queue.try_pop().is_none());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn pop_waits_for_push() {
        let queue = Arc::new(ReplyQueue::new());
        let producer = Arc::clone(&queue);
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            producer.push(vec![7]);
        });
        assert_eq!(queue.pop().await, vec![7]);
    }

    #[tokio::test]
    async fn connect_before_initialize_is_rejected() {
        let connector = MockConnector::new();
        let session = session(&connector);

        let err = session.connect("key").await.unwrap_err();
        assert_eq!(err, SessionError::SessionNotInitialized);
        assert_eq!(session.state(), AgentState::Uninitialized);
        assert_eq!(connector.connect_count(), 0);
    }

    #[tokio::test]
    async fn connect_success() {
        let connector = MockConnector::new();
        let session = session(&connector);
        session.initialize(descriptor()).await.unwrap();

        session.connect("key-1").await.unwrap();
        assert_eq!(session.state(), AgentState::Connected);
        assert_eq!(session.status(), ConnectionStatus::Connected);
        assert_eq!(connector.credentials(), vec!["key-1".to_string()]);
    }

    #[tokio::test]
    async fn connect_failure_records_error() {
        let connector = MockConnector::new();
        connector.fail_with(SessionError::TransportError("refused".into()));
        let session = session(&connector);
        session.initialize(descriptor()).await.unwrap();

        let err = session.connect("key").await.unwrap_err();
        assert_eq!(err, SessionError::TransportError("refused".into()));
        assert_eq!(session.state(), AgentState::Disconnected);
        assert_eq!(session.last_error(), Some(err));
        assert_eq!(session.status(), ConnectionStatus::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_connect_times_out() {
        let connector = MockConnector::new();
        connector.hang();
        let session = AgentSession::new(Arc::new(connector.clone()), descriptor(), Duration::from_millis(500));
        session.initialize(descriptor()).await.unwrap();

        assert_eq!(session.connect("key").await.unwrap_err(), SessionError::Timeout);
        assert_eq!(session.state(), AgentState::Disconnected);
    }

    #[tokio::test]
    async fn reinitialize_disconnects_old_session() {
        let connector = MockConnector::new();
        let session = session(&connector);
        session.initialize(descriptor()).await.unwrap();
        session.connect("key").await.unwrap();

        session.initialize(descriptor()).await.unwrap();
        assert_eq!(session.state(), AgentState::Initialized);
        assert_eq!(connector.closed_links(), 1);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let connector = MockConnector::new();
        let session = session(&connector);
        session.disconnect().await;
        assert_eq!(session.state(), AgentState::Uninitialized);

        session.initialize(descriptor()).await.unwrap();
        session.connect("key").await.unwrap();
        session.disconnect().await;
        session.disconnect().await;
        assert_eq!(session.state(), AgentState::Disconnected);
        assert_eq!(connector.closed_links(), 1);
    }

    #[tokio::test]
    async fn replies_and_speaking_flag_follow_events() {
        let connector = MockConnector::new();
        let session = session(&connector);
        session.initialize(descriptor()).await.unwrap();
        session.connect("key").await.unwrap();

        connector.emit(AgentEvent::AudioReply(b"R1".to_vec()));
        connector.emit(AgentEvent::AudioReply(b"R2".to_vec()));
        assert_eq!(session.next_reply().await, b"R1".to_vec());
        assert!(session.is_agent_speaking());

        connector.emit(AgentEvent::ReplyEnd);
        assert_eq!(session.next_reply().await, b"R2".to_vec());
        for _ in 0..10 {
            if !session.is_agent_speaking() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!session.is_agent_speaking());
    }

    #[tokio::test]
    async fn remote_failure_disconnects() {
        let connector = MockConnector::new();
        let session = session(&connector);
        session.initialize(descriptor()).await.unwrap();
        session.connect("key").await.unwrap();
        let mut status = session.watch_status();

        connector.emit(AgentEvent::Failed("socket reset".into()));
        status.wait_for(|s| *s == ConnectionStatus::Error).await.unwrap();

        assert_eq!(session.state(), AgentState::Disconnected);
        assert!(matches!(session.last_error(), Some(SessionError::TransportError(_))));
    }

    #[tokio::test]
    async fn send_requires_connection() {
        let connector = MockConnector::new();
        let session = session(&connector);
        session.initialize(descriptor()).await.unwrap();
        assert!(session.send_audio(&[1, 2]).await.is_err());

        session.connect("key").await.unwrap();
        session.send_audio(&[1, 2]).await.unwrap();
        assert_eq!(connector.sent_audio(), vec![vec![1, 2]]);
    }
}
