//! In-memory backends for tests and headless runs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::models::audio_models::{AudioSource, CaptureChunk, StreamFormat, WavAsset};
use crate::models::config::AgentDescriptor;
use crate::models::error::SessionError;
use crate::models::recording_result::RecordingResult;
use crate::models::state::{ConnectionStatus, VoicePhase};
use crate::traits::microphone::{FaultCallback, FrameCallback, MicrophoneBackend};
use crate::traits::observer::SessionObserver;
use crate::traits::realtime::{AgentEvent, RealtimeConnector, RealtimeLink};
use crate::traits::transport::{SendOutcome, Transport};

#[derive(Default)]
struct MicState {
    available: bool,
    denied: bool,
    format: Option<StreamFormat>,
    callback: Option<FrameCallback>,
    last_callback: Option<FrameCallback>,
    on_fault: Option<FaultCallback>,
    starts: usize,
    stops: usize,
    live: usize,
    max_live: usize,
}

/// Microphone driven by hand: frames are pushed with [`MockMicrophone::emit`].
///
/// Clones share state, so a test keeps one clone while the device source owns another.
#[derive(Clone)]
pub struct MockMicrophone {
    state: Arc<Mutex<MicState>>,
}

impl MockMicrophone {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            state: Arc::new(Mutex::new(MicState {
                available: true,
                format: Some(StreamFormat::new(sample_rate, channels)),
                ..MicState::default()
            })),
        }
    }

    /// No input device present.
    pub fn unavailable() -> Self {
        Self {
            state: Arc::new(Mutex::new(MicState::default())),
        }
    }

    /// Make the next `start` fail as if the user refused access.
    pub fn deny_permission(&self) {
        self.state.lock().denied = true;
    }

    /// Deliver frames to the running stream. Ignored when stopped.
    pub fn emit(&self, samples: &[f32]) {
        let callback = self.state.lock().callback.clone();
        if let Some(callback) = callback {
            callback(samples);
        }
    }

    /// Deliver frames through the last callback, even after `stop`.
    pub fn emit_stale(&self, samples: &[f32]) {
        let callback = self.state.lock().last_callback.clone();
        if let Some(callback) = callback {
            callback(samples);
        }
    }

    /// Report a fault on the running stream, as an unplugged device would.
    pub fn fail(&self, error: SessionError) {
        let on_fault = self.state.lock().on_fault.clone();
        if let Some(on_fault) = on_fault {
            on_fault(error);
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().callback.is_some()
    }

    pub fn start_count(&self) -> usize {
        self.state.lock().starts
    }

    pub fn stop_count(&self) -> usize {
        self.state.lock().stops
    }

    /// Most streams ever open at the same time.
    pub fn max_concurrent_streams(&self) -> usize {
        self.state.lock().max_live
    }
}

impl MicrophoneBackend for MockMicrophone {
    fn is_available(&self) -> bool {
        self.state.lock().available
    }

    fn start(&mut self, callback: FrameCallback, on_fault: FaultCallback) -> Result<StreamFormat, SessionError> {
        let mut state = self.state.lock();
        if state.denied {
            return Err(SessionError::PermissionDenied);
        }
        let format = state.format.ok_or(SessionError::DeviceUnavailable)?;
        state.starts += 1;
        state.live += 1;
        state.max_live = state.max_live.max(state.live);
        state.last_callback = Some(Arc::clone(&callback));
        state.callback = Some(callback);
        state.on_fault = Some(on_fault);
        Ok(format)
    }

    fn stop(&mut self) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        if state.callback.take().is_some() {
            state.live = state.live.saturating_sub(1);
        }
        state.on_fault = None;
        state.stops += 1;
        Ok(())
    }

    fn device_info(&self) -> AudioSource {
        AudioSource {
            id: "mock-mic".into(),
            name: "Mock Microphone".into(),
            is_default: true,
        }
    }
}

#[derive(Default)]
struct TransportState {
    sent: Vec<CaptureChunk>,
    fail_sends: bool,
    refuse_connect: bool,
    connects: usize,
    closes: usize,
}

/// Transport that records every chunk it is given.
pub struct RecordingTransport {
    state: Mutex<TransportState>,
    status: watch::Sender<ConnectionStatus>,
}

impl RecordingTransport {
    /// Starts disconnected; `connect` succeeds.
    pub fn new() -> Self {
        Self::with_status(ConnectionStatus::Disconnected)
    }

    /// Already connected.
    pub fn connected() -> Self {
        Self::with_status(ConnectionStatus::Connected)
    }

    /// Every connect attempt fails.
    pub fn never_connects() -> Self {
        let transport = Self::new();
        transport.state.lock().refuse_connect = true;
        transport
    }

    fn with_status(status: ConnectionStatus) -> Self {
        Self {
            state: Mutex::new(TransportState::default()),
            status: watch::channel(status).0,
        }
    }

    pub fn set_status(&self, status: ConnectionStatus) {
        self.status.send_replace(status);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.state.lock().fail_sends = fail;
    }

    pub fn sent(&self) -> Vec<CaptureChunk> {
        self.state.lock().sent.clone()
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().connects
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().closes
    }
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    async fn connect(&self) -> Result<(), SessionError> {
        let refuse = {
            let mut state = self.state.lock();
            state.connects += 1;
            state.refuse_connect
        };
        if refuse {
            self.status.send_replace(ConnectionStatus::Error);
            return Err(SessionError::TransportError("connection refused".into()));
        }
        self.status.send_replace(ConnectionStatus::Connected);
        Ok(())
    }

    async fn send(&self, chunk: &CaptureChunk) -> Result<SendOutcome, SessionError> {
        if !self.status().is_connected() {
            return Ok(SendOutcome::Dropped);
        }
        let mut state = self.state.lock();
        if state.fail_sends {
            return Err(SessionError::TransportError("send failed".into()));
        }
        state.sent.push(chunk.clone());
        Ok(SendOutcome::Delivered)
    }

    async fn close(&self) {
        self.state.lock().closes += 1;
        if self.status() != ConnectionStatus::Error {
            self.status.send_replace(ConnectionStatus::Disconnected);
        }
    }
}

#[derive(Default)]
struct ConnectorState {
    connects: usize,
    credentials: Vec<String>,
    fail: Option<SessionError>,
    hang: bool,
    events: Option<mpsc::UnboundedSender<AgentEvent>>,
}

/// Realtime connector whose links live in memory.
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<ConnectorState>>,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    closed: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every later handshake fails with `error`.
    pub fn fail_with(&self, error: SessionError) {
        self.state.lock().fail = Some(error);
    }

    /// Every later handshake never completes.
    pub fn hang(&self) {
        self.state.lock().hang = true;
    }

    /// Post an event on the most recent link.
    pub fn emit(&self, event: AgentEvent) {
        if let Some(events) = self.state.lock().events.as_ref() {
            let _ = events.send(event);
        }
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().connects
    }

    pub fn credentials(&self) -> Vec<String> {
        self.state.lock().credentials.clone()
    }

    pub fn sent_audio(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }

    pub fn closed_links(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RealtimeConnector for MockConnector {
    async fn connect(
        &self,
        _descriptor: &AgentDescriptor,
        credential: &str,
        events: mpsc::UnboundedSender<AgentEvent>,
    ) -> Result<Box<dyn RealtimeLink>, SessionError> {
        let hang = {
            let mut state = self.state.lock();
            state.connects += 1;
            state.credentials.push(credential.to_owned());
            if let Some(error) = state.fail.clone() {
                return Err(error);
            }
            state.events = Some(events);
            state.hang
        };
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(Box::new(MockLink {
            sent: Arc::clone(&self.sent),
            closed: Arc::clone(&self.closed),
        }))
    }
}

struct MockLink {
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl RealtimeLink for MockLink {
    async fn send_audio(&self, bytes: &[u8]) -> Result<(), SessionError> {
        self.sent.lock().push(bytes.to_vec());
        Ok(())
    }

    async fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Observer that remembers every notification.
#[derive(Default)]
pub struct RecordingObserver {
    phases: Mutex<Vec<VoicePhase>>,
    statuses: Mutex<Vec<ConnectionStatus>>,
    errors: Mutex<Vec<SessionError>>,
    finished: Mutex<Vec<Option<RecordingResult>>>,
}

impl RecordingObserver {
    pub fn phases(&self) -> Vec<VoicePhase> {
        self.phases.lock().clone()
    }

    pub fn statuses(&self) -> Vec<ConnectionStatus> {
        self.statuses.lock().clone()
    }

    pub fn errors(&self) -> Vec<SessionError> {
        self.errors.lock().clone()
    }

    pub fn finished(&self) -> usize {
        self.finished.lock().len()
    }

    /// Store results reported so far, `None` where nothing was saved.
    pub fn saved(&self) -> Vec<Option<RecordingResult>> {
        self.finished.lock().clone()
    }
}

impl SessionObserver for RecordingObserver {
    fn on_phase_changed(&self, phase: VoicePhase) {
        self.phases.lock().push(phase);
    }

    fn on_connection_status(&self, status: ConnectionStatus) {
        self.statuses.lock().push(status);
    }

    fn on_error(&self, error: &SessionError) {
        self.errors.lock().push(error.clone());
    }

    fn on_recording_finished(&self, _asset: &WavAsset, saved: Option<&RecordingResult>) {
        self.finished.lock().push(saved.cloned());
    }
}
