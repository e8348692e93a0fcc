use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use super::agent::AgentSession;
use super::device::{AudioStreamHandle, DeviceAudioSource, StreamWriter, TapId};
use crate::models::audio_models::{concat_chunks, CaptureChunk, RecorderDiagnostics, StreamFormat};
use crate::models::config::SessionConfig;
use crate::models::error::SessionError;
use crate::models::recording_result::CapturedAudio;
use crate::models::state::{ConnectionStatus, RecorderState};
use crate::processing::ring_buffer::RingBuffer;
use crate::processing::wav_format;
use crate::traits::transport::{SendOutcome, Transport};

/// Seconds of audio the frame buffer holds between chunker ticks.
const BUFFER_SECONDS: usize = 5;

/// Mutable state of the current recording session.
struct RecordingSession {
    state: RecorderState,
    chunks: Vec<CaptureChunk>,
    diagnostics: RecorderDiagnostics,
    format: Option<StreamFormat>,
    started_at: Option<Instant>,
}

impl RecordingSession {
    fn new() -> Self {
        Self {
            state: RecorderState::Idle,
            chunks: Vec::new(),
            diagnostics: RecorderDiagnostics::default(),
            format: None,
            started_at: None,
        }
    }
}

/// Tasks and subscriptions owned while recording.
struct ActiveRun {
    stream: Arc<AudioStreamHandle>,
    tap: TapId,
    stop_tx: oneshot::Sender<()>,
    chunker: JoinHandle<()>,
    connector: Option<JoinHandle<()>>,
}

struct RecorderInner {
    id: Uuid,
    device: Arc<DeviceAudioSource>,
    transport: Option<Arc<dyn Transport>>,
    agent: Mutex<Option<Arc<AgentSession>>>,
    timeslice: Duration,
    session: Arc<Mutex<RecordingSession>>,
    run: Mutex<Option<ActiveRun>>,
    fault: watch::Sender<Option<SessionError>>,
}

/// Drives a capture session: slices microphone frames into timed chunks and
/// forwards each chunk to the bound transport.
///
/// ```text
/// [stream tap] → [RingBuffer] → chunker (every timeslice) → CaptureChunk
///                                                   ├→ local chunk list
///                                                   └→ Transport::send (if connected)
/// ```
pub struct Recorder {
    inner: Arc<RecorderInner>,
}

impl Recorder {
    pub fn new(device: Arc<DeviceAudioSource>, timeslice: Duration, transport: Option<Arc<dyn Transport>>) -> Self {
        Self {
            inner: Arc::new(RecorderInner {
                id: Uuid::new_v4(),
                device,
                transport,
                agent: Mutex::new(None),
                timeslice,
                session: Arc::new(Mutex::new(RecordingSession::new())),
                run: Mutex::new(None),
                fault: watch::channel(None).0,
            }),
        }
    }

    pub fn from_config(
        device: Arc<DeviceAudioSource>,
        config: &SessionConfig,
        transport: Option<Arc<dyn Transport>>,
    ) -> Self {
        Self::new(device, config.timeslice(), transport)
    }

    /// Initialize this agent session (if needed) before each recording.
    pub fn set_agent_session(&self, session: Option<Arc<AgentSession>>) {
        *self.inner.agent.lock() = session;
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn timeslice(&self) -> Duration {
        self.inner.timeslice
    }

    pub fn state(&self) -> RecorderState {
        self.inner.session.lock().state.clone()
    }

    pub fn is_recording(&self) -> bool {
        self.inner.session.lock().state.is_recording()
    }

    pub fn diagnostics(&self) -> RecorderDiagnostics {
        self.inner.session.lock().diagnostics.clone()
    }

    /// Chunks emitted so far in the current session.
    pub fn chunks(&self) -> Vec<CaptureChunk> {
        self.inner.session.lock().chunks.clone()
    }

    pub fn transport_status(&self) -> Option<ConnectionStatus> {
        self.inner.transport.as_ref().map(|t| t.status())
    }

    pub fn watch_transport(&self) -> Option<watch::Receiver<ConnectionStatus>> {
        self.inner.transport.as_ref().map(|t| t.watch_status())
    }

    /// Publishes the error that failed the current session; `None` until then.
    pub fn watch_fault(&self) -> watch::Receiver<Option<SessionError>> {
        self.inner.fault.subscribe()
    }

    pub async fn start(&self) -> Result<(), SessionError> {
        self.inner.start().await
    }

    /// Finish the session and return everything captured.
    ///
    /// Returns `None` unless recording.
    pub async fn stop(&self) -> Option<CapturedAudio> {
        self.inner.stop().await
    }

    /// Leave `failed`, discarding the session.
    pub async fn reset(&self) {
        self.inner.reset().await
    }
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("timeslice", &self.inner.timeslice)
            .finish()
    }
}

impl RecorderInner {
    fn set_state(&self, state: RecorderState) {
        let mut session = self.session.lock();
        log::debug!("recorder {} {} -> {}", self.id, session.state, state);
        session.state = state;
    }

    async fn start(self: &Arc<Self>) -> Result<(), SessionError> {
        {
            let mut session = self.session.lock();
            if !session.state.is_idle() {
                return Err(SessionError::invalid_transition(&session.state, "start"));
            }
            session.state = RecorderState::Recording;
        }
        self.fault.send_replace(None);

        match self.open_run().await {
            Ok(run) => {
                *self.run.lock() = Some(run);
                log::info!("recorder {} started ({} ms timeslice)", self.id, self.timeslice.as_millis());
                Ok(())
            }
            Err(e) => {
                log::error!("recorder {} failed to start: {}", self.id, e);
                self.device.release_writer(self.id);
                self.set_state(RecorderState::Idle);
                Err(e)
            }
        }
    }

    async fn open_run(self: &Arc<Self>) -> Result<ActiveRun, SessionError> {
        let agent = self.agent.lock().clone();
        if let Some(agent) = agent {
            agent.ensure_initialized().await?;
        }

        let writer: Arc<dyn StreamWriter> = Arc::clone(self) as Arc<dyn StreamWriter>;
        if let Some(previous) = self.device.claim_writer(&writer) {
            log::info!("recorder {} preempting writer {}", self.id, previous.writer_id());
            previous.force_release().await;
        }

        let stream = self.device.acquire_stream()?;
        let format = stream.format();
        wav_format::frame_layout(format.sample_rate, 32, format.channels).map_err(|e| {
            self.device.release_stream();
            e
        })?;
        let channels = format.channels.max(1) as usize;
        let capacity = format.sample_rate as usize * channels * BUFFER_SECONDS;
        let buffer = Arc::new(Mutex::new(RingBuffer::with_channels(capacity, channels)));

        let tap = {
            let buffer = Arc::clone(&buffer);
            let session = Arc::clone(&self.session);
            stream.subscribe(move |samples| {
                buffer.lock().write(samples);
                let mut session = session.lock();
                session.diagnostics.callback_count += 1;
                session.diagnostics.samples_total += samples.len() as u64;
            })?
        };

        {
            let mut session = self.session.lock();
            session.chunks.clear();
            session.diagnostics = RecorderDiagnostics::default();
            session.format = Some(format);
            session.started_at = Some(Instant::now());
        }

        let connector = self.transport.as_ref().and_then(|transport| {
            if matches!(transport.status(), ConnectionStatus::Connected | ConnectionStatus::Connecting) {
                return None;
            }
            let transport = Arc::clone(transport);
            Some(tokio::spawn(async move {
                if let Err(e) = transport.connect().await {
                    log::warn!("transport connect failed, chunks stay local: {}", e);
                }
            }))
        });

        let (stop_tx, stop_rx) = oneshot::channel();
        let chunker = Chunker {
            recorder: Arc::downgrade(self),
            stream: Arc::clone(&stream),
            buffer,
            format,
            timeslice: self.timeslice,
            transport: self.transport.clone(),
            session: Arc::clone(&self.session),
        };
        let chunker = tokio::spawn(chunker.run(stop_rx));

        Ok(ActiveRun {
            stream,
            tap,
            stop_tx,
            chunker,
            connector,
        })
    }

    async fn stop(&self) -> Option<CapturedAudio> {
        {
            let mut session = self.session.lock();
            if !session.state.is_recording() {
                return None;
            }
            session.state = RecorderState::Stopping;
        }

        let run = self.run.lock().take();
        self.teardown(run).await;

        let captured = {
            let mut session = self.session.lock();
            let chunks = std::mem::take(&mut session.chunks);
            let diagnostics = session.diagnostics.clone();
            let duration = session.started_at.take().map(|t| t.elapsed()).unwrap_or_default();
            let format = session.format.take().unwrap_or(StreamFormat::new(0, 0));
            session.state = RecorderState::Idle;
            CapturedAudio {
                bytes: concat_chunks(&chunks),
                format,
                chunk_count: chunks.len() as u64,
                sends_delivered: diagnostics.sends_delivered,
                sends_skipped: diagnostics.sends_skipped,
                sends_failed: diagnostics.sends_failed,
                duration,
            }
        };

        log::info!(
            "recorder {} stopped: {} chunks, {} bytes, {} sent, {} skipped, {} failed",
            self.id,
            captured.chunk_count,
            captured.bytes.len(),
            captured.sends_delivered,
            captured.sends_skipped,
            captured.sends_failed
        );
        Some(captured)
    }

    async fn reset(&self) {
        let run = self.run.lock().take();
        self.teardown(run).await;
        let mut session = self.session.lock();
        session.chunks.clear();
        session.format = None;
        session.started_at = None;
        session.state = RecorderState::Idle;
        self.fault.send_replace(None);
    }

    /// The stream died under a running session: give everything back and
    /// stay `Failed` until `reset`.
    ///
    /// Runs on the chunker task, so the chunker handle is dropped, not awaited.
    async fn fail(&self, error: SessionError) {
        {
            let mut session = self.session.lock();
            if !session.state.is_recording() {
                return;
            }
            log::error!("recorder {} failed: {}", self.id, error);
            session.state = RecorderState::Failed(error.clone());
        }

        let run = self.run.lock().take();
        if let Some(run) = run {
            run.stream.unsubscribe(run.tap);
            if let Some(connector) = run.connector {
                connector.abort();
            }
        }
        if let Some(transport) = &self.transport {
            transport.close().await;
        }
        self.device.release_writer(self.id);
        self.device.release_stream();
        self.fault.send_replace(Some(error));
    }

    /// Flush the final chunk, then release the stream and the transport binding.
    async fn teardown(&self, run: Option<ActiveRun>) {
        if let Some(run) = run {
            run.stream.unsubscribe(run.tap);
            let _ = run.stop_tx.send(());
            if let Err(e) = run.chunker.await {
                log::error!("recorder {} chunker task failed: {}", self.id, e);
            }
            if let Some(connector) = run.connector {
                connector.abort();
            }
        }
        if let Some(transport) = &self.transport {
            transport.close().await;
        }
        self.device.release_writer(self.id);
        self.device.release_stream();
    }
}

#[async_trait]
impl StreamWriter for RecorderInner {
    fn writer_id(&self) -> Uuid {
        self.id
    }

    async fn force_release(&self) {
        if let Some(captured) = self.stop().await {
            log::warn!(
                "recorder {} released by a newer recorder; discarded {} bytes",
                self.id,
                captured.bytes.len()
            );
        }
    }
}

impl Drop for RecorderInner {
    fn drop(&mut self) {
        if let Some(run) = self.run.get_mut().take() {
            run.stream.unsubscribe(run.tap);
            run.chunker.abort();
            if let Some(connector) = run.connector {
                connector.abort();
            }
            self.device.release_stream();
        }
        self.device.release_writer(self.id);
    }
}

/// Background task turning buffered frames into chunks.
struct Chunker {
    recorder: Weak<RecorderInner>,
    stream: Arc<AudioStreamHandle>,
    buffer: Arc<Mutex<RingBuffer>>,
    format: StreamFormat,
    timeslice: Duration,
    transport: Option<Arc<dyn Transport>>,
    session: Arc<Mutex<RecordingSession>>,
}

impl Chunker {
    async fn run(self, mut stop_rx: oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.timeslice, self.timeslice);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut header = Some(wav_format::generate_streaming_header(
            self.format.sample_rate,
            self.format.channels,
        ));
        let mut seq = 0u64;

        loop {
            let finishing = tokio::select! {
                _ = ticker.tick() => false,
                _ = &mut stop_rx => true,
            };

            if !finishing && !self.stream.is_alive() {
                let error = self.stream.fault().unwrap_or(SessionError::DeviceUnavailable);
                log::error!("microphone stream ended while recording: {}", error);
                if let Some(recorder) = self.recorder.upgrade() {
                    recorder.fail(error).await;
                }
                break;
            }

            let (samples, overrun) = {
                let mut buffer = self.buffer.lock();
                (buffer.drain_frames(), buffer.take_overrun())
            };
            if overrun > 0 {
                log::warn!("capture buffer overflowed; {} samples lost", overrun);
            }

            // Empty slices are skipped; the first chunk always carries the header.
            if header.is_some() || !samples.is_empty() {
                let mut bytes = Vec::with_capacity(wav_format::WAV_HEADER_SIZE + samples.len() * 4);
                if let Some(header) = header.take() {
                    bytes.extend_from_slice(&header);
                }
                bytes.extend_from_slice(&wav_format::f32_to_le_bytes(&samples));

                let chunk = CaptureChunk::new(seq, bytes);
                seq += 1;
                {
                    let mut session = self.session.lock();
                    session.diagnostics.chunks_emitted += 1;
                    session.diagnostics.bytes_emitted += chunk.len() as u64;
                    session.chunks.push(chunk.clone());
                }
                if let Some(transport) = &self.transport {
                    forward(transport.as_ref(), &chunk, &self.session).await;
                }
            }

            if finishing {
                break;
            }
        }
    }
}

/// Send one chunk if the transport is connected. Never fails the recording.
async fn forward(transport: &dyn Transport, chunk: &CaptureChunk, session: &Mutex<RecordingSession>) {
    let status = transport.status();
    if !status.is_connected() {
        log::debug!("transport {}; chunk {} kept locally, send skipped", status, chunk.seq);
        session.lock().diagnostics.sends_skipped += 1;
        return;
    }

    match transport.send(chunk).await {
        Ok(SendOutcome::Delivered) => session.lock().diagnostics.sends_delivered += 1,
        Ok(SendOutcome::Dropped) => {
            log::debug!("chunk {} dropped by transport", chunk.seq);
            session.lock().diagnostics.sends_skipped += 1;
        }
        Err(e) => {
            log::warn!("send of chunk {} failed: {}", chunk.seq, e);
            session.lock().diagnostics.sends_failed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockMicrophone, RecordingTransport};

    fn recorder_with(mic: &MockMicrophone, transport: Option<Arc<RecordingTransport>>) -> (Arc<DeviceAudioSource>, Recorder) {
        let device = Arc::new(DeviceAudioSource::new(mic.clone()));
        let transport = transport.map(|t| t as Arc<dyn Transport>);
        let recorder = Recorder::new(Arc::clone(&device), Duration::from_millis(250), transport);
        (device, recorder)
    }

    #[tokio::test(start_paused = true)]
    async fn start_twice_is_rejected() {
        let mic = MockMicrophone::new(16000, 1);
        let (_device, recorder) = recorder_with(&mic, None);

        recorder.start().await.unwrap();
        let err = recorder.start().await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidTransition { .. }));
        assert!(recorder.is_recording());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_when_idle_is_noop() {
        let mic = MockMicrophone::new(16000, 1);
        let (_device, recorder) = recorder_with(&mic, None);
        assert!(recorder.stop().await.is_none());
        assert!(recorder.state().is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_device_leaves_recorder_idle() {
        let (_device, recorder) = recorder_with(&MockMicrophone::unavailable(), None);
        assert_eq!(recorder.start().await.unwrap_err(), SessionError::DeviceUnavailable);
        assert!(recorder.state().is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn first_chunk_carries_streaming_header() {
        let mic = MockMicrophone::new(16000, 1);
        let (_device, recorder) = recorder_with(&mic, None);

        recorder.start().await.unwrap();
        mic.emit(&[0.25; 160]);
        tokio::time::sleep(Duration::from_millis(260)).await;

        let chunks = recorder.chunks();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].seq, 0);
        assert_eq!(chunks[0].len(), 44 + 160 * 4);
        assert_eq!(&chunks[0].bytes[0..4], b"RIFF");
    }

    #[tokio::test(start_paused = true)]
    async fn silent_slices_emit_nothing() {
        let mic = MockMicrophone::new(16000, 1);
        let (_device, recorder) = recorder_with(&mic, None);

        recorder.start().await.unwrap();
        mic.emit(&[0.1; 16]);
        tokio::time::sleep(Duration::from_millis(1010)).await;

        assert_eq!(recorder.chunks().len(), 1);
        let captured = recorder.stop().await.unwrap();
        assert_eq!(captured.chunk_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_flushes_pending_frames() {
        let mic = MockMicrophone::new(8000, 1);
        let (device, recorder) = recorder_with(&mic, None);

        recorder.start().await.unwrap();
        mic.emit(&[0.5; 80]);
        tokio::time::sleep(Duration::from_millis(260)).await;
        mic.emit(&[0.5; 40]);

        let captured = recorder.stop().await.unwrap();
        assert_eq!(captured.chunk_count, 2);
        assert_eq!(captured.bytes.len(), 44 + 120 * 4);
        assert!(!device.has_live_stream());
        assert!(recorder.state().is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnected_transport_skips_sends_but_keeps_chunks() {
        let mic = MockMicrophone::new(16000, 1);
        let transport = Arc::new(RecordingTransport::never_connects());
        let (_device, recorder) = recorder_with(&mic, Some(Arc::clone(&transport)));

        recorder.start().await.unwrap();
        // Stay clear of the tick instants so each emit lands in its own slice.
        tokio::time::sleep(Duration::from_millis(10)).await;
        for _ in 0..3 {
            mic.emit(&[0.1; 32]);
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
        let captured = recorder.stop().await.unwrap();

        assert_eq!(transport.sent().len(), 0);
        assert_eq!(captured.chunk_count, 3);
        assert_eq!(captured.sends_skipped, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn send_failures_do_not_abort_recording() {
        let mic = MockMicrophone::new(16000, 1);
        let transport = Arc::new(RecordingTransport::connected());
        transport.fail_sends(true);
        let (_device, recorder) = recorder_with(&mic, Some(Arc::clone(&transport)));

        recorder.start().await.unwrap();
        mic.emit(&[0.1; 32]);
        tokio::time::sleep(Duration::from_millis(260)).await;
        mic.emit(&[0.1; 32]);
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert!(recorder.is_recording());
        let captured = recorder.stop().await.unwrap();
        assert_eq!(captured.sends_failed, 2);
        assert_eq!(captured.chunk_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn second_recorder_preempts_first() {
        let mic = MockMicrophone::new(16000, 1);
        let device = Arc::new(DeviceAudioSource::new(mic.clone()));
        let first = Recorder::new(Arc::clone(&device), Duration::from_millis(250), None);
        let second = Recorder::new(Arc::clone(&device), Duration::from_millis(250), None);

        first.start().await.unwrap();
        let first_stream = device.current_stream().unwrap().id();

        second.start().await.unwrap();
        assert!(first.state().is_idle());
        assert!(second.is_recording());
        assert_eq!(device.writer_id(), Some(second.id()));
        assert_ne!(device.current_stream().unwrap().id(), first_stream);
        assert_eq!(mic.max_concurrent_streams(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn device_loss_fails_recording_until_reset() {
        let mic = MockMicrophone::new(16000, 1);
        let (device, recorder) = recorder_with(&mic, None);

        recorder.start().await.unwrap();
        device.release_stream();
        tokio::time::sleep(Duration::from_millis(260)).await;

        assert_eq!(recorder.state(), RecorderState::Failed(SessionError::DeviceUnavailable));
        assert!(recorder.stop().await.is_none());

        recorder.reset().await;
        assert!(recorder.state().is_idle());
        recorder.start().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn backend_fault_releases_the_run() {
        let mic = MockMicrophone::new(16000, 1);
        let transport = Arc::new(RecordingTransport::connected());
        let (device, recorder) = recorder_with(&mic, Some(Arc::clone(&transport)));
        let faults = recorder.watch_fault();

        recorder.start().await.unwrap();
        assert_eq!(*faults.borrow(), None);
        mic.emit(&[0.1; 32]);
        mic.fail(SessionError::DeviceUnavailable);
        tokio::time::sleep(Duration::from_millis(260)).await;

        assert_eq!(recorder.state(), RecorderState::Failed(SessionError::DeviceUnavailable));
        assert_eq!(*faults.borrow(), Some(SessionError::DeviceUnavailable));
        assert!(!mic.is_running());
        assert!(!device.has_live_stream());
        assert_eq!(device.writer_id(), None);
        assert_eq!(transport.close_count(), 1);
        assert_eq!(transport.status(), ConnectionStatus::Disconnected);

        recorder.reset().await;
        assert_eq!(*faults.borrow(), None);
        recorder.start().await.unwrap();
        assert!(mic.is_running());
    }
}
