use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use super::agent::AgentSession;
use super::device::{DeviceAudioSource, SourceNode};
use super::feed::{FeedHandle, FeedFrame, FrequencyFeed};
use super::recorder::Recorder;
use crate::models::audio_models::WavAsset;
use crate::models::config::SessionConfig;
use crate::models::error::SessionError;
use crate::models::state::{PhaseEvent, PhaseMachine, RecorderState, VoicePhase};
use crate::processing::pcm_encoder::PcmEncoder;
use crate::storage::wav_file::RecordingStore;
use crate::traits::observer::SessionObserver;
use crate::traits::playback::AudioSink;

/// A frequency feed wired to the live microphone stream.
///
/// The feed ends when the stream is released. Dropping the visualizer
/// disconnects the analyser; the shared graph stays up for the next one.
pub struct Visualizer {
    feed: FrequencyFeed,
    _node: SourceNode,
}

impl Visualizer {
    pub fn feed(&self) -> &FrequencyFeed {
        &self.feed
    }

    pub fn spawn(&self, callback: impl FnMut(&FeedFrame) + Send + 'static) -> FeedHandle {
        self.feed.spawn(callback)
    }
}

/// Voice widget orchestrator.
///
/// Combines a recorder, the PCM encoder and an optional agent session under
/// one phase machine:
/// ```text
/// Ready ─start→ Recording ─stop→ Processing ─encode→ Ready
///   └─reply→ Playing ─finished→ Ready          (any) ─fault→ Error ─reset→ Ready
/// ```
pub struct VoiceWidget {
    device: Arc<DeviceAudioSource>,
    recorder: Recorder,
    encoder: PcmEncoder,
    phase: Arc<Mutex<PhaseMachine>>,
    agent: Option<Arc<AgentSession>>,
    sink: Option<Arc<dyn AudioSink>>,
    store: Option<RecordingStore>,
    observer: Option<Arc<dyn SessionObserver>>,
    watchers: Mutex<Vec<JoinHandle<()>>>,
    fault_watch: Mutex<Option<JoinHandle<()>>>,
}

impl VoiceWidget {
    pub fn new(device: Arc<DeviceAudioSource>, recorder: Recorder) -> Self {
        Self {
            device,
            recorder,
            encoder: PcmEncoder::default(),
            phase: Arc::new(Mutex::new(PhaseMachine::new())),
            agent: None,
            sink: None,
            store: None,
            observer: None,
            watchers: Mutex::new(Vec::new()),
            fault_watch: Mutex::new(None),
        }
    }

    /// Wire a widget from configuration; the store is enabled when an
    /// output directory is set.
    pub fn from_config(device: Arc<DeviceAudioSource>, recorder: Recorder, config: &SessionConfig) -> Self {
        let mut widget = Self::new(device, recorder).with_encoder(PcmEncoder::new(config.channel_policy));
        if let Some(dir) = &config.output_directory {
            widget = widget.with_store(RecordingStore::new(dir));
        }
        widget
    }

    pub fn with_encoder(mut self, encoder: PcmEncoder) -> Self {
        self.encoder = encoder;
        self
    }

    /// Attach the agent session; it is also initialized before each recording.
    pub fn with_agent(mut self, agent: Arc<AgentSession>) -> Self {
        self.recorder.set_agent_session(Some(Arc::clone(&agent)));
        self.agent = Some(agent);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn AudioSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_store(mut self, store: RecordingStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn phase(&self) -> VoicePhase {
        self.phase.lock().phase()
    }

    pub fn last_fault(&self) -> Option<String> {
        self.phase.lock().last_fault().map(str::to_owned)
    }

    pub fn device(&self) -> &Arc<DeviceAudioSource> {
        &self.device
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    pub fn agent(&self) -> Option<&Arc<AgentSession>> {
        self.agent.as_ref()
    }

    fn apply(&self, event: PhaseEvent) -> Result<VoicePhase, SessionError> {
        let phase = self.phase.lock().handle(event)?;
        if let Some(observer) = &self.observer {
            observer.on_phase_changed(phase);
        }
        Ok(phase)
    }

    fn report(&self, error: &SessionError) {
        log::warn!("voice widget: {}", error);
        if let Some(observer) = &self.observer {
            observer.on_error(error);
        }
    }

    /// Move to `Error` if the recorder fails while this recording is live.
    fn watch_recorder_fault(&self) {
        let mut faults = self.recorder.watch_fault();
        let phase = Arc::clone(&self.phase);
        let observer = self.observer.clone();
        let task = tokio::spawn(async move {
            let error = loop {
                let current = faults.borrow_and_update().clone();
                if let Some(error) = current {
                    break error;
                }
                if faults.changed().await.is_err() {
                    return;
                }
            };

            let faulted = {
                let mut machine = phase.lock();
                if machine.phase() != VoicePhase::Recording {
                    return;
                }
                machine.handle(PhaseEvent::Fault(error.to_string()))
            };
            log::warn!("voice widget: recording failed: {}", error);
            if let Some(observer) = &observer {
                observer.on_error(&error);
                if let Ok(next) = faulted {
                    observer.on_phase_changed(next);
                }
            }
        });
        if let Some(previous) = self.fault_watch.lock().replace(task) {
            previous.abort();
        }
    }

    fn stop_fault_watch(&self) {
        if let Some(task) = self.fault_watch.lock().take() {
            task.abort();
        }
    }

    /// Start recording if ready, stop if recording.
    ///
    /// Returns the encoded asset when this call stopped a recording.
    pub async fn toggle_recording(&self) -> Result<Option<WavAsset>, SessionError> {
        if self.phase() == VoicePhase::Recording {
            self.stop_recording().await
        } else {
            self.start_recording().await.map(|_| None)
        }
    }

    pub async fn start_recording(&self) -> Result<(), SessionError> {
        self.apply(PhaseEvent::StartRecording)?;
        if let Err(e) = self.recorder.start().await {
            self.report(&e);
            self.apply(PhaseEvent::Reset)?;
            return Err(e);
        }
        self.watch_recorder_fault();
        Ok(())
    }

    /// Stop, then encode what was captured.
    ///
    /// `Ok(None)` when nothing usable was captured; the phase is back at
    /// `Ready` either way.
    pub async fn stop_recording(&self) -> Result<Option<WavAsset>, SessionError> {
        if self.phase() != VoicePhase::Recording {
            return Ok(None);
        }
        self.apply(PhaseEvent::StopRecording)?;
        self.stop_fault_watch();

        let Some(captured) = self.recorder.stop().await else {
            let error = match self.recorder.state() {
                RecorderState::Failed(e) => e,
                _ => SessionError::NoActiveStream,
            };
            self.report(&error);
            self.recorder.reset().await;
            self.apply(PhaseEvent::EncodeFailed)?;
            return Ok(None);
        };

        let asset = match self.encoder.encode(&captured.bytes) {
            Ok(asset) => asset,
            Err(e) => {
                self.report(&e);
                self.apply(PhaseEvent::EncodeFailed)?;
                return Ok(None);
            }
        };

        let saved = self.store.as_ref().and_then(|store| match store.save(&asset) {
            Ok(result) => Some(result),
            Err(e) => {
                self.report(&e);
                None
            }
        });

        log::info!(
            "recording encoded: {} frames at {} Hz, {} ch",
            asset.frame_count(),
            asset.sample_rate(),
            asset.channels()
        );
        if let Some(observer) = &self.observer {
            observer.on_recording_finished(&asset, saved.as_ref());
        }
        self.apply(PhaseEvent::Encoded)?;
        Ok(Some(asset))
    }

    /// Play the oldest queued reply. `Ok(false)` when the queue is empty.
    pub async fn play_next_reply(&self) -> Result<bool, SessionError> {
        let (Some(agent), Some(sink)) = (&self.agent, &self.sink) else {
            return Ok(false);
        };
        if self.phase() != VoicePhase::Ready {
            return Err(SessionError::invalid_transition(self.phase(), PhaseEvent::ReplyStarted));
        }
        let Some(reply) = agent.try_next_reply() else {
            return Ok(false);
        };

        self.apply(PhaseEvent::ReplyStarted)?;
        match sink.play(&reply).await {
            Ok(()) => {
                self.apply(PhaseEvent::PlaybackFinished)?;
                Ok(true)
            }
            Err(e) => {
                self.report(&e);
                self.apply(PhaseEvent::Fault(e.to_string()))?;
                Err(e)
            }
        }
    }

    /// Leave the error phase, discarding any half-finished work.
    pub async fn reset(&self) {
        self.stop_fault_watch();
        if let Some(sink) = &self.sink {
            sink.stop();
        }
        self.recorder.reset().await;
        let _ = self.apply(PhaseEvent::Reset);
    }

    /// Attach a frequency feed to the current microphone stream.
    pub fn visualizer(&self, window: usize, fps: u32) -> Result<Visualizer, SessionError> {
        let node = self.device.source_node()?;
        let analyser = self.device.create_analyser(window)?;
        node.connect(&analyser)?;
        Ok(Visualizer {
            feed: FrequencyFeed::with_fps(analyser, fps),
            _node: node,
        })
    }

    /// Forward transport and agent connection status to the observer.
    pub fn watch_connection(&self) {
        let Some(observer) = self.observer.clone() else {
            return;
        };
        let receivers = self
            .recorder
            .watch_transport()
            .into_iter()
            .chain(self.agent.as_ref().map(|a| a.watch_status()));

        let mut watchers = self.watchers.lock();
        for mut rx in receivers {
            let observer = Arc::clone(&observer);
            watchers.push(tokio::spawn(async move {
                observer.on_connection_status(*rx.borrow_and_update());
                while rx.changed().await.is_ok() {
                    let status = *rx.borrow_and_update();
                    observer.on_connection_status(status);
                }
            }));
        }
    }

    /// Stop everything and release the microphone and agent session.
    pub async fn shutdown(&self) {
        self.stop_fault_watch();
        if self.recorder.is_recording() {
            let _ = self.recorder.stop().await;
        }
        if let Some(sink) = &self.sink {
            sink.stop();
        }
        for watcher in self.watchers.lock().drain(..) {
            watcher.abort();
        }
        if let Some(agent) = &self.agent {
            agent.disconnect().await;
        }
        self.device.close();
        log::info!("voice widget shut down");
    }
}

impl Drop for VoiceWidget {
    fn drop(&mut self) {
        for watcher in self.watchers.get_mut().drain(..) {
            watcher.abort();
        }
        if let Some(task) = self.fault_watch.get_mut().take() {
            task.abort();
        }
    }
}
