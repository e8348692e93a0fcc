use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::models::audio_models::{AudioSource, StreamFormat};
use crate::models::error::SessionError;
use crate::processing::analyser::Analyser;
use crate::processing::wav_format;
use crate::traits::microphone::{FaultCallback, FrameCallback, MicrophoneBackend};

/// Identifies one frame subscriber on a stream.
pub type TapId = u64;

type Tap = Arc<dyn Fn(&[f32]) + Send + Sync + 'static>;

#[derive(Default)]
struct TapRegistry {
    alive: bool,
    taps: Vec<(TapId, Tap)>,
    analysers: Vec<Analyser>,
    fault: Option<SessionError>,
}

impl TapRegistry {
    /// Mark the stream dead and hand back the analysers it was feeding.
    fn shut(&mut self, fault: Option<SessionError>) -> Vec<Analyser> {
        if self.alive {
            self.fault = fault;
        }
        self.alive = false;
        self.taps.clear();
        std::mem::take(&mut self.analysers)
    }
}

fn shut_down(registry: &Mutex<TapRegistry>, fault: Option<SessionError>) {
    let analysers = registry.lock().shut(fault);
    for analyser in analysers {
        analyser.close();
    }
}

/// Shared ownership of one live microphone stream.
///
/// Frames from the backend fan out to every subscribed tap. Once the handle
/// is invalidated no tap fires again and every analyser fed by it is closed.
pub struct AudioStreamHandle {
    id: Uuid,
    format: StreamFormat,
    registry: Arc<Mutex<TapRegistry>>,
    next_tap: AtomicU64,
}

impl std::fmt::Debug for AudioStreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioStreamHandle")
            .field("id", &self.id)
            .field("format", &self.format)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl AudioStreamHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    pub fn is_alive(&self) -> bool {
        self.registry.lock().alive
    }

    /// Why the backend killed this stream, if it did.
    pub fn fault(&self) -> Option<SessionError> {
        self.registry.lock().fault.clone()
    }

    /// Receive every interleaved frame buffer delivered from now on.
    pub fn subscribe(&self, tap: impl Fn(&[f32]) + Send + Sync + 'static) -> Result<TapId, SessionError> {
        let mut registry = self.registry.lock();
        if !registry.alive {
            return Err(SessionError::NoActiveStream);
        }
        let id = self.next_tap.fetch_add(1, Ordering::Relaxed);
        registry.taps.push((id, Arc::new(tap)));
        Ok(id)
    }

    pub fn unsubscribe(&self, tap: TapId) {
        self.registry.lock().taps.retain(|(id, _)| *id != tap);
    }

    pub fn tap_count(&self) -> usize {
        self.registry.lock().taps.len()
    }

    fn attach_analyser(&self, analyser: &Analyser) {
        self.registry.lock().analysers.push(analyser.clone());
    }

    fn invalidate(&self) {
        shut_down(&self.registry, None);
    }
}

fn dispatch(registry: &Mutex<TapRegistry>, samples: &[f32]) {
    // Taps run under the lock so none can fire after `invalidate` returns.
    let registry = registry.lock();
    if !registry.alive {
        return;
    }
    for (_, tap) in &registry.taps {
        tap(samples);
    }
}

/// Shared processing context: owns the analysers wired to the stream.
///
/// Disconnecting a source node never closes the graph; only `close` does.
#[derive(Debug)]
pub struct AudioGraph {
    id: Uuid,
    analysers: Mutex<Vec<Analyser>>,
    closed: AtomicBool,
}

impl AudioGraph {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            analysers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn analyser_count(&self) -> usize {
        self.analysers.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for analyser in self.analysers.lock().drain(..) {
            analyser.close();
        }
    }
}

/// The current stream wired into the graph; connect analysers to it.
pub struct SourceNode {
    stream: Arc<AudioStreamHandle>,
    graph: Arc<AudioGraph>,
    connections: Mutex<Vec<TapId>>,
}

impl SourceNode {
    pub fn stream_id(&self) -> Uuid {
        self.stream.id()
    }

    pub fn graph(&self) -> &Arc<AudioGraph> {
        &self.graph
    }

    /// Feed mono frames from the stream into `analyser`.
    ///
    /// The analyser is closed when the stream is released.
    pub fn connect(&self, analyser: &Analyser) -> Result<(), SessionError> {
        let channels = self.stream.format().channels as usize;
        let target = analyser.clone();
        let tap = self.stream.subscribe(move |samples| {
            if channels > 1 {
                target.push_samples(&wav_format::downmix_to_mono(samples, channels));
            } else {
                target.push_samples(samples);
            }
        })?;
        self.stream.attach_analyser(analyser);
        self.connections.lock().push(tap);
        Ok(())
    }

    /// Cut every edge from this node. The graph and analysers stay usable.
    pub fn disconnect(&self) {
        for tap in self.connections.lock().drain(..) {
            self.stream.unsubscribe(tap);
        }
    }
}

impl Drop for SourceNode {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Something holding the single writer lease on the stream (a recorder).
#[async_trait]
pub trait StreamWriter: Send + Sync {
    fn writer_id(&self) -> Uuid;

    /// Stop writing and release the stream so a new writer can take over.
    async fn force_release(&self);
}

/// Owns microphone acquisition and the shared audio graph for one widget.
///
/// Created explicitly and passed to every component that needs it; torn down
/// by `close`.
pub struct DeviceAudioSource {
    backend: Mutex<Box<dyn MicrophoneBackend>>,
    stream: Mutex<Option<Arc<AudioStreamHandle>>>,
    graph: Mutex<Option<Arc<AudioGraph>>>,
    writer: Mutex<Option<(Uuid, Weak<dyn StreamWriter>)>>,
    opens: AtomicU64,
}

impl DeviceAudioSource {
    pub fn new(backend: impl MicrophoneBackend + 'static) -> Self {
        Self::from_boxed(Box::new(backend))
    }

    pub fn from_boxed(backend: Box<dyn MicrophoneBackend>) -> Self {
        Self {
            backend: Mutex::new(backend),
            stream: Mutex::new(None),
            graph: Mutex::new(None),
            writer: Mutex::new(None),
            opens: AtomicU64::new(0),
        }
    }

    pub fn is_available(&self) -> bool {
        self.backend.lock().is_available()
    }

    pub fn available_sources(&self) -> Result<Vec<AudioSource>, SessionError> {
        self.backend.lock().available_sources()
    }

    /// Return the live stream handle, opening the device if there is none.
    ///
    /// The backend (and with it any permission prompt) is only touched when
    /// no live handle exists.
    pub fn acquire_stream(&self) -> Result<Arc<AudioStreamHandle>, SessionError> {
        let mut slot = self.stream.lock();
        let mut backend = self.backend.lock();
        if let Some(handle) = slot.take() {
            if handle.is_alive() {
                *slot = Some(Arc::clone(&handle));
                return Ok(handle);
            }
            // Faulted while nobody released it; the backend is still open.
            if let Err(e) = backend.stop() {
                log::error!("failed to stop faulted microphone: {}", e);
            }
        }

        if !backend.is_available() {
            return Err(SessionError::DeviceUnavailable);
        }

        let registry = Arc::new(Mutex::new(TapRegistry {
            alive: true,
            ..TapRegistry::default()
        }));
        let feed = Arc::clone(&registry);
        let callback: FrameCallback = Arc::new(move |samples: &[f32]| dispatch(&feed, samples));
        let faulted = Arc::downgrade(&registry);
        let on_fault: FaultCallback = Arc::new(move |error: SessionError| {
            log::error!("microphone stream fault: {}", error);
            if let Some(registry) = faulted.upgrade() {
                shut_down(&registry, Some(error));
            }
        });

        let format = backend.start(callback, on_fault).map_err(|e| {
            log::error!("failed to open microphone: {}", e);
            e
        })?;
        self.opens.fetch_add(1, Ordering::SeqCst);

        let handle = Arc::new(AudioStreamHandle {
            id: Uuid::new_v4(),
            format,
            registry,
            next_tap: AtomicU64::new(0),
        });
        log::info!(
            "microphone stream {} opened ({} Hz, {} ch)",
            handle.id,
            format.sample_rate,
            format.channels
        );
        *slot = Some(Arc::clone(&handle));
        Ok(handle)
    }

    /// Stop every hardware track and invalidate the handle. No-op without one.
    pub fn release_stream(&self) {
        let Some(handle) = self.stream.lock().take() else {
            return;
        };
        handle.invalidate();
        if let Err(e) = self.backend.lock().stop() {
            log::error!("failed to stop microphone: {}", e);
        }
        log::info!("microphone stream {} released", handle.id);
    }

    pub fn current_stream(&self) -> Option<Arc<AudioStreamHandle>> {
        self.stream.lock().as_ref().filter(|h| h.is_alive()).cloned()
    }

    pub fn has_live_stream(&self) -> bool {
        self.current_stream().is_some()
    }

    /// Times the backend has been opened over this source's lifetime.
    pub fn open_count(&self) -> u64 {
        self.opens.load(Ordering::SeqCst)
    }

    fn ensure_graph(&self) -> Arc<AudioGraph> {
        let mut slot = self.graph.lock();
        match slot.as_ref() {
            Some(graph) if !graph.is_closed() => Arc::clone(graph),
            _ => {
                let graph = Arc::new(AudioGraph::new());
                log::debug!("audio graph {} created", graph.id);
                *slot = Some(Arc::clone(&graph));
                graph
            }
        }
    }

    pub fn graph(&self) -> Option<Arc<AudioGraph>> {
        self.graph.lock().clone()
    }

    /// A fresh analyser in the shared graph, creating the graph on first use.
    pub fn create_analyser(&self, window: usize) -> Result<Analyser, SessionError> {
        let graph = self.ensure_graph();
        let analyser = Analyser::new(window)?;
        let mut analysers = graph.analysers.lock();
        analysers.retain(|a| !a.is_closed());
        analysers.push(analyser.clone());
        Ok(analyser)
    }

    /// Wire the current stream into the graph.
    pub fn source_node(&self) -> Result<SourceNode, SessionError> {
        let stream = self.current_stream().ok_or(SessionError::NoActiveStream)?;
        Ok(SourceNode {
            stream,
            graph: self.ensure_graph(),
            connections: Mutex::new(Vec::new()),
        })
    }

    /// Take the writer lease, returning the writer that held it.
    ///
    /// The caller must `force_release` the returned writer before acquiring.
    pub fn claim_writer(&self, writer: &Arc<dyn StreamWriter>) -> Option<Arc<dyn StreamWriter>> {
        let id = writer.writer_id();
        let previous = self.writer.lock().replace((id, Arc::downgrade(writer)));
        previous
            .filter(|(previous_id, _)| *previous_id != id)
            .and_then(|(_, weak)| weak.upgrade())
    }

    /// Give the lease back if `writer_id` still holds it.
    pub fn release_writer(&self, writer_id: Uuid) {
        let mut slot = self.writer.lock();
        if slot.as_ref().map(|(id, _)| *id) == Some(writer_id) {
            *slot = None;
        }
    }

    pub fn writer_id(&self) -> Option<Uuid> {
        self.writer.lock().as_ref().map(|(id, _)| *id)
    }

    /// Tear down stream and graph.
    pub fn close(&self) {
        self.writer.lock().take();
        self.release_stream();
        if let Some(graph) = self.graph.lock().take() {
            graph.close();
            log::debug!("audio graph {} closed", graph.id);
        }
    }
}

impl Drop for DeviceAudioSource {
    fn drop(&mut self) {
        self.close();
    }
}
