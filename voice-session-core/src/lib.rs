//! # voice-session-core
//!
//! Platform-agnostic voice session engine.
//!
//! Acquires a microphone stream, feeds live frequency data to a visualizer,
//! slices captured audio into timed chunks and streams them to a remote sink
//! (a raw WebSocket or a conversational agent session), and re-encodes the
//! recording into canonical 16-bit PCM WAV on stop. Platform microphones
//! implement `MicrophoneBackend` and plug into `DeviceAudioSource`.
//!
//! ## Architecture
//!
//! ```text
//! voice-session-core (this crate)
//! ├── traits/       ← MicrophoneBackend, Transport, RealtimeConnector, AudioDecoder, AudioSink, SessionObserver
//! ├── models/       ← SessionError, state machines, SessionConfig, CaptureChunk, WavAsset
//! ├── processing/   ← Analyser, PcmEncoder, RingBuffer, resampling, WAV header I/O
//! ├── session/      ← DeviceAudioSource, FrequencyFeed, Recorder, AgentSession, VoiceWidget
//! ├── transport/    ← SocketTransport, AgentSessionTransport, CredentialClient, IngestServer
//! └── storage/      ← RecordingStore
//! ```
//!
//! Data flow:
//! ```text
//! DeviceAudioSource ─stream→ Recorder ─chunk→ Transport
//!         └─analyser→ FrequencyFeed ─frame→ visualizer
//! Recorder::stop ─bytes→ PcmEncoder ─WavAsset→ RecordingStore / observer
//! AgentSession ─replies→ AudioSink
//! ```

pub mod mock;
pub mod models;
pub mod processing;
pub mod session;
pub mod storage;
pub mod traits;
pub mod transport;

// Re-export key types at crate root for convenience.
pub use models::audio_models::{AudioSource, CaptureChunk, RecorderDiagnostics, StreamFormat, WavAsset};
pub use models::config::{AgentDescriptor, ChannelPolicy, SessionConfig};
pub use models::error::SessionError;
pub use models::recording_result::{CapturedAudio, RecordingMetadata, RecordingResult};
pub use models::state::{AgentState, ConnectionStatus, PhaseEvent, PhaseMachine, RecorderState, VoicePhase};
pub use processing::analyser::Analyser;
pub use processing::pcm_encoder::PcmEncoder;
pub use processing::ring_buffer::RingBuffer;
pub use session::agent::{AgentSession, ReplyQueue};
pub use session::device::{AudioStreamHandle, DeviceAudioSource, SourceNode};
pub use session::feed::{FeedFrame, FeedHandle, FrequencyFeed, RadialMeter};
pub use session::recorder::Recorder;
pub use session::widget::{Visualizer, VoiceWidget};
pub use storage::wav_file::RecordingStore;
pub use traits::microphone::{FaultCallback, FrameCallback, MicrophoneBackend};
pub use traits::observer::SessionObserver;
pub use traits::playback::{AudioSink, NullSink};
pub use traits::realtime::{AgentEvent, RealtimeConnector, RealtimeLink};
pub use traits::transport::{SendOutcome, Transport};
pub use transport::agent::AgentSessionTransport;
pub use transport::credentials::CredentialClient;
pub use transport::ingest::{IngestReport, IngestServer};
pub use transport::realtime::WsRealtimeConnector;
pub use transport::socket::SocketTransport;
