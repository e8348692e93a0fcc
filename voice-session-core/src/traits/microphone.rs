use std::sync::Arc;

use crate::models::audio_models::{AudioSource, StreamFormat};
use crate::models::error::SessionError;

/// Callback invoked when microphone frames are available.
///
/// `samples` are interleaved `f32` frames in the format returned by `start`.
pub type FrameCallback = Arc<dyn Fn(&[f32]) + Send + Sync + 'static>;

/// Callback invoked when a running stream dies (device unplugged, driver
/// error). No frames follow a fault.
pub type FaultCallback = Arc<dyn Fn(SessionError) + Send + Sync + 'static>;

/// Platform microphone capture.
///
/// Implemented by:
/// - `CpalMicrophone` (voice-session-cpal)
/// - `MockMicrophone` (tests, headless runs)
pub trait MicrophoneBackend: Send + Sync {
    /// Whether an input device is present.
    fn is_available(&self) -> bool;

    /// Open the device and start delivering frames.
    ///
    /// This is where the host asks for permission. Both callbacks fire on an
    /// audio thread, so keep them short; `on_fault` must not call `stop`.
    fn start(&mut self, callback: FrameCallback, on_fault: FaultCallback) -> Result<StreamFormat, SessionError>;

    /// Stop every hardware track and drop the callback.
    fn stop(&mut self) -> Result<(), SessionError>;

    fn device_info(&self) -> AudioSource;

    fn available_sources(&self) -> Result<Vec<AudioSource>, SessionError> {
        if self.is_available() {
            Ok(vec![self.device_info()])
        } else {
            Ok(Vec::new())
        }
    }
}
