//! cpal microphone backend.
//!
//! The cpal `Stream` is not `Send`, so it lives on a dedicated capture thread
//! for its whole life; `stop` signals that thread and joins it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, StreamConfig, StreamError};

use voice_session_core::models::audio_models::{AudioSource, StreamFormat};
use voice_session_core::models::error::SessionError;
use voice_session_core::traits::microphone::{FaultCallback, FrameCallback, MicrophoneBackend};

use crate::devices;

/// Microphone capture through the host's default audio API.
pub struct CpalMicrophone {
    device_pattern: Option<String>,
    running: Arc<AtomicBool>,
    stop_tx: Option<mpsc::Sender<()>>,
    capture_handle: Option<thread::JoinHandle<()>>,
}

impl CpalMicrophone {
    /// Capture from the host default input device.
    pub fn default_device() -> Self {
        Self::with_device(None)
    }

    /// Capture from the first input device whose name contains `pattern`.
    pub fn with_device(pattern: Option<String>) -> Self {
        Self {
            device_pattern: pattern,
            running: Arc::new(AtomicBool::new(false)),
            stop_tx: None,
            capture_handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl MicrophoneBackend for CpalMicrophone {
    fn is_available(&self) -> bool {
        devices::find_input_device(self.device_pattern.as_deref()).is_some()
    }

    fn start(&mut self, callback: FrameCallback, on_fault: FaultCallback) -> Result<StreamFormat, SessionError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(SessionError::ConfigurationFailed("microphone already running".into()));
        }

        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<StreamFormat, SessionError>>(1);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let pattern = self.device_pattern.clone();
        let running = Arc::clone(&self.running);
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("cpal-mic-capture".into())
            .spawn(move || {
                let stream = match open_stream(pattern.as_deref(), callback, on_fault) {
                    Ok((stream, format)) => {
                        let _ = ready_tx.send(Ok(format));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        running.store(false, Ordering::SeqCst);
                        return;
                    }
                };
                // Blocks until `stop` sends or drops the sender.
                let _ = stop_rx.recv();
                drop(stream);
                running.store(false, Ordering::SeqCst);
            })
            .map_err(|e| SessionError::Unknown(format!("failed to spawn capture thread: {}", e)))?;

        let format = ready_rx
            .recv()
            .map_err(|_| SessionError::Unknown("capture thread exited during setup".into()))
            .and_then(|result| result);

        match format {
            Ok(format) => {
                self.stop_tx = Some(stop_tx);
                self.capture_handle = Some(handle);
                Ok(format)
            }
            Err(e) => {
                let _ = handle.join();
                self.running.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    fn stop(&mut self) -> Result<(), SessionError> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.capture_handle.take() {
            handle
                .join()
                .map_err(|_| SessionError::Unknown("capture thread panicked".into()))?;
        }
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn device_info(&self) -> AudioSource {
        let name = devices::find_input_device(self.device_pattern.as_deref())
            .and_then(|d| d.name().ok())
            .unwrap_or_else(|| "Default Microphone".into());
        AudioSource {
            id: name.clone(),
            name,
            is_default: self.device_pattern.is_none(),
        }
    }

    fn available_sources(&self) -> Result<Vec<AudioSource>, SessionError> {
        devices::list_input_devices()
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn open_stream(
    pattern: Option<&str>,
    callback: FrameCallback,
    on_fault: FaultCallback,
) -> Result<(cpal::Stream, StreamFormat), SessionError> {
    let device = devices::find_input_device(pattern).ok_or(SessionError::DeviceUnavailable)?;
    let supported = device.default_input_config().map_err(|e| {
        log::error!("no default input config: {}", e);
        SessionError::DeviceUnavailable
    })?;
    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.into();
    let format = StreamFormat::new(config.sample_rate.0, config.channels);

    log::info!(
        "input device '{}': {} Hz, {} ch, {:?}",
        device.name().unwrap_or_default(),
        format.sample_rate,
        format.channels,
        sample_format
    );

    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, callback, on_fault),
        SampleFormat::I16 => build_stream::<i16>(&device, &config, callback, on_fault),
        SampleFormat::U16 => build_stream::<u16>(&device, &config, callback, on_fault),
        SampleFormat::I32 => build_stream::<i32>(&device, &config, callback, on_fault),
        other => Err(SessionError::ConfigurationFailed(format!("unsupported sample format {:?}", other))),
    }?;
    stream.play().map_err(|e| map_error(&e.to_string()))?;
    Ok((stream, format))
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    callback: FrameCallback,
    on_fault: FaultCallback,
) -> Result<cpal::Stream, SessionError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let samples: Vec<f32> = data.iter().map(|s| s.to_sample::<f32>()).collect();
                callback(&samples);
            },
            move |err| {
                log::error!("audio capture error: {}", err);
                on_fault(map_stream_error(err));
            },
            None,
        )
        .map_err(|e| map_error(&e.to_string()))
}

/// cpal reports access refusals as backend-specific text.
fn map_error(message: &str) -> SessionError {
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized") {
        SessionError::PermissionDenied
    } else if lower.contains("not available") || lower.contains("no longer available") {
        SessionError::DeviceUnavailable
    } else {
        SessionError::ConfigurationFailed(message.to_string())
    }
}

/// Errors raised by a running stream; a vanished device is not recoverable.
fn map_stream_error(err: StreamError) -> SessionError {
    match err {
        StreamError::DeviceNotAvailable => SessionError::DeviceUnavailable,
        other => map_error(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_errors_map_to_permission_denied() {
        assert_eq!(map_error("Permission denied (os error 13)"), SessionError::PermissionDenied);
        assert_eq!(
            map_error("The requested device is no longer available."),
            SessionError::DeviceUnavailable
        );
        assert!(matches!(map_error("buffer size"), SessionError::ConfigurationFailed(_)));
    }

    #[test]
    fn unplugged_device_is_a_device_fault() {
        assert_eq!(map_stream_error(StreamError::DeviceNotAvailable), SessionError::DeviceUnavailable);
    }

    #[test]
    fn stop_without_start_is_noop() {
        let mut mic = CpalMicrophone::default_device();
        assert!(mic.stop().is_ok());
        assert!(!mic.is_running());
    }
}
