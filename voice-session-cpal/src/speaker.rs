//! Reply playback through the default output device.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use voice_session_core::models::audio_models::{StreamFormat, WavAsset};
use voice_session_core::models::error::SessionError;
use voice_session_core::processing::resample::{remap_channels, resample_interleaved};
use voice_session_core::traits::playback::AudioSink;

use crate::devices;

/// Format assumed for replies that are not WAV: 24 kHz mono 16-bit PCM.
pub const DEFAULT_RAW_FORMAT: StreamFormat = StreamFormat {
    sample_rate: 24000,
    channels: 1,
};

/// Plays reply audio on the default output device.
///
/// Replies may be canonical WAV or bare 16-bit PCM in `raw_format`. Audio is
/// converted to the device's rate and channel count before playback.
pub struct CpalSpeaker {
    raw_format: StreamFormat,
    cancel: Mutex<Option<Arc<AtomicBool>>>,
}

impl CpalSpeaker {
    pub fn new() -> Self {
        Self::with_raw_format(DEFAULT_RAW_FORMAT)
    }

    pub fn with_raw_format(raw_format: StreamFormat) -> Self {
        Self {
            raw_format,
            cancel: Mutex::new(None),
        }
    }

    /// Raw PCM is cut back to whole frames; a trailing partial sample is dropped.
    fn decode(&self, bytes: &[u8]) -> Result<(Vec<f32>, StreamFormat), SessionError> {
        let asset = match WavAsset::parse(bytes) {
            Ok(asset) => asset,
            Err(_) => {
                let frame = self.raw_format.channels.max(1) as usize * 2;
                let whole = bytes.len() - bytes.len() % frame;
                if whole < bytes.len() {
                    log::debug!("dropping {} trailing bytes of raw reply", bytes.len() - whole);
                }
                WavAsset::new(self.raw_format.sample_rate, self.raw_format.channels, bytes[..whole].to_vec())?
            }
        };
        let samples = asset.samples().into_iter().map(|s| s as f32 / 32768.0).collect();
        Ok((samples, StreamFormat::new(asset.sample_rate(), asset.channels())))
    }
}

impl Default for CpalSpeaker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioSink for CpalSpeaker {
    async fn play(&self, bytes: &[u8]) -> Result<(), SessionError> {
        let (samples, source) = self.decode(bytes)?;
        if samples.is_empty() {
            return Ok(());
        }

        let cancel = Arc::new(AtomicBool::new(false));
        *self.cancel.lock() = Some(Arc::clone(&cancel));

        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<Result<(), SessionError>>(1);
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let thread_cancel = Arc::clone(&cancel);

        thread::Builder::new()
            .name("cpal-reply-playback".into())
            .spawn(move || {
                let finished = Arc::new(AtomicBool::new(false));
                let stream = match open_output(samples, source, Arc::clone(&finished), Arc::clone(&thread_cancel)) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                while !finished.load(Ordering::SeqCst) && !thread_cancel.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(10));
                }
                // Let the device drain its last buffer.
                thread::sleep(Duration::from_millis(50));
                drop(stream);
                let _ = done_tx.send(());
            })
            .map_err(|e| SessionError::Unknown(format!("failed to spawn playback thread: {}", e)))?;

        let ready = tokio::task::spawn_blocking(move || ready_rx.recv())
            .await
            .map_err(|e| SessionError::Unknown(e.to_string()))?;
        match ready {
            Ok(result) => result?,
            Err(_) => return Err(SessionError::Unknown("playback thread exited during setup".into())),
        }

        let _ = done_rx.await;
        self.cancel.lock().take();
        Ok(())
    }

    fn stop(&self) {
        if let Some(cancel) = self.cancel.lock().take() {
            cancel.store(true, Ordering::SeqCst);
        }
    }
}

fn open_output(
    samples: Vec<f32>,
    source: StreamFormat,
    finished: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
) -> Result<cpal::Stream, SessionError> {
    let device = devices::default_output_device().ok_or(SessionError::DeviceUnavailable)?;
    let supported = device
        .default_output_config()
        .map_err(|e| SessionError::ConfigurationFailed(format!("no default output config: {}", e)))?;
    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.into();

    let resampled = resample_interleaved(&samples, source.channels as usize, source.sample_rate, config.sample_rate.0);
    let output = remap_channels(&resampled, source.channels as usize, config.channels as usize);
    log::debug!(
        "playing {} samples ({} Hz, {} ch -> {} Hz, {} ch)",
        output.len(),
        source.sample_rate,
        source.channels,
        config.sample_rate.0,
        config.channels
    );

    let stream = match sample_format {
        SampleFormat::F32 => build_output::<f32>(&device, &config, output, finished, cancel),
        SampleFormat::I16 => build_output::<i16>(&device, &config, output, finished, cancel),
        SampleFormat::U16 => build_output::<u16>(&device, &config, output, finished, cancel),
        other => Err(SessionError::ConfigurationFailed(format!("unsupported sample format {:?}", other))),
    }?;
    stream
        .play()
        .map_err(|e| SessionError::ConfigurationFailed(format!("failed to start playback: {}", e)))?;
    Ok(stream)
}

fn build_output<T>(
    device: &Device,
    config: &StreamConfig,
    samples: Vec<f32>,
    finished: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
) -> Result<cpal::Stream, SessionError>
where
    T: SizedSample + FromSample<f32>,
{
    let mut position = 0usize;
    device
        .build_output_stream(
            config,
            move |out: &mut [T], _: &cpal::OutputCallbackInfo| {
                let cancelled = cancel.load(Ordering::SeqCst);
                for slot in out.iter_mut() {
                    let sample = if cancelled { 0.0 } else { samples.get(position).copied().unwrap_or(0.0) };
                    *slot = T::from_sample(sample);
                    position += 1;
                }
                if position >= samples.len() {
                    finished.store(true, Ordering::SeqCst);
                }
            },
            |err| log::error!("audio playback error: {}", err),
            None,
        )
        .map_err(|e| SessionError::ConfigurationFailed(format!("failed to open output stream: {}", e)))
}
