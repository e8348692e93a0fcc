use std::io::Write;

use parking_lot::Mutex;
use serde::Serialize;

use voice_session_core::{
    ConnectionStatus, FeedFrame, RadialMeter, RecordingResult, SessionError, SessionObserver, VoicePhase, WavAsset,
};

/// Observer that prints widget events to stdout, as text or JSON lines.
pub struct ConsoleObserver {
    json: bool,
    last_status: Mutex<Option<ConnectionStatus>>,
}

impl ConsoleObserver {
    pub fn new(json: bool) -> Self {
        Self {
            json,
            last_status: Mutex::new(None),
        }
    }

    fn emit<T: Serialize>(&self, event: &str, payload: &T, text: impl FnOnce() -> String) {
        if self.json {
            let line = serde_json::json!({ "event": event, "payload": payload });
            println!("{}", line);
        } else {
            println!("{}", text());
        }
    }
}

// -- Event payloads --

#[derive(Serialize)]
struct PhasePayload {
    phase: String,
}

#[derive(Serialize)]
struct StatusPayload {
    status: String,
}

#[derive(Serialize)]
struct ErrorPayload {
    message: String,
    recoverable: bool,
}

#[derive(Serialize)]
struct FinishedPayload {
    duration_secs: f64,
    sample_rate: u32,
    channels: u16,
    file_path: Option<String>,
    checksum: Option<String>,
}

impl SessionObserver for ConsoleObserver {
    fn on_phase_changed(&self, phase: VoicePhase) {
        self.emit(
            "phase-changed",
            &PhasePayload {
                phase: phase.to_string(),
            },
            || format!("[{}]", phase),
        );
    }

    fn on_connection_status(&self, status: ConnectionStatus) {
        let mut last = self.last_status.lock();
        if *last == Some(status) {
            return;
        }
        *last = Some(status);
        drop(last);
        self.emit(
            "connection-status",
            &StatusPayload {
                status: status.to_string(),
            },
            || format!("connection: {}", status),
        );
    }

    fn on_error(&self, error: &SessionError) {
        self.emit(
            "error",
            &ErrorPayload {
                message: error.to_string(),
                recoverable: error.is_recoverable(),
            },
            || format!("error: {}", error),
        );
    }

    fn on_recording_finished(&self, asset: &WavAsset, saved: Option<&RecordingResult>) {
        let payload = FinishedPayload {
            duration_secs: asset.duration_secs(),
            sample_rate: asset.sample_rate(),
            channels: asset.channels(),
            file_path: saved.map(|r| r.file_path.display().to_string()),
            checksum: saved.map(|r| r.checksum.clone()),
        };
        self.emit("recording-finished", &payload, || match saved {
            Some(result) => format!(
                "recorded {:.2}s ({} Hz, {} ch) -> {}",
                payload.duration_secs,
                payload.sample_rate,
                payload.channels,
                result.file_path.display()
            ),
            None => format!(
                "recorded {:.2}s ({} Hz, {} ch)",
                payload.duration_secs, payload.sample_rate, payload.channels
            ),
        });
    }
}

/// Draw one feed frame as a single overwritten terminal line.
///
/// The bar length follows the meter's glow radius above its base radius,
/// scaled so a full-scale spectrum fills the line.
pub fn draw_meter(meter: &RadialMeter, frame: &FeedFrame) {
    let full = meter.glow_radius(255.0) - meter.base_radius();
    let glow = meter.glow_radius(frame.loudness) - meter.base_radius();
    let width = (glow / full * 60.0).clamp(0.0, 60.0) as usize;
    let mut out = std::io::stdout().lock();
    let _ = write!(out, "\r{:<60}|", "#".repeat(width));
    let _ = out.flush();
}
