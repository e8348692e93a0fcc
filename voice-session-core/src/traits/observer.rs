use crate::models::audio_models::WavAsset;
use crate::models::error::SessionError;
use crate::models::recording_result::RecordingResult;
use crate::models::state::{ConnectionStatus, VoicePhase};

/// Event sink for widget notifications.
///
/// Methods are called from whichever task drove the change; implementations
/// marshal to a UI thread themselves if they need one.
pub trait SessionObserver: Send + Sync {
    fn on_phase_changed(&self, phase: VoicePhase);

    fn on_connection_status(&self, _status: ConnectionStatus) {}

    fn on_error(&self, error: &SessionError);

    /// A recording was stopped and encoded. `saved` is set when a store is configured.
    fn on_recording_finished(&self, asset: &WavAsset, saved: Option<&RecordingResult>);
}
