use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::audio_models::{StreamFormat, WavAsset};

/// Raw capture returned by `Recorder::stop`.
///
/// `bytes` is the concatenation of every chunk in sequence order, in the
/// recorder's native encoding (not yet canonicalized).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedAudio {
    pub bytes: Vec<u8>,
    pub format: StreamFormat,
    pub chunk_count: u64,
    pub sends_delivered: u64,
    pub sends_skipped: u64,
    pub sends_failed: u64,
    pub duration: Duration,
}

impl CapturedAudio {
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Result returned when a recording has been written to disk.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingResult {
    pub file_path: PathBuf,
    pub duration_secs: f64,
    pub metadata: RecordingMetadata,
    pub checksum: String,
}

/// Metadata written as a JSON sidecar next to each recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingMetadata {
    pub id: String,
    pub duration_secs: f64,
    pub file_path: String,
    pub checksum: String,
    pub created_at: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
    pub frame_count: u64,
}

impl RecordingMetadata {
    pub fn for_asset(asset: &WavAsset, file_path: &str, checksum: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            duration_secs: asset.duration_secs(),
            file_path: file_path.to_string(),
            checksum: checksum.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            sample_rate: asset.sample_rate(),
            channels: asset.channels(),
            bit_depth: asset.bit_depth(),
            frame_count: asset.frame_count() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_describes_asset() {
        let asset = WavAsset::new(16000, 1, vec![0; 3200]).unwrap();
        let meta = RecordingMetadata::for_asset(&asset, "/tmp/a.wav", "abc");
        assert_eq!(meta.frame_count, 1600);
        assert_eq!(meta.bit_depth, 16);
        assert!((meta.duration_secs - 0.1).abs() < 1e-9);
        assert!(uuid::Uuid::parse_str(&meta.id).is_ok());
    }

    #[test]
    fn metadata_json_field_names() {
        let asset = WavAsset::new(8000, 2, vec![]).unwrap();
        let meta = RecordingMetadata::for_asset(&asset, "x.wav", "00");
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["sample_rate"], 8000);
        assert_eq!(json["channels"], 2);
        assert_eq!(json["file_path"], "x.wav");
    }
}
