use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use super::create_timestamped;
use crate::models::audio_models::WavAsset;
use crate::models::error::SessionError;
use crate::models::recording_result::{RecordingMetadata, RecordingResult};

/// Writes encoded recordings to a directory.
///
/// Each save produces two files:
/// ```text
/// voice_recording_20240131_142501.wav        canonical 16-bit PCM WAV
/// voice_recording_20240131_142501.json       RecordingMetadata sidecar
/// ```
#[derive(Debug, Clone)]
pub struct RecordingStore {
    directory: PathBuf,
}

impl RecordingStore {
    pub fn new(directory: impl AsRef<Path>) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn save(&self, asset: &WavAsset) -> Result<RecordingResult, SessionError> {
        let bytes = asset.to_wav_bytes();
        let checksum = hex_digest(&bytes);

        let (mut file, path) = create_timestamped(&self.directory, "voice_recording", "wav")?;
        let written = file.write_all(&bytes).and_then(|_| file.sync_all());
        if let Err(e) = written {
            let _ = fs::remove_file(&path);
            return Err(SessionError::StorageError(format!("failed to write recording: {}", e)));
        }

        let metadata = RecordingMetadata::for_asset(asset, &path.to_string_lossy(), &checksum);
        write_metadata(&metadata, &path)?;
        log::info!("saved recording {} ({} bytes)", path.display(), bytes.len());

        Ok(RecordingResult {
            file_path: path,
            duration_secs: asset.duration_secs(),
            metadata,
            checksum,
        })
    }

    /// Read a saved recording back, verifying it against its sidecar.
    pub fn load(&self, path: &Path) -> Result<(WavAsset, RecordingMetadata), SessionError> {
        let bytes = fs::read(path)
            .map_err(|e| SessionError::StorageError(format!("failed to read recording: {}", e)))?;
        let metadata = read_metadata(path)?;
        if hex_digest(&bytes) != metadata.checksum {
            return Err(SessionError::StorageError(format!(
                "checksum mismatch for {}",
                path.display()
            )));
        }
        Ok((WavAsset::parse(&bytes)?, metadata))
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    Sha256::digest(bytes).iter().map(|b| format!("{:02x}", b)).collect()
}

fn sidecar_path(recording_path: &Path) -> PathBuf {
    recording_path.with_extension("json")
}

pub fn write_metadata(metadata: &RecordingMetadata, recording_path: &Path) -> Result<(), SessionError> {
    let json = serde_json::to_string_pretty(metadata)
        .map_err(|e| SessionError::StorageError(format!("failed to serialize metadata: {}", e)))?;
    fs::write(sidecar_path(recording_path), json)
        .map_err(|e| SessionError::StorageError(format!("failed to write metadata: {}", e)))
}

pub fn read_metadata(recording_path: &Path) -> Result<RecordingMetadata, SessionError> {
    let json = fs::read_to_string(sidecar_path(recording_path))
        .map_err(|e| SessionError::StorageError(format!("failed to read metadata: {}", e)))?;
    serde_json::from_str(&json).map_err(|e| SessionError::StorageError(format!("failed to parse metadata: {}", e)))
}
