use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::error::SessionError;
use crate::processing::wav_format::{self, WAV_HEADER_SIZE};

/// An audio input device available for capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSource {
    pub id: String,
    pub name: String,
    pub is_default: bool,
}

/// Format of a live microphone stream as delivered by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl StreamFormat {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }
}

/// One timesliced fragment of captured audio in the recorder's native encoding.
///
/// Cloning is cheap; the bytes are shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureChunk {
    pub seq: u64,
    pub bytes: Arc<[u8]>,
}

impl CaptureChunk {
    pub fn new(seq: u64, bytes: Vec<u8>) -> Self {
        Self {
            seq,
            bytes: bytes.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Concatenate chunks in sequence order.
pub fn concat_chunks(chunks: &[CaptureChunk]) -> Vec<u8> {
    let total = chunks.iter().map(CaptureChunk::len).sum();
    let mut out = Vec::with_capacity(total);
    for chunk in chunks {
        out.extend_from_slice(&chunk.bytes);
    }
    out
}

/// Canonical 16-bit PCM audio.
///
/// Invariant: `payload.len() == frame_count * channels * 2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavAsset {
    sample_rate: u32,
    channels: u16,
    payload: Vec<u8>,
}

impl WavAsset {
    pub const BIT_DEPTH: u16 = 16;

    pub fn new(sample_rate: u32, channels: u16, payload: Vec<u8>) -> Result<Self, SessionError> {
        if channels == 0 {
            return Err(SessionError::DecodeError("zero channels".into()));
        }
        if sample_rate == 0 {
            return Err(SessionError::DecodeError("zero sample rate".into()));
        }
        wav_format::frame_layout(sample_rate, Self::BIT_DEPTH, channels)?;
        if payload.len() > (u32::MAX - 36) as usize {
            return Err(SessionError::DecodeError(format!(
                "payload of {} bytes is too large for a WAV file",
                payload.len()
            )));
        }
        let block_align = channels as usize * 2;
        if payload.len() % block_align != 0 {
            return Err(SessionError::DecodeError(format!(
                "payload of {} bytes is not a whole number of {}-byte frames",
                payload.len(),
                block_align
            )));
        }
        Ok(Self {
            sample_rate,
            channels,
            payload,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn bit_depth(&self) -> u16 {
        Self::BIT_DEPTH
    }

    pub fn frame_count(&self) -> usize {
        self.payload.len() / (self.channels as usize * 2)
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn duration_secs(&self) -> f64 {
        self.frame_count() as f64 / self.sample_rate as f64
    }

    /// Interleaved samples decoded from the payload.
    pub fn samples(&self) -> Vec<i16> {
        self.payload
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }

    /// Serialize as a 44-byte header followed by the payload.
    pub fn to_wav_bytes(&self) -> Vec<u8> {
        let header = wav_format::generate_wav_header(
            self.sample_rate,
            Self::BIT_DEPTH,
            self.channels,
            self.payload.len() as u32,
        );
        let mut out = Vec::with_capacity(WAV_HEADER_SIZE + self.payload.len());
        out.extend_from_slice(&header);
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parse canonical WAV bytes back into an asset.
    pub fn parse(bytes: &[u8]) -> Result<Self, SessionError> {
        let header = wav_format::parse_wav_header(bytes)?;
        if header.format != wav_format::FORMAT_PCM || header.bit_depth != Self::BIT_DEPTH {
            return Err(SessionError::DecodeError(format!(
                "not 16-bit PCM (format {}, {} bits)",
                header.format, header.bit_depth
            )));
        }
        let end = WAV_HEADER_SIZE + header.data_size as usize;
        let payload = bytes
            .get(WAV_HEADER_SIZE..end)
            .ok_or_else(|| SessionError::DecodeError("truncated data chunk".into()))?;
        Self::new(header.sample_rate, header.channels, payload.to_vec())
    }
}

/// Counters kept by the recorder for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecorderDiagnostics {
    pub callback_count: u64,
    pub samples_total: u64,
    pub chunks_emitted: u64,
    pub bytes_emitted: u64,
    pub sends_delivered: u64,
    pub sends_skipped: u64,
    pub sends_failed: u64,
}
