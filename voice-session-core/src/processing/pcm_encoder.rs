use std::io::Cursor;

use hound::{SampleFormat, WavReader};

use super::wav_format::{self, WAV_HEADER_SIZE};
use crate::models::audio_models::WavAsset;
use crate::models::config::ChannelPolicy;
use crate::models::error::SessionError;
use crate::traits::decoder::{AudioDecoder, DecodedAudio};

/// Decodes WAV bytes, including the recorder's streaming float encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct WavDecoder;

impl AudioDecoder for WavDecoder {
    fn decode(&self, raw: &[u8]) -> Result<DecodedAudio, SessionError> {
        if raw.is_empty() {
            return Err(SessionError::DecodeError("empty input".into()));
        }

        let mut bytes = raw.to_vec();
        if let Ok(header) = wav_format::parse_wav_header(&bytes) {
            let riff_size = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
            if header.is_streaming() || riff_size == wav_format::STREAMING_SIZE {
                wav_format::finalize_streaming(&mut bytes)?;
            }
        }

        let reader = WavReader::new(Cursor::new(bytes))?;
        let spec = reader.spec();
        let samples = match spec.sample_format {
            SampleFormat::Float => reader.into_samples::<f32>().collect::<Result<Vec<_>, _>>()?,
            SampleFormat::Int => {
                let scale = 1.0 / (1u64 << (spec.bits_per_sample.max(1) - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 * scale))
                    .collect::<Result<Vec<_>, _>>()?
            }
        };

        Ok(DecodedAudio {
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }
}

/// Quantize one sample to signed 16-bit, saturating, truncating toward zero.
pub fn quantize(sample: f32) -> i16 {
    (sample * 32768.0).clamp(-32768.0, 32767.0) as i16
}

/// Build a canonical asset from decoded frames.
pub fn encode_frames(decoded: &DecodedAudio, policy: ChannelPolicy) -> Result<WavAsset, SessionError> {
    let frames = decoded.frame_count();
    if frames == 0 {
        return Err(SessionError::DecodeError("no sample frames".into()));
    }

    let (channels, samples): (u16, Vec<f32>) = match policy {
        ChannelPolicy::FirstChannel => (1, decoded.channel(0).collect()),
        ChannelPolicy::Preserve => (
            decoded.channels,
            decoded.samples[..frames * decoded.channels as usize].to_vec(),
        ),
    };

    let mut payload = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        payload.extend_from_slice(&quantize(sample).to_le_bytes());
    }
    WavAsset::new(decoded.sample_rate, channels, payload)
}

/// Re-encodes captured audio as canonical 16-bit PCM WAV.
pub struct PcmEncoder {
    decoder: Box<dyn AudioDecoder>,
    policy: ChannelPolicy,
}

impl std::fmt::Debug for PcmEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PcmEncoder").field("policy", &self.policy).finish()
    }
}

impl Default for PcmEncoder {
    fn default() -> Self {
        Self::new(ChannelPolicy::default())
    }
}

impl PcmEncoder {
    pub fn new(policy: ChannelPolicy) -> Self {
        Self::with_decoder(Box::new(WavDecoder), policy)
    }

    pub fn with_decoder(decoder: Box<dyn AudioDecoder>, policy: ChannelPolicy) -> Self {
        Self { decoder, policy }
    }

    pub fn policy(&self) -> ChannelPolicy {
        self.policy
    }

    /// Decode `raw` and return the canonical asset.
    ///
    /// Corrupt, empty or frameless input fails with `DecodeError`.
    pub fn encode(&self, raw: &[u8]) -> Result<WavAsset, SessionError> {
        let decoded = self.decoder.decode(raw)?;
        let asset = encode_frames(&decoded, self.policy)?;
        log::debug!(
            "encoded {} frames at {} Hz ({} ch) from {} raw bytes",
            asset.frame_count(),
            asset.sample_rate(),
            asset.channels(),
            raw.len()
        );
        Ok(asset)
    }

    /// `encode` followed by serialization to WAV bytes.
    pub fn encode_to_bytes(&self, raw: &[u8]) -> Result<Vec<u8>, SessionError> {
        let asset = self.encode(raw)?;
        let bytes = asset.to_wav_bytes();
        debug_assert_eq!(bytes.len(), WAV_HEADER_SIZE + asset.payload().len());
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::wav_format::{f32_to_le_bytes, generate_streaming_header};

    fn streaming_capture(sample_rate: u32, channels: u16, samples: &[f32]) -> Vec<u8> {
        let mut bytes = generate_streaming_header(sample_rate, channels).to_vec();
        bytes.extend_from_slice(&f32_to_le_bytes(samples));
        bytes
    }

    #[test]
    fn quantize_saturates_and_truncates() {
        assert_eq!(quantize(2.0), 32767);
        assert_eq!(quantize(-2.0), -32768);
        assert_eq!(quantize(1.0), 32767);
        assert_eq!(quantize(-1.0), -32768);
        assert_eq!(quantize(0.0), 0);
        assert_eq!(quantize(0.5), 16384);
        // -0.00002 * 32768 = -0.655 truncates to 0
        assert_eq!(quantize(-0.00002), 0);
    }

    #[test]
    fn encode_layout_matches_frame_count() {
        let raw = streaming_capture(16000, 1, &[0.0, 0.25, -0.25, 1.0, -1.0]);
        let bytes = PcmEncoder::default().encode_to_bytes(&raw).unwrap();

        assert_eq!(bytes.len(), 44 + 5 * 2);
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        assert_eq!(&bytes[36..40], b"data");
        assert_eq!(u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]), 36 + 10);
    }

    #[test]
    fn first_channel_policy_writes_mono() {
        let raw = streaming_capture(48000, 2, &[0.5, -0.5, 0.25, -0.25]);
        let asset = PcmEncoder::new(ChannelPolicy::FirstChannel).encode(&raw).unwrap();

        assert_eq!(asset.channels(), 1);
        assert_eq!(asset.frame_count(), 2);
        assert_eq!(asset.samples(), vec![16384, 8192]);
    }

    #[test]
    fn preserve_policy_keeps_interleaving() {
        let raw = streaming_capture(48000, 2, &[0.5, -0.5, 0.25, -0.25]);
        let asset = PcmEncoder::new(ChannelPolicy::Preserve).encode(&raw).unwrap();

        assert_eq!(asset.channels(), 2);
        assert_eq!(asset.frame_count(), 2);
        assert_eq!(asset.samples(), vec![16384, -16384, 8192, -8192]);
        assert_eq!(asset.payload().len(), 2 * 2 * 2);
    }

    #[test]
    fn preserve_policy_handles_thousands_of_channels() {
        let raw = streaming_capture(16000, 5000, &vec![0.5; 5000]);
        let bytes = PcmEncoder::new(ChannelPolicy::Preserve).encode_to_bytes(&raw).unwrap();

        let header = wav_format::parse_wav_header(&bytes).unwrap();
        assert_eq!(header.channels, 5000);
        assert_eq!(header.block_align, 10_000);
        assert_eq!(header.byte_rate, 160_000_000);
        assert_eq!(header.frame_count(), 1);
    }

    #[test]
    fn asset_rejects_layout_that_overflows_header() {
        let err = WavAsset::new(8000, 40_000, Vec::new()).unwrap_err();
        assert!(matches!(err, SessionError::DecodeError(_)));
    }

    #[test]
    fn decodes_integer_wav() {
        let pcm = WavAsset::new(8000, 1, [100i16, -200].iter().flat_map(|s| s.to_le_bytes()).collect()).unwrap();
        let asset = PcmEncoder::default().encode(&pcm.to_wav_bytes()).unwrap();
        assert_eq!(asset.samples(), vec![100, -200]);
        assert_eq!(asset.sample_rate(), 8000);
    }

    #[test]
    fn empty_and_corrupt_input_are_decode_errors() {
        let encoder = PcmEncoder::default();
        assert!(matches!(encoder.encode(&[]), Err(SessionError::DecodeError(_))));
        assert!(matches!(encoder.encode(b"not audio at all"), Err(SessionError::DecodeError(_))));
    }

    #[test]
    fn header_only_capture_has_no_frames() {
        let raw = streaming_capture(16000, 1, &[]);
        let err = PcmEncoder::default().encode(&raw).unwrap_err();
        assert!(matches!(err, SessionError::DecodeError(_)));
    }

    #[test]
    fn round_trip_through_parse() {
        let raw = streaming_capture(44100, 1, &[0.1; 441]);
        let asset = PcmEncoder::default().encode(&raw).unwrap();
        let parsed = WavAsset::parse(&asset.to_wav_bytes()).unwrap();

        assert_eq!(parsed.sample_rate(), 44100);
        assert_eq!(parsed.channels(), 1);
        assert_eq!(parsed.frame_count(), 441);
        assert_eq!(parsed.bit_depth(), 16);
        assert_eq!(parsed, asset);
    }
}
