//! WAV container helpers.
//!
//! Two header flavours are produced here: the canonical 44-byte PCM header
//! written around every `WavAsset`, and the streaming IEEE-float header that
//! opens the recorder's first chunk before the final sizes are known.

use crate::models::error::SessionError;

/// Size of the standard WAV RIFF header in bytes.
pub const WAV_HEADER_SIZE: usize = 44;

pub const FORMAT_PCM: u16 = 1;
pub const FORMAT_IEEE_FLOAT: u16 = 3;

/// Size placeholder used while the stream length is unknown.
pub const STREAMING_SIZE: u32 = u32::MAX;

/// Generate a 44-byte canonical PCM header.
///
/// Layout:
/// ```text
/// [0-3]    "RIFF"
/// [4-7]    36 + data_size
/// [8-11]   "WAVE"
/// [12-15]  "fmt "
/// [16-19]  16
/// [20-21]  format code
/// [22-23]  channels
/// [24-27]  sample_rate
/// [28-31]  byte_rate = sample_rate * channels * bit_depth / 8
/// [32-33]  block_align = channels * bit_depth / 8
/// [34-35]  bit_depth
/// [36-39]  "data"
/// [40-43]  data_size
/// ```
pub fn generate_wav_header(sample_rate: u32, bit_depth: u16, channels: u16, data_size: u32) -> [u8; WAV_HEADER_SIZE] {
    build_header(FORMAT_PCM, sample_rate, bit_depth, channels, data_size)
}

/// Header for the recorder's native encoding: 32-bit float with unknown length.
pub fn generate_streaming_header(sample_rate: u32, channels: u16) -> [u8; WAV_HEADER_SIZE] {
    // 36 + placeholder saturates, so both size fields carry the placeholder.
    build_header(FORMAT_IEEE_FLOAT, sample_rate, 32, channels, STREAMING_SIZE)
}

/// Byte rate and block align for a layout, or `DecodeError` when either
/// overflows its header field.
pub fn frame_layout(sample_rate: u32, bit_depth: u16, channels: u16) -> Result<(u32, u16), SessionError> {
    let block_align = channels as u64 * bit_depth as u64 / 8;
    let byte_rate = sample_rate as u64 * block_align;
    let block_align = u16::try_from(block_align).map_err(|_| {
        SessionError::DecodeError(format!(
            "{} channels of {} bits do not fit a WAV block align",
            channels, bit_depth
        ))
    })?;
    let byte_rate = u32::try_from(byte_rate).map_err(|_| {
        SessionError::DecodeError(format!(
            "{} Hz x {} channels of {} bits do not fit a WAV byte rate",
            sample_rate, channels, bit_depth
        ))
    })?;
    Ok((byte_rate, block_align))
}

/// Layouts that overflow a field are written saturated; reject them up front
/// with `frame_layout`.
fn build_header(format: u16, sample_rate: u32, bit_depth: u16, channels: u16, data_size: u32) -> [u8; WAV_HEADER_SIZE] {
    let block_align = channels as u64 * bit_depth as u64 / 8;
    let byte_rate = (sample_rate as u64 * block_align).min(u32::MAX as u64) as u32;
    let block_align = block_align.min(u16::MAX as u64) as u16;
    let chunk_size = data_size.saturating_add(36);

    let mut header = [0u8; WAV_HEADER_SIZE];

    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&chunk_size.to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");

    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&format.to_le_bytes());
    header[22..24].copy_from_slice(&channels.to_le_bytes());
    header[24..28].copy_from_slice(&sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    header[32..34].copy_from_slice(&block_align.to_le_bytes());
    header[34..36].copy_from_slice(&bit_depth.to_le_bytes());

    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_size.to_le_bytes());

    header
}

/// Patch the file-size field at offset 4 (RIFF chunk size = file_size - 8).
pub fn patch_file_size(header: &mut [u8], total_file_size: u64) {
    let chunk_size = total_file_size.saturating_sub(8).min(u32::MAX as u64) as u32;
    header[4..8].copy_from_slice(&chunk_size.to_le_bytes());
}

/// Patch the data-size field at offset 40.
pub fn patch_data_size(header: &mut [u8], data_size: u64) {
    let data_size_u32 = data_size.min(u32::MAX as u64) as u32;
    header[40..44].copy_from_slice(&data_size_u32.to_le_bytes());
}

/// Replace streaming placeholders with the real sizes of `bytes`.
///
/// Trailing bytes that do not form a whole frame are excluded from the data size.
pub fn finalize_streaming(bytes: &mut [u8]) -> Result<(), SessionError> {
    let header = parse_wav_header(bytes)?;
    let available = (bytes.len() - WAV_HEADER_SIZE) as u64;
    let block_align = header.block_align.max(1) as u64;
    let data_size = available - available % block_align;
    patch_data_size(bytes, data_size);
    patch_file_size(bytes, data_size + WAV_HEADER_SIZE as u64);
    Ok(())
}

/// Fields of a canonical 44-byte header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeader {
    pub format: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bit_depth: u16,
    pub data_size: u32,
}

impl WavHeader {
    pub fn is_streaming(&self) -> bool {
        self.data_size == STREAMING_SIZE
    }

    /// Frames described by `data_size`.
    pub fn frame_count(&self) -> u64 {
        if self.block_align == 0 {
            return 0;
        }
        self.data_size as u64 / self.block_align as u64
    }
}

/// Read back a header laid out as `generate_wav_header` writes it.
pub fn parse_wav_header(bytes: &[u8]) -> Result<WavHeader, SessionError> {
    if bytes.len() < WAV_HEADER_SIZE {
        return Err(SessionError::DecodeError(format!(
            "need {} header bytes, got {}",
            WAV_HEADER_SIZE,
            bytes.len()
        )));
    }
    if &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(SessionError::DecodeError("missing RIFF/WAVE tags".into()));
    }
    if &bytes[12..16] != b"fmt " || &bytes[36..40] != b"data" {
        return Err(SessionError::DecodeError("non-canonical chunk layout".into()));
    }

    let u16_at = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]);
    let u32_at = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);

    Ok(WavHeader {
        format: u16_at(20),
        channels: u16_at(22),
        sample_rate: u32_at(24),
        byte_rate: u32_at(28),
        block_align: u16_at(32),
        bit_depth: u16_at(34),
        data_size: u32_at(40),
    })
}

/// Downmix interleaved multi-channel audio to mono by averaging channels per frame.
pub fn downmix_to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let scale = 1.0 / channels as f32;
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() * scale)
        .collect()
}

/// Interleaved `f32` samples as little-endian bytes.
pub fn f32_to_le_bytes(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 4);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_tags_and_size() {
        let header = generate_wav_header(48000, 16, 2, 0);
        assert_eq!(header.len(), 44);
        assert_eq!(&header[0..4], b"RIFF");
        assert_eq!(&header[8..12], b"WAVE");
        assert_eq!(&header[12..16], b"fmt ");
        assert_eq!(&header[36..40], b"data");
    }

    #[test]
    fn header_48khz_stereo_16bit() {
        let header = generate_wav_header(48000, 16, 2, 9600);

        assert_eq!(u16::from_le_bytes([header[20], header[21]]), 1);
        assert_eq!(u32::from_le_bytes([header[16], header[17], header[18], header[19]]), 16);
        assert_eq!(u16::from_le_bytes([header[22], header[23]]), 2);
        assert_eq!(u32::from_le_bytes([header[24], header[25], header[26], header[27]]), 48000);
        assert_eq!(u32::from_le_bytes([header[28], header[29], header[30], header[31]]), 192000);
        assert_eq!(u16::from_le_bytes([header[32], header[33]]), 4);
        assert_eq!(u16::from_le_bytes([header[34], header[35]]), 16);
        assert_eq!(u32::from_le_bytes([header[40], header[41], header[42], header[43]]), 9600);
        assert_eq!(u32::from_le_bytes([header[4], header[5], header[6], header[7]]), 36 + 9600);
    }

    #[test]
    fn parse_reads_back_generated_header() {
        let header = generate_wav_header(22050, 16, 1, 400);
        let parsed = parse_wav_header(&header).unwrap();
        assert_eq!(parsed.format, FORMAT_PCM);
        assert_eq!(parsed.sample_rate, 22050);
        assert_eq!(parsed.channels, 1);
        assert_eq!(parsed.bit_depth, 16);
        assert_eq!(parsed.frame_count(), 200);
        assert!(!parsed.is_streaming());
    }

    #[test]
    fn streaming_header_is_float_with_placeholders() {
        let header = generate_streaming_header(48000, 2);
        let parsed = parse_wav_header(&header).unwrap();
        assert_eq!(parsed.format, FORMAT_IEEE_FLOAT);
        assert_eq!(parsed.bit_depth, 32);
        assert_eq!(parsed.block_align, 8);
        assert!(parsed.is_streaming());
        assert_eq!(&header[4..8], &[0xFF; 4]);
    }

    #[test]
    fn finalize_patches_to_whole_frames() {
        let mut bytes = generate_streaming_header(16000, 1).to_vec();
        bytes.extend_from_slice(&f32_to_le_bytes(&[0.1, 0.2, 0.3]));
        bytes.push(0); // partial frame
        finalize_streaming(&mut bytes).unwrap();

        let parsed = parse_wav_header(&bytes).unwrap();
        assert_eq!(parsed.data_size, 12);
        assert_eq!(u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]), 48);
    }

    #[test]
    fn parse_rejects_short_or_foreign_input() {
        assert!(parse_wav_header(&[0u8; 10]).is_err());
        let mut header = generate_wav_header(8000, 16, 1, 0);
        header[0..4].copy_from_slice(b"RIFX");
        assert!(parse_wav_header(&header).is_err());
    }

    #[test]
    fn patch_sizes() {
        let mut header = generate_wav_header(48000, 16, 2, 0);

        patch_data_size(&mut header, 19200);
        assert_eq!(u32::from_le_bytes([header[40], header[41], header[42], header[43]]), 19200);

        patch_file_size(&mut header, 19200 + 44);
        assert_eq!(u32::from_le_bytes([header[4], header[5], header[6], header[7]]), 19200 + 36);
    }

    #[test]
    fn wide_layouts_compute_without_overflow() {
        assert_eq!(frame_layout(16000, 16, 5000).unwrap(), (160_000_000, 10_000));

        let header = generate_wav_header(16000, 16, 5000, 10_000);
        assert_eq!(parse_wav_header(&header).unwrap().block_align, 10_000);
    }

    #[test]
    fn layouts_past_the_header_fields_are_rejected() {
        assert!(matches!(frame_layout(8000, 16, 40_000), Err(SessionError::DecodeError(_))));
        assert!(matches!(frame_layout(192_000, 32, 6000), Err(SessionError::DecodeError(_))));
    }

    #[test]
    fn downmix_stereo_to_mono() {
        let mono = downmix_to_mono(&[0.2, 0.8, 0.4, 0.6], 2);
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.5).abs() < 1e-6);
        assert!((mono[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn downmix_mono_passthrough() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(downmix_to_mono(&samples, 1), samples);
    }
}
