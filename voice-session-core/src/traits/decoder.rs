use crate::models::error::SessionError;

/// Decoded sample frames, interleaved, normalized to `[-1.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl DecodedAudio {
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Samples of one channel.
    pub fn channel(&self, index: usize) -> impl Iterator<Item = f32> + '_ {
        let stride = self.channels.max(1) as usize;
        self.samples.iter().skip(index).step_by(stride).copied()
    }
}

/// Turns captured container bytes into sample frames.
///
/// The default implementation handles WAV (`processing::pcm_encoder::WavDecoder`);
/// hosts with other capture encodings plug in their own.
pub trait AudioDecoder: Send + Sync {
    fn decode(&self, raw: &[u8]) -> Result<DecodedAudio, SessionError>;
}
