/// Linear-interpolation resampling of interleaved audio.
///
/// Returns the input unchanged when the rates match.
pub fn resample_interleaved(samples: &[f32], channels: usize, source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate || samples.is_empty() || channels == 0 || source_rate == 0 {
        return samples.to_vec();
    }

    let frame_count = samples.len() / channels;
    let ratio = target_rate as f64 / source_rate as f64;
    let output_frames = (frame_count as f64 * ratio) as usize;
    if output_frames == 0 {
        return Vec::new();
    }

    let mut output = vec![0.0f32; output_frames * channels];
    for i in 0..output_frames {
        let source_index = i as f64 / ratio;
        let index = source_index as usize;
        let fraction = (source_index - index as f64) as f32;

        for ch in 0..channels {
            output[i * channels + ch] = if index + 1 < frame_count {
                samples[index * channels + ch] * (1.0 - fraction) + samples[(index + 1) * channels + ch] * fraction
            } else {
                samples[index.min(frame_count - 1) * channels + ch]
            };
        }
    }
    output
}

/// Map `channels` interleaved input onto `target_channels` output.
///
/// Mono fans out to every output channel; anything else keeps the first
/// `target_channels` channels, repeating the last one when short.
pub fn remap_channels(samples: &[f32], channels: usize, target_channels: usize) -> Vec<f32> {
    if channels == target_channels || channels == 0 || target_channels == 0 {
        return samples.to_vec();
    }
    let mut output = Vec::with_capacity(samples.len() / channels * target_channels);
    for frame in samples.chunks_exact(channels) {
        for ch in 0..target_channels {
            output.push(frame[ch.min(channels - 1)]);
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn same_rate_is_passthrough() {
        let samples = vec![1.0, 2.0, 3.0];
        assert_eq!(resample_interleaved(&samples, 1, 48000, 48000), samples);
    }

    #[test]
    fn upsample_2x_interpolates() {
        let result = resample_interleaved(&[0.0, 1.0], 1, 24000, 48000);
        assert_eq!(result.len(), 4);
        assert_abs_diff_eq!(result[0], 0.0);
        assert_abs_diff_eq!(result[1], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(result[2], 1.0);
    }

    #[test]
    fn downsample_halves_length() {
        let samples: Vec<f32> = (0..100).map(|i| i as f32 / 100.0).collect();
        assert_eq!(resample_interleaved(&samples, 1, 48000, 24000).len(), 50);
    }

    #[test]
    fn stereo_channels_stay_separate() {
        let samples = [0.0, 10.0, 1.0, 20.0];
        let result = resample_interleaved(&samples, 2, 24000, 48000);
        assert_eq!(result.len(), 8);
        assert_abs_diff_eq!(result[2], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(result[3], 15.0, epsilon = 1e-5);
    }

    #[test]
    fn mono_fans_out() {
        assert_eq!(remap_channels(&[0.1, 0.2], 1, 2), vec![0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn stereo_to_mono_keeps_left() {
        assert_eq!(remap_channels(&[0.1, 0.9, 0.2, 0.8], 2, 1), vec![0.1, 0.2]);
    }
}
