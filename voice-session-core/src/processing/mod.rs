pub mod analyser;
pub mod pcm_encoder;
pub mod resample;
pub mod ring_buffer;
pub mod wav_format;
