pub mod decoder;
pub mod microphone;
pub mod observer;
pub mod playback;
pub mod realtime;
pub mod transport;
