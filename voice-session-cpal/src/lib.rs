//! # voice-session-cpal
//!
//! Desktop audio backend for voice-session-core, built on cpal.
//!
//! Provides:
//! - `CpalMicrophone`: microphone capture on a dedicated thread
//! - `CpalSpeaker`: reply playback on the default output device
//! - `devices`: input/output device enumeration
//!
//! ## Usage
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use voice_session_core::{DeviceAudioSource, Recorder, VoiceWidget};
//! use voice_session_cpal::{CpalMicrophone, CpalSpeaker};
//!
//! let device = Arc::new(DeviceAudioSource::new(CpalMicrophone::default_device()));
//! let recorder = Recorder::new(Arc::clone(&device), Duration::from_millis(250), None);
//! let widget = VoiceWidget::new(device, recorder).with_sink(Arc::new(CpalSpeaker::new()));
//! ```

pub mod devices;
pub mod microphone;
pub mod speaker;

pub use microphone::CpalMicrophone;
pub use speaker::CpalSpeaker;
