use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::SessionError;

/// Environment variable that overrides `backend_url`.
pub const BACKEND_URL_ENV: &str = "VOICE_BACKEND_URL";

/// Which channels the PCM encoder keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelPolicy {
    /// Read channel 0 only; output is mono.
    #[default]
    FirstChannel,
    /// Interleave every source channel.
    Preserve,
}

/// Identity and behaviour of the remote conversational agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub name: String,
    pub instructions: String,
    pub model: String,
}

/// Configuration for a voice session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Backend base URL (default: `http://127.0.0.1:8000`).
    pub backend_url: String,

    /// Path of the streaming endpoint on the backend.
    pub stream_path: String,

    /// Recorder timeslice in milliseconds (default: 250).
    pub timeslice_ms: u64,

    /// Analyser transform window size (default: 64). Power of two.
    pub analyser_window: usize,

    /// Frequency feed frames per second (default: 60).
    pub feed_fps: u32,

    /// Upper bound on any connect handshake, in milliseconds.
    pub connect_timeout_ms: u64,

    /// Model name passed to the credential endpoint.
    pub model: String,

    /// Realtime agent endpoint (WebSocket URL).
    pub agent_url: String,

    pub agent_name: String,

    pub agent_instructions: String,

    pub channel_policy: ChannelPolicy,

    /// Directory where finished recordings are written, if any.
    pub output_directory: Option<PathBuf>,
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.backend_url.starts_with("http://") || self.backend_url.starts_with("https://")) {
            return Err(format!("backend url must be http(s): {}", self.backend_url));
        }
        if !self.stream_path.starts_with('/') {
            return Err(format!("stream path must start with '/': {}", self.stream_path));
        }
        if !(100..=1000).contains(&self.timeslice_ms) {
            return Err(format!("timeslice out of range: {} ms", self.timeslice_ms));
        }
        if !self.analyser_window.is_power_of_two() || !(32..=32768).contains(&self.analyser_window) {
            return Err(format!("unsupported analyser window: {}", self.analyser_window));
        }
        if self.feed_fps == 0 || self.feed_fps > 240 {
            return Err(format!("unsupported feed rate: {} fps", self.feed_fps));
        }
        if self.connect_timeout_ms == 0 {
            return Err("connect timeout must be positive".into());
        }
        Ok(())
    }

    /// Parse a TOML document; missing keys take their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, SessionError> {
        let config: Self = toml::from_str(source)
            .map_err(|e| SessionError::ConfigurationFailed(format!("invalid config: {}", e)))?;
        config.validate().map_err(SessionError::ConfigurationFailed)?;
        Ok(config)
    }

    /// Load from a TOML file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, SessionError> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            SessionError::ConfigurationFailed(format!("failed to read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_toml_str(&source)?;
        config.apply_env();
        config.validate().map_err(SessionError::ConfigurationFailed)?;
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(BACKEND_URL_ENV) {
            if !url.is_empty() {
                self.backend_url = url;
            }
        }
    }

    pub fn timeslice(&self) -> Duration {
        Duration::from_millis(self.timeslice_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn feed_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.feed_fps.max(1) as f64)
    }

    /// WebSocket URL of the streaming endpoint, derived from the backend URL.
    pub fn stream_url(&self) -> String {
        let base = self.backend_url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        format!("{}{}", ws_base, self.stream_path)
    }

    pub fn agent_descriptor(&self) -> AgentDescriptor {
        AgentDescriptor {
            name: self.agent_name.clone(),
            instructions: self.agent_instructions.clone(),
            model: self.model.clone(),
        }
    }

    /// URL of the credential endpoint for the configured model.
    pub fn credential_url(&self) -> String {
        format!("{}/v1/agent/client_key", self.backend_url.trim_end_matches('/'))
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:8000".into(),
            stream_path: "/ws/voice-stream-to-file".into(),
            timeslice_ms: 250,
            analyser_window: 64,
            feed_fps: 60,
            connect_timeout_ms: 10_000,
            model: "gpt-4o-realtime-preview".into(),
            agent_url: "ws://127.0.0.1:8000/v1/agent/realtime".into(),
            agent_name: "Voice Assistant".into(),
            agent_instructions:
                "You are a helpful voice assistant. Respond conversationally and keep answers concise."
                    .into(),
            channel_policy: ChannelPolicy::FirstChannel,
            output_directory: None,
        }
    }
}
