use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::SessionError;

/// Recorder state machine.
///
/// State transitions:
/// ```text
/// idle → recording → stopping → idle
///   ↘        ↓          ↓
///           failed (reset → idle)
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum RecorderState {
    Idle,
    Recording,
    Stopping,
    Failed(SessionError),
}

impl RecorderState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_recording(&self) -> bool {
        matches!(self, Self::Recording)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for RecorderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Recording => write!(f, "recording"),
            Self::Stopping => write!(f, "stopping"),
            Self::Failed(_) => write!(f, "failed"),
        }
    }
}

/// Connection status of a transport binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl ConnectionStatus {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Conversational-agent session state.
///
/// State transitions:
/// ```text
/// uninitialized → initialized → connecting → connected → disconnected
///                      ↑             ↓                        │
///                      └──── disconnected ←───────────────────┘ (reconnect)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Uninitialized,
    Initialized,
    Connecting,
    Connected,
    Disconnected,
}

impl AgentState {
    /// Total transition table for the agent session.
    pub fn can_transition_to(self, next: AgentState) -> bool {
        use AgentState::*;
        matches!(
            (self, next),
            (Uninitialized, Initialized)
                | (Initialized, Connecting)
                | (Initialized, Disconnected)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
                | (Disconnected, Connecting)
                | (Disconnected, Initialized)
        )
    }

    /// Whether a session object exists.
    pub fn is_initialized(self) -> bool {
        !matches!(self, Self::Uninitialized)
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Initialized => write!(f, "initialized"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// What the widget is doing, as seen by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoicePhase {
    Ready,
    Recording,
    Processing,
    Playing,
    Error,
}

impl fmt::Display for VoicePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "ready"),
            Self::Recording => write!(f, "recording"),
            Self::Processing => write!(f, "processing"),
            Self::Playing => write!(f, "playing"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseEvent {
    StartRecording,
    StopRecording,
    Encoded,
    EncodeFailed,
    ReplyStarted,
    PlaybackFinished,
    Fault(String),
    Reset,
}

impl fmt::Display for PhaseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartRecording => write!(f, "start recording"),
            Self::StopRecording => write!(f, "stop recording"),
            Self::Encoded => write!(f, "encoded"),
            Self::EncodeFailed => write!(f, "encode failed"),
            Self::ReplyStarted => write!(f, "reply started"),
            Self::PlaybackFinished => write!(f, "playback finished"),
            Self::Fault(reason) => write!(f, "fault ({reason})"),
            Self::Reset => write!(f, "reset"),
        }
    }
}

impl VoicePhase {
    /// Apply an event, rejecting transitions the table does not list.
    pub fn next(self, event: &PhaseEvent) -> Result<VoicePhase, SessionError> {
        use PhaseEvent as E;
        use VoicePhase::*;
        let next = match (self, event) {
            (Ready, E::StartRecording) => Recording,
            (Recording, E::StopRecording) => Processing,
            (Processing, E::Encoded) | (Processing, E::EncodeFailed) => Ready,
            (Ready, E::ReplyStarted) => Playing,
            (Playing, E::PlaybackFinished) => Ready,
            (_, E::Fault(_)) => Error,
            (_, E::Reset) => Ready,
            (current, event) => return Err(SessionError::invalid_transition(current, event)),
        };
        Ok(next)
    }
}

/// Explicit phase machine for the widget.
#[derive(Debug, Clone)]
pub struct PhaseMachine {
    phase: VoicePhase,
    last_fault: Option<String>,
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseMachine {
    pub fn new() -> Self {
        Self {
            phase: VoicePhase::Ready,
            last_fault: None,
        }
    }

    pub fn phase(&self) -> VoicePhase {
        self.phase
    }

    pub fn last_fault(&self) -> Option<&str> {
        self.last_fault.as_deref()
    }

    pub fn handle(&mut self, event: PhaseEvent) -> Result<VoicePhase, SessionError> {
        let next = self.phase.next(&event)?;
        match event {
            PhaseEvent::Fault(reason) => self.last_fault = Some(reason),
            PhaseEvent::Reset => self.last_fault = None,
            _ => {}
        }
        log::debug!("phase {} -> {}", self.phase, next);
        self.phase = next;
        Ok(next)
    }
}
