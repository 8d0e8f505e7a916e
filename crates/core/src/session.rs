//! Call Session Data Model
//!
//! Types describing a single phone call's conversational state: who said
//! what, where the call sits in its lifecycle, and why it ended.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

/// Who produced a turn in the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Speaker {
    User,
    Agent,
    System,
}

impl Speaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::User => "user",
            Speaker::Agent => "agent",
            Speaker::System => "system",
        }
    }
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Speaker {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Speaker::User),
            "agent" => Ok(Speaker::Agent),
            "system" => Ok(Speaker::System),
            other => Err(format!("unknown speaker '{}'", other)),
        }
    }
}

/// One utterance appended to a call's history. Never mutated after append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn new(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            speaker,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Speaker::User, text)
    }

    pub fn agent(text: impl Into<String>) -> Self {
        Self::new(Speaker::Agent, text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Speaker::System, text)
    }
}

/// Lifecycle state of a live session.
///
/// `AwaitingInput`, `Processing` and `Speaking` form the turn loop;
/// `Ended` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Created,
    AwaitingInput,
    Processing,
    Speaking,
    Ended,
    Error,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Ended | SessionState::Error)
    }
}

/// Durable status of a call record in the transcript store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallStatus {
    Initiated,
    Active,
    Ended,
    Error,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Initiated => "initiated",
            CallStatus::Active => "active",
            CallStatus::Ended => "ended",
            CallStatus::Error => "error",
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initiated" => Ok(CallStatus::Initiated),
            "active" => Ok(CallStatus::Active),
            "ended" => Ok(CallStatus::Ended),
            "error" => Ok(CallStatus::Error),
            other => Err(format!("unknown call status '{}'", other)),
        }
    }
}

/// Why a session was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The caller or the provider hung up.
    Hangup,
    /// An explicit end request from the operator or client.
    UserEnded,
    /// Repeated silence timeouts.
    NoInput,
    /// Reaped after sitting idle.
    Timeout,
    /// The call never connected (busy, no answer, canceled).
    Unanswered,
    /// The provider reported the call failed.
    Failed,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::Hangup => "hangup",
            EndReason::UserEnded => "user_ended",
            EndReason::NoInput => "no_input",
            EndReason::Timeout => "timeout",
            EndReason::Unanswered => "unanswered",
            EndReason::Failed => "failed",
        }
    }

    /// The terminal session state this reason leads to.
    pub fn terminal_state(&self) -> SessionState {
        match self {
            EndReason::Failed => SessionState::Error,
            _ => SessionState::Ended,
        }
    }

    /// The durable call status this reason leads to.
    pub fn final_status(&self) -> CallStatus {
        match self {
            EndReason::Failed => CallStatus::Error,
            _ => CallStatus::Ended,
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EndReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hangup" => Ok(EndReason::Hangup),
            "user_ended" => Ok(EndReason::UserEnded),
            "no_input" => Ok(EndReason::NoInput),
            "timeout" => Ok(EndReason::Timeout),
            "unanswered" => Ok(EndReason::Unanswered),
            "failed" => Ok(EndReason::Failed),
            other => Err(format!("unknown end reason '{}'", other)),
        }
    }
}

/// The live, in-memory state of one call. Owned exclusively by the registry.
#[derive(Debug, Clone)]
pub struct CallSession {
    pub call_id: String,
    pub phone_number: Option<String>,
    pub state: SessionState,
    /// Completed agent replies; also the index handed to speech synthesis.
    pub turn_counter: u64,
    pub consecutive_silences: u32,
    pub history: Vec<Turn>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    /// Monotonic twin of `last_activity_at`, used for idle reaping.
    pub(crate) last_activity: Instant,
}

impl CallSession {
    pub fn new(call_id: impl Into<String>, phone_number: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            call_id: call_id.into(),
            phone_number,
            state: SessionState::Created,
            turn_counter: 0,
            consecutive_silences: 0,
            history: Vec::new(),
            created_at: now,
            last_activity_at: now,
            last_activity: Instant::now(),
        }
    }

    pub(crate) fn touch(&mut self) {
        self.last_activity_at = Utc::now();
        self.last_activity = Instant::now();
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            call_id: self.call_id.clone(),
            phone_number: self.phone_number.clone(),
            state: self.state,
            turn_counter: self.turn_counter,
            history: self.history.clone(),
            created_at: self.created_at,
            last_activity_at: self.last_activity_at,
        }
    }
}

/// A point-in-time copy of a session, safe to hand outside the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub call_id: String,
    pub phone_number: Option<String>,
    pub state: SessionState,
    pub turn_counter: u64,
    pub history: Vec<Turn>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}
