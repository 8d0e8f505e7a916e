//! Call Agent Core
//!
//! The per-call conversation session manager: maps telephony call ids to
//! ordered, turn-taking dialogues with a language model and decides what
//! the caller hears next.

pub mod error;
pub mod llm_client;
pub mod registry;
pub mod router;
pub mod session;
pub mod speech;
pub mod transcript;

pub use error::{ModelError, SessionError, StoreError};
pub use registry::{RegistryConfig, SessionRegistry, TurnReply};
pub use router::{CallEvent, CallEventRouter, Prompt, RouterConfig};
pub use session::{CallStatus, EndReason, SessionSnapshot, SessionState, Speaker, Turn};
pub use transcript::{CallRecord, InMemoryTranscriptStore, TranscriptStore};
