//! Session Registry
//!
//! Maps call ids to live conversation sessions and runs their turns. At most
//! one turn is in flight per call: `process_turn` test-and-sets
//! `AwaitingInput -> Processing` under the session's lock and rejects any
//! other attempt instead of queuing it. The lock is never held across the
//! model call, so calls proceed independently of each other.
//!
//! Transcript writes for one call are serialized by a second per-session
//! lock (the journal), acquired while the state lock is still held, so the
//! store receives turns in the same order they were appended in memory.
//! Store failures are logged and never interrupt the live conversation.

use crate::error::{ModelError, SessionError, StoreError};
use crate::llm_client::ModelClient;
use crate::session::{CallSession, CallStatus, EndReason, SessionSnapshot, SessionState, Turn};
use crate::transcript::TranscriptStore;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, info, instrument, warn};

pub const DEFAULT_FALLBACK_MESSAGE: &str = "I encountered an error, please try again.";

/// Tunables for the registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Spoken in place of a reply when the model call fails.
    pub fallback_message: String,
    /// Upper bound on a single model call; expiry counts as a provider error.
    pub model_timeout: Duration,
    /// How long an ended call id stays blocked from re-registration.
    pub retired_retention: Duration,
    /// End successful turns in `Speaking` until `finish_speaking` is called.
    pub pipeline_speech: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            fallback_message: DEFAULT_FALLBACK_MESSAGE.to_string(),
            model_timeout: Duration::from_secs(10),
            retired_retention: Duration::from_secs(24 * 60 * 60),
            pipeline_speech: false,
        }
    }
}

/// The outcome of an accepted turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReply {
    /// The agent reply, or the fallback message if the model failed.
    pub text: String,
    /// The session's `turn_counter` after this reply; `None` for a fallback.
    pub turn_index: Option<u64>,
}

impl TurnReply {
    pub fn is_fallback(&self) -> bool {
        self.turn_index.is_none()
    }
}

struct SessionHandle {
    session: Mutex<CallSession>,
    journal: Mutex<()>,
}

impl SessionHandle {
    fn new(session: CallSession) -> Self {
        Self {
            session: Mutex::new(session),
            journal: Mutex::new(()),
        }
    }
}

#[derive(Default)]
struct Sessions {
    live: HashMap<String, Arc<SessionHandle>>,
    /// Ended call ids and when they ended.
    retired: HashMap<String, Instant>,
}

/// Owns every live call session.
pub struct SessionRegistry {
    sessions: RwLock<Sessions>,
    store: Arc<dyn TranscriptStore>,
    model: Arc<dyn ModelClient>,
    config: Arc<RegistryConfig>,
}

impl SessionRegistry {
    pub fn new(
        store: Arc<dyn TranscriptStore>,
        model: Arc<dyn ModelClient>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            sessions: RwLock::new(Sessions::default()),
            store,
            model,
            config: Arc::new(config),
        }
    }

    pub fn store(&self) -> &Arc<dyn TranscriptStore> {
        &self.store
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Registers a call, or returns the existing session if it is already live.
    ///
    /// Fails with `CallEnded` if the call id belongs to a call that has ended.
    #[instrument(skip(self))]
    pub async fn create(
        &self,
        call_id: &str,
        phone_number: Option<String>,
    ) -> Result<SessionSnapshot, SessionError> {
        let fresh = Arc::new(SessionHandle::new(CallSession::new(
            call_id,
            phone_number.clone(),
        )));
        let mut session = fresh.session.lock().await;
        let journal = fresh.journal.lock().await;

        {
            let mut sessions = self.sessions.write().await;
            if let Some(existing) = sessions.live.get(call_id).cloned() {
                drop(sessions);
                debug!("Session already registered; returning existing session");
                return Ok(existing.session.lock().await.snapshot());
            }
            if sessions.retired.contains_key(call_id) {
                warn!("Refusing to re-register an ended call");
                return Err(SessionError::CallEnded(call_id.to_string()));
            }
            sessions.live.insert(call_id.to_string(), fresh.clone());
        }

        session.state = SessionState::AwaitingInput;
        let snapshot = session.snapshot();
        drop(session);

        log_store_result(
            call_id,
            "create_record",
            self.store
                .create_record(call_id, phone_number, CallStatus::Initiated)
                .await,
        );
        log_store_result(
            call_id,
            "set_status",
            self.store
                .set_status(call_id, CallStatus::Active, None, None)
                .await,
        );
        drop(journal);

        info!("Session created");
        Ok(snapshot)
    }

    /// Runs one conversational turn: logs the user's words, asks the model
    /// for a reply, logs the reply and returns it.
    ///
    /// A model failure is not an error here: the session survives, no agent
    /// turn is logged, and the configured fallback message is returned.
    ///
    /// The turn runs on its own task, so it completes and leaves `Processing`
    /// even if the caller stops waiting for it.
    #[instrument(skip(self, user_text))]
    pub async fn process_turn(
        &self,
        call_id: &str,
        user_text: &str,
    ) -> Result<TurnReply, SessionError> {
        let handle = self.lookup(call_id).await?;
        let turn = run_turn(
            handle,
            self.store.clone(),
            self.model.clone(),
            self.config.clone(),
            call_id.to_string(),
            user_text.to_string(),
        );

        match tokio::spawn(turn.in_current_span()).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(SessionError::CallEnded(call_id.to_string())),
        }
    }

    /// Returns a `Speaking` session to `AwaitingInput`.
    #[instrument(skip(self))]
    pub async fn finish_speaking(&self, call_id: &str) -> Result<(), SessionError> {
        let handle = self.lookup(call_id).await?;
        let mut session = handle.session.lock().await;
        match session.state {
            SessionState::Speaking => {
                session.state = SessionState::AwaitingInput;
                session.touch();
                Ok(())
            }
            SessionState::AwaitingInput => Ok(()),
            SessionState::Ended | SessionState::Error => {
                Err(SessionError::NotFound(call_id.to_string()))
            }
            SessionState::Created | SessionState::Processing => {
                Err(SessionError::ConcurrentTurnRejected(call_id.to_string()))
            }
        }
    }

    /// Counts a silence timeout and returns the number of consecutive ones.
    #[instrument(skip(self))]
    pub async fn record_silence(&self, call_id: &str) -> Result<u32, SessionError> {
        let handle = self.lookup(call_id).await?;
        let mut session = handle.session.lock().await;
        if session.state.is_terminal() {
            return Err(SessionError::NotFound(call_id.to_string()));
        }
        session.consecutive_silences += 1;
        session.touch();
        Ok(session.consecutive_silences)
    }

    /// Marks caller activity that is not a turn (e.g. a key press).
    #[instrument(skip(self))]
    pub async fn touch(&self, call_id: &str) -> Result<(), SessionError> {
        let handle = self.lookup(call_id).await?;
        let mut session = handle.session.lock().await;
        if session.state.is_terminal() {
            return Err(SessionError::NotFound(call_id.to_string()));
        }
        session.consecutive_silences = 0;
        session.touch();
        Ok(())
    }

    /// Ends a call. Returns `false` (and does nothing) if no live session exists.
    #[instrument(skip(self))]
    pub async fn end(&self, call_id: &str, reason: EndReason) -> bool {
        let handle = {
            let mut sessions = self.sessions.write().await;
            let Some(handle) = sessions.live.remove(call_id) else {
                info!("No live session to end; ignoring");
                return false;
            };
            sessions.retired.insert(call_id.to_string(), Instant::now());
            handle
        };

        let system_turn = {
            let mut session = handle.session.lock().await;
            mark_ended(&mut session, reason)
        };
        self.persist_end(call_id, &handle, system_turn, reason).await;
        info!(%reason, "Session ended");
        true
    }

    /// Ends every session idle for at least `idle_threshold` with reason
    /// `Timeout`, skipping any session with a turn in progress. Also forgets
    /// retired call ids older than the configured retention.
    ///
    /// Candidates are collected under the read lock; the write lock is only
    /// taken per removal.
    ///
    /// Returns the call ids that were reaped.
    pub async fn reap(&self, idle_threshold: Duration) -> Vec<String> {
        let now = Instant::now();
        self.prune_retired(now).await;

        let candidates: Vec<(String, Arc<SessionHandle>)> = self
            .sessions
            .read()
            .await
            .live
            .iter()
            .map(|(call_id, handle)| (call_id.clone(), handle.clone()))
            .collect();

        let mut reaped = Vec::new();
        for (call_id, handle) in candidates {
            // A held lock means an operation is underway; the call is not idle.
            let Ok(mut session) = handle.session.try_lock() else {
                continue;
            };
            if session.state == SessionState::Processing
                || session.state.is_terminal()
                || now.duration_since(session.last_activity) < idle_threshold
            {
                continue;
            }

            // Whoever removes the session from the map is the one that ends it.
            {
                let mut sessions = self.sessions.write().await;
                match sessions.live.get(&call_id) {
                    Some(current) if Arc::ptr_eq(current, &handle) => {
                        sessions.live.remove(&call_id);
                        sessions.retired.insert(call_id.clone(), now);
                    }
                    _ => continue,
                }
            }

            let system_turn = mark_ended(&mut session, EndReason::Timeout);
            drop(session);
            self.persist_end(&call_id, &handle, system_turn, EndReason::Timeout)
                .await;
            info!(call_id = %call_id, "Reaped idle session");
            reaped.push(call_id);
        }
        reaped
    }

    async fn prune_retired(&self, now: Instant) {
        let retention = self.config.retired_retention;
        let stale: Vec<String> = self
            .sessions
            .read()
            .await
            .retired
            .iter()
            .filter(|(_, retired_at)| now.duration_since(**retired_at) >= retention)
            .map(|(call_id, _)| call_id.clone())
            .collect();
        if stale.is_empty() {
            return;
        }

        let mut sessions = self.sessions.write().await;
        for call_id in stale {
            sessions.retired.remove(&call_id);
        }
    }

    /// Runs `reap` every `every` until the returned task is aborted.
    pub fn spawn_reaper(self: Arc<Self>, every: Duration, idle_threshold: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let reaped = self.reap(idle_threshold).await;
                if !reaped.is_empty() {
                    info!(count = reaped.len(), "Idle sessions reaped");
                }
            }
        })
    }

    pub async fn get(&self, call_id: &str) -> Option<SessionSnapshot> {
        let handle = self.sessions.read().await.live.get(call_id).cloned()?;
        let session = handle.session.lock().await;
        Some(session.snapshot())
    }

    /// Snapshots of every live session, oldest first.
    pub async fn list(&self) -> Vec<SessionSnapshot> {
        let handles: Vec<Arc<SessionHandle>> =
            self.sessions.read().await.live.values().cloned().collect();
        let mut snapshots = Vec::with_capacity(handles.len());
        for handle in handles {
            snapshots.push(handle.session.lock().await.snapshot());
        }
        snapshots.sort_by_key(|s| s.created_at);
        snapshots
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.live.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn lookup(&self, call_id: &str) -> Result<Arc<SessionHandle>, SessionError> {
        self.sessions
            .read()
            .await
            .live
            .get(call_id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(call_id.to_string()))
    }

    async fn persist_end(
        &self,
        call_id: &str,
        handle: &SessionHandle,
        system_turn: Turn,
        reason: EndReason,
    ) {
        // The session is terminal, so nothing can queue behind this write.
        let _journal = handle.journal.lock().await;
        log_store_result(
            call_id,
            "append_turn",
            self.store.append_turn(call_id, &system_turn).await,
        );
        log_store_result(
            call_id,
            "set_status",
            self.store
                .set_status(
                    call_id,
                    reason.final_status(),
                    Some(reason),
                    Some(system_turn.timestamp),
                )
                .await,
        );
    }
}

async fn run_turn(
    handle: Arc<SessionHandle>,
    store: Arc<dyn TranscriptStore>,
    model: Arc<dyn ModelClient>,
    config: Arc<RegistryConfig>,
    call_id: String,
    user_text: String,
) -> Result<TurnReply, SessionError> {
    let call_id = call_id.as_str();

    let mut session = handle.session.lock().await;
    match session.state {
        SessionState::AwaitingInput => {}
        SessionState::Ended | SessionState::Error => {
            return Err(SessionError::NotFound(call_id.to_string()));
        }
        SessionState::Created | SessionState::Processing | SessionState::Speaking => {
            debug!(state = ?session.state, "Rejecting concurrent turn");
            return Err(SessionError::ConcurrentTurnRejected(call_id.to_string()));
        }
    }
    session.state = SessionState::Processing;
    session.consecutive_silences = 0;
    session.touch();
    let prior = session.history.clone();
    let user_turn = Turn::user(user_text.as_str());
    session.history.push(user_turn.clone());
    let journal = handle.journal.lock().await;
    drop(session);

    log_store_result(
        call_id,
        "append_turn",
        store.append_turn(call_id, &user_turn).await,
    );
    drop(journal);

    let result = match tokio::time::timeout(config.model_timeout, model.reply(&prior, &user_text))
        .await
    {
        Ok(result) => result,
        Err(_) => Err(ModelError::Timeout),
    };

    let mut session = handle.session.lock().await;
    if session.state.is_terminal() {
        warn!("Call ended while the model was replying; discarding the reply");
        return Err(SessionError::CallEnded(call_id.to_string()));
    }
    session.touch();

    let reply = match result {
        Ok(reply) => reply,
        Err(e) => {
            warn!(error = %e, "Model call failed; answering with the fallback message");
            session.state = SessionState::AwaitingInput;
            return Ok(TurnReply {
                text: config.fallback_message.clone(),
                turn_index: None,
            });
        }
    };

    let agent_turn = Turn::agent(reply.clone());
    session.history.push(agent_turn.clone());
    session.turn_counter += 1;
    let turn_index = session.turn_counter;
    session.state = if config.pipeline_speech {
        SessionState::Speaking
    } else {
        SessionState::AwaitingInput
    };
    let journal = handle.journal.lock().await;
    drop(session);

    log_store_result(
        call_id,
        "append_turn",
        store.append_turn(call_id, &agent_turn).await,
    );
    drop(journal);

    debug!(turn_index, "Turn completed");
    Ok(TurnReply {
        text: reply,
        turn_index: Some(turn_index),
    })
}

fn mark_ended(session: &mut CallSession, reason: EndReason) -> Turn {
    let system_turn = Turn::system(format!("Call ended with status: {}", reason));
    session.state = reason.terminal_state();
    session.history.push(system_turn.clone());
    session.last_activity_at = Utc::now();
    system_turn
}

fn log_store_result(call_id: &str, op: &str, result: Result<(), StoreError>) {
    match result {
        Ok(()) => {}
        Err(StoreError::NotFound(_)) => {
            warn!(call_id, op, "Call record missing from transcript store; continuing")
        }
        Err(StoreError::Unavailable(e)) => {
            warn!(call_id, op, error = %e, "Transcript store unavailable; continuing in memory")
        }
    }
}
