//! Story subsystem — branching choose-your-own-adventure sessions
//!
//! This subsystem is responsible for:
//! - Starting a session from a randomly assembled setting
//! - Generating follow-up beats with pacing instructions layered in
//! - Precomputing both branches in the background after every beat
//! - Reconciling a reader's choice with whatever was precomputed
//!
//! Precomputation runs in tokio::spawn AFTER the response is sent — never blocks the caller.

use std::sync::Arc;

use inkwell_core::config::StoryConfig;
use inkwell_core::models::{Beat, Choice, EndHorizon, Message, StorySession};
use inkwell_core::store::{self, story_key, StoreError};
use inkwell_core::{CompletionClient, InkwellError, TranscriptStore};
use rand::Rng;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::sessions::SessionLocks;
use crate::subsystems::prompts;

type Result<T> = std::result::Result<T, InkwellError>;

/// Where the beat returned to the reader came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BeatSource {
    Started,
    Precomputed,
    Generated,
}

/// The outcome of one `respond` call.
#[derive(Debug, Clone, Serialize)]
pub struct StoryStep {
    pub beat: Beat,
    pub sequence_index: i64,
    pub source: BeatSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrecomputeOutcome {
    Stored,
    /// The session moved on while the branches were being generated.
    Stale,
    /// The story is over; there is nothing to branch from.
    Skipped,
}

// ============================================================================
// Pure helpers
// ============================================================================

/// The pacing instruction for the next generation, if any.
pub fn pacing_message(state: &StorySession, config: &StoryConfig) -> Option<Message> {
    let horizon = state.end_horizon;
    if horizon.is_unbounded() {
        let len = state.transcript.len();
        return (config.reminder_every > 0 && len % config.reminder_every == 0)
            .then(|| Message::system(prompts::REMINDER));
    }
    let text = match horizon.0 {
        0 => prompts::CONCLUDE.to_string(),
        1 => prompts::FINAL_ACTION.to_string(),
        n => prompts::wrap_up(n),
    };
    Some(Message::system(text))
}

/// The prompt transcript for following `choice` from `state`.
///
/// Deterministic in its inputs, so a precomputed branch and a fresh
/// generation from the same state share the exact same prompt. `None` when
/// the session has no beat to branch from.
pub fn followup_messages(
    state: &StorySession,
    choice: Choice,
    config: &StoryConfig,
) -> Option<Vec<Message>> {
    let chosen = state.last_beat()?.choice_text(choice);
    let mut messages = state.transcript.clone();
    if let Some(pacing) = pacing_message(state, config) {
        messages.push(pacing);
    }
    messages.push(Message::user(format!("{}, {}", choice, chosen)));
    Some(messages)
}

/// New `end_horizon` after a beat, or `None` to leave it as is.
///
/// A scheduled ending counts down by one per beat. Otherwise, once the
/// transcript is long enough, a draw in `[0, 100]` above
/// `base - 2 * transcript_len` schedules one `[min, max]` beats out. The
/// threshold is not clamped: past a certain length the draw always succeeds.
pub fn pacing_update<R: Rng + ?Sized>(
    horizon: EndHorizon,
    transcript_len: usize,
    config: &StoryConfig,
    rng: &mut R,
) -> Option<EndHorizon> {
    if horizon.0 < config.near_end_threshold {
        return Some(horizon.count_down());
    }
    if transcript_len <= config.min_transcript_len {
        return None;
    }
    let draw: i64 = rng.gen_range(0..=100);
    let threshold = config.ending_base_threshold - 2 * transcript_len as i64;
    if draw > threshold {
        Some(EndHorizon(
            rng.gen_range(config.min_horizon..=config.max_horizon),
        ))
    } else {
        None
    }
}

// ============================================================================
// StoryEngine
// ============================================================================

#[derive(Clone)]
pub struct StoryEngine {
    store: Arc<dyn TranscriptStore>,
    client: Arc<dyn CompletionClient>,
    locks: SessionLocks,
    config: StoryConfig,
}

impl StoryEngine {
    pub fn new(
        store: Arc<dyn TranscriptStore>,
        client: Arc<dyn CompletionClient>,
        locks: SessionLocks,
        config: StoryConfig,
    ) -> Self {
        Self {
            store,
            client,
            locks,
            config,
        }
    }

    /// Start the session if it does not exist, otherwise follow `choice`.
    pub async fn respond(&self, session_id: &str, choice: Option<&str>) -> Result<StoryStep> {
        let _guard = self.locks.acquire(&story_key(session_id)).await;

        if !self.store.exists(&story_key(session_id)).await? {
            return self.start(session_id).await;
        }

        let choice: Choice = choice.unwrap_or_default().parse()?;
        self.continue_locked(session_id, choice).await
    }

    pub async fn continue_story(&self, session_id: &str, choice: Choice) -> Result<StoryStep> {
        let _guard = self.locks.acquire(&story_key(session_id)).await;
        self.continue_locked(session_id, choice).await
    }

    /// Generate the beat that follows `choice` from `state`, without
    /// touching the store. Returns the beat and the prompt transcript it
    /// was generated from.
    pub async fn generate_followup(
        &self,
        session_id: &str,
        choice: Choice,
        state: &StorySession,
    ) -> Result<(Beat, Vec<Message>)> {
        let messages = followup_messages(state, choice, &self.config)
            .ok_or_else(|| InkwellError::SessionNotFound(session_id.to_string()))?;

        let mut beat = self.generate_beat(&messages).await?;
        if state.end_horizon == EndHorizon(0) {
            beat = beat.concluded();
        }

        tracing::debug!(
            session_id,
            choice = %choice,
            end_horizon = state.end_horizon.0,
            "Generated follow-up beat"
        );
        Ok((beat, messages))
    }

    /// Commit a beat onto `state` and persist the result.
    pub async fn commit_beat(
        &self,
        session_id: &str,
        state: StorySession,
        beat: Beat,
        messages: Vec<Message>,
        end_horizon_override: Option<EndHorizon>,
    ) -> Result<StorySession> {
        let session = state.commit(beat, messages, end_horizon_override);
        store::save(self.store.as_ref(), &story_key(session_id), &session).await?;
        Ok(session)
    }

    /// Generate both branches from the current state and store them
    /// together, unless the session moved on in the meantime.
    pub async fn precompute_branches(&self, session_id: &str) -> Result<PrecomputeOutcome> {
        let base = self.load_session(session_id).await?;
        if base.is_over() {
            return Ok(PrecomputeOutcome::Skipped);
        }

        let started = std::time::Instant::now();
        let ((branch_a, _), (branch_b, _)) = futures::future::try_join(
            self.generate_followup(session_id, Choice::A, &base),
            self.generate_followup(session_id, Choice::B, &base),
        )
        .await?;

        let _guard = self.locks.acquire(&story_key(session_id)).await;
        let current = self.load_session(session_id).await?;
        if current.sequence_index != base.sequence_index {
            tracing::info!(
                session_id,
                base_index = base.sequence_index,
                current_index = current.sequence_index,
                "Discarding stale precomputed branches"
            );
            return Ok(PrecomputeOutcome::Stale);
        }

        let updated = current.with_branches(branch_a, branch_b);
        store::save(self.store.as_ref(), &story_key(session_id), &updated).await?;
        tracing::info!(
            session_id,
            target_index = updated.sequence_index + 1,
            took_ms = started.elapsed().as_millis() as u64,
            "Precomputed both branches"
        );
        Ok(PrecomputeOutcome::Stored)
    }

    /// Spawn `precompute_branches` in the background. Failures are logged.
    pub fn spawn_precompute(&self, session_id: &str) -> JoinHandle<()> {
        let engine = self.clone();
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            match engine.precompute_branches(&session_id).await {
                Ok(outcome) => {
                    tracing::debug!(session_id = %session_id, ?outcome, "Background precompute finished")
                }
                Err(e) => {
                    tracing::error!(session_id = %session_id, error = %e, "Background precompute failed")
                }
            }
        })
    }

    pub fn config(&self) -> &StoryConfig {
        &self.config
    }

    async fn start(&self, session_id: &str) -> Result<StoryStep> {
        let setting = {
            let mut rng = rand::thread_rng();
            prompts::random_setting(&mut rng)
        };
        let messages = vec![
            Message::system(prompts::STORY_PERSONA),
            Message::user(prompts::story_opening(&setting)),
        ];

        let beat = self.generate_beat(&messages).await?;
        let session = self
            .commit_beat(session_id, StorySession::default(), beat.clone(), messages, None)
            .await?;

        tracing::info!(session_id, setting = %setting, "Story started");
        Ok(StoryStep {
            beat,
            sequence_index: session.sequence_index,
            source: BeatSource::Started,
        })
    }

    async fn continue_locked(&self, session_id: &str, choice: Choice) -> Result<StoryStep> {
        let state = self.load_session(session_id).await?;

        let (beat, messages, source) = match state.fresh_branch(choice).cloned() {
            Some(beat) => {
                tracing::info!(session_id, choice = %choice, "Using precomputed branch");
                let messages = followup_messages(&state, choice, &self.config)
                    .ok_or_else(|| InkwellError::SessionNotFound(session_id.to_string()))?;
                (beat, messages, BeatSource::Precomputed)
            }
            None => {
                tracing::info!(session_id, choice = %choice, "Generating branch on demand");
                let (beat, messages) = self.generate_followup(session_id, choice, &state).await?;
                (beat, messages, BeatSource::Generated)
            }
        };

        let end_horizon_override = {
            let mut rng = rand::thread_rng();
            pacing_update(
                state.end_horizon,
                state.transcript.len(),
                &self.config,
                &mut rng,
            )
        };
        if let Some(horizon) = end_horizon_override {
            if state.end_horizon.is_unbounded() {
                tracing::info!(session_id, end_horizon = horizon.0, "Story ending scheduled");
            }
        }

        let session = self
            .commit_beat(session_id, state, beat.clone(), messages, end_horizon_override)
            .await?;

        Ok(StoryStep {
            beat,
            sequence_index: session.sequence_index,
            source,
        })
    }

    async fn generate_beat(&self, messages: &[Message]) -> Result<Beat> {
        let schema = Beat::schema();
        let arguments = self
            .client
            .complete(messages, Some(&schema))
            .await?
            .into_structured()?;
        Ok(Beat::from_arguments(arguments)?)
    }

    async fn load_session(&self, session_id: &str) -> Result<StorySession> {
        match store::load(self.store.as_ref(), &story_key(session_id)).await {
            Err(StoreError::NotFound(_)) => {
                Err(InkwellError::SessionNotFound(session_id.to_string()))
            }
            other => Ok(other?),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
