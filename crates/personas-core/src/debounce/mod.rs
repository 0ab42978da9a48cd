//! Debounced question detection.
//!
//! Rapid edits to a registered question note are coalesced: each observation
//! replaces the pending value and restarts a quiet-period timer. When a timer
//! survives its quiet period it re-reads the *current* pending value and, if
//! the text looks like a question, emits one `QuestionTextDetected` trigger
//! and calls the registration's `on_fire` handler.
//!
//! All state for a key lives in a single [`DashMap`] entry, so different keys
//! never contend on a global lock and never cancel each other's timers.

use crate::classify::{Registrations, Trigger, TriggerEntity};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, trace};

/// Handler invoked on the timer task after a trigger is emitted.
///
/// Must not block.
pub type OnFire = Arc<dyn Fn(TriggerEntity) + Send + Sync>;

const QUESTION_WORDS: &[&str] = &[
    "what", "why", "how", "when", "where", "who", "which", "is", "are", "do", "does", "can",
    "could", "would", "should",
];

/// Heuristic for "the user has typed a question".
pub fn looks_like_question(text: &str) -> bool {
    let lower = text.to_lowercase();
    if lower.contains('?') {
        return true;
    }
    QUESTION_WORDS
        .iter()
        .any(|word| lower.contains(&format!("{} ", word)))
}

struct Registration {
    expected_color: String,
    on_fire: Option<OnFire>,
}

#[derive(Default)]
struct DebounceEntry {
    pending: Option<TriggerEntity>,
    timer: Option<AbortHandle>,
    generation: u64,
    registration: Option<Registration>,
}

/// Per-key quiet-period coalescing of observed values
pub struct DebounceGate {
    entries: DashMap<String, DebounceEntry>,
    quiet_period: Duration,
    triggers: mpsc::UnboundedSender<Trigger>,
}

impl DebounceGate {
    pub fn new(quiet_period: Duration, triggers: mpsc::UnboundedSender<Trigger>) -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::new(),
            quiet_period,
            triggers,
        })
    }

    pub fn quiet_period(&self) -> Duration {
        self.quiet_period
    }

    /// Register `key` with the colour its note must carry to be observed.
    pub fn register(&self, key: &str, expected_color: &str, on_fire: Option<OnFire>) {
        let mut entry = self.entries.entry(key.to_string()).or_default();
        entry.registration = Some(Registration {
            expected_color: expected_color.to_string(),
            on_fire,
        });
        debug!(key, expected_color, "Registered for question detection");
    }

    /// Cancel any pending timer and forget the key. Safe when absent.
    pub fn unregister(&self, key: &str) {
        if let Some((_, entry)) = self.entries.remove(key) {
            if let Some(timer) = entry.timer {
                timer.abort();
            }
            debug!(key, "Unregistered from question detection");
        }
    }

    pub fn is_registered(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| entry.registration.is_some())
    }

    /// Record the latest value for `key` and restart its quiet period.
    pub fn observe(self: &Arc<Self>, key: &str, value: TriggerEntity) {
        let mut entry = self.entries.entry(key.to_string()).or_default();
        entry.pending = Some(value);
        entry.generation = entry.generation.wrapping_add(1);
        if let Some(previous) = entry.timer.take() {
            previous.abort();
        }

        let gate = Arc::clone(self);
        let key_owned = key.to_string();
        let generation = entry.generation;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(gate.quiet_period).await;
            gate.fire(&key_owned, generation);
        });
        entry.timer = Some(handle.abort_handle());
        trace!(key, generation, "Debounce timer scheduled");
    }

    fn fire(&self, key: &str, generation: u64) {
        let fired = {
            let Some(mut entry) = self.entries.get_mut(key) else {
                return;
            };
            if entry.generation != generation {
                return;
            }
            entry.timer = None;
            let Some(pending) = entry.pending.clone() else {
                return;
            };
            if !looks_like_question(&pending.text) {
                trace!(key, "Pending text is not a question yet");
                return;
            }
            entry.pending = None;
            if self
                .triggers
                .send(Trigger::QuestionTextDetected(pending.clone()))
                .is_err()
            {
                debug!(key, "Trigger channel closed; dropping detected question");
            }
            entry
                .registration
                .as_ref()
                .and_then(|r| r.on_fire.clone())
                .map(|handler| (handler, pending))
        };

        debug!(key, "Question text detected");
        if let Some((handler, value)) = fired {
            handler(value);
        }
    }
}

impl Registrations for DebounceGate {
    fn expected_color(&self, id: &str) -> Option<String> {
        self.entries
            .get(id)
            .and_then(|entry| entry.registration.as_ref().map(|r| r.expected_color.clone()))
    }
}
