//! Long-lived event feed subscription.
//!
//! The reconnector cycles `Connecting → Streaming → Backoff → Connecting`
//! until cancelled or until too many consecutive cycles fail. Each non-blank
//! line of the feed is a JSON array of records (a bare object is accepted as
//! a batch of one); records reach the sink one at a time in arrival order.

use crate::classify::RawEvent;
use crate::config::StreamConfig;
use crate::error::Error;
use crate::retry::RetryPolicy;
use crate::surface::{EventSource, LineStream};
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Observable reconnector state
#[derive(Debug, Clone, PartialEq)]
pub enum StreamState {
    Connecting,
    Streaming,
    Backoff { attempt: u32, delay: Duration },
    Stopped,
}

/// Why the reconnector stopped
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    Cancelled,
    GaveUp { attempts: u32 },
}

enum StreamEnd {
    Cancelled,
    Eof,
    Failed(Error),
}

/// Parse one feed line into records.
///
/// Blank lines yield an empty batch; lines that are not a JSON array or
/// object yield `None`.
pub fn parse_line(line: &str) -> Option<Vec<RawEvent>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Some(Vec::new());
    }
    match serde_json::from_str::<Value>(trimmed).ok()? {
        Value::Array(items) => Some(
            items
                .into_iter()
                .filter(Value::is_object)
                .map(RawEvent::from_value)
                .collect(),
        ),
        obj @ Value::Object(_) => Some(vec![RawEvent::from_value(obj)]),
        _ => None,
    }
}

/// Reconnecting reader over an [`EventSource`]
pub struct StreamReconnector {
    source: Arc<dyn EventSource>,
    backoff: RetryPolicy,
    max_reconnect_attempts: u32,
    stable_after: Duration,
    state: watch::Sender<StreamState>,
}

impl StreamReconnector {
    pub fn new(source: Arc<dyn EventSource>, config: &StreamConfig) -> Self {
        let backoff = RetryPolicy {
            initial_delay: config.initial_backoff(),
            max_delay: config.max_backoff(),
            max_attempts: config.max_reconnect_attempts,
            jitter_fraction: 0.1,
        };
        let (state, _) = watch::channel(StreamState::Connecting);
        Self {
            source,
            backoff,
            max_reconnect_attempts: config.max_reconnect_attempts,
            stable_after: config.stable_after(),
            state,
        }
    }

    /// Subscribe to state changes.
    pub fn state(&self) -> watch::Receiver<StreamState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: StreamState) {
        self.state.send_replace(state);
    }

    /// Run until cancelled or the reconnect budget is spent.
    pub async fn run<F>(&self, cancel: CancellationToken, mut sink: F) -> StopReason
    where
        F: FnMut(RawEvent),
    {
        let mut failures: u32 = 0;

        let reason = loop {
            if cancel.is_cancelled() {
                break StopReason::Cancelled;
            }

            self.set_state(StreamState::Connecting);
            let connected = tokio::select! {
                biased;
                _ = cancel.cancelled() => break StopReason::Cancelled,
                result = self.source.connect() => result,
            };

            match connected {
                Ok(lines) => {
                    info!("Connected to event feed");
                    self.set_state(StreamState::Streaming);
                    let started = Instant::now();
                    match self.consume(lines, &cancel, &mut sink).await {
                        StreamEnd::Cancelled => break StopReason::Cancelled,
                        StreamEnd::Eof => info!("Event feed ended"),
                        StreamEnd::Failed(e) => warn!(error = %e, "Event feed read failed"),
                    }
                    if started.elapsed() >= self.stable_after {
                        failures = 0;
                    }
                    failures += 1;
                }
                Err(e) => {
                    failures += 1;
                    warn!(
                        attempt = failures,
                        max_attempts = self.max_reconnect_attempts,
                        error = %e,
                        "Failed to connect to event feed"
                    );
                }
            }

            if failures > self.max_reconnect_attempts {
                warn!(attempts = failures, "Giving up on event feed");
                break StopReason::GaveUp { attempts: failures };
            }

            let delay = self.backoff.backoff_delay(failures);
            self.set_state(StreamState::Backoff {
                attempt: failures,
                delay,
            });
            let sleep_for = self.backoff.jittered(delay);
            info!(
                attempt = failures,
                delay_ms = sleep_for.as_millis() as u64,
                "Reconnecting to event feed"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break StopReason::Cancelled,
                _ = tokio::time::sleep(sleep_for) => {}
            }
        };

        self.set_state(StreamState::Stopped);
        debug!(?reason, "Event feed reader stopped");
        reason
    }

    async fn consume<F>(&self, mut lines: LineStream, cancel: &CancellationToken, sink: &mut F) -> StreamEnd
    where
        F: FnMut(RawEvent),
    {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return StreamEnd::Cancelled,
                next = lines.next() => next,
            };

            let line = match next {
                None => return StreamEnd::Eof,
                Some(Err(e)) => return StreamEnd::Failed(e),
                Some(Ok(line)) => line,
            };

            match parse_line(&line) {
                Some(events) => events.into_iter().for_each(&mut *sink),
                None => warn!(line = %truncate(&line, 200), "Skipping malformed feed line"),
            }
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
