//! Trigger routing.
//!
//! Feed records enter through [`Ingest`], which classifies them and either
//! sends a [`Trigger`] down the channel or hands the record to the debounce
//! gate. [`Dispatcher`] drains the channel and spawns one workflow task per
//! trigger. [`Agent`] wires the whole pipeline together.

use crate::classify::{Classification, RawEvent, Trigger, classify};
use crate::config::AgentConfig;
use crate::debounce::DebounceGate;
use crate::generation::{Generator, RetryingGenerator};
use crate::guard::ProcessingGuard;
use crate::retry::RetryPolicy;
use crate::stream::{StopReason, StreamReconnector, StreamState};
use crate::surface::{EventSource, RetryingSurface, Surface};
use crate::workflow::{Orchestrator, Outcome};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

/// Classifies feed records and routes them
pub struct Ingest {
    gate: Arc<DebounceGate>,
    triggers: mpsc::UnboundedSender<Trigger>,
}

impl Ingest {
    pub fn new(gate: Arc<DebounceGate>, triggers: mpsc::UnboundedSender<Trigger>) -> Self {
        Self { gate, triggers }
    }

    /// Route one record. Never blocks.
    pub fn accept(&self, event: RawEvent) {
        match classify(&event, self.gate.as_ref()) {
            Classification::Trigger(trigger) => {
                debug!(id = trigger.id(), kind = trigger.kind(), "Trigger received");
                if self.triggers.send(trigger).is_err() {
                    debug!("Trigger channel closed; dropping record");
                }
            }
            Classification::Debounce { key, event } => self.gate.observe(&key, event),
            Classification::Ignored => trace!(id = event.id(), "Record ignored"),
        }
    }
}

/// Spawns a workflow per trigger
pub struct Dispatcher {
    orchestrator: Arc<Orchestrator>,
}

impl Dispatcher {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Run the workflow a trigger asks for and wait for it.
    pub async fn dispatch(orchestrator: &Orchestrator, trigger: Trigger) -> Outcome {
        match trigger {
            Trigger::QuestionNoteCreated(entity) | Trigger::QuestionTextDetected(entity) => {
                orchestrator.handle_question(entity).await
            }
            Trigger::PersonaSetupRequested(entity) => orchestrator.handle_persona_setup(entity, true).await,
            Trigger::ImageCompleted(entity) => orchestrator.handle_persona_setup(entity, false).await,
            Trigger::ConnectorCreated(entity) => orchestrator.handle_connector(entity).await,
        }
    }

    /// Drain `triggers` until cancelled or the channel closes, then wait for
    /// the workflows still running. Returns how many workflows were spawned.
    pub async fn run(&self, mut triggers: mpsc::UnboundedReceiver<Trigger>, cancel: CancellationToken) -> usize {
        let mut tasks = JoinSet::new();
        let mut spawned = 0usize;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = triggers.recv() => {
                    let Some(trigger) = received else {
                        break;
                    };
                    let orchestrator = Arc::clone(&self.orchestrator);
                    let kind = trigger.kind();
                    let id = trigger.id().to_string();
                    tasks.spawn(async move {
                        let outcome = Self::dispatch(&orchestrator, trigger).await;
                        (kind, id, outcome)
                    });
                    spawned += 1;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => log_joined(joined),
            }
        }

        if !tasks.is_empty() {
            info!(running = tasks.len(), "Waiting for running workflows");
        }
        while let Some(joined) = tasks.join_next().await {
            log_joined(joined);
        }
        spawned
    }
}

fn log_joined(joined: Result<(&'static str, String, Outcome), tokio::task::JoinError>) {
    match joined {
        Ok((kind, id, outcome)) => debug!(kind, %id, outcome = outcome.label(), "Workflow task finished"),
        Err(e) if e.is_panic() => error!(error = %e, "Workflow task panicked"),
        Err(e) => debug!(error = %e, "Workflow task aborted"),
    }
}

/// The assembled pipeline: feed reader, classifier, dispatcher, workflows
pub struct Agent {
    reconnector: StreamReconnector,
    ingest: Ingest,
    dispatcher: Dispatcher,
    triggers: mpsc::UnboundedReceiver<Trigger>,
    cancel: CancellationToken,
}

impl Agent {
    /// Wrap the collaborators in retry decorators and wire the pipeline.
    pub fn new(
        config: &AgentConfig,
        surface: Arc<dyn Surface>,
        source: Arc<dyn EventSource>,
        generator: Arc<dyn Generator>,
        cancel: CancellationToken,
    ) -> Self {
        let policy = RetryPolicy::from(&config.retry);
        let surface: Arc<dyn Surface> = Arc::new(RetryingSurface::new(surface, policy.clone()));
        let generator: Arc<dyn Generator> = Arc::new(RetryingGenerator::new(generator, policy));

        let (tx, triggers) = mpsc::unbounded_channel();
        let gate = DebounceGate::new(config.debounce.quiet_period(), tx.clone());
        let orchestrator = Arc::new(Orchestrator::new(
            surface,
            generator,
            ProcessingGuard::new(),
            Arc::clone(&gate),
            config.workflow.clone(),
            cancel.clone(),
        ));

        Self {
            reconnector: StreamReconnector::new(source, &config.stream),
            ingest: Ingest::new(gate, tx),
            dispatcher: Dispatcher::new(orchestrator),
            triggers,
            cancel,
        }
    }

    pub fn stream_state(&self) -> watch::Receiver<StreamState> {
        self.reconnector.state()
    }

    /// Run until cancelled or the feed gives up. Running workflows are
    /// allowed to observe cancellation and finish their cleanup.
    pub async fn run(self) -> StopReason {
        let Agent {
            reconnector,
            ingest,
            dispatcher,
            triggers,
            cancel,
        } = self;

        let dispatch_cancel = cancel.clone();
        let dispatching = tokio::spawn(async move { dispatcher.run(triggers, dispatch_cancel).await });

        info!("Agent started");
        let reason = reconnector
            .run(cancel.clone(), |event| ingest.accept(event))
            .await;
        if let StopReason::GaveUp { attempts } = reason {
            error!(attempts, "Event feed unavailable; shutting down");
            cancel.cancel();
        }

        match dispatching.await {
            Ok(spawned) => info!(workflows = spawned, ?reason, "Agent stopped"),
            Err(e) => error!(error = %e, "Dispatcher task failed"),
        }
        reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkflowConfig;
    use crate::testing::{
        FakeSurface, ScriptedGenerator, ScriptedSource, business_canvas, persona_canvas, question_note,
        trigger,
    };
    use crate::types::{EntityKind, NoteAttrs};
    use crate::workflow::{AMBER, ANSWERED};
    use serde_json::{Value, json};
    use std::time::Duration;

    fn record(value: Value) -> RawEvent {
        RawEvent::from_value(value)
    }

    fn ingest() -> (Ingest, Arc<DebounceGate>, mpsc::UnboundedReceiver<Trigger>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let gate = DebounceGate::new(Duration::from_secs(1), tx.clone());
        (Ingest::new(Arc::clone(&gate), tx), gate, rx)
    }

    #[tokio::test]
    async fn test_ingest_routes_triggers() {
        let (ingest, _gate, mut rx) = ingest();

        ingest.accept(record(json!({
            "widget_type": "Note", "id": "n1", "title": "New_AI_Question", "background_color": "#FFFFFF"
        })));
        ingest.accept(record(json!({"widget_type": "Connector", "id": "c1"})));
        ingest.accept(record(json!({"widget_type": "Note", "id": "n2", "title": "Shopping list"})));

        assert!(matches!(rx.try_recv(), Ok(Trigger::QuestionNoteCreated(ref e)) if e.id == "n1"));
        assert!(matches!(rx.try_recv(), Ok(Trigger::ConnectorCreated(ref e)) if e.id == "c1"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ingest_debounces_registered_notes() {
        let (ingest, gate, mut rx) = ingest();
        gate.register("n1", AMBER, None);

        for text in ["W", "Why", "Why ride?"] {
            ingest.accept(record(json!({
                "widget_type": "Note", "id": "n1", "title": "New_AI_Question",
                "background_color": "#ffe4b3ff", "text": text
            })));
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        // Unregistered amber note is dropped.
        ingest.accept(record(json!({
            "widget_type": "Note", "id": "n9", "title": "New_AI_Question", "background_color": AMBER, "text": "Why?"
        })));
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(matches!(rx.try_recv(), Ok(Trigger::QuestionTextDetected(ref e)) if e.text == "Why ride?"));
        assert!(rx.try_recv().is_err());
    }

    fn orchestrator(surface: &Arc<FakeSurface>, cancel: CancellationToken) -> Arc<Orchestrator> {
        let (tx, _rx) = mpsc::unbounded_channel();
        Arc::new(Orchestrator::new(
            Arc::clone(surface) as Arc<dyn Surface>,
            Arc::new(ScriptedGenerator::new()),
            ProcessingGuard::new(),
            DebounceGate::new(Duration::from_secs(1), tx),
            WorkflowConfig::default(),
            cancel,
        ))
    }

    #[tokio::test]
    async fn test_dispatch_routes_by_kind() {
        let surface = Arc::new(FakeSurface::new());
        business_canvas(&surface).await;
        let orchestrator = orchestrator(&surface, CancellationToken::new());

        let setup = surface
            .create_note(NoteAttrs::titled("Create_Personas", ""))
            .await
            .unwrap();
        let outcome = Dispatcher::dispatch(&orchestrator, Trigger::PersonaSetupRequested(trigger(&setup))).await;
        assert!(matches!(outcome, Outcome::Completed(_)));
        assert!(surface.get_entity(setup.id()).await.is_err());

        let dangling = surface
            .create_entity(EntityKind::Connector, serde_json::Map::new())
            .await
            .unwrap();
        let outcome = Dispatcher::dispatch(&orchestrator, Trigger::ConnectorCreated(trigger(&dangling))).await;
        assert_eq!(outcome, Outcome::Ignored);
    }

    #[tokio::test]
    async fn test_dispatcher_drains_until_closed() {
        let surface = Arc::new(FakeSurface::new());
        let dispatcher = Dispatcher::new(orchestrator(&surface, CancellationToken::new()));
        let (tx, rx) = mpsc::unbounded_channel();

        let connector = surface
            .create_entity(EntityKind::Connector, serde_json::Map::new())
            .await
            .unwrap();
        tx.send(Trigger::ConnectorCreated(trigger(&connector))).unwrap();
        tx.send(Trigger::ConnectorCreated(trigger(&connector))).unwrap();
        drop(tx);

        assert_eq!(dispatcher.run(rx, CancellationToken::new()).await, 2);
    }

    #[tokio::test]
    async fn test_dispatcher_stops_on_cancel() {
        let surface = Arc::new(FakeSurface::new());
        let cancel = CancellationToken::new();
        let dispatcher = Dispatcher::new(orchestrator(&surface, cancel.clone()));
        let (_tx, rx) = mpsc::unbounded_channel();

        cancel.cancel();
        assert_eq!(dispatcher.run(rx, cancel).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_agent_answers_question_from_feed() {
        let surface = Arc::new(FakeSurface::new());
        business_canvas(&surface).await;
        persona_canvas(&surface).await;
        let note = question_note(&surface, "Would you pay for a monthly plan?").await;

        let line = Value::Array(vec![Value::Object(note.attrs.clone())]).to_string();
        let source = Arc::new(ScriptedSource::new(vec![vec![Ok(String::new()), Ok(line)]]));
        let cancel = CancellationToken::new();
        let agent = Agent::new(
            &AgentConfig::default(),
            Arc::clone(&surface) as Arc<dyn Surface>,
            source,
            Arc::new(ScriptedGenerator::new()),
            cancel.clone(),
        );
        let running = tokio::spawn(agent.run());

        for _ in 0..100 {
            let current = surface.get_entity(note.id()).await.unwrap();
            if current.background_color() == ANSWERED && surface.count_kind(EntityKind::Anchor) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(surface.count_kind(EntityKind::Anchor), 1);
        assert_eq!(surface.count_kind(EntityKind::Connector), 8);

        cancel.cancel();
        assert_eq!(running.await.unwrap(), StopReason::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_agent_stops_when_feed_gives_up() {
        let mut config = AgentConfig::default();
        config.stream.max_reconnect_attempts = 2;
        let cancel = CancellationToken::new();
        let agent = Agent::new(
            &config,
            Arc::new(FakeSurface::new()),
            Arc::new(ScriptedSource::failing()),
            Arc::new(ScriptedGenerator::new()),
            cancel.clone(),
        );

        let reason = agent.run().await;
        assert_eq!(reason, StopReason::GaveUp { attempts: 3 });
        assert!(cancel.is_cancelled());
    }
}
