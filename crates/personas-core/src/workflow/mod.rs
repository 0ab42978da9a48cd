//! Question workflow orchestration.
//!
//! A question runs through these stages, each starting only after the
//! previous one finished:
//!
//! 1. prerequisite check (personas present, generating them if needed)
//! 2. wait for the note to contain a question
//! 3. one answer per persona, generated concurrently
//! 4. success threshold
//! 5. answer notes
//! 6. reactions to the other answers, then reaction notes
//! 7. connectors
//! 8. grouping anchor
//! 9. finalisation
//!
//! Every workflow holds a [`Claim`](crate::guard::Claim) on its entity id.
//! Panics, timeouts and cancellation all end in the same cleanup: gate
//! registration removed, helper note removed, claim released.

pub mod run;

pub use run::{RunSummary, Slot, Stage, WorkflowRun, fan_out};

use crate::classify::TriggerEntity;
use crate::config::WorkflowConfig;
use crate::debounce::{DebounceGate, OnFire};
use crate::error::{Error, Result};
use crate::generation::{Generator, TextRequest, prompts};
use crate::guard::ProcessingGuard;
use crate::helper::{HelperKind, HelperRegistry, post_notice};
use crate::layout::{self, ANSWER_OFFSETS, Placement, REACTION_OFFSETS};
use crate::persona::{PersonaService, count_personas, panic_message};
use crate::surface::Surface;
use crate::types::{AnchorAttrs, Entity, EntityKind, NoteAttrs};
use futures::FutureExt;
use futures::future::join_all;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Tint of a note waiting for its question
pub const AMBER: &str = "#ffe4b3";
/// Tint of an answered note
pub const ANSWERED: &str = "#ccffcc";
const NOTICE_COLOR: &str = "#ff9800ff";
const FAILURE_COLOR: &str = "#f44336ff";

/// How a workflow ended
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed(RunSummary),
    AlreadyProcessing,
    /// The trigger did not apply (e.g. an unrelated connector)
    Ignored,
    TimedOut,
    MissingPrerequisites,
    Failed(String),
    Cancelled,
    Panicked,
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Completed(_) => "completed",
            Outcome::AlreadyProcessing => "already_processing",
            Outcome::Ignored => "ignored",
            Outcome::TimedOut => "timed_out",
            Outcome::MissingPrerequisites => "missing_prerequisites",
            Outcome::Failed(_) => "failed",
            Outcome::Cancelled => "cancelled",
            Outcome::Panicked => "panicked",
        }
    }
}

impl From<Error> for Outcome {
    fn from(err: Error) -> Self {
        match err {
            Error::MissingPrerequisite(_) => Outcome::MissingPrerequisites,
            Error::InsufficientResults {
                stage: "personas", ..
            } => Outcome::MissingPrerequisites,
            Error::Cancelled => Outcome::Cancelled,
            other => Outcome::Failed(other.to_string()),
        }
    }
}

enum QuestionWait {
    Ready(Entity),
    TimedOut,
}

/// Question text with any processing suffix removed.
pub fn extract_question(text: &str) -> &str {
    let after = text.rsplit_once("-->").map_or(text, |(_, rest)| rest);
    let before = after.split("Please wait").next().unwrap_or(after);
    before.trim()
}

/// Persona name from an answer note title.
pub fn persona_from_answer_title(title: &str) -> &str {
    let title = title.trim();
    [" Followup Answer", " Meta Answer", " Answer"]
        .iter()
        .find_map(|suffix| title.strip_suffix(suffix))
        .unwrap_or(title)
        .trim()
}

fn describe(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 60 && secs % 60 == 0 {
        format!("{} minutes", secs / 60)
    } else {
        format!("{} seconds", secs)
    }
}

/// Shared collaborators of every workflow
pub struct Orchestrator {
    surface: Arc<dyn Surface>,
    generator: Arc<dyn Generator>,
    guard: Arc<ProcessingGuard>,
    gate: Arc<DebounceGate>,
    helpers: Arc<HelperRegistry>,
    personas: PersonaService,
    config: WorkflowConfig,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        surface: Arc<dyn Surface>,
        generator: Arc<dyn Generator>,
        guard: Arc<ProcessingGuard>,
        gate: Arc<DebounceGate>,
        config: WorkflowConfig,
        cancel: CancellationToken,
    ) -> Self {
        let personas = PersonaService::new(Arc::clone(&surface), Arc::clone(&generator), &config);
        Self {
            surface,
            generator,
            guard,
            gate,
            helpers: HelperRegistry::new(),
            personas,
            config,
            cancel,
        }
    }

    pub fn guard(&self) -> &Arc<ProcessingGuard> {
        &self.guard
    }

    pub fn helpers(&self) -> &Arc<HelperRegistry> {
        &self.helpers
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Entry points
    // ─────────────────────────────────────────────────────────────────────────

    /// Run the question workflow for a `New_AI_Question` note.
    pub async fn handle_question(&self, trigger: TriggerEntity) -> Outcome {
        self.guarded(&trigger.id, "question", self.question_stages(&trigger))
            .await
    }

    /// Generate missing personas; optionally delete the trigger note afterwards.
    pub async fn handle_persona_setup(&self, trigger: TriggerEntity, consume_trigger: bool) -> Outcome {
        self.guarded(&trigger.id, "persona_setup", async {
            let anchor = self.fetch(&trigger).await;
            let personas = self.personas.ensure_personas(&anchor).await?;
            if consume_trigger {
                if let Err(e) = self.surface.delete_note(&trigger.id).await {
                    warn!(note_id = %trigger.id, error = %e, "Failed to delete persona setup note");
                }
            }
            Ok(Outcome::Completed(RunSummary {
                personas: personas.len(),
                ..RunSummary::empty()
            }))
        })
        .await
    }

    /// Answer a follow-up question drawn from a persona answer to a note.
    pub async fn handle_connector(&self, trigger: TriggerEntity) -> Outcome {
        self.guarded(&trigger.id, "followup", self.followup(&trigger))
            .await
    }

    /// Claim `id`, run `work` under the overall timeout with panic capture,
    /// then clean up regardless of how it ended.
    async fn guarded<F>(&self, id: &str, workflow: &'static str, work: F) -> Outcome
    where
        F: Future<Output = Result<Outcome>>,
    {
        let Some(claim) = self.guard.claim(id) else {
            debug!(id, workflow, "Entity already being processed");
            return Outcome::AlreadyProcessing;
        };
        let started = Instant::now();
        info!(id, workflow, "Workflow started");

        let limit = self.config.workflow_timeout();
        let bounded = tokio::time::timeout(limit, work);
        let outcome = match AssertUnwindSafe(bounded).catch_unwind().await {
            Ok(Ok(Ok(outcome))) => outcome,
            Ok(Ok(Err(e))) => Outcome::from(e),
            Ok(Err(_)) => {
                warn!(id, workflow, limit_secs = limit.as_secs(), "Workflow exceeded its time limit");
                Outcome::Failed(format!("workflow exceeded {}", describe(limit)))
            }
            Err(payload) => {
                error!(id, workflow, panic = %panic_message(&*payload), "Workflow panicked");
                Outcome::Panicked
            }
        };

        self.gate.unregister(id);
        self.helpers.remove(self.surface.as_ref(), id).await;
        drop(claim);

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Outcome::Completed(ref summary) => info!(
                id,
                workflow,
                run_id = %summary.run_id,
                answers = summary.answers,
                reactions = summary.reactions,
                connectors = summary.connectors,
                elapsed_ms,
                "Workflow completed"
            ),
            Outcome::Failed(ref reason) => warn!(id, workflow, %reason, elapsed_ms, "Workflow failed"),
            Outcome::MissingPrerequisites => warn!(id, workflow, elapsed_ms, "Workflow missing prerequisites"),
            Outcome::Panicked => {}
            ref other => info!(id, workflow, outcome = other.label(), elapsed_ms, "Workflow finished"),
        }
        outcome
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Current state of the trigger's entity, or the event snapshot if unavailable.
    async fn fetch(&self, trigger: &TriggerEntity) -> Entity {
        match self.surface.get_entity(&trigger.id).await {
            Ok(entity) => entity,
            Err(e) => {
                debug!(id = %trigger.id, error = %e, "Using event snapshot of trigger entity");
                trigger.raw.clone()
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Question stages
    // ─────────────────────────────────────────────────────────────────────────

    async fn question_stages(&self, trigger: &TriggerEntity) -> Result<Outcome> {
        let mut note = self.fetch(trigger).await;

        self.ensure_prerequisites(&note).await?;
        self.check_cancelled()?;

        if !note.has_question() {
            match self.wait_for_question(&note).await? {
                QuestionWait::Ready(updated) => note = updated,
                QuestionWait::TimedOut => {
                    let timeout = self.config.question_timeout();
                    let text = format!(
                        "The system waited {} for a question to be entered, but none was detected.\n\n\
Please enter your question (ending with ?) in the note, then create a new 'New_AI_Question' trigger note to \
restart the Q&A process.",
                        describe(timeout)
                    );
                    post_notice(
                        self.surface.as_ref(),
                        &note,
                        "Question Wait Timed Out",
                        &text,
                        NOTICE_COLOR,
                    )
                    .await;
                    info!(note_id = %note.id(), timeout_secs = timeout.as_secs(), "No question entered in time");
                    return Ok(Outcome::TimedOut);
                }
            }
        }
        self.check_cancelled()?;

        let question = extract_question(note.text()).to_string();
        if let Err(e) = self
            .helpers
            .show(self.surface.as_ref(), &note, HelperKind::GeneratingAnswers)
            .await
        {
            warn!(note_id = %note.id(), error = %e, "Failed to show progress helper");
        }

        let (personas, context) = self.personas.load().await?;
        let personas: Vec<_> = personas
            .into_iter()
            .take(self.config.persona_count)
            .collect();
        if personas.is_empty() {
            return Err(Error::MissingPrerequisite("no readable persona notes".into()));
        }

        let mut run = WorkflowRun::new(note.id(), question, personas);
        let _sessions = SessionScope::new(
            &self.generator,
            (0..run.personas.len()).map(|i| run.session(i)).collect(),
        );
        info!(note_id = %note.id(), run_id = %run.run_id, personas = run.personas.len(), "Answering question");

        // Stage 3-4: answers
        let started = Instant::now();
        let answers = self.generate_answers(&run, &context.text).await;
        run.answers.record(answers);
        let succeeded = run.answers.success_count();
        info!(
            run_id = %run.run_id,
            succeeded,
            total = run.answers.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Answers generated"
        );
        if succeeded < self.config.min_answers {
            post_notice(
                self.surface.as_ref(),
                &note,
                "Answer generation failed",
                "No persona produced an answer. Create a new 'New_AI_Question' note to try again.",
                FAILURE_COLOR,
            )
            .await;
            return Err(Error::InsufficientResults {
                stage: "answers",
                succeeded,
                required: self.config.min_answers,
            });
        }
        self.check_cancelled()?;

        // Stage 5: answer notes
        let center = Placement::of(&note);
        let scale = note.scale();
        self.materialise_answers(&mut run, center, scale).await;
        self.check_cancelled()?;

        // Stage 6: reactions
        let started = Instant::now();
        self.generate_reactions(&mut run).await;
        let reacted = run.reactions.success_count();
        info!(
            run_id = %run.run_id,
            succeeded = reacted,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Reactions generated"
        );
        if reacted < self.config.min_reactions {
            return Err(Error::InsufficientResults {
                stage: "reactions",
                succeeded: reacted,
                required: self.config.min_reactions,
            });
        }
        self.materialise_reactions(&mut run, center, scale).await;
        self.check_cancelled()?;

        // Stage 7-8: links and grouping
        let connectors = self.link(&run).await;
        let anchor_id = self.group(&run).await;

        // Stage 9
        let finish = NoteAttrs {
            text: Some(run.question.clone()),
            background_color: Some(ANSWERED.to_string()),
            ..Default::default()
        };
        if let Err(e) = self.surface.update_note(&run.question_id, finish).await {
            warn!(note_id = %run.question_id, error = %e, "Failed to mark question answered");
        }
        Ok(Outcome::Completed(RunSummary {
            connectors,
            anchor_id,
            ..RunSummary::from(&run)
        }))
    }

    async fn ensure_prerequisites(&self, note: &Entity) -> Result<()> {
        let mut count = count_personas(&self.surface.list_entities().await?);

        if count < self.config.min_personas {
            if let Err(e) = self
                .helpers
                .show(self.surface.as_ref(), note, HelperKind::GeneratingPersonas)
                .await
            {
                warn!(note_id = %note.id(), error = %e, "Failed to show persona helper");
            }
            let generated = self.personas.ensure_personas(note).await;
            self.helpers.remove(self.surface.as_ref(), note.id()).await;
            if let Err(e) = generated {
                warn!(note_id = %note.id(), error = %e, "Persona generation failed");
                return Err(Error::MissingPrerequisite(e.to_string()));
            }
            count = count_personas(&self.surface.list_entities().await?);
        }

        if count < self.config.min_personas {
            return Err(Error::MissingPrerequisite(format!(
                "{} personas available, {} required",
                count, self.config.min_personas
            )));
        }
        if count < self.config.persona_count {
            warn!(
                available = count,
                expected = self.config.persona_count,
                "Proceeding with fewer personas"
            );
        }
        Ok(())
    }

    async fn wait_for_question(&self, note: &Entity) -> Result<QuestionWait> {
        let id = note.id().to_string();
        if let Err(e) = self
            .helpers
            .show(self.surface.as_ref(), note, HelperKind::AwaitingQuestion)
            .await
        {
            warn!(note_id = %id, error = %e, "Failed to show question helper");
        }
        if let Err(e) = self
            .surface
            .update_note(&id, NoteAttrs::default().color(AMBER))
            .await
        {
            warn!(note_id = %id, error = %e, "Failed to tint question note");
        }

        let wake = Arc::new(Notify::new());
        let on_fire: OnFire = {
            let wake = Arc::clone(&wake);
            Arc::new(move |_| wake.notify_one())
        };
        self.gate.register(&id, AMBER, Some(on_fire));
        let waited = self.poll_question(&id, &wake).await;
        self.gate.unregister(&id);
        waited
    }

    async fn poll_question(&self, id: &str, wake: &Notify) -> Result<QuestionWait> {
        let deadline = Instant::now() + self.config.question_timeout();
        loop {
            match self.surface.get_entity(id).await {
                Ok(note) if note.has_question() => {
                    debug!(note_id = id, "Question detected");
                    return Ok(QuestionWait::Ready(note));
                }
                Ok(_) => {}
                Err(e) => debug!(note_id = id, error = %e, "Polling question note failed"),
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep_until(deadline) => return Ok(QuestionWait::TimedOut),
                _ = wake.notified() => debug!(note_id = id, "Woken by debounced question"),
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
            }
        }
    }

    async fn generate_answers(&self, run: &WorkflowRun, business_context: &str) -> Vec<Result<String>> {
        let requests: Vec<TextRequest> = run
            .personas
            .iter()
            .enumerate()
            .map(|(i, persona)| {
                TextRequest::new(&run.question)
                    .with_system(prompts::persona_system(persona, business_context))
                    .in_session(run.session(i))
            })
            .collect();

        let limit = self.config.chat_char_limit;
        fan_out(requests, |_, request| {
            let generator = Arc::clone(&self.generator);
            async move { ask(generator, request, limit).await }
        })
        .await
    }

    async fn generate_reactions(&self, run: &mut WorkflowRun) {
        let participants = run.answers.materialised();
        let requests: Vec<(usize, TextRequest)> = participants
            .iter()
            .map(|&i| {
                let prompt = prompts::reaction(&run.personas[i].name, &run.peers_of(i));
                (i, TextRequest::new(prompt).in_session(run.session(i)))
            })
            .collect();

        let limit = self.config.chat_char_limit;
        let results = fan_out(requests, |_, (_, request)| {
            let generator = Arc::clone(&self.generator);
            async move { ask(generator, request, limit).await }
        })
        .await;

        for (index, result) in participants.into_iter().zip(results) {
            if let Err(ref e) = result {
                warn!(run_id = %run.run_id, persona = %run.personas[index].name, error = %e, "Reaction failed");
            }
            run.reactions.record_at(index, result);
        }
    }

    async fn materialise_answers(&self, run: &mut WorkflowRun, center: Placement, scale: f64) {
        let notes: Vec<(usize, NoteAttrs)> = run
            .answers
            .succeeded()
            .into_iter()
            .filter_map(|i| {
                let text = run.answers.result(i)?;
                let at = layout::grid(center, scale, &ANSWER_OFFSETS, i);
                let note = NoteAttrs::titled(format!("{} Answer", run.personas[i].name), text)
                    .at(at.location, at.size)
                    .color(layout::persona_color(i))
                    .scaled(scale);
                Some((i, note))
            })
            .collect();

        for (index, created) in self.create_notes(notes).await {
            match created {
                Ok(entity) => run.answers.set_entity(index, entity.id()),
                Err(e) => {
                    warn!(run_id = %run.run_id, persona = %run.personas[index].name, error = %e, "Answer note not created");
                    run.answers.fail(index, e);
                }
            }
        }
    }

    async fn materialise_reactions(&self, run: &mut WorkflowRun, center: Placement, scale: f64) {
        let notes: Vec<(usize, NoteAttrs)> = run
            .reactions
            .succeeded()
            .into_iter()
            .filter(|&i| run.answers.entity(i).is_some())
            .filter_map(|i| {
                let text = run.reactions.result(i)?;
                let at = layout::grid(center, scale, &REACTION_OFFSETS, i);
                let note = NoteAttrs::titled(format!("{} Meta Answer", run.personas[i].name), text)
                    .at(at.location, at.size)
                    .color(layout::persona_color(i))
                    .scaled(scale);
                Some((i, note))
            })
            .collect();

        for (index, created) in self.create_notes(notes).await {
            match created {
                Ok(entity) => run.reactions.set_entity(index, entity.id()),
                Err(e) => {
                    warn!(run_id = %run.run_id, persona = %run.personas[index].name, error = %e, "Reaction note not created");
                    run.reactions.fail(index, e);
                }
            }
        }
    }

    async fn create_notes(&self, notes: Vec<(usize, NoteAttrs)>) -> Vec<(usize, Result<Entity>)> {
        let surface = self.surface.as_ref();
        join_all(
            notes
                .into_iter()
                .map(|(i, note)| async move { (i, surface.create_note(note).await) }),
        )
        .await
    }

    /// Question → answer and answer → reaction connectors. Returns how many were created.
    async fn link(&self, run: &WorkflowRun) -> usize {
        let mut pairs = Vec::new();
        for i in run.answers.materialised() {
            let Some(answer) = run.answers.entity(i) else {
                continue;
            };
            pairs.push((run.question_id.as_str(), answer));
            if let Some(reaction) = run.reactions.entity(i) {
                pairs.push((answer, reaction));
            }
        }

        let surface = self.surface.as_ref();
        let results = join_all(pairs.iter().map(|&(src, dst)| async move {
            (src, dst, surface.link(src, dst).await)
        }))
        .await;

        results
            .into_iter()
            .filter(|(src, dst, result)| match result {
                Ok(_) => true,
                Err(e) => {
                    warn!(src, dst, error = %e, "Connector not created");
                    false
                }
            })
            .count()
    }

    /// Anchor spanning every created note. Returns its id.
    async fn group(&self, run: &WorkflowRun) -> Option<String> {
        let mut ids = run.answers.entity_ids();
        ids.extend(run.reactions.entity_ids());
        if ids.is_empty() {
            return None;
        }

        let entities = match self.surface.list_entities().await {
            Ok(entities) => entities,
            Err(e) => {
                warn!(run_id = %run.run_id, error = %e, "Cannot list entities for grouping");
                return None;
            }
        };
        let Some(bounds) = layout::bounding_box(&entities, &ids) else {
            warn!(run_id = %run.run_id, "Created notes have no geometry; skipping anchor");
            return None;
        };

        let anchor = AnchorAttrs {
            anchor_name: format!("{} (Script Made)", run.question),
            location: bounds.location,
            size: bounds.size,
            notes: ids,
        };
        match self
            .surface
            .create_entity(EntityKind::Anchor, anchor.into_attributes())
            .await
        {
            Ok(created) => Some(created.id().to_string()),
            Err(e) => {
                warn!(run_id = %run.run_id, error = %e, "Anchor not created");
                None
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Follow-up connectors
    // ─────────────────────────────────────────────────────────────────────────

    async fn followup(&self, trigger: &TriggerEntity) -> Result<Outcome> {
        let connector = &trigger.raw;
        let (Some(src_id), Some(dst_id)) = (connector.endpoint("src"), connector.endpoint("dst")) else {
            debug!(connector_id = %trigger.id, "Connector without endpoints");
            return Ok(Outcome::Ignored);
        };

        let source = self.surface.get_entity(src_id).await?;
        if source.kind() != EntityKind::Note
            || !source.title().trim_end().ends_with(" Answer")
            || !layout::is_persona_color(source.background_color())
        {
            return Ok(Outcome::Ignored);
        }
        let target = self.surface.get_entity(dst_id).await?;
        if target.kind() != EntityKind::Note || !target.has_question() {
            return Ok(Outcome::Ignored);
        }

        let name = persona_from_answer_title(source.title()).to_string();
        let (personas, context) = self.personas.load().await?;
        let Some(persona) = personas.into_iter().find(|p| p.name == name) else {
            debug!(persona = %name, "Follow-up source persona not on canvas");
            return Ok(Outcome::Ignored);
        };

        let session = run::session_key(target.id(), &persona.name);
        let scope = SessionScope::new(&self.generator, vec![session.clone()]);
        let request = TextRequest::new(target.text().trim())
            .with_system(prompts::persona_system(&persona, &context.text))
            .in_session(session);
        let answer = ask(Arc::clone(&self.generator), request, self.config.chat_char_limit).await;
        drop(scope);
        let answer = answer?;

        let target_at = Placement::of(&target);
        let location = layout::mirrored(Placement::of(&source).location, target_at.location);
        let note = NoteAttrs::titled(format!("{} Followup Answer", persona.name), answer)
            .at(location, target_at.size)
            .color(source.background_color())
            .scaled(target.scale());
        let created = self.surface.create_note(note).await?;

        let connectors = match self.surface.link(target.id(), created.id()).await {
            Ok(_) => 1,
            Err(e) => {
                warn!(note_id = %created.id(), error = %e, "Follow-up connector not created");
                0
            }
        };
        info!(persona = %persona.name, note_id = %created.id(), "Follow-up answered");
        Ok(Outcome::Completed(RunSummary {
            personas: 1,
            answers: 1,
            connectors,
            ..RunSummary::empty()
        }))
    }
}

/// Ends its chat sessions when dropped, whether the run completed, failed,
/// timed out or unwound.
struct SessionScope {
    generator: Arc<dyn Generator>,
    keys: Vec<String>,
}

impl SessionScope {
    fn new(generator: &Arc<dyn Generator>, keys: Vec<String>) -> Self {
        Self {
            generator: Arc::clone(generator),
            keys,
        }
    }
}

impl Drop for SessionScope {
    fn drop(&mut self) {
        for key in &self.keys {
            self.generator.end_session(key);
        }
    }
}

/// Ask once, then once more for a shorter version if over `char_limit`.
async fn ask(generator: Arc<dyn Generator>, request: TextRequest, char_limit: usize) -> Result<String> {
    let answer = generator.generate_text(&request).await?;
    if answer.chars().count() <= char_limit {
        return Ok(answer.trim().to_string());
    }

    let shorter = TextRequest {
        prompt: prompts::succinct(char_limit),
        ..request
    };
    let answer = generator.generate_text(&shorter).await?;
    Ok(answer.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{Trigger, colors_match};
    use crate::testing::{
        FakeSurface, SCRIPTED_PERSONAS, ScriptedGenerator, business_canvas, persona_canvas,
        question_note, trigger,
    };
    use crate::types::Location;
    use tokio::sync::mpsc;

    struct Harness {
        surface: Arc<FakeSurface>,
        generator: Arc<ScriptedGenerator>,
        gate: Arc<DebounceGate>,
        triggers: mpsc::UnboundedReceiver<Trigger>,
        cancel: CancellationToken,
        orchestrator: Arc<Orchestrator>,
    }

    fn harness(config: WorkflowConfig) -> Harness {
        let surface = Arc::new(FakeSurface::new());
        let generator = Arc::new(ScriptedGenerator::new());
        let (tx, triggers) = mpsc::unbounded_channel();
        let gate = DebounceGate::new(Duration::from_secs(2), tx);
        let cancel = CancellationToken::new();
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&surface) as Arc<dyn Surface>,
            Arc::clone(&generator) as Arc<dyn Generator>,
            ProcessingGuard::new(),
            Arc::clone(&gate),
            config,
            cancel.clone(),
        ));
        Harness {
            surface,
            generator,
            gate,
            triggers,
            cancel,
            orchestrator,
        }
    }

    async fn populated(config: WorkflowConfig) -> Harness {
        let h = harness(config);
        business_canvas(&h.surface).await;
        persona_canvas(&h.surface).await;
        h
    }

    fn titled(surface: &FakeSurface, prefix: &str) -> Vec<Entity> {
        surface
            .entities()
            .into_iter()
            .filter(|e| e.title().starts_with(prefix))
            .collect()
    }

    fn assert_cleaned_up(h: &Harness, id: &str) {
        assert!(h.orchestrator.guard().is_empty());
        assert!(h.orchestrator.helpers().is_empty());
        assert!(!h.gate.is_registered(id));
        assert!(titled(&h.surface, "Helper:").is_empty());
    }

    #[test]
    fn test_extract_question() {
        assert_eq!(extract_question("  Would you pay?  "), "Would you pay?");
        assert_eq!(
            extract_question("old --> Would you pay? Please wait while personas answer"),
            "Would you pay?"
        );
        assert_eq!(extract_question("a --> b --> Why?"), "Why?");
    }

    #[test]
    fn test_persona_from_answer_title() {
        assert_eq!(persona_from_answer_title("Ana Answer"), "Ana");
        assert_eq!(persona_from_answer_title("Ana Meta Answer"), "Ana");
        assert_eq!(persona_from_answer_title("Ana Followup Answer "), "Ana");
        assert_eq!(persona_from_answer_title("Ana"), "Ana");
    }

    #[test]
    fn test_outcome_from_error() {
        assert_eq!(
            Outcome::from(Error::MissingPrerequisite("none".into())),
            Outcome::MissingPrerequisites
        );
        let personas = Error::InsufficientResults {
            stage: "personas",
            succeeded: 0,
            required: 1,
        };
        assert_eq!(Outcome::from(personas), Outcome::MissingPrerequisites);
        let answers = Error::InsufficientResults {
            stage: "answers",
            succeeded: 0,
            required: 1,
        };
        assert_eq!(Outcome::from(answers).label(), "failed");
        assert_eq!(Outcome::from(Error::Cancelled), Outcome::Cancelled);
    }

    #[tokio::test]
    async fn test_question_runs_end_to_end() {
        let h = populated(WorkflowConfig::default()).await;
        let note = question_note(&h.surface, "Would you pay for a monthly plan?").await;

        let outcome = h.orchestrator.handle_question(trigger(&note)).await;
        let Outcome::Completed(summary) = outcome else {
            panic!("expected completion, got {:?}", outcome);
        };
        assert_eq!(summary.personas, 4);
        assert_eq!(summary.answers, 4);
        assert_eq!(summary.reactions, 4);
        assert_eq!(summary.connectors, 8);

        assert_eq!(h.surface.titled_with_suffix(" Meta Answer").len(), 4);
        assert_eq!(h.surface.titled_with_suffix(" Answer").len(), 8);
        assert_eq!(h.surface.count_kind(EntityKind::Connector), 8);
        assert_eq!(h.surface.count_kind(EntityKind::Anchor), 1);

        let anchor = h
            .surface
            .get_entity(summary.anchor_id.as_deref().unwrap())
            .await
            .unwrap();
        assert_eq!(anchor.anchor_name(), "Would you pay for a monthly plan? (Script Made)");
        assert_eq!(anchor.attrs["notes"].as_array().unwrap().len(), 8);

        let answer = &titled(&h.surface, "Ben Answer")[0];
        assert_eq!(answer.text(), "Ben would pay for that.");
        assert!(colors_match(answer.background_color(), layout::persona_color(1)));
        let reaction = &titled(&h.surface, "Ben Meta Answer")[0];
        assert_eq!(reaction.text(), "Ben still agrees.");

        let question = h.surface.get_entity(note.id()).await.unwrap();
        assert_eq!(question.background_color(), ANSWERED);
        assert_eq!(question.text(), "Would you pay for a monthly plan?");

        assert_eq!(h.generator.ended_sessions().len(), 4);
        assert_cleaned_up(&h, note.id());
    }

    #[tokio::test]
    async fn test_reactions_hear_peer_answers() {
        let h = populated(WorkflowConfig::default()).await;
        let note = question_note(&h.surface, "Why?").await;
        h.orchestrator.handle_question(trigger(&note)).await;

        let reaction = h
            .generator
            .requests()
            .into_iter()
            .find(|r| r.prompt.starts_with("Thank you Ana"))
            .unwrap();
        assert!(reaction.prompt.contains("Ben said: Ben would pay for that."));
        assert!(!reaction.prompt.contains("Ana said"));
        assert_eq!(reaction.session.as_deref(), Some(format!("{}/Ana", note.id()).as_str()));
    }

    #[tokio::test]
    async fn test_partial_success_still_completes() {
        let h = populated(WorkflowConfig::default()).await;
        for name in ["Ben", "Cleo", "Dev"] {
            h.generator.fail_persona(name);
        }
        let note = question_note(&h.surface, "Would you commute by bike?").await;

        let outcome = h.orchestrator.handle_question(trigger(&note)).await;
        let Outcome::Completed(summary) = outcome else {
            panic!("expected completion, got {:?}", outcome);
        };
        assert_eq!(summary.answers, 1);
        assert_eq!(summary.reactions, 1);
        assert_eq!(summary.connectors, 2);
        assert_eq!(h.surface.count_kind(EntityKind::Connector), 2);

        let anchor = h
            .surface
            .get_entity(summary.anchor_id.as_deref().unwrap())
            .await
            .unwrap();
        assert_eq!(anchor.attrs["notes"].as_array().unwrap().len(), 2);

        let lonely = h
            .generator
            .requests()
            .into_iter()
            .find(|r| r.prompt.starts_with("Thank you Ana"))
            .unwrap();
        assert!(lonely.prompt.contains(prompts::NO_PEER_RESPONSES));
    }

    #[tokio::test]
    async fn test_no_answers_fails_without_notes() {
        let h = populated(WorkflowConfig::default()).await;
        for name in SCRIPTED_PERSONAS {
            h.generator.fail_persona(name);
        }
        let note = question_note(&h.surface, "Would you commute by bike?").await;

        let outcome = h.orchestrator.handle_question(trigger(&note)).await;
        assert!(matches!(outcome, Outcome::Failed(ref reason) if reason.contains("answers")));
        assert!(h.surface.titled_with_suffix(" Answer").is_empty());
        assert_eq!(h.surface.count_kind(EntityKind::Anchor), 0);

        let notice = &titled(&h.surface, "Answer generation failed")[0];
        assert_eq!(notice.background_color(), FAILURE_COLOR);
        // Only the notice's own link survives.
        assert_eq!(h.surface.count_kind(EntityKind::Connector), 1);
        assert_cleaned_up(&h, note.id());
    }

    #[tokio::test]
    async fn test_panicking_answer_is_isolated() {
        let h = populated(WorkflowConfig::default()).await;
        h.generator.panic_persona("Cleo");
        let note = question_note(&h.surface, "Would you pay?").await;

        let outcome = h.orchestrator.handle_question(trigger(&note)).await;
        let Outcome::Completed(summary) = outcome else {
            panic!("expected completion, got {:?}", outcome);
        };
        assert_eq!(summary.answers, 3);
        assert_eq!(summary.reactions, 3);
        assert!(titled(&h.surface, "Cleo").is_empty());
    }

    #[tokio::test]
    async fn test_workflow_panic_releases_everything() {
        let h = harness(WorkflowConfig::default());
        business_canvas(&h.surface).await;
        h.generator.panic_always();
        let note = question_note(&h.surface, "Would you pay?").await;

        let outcome = h.orchestrator.handle_question(trigger(&note)).await;
        assert_eq!(outcome, Outcome::Panicked);
        assert_cleaned_up(&h, note.id());
    }

    #[tokio::test]
    async fn test_failed_run_ends_persona_sessions() {
        let h = populated(WorkflowConfig {
            min_reactions: 5,
            ..Default::default()
        })
        .await;
        let note = question_note(&h.surface, "Would you pay?").await;

        let outcome = h.orchestrator.handle_question(trigger(&note)).await;
        let Outcome::Failed(reason) = outcome else {
            panic!("expected failure, got {:?}", outcome);
        };
        assert!(reason.contains("reactions"));

        let mut ended = h.generator.ended_sessions();
        ended.sort();
        let expected: Vec<String> = SCRIPTED_PERSONAS
            .iter()
            .map(|name| run::session_key(note.id(), name))
            .collect();
        assert_eq!(ended, expected);
        assert_cleaned_up(&h, note.id());
    }

    #[tokio::test]
    async fn test_cancelled_run_ends_persona_sessions() {
        let h = populated(WorkflowConfig::default()).await;
        let note = question_note(&h.surface, "Would you pay?").await;
        let cancel = h.cancel.clone();
        h.generator.on_text_call(move || cancel.cancel());

        let outcome = h.orchestrator.handle_question(trigger(&note)).await;
        assert_eq!(outcome, Outcome::Cancelled);
        assert_eq!(h.generator.ended_sessions().len(), 4);
    }

    #[tokio::test]
    async fn test_long_answers_are_rephrased() {
        let h = populated(WorkflowConfig::default()).await;
        h.generator.verbose_persona("Ana");
        let note = question_note(&h.surface, "Would you pay?").await;

        h.orchestrator.handle_question(trigger(&note)).await;
        let answer = &titled(&h.surface, "Ana Answer")[0];
        assert_eq!(answer.text(), "Ana in short.");
        assert!(
            h.generator
                .requests()
                .iter()
                .any(|r| r.prompt == prompts::succinct(256))
        );
    }

    #[tokio::test]
    async fn test_already_processing() {
        let h = populated(WorkflowConfig::default()).await;
        let note = question_note(&h.surface, "Would you pay?").await;
        let claim = h.orchestrator.guard().claim(note.id()).unwrap();

        let outcome = h.orchestrator.handle_question(trigger(&note)).await;
        assert_eq!(outcome, Outcome::AlreadyProcessing);
        assert_eq!(h.generator.text_calls(), 0);
        assert!(h.orchestrator.guard().is_claimed(note.id()));

        drop(claim);
        assert!(h.orchestrator.guard().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_answers() {
        let h = populated(WorkflowConfig::default()).await;
        let note = question_note(&h.surface, "Would you pay?").await;
        h.cancel.cancel();

        let outcome = h.orchestrator.handle_question(trigger(&note)).await;
        assert_eq!(outcome, Outcome::Cancelled);
        assert_eq!(h.generator.text_calls(), 0);
        assert_cleaned_up(&h, note.id());
    }

    #[tokio::test]
    async fn test_missing_business_context() {
        let h = harness(WorkflowConfig::default());
        let note = question_note(&h.surface, "Would you pay?").await;

        let outcome = h.orchestrator.handle_question(trigger(&note)).await;
        assert_eq!(outcome, Outcome::MissingPrerequisites);
        assert_eq!(titled(&h.surface, "Missing Required Notes").len(), 1);
        assert_cleaned_up(&h, note.id());
    }

    #[tokio::test(start_paused = true)]
    async fn test_question_wait_times_out() {
        let config = WorkflowConfig {
            question_timeout_secs: 5,
            ..Default::default()
        };
        let h = populated(config).await;
        let note = question_note(&h.surface, "").await;

        let outcome = h.orchestrator.handle_question(trigger(&note)).await;
        assert_eq!(outcome, Outcome::TimedOut);

        let notice = &titled(&h.surface, "Question Wait Timed Out")[0];
        assert_eq!(notice.background_color(), NOTICE_COLOR);
        assert!(notice.text().contains("5 seconds"));
        assert_eq!(h.generator.text_calls(), 0);
        assert_cleaned_up(&h, note.id());
    }

    #[tokio::test(start_paused = true)]
    async fn test_detected_question_wakes_waiting_workflow() {
        let config = WorkflowConfig {
            poll_interval_ms: 600_000,
            ..Default::default()
        };
        let mut h = populated(config).await;
        let note = question_note(&h.surface, "").await;
        let started = Instant::now();

        let orchestrator = Arc::clone(&h.orchestrator);
        let first = trigger(&note);
        let task = tokio::spawn(async move { orchestrator.handle_question(first).await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(h.gate.is_registered(note.id()));
        let waiting = h.surface.get_entity(note.id()).await.unwrap();
        assert_eq!(waiting.background_color(), AMBER);
        assert_eq!(titled(&h.surface, HelperKind::AwaitingQuestion.title()).len(), 1);

        let edited = h.surface.set_text(note.id(), "Would you ride in winter?");
        h.gate.observe(note.id(), trigger(&edited));

        let outcome = task.await.unwrap();
        assert!(matches!(outcome, Outcome::Completed(_)));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(matches!(h.triggers.try_recv(), Ok(Trigger::QuestionTextDetected(_))));
        assert_cleaned_up(&h, note.id());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_waiting() {
        let h = populated(WorkflowConfig::default()).await;
        let note = question_note(&h.surface, "").await;

        let orchestrator = Arc::clone(&h.orchestrator);
        let first = trigger(&note);
        let task = tokio::spawn(async move { orchestrator.handle_question(first).await });

        tokio::time::sleep(Duration::from_secs(1)).await;
        h.cancel.cancel();
        assert_eq!(task.await.unwrap(), Outcome::Cancelled);
        assert_cleaned_up(&h, note.id());
    }

    #[tokio::test(start_paused = true)]
    async fn test_workflow_time_limit() {
        let config = WorkflowConfig {
            workflow_timeout_secs: 60,
            ..Default::default()
        };
        let h = populated(config).await;
        let note = question_note(&h.surface, "").await;

        let outcome = h.orchestrator.handle_question(trigger(&note)).await;
        assert!(matches!(outcome, Outcome::Failed(ref reason) if reason.contains("1 minutes")));
        assert_cleaned_up(&h, note.id());
    }

    #[tokio::test]
    async fn test_persona_setup_consumes_trigger() {
        let h = harness(WorkflowConfig::default());
        business_canvas(&h.surface).await;
        let setup = h
            .surface
            .create_note(NoteAttrs::titled("Create_Personas", ""))
            .await
            .unwrap();

        let outcome = h
            .orchestrator
            .handle_persona_setup(trigger(&setup), true)
            .await;
        let Outcome::Completed(summary) = outcome else {
            panic!("expected completion, got {:?}", outcome);
        };
        assert_eq!(summary.personas, 4);
        assert!(h.surface.get_entity(setup.id()).await.unwrap_err().is_not_found());
        assert_eq!(crate::persona::count_personas(&h.surface.entities()), 4);
    }

    #[tokio::test]
    async fn test_completion_image_keeps_trigger() {
        let h = harness(WorkflowConfig::default());
        business_canvas(&h.surface).await;
        let image = h
            .surface
            .upload_image(Vec::new(), NoteAttrs::titled("bac_complete.png", "").into_attributes())
            .await
            .unwrap();

        let outcome = h
            .orchestrator
            .handle_persona_setup(trigger(&image), false)
            .await;
        assert!(matches!(outcome, Outcome::Completed(_)));
        assert!(h.surface.get_entity(image.id()).await.is_ok());
    }

    async fn answer_note(h: &Harness) -> (Entity, Entity) {
        let answer = h
            .surface
            .create_note(
                NoteAttrs::titled("Ana Answer", "Ana would pay for that.")
                    .at(Location { x: 100.0, y: 100.0 }, crate::types::Size {
                        width: 200.0,
                        height: 100.0,
                    })
                    .color(layout::persona_color(0)),
            )
            .await
            .unwrap();
        let target = h
            .surface
            .create_note(
                NoteAttrs::titled("Followup", "What about winter?")
                    .at(Location { x: 500.0, y: 100.0 }, crate::types::Size {
                        width: 200.0,
                        height: 100.0,
                    }),
            )
            .await
            .unwrap();
        (answer, target)
    }

    #[tokio::test]
    async fn test_followup_connector() {
        let h = populated(WorkflowConfig::default()).await;
        let (answer, target) = answer_note(&h).await;
        let connector = h.surface.link(answer.id(), target.id()).await.unwrap();

        let outcome = h.orchestrator.handle_connector(trigger(&connector)).await;
        let Outcome::Completed(summary) = outcome else {
            panic!("expected completion, got {:?}", outcome);
        };
        assert_eq!(summary.connectors, 1);

        let followup = &titled(&h.surface, "Ana Followup Answer")[0];
        assert_eq!(followup.text(), "Ana would pay for that.");
        assert_eq!(followup.location().unwrap().x, 900.0);
        assert_eq!(h.surface.count_kind(EntityKind::Connector), 2);
        assert_eq!(h.generator.ended_sessions(), vec![format!("{}/Ana", target.id())]);
    }

    #[tokio::test]
    async fn test_unrelated_connector_is_ignored() {
        let h = populated(WorkflowConfig::default()).await;
        let (_, target) = answer_note(&h).await;
        let business = &titled(&h.surface, "CUSTOMER SEGMENTS")[0];
        let connector = h.surface.link(business.id(), target.id()).await.unwrap();

        let outcome = h.orchestrator.handle_connector(trigger(&connector)).await;
        assert_eq!(outcome, Outcome::Ignored);
        assert_eq!(h.generator.text_calls(), 0);
        assert!(h.orchestrator.guard().is_empty());
    }
}
