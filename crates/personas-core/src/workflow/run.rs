//! Per-run state: fixed-size slot arrays filled in by each fan-out stage.

use crate::error::{Error, Result};
use crate::persona::panic_message;
use crate::types::Persona;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use uuid::Uuid;

/// One fan-out task's outcome
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Slot {
    pub result: Option<String>,
    pub error: Option<String>,
}

impl Slot {
    /// Non-empty result and no error.
    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.result.as_deref().is_some_and(|r| !r.trim().is_empty())
    }
}

/// Slots of one stage plus the id of the entity created for each slot
#[derive(Debug, Clone)]
pub struct Stage {
    slots: Vec<Slot>,
    entity_ids: Vec<Option<String>>,
}

impl Stage {
    pub fn new(len: usize) -> Self {
        Self {
            slots: vec![Slot::default(); len],
            entity_ids: vec![None; len],
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index)
    }

    /// Store the fan-in results, index for index. Extra results are ignored.
    pub fn record(&mut self, results: Vec<Result<String>>) {
        for (index, result) in results.into_iter().enumerate() {
            self.record_at(index, result);
        }
    }

    pub fn record_at(&mut self, index: usize, result: Result<String>) {
        if let Some(slot) = self.slots.get_mut(index) {
            match result {
                Ok(text) => slot.result = Some(text),
                Err(e) => slot.error = Some(e.to_string()),
            }
        }
    }

    pub fn fail(&mut self, index: usize, error: impl std::fmt::Display) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.error = Some(error.to_string());
        }
    }

    pub fn result(&self, index: usize) -> Option<&str> {
        self.slots
            .get(index)
            .filter(|s| s.succeeded())
            .and_then(|s| s.result.as_deref())
    }

    pub fn succeeded(&self) -> Vec<usize> {
        (0..self.slots.len())
            .filter(|&i| self.slots[i].succeeded())
            .collect()
    }

    pub fn success_count(&self) -> usize {
        self.slots.iter().filter(|s| s.succeeded()).count()
    }

    pub fn set_entity(&mut self, index: usize, id: impl Into<String>) {
        if let Some(entry) = self.entity_ids.get_mut(index) {
            *entry = Some(id.into());
        }
    }

    pub fn entity(&self, index: usize) -> Option<&str> {
        self.entity_ids.get(index).and_then(|e| e.as_deref())
    }

    /// Slots whose result made it onto the canvas.
    pub fn materialised(&self) -> Vec<usize> {
        (0..self.slots.len())
            .filter(|&i| self.slots[i].succeeded() && self.entity_ids[i].is_some())
            .collect()
    }

    pub fn entity_ids(&self) -> Vec<String> {
        self.entity_ids.iter().flatten().cloned().collect()
    }
}

/// State of one question workflow
#[derive(Debug, Clone)]
pub struct WorkflowRun {
    pub run_id: Uuid,
    pub question_id: String,
    pub question: String,
    pub started_at: DateTime<Utc>,
    pub personas: Vec<Persona>,
    pub answers: Stage,
    pub reactions: Stage,
}

impl WorkflowRun {
    pub fn new(question_id: impl Into<String>, question: impl Into<String>, personas: Vec<Persona>) -> Self {
        let len = personas.len();
        Self {
            run_id: Uuid::new_v4(),
            question_id: question_id.into(),
            question: question.into(),
            started_at: Utc::now(),
            personas,
            answers: Stage::new(len),
            reactions: Stage::new(len),
        }
    }

    /// Chat session key for the persona in slot `index`.
    pub fn session(&self, index: usize) -> String {
        session_key(&self.question_id, &self.personas[index].name)
    }

    /// Name and answer of every materialised answer except `index`.
    pub fn peers_of(&self, index: usize) -> Vec<(String, String)> {
        self.answers
            .materialised()
            .into_iter()
            .filter(|&i| i != index)
            .filter_map(|i| {
                let answer = self.answers.result(i)?;
                Some((self.personas[i].name.clone(), answer.to_string()))
            })
            .collect()
    }
}

pub fn session_key(question_id: &str, persona_name: &str) -> String {
    format!("{}/{}", question_id, persona_name)
}

/// What a finished run produced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub personas: usize,
    pub answers: usize,
    pub reactions: usize,
    pub connectors: usize,
    pub anchor_id: Option<String>,
}

impl RunSummary {
    pub fn empty() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            personas: 0,
            answers: 0,
            reactions: 0,
            connectors: 0,
            anchor_id: None,
        }
    }
}

impl From<&WorkflowRun> for RunSummary {
    fn from(run: &WorkflowRun) -> Self {
        Self {
            run_id: run.run_id,
            started_at: run.started_at,
            personas: run.personas.len(),
            answers: run.answers.materialised().len(),
            reactions: run.reactions.materialised().len(),
            connectors: 0,
            anchor_id: None,
        }
    }
}

/// Spawn one task per input and collect every result in input order.
///
/// A panicking task becomes an [`Error::Panic`] in its own slot; siblings
/// are never cancelled.
pub async fn fan_out<I, T, F, Fut>(inputs: Vec<I>, task: F) -> Vec<Result<T>>
where
    F: Fn(usize, I) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let handles: Vec<_> = inputs
        .into_iter()
        .enumerate()
        .map(|(i, input)| tokio::spawn(task(i, input)))
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(match handle.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(Error::Panic(panic_message(&*e.into_panic()))),
            Err(_) => Err(Error::Cancelled),
        });
    }
    results
}
