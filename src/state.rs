use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, MutexGuard};

use crate::llm::media::{ImageData, MediaType};
use crate::llm::ImageGenerator;
use crate::prompts::{AuxiliaryAsset, ExpressionCatalog};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Pending,
    Success(ImageData),
    Failure(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRecord {
    pub id: String,
    pub prompt: String,
    pub outcome: Outcome,
}

impl GenerationRecord {
    pub fn image(&self) -> Option<&ImageData> {
        match &self.outcome {
            Outcome::Success(image) => Some(image),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.image().is_some()
    }
}

/// The single exclusive operation that may be waiting on the image model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InFlight {
    Prompt(String),
    Restore,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptStatus {
    Idle,
    Generating,
    Done,
    Error(String),
}

#[derive(Debug, Clone)]
pub struct SourceImage {
    pub name: String,
    pub image: ImageData,
    pub restored: bool,
}

#[derive(Debug, Default)]
pub struct StudioState {
    pub(crate) source: Option<SourceImage>,
    // Bumped whenever the source image changes; results computed against an
    // older version are discarded.
    pub(crate) source_version: u64,
    pub(crate) background: AuxiliaryAsset,
    pub(crate) clothing: AuxiliaryAsset,
    pub(crate) action: String,
    pub(crate) consistency_enhanced: bool,
    pub(crate) catalog: ExpressionCatalog,
    pub(crate) records: HashMap<String, GenerationRecord>,
    pub(crate) selection: Vec<String>,
    pub(crate) in_flight: Option<InFlight>,
    last_id_millis: i64,
}

impl StudioState {
    pub fn new(catalog: ExpressionCatalog) -> Self {
        StudioState {
            catalog,
            ..StudioState::default()
        }
    }

    /// `<prompt>-<unix millis>`, bumped past the previous id so two attempts in
    /// the same millisecond stay distinct.
    pub(crate) fn next_record_id(&mut self, prompt: &str) -> String {
        let millis = Utc::now().timestamp_millis().max(self.last_id_millis + 1);
        self.last_id_millis = millis;
        format!("{prompt}-{millis}")
    }

    /// Stores the record for its prompt, dropping the replaced record's id from
    /// the export selection.
    pub(crate) fn put_record(&mut self, record: GenerationRecord) {
        let new_id = record.id.clone();
        if let Some(previous) = self.records.insert(record.prompt.clone(), record) {
            if previous.id != new_id {
                self.selection.retain(|id| id != &previous.id);
            }
        }
    }

    pub(crate) fn clear_results(&mut self) {
        self.records.clear();
        self.selection.clear();
    }

    pub(crate) fn replace_source(&mut self, source: SourceImage) {
        self.source = Some(source);
        self.source_version += 1;
        self.clear_results();
    }

    pub fn status(&self, prompt: &str) -> PromptStatus {
        if matches!(&self.in_flight, Some(InFlight::Prompt(active)) if active == prompt) {
            return PromptStatus::Generating;
        }
        match self.records.get(prompt).map(|record| &record.outcome) {
            Some(Outcome::Success(_)) => PromptStatus::Done,
            Some(Outcome::Failure(message)) => PromptStatus::Error(message.clone()),
            Some(Outcome::Pending) | None => PromptStatus::Idle,
        }
    }

    pub(crate) fn find_record_by_id(&self, id: &str) -> Option<&GenerationRecord> {
        self.records.values().find(|record| record.id == id)
    }
}

#[derive(Debug, Clone)]
pub struct SourceSummary {
    pub name: String,
    pub media_type: MediaType,
    pub bytes: usize,
    pub restored: bool,
}

#[derive(Debug, Clone)]
pub struct PromptRow {
    pub label: String,
    pub selected: bool,
    pub custom: bool,
    pub status: PromptStatus,
    pub record_id: Option<String>,
}

/// Read-only view of the studio for rendering.
#[derive(Debug, Clone)]
pub struct StudioSnapshot {
    pub source: Option<SourceSummary>,
    pub background: String,
    pub clothing: String,
    pub action: String,
    pub consistency_enhanced: bool,
    pub prompts: Vec<PromptRow>,
    pub in_flight: Option<InFlight>,
    pub selection: Vec<String>,
}

/// Owns all session state. Every mutation goes through a `Studio` method;
/// clones share the same state.
pub struct Studio<G> {
    pub(crate) state: Arc<Mutex<StudioState>>,
    pub(crate) generator: Arc<G>,
    pub(crate) timeout: Duration,
}

impl<G> Clone for Studio<G> {
    fn clone(&self) -> Self {
        Studio {
            state: Arc::clone(&self.state),
            generator: Arc::clone(&self.generator),
            timeout: self.timeout,
        }
    }
}

impl<G: ImageGenerator> Studio<G> {
    pub fn new<I, S>(generator: G, expressions: I, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Studio {
            state: Arc::new(Mutex::new(StudioState::new(ExpressionCatalog::new(
                expressions,
            )))),
            generator: Arc::new(generator),
            timeout,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, StudioState> {
        self.state.lock()
    }

    #[cfg(test)]
    pub fn is_busy(&self) -> bool {
        self.lock().in_flight.is_some()
    }

    pub fn in_flight(&self) -> Option<InFlight> {
        self.lock().in_flight.clone()
    }

    #[cfg(test)]
    pub fn status(&self, prompt: &str) -> PromptStatus {
        self.lock().status(prompt)
    }

    pub fn record(&self, prompt: &str) -> Option<GenerationRecord> {
        self.lock().records.get(prompt).cloned()
    }

    #[cfg(test)]
    pub fn records(&self) -> Vec<GenerationRecord> {
        let mut records: Vec<_> = self.lock().records.values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    #[cfg(test)]
    pub fn source_image(&self) -> Option<ImageData> {
        self.lock().source.as_ref().map(|source| source.image.clone())
    }

    pub fn snapshot(&self) -> StudioSnapshot {
        let state = self.lock();
        let prompts = state
            .catalog
            .all()
            .map(|label| PromptRow {
                label: label.to_string(),
                selected: state.catalog.is_selected(label),
                custom: state.catalog.is_custom(label),
                status: state.status(label),
                record_id: state.records.get(label).map(|record| record.id.clone()),
            })
            .collect();

        StudioSnapshot {
            source: state.source.as_ref().map(|source| SourceSummary {
                name: source.name.clone(),
                media_type: source.image.media_type(),
                bytes: source.image.len(),
                restored: source.restored,
            }),
            background: state.background.describe(),
            clothing: state.clothing.describe(),
            action: state.action.clone(),
            consistency_enhanced: state.consistency_enhanced,
            prompts,
            in_flight: state.in_flight.clone(),
            selection: state.selection.clone(),
        }
    }
}
