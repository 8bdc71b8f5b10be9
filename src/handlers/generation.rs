use std::future::Future;

use tracing::{info, warn};

use crate::error::{StudioError, ValidationError};
use crate::llm::generator::RESTORE_LABEL;
use crate::llm::{GenerationError, GenerationRequest, ImageData, ImageGenerator};
use crate::prompts::compose;
use crate::state::{GenerationRecord, InFlight, Outcome, Studio};

impl<G: ImageGenerator> Studio<G> {
    /// Generates (or retries) the variant for one selected prompt.
    ///
    /// Validation failures leave every record untouched. Model failures are
    /// stored as a failed record for the prompt and returned as `Ok`, since the
    /// request itself was accepted.
    pub async fn request_generation(&self, prompt: &str) -> Result<GenerationRecord, StudioError> {
        let (request, record_id, version) = {
            let mut state = self.lock();
            let source = state
                .source
                .as_ref()
                .map(|source| source.image.clone())
                .ok_or(ValidationError::NoSourceImage)?;
            if state.in_flight.is_some() {
                return Err(ValidationError::GenerationInProgress.into());
            }
            if !state.catalog.is_selected(prompt) {
                return Err(ValidationError::PromptNotSelected(prompt.to_string()).into());
            }
            if state
                .records
                .get(prompt)
                .is_some_and(GenerationRecord::is_success)
            {
                return Err(ValidationError::AlreadyGenerated(prompt.to_string()).into());
            }

            let composed = compose(
                prompt,
                &state.action,
                &state.background,
                &state.clothing,
                state.consistency_enhanced,
            );
            let record_id = state.next_record_id(prompt);
            state.put_record(GenerationRecord {
                id: record_id.clone(),
                prompt: prompt.to_string(),
                outcome: Outcome::Pending,
            });
            state.in_flight = Some(InFlight::Prompt(prompt.to_string()));

            let request = GenerationRequest::new(
                prompt,
                source,
                composed.instruction,
                composed.attachments,
            );
            (request, record_id, state.source_version)
        };

        info!(
            prompt = %prompt,
            record_id = %record_id,
            attachments = request.attachments.len(),
            "Generation started"
        );
        let result = self
            .with_timeout(prompt, self.generator.generate(request))
            .await;

        let mut state = self.lock();
        state.in_flight = None;
        if state.source_version != version {
            warn!(prompt = %prompt, "Discarding generation result for a replaced photo");
            return Err(StudioError::Superseded(prompt.to_string()));
        }

        let outcome = match result {
            Ok(image) => {
                info!(prompt = %prompt, record_id = %record_id, bytes = image.len(), "Generation succeeded");
                Outcome::Success(image)
            }
            Err(err) => {
                warn!(prompt = %prompt, record_id = %record_id, "Generation failed: {}", err);
                Outcome::Failure(err.to_string())
            }
        };
        let record = GenerationRecord {
            id: record_id,
            prompt: prompt.to_string(),
            outcome,
        };
        state.put_record(record.clone());
        Ok(record)
    }

    /// Restores the uploaded photo in place. Success replaces the source image
    /// and invalidates every generated variant, which were derived from the
    /// pre-restoration photo.
    pub async fn request_restore(&self) -> Result<(), StudioError> {
        let (source, version) = {
            let mut state = self.lock();
            let source = state
                .source
                .as_ref()
                .map(|source| source.image.clone())
                .ok_or(ValidationError::NoSourceImage)?;
            if state.in_flight.is_some() {
                return Err(ValidationError::GenerationInProgress.into());
            }
            state.in_flight = Some(InFlight::Restore);
            (source, state.source_version)
        };

        info!(bytes = source.len(), "Restoration started");
        let result = self
            .with_timeout(RESTORE_LABEL, self.generator.restore(source))
            .await;

        let mut state = self.lock();
        state.in_flight = None;
        if state.source_version != version {
            warn!("Discarding restoration result for a replaced photo");
            return Err(StudioError::Superseded(RESTORE_LABEL.to_string()));
        }

        let restored = result.map_err(|err| {
            warn!("Restoration failed: {}", err);
            StudioError::Restore(err)
        })?;

        let invalidated = state.records.len();
        if let Some(mut source) = state.source.take() {
            source.image = restored;
            source.restored = true;
            state.replace_source(source);
        }
        info!(invalidated, "Restoration succeeded; previous variants cleared");
        Ok(())
    }

    async fn with_timeout<F>(&self, label: &str, call: F) -> Result<ImageData, GenerationError>
    where
        F: Future<Output = Result<ImageData, GenerationError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    label = %label,
                    timeout_s = self.timeout.as_secs_f64(),
                    "Image model call timed out"
                );
                Err(GenerationError::TimedOut(label.to_string()))
            }
        }
    }
}
