use std::path::Path;

use tracing::info;

use crate::error::{StudioError, ValidationError};
use crate::llm::{load_image_file, ImageData, ImageGenerator};
use crate::prompts::AuxiliaryAsset;
use crate::state::{SourceImage, StudioState, Studio};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Background,
    Clothing,
}

impl Slot {
    pub const fn as_str(self) -> &'static str {
        match self {
            Slot::Background => "background",
            Slot::Clothing => "clothing",
        }
    }

    fn asset_mut(self, state: &mut StudioState) -> &mut AuxiliaryAsset {
        match self {
            Slot::Background => &mut state.background,
            Slot::Clothing => &mut state.clothing,
        }
    }
}

/// Whether an upload was taken or ignored because the file is not a supported
/// image type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Accepted,
    Ignored,
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

impl<G: ImageGenerator> Studio<G> {
    /// Installs a new source photo. Every prior variant, the export selection and
    /// the picked prompts belong to the old photo and are cleared.
    pub fn replace_source(&self, name: &str, image: ImageData) {
        let mut state = self.lock();
        let cleared = state.records.len();
        state.replace_source(SourceImage {
            name: name.to_string(),
            image,
            restored: false,
        });
        state.catalog.clear_selection();
        info!(name = %name, cleared, "Source photo replaced");
    }

    pub async fn upload_source(&self, path: &Path) -> Result<UploadOutcome, StudioError> {
        match load_image_file(path).await? {
            Some(image) => {
                self.replace_source(&display_name(path), image);
                Ok(UploadOutcome::Accepted)
            }
            None => Ok(UploadOutcome::Ignored),
        }
    }

    pub fn set_aux_text(&self, slot: Slot, text: &str) -> Result<(), ValidationError> {
        let mut state = self.lock();
        let asset = slot.asset_mut(&mut state);
        if !asset.text_editable() {
            return Err(ValidationError::SlotHoldsImage(slot.as_str()));
        }
        *asset = AuxiliaryAsset::from_text(text);
        Ok(())
    }

    pub fn set_aux_image(&self, slot: Slot, image: ImageData) {
        let mut state = self.lock();
        *slot.asset_mut(&mut state) = AuxiliaryAsset::Image(image);
    }

    pub async fn upload_aux(&self, slot: Slot, path: &Path) -> Result<UploadOutcome, StudioError> {
        match load_image_file(path).await? {
            Some(image) => {
                self.set_aux_image(slot, image);
                info!(slot = slot.as_str(), path = %path.display(), "Reference image set");
                Ok(UploadOutcome::Accepted)
            }
            None => Ok(UploadOutcome::Ignored),
        }
    }

    pub fn clear_aux(&self, slot: Slot) {
        let mut state = self.lock();
        *slot.asset_mut(&mut state) = AuxiliaryAsset::Empty;
    }

    #[cfg(test)]
    pub fn aux(&self, slot: Slot) -> AuxiliaryAsset {
        let mut state = self.lock();
        slot.asset_mut(&mut state).clone()
    }

    pub fn set_action(&self, action: &str) {
        self.lock().action = action.trim().to_string();
    }

    pub fn set_consistency(&self, enhanced: bool) {
        self.lock().consistency_enhanced = enhanced;
    }

    pub fn add_custom_prompt(&self, label: &str) -> Result<String, ValidationError> {
        let mut state = self.lock();
        if state.source.is_none() {
            return Err(ValidationError::NoSourceImage);
        }
        state.catalog.add_custom(label)
    }

    /// Returns whether the prompt is selected after the toggle.
    pub fn toggle_prompt(&self, label: &str) -> Result<bool, ValidationError> {
        let mut state = self.lock();
        if state.source.is_none() {
            return Err(ValidationError::NoSourceImage);
        }
        state.catalog.toggle_selected(label)
    }

    #[cfg(test)]
    pub fn selected_prompts(&self) -> Vec<String> {
        self.lock().catalog.selected().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::{studio_with, ScriptedGenerator};
    use crate::llm::media::fixtures;
    use crate::state::Outcome;

    #[tokio::test]
    async fn new_upload_clears_results_selection_and_prompts() {
        let studio = studio_with(ScriptedGenerator::new(vec![Ok(fixtures::png(3))]));
        studio.replace_source("a.png", fixtures::png(1));
        studio.toggle_prompt("smile").unwrap();
        let record = studio.request_generation("smile").await.unwrap();
        assert!(matches!(record.outcome, Outcome::Success(_)));
        studio.toggle_selection(&record.id);

        let path = std::env::temp_dir().join(format!("meme-studio-upload-{}.png", std::process::id()));
        tokio::fs::write(&path, fixtures::png(2).bytes()).await.unwrap();
        let outcome = studio.upload_source(&path).await.unwrap();
        let _ = tokio::fs::remove_file(&path).await;

        assert_eq!(outcome, UploadOutcome::Accepted);
        assert!(studio.records().is_empty());
        assert!(studio.selection().is_empty());
        assert!(studio.selected_prompts().is_empty());
        assert_eq!(studio.source_image(), Some(fixtures::png(2)));
    }

    #[tokio::test]
    async fn failed_or_ignored_upload_leaves_state_alone() {
        let studio = studio_with(ScriptedGenerator::default());
        studio.replace_source("a.png", fixtures::png(1));
        studio.toggle_prompt("smile").unwrap();

        let err = studio
            .upload_source(Path::new("/no/such/photo.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, StudioError::FileRead { .. }));

        let path = std::env::temp_dir().join(format!("meme-studio-upload-{}.gif", std::process::id()));
        tokio::fs::write(&path, b"GIF89a\x01\x00\x01\x00\x00\x00\x00;").await.unwrap();
        let outcome = studio.upload_source(&path).await.unwrap();
        let _ = tokio::fs::remove_file(&path).await;

        assert_eq!(outcome, UploadOutcome::Ignored);
        assert_eq!(studio.source_image(), Some(fixtures::png(1)));
        assert_eq!(studio.selected_prompts(), vec!["smile".to_string()]);
    }

    #[test]
    fn image_slot_rejects_text_until_cleared() {
        let studio = studio_with(ScriptedGenerator::default());
        studio.set_aux_text(Slot::Background, "on a beach").unwrap();
        assert_eq!(
            studio.aux(Slot::Background),
            AuxiliaryAsset::Text("on a beach".to_string())
        );

        studio.set_aux_image(Slot::Background, fixtures::png(4));
        assert_eq!(
            studio.set_aux_text(Slot::Background, "city"),
            Err(ValidationError::SlotHoldsImage("background"))
        );
        assert_eq!(studio.aux(Slot::Clothing), AuxiliaryAsset::Empty);

        studio.clear_aux(Slot::Background);
        studio.set_aux_text(Slot::Background, "city").unwrap();
        assert_eq!(studio.aux(Slot::Background).text(), Some("city"));
    }

    #[test]
    fn prompts_require_a_photo() {
        let studio = studio_with(ScriptedGenerator::default());
        assert_eq!(studio.toggle_prompt("smile"), Err(ValidationError::NoSourceImage));
        assert_eq!(
            studio.add_custom_prompt("yawning"),
            Err(ValidationError::NoSourceImage)
        );

        studio.replace_source("a.png", fixtures::png(1));
        assert_eq!(studio.add_custom_prompt("yawning"), Ok("yawning".to_string()));
        assert_eq!(studio.selected_prompts(), vec!["yawning".to_string()]);
    }
}
