use std::collections::HashSet;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::llm::ImageGenerator;
use crate::state::Studio;

pub const DOWNLOAD_MIME_TYPE: &str = "image/png";

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadArtifact {
    pub record_id: String,
    pub file_name: String,
    pub mime_type: &'static str,
    pub bytes: Vec<u8>,
}

/// `meme-<prompt>.png` with whitespace runs and path separators replaced by `_`.
pub fn download_file_name(prompt: &str) -> String {
    let collapsed = WHITESPACE_RUN.replace_all(prompt, "_");
    let sanitized: String = collapsed
        .chars()
        .map(|ch| match ch {
            '/' | '\\' => '_',
            other => other,
        })
        .collect();
    format!("meme-{sanitized}.png")
}

/// Returns `download_file_name(prompt)`, or `meme-<prompt>-N.png` with the
/// smallest `N >= 2` when an earlier artifact in `taken` already uses it.
fn claim_file_name(prompt: &str, taken: &mut HashSet<String>) -> String {
    let name = download_file_name(prompt);
    if taken.insert(name.clone()) {
        return name;
    }
    let stem = name.trim_end_matches(".png");
    let mut suffix = 2;
    loop {
        let candidate = format!("{stem}-{suffix}.png");
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        suffix += 1;
    }
}

impl<G: ImageGenerator> Studio<G> {
    /// Flips membership of `id` in the export selection and returns whether it
    /// is selected afterwards. The id is not checked against the records.
    pub fn toggle_selection(&self, id: &str) -> bool {
        let mut state = self.lock();
        if let Some(index) = state.selection.iter().position(|existing| existing == id) {
            state.selection.remove(index);
            false
        } else {
            state.selection.push(id.to_string());
            true
        }
    }

    #[cfg(test)]
    pub fn selection(&self) -> Vec<String> {
        self.lock().selection.clone()
    }

    /// Builds one PNG artifact per selected id that still refers to a successful
    /// record; anything else in the selection is skipped.
    pub fn export_selected(&self) -> Vec<DownloadArtifact> {
        let chosen: Vec<_> = {
            let state = self.lock();
            state
                .selection
                .iter()
                .filter_map(|id| {
                    let record = state.find_record_by_id(id)?;
                    let image = record.image()?.clone();
                    Some((record.id.clone(), record.prompt.clone(), image))
                })
                .collect()
        };

        let mut artifacts = Vec::with_capacity(chosen.len());
        let mut taken = HashSet::with_capacity(chosen.len());
        for (record_id, prompt, image) in chosen {
            let bytes = match image.to_png_bytes() {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(record_id = %record_id, "Skipping export, PNG conversion failed: {}", err);
                    continue;
                }
            };
            debug!(record_id = %record_id, bytes = bytes.len(), "Prepared download");
            artifacts.push(DownloadArtifact {
                record_id,
                file_name: claim_file_name(&prompt, &mut taken),
                mime_type: DOWNLOAD_MIME_TYPE,
                bytes,
            });
        }
        artifacts
    }
}

pub async fn write_artifacts(
    export_dir: &Path,
    artifacts: &[DownloadArtifact],
) -> std::io::Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(export_dir).await?;
    let mut written = Vec::with_capacity(artifacts.len());
    for artifact in artifacts {
        let path = export_dir.join(&artifact.file_name);
        tokio::fs::write(&path, &artifact.bytes).await?;
        written.push(path);
    }
    info!(
        count = written.len(),
        dir = %export_dir.display(),
        "Exported selected variants"
    );
    Ok(written)
}
