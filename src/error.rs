use thiserror::Error;

use crate::llm::GenerationError;

/// Rejections of a user action that leave all stored state untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Please upload a photo first.")]
    NoSourceImage,

    #[error("Another generation is still running; wait for it to finish.")]
    GenerationInProgress,

    #[error("\"{0}\" is not one of the selected prompts.")]
    PromptNotSelected(String),

    #[error("\"{0}\" has already been generated for this photo.")]
    AlreadyGenerated(String),

    #[error("\"{0}\" is not in the expression list; add it first.")]
    UnknownPrompt(String),

    #[error("Prompt label must not be empty.")]
    EmptyPrompt,

    #[error("\"{0}\" already exists.")]
    DuplicatePrompt(String),

    #[error("Remove the {0} image before typing a {0} description.")]
    SlotHoldsImage(&'static str),
}

#[derive(Debug, Error)]
pub enum StudioError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Failed to read image file {path}.")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Photo restoration failed: {0}")]
    Restore(#[source] GenerationError),

    #[error("The photo changed while \"{0}\" was generating; the result was discarded.")]
    Superseded(String),
}

impl StudioError {
    pub fn is_validation(&self) -> bool {
        matches!(self, StudioError::Validation(_))
    }
}
