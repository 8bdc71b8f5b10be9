use std::future::Future;

use crate::llm::media::ImageData;

pub const RESTORE_LABEL: &str = "photo restoration";

pub const RESTORE_INSTRUCTION: &str = "Restore this old photo. Remove scratches, creases, stains, \
     dust and noise, repair torn or missing areas, and sharpen blurry details. If the photo is \
     black-and-white or faded, colorize it with natural, realistic colors. Preserve every \
     person's identity, facial features and expression, and keep the original composition, \
     framing and pose unchanged.";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("The model response did not contain an image.")]
    NoImageInResponse,

    #[error("Failed to generate \"{0}\", please retry.")]
    GenerationFailed(String),

    #[error("Generating \"{0}\" timed out, please retry.")]
    TimedOut(String),
}

/// One call to the image model: the source photo, the instruction, and any
/// auxiliary reference images in the order the instruction refers to them.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub label: String,
    pub source: ImageData,
    pub instruction: String,
    pub attachments: Vec<ImageData>,
}

impl GenerationRequest {
    pub fn new(
        label: impl Into<String>,
        source: ImageData,
        instruction: impl Into<String>,
        attachments: Vec<ImageData>,
    ) -> Self {
        Self {
            label: label.into(),
            source,
            instruction: instruction.into(),
            attachments,
        }
    }

    pub fn restoration(source: ImageData) -> Self {
        Self::new(RESTORE_LABEL, source, RESTORE_INSTRUCTION, Vec::new())
    }

    /// Source first, then attachments in order.
    pub fn images(&self) -> impl Iterator<Item = &ImageData> {
        std::iter::once(&self.source).chain(self.attachments.iter())
    }
}

pub trait ImageGenerator: Send + Sync + 'static {
    fn generate(
        &self,
        request: GenerationRequest,
    ) -> impl Future<Output = Result<ImageData, GenerationError>> + Send;

    fn restore(
        &self,
        source: ImageData,
    ) -> impl Future<Output = Result<ImageData, GenerationError>> + Send {
        self.generate(GenerationRequest::restoration(source))
    }
}
