pub mod gemini;
pub mod generator;
pub mod media;

pub use gemini::GeminiImageClient;
pub use generator::{GenerationError, GenerationRequest, ImageGenerator};
pub use media::{load_image_file, ImageData};
