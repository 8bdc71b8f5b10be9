pub mod generation;
pub mod inputs;
pub mod selection;

#[cfg(test)]
pub(crate) mod test_support;

pub use inputs::{Slot, UploadOutcome};
pub use selection::write_artifacts;
