pub mod catalog;
pub mod composer;

pub use catalog::ExpressionCatalog;
pub use composer::{compose, AuxiliaryAsset};
