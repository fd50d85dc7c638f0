pub mod batch;
pub mod error;
pub mod extractor;
pub mod stim;

pub use error::FeatureError;
