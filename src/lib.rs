pub mod api;
pub mod core;

pub use crate::core::error::FeatureError;
pub use crate::core::extractor::{apply, merge_results, Extractor, ExtractorResult, FeatureTable, FeatureValue};
pub use crate::core::stim::{Stim, StimKind};

pub fn init_logging() {
    #[cfg(target_os = "android")]
    {
        android_logger::init_once(
            android_logger::Config::default()
                .with_max_level(log::LevelFilter::Debug)
                .with_tag("featurekit"),
        );
    }

    #[cfg(not(target_os = "android"))]
    {
        // host applications install their own `log` backend
    }
}
