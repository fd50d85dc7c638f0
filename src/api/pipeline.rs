//! 特征提取流水线 - 注册提取器、批量运行、合并成表
//!
//! ```ignore
//! let pipeline = FeaturePipeline::new(PipelineConfig::lenient())?
//!     .with_extractor(BrightnessExtractor::new())?;
//! let table = pipeline.run(&stims)?;
//! table.write_csv(std::io::stdout())?;
//! ```

use std::fs;
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::core::batch::{run_batch, BatchOptions, BatchReport};
use crate::core::error::FeatureError;
use crate::core::extractor::{merge_results, Extractor, FeatureTable, RemoteApiConfig, RemoteApiExtractor};
use crate::core::stim::Stim;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub batch: BatchOptions,
    /// Remote API extractors registered when the pipeline is built.
    pub remote: Vec<RemoteApiConfig>,
}

impl PipelineConfig {
    /// Any failed item aborts the run.
    pub fn strict() -> Self {
        Self::default()
    }

    /// Failed API calls are logged and left as missing cells.
    pub fn lenient() -> Self {
        Self {
            batch: BatchOptions {
                continue_on_failure: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn from_json5_str(text: &str) -> Result<Self, FeatureError> {
        json5::from_str(text).map_err(|e| FeatureError::Config(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FeatureError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(FeatureError::NotFound(path.to_path_buf()));
        }
        debug!("📖 Reading pipeline config: {:?}", path);
        Self::from_json5_str(&fs::read_to_string(path)?)
    }
}

pub struct FeaturePipeline {
    config: PipelineConfig,
    extractors: Vec<Box<dyn Extractor>>,
}

impl FeaturePipeline {
    pub fn new(config: PipelineConfig) -> Result<Self, FeatureError> {
        crate::init_logging();

        let mut pipeline = Self {
            config,
            extractors: Vec::new(),
        };
        for remote in pipeline.config.remote.clone() {
            pipeline.add_extractor(Box::new(RemoteApiExtractor::new(remote)?))?;
        }

        info!(
            "🧰 FeaturePipeline: created with {} extractors",
            pipeline.extractors.len()
        );
        Ok(pipeline)
    }

    pub fn with_extractor(mut self, extractor: impl Extractor + 'static) -> Result<Self, FeatureError> {
        self.add_extractor(Box::new(extractor))?;
        Ok(self)
    }

    /// Ids double as column prefixes, so they must be unique.
    pub fn add_extractor(&mut self, extractor: Box<dyn Extractor>) -> Result<(), FeatureError> {
        if self.extractors.iter().any(|e| e.id() == extractor.id()) {
            return Err(FeatureError::Config(format!(
                "extractor {} registered twice",
                extractor.id()
            )));
        }
        debug!("➕ Registered {}", extractor.id());
        self.extractors.push(extractor);
        Ok(())
    }

    pub fn extractor_ids(&self) -> Vec<&str> {
        self.extractors.iter().map(|e| e.id()).collect()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Raw per-item results, without merging.
    pub fn extract(&self, stims: &[Stim]) -> Result<BatchReport, FeatureError> {
        if self.extractors.is_empty() {
            return Err(FeatureError::Config("no extractors registered".to_string()));
        }
        debug!("📥 FeaturePipeline: {} stimuli", stims.len());
        run_batch(&self.extractors, stims, &self.config.batch)
    }

    pub fn run(&self, stims: &[Stim]) -> Result<FeatureTable, FeatureError> {
        let report = self.extract(stims)?;
        let table = merge_results(&report.results)?;
        info!(
            "📊 FeaturePipeline: {} rows x {} columns",
            table.len(),
            table.columns().len()
        );
        Ok(table)
    }
}

impl Drop for FeaturePipeline {
    fn drop(&mut self) {
        debug!("🗑️ FeaturePipeline: released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::extractor::{
        BrightnessExtractor, Cell, FeatureValue, LengthExtractor, SharpnessExtractor,
    };
    use crate::core::stim::{DerivedVideoStim, ImageStim, MockDecoderBackend, TextStim, VideoStim};
    use image::{Rgba, RgbaImage};
    use std::sync::Arc;

    #[test]
    fn test_config_from_json5() {
        let config = PipelineConfig::from_json5_str(
            r#"{
                // comments and trailing commas are fine
                batch: { workers: 2, continue_on_failure: true },
                remote: [
                    { id: "vision_api", endpoint: "http://localhost:8080/v1", timeout_secs: 5, },
                ],
            }"#,
        )
        .unwrap();
        assert_eq!(config.batch.workers, Some(2));
        assert!(config.batch.continue_on_failure);
        assert_eq!(config.remote.len(), 1);
        assert_eq!(config.remote[0].timeout_secs, 5);
    }

    #[test]
    fn test_config_errors() {
        assert!(matches!(
            PipelineConfig::from_json5_str("{ batch: 3 }"),
            Err(FeatureError::Config(_))
        ));
        assert!(matches!(
            PipelineConfig::from_file("/nonexistent/pipeline.json5"),
            Err(FeatureError::NotFound(_))
        ));
        assert!(PipelineConfig::lenient().batch.continue_on_failure);
        assert!(!PipelineConfig::strict().batch.continue_on_failure);
    }

    #[test]
    fn test_duplicate_extractor_rejected() {
        let outcome = FeaturePipeline::new(PipelineConfig::default())
            .unwrap()
            .with_extractor(LengthExtractor::new())
            .unwrap()
            .with_extractor(LengthExtractor::new());
        assert!(matches!(outcome, Err(FeatureError::Config(_))));
    }

    #[test]
    fn test_remote_extractors_registered_from_config() {
        let config = PipelineConfig {
            remote: vec![RemoteApiConfig::new("vision_api", "http://localhost:1/")],
            ..Default::default()
        };
        let pipeline = FeaturePipeline::new(config).unwrap();
        assert_eq!(pipeline.extractor_ids(), vec!["vision_api"]);
    }

    #[test]
    fn test_run_without_extractors() {
        let pipeline = FeaturePipeline::new(PipelineConfig::default()).unwrap();
        assert!(matches!(pipeline.run(&[]), Err(FeatureError::Config(_))));
    }

    #[test]
    fn test_video_frames_and_images_in_one_table() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let backend = Arc::new(MockDecoderBackend::new(2.0, 4, 4, 1.5));
        let video = VideoStim::open(file.path(), backend, None)
            .unwrap()
            .with_name("clip.mp4");
        let still = ImageStim::new(RgbaImage::from_pixel(4, 4, Rgba([255, 255, 255, 255])), Some(0.25), None)
            .unwrap()
            .with_name("still.png");

        let pipeline = FeaturePipeline::new(PipelineConfig::default())
            .unwrap()
            .with_extractor(BrightnessExtractor::new())
            .unwrap()
            .with_extractor(SharpnessExtractor::new())
            .unwrap();
        let table = pipeline.run(&[video.into(), still.into()]).unwrap();

        let names: Vec<&str> = table.rows().iter().map(|r| r.stim.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["clip.mp4->frame[0]", "still.png", "clip.mp4->frame[1]", "clip.mp4->frame[2]"]
        );
        assert_eq!(
            table.column_names().collect::<Vec<_>>(),
            vec!["BrightnessExtractor_brightness", "SharpnessExtractor_sharpness"]
        );
        assert!(table.rows().iter().all(|r| r.cells.iter().all(|c| !c.is_missing())));
    }

    #[test]
    fn test_mixed_modalities_leave_missing_cells() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let backend = Arc::new(MockDecoderBackend::new(4.0, 4, 4, 1.0));
        let video = VideoStim::open(file.path(), backend, None)
            .unwrap()
            .with_name("clip.mp4");
        let derived = DerivedVideoStim::from_keyframes(video, &[0, 2]).unwrap();
        let caption = TextStim::new("a red frame", Some(0.1), Some(1.0))
            .unwrap()
            .with_name("caption");

        let config = PipelineConfig {
            batch: BatchOptions {
                workers: Some(2),
                ..Default::default()
            },
            ..Default::default()
        };
        let pipeline = FeaturePipeline::new(config)
            .unwrap()
            .with_extractor(BrightnessExtractor::new())
            .unwrap()
            .with_extractor(LengthExtractor::new())
            .unwrap();
        let table = pipeline.run(&[derived.into(), caption.into()]).unwrap();

        let names: Vec<&str> = table.rows().iter().map(|r| r.stim.name.as_str()).collect();
        assert_eq!(names, vec!["clip.mp4->frame[0]", "caption", "clip.mp4->frame[2]"]);

        assert!(table.get(0, "LengthExtractor_text_length").unwrap().is_missing());
        assert!(table.get(1, "BrightnessExtractor_brightness").unwrap().is_missing());
        assert_eq!(
            table.get(1, "LengthExtractor_text_length"),
            Some(&Cell::Value(FeatureValue::Int(11)))
        );
        // keyframe durations span to the next keyframe / end of clip
        assert_eq!(table.rows()[0].stim.duration, Some(0.5));
        assert_eq!(table.rows()[2].stim.duration, Some(0.5));
    }
}
