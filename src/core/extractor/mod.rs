//! Extractors turn one stimulus into one [`ExtractorResult`].
//!
//! 每个提取器声明自己接受的刺激类型，调度前先做类型检查；
//! 集合刺激（视频、派生视频）在不被直接支持时逐元素处理。

pub mod audio;
pub mod merge;
pub mod remote;
pub mod text;
pub mod vision;

use std::collections::HashSet;
use std::fmt;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::core::error::FeatureError;
use crate::core::stim::{Stim, StimInfo, StimKind};

pub use audio::{MeanAmplitudeExtractor, RmsExtractor};
pub use merge::{merge_results, Cell, Column, FeatureRow, FeatureTable, LongRecord};
pub use remote::{RemoteApiConfig, RemoteApiExtractor};
pub use text::{LengthExtractor, NumUniqueWordsExtractor};
pub use vision::{BrightnessExtractor, SharpnessExtractor};

/// A single extracted value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Vector(Vec<f64>),
}

impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureValue::Bool(v) => write!(f, "{v}"),
            FeatureValue::Int(v) => write!(f, "{v}"),
            FeatureValue::Float(v) => write!(f, "{v}"),
            FeatureValue::Text(v) => f.write_str(v),
            FeatureValue::Vector(v) => {
                let parts: Vec<String> = v.iter().map(|x| x.to_string()).collect();
                write!(f, "[{}]", parts.join(","))
            }
        }
    }
}

impl From<f64> for FeatureValue {
    fn from(v: f64) -> Self {
        FeatureValue::Float(v)
    }
}

impl From<f32> for FeatureValue {
    fn from(v: f32) -> Self {
        FeatureValue::Float(v as f64)
    }
}

impl From<i64> for FeatureValue {
    fn from(v: i64) -> Self {
        FeatureValue::Int(v)
    }
}

impl From<usize> for FeatureValue {
    fn from(v: usize) -> Self {
        FeatureValue::Int(v as i64)
    }
}

impl From<bool> for FeatureValue {
    fn from(v: bool) -> Self {
        FeatureValue::Bool(v)
    }
}

impl From<String> for FeatureValue {
    fn from(v: String) -> Self {
        FeatureValue::Text(v)
    }
}

impl From<&str> for FeatureValue {
    fn from(v: &str) -> Self {
        FeatureValue::Text(v.to_string())
    }
}

impl From<Vec<f64>> for FeatureValue {
    fn from(v: Vec<f64>) -> Self {
        FeatureValue::Vector(v)
    }
}

/// Features produced by one extractor on one stimulus, with provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractorResult {
    extractor_id: String,
    stim: StimInfo,
    features: Vec<(String, FeatureValue)>,
}

impl ExtractorResult {
    pub fn new(
        extractor_id: &str,
        stim: &Stim,
        features: Vec<(String, FeatureValue)>,
    ) -> Result<Self, FeatureError> {
        Self::from_info(extractor_id, stim.info(), features)
    }

    pub fn from_info(
        extractor_id: &str,
        stim: StimInfo,
        features: Vec<(String, FeatureValue)>,
    ) -> Result<Self, FeatureError> {
        let mut seen = HashSet::with_capacity(features.len());
        for (name, _) in &features {
            if !seen.insert(name.as_str()) {
                return Err(FeatureError::extraction_failed(
                    extractor_id,
                    format!("feature {name:?} emitted twice"),
                ));
            }
        }

        Ok(Self {
            extractor_id: extractor_id.to_string(),
            stim,
            features,
        })
    }

    pub fn extractor_id(&self) -> &str {
        &self.extractor_id
    }

    pub fn stim(&self) -> &StimInfo {
        &self.stim
    }

    pub fn features(&self) -> &[(String, FeatureValue)] {
        &self.features
    }

    pub fn feature_names(&self) -> impl Iterator<Item = &str> {
        self.features.iter().map(|(name, _)| name.as_str())
    }

    pub fn get(&self, feature: &str) -> Option<&FeatureValue> {
        self.features
            .iter()
            .find(|(name, _)| name == feature)
            .map(|(_, value)| value)
    }
}

/// Stateless transform from one stimulus to one result.
///
/// Implementations may hold configuration (credentials, model handles) but
/// must not depend on the order of `transform` calls; they are shared across
/// worker threads.
pub trait Extractor: Send + Sync {
    /// Stable identifier, used as the column prefix when merging.
    fn id(&self) -> &str;

    fn input_kinds(&self) -> &[StimKind];

    fn supports(&self, kind: StimKind) -> bool {
        self.input_kinds().iter().any(|k| kind.is_a(*k))
    }

    /// Raw feature values. Only called for supported kinds.
    fn extract(&self, stim: &Stim) -> Result<Vec<(String, FeatureValue)>, FeatureError>;

    fn transform(&self, stim: &Stim) -> Result<ExtractorResult, FeatureError> {
        if !self.supports(stim.kind()) {
            return Err(unsupported(self.id(), stim.kind()));
        }
        let features = self.extract(stim)?;
        ExtractorResult::new(self.id(), stim, features)
    }
}

pub(crate) fn unsupported(extractor: &str, kind: StimKind) -> FeatureError {
    FeatureError::UnsupportedStimulusType {
        extractor: extractor.to_string(),
        kind,
    }
}

/// Run `extractor` on `stim`, falling back to its elements for collections.
pub fn apply(extractor: &dyn Extractor, stim: &Stim) -> Result<Vec<ExtractorResult>, FeatureError> {
    if extractor.supports(stim.kind()) {
        return Ok(vec![extractor.transform(stim)?]);
    }

    let Some(collection) = stim.as_collection() else {
        return Err(unsupported(extractor.id(), stim.kind()));
    };

    debug!(
        "🔁 {} does not take {} stimuli, applying to elements of {}",
        extractor.id(),
        stim.kind(),
        stim.name()
    );
    let mut results = Vec::new();
    let mut visited = 0usize;
    let mut accepted = 0usize;
    for element in collection.iter_stims()? {
        let element = element?;
        visited += 1;
        match apply(extractor, &element) {
            Ok(element_results) => {
                accepted += 1;
                results.extend(element_results);
            }
            Err(FeatureError::UnsupportedStimulusType { .. }) => {
                debug!(
                    "⏭️ {} skips {} element {}",
                    extractor.id(),
                    element.kind(),
                    element.name()
                );
            }
            Err(err) => return Err(err),
        }
    }

    if visited > 0 && accepted == 0 {
        return Err(unsupported(extractor.id(), stim.kind()));
    }
    Ok(results)
}
