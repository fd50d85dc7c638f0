//! Generic extractor backed by a remote JSON API.
//!
//! 任何网络/状态码/响应格式错误都归类为 ExtractionFailed，
//! 不向调用方暴露底层传输错误。

use std::io::Cursor;
use std::time::Duration;

use image::{DynamicImage, ImageOutputFormat};
use log::{debug, error};
use reqwest::blocking::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{Extractor, FeatureValue};
use crate::core::error::FeatureError;
use crate::core::stim::{Stim, StimKind};

fn default_timeout_secs() -> u64 {
    30
}

fn default_input_kinds() -> Vec<StimKind> {
    vec![StimKind::Text, StimKind::Image]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteApiConfig {
    /// Extractor id, also the column prefix in merged tables.
    pub id: String,
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_input_kinds")]
    pub input_kinds: Vec<StimKind>,
}

impl RemoteApiConfig {
    pub fn new(id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
            input_kinds: default_input_kinds(),
        }
    }
}

/// Posts the stimulus to `endpoint` and reads a flat JSON object of features back.
///
/// Text and audio go out as JSON, images as a PNG body. The stimulus name and
/// timing travel in `X-Stim-*` headers.
pub struct RemoteApiExtractor {
    config: RemoteApiConfig,
    client: Client,
}

impl RemoteApiExtractor {
    pub fn new(config: RemoteApiConfig) -> Result<Self, FeatureError> {
        if config.input_kinds.is_empty() {
            return Err(FeatureError::Config(format!(
                "{} accepts no stimulus kinds",
                config.id
            )));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| FeatureError::Config(format!("HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &RemoteApiConfig {
        &self.config
    }

    fn request(&self, stim: &Stim) -> Result<RequestBuilder, FeatureError> {
        let mut request = self
            .client
            .post(&self.config.endpoint)
            .header("X-Stim-Name", stim.name())
            .header("X-Stim-Kind", stim.kind().to_string());
        if let Some(onset) = stim.onset() {
            request = request.header("X-Stim-Onset", onset.to_string());
        }
        if let Some(duration) = stim.duration() {
            request = request.header("X-Stim-Duration", duration.to_string());
        }
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        if let Some(text) = stim.as_text() {
            return Ok(request.json(&json!({ "text": text })));
        }
        if let Some(audio) = stim.as_audio() {
            return Ok(request.json(&json!({
                "sample_rate": audio.sample_rate(),
                "samples": audio.samples(),
            })));
        }
        if let Some(image) = stim.as_image() {
            let mut png = Cursor::new(Vec::new());
            DynamicImage::ImageRgba8(image.clone())
                .write_to(&mut png, ImageOutputFormat::Png)
                .map_err(|e| {
                    FeatureError::extraction_failed(self.id(), format!("PNG encoding: {e}"))
                })?;
            return Ok(request
                .header(reqwest::header::CONTENT_TYPE, "image/png")
                .body(png.into_inner()));
        }

        Err(super::unsupported(self.id(), stim.kind()))
    }
}

impl Extractor for RemoteApiExtractor {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn input_kinds(&self) -> &[StimKind] {
        &self.config.input_kinds
    }

    fn extract(&self, stim: &Stim) -> Result<Vec<(String, FeatureValue)>, FeatureError> {
        let request = self.request(stim)?;
        debug!("🌐 {} -> {} ({})", self.id(), self.config.endpoint, stim.name());

        let response = request.send().map_err(|e| {
            error!("❌ {} request failed: {}", self.id(), e);
            let reason = if e.is_timeout() {
                format!("timed out after {}s", self.config.timeout_secs)
            } else {
                e.to_string()
            };
            FeatureError::extraction_failed(self.id(), reason)
        })?;

        let status = response.status();
        if !status.is_success() {
            error!("❌ {} returned HTTP {}", self.id(), status);
            return Err(FeatureError::extraction_failed(
                self.id(),
                format!("HTTP {status}"),
            ));
        }

        let body: Value = response
            .json()
            .map_err(|e| FeatureError::extraction_failed(self.id(), format!("malformed response: {e}")))?;
        parse_features(self.id(), body)
    }
}

/// Flat JSON object to feature list. Nested objects and mixed arrays are rejected.
pub(crate) fn parse_features(
    extractor: &str,
    body: Value,
) -> Result<Vec<(String, FeatureValue)>, FeatureError> {
    let Value::Object(map) = body else {
        return Err(FeatureError::extraction_failed(
            extractor,
            "response is not a JSON object",
        ));
    };

    map.into_iter()
        .map(|(name, value)| {
            let value = match value {
                Value::Bool(b) => FeatureValue::Bool(b),
                Value::Number(n) => match n.as_i64() {
                    Some(i) => FeatureValue::Int(i),
                    None => FeatureValue::Float(n.as_f64().unwrap_or(f64::NAN)),
                },
                Value::String(s) => FeatureValue::Text(s),
                Value::Array(items) => FeatureValue::Vector(
                    items
                        .iter()
                        .map(Value::as_f64)
                        .collect::<Option<Vec<f64>>>()
                        .ok_or_else(|| {
                            FeatureError::extraction_failed(
                                extractor,
                                format!("feature {name:?} is not a numeric array"),
                            )
                        })?,
                ),
                Value::Null | Value::Object(_) => {
                    return Err(FeatureError::extraction_failed(
                        extractor,
                        format!("feature {name:?} has unsupported shape"),
                    ))
                }
            };
            Ok((name, value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stim::{AudioStim, ImageStim, TextStim};
    use image::RgbaImage;

    #[test]
    fn test_parse_flat_object() {
        let features = parse_features(
            "api",
            json!({ "joy": 0.75, "faces": 2, "label": "cat", "adult": false, "embedding": [0.1, 0.2] }),
        )
        .unwrap();

        let get = |n: &str| features.iter().find(|(k, _)| k == n).map(|(_, v)| v.clone());
        assert_eq!(get("joy"), Some(FeatureValue::Float(0.75)));
        assert_eq!(get("faces"), Some(FeatureValue::Int(2)));
        assert_eq!(get("label"), Some(FeatureValue::Text("cat".into())));
        assert_eq!(get("adult"), Some(FeatureValue::Bool(false)));
        assert_eq!(get("embedding"), Some(FeatureValue::Vector(vec![0.1, 0.2])));
    }

    #[test]
    fn test_parse_rejects_bad_shapes() {
        for body in [json!([1, 2]), json!({ "a": { "b": 1 } }), json!({ "a": ["x"] }), json!({ "a": null })] {
            assert!(matches!(
                parse_features("api", body),
                Err(FeatureError::ExtractionFailed { .. })
            ));
        }
    }

    #[test]
    fn test_config_defaults_from_json() {
        let config: RemoteApiConfig =
            serde_json::from_str(r#"{ "id": "vision_api", "endpoint": "http://localhost/x" }"#).unwrap();
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.input_kinds, vec![StimKind::Text, StimKind::Image]);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_unsupported_kind_rejected_without_network() {
        let extractor = RemoteApiExtractor::new(RemoteApiConfig::new("api", "http://127.0.0.1:9/")).unwrap();
        let audio: Stim = AudioStim::new(vec![0.0; 4], 8_000, None).unwrap().into();
        assert!(matches!(
            extractor.transform(&audio),
            Err(FeatureError::UnsupportedStimulusType { .. })
        ));
    }

    #[test]
    fn test_transport_failure_is_extraction_failed() {
        let mut config = RemoteApiConfig::new("api", "http://127.0.0.1:9/features");
        config.timeout_secs = 2;
        let extractor = RemoteApiExtractor::new(config).unwrap();
        let text: Stim = TextStim::new("hello", Some(0.0), None).unwrap().into();

        match extractor.transform(&text) {
            Err(FeatureError::ExtractionFailed { extractor, .. }) => assert_eq!(extractor, "api"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_image_failures_are_extraction_failed() {
        let mut config = RemoteApiConfig::new("api", "http://127.0.0.1:9/features");
        config.timeout_secs = 2;
        let extractor = RemoteApiExtractor::new(config).unwrap();
        // an empty canvas cannot be encoded; either way no raw image error escapes
        let empty: Stim = ImageStim::new(RgbaImage::new(0, 0), Some(0.0), None).unwrap().into();

        match extractor.transform(&empty) {
            Err(FeatureError::ExtractionFailed { extractor, .. }) => assert_eq!(extractor, "api"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_empty_kinds_is_config_error() {
        let mut config = RemoteApiConfig::new("api", "http://localhost/");
        config.input_kinds.clear();
        assert!(matches!(
            RemoteApiExtractor::new(config),
            Err(FeatureError::Config(_))
        ));
    }
}
