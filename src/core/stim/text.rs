use std::fs;
use std::path::Path;

use log::debug;

use super::StimMeta;
use crate::core::error::FeatureError;

/// 文本刺激
#[derive(Debug, Clone)]
pub struct TextStim {
    meta: StimMeta,
    text: String,
}

impl TextStim {
    pub fn new(
        text: impl Into<String>,
        onset: Option<f64>,
        duration: Option<f64>,
    ) -> Result<Self, FeatureError> {
        Ok(Self {
            meta: StimMeta::new(None, onset, duration)?,
            text: text.into(),
        })
    }

    pub fn from_file(path: impl AsRef<Path>, onset: Option<f64>) -> Result<Self, FeatureError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(FeatureError::NotFound(path.to_path_buf()));
        }
        let text = fs::read_to_string(path)?;
        debug!("📖 Loaded {} bytes of text from {:?}", text.len(), path);

        Ok(Self {
            meta: StimMeta::new(Some(path.to_path_buf()), onset, None)?,
            text,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.meta.set_name(name);
        self
    }

    pub fn meta(&self) -> &StimMeta {
        &self.meta
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_text_from_memory() {
        let stim = TextStim::new("hello world", Some(2.0), Some(0.5)).unwrap();
        assert_eq!(stim.text(), "hello world");
        assert_eq!(stim.meta().onset(), Some(2.0));
        assert_eq!(stim.meta().name(), "");
    }

    #[test]
    fn test_text_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "some words here").unwrap();

        let stim = TextStim::from_file(file.path(), None).unwrap();
        assert_eq!(stim.text(), "some words here");
        assert!(stim.meta().filename().is_some());
        assert!(!stim.meta().name().is_empty());
    }

    #[test]
    fn test_text_missing_file() {
        let result = TextStim::from_file("/nonexistent/words.txt", None);
        assert!(matches!(result, Err(FeatureError::NotFound(_))));
    }
}
