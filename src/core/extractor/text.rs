use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use super::{unsupported, Extractor, FeatureValue};
use crate::core::error::FeatureError;
use crate::core::stim::{Stim, StimKind};

const TEXT_KINDS: [StimKind; 1] = [StimKind::Text];

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").expect("word pattern is valid"));

fn text_of<'a>(extractor: &dyn Extractor, stim: &'a Stim) -> Result<&'a str, FeatureError> {
    stim.as_text()
        .ok_or_else(|| unsupported(extractor.id(), stim.kind()))
}

/// Number of characters in the text.
#[derive(Debug, Clone, Default)]
pub struct LengthExtractor;

impl LengthExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Extractor for LengthExtractor {
    fn id(&self) -> &str {
        "LengthExtractor"
    }

    fn input_kinds(&self) -> &[StimKind] {
        &TEXT_KINDS
    }

    fn extract(&self, stim: &Stim) -> Result<Vec<(String, FeatureValue)>, FeatureError> {
        let text = text_of(self, stim)?;
        Ok(vec![("text_length".to_string(), text.trim().chars().count().into())])
    }
}

/// Number of distinct words, optionally case-folded.
#[derive(Debug, Clone)]
pub struct NumUniqueWordsExtractor {
    case_sensitive: bool,
}

impl NumUniqueWordsExtractor {
    pub fn new() -> Self {
        Self {
            case_sensitive: false,
        }
    }

    pub fn case_sensitive() -> Self {
        Self {
            case_sensitive: true,
        }
    }
}

impl Default for NumUniqueWordsExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor for NumUniqueWordsExtractor {
    fn id(&self) -> &str {
        "NumUniqueWordsExtractor"
    }

    fn input_kinds(&self) -> &[StimKind] {
        &TEXT_KINDS
    }

    fn extract(&self, stim: &Stim) -> Result<Vec<(String, FeatureValue)>, FeatureError> {
        let text = text_of(self, stim)?;
        let words: HashSet<String> = WORD
            .find_iter(text)
            .map(|m| {
                if self.case_sensitive {
                    m.as_str().to_string()
                } else {
                    m.as_str().to_lowercase()
                }
            })
            .collect();
        Ok(vec![("num_unique_words".to_string(), words.len().into())])
    }
}
