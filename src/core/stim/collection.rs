//! Element-wise access to composite stimuli.

use std::borrow::Cow;

use super::video::{DerivedVideoStim, VideoStim};
use super::Stim;
use crate::core::error::FeatureError;

pub type StimIter<'a> = Box<dyn Iterator<Item = Result<Cow<'a, Stim>, FeatureError>> + 'a>;

/// A stimulus made of smaller stimuli that extractors can visit one by one.
pub trait CollectionStim {
    /// Start a new pass over the constituent stimuli.
    fn iter_stims(&self) -> Result<StimIter<'_>, FeatureError>;
}

impl CollectionStim for VideoStim {
    fn iter_stims(&self) -> Result<StimIter<'_>, FeatureError> {
        let frames = self.frames()?;
        Ok(Box::new(
            frames.map(|frame| frame.map(|f| Cow::Owned(Stim::VideoFrame(f)))),
        ))
    }
}

impl CollectionStim for DerivedVideoStim {
    /// Yields the fixed elements; the decoder is never touched.
    fn iter_stims(&self) -> Result<StimIter<'_>, FeatureError> {
        Ok(Box::new(self.elements().iter().map(|e| Ok(Cow::Borrowed(e)))))
    }
}
