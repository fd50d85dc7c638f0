//! Stimulus types - typed containers for raw input plus temporal metadata
//!
//! 层次结构：
//! - Text / Image / Audio 为原子刺激
//! - Video 为集合刺激，可逐帧迭代出 VideoFrame
//! - DerivedVideo 为固定关键帧序列

pub mod audio;
pub mod collection;
pub mod decoder;
pub mod still;
pub mod text;
pub mod video;

use std::fmt;
use std::path::{Path, PathBuf};

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::core::error::FeatureError;

pub use audio::AudioStim;
pub use collection::CollectionStim;
pub use decoder::{
    DecoderBackend, ImageSequenceBackend, MockDecoderBackend, VideoDecoder, VideoProperties,
};
pub use still::ImageStim;
pub use text::TextStim;
pub use video::{DerivedVideoStim, FrameIter, VideoFrameStim, VideoSnapshot, VideoStim};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StimKind {
    Text,
    Image,
    Audio,
    Video,
    VideoFrame,
    DerivedVideo,
}

impl StimKind {
    /// The more general kind this one specializes, if any.
    pub fn parent(self) -> Option<StimKind> {
        match self {
            StimKind::VideoFrame => Some(StimKind::Image),
            StimKind::DerivedVideo => Some(StimKind::Video),
            _ => None,
        }
    }

    /// True when `self` is `other` or specializes it.
    pub fn is_a(self, other: StimKind) -> bool {
        self == other || self.parent().is_some_and(|p| p.is_a(other))
    }

    pub fn is_collection(self) -> bool {
        self.is_a(StimKind::Video)
    }
}

impl fmt::Display for StimKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StimKind::Text => "text",
            StimKind::Image => "image",
            StimKind::Audio => "audio",
            StimKind::Video => "video",
            StimKind::VideoFrame => "video frame",
            StimKind::DerivedVideo => "derived video",
        };
        f.write_str(label)
    }
}

/// Metadata shared by every stimulus variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StimMeta {
    filename: Option<PathBuf>,
    onset: Option<f64>,
    duration: Option<f64>,
    name: String,
}

impl StimMeta {
    pub fn new(
        filename: Option<PathBuf>,
        onset: Option<f64>,
        duration: Option<f64>,
    ) -> Result<Self, FeatureError> {
        check_seconds("onset", onset)?;
        check_seconds("duration", duration)?;

        let name = filename
            .as_deref()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            filename,
            onset,
            duration,
            name,
        })
    }

    pub fn filename(&self) -> Option<&Path> {
        self.filename.as_deref()
    }

    pub fn onset(&self) -> Option<f64> {
        self.onset
    }

    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn append_name(&mut self, suffix: &str) {
        self.name.push_str(suffix);
    }

    pub(crate) fn set_onset(&mut self, onset: Option<f64>) -> Result<(), FeatureError> {
        check_seconds("onset", onset)?;
        self.onset = onset;
        Ok(())
    }

    pub(crate) fn set_duration(&mut self, duration: Option<f64>) -> Result<(), FeatureError> {
        check_seconds("duration", duration)?;
        self.duration = duration;
        Ok(())
    }
}

fn check_seconds(field: &str, value: Option<f64>) -> Result<(), FeatureError> {
    match value {
        Some(v) if !v.is_finite() || v < 0.0 => Err(FeatureError::invalid(format!(
            "{field} must be a non-negative number of seconds, got {v}"
        ))),
        _ => Ok(()),
    }
}

/// Name of a stimulus derived from `parent`.
///
/// The parent segment is only kept when the parent came from a file.
pub fn derived_name(parent_name: &str, parent_has_filename: bool, descriptor: &str) -> String {
    if parent_has_filename {
        format!("{parent_name}->{descriptor}")
    } else {
        descriptor.to_string()
    }
}

/// Value copy of a stimulus' identity, kept by results for provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StimInfo {
    pub name: String,
    pub kind: StimKind,
    pub filename: Option<PathBuf>,
    pub onset: Option<f64>,
    pub duration: Option<f64>,
    /// File of the stimulus this one was cut from, e.g. the video behind a frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
}

impl StimInfo {
    pub fn key(&self) -> StimKey {
        StimKey {
            name: self.name.clone(),
            onset: seconds_bits(self.onset),
            duration: seconds_bits(self.duration),
        }
    }
}

/// Merge key: (name, onset, duration), compared bit-exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StimKey {
    name: String,
    onset: Option<u64>,
    duration: Option<u64>,
}

impl fmt::Display for StimKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = |bits: Option<u64>| match bits {
            Some(b) => f64::from_bits(b).to_string(),
            None => "-".to_string(),
        };
        write!(
            f,
            "{}@{}+{}",
            self.name,
            secs(self.onset),
            secs(self.duration)
        )
    }
}

fn seconds_bits(value: Option<f64>) -> Option<u64> {
    // -0.0 and 0.0 must land on the same key
    value.map(|v| if v == 0.0 { 0u64 } else { v.to_bits() })
}

/// A unit of input media.
#[derive(Debug, Clone)]
pub enum Stim {
    Text(TextStim),
    Image(ImageStim),
    Audio(AudioStim),
    Video(VideoStim),
    VideoFrame(VideoFrameStim),
    DerivedVideo(DerivedVideoStim),
}

impl Stim {
    pub fn kind(&self) -> StimKind {
        match self {
            Stim::Text(_) => StimKind::Text,
            Stim::Image(_) => StimKind::Image,
            Stim::Audio(_) => StimKind::Audio,
            Stim::Video(_) => StimKind::Video,
            Stim::VideoFrame(_) => StimKind::VideoFrame,
            Stim::DerivedVideo(_) => StimKind::DerivedVideo,
        }
    }

    pub fn meta(&self) -> &StimMeta {
        match self {
            Stim::Text(s) => s.meta(),
            Stim::Image(s) => s.meta(),
            Stim::Audio(s) => s.meta(),
            Stim::Video(s) => s.meta(),
            Stim::VideoFrame(s) => s.meta(),
            Stim::DerivedVideo(s) => s.meta(),
        }
    }

    pub fn name(&self) -> &str {
        self.meta().name()
    }

    pub fn onset(&self) -> Option<f64> {
        self.meta().onset()
    }

    pub fn duration(&self) -> Option<f64> {
        self.meta().duration()
    }

    pub fn filename(&self) -> Option<&Path> {
        self.meta().filename()
    }

    pub fn info(&self) -> StimInfo {
        let meta = self.meta();
        StimInfo {
            name: meta.name().to_string(),
            kind: self.kind(),
            filename: meta.filename().map(Path::to_path_buf),
            onset: meta.onset(),
            duration: meta.duration(),
            source: self.source().map(Path::to_path_buf),
        }
    }

    pub fn source(&self) -> Option<&Path> {
        match self {
            Stim::VideoFrame(s) => s.source(),
            _ => None,
        }
    }

    pub fn key(&self) -> StimKey {
        self.info().key()
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Stim::Text(s) => Some(s.text()),
            _ => None,
        }
    }

    /// Pixel data of still images and video frames.
    pub fn as_image(&self) -> Option<&RgbaImage> {
        match self {
            Stim::Image(s) => Some(s.data()),
            Stim::VideoFrame(s) => Some(s.data()),
            _ => None,
        }
    }

    pub fn as_audio(&self) -> Option<&AudioStim> {
        match self {
            Stim::Audio(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_video(&self) -> Option<&VideoStim> {
        match self {
            Stim::Video(s) => Some(s),
            Stim::DerivedVideo(s) => Some(s.video()),
            _ => None,
        }
    }

    pub fn as_collection(&self) -> Option<&dyn CollectionStim> {
        match self {
            Stim::Video(s) => Some(s as &dyn CollectionStim),
            Stim::DerivedVideo(s) => Some(s as &dyn CollectionStim),
            _ => None,
        }
    }
}

impl From<TextStim> for Stim {
    fn from(s: TextStim) -> Self {
        Stim::Text(s)
    }
}

impl From<ImageStim> for Stim {
    fn from(s: ImageStim) -> Self {
        Stim::Image(s)
    }
}

impl From<AudioStim> for Stim {
    fn from(s: AudioStim) -> Self {
        Stim::Audio(s)
    }
}

impl From<VideoStim> for Stim {
    fn from(s: VideoStim) -> Self {
        Stim::Video(s)
    }
}

impl From<VideoFrameStim> for Stim {
    fn from(s: VideoFrameStim) -> Self {
        Stim::VideoFrame(s)
    }
}

impl From<DerivedVideoStim> for Stim {
    fn from(s: DerivedVideoStim) -> Self {
        Stim::DerivedVideo(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_specialization() {
        assert!(StimKind::VideoFrame.is_a(StimKind::Image));
        assert!(StimKind::DerivedVideo.is_a(StimKind::Video));
        assert!(!StimKind::Image.is_a(StimKind::VideoFrame));
        assert!(!StimKind::Audio.is_a(StimKind::Video));
        assert!(StimKind::DerivedVideo.is_collection());
        assert!(!StimKind::VideoFrame.is_collection());
    }

    #[test]
    fn test_meta_name_from_filename() {
        let meta = StimMeta::new(Some(PathBuf::from("/data/clips/clip.mp4")), None, None).unwrap();
        assert_eq!(meta.name(), "clip.mp4");

        let meta = StimMeta::new(None, Some(1.0), None).unwrap();
        assert_eq!(meta.name(), "");
    }

    #[test]
    fn test_meta_rejects_negative_times() {
        assert!(matches!(
            StimMeta::new(None, Some(-1.0), None),
            Err(FeatureError::InvalidArgument(_))
        ));
        assert!(matches!(
            StimMeta::new(None, None, Some(f64::NAN)),
            Err(FeatureError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_derived_name() {
        assert_eq!(derived_name("clip.mp4", true, "frame[3]"), "clip.mp4->frame[3]");
        assert_eq!(derived_name("", false, "frame[3]"), "frame[3]");
    }

    #[test]
    fn test_key_ignores_zero_sign() {
        let a = StimInfo {
            name: "a".into(),
            kind: StimKind::Text,
            filename: None,
            onset: Some(0.0),
            duration: None,
            source: None,
        };
        let b = StimInfo {
            onset: Some(-0.0),
            ..a.clone()
        };
        assert_eq!(a.key(), b.key());
    }
}
