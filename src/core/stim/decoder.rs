//! Video decoder seam
//!
//! Decoding itself lives outside this crate. A backend only has to report
//! fps / size / duration and hand out frames either by time or in order.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image::{Rgba, RgbaImage};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::core::error::FeatureError;

/// Container-level metadata read once when a decoder is opened.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoProperties {
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    pub duration: f64,
}

impl VideoProperties {
    pub fn n_frames(&self) -> usize {
        frame_count(self.fps, self.duration)
    }
}

pub(crate) fn frame_count(fps: f64, duration: f64) -> usize {
    (fps * duration).floor().max(0.0) as usize
}

/// A live decoder handle. Not safe for concurrent reads; callers hold it exclusively.
pub trait VideoDecoder: Send {
    fn properties(&self) -> VideoProperties;

    /// Random access: the frame shown at `seconds`.
    fn frame_at(&mut self, seconds: f64) -> Result<RgbaImage, FeatureError>;

    /// Sequential read, `None` once the stream is exhausted.
    fn next_frame(&mut self) -> Result<Option<RgbaImage>, FeatureError>;
}

pub trait DecoderBackend: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn VideoDecoder>, FeatureError>;
}

/// Treats a directory of still images (sorted by file name) as a video at a fixed rate.
#[derive(Debug, Clone)]
pub struct ImageSequenceBackend {
    fps: f64,
}

impl ImageSequenceBackend {
    pub fn new(fps: f64) -> Result<Self, FeatureError> {
        if !fps.is_finite() || fps <= 0.0 {
            return Err(FeatureError::invalid(format!("fps must be positive, got {fps}")));
        }
        Ok(Self { fps })
    }
}

const SEQUENCE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

impl DecoderBackend for ImageSequenceBackend {
    fn open(&self, path: &Path) -> Result<Box<dyn VideoDecoder>, FeatureError> {
        let mut frames: Vec<PathBuf> = fs::read_dir(path)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| SEQUENCE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            })
            .collect();
        frames.sort();

        let first = frames
            .first()
            .ok_or_else(|| FeatureError::invalid(format!("no image frames in {:?}", path)))?;
        let (width, height) = image::image_dimensions(first)?;

        let properties = VideoProperties {
            fps: self.fps,
            width,
            height,
            duration: frames.len() as f64 / self.fps,
        };
        info!(
            "🎞️ Opened image sequence {:?}: {} frames at {} fps",
            path,
            frames.len(),
            self.fps
        );

        Ok(Box::new(ImageSequenceDecoder {
            frames,
            properties,
            cursor: 0,
        }))
    }
}

struct ImageSequenceDecoder {
    frames: Vec<PathBuf>,
    properties: VideoProperties,
    cursor: usize,
}

impl ImageSequenceDecoder {
    fn load(&self, index: usize) -> Result<RgbaImage, FeatureError> {
        let path = &self.frames[index];
        debug!("Decoding frame {} from {:?}", index, path);
        Ok(image::open(path)?.to_rgba8())
    }
}

impl VideoDecoder for ImageSequenceDecoder {
    fn properties(&self) -> VideoProperties {
        self.properties
    }

    fn frame_at(&mut self, seconds: f64) -> Result<RgbaImage, FeatureError> {
        let index = (seconds * self.properties.fps).floor().max(0.0) as usize;
        self.load(index.min(self.frames.len() - 1))
    }

    fn next_frame(&mut self) -> Result<Option<RgbaImage>, FeatureError> {
        if self.cursor >= self.frames.len() {
            return Ok(None);
        }
        let frame = self.load(self.cursor)?;
        self.cursor += 1;
        Ok(Some(frame))
    }
}

/// Synthetic decoder for tests and dry runs.
///
/// Frame `i` is a solid image whose red channel is `i % 256`. Every `open`
/// is counted so callers can observe when a handle is (re)acquired.
#[derive(Debug, Clone)]
pub struct MockDecoderBackend {
    properties: VideoProperties,
    opens: Arc<AtomicUsize>,
}

impl MockDecoderBackend {
    pub fn new(fps: f64, width: u32, height: u32, duration: f64) -> Self {
        Self {
            properties: VideoProperties {
                fps,
                width,
                height,
                duration,
            },
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl DecoderBackend for MockDecoderBackend {
    fn open(&self, _path: &Path) -> Result<Box<dyn VideoDecoder>, FeatureError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockDecoder {
            properties: self.properties,
            cursor: 0,
        }))
    }
}

struct MockDecoder {
    properties: VideoProperties,
    cursor: usize,
}

impl MockDecoder {
    fn render(&self, index: usize) -> RgbaImage {
        RgbaImage::from_pixel(
            self.properties.width,
            self.properties.height,
            Rgba([(index % 256) as u8, 0, 0, 255]),
        )
    }
}

impl VideoDecoder for MockDecoder {
    fn properties(&self) -> VideoProperties {
        self.properties
    }

    fn frame_at(&mut self, seconds: f64) -> Result<RgbaImage, FeatureError> {
        let index = (seconds * self.properties.fps + 1e-9).floor().max(0.0) as usize;
        Ok(self.render(index))
    }

    fn next_frame(&mut self) -> Result<Option<RgbaImage>, FeatureError> {
        if self.cursor >= self.properties.n_frames() {
            return Ok(None);
        }
        let frame = self.render(self.cursor);
        self.cursor += 1;
        Ok(Some(frame))
    }
}
