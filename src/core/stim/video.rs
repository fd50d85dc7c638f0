//! 视频刺激：VideoStim / VideoFrameStim / DerivedVideoStim
//!
//! VideoStim 持有一个惰性打开的解码器句柄。句柄不参与快照，
//! 恢复时从原文件重新打开。

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use image::RgbaImage;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::decoder::{frame_count, DecoderBackend, VideoDecoder, VideoProperties};
use super::{derived_name, ImageStim, Stim, StimMeta};
use crate::core::error::FeatureError;

/// Absorbs float round-off when mapping a time back to a frame index.
const INDEX_EPSILON: f64 = 1e-9;

/// Video metadata that frames look up through their back-reference.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    name: String,
    filename: Option<PathBuf>,
    properties: VideoProperties,
}

impl VideoInfo {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn filename(&self) -> Option<&Path> {
        self.filename.as_deref()
    }

    pub fn fps(&self) -> f64 {
        self.properties.fps
    }

    pub fn properties(&self) -> VideoProperties {
        self.properties
    }
}

/// Serializable value state of a [`VideoStim`]. Never contains the decoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSnapshot {
    pub filename: PathBuf,
    pub name: String,
    pub onset: Option<f64>,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    pub duration: f64,
}

pub struct VideoStim {
    meta: StimMeta,
    info: Arc<VideoInfo>,
    backend: Arc<dyn DecoderBackend>,
    decoder: Mutex<Option<Box<dyn VideoDecoder>>>,
}

impl VideoStim {
    /// Open `path` through `backend` and fix the container metadata.
    pub fn open(
        path: impl AsRef<Path>,
        backend: Arc<dyn DecoderBackend>,
        onset: Option<f64>,
    ) -> Result<Self, FeatureError> {
        let path = path.as_ref();
        let decoder = open_decoder(backend.as_ref(), path)?;
        let properties = decoder.properties();
        let meta = StimMeta::new(Some(path.to_path_buf()), onset, Some(properties.duration))?;

        let video = Self::assemble(meta, properties, backend, Some(decoder))?;
        info!(
            "🎬 VideoStim {}: {} fps, {}x{}, {:.2}s, {} frames",
            video.meta.name(),
            video.fps(),
            video.width(),
            video.height(),
            video.duration(),
            video.n_frames()
        );
        Ok(video)
    }

    /// Rebuild a video from a snapshot, reopening the decoder from the stored filename.
    pub fn restore(
        snapshot: VideoSnapshot,
        backend: Arc<dyn DecoderBackend>,
    ) -> Result<Self, FeatureError> {
        let decoder = open_decoder(backend.as_ref(), &snapshot.filename)?;
        let properties = VideoProperties {
            fps: snapshot.fps,
            width: snapshot.width,
            height: snapshot.height,
            duration: snapshot.duration,
        };
        let mut meta = StimMeta::new(
            Some(snapshot.filename),
            snapshot.onset,
            Some(snapshot.duration),
        )?;
        meta.set_name(snapshot.name);

        debug!("♻️ Restored VideoStim {}", meta.name());
        Self::assemble(meta, properties, backend, Some(decoder))
    }

    fn assemble(
        meta: StimMeta,
        properties: VideoProperties,
        backend: Arc<dyn DecoderBackend>,
        decoder: Option<Box<dyn VideoDecoder>>,
    ) -> Result<Self, FeatureError> {
        if !properties.fps.is_finite() || properties.fps <= 0.0 {
            return Err(FeatureError::invalid(format!(
                "video fps must be positive, got {}",
                properties.fps
            )));
        }
        if properties.width == 0 || properties.height == 0 {
            return Err(FeatureError::invalid(format!(
                "video dimensions must be positive, got {}x{}",
                properties.width, properties.height
            )));
        }

        let info = Arc::new(VideoInfo {
            name: meta.name().to_string(),
            filename: meta.filename().map(Path::to_path_buf),
            properties,
        });

        Ok(Self {
            meta,
            info,
            backend,
            decoder: Mutex::new(decoder),
        })
    }

    pub fn snapshot(&self) -> VideoSnapshot {
        VideoSnapshot {
            filename: self.info.filename.clone().unwrap_or_default(),
            name: self.meta.name().to_string(),
            onset: self.meta.onset(),
            fps: self.fps(),
            width: self.width(),
            height: self.height(),
            duration: self.duration(),
        }
    }

    pub fn meta(&self) -> &StimMeta {
        &self.meta
    }

    pub fn info(&self) -> &Arc<VideoInfo> {
        &self.info
    }

    pub fn fps(&self) -> f64 {
        self.info.properties.fps
    }

    pub fn width(&self) -> u32 {
        self.info.properties.width
    }

    pub fn height(&self) -> u32 {
        self.info.properties.height
    }

    pub fn duration(&self) -> f64 {
        self.info.properties.duration
    }

    pub fn n_frames(&self) -> usize {
        frame_count(self.fps(), self.duration())
    }

    /// Renames the video; frames created afterwards pick up the new name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.meta.set_name(name);
        self.info = Arc::new(VideoInfo {
            name: self.meta.name().to_string(),
            ..(*self.info).clone()
        });
        self
    }

    pub fn is_loaded(&self) -> bool {
        self.decoder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Drop the live decoder; the next frame fetch reopens it.
    pub fn unload(&self) {
        let mut slot = self.decoder.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.take().is_some() {
            debug!("🗑️ VideoStim {}: decoder released", self.meta.name());
        }
    }

    fn with_decoder<T>(
        &self,
        f: impl FnOnce(&mut dyn VideoDecoder) -> Result<T, FeatureError>,
    ) -> Result<T, FeatureError> {
        let mut slot = self.decoder.lock().unwrap_or_else(PoisonError::into_inner);
        let decoder = match slot.take() {
            Some(decoder) => decoder,
            None => {
                debug!("🔓 VideoStim {}: acquiring decoder", self.meta.name());
                self.open_fresh()?
            }
        };
        f(slot.insert(decoder).as_mut())
    }

    fn open_fresh(&self) -> Result<Box<dyn VideoDecoder>, FeatureError> {
        let path = self
            .info
            .filename
            .as_deref()
            .ok_or_else(|| FeatureError::invalid("video has no source file"))?;
        open_decoder(self.backend.as_ref(), path)
    }

    /// Fetch one frame by index or by time; exactly one of the two must be given.
    pub fn get_frame(
        &self,
        index: Option<usize>,
        onset: Option<f64>,
    ) -> Result<VideoFrameStim, FeatureError> {
        let fps = self.fps();
        let (index, seconds) = match (index, onset) {
            (Some(index), None) => (index, index as f64 / fps),
            (None, Some(seconds)) => {
                if !seconds.is_finite() || seconds < 0.0 {
                    return Err(FeatureError::invalid(format!(
                        "frame onset must be non-negative, got {seconds}"
                    )));
                }
                ((seconds * fps + INDEX_EPSILON).floor() as usize, seconds)
            }
            (Some(_), Some(_)) => {
                return Err(FeatureError::invalid(
                    "get_frame takes an index or an onset, not both",
                ))
            }
            (None, None) => {
                return Err(FeatureError::invalid(
                    "get_frame needs either an index or an onset",
                ))
            }
        };

        let n_frames = self.n_frames();
        if index >= n_frames {
            return Err(FeatureError::invalid(format!(
                "frame {index} out of range for {n_frames} frames"
            )));
        }

        let data = self.with_decoder(|decoder| decoder.frame_at(seconds))?;
        VideoFrameStim::build(&self.info, index, data)
    }

    /// Decode every frame in order.
    ///
    /// Each call opens its own decoder, so a pass cannot be rewound but a new
    /// pass can always be started. Dropping the iterator early releases it.
    pub fn frames(&self) -> Result<FrameIter, FeatureError> {
        let decoder = self.open_fresh()?;
        Ok(FrameIter {
            info: Arc::clone(&self.info),
            decoder,
            next_index: 0,
            done: false,
        })
    }
}

fn open_decoder(
    backend: &dyn DecoderBackend,
    path: &Path,
) -> Result<Box<dyn VideoDecoder>, FeatureError> {
    if !path.exists() {
        return Err(FeatureError::NotFound(path.to_path_buf()));
    }
    backend.open(path)
}

impl Clone for VideoStim {
    /// The clone starts without a decoder; handles are never shared.
    fn clone(&self) -> Self {
        Self {
            meta: self.meta.clone(),
            info: Arc::clone(&self.info),
            backend: Arc::clone(&self.backend),
            decoder: Mutex::new(None),
        }
    }
}

impl fmt::Debug for VideoStim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoStim")
            .field("meta", &self.meta)
            .field("properties", &self.info.properties)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

/// Lazy, pull-based pass over a video's frames.
pub struct FrameIter {
    info: Arc<VideoInfo>,
    decoder: Box<dyn VideoDecoder>,
    next_index: usize,
    done: bool,
}

impl Iterator for FrameIter {
    type Item = Result<VideoFrameStim, FeatureError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.decoder.next_frame() {
            Ok(Some(data)) => {
                let frame = VideoFrameStim::build(&self.info, self.next_index, data);
                self.next_index += 1;
                Some(frame)
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// One sampled frame of a video.
#[derive(Debug, Clone)]
pub struct VideoFrameStim {
    image: ImageStim,
    video: Weak<VideoInfo>,
    source: Option<PathBuf>,
    frame_num: usize,
}

impl VideoFrameStim {
    /// Frame `frame_num` of `video`, decoded on demand.
    pub fn new(video: &VideoStim, frame_num: usize) -> Result<Self, FeatureError> {
        video.get_frame(Some(frame_num), None)
    }

    /// Frame `frame_num` of `video` with pixels that were already decoded.
    pub fn with_data(
        video: &VideoStim,
        frame_num: usize,
        data: RgbaImage,
    ) -> Result<Self, FeatureError> {
        Self::build(&video.info, frame_num, data)
    }

    fn build(info: &Arc<VideoInfo>, frame_num: usize, data: RgbaImage) -> Result<Self, FeatureError> {
        let spf = 1.0 / info.fps();
        let mut meta = StimMeta::new(None, Some(frame_num as f64 * spf), Some(spf))?;
        meta.set_name(derived_name(
            info.name(),
            info.filename.is_some(),
            &format!("frame[{frame_num}]"),
        ));

        Ok(Self {
            image: ImageStim::from_parts(meta, data),
            video: Arc::downgrade(info),
            source: info.filename.clone(),
            frame_num,
        })
    }

    pub fn with_onset(mut self, onset: f64) -> Result<Self, FeatureError> {
        self.image.meta_mut().set_onset(Some(onset))?;
        Ok(self)
    }

    pub fn with_duration(mut self, duration: f64) -> Result<Self, FeatureError> {
        self.image.meta_mut().set_duration(Some(duration))?;
        Ok(self)
    }

    pub fn meta(&self) -> &StimMeta {
        self.image.meta()
    }

    pub fn data(&self) -> &RgbaImage {
        self.image.data()
    }

    pub fn frame_num(&self) -> usize {
        self.frame_num
    }

    /// Path of the video this frame was decoded from. Survives the video itself.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Metadata of the source video, if it is still alive.
    pub fn video(&self) -> Option<Arc<VideoInfo>> {
        self.video.upgrade()
    }
}

/// A video reduced to a fixed list of representative elements.
#[derive(Debug, Clone)]
pub struct DerivedVideoStim {
    video: VideoStim,
    elements: Vec<Stim>,
    frame_index: Option<Vec<usize>>,
}

impl DerivedVideoStim {
    pub fn new(
        mut video: VideoStim,
        elements: Vec<Stim>,
        frame_index: Option<Vec<usize>>,
    ) -> Result<Self, FeatureError> {
        if let Some(index) = &frame_index {
            if index.len() != elements.len() {
                return Err(FeatureError::invalid(format!(
                    "frame_index has {} entries for {} elements",
                    index.len(),
                    elements.len()
                )));
            }
        }
        // only the stimulus name changes; elements keep pointing at the same video info
        video.meta.append_name("_derived");
        Ok(Self {
            video,
            elements,
            frame_index,
        })
    }

    /// One frame per keyframe, each lasting until the next keyframe.
    ///
    /// The last keyframe spans to the end of the video.
    pub fn from_keyframes(video: VideoStim, keyframes: &[usize]) -> Result<Self, FeatureError> {
        if keyframes.windows(2).any(|w| w[0] >= w[1]) {
            return Err(FeatureError::invalid("keyframes must be strictly increasing"));
        }

        let fps = video.fps();
        let mut elements = Vec::with_capacity(keyframes.len());
        for (i, &index) in keyframes.iter().enumerate() {
            let frame = video.get_frame(Some(index), None)?;
            let end = match keyframes.get(i + 1) {
                Some(&next) => next as f64 / fps,
                None => video.duration(),
            };
            let span = (end - index as f64 / fps).max(1.0 / fps);
            elements.push(Stim::VideoFrame(frame.with_duration(span)?));
        }

        debug!(
            "🔑 Derived {} keyframe elements from {}",
            elements.len(),
            video.meta().name()
        );
        Self::new(video, elements, Some(keyframes.to_vec()))
    }

    pub fn meta(&self) -> &StimMeta {
        self.video.meta()
    }

    pub fn video(&self) -> &VideoStim {
        &self.video
    }

    pub fn elements(&self) -> &[Stim] {
        &self.elements
    }

    pub fn frame_index(&self) -> Option<&[usize]> {
        self.frame_index.as_deref()
    }
}
