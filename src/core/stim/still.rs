use std::path::Path;

use image::RgbaImage;
use log::debug;

use super::StimMeta;
use crate::core::error::FeatureError;

/// 静态图像刺激（RGBA）
#[derive(Debug, Clone)]
pub struct ImageStim {
    meta: StimMeta,
    data: RgbaImage,
}

impl ImageStim {
    pub fn new(
        data: RgbaImage,
        onset: Option<f64>,
        duration: Option<f64>,
    ) -> Result<Self, FeatureError> {
        Ok(Self {
            meta: StimMeta::new(None, onset, duration)?,
            data,
        })
    }

    pub fn from_file(
        path: impl AsRef<Path>,
        onset: Option<f64>,
        duration: Option<f64>,
    ) -> Result<Self, FeatureError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(FeatureError::NotFound(path.to_path_buf()));
        }
        let data = image::open(path)?.to_rgba8();
        debug!(
            "🖼️ Loaded image {:?}: {}x{}",
            path,
            data.width(),
            data.height()
        );

        Ok(Self {
            meta: StimMeta::new(Some(path.to_path_buf()), onset, duration)?,
            data,
        })
    }

    pub(crate) fn from_parts(meta: StimMeta, data: RgbaImage) -> Self {
        Self { meta, data }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.meta.set_name(name);
        self
    }

    pub fn meta(&self) -> &StimMeta {
        &self.meta
    }

    pub(crate) fn meta_mut(&mut self) -> &mut StimMeta {
        &mut self.meta
    }

    pub fn data(&self) -> &RgbaImage {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.data.width()
    }

    pub fn height(&self) -> u32 {
        self.data.height()
    }
}
