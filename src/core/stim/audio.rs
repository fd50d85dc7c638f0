use std::path::Path;

use log::{debug, error, info};
use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType};

use super::StimMeta;
use crate::core::error::FeatureError;

/// 音频刺激：单声道 f32 采样
#[derive(Debug, Clone)]
pub struct AudioStim {
    meta: StimMeta,
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioStim {
    pub fn new(
        samples: Vec<f32>,
        sample_rate: u32,
        onset: Option<f64>,
    ) -> Result<Self, FeatureError> {
        Self::build(None, samples, sample_rate, onset)
    }

    /// Load a WAV file, folding multi-channel audio down to mono.
    pub fn from_file(path: impl AsRef<Path>, onset: Option<f64>) -> Result<Self, FeatureError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(FeatureError::NotFound(path.to_path_buf()));
        }
        let (samples, sample_rate) = load_wav_mono_f32(path)?;
        Self::build(Some(path), samples, sample_rate, onset)
    }

    fn build(
        path: Option<&Path>,
        samples: Vec<f32>,
        sample_rate: u32,
        onset: Option<f64>,
    ) -> Result<Self, FeatureError> {
        if sample_rate == 0 {
            return Err(FeatureError::invalid("sample rate must be positive"));
        }
        let duration = samples.len() as f64 / sample_rate as f64;
        Ok(Self {
            meta: StimMeta::new(path.map(Path::to_path_buf), onset, Some(duration))?,
            samples,
            sample_rate,
        })
    }

    pub fn meta(&self) -> &StimMeta {
        &self.meta
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Same clip at `target_rate`; metadata is carried over unchanged.
    pub fn resample(&self, target_rate: u32) -> Result<AudioStim, FeatureError> {
        if target_rate == 0 {
            return Err(FeatureError::invalid("target sample rate must be positive"));
        }
        let samples = resample_mono(&self.samples, self.sample_rate, target_rate)?;
        Ok(AudioStim {
            meta: self.meta.clone(),
            samples,
            sample_rate: target_rate,
        })
    }
}

pub fn load_wav_mono_f32(path: &Path) -> Result<(Vec<f32>, u32), FeatureError> {
    info!("📖 Reading WAV file: {:?}", path);
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    info!(
        "📊 WAV spec: {} Hz, {} channels, {} bits",
        spec.sample_rate, spec.channels, spec.bits_per_sample
    );

    if spec.sample_rate == 0 {
        return Err(FeatureError::Wav(hound::Error::FormatError(
            "invalid sample rate",
        )));
    }

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
    };

    let samples: Vec<f32> = interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect();

    info!("✓ Loaded {} mono samples from file", samples.len());
    Ok((samples, spec.sample_rate))
}

pub fn resample_mono(input: &[f32], in_rate: u32, out_rate: u32) -> Result<Vec<f32>, FeatureError> {
    if in_rate == out_rate || input.is_empty() {
        return Ok(input.to_vec());
    }

    if in_rate % out_rate == 0 {
        let factor = (in_rate / out_rate) as usize;
        info!(
            "⚡ Fast downsample from {} Hz to {} Hz (factor {})",
            in_rate, out_rate, factor
        );
        return Ok(downsample_by_factor(input, factor));
    }

    info!(
        "🔧 Resampling {} samples from {} Hz to {} Hz",
        input.len(),
        in_rate,
        out_rate
    );
    let ratio = out_rate as f64 / in_rate as f64;
    let params = SincInterpolationParameters {
        sinc_len: 48,
        f_cutoff: 0.90,
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: 4,
        window: rubato::WindowFunction::BlackmanHarris2,
    };

    let mut resampler =
        SincFixedIn::<f32>::new(ratio, 1.0, params, input.len(), 1).map_err(|e| {
            error!("❌ Resample creation failed: {}", e);
            FeatureError::Resample(e.to_string())
        })?;

    let mut output = vec![vec![0.0f32; resampler.output_frames_max()]];
    let (_, written) = resampler
        .process_into_buffer(&[input], &mut output, None)
        .map_err(|e| {
            error!("❌ Resample processing failed: {}", e);
            FeatureError::Resample(e.to_string())
        })?;

    let mut result = output.swap_remove(0);
    result.truncate(written);
    debug!(
        "✓ Resampling complete: {} -> {} samples",
        input.len(),
        result.len()
    );
    Ok(result)
}

/// Downsample by averaging consecutive samples when the ratio is an integer
fn downsample_by_factor(input: &[f32], factor: usize) -> Vec<f32> {
    debug_assert!(factor > 0);
    input
        .chunks(factor)
        .map(|chunk| chunk.iter().sum::<f32>() / chunk.len() as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, channels: u16, rate: u32, frames: &[i16]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &s in frames {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_audio_duration_from_samples() {
        let stim = AudioStim::new(vec![0.0; 8000], 16_000, Some(1.0)).unwrap();
        assert_eq!(stim.meta().duration(), Some(0.5));
        assert_eq!(stim.meta().onset(), Some(1.0));
    }

    #[test]
    fn test_audio_zero_rate_rejected() {
        assert!(matches!(
            AudioStim::new(vec![0.0; 10], 0, None),
            Err(FeatureError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_load_stereo_wav_as_mono() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        // L/R pairs average to 0 and to 16384
        write_wav(&path, 2, 8_000, &[16384, -16384, 16384, 16384]);

        let stim = AudioStim::from_file(&path, None).unwrap();
        assert_eq!(stim.sample_rate(), 8_000);
        assert_eq!(stim.samples().len(), 2);
        assert!(stim.samples()[0].abs() < 1e-6);
        assert!((stim.samples()[1] - 0.5).abs() < 1e-3);
        assert_eq!(stim.meta().name(), "tone.wav");
    }

    #[test]
    fn test_integer_downsample() {
        let stim = AudioStim::new(vec![1.0, 3.0, 5.0, 7.0], 32_000, None).unwrap();
        let resampled = stim.resample(16_000).unwrap();
        assert_eq!(resampled.sample_rate(), 16_000);
        assert_eq!(resampled.samples(), &[2.0, 6.0]);
    }

    #[test]
    fn test_missing_wav() {
        let result = AudioStim::from_file("/nonexistent/tone.wav", None);
        assert!(matches!(result, Err(FeatureError::NotFound(_))));
    }
}
