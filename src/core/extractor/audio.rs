use super::{unsupported, Extractor, FeatureValue};
use crate::core::error::FeatureError;
use crate::core::stim::{AudioStim, Stim, StimKind};

const AUDIO_KINDS: [StimKind; 1] = [StimKind::Audio];

fn audio_of<'a>(extractor: &dyn Extractor, stim: &'a Stim) -> Result<&'a AudioStim, FeatureError> {
    stim.as_audio()
        .ok_or_else(|| unsupported(extractor.id(), stim.kind()))
}

/// Mean absolute sample value.
#[derive(Debug, Clone, Default)]
pub struct MeanAmplitudeExtractor;

impl MeanAmplitudeExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Extractor for MeanAmplitudeExtractor {
    fn id(&self) -> &str {
        "MeanAmplitudeExtractor"
    }

    fn input_kinds(&self) -> &[StimKind] {
        &AUDIO_KINDS
    }

    fn extract(&self, stim: &Stim) -> Result<Vec<(String, FeatureValue)>, FeatureError> {
        let samples = audio_of(self, stim)?.samples();
        let mean = if samples.is_empty() {
            0.0
        } else {
            samples.iter().map(|s| s.abs() as f64).sum::<f64>() / samples.len() as f64
        };
        Ok(vec![("mean_amplitude".to_string(), mean.into())])
    }
}

/// Root-mean-square energy, overall and per fixed-length frame.
#[derive(Debug, Clone)]
pub struct RmsExtractor {
    frame_length: usize,
}

impl RmsExtractor {
    pub fn new() -> Self {
        Self { frame_length: 2048 }
    }

    pub fn with_frame_length(frame_length: usize) -> Result<Self, FeatureError> {
        if frame_length == 0 {
            return Err(FeatureError::invalid("RMS frame length must be positive"));
        }
        Ok(Self { frame_length })
    }
}

impl Default for RmsExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn rms(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let energy = samples.iter().map(|&s| (s as f64) * (s as f64)).sum::<f64>();
    (energy / samples.len() as f64).sqrt()
}

impl Extractor for RmsExtractor {
    fn id(&self) -> &str {
        "RmsExtractor"
    }

    fn input_kinds(&self) -> &[StimKind] {
        &AUDIO_KINDS
    }

    fn extract(&self, stim: &Stim) -> Result<Vec<(String, FeatureValue)>, FeatureError> {
        let samples = audio_of(self, stim)?.samples();
        let frames: Vec<f64> = samples.chunks(self.frame_length).map(rms).collect();
        Ok(vec![
            ("rms".to_string(), rms(samples).into()),
            ("rms_frames".to_string(), frames.into()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio(samples: Vec<f32>) -> Stim {
        AudioStim::new(samples, 8_000, Some(0.0)).unwrap().into()
    }

    #[test]
    fn test_mean_amplitude() {
        let result = MeanAmplitudeExtractor::new()
            .transform(&audio(vec![0.5, -0.5, 0.25, -0.25]))
            .unwrap();
        assert_eq!(result.get("mean_amplitude"), Some(&FeatureValue::Float(0.375)));
    }

    #[test]
    fn test_rms_per_frame() {
        let extractor = RmsExtractor::with_frame_length(2).unwrap();
        let result = extractor.transform(&audio(vec![1.0, -1.0, 0.0, 0.0, 0.5])).unwrap();
        assert_eq!(
            result.get("rms_frames"),
            Some(&FeatureValue::Vector(vec![1.0, 0.0, 0.5]))
        );
        match result.get("rms") {
            Some(FeatureValue::Float(v)) => assert!((v - (2.25f64 / 5.0).sqrt()).abs() < 1e-9),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_rms_rejects_zero_frame() {
        assert!(RmsExtractor::with_frame_length(0).is_err());
    }

    #[test]
    fn test_audio_extractor_rejects_text() {
        let text: Stim = crate::core::stim::TextStim::new("hi", None, None).unwrap().into();
        assert!(matches!(
            MeanAmplitudeExtractor::new().transform(&text),
            Err(FeatureError::UnsupportedStimulusType { .. })
        ));
    }
}
