//! 批量提取 - 在 rayon 线程池上并行调度 (extractor, stim) 组合

use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::core::error::FeatureError;
use crate::core::extractor::{apply, Extractor, ExtractorResult};
use crate::core::stim::Stim;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchOptions {
    /// Worker threads; `None` uses every available core.
    pub workers: Option<usize>,
    /// Skip items whose extraction failed instead of aborting the batch.
    pub continue_on_failure: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchFailure {
    pub extractor: String,
    pub stim: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub results: Vec<ExtractorResult>,
    pub failures: Vec<BatchFailure>,
}

/// Apply every extractor to every stimulus it can handle.
///
/// Pairs the extractor does not accept are skipped and end up as missing
/// cells once merged. Results come back stim-major in input order
/// regardless of scheduling.
pub fn run_batch(
    extractors: &[Box<dyn Extractor>],
    stims: &[Stim],
    options: &BatchOptions,
) -> Result<BatchReport, FeatureError> {
    let workers = options.workers.unwrap_or_else(num_cpus::get).max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| FeatureError::Config(format!("worker pool: {e}")))?;

    let jobs: Vec<(usize, usize)> = (0..stims.len())
        .flat_map(|s| (0..extractors.len()).map(move |e| (s, e)))
        .collect();
    info!(
        "🚀 Running {} extractors over {} stimuli on {} workers",
        extractors.len(),
        stims.len(),
        workers
    );

    let outcomes: Vec<_> = pool.install(|| {
        jobs.par_iter()
            .map(|&(s, e)| apply(extractors[e].as_ref(), &stims[s]))
            .collect()
    });

    let mut report = BatchReport::default();
    for (&(s, e), outcome) in jobs.iter().zip(outcomes) {
        match outcome {
            Ok(results) => report.results.extend(results),
            Err(FeatureError::UnsupportedStimulusType { .. }) => {
                debug!(
                    "⏭️ {} does not apply to {}",
                    extractors[e].id(),
                    stims[s].name()
                );
            }
            Err(err) if options.continue_on_failure && err.is_recoverable() => {
                warn!(
                    "⚠️ Skipping {} on {}: {}",
                    extractors[e].id(),
                    stims[s].name(),
                    err
                );
                report.failures.push(BatchFailure {
                    extractor: extractors[e].id().to_string(),
                    stim: stims[s].name().to_string(),
                    reason: err.to_string(),
                });
            }
            Err(err) => return Err(err),
        }
    }

    info!(
        "✅ Batch complete: {} results, {} skipped",
        report.results.len(),
        report.failures.len()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::extractor::{merge_results, BrightnessExtractor, FeatureValue, LengthExtractor};
    use crate::core::stim::{DerivedVideoStim, MockDecoderBackend, StimKind, TextStim, VideoStim};
    use std::fs;
    use std::sync::Arc;

    struct FlakyExtractor;

    impl Extractor for FlakyExtractor {
        fn id(&self) -> &str {
            "flaky"
        }

        fn input_kinds(&self) -> &[StimKind] {
            &[StimKind::Text]
        }

        fn extract(&self, stim: &Stim) -> Result<Vec<(String, FeatureValue)>, FeatureError> {
            if stim.as_text() == Some("bad") {
                return Err(FeatureError::extraction_failed(self.id(), "quota exceeded"));
            }
            Ok(vec![("ok".to_string(), true.into())])
        }
    }

    fn texts(values: &[&str]) -> Vec<Stim> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                TextStim::new(*v, Some(i as f64), None)
                    .unwrap()
                    .with_name(*v)
                    .into()
            })
            .collect()
    }

    #[test]
    fn test_results_keep_input_order() {
        let extractors: Vec<Box<dyn Extractor>> = vec![Box::new(LengthExtractor::new()), Box::new(FlakyExtractor)];
        let stims = texts(&["a", "bb", "ccc", "dddd"]);
        let options = BatchOptions {
            workers: Some(4),
            ..Default::default()
        };

        let report = run_batch(&extractors, &stims, &options).unwrap();
        assert_eq!(report.results.len(), 8);
        let order: Vec<(&str, &str)> = report
            .results
            .iter()
            .map(|r| (r.stim().name.as_str(), r.extractor_id()))
            .collect();
        assert_eq!(order[0], ("a", "LengthExtractor"));
        assert_eq!(order[1], ("a", "flaky"));
        assert_eq!(order[7], ("dddd", "flaky"));
    }

    #[test]
    fn test_failure_aborts_by_default() {
        let extractors: Vec<Box<dyn Extractor>> = vec![Box::new(FlakyExtractor)];
        let stims = texts(&["good", "bad"]);
        let outcome = run_batch(&extractors, &stims, &BatchOptions::default());
        assert!(matches!(outcome, Err(FeatureError::ExtractionFailed { .. })));
    }

    #[test]
    fn test_failure_skipped_when_allowed() {
        let extractors: Vec<Box<dyn Extractor>> = vec![Box::new(FlakyExtractor)];
        let stims = texts(&["good", "bad", "fine"]);
        let options = BatchOptions {
            workers: Some(2),
            continue_on_failure: true,
        };

        let report = run_batch(&extractors, &stims, &options).unwrap();
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].stim, "bad");
    }

    #[test]
    fn test_incompatible_pairs_are_skipped() {
        let extractors: Vec<Box<dyn Extractor>> = vec![
            Box::new(BrightnessExtractor::new()),
            Box::new(LengthExtractor::new()),
        ];
        let stims = texts(&["a", "b"]);
        let options = BatchOptions {
            workers: Some(1),
            ..Default::default()
        };

        let report = run_batch(&extractors, &stims, &options).unwrap();
        assert_eq!(report.results.len(), 2);
        assert!(report.failures.is_empty());
        assert!(report
            .results
            .iter()
            .all(|r| r.extractor_id() == "LengthExtractor"));
    }

    #[test]
    fn test_mixed_derived_video_keeps_every_element() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let backend = Arc::new(MockDecoderBackend::new(4.0, 2, 2, 1.0));
        let video = VideoStim::open(file.path(), backend, None).unwrap();
        let frame = video.get_frame(Some(2), None).unwrap();
        let caption = TextStim::new("a caption", Some(0.0), Some(1.0))
            .unwrap()
            .with_name("caption");
        let derived = DerivedVideoStim::new(video, vec![frame.into(), caption.into()], None).unwrap();

        let extractors: Vec<Box<dyn Extractor>> =
            vec![Box::new(BrightnessExtractor::new()), Box::new(LengthExtractor::new())];
        let report = run_batch(&extractors, &[derived.into()], &BatchOptions::default()).unwrap();
        assert_eq!(report.results.len(), 2);
        assert!(report.failures.is_empty());

        let table = merge_results(&report.results).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows()[0].stim.name, "caption");
        assert!(table.get(0, "BrightnessExtractor_brightness").unwrap().is_missing());
        assert!(table.get(1, "LengthExtractor_text_length").unwrap().is_missing());
        assert!(!table.get(1, "BrightnessExtractor_brightness").unwrap().is_missing());
    }

    #[test]
    fn test_same_file_name_in_two_directories_conflicts() {
        let root = tempfile::tempdir().unwrap();
        let mut videos = Vec::new();
        for dir in ["a", "b"] {
            let path = root.path().join(dir).join("clip.mp4");
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, b"").unwrap();
            let backend = Arc::new(MockDecoderBackend::new(4.0, 2, 2, 1.0));
            videos.push(Stim::from(VideoStim::open(&path, backend, None).unwrap()));
        }

        let extractors: Vec<Box<dyn Extractor>> = vec![Box::new(BrightnessExtractor::new())];
        let report = run_batch(&extractors, &videos, &BatchOptions::default()).unwrap();
        assert_eq!(report.results.len(), 8);
        assert_eq!(report.results[0].stim().name, report.results[4].stim().name);
        assert_ne!(report.results[0].stim().source, report.results[4].stim().source);

        assert!(matches!(
            merge_results(&report.results),
            Err(FeatureError::MergeConflict(_))
        ));
    }
}
