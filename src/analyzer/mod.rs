pub mod chroma;
pub mod decode;
pub mod fusion;
pub mod tempo;

use crate::key::{MusicalKey, Mode, PitchClass, UNKNOWN_KEY, compatible_keys};
use crate::models::{
    AnalysisMetadata, AnalysisResult, AnalysisSource, AudioAnalysis, AudioSamples, DEFAULT_BPM,
    FilenameEstimate, MAX_BPM, MIN_BPM,
};
use crate::scanner::filename::parse_filename;
use decode::{AudioDecoder, DecodeError, SymphoniaDecoder};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Confidence reported on the failure path when the filename had nothing.
const FALLBACK_CONFIDENCE: f32 = 0.1;
const FALLBACK_KEY: MusicalKey = MusicalKey::new(PitchClass::C, Mode::Major);

/// Tunables for the orchestrator (the `[analysis]` table of the config file).
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalysisSettings {
    /// Skip audio analysis when the filename already names tempo and key.
    pub filename_fast_path: bool,
    /// Filename confidence must be strictly above this to take the fast path.
    pub fast_path_confidence: f32,
    /// Run the tempo and key estimators concurrently.
    pub parallel_estimators: bool,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            filename_fast_path: true,
            fast_path_confidence: 0.8,
            parallel_estimators: true,
        }
    }
}

/// Outcome for one file of a batch run.
#[derive(Debug)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub result: Result<AnalysisResult, AnalyzeError>,
}

pub struct BatchResult {
    pub analyzed: u64,
    /// Files that were read but fell back to filename-only estimates.
    pub fallbacks: u64,
    pub failed: u64,
    pub outcomes: Vec<FileOutcome>,
}

/// Runs the filename parser, both estimators and fusion for one input.
///
/// Every `analyze_*` call is independent, so one `Analyzer` can be shared
/// across threads behind an `Arc`.
pub struct Analyzer {
    settings: AnalysisSettings,
    decoder: Box<dyn AudioDecoder>,
}

impl Analyzer {
    pub fn new(settings: AnalysisSettings) -> Self {
        Self::with_decoder(settings, Box::new(SymphoniaDecoder))
    }

    pub fn with_decoder(settings: AnalysisSettings, decoder: Box<dyn AudioDecoder>) -> Self {
        Self { settings, decoder }
    }

    /// Analyze a compressed audio file held in memory.
    ///
    /// Never fails: undecodable input produces a filename-only result with
    /// `source = fallback`.
    pub fn analyze_bytes(&self, bytes: &[u8], filename: &str) -> AnalysisResult {
        let from_name = parse_filename(filename);
        if let Some(result) = self.fast_path(&from_name, 0.0) {
            return result;
        }

        let hint = extension_hint(filename);
        match self.decoder.decode(bytes, hint.as_deref()) {
            Ok(audio) => self.analyze_audio(&audio, from_name),
            Err(e) => {
                log::warn!("Could not decode {filename}: {e}");
                fallback(from_name, 0.0, AnalyzeError::from(e))
            }
        }
    }

    /// Analyze raw mono PCM. `duration` defaults to `len / sample_rate`.
    ///
    /// Never fails: a zero sample rate, an empty buffer or non-finite
    /// samples produce a filename-only result with `source = fallback`.
    pub fn analyze_pcm(
        &self,
        samples: Vec<f32>,
        sample_rate: u32,
        duration: Option<f64>,
        filename: &str,
    ) -> AnalysisResult {
        let from_name = parse_filename(filename);
        let audio = match duration {
            Some(d) if d.is_finite() && d >= 0.0 => {
                AudioSamples::with_duration(samples, sample_rate, d)
            }
            _ => AudioSamples::new(samples, sample_rate),
        };

        if let Some(result) = self.fast_path(&from_name, audio.duration()) {
            return result;
        }

        if let Err(e) = validate_pcm(&audio) {
            log::warn!("Rejecting PCM for {filename}: {e}");
            return fallback(from_name, audio.duration(), e);
        }
        self.analyze_audio(&audio, from_name)
    }

    /// Read a file from disk and analyze it. Only I/O failures are errors.
    pub fn analyze_path(&self, path: &Path) -> Result<AnalysisResult, AnalyzeError> {
        let bytes = std::fs::read(path)?;
        let filename = path.file_name().and_then(|f| f.to_str()).unwrap_or("");
        log::debug!("Analyzing: {}", path.display());
        Ok(self.analyze_bytes(&bytes, filename))
    }

    /// Analyze many files in parallel on a dedicated rayon pool of `jobs`
    /// threads, with a progress bar on stderr.
    pub fn analyze_paths(&self, paths: &[PathBuf], jobs: usize) -> BatchResult {
        if paths.is_empty() {
            log::info!("No files to analyze");
            return BatchResult {
                analyzed: 0,
                fallbacks: 0,
                failed: 0,
                outcomes: Vec::new(),
            };
        }

        log::info!("Analyzing {} files with {} workers", paths.len(), jobs);

        let pb = ProgressBar::new(paths.len() as u64);
        pb.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
        );

        let run = || {
            use rayon::prelude::*;
            paths
                .par_iter()
                .map(|path| {
                    let result = self.analyze_path(path);
                    pb.inc(1);
                    FileOutcome {
                        path: path.clone(),
                        result,
                    }
                })
                .collect::<Vec<_>>()
        };

        let outcomes = match rayon::ThreadPoolBuilder::new().num_threads(jobs).build() {
            Ok(pool) => pool.install(run),
            Err(e) => {
                log::warn!("Could not build a {jobs}-thread pool ({e}), using the global pool");
                run()
            }
        };

        let mut analyzed: u64 = 0;
        let mut fallbacks: u64 = 0;
        let mut failed: u64 = 0;
        for outcome in &outcomes {
            match &outcome.result {
                Ok(r) if r.metadata.source == AnalysisSource::Fallback => fallbacks += 1,
                Ok(_) => analyzed += 1,
                Err(e) => {
                    log::warn!("Analysis failed for {}: {}", outcome.path.display(), e);
                    failed += 1;
                }
            }
        }

        pb.finish_with_message(format!(
            "Done: {analyzed} analyzed, {fallbacks} fallback, {failed} failed"
        ));

        BatchResult {
            analyzed,
            fallbacks,
            failed,
            outcomes,
        }
    }

    fn fast_path(&self, from_name: &FilenameEstimate, duration: f64) -> Option<AnalysisResult> {
        if !self.settings.filename_fast_path
            || from_name.confidence <= self.settings.fast_path_confidence
        {
            return None;
        }
        let (bpm, key) = (from_name.bpm?, from_name.key?);

        log::debug!("Filename fast path: {bpm} BPM, {key}");
        Some(AnalysisResult {
            bpm,
            key: key.to_string(),
            compatible_keys: compatible_names(Some(key)),
            duration,
            confidence_score: from_name.confidence.clamp(0.0, 1.0),
            metadata: AnalysisMetadata {
                filename_analysis: from_name.clone(),
                audio_analysis: None,
                source: AnalysisSource::Filename,
                fallback_reason: None,
            },
        })
    }

    fn analyze_audio(&self, audio: &AudioSamples, from_name: FilenameEstimate) -> AnalysisResult {
        let (tempo_estimate, key_estimate) = if self.settings.parallel_estimators {
            rayon::join(
                || tempo::estimate_tempo(audio),
                || chroma::estimate_key(audio),
            )
        } else {
            (tempo::estimate_tempo(audio), chroma::estimate_key(audio))
        };

        let fused = fusion::fuse(&tempo_estimate, &key_estimate, &from_name);
        let key = fused.key.key;

        AnalysisResult {
            bpm: fused.bpm.bpm.clamp(MIN_BPM, MAX_BPM),
            key: key.map(|k| k.to_string()).unwrap_or_else(|| UNKNOWN_KEY.to_string()),
            compatible_keys: compatible_names(key),
            duration: audio.duration(),
            confidence_score: fused.confidence,
            metadata: AnalysisMetadata {
                filename_analysis: from_name,
                audio_analysis: Some(AudioAnalysis {
                    bpm_result: tempo_estimate,
                    key_result: key_estimate,
                }),
                source: AnalysisSource::Audio,
                fallback_reason: None,
            },
        }
    }
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new(AnalysisSettings::default())
    }
}

fn compatible_names(key: Option<MusicalKey>) -> Vec<String> {
    key.map(|k| compatible_keys(&k).iter().map(ToString::to_string).collect())
        .unwrap_or_default()
}

fn extension_hint(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
}

fn validate_pcm(audio: &AudioSamples) -> Result<(), AnalyzeError> {
    if audio.sample_rate() == 0 {
        return Err(AnalyzeError::InvalidInput("sample rate is 0".to_string()));
    }
    if audio.is_empty() {
        return Err(AnalyzeError::InvalidInput("PCM buffer is empty".to_string()));
    }
    if let Some(i) = audio.samples().iter().position(|s| !s.is_finite()) {
        return Err(AnalyzeError::InvalidInput(format!("non-finite sample at index {i}")));
    }
    Ok(())
}

/// Filename-only best effort after the audio path failed.
fn fallback(from_name: FilenameEstimate, duration: f64, reason: AnalyzeError) -> AnalysisResult {
    let key = from_name.key.unwrap_or(FALLBACK_KEY);
    let confidence = if from_name.confidence == 0.0 {
        FALLBACK_CONFIDENCE
    } else {
        from_name.confidence
    };

    AnalysisResult {
        bpm: from_name.bpm.unwrap_or(DEFAULT_BPM).clamp(MIN_BPM, MAX_BPM),
        key: key.to_string(),
        compatible_keys: compatible_names(Some(key)),
        duration,
        confidence_score: confidence.clamp(0.0, 1.0),
        metadata: AnalysisMetadata {
            filename_analysis: from_name,
            audio_analysis: None,
            source: AnalysisSource::Fallback,
            fallback_reason: Some(reason.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::decode::wav_bytes;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SR: u32 = 22_050;

    /// Decaying A-minor triad plucked every 10240 samples (≈129 BPM).
    fn minor_plucks(seconds: f64) -> Vec<f32> {
        let len = (SR as f64 * seconds) as usize;
        let tones = [(220.0, 0.5), (261.63, 0.4), (329.63, 0.4)];
        let mut samples = vec![0.0f32; len];
        let mut start = 256;
        while start < len {
            for (i, s) in samples[start..len.min(start + 10_240)].iter_mut().enumerate() {
                let t = i as f64 / SR as f64;
                let env = (-t / 0.1).exp();
                let v: f64 = tones
                    .iter()
                    .map(|(f, a)| a * (2.0 * std::f64::consts::PI * f * t).sin())
                    .sum();
                *s = (env * v) as f32;
            }
            start += 10_240;
        }
        samples
    }

    /// Counts calls and always fails.
    struct BrokenDecoder(Arc<AtomicUsize>);

    impl AudioDecoder for BrokenDecoder {
        fn decode(&self, _bytes: &[u8], _hint: Option<&str>) -> Result<AudioSamples, DecodeError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(DecodeError::Probe("corrupt header".to_string()))
        }
    }

    fn broken() -> (Analyzer, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let analyzer = Analyzer::with_decoder(
            AnalysisSettings::default(),
            Box::new(BrokenDecoder(calls.clone())),
        );
        (analyzer, calls)
    }

    fn no_fast_path() -> AnalysisSettings {
        AnalysisSettings {
            filename_fast_path: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_fast_path_skips_decoding() {
        let (analyzer, calls) = broken();
        let r = analyzer.analyze_bytes(b"whatever", "Track_128bpm_Amin.wav");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(r.bpm, 128);
        assert_eq!(r.key, "A Minor");
        assert_eq!(r.compatible_keys, vec!["C Major", "E Minor", "D Minor"]);
        assert_eq!(r.confidence_score, 1.0);
        assert_eq!(r.duration, 0.0);
        assert_eq!(r.metadata.source, AnalysisSource::Filename);
        assert!(r.metadata.audio_analysis.is_none());
    }

    #[test]
    fn test_fast_path_needs_both_fields() {
        let (analyzer, calls) = broken();
        let r = analyzer.analyze_bytes(b"whatever", "drums_128bpm.wav");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(r.metadata.source, AnalysisSource::Fallback);
    }

    #[test]
    fn test_fast_path_keeps_pcm_duration() {
        let analyzer = Analyzer::default();
        let r = analyzer.analyze_pcm(vec![0.0; 100], SR, Some(12.5), "loop 90 bpm Dmin.wav");
        assert_eq!(r.metadata.source, AnalysisSource::Filename);
        assert_eq!(r.bpm, 90);
        assert_eq!(r.key, "D Minor");
        assert_eq!(r.duration, 12.5);
    }

    #[test]
    fn test_decode_failure_falls_back_to_filename() {
        let (analyzer, _) = broken();
        let r = analyzer.analyze_bytes(b"junk", "bass_140bpm.mp3");
        assert_eq!(r.bpm, 140);
        assert_eq!(r.key, "C Major");
        assert_eq!(r.compatible_keys, vec!["A Minor", "G Major", "F Major"]);
        assert_eq!(r.confidence_score, 0.5);
        assert_eq!(r.metadata.source, AnalysisSource::Fallback);
        let reason = r.metadata.fallback_reason.unwrap();
        assert!(reason.contains("corrupt header"));
    }

    #[test]
    fn test_decode_failure_without_hints() {
        let r = Analyzer::default().analyze_bytes(b"not audio at all", "untitled.mp3");
        assert_eq!(r.bpm, 120);
        assert_eq!(r.key, "C Major");
        assert_eq!(r.confidence_score, 0.1);
        assert_eq!(r.metadata.source, AnalysisSource::Fallback);
    }

    #[test]
    fn test_invalid_pcm_falls_back() {
        let analyzer = Analyzer::default();
        let cases: Vec<(Vec<f32>, u32)> = vec![
            (vec![0.1; 1000], 0),
            (Vec::new(), 44_100),
            (vec![0.0, f32::NAN, 0.0], 44_100),
            (vec![f32::INFINITY; 4], 44_100),
        ];
        for (samples, sr) in cases {
            let r = analyzer.analyze_pcm(samples, sr, None, "take_95bpm.wav");
            assert_eq!(r.metadata.source, AnalysisSource::Fallback);
            assert_eq!(r.bpm, 95);
            assert_eq!(r.key, "C Major");
            assert_eq!(r.confidence_score, 0.5);
            assert!(r.metadata.fallback_reason.unwrap().starts_with("Invalid input"));
        }
    }

    #[test]
    fn test_full_path_detects_tempo_and_key() {
        let analyzer = Analyzer::default();
        let r = analyzer.analyze_pcm(minor_plucks(8.0), SR, None, "pluck_loop.wav");
        assert_eq!(r.metadata.source, AnalysisSource::Audio);
        assert!((128..=130).contains(&r.bpm), "bpm {}", r.bpm);
        assert_eq!(r.key, "A Minor");
        assert!(!r.compatible_keys.contains(&r.key));
        assert!((r.duration - 8.0).abs() < 1e-3);

        let audio = r.metadata.audio_analysis.unwrap();
        assert_eq!(audio.bpm_result.confidence, 0.7);
        assert!(audio.key_result.confidence > 0.9);
        let expected = (0.7 + audio.key_result.confidence) / 2.0;
        assert!((r.confidence_score - expected).abs() < 1e-6);
    }

    #[test]
    fn test_full_path_agreement_with_filename_boosts() {
        let analyzer = Analyzer::new(no_fast_path());
        let r = analyzer.analyze_pcm(minor_plucks(8.0), SR, None, "Track_128bpm_Amin.wav");
        assert_eq!(r.metadata.source, AnalysisSource::Audio);
        assert_eq!(r.key, "A Minor");
        assert!((127..=130).contains(&r.bpm));
        // bpm 0.7 + 0.2, key boosted to 1.0
        assert!((r.confidence_score - 0.95).abs() < 1e-6);
    }

    #[test]
    fn test_sequential_estimators_match_parallel() {
        let samples = minor_plucks(6.0);
        let parallel = Analyzer::default().analyze_pcm(samples.clone(), SR, None, "a.wav");
        let sequential = Analyzer::new(AnalysisSettings {
            parallel_estimators: false,
            ..Default::default()
        })
        .analyze_pcm(samples, SR, None, "a.wav");
        assert_eq!(parallel, sequential);
    }

    #[test]
    fn test_analyze_bytes_decodes_wav() {
        let quiet: Vec<f32> = minor_plucks(8.0).iter().map(|s| s * 0.6).collect();
        let bytes = wav_bytes(&quiet, SR, 1);
        let r = Analyzer::default().analyze_bytes(&bytes, "loop.wav");
        assert_eq!(r.metadata.source, AnalysisSource::Audio);
        assert_eq!(r.key, "A Minor");
        assert!((128..=130).contains(&r.bpm));
        assert!((r.duration - 8.0).abs() < 1e-3);
    }

    #[test]
    fn test_silence_gives_defaults() {
        let r = Analyzer::default().analyze_pcm(vec![0.0; SR as usize * 4], SR, None, "");
        assert_eq!(r.metadata.source, AnalysisSource::Audio);
        assert_eq!(r.bpm, 120);
        assert!((0.0..=1.0).contains(&r.confidence_score));
    }

    #[test]
    fn test_confidence_and_bpm_bounds_hold_for_odd_inputs() {
        let analyzer = Analyzer::default();
        let inputs: Vec<(Vec<f32>, u32, &str)> = vec![
            (vec![0.5], 44_100, ""),
            (vec![1.0; 3000], 8_000, "999bpm"),
            (vec![-1.0; 50_000], 44_100, "weird_55bpm_Zmaj.ogg"),
            (minor_plucks(2.0), SR, "x_300bpm_C#m.wav"),
        ];
        for (samples, sr, name) in inputs {
            let r = analyzer.analyze_pcm(samples, sr, None, name);
            assert!((0.0..=1.0).contains(&r.confidence_score), "{name}");
            assert!((MIN_BPM..=MAX_BPM).contains(&r.bpm), "{name}");
            assert!(!r.compatible_keys.contains(&r.key));
        }
    }

    #[test]
    fn test_analyze_path_missing_file_is_io_error() {
        let err = Analyzer::default()
            .analyze_path(Path::new("/definitely/not/here.wav"))
            .unwrap_err();
        assert!(matches!(err, AnalyzeError::Io(_)));
    }

    #[test]
    fn test_analyze_paths_counts_outcomes() {
        let dir = std::env::temp_dir().join(format!("beatprobe_batch_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let fast = dir.join("hook_100bpm_Gmaj.wav");
        let broken = dir.join("broken.wav");
        std::fs::write(&fast, b"").unwrap();
        std::fs::write(&broken, b"nope").unwrap();
        let missing = dir.join("missing.wav");

        let batch = Analyzer::default().analyze_paths(&[fast, broken, missing], 2);
        assert_eq!(batch.analyzed, 1);
        assert_eq!(batch.fallbacks, 1);
        assert_eq!(batch.failed, 1);
        assert_eq!(batch.outcomes.len(), 3);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_settings_deserialize_with_defaults() {
        let s: AnalysisSettings = toml::from_str("parallel_estimators = false").unwrap();
        assert!(!s.parallel_estimators);
        assert!(s.filename_fast_path);
        assert_eq!(s.fast_path_confidence, 0.8);
    }
}
