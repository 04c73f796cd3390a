use crate::key::{MusicalKey, UNKNOWN_KEY};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Lowest tempo the engine will ever report.
pub const MIN_BPM: u32 = 60;
/// Highest tempo the engine will ever report.
pub const MAX_BPM: u32 = 200;
/// Tempo reported when nothing better is known.
pub const DEFAULT_BPM: u32 = 120;

pub fn bpm_in_range(bpm: u32) -> bool {
    (MIN_BPM..=MAX_BPM).contains(&bpm)
}

/// Decoded single-channel audio. Never mutated once built.
#[derive(Debug, Clone)]
pub struct AudioSamples {
    samples: Vec<f32>,
    sample_rate: u32,
    duration: f64,
}

impl AudioSamples {
    /// Wrap mono samples; duration is derived from the sample count.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        let duration = if sample_rate > 0 {
            samples.len() as f64 / sample_rate as f64
        } else {
            0.0
        };
        Self { samples, sample_rate, duration }
    }

    /// Wrap mono samples with a caller-supplied duration (PCM requests
    /// carry their own).
    pub fn with_duration(samples: Vec<f32>, sample_rate: u32, duration: f64) -> Self {
        Self { samples, sample_rate, duration }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// What the filename alone suggests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilenameEstimate {
    pub bpm: Option<u32>,
    pub key: Option<MusicalKey>,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempoEstimate {
    pub bpm: u32,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeyEstimate {
    #[serde(serialize_with = "key_or_unknown", deserialize_with = "key_from_name")]
    pub key: Option<MusicalKey>,
    pub confidence: f32,
}

impl KeyEstimate {
    pub fn unknown() -> Self {
        Self { key: None, confidence: 0.0 }
    }
}

fn key_or_unknown<S: Serializer>(key: &Option<MusicalKey>, s: S) -> Result<S::Ok, S::Error> {
    match key {
        Some(k) => s.serialize_str(&k.to_string()),
        None => s.serialize_str(UNKNOWN_KEY),
    }
}

fn key_from_name<'de, D: Deserializer<'de>>(d: D) -> Result<Option<MusicalKey>, D::Error> {
    let name = String::deserialize(d)?;
    if name == UNKNOWN_KEY {
        return Ok(None);
    }
    name.parse().map(Some).map_err(serde::de::Error::custom)
}

/// 12-bin pitch-class energy, index 0 = C.
pub type ChromaVector = [f64; 12];

/// Which branch of the orchestrator produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisSource {
    /// Filename was confident enough; audio never decoded.
    Filename,
    /// Full audio analysis fused with the filename.
    Audio,
    /// Audio path failed; filename-only best effort.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioAnalysis {
    pub bpm_result: TempoEstimate,
    pub key_result: KeyEstimate,
}

/// Intermediate results kept for observability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisMetadata {
    pub filename_analysis: FilenameEstimate,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub audio_analysis: Option<AudioAnalysis>,
    pub source: AnalysisSource,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub fallback_reason: Option<String>,
}

/// Final, immutable output of one analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub bpm: u32,
    pub key: String,
    pub compatible_keys: Vec<String>,
    pub duration: f64,
    pub confidence_score: f32,
    pub metadata: AnalysisMetadata,
}
