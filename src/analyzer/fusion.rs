//! Reconcile audio-derived estimates with the filename hint.
//!
//! BPM and key are reconciled independently; the final confidence is the
//! mean of the two reconciled confidences.

use crate::key::MusicalKey;
use crate::models::{FilenameEstimate, KeyEstimate, TempoEstimate, bpm_in_range};

/// Filename hints at or below this confidence are ignored.
const FILENAME_MIN_CONFIDENCE: f32 = 0.3;

const BPM_WEAK_AUDIO: f32 = 0.5;
const BPM_AGREE_DELTA: u32 = 5;
const BPM_CONFLICT_DELTA: u32 = 20;
const BPM_AGREE_BOOST: f32 = 0.2;
const BPM_CONFLICT_CONFIDENCE: f32 = 0.6;
const BPM_CONFLICT_PENALTY: f32 = 0.2;
const BPM_CONFIDENCE_FLOOR: f32 = 0.3;

const KEY_WEAK_AUDIO: f32 = 0.4;
const KEY_AGREE_BOOST: f32 = 0.3;
const KEY_CONFLICT_PENALTY: f32 = 0.2;
const KEY_CONFIDENCE_FLOOR: f32 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconciledBpm {
    pub bpm: u32,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconciledKey {
    pub key: Option<MusicalKey>,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fused {
    pub bpm: ReconciledBpm,
    pub key: ReconciledKey,
    /// Mean of the BPM and key confidences, in [0, 1].
    pub confidence: f32,
}

pub fn reconcile_bpm(audio: &TempoEstimate, filename: &FilenameEstimate) -> ReconciledBpm {
    let keep = ReconciledBpm {
        bpm: audio.bpm,
        confidence: audio.confidence,
    };

    let Some(file_bpm) = filename.bpm else {
        return keep;
    };
    if filename.confidence <= FILENAME_MIN_CONFIDENCE {
        return keep;
    }

    if audio.confidence < BPM_WEAK_AUDIO {
        return ReconciledBpm {
            bpm: file_bpm,
            confidence: filename.confidence,
        };
    }

    let diff = audio.bpm.abs_diff(file_bpm);
    if diff <= BPM_AGREE_DELTA {
        return ReconciledBpm {
            bpm: audio.bpm,
            confidence: (audio.confidence + BPM_AGREE_BOOST).min(1.0),
        };
    }

    if diff > BPM_CONFLICT_DELTA {
        if bpm_in_range(file_bpm) {
            return ReconciledBpm {
                bpm: file_bpm,
                confidence: BPM_CONFLICT_CONFIDENCE,
            };
        }
        return ReconciledBpm {
            bpm: audio.bpm,
            confidence: (audio.confidence - BPM_CONFLICT_PENALTY).max(BPM_CONFIDENCE_FLOOR),
        };
    }

    // 5 < diff <= 20 with confident audio: left as-is
    log::debug!(
        "BPM: audio {} vs filename {} differ by {}, keeping audio",
        audio.bpm,
        file_bpm,
        diff
    );
    keep
}

pub fn reconcile_key(audio: &KeyEstimate, filename: &FilenameEstimate) -> ReconciledKey {
    let keep = ReconciledKey {
        key: audio.key,
        confidence: audio.confidence,
    };

    let Some(file_key) = filename.key else {
        return keep;
    };
    if filename.confidence <= FILENAME_MIN_CONFIDENCE {
        return keep;
    }

    let Some(audio_key) = audio.key.filter(|_| audio.confidence >= KEY_WEAK_AUDIO) else {
        return ReconciledKey {
            key: Some(file_key),
            confidence: filename.confidence,
        };
    };

    if audio_key == file_key {
        ReconciledKey {
            key: Some(audio_key),
            confidence: (audio.confidence + KEY_AGREE_BOOST).min(1.0),
        }
    } else {
        ReconciledKey {
            key: Some(audio_key),
            confidence: (audio.confidence - KEY_CONFLICT_PENALTY).max(KEY_CONFIDENCE_FLOOR),
        }
    }
}

/// Combine all three partial results.
pub fn fuse(tempo: &TempoEstimate, key: &KeyEstimate, filename: &FilenameEstimate) -> Fused {
    let bpm = reconcile_bpm(tempo, filename);
    let key = reconcile_key(key, filename);
    let confidence = ((bpm.confidence + key.confidence) / 2.0).clamp(0.0, 1.0);
    Fused { bpm, key, confidence }
}
