//! Chroma-based key estimation.
//!
//! The buffer is split into three contiguous segments. Each segment yields a
//! 12-bin pitch-class profile from Hann-windowed magnitude spectra, the
//! profiles are averaged, and the average is correlated against the
//! Krumhansl-Schmuckler major/minor profiles for all 24 keys.

use crate::key::{Mode, MusicalKey, PitchClass};
use crate::models::{AudioSamples, ChromaVector, KeyEstimate};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::f64::consts::PI;
use std::ops::Range;
use std::sync::Arc;

pub const FRAME_SIZE: usize = 2048;
pub const HOP_SIZE: usize = 1024;
pub const SEGMENT_COUNT: usize = 3;

/// Bins outside this band (Hz) are ignored.
const MIN_FREQ: f64 = 80.0;
const MAX_FREQ: f64 = 2000.0;
const A4_FREQ: f64 = 440.0;
const A4_MIDI: f64 = 69.0;

/// Krumhansl-Schmuckler major profile, index 0 = tonic.
pub const MAJOR_PROFILE: [f64; 12] = [
    6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88,
];

/// Krumhansl-Schmuckler minor profile, index 0 = tonic.
pub const MINOR_PROFILE: [f64; 12] = [
    6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17,
];

/// Reusable FFT plan, window and bin -> pitch-class map for one sample rate.
struct ChromaExtractor {
    fft: Arc<dyn Fft<f64>>,
    window: Vec<f64>,
    /// One entry per bin 0..=N/2; `None` outside the analysed band.
    bin_pitch_class: Vec<Option<usize>>,
    buffer: Vec<Complex<f64>>,
}

impl ChromaExtractor {
    fn new(sample_rate: u32) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(FRAME_SIZE);

        let window = (0..FRAME_SIZE)
            .map(|n| 0.5 - 0.5 * (2.0 * PI * n as f64 / (FRAME_SIZE - 1) as f64).cos())
            .collect();

        let bin_pitch_class = (0..=FRAME_SIZE / 2)
            .map(|k| {
                let freq = k as f64 * sample_rate as f64 / FRAME_SIZE as f64;
                (MIN_FREQ..=MAX_FREQ)
                    .contains(&freq)
                    .then(|| frequency_to_pitch_class(freq))
            })
            .collect();

        Self {
            fft,
            window,
            bin_pitch_class,
            buffer: vec![Complex::new(0.0, 0.0); FRAME_SIZE],
        }
    }

    /// Accumulate one frame's in-band magnitudes into `acc`.
    fn accumulate_frame(&mut self, frame: &[f32], acc: &mut ChromaVector) {
        for ((slot, &s), w) in self.buffer.iter_mut().zip(frame).zip(&self.window) {
            *slot = Complex::new(s as f64 * w, 0.0);
        }
        self.fft.process(&mut self.buffer);

        for (bin, pc) in self.bin_pitch_class.iter().enumerate() {
            if let Some(pc) = pc {
                acc[*pc] += self.buffer[bin].norm();
            }
        }
    }

    /// Mean chroma over all full frames of a segment, or `None` if the
    /// segment is shorter than one frame.
    fn segment_chroma(&mut self, segment: &[f32]) -> Option<ChromaVector> {
        if segment.len() < FRAME_SIZE {
            return None;
        }
        let frame_count = (segment.len() - FRAME_SIZE) / HOP_SIZE + 1;
        let mut acc: ChromaVector = [0.0; 12];
        for i in 0..frame_count {
            let start = i * HOP_SIZE;
            self.accumulate_frame(&segment[start..start + FRAME_SIZE], &mut acc);
        }
        for v in &mut acc {
            *v /= frame_count as f64;
        }
        Some(acc)
    }
}

/// `round(12 * log2(f / 440) + 69) mod 12`, 0 = C.
pub fn frequency_to_pitch_class(freq: f64) -> usize {
    let midi = 12.0 * (freq / A4_FREQ).log2() + A4_MIDI;
    (midi.round() as i64).rem_euclid(12) as usize
}

/// Three contiguous ranges; the last one takes the remainder.
pub fn segment_ranges(len: usize) -> Vec<Range<usize>> {
    let seg_len = len / SEGMENT_COUNT;
    (0..SEGMENT_COUNT)
        .map(|i| {
            let start = i * seg_len;
            let end = if i == SEGMENT_COUNT - 1 { len } else { start + seg_len };
            start..end
        })
        .collect()
}

/// Average chroma across the segments that hold at least one frame.
///
/// Returns `None` when no segment does (short buffers, zero sample rate).
pub fn extract_chroma(audio: &AudioSamples) -> Option<ChromaVector> {
    if audio.sample_rate() == 0 {
        return None;
    }
    let samples = audio.samples();
    let mut extractor = ChromaExtractor::new(audio.sample_rate());

    let mut sum: ChromaVector = [0.0; 12];
    let mut valid = 0usize;
    for range in segment_ranges(samples.len()) {
        if let Some(chroma) = extractor.segment_chroma(&samples[range]) {
            for (s, c) in sum.iter_mut().zip(chroma) {
                *s += c;
            }
            valid += 1;
        }
    }

    if valid == 0 {
        return None;
    }
    for s in &mut sum {
        *s /= valid as f64;
    }
    Some(sum)
}

/// Pearson correlation; 0 when either input has zero variance.
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len()) as f64;
    let (mut sx, mut sy, mut sxy, mut sx2, mut sy2) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for (&a, &b) in x.iter().zip(y) {
        sx += a;
        sy += b;
        sxy += a * b;
        sx2 += a * a;
        sy2 += b * b;
    }
    let denom = ((n * sx2 - sx * sx) * (n * sy2 - sy * sy)).sqrt();
    if denom == 0.0 || !denom.is_finite() {
        return 0.0;
    }
    (n * sxy - sx * sy) / denom
}

/// Place profile position 0 on the tonic's pitch class.
fn rotate_profile(profile: &[f64; 12], tonic: usize) -> [f64; 12] {
    let mut out = [0.0; 12];
    for (i, &v) in profile.iter().enumerate() {
        out[(i + tonic) % 12] = v;
    }
    out
}

/// Best of the 24 keys for a chroma vector. Ties keep the earliest
/// candidate (tonics ascending from C, major before minor).
pub fn score_key(chroma: &ChromaVector) -> KeyEstimate {
    let mut best_score = f64::NEG_INFINITY;
    let mut best_key = MusicalKey::new(PitchClass::C, Mode::Major);

    for tonic in 0..12 {
        for (mode, profile) in [(Mode::Major, &MAJOR_PROFILE), (Mode::Minor, &MINOR_PROFILE)] {
            let score = pearson(chroma, &rotate_profile(profile, tonic));
            if score > best_score {
                best_score = score;
                best_key = MusicalKey::new(PitchClass::from_index(tonic), mode);
            }
        }
    }

    let confidence = ((best_score + 1.0) / 2.0).clamp(0.0, 1.0) as f32;
    log::debug!("Key: {best_key} (r = {best_score:.3})");
    KeyEstimate {
        key: Some(best_key),
        confidence,
    }
}

/// Estimate the key; `Unknown` at confidence 0 when no chroma could be built.
pub fn estimate_key(audio: &AudioSamples) -> KeyEstimate {
    match extract_chroma(audio) {
        Some(chroma) => score_key(&chroma),
        None => {
            log::debug!("Key: no analysable segment in {} samples", audio.len());
            KeyEstimate::unknown()
        }
    }
}
