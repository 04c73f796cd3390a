//! Onset-based tempo estimation.
//!
//! Short-time energy over fixed frames, local energy peaks as onsets, and
//! the median inter-onset interval converted to BPM.

use crate::models::{AudioSamples, DEFAULT_BPM, TempoEstimate, bpm_in_range};

pub const FRAME_SIZE: usize = 1024;
pub const HOP_SIZE: usize = 512;

/// Frames quieter than this never count as onsets.
const ENERGY_FLOOR: f64 = 0.01;
const MIN_ONSETS: usize = 4;
/// Median interval bounds in seconds (exclusive): 240 down to 40 BPM.
const MIN_INTERVAL: f64 = 0.25;
const MAX_INTERVAL: f64 = 1.5;

const FALLBACK_CONFIDENCE: f32 = 0.3;
const PERIODIC_CONFIDENCE: f32 = 0.7;

fn fallback() -> TempoEstimate {
    TempoEstimate {
        bpm: DEFAULT_BPM,
        confidence: FALLBACK_CONFIDENCE,
    }
}

/// Sum of squares per frame; frame `i` starts at `i * HOP_SIZE`.
pub fn frame_energies(samples: &[f32]) -> Vec<f64> {
    if samples.len() < FRAME_SIZE {
        return Vec::new();
    }
    let frame_count = (samples.len() - FRAME_SIZE) / HOP_SIZE + 1;
    (0..frame_count)
        .map(|i| {
            let start = i * HOP_SIZE;
            samples[start..start + FRAME_SIZE]
                .iter()
                .map(|&s| (s as f64) * (s as f64))
                .sum()
        })
        .collect()
}

/// Onset times in seconds: interior frames louder than both neighbours and
/// the energy floor.
pub fn detect_onsets(energies: &[f64], sample_rate: u32) -> Vec<f64> {
    if energies.len() < 3 || sample_rate == 0 {
        return Vec::new();
    }
    energies
        .windows(3)
        .enumerate()
        .filter(|(_, w)| w[1] > w[0] && w[1] > w[2] && w[1] > ENERGY_FLOOR)
        .map(|(i, _)| ((i + 1) * HOP_SIZE) as f64 / sample_rate as f64)
        .collect()
}

/// Median of consecutive gaps, taking the element at `n / 2` after sorting.
fn median_interval(onsets: &[f64]) -> Option<f64> {
    let mut gaps: Vec<f64> = onsets.windows(2).map(|w| w[1] - w[0]).collect();
    if gaps.is_empty() {
        return None;
    }
    gaps.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    Some(gaps[gaps.len() / 2])
}

/// Estimate tempo. Never fails: weak or aperiodic input yields 120 BPM at
/// confidence 0.3.
pub fn estimate_tempo(audio: &AudioSamples) -> TempoEstimate {
    let energies = frame_energies(audio.samples());
    let onsets = detect_onsets(&energies, audio.sample_rate());

    if onsets.len() < MIN_ONSETS {
        log::debug!("Tempo: {} onsets, using fallback", onsets.len());
        return fallback();
    }

    let Some(median) = median_interval(&onsets) else {
        return fallback();
    };

    if median <= MIN_INTERVAL || median >= MAX_INTERVAL {
        log::debug!("Tempo: median interval {median:.3}s out of range");
        return fallback();
    }

    let bpm = (60.0 / median).round() as u32;
    if !bpm_in_range(bpm) {
        return fallback();
    }

    log::debug!(
        "Tempo: {} onsets, median interval {:.3}s -> {} BPM",
        onsets.len(),
        median,
        bpm
    );
    TempoEstimate {
        bpm,
        confidence: PERIODIC_CONFIDENCE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Rectangular bursts of 512 samples that straddle a hop boundary, so
    /// exactly one frame contains each burst in full.
    fn pulse_train(sample_rate: u32, interval_hops: usize, seconds: f64) -> AudioSamples {
        let len = (sample_rate as f64 * seconds) as usize;
        let mut samples = vec![0.0f32; len];
        let mut hop = 1;
        while (hop * HOP_SIZE + HOP_SIZE / 2 + HOP_SIZE) <= len {
            let start = hop * HOP_SIZE + HOP_SIZE / 2;
            for s in &mut samples[start..start + HOP_SIZE] {
                *s = 0.8;
            }
            hop += interval_hops;
        }
        AudioSamples::new(samples, sample_rate)
    }

    #[test]
    fn test_frame_energies_layout() {
        let samples = vec![0.5f32; FRAME_SIZE + HOP_SIZE * 2];
        let e = frame_energies(&samples);
        assert_eq!(e.len(), 3);
        assert!((e[0] - 256.0).abs() < 1e-9);
        assert!(frame_energies(&[0.1; FRAME_SIZE - 1]).is_empty());
    }

    #[test]
    fn test_periodic_pulses_150_bpm() {
        // 20 hops at 25600 Hz = 0.4 s
        let audio = pulse_train(25_600, 20, 6.0);
        let t = estimate_tempo(&audio);
        assert_eq!(t.bpm, 150);
        assert_eq!(t.confidence, 0.7);
    }

    #[test]
    fn test_periodic_pulses_100_bpm() {
        // 30 hops at 25600 Hz = 0.6 s
        let audio = pulse_train(25_600, 30, 8.0);
        let t = estimate_tempo(&audio);
        assert_eq!(t.bpm, 100);
        assert_eq!(t.confidence, 0.7);
    }

    #[test]
    fn test_range_endpoints_are_accepted() {
        // 15 hops = 0.3 s -> 200 BPM, 50 hops = 1.0 s -> 60 BPM
        for (hops, seconds, bpm) in [(15, 4.0, 200), (50, 8.0, 60)] {
            let t = estimate_tempo(&pulse_train(25_600, hops, seconds));
            assert_eq!(t, TempoEstimate { bpm, confidence: 0.7 });
        }
    }

    #[test]
    fn test_pulses_near_target_at_cd_rate() {
        // 43 hops at 44100 Hz ≈ 0.4992 s -> round(120.19) = 120, within ±1 of 60/T
        let audio = pulse_train(44_100, 43, 8.0);
        let t = estimate_tempo(&audio);
        let expected = 60.0 / (43.0 * HOP_SIZE as f64 / 44_100.0);
        assert!((t.bpm as f64 - expected).abs() <= 1.0);
        assert_eq!(t.confidence, 0.7);
    }

    #[test]
    fn test_silence_falls_back() {
        for len in [0, 1, 1000, 44_100 * 3] {
            let t = estimate_tempo(&AudioSamples::new(vec![0.0; len], 44_100));
            assert_eq!(t, TempoEstimate { bpm: 120, confidence: 0.3 });
        }
    }

    #[test]
    fn test_too_few_onsets_falls_back() {
        // three pulses only
        let audio = pulse_train(25_600, 20, 1.2);
        assert_eq!(detect_onsets(&frame_energies(audio.samples()), 25_600).len(), 3);
        assert_eq!(estimate_tempo(&audio).confidence, 0.3);
    }

    #[test]
    fn test_interval_too_long_falls_back() {
        // 2 s apart -> 30 BPM
        let audio = pulse_train(25_600, 100, 12.0);
        let t = estimate_tempo(&audio);
        assert_eq!(t, TempoEstimate { bpm: 120, confidence: 0.3 });
    }

    #[test]
    fn test_interval_too_short_falls_back() {
        // 0.2 s apart -> 300 BPM
        let audio = pulse_train(25_600, 10, 4.0);
        let t = estimate_tempo(&audio);
        assert_eq!(t, TempoEstimate { bpm: 120, confidence: 0.3 });
    }

    #[test]
    fn test_quiet_peaks_below_floor_ignored() {
        let energies = vec![0.0, 0.005, 0.0, 0.008, 0.0, 0.009, 0.0, 0.001, 0.0];
        assert!(detect_onsets(&energies, 44_100).is_empty());
    }

    #[test]
    fn test_onset_times_use_frame_index() {
        let energies = vec![0.0, 1.0, 0.0, 0.0, 2.0, 0.0];
        let onsets = detect_onsets(&energies, 512);
        assert_eq!(onsets, vec![1.0, 4.0]);
    }

    #[test]
    fn test_median_takes_upper_middle() {
        let onsets = [0.0, 0.5, 1.5, 2.0, 2.6];
        // gaps sorted: 0.5, 0.5, 0.6, 1.0 -> index 2
        let m = median_interval(&onsets).unwrap();
        assert!((m - 0.6).abs() < 1e-9);
    }
}
