use crate::key::{Mode, MusicalKey, PitchClass};
use crate::models::{FilenameEstimate, bpm_in_range};
use regex::Regex;
use std::sync::LazyLock;

/// Confidence contributed by each recognised field.
const FIELD_CONFIDENCE: f32 = 0.5;

// BPM patterns, tried in order. Only the first match of each pattern is
// considered; an out-of-range value moves on to the next pattern.
static BPM_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // "128bpm", "128 bpm"
        r"(?:^|\D)(\d{2,3})\s*bpm",
        // "bpm128", "bpm 128"
        r"bpm\s*(\d{2,3})(?:\D|$)",
        // "90 beats"
        r"(?:^|\D)(\d{2,3})\s*beats",
        // standalone "_128_", "- 95 -", "140" at either end
        r"(?:^|[\s_\-.])(\d{2,3})(?:[\s_\-.]|$)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Key-name patterns: note letter, optional accidental, mode marker.
struct KeyPattern {
    re: Regex,
    is_minor_pattern: bool,
}

static KEY_PATTERNS: LazyLock<Vec<KeyPattern>> = LazyLock::new(|| {
    [
        // "cmaj", "c# major", "eb_major"
        (r"(?:^|[^a-z])(?P<note>[a-g])(?P<acc>[#bs])?[\s_\-]*(?P<mode>major|maj)(?:[^a-z]|$)", false),
        // "amin", "c_minor", "f# min"
        (r"(?:^|[^a-z])(?P<note>[a-g])(?P<acc>[#bs])?[\s_\-]*(?P<mode>minor|min)(?:[^a-z]|$)", true),
        // "am", "f#m"
        (r"(?:^|[^a-z])(?P<note>[a-g])(?P<acc>[#bs])?(?P<mode>m)(?:[^a-z]|$)", false),
    ]
    .iter()
    .map(|(p, is_minor_pattern)| KeyPattern {
        re: Regex::new(p).unwrap(),
        is_minor_pattern: *is_minor_pattern,
    })
    .collect()
});

/// Lower-case and drop a trailing `.ext`.
fn clean_filename(filename: &str) -> String {
    let lower = filename.to_lowercase();
    match lower.rfind('.') {
        Some(dot) if !lower[dot + 1..].is_empty() && !lower[dot + 1..].contains('/') => {
            lower[..dot].to_string()
        }
        _ => lower,
    }
}

fn parse_bpm(clean: &str) -> Option<u32> {
    for re in BPM_PATTERNS.iter() {
        let Some(value) = re
            .captures(clean)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok())
        else {
            continue;
        };
        if bpm_in_range(value) {
            return Some(value);
        }
    }
    None
}

/// Rewrite a note letter plus accidental to sharp spelling.
///
/// Any accidental (`#`, flat `b`, sharp `s`) becomes `letter#`. This is a
/// textual rewrite, so a flat lands a semitone too high (`db` -> `D#`).
fn normalize_note(letter: &str, accidental: Option<&str>) -> String {
    let letter = letter.to_uppercase();
    match accidental {
        Some(_) => format!("{letter}#"),
        None => letter,
    }
}

fn parse_key(clean: &str) -> Option<MusicalKey> {
    for pattern in KEY_PATTERNS.iter() {
        let Some(caps) = pattern.re.captures(clean) else {
            continue;
        };
        let note = normalize_note(
            caps.name("note").map(|m| m.as_str()).unwrap_or_default(),
            caps.name("acc").map(|m| m.as_str()),
        );
        let modifier = caps.name("mode").map(|m| m.as_str()).unwrap_or_default();
        let minor_marker = matches!(modifier, "m" | "min" | "minor");
        let is_minor = minor_marker || pattern.is_minor_pattern || clean.contains("minor");
        let mode = if is_minor { Mode::Minor } else { Mode::Major };

        let tonic = PitchClass::from_sharp_name(&note)?;
        return Some(MusicalKey::new(tonic, mode));
    }
    None
}

/// Guess BPM and key from a free-text filename.
///
/// Each recognised field adds 0.5 confidence. Pure; never fails.
pub fn parse_filename(filename: &str) -> FilenameEstimate {
    let clean = clean_filename(filename);
    if clean.trim().is_empty() {
        return FilenameEstimate::default();
    }

    let mut confidence = 0.0f32;

    let bpm = parse_bpm(&clean);
    if bpm.is_some() {
        confidence += FIELD_CONFIDENCE;
    }

    let key = parse_key(&clean);
    if key.is_some() {
        confidence += FIELD_CONFIDENCE;
    }

    FilenameEstimate {
        bpm,
        key,
        confidence: confidence.min(1.0),
    }
}
