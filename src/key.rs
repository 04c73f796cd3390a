//! Pitch classes, modes and key names.
//!
//! Key strings always use sharps ("C# Minor", never "Db Minor") so that two
//! keys can be compared by plain string equality.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Sentinel key name used when no key could be determined.
pub const UNKNOWN_KEY: &str = "Unknown";

#[derive(Error, Debug, PartialEq)]
pub enum KeyParseError {
    #[error("unknown pitch class: {0}")]
    PitchClass(String),
    #[error("unknown mode: {0}")]
    Mode(String),
    #[error("expected \"<note> <Major|Minor>\", got {0:?}")]
    Format(String),
}

/// The twelve pitch classes, index 0 = C, ascending by semitone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PitchClass {
    C,
    Cs,
    D,
    Ds,
    E,
    F,
    Fs,
    G,
    Gs,
    A,
    As,
    B,
}

impl PitchClass {
    pub const ALL: [PitchClass; 12] = [
        PitchClass::C,
        PitchClass::Cs,
        PitchClass::D,
        PitchClass::Ds,
        PitchClass::E,
        PitchClass::F,
        PitchClass::Fs,
        PitchClass::G,
        PitchClass::Gs,
        PitchClass::A,
        PitchClass::As,
        PitchClass::B,
    ];

    /// Pitch class for a semitone index; wraps modulo 12.
    pub fn from_index(index: usize) -> Self {
        Self::ALL[index % 12]
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn transpose(self, semitones: usize) -> Self {
        Self::from_index(self.index() + semitones)
    }

    pub fn name(self) -> &'static str {
        match self {
            PitchClass::C => "C",
            PitchClass::Cs => "C#",
            PitchClass::D => "D",
            PitchClass::Ds => "D#",
            PitchClass::E => "E",
            PitchClass::F => "F",
            PitchClass::Fs => "F#",
            PitchClass::G => "G",
            PitchClass::Gs => "G#",
            PitchClass::A => "A",
            PitchClass::As => "A#",
            PitchClass::B => "B",
        }
    }

    /// Parse a natural letter with an optional `#`.
    ///
    /// `E#` and `B#` have no sharp spelling of their own and resolve to F and C.
    pub fn from_sharp_name(name: &str) -> Option<Self> {
        let mut chars = name.chars();
        let letter = chars.next()?.to_ascii_uppercase();
        let natural = match letter {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _ => return None,
        };
        match chars.as_str() {
            "" => Some(Self::from_index(natural)),
            "#" => Some(Self::from_index(natural + 1)),
            _ => None,
        }
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Major,
    Minor,
}

impl Mode {
    pub fn name(self) -> &'static str {
        match self {
            Mode::Major => "Major",
            Mode::Minor => "Minor",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A tonic plus a mode, rendered as `"<PitchClass> <Major|Minor>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MusicalKey {
    pub tonic: PitchClass,
    pub mode: Mode,
}

impl MusicalKey {
    pub const fn new(tonic: PitchClass, mode: Mode) -> Self {
        Self { tonic, mode }
    }
}

impl fmt::Display for MusicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.tonic, self.mode)
    }
}

impl FromStr for MusicalKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let (Some(note), Some(mode), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(KeyParseError::Format(s.to_string()));
        };
        let tonic = PitchClass::from_sharp_name(note)
            .ok_or_else(|| KeyParseError::PitchClass(note.to_string()))?;
        let mode = match mode.to_ascii_lowercase().as_str() {
            "major" => Mode::Major,
            "minor" => Mode::Minor,
            _ => return Err(KeyParseError::Mode(mode.to_string())),
        };
        Ok(Self { tonic, mode })
    }
}

impl TryFrom<String> for MusicalKey {
    type Error = KeyParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MusicalKey> for String {
    fn from(key: MusicalKey) -> Self {
        key.to_string()
    }
}

/// Harmonically compatible keys for mixing: relative major/minor plus the
/// neighbours a fifth up and a fifth down, in that order.
///
/// The result never contains `key` itself and has no duplicates.
pub fn compatible_keys(key: &MusicalKey) -> Vec<MusicalKey> {
    let t = key.tonic;
    let candidates = match key.mode {
        Mode::Major => [
            MusicalKey::new(t.transpose(9), Mode::Minor),
            MusicalKey::new(t.transpose(7), Mode::Major),
            MusicalKey::new(t.transpose(5), Mode::Major),
        ],
        Mode::Minor => [
            MusicalKey::new(t.transpose(3), Mode::Major),
            MusicalKey::new(t.transpose(7), Mode::Minor),
            MusicalKey::new(t.transpose(5), Mode::Minor),
        ],
    };

    let mut out: Vec<MusicalKey> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if candidate != *key && !out.contains(&candidate) {
            out.push(candidate);
        }
    }
    out
}

/// String form of [`compatible_keys`]. Unparseable names (including
/// `"Unknown"`) yield an empty list.
pub fn compatible_key_names(key: &str) -> Vec<String> {
    match key.parse::<MusicalKey>() {
        Ok(k) => compatible_keys(&k).iter().map(|k| k.to_string()).collect(),
        Err(e) => {
            log::debug!("No compatible keys for {key:?}: {e}");
            Vec::new()
        }
    }
}
