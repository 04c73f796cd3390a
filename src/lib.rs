pub mod analyzer;
pub mod config;
pub mod key;
pub mod models;
pub mod scanner;
pub mod worker;

/// Audio file extensions picked up when walking directories
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "ogg", "oga", "wav",
    // Native (symphonia isomp4 + aac)
    "m4a", "mp4", "aac",
];

/// Application name for XDG paths
pub const APP_NAME: &str = "beatprobe";
