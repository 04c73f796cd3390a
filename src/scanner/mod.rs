pub mod filename;

use crate::SUPPORTED_EXTENSIONS;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

fn has_supported_extension(path: &Path) -> bool {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    SUPPORTED_EXTENSIONS.contains(&ext.as_str())
}

/// Collect audio files under the given paths.
///
/// Plain files are taken as-is (the decoder decides whether it can read
/// them); directories are walked recursively and filtered by extension.
/// Results are sorted and deduplicated.
pub fn collect_audio_files<P: AsRef<Path>>(paths: &[P]) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = Vec::new();

    for path in paths {
        let path = path.as_ref();
        if path.is_file() {
            files.push(path.to_path_buf());
            continue;
        }
        if !path.exists() {
            log::warn!("Skipping missing path {}", path.display());
            continue;
        }
        for entry in WalkDir::new(path).follow_links(true).into_iter().filter_map(|e| e.ok()) {
            if entry.file_type().is_file() && has_supported_extension(entry.path()) {
                files.push(entry.into_path());
            }
        }
    }

    files.sort();
    files.dedup();
    log::info!("Found {} audio files", files.len());
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("beatprobe_scan_{}_{}", name, std::process::id()));
        fs::remove_dir_all(&dir).ok();
        fs::create_dir_all(dir.join("nested")).unwrap();
        dir
    }

    #[test]
    fn test_extension_filter() {
        assert!(has_supported_extension(Path::new("a/b/loop.WAV")));
        assert!(has_supported_extension(Path::new("x.flac")));
        assert!(!has_supported_extension(Path::new("notes.txt")));
        assert!(!has_supported_extension(Path::new("README")));
    }

    #[test]
    fn test_collect_walks_directories() {
        let dir = scratch_dir("walk");
        fs::write(dir.join("a_128bpm.wav"), b"").unwrap();
        fs::write(dir.join("nested").join("b.mp3"), b"").unwrap();
        fs::write(dir.join("cover.jpg"), b"").unwrap();

        let files = collect_audio_files(&[&dir]);
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| has_supported_extension(f)));

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_collect_explicit_file_and_missing_path() {
        let dir = scratch_dir("explicit");
        let file = dir.join("take.bin");
        fs::write(&file, b"").unwrap();

        let files = collect_audio_files(&[file.clone(), dir.join("does-not-exist")]);
        assert_eq!(files, vec![file]);

        fs::remove_dir_all(&dir).ok();
    }
}
