//! Finding audio files and grouping them into albums.
//!
//! A directory is one album: the audio files directly inside it. Its
//! sub-directories are independent albums of their own.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::{DirEntry, WalkDir};

/// Extensions treated as audio when walking directories (case-insensitive).
pub const AUDIO_EXTENSIONS: &[&str] = &[
    "flac", "ogg", "oga", "opus", "spx", "mp3", "m4a", "mp4", "aac", "wv", "ape", "mpc", "wav",
    "aif", "aiff",
];

pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            AUDIO_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
}

/// Expand `paths` into a flat, sorted list of files.
///
/// Files given explicitly are kept whatever their extension. Directories
/// contribute their audio files, descending into sub-directories only when
/// `recursive` is set.
pub fn collect_files(paths: &[PathBuf], recursive: bool) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let max_depth = if recursive { usize::MAX } else { 1 };
            files.extend(audio_entries(path, max_depth).map(DirEntry::into_path));
        } else {
            files.push(path.clone());
        }
    }
    files.sort();
    files.dedup();
    files
}

/// Group the audio files under `roots` by the directory that holds them.
///
/// Explicit file arguments join the group of their parent directory.
pub fn album_groups(roots: &[PathBuf]) -> BTreeMap<PathBuf, Vec<PathBuf>> {
    let mut groups: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
    for root in roots {
        if root.is_dir() {
            for entry in audio_entries(root, usize::MAX) {
                let path = entry.into_path();
                let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
                groups.entry(dir).or_default().push(path);
            }
        } else {
            let dir = root.parent().map(Path::to_path_buf).unwrap_or_default();
            groups.entry(dir).or_default().push(root.clone());
        }
    }
    for files in groups.values_mut() {
        files.sort();
        files.dedup();
    }
    groups
}

fn audio_entries(root: &Path, max_depth: usize) -> impl Iterator<Item = DirEntry> {
    WalkDir::new(root)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(target: "scanner::walk", error = %e, "Skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && is_audio_file(entry.path()))
}
