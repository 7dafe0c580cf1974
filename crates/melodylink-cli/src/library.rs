//! Song library scanning.

use anyhow::{Context, Result};
use melodylink_core::SongInfo;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use walkdir::WalkDir;

/// True for `.mid` / `.midi` files, any case.
pub fn is_sequence_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("mid") || ext.eq_ignore_ascii_case("midi"))
        .unwrap_or(false)
}

/// Load one file as a song labelled with `label`.
pub fn load_song(path: &Path, label: &str) -> Result<Arc<SongInfo>> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let song = SongInfo::from_bytes(bytes, label)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Arc::new(song))
}

/// Songs under `root`, sorted by path. A single file yields itself.
///
/// Files that fail to parse are skipped with a warning.
pub fn scan(root: &Path) -> Result<Vec<Arc<SongInfo>>> {
    if root.is_file() {
        let label = root.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        return Ok(vec![load_song(root, label)?]);
    }
    if !root.is_dir() {
        anyhow::bail!("Not found: {}", root.display());
    }

    let mut songs = Vec::new();
    for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_sequence_file(entry.path()) {
            continue;
        }

        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let label = relative.to_string_lossy();
        match load_song(entry.path(), &label) {
            Ok(song) => songs.push(song),
            Err(e) => log::warn!("Skipping {}: {:#}", entry.path().display(), e),
        }
    }
    log::info!("Found {} song(s) in {}", songs.len(), root.display());
    Ok(songs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_extensions() {
        assert!(is_sequence_file(Path::new("a/b/song.mid")));
        assert!(is_sequence_file(Path::new("SONG.MIDI")));
        assert!(!is_sequence_file(Path::new("notes.txt")));
        assert!(!is_sequence_file(Path::new("mid")));
    }
}
