//! Choosing the media file the downloader actually produced.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::AppError;

/// Lower is better. Common playable containers first.
fn ext_priority(path: &Path) -> u32 {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mp4" => 0,
        "mkv" => 1,
        "webm" => 2,
        "mov" => 3,
        "avi" => 4,
        "flv" => 5,
        _ => 100,
    }
}

/// Picks the best file for `id` in `dir`.
///
/// Files named `{id}.*` are preferred; if there are none, any regular file in
/// the directory is considered (the downloader may sanitize ids in
/// filenames). Ties on extension are broken by filename.
pub fn select_downloaded_file(dir: &Path, id: &str) -> Result<PathBuf, AppError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }

    let prefix = format!("{id}.");
    let by_id: Vec<PathBuf> = files
        .iter()
        .filter(|p| {
            !id.is_empty()
                && p.file_name()
                    .is_some_and(|n| n.to_string_lossy().starts_with(&prefix))
        })
        .cloned()
        .collect();
    let mut candidates = if by_id.is_empty() { files } else { by_id };

    candidates.sort_by(|a, b| {
        ext_priority(a)
            .cmp(&ext_priority(b))
            .then_with(|| a.file_name().cmp(&b.file_name()))
    });
    candidates
        .into_iter()
        .next()
        .ok_or_else(|| AppError::NoDownloadedFile(dir.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"x").expect("write file");
    }

    #[test]
    fn mp4_beats_webm() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(dir.path(), "abc.webm");
        touch(dir.path(), "abc.mp4");
        let picked = select_downloaded_file(dir.path(), "abc").expect("select");
        assert_eq!(picked, dir.path().join("abc.mp4"));
    }

    #[test]
    fn mkv_beats_webm() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(dir.path(), "abc.webm");
        touch(dir.path(), "abc.mkv");
        let picked = select_downloaded_file(dir.path(), "abc").expect("select");
        assert_eq!(picked, dir.path().join("abc.mkv"));
    }

    #[test]
    fn extension_match_is_case_insensitive() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(dir.path(), "abc.webm");
        touch(dir.path(), "abc.MP4");
        let picked = select_downloaded_file(dir.path(), "abc").expect("select");
        assert_eq!(picked, dir.path().join("abc.MP4"));
    }

    #[test]
    fn unknown_extensions_tie_break_lexically() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(dir.path(), "abc.ts");
        touch(dir.path(), "abc.m4a");
        let picked = select_downloaded_file(dir.path(), "abc").expect("select");
        assert_eq!(picked, dir.path().join("abc.m4a"));
    }

    #[test]
    fn falls_back_to_any_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(dir.path(), "renamed_by_tool.webm");
        touch(dir.path(), "other.mkv");
        let picked = select_downloaded_file(dir.path(), "abc").expect("select");
        assert_eq!(picked, dir.path().join("other.mkv"));
    }

    #[test]
    fn id_matches_win_over_better_extensions() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(dir.path(), "abc.webm");
        touch(dir.path(), "zzz.mp4");
        let picked = select_downloaded_file(dir.path(), "abc").expect("select");
        assert_eq!(picked, dir.path().join("abc.webm"));
    }

    #[test]
    fn empty_dir_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir(dir.path().join("nested")).expect("mkdir");
        let err = select_downloaded_file(dir.path(), "abc").expect_err("nothing to pick");
        assert!(matches!(err, AppError::NoDownloadedFile(_)));
    }
}
