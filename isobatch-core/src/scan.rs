//! Enumerates the disc images a batch will process.
use crate::error::BatchError;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, trace};
use walkdir::WalkDir;

/// File extension of the images a batch picks up (compared case-insensitively).
pub const IMAGE_EXTENSION: &str = "iso";

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(IMAGE_EXTENSION))
}

/// Lists every `*.iso` file under `source`, sorted by path.
///
/// Only the top level is scanned unless `recurse` is set. Symlinks are not
/// followed.
///
/// # Errors
///
/// Fails if `source` does not exist, is not a directory, or cannot be read.
#[instrument(skip_all, fields(source = %source.display(), recurse = recurse))]
pub fn scan_images(source: &Path, recurse: bool) -> Result<Vec<PathBuf>, BatchError> {
    if !source.exists() {
        return Err(BatchError::SourceMissing(source.to_path_buf()));
    }
    if !source.is_dir() {
        return Err(BatchError::NotADirectory(source.to_path_buf()));
    }

    let walker = WalkDir::new(source).min_depth(1);
    let walker = if recurse { walker } else { walker.max_depth(1) };

    let mut images = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| BatchError::Enumerate(source.to_path_buf(), e))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.into_path();
        if is_image(&path) {
            debug!(image = %path.display(), "found image");
            images.push(path);
        } else {
            trace!(path = %path.display(), "skipping non-image file");
        }
    }

    images.sort();
    info!(count = images.len(), "image scan complete");
    Ok(images)
}

/// Where the dump of `image` goes: `output_root/<image file stem>`.
pub fn output_for(image: &Path, output_root: &Path) -> PathBuf {
    let stem = image.file_stem().unwrap_or(image.as_os_str());
    output_root.join(stem)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn top_level_only_by_default() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("b.iso"));
        touch(&dir.path().join("a.ISO"));
        touch(&dir.path().join("notes.txt"));
        touch(&dir.path().join("nested/c.iso"));

        let images = scan_images(dir.path(), false).unwrap();
        assert_eq!(
            images,
            vec![dir.path().join("a.ISO"), dir.path().join("b.iso")]
        );
    }

    #[test]
    fn recurse_includes_subdirectories_sorted() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("z.iso"));
        touch(&dir.path().join("nested/c.iso"));
        touch(&dir.path().join("nested/deeper/a.iso"));

        let images = scan_images(dir.path(), true).unwrap();
        assert_eq!(
            images,
            vec![
                dir.path().join("nested/c.iso"),
                dir.path().join("nested/deeper/a.iso"),
                dir.path().join("z.iso"),
            ]
        );
    }

    #[test]
    fn directory_named_like_an_image_is_ignored() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("folder.iso")).unwrap();
        assert!(scan_images(dir.path(), true).unwrap().is_empty());
    }

    #[test]
    fn missing_source_is_an_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            scan_images(&missing, false),
            Err(BatchError::SourceMissing(p)) if p == missing
        ));
    }

    #[test]
    fn file_source_is_an_error() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("disc.iso");
        touch(&file);
        assert!(matches!(
            scan_images(&file, false),
            Err(BatchError::NotADirectory(_))
        ));
    }

    #[test]
    fn output_uses_file_stem() {
        assert_eq!(
            output_for(Path::new("/isos/Game (USA).iso"), Path::new("/out")),
            PathBuf::from("/out/Game (USA)")
        );
    }
}
