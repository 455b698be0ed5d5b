use globset::{Glob, GlobSet, GlobSetBuilder};
use memmap2::Mmap;
use std::ffi::OsStr;
use std::fs::{self, File};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use crate::error::PipelineError;

/// Directories never read as sources unless --include-dev is given
const DEV_DIRECTORIES: &[&str] = &["node_modules", ".git", ".svn", ".hg", ".idea", ".vscode"];

/// Files never read as sources unless --include-dev is given
const DEV_FILES: &[&str] = &[".DS_Store", "Thumbs.db", "desktop.ini", ".gitkeep"];

/// Files at or below this size are compared in memory; larger ones through a map
const MMAP_THRESHOLD: u64 = 64 * 1024;

/// What happened to one output file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// New content written, with its size
    Written(u64),
    /// Existing output already held these bytes
    Unchanged,
}

/// Check if a file should be excluded based on name or directory
#[inline]
pub fn should_exclude_file(path: &Path, include_dev: bool) -> bool {
    if include_dev {
        return false;
    }

    for component in path.components() {
        if let Component::Normal(name) = component {
            if let Some(name_str) = name.to_str() {
                if DEV_DIRECTORIES.contains(&name_str) {
                    return true;
                }
            }
        }
    }

    path.file_name()
        .and_then(OsStr::to_str)
        .is_some_and(|name| DEV_FILES.contains(&name))
}

/// Compile glob patterns into one matcher
pub fn build_globset(patterns: &[String]) -> Result<GlobSet, PipelineError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| PipelineError::InvalidPattern {
            pattern: pattern.clone(),
            source: e,
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| PipelineError::InvalidPattern {
        pattern: patterns.join(", "),
        source: e,
    })
}

/// Collect files below `dir` whose path relative to `dir` matches `globs`.
/// Sorted for a stable processing order; a missing directory yields nothing.
pub fn collect_sources(dir: &Path, globs: &GlobSet, include_dev: bool) -> Vec<PathBuf> {
    if !dir.is_dir() {
        return Vec::new();
    }

    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|path| {
            let relative = path.strip_prefix(dir).unwrap_or(path);
            !should_exclude_file(relative, include_dev) && globs.is_match(relative)
        })
        .collect();

    files.sort();
    files
}

fn ensure_parent(dst: &Path) -> Result<(), PipelineError> {
    if let Some(parent) = dst.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)
                .map_err(|e| PipelineError::from_create_dir(parent, e))?;
        }
    }
    Ok(())
}

/// Byte-level comparison of `dst` with `content`
pub fn same_content(dst: &Path, content: &[u8]) -> bool {
    let Ok(file) = File::open(dst) else {
        return false;
    };
    let Ok(meta) = file.metadata() else {
        return false;
    };
    if !meta.is_file() || meta.len() != content.len() as u64 {
        return false;
    }
    if meta.len() <= MMAP_THRESHOLD {
        return fs::read(dst).is_ok_and(|existing| existing == content);
    }

    // SAFETY: the map is read-only and dropped before this function returns;
    // a concurrent truncation shows up as a mismatch or a failed map.
    match unsafe { Mmap::map(&file) } {
        Ok(map) => map[..] == *content,
        Err(_) => false,
    }
}

/// Write `content` to `dst` unless it already holds exactly these bytes
pub fn write_if_changed(dst: &Path, content: &[u8]) -> Result<WriteOutcome, PipelineError> {
    if same_content(dst, content) {
        return Ok(WriteOutcome::Unchanged);
    }
    ensure_parent(dst)?;
    fs::write(dst, content).map_err(|e| PipelineError::from_write(dst, e))?;
    Ok(WriteOutcome::Written(content.len() as u64))
}

/// Copy a single file from src to dst, skipping identical output
pub fn copy_file(src: &Path, dst: &Path) -> Result<WriteOutcome, PipelineError> {
    let content = fs::read(src).map_err(|e| PipelineError::CopyFailed {
        src: src.to_path_buf(),
        dst: dst.to_path_buf(),
        source: e,
    })?;
    write_if_changed(dst, &content)
}

/// Delete an output file and any directories it leaves empty, up to `stop`.
/// Returns false when there was nothing to delete.
pub fn remove_output(path: &Path, stop: &Path) -> Result<bool, PipelineError> {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(PipelineError::from_write(path, e)),
    }

    let mut dir = path.parent();
    while let Some(d) = dir {
        if d == stop || !d.starts_with(stop) {
            break;
        }
        // Stops at the first directory that still has entries
        if fs::remove_dir(d).is_err() {
            break;
        }
        dir = d.parent();
    }
    Ok(true)
}

/// Empty a directory, keeping the directory itself
pub fn clean_directory(dir: &Path) -> Result<(), PipelineError> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            fs::remove_dir_all(&path).map_err(|e| PipelineError::from_write(&path, e))?;
        } else {
            fs::remove_file(&path).map_err(|e| PipelineError::from_write(&path, e))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn globs(patterns: &[&str]) -> GlobSet {
        build_globset(&patterns.iter().map(|s| s.to_string()).collect::<Vec<_>>()).unwrap()
    }

    // ==================== should_exclude_file tests ====================

    #[test]
    fn test_should_exclude_dev_directories() {
        assert!(should_exclude_file(Path::new("node_modules/pkg/index.js"), false));
        assert!(should_exclude_file(Path::new("js/.git/HEAD"), false));
        assert!(!should_exclude_file(Path::new("js/app.js"), false));
    }

    #[test]
    fn test_should_exclude_dev_files() {
        assert!(should_exclude_file(Path::new("images/.DS_Store"), false));
        assert!(should_exclude_file(Path::new("Thumbs.db"), false));
    }

    #[test]
    fn test_include_dev_keeps_everything() {
        assert!(!should_exclude_file(Path::new("node_modules/pkg/index.js"), true));
        assert!(!should_exclude_file(Path::new(".DS_Store"), true));
    }

    // ==================== glob tests ====================

    #[test]
    fn test_build_globset_invalid_pattern() {
        let err = build_globset(&["css/[".to_string()]).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidPattern { .. }));
    }

    #[test]
    fn test_collect_sources_matches_patterns() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        fs::create_dir_all(dir.join("sub")).unwrap();
        fs::create_dir_all(dir.join("node_modules/x")).unwrap();
        fs::write(dir.join("a.png"), "a").unwrap();
        fs::write(dir.join("sub/b.JPG"), "b").unwrap();
        fs::write(dir.join("sub/c.jpg"), "c").unwrap();
        fs::write(dir.join("notes.txt"), "n").unwrap();
        fs::write(dir.join("node_modules/x/d.png"), "d").unwrap();

        let files = collect_sources(dir, &globs(&["**/*.{png,jpg}"]), false);
        let names: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(dir).unwrap().to_path_buf())
            .collect();

        assert_eq!(names, vec![PathBuf::from("a.png"), PathBuf::from("sub/c.jpg")]);
    }

    #[test]
    fn test_collect_sources_missing_dir() {
        let temp = TempDir::new().unwrap();
        let files = collect_sources(&temp.path().join("missing"), &globs(&["**/*"]), false);
        assert!(files.is_empty());
    }

    // ==================== write_if_changed tests ====================

    #[test]
    fn test_write_if_changed_creates_parents() {
        let temp = TempDir::new().unwrap();
        let dst = temp.path().join("a/b/c.txt");

        let outcome = write_if_changed(&dst, b"hello").unwrap();

        assert_eq!(outcome, WriteOutcome::Written(5));
        assert_eq!(fs::read(&dst).unwrap(), b"hello");
    }

    #[test]
    fn test_write_if_changed_skips_identical() {
        let temp = TempDir::new().unwrap();
        let dst = temp.path().join("c.txt");
        fs::write(&dst, b"same").unwrap();

        assert_eq!(write_if_changed(&dst, b"same").unwrap(), WriteOutcome::Unchanged);
        assert_eq!(write_if_changed(&dst, b"diff").unwrap(), WriteOutcome::Written(4));
        assert_eq!(fs::read(&dst).unwrap(), b"diff");
    }

    #[test]
    fn test_same_content_large_file_uses_map() {
        let temp = TempDir::new().unwrap();
        let dst = temp.path().join("big.bin");
        let mut content = vec![7u8; (MMAP_THRESHOLD as usize) * 2];
        fs::write(&dst, &content).unwrap();

        assert!(same_content(&dst, &content));
        content[100_000] = 8;
        assert!(!same_content(&dst, &content));
    }

    #[test]
    fn test_same_content_empty_and_missing() {
        let temp = TempDir::new().unwrap();
        let dst = temp.path().join("empty");
        assert!(!same_content(&dst, b""));
        fs::write(&dst, b"").unwrap();
        assert!(same_content(&dst, b""));
    }

    // ==================== copy_file tests ====================

    #[test]
    fn test_copy_file_missing_source() {
        let temp = TempDir::new().unwrap();
        let err = copy_file(&temp.path().join("nope"), &temp.path().join("out")).unwrap_err();
        assert!(matches!(err, PipelineError::CopyFailed { .. }));
    }

    #[test]
    fn test_copy_file_second_copy_unchanged() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src.txt");
        let dst = temp.path().join("out/dst.txt");
        fs::write(&src, "content").unwrap();

        assert_eq!(copy_file(&src, &dst).unwrap(), WriteOutcome::Written(7));
        assert_eq!(copy_file(&src, &dst).unwrap(), WriteOutcome::Unchanged);
    }

    // ==================== remove_output tests ====================

    #[test]
    fn test_remove_output_prunes_empty_dirs() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("build");
        let file = root.join("css/sub/a.css");
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(&file, "x").unwrap();
        fs::write(root.join("css/keep.css"), "y").unwrap();

        assert!(remove_output(&file, &root).unwrap());
        assert!(!root.join("css/sub").exists());
        assert!(root.join("css/keep.css").exists());
        assert!(!remove_output(&file, &root).unwrap());
    }

    #[test]
    fn test_clean_directory() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("build");
        fs::create_dir_all(dir.join("css")).unwrap();
        fs::write(dir.join("css/a.css"), "a").unwrap();
        fs::write(dir.join("index.html"), "i").unwrap();

        clean_directory(&dir).unwrap();

        assert!(dir.exists());
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
    }
}
