//! Candidate file discovery.
//!
//! Walks a source root and collects regular files with their size and
//! modification time, before any profile filtering runs. Files come back in
//! lexicographic path order so downstream accumulation is deterministic.

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A discovered candidate file.
#[derive(Debug, Clone)]
pub struct FileMeta {
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<DateTime<Local>>,
}

impl FileMeta {
    /// Stat one path. Missing files yield size 0 and no timestamp; the
    /// adapters surface the real error later.
    pub fn from_path(path: &Path) -> Self {
        let meta = std::fs::metadata(path).ok();
        let size = meta.as_ref().map(|m| m.len()).unwrap_or(0);
        let modified = meta
            .and_then(|m| m.modified().ok())
            .map(DateTime::<Local>::from);
        Self {
            path: path.to_path_buf(),
            size,
            modified,
        }
    }

    pub fn filename(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Dot-prefixed lowercase extension, or empty.
    pub fn extension(&self) -> String {
        self.path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default()
    }

    pub fn parent(&self) -> String {
        self.path
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_default()
    }
}

/// Enumerate files under a root, optionally restricted to an extension
/// allow-list (dot-prefixed, case-insensitive).
pub fn discover_files(root: &Path, extensions: Option<&[String]>) -> Vec<FileMeta> {
    let mut files: Vec<FileMeta> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| FileMeta::from_path(entry.path()))
        .filter(|meta| match extensions {
            Some(allowed) => {
                let ext = meta.extension();
                allowed.iter().any(|a| a.eq_ignore_ascii_case(&ext))
            }
            None => true,
        })
        .collect();
    files.sort_by(|a, b| a.path.cmp(&b.path));
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_discover_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.json"), "{}").unwrap();
        fs::write(dir.path().join("a.json"), "{}").unwrap();
        fs::write(dir.path().join("c.txt"), "x").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/d.JSON"), "{}").unwrap();

        let all = discover_files(dir.path(), None);
        assert_eq!(all.len(), 4);

        let json_only = discover_files(dir.path(), Some(&[".json".to_string()]));
        assert_eq!(json_only.len(), 3);
        assert_eq!(json_only[0].filename(), "a.json");
        assert_eq!(json_only[1].filename(), "b.json");
    }

    #[test]
    fn test_file_meta_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.CSV");
        fs::write(&path, "a,b\n").unwrap();
        let meta = FileMeta::from_path(&path);
        assert_eq!(meta.extension(), ".csv");
        assert_eq!(meta.filename(), "data.CSV");
        assert_eq!(meta.size, 4);
        assert!(meta.modified.is_some());
    }
}
