use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A temporary directory of template files.
pub(crate) struct TemplateDir {
    _temp_dir: TempDir,
    root: PathBuf,
}

impl TemplateDir {
    pub(crate) fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        // Resolved paths are canonical, so compare against the canonical root
        // (on some platforms the temp dir is behind a symlink).
        let root = temp_dir.path().canonicalize().unwrap();
        Self {
            _temp_dir: temp_dir,
            root,
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.root
    }

    /// Write `content` to `relative` (creating parent directories) and
    /// return the file's canonical path.
    pub(crate) fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        path.canonicalize().unwrap()
    }
}
