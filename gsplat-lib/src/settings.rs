use glam::Vec4;
use std::path::{Path, PathBuf};

/// Where splat data comes from and how it is tinted by default.
#[derive(Debug, Clone, PartialEq)]
pub struct SplatSettings {
    /// Relative load paths are resolved against this directory.
    pub content_root: PathBuf,
    pub auto_load_path: Option<PathBuf>,
    pub auto_load: bool,
    pub global_tint: Vec4,
}

impl Default for SplatSettings {
    fn default() -> Self {
        Self {
            content_root: PathBuf::from("."),
            auto_load_path: None,
            auto_load: true,
            global_tint: Vec4::ONE,
        }
    }
}

impl SplatSettings {
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.content_root.join(path)
        }
    }

    /// The file to load on startup, if auto-loading is on and a path is set.
    pub fn auto_load_target(&self) -> Option<PathBuf> {
        match &self.auto_load_path {
            Some(path) if self.auto_load && !path.as_os_str().is_empty() => Some(self.resolve(path)),
            _ => None,
        }
    }
}
