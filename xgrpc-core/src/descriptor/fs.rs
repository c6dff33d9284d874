use std::fmt::Debug;
use std::io;
use std::path::{Path, PathBuf};

/// Read access to descriptor set files.
///
/// Protoset loading goes through this trait so hosts can serve files from somewhere other than
/// the local disk (an archive, an in-memory bundle, a sandboxed root).
pub trait FileSystem: Send + Sync + Debug {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
}

/// The local file system. Relative paths are resolved against `base` when one is set, and
/// against the process working directory otherwise.
#[derive(Debug, Clone, Default)]
pub struct OsFileSystem {
    base: Option<PathBuf>,
}

impl OsFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base(base: impl Into<PathBuf>) -> Self {
        Self {
            base: Some(base.into()),
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl FileSystem for OsFileSystem {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(self.resolve(path))
    }
}
