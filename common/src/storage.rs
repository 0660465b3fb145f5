//! File-system collaborator abstraction.
//!
//! The engine never talks to a concrete file system directly; everything goes
//! through the narrow [`FileSystem`] contract (open/create a byte stream,
//! delete, create directory, rename). In production this fronts the
//! distributed file system; [`LocalFileSystem`] serves single-host runs and
//! tests.

use std::fmt::Debug;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{CommonError, Result};

/// An open byte stream with a known length, as returned by
/// [`FileSystem::open_read`].
pub struct FileStream {
    /// The readable stream.
    pub stream: Box<dyn Read + Send>,
    /// Total length of the underlying file in bytes.
    pub len: u64,
}

/// Narrow contract the engine requires from a file system.
///
/// Implementations must be safe to share between the task thread and the
/// progress-reporting thread.
pub trait FileSystem: Send + Sync + Debug {
    /// Open an existing file for reading.
    fn open_read(&self, path: &Path) -> Result<FileStream>;

    /// Create (or truncate) a file for writing.
    fn create(&self, path: &Path) -> Result<Box<dyn Write + Send>>;

    /// Delete a file or, when `recursive` is set, a directory tree.
    fn delete(&self, path: &Path, recursive: bool) -> Result<()>;

    /// Create a directory, including missing parents.
    fn create_directory(&self, path: &Path) -> Result<()>;

    /// Atomically rename `from` to `to`. Used for output commit.
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Whether a file or directory exists at `path`.
    fn exists(&self, path: &Path) -> bool;
}

/// Join a directory and a file name.
pub fn combine(dir: &Path, name: &str) -> PathBuf {
    dir.join(name)
}

/// The file-name component of a path, if any.
pub fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

/// [`FileSystem`] backed by the local disk.
#[derive(Debug, Default, Clone)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for LocalFileSystem {
    fn open_read(&self, path: &Path) -> Result<FileStream> {
        let file = fs::File::open(path).map_err(|e| {
            CommonError::io_error_with_source(format!("cannot open {}", path.display()), e)
        })?;
        let len = file
            .metadata()
            .map_err(|e| {
                CommonError::io_error_with_source(format!("cannot stat {}", path.display()), e)
            })?
            .len();
        Ok(FileStream {
            stream: Box::new(file),
            len,
        })
    }

    fn create(&self, path: &Path) -> Result<Box<dyn Write + Send>> {
        let file = fs::File::create(path).map_err(|e| {
            CommonError::io_error_with_source(format!("cannot create {}", path.display()), e)
        })?;
        Ok(Box::new(file))
    }

    fn delete(&self, path: &Path, recursive: bool) -> Result<()> {
        debug!(path = %path.display(), recursive, "deleting");
        let result = if recursive && path.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        result.map_err(|e| {
            CommonError::io_error_with_source(format!("cannot delete {}", path.display()), e)
        })
    }

    fn create_directory(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).map_err(|e| {
            CommonError::io_error_with_source(format!("cannot create dir {}", path.display()), e)
        })
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        debug!(from = %from.display(), to = %to.display(), "renaming");
        fs::rename(from, to).map_err(|e| {
            CommonError::io_error_with_source(
                format!("cannot rename {} to {}", from.display(), to.display()),
                e,
            )
        })
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}
