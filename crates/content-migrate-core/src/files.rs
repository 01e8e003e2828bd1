//! Materializes embedded attachments below a destination root.

use std::fs;
use std::path::{Component, Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum FileWriteError {
    #[error("invalid embedded file content: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("file path is empty")]
    EmptyPath,
    #[error("file path escapes the destination root: {0}")]
    PathEscapesRoot(String),
    #[error("failed to write {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WriteOutcome {
    Written,
    SkippedExisting,
}

pub trait FileWriter {
    /// Write `bytes` to `path`. An existing file is replaced only when `overwrite` is set.
    ///
    /// # Errors
    /// Returns an error when the path is rejected or the write fails.
    fn write_binary(
        &mut self,
        path: &str,
        bytes: &[u8],
        overwrite: bool,
    ) -> Result<WriteOutcome, FileWriteError>;
}

/// Decode base64 file content. Line breaks and other ASCII whitespace are ignored.
///
/// # Errors
/// Returns [`FileWriteError::Decode`] for invalid base64.
pub fn decode_embedded(text: &str) -> Result<Vec<u8>, FileWriteError> {
    let compact = text.chars().filter(|ch| !ch.is_ascii_whitespace()).collect::<String>();
    Ok(STANDARD.decode(compact)?)
}

/// Writes attachments relative to a root directory, creating parents as needed.
#[derive(Debug, Clone)]
pub struct FsFileWriter {
    root: PathBuf,
}

impl FsFileWriter {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a payload path below the root, rejecting absolute paths and `..`.
    ///
    /// # Errors
    /// Returns [`FileWriteError::EmptyPath`] or [`FileWriteError::PathEscapesRoot`].
    pub fn resolve(&self, path: &str) -> Result<PathBuf, FileWriteError> {
        let mut relative = PathBuf::new();
        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => relative.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(FileWriteError::PathEscapesRoot(path.to_string()));
                }
            }
        }

        if relative.as_os_str().is_empty() {
            return Err(FileWriteError::EmptyPath);
        }
        Ok(self.root.join(relative))
    }
}

impl FileWriter for FsFileWriter {
    fn write_binary(
        &mut self,
        path: &str,
        bytes: &[u8],
        overwrite: bool,
    ) -> Result<WriteOutcome, FileWriteError> {
        let target = self.resolve(path)?;
        if target.exists() && !overwrite {
            return Ok(WriteOutcome::SkippedExisting);
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| FileWriteError::Io { path: parent.to_path_buf(), source })?;
        }
        fs::write(&target, bytes).map_err(|source| FileWriteError::Io { path: target, source })?;
        Ok(WriteOutcome::Written)
    }
}
