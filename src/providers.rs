//! Collaborators consulted once per `open`.
//!
//! - [`DirectoryProvider`]: where the sink should write and how to name the file
//! - [`NameProvider`]: the logical stream name used for dataset names
//! - [`ShapeProvider`]: the per-frame detector shape
//!
//! Closures implement the two synchronous providers directly.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;

/// Destination for one session's file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryInfo {
    /// Root shared with downstream readers
    pub root: PathBuf,
    /// Directory under `root` the sink writes into
    pub resource_dir: PathBuf,
    /// Leading part of the file name
    pub prefix: String,
    /// Trailing part of the file name
    pub suffix: String,
}

impl DirectoryInfo {
    /// Write directly into `root` with an empty file name.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            resource_dir: PathBuf::new(),
            prefix: String::new(),
            suffix: String::new(),
        }
    }

    /// Write into `dir` under the root.
    pub fn with_resource_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.resource_dir = dir.into();
        self
    }

    /// Set the file name prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the file name suffix.
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    /// Directory the sink is told to write into.
    pub fn destination(&self) -> PathBuf {
        self.root.join(&self.resource_dir)
    }

    /// File name handed to the sink before templating.
    pub fn file_name(&self) -> String {
        format!("{}{}", self.prefix, self.suffix)
    }

    /// Split `file` into the (root, path) pair recorded in resource documents.
    ///
    /// Files outside `root` keep their absolute path under root `/`.
    pub fn resource_location(&self, file: &Path) -> (PathBuf, PathBuf) {
        match file.strip_prefix(&self.root) {
            Ok(relative) if !self.root.as_os_str().is_empty() => {
                (self.root.clone(), relative.to_path_buf())
            }
            _ => (PathBuf::from("/"), file.to_path_buf()),
        }
    }
}

/// Supplies the destination of each session.
pub trait DirectoryProvider: Send + Sync {
    /// Destination for the next session.
    fn directory_info(&self) -> DirectoryInfo;
}

impl<F> DirectoryProvider for F
where
    F: Fn() -> DirectoryInfo + Send + Sync,
{
    fn directory_info(&self) -> DirectoryInfo {
        self()
    }
}

/// Always returns the same destination.
#[derive(Debug, Clone)]
pub struct StaticDirectoryProvider {
    info: DirectoryInfo,
}

impl StaticDirectoryProvider {
    /// Provider always returning `info`.
    pub fn new(info: DirectoryInfo) -> Self {
        Self { info }
    }
}

impl DirectoryProvider for StaticDirectoryProvider {
    fn directory_info(&self) -> DirectoryInfo {
        self.info.clone()
    }
}

/// Supplies the logical stream name.
pub trait NameProvider: Send + Sync {
    /// Name of the primary dataset.
    fn name(&self) -> String;
}

impl<F> NameProvider for F
where
    F: Fn() -> String + Send + Sync,
{
    fn name(&self) -> String {
        self()
    }
}

/// Supplies the per-frame detector shape.
#[async_trait]
pub trait ShapeProvider: Send + Sync {
    /// Shape of one frame.
    async fn shape(&self) -> AppResult<Vec<usize>>;
}

/// Fixed detector shape.
#[derive(Debug, Clone)]
pub struct StaticShapeProvider {
    shape: Vec<usize>,
}

impl StaticShapeProvider {
    /// Provider always returning `shape`.
    pub fn new(shape: impl Into<Vec<usize>>) -> Self {
        Self {
            shape: shape.into(),
        }
    }
}

#[async_trait]
impl ShapeProvider for StaticShapeProvider {
    async fn shape(&self) -> AppResult<Vec<usize>> {
        Ok(self.shape.clone())
    }
}
