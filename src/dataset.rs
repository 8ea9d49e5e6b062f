//! Dataset catalog
//!
//! At `open` the writer declares every dataset the session's file will hold:
//! the primary detector array first, then one scalar dataset per declared
//! attribute in declaration order. The catalog is immutable for the rest of
//! the session and its order is the order of every document batch.

use serde::{Deserialize, Serialize};

use crate::documents::DatasetDescriptor;
use crate::dtype::ElementType;

/// One dataset inside the output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    /// Data key the dataset is announced under
    pub name: String,
    /// Grouping block on the sink that produces this dataset
    pub block: String,
    /// Intra-file path
    pub path: String,
    /// Per-row shape; empty for scalars
    pub shape: Vec<usize>,
    /// Raw frames folded into one row
    pub multiplier: u32,
}

impl Dataset {
    /// Shape as seen by a consumer: rows of `multiplier` frames when folding.
    pub fn outer_shape(&self) -> Vec<usize> {
        let mut shape = Vec::with_capacity(self.shape.len() + 1);
        if self.multiplier > 1 {
            shape.push(self.multiplier as usize);
        }
        shape.extend_from_slice(&self.shape);
        shape
    }

    /// Descriptor returned from `open` for this dataset.
    pub fn descriptor(&self, element_type: ElementType, source: &str) -> DatasetDescriptor {
        DatasetDescriptor {
            source: source.to_string(),
            shape: self.outer_shape(),
            dtype: if self.shape.is_empty() {
                "number".to_string()
            } else {
                "array".to_string()
            },
            dtype_str: element_type.dtype_str().to_string(),
            element_type,
            external: true,
        }
    }
}

/// Ordered `key -> path` declarations of scalar attribute datasets.
///
/// Re-declaring a key replaces its path but keeps its original position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalarDatasetPaths {
    entries: Vec<(String, String)>,
}

impl ScalarDatasetPaths {
    /// Empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, key: impl Into<String>, path: impl Into<String>) -> Self {
        self.insert(key, path);
        self
    }

    /// Declare `key` as living at `path` under the attribute root.
    pub fn insert(&mut self, key: impl Into<String>, path: impl Into<String>) {
        let key = key.into();
        let path = path.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = path,
            None => self.entries.push((key, path)),
        }
    }

    /// `(key, path)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, p)| (k.as_str(), p.as_str()))
    }

    /// Number of declared keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is declared.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, P> FromIterator<(K, P)> for ScalarDatasetPaths
where
    K: Into<String>,
    P: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, P)>>(iter: I) -> Self {
        let mut paths = ScalarDatasetPaths::new();
        for (k, p) in iter {
            paths.insert(k, p);
        }
        paths
    }
}

/// Where datasets live inside the file.
#[derive(Debug, Clone)]
pub struct CatalogLayout {
    /// Sink block recorded on every dataset
    pub block: String,
    /// Intra-file path of the primary array
    pub primary_path: String,
    /// Group holding scalar datasets
    pub attribute_root: String,
}

/// Build the session's datasets: primary first, then scalars in order.
pub fn build_catalog(
    stream_name: &str,
    detector_shape: &[usize],
    multiplier: u32,
    scalars: &ScalarDatasetPaths,
    layout: &CatalogLayout,
) -> Vec<Dataset> {
    let mut datasets = Vec::with_capacity(1 + scalars.len());
    datasets.push(Dataset {
        name: stream_name.to_string(),
        block: layout.block.clone(),
        path: layout.primary_path.clone(),
        shape: detector_shape.to_vec(),
        multiplier,
    });
    let root = layout.attribute_root.trim_end_matches('/');
    for (key, path) in scalars.iter() {
        datasets.push(Dataset {
            name: format!("{}-{}", stream_name, key),
            block: layout.block.clone(),
            path: format!("{}/{}", root, path.trim_start_matches('/')),
            shape: Vec::new(),
            multiplier,
        });
    }
    datasets
}
