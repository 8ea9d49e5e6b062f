//! The output file once its name is known.
//!
//! Binding happens during document collection, on the first call with rows
//! available, because the sink only resolves the final file name after
//! capture has started. A [`BoundFile`] then owns one [`ResourceBundle`] per
//! cataloged dataset for the rest of the session.

use std::path::{Path, PathBuf};

use crate::dataset::Dataset;
use crate::documents::{
    ResourceBundle, ResourceParameters, RowInterval, StreamDatum, StreamResource,
};
use crate::providers::DirectoryInfo;

/// Output file of one session with its resources.
#[derive(Debug, Clone)]
pub struct BoundFile {
    path: PathBuf,
    bundles: Vec<ResourceBundle>,
}

impl BoundFile {
    /// Bind `full_file_name`, minting one resource per dataset.
    pub fn new(info: &DirectoryInfo, full_file_name: &Path, datasets: &[Dataset], spec: &str) -> Self {
        let (root, resource_path) = info.resource_location(full_file_name);
        let root = root.to_string_lossy();
        let resource_path = resource_path.to_string_lossy();

        let bundles = datasets
            .iter()
            .map(|ds| {
                ResourceBundle::new(
                    spec,
                    &root,
                    &resource_path,
                    &ds.name,
                    ResourceParameters {
                        name: ds.name.clone(),
                        block: ds.block.clone(),
                        path: ds.path.clone(),
                        multiplier: ds.multiplier,
                    },
                )
            })
            .collect();

        Self {
            path: full_file_name.to_path_buf(),
            bundles,
        }
    }

    /// Bound file as reported by the sink.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resources in catalog order.
    pub fn stream_resources(&self) -> impl Iterator<Item = &StreamResource> + '_ {
        self.bundles.iter().map(ResourceBundle::resource)
    }

    /// One datum per dataset covering `indices`, in catalog order. Empty
    /// intervals produce nothing.
    pub fn stream_data(&mut self, indices: RowInterval) -> Vec<StreamDatum> {
        if indices.is_empty() {
            return Vec::new();
        }
        self.bundles
            .iter_mut()
            .map(|bundle| bundle.compose_datum(indices))
            .collect()
    }
}
