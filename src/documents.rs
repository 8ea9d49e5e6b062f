//! Stream documents
//!
//! Bluesky-style documents announcing externally stored data:
//!
//! - **StreamResource**: one per dataset per session, says a data stream
//!   exists and where it lives
//! - **StreamDatum**: one per dataset per emission, says a contiguous row
//!   interval of that resource is now readable
//!
//! # Document Flow
//!
//! ```text
//! StreamResource (1 per dataset, on first rows)
//!    │
//!    └── StreamDatum (N, one per collect with new rows)
//! ```
//!
//! Row indices are in the normalised domain: one row is `multiplier` frames.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dtype::ElementType;

/// Generate a new unique document ID
pub fn new_uid() -> String {
    Uuid::new_v4().to_string()
}

/// Current timestamp in nanoseconds since Unix epoch
pub fn now_ns() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()).unwrap_or_default()
}

/// Documents yielded by stream collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamAsset {
    StreamResource(StreamResource),
    StreamDatum(StreamDatum),
}

impl StreamAsset {
    /// UID of this document.
    pub fn uid(&self) -> &str {
        match self {
            StreamAsset::StreamResource(d) => &d.uid,
            StreamAsset::StreamDatum(d) => &d.uid,
        }
    }

    /// UID of the resource this document belongs to.
    pub fn resource_uid(&self) -> &str {
        match self {
            StreamAsset::StreamResource(d) => &d.uid,
            StreamAsset::StreamDatum(d) => &d.resource_id,
        }
    }

    /// The resource, if this is one.
    pub fn as_resource(&self) -> Option<&StreamResource> {
        match self {
            StreamAsset::StreamResource(d) => Some(d),
            StreamAsset::StreamDatum(_) => None,
        }
    }

    /// The datum, if this is one.
    pub fn as_datum(&self) -> Option<&StreamDatum> {
        match self {
            StreamAsset::StreamResource(_) => None,
            StreamAsset::StreamDatum(d) => Some(d),
        }
    }
}

/// Announcement that a dataset exists in a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamResource {
    /// Unique id datums refer back to
    #[serde(rename = "id")]
    pub uid: String,
    /// Dataset name the resource serves
    pub data_key: String,
    /// Format identifier telling readers how to slice the file
    #[serde(rename = "format_spec")]
    pub spec: String,
    /// Directory shared with downstream readers
    pub root: String,
    /// File path relative to `root`
    pub resource_path: String,
    /// Format-specific parameters
    #[serde(rename = "params")]
    pub parameters: ResourceParameters,
    /// Creation time, nanoseconds since the Unix epoch
    pub time_ns: u64,
}

/// Format-specific parameters of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceParameters {
    /// Dataset name
    pub name: String,
    /// Sink block producing the dataset
    pub block: String,
    /// Intra-file dataset path
    #[serde(rename = "intra_path")]
    pub path: String,
    /// Raw frames per row
    pub multiplier: u32,
}

/// Half-open row interval `[start, stop)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowInterval {
    /// First row, inclusive
    pub start: u64,
    /// End row, exclusive
    pub stop: u64,
}

impl RowInterval {
    /// Interval `[start, stop)`.
    pub fn new(start: u64, stop: u64) -> Self {
        Self { start, stop }
    }

    /// Rows covered, 0 for inverted intervals.
    pub fn len(&self) -> u64 {
        self.stop.saturating_sub(self.start)
    }

    /// True when no rows are covered.
    pub fn is_empty(&self) -> bool {
        self.stop <= self.start
    }
}

/// Announcement of newly readable rows within a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDatum {
    /// `{resource_uid}/{sequence}`
    #[serde(rename = "id")]
    pub uid: String,
    /// Resource the rows belong to
    pub resource_id: String,
    /// Event descriptor this datum is linked to, empty until linked
    pub descriptor: String,
    /// Newly readable rows
    #[serde(rename = "interval")]
    pub indices: RowInterval,
    /// Event sequence numbers covered, empty until linked
    pub seq_nums: RowInterval,
}

/// Schema of one dataset returned from `open`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    /// Control point the data is sourced from
    pub source: String,
    /// Shape of one row
    pub shape: Vec<usize>,
    /// "array" for shaped datasets, "number" for scalars
    pub dtype: String,
    /// Array-protocol type string of the elements
    pub dtype_str: String,
    /// Element type reported by the sink
    pub element_type: ElementType,
    /// Data lives outside the document stream
    pub external: bool,
}

/// A resource plus the counter used to mint its datum uids.
#[derive(Debug, Clone)]
pub struct ResourceBundle {
    resource: StreamResource,
    next_seq: u64,
}

impl ResourceBundle {
    /// Mint a new resource for `data_key` in the file at `root`/`resource_path`.
    pub fn new(
        spec: &str,
        root: &str,
        resource_path: &str,
        data_key: &str,
        parameters: ResourceParameters,
    ) -> Self {
        Self {
            resource: StreamResource {
                uid: new_uid(),
                data_key: data_key.to_string(),
                spec: spec.to_string(),
                root: root.to_string(),
                resource_path: resource_path.to_string(),
                parameters,
                time_ns: now_ns(),
            },
            next_seq: 0,
        }
    }

    /// The announced resource.
    pub fn resource(&self) -> &StreamResource {
        &self.resource
    }

    /// Datum announcing `indices`, numbered after every earlier datum.
    pub fn compose_datum(&mut self, indices: RowInterval) -> StreamDatum {
        let datum = StreamDatum {
            uid: format!("{}/{}", self.resource.uid, self.next_seq),
            resource_id: self.resource.uid.clone(),
            descriptor: String::new(),
            indices,
            seq_nums: RowInterval::new(0, 0),
        };
        self.next_seq += 1;
        datum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle() -> ResourceBundle {
        ResourceBundle::new(
            "STREAMING_ARRAY_SLICE",
            "/data",
            "scan/det_000.h5",
            "det",
            ResourceParameters {
                name: "det".to_string(),
                block: "hdf".to_string(),
                path: "/entry/data/data".to_string(),
                multiplier: 1,
            },
        )
    }

    #[test]
    fn test_datum_uids_are_sequential_per_resource() {
        let mut bundle = bundle();
        let first = bundle.compose_datum(RowInterval::new(0, 5));
        let second = bundle.compose_datum(RowInterval::new(5, 12));

        let uid = bundle.resource().uid.clone();
        assert_eq!(first.uid, format!("{}/0", uid));
        assert_eq!(second.uid, format!("{}/1", uid));
        assert_eq!(second.resource_id, uid);
        assert_eq!(second.indices.len(), 7);
    }

    #[test]
    fn test_stream_asset_serialization_tag() {
        let mut bundle = bundle();
        let asset = StreamAsset::StreamDatum(bundle.compose_datum(RowInterval::new(0, 3)));
        let json = serde_json::to_value(&asset).unwrap();
        assert_eq!(json["type"], "stream_datum");
        assert_eq!(json["interval"]["start"], 0);
        assert_eq!(json["interval"]["stop"], 3);
        assert_eq!(json["resource_id"], bundle.resource().uid.as_str());
        assert!(json.get("indices").is_none());

        let back: StreamAsset = serde_json::from_value(json).unwrap();
        assert_eq!(back, asset);
    }

    #[test]
    fn test_resource_wire_fields() {
        let bundle = bundle();
        let json =
            serde_json::to_value(StreamAsset::StreamResource(bundle.resource().clone())).unwrap();

        assert_eq!(json["type"], "stream_resource");
        assert_eq!(json["id"], bundle.resource().uid.as_str());
        assert_eq!(json["format_spec"], "STREAMING_ARRAY_SLICE");
        assert_eq!(json["root"], "/data");
        assert_eq!(json["resource_path"], "scan/det_000.h5");
        assert_eq!(json["params"]["name"], "det");
        assert_eq!(json["params"]["block"], "hdf");
        assert_eq!(json["params"]["intra_path"], "/entry/data/data");
        assert_eq!(json["params"]["multiplier"], 1);
        for legacy in ["uid", "spec", "parameters"] {
            assert!(json.get(legacy).is_none(), "unexpected key {}", legacy);
        }
    }

    #[test]
    fn test_interval_emptiness() {
        assert!(RowInterval::new(5, 5).is_empty());
        assert!(RowInterval::new(6, 5).is_empty());
        assert_eq!(RowInterval::new(6, 5).len(), 0);
        assert!(!RowInterval::new(0, 1).is_empty());
    }
}
