//! Streaming file-writer core for the rust_daq application.
//!
//! This library coordinates a detector's file sink during a streaming
//! acquisition: it arms and releases capture, tracks how many rows the sink
//! has made durable, and announces them as stream resource and stream datum
//! documents. It is used by the `daq-stream-sim` binary and by acquisition
//! plans that drive a real sink through a [`signal::SignalBackend`].

pub mod bound_file;
pub mod config;
pub mod dataset;
pub mod documents;
pub mod dtype;
pub mod error;
pub mod logging;
pub mod providers;
pub mod signal;
pub mod sink;
pub mod writer;

pub use config::WriterConfig;
pub use documents::{DatasetDescriptor, StreamAsset, StreamDatum, StreamResource};
pub use error::{AppResult, DaqError};
pub use sink::{FileSinkIo, SimFileSink};
pub use writer::{DetectorWriter, StreamingFileWriter};
