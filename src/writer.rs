//! Streaming file writer
//!
//! Coordinates one acquisition-to-file session on a [`FileSinkIo`]:
//!
//! ```text
//! Closed --open()--> Opening --armed--> Armed --close()--> Closing --> Closed
//! ```
//!
//! While armed, the sink appends frames to a growing file. The writer never
//! touches the bytes; it tracks the sink's captured-frame counter and turns it
//! into stream documents:
//!
//! - **Index tracking**: the raw counter divided by the multiplier gives the
//!   number of complete rows written
//! - **Document composition**: after a flush, the first call with rows binds
//!   the output file and announces one resource per dataset; every call with
//!   new rows announces one datum per dataset covering exactly those rows
//!
//! # Example
//!
//! ```rust,ignore
//! let mut writer = StreamingFileWriter::new(sink, dirs, names, shapes)
//!     .with_scalar_datasets(ScalarDatasetPaths::new().with("sum", "StatsTotal"));
//!
//! let descriptors = writer.open(1).await?;
//! let mut rows = writer.observe_indices_written(Duration::from_secs(10))?;
//! while let Some(written) = rows.next().await {
//!     for doc in writer.collect_stream_docs(written?).await? {
//!         publish(doc);
//!     }
//! }
//! writer.close().await?;
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::bound_file::BoundFile;
use crate::config::WriterConfig;
use crate::dataset::{build_catalog, CatalogLayout, Dataset, ScalarDatasetPaths};
use crate::documents::{DatasetDescriptor, RowInterval, StreamAsset};
use crate::dtype::resolve_element_type;
use crate::error::{AppResult, DaqError};
use crate::providers::{DirectoryInfo, DirectoryProvider, NameProvider, ShapeProvider};
use crate::signal::{observe_value, set_and_wait_for_value, wait_for_value, AsyncStatus};
use crate::sink::{FileSinkIo, FileWriteMode};

/// Lifecycle of a writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriterState {
    /// No session
    Closed,
    /// Configuring and arming the sink
    Opening,
    /// Capturing; documents can be collected
    Armed,
    /// Releasing capture
    Closing,
}

/// Plotting hints for downstream consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hints {
    /// Data keys worth plotting
    pub fields: Vec<String>,
}

/// A detector-side writer that announces the data it produces as stream documents.
#[async_trait]
pub trait DetectorWriter: Send + Sync {
    /// Configure and arm the sink, returning one descriptor per dataset.
    async fn open(&mut self, multiplier: u32) -> AppResult<HashMap<String, DatasetDescriptor>>;

    /// Rows written so far.
    async fn get_indices_written(&self) -> AppResult<u64>;

    /// Rows written, as a stream of changes. Ends after the first error.
    fn observe_indices_written(
        &self,
        timeout: Duration,
    ) -> AppResult<BoxStream<'static, AppResult<u64>>>;

    /// Documents announcing everything up to `indices_written`.
    async fn collect_stream_docs(&mut self, indices_written: u64) -> AppResult<Vec<StreamAsset>>;

    /// Stop capture and release the sink.
    async fn close(&mut self) -> AppResult<()>;

    /// Plotting hints for the primary dataset.
    fn hints(&self) -> Hints;
}

/// State owned by one open session.
struct CaptureSession {
    info: DirectoryInfo,
    datasets: Vec<Dataset>,
    last_emitted: u64,
    bound_file: OnceCell<BoundFile>,
    pending_completion: Option<AsyncStatus>,
}

impl CaptureSession {
    fn bind(&self, file: BoundFile) {
        if let Err(rejected) = self.bound_file.set(file) {
            error!(
                path = %rejected.path().display(),
                "output file already bound for this session, keeping first binding"
            );
            debug_assert!(false, "output file bound twice in one session");
        }
    }
}

/// [`DetectorWriter`] for a sink that streams frames into a single growing file.
pub struct StreamingFileWriter {
    sink: FileSinkIo,
    directory_provider: Arc<dyn DirectoryProvider>,
    name_provider: Arc<dyn NameProvider>,
    shape_provider: Arc<dyn ShapeProvider>,
    scalar_datasets: ScalarDatasetPaths,
    config: WriterConfig,
    multiplier: u32,
    state: WriterState,
    session: Option<CaptureSession>,
}

impl StreamingFileWriter {
    /// Writer for `sink` using default configuration and no scalar datasets.
    pub fn new(
        sink: FileSinkIo,
        directory_provider: Arc<dyn DirectoryProvider>,
        name_provider: Arc<dyn NameProvider>,
        shape_provider: Arc<dyn ShapeProvider>,
    ) -> Self {
        let config = WriterConfig::default();
        Self {
            sink: sink.with_timeout(config.default_timeout()),
            directory_provider,
            name_provider,
            shape_provider,
            scalar_datasets: ScalarDatasetPaths::new(),
            config,
            multiplier: 1,
            state: WriterState::Closed,
            session: None,
        }
    }

    /// Scalar attribute datasets to record alongside the primary array.
    pub fn with_scalar_datasets(mut self, scalar_datasets: ScalarDatasetPaths) -> Self {
        self.scalar_datasets = scalar_datasets;
        self
    }

    /// Replace the configuration, reapplying its timeout to the sink.
    pub fn with_config(mut self, config: WriterConfig) -> Self {
        self.sink = self.sink.with_timeout(config.default_timeout());
        self.config = config;
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WriterState {
        self.state
    }

    /// Configuration in use.
    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    /// Highest row announced in this session, 0 when closed.
    pub fn last_emitted(&self) -> u64 {
        self.session.as_ref().map_or(0, |s| s.last_emitted)
    }

    /// Output file bound in this session, if any.
    pub fn bound_file(&self) -> Option<&Path> {
        self.session
            .as_ref()
            .and_then(|s| s.bound_file.get())
            .map(BoundFile::path)
    }

    /// Configure and arm the sink for a session folding `multiplier` frames
    /// into each row. Returns one descriptor per cataloged dataset.
    #[instrument(skip(self), fields(sink = %self.sink.capture.source()))]
    pub async fn open(&mut self, multiplier: u32) -> AppResult<HashMap<String, DatasetDescriptor>> {
        if multiplier == 0 {
            return Err(DaqError::InvalidArgument(
                "multiplier must be at least 1".to_string(),
            ));
        }
        if let Some(previous) = self.session.take() {
            warn!("open called with a session still open, discarding it");
            if let Some(status) = previous.pending_completion {
                status.abort();
            }
        }

        self.state = WriterState::Opening;
        match self.arm(multiplier).await {
            Ok((session, descriptors)) => {
                self.multiplier = multiplier;
                self.session = Some(session);
                self.state = WriterState::Armed;
                info!(multiplier, datasets = descriptors.len(), "capture armed");
                Ok(descriptors)
            }
            Err(e) => {
                self.state = WriterState::Closed;
                warn!(error = %e, "open failed");
                Err(e)
            }
        }
    }

    async fn arm(
        &self,
        multiplier: u32,
    ) -> AppResult<(CaptureSession, HashMap<String, DatasetDescriptor>)> {
        let info = self.directory_provider.directory_info();

        if self.sink.array_size0.get_value().await? == 0 {
            return Err(DaqError::NotPrimed);
        }

        // Everything that can reject the session is read before the first write
        let tag = self.sink.data_type.get_value().await?;
        let element_type = resolve_element_type(&tag)?;
        let name = self.name_provider.name();
        let detector_shape = self.shape_provider.shape().await?;

        let destination = info.destination().to_string_lossy().into_owned();
        debug!(%destination, file_name = %info.file_name(), "configuring sink");
        tokio::try_join!(
            self.sink.num_extra_dims.set(0, true),
            self.sink.lazy_open.set(true, true),
            self.sink.swmr_mode.set(true, true),
            self.sink.file_path.set(destination.clone(), true),
            self.sink.file_name.set(info.file_name(), true),
            self.sink
                .file_template
                .set(self.config.file_template.clone(), true),
            self.sink.file_write_mode.set(FileWriteMode::Stream, true),
        )
        .map_err(|e| DaqError::SinkConfigurationFailure(e.to_string()))?;

        if !self.sink.file_path_exists.get_value().await? {
            return Err(DaqError::PathNotFound(destination));
        }

        // 0 frames is capture forever
        self.sink.num_capture.set(0, true).await?;
        let pending =
            set_and_wait_for_value(&self.sink.capture, true, self.config.default_timeout()).await?;

        let datasets = build_catalog(
            &name,
            &detector_shape,
            multiplier,
            &self.scalar_datasets,
            &CatalogLayout {
                block: self.config.block.clone(),
                primary_path: self.config.primary_dataset_path.clone(),
                attribute_root: self.config.attribute_dataset_root.clone(),
            },
        );
        let source = self.sink.full_file_name.source();
        let descriptors = datasets
            .iter()
            .map(|ds| (ds.name.clone(), ds.descriptor(element_type, source)))
            .collect();

        let session = CaptureSession {
            info,
            datasets,
            last_emitted: 0,
            bound_file: OnceCell::new(),
            pending_completion: Some(pending),
        };
        Ok((session, descriptors))
    }

    /// Raw captured frames folded into complete rows.
    pub async fn get_indices_written(&self) -> AppResult<u64> {
        let captured = self.sink.num_captured.get_value().await?;
        Ok(captured / u64::from(self.multiplier))
    }

    /// Stream of rows written: the current value, then every change.
    ///
    /// Each update must arrive within `timeout`, otherwise the stream yields
    /// `DaqError::Timeout` and ends. Drop the stream to stop observing.
    pub fn observe_indices_written(
        &self,
        timeout: Duration,
    ) -> AppResult<BoxStream<'static, AppResult<u64>>> {
        let multiplier = u64::from(self.multiplier);
        let captured = observe_value(&self.sink.num_captured, timeout, self.config.observe_buffer)?;

        let mut last = None;
        Ok(captured
            .filter_map(move |update| {
                let next = match update {
                    Ok(frames) => {
                        let rows = frames / multiplier;
                        if last == Some(rows) {
                            None
                        } else {
                            last = Some(rows);
                            Some(Ok(rows))
                        }
                    }
                    Err(e) => Some(Err(e)),
                };
                futures::future::ready(next)
            })
            .boxed())
    }

    /// Flush the sink, then announce everything up to `indices_written`:
    /// resources on the first call with rows, then one datum per dataset for
    /// rows not yet announced.
    #[instrument(skip(self))]
    pub async fn collect_stream_docs(&mut self, indices_written: u64) -> AppResult<Vec<StreamAsset>> {
        let session = self.session.as_mut().ok_or(DaqError::NotOpen)?;

        // Nothing may be announced before the sink has made it durable
        self.sink.flush_now.set(true, true).await?;

        let mut docs = Vec::new();
        if indices_written == 0 {
            return Ok(docs);
        }

        if session.bound_file.get().is_none() {
            let full_file_name = self.sink.full_file_name.get_value().await?;
            let file = BoundFile::new(
                &session.info,
                Path::new(&full_file_name),
                &session.datasets,
                &self.config.format_spec,
            );
            info!(file = %full_file_name, resources = session.datasets.len(), "output file bound");
            docs.extend(
                file.stream_resources()
                    .cloned()
                    .map(StreamAsset::StreamResource),
            );
            session.bind(file);
        }

        if indices_written > session.last_emitted {
            let indices = RowInterval::new(session.last_emitted, indices_written);
            if let Some(file) = session.bound_file.get_mut() {
                docs.extend(
                    file.stream_data(indices)
                        .into_iter()
                        .map(StreamAsset::StreamDatum),
                );
            }
            session.last_emitted = indices_written;
            debug!(start = indices.start, stop = indices.stop, "rows announced");
        }

        Ok(docs)
    }

    /// Stop capture and wait for the arming write to complete.
    #[instrument(skip(self), fields(sink = %self.sink.capture.source()))]
    pub async fn close(&mut self) -> AppResult<()> {
        let previous = self.state;
        self.state = WriterState::Closing;

        match self.stop_capture().await {
            Ok(()) => {
                self.state = WriterState::Closed;
                info!("capture closed");
                Ok(())
            }
            Err(e) => {
                self.state = if self.session.is_some() {
                    previous
                } else {
                    WriterState::Closed
                };
                warn!(error = %e, "close failed");
                Err(e)
            }
        }
    }

    async fn stop_capture(&mut self) -> AppResult<()> {
        // The arming put is still outstanding, so none of these can wait for
        // an acknowledgment
        tokio::try_join!(
            self.sink.capture.set(false, false),
            self.sink.lazy_open.set(false, false),
            self.sink.swmr_mode.set(false, false),
        )?;
        wait_for_value(&self.sink.capture, false, self.config.default_timeout()).await?;

        let pending = self
            .session
            .take()
            .and_then(|session| session.pending_completion);
        if let Some(status) = pending {
            debug!(source = status.source(), "waiting for capture completion");
            status.wait(self.config.default_timeout()).await?;
        }
        Ok(())
    }

    /// Hints naming the primary dataset.
    pub fn hints(&self) -> Hints {
        Hints {
            fields: vec![self.name_provider.name()],
        }
    }
}

#[async_trait]
impl DetectorWriter for StreamingFileWriter {
    async fn open(&mut self, multiplier: u32) -> AppResult<HashMap<String, DatasetDescriptor>> {
        StreamingFileWriter::open(self, multiplier).await
    }

    async fn get_indices_written(&self) -> AppResult<u64> {
        StreamingFileWriter::get_indices_written(self).await
    }

    fn observe_indices_written(
        &self,
        timeout: Duration,
    ) -> AppResult<BoxStream<'static, AppResult<u64>>> {
        StreamingFileWriter::observe_indices_written(self, timeout)
    }

    async fn collect_stream_docs(&mut self, indices_written: u64) -> AppResult<Vec<StreamAsset>> {
        StreamingFileWriter::collect_stream_docs(self, indices_written).await
    }

    async fn close(&mut self) -> AppResult<()> {
        StreamingFileWriter::close(self).await
    }

    fn hints(&self) -> Hints {
        StreamingFileWriter::hints(self)
    }
}
