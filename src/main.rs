//! Drive a streaming writer against a simulated file sink and print the
//! resulting stream documents as JSON lines.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use tracing::info;

use rust_daq_stream::dataset::ScalarDatasetPaths;
use rust_daq_stream::logging;
use rust_daq_stream::providers::{DirectoryInfo, StaticDirectoryProvider, StaticShapeProvider};
use rust_daq_stream::{FileSinkIo, StreamingFileWriter, WriterConfig};

#[derive(Parser)]
#[command(
    name = "daq-stream-sim",
    version,
    about = "Simulated streaming acquisition printing stream documents"
)]
struct Cli {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory the simulated sink writes into (defaults to the temp dir)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Raw frames the simulated detector produces
    #[arg(long, default_value_t = 12)]
    frames: u64,

    /// Raw frames folded into one row
    #[arg(long, default_value_t = 1)]
    multiplier: u32,

    /// Frames produced between counter updates
    #[arg(long, default_value_t = 3)]
    burst: u64,

    /// Stream name used for dataset names
    #[arg(long, default_value = "det")]
    name: String,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => WriterConfig::load_from(path),
        None => WriterConfig::load(),
    }
    .context("loading writer configuration")?;
    config.json_logs |= cli.json_logs;
    logging::init_from_config(&config)?;

    let root = cli.root.clone().unwrap_or_else(std::env::temp_dir);
    let observe_timeout = config.observe_timeout();

    let (io, sim) = FileSinkIo::sim("SIM:HDF1:");
    sim.prime(64);

    let name = cli.name.clone();
    let mut writer = StreamingFileWriter::new(
        io,
        Arc::new(StaticDirectoryProvider::new(
            DirectoryInfo::new(&root).with_prefix(format!("{}-", cli.name)),
        )),
        Arc::new(move || name.clone()),
        Arc::new(StaticShapeProvider::new(vec![64, 48])),
    )
    .with_scalar_datasets(
        ScalarDatasetPaths::new()
            .with("sum", "StatsTotal")
            .with("exposure", "AcquireTime"),
    )
    .with_config(config);

    let descriptors = writer.open(cli.multiplier).await?;
    for (key, descriptor) in &descriptors {
        info!(%key, shape = ?descriptor.shape, dtype = %descriptor.dtype_str, "dataset declared");
    }

    // Simulated detector: bump the captured counter in bursts
    let frames = cli.frames;
    let burst = cli.burst.max(1);
    let detector = tokio::spawn(async move {
        let mut captured = 0;
        while captured < frames {
            tokio::time::sleep(Duration::from_millis(20)).await;
            captured = (captured + burst).min(frames);
            sim.set_captured(captured);
        }
        sim
    });

    let rows_expected = frames / u64::from(cli.multiplier);
    let mut rows = writer.observe_indices_written(observe_timeout)?;
    while let Some(written) = rows.next().await {
        let written = written?;
        for doc in writer.collect_stream_docs(written).await? {
            println!("{}", serde_json::to_string(&doc)?);
        }
        if written >= rows_expected {
            break;
        }
    }
    drop(rows);

    detector.await.context("simulated detector task")?;
    writer.close().await?;
    info!(rows = rows_expected, "acquisition complete");
    Ok(())
}
