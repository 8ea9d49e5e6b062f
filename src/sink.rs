//! File sink control points
//!
//! [`FileSinkIo`] groups the control points of the acquisition-adjacent
//! process that writes frames to disk. The writer only configures and observes
//! it; the bytes are written on the sink side.
//!
//! [`FileSinkIo::sim`] builds the same set of control points on
//! [`SimSignalBackend`]s wired together to behave like a real sink:
//!
//! - an acknowledged `capture = true` put completes only once capture is
//!   cleared again
//! - `file_path_exists` follows the filesystem after each `file_path` write
//! - `full_file_name` is rendered from the template when capture starts
//! - `flush_now` acknowledges immediately

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DaqError;
use crate::signal::{Signal, SimSignalBackend};

/// How the sink commits frames to the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileWriteMode {
    /// One frame per file
    Single,
    /// Buffer frames in memory, write on capture stop
    Capture,
    /// Append frames as they arrive
    Stream,
}

impl FileWriteMode {
    /// Wire string written to the sink.
    pub fn as_str(&self) -> &'static str {
        match self {
            FileWriteMode::Single => "Single",
            FileWriteMode::Capture => "Capture",
            FileWriteMode::Stream => "Stream",
        }
    }
}

impl FromStr for FileWriteMode {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Single" => Ok(FileWriteMode::Single),
            "Capture" => Ok(FileWriteMode::Capture),
            "Stream" => Ok(FileWriteMode::Stream),
            other => Err(DaqError::signal(
                "FileWriteMode",
                format!("unknown write mode '{}'", other),
            )),
        }
    }
}

impl fmt::Display for FileWriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Control points of a streaming file sink.
#[derive(Debug, Clone)]
pub struct FileSinkIo {
    /// First dimension of the incoming array; 0 until a frame has arrived
    pub array_size0: Signal<u64>,
    /// Element type tag of the incoming array
    pub data_type: Signal<String>,
    /// Extra dimensions appended to each frame
    pub num_extra_dims: Signal<u32>,
    /// Open the file on the first frame rather than on capture start
    pub lazy_open: Signal<bool>,
    /// Single-writer/multiple-reader access to the file being written
    pub swmr_mode: Signal<bool>,
    /// Destination directory
    pub file_path: Signal<String>,
    /// File name fed into the template
    pub file_name: Signal<String>,
    /// printf-style template combining path, name and number
    pub file_template: Signal<String>,
    /// How frames are committed
    pub file_write_mode: Signal<FileWriteMode>,
    /// Whether the sink can see `file_path`
    pub file_path_exists: Signal<bool>,
    /// Frame limit for the capture; 0 is unbounded
    pub num_capture: Signal<u64>,
    /// Capture in progress; an acknowledged `true` completes when capture stops
    pub capture: Signal<bool>,
    /// Frames persisted since capture started
    pub num_captured: Signal<u64>,
    /// Flush buffered frames to disk
    pub flush_now: Signal<bool>,
    /// Output file name as resolved by the sink
    pub full_file_name: Signal<String>,
}

impl FileSinkIo {
    /// Apply `timeout` to acknowledged writes on every control point.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self {
            array_size0: self.array_size0.with_timeout(timeout),
            data_type: self.data_type.with_timeout(timeout),
            num_extra_dims: self.num_extra_dims.with_timeout(timeout),
            lazy_open: self.lazy_open.with_timeout(timeout),
            swmr_mode: self.swmr_mode.with_timeout(timeout),
            file_path: self.file_path.with_timeout(timeout),
            file_name: self.file_name.with_timeout(timeout),
            file_template: self.file_template.with_timeout(timeout),
            file_write_mode: self.file_write_mode.with_timeout(timeout),
            file_path_exists: self.file_path_exists.with_timeout(timeout),
            num_capture: self.num_capture.with_timeout(timeout),
            capture: self.capture.with_timeout(timeout),
            num_captured: self.num_captured.with_timeout(timeout),
            flush_now: self.flush_now.with_timeout(timeout),
            full_file_name: self.full_file_name.with_timeout(timeout),
        }
    }

    /// Simulated sink with control points named `{prefix}{Field}`.
    pub fn sim(prefix: &str) -> (Self, SimFileSink) {
        let sim = SimFileSink::new(prefix);
        let io = FileSinkIo {
            array_size0: sim.array_size0.signal(),
            data_type: sim.data_type.signal(),
            num_extra_dims: sim.num_extra_dims.signal(),
            lazy_open: sim.lazy_open.signal(),
            swmr_mode: sim.swmr_mode.signal(),
            file_path: sim.file_path.signal(),
            file_name: sim.file_name.signal(),
            file_template: sim.file_template.signal(),
            file_write_mode: sim.file_write_mode.signal(),
            file_path_exists: sim.file_path_exists.signal(),
            num_capture: sim.num_capture.signal(),
            capture: sim.capture.signal(),
            num_captured: sim.num_captured.signal(),
            flush_now: sim.flush_now.signal(),
            full_file_name: sim.full_file_name.signal(),
        };
        (io, sim)
    }
}

// =============================================================================
// SimFileSink
// =============================================================================

/// Device side of a simulated sink.
pub struct SimFileSink {
    /// Device side of [`FileSinkIo::array_size0`]
    pub array_size0: Arc<SimSignalBackend<u64>>,
    /// Device side of [`FileSinkIo::data_type`]
    pub data_type: Arc<SimSignalBackend<String>>,
    /// Device side of [`FileSinkIo::num_extra_dims`]
    pub num_extra_dims: Arc<SimSignalBackend<u32>>,
    /// Device side of [`FileSinkIo::lazy_open`]
    pub lazy_open: Arc<SimSignalBackend<bool>>,
    /// Device side of [`FileSinkIo::swmr_mode`]
    pub swmr_mode: Arc<SimSignalBackend<bool>>,
    /// Device side of [`FileSinkIo::file_path`]
    pub file_path: Arc<SimSignalBackend<String>>,
    /// Device side of [`FileSinkIo::file_name`]
    pub file_name: Arc<SimSignalBackend<String>>,
    /// Device side of [`FileSinkIo::file_template`]
    pub file_template: Arc<SimSignalBackend<String>>,
    /// Device side of [`FileSinkIo::file_write_mode`]
    pub file_write_mode: Arc<SimSignalBackend<FileWriteMode>>,
    /// Device side of [`FileSinkIo::file_path_exists`]
    pub file_path_exists: Arc<SimSignalBackend<bool>>,
    /// Device side of [`FileSinkIo::num_capture`]
    pub num_capture: Arc<SimSignalBackend<u64>>,
    /// Device side of [`FileSinkIo::capture`]
    pub capture: Arc<SimSignalBackend<bool>>,
    /// Device side of [`FileSinkIo::num_captured`]
    pub num_captured: Arc<SimSignalBackend<u64>>,
    /// Device side of [`FileSinkIo::flush_now`]
    pub flush_now: Arc<SimSignalBackend<bool>>,
    /// Device side of [`FileSinkIo::full_file_name`]
    pub full_file_name: Arc<SimSignalBackend<String>>,
}

impl SimFileSink {
    fn new(prefix: &str) -> Self {
        let pv = |field: &str| format!("{}{}", prefix, field);
        let sim = Self {
            array_size0: SimSignalBackend::new(pv("ArraySize0"), 0),
            data_type: SimSignalBackend::new(pv("DataType"), "UInt16".to_string()),
            num_extra_dims: SimSignalBackend::new(pv("NumExtraDims"), 0),
            lazy_open: SimSignalBackend::new(pv("LazyOpen"), false),
            swmr_mode: SimSignalBackend::new(pv("SWMRMode"), false),
            file_path: SimSignalBackend::new(pv("FilePath"), String::new()),
            file_name: SimSignalBackend::new(pv("FileName"), String::new()),
            file_template: SimSignalBackend::new(pv("FileTemplate"), String::new()),
            file_write_mode: SimSignalBackend::new(pv("FileWriteMode"), FileWriteMode::Single),
            file_path_exists: SimSignalBackend::new(pv("FilePathExists"), false),
            num_capture: SimSignalBackend::new(pv("NumCapture"), 0),
            capture: SimSignalBackend::new(pv("Capture"), false),
            num_captured: SimSignalBackend::new(pv("NumCaptured"), 0),
            flush_now: SimSignalBackend::new(pv("FlushNow"), false),
            full_file_name: SimSignalBackend::new(pv("FullFileName"), String::new()),
        };
        sim.wire();
        sim
    }

    fn wire(&self) {
        let exists = Arc::clone(&self.file_path_exists);
        self.file_path.on_put(move |path| {
            exists.set_value(Path::new(path).is_dir());
        });

        // Weak handles: the capture backend owns this hook
        let capture: Weak<SimSignalBackend<bool>> = Arc::downgrade(&self.capture);
        let path = Arc::clone(&self.file_path);
        let name = Arc::clone(&self.file_name);
        let template = Arc::clone(&self.file_template);
        let full = Arc::clone(&self.full_file_name);
        self.capture.on_put(move |armed| {
            let Some(capture) = capture.upgrade() else {
                return;
            };
            if *armed {
                full.set_value(render_file_template(
                    &template.value(),
                    &path.value(),
                    &name.value(),
                    0,
                ));
            }
            // A busy capture put is released when capture is cleared
            capture.set_put_proceeds(!*armed);
        });
    }

    /// Report a first frame whose leading dimension is `size0`.
    pub fn prime(&self, size0: u64) {
        self.array_size0.set_value(size0);
    }

    /// Advance the captured-frame counter.
    pub fn set_captured(&self, frames: u64) {
        self.num_captured.set_value(frames);
    }

    /// Stop capture from the device side, as on an error or frame limit.
    pub fn stop_capture(&self) {
        self.capture.set_value(false);
        self.capture.set_put_proceeds(true);
    }

    /// Number of flush requests received.
    pub fn flush_count(&self) -> usize {
        self.flush_now.puts().iter().filter(|f| **f).count()
    }
}

/// Render a sink file template: `%s` takes the path then the name, `%d` (with
/// optional `width.precision`) takes the file number.
pub fn render_file_template(template: &str, path: &str, name: &str, number: u32) -> String {
    let dir = if path.is_empty() || path.ends_with('/') {
        path.to_string()
    } else {
        format!("{}/", path)
    };
    let mut strings = [dir.as_str(), name].into_iter();
    let mut out = String::with_capacity(template.len() + dir.len() + name.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut spec = String::new();
        while let Some(&d) = chars.peek() {
            if d.is_ascii_digit() || d == '.' {
                spec.push(d);
                chars.next();
            } else {
                break;
            }
        }
        match chars.next() {
            Some('s') => out.push_str(strings.next().unwrap_or_default()),
            Some('d') => {
                // C printf: precision is the minimum digit count
                let digits = spec
                    .split('.')
                    .filter_map(|part| part.parse::<usize>().ok())
                    .max()
                    .unwrap_or(0);
                out.push_str(&format!("{:0width$}", number, width = digits));
            }
            Some('%') => out.push('%'),
            Some(other) => {
                out.push('%');
                out.push_str(&spec);
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_mode_wire_strings() {
        assert_eq!(FileWriteMode::Stream.as_str(), "Stream");
        assert_eq!("Capture".parse::<FileWriteMode>(), Ok(FileWriteMode::Capture));
        assert!("stream".parse::<FileWriteMode>().is_err());
    }

    #[test]
    fn test_render_default_template() {
        assert_eq!(
            render_file_template("%s%s_%3.3d.h5", "/data/run1", "scan-", 7),
            "/data/run1/scan-_007.h5"
        );
        assert_eq!(
            render_file_template("%s%s.h5", "/data/", "frames", 0),
            "/data/frames.h5"
        );
        assert_eq!(render_file_template("100%%_%d", "", "", 12), "100%_12");
    }

    #[tokio::test]
    async fn test_sim_path_exists_follows_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let (io, _sim) = FileSinkIo::sim("SIM:HDF1:");

        io.file_path
            .set(dir.path().display().to_string(), true)
            .await
            .unwrap();
        assert!(io.file_path_exists.get_value().await.unwrap());

        io.file_path
            .set("/definitely/not/here".to_string(), true)
            .await
            .unwrap();
        assert!(!io.file_path_exists.get_value().await.unwrap());
    }

    #[tokio::test]
    async fn test_sim_capture_put_completes_on_clear() {
        let (io, sim) = FileSinkIo::sim("SIM:HDF1:");
        io.file_path.set("/tmp".to_string(), true).await.unwrap();
        io.file_name.set("det".to_string(), true).await.unwrap();
        io.file_template
            .set("%s%s_%3.3d.h5".to_string(), true)
            .await
            .unwrap();

        let capture = io.capture.clone();
        let armed = tokio::spawn(async move { capture.set(true, true).await });
        tokio::task::yield_now().await;
        assert!(sim.capture.value());
        assert_eq!(sim.full_file_name.value(), "/tmp/det_000.h5");
        assert!(!armed.is_finished());

        io.capture.set(false, false).await.unwrap();
        armed.await.unwrap().unwrap();
    }
}
