//! Control channel signals
//!
//! A [`Signal<T>`] is one control point on the sink: a configuration field, a
//! flag, or a counter. Reads, writes and monitors go through a
//! [`SignalBackend<T>`], which is the seam to the device driver layer. Two
//! kinds of monitor are offered:
//!
//! - `subscribe`: a `tokio::sync::watch` receiver holding the latest value,
//!   enough for waiters that only care about reaching a target
//! - `monitor`: an unbounded queue receiving every update in order, for
//!   observers that must not miss intermediate values
//!
//! Every wait on a hardware-reported value is bounded:
//!
//! - [`wait_for_value`] blocks until the readback equals a target
//! - [`set_and_wait_for_value`] starts a put whose completion is tracked as an
//!   [`AsyncStatus`] and returns once the readback shows the value
//! - [`observe_value`] produces a lazily-consumed stream of updates where each
//!   update must arrive within the given timeout
//!
//! [`SimSignalBackend`] keeps the value in a watch channel and lets tests
//! script the device side (readback changes, put completion, put failures).

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::error::{AppResult, DaqError};

/// Bound applied to acknowledged writes unless a signal is given its own.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Access to one control point on a device.
#[async_trait]
pub trait SignalBackend<T>: Send + Sync
where
    T: Clone + Send + Sync + 'static,
{
    /// Address of the control point, used in logs and errors.
    fn source(&self) -> &str;

    /// Read the current value.
    async fn get_value(&self) -> AppResult<T>;

    /// Write a value. With `wait`, resolves only once the device acknowledges
    /// completion of the write.
    async fn put(&self, value: T, wait: bool) -> AppResult<()>;

    /// Latest-value monitor.
    fn subscribe(&self) -> AppResult<watch::Receiver<T>>;

    /// Every update in arrival order, starting with the current value.
    fn monitor(&self) -> AppResult<mpsc::UnboundedReceiver<T>>;
}

/// Typed handle to a control point.
pub struct Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    backend: Arc<dyn SignalBackend<T>>,
    timeout: Duration,
}

impl<T: Clone + Send + Sync + 'static> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            timeout: self.timeout,
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("source", &self.source())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Handle over `backend` with the default write timeout.
    pub fn new(backend: Arc<dyn SignalBackend<T>>) -> Self {
        Self {
            backend,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Bound for acknowledged writes on this signal.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Address of the control point.
    pub fn source(&self) -> &str {
        self.backend.source()
    }

    /// Bound applied to acknowledged writes.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Read the current value.
    pub async fn get_value(&self) -> AppResult<T> {
        self.backend.get_value().await
    }

    /// Write `value`. With `wait`, the acknowledgment must arrive within the
    /// signal timeout; without it the write is fire-and-forget.
    pub async fn set(&self, value: T, wait: bool) -> AppResult<()> {
        if !wait {
            return self.backend.put(value, false).await;
        }
        tokio::time::timeout(self.timeout, self.backend.put(value, true))
            .await
            .map_err(|_| DaqError::timeout(format!("put to {}", self.source()), self.timeout))?
    }

    /// Acknowledged write with no bound; the caller owns the wait.
    async fn put_until_complete(&self, value: T) -> AppResult<()> {
        self.backend.put(value, true).await
    }

    /// Latest-value monitor.
    pub fn subscribe(&self) -> AppResult<watch::Receiver<T>> {
        self.backend.subscribe()
    }

    /// Queue of every update, starting with the current value.
    pub fn monitor(&self) -> AppResult<mpsc::UnboundedReceiver<T>> {
        self.backend.monitor()
    }
}

// =============================================================================
// Bounded waits
// =============================================================================

/// Wait until the signal reads `target`.
pub async fn wait_for_value<T>(signal: &Signal<T>, target: T, timeout: Duration) -> AppResult<()>
where
    T: Clone + Send + Sync + PartialEq + Debug + 'static,
{
    let mut rx = signal.subscribe()?;
    let outcome = tokio::time::timeout(timeout, rx.wait_for(|v| *v == target))
        .await
        .map(|settled| settled.map(|_| ()));

    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err(DaqError::Disconnected(signal.source().to_string())),
        Err(_) => Err(DaqError::timeout(
            format!("{} == {:?}", signal.source(), target),
            timeout,
        )),
    }
}

/// Start an acknowledged write of `value` and wait until the readback shows it.
///
/// The returned status resolves when the device completes the write, which
/// for busy-style control points may be much later.
pub async fn set_and_wait_for_value<T>(
    signal: &Signal<T>,
    value: T,
    timeout: Duration,
) -> AppResult<AsyncStatus>
where
    T: Clone + Send + Sync + PartialEq + Debug + 'static,
{
    let putter = signal.clone();
    let target = value.clone();
    let status = AsyncStatus::spawn(signal.source(), async move {
        putter.put_until_complete(target).await
    });

    if let Err(e) = wait_for_value(signal, value, timeout).await {
        status.abort();
        return Err(e);
    }
    Ok(status)
}

/// Stream the current value followed by every update.
///
/// A producer task forwards each queued monitor update into a bounded channel,
/// so updates arriving faster than the consumer reads are delivered late but
/// never merged. If no update arrives within `timeout` the stream yields
/// `DaqError::Timeout` and ends. Dropping the stream stops the producer,
/// including any wait in progress.
pub fn observe_value<T>(
    signal: &Signal<T>,
    timeout: Duration,
    buffer: usize,
) -> AppResult<ReceiverStream<AppResult<T>>>
where
    T: Clone + Send + Sync + 'static,
{
    let mut rx = signal.monitor()?;
    let source = signal.source().to_string();
    let (tx, out) = mpsc::channel(buffer.max(1));

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tx.closed() => {
                    debug!(signal = %source, "observer dropped, stopping monitor");
                    break;
                }
                update = tokio::time::timeout(timeout, rx.recv()) => {
                    let item = match update {
                        Ok(Some(value)) => Ok(value),
                        Ok(None) => Err(DaqError::Disconnected(source.clone())),
                        Err(_) => {
                            warn!(signal = %source, ?timeout, "no update within timeout");
                            Err(DaqError::timeout(format!("update from {}", source), timeout))
                        }
                    };
                    let terminal = item.is_err();
                    if tx.send(item).await.is_err() || terminal {
                        break;
                    }
                }
            }
        }
    });

    Ok(ReceiverStream::new(out))
}

// =============================================================================
// AsyncStatus
// =============================================================================

/// Completion handle for a write that finishes in the background.
///
/// Consumed by [`AsyncStatus::wait`], so it can only be awaited once.
#[derive(Debug)]
pub struct AsyncStatus {
    source: String,
    handle: JoinHandle<AppResult<()>>,
}

impl AsyncStatus {
    /// Run `fut` in the background as the completion of a write to `source`.
    pub fn spawn<F>(source: impl Into<String>, fut: F) -> Self
    where
        F: std::future::Future<Output = AppResult<()>> + Send + 'static,
    {
        Self {
            source: source.into(),
            handle: tokio::spawn(fut),
        }
    }

    /// Control point the write went to.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// True once the write has completed or failed.
    pub fn is_done(&self) -> bool {
        self.handle.is_finished()
    }

    /// Abandon the background write.
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Wait for completion. On expiry the background write is abandoned.
    pub async fn wait(mut self, timeout: Duration) -> AppResult<()> {
        match tokio::time::timeout(timeout, &mut self.handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(DaqError::signal(
                &self.source,
                format!("completion task failed: {}", join_err),
            )),
            Err(_) => {
                self.handle.abort();
                Err(DaqError::timeout(
                    format!("completion of {}", self.source),
                    timeout,
                ))
            }
        }
    }
}

// =============================================================================
// SimSignalBackend
// =============================================================================

type PutHook<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// In-memory control point for tests and simulation.
///
/// Puts update the value immediately, feed every monitor queue and run any
/// registered hooks. An acknowledged put then resolves once `put_proceeds` is
/// true, which it is by default.
pub struct SimSignalBackend<T>
where
    T: Clone + Send + Sync + 'static,
{
    source: String,
    value: watch::Sender<T>,
    monitors: Mutex<Vec<mpsc::UnboundedSender<T>>>,
    put_proceeds: watch::Sender<bool>,
    put_failure: Mutex<Option<String>>,
    puts: Mutex<Vec<T>>,
    hooks: Mutex<Vec<PutHook<T>>>,
}

impl<T> SimSignalBackend<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Control point named `source` holding `initial`.
    pub fn new(source: impl Into<String>, initial: T) -> Arc<Self> {
        let (value, _) = watch::channel(initial);
        let (put_proceeds, _) = watch::channel(true);
        Arc::new(Self {
            source: source.into(),
            value,
            monitors: Mutex::new(Vec::new()),
            put_proceeds,
            put_failure: Mutex::new(None),
            puts: Mutex::new(Vec::new()),
            hooks: Mutex::new(Vec::new()),
        })
    }

    /// Signal handle backed by this control point.
    pub fn signal(self: &Arc<Self>) -> Signal<T> {
        Signal::new(Arc::clone(self) as Arc<dyn SignalBackend<T>>)
    }

    /// Change the readback as the device would, without a put.
    pub fn set_value(&self, value: T) {
        self.publish(value);
    }

    /// Current readback.
    pub fn value(&self) -> T {
        self.value.borrow().clone()
    }

    fn publish(&self, value: T) {
        // Held across the update so a new monitor sees each value exactly once
        let mut monitors = self.monitors.lock();
        self.value.send_replace(value.clone());
        monitors.retain(|tx| tx.send(value.clone()).is_ok());
    }

    /// Hold acknowledged puts until set back to true.
    pub fn set_put_proceeds(&self, proceeds: bool) {
        self.put_proceeds.send_replace(proceeds);
    }

    /// Make every following put fail with `reason`.
    pub fn fail_puts(&self, reason: impl Into<String>) {
        *self.put_failure.lock() = Some(reason.into());
    }

    /// Values written so far, in order.
    pub fn puts(&self) -> Vec<T> {
        self.puts.lock().clone()
    }

    /// Run `hook` after every successful put.
    pub fn on_put(&self, hook: impl Fn(&T) + Send + Sync + 'static) {
        self.hooks.lock().push(Arc::new(hook));
    }
}

#[async_trait]
impl<T> SignalBackend<T> for SimSignalBackend<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn source(&self) -> &str {
        &self.source
    }

    async fn get_value(&self) -> AppResult<T> {
        Ok(self.value.borrow().clone())
    }

    async fn put(&self, value: T, wait: bool) -> AppResult<()> {
        let failure = self.put_failure.lock().clone();
        if let Some(reason) = failure {
            return Err(DaqError::signal(&self.source, reason));
        }

        self.puts.lock().push(value.clone());
        self.publish(value.clone());
        let hooks: Vec<PutHook<T>> = self.hooks.lock().clone();
        for hook in hooks {
            hook(&value);
        }

        if wait {
            let mut proceeds = self.put_proceeds.subscribe();
            proceeds
                .wait_for(|p| *p)
                .await
                .map(|_| ())
                .map_err(|_| DaqError::Disconnected(self.source.clone()))?;
        }
        Ok(())
    }

    fn subscribe(&self) -> AppResult<watch::Receiver<T>> {
        Ok(self.value.subscribe())
    }

    fn monitor(&self) -> AppResult<mpsc::UnboundedReceiver<T>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut monitors = self.monitors.lock();
        // Receiver is held in this scope, so the send cannot fail
        let _ = tx.send(self.value.borrow().clone());
        monitors.push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_sim_signal_get_and_set() {
        let backend = SimSignalBackend::new("SIM:Value", 1_i64);
        let signal = backend.signal();

        assert_eq!(signal.get_value().await.unwrap(), 1);
        signal.set(42, true).await.unwrap();
        assert_eq!(signal.get_value().await.unwrap(), 42);
        assert_eq!(backend.puts(), vec![42]);
    }

    #[tokio::test]
    async fn test_failed_put_is_reported() {
        let backend = SimSignalBackend::new("SIM:Name", String::new());
        backend.fail_puts("record disabled");

        let err = backend.signal().set("x".to_string(), true).await.unwrap_err();
        assert!(matches!(err, DaqError::Signal { .. }));
        assert!(backend.puts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledged_put_times_out() {
        let backend = SimSignalBackend::new("SIM:Flush", false);
        backend.set_put_proceeds(false);
        let signal = backend.signal().with_timeout(Duration::from_millis(100));

        let err = signal.set(true, true).await.unwrap_err();
        assert!(err.is_timeout());
        // Fire-and-forget writes never wait for the acknowledgment
        signal.set(false, false).await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_value_sees_later_update() {
        let backend = SimSignalBackend::new("SIM:Capture", false);
        let signal = backend.signal();

        let setter = Arc::clone(&backend);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            setter.set_value(true);
        });

        wait_for_value(&signal, true, Duration::from_secs(1))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_value_timeout() {
        let backend = SimSignalBackend::new("SIM:Capture", true);
        let err = wait_for_value(&backend.signal(), false, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("SIM:Capture == false"));
    }

    #[tokio::test]
    async fn test_set_and_wait_for_value_returns_pending_status() {
        let backend = SimSignalBackend::new("SIM:Capture", false);
        backend.set_put_proceeds(false);

        let status = set_and_wait_for_value(&backend.signal(), true, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(backend.value());
        tokio::task::yield_now().await;
        assert!(!status.is_done());

        backend.set_put_proceeds(true);
        status.wait(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_observe_value_yields_current_then_updates() {
        let backend = SimSignalBackend::new("SIM:Count", 3_i64);
        let mut updates = observe_value(&backend.signal(), Duration::from_secs(1), 4).unwrap();

        assert_eq!(updates.next().await, Some(Ok(3)));
        backend.set_value(7);
        assert_eq!(updates.next().await, Some(Ok(7)));
    }

    #[tokio::test]
    async fn test_observe_value_keeps_back_to_back_updates() {
        let backend = SimSignalBackend::new("SIM:Count", 0_i64);
        let mut updates = observe_value(&backend.signal(), Duration::from_secs(1), 1).unwrap();

        backend.set_value(1);
        backend.set_value(1);
        backend.set_value(2);
        let seen: Vec<i64> = updates
            .by_ref()
            .take(4)
            .map(|v| v.unwrap())
            .collect()
            .await;
        assert_eq!(seen, vec![0, 1, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_observe_value_timeout_is_terminal() {
        let backend = SimSignalBackend::new("SIM:Count", 0_i64);
        let mut updates = observe_value(&backend.signal(), Duration::from_millis(20), 4).unwrap();

        assert_eq!(updates.next().await, Some(Ok(0)));
        assert!(matches!(
            updates.next().await,
            Some(Err(DaqError::Timeout { .. }))
        ));
        assert_eq!(updates.next().await, None);
    }

    #[tokio::test]
    async fn test_dropping_observer_stops_producer() {
        let backend = SimSignalBackend::new("SIM:Count", 0_i64);
        let mut updates = observe_value(&backend.signal(), Duration::from_secs(5), 1).unwrap();
        assert_eq!(updates.next().await, Some(Ok(0)));
        drop(updates);

        // Producer exits and releases its monitor
        tokio::time::timeout(Duration::from_secs(1), async {
            while !backend.monitors.lock().iter().all(|tx| tx.is_closed()) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }
}
