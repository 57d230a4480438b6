/* bs2dockctl IPC client: line-delimited JSON over the daemon's local socket,
 * demultiplexing tagged responses from server-pushed events. */
//! Low-level IPC client for the `bs2dockd` daemon.
//!
//! All communication with the daemon goes through this module. One
//! request is outstanding at a time (the writer mutex is held across
//! the request/response pair); a single read loop splits responses
//! from events. Reconnecting bumps a generation counter so a replaced
//! read loop exits silently instead of delivering stale messages.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixStream, unix::OwnedReadHalf, unix::OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc};
use tokio::time::timeout;

/// Must match the daemon's endpoint name.
pub const SOCKET_NAME: &str = "BS2PRO-Controller-IPC";

/// Client-side deadline on a response.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Callback invoked for every server-pushed event.
pub type EventHandler = Box<dyn Fn(Value) + Send + Sync>;

pub fn socket_path() -> PathBuf {
    std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(SOCKET_NAME)
}

struct Inner {
    writer: Mutex<Option<OwnedWriteHalf>>,
    /// One-slot response channel; a stale occupant is dropped, never awaited.
    response_tx: mpsc::Sender<Value>,
    response_rx: Mutex<mpsc::Receiver<Value>>,
    /// Bumped on every (re)connect; read loops carry the value they
    /// were spawned under and exit once it goes stale.
    generation: AtomicU64,
    event_handler: std::sync::Mutex<Option<EventHandler>>,
}

/// A client connection to the `bs2dockd` daemon.
pub struct DockClient {
    inner: Arc<Inner>,
}

impl DockClient {
    pub fn new() -> Self {
        let (response_tx, response_rx) = mpsc::channel(1);
        Self {
            inner: Arc::new(Inner {
                writer: Mutex::new(None),
                response_tx,
                response_rx: Mutex::new(response_rx),
                generation: AtomicU64::new(0),
                event_handler: std::sync::Mutex::new(None),
            }),
        }
    }

    /// Install the callback for server-pushed events. Replaces any
    /// previous handler.
    pub fn set_event_handler(&self, handler: EventHandler) {
        let mut guard = self
            .inner
            .event_handler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Some(handler);
    }

    /// Connect (or reconnect) to the daemon socket. A previous read
    /// loop, if any, is retired by the generation bump.
    pub async fn connect(&self) -> Result<()> {
        let path = socket_path();
        let stream = UnixStream::connect(&path)
            .await
            .with_context(|| format!("Cannot reach bs2dockd at {path:?} (is the daemon running?)"))?;
        let (read_half, write_half) = stream.into_split();

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.inner.writer.lock().await = Some(write_half);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            read_loop(inner, read_half, generation).await;
        });
        Ok(())
    }

    /// Issue one request and wait for its tagged response. The writer
    /// mutex serializes callers, so responses pair with requests in
    /// order.
    pub async fn call(&self, request_type: &str, data: Option<Value>) -> Result<Value> {
        let mut request = json!({ "type": request_type });
        if let Some(data) = data {
            request["data"] = data;
        }

        let mut writer_guard = self.inner.writer.lock().await;
        let writer = writer_guard
            .as_mut()
            .ok_or_else(|| anyhow!("not connected"))?;

        /* Drop any stale response left by a timed-out predecessor. */
        {
            let mut rx = self.inner.response_rx.lock().await;
            while rx.try_recv().is_ok() {}
        }

        let mut line = request.to_string();
        line.push('\n');
        writer
            .write_all(line.as_bytes())
            .await
            .context("Request write failed")?;

        let mut rx = self.inner.response_rx.lock().await;
        let response = match timeout(RESPONSE_TIMEOUT, rx.recv()).await {
            Ok(Some(response)) => response,
            Ok(None) => bail!("connection closed while waiting for a response"),
            Err(_elapsed) => bail!("daemon did not respond within {RESPONSE_TIMEOUT:?}"),
        };

        if response["success"].as_bool() == Some(true) {
            Ok(response.get("data").cloned().unwrap_or(Value::Null))
        } else {
            let message = response["error"].as_str().unwrap_or("unknown daemon error");
            bail!("{request_type} failed: {message}")
        }
    }
}

impl Default for DockClient {
    fn default() -> Self {
        Self::new()
    }
}

async fn read_loop(inner: Arc<Inner>, read_half: OwnedReadHalf, generation: u64) {
    let mut lines = BufReader::new(read_half).lines();

    loop {
        if inner.generation.load(Ordering::SeqCst) != generation {
            /* Superseded by a reconnect: exit silently. */
            return;
        }

        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => return,
        };

        /* Re-check after the blocking read so nothing received on a  */
        /* replaced socket reaches the caller or the event handler.   */
        if inner.generation.load(Ordering::SeqCst) != generation {
            return;
        }

        let Ok(value) = serde_json::from_str::<Value>(&line) else {
            continue;
        };

        if value.get("is-response").and_then(Value::as_bool) == Some(true) {
            /* One-slot channel: drop if a response is already parked. */
            let _ = inner.response_tx.try_send(value);
        } else if value.get("is-event").and_then(Value::as_bool) == Some(true) {
            let guard = inner
                .event_handler
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(handler) = guard.as_ref() {
                handler(value);
            }
        }
    }
}
