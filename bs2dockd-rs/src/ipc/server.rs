/* IPC server.
 *
 * A Unix-domain socket (the platform's named-pipe equivalent) carrying
 * newline-delimited JSON. Each accepted client gets one reader task
 * with a 30-second inactivity deadline and one event-forwarder task;
 * every write is bounded by a 2-second deadline so a stuck client can
 * never pin a shared worker. Other clients are unaffected when one is
 * dropped. */

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream, unix::OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::DockError;
use crate::ipc::{Event, Request, Response};
use crate::orchestrator::Orchestrator;

/* Stable, product-specific endpoint name. */
pub const SOCKET_NAME: &str = "BS2PRO-Controller-IPC";

/* Inactivity deadline on client reads. */
const READ_DEADLINE: Duration = Duration::from_secs(30);

/* Deadline on every write toward a client. */
const WRITE_DEADLINE: Duration = Duration::from_secs(2);

/* Socket is private to the local user. */
const SOCKET_MODE: u32 = 0o600;

pub fn socket_path() -> PathBuf {
    std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(SOCKET_NAME)
}

/* Bind the endpoint, clearing a stale socket from a crashed prior    */
/* instance. A connectable socket means another daemon is live.       */
pub async fn bind(path: &Path) -> Result<UnixListener> {
    if path.exists() {
        match UnixStream::connect(path).await {
            Ok(_) => bail!("another daemon instance is already serving {:?}", path),
            Err(_) => {
                debug!("Removing stale socket {:?}", path);
                let _ = tokio::fs::remove_file(path).await;
            }
        }
    }

    let listener = UnixListener::bind(path)
        .with_context(|| format!("Binding IPC socket {:?}", path))?;

    let perms = std::os::unix::fs::PermissionsExt::from_mode(SOCKET_MODE);
    std::fs::set_permissions(path, perms)
        .with_context(|| format!("Restricting permissions on {:?}", path))?;

    Ok(listener)
}

/* Accept loop. Runs for the life of the daemon. */
pub async fn run(orc: Arc<Orchestrator>, listener: UnixListener) {
    let mut client_id = 0u64;
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                client_id += 1;
                let orc = Arc::clone(&orc);
                tokio::spawn(async move {
                    handle_client(orc, stream, client_id).await;
                });
            }
            Err(e) => {
                warn!("IPC accept failed: {e}");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn handle_client(orc: Arc<Orchestrator>, stream: UnixStream, id: u64) {
    info!("IPC client {id} connected");

    /* Subscribe before announcing so this client sees its own        */
    /* service-connected event.                                       */
    let mut events = orc.subscribe();
    orc.broadcast(Event::ServiceConnected);

    let (read_half, write_half) = stream.into_split();
    let writer = Arc::new(Mutex::new(write_half));

    /* Event forwarder: one per client, so a slow client only stalls  */
    /* its own stream. A deadline miss drops the connection.          */
    let forwarder = {
        let writer = Arc::clone(&writer);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if let Err(e) = write_value(&writer, event.to_wire()).await {
                            warn!("Event delivery to client {id} failed: {e}");
                            /* Close the socket so the reader unblocks. */
                            let mut guard = writer.lock().await;
                            let _ = guard.shutdown().await;
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Client {id} lagged, {missed} event(s) dropped");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    };

    let mut reader = BufReader::new(read_half).lines();
    loop {
        match timeout(READ_DEADLINE, reader.next_line()).await {
            /* Inactivity deadline: tear the connection down. */
            Err(_elapsed) => {
                warn!("Client {id} inactive for {READ_DEADLINE:?}, disconnecting");
                break;
            }
            Ok(Ok(None)) => break,
            Ok(Err(e)) => {
                debug!("Client {id} read failed: {e}");
                break;
            }
            Ok(Ok(Some(line))) => {
                if line.trim().is_empty() {
                    continue;
                }
                let request: Request = match serde_json::from_str(&line) {
                    Ok(request) => request,
                    Err(e) => {
                        /* Bad line, connection stays open. */
                        warn!("{}", DockError::IpcDecodeFailed(e.to_string()));
                        continue;
                    }
                };

                let response = orc.handle_request(request).await;
                if let Err(e) = write_response(&writer, &response).await {
                    warn!("Response delivery to client {id} failed: {e}");
                    break;
                }
            }
        }
    }

    forwarder.abort();
    orc.broadcast(Event::ServiceDisconnected);
    info!("IPC client {id} disconnected");
}

async fn write_response(
    writer: &Arc<Mutex<OwnedWriteHalf>>,
    response: &Response,
) -> Result<(), DockError> {
    let value = serde_json::to_value(response)
        .map_err(|e| DockError::IpcDecodeFailed(e.to_string()))?;
    write_value(writer, value).await
}

/* One JSON object per line, bounded by the write deadline. */
async fn write_value(writer: &Arc<Mutex<OwnedWriteHalf>>, value: Value) -> Result<(), DockError> {
    let mut line = value.to_string();
    line.push('\n');

    let mut guard = writer.lock().await;
    match timeout(WRITE_DEADLINE, guard.write_all(line.as_bytes())).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => Err(DockError::IpcDecodeFailed(source.to_string())),
        Err(_elapsed) => Err(DockError::IpcClientStuck),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::config::testing::MemoryStore;
    use crate::device_io::DeviceIo;
    use crate::temperature::testing::ScriptedProvider;
    use tokio::io::AsyncWriteExt;

    fn orchestrator() -> Arc<Orchestrator> {
        let (device, _notify_rx) = DeviceIo::new();
        Orchestrator::new(
            device,
            Arc::new(ScriptedProvider::constant(50.0, 40.0)),
            Box::new(MemoryStore::new()),
            Config::default(),
            false,
        )
    }

    async fn start_server() -> (Arc<Orchestrator>, PathBuf, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(SOCKET_NAME);
        let orc = orchestrator();
        let listener = bind(&path).await.expect("bind");
        let server_orc = Arc::clone(&orc);
        tokio::spawn(async move {
            run(server_orc, listener).await;
        });
        (orc, path, dir)
    }

    async fn read_json_line<R: tokio::io::AsyncBufRead + Unpin>(reader: &mut R) -> Value {
        let mut line = String::new();
        reader.read_line(&mut line).await.expect("read line");
        serde_json::from_str(&line).expect("json line")
    }

    /* Read until a response arrives, skipping interleaved events. */
    async fn read_response<R: tokio::io::AsyncBufRead + Unpin>(reader: &mut R) -> Value {
        loop {
            let value = read_json_line(reader).await;
            if value.get("is-response").is_some() {
                return value;
            }
        }
    }

    #[tokio::test]
    async fn ping_round_trip() {
        let (_orc, path, _dir) = start_server().await;

        let stream = UnixStream::connect(&path).await.expect("connect");
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        write_half
            .write_all(b"{\"type\": \"Ping\"}\n")
            .await
            .expect("send");

        let response = read_response(&mut reader).await;
        assert_eq!(response["is-response"], Value::Bool(true));
        assert_eq!(response["success"], Value::Bool(true));
        assert_eq!(response["data"], Value::String("pong".to_string()));
    }

    #[tokio::test]
    async fn malformed_line_keeps_connection_open() {
        let (_orc, path, _dir) = start_server().await;

        let stream = UnixStream::connect(&path).await.expect("connect");
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        write_half.write_all(b"this is not json\n").await.expect("send");
        write_half
            .write_all(b"{\"type\": \"Ping\"}\n")
            .await
            .expect("send");

        /* The bad line was skipped; the next request still answers. */
        let response = read_response(&mut reader).await;
        assert_eq!(response["success"], Value::Bool(true));
    }

    #[tokio::test]
    async fn events_are_pushed_to_clients() {
        let (orc, path, _dir) = start_server().await;

        let stream = UnixStream::connect(&path).await.expect("connect");
        let (read_half, _write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        /* The connection announcement arrives first. */
        let value = read_json_line(&mut reader).await;
        assert_eq!(value["is-event"], Value::Bool(true));
        assert_eq!(value["type"], Value::String("service-connected".to_string()));

        orc.broadcast(Event::ShowWindow);
        let value = read_json_line(&mut reader).await;
        assert_eq!(value["type"], Value::String("show-window".to_string()));
    }

    #[tokio::test]
    async fn requests_and_events_interleave_with_tags() {
        let (orc, path, _dir) = start_server().await;

        let stream = UnixStream::connect(&path).await.expect("connect");
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        orc.broadcast(Event::DeviceDisconnected);
        write_half
            .write_all(b"{\"type\": \"GetConfig\"}\n")
            .await
            .expect("send");

        let response = read_response(&mut reader).await;
        assert_eq!(response["is-response"], Value::Bool(true));
        assert!(response["data"].get("auto-control").is_some());
    }

    #[tokio::test]
    async fn stale_socket_is_replaced() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(SOCKET_NAME);

        /* A dead socket file left behind by a crashed instance. */
        drop(UnixListener::bind(&path).expect("first bind"));
        assert!(path.exists());

        let _listener = bind(&path).await.expect("rebind over stale socket");
    }
}
