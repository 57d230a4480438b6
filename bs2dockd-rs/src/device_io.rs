/* Device I/O: exclusive owner of the dock handle.
 *
 * All raw reads and writes are serialized through one device-operation
 * mutex, distinct from the orchestrator's state lock. The read loop
 * holds the mutex only for the duration of a single 100 ms-bounded
 * read, so writers interleave freely between iterations.
 *
 * Inbound traffic splits two ways: length-framed non-telemetry packets
 * feed the bounded ACK queue (lighting acknowledgments), and telemetry
 * reports are decoded and published to the orchestrator. */

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::{debug, info, warn};

use crate::device::{DockModel, FanReport, GearLabel};
use crate::error::DockError;
use crate::hid::{DockHandle, find_dock};
use crate::protocol::{
    self, CMD_FAN_TELEMETRY, INPUT_REPORT_LEN, RawPacket, pad_to_report, parse_fan_report,
    scan_packets,
};

/* Consecutive non-timeout read errors before the handle is dropped. */
const READ_ERROR_THRESHOLD: u32 = 5;

/* Yield between read-loop iterations to cap CPU cost. */
const READ_LOOP_YIELD: Duration = Duration::from_millis(100);

/* ACK queue capacity. The producer drops on overflow rather than    */
/* stalling the read loop.                                           */
const ACK_QUEUE_CAPACITY: usize = 32;

/* Notifications published to the orchestrator. */
#[derive(Debug)]
pub enum DeviceNotification {
    FanReport(FanReport),
    Disconnected,
}

pub struct DeviceIo {
    /* The device-operation mutex. Never taken while the state lock  */
    /* is held.                                                      */
    handle: Mutex<Option<DockHandle>>,
    last_report: RwLock<Option<FanReport>>,
    ack_tx: mpsc::Sender<RawPacket>,
    ack_rx: Mutex<mpsc::Receiver<RawPacket>>,
    notify_tx: mpsc::Sender<DeviceNotification>,
    /* Bumped on every connect/disconnect; a read loop exits once the */
    /* generation it was spawned under goes stale.                    */
    read_generation: AtomicU64,
}

impl DeviceIo {
    pub fn new() -> (Arc<Self>, mpsc::Receiver<DeviceNotification>) {
        let (ack_tx, ack_rx) = mpsc::channel(ACK_QUEUE_CAPACITY);
        let (notify_tx, notify_rx) = mpsc::channel(32);
        let io = Arc::new(Self {
            handle: Mutex::new(None),
            last_report: RwLock::new(None),
            ack_tx,
            ack_rx: Mutex::new(ack_rx),
            notify_tx,
            read_generation: AtomicU64::new(0),
        });
        (io, notify_rx)
    }

    /* Probe the two product ids in order and open the first match.   */
    /* Idempotent: an already-open handle is returned as-is.          */
    pub async fn connect(self: &Arc<Self>) -> Result<DockModel, DockError> {
        let mut guard = self.handle.lock().await;
        if let Some(handle) = guard.as_ref() {
            return Ok(handle.model);
        }

        let Some((path, model)) = find_dock().map_err(|e| {
            warn!("udev enumeration failed: {e:#}");
            DockError::DeviceOpenFailed
        })?
        else {
            return Err(DockError::DeviceOpenFailed);
        };

        let handle = DockHandle::open(&path, model).await?;
        info!("Connected to {} at {:?}", model, handle.path());
        *guard = Some(handle);
        drop(guard);

        let generation = self.read_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let io = Arc::clone(self);
        tokio::spawn(async move {
            io.read_loop(generation).await;
        });

        Ok(model)
    }

    /* Close the handle and let the read loop wind down. Idempotent. */
    pub async fn disconnect(&self) -> bool {
        self.read_generation.fetch_add(1, Ordering::SeqCst);
        let was_open = self.handle.lock().await.take().is_some();
        if was_open {
            info!("Device handle closed");
        }
        was_open
    }

    pub async fn last_report(&self) -> Option<FanReport> {
        self.last_report.read().await.clone()
    }

    /* ------------------------------------------------------------------ */
    /* Writes                                                             */
    /* ------------------------------------------------------------------ */

    /* Pad a framed packet to the fixed report size and write it. */
    pub async fn write_packet(&self, packet: &[u8]) -> Result<(), DockError> {
        let report = pad_to_report(packet);
        let mut guard = self.handle.lock().await;
        match guard.as_mut() {
            Some(handle) => handle.write_report(&report).await,
            None => Err(DockError::write_not_connected()),
        }
    }

    /* Write, then watch the ACK queue on a detached task. The caller */
    /* returns as soon as the write is dispatched; ACK timeouts are   */
    /* logged, never propagated.                                      */
    pub async fn write_packet_with_ack(
        self: &Arc<Self>,
        packet: &[u8],
        timeout: Duration,
    ) -> Result<(), DockError> {
        let cmd = packet.get(2).copied().unwrap_or(0);
        self.write_packet(packet).await?;

        let io = Arc::clone(self);
        tokio::spawn(async move {
            io.await_ack(cmd, timeout).await;
        });
        Ok(())
    }

    async fn await_ack(&self, cmd: u8, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut rx = self.ack_rx.lock().await;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                warn!(
                    "{}",
                    DockError::AckTimeout {
                        timeout_ms: timeout.as_millis() as u64
                    }
                );
                return;
            }
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some(packet)) => {
                    /* Any success-flagged ACK satisfies the watcher; the */
                    /* command id is recorded for diagnosis only.         */
                    if packet.ack_success() {
                        debug!("ACK for command {cmd:#04x} (packet cmd {:#04x})", packet.cmd);
                        return;
                    }
                }
                Ok(None) => return,
                Err(_elapsed) => {
                    warn!(
                        "{}",
                        DockError::AckTimeout {
                            timeout_ms: timeout.as_millis() as u64
                        }
                    );
                    return;
                }
            }
        }
    }

    /* Convenience wrappers over the codec. */

    pub async fn send_enter_auto(&self) -> Result<(), DockError> {
        self.write_packet(&protocol::enter_auto_packet()).await
    }

    pub async fn send_rpm(&self, rpm: u16) -> Result<(), DockError> {
        self.write_packet(&protocol::set_rpm_packet(rpm)).await
    }

    pub async fn send_gear_light(&self, on: bool) -> Result<(), DockError> {
        self.write_packet(&protocol::gear_light_packet(on)).await
    }

    pub async fn send_power_on_start(&self, on: bool) -> Result<(), DockError> {
        self.write_packet(&protocol::power_on_start_packet(on)).await
    }

    pub async fn send_smart_start_stop(&self, code: u8) -> Result<(), DockError> {
        self.write_packet(&protocol::smart_start_stop_packet(code))
            .await
    }

    pub async fn send_brightness(&self, level: u8) -> Result<(), DockError> {
        self.write_packet(&protocol::brightness_packet(level)).await
    }

    pub async fn send_manual_gear(&self, gear: GearLabel, level: u8) -> Result<(), DockError> {
        let Some(packet) = protocol::manual_gear_packet(gear, level) else {
            return Err(DockError::DeviceWriteFailed {
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "gear/level outside the catalog",
                ),
            });
        };
        self.write_packet(&packet).await
    }

    /* ------------------------------------------------------------------ */
    /* Read loop                                                          */
    /* ------------------------------------------------------------------ */

    async fn read_loop(self: Arc<Self>, generation: u64) {
        debug!("Read loop started (generation {generation})");
        let mut consecutive_errors = 0u32;
        let mut buf = [0u8; INPUT_REPORT_LEN];

        loop {
            if self.read_generation.load(Ordering::SeqCst) != generation {
                break;
            }

            /* One bounded read under the device-op mutex. */
            let outcome = {
                let mut guard = self.handle.lock().await;
                match guard.as_mut() {
                    Some(handle) => handle.read_report(&mut buf).await,
                    None => break,
                }
            };

            match outcome {
                /* Timeout: the idle case. Resets the error streak. */
                Ok(None) => consecutive_errors = 0,
                Ok(Some(n)) => {
                    consecutive_errors = 0;
                    if n > 0 {
                        self.dispatch_inbound(&buf[..n]).await;
                    }
                }
                Err(e) => {
                    consecutive_errors += 1;
                    warn!(
                        "Device read error ({consecutive_errors}/{READ_ERROR_THRESHOLD}): {e}"
                    );
                    if consecutive_errors >= READ_ERROR_THRESHOLD {
                        self.handle.lock().await.take();
                        let _ = self.notify_tx.send(DeviceNotification::Disconnected).await;
                        break;
                    }
                }
            }

            tokio::time::sleep(READ_LOOP_YIELD).await;
        }

        debug!("Read loop exited (generation {generation})");
    }

    async fn dispatch_inbound(&self, buf: &[u8]) {
        for packet in scan_packets(buf) {
            if packet.cmd != CMD_FAN_TELEMETRY {
                /* Queue is bounded; drop rather than stall the loop. */
                if self.ack_tx.try_send(packet).is_err() {
                    debug!("ACK queue full, packet dropped");
                }
            }
        }

        if let Some(report) = parse_fan_report(buf) {
            *self.last_report.write().await = Some(report.clone());
            let _ = self
                .notify_tx
                .send(DeviceNotification::FanReport(report))
                .await;
        }
    }
}
