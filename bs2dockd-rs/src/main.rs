/* bs2dockd: userspace controller daemon for the BS2 / BS2 PRO
 * cooling docks.
 *
 * Owns the USB-HID device, drives fan speed from host temperatures,
 * sequences the lighting modes, and serves GUI clients over a local
 * socket speaking line-delimited JSON. */

mod config;
mod device;
mod device_io;
mod error;
mod fan_control;
mod hid;
mod ipc;
mod orchestrator;
mod protocol;
mod reconnect;
mod rgb;
mod temperature;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{ConfigStore, JsonConfigStore};
use crate::device_io::DeviceIo;
use crate::ipc::Event;
use crate::orchestrator::{Orchestrator, Shutdown};
use crate::temperature::{HwmonProvider, TemperatureProvider};

/* Flags are accepted in `-flag`, `--flag`, and `/flag` forms. */
fn flag_present(args: &[String], name: &str) -> bool {
    args.iter().any(|arg| {
        arg == &format!("--{name}") || arg == &format!("-{name}") || arg == &format!("/{name}")
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let debug = flag_present(&args, "debug");
    let autostart = flag_present(&args, "autostart");

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        "bs2dockd {}{} starting",
        env!("CARGO_PKG_VERSION"),
        if autostart { " (autostart launch)" } else { "" }
    );

    let store = JsonConfigStore::at_default_location();
    let config = store.load(autostart).await;

    let (device, notify_rx) = DeviceIo::new();
    let provider: Arc<dyn TemperatureProvider> = Arc::new(HwmonProvider::new());
    let orc = Orchestrator::new(device, provider, Box::new(store), config, autostart);
    orc.spawn_notification_pump(notify_rx);

    /* A missing dock at launch is a cold-start condition; the health  */
    /* check keeps probing for it.                                     */
    if let Err(e) = orc.connect().await {
        warn!("{e}; waiting for the dock to appear");
        orc.broadcast(Event::DeviceError {
            message: e.to_string(),
        });
    }

    reconnect::spawn_health_check(Arc::clone(&orc));

    /* Subscribe before the IPC server can take requests so an early  */
    /* lifecycle request cannot slip past the waiter.                 */
    let shutdown_rx = orc.shutdown_signal();

    let socket_path = ipc::server::socket_path();
    let listener = ipc::server::bind(&socket_path).await?;
    info!("IPC listening at {:?}", socket_path);
    {
        let orc = Arc::clone(&orc);
        tokio::spawn(async move {
            ipc::server::run(orc, listener).await;
        });
    }

    let shutdown = wait_for_shutdown(shutdown_rx).await?;

    orc.disconnect(true).await;
    let _ = tokio::fs::remove_file(&socket_path).await;

    if shutdown == Some(Shutdown::Restart) {
        let exe = std::env::current_exe().context("Locating own executable for restart")?;
        info!("Restarting {:?}", exe);
        std::process::Command::new(exe)
            .args(&args)
            .spawn()
            .context("Spawning replacement daemon")?;
    }

    info!("bs2dockd exiting");
    Ok(())
}

/* Block until a lifecycle request or a termination signal arrives. */
async fn wait_for_shutdown(
    mut shutdown_rx: tokio::sync::watch::Receiver<Option<Shutdown>>,
) -> Result<Option<Shutdown>> {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("Installing SIGTERM handler")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Waiting for SIGINT")?;
            info!("SIGINT received");
            Ok(Some(Shutdown::Stop))
        }
        _ = sigterm.recv() => {
            info!("SIGTERM received");
            Ok(Some(Shutdown::Stop))
        }
        changed = shutdown_rx.changed() => {
            changed.context("Shutdown channel closed")?;
            let kind = *shutdown_rx.borrow();
            Ok(kind)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_accept_all_prefix_forms() {
        let args = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert!(flag_present(&args(&["--debug"]), "debug"));
        assert!(flag_present(&args(&["-debug"]), "debug"));
        assert!(flag_present(&args(&["/debug"]), "debug"));
        assert!(flag_present(&args(&["-autostart", "--debug"]), "autostart"));
        assert!(!flag_present(&args(&["--debugx"]), "debug"));
        assert!(!flag_present(&args(&[]), "debug"));
    }
}
