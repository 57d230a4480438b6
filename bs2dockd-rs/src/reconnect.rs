/* Reconnect supervision.
 *
 * A spontaneous disconnect spawns one supervisor task walking the
 * bounded backoff schedule: `Idle -> Backoff(i) -> Connecting ->
 * (Idle | Backoff(i+1))`. After the last failed attempt the
 * responsibility moves to the periodic health check, which also
 * covers the cold-start case where no dock was present at launch.
 * User-initiated disconnects suppress both paths. */

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::orchestrator::Orchestrator;

/* Bounded backoff schedule. */
const BACKOFF: [Duration; 4] = [
    Duration::from_secs(2),
    Duration::from_secs(5),
    Duration::from_secs(10),
    Duration::from_secs(30),
];

pub const HEALTH_CHECK_PERIOD: Duration = Duration::from_secs(30);

/* One supervisor per spontaneous disconnect. */
pub fn spawn_supervisor(orc: Arc<Orchestrator>) -> JoinHandle<()> {
    tokio::spawn(async move {
        for (index, delay) in BACKOFF.iter().enumerate() {
            tokio::time::sleep(*delay).await;

            /* Another path may have reconnected in the meantime, and  */
            /* the user may have asked for the device to stay closed.  */
            if orc.is_connected().await {
                debug!("Reconnect supervisor: already connected, standing down");
                return;
            }
            if !orc.reconnect_allowed().await {
                debug!("Reconnect supervisor: disconnect was user-initiated, standing down");
                return;
            }

            info!(
                "Reconnect attempt {}/{} after {:?}",
                index + 1,
                BACKOFF.len(),
                delay
            );
            if orc.reconnect_attempt().await {
                return;
            }
        }

        warn!("Reconnect backoff exhausted, periodic health check takes over");
    })
}

/* Daemon-lifetime tick that retries whenever the dock is absent. */
pub fn spawn_health_check(orc: Arc<Orchestrator>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(HEALTH_CHECK_PERIOD);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        /* The first tick fires immediately; skip it. */
        tick.tick().await;

        loop {
            tick.tick().await;
            if orc.is_connected().await || !orc.reconnect_allowed().await {
                continue;
            }
            debug!("Health check: probing for the dock");
            let _ = orc.reconnect_attempt().await;
        }
    })
}
