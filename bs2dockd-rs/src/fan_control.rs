/* Temperature-driven fan control.
 *
 * The curve maps host temperature to a target RPM; the temperature
 * loop samples the provider on a fixed cadence, keeps a sliding
 * window of recent maxima, and drives the dock while auto-control is
 * enabled. */

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::orchestrator::Orchestrator;

/* RPM bounds accepted by the firmware. */
pub const RPM_MIN: u32 = 1000;
pub const RPM_MAX: u32 = 4000;

/* One point of the fan curve. Temperatures are strictly increasing */
/* across a valid curve.                                            */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub temp: i32,
    pub rpm: u32,
}

/* A curve is usable when it has at least two strictly-increasing points. */
pub fn curve_valid(points: &[CurvePoint]) -> bool {
    !points.is_empty() && points.windows(2).all(|w| w[0].temp < w[1].temp)
}

/* Map a temperature onto the curve.
 *
 * Outside the endpoints the endpoint RPM applies verbatim. Between
 * points the RPM is linearly interpolated, rounded to the nearest
 * multiple of 100 (ties to even), and clamped to `[1000, 4000]`.
 * Curves with fewer than two points yield 0, meaning "no action". */
pub fn calculate_target_rpm(temp: i32, curve: &[CurvePoint]) -> u32 {
    if curve.len() < 2 {
        return 0;
    }

    let first = curve[0];
    let last = curve[curve.len() - 1];
    if temp <= first.temp {
        return first.rpm;
    }
    if temp >= last.temp {
        return last.rpm;
    }

    for pair in curve.windows(2) {
        let (lo, hi) = (pair[0], pair[1]);
        if temp < hi.temp {
            let span = f64::from(hi.temp - lo.temp);
            let rise = f64::from(hi.rpm as i32 - lo.rpm as i32);
            let rpm = f64::from(lo.rpm) + f64::from(temp - lo.temp) * rise / span;
            let snapped = ((rpm / 100.0).round_ties_even() * 100.0) as u32;
            return snapped.clamp(RPM_MIN, RPM_MAX);
        }
    }

    /* Unreachable with a valid curve: temp < last.temp guarantees a */
    /* bracketing segment.                                            */
    last.rpm
}

/* The temperature worker.
 *
 * Runs while auto-control is enabled. Each tick samples the provider
 * and publishes a `temperature-update`; while a usable maximum is
 * available it feeds the sliding window and commands the dock. Stops
 * when the watch signal flips. Provider failures are logged and the
 * loop keeps running. */
pub async fn run_temperature_loop(orc: Arc<Orchestrator>, mut stop: watch::Receiver<bool>) {
    info!("Temperature loop started");

    /* The dock only honors host RPM commands in auto mode. */
    if let Err(e) = orc.device_enter_auto().await {
        warn!("Entering auto mode failed: {e}");
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut ring: VecDeque<i32> = VecDeque::new();
    let mut ring_capacity = 0usize;

    loop {
        if *stop.borrow() {
            break;
        }

        let params = orc.fan_loop_params().await;

        if params.sample_count != ring_capacity {
            ring.clear();
            ring_capacity = params.sample_count;
        }

        let sample = orc.sample_temperature().await;

        if params.auto_control && sample.max > 0.0 {
            ring.push_back(sample.max.round() as i32);
            while ring.len() > ring_capacity {
                ring.pop_front();
            }

            let avg = ring.iter().sum::<i32>() / ring.len() as i32;
            let target = calculate_target_rpm(avg, &params.curve);
            debug!(
                "avg {}°C over {} sample(s) -> target {} RPM",
                avg,
                ring.len(),
                target
            );
            if target != 0 {
                if let Err(e) = orc.device_set_rpm(target as u16).await {
                    warn!("Fan speed write failed: {e}");
                }
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(params.interval) => {}
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
        }
    }

    info!("Temperature loop stopped");
}

/* Per-tick parameters snapshotted from the configuration. */
#[derive(Debug, Clone)]
pub struct FanLoopParams {
    pub interval: Duration,
    pub sample_count: usize,
    pub auto_control: bool,
    pub curve: Vec<CurvePoint>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn curve() -> Vec<CurvePoint> {
        vec![
            CurvePoint { temp: 40, rpm: 1500 },
            CurvePoint { temp: 60, rpm: 2500 },
            CurvePoint { temp: 80, rpm: 3500 },
        ]
    }

    #[test]
    fn endpoints_clamp_to_endpoint_rpm() {
        let c = curve();
        assert_eq!(calculate_target_rpm(30, &c), 1500);
        assert_eq!(calculate_target_rpm(40, &c), 1500);
        assert_eq!(calculate_target_rpm(80, &c), 3500);
        assert_eq!(calculate_target_rpm(100, &c), 3500);
    }

    #[test]
    fn interpolation_between_points() {
        let c = curve();
        assert_eq!(calculate_target_rpm(50, &c), 2000);
        assert_eq!(calculate_target_rpm(70, &c), 3000);
    }

    #[test]
    fn interpolation_rounds_ties_to_even() {
        let c = curve();
        /* 55°C interpolates to 2250: ties round to the even hundred. */
        assert_eq!(calculate_target_rpm(55, &c), 2200);
        /* 57°C interpolates to 2350: the even neighbor is 2400. */
        assert_eq!(calculate_target_rpm(57, &c), 2400);
    }

    #[test]
    fn short_curves_yield_no_action() {
        assert_eq!(calculate_target_rpm(50, &[]), 0);
        assert_eq!(
            calculate_target_rpm(50, &[CurvePoint { temp: 40, rpm: 2000 }]),
            0
        );
    }

    #[test]
    fn results_are_snapped_and_bounded() {
        let c = vec![
            CurvePoint { temp: 0, rpm: 1000 },
            CurvePoint { temp: 100, rpm: 4000 },
        ];
        for t in -20..130 {
            let rpm = calculate_target_rpm(t, &c);
            assert_eq!(rpm % 100, 0, "rpm {rpm} at {t}°C is not a multiple of 100");
            assert!((RPM_MIN..=RPM_MAX).contains(&rpm));
        }
    }

    #[test]
    fn steep_segments_clamp_into_range() {
        let c = vec![
            CurvePoint { temp: 10, rpm: 1000 },
            CurvePoint { temp: 90, rpm: 4000 },
            CurvePoint { temp: 91, rpm: 4000 },
        ];
        assert_eq!(calculate_target_rpm(90, &c), 4000);
        assert_eq!(calculate_target_rpm(95, &c), 4000);
    }

    #[test]
    fn curve_validation() {
        assert!(curve_valid(&curve()));
        assert!(!curve_valid(&[]));
        assert!(curve_valid(&[CurvePoint { temp: 40, rpm: 1500 }]));
        assert!(!curve_valid(&[
            CurvePoint { temp: 40, rpm: 1500 },
            CurvePoint { temp: 40, rpm: 2000 },
        ]));
        assert!(!curve_valid(&[
            CurvePoint { temp: 60, rpm: 1500 },
            CurvePoint { temp: 40, rpm: 2000 },
        ]));
    }
}
