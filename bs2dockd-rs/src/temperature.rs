/* Host temperature acquisition.
 *
 * The daemon consumes temperatures through an opaque provider
 * capability; the default implementation reads Linux hwmon. Providers
 * are expected to fail gracefully: a sample always comes back, with
 * `provider_ok = false` and a human-readable message when the source
 * is unavailable. */

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/* One temperature sample. `max` drives the fan curve. */
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TempSample {
    pub cpu: f64,
    pub gpu: f64,
    pub max: f64,
    pub timestamp: u64,
    pub provider_ok: bool,
    pub provider_message: String,
}

impl TempSample {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            cpu: 0.0,
            gpu: 0.0,
            max: 0.0,
            timestamp: unix_now(),
            provider_ok: false,
            provider_message: message.into(),
        }
    }
}

/* Provider health as reported to diagnostics requests. */
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProviderStatus {
    pub available: bool,
    pub detail: String,
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/* The provider capability consumed by the orchestrator. */
#[async_trait]
pub trait TemperatureProvider: Send + Sync {
    /* Acquire one sample. Must not fail: unavailable sources are    */
    /* reported through the sample's `provider_ok` flag.             */
    async fn read(&self) -> TempSample;

    /* Describe the provider's health for diagnostics requests. */
    async fn status(&self) -> ProviderStatus;
}

/* hwmon chip names treated as CPU package sensors. */
const CPU_CHIP_NAMES: [&str; 4] = ["k10temp", "coretemp", "zenpower", "cpu_thermal"];

/* hwmon chip names treated as GPU sensors. */
const GPU_CHIP_NAMES: [&str; 2] = ["amdgpu", "nouveau"];

/* Default provider: scans `/sys/class/hwmon` once, re-scans when a  */
/* cached sensor disappears (driver reload, suspend/resume).         */
pub struct HwmonProvider {
    sensors: RwLock<Option<Sensors>>,
}

#[derive(Debug, Clone, Default)]
struct Sensors {
    cpu: Option<PathBuf>,
    gpu: Option<PathBuf>,
}

impl HwmonProvider {
    pub fn new() -> Self {
        Self {
            sensors: RwLock::new(None),
        }
    }

    /* Walk the hwmon class and pick one temp input per role. */
    fn discover() -> Sensors {
        let mut sensors = Sensors::default();

        let Ok(entries) = std::fs::read_dir("/sys/class/hwmon") else {
            return sensors;
        };

        for entry in entries.flatten() {
            let dir = entry.path();
            let Ok(name) = std::fs::read_to_string(dir.join("name")) else {
                continue;
            };
            let name = name.trim();
            let input = dir.join("temp1_input");
            if !input.exists() {
                continue;
            }

            if sensors.cpu.is_none() && CPU_CHIP_NAMES.contains(&name) {
                debug!("CPU temperature source: {} ({:?})", name, input);
                sensors.cpu = Some(input);
            } else if sensors.gpu.is_none() && GPU_CHIP_NAMES.contains(&name) {
                debug!("GPU temperature source: {} ({:?})", name, input);
                sensors.gpu = Some(input);
            }
        }

        sensors
    }

    fn read_millidegrees(path: &PathBuf) -> Option<f64> {
        let raw = std::fs::read_to_string(path).ok()?;
        let value: f64 = raw.trim().parse().ok()?;
        Some(value / 1000.0)
    }
}

impl Default for HwmonProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TemperatureProvider for HwmonProvider {
    async fn read(&self) -> TempSample {
        {
            let cached = self.sensors.read().await;
            if cached.is_none() {
                drop(cached);
                *self.sensors.write().await = Some(Self::discover());
            }
        }

        let sensors = {
            let guard = self.sensors.read().await;
            (*guard).clone().unwrap_or_default()
        };

        let cpu = sensors.cpu.as_ref().and_then(Self::read_millidegrees);
        let gpu = sensors.gpu.as_ref().and_then(Self::read_millidegrees);

        /* A cached sensor that stopped reading forces a fresh scan    */
        /* next time around.                                           */
        if sensors.cpu.is_some() && cpu.is_none() {
            warn!("CPU temperature source vanished, re-scanning hwmon");
            *self.sensors.write().await = None;
        }

        if cpu.is_none() && gpu.is_none() {
            return TempSample::failed("no hwmon temperature source available");
        }

        let cpu = cpu.unwrap_or(0.0);
        let gpu = gpu.unwrap_or(0.0);
        TempSample {
            cpu,
            gpu,
            max: cpu.max(gpu),
            timestamp: unix_now(),
            provider_ok: true,
            provider_message: String::new(),
        }
    }

    async fn status(&self) -> ProviderStatus {
        let sample = self.read().await;
        if sample.provider_ok {
            ProviderStatus {
                available: true,
                detail: format!("hwmon OK (cpu {:.1}°C, gpu {:.1}°C)", sample.cpu, sample.gpu),
            }
        } else {
            ProviderStatus {
                available: false,
                detail: sample.provider_message,
            }
        }
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    /* Scripted provider used by orchestrator and loop tests. */
    pub struct ScriptedProvider {
        samples: Mutex<Vec<TempSample>>,
    }

    impl ScriptedProvider {
        pub fn new(mut samples: Vec<TempSample>) -> Self {
            samples.reverse();
            Self {
                samples: Mutex::new(samples),
            }
        }

        pub fn constant(cpu: f64, gpu: f64) -> Self {
            Self::new(vec![TempSample {
                cpu,
                gpu,
                max: cpu.max(gpu),
                timestamp: unix_now(),
                provider_ok: true,
                provider_message: String::new(),
            }])
        }
    }

    #[async_trait]
    impl TemperatureProvider for ScriptedProvider {
        async fn read(&self) -> TempSample {
            let mut samples = self.samples.lock().expect("scripted provider lock");
            match samples.len() {
                0 => TempSample::failed("script exhausted"),
                1 => samples[0].clone(),
                _ => samples.pop().expect("non-empty"),
            }
        }

        async fn status(&self) -> ProviderStatus {
            ProviderStatus {
                available: true,
                detail: "scripted".to_string(),
            }
        }
    }
}
