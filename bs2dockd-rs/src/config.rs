/* Daemon configuration: the single source of desired behavior.
 *
 * Persisted as one JSON document in the per-user config directory.
 * The store does atomic replacement (write-then-rename); save
 * failures are non-fatal and the in-memory state stays authoritative. */

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::device::{GearLabel, gear_level_valid};
use crate::error::DockError;
use crate::fan_control::{CurvePoint, RPM_MAX, RPM_MIN, curve_valid};
use crate::rgb::RgbSettings;

/* Load-driven start/stop policy of the dock itself. */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmartStartStop {
    Off,
    Immediate,
    Delayed,
}

impl SmartStartStop {
    pub fn code(&self) -> u8 {
        match self {
            SmartStartStop::Off => 0x00,
            SmartStartStop::Immediate => 0x01,
            SmartStartStop::Delayed => 0x02,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    pub auto_control: bool,
    pub custom_speed_enabled: bool,
    pub custom_speed_rpm: u16,
    pub fan_curve: Vec<CurvePoint>,
    pub manual_gear: GearLabel,
    pub manual_level: u8,
    pub gear_light: bool,
    pub power_on_start: bool,
    pub smart_start_stop: SmartStartStop,
    pub brightness: u8,
    pub temp_update_rate: u64,
    pub temp_sample_count: usize,
    pub ignore_device_on_reconnect: bool,
    pub rgb_config: RgbSettings,
    pub debug_mode: bool,
    pub gui_monitoring: bool,
}

pub fn default_curve() -> Vec<CurvePoint> {
    vec![
        CurvePoint { temp: 40, rpm: 1500 },
        CurvePoint { temp: 50, rpm: 2000 },
        CurvePoint { temp: 60, rpm: 2500 },
        CurvePoint { temp: 70, rpm: 3000 },
        CurvePoint { temp: 80, rpm: 3500 },
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auto_control: false,
            custom_speed_enabled: false,
            custom_speed_rpm: 2000,
            fan_curve: default_curve(),
            manual_gear: GearLabel::Standard,
            manual_level: 1,
            gear_light: true,
            power_on_start: false,
            smart_start_stop: SmartStartStop::Off,
            brightness: 100,
            temp_update_rate: 2,
            temp_sample_count: 3,
            ignore_device_on_reconnect: true,
            rgb_config: RgbSettings::default(),
            debug_mode: false,
            gui_monitoring: false,
        }
    }
}

impl Config {
    /* Coerce out-of-range values into the supported envelope. Applied */
    /* on load and on every client-supplied replacement.               */
    pub fn normalize(&mut self) {
        self.temp_update_rate = self.temp_update_rate.max(1);
        self.temp_sample_count = self.temp_sample_count.max(1);

        /* The wire encoding is two-state. */
        if self.brightness != 0 {
            self.brightness = 100;
        }

        self.custom_speed_rpm = self.custom_speed_rpm.clamp(RPM_MIN as u16, RPM_MAX as u16);

        if !curve_valid(&self.fan_curve) {
            warn!("Persisted fan curve invalid, reverting to default");
            self.fan_curve = default_curve();
        }

        if !gear_level_valid(self.manual_gear, self.manual_level) {
            warn!(
                "Manual gear {}/{} outside the catalog, reverting to Standard/1",
                self.manual_gear, self.manual_level
            );
            self.manual_gear = GearLabel::Standard;
            self.manual_level = 1;
        }
    }

    /* Structural checks that reject a replacement outright. */
    pub fn check_mode_exclusion(&self) -> Result<(), DockError> {
        if self.auto_control && self.custom_speed_enabled {
            return Err(DockError::ModeConflict);
        }
        Ok(())
    }
}

/* Persistence seam. The daemon never touches the filesystem for     */
/* configuration except through this trait.                          */
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn load(&self, is_autostart_launch: bool) -> Config;
    async fn save(&self, config: &Config) -> Result<(), DockError>;
    fn describe(&self) -> String;
}

/* JSON-file store in the per-user config directory. */
pub struct JsonConfigStore {
    path: PathBuf,
}

impl JsonConfigStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn at_default_location() -> Self {
        Self::new(default_config_path())
    }
}

pub fn default_config_path() -> PathBuf {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("bs2dock").join("config.json")
}

#[async_trait]
impl ConfigStore for JsonConfigStore {
    async fn load(&self, is_autostart_launch: bool) -> Config {
        debug!(
            "Loading configuration from {:?} (autostart launch: {})",
            self.path, is_autostart_launch
        );

        let mut config = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => match serde_json::from_str::<Config>(&raw) {
                Ok(config) => config,
                Err(e) => {
                    warn!("Configuration at {:?} is malformed ({e}), using defaults", self.path);
                    Config::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No configuration at {:?}, using defaults", self.path);
                Config::default()
            }
            Err(e) => {
                warn!("Reading {:?} failed ({e}), using defaults", self.path);
                Config::default()
            }
        };

        config.normalize();
        config
    }

    async fn save(&self, config: &Config) -> Result<(), DockError> {
        let raw = serde_json::to_string_pretty(config)
            .map_err(|e| DockError::ConfigSaveFailed(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DockError::ConfigSaveFailed(e.to_string()))?;
        }

        /* Atomic replacement: same-directory temp file, then rename. */
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, raw.as_bytes())
            .await
            .map_err(|e| DockError::ConfigSaveFailed(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| DockError::ConfigSaveFailed(e.to_string()))?;

        debug!("Configuration saved to {:?}", self.path);
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
