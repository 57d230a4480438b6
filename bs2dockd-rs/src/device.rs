use std::fmt;

use serde::{Deserialize, Serialize};

/* USB identity of the two supported dock variants. */
pub const VENDOR_ID: u16 = 0x37D7;
pub const PRODUCT_ID_PRO: u16 = 0x1002;
pub const PRODUCT_ID_BASE: u16 = 0x1001;

/* Probe order: the PRO variant is tried first. */
pub const PROBE_ORDER: [u16; 2] = [PRODUCT_ID_PRO, PRODUCT_ID_BASE];

/* Which dock variant was opened. */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DockModel {
    Bs2,
    Bs2Pro,
}

impl DockModel {
    pub fn from_product_id(pid: u16) -> Option<Self> {
        match pid {
            PRODUCT_ID_BASE => Some(DockModel::Bs2),
            PRODUCT_ID_PRO => Some(DockModel::Bs2Pro),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DockModel::Bs2 => "BS2",
            DockModel::Bs2Pro => "BS2 PRO",
        }
    }
}

impl fmt::Display for DockModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/* Performance tiers exposed by the dock firmware. */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum GearLabel {
    Silent,
    Standard,
    Strong,
    Overclock,
}

impl GearLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            GearLabel::Silent => "Silent",
            GearLabel::Standard => "Standard",
            GearLabel::Strong => "Strong",
            GearLabel::Overclock => "Overclock",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Silent" => Some(GearLabel::Silent),
            "Standard" => Some(GearLabel::Standard),
            "Strong" => Some(GearLabel::Strong),
            "Overclock" => Some(GearLabel::Overclock),
            _ => None,
        }
    }

    /* The gear code the firmware uses on the wire (lower-nibble encoding). */
    pub fn code(&self) -> u8 {
        match self {
            GearLabel::Silent => 0x08,
            GearLabel::Standard => 0x0A,
            GearLabel::Strong => 0x0C,
            GearLabel::Overclock => 0x0E,
        }
    }
}

impl fmt::Display for GearLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/* Firmware work mode: the dock either follows host RPM commands */
/* (auto mode) or runs its own gear logic (gear mode).           */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkMode {
    #[serde(rename = "gear-mode")]
    GearMode,
    #[serde(rename = "auto-mode-realtime-rpm")]
    AutoModeRealtimeRpm,
}

impl WorkMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkMode::GearMode => "gear-mode",
            WorkMode::AutoModeRealtimeRpm => "auto-mode-realtime-rpm",
        }
    }
}

/* One decoded fan telemetry report.                                  */
/*                                                                    */
/* Raw codes travel alongside the derived labels so that unknown      */
/* firmware values are surfaced verbatim instead of being dropped.    */
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FanReport {
    pub status: u8,
    pub gear_raw: u8,
    pub max_gear: String,
    pub set_gear: String,
    pub mode_raw: u8,
    pub work_mode: String,
    pub current_rpm: u16,
    pub target_rpm: u16,
}

/* One row of the static gear catalog returned by `GetAvailableGears`. */
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GearInfo {
    pub gear: GearLabel,
    pub levels: u8,
}

/* The gear/level catalog the dock supports. Silent and Overclock are */
/* single-level tiers; Standard and Strong expose three sub-levels.   */
pub fn available_gears() -> Vec<GearInfo> {
    vec![
        GearInfo {
            gear: GearLabel::Silent,
            levels: 1,
        },
        GearInfo {
            gear: GearLabel::Standard,
            levels: 3,
        },
        GearInfo {
            gear: GearLabel::Strong,
            levels: 3,
        },
        GearInfo {
            gear: GearLabel::Overclock,
            levels: 1,
        },
    ]
}

/* Check a `(gear, level)` pair against the catalog. Levels are 1-based. */
pub fn gear_level_valid(gear: GearLabel, level: u8) -> bool {
    available_gears()
        .iter()
        .any(|g| g.gear == gear && level >= 1 && level <= g.levels)
}
