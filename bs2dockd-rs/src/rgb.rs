/* Lighting sequencer.
 *
 * Every uploadable mode goes through the same firmware dance: a begin
 * packet, a fixed handshake, an "F0" header describing mode/speed/
 * brightness/primary color, thirty 10-byte payload frames covering the
 * 300-byte LED plane, and a commit. `smart` and `off` are short
 * sequences with no frame upload. */

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::device_io::DeviceIo;
use crate::error::DockError;
use crate::protocol::{
    CMD_RGB_ARM, CMD_RGB_BEGIN, CMD_RGB_COMMIT, CMD_RGB_FRAME, CMD_RGB_PREP, CMD_RGB_SMART,
    build_packet,
};

/* The dock's LED ring. */
pub const LED_COUNT: usize = 100;
pub const FRAME_COUNT: usize = 30;
pub const FRAME_LEN: usize = 10;
const PLANE_LEN: usize = FRAME_COUNT * FRAME_LEN;

const STAGE_DELAY: Duration = Duration::from_millis(100);
const HANDSHAKE_GAP: Duration = Duration::from_millis(5);
const FRAME_GAP: Duration = Duration::from_millis(1);
const ACK_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RgbMode {
    Smart,
    Off,
    StaticSingle,
    StaticMulti,
    Rotation,
    Breathing,
    Flowing,
}

impl RgbMode {
    pub fn mode_byte(&self) -> u8 {
        match self {
            RgbMode::Off => 0x00,
            RgbMode::StaticSingle => 0x01,
            RgbMode::StaticMulti => 0x02,
            RgbMode::Rotation => 0x03,
            RgbMode::Breathing => 0x04,
            RgbMode::Flowing => 0x05,
            RgbMode::Smart => 0x06,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RgbSpeed {
    Fast,
    Medium,
    Slow,
}

impl RgbSpeed {
    pub fn byte(&self) -> u8 {
        match self {
            RgbSpeed::Fast => 0x05,
            RgbSpeed::Medium => 0x0A,
            RgbSpeed::Slow => 0x0F,
        }
    }
}

/* A complete lighting request, also persisted as `rgb-config`. */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RgbSettings {
    pub mode: RgbMode,
    #[serde(default)]
    pub colors: Vec<Color>,
    pub speed: RgbSpeed,
    pub brightness: u8,
}

impl Default for RgbSettings {
    fn default() -> Self {
        Self {
            mode: RgbMode::Smart,
            colors: Vec::new(),
            speed: RgbSpeed::Medium,
            brightness: 100,
        }
    }
}

/* Check a request against the per-mode color-count rules. */
pub fn validate(settings: &RgbSettings) -> Result<(), String> {
    let n = settings.colors.len();
    match settings.mode {
        RgbMode::Smart | RgbMode::Off | RgbMode::Flowing => Ok(()),
        RgbMode::StaticSingle => {
            if n == 1 {
                Ok(())
            } else {
                Err(format!("static-single needs exactly 1 color, got {n}"))
            }
        }
        RgbMode::StaticMulti => {
            if n == 3 {
                Ok(())
            } else {
                Err(format!("static-multi needs exactly 3 colors, got {n}"))
            }
        }
        RgbMode::Rotation => {
            if (1..=6).contains(&n) {
                Ok(())
            } else {
                Err(format!("rotation needs 1-6 colors, got {n}"))
            }
        }
        RgbMode::Breathing => {
            if (1..=5).contains(&n) {
                Ok(())
            } else {
                Err(format!("breathing needs 1-5 colors, got {n}"))
            }
        }
    }
}

/* Brightness is a multiplicative scale on each channel. */
fn scale(value: u8, brightness: u8) -> u8 {
    (u16::from(value) * u16::from(brightness.min(100)) / 100) as u8
}

fn put_led(plane: &mut [u8], index: usize, color: Color, brightness: u8) {
    let at = index * 3;
    if at + 2 < plane.len() {
        plane[at] = scale(color.r, brightness);
        plane[at + 1] = scale(color.g, brightness);
        plane[at + 2] = scale(color.b, brightness);
    }
}

/* Hue wheel cell for the flowing animation. `h` in degrees. */
fn hue_to_color(h: f64) -> Color {
    let sector = (h / 60.0).floor() as i32 % 6;
    let f = h / 60.0 - (h / 60.0).floor();
    let q = (255.0 * (1.0 - f)) as u8;
    let t = (255.0 * f) as u8;
    let (r, g, b) = match sector {
        0 => (255, t, 0),
        1 => (q, 255, 0),
        2 => (0, 255, t),
        3 => (0, q, 255),
        4 => (t, 0, 255),
        _ => (255, 0, q),
    };
    Color { r, g, b }
}

/* Render the 300-byte LED plane for an uploadable mode. */
pub fn build_plane(settings: &RgbSettings) -> Vec<u8> {
    let mut plane = vec![0u8; PLANE_LEN];
    let brightness = settings.brightness;

    match settings.mode {
        RgbMode::StaticSingle => {
            if let Some(color) = settings.colors.first() {
                for i in 0..LED_COUNT {
                    put_led(&mut plane, i, *color, brightness);
                }
            }
        }
        RgbMode::StaticMulti => {
            /* Three segments across the ring; the last takes the slack. */
            let seg = LED_COUNT / 3;
            for i in 0..LED_COUNT {
                let which = (i / seg).min(2);
                if let Some(color) = settings.colors.get(which) {
                    put_led(&mut plane, i, *color, brightness);
                }
            }
        }
        RgbMode::Rotation => {
            /* Seed colors at even offsets; the firmware spins them. */
            let n = settings.colors.len().max(1);
            for (slot, color) in settings.colors.iter().enumerate() {
                put_led(&mut plane, slot * LED_COUNT / n, *color, brightness);
            }
        }
        RgbMode::Breathing => {
            /* Colors packed consecutively with a fixed stride. */
            let n = settings.colors.len().max(1);
            let stride = LED_COUNT / n;
            for i in 0..LED_COUNT {
                let which = (i / stride).min(n - 1);
                if let Some(color) = settings.colors.get(which) {
                    put_led(&mut plane, i, *color, brightness);
                }
            }
        }
        RgbMode::Flowing => {
            for i in 0..LED_COUNT {
                let color = hue_to_color(360.0 * i as f64 / LED_COUNT as f64);
                put_led(&mut plane, i, color, brightness);
            }
        }
        RgbMode::Smart | RgbMode::Off => {}
    }

    plane
}

/* The 10-byte "F0" header: `[00 02 00 mode speed brightness R G B 00]`. */
pub fn f0_header(settings: &RgbSettings) -> [u8; FRAME_LEN] {
    let primary = settings.colors.first().copied().unwrap_or(Color {
        r: 0,
        g: 0,
        b: 0,
    });
    [
        0x00,
        0x02,
        0x00,
        settings.mode.mode_byte(),
        settings.speed.byte(),
        settings.brightness,
        scale(primary.r, settings.brightness),
        scale(primary.g, settings.brightness),
        scale(primary.b, settings.brightness),
        0x00,
    ]
}

/* Run the upload dance for the requested mode. */
pub async fn apply(device: &Arc<DeviceIo>, settings: &RgbSettings) -> Result<(), DockError> {
    if let Err(msg) = validate(settings) {
        return Err(DockError::DeviceWriteFailed {
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, msg),
        });
    }

    match settings.mode {
        RgbMode::Off => {
            debug!("Lighting off");
            device.write_packet(&build_packet(CMD_RGB_BEGIN, &[0x00])).await
        }
        RgbMode::Smart => {
            debug!("Lighting handed to firmware smart mode");
            let sequence: [(u8, &[u8]); 6] = [
                (CMD_RGB_BEGIN, &[0x01]),
                (CMD_RGB_BEGIN, &[0x01]),
                (CMD_RGB_PREP, &[]),
                (CMD_RGB_PREP, &[0x01]),
                (CMD_RGB_SMART, &[0x01]),
                (CMD_RGB_SMART, &[0x01]),
            ];
            for (cmd, payload) in sequence {
                device.write_packet(&build_packet(cmd, payload)).await?;
                tokio::time::sleep(HANDSHAKE_GAP).await;
            }
            Ok(())
        }
        _ => upload_frames(device, settings).await,
    }
}

async fn upload_frames(device: &Arc<DeviceIo>, settings: &RgbSettings) -> Result<(), DockError> {
    debug!(
        "Uploading lighting mode {:?} ({} colors)",
        settings.mode,
        settings.colors.len()
    );

    device.write_packet(&build_packet(CMD_RGB_BEGIN, &[0x00])).await?;
    tokio::time::sleep(STAGE_DELAY).await;

    let handshake: [(u8, &[u8]); 6] = [
        (CMD_RGB_BEGIN, &[0x01]),
        (CMD_RGB_BEGIN, &[0x01]),
        (CMD_RGB_PREP, &[]),
        (CMD_RGB_PREP, &[0x01]),
        (CMD_RGB_ARM, &[]),
        (CMD_RGB_ARM, &[0x01]),
    ];
    for (cmd, payload) in handshake {
        device.write_packet(&build_packet(cmd, payload)).await?;
        tokio::time::sleep(HANDSHAKE_GAP).await;
    }

    /* F0 header rides as frame index 0. */
    let mut payload = Vec::with_capacity(FRAME_LEN + 1);
    payload.push(0x00);
    payload.extend_from_slice(&f0_header(settings));
    device.write_packet(&build_packet(CMD_RGB_FRAME, &payload)).await?;
    tokio::time::sleep(FRAME_GAP).await;

    let plane = build_plane(settings);
    for frame in 0..FRAME_COUNT {
        let mut payload = Vec::with_capacity(FRAME_LEN + 1);
        payload.push((frame + 1) as u8);
        payload.extend_from_slice(&plane[frame * FRAME_LEN..(frame + 1) * FRAME_LEN]);
        device.write_packet(&build_packet(CMD_RGB_FRAME, &payload)).await?;
        tokio::time::sleep(FRAME_GAP).await;
    }

    device
        .write_packet_with_ack(&build_packet(CMD_RGB_COMMIT, &[0x01]), ACK_TIMEOUT)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(mode: RgbMode, colors: Vec<Color>) -> RgbSettings {
        RgbSettings {
            mode,
            colors,
            speed: RgbSpeed::Medium,
            brightness: 100,
        }
    }

    const RED: Color = Color { r: 255, g: 0, b: 0 };
    const GREEN: Color = Color { r: 0, g: 255, b: 0 };
    const BLUE: Color = Color { r: 0, g: 0, b: 255 };

    #[test]
    fn speed_bytes() {
        assert_eq!(RgbSpeed::Fast.byte(), 0x05);
        assert_eq!(RgbSpeed::Medium.byte(), 0x0A);
        assert_eq!(RgbSpeed::Slow.byte(), 0x0F);
    }

    #[test]
    fn color_count_rules() {
        assert!(validate(&settings(RgbMode::StaticSingle, vec![RED])).is_ok());
        assert!(validate(&settings(RgbMode::StaticSingle, vec![])).is_err());
        assert!(validate(&settings(RgbMode::StaticMulti, vec![RED, GREEN, BLUE])).is_ok());
        assert!(validate(&settings(RgbMode::StaticMulti, vec![RED])).is_err());
        assert!(validate(&settings(RgbMode::Rotation, vec![RED; 6])).is_ok());
        assert!(validate(&settings(RgbMode::Rotation, vec![RED; 7])).is_err());
        assert!(validate(&settings(RgbMode::Breathing, vec![RED; 5])).is_ok());
        assert!(validate(&settings(RgbMode::Breathing, vec![])).is_err());
        assert!(validate(&settings(RgbMode::Flowing, vec![])).is_ok());
        assert!(validate(&settings(RgbMode::Smart, vec![])).is_ok());
    }

    #[test]
    fn static_single_fills_the_plane() {
        let plane = build_plane(&settings(RgbMode::StaticSingle, vec![RED]));
        assert_eq!(plane.len(), PLANE_LEN);
        assert_eq!(&plane[..3], [255, 0, 0]);
        assert_eq!(&plane[297..300], [255, 0, 0]);
    }

    #[test]
    fn brightness_scales_channels() {
        let mut s = settings(RgbMode::StaticSingle, vec![Color { r: 200, g: 100, b: 50 }]);
        s.brightness = 50;
        let plane = build_plane(&s);
        assert_eq!(&plane[..3], [100, 50, 25]);

        let header = f0_header(&s);
        assert_eq!(header[5], 50);
        assert_eq!(header[6..9], [100, 50, 25]);
    }

    #[test]
    fn static_multi_segments() {
        let plane = build_plane(&settings(RgbMode::StaticMulti, vec![RED, GREEN, BLUE]));
        assert_eq!(&plane[0..3], [255, 0, 0]);
        assert_eq!(&plane[33 * 3..33 * 3 + 3], [0, 255, 0]);
        assert_eq!(&plane[66 * 3..66 * 3 + 3], [0, 0, 255]);
        /* The slack LEDs at the end belong to the last segment. */
        assert_eq!(&plane[99 * 3..99 * 3 + 3], [0, 0, 255]);
    }

    #[test]
    fn rotation_seeds_offsets() {
        let plane = build_plane(&settings(RgbMode::Rotation, vec![RED, GREEN]));
        assert_eq!(&plane[0..3], [255, 0, 0]);
        assert_eq!(&plane[50 * 3..50 * 3 + 3], [0, 255, 0]);
        /* Everything else stays dark. */
        assert_eq!(&plane[3..6], [0, 0, 0]);
    }

    #[test]
    fn f0_header_layout() {
        let s = settings(RgbMode::Rotation, vec![RED]);
        let header = f0_header(&s);
        assert_eq!(header[0..3], [0x00, 0x02, 0x00]);
        assert_eq!(header[3], 0x03);
        assert_eq!(header[4], 0x0A);
        assert_eq!(header[5], 100);
        assert_eq!(header[9], 0x00);
    }

    #[test]
    fn flowing_plane_is_nontrivial() {
        let plane = build_plane(&settings(RgbMode::Flowing, vec![]));
        assert!(plane.iter().any(|b| *b != 0));
        /* Cells differ across the wheel. */
        assert_ne!(&plane[0..3], &plane[150..153]);
    }
}
