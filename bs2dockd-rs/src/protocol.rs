/* Wire codec for the dock firmware.
 *
 * Outbound commands are framed as `5A A5 | cmd | len | payload... | chk`
 * and padded to a fixed 23-byte HID write behind a `0x02` report id.
 * `len` counts the bytes from `cmd` through the last payload byte,
 * including the `len` byte itself. `chk` is the additive byte-sum of
 * that same content region, masked to 8 bits. The firmware compares
 * packets literally, so every builder here is covered by a byte-exact
 * test vector. */

use crate::device::{FanReport, GearLabel, WorkMode};

/* ---------------------------------------------------------------------- */
/* Frame geometry                                                         */
/* ---------------------------------------------------------------------- */

pub const SYNC: [u8; 2] = [0x5A, 0xA5];
pub const REPORT_ID: u8 = 0x02;

/* Outbound writes are 23 bytes total, report id included. */
pub const WRITE_REPORT_LEN: usize = 23;

/* Inbound reports are 64 bytes. */
pub const INPUT_REPORT_LEN: usize = 64;

/* ---------------------------------------------------------------------- */
/* Command ids                                                            */
/* ---------------------------------------------------------------------- */

pub const CMD_FAN_TELEMETRY: u8 = 0xEF;
pub const CMD_SET_RPM: u8 = 0x21;
pub const CMD_MANUAL_GEAR: u8 = 0x22;
pub const CMD_ENTER_AUTO: u8 = 0x23;
pub const CMD_POWER_ON_START: u8 = 0x0C;
pub const CMD_SMART_START_STOP: u8 = 0x0D;
pub const CMD_GEAR_LIGHT: u8 = 0x48;

/* Lighting sequence commands. `0x43` doubles as the two-byte       */
/* full-brightness command and the lighting commit; `0x47` carries  */
/* both the dark-brightness frame and the per-frame color payloads. */
pub const CMD_RGB_BEGIN: u8 = 0x46;
pub const CMD_RGB_PREP: u8 = 0x45;
pub const CMD_RGB_ARM: u8 = 0x41;
pub const CMD_RGB_SMART: u8 = 0x44;
pub const CMD_RGB_FRAME: u8 = 0x47;
pub const CMD_RGB_COMMIT: u8 = 0x43;

/* ---------------------------------------------------------------------- */
/* Framing                                                                */
/* ---------------------------------------------------------------------- */

/* Additive byte-sum of the content region, masked to 8 bits. */
pub fn content_checksum(content: &[u8]) -> u8 {
    content
        .iter()
        .fold(0u32, |acc, b| acc.wrapping_add(u32::from(*b))) as u8
}

/* Frame a command: sync, cmd, len, payload, checksum. */
pub fn build_packet(cmd: u8, payload: &[u8]) -> Vec<u8> {
    let len = (2 + payload.len()) as u8;
    let mut packet = Vec::with_capacity(5 + payload.len());
    packet.extend_from_slice(&SYNC);
    packet.push(cmd);
    packet.push(len);
    packet.extend_from_slice(payload);
    packet.push(content_checksum(&packet[2..]));
    packet
}

/* Pad a framed packet into the fixed-size write report. */
pub fn pad_to_report(packet: &[u8]) -> [u8; WRITE_REPORT_LEN] {
    debug_assert!(packet.len() < WRITE_REPORT_LEN);
    let mut report = [0u8; WRITE_REPORT_LEN];
    report[0] = REPORT_ID;
    let n = packet.len().min(WRITE_REPORT_LEN - 1);
    report[1..1 + n].copy_from_slice(&packet[..n]);
    report
}

/* ---------------------------------------------------------------------- */
/* Fan-speed commands                                                     */
/* ---------------------------------------------------------------------- */

pub fn encode_rpm(rpm: u16) -> [u8; 2] {
    rpm.to_le_bytes()
}

pub fn decode_rpm(bytes: [u8; 2]) -> u16 {
    u16::from_le_bytes(bytes)
}

/* `5A A5 21 04 lo hi chk`.                                          */
/*                                                                   */
/* The firmware's set-speed checksum sums the sync bytes plus one    */
/* into the total; `0x5A + 0xA5 + 1` is exactly one carry byte, so   */
/* the result reduces to the plain content sum shared by every other */
/* command.                                                          */
pub fn set_rpm_packet(rpm: u16) -> Vec<u8> {
    build_packet(CMD_SET_RPM, &encode_rpm(rpm))
}

pub fn enter_auto_packet() -> Vec<u8> {
    build_packet(CMD_ENTER_AUTO, &[])
}

/* ---------------------------------------------------------------------- */
/* Device-configuration commands                                          */
/* ---------------------------------------------------------------------- */

pub fn gear_light_packet(on: bool) -> Vec<u8> {
    build_packet(CMD_GEAR_LIGHT, &[u8::from(on)])
}

pub fn power_on_start_packet(on: bool) -> Vec<u8> {
    /* On is 0x02, off is 0x01. */
    build_packet(CMD_POWER_ON_START, &[if on { 0x02 } else { 0x01 }])
}

pub fn smart_start_stop_packet(code: u8) -> Vec<u8> {
    /* 0x00 off, 0x01 immediate, 0x02 delayed. */
    build_packet(CMD_SMART_START_STOP, &[code])
}

/* The device brightness is two-state: full on or dark. Dark is sent  */
/* as a lighting frame whose first cell is `0x1C`.                    */
pub fn brightness_packet(level: u8) -> Vec<u8> {
    if level == 0 {
        let mut payload = [0u8; 11];
        payload[0] = 0x1C;
        build_packet(CMD_RGB_FRAME, &payload)
    } else {
        build_packet(CMD_RGB_COMMIT, &[])
    }
}

/* Predefined `(gear, level)` command table. Levels are 1-based;      */
/* entries outside the catalog return `None`.                         */
pub fn manual_gear_packet(gear: GearLabel, level: u8) -> Option<Vec<u8>> {
    if !crate::device::gear_level_valid(gear, level) {
        return None;
    }
    Some(build_packet(CMD_MANUAL_GEAR, &[gear.code(), level]))
}

/* ---------------------------------------------------------------------- */
/* Inbound framing                                                        */
/* ---------------------------------------------------------------------- */

/* A length-framed packet extracted from an inbound report buffer.    */
/* Fan telemetry (`0xEF`) is not length-framed and is skipped here;   */
/* everything else (lighting ACKs) lands in this shape.               */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPacket {
    pub cmd: u8,
    pub payload: Vec<u8>,
}

impl RawPacket {
    /* Lighting ACKs signal success with a leading `0x01` payload byte. */
    pub fn ack_success(&self) -> bool {
        self.payload.first().copied() == Some(0x01)
    }
}

/* Scan a buffer for framed packets. Garbage between frames is       */
/* tolerated; a sync hit that fails length or checksum validation    */
/* advances one byte and keeps scanning.                             */
pub fn scan_packets(buf: &[u8]) -> Vec<RawPacket> {
    let mut packets = Vec::new();
    let mut i = 0;
    while i + 4 <= buf.len() {
        if buf[i] != SYNC[0] || buf[i + 1] != SYNC[1] {
            i += 1;
            continue;
        }
        let cmd = buf[i + 2];
        if cmd == CMD_FAN_TELEMETRY {
            /* Telemetry uses the fixed layout, not length framing. */
            i += 2;
            continue;
        }
        let len = buf[i + 3] as usize;
        let content_end = i + 2 + len;
        if len < 2 || content_end >= buf.len() {
            i += 1;
            continue;
        }
        let content = &buf[i + 2..content_end];
        if buf[content_end] != content_checksum(content) {
            i += 1;
            continue;
        }
        packets.push(RawPacket {
            cmd,
            payload: content[2..].to_vec(),
        });
        i = content_end + 1;
    }
    packets
}

/* ---------------------------------------------------------------------- */
/* Fan telemetry decode                                                   */
/* ---------------------------------------------------------------------- */

/* Gear nibble tables. Unrecognized codes surface verbatim. */
pub fn decode_max_gear(code: u8) -> Option<GearLabel> {
    match code {
        0x2 => Some(GearLabel::Standard),
        0x4 => Some(GearLabel::Strong),
        0x6 => Some(GearLabel::Overclock),
        _ => None,
    }
}

pub fn decode_set_gear(code: u8) -> Option<GearLabel> {
    match code {
        0x8 => Some(GearLabel::Silent),
        0xA => Some(GearLabel::Standard),
        0xC => Some(GearLabel::Strong),
        0xE => Some(GearLabel::Overclock),
        _ => None,
    }
}

/* The firmware reports several distinct states per label; the        */
/* pairing is preserved verbatim from observed traffic.               */
pub fn decode_work_mode(byte: u8) -> Option<WorkMode> {
    match byte {
        0x04 | 0x02 | 0x06 | 0x0A | 0x08 | 0x00 => Some(WorkMode::GearMode),
        0x05 | 0x03 | 0x07 | 0x0B | 0x09 | 0x01 => Some(WorkMode::AutoModeRealtimeRpm),
        _ => None,
    }
}

fn gear_string(label: Option<GearLabel>, code: u8) -> String {
    match label {
        Some(l) => l.as_str().to_string(),
        None => format!("unknown(0x{code:X})"),
    }
}

fn mode_string(mode: Option<WorkMode>, byte: u8) -> String {
    match mode {
        Some(m) => m.as_str().to_string(),
        None => format!("unknown(0x{byte:02X})"),
    }
}

/* Decode a fan telemetry report.
 *
 * Layout within the 64-byte input report:
 *   [0]     report id
 *   [1..3]  sync `5A A5` (big-endian magic)
 *   [3]     command, must be `0xEF`
 *   [4]     status
 *   [5]     packed gear settings (high nibble max gear, low nibble set gear)
 *   [6]     work mode
 *   [7]     reserved
 *   [8..10] current RPM, little-endian
 *   [10..12] target RPM, little-endian
 *
 * Returns `None` for anything that fails the sync or command check. */
pub fn parse_fan_report(buf: &[u8]) -> Option<FanReport> {
    if buf.len() < 12 {
        return None;
    }
    if buf[1] != SYNC[0] || buf[2] != SYNC[1] || buf[3] != CMD_FAN_TELEMETRY {
        return None;
    }

    let gear_raw = buf[5];
    let max_code = gear_raw >> 4;
    let set_code = gear_raw & 0x0F;
    let mode_raw = buf[6];

    Some(FanReport {
        status: buf[4],
        gear_raw,
        max_gear: gear_string(decode_max_gear(max_code), max_code),
        set_gear: gear_string(decode_set_gear(set_code), set_code),
        mode_raw,
        work_mode: mode_string(decode_work_mode(mode_raw), mode_raw),
        current_rpm: decode_rpm([buf[8], buf[9]]),
        target_rpm: decode_rpm([buf[10], buf[11]]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enter_auto_mode_vector() {
        assert_eq!(enter_auto_packet(), [0x5A, 0xA5, 0x23, 0x02, 0x25]);
    }

    #[test]
    fn gear_light_vectors() {
        assert_eq!(gear_light_packet(true), [0x5A, 0xA5, 0x48, 0x03, 0x01, 0x4C]);
        assert_eq!(gear_light_packet(false), [0x5A, 0xA5, 0x48, 0x03, 0x00, 0x4B]);
    }

    #[test]
    fn power_on_start_vectors() {
        assert_eq!(
            power_on_start_packet(true),
            [0x5A, 0xA5, 0x0C, 0x03, 0x02, 0x11]
        );
        assert_eq!(
            power_on_start_packet(false),
            [0x5A, 0xA5, 0x0C, 0x03, 0x01, 0x10]
        );
    }

    #[test]
    fn smart_start_stop_vectors() {
        assert_eq!(
            smart_start_stop_packet(0x00),
            [0x5A, 0xA5, 0x0D, 0x03, 0x00, 0x10]
        );
        assert_eq!(
            smart_start_stop_packet(0x01),
            [0x5A, 0xA5, 0x0D, 0x03, 0x01, 0x11]
        );
        assert_eq!(
            smart_start_stop_packet(0x02),
            [0x5A, 0xA5, 0x0D, 0x03, 0x02, 0x12]
        );
    }

    #[test]
    fn brightness_vectors() {
        assert_eq!(brightness_packet(100), [0x5A, 0xA5, 0x43, 0x02, 0x45]);

        let dark = brightness_packet(0);
        assert_eq!(
            dark,
            [
                0x5A, 0xA5, 0x47, 0x0D, 0x1C, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
                0x00, 0x00, 0x70
            ]
        );
    }

    #[test]
    fn set_rpm_packet_layout() {
        /* 2500 = 0x09C4, checksum is the content sum 0x21+0x04+0xC4+0x09. */
        let packet = set_rpm_packet(2500);
        assert_eq!(packet, [0x5A, 0xA5, 0x21, 0x04, 0xC4, 0x09, 0xF2]);

        let report = pad_to_report(&packet);
        assert_eq!(report.len(), WRITE_REPORT_LEN);
        assert_eq!(&report[..8], [0x02, 0x5A, 0xA5, 0x21, 0x04, 0xC4, 0x09, 0xF2]);
        assert!(report[8..].iter().all(|b| *b == 0));
    }

    #[test]
    fn rpm_round_trip() {
        for rpm in (1000..=4000).step_by(100) {
            let rpm = rpm as u16;
            assert_eq!(decode_rpm(encode_rpm(rpm)), rpm);
        }
    }

    #[test]
    fn checksum_matches_content_sum_for_every_builder() {
        let packets = [
            enter_auto_packet(),
            set_rpm_packet(1000),
            set_rpm_packet(3700),
            gear_light_packet(true),
            power_on_start_packet(false),
            smart_start_stop_packet(0x02),
            brightness_packet(0),
            brightness_packet(100),
            manual_gear_packet(GearLabel::Strong, 2).unwrap(),
        ];
        for packet in packets {
            let content = &packet[2..packet.len() - 1];
            assert_eq!(*packet.last().unwrap(), content_checksum(content));
            /* `len` spans cmd..payload inclusive of itself. */
            assert_eq!(packet[3] as usize, content.len());
        }
    }

    #[test]
    fn manual_gear_table() {
        assert_eq!(
            manual_gear_packet(GearLabel::Silent, 1).unwrap(),
            [0x5A, 0xA5, 0x22, 0x04, 0x08, 0x01, 0x2F]
        );
        assert_eq!(
            manual_gear_packet(GearLabel::Standard, 2).unwrap(),
            [0x5A, 0xA5, 0x22, 0x04, 0x0A, 0x02, 0x32]
        );
        assert_eq!(
            manual_gear_packet(GearLabel::Overclock, 1).unwrap(),
            [0x5A, 0xA5, 0x22, 0x04, 0x0E, 0x01, 0x35]
        );
        assert!(manual_gear_packet(GearLabel::Silent, 2).is_none());
        assert!(manual_gear_packet(GearLabel::Strong, 0).is_none());
    }

    fn telemetry_report(gear: u8, mode: u8, current: u16, target: u16) -> Vec<u8> {
        let mut buf = vec![0u8; INPUT_REPORT_LEN];
        buf[0] = 0x01;
        buf[1] = 0x5A;
        buf[2] = 0xA5;
        buf[3] = 0xEF;
        buf[4] = 0x00;
        buf[5] = gear;
        buf[6] = mode;
        buf[8..10].copy_from_slice(&current.to_le_bytes());
        buf[10..12].copy_from_slice(&target.to_le_bytes());
        buf
    }

    #[test]
    fn parse_fan_report_basic() {
        let buf = telemetry_report(0x2A, 0x05, 2340, 2400);
        let report = parse_fan_report(&buf).expect("valid telemetry");
        assert_eq!(report.max_gear, "Standard");
        assert_eq!(report.set_gear, "Standard");
        assert_eq!(report.work_mode, "auto-mode-realtime-rpm");
        assert_eq!(report.current_rpm, 2340);
        assert_eq!(report.target_rpm, 2400);
    }

    #[test]
    fn parse_fan_report_rejects_bad_frames() {
        let mut bad_sync = telemetry_report(0x2A, 0x05, 1000, 1000);
        bad_sync[1] = 0x5B;
        assert!(parse_fan_report(&bad_sync).is_none());

        let mut bad_cmd = telemetry_report(0x2A, 0x05, 1000, 1000);
        bad_cmd[3] = 0xEE;
        assert!(parse_fan_report(&bad_cmd).is_none());

        assert!(parse_fan_report(&[0x01, 0x5A, 0xA5, 0xEF]).is_none());
    }

    #[test]
    fn parse_fan_report_surfaces_unknown_codes() {
        let buf = telemetry_report(0x3B, 0x77, 0, 0);
        let report = parse_fan_report(&buf).expect("frame itself is valid");
        assert_eq!(report.max_gear, "unknown(0x3)");
        assert_eq!(report.set_gear, "unknown(0xB)");
        assert_eq!(report.work_mode, "unknown(0x77)");
    }

    #[test]
    fn work_mode_table_is_exhaustive_over_observed_values() {
        for byte in [0x04, 0x02, 0x06, 0x0A, 0x08, 0x00] {
            assert_eq!(decode_work_mode(byte), Some(WorkMode::GearMode));
        }
        for byte in [0x05, 0x03, 0x07, 0x0B, 0x09, 0x01] {
            assert_eq!(decode_work_mode(byte), Some(WorkMode::AutoModeRealtimeRpm));
        }
        assert_eq!(decode_work_mode(0x0C), None);
    }

    #[test]
    fn scan_extracts_ack_packets_and_skips_telemetry() {
        let mut buf = vec![0u8; 32];
        /* Telemetry sync at offset 1 must not confuse the scanner. */
        buf[1] = 0x5A;
        buf[2] = 0xA5;
        buf[3] = 0xEF;
        /* A lighting ACK: 5A A5 46 03 01 4A. */
        buf[16..22].copy_from_slice(&[0x5A, 0xA5, 0x46, 0x03, 0x01, 0x4A]);

        let packets = scan_packets(&buf);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].cmd, 0x46);
        assert_eq!(packets[0].payload, [0x01]);
        assert!(packets[0].ack_success());
    }

    #[test]
    fn scan_rejects_bad_checksum() {
        let buf = [0x5A, 0xA5, 0x46, 0x03, 0x01, 0x4B, 0x00];
        assert!(scan_packets(&buf).is_empty());
    }

    #[test]
    fn scan_reparses_own_output() {
        /* Re-parsing an outbound packet recovers `(cmd, payload)`. */
        let mut buf = gear_light_packet(true);
        buf.extend_from_slice(&[0x00, 0x00]);
        let packets = scan_packets(&buf);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].cmd, CMD_GEAR_LIGHT);
        assert_eq!(packets[0].payload, [0x01]);
    }
}
