/* IPC wire model.
 *
 * One JSON object per line in each direction. Requests carry a
 * `type` plus optional `data`; server-to-client traffic is tagged
 * with `is-response` or `is-event` so clients can demultiplex
 * responses from unsolicited events on the same stream. */

pub mod server;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{Config, SmartStartStop};
use crate::device::{FanReport, GearLabel};
use crate::fan_control::CurvePoint;
use crate::rgb::RgbSettings;
use crate::temperature::TempSample;

/* The complete request catalog. */
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Request {
    Connect,
    Disconnect,
    GetDeviceStatus,
    GetCurrentFanData,
    GetConfig,
    UpdateConfig(Config),
    GetFanCurve,
    SetFanCurve(Vec<CurvePoint>),
    SetAutoControl(bool),
    SetManualGear { gear: GearLabel, level: u8 },
    GetAvailableGears,
    SetCustomSpeed { enabled: bool, rpm: Option<u16> },
    SetGearLight(bool),
    SetPowerOnStart(bool),
    SetSmartStartStop(SmartStartStop),
    SetBrightness(u8),
    GetTemperature,
    TestTemperatureReading,
    TestBridgeProgram,
    GetBridgeProgramStatus,
    #[serde(rename = "SetRGBMode")]
    SetRgbMode(RgbSettings),
    ShowWindow,
    HideWindow,
    QuitApp,
    RestartService,
    StopService,
    GetDebugInfo,
    SetDebugMode(bool),
    UpdateGuiResponseTime(u64),
    Ping,
    IsAutoStartLaunch,
}

/* Server-to-client reply, always written in direct response to one  */
/* request.                                                          */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "is-response")]
    pub is_response: bool,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Response {
    pub fn ok(data: Value) -> Self {
        Self {
            is_response: true,
            success: true,
            error: None,
            data: Some(data),
        }
    }

    pub fn err(message: impl std::fmt::Display) -> Self {
        Self {
            is_response: true,
            success: false,
            error: Some(message.to_string()),
            data: None,
        }
    }

    pub fn err_with_data(message: impl std::fmt::Display, data: Value) -> Self {
        Self {
            is_response: true,
            success: false,
            error: Some(message.to_string()),
            data: Some(data),
        }
    }
}

/* Unsolicited server pushes, fanned out to every connected client. */
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum Event {
    FanDataUpdate(FanReport),
    TemperatureUpdate(TempSample),
    DeviceConnected { model: String },
    DeviceDisconnected,
    DeviceError { message: String },
    ConfigUpdate(Config),
    ServiceConnected,
    ServiceDisconnected,
    ShowWindow,
    Quit,
}

impl Event {
    /* The wire form carries the `is-event` discriminator alongside   */
    /* the tagged payload.                                            */
    pub fn to_wire(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut value {
            map.insert("is-event".to_string(), Value::Bool(true));
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_requests_parse_without_data() {
        let req: Request = serde_json::from_str(r#"{"type": "Ping"}"#).expect("ping");
        assert!(matches!(req, Request::Ping));

        let req: Request = serde_json::from_str(r#"{"type": "GetDeviceStatus"}"#).expect("status");
        assert!(matches!(req, Request::GetDeviceStatus));
    }

    #[test]
    fn payload_requests_parse_from_data() {
        let req: Request =
            serde_json::from_str(r#"{"type": "SetAutoControl", "data": true}"#).expect("toggle");
        assert!(matches!(req, Request::SetAutoControl(true)));

        let req: Request = serde_json::from_str(
            r#"{"type": "SetManualGear", "data": {"gear": "Strong", "level": 2}}"#,
        )
        .expect("gear");
        match req {
            Request::SetManualGear { gear, level } => {
                assert_eq!(gear, GearLabel::Strong);
                assert_eq!(level, 2);
            }
            other => panic!("unexpected request {other:?}"),
        }

        let req: Request = serde_json::from_str(
            r#"{"type": "SetCustomSpeed", "data": {"enabled": true, "rpm": 2000}}"#,
        )
        .expect("speed");
        assert!(matches!(
            req,
            Request::SetCustomSpeed {
                enabled: true,
                rpm: Some(2000)
            }
        ));
    }

    #[test]
    fn rgb_request_uses_upstream_spelling() {
        let req: Request = serde_json::from_str(
            r#"{"type": "SetRGBMode", "data": {"mode": "off", "speed": "fast", "brightness": 100}}"#,
        )
        .expect("rgb");
        assert!(matches!(req, Request::SetRgbMode(_)));
    }

    #[test]
    fn malformed_requests_are_errors() {
        assert!(serde_json::from_str::<Request>(r#"{"type": "NoSuchThing"}"#).is_err());
        assert!(serde_json::from_str::<Request>("not json").is_err());
    }

    #[test]
    fn responses_are_tagged() {
        let ok = serde_json::to_value(Response::ok(Value::Bool(true))).expect("ok");
        assert_eq!(ok["is-response"], Value::Bool(true));
        assert_eq!(ok["success"], Value::Bool(true));
        assert_eq!(ok["data"], Value::Bool(true));
        assert!(ok.get("error").is_none());

        let err = serde_json::to_value(Response::err("nope")).expect("err");
        assert_eq!(err["success"], Value::Bool(false));
        assert_eq!(err["error"], Value::String("nope".to_string()));
    }

    #[test]
    fn events_are_tagged_kebab_case() {
        let wire = Event::DeviceConnected {
            model: "BS2 PRO".to_string(),
        }
        .to_wire();
        assert_eq!(wire["is-event"], Value::Bool(true));
        assert_eq!(wire["type"], Value::String("device-connected".to_string()));
        assert_eq!(wire["data"]["model"], Value::String("BS2 PRO".to_string()));

        let wire = Event::DeviceDisconnected.to_wire();
        assert_eq!(wire["type"], Value::String("device-disconnected".to_string()));

        let wire = Event::FanDataUpdate(FanReport {
            status: 0,
            gear_raw: 0x2A,
            max_gear: "Standard".to_string(),
            set_gear: "Standard".to_string(),
            mode_raw: 5,
            work_mode: "auto-mode-realtime-rpm".to_string(),
            current_rpm: 2200,
            target_rpm: 2200,
        })
        .to_wire();
        assert_eq!(wire["type"], Value::String("fan-data-update".to_string()));
        assert_eq!(wire["data"]["current-rpm"], Value::from(2200));
    }
}
