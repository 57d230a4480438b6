/* bs2dockctl CLI: clap-driven client that talks to bs2dockd over its local
 * socket to inspect status, drive fan control, and configure the dock. */
mod ipc_client;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};

use ipc_client::DockClient;

/// bs2dockctl — control the BS2 / BS2 PRO cooling dock via bs2dockd.
#[derive(Parser)]
#[command(name = "bs2dockctl", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the device status snapshot.
    Status,

    /// Open the device.
    Connect,

    /// Close the device.
    Disconnect,

    /// Show the last fan telemetry report.
    FanData,

    /// Configuration commands.
    #[command(subcommand)]
    Config(ConfigCmd),

    /// Fan curve commands.
    #[command(subcommand)]
    Curve(CurveCmd),

    /// Enable or disable temperature-driven auto control.
    Auto {
        /// "on" or "off".
        state: String,
    },

    /// Apply a manual gear and level.
    Gear {
        /// Gear name: Silent, Standard, Strong, or Overclock.
        gear: String,
        /// Sub-level (1-based; defaults to 1).
        #[arg(default_value_t = 1)]
        level: u8,
    },

    /// List the gear/level catalog.
    Gears,

    /// Drive the fan at a fixed RPM, or disable the fixed speed.
    Speed {
        /// RPM in [1000, 4000], or "off".
        value: String,
    },

    /// Toggle the gear indicator LED.
    GearLight {
        /// "on" or "off".
        state: String,
    },

    /// Toggle spin-up on dock power-up.
    PowerOnStart {
        /// "on" or "off".
        state: String,
    },

    /// Set the load-driven start/stop policy.
    SmartStartStop {
        /// "off", "immediate", or "delayed".
        mode: String,
    },

    /// Set device brightness (two-state: 0 or 100).
    Brightness { level: u8 },

    /// Read the current host temperatures.
    Temperature,

    /// Lighting commands.
    Rgb {
        /// Mode: smart, off, static-single, static-multi, rotation,
        /// breathing, or flowing.
        mode: String,
        /// Colors as RRGGBB hex, comma-separated.
        #[arg(long, value_delimiter = ',')]
        colors: Vec<String>,
        /// Animation speed: fast, medium, or slow.
        #[arg(long, default_value = "medium")]
        speed: String,
        /// Brightness percentage (0-100).
        #[arg(long, default_value_t = 100)]
        brightness: u8,
    },

    /// Liveness check.
    Ping,

    /// Stream server events to stdout until interrupted.
    Monitor,

    /// Show daemon diagnostics.
    DebugInfo,
}

#[derive(Subcommand)]
enum ConfigCmd {
    /// Print the full configuration.
    Get,
    /// Replace one configuration option (value is parsed as JSON,
    /// falling back to a string).
    Set {
        /// Option key, e.g. "temp-update-rate".
        key: String,
        /// New value, e.g. "5".
        value: String,
    },
}

#[derive(Subcommand)]
enum CurveCmd {
    /// Print the fan curve.
    Get,
    /// Replace the fan curve.
    Set {
        /// Points as temp:rpm pairs, e.g. "40:1500,60:2500,80:3500".
        points: String,
    },
}

fn parse_on_off(state: &str) -> Result<bool> {
    match state {
        "on" | "true" | "1" => Ok(true),
        "off" | "false" | "0" => Ok(false),
        other => bail!("expected 'on' or 'off', got '{other}'"),
    }
}

fn parse_color(hex: &str) -> Result<Value> {
    let hex = hex.trim_start_matches('#');
    if hex.len() != 6 {
        bail!("color '{hex}' is not RRGGBB hex");
    }
    let r = u8::from_str_radix(&hex[0..2], 16).context("bad red channel")?;
    let g = u8::from_str_radix(&hex[2..4], 16).context("bad green channel")?;
    let b = u8::from_str_radix(&hex[4..6], 16).context("bad blue channel")?;
    Ok(json!({ "r": r, "g": g, "b": b }))
}

fn parse_curve(points: &str) -> Result<Value> {
    let mut curve = Vec::new();
    for pair in points.split(',') {
        let (temp, rpm) = pair
            .split_once(':')
            .with_context(|| format!("point '{pair}' is not temp:rpm"))?;
        let temp: i32 = temp.trim().parse().with_context(|| format!("bad temperature in '{pair}'"))?;
        let rpm: u32 = rpm.trim().parse().with_context(|| format!("bad RPM in '{pair}'"))?;
        curve.push(json!({ "temp": temp, "rpm": rpm }));
    }
    Ok(Value::Array(curve))
}

fn print_value(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(pretty) => println!("{pretty}"),
        Err(_) => println!("{value}"),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = DockClient::new();
    client.connect().await?;

    match cli.command {
        Commands::Status => print_value(&client.call("GetDeviceStatus", None).await?),
        Commands::Connect => print_value(&client.call("Connect", None).await?),
        Commands::Disconnect => print_value(&client.call("Disconnect", None).await?),
        Commands::FanData => print_value(&client.call("GetCurrentFanData", None).await?),
        Commands::Config(ConfigCmd::Get) => print_value(&client.call("GetConfig", None).await?),
        Commands::Config(ConfigCmd::Set { key, value }) => {
            /* Read-modify-write through the daemon so one key changes */
            /* without clobbering the rest.                            */
            let mut config = client.call("GetConfig", None).await?;
            let Some(object) = config.as_object_mut() else {
                bail!("daemon returned a non-object configuration");
            };
            if !object.contains_key(&key) {
                bail!("unknown configuration key '{key}'");
            }
            let parsed = serde_json::from_str(&value).unwrap_or(Value::String(value));
            object.insert(key, parsed);
            print_value(&client.call("UpdateConfig", Some(config)).await?);
        }
        Commands::Curve(CurveCmd::Get) => print_value(&client.call("GetFanCurve", None).await?),
        Commands::Curve(CurveCmd::Set { points }) => {
            print_value(&client.call("SetFanCurve", Some(parse_curve(&points)?)).await?);
        }
        Commands::Auto { state } => {
            let enable = parse_on_off(&state)?;
            print_value(&client.call("SetAutoControl", Some(json!(enable))).await?);
        }
        Commands::Gear { gear, level } => {
            print_value(
                &client
                    .call("SetManualGear", Some(json!({ "gear": gear, "level": level })))
                    .await?,
            );
        }
        Commands::Gears => print_value(&client.call("GetAvailableGears", None).await?),
        Commands::Speed { value } => {
            let data = if value == "off" {
                json!({ "enabled": false, "rpm": null })
            } else {
                let rpm: u16 = value.parse().context("RPM must be a number or 'off'")?;
                json!({ "enabled": true, "rpm": rpm })
            };
            print_value(&client.call("SetCustomSpeed", Some(data)).await?);
        }
        Commands::GearLight { state } => {
            let on = parse_on_off(&state)?;
            print_value(&client.call("SetGearLight", Some(json!(on))).await?);
        }
        Commands::PowerOnStart { state } => {
            let on = parse_on_off(&state)?;
            print_value(&client.call("SetPowerOnStart", Some(json!(on))).await?);
        }
        Commands::SmartStartStop { mode } => {
            print_value(&client.call("SetSmartStartStop", Some(json!(mode))).await?);
        }
        Commands::Brightness { level } => {
            print_value(&client.call("SetBrightness", Some(json!(level))).await?);
        }
        Commands::Temperature => print_value(&client.call("GetTemperature", None).await?),
        Commands::Rgb {
            mode,
            colors,
            speed,
            brightness,
        } => {
            let colors = colors
                .iter()
                .map(|c| parse_color(c))
                .collect::<Result<Vec<_>>>()?;
            let data = json!({
                "mode": mode,
                "colors": colors,
                "speed": speed,
                "brightness": brightness,
            });
            print_value(&client.call("SetRGBMode", Some(data)).await?);
        }
        Commands::Ping => print_value(&client.call("Ping", None).await?),
        Commands::Monitor => {
            client.set_event_handler(Box::new(|event| {
                println!("{event}");
            }));
            eprintln!("Streaming events; press Ctrl-C to stop.");
            tokio::signal::ctrl_c().await.context("Waiting for Ctrl-C")?;
        }
        Commands::DebugInfo => print_value(&client.call("GetDebugInfo", None).await?),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn on_off_parsing() {
        assert!(parse_on_off("on").unwrap());
        assert!(!parse_on_off("off").unwrap());
        assert!(parse_on_off("maybe").is_err());
    }

    #[test]
    fn color_parsing() {
        let c = parse_color("#FF8000").unwrap();
        assert_eq!(c["r"], 255);
        assert_eq!(c["g"], 128);
        assert_eq!(c["b"], 0);
        assert!(parse_color("FFF").is_err());
        assert!(parse_color("GGGGGG").is_err());
    }

    #[test]
    fn curve_parsing() {
        let curve = parse_curve("40:1500, 60:2500").unwrap();
        assert_eq!(curve[0]["temp"], 40);
        assert_eq!(curve[1]["rpm"], 2500);
        assert!(parse_curve("40-1500").is_err());
        assert!(parse_curve("forty:1500").is_err());
    }
}
