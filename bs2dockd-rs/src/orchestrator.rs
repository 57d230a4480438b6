/* State orchestrator.
 *
 * Owns the configuration, the device state record, and the last
 * temperature sample behind one reader-writer lock, distinct from the
 * device-operation mutex inside `DeviceIo`. Every configuration
 * mutation runs the same pipeline: device-side effect (when connected
 * and required), persistence through the store, `config-update`
 * broadcast. The state lock is always released before any device
 * write. */

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tokio::sync::{Mutex, RwLock, broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::{Config, ConfigStore};
use crate::device::{self, DockModel, FanReport, WorkMode};
use crate::device_io::{DeviceIo, DeviceNotification};
use crate::error::DockError;
use crate::fan_control::{self, FanLoopParams, curve_valid};
use crate::ipc::{Event, Request, Response};
use crate::rgb;
use crate::temperature::{TempSample, TemperatureProvider};

/* Delay between entering auto mode and the first fixed-RPM write. */
const CUSTOM_SPEED_SETTLE: Duration = Duration::from_millis(50);

/* Delay before re-asserting the manual gear after leaving a       */
/* host-driven mode.                                               */
const GEAR_REASSERT_DELAY: Duration = Duration::from_millis(200);

/* Lifecycle outcome requested over IPC. */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    Stop,
    Restart,
}

/* Mutable device state, guarded by the state lock. */
#[derive(Debug, Default)]
pub struct DeviceState {
    pub connected: bool,
    pub monitoring_active: bool,
    pub user_initiated_disconnect: bool,
    pub last_observed_mode: Option<WorkMode>,
    pub model: Option<DockModel>,
}

struct TempLoopHandle {
    stop: watch::Sender<bool>,
}

pub struct Orchestrator {
    device: Arc<DeviceIo>,
    provider: Arc<dyn TemperatureProvider>,
    store: Box<dyn ConfigStore>,
    config: RwLock<Config>,
    state: RwLock<DeviceState>,
    last_sample: RwLock<Option<TempSample>>,
    events: broadcast::Sender<Event>,
    temp_loop: Mutex<Option<TempLoopHandle>>,
    shutdown_tx: watch::Sender<Option<Shutdown>>,
    gui_response_ms: AtomicU64,
    started_at: Instant,
    autostart: bool,
}

impl Orchestrator {
    pub fn new(
        device: Arc<DeviceIo>,
        provider: Arc<dyn TemperatureProvider>,
        store: Box<dyn ConfigStore>,
        config: Config,
        autostart: bool,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        let (shutdown_tx, _) = watch::channel(None);
        Arc::new(Self {
            device,
            provider,
            store,
            config: RwLock::new(config),
            state: RwLock::new(DeviceState::default()),
            last_sample: RwLock::new(None),
            events,
            temp_loop: Mutex::new(None),
            shutdown_tx,
            gui_response_ms: AtomicU64::new(0),
            started_at: Instant::now(),
            autostart,
        })
    }

    /* ------------------------------------------------------------------ */
    /* Event plumbing                                                     */
    /* ------------------------------------------------------------------ */

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn broadcast(&self, event: Event) {
        /* No subscribers is fine. */
        let _ = self.events.send(event);
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<Option<Shutdown>> {
        self.shutdown_tx.subscribe()
    }

    fn request_shutdown(&self, kind: Shutdown) {
        info!("Shutdown requested: {kind:?}");
        let _ = self.shutdown_tx.send(Some(kind));
    }

    /* Consume device notifications for the life of the daemon. */
    pub fn spawn_notification_pump(
        self: &Arc<Self>,
        mut rx: mpsc::Receiver<DeviceNotification>,
    ) {
        let orc = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                match notification {
                    DeviceNotification::FanReport(report) => {
                        orc.on_fan_report(report).await;
                    }
                    DeviceNotification::Disconnected => {
                        orc.on_spontaneous_disconnect().await;
                    }
                }
            }
            debug!("Device notification pump exited");
        });
    }

    async fn on_fan_report(self: &Arc<Self>, report: FanReport) {
        let new_mode = crate::protocol::decode_work_mode(report.mode_raw);

        let previous = {
            let mut state = self.state.write().await;
            let previous = state.last_observed_mode;
            state.last_observed_mode = new_mode;
            previous
        };

        /* The dock dropping out of auto mode on its own is mirrored   */
        /* into the configuration unless the user opted out.           */
        if previous == Some(WorkMode::AutoModeRealtimeRpm)
            && new_mode == Some(WorkMode::GearMode)
        {
            let (auto_on, ignore) = {
                let config = self.config.read().await;
                (config.auto_control, config.ignore_device_on_reconnect)
            };
            if auto_on && !ignore {
                info!("Dock left auto mode on its own, mirroring into configuration");
                self.stop_monitoring().await;
                let mut config = self.config.write().await.clone();
                config.auto_control = false;
                if let Err(e) = self.persist_and_broadcast(config).await {
                    warn!("{e}");
                }
            }
        }

        self.broadcast(Event::FanDataUpdate(report));
    }

    async fn on_spontaneous_disconnect(self: &Arc<Self>) {
        warn!("Device disconnected");
        self.stop_monitoring().await;

        let user_initiated = {
            let mut state = self.state.write().await;
            state.connected = false;
            state.model = None;
            state.user_initiated_disconnect
        };

        self.broadcast(Event::DeviceDisconnected);

        if !user_initiated {
            crate::reconnect::spawn_supervisor(Arc::clone(self));
        }
    }

    /* ------------------------------------------------------------------ */
    /* Device lifecycle                                                   */
    /* ------------------------------------------------------------------ */

    pub async fn connect(self: &Arc<Self>) -> Result<DockModel, DockError> {
        let model = self.device.connect().await?;

        {
            let mut state = self.state.write().await;
            state.connected = true;
            state.model = Some(model);
            state.user_initiated_disconnect = false;
        }

        self.broadcast(Event::DeviceConnected {
            model: model.label().to_string(),
        });

        self.assert_configuration().await;
        Ok(model)
    }

    pub async fn disconnect(self: &Arc<Self>, user_initiated: bool) -> bool {
        self.stop_monitoring().await;

        {
            let mut state = self.state.write().await;
            state.user_initiated_disconnect = user_initiated;
            state.connected = false;
            state.model = None;
        }

        let was_open = self.device.disconnect().await;
        if was_open {
            self.broadcast(Event::DeviceDisconnected);
        }
        was_open
    }

    pub async fn is_connected(&self) -> bool {
        self.state.read().await.connected
    }

    pub async fn reconnect_allowed(&self) -> bool {
        !self.state.read().await.user_initiated_disconnect
    }

    /* One reconnect attempt, used by the supervisor and the health tick. */
    pub async fn reconnect_attempt(self: &Arc<Self>) -> bool {
        match self.device.connect().await {
            Ok(model) => {
                info!("Reconnected to {model}");
                {
                    let mut state = self.state.write().await;
                    state.connected = true;
                    state.model = Some(model);
                }
                self.broadcast(Event::DeviceConnected {
                    model: model.label().to_string(),
                });

                let ignore = self.config.read().await.ignore_device_on_reconnect;
                if ignore {
                    /* Re-assert our configuration rather than adopting   */
                    /* whatever mode the dock came back in.               */
                    self.assert_configuration().await;
                }
                true
            }
            Err(_) => false,
        }
    }

    /* Push the intended configuration at the freshly-opened device. */
    async fn assert_configuration(self: &Arc<Self>) {
        let config = self.config.read().await.clone();

        if config.auto_control {
            self.start_monitoring().await;
        } else if config.custom_speed_enabled {
            if let Err(e) = self.device.send_enter_auto().await {
                warn!("Entering auto mode failed: {e}");
            }
            tokio::time::sleep(CUSTOM_SPEED_SETTLE).await;
            if let Err(e) = self.device.send_rpm(config.custom_speed_rpm).await {
                warn!("Custom speed write failed: {e}");
            }
        }

        if config.gear_light {
            if let Err(e) = self.device.send_gear_light(true).await {
                warn!("Gear light write failed: {e}");
            }
        }
        if config.power_on_start {
            if let Err(e) = self.device.send_power_on_start(true).await {
                warn!("Power-on-start write failed: {e}");
            }
        }
    }

    /* ------------------------------------------------------------------ */
    /* Temperature loop management                                        */
    /* ------------------------------------------------------------------ */

    pub async fn start_monitoring(self: &Arc<Self>) {
        let mut guard = self.temp_loop.lock().await;
        if guard.is_some() {
            return;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let orc = Arc::clone(self);
        tokio::spawn(async move {
            fan_control::run_temperature_loop(orc, stop_rx).await;
        });
        *guard = Some(TempLoopHandle { stop: stop_tx });
        drop(guard);

        self.state.write().await.monitoring_active = true;
    }

    pub async fn stop_monitoring(&self) {
        if let Some(handle) = self.temp_loop.lock().await.take() {
            let _ = handle.stop.send(true);
        }
        self.state.write().await.monitoring_active = false;
    }

    /* Snapshot the per-tick loop parameters. */
    pub async fn fan_loop_params(&self) -> FanLoopParams {
        let config = self.config.read().await;
        FanLoopParams {
            interval: Duration::from_secs(config.temp_update_rate.max(1)),
            sample_count: config.temp_sample_count.max(1),
            auto_control: config.auto_control,
            curve: config.fan_curve.clone(),
        }
    }

    /* Acquire one sample with panic isolation and publish it. */
    pub async fn sample_temperature(&self) -> TempSample {
        let provider = Arc::clone(&self.provider);
        let sample = match tokio::spawn(async move { provider.read().await }).await {
            Ok(sample) => sample,
            Err(e) => TempSample::failed(format!("temperature provider panicked: {e}")),
        };

        *self.last_sample.write().await = Some(sample.clone());
        self.broadcast(Event::TemperatureUpdate(sample.clone()));
        sample
    }

    pub async fn device_enter_auto(&self) -> Result<(), DockError> {
        self.device.send_enter_auto().await
    }

    pub async fn device_set_rpm(&self, rpm: u16) -> Result<(), DockError> {
        self.device.send_rpm(rpm).await
    }

    /* ------------------------------------------------------------------ */
    /* Configuration pipeline                                             */
    /* ------------------------------------------------------------------ */

    /* Commit a new configuration: memory, store, broadcast. A store   */
    /* failure leaves memory authoritative and is reported upward.     */
    async fn persist_and_broadcast(&self, config: Config) -> Result<(), DockError> {
        let save_result = {
            let mut guard = self.config.write().await;
            *guard = config.clone();
            drop(guard);
            self.store.save(&config).await
        };

        if let Err(ref e) = save_result {
            warn!("{e}");
        }
        self.broadcast(Event::ConfigUpdate(config));
        save_result
    }

    pub async fn config_snapshot(&self) -> Config {
        self.config.read().await.clone()
    }

    /* ------------------------------------------------------------------ */
    /* Request handling                                                   */
    /* ------------------------------------------------------------------ */

    pub async fn handle_request(self: &Arc<Self>, request: Request) -> Response {
        debug!("Handling {request:?}");
        match request {
            Request::Ping => Response::ok(json!("pong")),
            Request::IsAutoStartLaunch => Response::ok(json!(self.autostart)),

            Request::Connect => match self.connect().await {
                Ok(_) => Response::ok(json!(true)),
                Err(e) => {
                    self.broadcast(Event::DeviceError {
                        message: e.to_string(),
                    });
                    Response::err(e)
                }
            },
            Request::Disconnect => {
                self.disconnect(true).await;
                Response::ok(json!(true))
            }

            Request::GetDeviceStatus => {
                let state = self.state.read().await;
                let connected = state.connected;
                let monitoring = state.monitoring_active;
                drop(state);
                Response::ok(json!({
                    "connected": connected,
                    "monitoring": monitoring,
                    "currentData": self.device.last_report().await,
                    "temperature": self.last_sample.read().await.clone(),
                }))
            }
            Request::GetCurrentFanData => match self.device.last_report().await {
                Some(report) => Response::ok(value_of(&report)),
                None => Response::err("no fan data received yet"),
            },

            Request::GetConfig => Response::ok(value_of(&self.config_snapshot().await)),
            Request::UpdateConfig(new_config) => self.update_config(new_config).await,

            Request::GetFanCurve => {
                Response::ok(value_of(&self.config_snapshot().await.fan_curve))
            }
            Request::SetFanCurve(points) => {
                if points.len() < 2 || !curve_valid(&points) {
                    return Response::err(
                        "fan curve must have at least 2 points with strictly increasing temperatures",
                    );
                }
                let mut config = self.config_snapshot().await;
                config.fan_curve = points;
                let result = self.persist_and_broadcast(config.clone()).await;
                match result {
                    Ok(()) => Response::ok(value_of(&config.fan_curve)),
                    Err(e) => Response::err(e),
                }
            }

            Request::SetAutoControl(enable) => self.set_auto_control(enable).await,
            Request::SetCustomSpeed { enabled, rpm } => self.set_custom_speed(enabled, rpm).await,
            Request::SetManualGear { gear, level } => self.set_manual_gear(gear, level).await,
            Request::GetAvailableGears => Response::ok(value_of(&device::available_gears())),

            Request::SetGearLight(on) => {
                if self.is_connected().await {
                    if let Err(e) = self.device.send_gear_light(on).await {
                        return Response::err(e);
                    }
                }
                let mut config = self.config_snapshot().await;
                config.gear_light = on;
                self.finish_toggle(config).await
            }
            Request::SetPowerOnStart(on) => {
                if self.is_connected().await {
                    if let Err(e) = self.device.send_power_on_start(on).await {
                        return Response::err(e);
                    }
                }
                let mut config = self.config_snapshot().await;
                config.power_on_start = on;
                self.finish_toggle(config).await
            }
            Request::SetSmartStartStop(mode) => {
                if self.is_connected().await {
                    if let Err(e) = self.device.send_smart_start_stop(mode.code()).await {
                        return Response::err(e);
                    }
                }
                let mut config = self.config_snapshot().await;
                config.smart_start_stop = mode;
                self.finish_toggle(config).await
            }
            Request::SetBrightness(level) => {
                /* The wire supports exactly two states. */
                let level = if level == 0 { 0 } else { 100 };
                if self.is_connected().await {
                    if let Err(e) = self.device.send_brightness(level).await {
                        return Response::err(e);
                    }
                }
                let mut config = self.config_snapshot().await;
                config.brightness = level;
                self.finish_toggle(config).await
            }

            Request::GetTemperature => Response::ok(value_of(&self.sample_temperature().await)),
            Request::TestTemperatureReading => {
                let provider = Arc::clone(&self.provider);
                let sample = match tokio::spawn(async move { provider.read().await }).await {
                    Ok(sample) => sample,
                    Err(e) => TempSample::failed(format!("temperature provider panicked: {e}")),
                };
                if sample.provider_ok {
                    Response::ok(value_of(&sample))
                } else {
                    Response::err_with_data(sample.provider_message.clone(), value_of(&sample))
                }
            }
            Request::TestBridgeProgram => {
                let status = self.provider.status().await;
                if status.available {
                    Response::ok(value_of(&status))
                } else {
                    Response::err_with_data(status.detail.clone(), value_of(&status))
                }
            }
            Request::GetBridgeProgramStatus => Response::ok(value_of(&self.provider.status().await)),

            Request::SetRgbMode(settings) => self.set_rgb_mode(settings).await,

            Request::ShowWindow => {
                self.broadcast(Event::ShowWindow);
                Response::ok(json!(true))
            }
            Request::HideWindow => Response::ok(json!(true)),
            Request::QuitApp => {
                self.broadcast(Event::Quit);
                self.request_shutdown(Shutdown::Stop);
                Response::ok(json!(true))
            }
            Request::StopService => {
                self.request_shutdown(Shutdown::Stop);
                Response::ok(json!(true))
            }
            Request::RestartService => {
                self.request_shutdown(Shutdown::Restart);
                Response::ok(json!(true))
            }

            Request::GetDebugInfo => {
                let state = self.state.read().await;
                let connected = state.connected;
                let monitoring = state.monitoring_active;
                let model = state.model.map(|m| m.label().to_string());
                drop(state);
                Response::ok(json!({
                    "version": env!("CARGO_PKG_VERSION"),
                    "uptime-secs": self.started_at.elapsed().as_secs(),
                    "connected": connected,
                    "monitoring": monitoring,
                    "model": model,
                    "config-path": self.store.describe(),
                    "autostart": self.autostart,
                    "gui-response-ms": self.gui_response_ms.load(Ordering::Relaxed),
                    "last-report": self.device.last_report().await,
                }))
            }
            Request::SetDebugMode(enable) => {
                let mut config = self.config_snapshot().await;
                config.debug_mode = enable;
                self.finish_toggle(config).await
            }
            Request::UpdateGuiResponseTime(ms) => {
                self.gui_response_ms.store(ms, Ordering::Relaxed);
                Response::ok(json!(true))
            }
        }
    }

    async fn finish_toggle(&self, config: Config) -> Response {
        match self.persist_and_broadcast(config).await {
            Ok(()) => Response::ok(json!(true)),
            Err(e) => Response::err(e),
        }
    }

    async fn update_config(self: &Arc<Self>, mut new_config: Config) -> Response {
        new_config.normalize();
        if let Err(e) = new_config.check_mode_exclusion() {
            return Response::err(e);
        }

        let old = self.config_snapshot().await;
        let connected = self.is_connected().await;

        /* Apply device-side deltas before committing. */
        if connected {
            if old.gear_light != new_config.gear_light {
                if let Err(e) = self.device.send_gear_light(new_config.gear_light).await {
                    return Response::err(e);
                }
            }
            if old.power_on_start != new_config.power_on_start {
                if let Err(e) = self
                    .device
                    .send_power_on_start(new_config.power_on_start)
                    .await
                {
                    return Response::err(e);
                }
            }
            if old.smart_start_stop != new_config.smart_start_stop {
                if let Err(e) = self
                    .device
                    .send_smart_start_stop(new_config.smart_start_stop.code())
                    .await
                {
                    return Response::err(e);
                }
            }
            if old.brightness != new_config.brightness {
                if let Err(e) = self.device.send_brightness(new_config.brightness).await {
                    return Response::err(e);
                }
            }
            let speed_newly_enabled =
                new_config.custom_speed_enabled && !old.custom_speed_enabled;
            let speed_changed = new_config.custom_speed_enabled
                && old.custom_speed_rpm != new_config.custom_speed_rpm;
            if speed_newly_enabled || speed_changed {
                if let Err(e) = self.device.send_enter_auto().await {
                    return Response::err(e);
                }
                tokio::time::sleep(CUSTOM_SPEED_SETTLE).await;
                if let Err(e) = self.device.send_rpm(new_config.custom_speed_rpm).await {
                    return Response::err(e);
                }
            }
        }

        let result = self.persist_and_broadcast(new_config.clone()).await;

        /* Loop lifecycle follows the committed flags. */
        if new_config.auto_control && connected {
            self.start_monitoring().await;
        } else if !new_config.auto_control {
            self.stop_monitoring().await;
        }

        match result {
            Ok(()) => Response::ok(value_of(&new_config)),
            Err(e) => Response::err(e),
        }
    }

    async fn set_auto_control(self: &Arc<Self>, enable: bool) -> Response {
        let config = self.config_snapshot().await;

        if enable {
            if config.custom_speed_enabled {
                /* Mutually exclusive; no state change. */
                return Response::err(DockError::ModeConflict);
            }
            let mut new_config = config;
            new_config.auto_control = true;
            let result = self.persist_and_broadcast(new_config).await;
            if self.is_connected().await {
                self.start_monitoring().await;
            }
            match result {
                Ok(()) => Response::ok(json!(true)),
                Err(e) => Response::err(e),
            }
        } else {
            let mut new_config = config;
            new_config.auto_control = false;
            self.stop_monitoring().await;
            let result = self.persist_and_broadcast(new_config.clone()).await;

            if self.is_connected().await {
                /* Give the dock a beat to leave auto mode, then put it  */
                /* back on the configured gear.                          */
                let orc = Arc::clone(self);
                tokio::spawn(async move {
                    tokio::time::sleep(GEAR_REASSERT_DELAY).await;
                    if let Err(e) = orc
                        .device
                        .send_manual_gear(new_config.manual_gear, new_config.manual_level)
                        .await
                    {
                        warn!("Manual gear re-assert failed: {e}");
                    }
                });
            }

            match result {
                Ok(()) => Response::ok(json!(true)),
                Err(e) => Response::err(e),
            }
        }
    }

    async fn set_custom_speed(self: &Arc<Self>, enabled: bool, rpm: Option<u16>) -> Response {
        let mut config = self.config_snapshot().await;

        if enabled {
            let rpm = rpm
                .unwrap_or(config.custom_speed_rpm)
                .clamp(fan_control::RPM_MIN as u16, fan_control::RPM_MAX as u16);

            /* Enabling the fixed speed implicitly ends auto control. */
            self.stop_monitoring().await;
            config.auto_control = false;
            config.custom_speed_enabled = true;
            config.custom_speed_rpm = rpm;

            if self.is_connected().await {
                if let Err(e) = self.device.send_enter_auto().await {
                    return Response::err(e);
                }
                tokio::time::sleep(CUSTOM_SPEED_SETTLE).await;
                if let Err(e) = self.device.send_rpm(rpm).await {
                    return Response::err(e);
                }
            }

            self.finish_toggle(config).await
        } else {
            config.custom_speed_enabled = false;
            if let Some(rpm) = rpm {
                config.custom_speed_rpm =
                    rpm.clamp(fan_control::RPM_MIN as u16, fan_control::RPM_MAX as u16);
            }
            let response = self.finish_toggle(config.clone()).await;

            if self.is_connected().await {
                let orc = Arc::clone(self);
                tokio::spawn(async move {
                    tokio::time::sleep(GEAR_REASSERT_DELAY).await;
                    if let Err(e) = orc
                        .device
                        .send_manual_gear(config.manual_gear, config.manual_level)
                        .await
                    {
                        warn!("Manual gear re-assert failed: {e}");
                    }
                });
            }
            response
        }
    }

    async fn set_manual_gear(self: &Arc<Self>, gear: crate::device::GearLabel, level: u8) -> Response {
        if !device::gear_level_valid(gear, level) {
            return Response::err(format!("gear {gear} has no level {level}"));
        }

        if self.is_connected().await {
            if let Err(e) = self.device.send_manual_gear(gear, level).await {
                return Response::err(e);
            }
        }

        let mut config = self.config_snapshot().await;
        config.manual_gear = gear;
        config.manual_level = level;
        self.finish_toggle(config).await
    }

    async fn set_rgb_mode(self: &Arc<Self>, settings: rgb::RgbSettings) -> Response {
        if let Err(msg) = rgb::validate(&settings) {
            return Response::err(msg);
        }

        if self.is_connected().await {
            if let Err(e) = rgb::apply(&self.device, &settings).await {
                return Response::err(e);
            }
        }

        let mut config = self.config_snapshot().await;
        config.rgb_config = settings;
        self.finish_toggle(config).await
    }
}

/* Serialize a value for a response payload. These types cannot fail  */
/* to serialize; `Null` stands in if one ever does.                   */
fn value_of<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::testing::MemoryStore;
    use crate::temperature::testing::ScriptedProvider;

    fn orchestrator() -> Arc<Orchestrator> {
        let (device, _notify_rx) = DeviceIo::new();
        Orchestrator::new(
            device,
            Arc::new(ScriptedProvider::constant(55.0, 48.0)),
            Box::new(MemoryStore::new()),
            Config::default(),
            false,
        )
    }

    #[tokio::test]
    async fn ping_pongs() {
        let orc = orchestrator();
        let response = orc.handle_request(Request::Ping).await;
        assert!(response.success);
        assert_eq!(response.data, Some(json!("pong")));
    }

    #[tokio::test]
    async fn auto_control_conflicts_with_custom_speed() {
        let orc = orchestrator();

        let response = orc
            .handle_request(Request::SetCustomSpeed {
                enabled: true,
                rpm: Some(2000),
            })
            .await;
        assert!(response.success);

        let response = orc.handle_request(Request::SetAutoControl(true)).await;
        assert!(!response.success);
        assert!(response.error.as_deref().unwrap_or("").contains("mutually exclusive"));

        /* Rejected request left the configuration untouched. */
        let config = orc.config_snapshot().await;
        assert!(!config.auto_control);
        assert!(config.custom_speed_enabled);
        assert_eq!(config.custom_speed_rpm, 2000);
    }

    #[tokio::test]
    async fn custom_speed_implicitly_disables_auto() {
        let orc = orchestrator();

        let response = orc.handle_request(Request::SetAutoControl(true)).await;
        assert!(response.success);
        assert!(orc.config_snapshot().await.auto_control);

        let response = orc
            .handle_request(Request::SetCustomSpeed {
                enabled: true,
                rpm: Some(3000),
            })
            .await;
        assert!(response.success);

        let config = orc.config_snapshot().await;
        assert!(!config.auto_control);
        assert!(config.custom_speed_enabled);
        assert_eq!(config.custom_speed_rpm, 3000);
    }

    #[tokio::test]
    async fn update_config_rejects_mode_conflict_without_mutation() {
        let orc = orchestrator();
        let before = orc.config_snapshot().await;

        let conflicted = Config {
            auto_control: true,
            custom_speed_enabled: true,
            ..Config::default()
        };
        let response = orc.handle_request(Request::UpdateConfig(conflicted)).await;
        assert!(!response.success);
        assert_eq!(orc.config_snapshot().await, before);
    }

    #[tokio::test]
    async fn config_round_trips_through_update() {
        let orc = orchestrator();

        let mut wanted = Config::default();
        wanted.temp_update_rate = 7;
        wanted.gear_light = false;
        wanted.ignore_device_on_reconnect = false;

        let response = orc.handle_request(Request::UpdateConfig(wanted.clone())).await;
        assert!(response.success);

        let response = orc.handle_request(Request::GetConfig).await;
        assert!(response.success);
        let got: Config = serde_json::from_value(response.data.expect("data")).expect("config");
        assert_eq!(got, wanted);
    }

    #[tokio::test]
    async fn fan_curve_round_trips_and_validates() {
        let orc = orchestrator();

        let curve = vec![
            crate::fan_control::CurvePoint { temp: 35, rpm: 1200 },
            crate::fan_control::CurvePoint { temp: 75, rpm: 3600 },
        ];
        let response = orc.handle_request(Request::SetFanCurve(curve.clone())).await;
        assert!(response.success);

        let response = orc.handle_request(Request::GetFanCurve).await;
        let got: Vec<crate::fan_control::CurvePoint> =
            serde_json::from_value(response.data.expect("data")).expect("curve");
        assert_eq!(got, curve);

        let response = orc
            .handle_request(Request::SetFanCurve(vec![crate::fan_control::CurvePoint {
                temp: 40,
                rpm: 1500,
            }]))
            .await;
        assert!(!response.success);

        let response = orc
            .handle_request(Request::SetFanCurve(vec![
                crate::fan_control::CurvePoint { temp: 60, rpm: 2000 },
                crate::fan_control::CurvePoint { temp: 40, rpm: 1000 },
            ]))
            .await;
        assert!(!response.success);
    }

    #[tokio::test]
    async fn config_mutations_broadcast_updates() {
        let orc = orchestrator();
        let mut events = orc.subscribe();

        let response = orc.handle_request(Request::SetDebugMode(true)).await;
        assert!(response.success);

        let event = events.recv().await.expect("event");
        match event {
            Event::ConfigUpdate(config) => assert!(config.debug_mode),
            other => panic!("expected config-update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn save_failures_keep_memory_state_and_report_errors() {
        let (device, _notify_rx) = DeviceIo::new();
        let store = Box::new(MemoryStore::new());
        *store.fail_saves.lock().expect("lock") = true;
        let orc = Orchestrator::new(
            device,
            Arc::new(ScriptedProvider::constant(50.0, 40.0)),
            store,
            Config::default(),
            false,
        );

        let response = orc.handle_request(Request::SetDebugMode(true)).await;
        assert!(!response.success);
        assert!(response.error.as_deref().unwrap_or("").contains("persist"));

        /* Memory remains updated despite the failed save. */
        assert!(orc.config_snapshot().await.debug_mode);
    }

    #[tokio::test]
    async fn gears_and_diagnostics_respond() {
        let orc = orchestrator();

        let response = orc.handle_request(Request::GetAvailableGears).await;
        assert!(response.success);
        let gears: Vec<crate::device::GearInfo> =
            serde_json::from_value(response.data.expect("data")).expect("gears");
        assert_eq!(gears.len(), 4);

        let response = orc.handle_request(Request::IsAutoStartLaunch).await;
        assert_eq!(response.data, Some(json!(false)));

        let response = orc.handle_request(Request::GetDebugInfo).await;
        assert!(response.success);
        let info = response.data.expect("data");
        assert_eq!(info["config-path"], json!("memory"));
        assert_eq!(info["connected"], json!(false));
    }

    #[tokio::test]
    async fn manual_gear_outside_catalog_is_rejected() {
        let orc = orchestrator();
        let response = orc
            .handle_request(Request::SetManualGear {
                gear: crate::device::GearLabel::Silent,
                level: 3,
            })
            .await;
        assert!(!response.success);
        assert_eq!(orc.config_snapshot().await.manual_level, 1);
    }

    #[tokio::test]
    async fn temperature_requests_publish_samples() {
        let orc = orchestrator();
        let mut events = orc.subscribe();

        let response = orc.handle_request(Request::GetTemperature).await;
        assert!(response.success);
        let sample: TempSample =
            serde_json::from_value(response.data.expect("data")).expect("sample");
        assert_eq!(sample.max, 55.0);

        match events.recv().await.expect("event") {
            Event::TemperatureUpdate(sample) => assert!(sample.provider_ok),
            other => panic!("expected temperature-update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rgb_mode_validates_colors() {
        let orc = orchestrator();
        let response = orc
            .handle_request(Request::SetRgbMode(rgb::RgbSettings {
                mode: rgb::RgbMode::StaticSingle,
                colors: vec![],
                speed: rgb::RgbSpeed::Fast,
                brightness: 100,
            }))
            .await;
        assert!(!response.success);

        let response = orc
            .handle_request(Request::SetRgbMode(rgb::RgbSettings {
                mode: rgb::RgbMode::Off,
                colors: vec![],
                speed: rgb::RgbSpeed::Fast,
                brightness: 100,
            }))
            .await;
        /* Device is disconnected: the setting persists without a write. */
        assert!(response.success);
        assert_eq!(orc.config_snapshot().await.rgb_config.mode, rgb::RgbMode::Off);
    }

    #[tokio::test]
    async fn quit_app_signals_shutdown_and_broadcasts() {
        let orc = orchestrator();
        let mut events = orc.subscribe();
        let mut shutdown = orc.shutdown_signal();

        let response = orc.handle_request(Request::QuitApp).await;
        assert!(response.success);

        match events.recv().await.expect("event") {
            Event::Quit => {}
            other => panic!("expected quit, got {other:?}"),
        }
        shutdown.changed().await.expect("signal");
        assert_eq!(*shutdown.borrow(), Some(Shutdown::Stop));
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let orc = orchestrator();
        let response = orc.handle_request(Request::Disconnect).await;
        assert!(response.success);
        let response = orc.handle_request(Request::Disconnect).await;
        assert!(response.success);
        assert!(!orc.is_connected().await);
    }
}
