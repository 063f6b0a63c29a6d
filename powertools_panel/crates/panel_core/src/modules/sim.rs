//! In-memory backend used by the test suite and the `mock_backend` server.

use crate::modules::error::{PanelError, PanelResult};
use crate::modules::protocol::{
    BackendCall, BatteryLimits, ClientCommand, CpuLimits, CpusLimits, DevMessage, ErrorCode,
    GeneralLimits, GpuLimits, GpuPpt, MinMax, PeriodicSnapshot, RangeLimit, ServerMessage,
    SettingsLimits, StoreMetadata, VariantInfo, NEW_VARIANT_ID, PROTOCOL_VERSION,
};
use crate::modules::transport::Transport;
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info};

pub const DEFAULT_SETTINGS_FILE: &str = "default_settings.ron";
pub const DEFAULT_SETTINGS_NAME: &str = "Main";
pub const DEFAULT_VARIANT_NAME: &str = "Primary";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimError {
    pub code: ErrorCode,
    pub msg: String,
}

impl SimError {
    fn invalid(msg: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::InvalidValue,
            msg: msg.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimBattery {
    pub current: f64,
    pub charge_rate: Option<u64>,
    pub charge_mode: Option<String>,
    pub charge_limit: Option<f64>,
    pub charge_now: f64,
    pub charge_full: f64,
    pub charge_design: f64,
    pub charge_power: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimHardware {
    pub cpus_online: Vec<bool>,
    pub smt: bool,
    pub cpu_clocks: MinMax<u64>,
    pub governors: Vec<String>,
    pub gpu_ppt: GpuPpt,
    pub gpu_clocks: MinMax<u64>,
    pub slow_memory: Option<bool>,
}

#[derive(Debug, Clone)]
struct SimProfile {
    name: String,
    variants: BTreeMap<u64, String>,
}

/// Settings model of a handheld: one profile file per app id, each holding
/// numbered variants.
#[derive(Debug, Clone)]
pub struct SimBackend {
    pub limits: SettingsLimits,
    pub hardware: SimHardware,
    pub battery: SimBattery,
    pub persistent: bool,
    pub catalog: Vec<StoreMetadata>,
    pub messages: Vec<DevMessage>,
    pub uploads: Vec<(String, String)>,
    pub applied: u64,
    system_hardware: SimHardware,
    profiles: BTreeMap<String, SimProfile>,
    active_file: String,
    current_variant: u64,
}

impl Default for SimBackend {
    fn default() -> Self {
        Self::steam_deck()
    }
}

impl SimBackend {
    pub fn steam_deck() -> Self {
        let cpu_count = 8;
        let cpu = CpuLimits {
            clock_min_limits: Some(RangeLimit { min: 1400, max: 3500 }),
            clock_max_limits: Some(RangeLimit { min: 400, max: 3500 }),
            clock_step: 100,
            governors: vec!["schedutil".to_string(), "performance".to_string()],
        };
        let limits = SettingsLimits {
            battery: BatteryLimits {
                charge_current: Some(RangeLimit { min: 250, max: 2500 }),
                charge_current_step: 50,
                charge_modes: vec!["normal".to_string(), "discharge".to_string()],
                charge_limit: Some(RangeLimit { min: 10.0, max: 90.0 }),
                charge_limit_step: 1.0,
            },
            cpu: CpusLimits {
                cpus: vec![cpu; cpu_count],
                count: cpu_count,
                smt_capable: true,
                governors: vec!["schedutil".to_string(), "performance".to_string()],
            },
            gpu: GpuLimits {
                fast_ppt_limits: Some(RangeLimit { min: 1, max: 30 }),
                slow_ppt_limits: Some(RangeLimit { min: 1, max: 29 }),
                ppt_step: 1,
                clock_min_limits: Some(RangeLimit { min: 200, max: 1600 }),
                clock_max_limits: Some(RangeLimit { min: 200, max: 1600 }),
                clock_step: 100,
                memory_control_capable: true,
            },
            general: GeneralLimits {},
        };
        let hardware = SimHardware {
            cpus_online: vec![true; cpu_count],
            smt: true,
            cpu_clocks: MinMax {
                min: Some(1400),
                max: Some(3500),
            },
            governors: vec!["schedutil".to_string(); cpu_count],
            gpu_ppt: GpuPpt {
                fast: Some(15),
                slow: Some(15),
            },
            gpu_clocks: MinMax {
                min: Some(200),
                max: Some(1600),
            },
            slow_memory: Some(false),
        };
        let mut profiles = BTreeMap::new();
        profiles.insert(DEFAULT_SETTINGS_FILE.to_string(), default_profile());
        Self {
            limits,
            system_hardware: hardware.clone(),
            hardware,
            battery: SimBattery {
                current: -0.9,
                charge_rate: Some(2500),
                charge_mode: Some("normal".to_string()),
                charge_limit: None,
                charge_now: 30.5,
                charge_full: 40.0,
                charge_design: 40.04,
                charge_power: 8.2,
            },
            persistent: false,
            catalog: Vec::new(),
            messages: Vec::new(),
            uploads: Vec::new(),
            applied: 0,
            profiles,
            active_file: DEFAULT_SETTINGS_FILE.to_string(),
            current_variant: 0,
        }
    }

    pub fn settings_path(&self) -> &str {
        &self.active_file
    }

    pub fn settings_name(&self) -> String {
        self.profiles
            .get(&self.active_file)
            .map(|p| p.name.clone())
            .unwrap_or_default()
    }

    pub fn variants(&self) -> Vec<VariantInfo> {
        self.profiles
            .get(&self.active_file)
            .map(|p| {
                p.variants
                    .iter()
                    .map(|(id, name)| VariantInfo {
                        id: *id,
                        name: name.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn current_variant(&self) -> VariantInfo {
        let name = self
            .profiles
            .get(&self.active_file)
            .and_then(|p| p.variants.get(&self.current_variant))
            .cloned()
            .unwrap_or_default();
        VariantInfo {
            id: self.current_variant,
            name,
        }
    }

    /// Switches the active profile the way a load from another client would.
    pub fn load_profile(
        &mut self,
        app_id: &str,
        name: &str,
        variant_id: &str,
        variant_name: Option<&str>,
    ) {
        let file = format!("{app_id}.ron");
        let profile = self
            .profiles
            .entry(file.clone())
            .or_insert_with(|| SimProfile {
                name: name.to_string(),
                variants: BTreeMap::new(),
            });
        profile.name = name.to_string();
        self.current_variant = resolve_variant(profile, variant_id, variant_name);
        self.active_file = file;
    }

    fn load_variant(&mut self, variant_id: &str, variant_name: &str) {
        let active = self.active_file.clone();
        let profile = self.profiles.entry(active).or_insert_with(default_profile);
        self.current_variant = resolve_variant(profile, variant_id, Some(variant_name));
    }

    fn load_defaults(&mut self) {
        let profile = self
            .profiles
            .entry(DEFAULT_SETTINGS_FILE.to_string())
            .or_insert_with(default_profile);
        self.current_variant = profile.variants.keys().next().copied().unwrap_or(0);
        self.active_file = DEFAULT_SETTINGS_FILE.to_string();
    }

    pub fn handle(&mut self, call: &BackendCall) -> Result<Value, SimError> {
        match call {
            BackendCall::GetLimits => json(&self.limits),
            BackendCall::GetInfo => json(format!(
                "PowerTools sim backend v{}",
                env!("CARGO_PKG_VERSION")
            )),
            BackendCall::GetDriverProviderName { domain } => match domain.as_str() {
                "gpu" | "cpu" | "battery" => json("SteamDeck"),
                other => Err(SimError::invalid(format!("unknown driver domain {other:?}"))),
            },
            BackendCall::GetMessages { since } => json(
                self.messages
                    .iter()
                    .filter(|m| match (since, m.id) {
                        (Some(since), Some(id)) => id > *since,
                        _ => true,
                    })
                    .collect::<Vec<_>>(),
            ),
            BackendCall::GetPeriodicals => json(PeriodicSnapshot {
                battery_current: Some(self.battery.current),
                battery_charge_now: Some(self.battery.charge_now),
                battery_charge_full: Some(self.battery.charge_full),
                battery_charge_power: Some(self.battery.charge_power),
                settings_path: self.active_file.clone(),
            }),
            BackendCall::Log { .. } => Ok(Value::Null),

            BackendCall::GetBatteryCurrent => json(self.battery.current),
            BackendCall::GetBatteryChargeRate => json(self.battery.charge_rate),
            BackendCall::GetBatteryChargeMode => json(&self.battery.charge_mode),
            BackendCall::GetBatteryChargeLimit => json(self.battery.charge_limit),
            BackendCall::GetBatteryChargeNow => json(self.battery.charge_now),
            BackendCall::GetBatteryChargeFull => json(self.battery.charge_full),
            BackendCall::GetBatteryChargeDesign => json(self.battery.charge_design),
            BackendCall::GetBatteryChargePower => json(self.battery.charge_power),

            BackendCall::GetCpusOnline => json(&self.hardware.cpus_online),
            BackendCall::GetCpuSmt => json(self.hardware.smt),
            BackendCall::GetCpuClockLimits { index } => {
                if *index >= self.limits.cpu.count {
                    return Err(SimError::invalid(format!("no cpu {index}")));
                }
                json(self.hardware.cpu_clocks)
            }
            BackendCall::GetCpusGovernor => json(&self.hardware.governors),

            BackendCall::GetGpuPpt => json(&self.hardware.gpu_ppt),
            BackendCall::GetGpuClockLimits => json(self.hardware.gpu_clocks),
            BackendCall::GetGpuSlowMemory => json(self.hardware.slow_memory),

            BackendCall::GetGeneralPersistent => json(self.persistent),
            BackendCall::SetGeneralPersistent { persistent } => {
                self.persistent = *persistent;
                json(self.persistent)
            }
            BackendCall::GetGeneralSettingsName => json(self.settings_name()),
            BackendCall::GetGeneralSettingsPath => json(&self.active_file),
            BackendCall::GetAllSettingVariants => json(self.variants()),
            BackendCall::GetCurrentSettingVariant => json(self.current_variant()),
            BackendCall::LoadGeneralSettings {
                app_id,
                name,
                variant_id,
                variant_name,
            } => {
                self.load_profile(app_id, name, variant_id, variant_name.as_deref());
                json(true)
            }
            BackendCall::LoadGeneralSettingsVariant {
                variant_id,
                variant_name,
            } => {
                self.load_variant(variant_id, variant_name);
                json(true)
            }
            BackendCall::LoadGeneralDefaultSettings => {
                self.load_defaults();
                json(true)
            }
            BackendCall::LoadGeneralSystemSettings => {
                self.hardware = self.system_hardware.clone();
                json(true)
            }
            BackendCall::ForceApplySettings => {
                self.applied += 1;
                Ok(Value::Null)
            }
            BackendCall::WaitForComplete => json(true),

            BackendCall::SearchStoreByAppId { app_id } => {
                let steam_app_id: u32 = app_id
                    .parse()
                    .map_err(|_| SimError::invalid(format!("invalid app id {app_id:?}")))?;
                json(
                    self.catalog
                        .iter()
                        .filter(|m| m.steam_app_id == steam_app_id)
                        .collect::<Vec<_>>(),
                )
            }
            BackendCall::StoreDownloadById { id } => {
                let Some(meta) = self.catalog.iter().find(|m| &m.id == id).cloned() else {
                    return Err(SimError::invalid(format!("no catalog entry {id}")));
                };
                let active = self.active_file.clone();
                let profile = self.profiles.entry(active).or_insert_with(default_profile);
                resolve_variant(profile, NEW_VARIANT_ID, Some(&meta.name));
                json(self.variants())
            }
            BackendCall::StoreUpload {
                steam_id,
                steam_username,
            } => {
                self.uploads.push((steam_id.clone(), steam_username.clone()));
                Ok(Value::Null)
            }
        }
    }
}

fn default_profile() -> SimProfile {
    SimProfile {
        name: DEFAULT_SETTINGS_NAME.to_string(),
        variants: BTreeMap::from([(0, DEFAULT_VARIANT_NAME.to_string())]),
    }
}

// Ids that are not a u64 allocate a fresh id; 0 falls back to the lowest
// existing id; unknown ids are created.
fn resolve_variant(profile: &mut SimProfile, requested: &str, name: Option<&str>) -> u64 {
    let name_or = |id: u64| match name {
        Some(n) if !n.is_empty() => n.to_string(),
        _ => format!("Variant {id}"),
    };
    match requested.parse::<u64>() {
        Err(_) => {
            let id = profile.variants.keys().next_back().map_or(0, |last| last + 1);
            profile.variants.insert(id, name_or(id));
            id
        }
        Ok(0) if !profile.variants.contains_key(&0) => match profile.variants.keys().next() {
            Some(first) => *first,
            None => {
                profile
                    .variants
                    .insert(0, name.unwrap_or(DEFAULT_VARIANT_NAME).to_string());
                0
            }
        },
        Ok(id) => {
            if !profile.variants.contains_key(&id) {
                profile.variants.insert(id, name_or(id));
            }
            id
        }
    }
}

fn json<T: Serialize>(value: T) -> Result<Value, SimError> {
    serde_json::to_value(value).map_err(|e| SimError {
        code: ErrorCode::InternalError,
        msg: e.to_string(),
    })
}

/// In-process [`Transport`] over a [`SimBackend`] that records every call.
pub struct LoopbackTransport {
    sim: Mutex<SimBackend>,
    calls: Mutex<Vec<BackendCall>>,
    failing: Mutex<HashSet<&'static str>>,
    stalled: Mutex<HashSet<&'static str>>,
    delays: Mutex<HashMap<&'static str, Duration>>,
    in_flight: Arc<Mutex<HashMap<&'static str, Gauge>>>,
    accept_handshake: AtomicBool,
}

#[derive(Debug, Default, Clone, Copy)]
struct Gauge {
    current: usize,
    max: usize,
}

// Lowers the op's gauge when the call finishes or is dropped.
struct InFlight {
    op: &'static str,
    gauges: Arc<Mutex<HashMap<&'static str, Gauge>>>,
}

impl InFlight {
    fn enter(op: &'static str, gauges: &Arc<Mutex<HashMap<&'static str, Gauge>>>) -> Self {
        let mut map = lock(gauges);
        let gauge = map.entry(op).or_default();
        gauge.current += 1;
        gauge.max = gauge.max.max(gauge.current);
        Self {
            op,
            gauges: Arc::clone(gauges),
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Some(gauge) = lock(&self.gauges).get_mut(self.op) {
            gauge.current = gauge.current.saturating_sub(1);
        }
    }
}

impl LoopbackTransport {
    pub fn new(sim: SimBackend) -> Self {
        Self {
            sim: Mutex::new(sim),
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            stalled: Mutex::new(HashSet::new()),
            delays: Mutex::new(HashMap::new()),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            accept_handshake: AtomicBool::new(true),
        }
    }

    pub fn with_sim<R>(&self, f: impl FnOnce(&mut SimBackend) -> R) -> R {
        f(&mut lock(&self.sim))
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        lock(&self.calls).clone()
    }

    /// Number of recorded calls with the given operation name.
    pub fn count(&self, op: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| c.op_name() == op)
            .count()
    }

    /// Forgets recorded calls and the in-flight peaks.
    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
        for gauge in lock(&self.in_flight).values_mut() {
            gauge.max = gauge.current;
        }
    }

    /// Highest number of `op` calls that were awaiting a reply at once.
    pub fn max_in_flight(&self, op: &str) -> usize {
        lock(&self.in_flight).get(op).map_or(0, |g| g.max)
    }

    /// Calls of `op` never get a reply.
    pub fn stall_op(&self, op: &'static str) {
        lock(&self.stalled).insert(op);
    }

    /// Calls of `op` reply only after `delay`.
    pub fn delay_op(&self, op: &'static str, delay: Duration) {
        lock(&self.delays).insert(op, delay);
    }

    /// Makes every call of `op` fail with a backend error.
    pub fn fail_op(&self, op: &'static str) {
        lock(&self.failing).insert(op);
    }

    pub fn restore_op(&self, op: &'static str) {
        lock(&self.failing).remove(op);
    }

    pub fn set_handshake_accepted(&self, accepted: bool) {
        self.accept_handshake.store(accepted, Ordering::SeqCst);
    }
}

impl Transport for LoopbackTransport {
    fn handshake(&self) -> BoxFuture<'_, PanelResult<()>> {
        async move {
            if self.accept_handshake.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(PanelError::Transport("handshake refused".to_string()))
            }
        }
        .boxed()
    }

    fn call(&self, call: BackendCall) -> BoxFuture<'_, PanelResult<Value>> {
        async move {
            let op = call.op_name();
            lock(&self.calls).push(call.clone());
            let _in_flight = InFlight::enter(op, &self.in_flight);
            // Replies never arrive in the same poll that sent the request.
            tokio::task::yield_now().await;
            if lock(&self.stalled).contains(op) {
                std::future::pending::<()>().await;
            }
            let delay = lock(&self.delays).get(op).copied();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if lock(&self.failing).contains(op) {
                return Err(PanelError::Backend {
                    code: ErrorCode::InternalError,
                    msg: format!("{op} unavailable"),
                });
            }
            lock(&self.sim)
                .handle(&call)
                .map_err(|e| PanelError::Backend {
                    code: e.code,
                    msg: e.msg,
                })
        }
        .boxed()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Serves one websocket client against `sim` until it disconnects.
pub async fn serve_websocket<S>(
    stream: S,
    sim: Arc<Mutex<SimBackend>>,
    session_token: String,
) -> PanelResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut ws = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| PanelError::Transport(e.to_string()))?;
    send_server_message(
        &mut ws,
        &ServerMessage::Handshake {
            session_token: session_token.clone(),
            version: PROTOCOL_VERSION,
        },
    )
    .await?;

    let mut acked = false;
    while let Some(msg) = ws.next().await {
        let text = match msg.map_err(|e| PanelError::Transport(e.to_string()))? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let cmd: ClientCommand = match serde_json::from_str(text.as_str()) {
            Ok(cmd) => cmd,
            Err(e) => {
                let reply = ServerMessage::Error {
                    call_id: None,
                    msg: format!("invalid command: {e}"),
                    code: ErrorCode::InvalidCommand,
                };
                send_server_message(&mut ws, &reply).await?;
                continue;
            }
        };
        let call_id = match &cmd {
            ClientCommand::Call { call_id, .. } => Some(*call_id),
            ClientCommand::HandshakeAck { .. } => None,
        };
        if cmd.session_token() != session_token {
            let reply = ServerMessage::Error {
                call_id,
                msg: "invalid session token".to_string(),
                code: ErrorCode::Unauthorized,
            };
            send_server_message(&mut ws, &reply).await?;
            continue;
        }

        match cmd {
            ClientCommand::HandshakeAck { .. } => {
                acked = true;
                info!("client acknowledged session");
            }
            ClientCommand::Call { call_id, call, .. } => {
                let reply = if !acked {
                    ServerMessage::Error {
                        call_id: Some(call_id),
                        msg: "handshake not acknowledged".to_string(),
                        code: ErrorCode::NotReady,
                    }
                } else {
                    debug!("call {call_id}: {}", call.op_name());
                    let result = lock(&sim).handle(&call);
                    match result {
                        Ok(value) => ServerMessage::Reply { call_id, value },
                        Err(e) => ServerMessage::Error {
                            call_id: Some(call_id),
                            msg: e.msg,
                            code: e.code,
                        },
                    }
                };
                send_server_message(&mut ws, &reply).await?;
            }
        }
    }
    Ok(())
}

async fn send_server_message<S>(ws: &mut WebSocketStream<S>, msg: &ServerMessage) -> PanelResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let payload = serde_json::to_string(msg).map_err(|e| PanelError::Transport(e.to_string()))?;
    ws.send(Message::Text(payload.into()))
        .await
        .map_err(|e| PanelError::Transport(e.to_string()))
}
