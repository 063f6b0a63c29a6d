use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const PROTOCOL_VERSION: u32 = 1;

/// Requested variant id that the backend cannot parse as a `u64`, which makes
/// it allocate a fresh id for the variant being loaded.
pub const NEW_VARIANT_ID: &str = "new";

/// Variant id requested when an application is launched (its default variant).
pub const DEFAULT_VARIANT_ID: &str = "0";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeLimit<T> {
    pub min: T,
    pub max: T,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MinMax<T> {
    pub min: Option<T>,
    pub max: Option<T>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct SettingsLimits {
    pub battery: BatteryLimits,
    pub cpu: CpusLimits,
    pub gpu: GpuLimits,
    #[serde(default)]
    pub general: GeneralLimits,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct BatteryLimits {
    pub charge_current: Option<RangeLimit<u64>>,
    #[serde(default)]
    pub charge_current_step: u64,
    #[serde(default)]
    pub charge_modes: Vec<String>,
    pub charge_limit: Option<RangeLimit<f64>>,
    #[serde(default)]
    pub charge_limit_step: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct CpusLimits {
    #[serde(default)]
    pub cpus: Vec<CpuLimits>,
    pub count: usize,
    #[serde(default)]
    pub smt_capable: bool,
    #[serde(default)]
    pub governors: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct CpuLimits {
    pub clock_min_limits: Option<RangeLimit<u64>>,
    pub clock_max_limits: Option<RangeLimit<u64>>,
    #[serde(default)]
    pub clock_step: u64,
    #[serde(default)]
    pub governors: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct GpuLimits {
    pub fast_ppt_limits: Option<RangeLimit<u64>>,
    pub slow_ppt_limits: Option<RangeLimit<u64>>,
    #[serde(default)]
    pub ppt_step: u64,
    pub clock_min_limits: Option<RangeLimit<u64>>,
    pub clock_max_limits: Option<RangeLimit<u64>>,
    #[serde(default)]
    pub clock_step: u64,
    #[serde(default)]
    pub memory_control_capable: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct GeneralLimits {}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct VariantInfo {
    pub id: u64,
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PeriodicSnapshot {
    pub battery_current: Option<f64>,
    pub battery_charge_now: Option<f64>,
    pub battery_charge_full: Option<f64>,
    pub battery_charge_power: Option<f64>,
    pub settings_path: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StoreMetadata {
    /// Decimal u128; some JSON parsers cannot hold it as a number.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub steam_app_id: u32,
    pub steam_username: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DevMessage {
    pub id: Option<u64>,
    pub title: String,
    pub body: String,
    pub url: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct GpuPpt {
    pub fast: Option<u64>,
    pub slow: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    Busy,
    InvalidCommand,
    InvalidValue,
    NotReady,
    Unsupported,
    InternalError,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum BackendCall {
    GetLimits,
    GetInfo,
    GetDriverProviderName { domain: String },
    GetMessages { since: Option<u64> },
    GetPeriodicals,
    Log { level: LogLevel, msg: String },

    GetBatteryCurrent,
    GetBatteryChargeRate,
    GetBatteryChargeMode,
    GetBatteryChargeLimit,
    GetBatteryChargeNow,
    GetBatteryChargeFull,
    GetBatteryChargeDesign,
    GetBatteryChargePower,

    GetCpusOnline,
    GetCpuSmt,
    GetCpuClockLimits { index: usize },
    GetCpusGovernor,

    GetGpuPpt,
    GetGpuClockLimits,
    GetGpuSlowMemory,

    GetGeneralPersistent,
    SetGeneralPersistent { persistent: bool },
    GetGeneralSettingsName,
    GetGeneralSettingsPath,
    GetAllSettingVariants,
    GetCurrentSettingVariant,
    LoadGeneralSettings {
        app_id: String,
        name: String,
        variant_id: String,
        variant_name: Option<String>,
    },
    LoadGeneralSettingsVariant { variant_id: String, variant_name: String },
    LoadGeneralDefaultSettings,
    LoadGeneralSystemSettings,
    ForceApplySettings,
    WaitForComplete,

    SearchStoreByAppId { app_id: String },
    StoreDownloadById { id: String },
    StoreUpload { steam_id: String, steam_username: String },
}

impl BackendCall {
    /// Stable short name used in logs and decode errors.
    pub fn op_name(&self) -> &'static str {
        match self {
            BackendCall::GetLimits => "get_limits",
            BackendCall::GetInfo => "get_info",
            BackendCall::GetDriverProviderName { .. } => "get_driver_provider_name",
            BackendCall::GetMessages { .. } => "get_messages",
            BackendCall::GetPeriodicals => "get_periodicals",
            BackendCall::Log { .. } => "log",
            BackendCall::GetBatteryCurrent => "get_battery_current",
            BackendCall::GetBatteryChargeRate => "get_battery_charge_rate",
            BackendCall::GetBatteryChargeMode => "get_battery_charge_mode",
            BackendCall::GetBatteryChargeLimit => "get_battery_charge_limit",
            BackendCall::GetBatteryChargeNow => "get_battery_charge_now",
            BackendCall::GetBatteryChargeFull => "get_battery_charge_full",
            BackendCall::GetBatteryChargeDesign => "get_battery_charge_design",
            BackendCall::GetBatteryChargePower => "get_battery_charge_power",
            BackendCall::GetCpusOnline => "get_cpus_online",
            BackendCall::GetCpuSmt => "get_cpu_smt",
            BackendCall::GetCpuClockLimits { .. } => "get_cpu_clock_limits",
            BackendCall::GetCpusGovernor => "get_cpus_governor",
            BackendCall::GetGpuPpt => "get_gpu_ppt",
            BackendCall::GetGpuClockLimits => "get_gpu_clock_limits",
            BackendCall::GetGpuSlowMemory => "get_gpu_slow_memory",
            BackendCall::GetGeneralPersistent => "get_general_persistent",
            BackendCall::SetGeneralPersistent { .. } => "set_general_persistent",
            BackendCall::GetGeneralSettingsName => "get_general_settings_name",
            BackendCall::GetGeneralSettingsPath => "get_general_settings_path",
            BackendCall::GetAllSettingVariants => "get_all_setting_variants",
            BackendCall::GetCurrentSettingVariant => "get_current_setting_variant",
            BackendCall::LoadGeneralSettings { .. } => "load_general_settings",
            BackendCall::LoadGeneralSettingsVariant { .. } => "load_general_settings_variant",
            BackendCall::LoadGeneralDefaultSettings => "load_general_default_settings",
            BackendCall::LoadGeneralSystemSettings => "load_general_system_settings",
            BackendCall::ForceApplySettings => "force_apply_settings",
            BackendCall::WaitForComplete => "wait_for_complete",
            BackendCall::SearchStoreByAppId { .. } => "search_store_by_app_id",
            BackendCall::StoreDownloadById { .. } => "store_download_by_id",
            BackendCall::StoreUpload { .. } => "store_upload",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ServerMessage {
    Handshake {
        session_token: String,
        #[serde(default)]
        version: u32,
    },
    Reply {
        call_id: u64,
        #[serde(default)]
        value: serde_json::Value,
    },
    Error {
        #[serde(default)]
        call_id: Option<u64>,
        msg: String,
        code: ErrorCode,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ClientCommand {
    HandshakeAck { session_token: String },
    Call {
        session_token: String,
        call_id: u64,
        call: BackendCall,
    },
}

impl ClientCommand {
    pub fn session_token(&self) -> &str {
        match self {
            ClientCommand::HandshakeAck { session_token } => session_token,
            ClientCommand::Call { session_token, .. } => session_token,
        }
    }
}
