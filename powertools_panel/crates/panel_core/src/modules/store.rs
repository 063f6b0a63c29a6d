use crate::modules::protocol::{
    DevMessage, MinMax, SettingsLimits, StoreMetadata, VariantInfo,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::warn;

/// Every value the panel shares with presentation code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StoreKey {
    BackendInfo,
    DriverInfo,
    LimitsInfo,

    CurrentBatt,
    ChargeRateBatt,
    ChargeModeBatt,
    ChargeLimitBatt,
    ChargeNowBatt,
    ChargeFullBatt,
    ChargeDesignBatt,
    ChargePowerBatt,

    OnlineCpus,
    OnlineStatusCpus,
    SmtCpu,
    ClockMinCpu,
    ClockMaxCpu,
    ClockMinMaxCpu,
    GovernorCpu,

    FastPptGpu,
    SlowPptGpu,
    ClockMinGpu,
    ClockMaxGpu,
    SlowMemoryGpu,

    PersistentGen,
    NameGen,
    PathGen,
    VariantsGen,
    CurrentVariantGen,

    MessageList,

    InternalSteamId,
    InternalSteamUsername,
    StoreResults,
}

impl StoreKey {
    pub const ALL: [StoreKey; 32] = [
        StoreKey::BackendInfo,
        StoreKey::DriverInfo,
        StoreKey::LimitsInfo,
        StoreKey::CurrentBatt,
        StoreKey::ChargeRateBatt,
        StoreKey::ChargeModeBatt,
        StoreKey::ChargeLimitBatt,
        StoreKey::ChargeNowBatt,
        StoreKey::ChargeFullBatt,
        StoreKey::ChargeDesignBatt,
        StoreKey::ChargePowerBatt,
        StoreKey::OnlineCpus,
        StoreKey::OnlineStatusCpus,
        StoreKey::SmtCpu,
        StoreKey::ClockMinCpu,
        StoreKey::ClockMaxCpu,
        StoreKey::ClockMinMaxCpu,
        StoreKey::GovernorCpu,
        StoreKey::FastPptGpu,
        StoreKey::SlowPptGpu,
        StoreKey::ClockMinGpu,
        StoreKey::ClockMaxGpu,
        StoreKey::SlowMemoryGpu,
        StoreKey::PersistentGen,
        StoreKey::NameGen,
        StoreKey::PathGen,
        StoreKey::VariantsGen,
        StoreKey::CurrentVariantGen,
        StoreKey::MessageList,
        StoreKey::InternalSteamId,
        StoreKey::InternalSteamUsername,
        StoreKey::StoreResults,
    ];

    /// Identifier the presentation layer reads the value under.
    pub fn id(self) -> &'static str {
        match self {
            StoreKey::BackendInfo => "VINFO",
            StoreKey::DriverInfo => "GENERAL_provider",
            StoreKey::LimitsInfo => "LIMITS_all",
            StoreKey::CurrentBatt => "BATTERY_current_now",
            StoreKey::ChargeRateBatt => "BATTERY_charge_rate",
            StoreKey::ChargeModeBatt => "BATTERY_charge_mode",
            StoreKey::ChargeLimitBatt => "BATTERY_charge_limit",
            StoreKey::ChargeNowBatt => "BATTERY_charge_now",
            StoreKey::ChargeFullBatt => "BATTERY_charge_full",
            StoreKey::ChargeDesignBatt => "BATTERY_charge_design",
            StoreKey::ChargePowerBatt => "BATTERY_charge_power",
            StoreKey::OnlineCpus => "CPUs_online",
            StoreKey::OnlineStatusCpus => "CPUs_status_online",
            StoreKey::SmtCpu => "CPUs_SMT",
            StoreKey::ClockMinCpu => "CPUs_min_clock",
            StoreKey::ClockMaxCpu => "CPUs_max_clock",
            StoreKey::ClockMinMaxCpu => "CPUs_minmax_clocks",
            StoreKey::GovernorCpu => "CPUs_governor",
            StoreKey::FastPptGpu => "GPU_fastPPT",
            StoreKey::SlowPptGpu => "GPU_slowPPT",
            StoreKey::ClockMinGpu => "GPU_min_clock",
            StoreKey::ClockMaxGpu => "GPU_max_clock",
            StoreKey::SlowMemoryGpu => "GPU_slow_memory",
            StoreKey::PersistentGen => "GENERAL_persistent",
            StoreKey::NameGen => "GENERAL_name",
            StoreKey::PathGen => "GENERAL_path",
            StoreKey::VariantsGen => "GENERAL_setting_variants",
            StoreKey::CurrentVariantGen => "GENERAL_current_variant",
            StoreKey::MessageList => "MESSAGE_messages",
            StoreKey::InternalSteamId => "INTERNAL_steam_id",
            StoreKey::InternalSteamUsername => "INTERNAL_stream_username",
            StoreKey::StoreResults => "INTERNAL_store_results",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.id() == id)
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// A store key bound to the type of the value it holds.
pub struct Key<T> {
    pub raw: StoreKey,
    _ty: PhantomData<fn() -> T>,
}

impl<T> Key<T> {
    pub const fn new(raw: StoreKey) -> Self {
        Self {
            raw,
            _ty: PhantomData,
        }
    }
}

impl<T> Clone for Key<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Key<T> {}

impl<T> fmt::Debug for Key<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self.raw.id())
    }
}

pub mod keys {
    use super::*;

    pub const BACKEND_INFO: Key<String> = Key::new(StoreKey::BackendInfo);
    pub const DRIVER_INFO: Key<String> = Key::new(StoreKey::DriverInfo);
    pub const LIMITS_INFO: Key<SettingsLimits> = Key::new(StoreKey::LimitsInfo);

    pub const CURRENT_BATT: Key<Option<f64>> = Key::new(StoreKey::CurrentBatt);
    pub const CHARGE_RATE_BATT: Key<Option<u64>> = Key::new(StoreKey::ChargeRateBatt);
    pub const CHARGE_MODE_BATT: Key<Option<String>> = Key::new(StoreKey::ChargeModeBatt);
    pub const CHARGE_LIMIT_BATT: Key<Option<f64>> = Key::new(StoreKey::ChargeLimitBatt);
    pub const CHARGE_NOW_BATT: Key<Option<f64>> = Key::new(StoreKey::ChargeNowBatt);
    pub const CHARGE_FULL_BATT: Key<Option<f64>> = Key::new(StoreKey::ChargeFullBatt);
    pub const CHARGE_DESIGN_BATT: Key<Option<f64>> = Key::new(StoreKey::ChargeDesignBatt);
    pub const CHARGE_POWER_BATT: Key<Option<f64>> = Key::new(StoreKey::ChargePowerBatt);

    pub const ONLINE_CPUS: Key<usize> = Key::new(StoreKey::OnlineCpus);
    pub const ONLINE_STATUS_CPUS: Key<Vec<bool>> = Key::new(StoreKey::OnlineStatusCpus);
    pub const SMT_CPU: Key<bool> = Key::new(StoreKey::SmtCpu);
    pub const CLOCK_MIN_CPU: Key<Option<u64>> = Key::new(StoreKey::ClockMinCpu);
    pub const CLOCK_MAX_CPU: Key<Option<u64>> = Key::new(StoreKey::ClockMaxCpu);
    pub const CLOCK_MIN_MAX_CPU: Key<Vec<MinMax<u64>>> = Key::new(StoreKey::ClockMinMaxCpu);
    pub const GOVERNOR_CPU: Key<Vec<String>> = Key::new(StoreKey::GovernorCpu);

    pub const FAST_PPT_GPU: Key<Option<u64>> = Key::new(StoreKey::FastPptGpu);
    pub const SLOW_PPT_GPU: Key<Option<u64>> = Key::new(StoreKey::SlowPptGpu);
    pub const CLOCK_MIN_GPU: Key<Option<u64>> = Key::new(StoreKey::ClockMinGpu);
    pub const CLOCK_MAX_GPU: Key<Option<u64>> = Key::new(StoreKey::ClockMaxGpu);
    pub const SLOW_MEMORY_GPU: Key<Option<bool>> = Key::new(StoreKey::SlowMemoryGpu);

    pub const PERSISTENT_GEN: Key<bool> = Key::new(StoreKey::PersistentGen);
    pub const NAME_GEN: Key<String> = Key::new(StoreKey::NameGen);
    pub const PATH_GEN: Key<String> = Key::new(StoreKey::PathGen);
    pub const VARIANTS_GEN: Key<Vec<VariantInfo>> = Key::new(StoreKey::VariantsGen);
    pub const CURRENT_VARIANT_GEN: Key<VariantInfo> = Key::new(StoreKey::CurrentVariantGen);

    pub const MESSAGE_LIST: Key<Vec<DevMessage>> = Key::new(StoreKey::MessageList);

    pub const INTERNAL_STEAM_ID: Key<String> = Key::new(StoreKey::InternalSteamId);
    pub const INTERNAL_STEAM_USERNAME: Key<String> = Key::new(StoreKey::InternalSteamUsername);
    pub const STORE_RESULTS: Key<Vec<StoreMetadata>> = Key::new(StoreKey::StoreResults);
}

/// Last-known values keyed by [`StoreKey`].
///
/// Reads and writes are synchronous single-key operations. Every write bumps a
/// version counter that observers can follow through [`Store::subscribe`].
/// Entries are only ever replaced, never removed.
pub struct Store {
    values: Mutex<BTreeMap<StoreKey, Value>>,
    version: watch::Sender<u64>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            values: Mutex::new(BTreeMap::new()),
            version,
        }
    }

    fn values(&self) -> MutexGuard<'_, BTreeMap<StoreKey, Value>> {
        self.values.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns `None` when the key was never written or holds a value of
    /// another shape. A nullable key written as null reads back as `Some(None)`.
    pub fn get<T: DeserializeOwned>(&self, key: Key<T>) -> Option<T> {
        let raw = self.values().get(&key.raw).cloned()?;
        match serde_json::from_value(raw) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("store key {} holds an unexpected value: {e}", key.raw);
                None
            }
        }
    }

    pub fn set<T: Serialize>(&self, key: Key<T>, value: T) {
        match serde_json::to_value(value) {
            Ok(v) => self.set_raw(key.raw, v),
            Err(e) => warn!("store key {} rejected value: {e}", key.raw),
        }
    }

    pub fn set_raw(&self, key: StoreKey, value: Value) {
        self.values().insert(key, value);
        self.version.send_modify(|v| *v += 1);
    }

    pub fn get_raw(&self, key: StoreKey) -> Option<Value> {
        self.values().get(&key).cloned()
    }

    pub fn contains<T>(&self, key: Key<T>) -> bool {
        self.values().contains_key(&key.raw)
    }

    /// All populated entries keyed by their string id.
    pub fn snapshot(&self) -> BTreeMap<&'static str, Value> {
        self.values()
            .iter()
            .map(|(k, v)| (k.id(), v.clone()))
            .collect()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }
}
