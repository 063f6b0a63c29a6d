use crate::modules::error::{PanelError, PanelResult};
use crate::modules::protocol::{
    BackendCall, DevMessage, GpuPpt, LogLevel, MinMax, PeriodicSnapshot, SettingsLimits,
    StoreMetadata, VariantInfo,
};
use crate::modules::transport::Transport;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Typed wrapper over every backend operation.
///
/// Holds the readiness flag: until [`BackendClient::init`] succeeds every
/// request fails fast with [`PanelError::NotReady`] without touching the
/// transport.
pub struct BackendClient {
    transport: Arc<dyn Transport>,
    ready: AtomicBool,
}

impl BackendClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            ready: AtomicBool::new(false),
        }
    }

    /// Performs the one-time handshake. Calling it again after success is a no-op.
    pub async fn init(&self) -> PanelResult<()> {
        if self.is_ready() {
            return Ok(());
        }
        self.transport.handshake().await?;
        self.ready.store(true, Ordering::SeqCst);
        info!("backend handshake complete");
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn request<T: DeserializeOwned>(&self, call: BackendCall) -> PanelResult<T> {
        if !self.is_ready() {
            return Err(PanelError::NotReady);
        }
        let op = call.op_name();
        let value = self.transport.call(call).await?;
        serde_json::from_value(value).map_err(|source| PanelError::Decode { op, source })
    }

    /// Fire-and-forget log line into the backend's log, mirrored to tracing.
    pub fn log(&self, level: LogLevel, msg: impl Into<String>) {
        let msg = msg.into();
        match level {
            LogLevel::Debug => debug!(target: "powertools::backend_log", "{msg}"),
            LogLevel::Info => info!(target: "powertools::backend_log", "{msg}"),
            LogLevel::Warn => warn!(target: "powertools::backend_log", "{msg}"),
            LogLevel::Error => error!(target: "powertools::backend_log", "{msg}"),
        }
        if !self.is_ready() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let transport = Arc::clone(&self.transport);
        handle.spawn(async move {
            if let Err(e) = transport.call(BackendCall::Log { level, msg }).await {
                debug!("backend log delivery failed: {e}");
            }
        });
    }

    pub async fn get_limits(&self) -> PanelResult<SettingsLimits> {
        self.request(BackendCall::GetLimits).await
    }

    pub async fn get_info(&self) -> PanelResult<String> {
        self.request(BackendCall::GetInfo).await
    }

    pub async fn get_driver_provider_name(&self, domain: &str) -> PanelResult<String> {
        self.request(BackendCall::GetDriverProviderName {
            domain: domain.to_string(),
        })
        .await
    }

    pub async fn get_messages(&self, since: Option<u64>) -> PanelResult<Vec<DevMessage>> {
        self.request(BackendCall::GetMessages { since }).await
    }

    pub async fn get_periodicals(&self) -> PanelResult<PeriodicSnapshot> {
        self.request(BackendCall::GetPeriodicals).await
    }

    // battery

    pub async fn get_battery_current(&self) -> PanelResult<f64> {
        self.request(BackendCall::GetBatteryCurrent).await
    }

    pub async fn get_battery_charge_rate(&self) -> PanelResult<Option<u64>> {
        self.request(BackendCall::GetBatteryChargeRate).await
    }

    pub async fn get_battery_charge_mode(&self) -> PanelResult<Option<String>> {
        self.request(BackendCall::GetBatteryChargeMode).await
    }

    pub async fn get_battery_charge_limit(&self) -> PanelResult<Option<f64>> {
        self.request(BackendCall::GetBatteryChargeLimit).await
    }

    pub async fn get_battery_charge_now(&self) -> PanelResult<f64> {
        self.request(BackendCall::GetBatteryChargeNow).await
    }

    pub async fn get_battery_charge_full(&self) -> PanelResult<f64> {
        self.request(BackendCall::GetBatteryChargeFull).await
    }

    pub async fn get_battery_charge_design(&self) -> PanelResult<f64> {
        self.request(BackendCall::GetBatteryChargeDesign).await
    }

    pub async fn get_battery_charge_power(&self) -> PanelResult<f64> {
        self.request(BackendCall::GetBatteryChargePower).await
    }

    // cpu

    pub async fn get_cpus_online(&self) -> PanelResult<Vec<bool>> {
        self.request(BackendCall::GetCpusOnline).await
    }

    pub async fn get_cpu_smt(&self) -> PanelResult<bool> {
        self.request(BackendCall::GetCpuSmt).await
    }

    pub async fn get_cpu_clock_limits(&self, index: usize) -> PanelResult<MinMax<u64>> {
        self.request(BackendCall::GetCpuClockLimits { index }).await
    }

    pub async fn get_cpus_governor(&self) -> PanelResult<Vec<String>> {
        self.request(BackendCall::GetCpusGovernor).await
    }

    // gpu

    pub async fn get_gpu_ppt(&self) -> PanelResult<GpuPpt> {
        self.request(BackendCall::GetGpuPpt).await
    }

    pub async fn get_gpu_clock_limits(&self) -> PanelResult<MinMax<u64>> {
        self.request(BackendCall::GetGpuClockLimits).await
    }

    pub async fn get_gpu_slow_memory(&self) -> PanelResult<Option<bool>> {
        self.request(BackendCall::GetGpuSlowMemory).await
    }

    // general

    pub async fn get_general_persistent(&self) -> PanelResult<bool> {
        self.request(BackendCall::GetGeneralPersistent).await
    }

    pub async fn set_general_persistent(&self, persistent: bool) -> PanelResult<bool> {
        self.request(BackendCall::SetGeneralPersistent { persistent })
            .await
    }

    pub async fn get_general_settings_name(&self) -> PanelResult<String> {
        self.request(BackendCall::GetGeneralSettingsName).await
    }

    pub async fn get_general_settings_path(&self) -> PanelResult<String> {
        self.request(BackendCall::GetGeneralSettingsPath).await
    }

    pub async fn get_all_setting_variants(&self) -> PanelResult<Vec<VariantInfo>> {
        self.request(BackendCall::GetAllSettingVariants).await
    }

    pub async fn get_current_setting_variant(&self) -> PanelResult<VariantInfo> {
        self.request(BackendCall::GetCurrentSettingVariant).await
    }

    pub async fn load_general_settings(
        &self,
        app_id: &str,
        name: &str,
        variant_id: &str,
        variant_name: Option<&str>,
    ) -> PanelResult<bool> {
        self.request(BackendCall::LoadGeneralSettings {
            app_id: app_id.to_string(),
            name: name.to_string(),
            variant_id: variant_id.to_string(),
            variant_name: variant_name.map(str::to_string),
        })
        .await
    }

    pub async fn load_general_settings_variant(
        &self,
        variant_id: &str,
        variant_name: &str,
    ) -> PanelResult<bool> {
        self.request(BackendCall::LoadGeneralSettingsVariant {
            variant_id: variant_id.to_string(),
            variant_name: variant_name.to_string(),
        })
        .await
    }

    pub async fn load_general_default_settings(&self) -> PanelResult<bool> {
        self.request(BackendCall::LoadGeneralDefaultSettings).await
    }

    pub async fn load_general_system_settings(&self) -> PanelResult<bool> {
        self.request(BackendCall::LoadGeneralSystemSettings).await
    }

    pub async fn force_apply_settings(&self) -> PanelResult<()> {
        self.request(BackendCall::ForceApplySettings).await
    }

    /// Resolves once the backend has finished applying pending settings.
    pub async fn wait_for_complete(&self) -> PanelResult<bool> {
        self.request(BackendCall::WaitForComplete).await
    }

    // catalog

    pub async fn search_store_by_app_id(&self, app_id: &str) -> PanelResult<Vec<StoreMetadata>> {
        self.request(BackendCall::SearchStoreByAppId {
            app_id: app_id.to_string(),
        })
        .await
    }

    pub async fn store_download_by_id(&self, id: &str) -> PanelResult<Vec<VariantInfo>> {
        self.request(BackendCall::StoreDownloadById { id: id.to_string() })
            .await
    }

    pub async fn store_upload(&self, steam_id: &str, steam_username: &str) -> PanelResult<()> {
        self.request(BackendCall::StoreUpload {
            steam_id: steam_id.to_string(),
            steam_username: steam_username.to_string(),
        })
        .await
    }
}
