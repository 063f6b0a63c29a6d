use crate::modules::context::PanelContext;
use crate::modules::error::PanelResult;
use crate::modules::protocol::{LogLevel, MinMax};
use crate::modules::store::keys;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Full refresh of every store key from the backend.
///
/// Batches never overlap. A caller that queued behind a running batch is
/// answered by the next batch to start, and skips its own when a batch that
/// started after its request has already finished.
pub struct ReloadEngine {
    ctx: Arc<PanelContext>,
    gate: Mutex<()>,
    requested: AtomicU64,
    completed: AtomicU64,
    batches: AtomicU64,
}

impl ReloadEngine {
    pub fn new(ctx: Arc<PanelContext>) -> Self {
        Self {
            ctx,
            gate: Mutex::new(()),
            requested: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            batches: AtomicU64::new(0),
        }
    }

    pub async fn reload(&self) {
        if !self.ctx.backend.is_ready() {
            debug!("reload skipped: backend not ready");
            return;
        }
        let ticket = self.requested.fetch_add(1, Ordering::SeqCst) + 1;
        let _gate = self.gate.lock().await;
        if self.completed.load(Ordering::SeqCst) >= ticket {
            debug!("reload #{ticket} served by a newer batch");
            return;
        }
        // Requests up to here are all answered by this batch.
        let covers = self.requested.load(Ordering::SeqCst);
        self.batches.fetch_add(1, Ordering::SeqCst);
        self.run_batch().await;
        self.completed.store(covers, Ordering::SeqCst);
    }

    /// Reload, wait for the backend to finish applying, then tell observers.
    pub async fn reload_then_notify(&self) -> PanelResult<()> {
        self.reload().await;
        self.ctx.backend.wait_for_complete().await?;
        self.ctx.observers.notify_profile_change();
        Ok(())
    }

    /// Number of batches actually issued.
    pub fn batches_started(&self) -> u64 {
        self.batches.load(Ordering::SeqCst)
    }

    async fn run_batch(&self) {
        let backend = &self.ctx.backend;
        let store = &self.ctx.store;
        let main_app_id = self.ctx.config.main_app_id.as_str();
        let need_results = !store.contains(keys::STORE_RESULTS);

        tokio::join!(
            self.limits_and_cpu_clocks(),
            async {
                if need_results {
                    settle(
                        "search_store_by_app_id",
                        self.ctx.catalog.search_by_app_id(main_app_id),
                        |r| store.set(keys::STORE_RESULTS, r),
                    )
                    .await;
                }
            },
            settle("get_battery_current", backend.get_battery_current(), |v| {
                store.set(keys::CURRENT_BATT, Some(v))
            }),
            settle("get_battery_charge_rate", backend.get_battery_charge_rate(), |v| {
                store.set(keys::CHARGE_RATE_BATT, v)
            }),
            settle("get_battery_charge_mode", backend.get_battery_charge_mode(), |v| {
                store.set(keys::CHARGE_MODE_BATT, v)
            }),
            settle("get_battery_charge_limit", backend.get_battery_charge_limit(), |v| {
                store.set(keys::CHARGE_LIMIT_BATT, v)
            }),
            settle("get_battery_charge_now", backend.get_battery_charge_now(), |v| {
                store.set(keys::CHARGE_NOW_BATT, Some(v))
            }),
            settle("get_battery_charge_full", backend.get_battery_charge_full(), |v| {
                store.set(keys::CHARGE_FULL_BATT, Some(v))
            }),
            settle("get_battery_charge_design", backend.get_battery_charge_design(), |v| {
                store.set(keys::CHARGE_DESIGN_BATT, Some(v))
            }),
            settle("get_battery_charge_power", backend.get_battery_charge_power(), |v| {
                store.set(keys::CHARGE_POWER_BATT, Some(v))
            }),
            settle("get_cpus_online", backend.get_cpus_online(), |online| {
                store.set(keys::ONLINE_CPUS, count_cpus(&online));
                store.set(keys::ONLINE_STATUS_CPUS, online);
            }),
            settle("get_cpu_smt", backend.get_cpu_smt(), |v| {
                store.set(keys::SMT_CPU, v)
            }),
            settle("get_cpus_governor", backend.get_cpus_governor(), |governors| {
                backend.log(LogLevel::Info, format!("cpu governors: {governors:?}"));
                store.set(keys::GOVERNOR_CPU, governors);
            }),
            settle("get_gpu_ppt", backend.get_gpu_ppt(), |ppt| {
                store.set(keys::FAST_PPT_GPU, ppt.fast);
                store.set(keys::SLOW_PPT_GPU, ppt.slow);
            }),
            settle("get_gpu_clock_limits", backend.get_gpu_clock_limits(), |clocks| {
                store.set(keys::CLOCK_MIN_GPU, clocks.min);
                store.set(keys::CLOCK_MAX_GPU, clocks.max);
            }),
            settle("get_gpu_slow_memory", backend.get_gpu_slow_memory(), |v| {
                store.set(keys::SLOW_MEMORY_GPU, v)
            }),
            settle("get_general_persistent", backend.get_general_persistent(), |v| {
                store.set(keys::PERSISTENT_GEN, v)
            }),
            settle("get_general_settings_name", backend.get_general_settings_name(), |v| {
                store.set(keys::NAME_GEN, v)
            }),
            settle("get_general_settings_path", backend.get_general_settings_path(), |v| {
                store.set(keys::PATH_GEN, v)
            }),
            settle("get_all_setting_variants", backend.get_all_setting_variants(), |v| {
                store.set(keys::VARIANTS_GEN, v)
            }),
            settle("get_current_setting_variant", backend.get_current_setting_variant(), |v| {
                store.set(keys::CURRENT_VARIANT_GEN, v)
            }),
            settle("get_info", backend.get_info(), |v| {
                store.set(keys::BACKEND_INFO, v)
            }),
            settle("get_driver_provider_name", backend.get_driver_provider_name("gpu"), |v| {
                store.set(keys::DRIVER_INFO, v)
            }),
            settle("get_messages", backend.get_messages(None), |v| {
                store.set(keys::MESSAGE_LIST, v)
            }),
        );
    }

    // Limits land before the fan-out so it sees this batch's core count.
    async fn limits_and_cpu_clocks(&self) {
        let backend = &self.ctx.backend;
        let store = &self.ctx.store;
        let (_, clocks_ok) = tokio::join!(
            settle("get_limits", backend.get_limits(), |v| {
                store.set(keys::LIMITS_INFO, v)
            }),
            settle("get_cpu_clock_limits", backend.get_cpu_clock_limits(0), |clocks| {
                store.set(keys::CLOCK_MIN_CPU, clocks.min);
                store.set(keys::CLOCK_MAX_CPU, clocks.max);
            }),
        );
        if clocks_ok {
            self.sync_pleb_clock_to_advanced();
        }
    }

    /// Copies the global CPU clock limits into the per-core array.
    pub fn sync_pleb_clock_to_advanced(&self) {
        let store = &self.ctx.store;
        let Some(limits) = store.get(keys::LIMITS_INFO) else {
            debug!("clock fan-out skipped: limits unknown");
            return;
        };
        let min = store.get(keys::CLOCK_MIN_CPU).flatten();
        let max = store.get(keys::CLOCK_MAX_CPU).flatten();
        store.set(
            keys::CLOCK_MIN_MAX_CPU,
            fan_out_clock_limits(limits.cpu.count, min, max),
        );
    }
}

pub fn fan_out_clock_limits(count: usize, min: Option<u64>, max: Option<u64>) -> Vec<MinMax<u64>> {
    vec![MinMax { min, max }; count]
}

pub fn count_cpus(online: &[bool]) -> usize {
    online.iter().filter(|on| **on).count()
}

/// Awaits one backend call and applies its value; failures are logged and
/// leave the previous value in place.
pub(crate) async fn settle<T, F, A>(op: &'static str, fut: F, apply: A) -> bool
where
    F: Future<Output = PanelResult<T>>,
    A: FnOnce(T),
{
    match fut.await {
        Ok(v) => {
            apply(v);
            true
        }
        Err(e) => {
            debug!("{op} failed: {e}");
            false
        }
    }
}
