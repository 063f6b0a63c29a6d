use crate::modules::context::{PanelContext, RenderCause, RenderTrigger};
use crate::modules::reload::ReloadEngine;
use crate::modules::store::keys;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Backend not ready yet.
    Skipped,
    Unchanged,
    /// The active settings file changed under us and a reload ran.
    PathChanged,
    Failed,
}

/// Fixed-period poll of the cheap battery values and the settings path.
pub struct Poller {
    ctx: Arc<PanelContext>,
    reload: Arc<ReloadEngine>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Poller {
    pub fn new(ctx: Arc<PanelContext>, reload: Arc<ReloadEngine>) -> Self {
        Self {
            ctx,
            reload,
            timer: Mutex::new(None),
        }
    }

    fn timer(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.timer.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Arms the poll timer, replacing any timer already running. The first
    /// tick fires one full period from now. Every tick renders, even while a
    /// slow poll from an earlier tick is still waiting on the backend.
    pub fn periodicals_setup(self: &Arc<Self>, render: RenderTrigger) {
        let mut timer = self.timer();
        if let Some(old) = timer.take() {
            old.abort();
        }
        let period = self.ctx.config.poll_period;
        let poller = Arc::clone(self);
        *timer = Some(tokio::spawn(async move {
            let mut ticks = tokio::time::interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Dropped with the timer task, which aborts a poll still running.
            let mut polls: JoinSet<PollOutcome> = JoinSet::new();
            loop {
                ticks.tick().await;
                while polls.try_join_next().is_some() {}
                if polls.is_empty() {
                    let poller = Arc::clone(&poller);
                    polls.spawn(async move { poller.poll_once().await });
                    // Render fresh values if they land within half a period.
                    let _ = tokio::time::timeout(period / 2, polls.join_next()).await;
                } else {
                    debug!("previous poll still running, skipping this tick");
                }
                render(RenderCause::Periodic);
            }
        }));
        debug!("periodic poll armed every {period:?}");
    }

    pub fn clear(&self) {
        if let Some(old) = self.timer().take() {
            old.abort();
            debug!("periodic poll cancelled");
        }
    }

    pub fn is_armed(&self) -> bool {
        self.timer().as_ref().is_some_and(|h| !h.is_finished())
    }

    /// One timer tick: poll, then render whatever the outcome.
    pub async fn tick(&self, render: &RenderTrigger) -> PollOutcome {
        let outcome = self.poll_once().await;
        render(RenderCause::Periodic);
        outcome
    }

    pub async fn poll_once(&self) -> PollOutcome {
        if !self.ctx.backend.is_ready() {
            return PollOutcome::Skipped;
        }
        let snapshot = match self.ctx.backend.get_periodicals().await {
            Ok(s) => s,
            Err(e) => {
                debug!("get_periodicals failed: {e}");
                return PollOutcome::Failed;
            }
        };

        let store = &self.ctx.store;
        store.set(keys::CURRENT_BATT, snapshot.battery_current);
        store.set(keys::CHARGE_NOW_BATT, snapshot.battery_charge_now);
        store.set(keys::CHARGE_FULL_BATT, snapshot.battery_charge_full);
        store.set(keys::CHARGE_POWER_BATT, snapshot.battery_charge_power);

        let previous = store.get(keys::PATH_GEN);
        let changed = previous.as_deref() != Some(snapshot.settings_path.as_str());
        store.set(keys::PATH_GEN, snapshot.settings_path.clone());
        if !changed {
            return PollOutcome::Unchanged;
        }
        info!(
            "settings path changed {:?} -> {:?}, reloading",
            previous, snapshot.settings_path
        );
        self.reload.reload().await;
        PollOutcome::PathChanged
    }
}
