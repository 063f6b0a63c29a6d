use crate::modules::context::PanelContext;
use crate::modules::error::PanelResult;
use crate::modules::host::{HookKind, Host, HostEvent, Registration};
use crate::modules::poller::Poller;
use crate::modules::protocol::DEFAULT_VARIANT_ID;
use crate::modules::reload::ReloadEngine;
use crate::modules::store::keys;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

#[derive(Default)]
struct Hooks {
    registrations: Vec<Box<dyn Registration>>,
    dispatchers: Vec<JoinHandle<()>>,
}

/// Turns host lifecycle events into profile loads, catalog refreshes and
/// delayed re-applies.
pub struct LifecycleRouter {
    ctx: Arc<PanelContext>,
    host: Arc<dyn Host>,
    reload: Arc<ReloadEngine>,
    poller: Arc<Poller>,
    hooks: Mutex<Hooks>,
}

impl LifecycleRouter {
    pub fn new(
        ctx: Arc<PanelContext>,
        host: Arc<dyn Host>,
        reload: Arc<ReloadEngine>,
        poller: Arc<Poller>,
    ) -> Self {
        Self {
            ctx,
            host,
            reload,
            poller,
            hooks: Mutex::new(Hooks::default()),
        }
    }

    fn hooks(&self) -> MutexGuard<'_, Hooks> {
        self.hooks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Subscribes to the four host hooks and arms the poller. With
    /// `autoclear` any previous subscriptions are dropped first, so repeated
    /// calls never stack handlers.
    pub fn register_callbacks(self: &Arc<Self>, autoclear: bool) -> PanelResult<()> {
        if autoclear {
            self.clear_hooks();
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut registrations: Vec<Box<dyn Registration>> = Vec::with_capacity(HookKind::ALL.len());
        for kind in HookKind::ALL {
            match self.host.register(kind, tx.clone()) {
                Ok(registration) => registrations.push(registration),
                Err(e) => {
                    for registration in registrations {
                        registration.unregister();
                    }
                    return Err(e);
                }
            }
        }
        drop(tx);

        let dispatcher = tokio::spawn(Arc::clone(self).dispatch(rx));
        {
            let mut hooks = self.hooks();
            hooks.registrations.extend(registrations);
            hooks.dispatchers.push(dispatcher);
        }

        let ctx = Arc::clone(&self.ctx);
        self.poller
            .periodicals_setup(Arc::new(move |cause| ctx.observers.render(cause)));
        info!("registered lifecycle callbacks");
        Ok(())
    }

    /// Drops every subscription, stops event handling (pending re-applies
    /// included) and cancels the poll timer.
    pub fn clear_hooks(&self) {
        self.poller.clear();
        let (registrations, dispatchers) = {
            let mut hooks = self.hooks();
            (
                std::mem::take(&mut hooks.registrations),
                std::mem::take(&mut hooks.dispatchers),
            )
        };
        for registration in registrations {
            registration.unregister();
        }
        for dispatcher in dispatchers {
            dispatcher.abort();
        }
        info!("unregistered lifecycle callbacks");
    }

    pub fn active_subscriptions(&self) -> usize {
        self.hooks().registrations.len()
    }

    async fn dispatch(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<HostEvent>) {
        // The host fires action-end once as soon as the hook is registered.
        let mut skip_action_end = true;
        let mut tasks = JoinSet::new();
        loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    if matches!(event, HostEvent::GameActionEnd { .. }) && skip_action_end {
                        skip_action_end = false;
                        debug!("ignoring action end fired at registration");
                        continue;
                    }
                    let router = Arc::clone(&self);
                    tasks.spawn(async move { router.handle(event).await });
                }
                Some(done) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = done {
                        if e.is_panic() {
                            warn!("lifecycle handler panicked: {e}");
                        }
                    }
                }
            }
        }
        while tasks.join_next().await.is_some() {}
    }

    /// Runs the handler for one event to completion.
    pub async fn handle(&self, event: HostEvent) {
        let result = match event {
            HostEvent::AppLifetime {
                app_id,
                running: false,
            } => self.on_app_stopped(app_id).await,
            HostEvent::AppLifetime {
                app_id,
                running: true,
            } => {
                debug!("app {app_id} started");
                Ok(())
            }
            HostEvent::GameActionStart {
                action_type,
                game_id,
            } => self.on_game_action_start(action_type, &game_id).await,
            HostEvent::GameActionEnd { action_type } => self.on_game_action_end(action_type).await,
            HostEvent::UserChanged {
                account_name,
                steam_id,
            } => self.on_user_changed(&account_name, &steam_id).await,
        };
        if let Err(e) = result {
            warn!("lifecycle handler failed: {e}");
        }
    }

    async fn on_app_stopped(&self, app_id: u32) -> PanelResult<()> {
        info!("app {app_id} stopped, loading default settings");
        let backend = &self.ctx.backend;
        let (chain, _) = tokio::join!(
            async {
                backend.load_general_default_settings().await?;
                self.reload.reload_then_notify().await
            },
            self.refresh_catalog(&self.ctx.config.main_app_id),
        );
        chain
    }

    async fn on_game_action_start(&self, action_type: u32, game_id: &str) -> PanelResult<()> {
        let Some(app) = self.host.app_overview(game_id) else {
            warn!("no app metadata for game {game_id}");
            return Ok(());
        };
        info!(
            "game {} ({}) started, action {action_type}",
            app.display_name, app.app_id
        );
        let backend = &self.ctx.backend;
        let (chain, _) = tokio::join!(
            async {
                backend
                    .load_general_settings(&app.app_id, &app.display_name, DEFAULT_VARIANT_ID, None)
                    .await?;
                self.reload.reload_then_notify().await
            },
            self.refresh_catalog(&app.app_id),
        );
        chain
    }

    async fn on_game_action_end(&self, action_type: u32) -> PanelResult<()> {
        debug!("action {action_type} ended, re-applying in {:?}", self.ctx.config.reapply_wait);
        tokio::time::sleep(self.ctx.config.reapply_wait).await;
        self.ctx.backend.force_apply_settings().await?;
        info!("settings re-applied after action {action_type}");
        Ok(())
    }

    async fn on_user_changed(&self, account_name: &str, steam_id: &str) -> PanelResult<()> {
        let users = self.host.login_users().await?;
        let Some(user) = users.into_iter().find(|u| u.account_name == account_name) else {
            debug!("user {account_name} is not a known login user");
            return Ok(());
        };
        let display_name = user.persona_name.unwrap_or(user.account_name);
        info!("user changed to {display_name}");
        let store = &self.ctx.store;
        store.set(keys::INTERNAL_STEAM_ID, steam_id.to_string());
        store.set(keys::INTERNAL_STEAM_USERNAME, display_name);
        Ok(())
    }

    async fn refresh_catalog(&self, app_id: &str) {
        match self.ctx.catalog.search_by_app_id(app_id).await {
            Ok(results) => self.ctx.store.set(keys::STORE_RESULTS, results),
            Err(e) => warn!("catalog search for {app_id} failed: {e}"),
        }
    }
}
