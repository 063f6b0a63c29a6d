use crate::modules::config::PanelConfig;
use crate::modules::context::{PanelContext, RenderCause, RenderTrigger};
use crate::modules::error::PanelResult;
use crate::modules::host::Host;
use crate::modules::lifecycle::LifecycleRouter;
use crate::modules::poller::Poller;
use crate::modules::protocol::{LogLevel, StoreMetadata, VariantInfo};
use crate::modules::reload::ReloadEngine;
use crate::modules::store::{keys, Store};
use crate::modules::transport::Transport;
use crate::modules::variants::VariantManager;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupStatus {
    /// No handshake or no limits yet; offer a manual reload.
    Failed,
    Ready,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CatalogView {
    Failed,
    Empty,
    Results(Vec<StoreMetadata>),
}

/// One mounted panel: owns the shared context and every component.
pub struct Panel {
    ctx: Arc<PanelContext>,
    reload: Arc<ReloadEngine>,
    poller: Arc<Poller>,
    router: Arc<LifecycleRouter>,
    variants: VariantManager,
}

impl Panel {
    pub fn new(
        config: PanelConfig,
        transport: Arc<dyn Transport>,
        host: Arc<dyn Host>,
    ) -> PanelResult<Self> {
        let ctx = Arc::new(PanelContext::new(config, transport)?);
        let reload = Arc::new(ReloadEngine::new(Arc::clone(&ctx)));
        let poller = Arc::new(Poller::new(Arc::clone(&ctx), Arc::clone(&reload)));
        let router = Arc::new(LifecycleRouter::new(
            Arc::clone(&ctx),
            Arc::clone(&host),
            Arc::clone(&reload),
            Arc::clone(&poller),
        ));
        let variants = VariantManager::new(Arc::clone(&ctx), host, Arc::clone(&reload));
        Ok(Self {
            ctx,
            reload,
            poller,
            router,
            variants,
        })
    }

    pub fn context(&self) -> &Arc<PanelContext> {
        &self.ctx
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.ctx.store
    }

    pub fn reload_engine(&self) -> &Arc<ReloadEngine> {
        &self.reload
    }

    pub fn poller(&self) -> &Arc<Poller> {
        &self.poller
    }

    pub fn router(&self) -> &Arc<LifecycleRouter> {
        &self.router
    }

    pub fn variants(&self) -> &VariantManager {
        &self.variants
    }

    pub fn install_observer(&self, trigger: RenderTrigger) {
        self.ctx.observers.install(trigger);
    }

    /// Handshake, first reload, then hook registration.
    pub async fn start(&self) -> PanelResult<()> {
        self.ctx.backend.init().await?;
        self.reload.reload().await;
        self.router.register_callbacks(true)?;
        self.ctx.backend.log(LogLevel::Debug, "panel started");
        Ok(())
    }

    pub fn shutdown(&self) {
        self.ctx.observers.clear();
        self.ctx.backend.log(LogLevel::Debug, "panel shutting down");
        self.router.clear_hooks();
    }

    pub fn startup_status(&self) -> StartupStatus {
        if self.ctx.backend.is_ready() && self.ctx.store.contains(keys::LIMITS_INFO) {
            StartupStatus::Ready
        } else {
            StartupStatus::Failed
        }
    }

    /// Retry path offered when startup failed. Finishes whatever `start`
    /// did not get to, hook registration included.
    pub async fn manual_reload(&self) -> PanelResult<()> {
        if !self.ctx.backend.is_ready() {
            self.ctx.backend.init().await?;
        }
        self.reload.reload_then_notify().await?;
        if self.router.active_subscriptions() == 0 {
            self.router.register_callbacks(true)?;
            info!("lifecycle hooks registered on retry");
        }
        Ok(())
    }

    pub async fn reapply_settings(&self) -> PanelResult<()> {
        debug!("re-applying settings");
        self.ctx.backend.force_apply_settings().await
    }

    /// Drops the persistent profile and loads the system settings.
    pub async fn load_defaults(&self) -> PanelResult<()> {
        let backend = &self.ctx.backend;
        let persistent = backend.set_general_persistent(false).await?;
        self.ctx.store.set(keys::PERSISTENT_GEN, persistent);
        backend.load_general_system_settings().await?;
        self.reload.reload().await;
        backend.wait_for_complete().await?;
        self.ctx.observers.render(RenderCause::SystemDefaults);
        Ok(())
    }

    pub async fn set_persistent(&self, persistent: bool) -> PanelResult<bool> {
        debug!("persistent profile -> {persistent}");
        let value = self.ctx.backend.set_general_persistent(persistent).await?;
        self.ctx.store.set(keys::PERSISTENT_GEN, value);
        Ok(value)
    }

    /// Publishes the current variant under the logged-in user. Returns
    /// `false` when no user is known yet.
    pub async fn upload_current_variant(&self) -> PanelResult<bool> {
        let store = &self.ctx.store;
        let steam_id = store.get(keys::INTERNAL_STEAM_ID).filter(|s| !s.is_empty());
        let steam_name = store
            .get(keys::INTERNAL_STEAM_USERNAME)
            .filter(|s| !s.is_empty());
        let (Some(steam_id), Some(steam_name)) = (steam_id.as_deref(), steam_name.as_deref()) else {
            warn!(
                "cannot upload without a user (steam id missing: {}, username missing: {})",
                steam_id.is_none(),
                steam_name.is_none()
            );
            return Ok(false);
        };
        self.ctx.backend.store_upload(steam_id, steam_name).await?;
        info!("uploaded current variant as {steam_name}");
        Ok(true)
    }

    pub async fn download_catalog_entry(&self, meta: &StoreMetadata) -> PanelResult<Vec<VariantInfo>> {
        info!("downloading settings {} ({})", meta.name, meta.id);
        let variants = self.ctx.catalog.download_by_id(&meta.id).await?;
        self.ctx.store.set(keys::VARIANTS_GEN, variants.clone());
        self.ctx.observers.notify_profile_change();
        Ok(variants)
    }

    pub fn catalog_view(&self) -> CatalogView {
        match self.ctx.store.get(keys::STORE_RESULTS) {
            None => {
                warn!("catalog results failed to load");
                CatalogView::Failed
            }
            Some(results) if results.is_empty() => {
                warn!("catalog returned no results");
                CatalogView::Empty
            }
            Some(results) => CatalogView::Results(results),
        }
    }
}
