use crate::modules::backend::BackendClient;
use crate::modules::catalog::{BackendCatalog, Catalog, HttpCatalog};
use crate::modules::config::{CatalogMode, PanelConfig};
use crate::modules::error::PanelResult;
use crate::modules::store::Store;
use crate::modules::transport::Transport;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderCause {
    /// Poll tick finished.
    Periodic,
    /// A profile load or variant switch completed.
    ProfileChange,
    /// System defaults were loaded from the panel.
    SystemDefaults,
}

pub type RenderTrigger = Arc<dyn Fn(RenderCause) + Send + Sync>;

/// The single observer slot presentation code hooks into.
#[derive(Default)]
pub struct Observers {
    trigger: Mutex<Option<RenderTrigger>>,
    fired: AtomicU64,
}

impl Observers {
    pub fn install(&self, trigger: RenderTrigger) {
        *self.trigger.lock().unwrap_or_else(|e| e.into_inner()) = Some(trigger);
    }

    pub fn clear(&self) {
        *self.trigger.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn render(&self, cause: RenderCause) {
        self.fired.fetch_add(1, Ordering::SeqCst);
        let trigger = self
            .trigger
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(trigger) = trigger {
            trigger(cause);
        }
    }

    pub fn notify_profile_change(&self) {
        self.render(RenderCause::ProfileChange);
    }

    /// Number of render requests so far, installed observer or not.
    pub fn fired(&self) -> u64 {
        self.fired.load(Ordering::SeqCst)
    }
}

/// State shared by every component of one panel instance.
pub struct PanelContext {
    pub config: PanelConfig,
    pub backend: Arc<BackendClient>,
    pub store: Arc<Store>,
    pub catalog: Arc<dyn Catalog>,
    pub observers: Observers,
    variant_loading: AtomicBool,
}

impl PanelContext {
    pub fn new(config: PanelConfig, transport: Arc<dyn Transport>) -> PanelResult<Self> {
        let backend = Arc::new(BackendClient::new(transport));
        let catalog: Arc<dyn Catalog> = match config.catalog_mode {
            CatalogMode::Backend => Arc::new(BackendCatalog::new(Arc::clone(&backend))),
            CatalogMode::Http => Arc::new(HttpCatalog::new(
                &config.catalog_url,
                Arc::clone(&backend),
            )?),
        };
        Ok(Self {
            config,
            backend,
            store: Arc::new(Store::new()),
            catalog,
            observers: Observers::default(),
            variant_loading: AtomicBool::new(false),
        })
    }

    pub fn variant_loading(&self) -> bool {
        self.variant_loading.load(Ordering::SeqCst)
    }

    pub fn set_variant_loading(&self, loading: bool) {
        self.variant_loading.store(loading, Ordering::SeqCst);
    }
}
