use crate::modules::context::PanelContext;
use crate::modules::error::PanelResult;
use crate::modules::host::{Host, ModalHandle};
use crate::modules::protocol::{VariantInfo, NEW_VARIANT_ID};
use crate::modules::reload::ReloadEngine;
use crate::modules::store::keys;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum SelectorState {
    /// A variant switch is in flight; show a spinner instead of the selector.
    Busy,
    Ready {
        options: Vec<VariantInfo>,
        selected: Option<VariantInfo>,
        default_label: Option<String>,
    },
}

/// Create/select of settings variants within the active profile.
pub struct VariantManager {
    ctx: Arc<PanelContext>,
    host: Arc<dyn Host>,
    reload: Arc<ReloadEngine>,
}

impl VariantManager {
    pub fn new(ctx: Arc<PanelContext>, host: Arc<dyn Host>, reload: Arc<ReloadEngine>) -> Self {
        Self { ctx, host, reload }
    }

    pub fn selector_state(&self) -> SelectorState {
        if self.ctx.variant_loading() {
            return SelectorState::Busy;
        }
        let store = &self.ctx.store;
        let options = store.get(keys::VARIANTS_GEN).unwrap_or_default();
        let selected = store.get(keys::CURRENT_VARIANT_GEN);
        let default_label = selected
            .as_ref()
            .or_else(|| options.first())
            .map(|v| v.name.clone());
        SelectorState::Ready {
            options,
            selected,
            default_label,
        }
    }

    /// Switches to `target`. Returns `false` without contacting the backend
    /// when it is already the current variant.
    pub async fn select(&self, target: &VariantInfo) -> PanelResult<bool> {
        let current = self.ctx.store.get(keys::CURRENT_VARIANT_GEN);
        if current.is_some_and(|c| c.id == target.id) {
            debug!("variant {} already active", target.id);
            return Ok(false);
        }

        self.ctx.set_variant_loading(true);
        debug!("selecting variant {} ({})", target.id, target.name);
        let backend = &self.ctx.backend;
        if let Err(e) = backend
            .load_general_settings_variant(&target.id.to_string(), &target.name)
            .await
        {
            self.ctx.set_variant_loading(false);
            return Err(e);
        }
        self.reload.reload().await;
        self.ctx.set_variant_loading(false);
        backend.wait_for_complete().await?;
        self.ctx.observers.notify_profile_change();
        Ok(true)
    }

    /// Creates a variant named `name` and makes it current. The selector
    /// stays busy afterwards until something else clears the flag.
    pub async fn create(&self, name: &str, modal: Option<&dyn ModalHandle>) -> PanelResult<()> {
        if let Some(modal) = modal {
            modal.close();
        }
        self.ctx.set_variant_loading(true);
        debug!("creating variant {name:?}");
        self.host.open_quick_access();
        self.ctx
            .backend
            .load_general_settings_variant(NEW_VARIANT_ID, name)
            .await?;
        self.reload.reload_then_notify().await
    }
}
