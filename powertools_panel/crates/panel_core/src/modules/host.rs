use crate::modules::error::{PanelError, PanelResult};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc;

/// Lifecycle notifications delivered by the host shell.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum HostEvent {
    AppLifetime { app_id: u32, running: bool },
    GameActionStart { action_type: u32, game_id: String },
    GameActionEnd { action_type: u32 },
    UserChanged { account_name: String, steam_id: String },
}

impl HostEvent {
    pub fn kind(&self) -> HookKind {
        match self {
            HostEvent::AppLifetime { .. } => HookKind::AppLifetime,
            HostEvent::GameActionStart { .. } => HookKind::GameActionStart,
            HostEvent::GameActionEnd { .. } => HookKind::GameActionEnd,
            HostEvent::UserChanged { .. } => HookKind::UserChanged,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    AppLifetime,
    GameActionStart,
    GameActionEnd,
    UserChanged,
}

impl HookKind {
    pub const ALL: [HookKind; 4] = [
        HookKind::AppLifetime,
        HookKind::GameActionStart,
        HookKind::GameActionEnd,
        HookKind::UserChanged,
    ];
}

pub type EventSink = mpsc::UnboundedSender<HostEvent>;

/// Handle of one active subscription.
pub trait Registration: Send {
    fn unregister(self: Box<Self>);
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AppOverview {
    pub app_id: String,
    pub display_name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LoginUser {
    pub account_name: String,
    pub persona_name: Option<String>,
}

/// A dialog the host is showing on the panel's behalf.
pub trait ModalHandle: Send + Sync {
    fn close(&self);
}

/// The host shell the panel is embedded in.
pub trait Host: Send + Sync {
    fn register(&self, kind: HookKind, sink: EventSink) -> PanelResult<Box<dyn Registration>>;

    /// Resolves a running game's id to its application metadata.
    fn app_overview(&self, game_id: &str) -> Option<AppOverview>;

    fn login_users(&self) -> BoxFuture<'_, PanelResult<Vec<LoginUser>>>;

    /// Returns focus to the quick-access menu.
    fn open_quick_access(&self);
}

struct Subscription {
    id: u64,
    kind: HookKind,
    sink: EventSink,
}

#[derive(Default)]
struct HubState {
    next_id: u64,
    subscriptions: Vec<Subscription>,
    overviews: HashMap<String, AppOverview>,
    login_users: Vec<LoginUser>,
    quick_access_opened: usize,
    refuse: Option<HookKind>,
}

/// In-process host: events are injected with [`HostHub::emit`].
///
/// Like the real shell, it fires one action-end notification right after an
/// action-end subscription is registered.
pub struct HostHub {
    state: Arc<Mutex<HubState>>,
    fire_action_end_on_register: bool,
}

impl Default for HostHub {
    fn default() -> Self {
        Self::new()
    }
}

impl HostHub {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState::default())),
            fire_action_end_on_register: true,
        }
    }

    pub fn without_initial_action_end(mut self) -> Self {
        self.fire_action_end_on_register = false;
        self
    }

    fn state(&self) -> MutexGuard<'_, HubState> {
        lock(&self.state)
    }

    pub fn add_app(&self, game_id: impl Into<String>, overview: AppOverview) {
        self.state().overviews.insert(game_id.into(), overview);
    }

    pub fn add_login_user(&self, user: LoginUser) {
        self.state().login_users.push(user);
    }

    /// Makes the next registration of `kind` fail.
    pub fn refuse_registration(&self, kind: HookKind) {
        self.state().refuse = Some(kind);
    }

    /// Delivers an event to every matching subscriber; returns how many got it.
    pub fn emit(&self, event: HostEvent) -> usize {
        let kind = event.kind();
        let state = self.state();
        state
            .subscriptions
            .iter()
            .filter(|s| s.kind == kind)
            .filter(|s| s.sink.send(event.clone()).is_ok())
            .count()
    }

    pub fn active_subscriptions(&self) -> usize {
        self.state().subscriptions.len()
    }

    pub fn subscriptions_of(&self, kind: HookKind) -> usize {
        self.state()
            .subscriptions
            .iter()
            .filter(|s| s.kind == kind)
            .count()
    }

    pub fn quick_access_opened(&self) -> usize {
        self.state().quick_access_opened
    }
}

impl Host for HostHub {
    fn register(&self, kind: HookKind, sink: EventSink) -> PanelResult<Box<dyn Registration>> {
        let mut state = self.state();
        if state.refuse == Some(kind) {
            state.refuse = None;
            return Err(PanelError::Host(format!("{kind:?} registration refused")));
        }
        let id = state.next_id;
        state.next_id += 1;
        if kind == HookKind::GameActionEnd && self.fire_action_end_on_register {
            let _ = sink.send(HostEvent::GameActionEnd { action_type: 0 });
        }
        state.subscriptions.push(Subscription { id, kind, sink });
        Ok(Box::new(HubRegistration {
            id,
            state: Arc::downgrade(&self.state),
        }))
    }

    fn app_overview(&self, game_id: &str) -> Option<AppOverview> {
        self.state().overviews.get(game_id).cloned()
    }

    fn login_users(&self) -> BoxFuture<'_, PanelResult<Vec<LoginUser>>> {
        let users = self.state().login_users.clone();
        async move { Ok(users) }.boxed()
    }

    fn open_quick_access(&self) {
        self.state().quick_access_opened += 1;
    }
}

struct HubRegistration {
    id: u64,
    state: Weak<Mutex<HubState>>,
}

impl Registration for HubRegistration {
    fn unregister(self: Box<Self>) {
        if let Some(state) = self.state.upgrade() {
            lock(&state).subscriptions.retain(|s| s.id != self.id);
        }
    }
}

fn lock(state: &Mutex<HubState>) -> MutexGuard<'_, HubState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}
