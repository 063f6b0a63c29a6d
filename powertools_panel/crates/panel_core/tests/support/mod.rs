#![allow(dead_code)]

use panel_core::config::PanelConfig;
use panel_core::context::RenderCause;
use panel_core::host::HostHub;
use panel_core::panel::Panel;
use panel_core::sim::{LoopbackTransport, SimBackend};
use panel_core::transport::Transport;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct Harness {
    pub panel: Arc<Panel>,
    pub transport: Arc<LoopbackTransport>,
    pub host: Arc<HostHub>,
    pub renders: Arc<Mutex<Vec<RenderCause>>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(PanelConfig::default(), SimBackend::steam_deck(), HostHub::new())
    }

    pub fn with(config: PanelConfig, sim: SimBackend, host: HostHub) -> Self {
        let transport = Arc::new(LoopbackTransport::new(sim));
        let host = Arc::new(host);
        let dyn_transport: Arc<dyn Transport> = transport.clone();
        let panel = Arc::new(Panel::new(config, dyn_transport, host.clone()).expect("panel"));
        let renders = Arc::new(Mutex::new(Vec::new()));
        let sink = renders.clone();
        panel.install_observer(Arc::new(move |cause| sink.lock().unwrap().push(cause)));
        Self {
            panel,
            transport,
            host,
            renders,
        }
    }

    pub fn renders(&self) -> Vec<RenderCause> {
        self.renders.lock().unwrap().clone()
    }

    pub fn profile_changes(&self) -> usize {
        self.renders()
            .into_iter()
            .filter(|c| *c == RenderCause::ProfileChange)
            .count()
    }
}

/// Lets every spawned task run to its next timer.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}
