mod support;

use panel_core::config::PanelConfig;
use panel_core::host::{AppOverview, HostEvent, HostHub};
use panel_core::poller::PollOutcome;
use panel_core::protocol::{BackendCall, MinMax, VariantInfo};
use panel_core::reload::{count_cpus, fan_out_clock_limits};
use panel_core::sim::SimBackend;
use panel_core::store::keys;
use support::Harness;

#[tokio::test]
async fn reload_before_handshake_touches_nothing() {
    let h = Harness::new();
    h.panel.reload_engine().reload().await;

    assert!(h.transport.calls().is_empty());
    assert!(h.panel.store().snapshot().is_empty());
    assert_eq!(h.panel.reload_engine().batches_started(), 0);
}

#[tokio::test]
async fn reload_populates_store() {
    let h = Harness::new();
    h.panel.context().backend.init().await.unwrap();
    h.panel.reload_engine().reload().await;

    let store = h.panel.store();
    assert_eq!(store.get(keys::LIMITS_INFO).unwrap().cpu.count, 8);
    assert_eq!(store.get(keys::ONLINE_CPUS), Some(8));
    assert_eq!(store.get(keys::ONLINE_STATUS_CPUS).unwrap().len(), 8);
    assert_eq!(store.get(keys::CLOCK_MIN_CPU), Some(Some(1400)));
    assert_eq!(store.get(keys::CLOCK_MAX_CPU), Some(Some(3500)));
    assert_eq!(
        store.get(keys::CLOCK_MIN_MAX_CPU).unwrap(),
        vec![
            MinMax {
                min: Some(1400),
                max: Some(3500)
            };
            8
        ]
    );
    assert_eq!(store.get(keys::FAST_PPT_GPU), Some(Some(15)));
    assert_eq!(store.get(keys::SLOW_PPT_GPU), Some(Some(15)));
    assert_eq!(store.get(keys::PATH_GEN).as_deref(), Some("default_settings.ron"));
    assert_eq!(store.get(keys::NAME_GEN).as_deref(), Some("Main"));
    assert_eq!(
        store.get(keys::CURRENT_VARIANT_GEN),
        Some(VariantInfo {
            id: 0,
            name: "Primary".to_string()
        })
    );
    assert_eq!(store.get(keys::DRIVER_INFO).as_deref(), Some("SteamDeck"));
    assert_eq!(store.get(keys::STORE_RESULTS), Some(Vec::new()));
    assert_eq!(store.get(keys::MESSAGE_LIST), Some(Vec::new()));
    assert!(store.get(keys::BACKEND_INFO).unwrap().starts_with("PowerTools"));
}

#[tokio::test]
async fn absent_capabilities_are_stored_as_null() {
    let h = Harness::new();
    h.transport.with_sim(|sim| {
        sim.battery.charge_rate = None;
        sim.battery.charge_mode = None;
        sim.hardware.slow_memory = None;
    });
    h.panel.context().backend.init().await.unwrap();
    h.panel.reload_engine().reload().await;

    let store = h.panel.store();
    assert_eq!(store.get(keys::CHARGE_RATE_BATT), Some(None));
    assert_eq!(store.get(keys::CHARGE_MODE_BATT), Some(None));
    assert_eq!(store.get(keys::CHARGE_LIMIT_BATT), Some(None));
    assert_eq!(store.get(keys::SLOW_MEMORY_GPU), Some(None));
}

#[tokio::test]
async fn failed_call_keeps_previous_value() {
    let h = Harness::new();
    h.panel.context().backend.init().await.unwrap();
    h.panel.reload_engine().reload().await;

    h.transport.fail_op("get_gpu_ppt");
    h.transport.with_sim(|sim| {
        sim.hardware.gpu_ppt.fast = Some(25);
        sim.battery.charge_now = 12.0;
    });
    h.panel.reload_engine().reload().await;

    let store = h.panel.store();
    assert_eq!(store.get(keys::FAST_PPT_GPU), Some(Some(15)));
    assert_eq!(store.get(keys::CHARGE_NOW_BATT), Some(Some(12.0)));
}

#[tokio::test]
async fn catalog_searched_only_while_results_missing() {
    let h = Harness::new();
    h.panel.context().backend.init().await.unwrap();
    h.panel.reload_engine().reload().await;
    h.panel.reload_engine().reload().await;

    assert_eq!(h.transport.count("search_store_by_app_id"), 1);
    assert!(h.transport.calls().contains(&BackendCall::SearchStoreByAppId {
        app_id: "1".to_string()
    }));
    assert_eq!(h.transport.count("get_limits"), 2);
}

#[tokio::test]
async fn concurrent_reloads_coalesce() {
    let h = Harness::new();
    h.panel.context().backend.init().await.unwrap();
    let engine = h.panel.reload_engine();

    tokio::join!(engine.reload(), engine.reload(), engine.reload());

    // The first runs alone; the two that queued behind it share one batch.
    assert_eq!(engine.batches_started(), 2);
    assert_eq!(h.transport.count("get_limits"), 2);
}

#[tokio::test]
async fn clock_fan_out_waits_for_limits() {
    let h = Harness::new();
    h.panel.context().backend.init().await.unwrap();
    h.transport.fail_op("get_limits");
    h.panel.reload_engine().reload().await;

    let store = h.panel.store();
    assert_eq!(store.get(keys::CLOCK_MIN_CPU), Some(Some(1400)));
    assert!(!store.contains(keys::CLOCK_MIN_MAX_CPU));
}

#[test]
fn fan_out_matches_core_count() {
    let per_core = fan_out_clock_limits(8, Some(800), Some(3500));
    assert_eq!(per_core.len(), 8);
    assert!(per_core.iter().all(|c| c.min == Some(800) && c.max == Some(3500)));
    assert!(fan_out_clock_limits(0, Some(800), None).is_empty());
}

#[test]
fn counts_online_cpus() {
    assert_eq!(count_cpus(&[true, false, true, true]), 3);
    assert_eq!(count_cpus(&[]), 0);
}

#[tokio::test(start_paused = true)]
async fn batches_never_overlap() {
    let h = Harness::new();
    h.panel.context().backend.init().await.unwrap();
    h.transport
        .delay_op("get_limits", std::time::Duration::from_millis(300));
    let engine = h.panel.reload_engine();

    tokio::join!(engine.reload(), engine.reload(), engine.reload(), engine.reload());

    assert_eq!(engine.batches_started(), 2);
    assert_eq!(h.transport.count("get_limits"), 2);
    assert_eq!(h.transport.max_in_flight("get_limits"), 1);
    assert_eq!(h.transport.max_in_flight("get_messages"), 1);
}

#[tokio::test(start_paused = true)]
async fn poll_reload_and_game_start_chain_do_not_overlap() {
    let host = HostHub::new();
    host.add_app(
        "42",
        AppOverview {
            app_id: "42".to_string(),
            display_name: "Game".to_string(),
        },
    );
    let h = Harness::with(PanelConfig::default(), SimBackend::steam_deck(), host);
    h.panel.context().backend.init().await.unwrap();
    h.panel.reload_engine().reload().await;
    h.transport.clear_calls();
    h.transport
        .delay_op("get_limits", std::time::Duration::from_millis(300));

    // Another client switched profiles; the poll notices while a game starts.
    h.transport
        .with_sim(|sim| sim.load_profile("42", "Game", "0", None));
    let (outcome, ()) = tokio::join!(
        h.panel.poller().poll_once(),
        h.panel.router().handle(HostEvent::GameActionStart {
            action_type: 1,
            game_id: "42".to_string(),
        }),
    );

    assert_eq!(outcome, PollOutcome::PathChanged);
    assert_eq!(h.transport.count("load_general_settings"), 1);
    assert_eq!(h.transport.max_in_flight("get_limits"), 1);
    assert_eq!(h.panel.store().get(keys::PATH_GEN).as_deref(), Some("42.ron"));
    assert_eq!(h.profile_changes(), 1);

    // The chain's reload ran after its load, so it saw the loaded profile.
    let calls = h.transport.calls();
    let load_at = calls
        .iter()
        .position(|c| c.op_name() == "load_general_settings")
        .unwrap();
    assert!(calls[load_at..]
        .iter()
        .any(|c| *c == BackendCall::GetLimits));
}
