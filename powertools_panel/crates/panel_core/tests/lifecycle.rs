mod support;

use panel_core::config::PanelConfig;
use panel_core::host::{AppOverview, HookKind, HostEvent, HostHub, LoginUser};
use panel_core::protocol::BackendCall;
use panel_core::sim::SimBackend;
use panel_core::store::keys;
use std::time::Duration;
use support::{settle, Harness};

fn game_harness(host: HostHub) -> Harness {
    host.add_app(
        "42",
        AppOverview {
            app_id: "42".to_string(),
            display_name: "Game".to_string(),
        },
    );
    Harness::with(PanelConfig::default(), SimBackend::steam_deck(), host)
}

#[tokio::test(start_paused = true)]
async fn game_start_loads_app_profile_and_searches_catalog() {
    let h = game_harness(HostHub::new());
    h.panel.start().await.unwrap();
    h.transport.clear_calls();

    let delivered = h.host.emit(HostEvent::GameActionStart {
        action_type: 1,
        game_id: "42".to_string(),
    });
    assert_eq!(delivered, 1);
    settle().await;

    let calls = h.transport.calls();
    let load = BackendCall::LoadGeneralSettings {
        app_id: "42".to_string(),
        name: "Game".to_string(),
        variant_id: "0".to_string(),
        variant_name: None,
    };
    assert_eq!(calls.iter().filter(|c| **c == load).count(), 1);
    assert!(calls.contains(&BackendCall::SearchStoreByAppId {
        app_id: "42".to_string()
    }));

    // The reload must observe the loaded profile.
    let load_at = calls.iter().position(|c| *c == load).unwrap();
    let limits_at = calls
        .iter()
        .position(|c| *c == BackendCall::GetLimits)
        .unwrap();
    assert!(load_at < limits_at);
    let wait_at = calls
        .iter()
        .position(|c| *c == BackendCall::WaitForComplete)
        .unwrap();
    assert!(limits_at < wait_at);

    let store = h.panel.store();
    assert_eq!(store.get(keys::PATH_GEN).as_deref(), Some("42.ron"));
    assert_eq!(store.get(keys::NAME_GEN).as_deref(), Some("Game"));
    assert_eq!(h.profile_changes(), 1);
}

#[tokio::test(start_paused = true)]
async fn unknown_game_is_ignored() {
    let h = game_harness(HostHub::new());
    h.panel.start().await.unwrap();
    h.transport.clear_calls();

    h.host.emit(HostEvent::GameActionStart {
        action_type: 1,
        game_id: "999".to_string(),
    });
    settle().await;

    assert_eq!(h.transport.count("load_general_settings"), 0);
    assert_eq!(h.profile_changes(), 0);
}

#[tokio::test(start_paused = true)]
async fn app_stop_restores_defaults_and_main_catalog() {
    let h = game_harness(HostHub::new());
    h.panel.start().await.unwrap();
    h.host.emit(HostEvent::GameActionStart {
        action_type: 1,
        game_id: "42".to_string(),
    });
    settle().await;
    h.transport.clear_calls();

    h.host.emit(HostEvent::AppLifetime {
        app_id: 42,
        running: false,
    });
    settle().await;

    assert_eq!(h.transport.count("load_general_default_settings"), 1);
    assert!(h.transport.calls().contains(&BackendCall::SearchStoreByAppId {
        app_id: "1".to_string()
    }));
    assert_eq!(
        h.panel.store().get(keys::PATH_GEN).as_deref(),
        Some("default_settings.ron")
    );
    assert_eq!(h.profile_changes(), 2);
}

#[tokio::test(start_paused = true)]
async fn app_start_only_logs() {
    let h = game_harness(HostHub::new());
    h.panel.start().await.unwrap();
    h.transport.clear_calls();

    h.host.emit(HostEvent::AppLifetime {
        app_id: 42,
        running: true,
    });
    settle().await;

    // Only the fire-and-forget log lines from startup may trail in.
    assert!(h.transport.calls().iter().all(|c| c.op_name() == "log"));
}

#[tokio::test(start_paused = true)]
async fn action_end_fired_on_registration_is_skipped() {
    let h = game_harness(HostHub::new());
    h.panel.start().await.unwrap();

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(h.transport.count("force_apply_settings"), 0);

    h.host.emit(HostEvent::GameActionEnd { action_type: 1 });
    tokio::time::sleep(Duration::from_millis(1_990)).await;
    assert_eq!(h.transport.count("force_apply_settings"), 0);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.transport.count("force_apply_settings"), 1);
}

#[tokio::test(start_paused = true)]
async fn first_delivered_action_end_is_skipped_and_later_ones_reapply() {
    let h = game_harness(HostHub::new().without_initial_action_end());
    h.panel.start().await.unwrap();

    h.host.emit(HostEvent::GameActionEnd { action_type: 1 });
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(h.transport.count("force_apply_settings"), 0);

    h.host.emit(HostEvent::GameActionEnd { action_type: 1 });
    h.host.emit(HostEvent::GameActionEnd { action_type: 2 });
    tokio::time::sleep(Duration::from_millis(2_010)).await;
    assert_eq!(h.transport.count("force_apply_settings"), 2);
    assert_eq!(h.transport.with_sim(|sim| sim.applied), 2);
}

#[tokio::test(start_paused = true)]
async fn reregistering_resets_the_skip() {
    let h = game_harness(HostHub::new().without_initial_action_end());
    h.panel.start().await.unwrap();
    h.host.emit(HostEvent::GameActionEnd { action_type: 1 });
    settle().await;

    h.panel.router().register_callbacks(true).unwrap();
    h.host.emit(HostEvent::GameActionEnd { action_type: 1 });
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(h.transport.count("force_apply_settings"), 0);
}

#[tokio::test(start_paused = true)]
async fn clear_hooks_cancels_pending_reapply() {
    let h = game_harness(HostHub::new());
    h.panel.start().await.unwrap();

    h.host.emit(HostEvent::GameActionEnd { action_type: 1 });
    tokio::time::sleep(Duration::from_millis(500)).await;
    h.panel.router().clear_hooks();
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(h.transport.count("force_apply_settings"), 0);
}

#[tokio::test(start_paused = true)]
async fn user_change_records_identity() {
    let h = game_harness(HostHub::new());
    h.host.add_login_user(LoginUser {
        account_name: "deckuser".to_string(),
        persona_name: Some("Deck User".to_string()),
    });
    h.host.add_login_user(LoginUser {
        account_name: "quiet".to_string(),
        persona_name: None,
    });
    h.panel.start().await.unwrap();
    let store = h.panel.store();

    h.host.emit(HostEvent::UserChanged {
        account_name: "stranger".to_string(),
        steam_id: "1".to_string(),
    });
    settle().await;
    assert!(!store.contains(keys::INTERNAL_STEAM_ID));

    h.host.emit(HostEvent::UserChanged {
        account_name: "deckuser".to_string(),
        steam_id: "76561198000000001".to_string(),
    });
    settle().await;
    assert_eq!(
        store.get(keys::INTERNAL_STEAM_ID).as_deref(),
        Some("76561198000000001")
    );
    assert_eq!(
        store.get(keys::INTERNAL_STEAM_USERNAME).as_deref(),
        Some("Deck User")
    );

    h.host.emit(HostEvent::UserChanged {
        account_name: "quiet".to_string(),
        steam_id: "76561198000000002".to_string(),
    });
    settle().await;
    assert_eq!(
        store.get(keys::INTERNAL_STEAM_USERNAME).as_deref(),
        Some("quiet")
    );
}

#[tokio::test(start_paused = true)]
async fn repeated_registration_keeps_four_subscriptions() {
    let h = game_harness(HostHub::new());
    h.panel.start().await.unwrap();
    h.panel.router().register_callbacks(true).unwrap();
    h.panel.router().register_callbacks(true).unwrap();

    assert_eq!(h.host.active_subscriptions(), 4);
    for kind in HookKind::ALL {
        assert_eq!(h.host.subscriptions_of(kind), 1);
    }
    assert_eq!(h.panel.router().active_subscriptions(), 4);
    assert!(h.panel.poller().is_armed());

    h.transport.clear_calls();
    h.host.emit(HostEvent::GameActionStart {
        action_type: 1,
        game_id: "42".to_string(),
    });
    settle().await;
    assert_eq!(h.transport.count("load_general_settings"), 1);

    // One timer: one poll per period.
    h.transport.clear_calls();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.transport.count("get_periodicals"), 1);
}

#[tokio::test(start_paused = true)]
async fn clear_hooks_drops_everything() {
    let h = game_harness(HostHub::new());
    h.panel.start().await.unwrap();
    h.panel.router().clear_hooks();

    assert_eq!(h.host.active_subscriptions(), 0);
    assert_eq!(h.panel.router().active_subscriptions(), 0);
    assert!(!h.panel.poller().is_armed());
    assert_eq!(h.host.emit(HostEvent::GameActionEnd { action_type: 1 }), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_registration_rolls_back() {
    let h = game_harness(HostHub::new());
    h.host.refuse_registration(HookKind::UserChanged);

    assert!(h.panel.router().register_callbacks(true).is_err());
    assert_eq!(h.host.active_subscriptions(), 0);
    assert!(!h.panel.poller().is_armed());
}
