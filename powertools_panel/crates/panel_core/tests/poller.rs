mod support;

use panel_core::context::{RenderCause, RenderTrigger};
use panel_core::poller::PollOutcome;
use panel_core::store::keys;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use support::Harness;

fn counting_trigger() -> (RenderTrigger, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    let trigger: RenderTrigger = Arc::new(move |cause| {
        assert_eq!(cause, RenderCause::Periodic);
        c.fetch_add(1, Ordering::SeqCst);
    });
    (trigger, count)
}

#[tokio::test(start_paused = true)]
async fn rearming_leaves_one_timer() {
    let h = Harness::new();
    h.panel.context().backend.init().await.unwrap();
    let (trigger, renders) = counting_trigger();

    for _ in 0..4 {
        h.panel.poller().periodicals_setup(trigger.clone());
    }
    assert!(h.panel.poller().is_armed());

    tokio::time::sleep(Duration::from_millis(4_990)).await;
    assert_eq!(h.transport.count("get_periodicals"), 0);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.transport.count("get_periodicals"), 1);
    assert_eq!(renders.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(5_000)).await;
    assert_eq!(h.transport.count("get_periodicals"), 2);
    assert_eq!(renders.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn clear_cancels_the_timer() {
    let h = Harness::new();
    h.panel.context().backend.init().await.unwrap();
    let (trigger, renders) = counting_trigger();

    h.panel.poller().periodicals_setup(trigger);
    h.panel.poller().clear();
    assert!(!h.panel.poller().is_armed());

    tokio::time::sleep(Duration::from_secs(12)).await;
    assert_eq!(h.transport.count("get_periodicals"), 0);
    assert_eq!(renders.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn tick_renders_even_when_poll_fails() {
    let h = Harness::new();
    h.panel.context().backend.init().await.unwrap();
    h.transport.fail_op("get_periodicals");
    let (trigger, renders) = counting_trigger();

    let outcome = h.panel.poller().tick(&trigger).await;

    assert_eq!(outcome, PollOutcome::Failed);
    assert_eq!(renders.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn tick_is_skipped_before_handshake() {
    let h = Harness::new();
    let (trigger, renders) = counting_trigger();

    assert_eq!(h.panel.poller().tick(&trigger).await, PollOutcome::Skipped);
    assert!(h.transport.calls().is_empty());
    assert_eq!(renders.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn path_change_triggers_exactly_one_reload() {
    let h = Harness::new();
    h.panel.context().backend.init().await.unwrap();
    let engine = h.panel.reload_engine();
    engine.reload().await;
    assert_eq!(engine.batches_started(), 1);

    assert_eq!(h.panel.poller().poll_once().await, PollOutcome::Unchanged);
    assert_eq!(engine.batches_started(), 1);

    h.transport
        .with_sim(|sim| sim.load_profile("42", "Game", "0", None));
    assert_eq!(h.panel.poller().poll_once().await, PollOutcome::PathChanged);
    assert_eq!(engine.batches_started(), 2);

    let store = h.panel.store();
    assert_eq!(store.get(keys::PATH_GEN).as_deref(), Some("42.ron"));
    assert_eq!(store.get(keys::NAME_GEN).as_deref(), Some("Game"));

    assert_eq!(h.panel.poller().poll_once().await, PollOutcome::Unchanged);
    assert_eq!(engine.batches_started(), 2);
}

#[tokio::test]
async fn poll_writes_battery_snapshot() {
    let h = Harness::new();
    h.panel.context().backend.init().await.unwrap();
    h.transport.with_sim(|sim| {
        sim.battery.charge_now = 20.25;
        sim.battery.charge_power = 11.5;
    });

    h.panel.poller().poll_once().await;

    let store = h.panel.store();
    assert_eq!(store.get(keys::CHARGE_NOW_BATT), Some(Some(20.25)));
    assert_eq!(store.get(keys::CHARGE_POWER_BATT), Some(Some(11.5)));
    assert_eq!(store.get(keys::CHARGE_FULL_BATT), Some(Some(40.0)));
}

#[tokio::test(start_paused = true)]
async fn stuck_poll_still_renders_every_period() {
    let h = Harness::new();
    h.panel.context().backend.init().await.unwrap();
    h.transport.stall_op("get_periodicals");
    let (trigger, renders) = counting_trigger();
    h.panel.poller().periodicals_setup(trigger);

    // First tick at 5 s waits half a period for the poll, then renders anyway.
    tokio::time::sleep(Duration::from_millis(7_510)).await;
    assert_eq!(renders.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert_eq!(renders.load(Ordering::SeqCst), 2);
    tokio::time::sleep(Duration::from_millis(5_000)).await;
    assert_eq!(renders.load(Ordering::SeqCst), 3);

    // The stuck poll is not stacked on by later ticks.
    assert_eq!(h.transport.count("get_periodicals"), 1);
    assert_eq!(h.transport.max_in_flight("get_periodicals"), 1);
    assert!(h.panel.poller().is_armed());
}

#[tokio::test(start_paused = true)]
async fn polling_resumes_once_a_slow_reply_lands() {
    let h = Harness::new();
    h.panel.context().backend.init().await.unwrap();
    h.transport
        .delay_op("get_periodicals", Duration::from_millis(7_000));
    let (trigger, renders) = counting_trigger();
    h.panel.poller().periodicals_setup(trigger);

    // Ticks at 5 s and 10 s; the reply to the first lands at 12 s.
    tokio::time::sleep(Duration::from_millis(12_100)).await;
    assert_eq!(renders.load(Ordering::SeqCst), 2);
    assert_eq!(h.transport.count("get_periodicals"), 1);

    // The 15 s tick starts a new poll and renders half a period later.
    tokio::time::sleep(Duration::from_millis(5_500)).await;
    assert_eq!(h.transport.count("get_periodicals"), 2);
    assert_eq!(renders.load(Ordering::SeqCst), 3);
    assert_eq!(h.panel.store().get(keys::CHARGE_NOW_BATT), Some(Some(30.5)));
}
