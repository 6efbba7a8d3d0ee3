// tests/scheduler.rs
mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{as_of, engine, item, source, ScriptedProvider};
use heat_engine::config::SchedulerConfig;
use heat_engine::store::MemoryStore;
use heat_engine::{RunStatus, Scheduler, SchedulerState, TriggerOutcome};

fn cfg(interval_secs: u64, run_on_start: bool) -> SchedulerConfig {
    SchedulerConfig {
        interval_secs,
        run_on_start,
        history_capacity: 10,
    }
}

fn one_item_provider() -> ScriptedProvider {
    ScriptedProvider::new(vec![source("wire", "", 0.5)])
        .with_items("wire", vec![item("wire", "1", "Harbour reopens after storm", as_of())])
}

#[tokio::test(start_paused = true)]
async fn second_trigger_is_rejected_while_running() {
    let provider = one_item_provider().list_delay(Duration::from_secs(2));
    let store = Arc::new(MemoryStore::new());
    let sched = Scheduler::new(Arc::new(engine(Arc::new(provider), store.clone())), &cfg(60, false));

    assert_eq!(sched.trigger_now(), TriggerOutcome::Accepted);
    assert_eq!(sched.status(), SchedulerState::Running);
    assert_eq!(sched.trigger_now(), TriggerOutcome::Rejected);

    sched.wait_idle().await;
    assert_eq!(sched.status(), SchedulerState::Idle);
    assert_eq!(sched.last_run().unwrap().status, RunStatus::Success);
    assert_eq!(store.len(), 1);

    assert_eq!(sched.trigger_now(), TriggerOutcome::Accepted);
    sched.wait_idle().await;
    assert_eq!(sched.engine().history().len(), 2);
}

#[tokio::test]
async fn panicking_run_returns_to_idle() {
    let provider = one_item_provider().panic_on_list();
    let store = Arc::new(MemoryStore::new());
    let sched = Scheduler::new(Arc::new(engine(Arc::new(provider), store)), &cfg(60, false));

    assert_eq!(sched.trigger_now(), TriggerOutcome::Accepted);
    sched.wait_idle().await;

    assert_eq!(sched.status(), SchedulerState::Idle);
    let last = sched.last_run().unwrap();
    assert_eq!(last.status, RunStatus::Failed);
    assert_eq!(last.error.as_deref(), Some("run panicked"));
    // The next tick is free to try again.
    assert_eq!(sched.trigger_now(), TriggerOutcome::Accepted);
    sched.wait_idle().await;
}

#[tokio::test]
async fn failed_run_returns_to_idle() {
    let provider = one_item_provider().catalogue_down();
    let store = Arc::new(MemoryStore::new());
    let sched = Scheduler::new(Arc::new(engine(Arc::new(provider), store)), &cfg(60, false));

    sched.trigger_now();
    sched.wait_idle().await;
    assert_eq!(sched.status(), SchedulerState::Idle);
    assert_eq!(sched.last_run().unwrap().status, RunStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn shutdown_abandons_in_flight_run() {
    let provider = one_item_provider().hanging("wire");
    let store = Arc::new(MemoryStore::new());
    let sched = Scheduler::new(Arc::new(engine(Arc::new(provider), store.clone())), &cfg(60, false));

    assert_eq!(sched.trigger_now(), TriggerOutcome::Accepted);
    tokio::time::sleep(Duration::from_secs(1)).await;
    sched.shutdown().await;

    assert_eq!(sched.last_run().unwrap().status, RunStatus::Cancelled);
    assert!(store.is_empty());
    assert_eq!(sched.trigger_now(), TriggerOutcome::Rejected);
}

#[tokio::test(start_paused = true)]
async fn interval_loop_runs_on_start_and_every_tick() {
    let store = Arc::new(MemoryStore::new());
    let sched = Scheduler::new(
        Arc::new(engine(Arc::new(one_item_provider()), store)),
        &cfg(60, true),
    );
    let ticker = sched.start();

    tokio::time::sleep(Duration::from_secs(1)).await;
    sched.wait_idle().await;
    assert_eq!(sched.engine().history().len(), 1);

    tokio::time::sleep(Duration::from_secs(60)).await;
    sched.wait_idle().await;
    assert_eq!(sched.engine().history().len(), 2);

    sched.shutdown().await;
    ticker.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn stalled_catalogue_fails_the_run_and_frees_the_scheduler() {
    let provider = one_item_provider().list_delay(Duration::from_secs(10 * 24 * 3600));
    let store = Arc::new(MemoryStore::new());
    let sched = Scheduler::new(Arc::new(engine(Arc::new(provider), store.clone())), &cfg(60, false));

    assert_eq!(sched.trigger_now(), TriggerOutcome::Accepted);
    tokio::time::sleep(Duration::from_secs(3600)).await;

    assert_eq!(sched.status(), SchedulerState::Idle);
    let last = sched.last_run().unwrap();
    assert_eq!(last.status, RunStatus::Failed);
    assert!(last.error.unwrap().contains("timed out"));
    assert!(store.is_empty());

    assert_eq!(sched.trigger_now(), TriggerOutcome::Accepted);
    tokio::time::timeout(Duration::from_secs(60), sched.shutdown())
        .await
        .expect("shutdown should not wait on the stalled catalogue");
    assert_eq!(sched.last_run().unwrap().status, RunStatus::Cancelled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn wait_idle_covers_the_latest_accepted_run() {
    let store = Arc::new(MemoryStore::new());
    let sched = Scheduler::new(
        Arc::new(engine(Arc::new(one_item_provider()), store)),
        &cfg(60, false),
    );

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let s = sched.clone();
        tasks.push(tokio::spawn(async move {
            let mut accepted = 0usize;
            for _ in 0..25 {
                if s.trigger_now() == TriggerOutcome::Accepted {
                    accepted += 1;
                }
                tokio::task::yield_now().await;
            }
            accepted
        }));
    }
    let mut accepted = 0;
    for t in tasks {
        accepted += t.await.unwrap();
    }
    assert!(accepted >= 1);

    sched.wait_idle().await;
    assert_eq!(sched.status(), SchedulerState::Idle);
}
