// src/scheduler.rs
//! Periodic and on-demand runs with a single-flight guard.
//!
//! State machine: Idle → Running → Idle, or Running → Failed → Idle. The
//! Idle→Running edge is a compare-and-swap, so a tick and a manual trigger
//! racing each other start at most one run.

use metrics::{counter, gauge};
use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::error::PipelineError;
use crate::pipeline::{HeatEngine, RunReport, RunStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SchedulerState {
    Idle = 0,
    Running = 1,
    Failed = 2,
}

impl SchedulerState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => SchedulerState::Running,
            2 => SchedulerState::Failed,
            _ => SchedulerState::Idle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Accepted,
    /// A run was already in progress; nothing was started.
    Rejected,
}

struct Inner {
    engine: Arc<HeatEngine>,
    state: AtomicU8,
    cancel: CancellationToken,
    in_flight: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn set_state(&self, s: SchedulerState) {
        self.state.store(s as u8, Ordering::SeqCst);
        gauge!("scheduler_running").set(if s == SchedulerState::Running { 1.0 } else { 0.0 });
    }
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
    interval: Duration,
    run_on_start: bool,
}

impl Scheduler {
    pub fn new(engine: Arc<HeatEngine>, cfg: &SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                state: AtomicU8::new(SchedulerState::Idle as u8),
                cancel: CancellationToken::new(),
                in_flight: Mutex::new(None),
            }),
            interval: cfg.interval(),
            run_on_start: cfg.run_on_start,
        }
    }

    pub fn status(&self) -> SchedulerState {
        SchedulerState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    pub fn last_run(&self) -> Option<RunReport> {
        self.inner.engine.history().latest()
    }

    pub fn engine(&self) -> &Arc<HeatEngine> {
        &self.inner.engine
    }

    /// Start a run in the background unless one is already going.
    pub fn trigger_now(&self) -> TriggerOutcome {
        if self.inner.cancel.is_cancelled() {
            tracing::info!(target: "scheduler", "trigger ignored, scheduler shut down");
            return TriggerOutcome::Rejected;
        }
        if self
            .inner
            .state
            .compare_exchange(
                SchedulerState::Idle as u8,
                SchedulerState::Running as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            counter!("scheduler_triggers_rejected_total").increment(1);
            tracing::info!(target: "scheduler", reason = %PipelineError::RunAlreadyInProgress, "trigger rejected");
            return TriggerOutcome::Rejected;
        }
        gauge!("scheduler_running").set(1.0);

        // Spawn under the slot lock so a later trigger can't store its handle first.
        let mut slot = match self.inner.in_flight.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        let inner = self.inner.clone();
        *slot = Some(tokio::spawn(async move { supervise(inner).await }));
        TriggerOutcome::Accepted
    }

    /// Tick every `interval` until shutdown. The first tick fires immediately
    /// when `run_on_start` is set.
    pub fn start(&self) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            if !this.run_on_start {
                ticker.tick().await;
            }
            tracing::info!(target: "scheduler", interval_secs = this.interval.as_secs(), "scheduler started");
            loop {
                tokio::select! {
                    _ = this.inner.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if this.trigger_now() == TriggerOutcome::Rejected {
                            tracing::debug!(target: "scheduler", "tick skipped");
                        }
                    }
                }
            }
            tracing::info!(target: "scheduler", "scheduler stopped");
        })
    }

    /// Wait for the in-flight run, if any, to settle.
    pub async fn wait_idle(&self) {
        let handle = self.inner.in_flight.lock().ok().and_then(|mut s| s.take());
        if let Some(h) = handle {
            let _ = h.await;
        }
    }

    /// Stop ticking and abandon the in-flight run. Nothing from it is persisted.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.wait_idle().await;
    }
}

/// Drive one run to completion, catching panics, then return to Idle.
async fn supervise(inner: Arc<Inner>) {
    let engine = inner.engine.clone();
    let token = inner.cancel.child_token();
    let joined = tokio::spawn(async move { engine.run_once(&token).await }).await;

    let failed = match joined {
        Ok(report) => report.status == RunStatus::Failed,
        Err(e) => {
            let reason = if e.is_panic() {
                "run panicked".to_string()
            } else {
                format!("run task aborted: {e}")
            };
            tracing::error!(target: "scheduler", %reason, "run did not complete");
            inner.engine.history().push(RunReport::aborted(reason));
            counter!("pipeline_runs_total", "status" => "failed").increment(1);
            true
        }
    };

    if failed {
        inner.set_state(SchedulerState::Failed);
        // Retried on the next tick, never in-process.
    }
    inner.set_state(SchedulerState::Idle);
}
