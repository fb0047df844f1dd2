//! Dispatch loop for registered pipelines.
//!
//! One tick per second: every due pipeline gets a run task, at most one
//! in flight per pipeline, serialized per remote account. Outcomes land on
//! the persistent cursor; failures push the next attempt out with capped
//! exponential backoff, and auth failures halt the pipeline until
//! credentials are re-checked at startup.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::errors::SyncError;
use crate::pipeline::{backoff_delay, Pipeline, RunContext};
use crate::store::Store;
use crate::types::{now_ts, Cursor};

const TICK: Duration = Duration::from_secs(1);

#[derive(Clone, Debug)]
pub struct PipelineStatus {
    pub name: String,
    pub account: String,
    pub running: bool,
    pub cursor: Cursor,
}

#[derive(Clone, Debug)]
pub struct StatusSnapshot {
    /// Monotonic change counter; pollers skip work when it is unchanged.
    pub version: u64,
    pub pipelines: Vec<PipelineStatus>,
}

struct Shared {
    store: Store,
    config: SchedulerConfig,
    pipelines: Vec<Arc<dyn Pipeline>>,
    /// One lock per remote account serializes runs against it. Tokio's
    /// mutex is FIFO, so same-tick dispatch keeps registration order.
    accounts: HashMap<String, Arc<tokio::sync::Mutex<()>>>,
    running: Mutex<HashSet<String>>,
    forced: Mutex<HashSet<String>>,
    /// Earliest next attempt, unix seconds; set by rate-limit responses.
    not_before: Mutex<HashMap<String, i64>>,
    in_flight: AtomicUsize,
    version: AtomicU64,
    /// Cancels in-flight runs.
    run_cancel: CancellationToken,
    /// Stops the tick loop.
    loop_stop: CancellationToken,
}

impl Shared {
    fn bump(&self) {
        self.version.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

pub struct SchedulerBuilder {
    store: Store,
    config: SchedulerConfig,
    pipelines: Vec<Arc<dyn Pipeline>>,
}

impl SchedulerBuilder {
    pub fn new(store: Store, config: SchedulerConfig) -> Self {
        SchedulerBuilder {
            store,
            config,
            pipelines: Vec::new(),
        }
    }

    /// Registration order matters: pipelines sharing an account run in the
    /// order they were registered within a tick.
    pub fn register(mut self, pipeline: Arc<dyn Pipeline>) -> Self {
        self.pipelines.push(pipeline);
        self
    }

    pub fn build(self) -> Scheduler {
        let mut accounts = HashMap::new();
        for pipeline in &self.pipelines {
            accounts
                .entry(pipeline.account().to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())));
        }
        Scheduler {
            shared: Arc::new(Shared {
                store: self.store,
                config: self.config,
                pipelines: self.pipelines,
                accounts,
                running: Mutex::new(HashSet::new()),
                forced: Mutex::new(HashSet::new()),
                not_before: Mutex::new(HashMap::new()),
                in_flight: AtomicUsize::new(0),
                version: AtomicU64::new(0),
                run_cancel: CancellationToken::new(),
                loop_stop: CancellationToken::new(),
            }),
        }
    }
}

impl Scheduler {
    pub fn pipeline_names(&self) -> Vec<String> {
        self.shared
            .pipelines
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    /// Queues a pipeline for the next tick, ignoring cadence, backoff, and
    /// auth halts. Unknown names are reported back.
    pub fn run_now(&self, name: &str) -> Result<(), String> {
        if !self.shared.pipelines.iter().any(|p| p.name() == name) {
            return Err(format!("unknown pipeline: {name}"));
        }
        if let Ok(mut forced) = self.shared.forced.lock() {
            forced.insert(name.to_string());
        }
        self.shared.bump();
        Ok(())
    }

    pub async fn status(&self) -> anyhow::Result<StatusSnapshot> {
        let running = self
            .shared
            .running
            .lock()
            .map(|set| set.clone())
            .unwrap_or_default();
        let mut pipelines = Vec::with_capacity(self.shared.pipelines.len());
        for pipeline in &self.shared.pipelines {
            let cursor = self.shared.store.load_cursor(pipeline.name()).await?;
            pipelines.push(PipelineStatus {
                name: pipeline.name().to_string(),
                account: pipeline.account().to_string(),
                running: running.contains(pipeline.name()),
                cursor,
            });
        }
        Ok(StatusSnapshot {
            version: self.shared.version.load(Ordering::Relaxed),
            pipelines,
        })
    }

    pub fn start(&self) -> JoinHandle<()> {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            info!(pipelines = shared.pipelines.len(), "Scheduler started");
            loop {
                tokio::select! {
                    _ = shared.loop_stop.cancelled() => break,
                    _ = tokio::time::sleep(TICK) => {}
                }
                for pipeline in &shared.pipelines {
                    match Scheduler::is_due(&shared, pipeline.as_ref()).await {
                        Ok(true) => Scheduler::dispatch(&shared, pipeline.clone()),
                        Ok(false) => {}
                        Err(err) => {
                            error!(pipeline = pipeline.name(), error = %err, "Cursor load failed")
                        }
                    }
                }
            }
            info!("Scheduler tick loop stopped");
        })
    }

    /// Stops dispatching, waits for in-flight runs up to the grace period,
    /// then cancels whatever is still going.
    pub async fn stop(&self) {
        let shared = &self.shared;
        shared.loop_stop.cancel();

        let grace = shared.config.stop_grace();
        let deadline = tokio::time::Instant::now() + grace;
        while shared.in_flight.load(Ordering::SeqCst) > 0 {
            if tokio::time::Instant::now() >= deadline {
                warn!("Stop grace elapsed; cancelling in-flight runs");
                shared.run_cancel.cancel();
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        // Cancelled runs still need a moment to unwind.
        let final_deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while shared.in_flight.load(Ordering::SeqCst) > 0
            && tokio::time::Instant::now() < final_deadline
        {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        info!("Scheduler stopped");
    }

    /// One pass over every pipeline in registration order, for `--once`.
    /// Account locks still apply, cursors are still recorded.
    pub async fn run_all_once(&self) {
        for pipeline in self.shared.pipelines.clone() {
            Scheduler::execute(&self.shared, pipeline).await;
        }
    }

    /// Runs a single pipeline to completion, recording its cursor.
    pub async fn run_pipeline(&self, name: &str) -> Result<(), String> {
        let pipeline = self
            .shared
            .pipelines
            .iter()
            .find(|p| p.name() == name)
            .cloned()
            .ok_or_else(|| format!("unknown pipeline: {name}"))?;
        Scheduler::execute(&self.shared, pipeline).await;
        Ok(())
    }

    async fn is_due(shared: &Arc<Shared>, pipeline: &dyn Pipeline) -> anyhow::Result<bool> {
        let name = pipeline.name();
        if shared
            .running
            .lock()
            .map(|set| set.contains(name))
            .unwrap_or(true)
        {
            return Ok(false);
        }

        let forced = shared
            .forced
            .lock()
            .map(|set| set.contains(name))
            .unwrap_or(false);
        if forced {
            return Ok(true);
        }

        let now = now_ts();
        let held_back = shared
            .not_before
            .lock()
            .ok()
            .and_then(|map| map.get(name).copied())
            .map_or(false, |until| now < until);
        if held_back {
            return Ok(false);
        }

        let cursor = shared.store.load_cursor(name).await?;
        if cursor.auth_halted {
            return Ok(false);
        }

        let delay = backoff_delay(pipeline.cadence(), cursor.consecutive_failures);
        Ok(match cursor.last_run {
            Some(last_run) => now >= last_run + delay.as_secs() as i64,
            None => true,
        })
    }

    fn dispatch(shared: &Arc<Shared>, pipeline: Arc<dyn Pipeline>) {
        let name = pipeline.name().to_string();
        if let Ok(mut running) = shared.running.lock() {
            if !running.insert(name.clone()) {
                return;
            }
        }
        if let Ok(mut forced) = shared.forced.lock() {
            forced.remove(&name);
        }
        shared.bump();
        shared.in_flight.fetch_add(1, Ordering::SeqCst);

        let shared = shared.clone();
        tokio::spawn(async move {
            Scheduler::execute_locked(&shared, pipeline).await;
            if let Ok(mut running) = shared.running.lock() {
                running.remove(&name);
            }
            shared.in_flight.fetch_sub(1, Ordering::SeqCst);
            shared.bump();
        });
    }

    async fn execute(shared: &Arc<Shared>, pipeline: Arc<dyn Pipeline>) {
        let name = pipeline.name().to_string();
        if let Ok(mut running) = shared.running.lock() {
            if !running.insert(name.clone()) {
                return;
            }
        }
        shared.in_flight.fetch_add(1, Ordering::SeqCst);
        shared.bump();
        Scheduler::execute_locked(shared, pipeline).await;
        if let Ok(mut running) = shared.running.lock() {
            running.remove(&name);
        }
        shared.in_flight.fetch_sub(1, Ordering::SeqCst);
        shared.bump();
    }

    async fn execute_locked(shared: &Arc<Shared>, pipeline: Arc<dyn Pipeline>) {
        let account_lock = shared
            .accounts
            .get(pipeline.account())
            .cloned()
            .unwrap_or_else(|| Arc::new(tokio::sync::Mutex::new(())));
        let _account = account_lock.lock().await;

        let name = pipeline.name().to_string();
        let ctx = RunContext::new(shared.run_cancel.child_token());
        let deadline = shared.config.run_deadline();

        let result = tokio::time::timeout(deadline, pipeline.run(&ctx)).await;
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(_) => Err(SyncError::Transient(format!(
                "run exceeded {}s deadline",
                deadline.as_secs()
            ))),
        };

        match outcome {
            Ok(report) => {
                if let Err(err) = shared
                    .store
                    .cursor_success(&name, report.watermark.as_deref())
                    .await
                {
                    error!(pipeline = %name, error = %err, "Recording run success failed");
                }
            }
            Err(SyncError::NotConfigured) => {
                debug!(pipeline = %name, "Pipeline not configured; skipping");
                if let Err(store_err) = shared.store.cursor_skipped(&name).await {
                    error!(pipeline = %name, error = %store_err, "Recording run skip failed");
                }
            }
            Err(err) => {
                let auth_halt = matches!(err, SyncError::AuthFailed(_));
                if auth_halt {
                    warn!(pipeline = %name, error = %err, "Authentication failed; halting pipeline");
                } else {
                    warn!(pipeline = %name, error = %err, "Run failed");
                }
                if let SyncError::RateLimited {
                    retry_after: Some(wait),
                } = &err
                {
                    if let Ok(mut map) = shared.not_before.lock() {
                        map.insert(name.clone(), now_ts() + wait.as_secs() as i64);
                    }
                }
                if let Err(store_err) = shared
                    .store
                    .cursor_failure(&name, &err.to_string(), auth_halt)
                    .await
                {
                    error!(pipeline = %name, error = %store_err, "Recording run failure failed");
                }
            }
        }
    }
}
