//! Fixed-period driver for the agent's periodic tasks
//!
//! Each task runs on its own interval loop, so a task blocked on slow
//! submissions never holds back the others. A tick that overruns the period
//! delays that task's next tick instead of overlapping it, and a failing
//! task is logged and retried on its next tick.

use crate::error::AgentResult;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// What a single task run achieved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TickOutcome {
    /// A node reported syncing; nothing was fetched or written
    Syncing,
    /// Nothing new to do
    Idle,
    Progressed,
}

impl TickOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TickOutcome::Syncing => "syncing",
            TickOutcome::Idle => "idle",
            TickOutcome::Progressed => "progressed",
        }
    }
}

/// Unit of work run once per scheduler tick
#[async_trait]
pub trait PeriodicTask: Send + 'static {
    fn name(&self) -> &'static str;

    async fn tick(&mut self) -> AgentResult<TickOutcome>;
}

/// Last known state of one task
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskReport {
    pub runs: u64,
    pub failures: u64,
    pub last_outcome: Option<TickOutcome>,
    pub last_error: Option<String>,
    pub last_run: Option<DateTime<Utc>>,
}

/// Task reports shared with the status API
#[derive(Debug, Default)]
pub struct SchedulerStatus {
    tasks: DashMap<&'static str, TaskReport>,
}

impl SchedulerStatus {
    #[cfg(test)]
    pub fn report(&self, task: &str) -> Option<TaskReport> {
        self.tasks.get(task).map(|r| r.clone())
    }

    pub fn reports(&self) -> Vec<(String, TaskReport)> {
        let mut reports: Vec<_> = self
            .tasks
            .iter()
            .map(|entry| (entry.key().to_string(), entry.value().clone()))
            .collect();
        reports.sort_by(|a, b| a.0.cmp(&b.0));
        reports
    }

    fn record(&self, task: &'static str, result: &AgentResult<TickOutcome>) {
        let mut report = self.tasks.entry(task).or_default();
        report.runs += 1;
        report.last_run = Some(Utc::now());
        match result {
            Ok(outcome) => {
                report.last_outcome = Some(*outcome);
                report.last_error = None;
            }
            Err(e) => {
                report.failures += 1;
                report.last_error = Some(e.to_string());
            }
        }
    }
}

/// Runs the registered tasks on a fixed period until stopped
pub struct Scheduler {
    period: Duration,
    tasks: Mutex<Vec<Box<dyn PeriodicTask>>>,
    status: Arc<SchedulerStatus>,
    shutdown: Arc<RwLock<bool>>,
}

/// One task's interval loop
struct TaskLoop {
    task: Box<dyn PeriodicTask>,
    period: Duration,
    status: Arc<SchedulerStatus>,
    shutdown: Arc<RwLock<bool>>,
}

impl Scheduler {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            tasks: Mutex::new(Vec::new()),
            status: Arc::new(SchedulerStatus::default()),
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    pub async fn register(&self, task: Box<dyn PeriodicTask>) {
        info!("Registered periodic task {}", task.name());
        self.tasks.lock().await.push(task);
    }

    pub fn status(&self) -> Arc<SchedulerStatus> {
        self.status.clone()
    }

    /// Main scheduling loop, returns once every task loop has stopped
    pub async fn run(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        info!(
            "Scheduler started with {} tasks every {:?}",
            tasks.len(),
            self.period
        );

        let handles: Vec<_> = tasks
            .into_iter()
            .map(|task| {
                let task_loop = TaskLoop {
                    task,
                    period: self.period,
                    status: self.status.clone(),
                    shutdown: self.shutdown.clone(),
                };
                tokio::spawn(task_loop.run())
            })
            .collect();

        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!("Task loop ended abnormally: {}", e);
            }
        }

        info!("Scheduler stopped");
    }

    /// Stop every task after its tick in progress, if any
    pub async fn stop(&self) {
        *self.shutdown.write().await = true;
    }
}

impl TaskLoop {
    async fn run(mut self) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if *self.shutdown.read().await {
                break;
            }
            self.run_task().await;
        }
        debug!("{} stopped", self.task.name());
    }

    async fn run_task(&mut self) {
        let name = self.task.name();
        let started = Instant::now();
        let result = self.task.tick().await;
        let elapsed = started.elapsed();

        let outcome = match &result {
            Ok(outcome) => {
                debug!("{} finished in {:?}: {}", name, elapsed, outcome.as_str());
                if *outcome == TickOutcome::Syncing {
                    warn!("{} skipped its tick: node is syncing", name);
                }
                outcome.as_str()
            }
            Err(e) if e.is_data_integrity() => {
                error!("{} hit a data integrity violation: {}", name, e);
                "failed"
            }
            Err(e) if e.is_retryable() => {
                warn!("{} tick failed, retrying next tick: {}", name, e);
                "failed"
            }
            Err(e) => {
                error!("{} tick failed: {}", name, e);
                "failed"
            }
        };

        crate::metrics::record_tick(name, outcome, elapsed.as_secs_f64());
        self.status.record(name, &result);
    }
}
