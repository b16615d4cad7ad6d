// src/schedule/mod.rs
//! Cron-driven push tasks.
//!
//! The runner wakes on a fixed interval, truncates "now" to the minute and fires
//! every enabled task whose expression matches that minute and that has not already
//! run for it. Due tasks run one after another; each goes through the composer, so
//! they never overlap with each other or with the threshold monitor.

pub mod cron;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use tokio::task::JoinHandle;

use crate::catalog::Catalog;
use crate::compose::{BatchComposer, Trigger};
use crate::error::ComposeError;
use crate::model::ScheduledTask;

pub use cron::CronSchedule;

#[derive(Clone, Copy, Debug)]
pub struct ScheduleCfg {
    pub tick_secs: u64,
}

impl Default for ScheduleCfg {
    fn default() -> Self {
        Self { tick_secs: 20 }
    }
}

/// Outcome of one task firing within a tick.
#[derive(Debug)]
pub struct TaskRun {
    pub task_id: String,
    pub result: Result<usize, ComposeError>,
}

pub struct ScheduleRunner {
    catalog: Arc<Catalog>,
    composer: Arc<BatchComposer>,
}

impl ScheduleRunner {
    pub fn new(catalog: Arc<Catalog>, composer: Arc<BatchComposer>) -> Self {
        Self { catalog, composer }
    }

    /// Tasks that fire in the minute containing `now` and have not run for it yet.
    pub fn due_tasks(&self, now: DateTime<Utc>) -> Vec<ScheduledTask> {
        let tick = cron::truncate_to_minute(now);
        self.catalog
            .tasks()
            .into_iter()
            .filter(|t| t.enabled)
            .filter(|t| t.last_run_at.map_or(true, |last| last < tick))
            .filter(|t| match CronSchedule::parse(&t.cron_expr) {
                Ok(c) => c.matches(tick),
                Err(e) => {
                    tracing::warn!(target: "schedule", task = %t.id, error = %e, "skipping task with bad cron");
                    false
                }
            })
            .collect()
    }

    /// Evaluate one tick. Every due task runs to completion before the next starts.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Vec<TaskRun> {
        let tick = cron::truncate_to_minute(now);
        let due = self.due_tasks(now);
        if !due.is_empty() {
            tracing::debug!(target: "schedule", %tick, due = due.len(), "tasks due");
        }

        let mut runs = Vec::with_capacity(due.len());
        for task in due {
            let trigger = Trigger::Schedule {
                task_id: task.id.clone(),
            };
            let result = self.run_task(&task, &trigger).await;
            // Advance even on failure so a broken task does not fire again within the same minute.
            self.catalog.record_run(&task.id, tick);
            log_run(&task, &trigger, &result);
            runs.push(TaskRun {
                task_id: task.id,
                result,
            });
        }
        runs
    }

    /// Fire a task immediately, ignoring its schedule and enabled flag.
    pub async fn run_now(&self, task_id: &str) -> Result<usize, ComposeError> {
        let task = self.catalog.task(task_id)?;
        let trigger = Trigger::Manual {
            task_id: task.id.clone(),
        };
        let result = self.run_task(&task, &trigger).await;
        self.catalog.record_run(&task.id, Utc::now());
        log_run(&task, &trigger, &result);
        result
    }

    async fn run_task(&self, task: &ScheduledTask, trigger: &Trigger) -> Result<usize, ComposeError> {
        let (channel, template) = self
            .catalog
            .resolve(&task.channel_id, task.template_id.as_deref())?;
        self.composer
            .compose_and_send(trigger, &task.categories, &channel, template.as_ref())
            .await
    }

    /// Background loop. The first tick fires immediately.
    pub fn spawn(self: Arc<Self>, cfg: ScheduleCfg) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(cfg.tick_secs.max(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.tick_at(Utc::now()).await;
            }
        })
    }
}

fn log_run(task: &ScheduledTask, trigger: &Trigger, result: &Result<usize, ComposeError>) {
    match result {
        Ok(sent) => {
            counter!("schedule_task_runs_total", "result" => "ok").increment(1);
            tracing::info!(target: "schedule", %trigger, task = %task.name, sent, "task finished");
        }
        Err(e) => {
            counter!("schedule_task_runs_total", "result" => "error").increment(1);
            tracing::warn!(
                target: "schedule",
                %trigger,
                task = %task.name,
                kind = e.kind(),
                error = %e,
                "task failed"
            );
        }
    }
}
