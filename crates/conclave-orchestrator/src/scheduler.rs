use crate::goals::TaskSource;
use crate::types::Task;
use async_trait::async_trait;
use chrono::{Local, NaiveDateTime, Utc};
use conclave_agent::{MessageSender, PeriodicJob};
use conclave_core::{ConclaveError, ConclaveResult, Message, MessageKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Maximum tasks fired per cycle.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_interval_secs() -> u64 {
    60
}

fn default_batch_size() -> usize {
    5
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            batch_size: default_batch_size(),
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn validate(&self) -> ConclaveResult<()> {
        if self.interval_secs == 0 {
            return Err(ConclaveError::Configuration(
                "scheduler interval_secs must be at least 1".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ConclaveError::Configuration(
                "scheduler batch_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Fires eligible pending tasks into the message loop as system messages.
pub struct TaskScheduler {
    source: Arc<dyn TaskSource>,
    sender: MessageSender,
    config: SchedulerConfig,
}

impl TaskScheduler {
    pub fn new(source: Arc<dyn TaskSource>, sender: MessageSender, config: SchedulerConfig) -> Self {
        Self {
            source,
            sender,
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Up to `limit` pending tasks eligible at `now`, highest priority first
    /// (ties keep creation order). A task selected by a time range comes back
    /// with its weight multiplied by that range's multiplier; a missing
    /// weight counts as 1.
    pub async fn get_next_tasks(&self, now: NaiveDateTime, limit: usize) -> ConclaveResult<Vec<Task>> {
        let mut tasks = self.source.pending_tasks().await?;
        tasks.sort_by(|a, b| b.priority.cmp(&a.priority));

        Ok(tasks
            .into_iter()
            .filter_map(|mut task| {
                let multiplier = match &task.schedule {
                    None => 1.0,
                    Some(schedule) => schedule.evaluate(&now)?,
                };
                if (multiplier - 1.0).abs() > f64::EPSILON {
                    task.weight = Some(task.weight.unwrap_or(1.0) * multiplier);
                }
                Some(task)
            })
            .take(limit)
            .collect())
    }

    /// Fire every eligible task for `now` and record its execution metrics.
    /// Returns the number of tasks fired.
    pub async fn run_cycle(&self, now: NaiveDateTime) -> ConclaveResult<usize> {
        let tasks = self.get_next_tasks(now, self.config.batch_size).await?;
        if tasks.is_empty() {
            debug!("No eligible tasks this cycle");
            return Ok(0);
        }

        let fired = tasks.len();
        for mut task in tasks {
            let started = Instant::now();
            self.sender.send(task_message(&task))?;
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

            task.stats.record(elapsed_ms, Utc::now());
            info!(
                task_id = %task.id,
                goal_id = %task.goal_id,
                executions = task.stats.execution_count,
                weight = ?task.weight,
                "Scheduled task fired"
            );
            self.source.update_task(task).await?;
        }
        Ok(fired)
    }
}

fn task_message(task: &Task) -> Message {
    Message::system(format!(
        "Scheduled task {} (goal {}): {}",
        task.id, task.goal_id, task.description
    ))
    .with_kind(MessageKind::ScheduledTask {
        task_id: task.id.clone(),
        goal_id: task.goal_id.clone(),
    })
    .with_metadata("priority", serde_json::json!(task.priority))
    .with_metadata("weight", serde_json::json!(task.weight))
}

#[async_trait]
impl PeriodicJob for TaskScheduler {
    fn name(&self) -> &str {
        "task-scheduler"
    }

    async fn tick(&self) -> ConclaveResult<()> {
        self.run_cycle(Local::now().naive_local()).await.map(|_| ())
    }
}
