use chrono::{DateTime, Datelike, NaiveDateTime, Timelike, Utc, Weekday};
use conclave_core::{ConclaveError, ConclaveResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Status of a task owned by a goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Half-open hour-of-day window `[start, end)`. A range with `start > end`
/// wraps past midnight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: u32,
    pub end: u32,
    /// Applied to the task weight when this range selects the task.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_multiplier() -> f64 {
    1.0
}

impl TimeRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self {
            start,
            end,
            multiplier: 1.0,
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn contains(&self, hour: u32) -> bool {
        if self.start <= self.end {
            self.start <= hour && hour < self.end
        } else {
            hour >= self.start || hour < self.end
        }
    }
}

/// When a task may fire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskSchedule {
    /// Allowed windows; empty means any hour.
    #[serde(default)]
    pub time_ranges: Vec<TimeRange>,
    /// Allowed days; empty means every day.
    #[serde(default)]
    pub days_of_week: Vec<Weekday>,
}

impl TaskSchedule {
    /// Weight multiplier for a task firing at `at`, or `None` if the
    /// schedule excludes that moment. Only the first matching range counts.
    pub fn evaluate(&self, at: &NaiveDateTime) -> Option<f64> {
        if !self.days_of_week.is_empty() && !self.days_of_week.contains(&at.weekday()) {
            return None;
        }
        if self.time_ranges.is_empty() {
            return Some(1.0);
        }
        let hour = at.hour();
        self.time_ranges
            .iter()
            .find(|range| range.contains(hour))
            .map(|range| range.multiplier)
    }

    pub fn validate(&self) -> ConclaveResult<()> {
        for range in &self.time_ranges {
            if range.start > 24 || range.end > 24 {
                return Err(ConclaveError::Configuration(format!(
                    "time range {}-{} has an hour outside 0..=24",
                    range.start, range.end
                )));
            }
            if !range.multiplier.is_finite() || range.multiplier <= 0.0 {
                return Err(ConclaveError::Configuration(format!(
                    "time range {}-{} needs a positive multiplier",
                    range.start, range.end
                )));
            }
        }
        Ok(())
    }
}

/// Execution metrics recorded each time the scheduler fires a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub execution_count: u64,
    pub average_execution_ms: f64,
    pub last_executed: Option<DateTime<Utc>>,
}

impl ExecutionStats {
    pub fn record(&mut self, elapsed_ms: f64, at: DateTime<Utc>) {
        self.execution_count += 1;
        let n = self.execution_count as f64;
        self.average_execution_ms = (self.average_execution_ms * (n - 1.0) + elapsed_ms) / n;
        self.last_executed = Some(at);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    #[serde(default = "new_id")]
    pub id: String,
    pub goal_id: String,
    pub description: String,
    #[serde(default)]
    pub status: TaskStatus,
    /// Higher fires first.
    #[serde(default)]
    pub priority: i32,
    pub weight: Option<f64>,
    pub schedule: Option<TaskSchedule>,
    #[serde(default)]
    pub stats: ExecutionStats,
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

impl Task {
    pub fn new(goal_id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            goal_id: goal_id.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            priority: 0,
            weight: None,
            schedule: None,
            stats: ExecutionStats::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn with_schedule(mut self, schedule: TaskSchedule) -> Self {
        self.schedule = Some(schedule);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GoalStatus {
    #[default]
    Active,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    #[serde(default = "new_id")]
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub status: GoalStatus,
    /// Fraction complete in `[0, 1]`.
    #[serde(default)]
    pub progress: f64,
    /// Named success metrics and their targets.
    #[serde(default)]
    pub success_criteria: HashMap<String, f64>,
}

impl Goal {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            description: description.into(),
            priority: 0,
            status: GoalStatus::Active,
            progress: 0.0,
            success_criteria: HashMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_criterion(mut self, metric: impl Into<String>, target: f64) -> Self {
        self.success_criteria.insert(metric.into(), target);
        self
    }
}
