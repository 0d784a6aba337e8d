use crate::types::{Goal, GoalStatus, Task, TaskSchedule, TaskStatus};
use async_trait::async_trait;
use conclave_core::{ConclaveError, ConclaveResult};
use tokio::sync::RwLock;
use tracing::info;

/// Where the scheduler gets its work from and writes execution metrics back to.
#[async_trait]
pub trait TaskSource: Send + Sync {
    /// Pending tasks in creation order.
    async fn pending_tasks(&self) -> ConclaveResult<Vec<Task>>;

    /// Replace a stored task with an updated copy.
    async fn update_task(&self, task: Task) -> ConclaveResult<()>;
}

#[derive(Default)]
struct Registry {
    goals: Vec<Goal>,
    tasks: Vec<Task>,
}

/// In-memory goal and task registry.
pub struct GoalManager {
    registry: RwLock<Registry>,
    default_schedule: Option<TaskSchedule>,
}

impl GoalManager {
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            default_schedule: None,
        }
    }

    /// Schedule applied to tasks added without one.
    pub fn with_default_schedule(mut self, schedule: TaskSchedule) -> Self {
        self.default_schedule = Some(schedule);
        self
    }

    pub async fn add_goal(&self, goal: Goal) -> ConclaveResult<String> {
        let mut registry = self.registry.write().await;
        if registry.goals.iter().any(|g| g.id == goal.id) {
            return Err(ConclaveError::Validation(format!(
                "goal '{}' already exists",
                goal.id
            )));
        }
        let id = goal.id.clone();
        info!(goal_id = %id, "Goal added");
        registry.goals.push(goal);
        Ok(id)
    }

    pub async fn add_task(&self, mut task: Task) -> ConclaveResult<String> {
        if let Some(schedule) = &task.schedule {
            schedule.validate()?;
        }
        let mut registry = self.registry.write().await;
        if !registry.goals.iter().any(|g| g.id == task.goal_id) {
            return Err(ConclaveError::NotFound(format!("goal '{}'", task.goal_id)));
        }
        if registry.tasks.iter().any(|t| t.id == task.id) {
            return Err(ConclaveError::Validation(format!(
                "task '{}' already exists",
                task.id
            )));
        }
        if task.schedule.is_none() {
            task.schedule = self.default_schedule.clone();
        }
        let id = task.id.clone();
        info!(task_id = %id, goal_id = %task.goal_id, priority = task.priority, "Task added");
        registry.tasks.push(task);
        Ok(id)
    }

    pub async fn get_goal(&self, id: &str) -> Option<Goal> {
        let registry = self.registry.read().await;
        registry.goals.iter().find(|g| g.id == id).cloned()
    }

    pub async fn get_task(&self, id: &str) -> Option<Task> {
        let registry = self.registry.read().await;
        registry.tasks.iter().find(|t| t.id == id).cloned()
    }

    pub async fn goals(&self) -> Vec<Goal> {
        self.registry.read().await.goals.clone()
    }

    pub async fn tasks_for_goal(&self, goal_id: &str) -> Vec<Task> {
        let registry = self.registry.read().await;
        registry
            .tasks
            .iter()
            .filter(|t| t.goal_id == goal_id)
            .cloned()
            .collect()
    }

    /// Set a goal's progress, clamped to `[0, 1]`. Reaching 1 completes it.
    pub async fn set_goal_progress(&self, id: &str, progress: f64) -> ConclaveResult<()> {
        let mut registry = self.registry.write().await;
        let goal = registry
            .goals
            .iter_mut()
            .find(|g| g.id == id)
            .ok_or_else(|| ConclaveError::NotFound(format!("goal '{id}'")))?;
        goal.progress = progress.clamp(0.0, 1.0);
        if goal.progress >= 1.0 {
            goal.status = GoalStatus::Completed;
        }
        Ok(())
    }

    /// Mean progress across all goals; 0 when there are none.
    pub async fn overall_progress(&self) -> f64 {
        let registry = self.registry.read().await;
        if registry.goals.is_empty() {
            return 0.0;
        }
        let total: f64 = registry.goals.iter().map(|g| g.progress).sum();
        total / registry.goals.len() as f64
    }

    pub async fn complete_task(&self, id: &str) -> ConclaveResult<()> {
        self.set_task_status(id, TaskStatus::Completed).await
    }

    pub async fn fail_task(&self, id: &str) -> ConclaveResult<()> {
        self.set_task_status(id, TaskStatus::Failed).await
    }

    pub async fn start_task(&self, id: &str) -> ConclaveResult<()> {
        self.set_task_status(id, TaskStatus::InProgress).await
    }

    async fn set_task_status(&self, id: &str, status: TaskStatus) -> ConclaveResult<()> {
        let mut registry = self.registry.write().await;
        let task = registry
            .tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| ConclaveError::NotFound(format!("task '{id}'")))?;
        task.status = status;
        info!(task_id = %id, status = ?status, "Task status changed");
        Ok(())
    }
}

impl Default for GoalManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskSource for GoalManager {
    async fn pending_tasks(&self) -> ConclaveResult<Vec<Task>> {
        let registry = self.registry.read().await;
        Ok(registry
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .cloned()
            .collect())
    }

    async fn update_task(&self, task: Task) -> ConclaveResult<()> {
        let mut registry = self.registry.write().await;
        let slot = registry
            .tasks
            .iter_mut()
            .find(|t| t.id == task.id)
            .ok_or_else(|| ConclaveError::NotFound(format!("task '{}'", task.id)))?;
        *slot = task;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::TimeRange;

    async fn manager_with_goal() -> GoalManager {
        let manager = GoalManager::new();
        manager
            .add_goal(Goal::new("ship v1").with_id("g1"))
            .await
            .unwrap();
        manager
    }

    #[tokio::test]
    async fn test_add_task_requires_goal() {
        let manager = GoalManager::new();
        let err = manager.add_task(Task::new("missing", "x")).await.unwrap_err();
        assert!(matches!(err, ConclaveError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_duplicate_goal_rejected() {
        let manager = manager_with_goal().await;
        let err = manager
            .add_goal(Goal::new("again").with_id("g1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConclaveError::Validation(_)));
        assert_eq!(manager.goals().await.len(), 1);
    }

    #[tokio::test]
    async fn test_default_schedule_applied_only_when_absent() {
        let default = TaskSchedule {
            time_ranges: vec![TimeRange::new(9, 17)],
            days_of_week: Vec::new(),
        };
        let manager = GoalManager::new().with_default_schedule(default.clone());
        manager.add_goal(Goal::new("g").with_id("g1")).await.unwrap();

        let plain = manager.add_task(Task::new("g1", "plain")).await.unwrap();
        let own = TaskSchedule {
            time_ranges: vec![TimeRange::new(0, 6)],
            days_of_week: Vec::new(),
        };
        let custom = manager
            .add_task(Task::new("g1", "custom").with_schedule(own.clone()))
            .await
            .unwrap();

        assert_eq!(manager.get_task(&plain).await.unwrap().schedule, Some(default));
        assert_eq!(manager.get_task(&custom).await.unwrap().schedule, Some(own));
    }

    #[tokio::test]
    async fn test_pending_excludes_finished_tasks() {
        let manager = manager_with_goal().await;
        let a = manager.add_task(Task::new("g1", "a")).await.unwrap();
        let b = manager.add_task(Task::new("g1", "b")).await.unwrap();
        let c = manager.add_task(Task::new("g1", "c")).await.unwrap();
        manager.complete_task(&a).await.unwrap();
        manager.fail_task(&b).await.unwrap();

        let pending = manager.pending_tasks().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, c);
        assert!(manager.complete_task("nope").await.is_err());
    }

    #[tokio::test]
    async fn test_overall_progress_is_mean() {
        let manager = GoalManager::new();
        assert_eq!(manager.overall_progress().await, 0.0);
        manager.add_goal(Goal::new("a").with_id("a")).await.unwrap();
        manager.add_goal(Goal::new("b").with_id("b")).await.unwrap();
        manager.set_goal_progress("a", 0.5).await.unwrap();
        manager.set_goal_progress("b", 2.0).await.unwrap();

        assert!((manager.overall_progress().await - 0.75).abs() < 1e-9);
        assert_eq!(
            manager.get_goal("b").await.unwrap().status,
            GoalStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_update_task_replaces_copy() {
        let manager = manager_with_goal().await;
        let id = manager.add_task(Task::new("g1", "a")).await.unwrap();
        let mut task = manager.get_task(&id).await.unwrap();
        task.weight = Some(4.0);
        manager.update_task(task).await.unwrap();
        assert_eq!(manager.get_task(&id).await.unwrap().weight, Some(4.0));
        assert_eq!(manager.tasks_for_goal("g1").await.len(), 1);
    }
}
