//! `conclave.toml` loading and validation.
//!
//! Each section deserializes into the config type of the crate that owns it;
//! this module only composes them and checks cross-section references.

use anyhow::Context;
use conclave_agent::{ModelConfig, RuntimeConfig};
use conclave_core::{ConclaveError, ConclaveResult};
use conclave_orchestrator::{
    AgentTeam, Goal, GoalManager, SchedulerConfig, SwarmConfig, Task, TaskSchedule,
};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Environment variable that overrides `model.api_key`.
pub const API_KEY_ENV: &str = "CONCLAVE_API_KEY";

#[derive(Debug, Deserialize)]
pub struct ConclaveConfig {
    pub model: ModelConfig,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub swarm: SwarmConfig,
    /// Applied to tasks that carry no schedule of their own.
    pub schedule: Option<TaskSchedule>,
    #[serde(default)]
    pub goals: Vec<Goal>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub teams: Vec<AgentTeam>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl ConclaveConfig {
    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse `path`, then apply the API key from the environment.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        let mut config = Self::from_toml(&text)
            .with_context(|| format!("Failed to parse config file '{}'", path.display()))?;
        config.override_api_key(std::env::var(API_KEY_ENV).ok());
        Ok(config)
    }

    /// Replace the configured API key with `key` unless it is empty.
    pub fn override_api_key(&mut self, key: Option<String>) {
        if let Some(key) = key.filter(|k| !k.trim().is_empty()) {
            self.model.api_key = key;
        }
    }

    pub fn validate(&self) -> ConclaveResult<()> {
        if self.model.model_id.trim().is_empty() {
            return Err(ConclaveError::Configuration(
                "model.model_id must not be empty".into(),
            ));
        }
        self.runtime.validate()?;
        self.scheduler.validate()?;
        self.swarm.validate()?;
        if let Some(schedule) = &self.schedule {
            schedule.validate()?;
        }

        let goal_ids: HashSet<&str> = self.goals.iter().map(|g| g.id.as_str()).collect();
        if goal_ids.len() != self.goals.len() {
            return Err(ConclaveError::Configuration(
                "goal ids must be unique".into(),
            ));
        }
        for task in &self.tasks {
            if !goal_ids.contains(task.goal_id.as_str()) {
                return Err(ConclaveError::Configuration(format!(
                    "task '{}' references unknown goal '{}'",
                    task.id, task.goal_id
                )));
            }
            if let Some(schedule) = &task.schedule {
                schedule.validate()?;
            }
        }
        for team in &self.teams {
            team.validate()?;
        }
        Ok(())
    }

    /// A goal manager seeded with the configured goals and tasks.
    pub async fn goal_manager(&self) -> ConclaveResult<GoalManager> {
        let manager = match &self.schedule {
            Some(schedule) => GoalManager::new().with_default_schedule(schedule.clone()),
            None => GoalManager::new(),
        };
        for goal in &self.goals {
            manager.add_goal(goal.clone()).await?;
        }
        for task in &self.tasks {
            manager.add_task(task.clone()).await?;
        }
        Ok(manager)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Weekday;
    use std::io::Write;

    const SAMPLE: &str = include_str!("../../../conclave.example.toml");

    fn minimal() -> ConclaveConfig {
        ConclaveConfig::from_toml("[model]\nmodel_id = \"gpt-4o-mini\"\n").unwrap()
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = minimal();
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.runtime.max_context_size, 100);
        assert_eq!(config.scheduler.batch_size, 5);
        assert_eq!(config.swarm.max_agents, 10);
        assert!(config.schedule.is_none());
        assert!(config.goals.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sample_config_parses_and_validates() {
        let config = ConclaveConfig::from_toml(SAMPLE).unwrap();
        config.validate().unwrap();
        assert!(!config.goals.is_empty());
        assert!(!config.teams.is_empty());

        let scheduled = config
            .tasks
            .iter()
            .find_map(|t| t.schedule.as_ref())
            .expect("sample has a scheduled task");
        assert!(scheduled.days_of_week.contains(&Weekday::Mon));
    }

    #[test]
    fn test_task_with_unknown_goal_is_rejected() {
        let text = r#"
            [model]
            model_id = "m"

            [[tasks]]
            goal_id = "missing"
            description = "orphan"
        "#;
        let config = ConclaveConfig::from_toml(text).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConclaveError::Configuration(_))
        ));
    }

    #[test]
    fn test_invalid_team_is_rejected() {
        let text = r#"
            [model]
            model_id = "m"

            [[teams]]
            id = "ops"
            members = [{ agent_id = "a", role = "dev" }]
            hierarchy = { leader_id = "nobody" }
        "#;
        let config = ConclaveConfig::from_toml(text).unwrap();
        assert!(matches!(config.validate(), Err(ConclaveError::Validation(_))));
    }

    #[test]
    fn test_bad_swarm_bounds_are_rejected() {
        let mut config = minimal();
        config.swarm.min_agents = 20;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_api_key_override() {
        let mut config = minimal();
        config.model.api_key = "from-file".into();
        config.override_api_key(Some("  ".into()));
        assert_eq!(config.model.api_key, "from-file");
        config.override_api_key(Some("from-env".into()));
        assert_eq!(config.model.api_key, "from-env");
        config.override_api_key(None);
        assert_eq!(config.model.api_key, "from-env");
    }

    #[tokio::test]
    async fn test_load_from_disk_and_seed_goals() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = ConclaveConfig::load(file.path()).await.unwrap();

        let manager = config.goal_manager().await.unwrap();
        assert_eq!(manager.goals().await.len(), config.goals.len());
        let unscheduled = config.tasks.iter().find(|t| t.schedule.is_none()).unwrap();
        let stored = manager.get_task(&unscheduled.id).await.unwrap();
        assert_eq!(stored.schedule, config.schedule);
    }

    #[tokio::test]
    async fn test_load_missing_file_names_the_path() {
        let err = ConclaveConfig::load(Path::new("/nonexistent/conclave.toml"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/conclave.toml"));
    }
}
