use crate::handlers::{DeliveryReport, HandlerRegistry};
use crate::types::Task;
use chrono::{DateTime, Utc};
use conclave_core::{ConclaveError, ConclaveResult, Message, MessageKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Maximum concurrent tasks assigned to one swarm agent.
pub const MAX_TASKS_PER_AGENT: usize = 3;

const DEFAULT_SPECIALIZATION: &str = "general";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmConfig {
    #[serde(default = "default_max_agents")]
    pub max_agents: usize,
    #[serde(default = "default_min_agents")]
    pub min_agents: usize,
    /// Utilization at or above which `auto_scale` spawns an agent.
    #[serde(default = "default_spawn_threshold")]
    pub spawn_threshold: f64,
    /// Utilization at or below which `auto_scale` merges two agents.
    #[serde(default = "default_merge_threshold")]
    pub merge_threshold: f64,
    /// Allowed specializations; empty allows any label.
    #[serde(default)]
    pub specializations: Vec<String>,
    /// Fraction of live agents that must vote before a decision is final.
    #[serde(default = "default_consensus_threshold")]
    pub consensus_threshold: f64,
}

fn default_max_agents() -> usize {
    10
}

fn default_min_agents() -> usize {
    1
}

fn default_spawn_threshold() -> f64 {
    0.8
}

fn default_merge_threshold() -> f64 {
    0.2
}

fn default_consensus_threshold() -> f64 {
    0.6
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            max_agents: default_max_agents(),
            min_agents: default_min_agents(),
            spawn_threshold: default_spawn_threshold(),
            merge_threshold: default_merge_threshold(),
            specializations: Vec::new(),
            consensus_threshold: default_consensus_threshold(),
        }
    }
}

impl SwarmConfig {
    pub fn validate(&self) -> ConclaveResult<()> {
        if self.max_agents == 0 {
            return Err(ConclaveError::Configuration(
                "swarm max_agents must be at least 1".into(),
            ));
        }
        if self.min_agents > self.max_agents {
            return Err(ConclaveError::Configuration(format!(
                "swarm min_agents ({}) exceeds max_agents ({})",
                self.min_agents, self.max_agents
            )));
        }
        for (name, value) in [
            ("spawn_threshold", self.spawn_threshold),
            ("merge_threshold", self.merge_threshold),
            ("consensus_threshold", self.consensus_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConclaveError::Configuration(format!(
                    "swarm {name} must be within [0, 1], got {value}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SwarmAgent {
    pub id: String,
    pub specialization: String,
    pub assigned_tasks: BTreeSet<String>,
    pub spawned_at: DateTime<Utc>,
}

impl SwarmAgent {
    fn new(specialization: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            specialization,
            assigned_tasks: BTreeSet::new(),
            spawned_at: Utc::now(),
        }
    }

    pub fn has_capacity(&self) -> bool {
        self.assigned_tasks.len() < MAX_TASKS_PER_AGENT
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Vote {
    pub option: String,
    pub confidence: f64,
}

/// An open ballot. One vote per agent; a later vote replaces the earlier one.
#[derive(Debug, Clone, Serialize)]
pub struct SwarmDecision {
    pub topic: String,
    pub options: Vec<String>,
    pub votes: HashMap<String, Vote>,
    /// Share of cast votes held by the leading option.
    pub confidence: f64,
    /// Set once the ballot has been observed at quorum.
    pub reached_quorum: bool,
    pub proposed_at: DateTime<Utc>,
}

impl SwarmDecision {
    /// Leading option and its vote count. Ties go to the option listed first.
    pub fn leader(&self) -> Option<(&str, usize)> {
        let mut best: Option<(&str, usize)> = None;
        for option in &self.options {
            let count = self.votes.values().filter(|v| &v.option == option).count();
            if count > 0 && best.map_or(true, |(_, c)| count > c) {
                best = Some((option, count));
            }
        }
        best
    }

    fn recompute(&mut self) {
        let cast = self.votes.len();
        self.confidence = match self.leader() {
            Some((_, count)) if cast > 0 => count as f64 / cast as f64,
            _ => 0.0,
        };
    }
}

/// A decision that has reached quorum.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Consensus {
    pub topic: String,
    pub decision: String,
    pub confidence: f64,
    pub votes_cast: usize,
    pub quorum: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwarmMetrics {
    pub agent_count: usize,
    /// Number of agents currently holding each task.
    pub task_assignments: BTreeMap<String, usize>,
    pub consensus_rate: f64,
    pub resource_utilization: f64,
    pub specializations: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScaleAction {
    None,
    Spawned(String),
    Merged { merged: Vec<String>, replacement: String },
}

#[derive(Default)]
struct SwarmState {
    /// Live agents in spawn order.
    agents: Vec<SwarmAgent>,
    decisions: HashMap<String, SwarmDecision>,
    next_specialization: usize,
}

impl SwarmState {
    fn index_of(&self, id: &str) -> Option<usize> {
        self.agents.iter().position(|a| a.id == id)
    }

    fn utilization(&self) -> f64 {
        if self.agents.is_empty() {
            return 0.0;
        }
        let assigned: usize = self.agents.iter().map(|a| a.assigned_tasks.len()).sum();
        assigned as f64 / (self.agents.len() * MAX_TASKS_PER_AGENT) as f64
    }

    /// Drop `ids` from the pool and strike their votes from every ballot.
    fn retire(&mut self, ids: &[String]) {
        self.agents.retain(|a| !ids.contains(&a.id));
        for decision in self.decisions.values_mut() {
            let before = decision.votes.len();
            decision.votes.retain(|agent_id, _| !ids.contains(agent_id));
            if decision.votes.len() != before {
                decision.recompute();
            }
        }
    }
}

/// Manages a dynamically sized pool of specialized agents: spawning,
/// merging, redundant task distribution, and quorum voting.
///
/// All registry mutations happen under one write lock, so each operation is
/// applied whole or not at all.
pub struct SwarmCoordinator {
    config: SwarmConfig,
    state: RwLock<SwarmState>,
    handlers: Arc<HandlerRegistry>,
}

impl SwarmCoordinator {
    pub fn new(config: SwarmConfig, handlers: Arc<HandlerRegistry>) -> ConclaveResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: RwLock::new(SwarmState::default()),
            handlers,
        })
    }

    pub fn config(&self) -> &SwarmConfig {
        &self.config
    }

    /// Spawn agents until the pool holds `min_agents`, cycling through the
    /// configured specializations. Returns the new agent ids.
    pub async fn initialize(&self) -> ConclaveResult<Vec<String>> {
        let mut state = self.state.write().await;
        let mut spawned = Vec::new();
        while state.agents.len() < self.config.min_agents {
            let specialization = self.next_specialization(&mut state);
            spawned.push(self.spawn_locked(&mut state, specialization)?);
        }
        info!(agents = state.agents.len(), "Swarm initialized");
        Ok(spawned)
    }

    /// Create and activate an agent. Fails with `CapacityExceeded` at
    /// `max_agents`.
    pub async fn spawn_agent(&self, specialization: &str) -> ConclaveResult<String> {
        if !self.config.specializations.is_empty()
            && !self.config.specializations.iter().any(|s| s == specialization)
        {
            return Err(ConclaveError::Validation(format!(
                "unknown specialization '{specialization}'"
            )));
        }
        let mut state = self.state.write().await;
        self.spawn_locked(&mut state, specialization.to_string())
    }

    fn spawn_locked(&self, state: &mut SwarmState, specialization: String) -> ConclaveResult<String> {
        if state.agents.len() >= self.config.max_agents {
            return Err(ConclaveError::CapacityExceeded(format!(
                "swarm already has {} agents",
                self.config.max_agents
            )));
        }
        let agent = SwarmAgent::new(specialization);
        let id = agent.id.clone();
        info!(agent_id = %id, specialization = %agent.specialization, "Swarm agent spawned");
        state.agents.push(agent);
        Ok(id)
    }

    fn next_specialization(&self, state: &mut SwarmState) -> String {
        if self.config.specializations.is_empty() {
            return DEFAULT_SPECIALIZATION.to_string();
        }
        let index = state.next_specialization % self.config.specializations.len();
        state.next_specialization += 1;
        self.config.specializations[index].clone()
    }

    /// Replace `ids` with one fresh agent carrying the first merged agent's
    /// specialization. Assigned tasks are not carried over.
    pub async fn merge_agents(&self, ids: &[String]) -> ConclaveResult<String> {
        let replacement = {
            let mut state = self.state.write().await;
            self.merge_locked(&mut state, ids)?
        };
        self.unregister_retired(ids).await;
        Ok(replacement)
    }

    fn merge_locked(&self, state: &mut SwarmState, ids: &[String]) -> ConclaveResult<String> {
        if ids.len() < 2 {
            return Err(ConclaveError::Validation(
                "merging needs at least two agents".into(),
            ));
        }
        let unique: BTreeSet<&String> = ids.iter().collect();
        if unique.len() != ids.len() {
            return Err(ConclaveError::Validation(
                "merge list contains duplicate agent ids".into(),
            ));
        }
        let mut specialization = None;
        for id in ids {
            let index = state
                .index_of(id)
                .ok_or_else(|| ConclaveError::NotFound(format!("swarm agent '{id}'")))?;
            specialization.get_or_insert_with(|| state.agents[index].specialization.clone());
        }
        let remaining = state.agents.len() - ids.len() + 1;
        if remaining < self.config.min_agents {
            return Err(ConclaveError::InvariantViolation(format!(
                "merge would leave {remaining} agents, below the minimum of {}",
                self.config.min_agents
            )));
        }

        let dropped_tasks: usize = state
            .agents
            .iter()
            .filter(|a| ids.contains(&a.id))
            .map(|a| a.assigned_tasks.len())
            .sum();
        state.retire(ids);
        let replacement = SwarmAgent::new(specialization.unwrap_or_else(|| DEFAULT_SPECIALIZATION.into()));
        let replacement_id = replacement.id.clone();
        state.agents.push(replacement);
        info!(
            merged = ids.len(),
            replacement = %replacement_id,
            dropped_tasks,
            "Swarm agents merged"
        );
        Ok(replacement_id)
    }

    /// Retire a single agent. Fails with `InvariantViolation` if that would
    /// drop the pool below `min_agents`.
    pub async fn shutdown_agent(&self, id: &str) -> ConclaveResult<()> {
        let retired = [id.to_string()];
        {
            let mut state = self.state.write().await;
            if state.index_of(id).is_none() {
                return Err(ConclaveError::NotFound(format!("swarm agent '{id}'")));
            }
            if state.agents.len() <= self.config.min_agents {
                return Err(ConclaveError::InvariantViolation(format!(
                    "swarm cannot shrink below {} agents",
                    self.config.min_agents
                )));
            }
            state.retire(&retired);
        }
        self.unregister_retired(&retired).await;
        info!(agent_id = %id, "Swarm agent shut down");
        Ok(())
    }

    async fn unregister_retired(&self, ids: &[String]) {
        for id in ids {
            if self.handlers.unregister(id).await {
                debug!(agent_id = %id, "Handler removed for retired agent");
            }
        }
    }

    /// Assign `task` to `ceil(sqrt(n))` of the `n` agents with spare
    /// capacity, least loaded first, and notify their handlers. Spawns one
    /// agent if none has capacity; fails with `CapacityExceeded` if the pool
    /// is already full.
    pub async fn distribute_task(&self, task: &Task) -> ConclaveResult<Vec<String>> {
        let assignees = {
            let mut state = self.state.write().await;
            let mut candidates: Vec<usize> = state
                .agents
                .iter()
                .enumerate()
                .filter(|(_, a)| a.has_capacity() && !a.assigned_tasks.contains(&task.id))
                .map(|(i, _)| i)
                .collect();

            if candidates.is_empty() {
                if state.agents.len() >= self.config.max_agents {
                    return Err(ConclaveError::CapacityExceeded(format!(
                        "no swarm agent can take task '{}'",
                        task.id
                    )));
                }
                let specialization = self.next_specialization(&mut state);
                self.spawn_locked(&mut state, specialization)?;
                candidates.push(state.agents.len() - 1);
            }

            // Stable: equal loads keep spawn order.
            candidates.sort_by_key(|&i| state.agents[i].assigned_tasks.len());
            let fan_out = ceil_sqrt(candidates.len());
            let mut assignees = Vec::with_capacity(fan_out);
            for &i in candidates.iter().take(fan_out) {
                let agent = &mut state.agents[i];
                agent.assigned_tasks.insert(task.id.clone());
                assignees.push(agent.id.clone());
            }
            assignees
        };

        info!(task_id = %task.id, assignees = assignees.len(), "Task distributed");
        let message = Message::system(task.description.clone()).with_kind(MessageKind::TaskAssignment {
            task_id: task.id.clone(),
        });
        let report = self.handlers.deliver(&assignees, &message).await;
        log_delivery(&task.id, &report);
        Ok(assignees)
    }

    /// Record progress (0-100) on a task. At 100 or more the task is released
    /// from the agent.
    pub async fn report_task_progress(
        &self,
        agent_id: &str,
        task_id: &str,
        progress: f64,
    ) -> ConclaveResult<()> {
        let mut state = self.state.write().await;
        let index = state
            .index_of(agent_id)
            .ok_or_else(|| ConclaveError::NotFound(format!("swarm agent '{agent_id}'")))?;
        let agent = &mut state.agents[index];
        if !agent.assigned_tasks.contains(task_id) {
            return Err(ConclaveError::NotFound(format!(
                "task '{task_id}' is not assigned to agent '{agent_id}'"
            )));
        }
        debug!(agent_id, task_id, progress, "Task progress reported");
        if progress >= 100.0 {
            agent.assigned_tasks.remove(task_id);
            info!(agent_id, task_id, "Task released from agent");
        }
        Ok(())
    }

    /// Open a ballot with no votes.
    pub async fn propose_decision(&self, topic: &str, options: Vec<String>) -> ConclaveResult<()> {
        let mut deduped: Vec<String> = Vec::with_capacity(options.len());
        for option in options {
            if !deduped.contains(&option) {
                deduped.push(option);
            }
        }
        if deduped.is_empty() {
            return Err(ConclaveError::Validation(format!(
                "decision '{topic}' needs at least one option"
            )));
        }
        let mut state = self.state.write().await;
        if state.decisions.contains_key(topic) {
            return Err(ConclaveError::Validation(format!(
                "decision '{topic}' is already open"
            )));
        }
        state.decisions.insert(
            topic.to_string(),
            SwarmDecision {
                topic: topic.to_string(),
                options: deduped,
                votes: HashMap::new(),
                confidence: 0.0,
                reached_quorum: false,
                proposed_at: Utc::now(),
            },
        );
        info!(topic, "Decision proposed");
        Ok(())
    }

    /// Record `agent_id`'s vote, replacing any earlier vote from that agent.
    pub async fn submit_vote(
        &self,
        agent_id: &str,
        topic: &str,
        vote: &str,
        confidence: f64,
    ) -> ConclaveResult<()> {
        let mut state = self.state.write().await;
        if state.index_of(agent_id).is_none() {
            return Err(ConclaveError::NotFound(format!("swarm agent '{agent_id}'")));
        }
        let quorum = quorum(self.config.consensus_threshold, state.agents.len());
        let decision = state
            .decisions
            .get_mut(topic)
            .ok_or_else(|| ConclaveError::NotFound(format!("decision '{topic}'")))?;
        if !decision.options.iter().any(|o| o == vote) {
            return Err(ConclaveError::Validation(format!(
                "'{vote}' is not an option for decision '{topic}'"
            )));
        }
        let previous = decision.votes.insert(
            agent_id.to_string(),
            Vote {
                option: vote.to_string(),
                confidence: confidence.clamp(0.0, 1.0),
            },
        );
        if previous.is_some() {
            debug!(agent_id, topic, "Vote replaced");
        }
        decision.recompute();
        if decision.votes.len() >= quorum {
            decision.reached_quorum = true;
        }
        Ok(())
    }

    /// The decision for `topic` once `ceil(consensus_threshold * agents)`
    /// votes are in; `None` before that.
    pub async fn get_consensus(&self, topic: &str) -> ConclaveResult<Option<Consensus>> {
        let mut state = self.state.write().await;
        let quorum = quorum(self.config.consensus_threshold, state.agents.len());
        let decision = state
            .decisions
            .get_mut(topic)
            .ok_or_else(|| ConclaveError::NotFound(format!("decision '{topic}'")))?;
        let votes_cast = decision.votes.len();
        if votes_cast < quorum {
            return Ok(None);
        }
        decision.reached_quorum = true;
        Ok(decision.leader().map(|(option, _)| Consensus {
            topic: topic.to_string(),
            decision: option.to_string(),
            confidence: decision.confidence,
            votes_cast,
            quorum,
        }))
    }

    pub async fn get_decision(&self, topic: &str) -> Option<SwarmDecision> {
        self.state.read().await.decisions.get(topic).cloned()
    }

    pub async fn metrics(&self) -> SwarmMetrics {
        let state = self.state.read().await;
        let mut task_assignments = BTreeMap::new();
        let mut specializations = BTreeMap::new();
        for agent in &state.agents {
            for task in &agent.assigned_tasks {
                *task_assignments.entry(task.clone()).or_insert(0) += 1;
            }
            *specializations
                .entry(agent.specialization.clone())
                .or_insert(0) += 1;
        }
        let proposed = state.decisions.len();
        let reached = state.decisions.values().filter(|d| d.reached_quorum).count();
        SwarmMetrics {
            agent_count: state.agents.len(),
            task_assignments,
            consensus_rate: if proposed == 0 {
                0.0
            } else {
                reached as f64 / proposed as f64
            },
            resource_utilization: state.utilization(),
            specializations,
        }
    }

    /// Grow by one agent when utilization is at or above the spawn
    /// threshold, or merge the two least-loaded agents when it is at or
    /// below the merge threshold.
    pub async fn auto_scale(&self) -> ConclaveResult<ScaleAction> {
        let action = self.apply_scaling().await?;
        if let ScaleAction::Merged { merged, .. } = &action {
            self.unregister_retired(merged).await;
        }
        Ok(action)
    }

    async fn apply_scaling(&self) -> ConclaveResult<ScaleAction> {
        let mut state = self.state.write().await;
        let utilization = state.utilization();
        let count = state.agents.len();

        if utilization >= self.config.spawn_threshold && count < self.config.max_agents {
            let specialization = self.next_specialization(&mut state);
            let id = self.spawn_locked(&mut state, specialization)?;
            info!(utilization, agents = count + 1, "Swarm scaled up");
            return Ok(ScaleAction::Spawned(id));
        }

        if utilization <= self.config.merge_threshold && count > self.config.min_agents && count >= 2 {
            let mut by_load: Vec<&SwarmAgent> = state.agents.iter().collect();
            by_load.sort_by_key(|a| a.assigned_tasks.len());
            let merged: Vec<String> = by_load.iter().take(2).map(|a| a.id.clone()).collect();
            let replacement = self.merge_locked(&mut state, &merged)?;
            info!(utilization, agents = count - 1, "Swarm scaled down");
            return Ok(ScaleAction::Merged {
                merged,
                replacement,
            });
        }

        Ok(ScaleAction::None)
    }

    pub async fn agents(&self) -> Vec<SwarmAgent> {
        self.state.read().await.agents.clone()
    }

    pub async fn agent_count(&self) -> usize {
        self.state.read().await.agents.len()
    }
}

fn log_delivery(task_id: &str, report: &DeliveryReport) {
    if !report.is_complete() {
        warn!(
            task_id,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            missing = report.missing.len(),
            "Task assignment not delivered to every agent"
        );
    }
}

/// Votes needed for a decision: `ceil(threshold * agents)`, at least one.
fn quorum(threshold: f64, agents: usize) -> usize {
    ((threshold * agents as f64).ceil() as usize).max(1)
}

fn ceil_sqrt(n: usize) -> usize {
    let mut root = 0;
    while root * root < n {
        root += 1;
    }
    root
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn coordinator(config: SwarmConfig) -> SwarmCoordinator {
        SwarmCoordinator::new(config, Arc::new(HandlerRegistry::new())).unwrap()
    }

    #[test]
    fn test_ceil_sqrt() {
        assert_eq!(ceil_sqrt(0), 0);
        assert_eq!(ceil_sqrt(1), 1);
        assert_eq!(ceil_sqrt(4), 2);
        assert_eq!(ceil_sqrt(5), 3);
        assert_eq!(ceil_sqrt(9), 3);
        assert_eq!(ceil_sqrt(10), 4);
    }

    #[test]
    fn test_quorum() {
        assert_eq!(quorum(0.6, 5), 3);
        assert_eq!(quorum(0.5, 4), 2);
        assert_eq!(quorum(0.6, 0), 1);
        assert_eq!(quorum(0.0, 10), 1);
    }

    #[test]
    fn test_config_validation() {
        assert!(SwarmConfig::default().validate().is_ok());
        let inverted = SwarmConfig {
            min_agents: 5,
            max_agents: 2,
            ..SwarmConfig::default()
        };
        assert!(inverted.validate().is_err());
        let bad_threshold = SwarmConfig {
            consensus_threshold: 1.5,
            ..SwarmConfig::default()
        };
        assert!(bad_threshold.validate().is_err());
    }

    #[tokio::test]
    async fn test_initialize_cycles_specializations() {
        let swarm = coordinator(SwarmConfig {
            min_agents: 3,
            specializations: vec!["research".into(), "writing".into()],
            ..SwarmConfig::default()
        });
        let ids = swarm.initialize().await.unwrap();
        assert_eq!(ids.len(), 3);
        let specs: Vec<String> = swarm
            .agents()
            .await
            .into_iter()
            .map(|a| a.specialization)
            .collect();
        assert_eq!(specs, vec!["research", "writing", "research"]);
    }

    #[tokio::test]
    async fn test_unknown_specialization_rejected() {
        let swarm = coordinator(SwarmConfig {
            specializations: vec!["research".into()],
            ..SwarmConfig::default()
        });
        let err = swarm.spawn_agent("cooking").await.unwrap_err();
        assert!(matches!(err, ConclaveError::Validation(_)));
        assert_eq!(swarm.agent_count().await, 0);
    }

    #[tokio::test]
    async fn test_merge_requires_two_and_respects_minimum() {
        let swarm = coordinator(SwarmConfig {
            min_agents: 2,
            ..SwarmConfig::default()
        });
        let a = swarm.spawn_agent("x").await.unwrap();
        let b = swarm.spawn_agent("y").await.unwrap();

        let single = swarm.merge_agents(&[a.clone()]).await.unwrap_err();
        assert!(matches!(single, ConclaveError::Validation(_)));

        let below_min = swarm.merge_agents(&[a.clone(), b.clone()]).await.unwrap_err();
        assert!(matches!(below_min, ConclaveError::InvariantViolation(_)));
        assert_eq!(swarm.agent_count().await, 2);

        let c = swarm.spawn_agent("z").await.unwrap();
        let replacement = swarm.merge_agents(&[a.clone(), c]).await.unwrap();
        let agents = swarm.agents().await;
        assert_eq!(agents.len(), 2);
        assert!(agents.iter().any(|ag| ag.id == b));
        let fresh = agents.iter().find(|ag| ag.id == replacement).unwrap();
        assert_eq!(fresh.specialization, "x");
        assert!(fresh.assigned_tasks.is_empty());
    }

    #[tokio::test]
    async fn test_merge_unknown_agent_is_not_found() {
        let swarm = coordinator(SwarmConfig::default());
        let a = swarm.spawn_agent("x").await.unwrap();
        let err = swarm
            .merge_agents(&[a, "ghost".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, ConclaveError::NotFound(_)));
        assert_eq!(swarm.agent_count().await, 1);
    }

    #[tokio::test]
    async fn test_distribute_spawns_when_everyone_is_busy() {
        let swarm = coordinator(SwarmConfig {
            max_agents: 2,
            ..SwarmConfig::default()
        });
        swarm.spawn_agent("x").await.unwrap();
        for i in 0..3 {
            let assigned = swarm
                .distribute_task(&Task::new("g", "work").with_id(format!("t{i}")))
                .await
                .unwrap();
            assert_eq!(assigned.len(), 1);
        }
        assert_eq!(swarm.agent_count().await, 1);

        let assigned = swarm
            .distribute_task(&Task::new("g", "work").with_id("t3"))
            .await
            .unwrap();
        assert_eq!(swarm.agent_count().await, 2);
        assert_eq!(assigned.len(), 1);

        for i in 4..6 {
            swarm
                .distribute_task(&Task::new("g", "work").with_id(format!("t{i}")))
                .await
                .unwrap();
        }
        let err = swarm
            .distribute_task(&Task::new("g", "work").with_id("t6"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConclaveError::CapacityExceeded(_)));
    }

    #[tokio::test]
    async fn test_progress_releases_task() {
        let swarm = coordinator(SwarmConfig::default());
        let agent = swarm.spawn_agent("x").await.unwrap();
        swarm
            .distribute_task(&Task::new("g", "work").with_id("t1"))
            .await
            .unwrap();

        let err = swarm
            .report_task_progress(&agent, "t9", 50.0)
            .await
            .unwrap_err();
        assert!(matches!(err, ConclaveError::NotFound(_)));

        swarm.report_task_progress(&agent, "t1", 50.0).await.unwrap();
        assert_eq!(swarm.agents().await[0].assigned_tasks.len(), 1);
        swarm.report_task_progress(&agent, "t1", 100.0).await.unwrap();
        assert!(swarm.agents().await[0].assigned_tasks.is_empty());
    }

    #[tokio::test]
    async fn test_vote_rejections() {
        let swarm = coordinator(SwarmConfig::default());
        let agent = swarm.spawn_agent("x").await.unwrap();
        swarm
            .propose_decision("lang", vec!["rust".into(), "go".into()])
            .await
            .unwrap();

        assert!(matches!(
            swarm.submit_vote(&agent, "missing", "rust", 0.9).await,
            Err(ConclaveError::NotFound(_))
        ));
        assert!(matches!(
            swarm.submit_vote(&agent, "lang", "cobol", 0.9).await,
            Err(ConclaveError::Validation(_))
        ));
        assert!(swarm.get_decision("lang").await.unwrap().votes.is_empty());
    }

    #[tokio::test]
    async fn test_last_vote_wins() {
        let swarm = coordinator(SwarmConfig {
            consensus_threshold: 1.0,
            ..SwarmConfig::default()
        });
        let a = swarm.spawn_agent("x").await.unwrap();
        let b = swarm.spawn_agent("x").await.unwrap();
        swarm
            .propose_decision("lang", vec!["rust".into(), "go".into()])
            .await
            .unwrap();
        swarm.submit_vote(&a, "lang", "go", 0.5).await.unwrap();
        swarm.submit_vote(&b, "lang", "rust", 0.5).await.unwrap();
        swarm.submit_vote(&a, "lang", "rust", 0.9).await.unwrap();

        let consensus = swarm.get_consensus("lang").await.unwrap().unwrap();
        assert_eq!(consensus.decision, "rust");
        assert_eq!(consensus.votes_cast, 2);
        assert_eq!(consensus.confidence, 1.0);
    }

    #[tokio::test]
    async fn test_tie_goes_to_first_option() {
        let swarm = coordinator(SwarmConfig {
            consensus_threshold: 1.0,
            ..SwarmConfig::default()
        });
        let a = swarm.spawn_agent("x").await.unwrap();
        let b = swarm.spawn_agent("x").await.unwrap();
        swarm
            .propose_decision("lang", vec!["rust".into(), "go".into()])
            .await
            .unwrap();
        swarm.submit_vote(&a, "lang", "go", 0.5).await.unwrap();
        swarm.submit_vote(&b, "lang", "rust", 0.5).await.unwrap();

        let consensus = swarm.get_consensus("lang").await.unwrap().unwrap();
        assert_eq!(consensus.decision, "rust");
        assert_eq!(consensus.confidence, 0.5);
    }

    #[tokio::test]
    async fn test_auto_scale_up_and_down() {
        let swarm = coordinator(SwarmConfig {
            min_agents: 1,
            max_agents: 3,
            ..SwarmConfig::default()
        });
        swarm.initialize().await.unwrap();
        for i in 0..3 {
            swarm
                .distribute_task(&Task::new("g", "w").with_id(format!("t{i}")))
                .await
                .unwrap();
        }
        // 3 of 3 slots used.
        assert!(matches!(
            swarm.auto_scale().await.unwrap(),
            ScaleAction::Spawned(_)
        ));
        assert_eq!(swarm.agent_count().await, 2);

        // 3 of 6 slots used: between thresholds.
        assert_eq!(swarm.auto_scale().await.unwrap(), ScaleAction::None);

        let busy = swarm.agents().await[0].id.clone();
        for i in 0..3 {
            swarm
                .report_task_progress(&busy, &format!("t{i}"), 100.0)
                .await
                .unwrap();
        }
        assert!(matches!(
            swarm.auto_scale().await.unwrap(),
            ScaleAction::Merged { .. }
        ));
        assert_eq!(swarm.agent_count().await, 1);
        assert_eq!(swarm.auto_scale().await.unwrap(), ScaleAction::None);
    }

    #[tokio::test]
    async fn test_merged_voters_no_longer_count_toward_quorum() {
        let swarm = coordinator(SwarmConfig {
            min_agents: 3,
            consensus_threshold: 1.0,
            ..SwarmConfig::default()
        });
        let ids = swarm.initialize().await.unwrap();
        swarm
            .propose_decision("deploy", vec!["yes".into(), "no".into()])
            .await
            .unwrap();
        swarm.submit_vote(&ids[0], "deploy", "yes", 0.9).await.unwrap();
        swarm.submit_vote(&ids[1], "deploy", "yes", 0.9).await.unwrap();

        swarm
            .merge_agents(&[ids[0].clone(), ids[1].clone()])
            .await
            .unwrap();
        assert_eq!(swarm.agent_count().await, 2);
        assert_eq!(swarm.get_consensus("deploy").await.unwrap(), None);
        let decision = swarm.get_decision("deploy").await.unwrap();
        assert!(decision.votes.is_empty());
        assert_eq!(decision.confidence, 0.0);
    }

    #[tokio::test]
    async fn test_shutdown_strikes_vote_and_recomputes_confidence() {
        let swarm = coordinator(SwarmConfig {
            min_agents: 1,
            consensus_threshold: 0.5,
            ..SwarmConfig::default()
        });
        let a = swarm.spawn_agent("x").await.unwrap();
        let b = swarm.spawn_agent("x").await.unwrap();
        let c = swarm.spawn_agent("x").await.unwrap();
        swarm
            .propose_decision("lang", vec!["rust".into(), "go".into()])
            .await
            .unwrap();
        swarm.submit_vote(&a, "lang", "go", 0.5).await.unwrap();
        swarm.submit_vote(&b, "lang", "rust", 0.5).await.unwrap();
        swarm.submit_vote(&c, "lang", "go", 0.5).await.unwrap();

        swarm.shutdown_agent(&a).await.unwrap();
        let decision = swarm.get_decision("lang").await.unwrap();
        assert!(!decision.votes.contains_key(&a));
        assert_eq!(decision.confidence, 0.5);

        let consensus = swarm.get_consensus("lang").await.unwrap().unwrap();
        assert_eq!(consensus.votes_cast, 2);
        assert_eq!(consensus.quorum, 1);
        assert_eq!(consensus.decision, "rust");
    }

    struct Idle;

    #[async_trait::async_trait]
    impl crate::handlers::AgentHandler for Idle {
        async fn handle(&self, _message: &Message) -> ConclaveResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_retired_agents_lose_their_handlers() {
        let handlers = Arc::new(HandlerRegistry::new());
        let swarm = SwarmCoordinator::new(
            SwarmConfig {
                min_agents: 1,
                ..SwarmConfig::default()
            },
            handlers.clone(),
        )
        .unwrap();
        let mut ids = Vec::new();
        for _ in 0..4 {
            let id = swarm.spawn_agent("x").await.unwrap();
            handlers.register(id.clone(), Arc::new(Idle)).await;
            ids.push(id);
        }

        swarm
            .merge_agents(&[ids[0].clone(), ids[1].clone()])
            .await
            .unwrap();
        assert!(!handlers.contains(&ids[0]).await);
        assert!(!handlers.contains(&ids[1]).await);

        swarm.shutdown_agent(&ids[2]).await.unwrap();
        assert!(!handlers.contains(&ids[2]).await);
        assert!(handlers.contains(&ids[3]).await);

        let ScaleAction::Merged { merged, .. } = swarm.auto_scale().await.unwrap() else {
            panic!("idle swarm should merge");
        };
        assert!(merged.contains(&ids[3]));
        assert!(handlers.is_empty().await);
    }

    #[tokio::test]
    async fn test_shutdown_agent_respects_minimum() {
        let swarm = coordinator(SwarmConfig {
            min_agents: 1,
            ..SwarmConfig::default()
        });
        let a = swarm.spawn_agent("x").await.unwrap();
        assert!(matches!(
            swarm.shutdown_agent(&a).await,
            Err(ConclaveError::InvariantViolation(_))
        ));
        let b = swarm.spawn_agent("x").await.unwrap();
        swarm.shutdown_agent(&b).await.unwrap();
        assert_eq!(swarm.agent_count().await, 1);
    }
}
