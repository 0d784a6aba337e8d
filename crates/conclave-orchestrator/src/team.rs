use crate::handlers::{DeliveryReport, HandlerRegistry};
use chrono::{DateTime, Utc};
use conclave_core::{ConclaveError, ConclaveResult, Message, MessageKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// Summary stored when a collaboration ends because it ran out of participants.
pub const AUTO_END_SUMMARY: &str = "Collaboration ended: no participants remaining";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    #[default]
    Active,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamMember {
    pub agent_id: String,
    pub role: String,
    #[serde(default)]
    pub status: MemberStatus,
}

impl TeamMember {
    pub fn new(agent_id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            role: role.into(),
            status: MemberStatus::Active,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hierarchy {
    pub leader_id: String,
    /// Manager id to the ids reporting to them.
    #[serde(default)]
    pub reporting_chain: BTreeMap<String, Vec<String>>,
}

impl Hierarchy {
    pub fn new(leader_id: impl Into<String>) -> Self {
        Self {
            leader_id: leader_id.into(),
            reporting_chain: BTreeMap::new(),
        }
    }

    pub fn with_reports(mut self, manager: impl Into<String>, reports: Vec<String>) -> Self {
        self.reporting_chain.insert(manager.into(), reports);
        self
    }

    fn has_reports(&self, manager: &str) -> bool {
        self.reporting_chain
            .get(manager)
            .is_some_and(|reports| !reports.is_empty())
    }

    /// Depth-first walk from the leader. A node seen before contributes 0,
    /// so a cyclic chain still terminates.
    pub fn depth(&self) -> usize {
        let mut visited = HashSet::new();
        self.depth_from(&self.leader_id, &mut visited)
    }

    fn depth_from<'a>(&'a self, node: &'a str, visited: &mut HashSet<&'a str>) -> usize {
        if !visited.insert(node) {
            return 0;
        }
        let deepest_child = self
            .reporting_chain
            .get(node)
            .map(|reports| {
                reports
                    .iter()
                    .map(|r| self.depth_from(r, visited))
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0);
        1 + deepest_child
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTeam {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub members: Vec<TeamMember>,
    pub hierarchy: Option<Hierarchy>,
}

impl AgentTeam {
    pub fn new(id: impl Into<String>, members: Vec<TeamMember>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            members,
            hierarchy: None,
        }
    }

    pub fn with_hierarchy(mut self, hierarchy: Hierarchy) -> Self {
        self.hierarchy = Some(hierarchy);
        self
    }

    pub fn is_member(&self, agent_id: &str) -> bool {
        self.members.iter().any(|m| m.agent_id == agent_id)
    }

    /// Check membership and hierarchy references.
    pub fn validate(&self) -> ConclaveResult<()> {
        if self.id.trim().is_empty() {
            return Err(ConclaveError::Validation("team id must not be empty".into()));
        }
        if self.members.is_empty() {
            return Err(ConclaveError::Validation(format!(
                "team '{}' has no members",
                self.id
            )));
        }
        let mut seen = HashSet::new();
        for member in &self.members {
            if !seen.insert(member.agent_id.as_str()) {
                return Err(ConclaveError::Validation(format!(
                    "team '{}' lists '{}' twice",
                    self.id, member.agent_id
                )));
            }
        }
        if let Some(hierarchy) = &self.hierarchy {
            if !self.is_member(&hierarchy.leader_id) {
                return Err(ConclaveError::Validation(format!(
                    "leader '{}' is not a member of team '{}'",
                    hierarchy.leader_id, self.id
                )));
            }
            for (manager, reports) in &hierarchy.reporting_chain {
                for name in std::iter::once(manager).chain(reports) {
                    if !self.is_member(name) {
                        return Err(ConclaveError::Validation(format!(
                            "'{name}' in the reporting chain is not a member of team '{}'",
                            self.id
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollaborationStatus {
    Active,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollaborationMessage {
    pub sender: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collaboration {
    pub id: String,
    pub team_id: String,
    /// Free-form collaboration type, e.g. "brainstorm" or "review".
    pub kind: String,
    pub status: CollaborationStatus,
    pub participants: Vec<String>,
    pub shared_knowledge: HashMap<String, serde_json::Value>,
    pub messages: Vec<CollaborationMessage>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Collaboration {
    pub fn is_active(&self) -> bool {
        self.status == CollaborationStatus::Active
    }

    fn complete(&mut self, summary: &str) {
        self.shared_knowledge
            .insert("summary".into(), serde_json::json!(summary));
        self.status = CollaborationStatus::Completed;
        self.ended_at = Some(Utc::now());
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamMetrics {
    pub total_members: usize,
    pub role_distribution: BTreeMap<String, usize>,
    pub hierarchy_depth: usize,
    pub completed_collaborations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamStatus {
    pub team_id: String,
    pub active_members: usize,
    pub active_collaborations: usize,
    pub metrics: TeamMetrics,
}

#[derive(Default)]
struct TeamState {
    teams: HashMap<String, AgentTeam>,
    collaborations: HashMap<String, Collaboration>,
}

impl TeamState {
    fn team(&self, id: &str) -> ConclaveResult<&AgentTeam> {
        self.teams
            .get(id)
            .ok_or_else(|| ConclaveError::NotFound(format!("team '{id}'")))
    }

    fn team_mut(&mut self, id: &str) -> ConclaveResult<&mut AgentTeam> {
        self.teams
            .get_mut(id)
            .ok_or_else(|| ConclaveError::NotFound(format!("team '{id}'")))
    }

    fn collaboration_mut(&mut self, id: &str) -> ConclaveResult<&mut Collaboration> {
        self.collaborations
            .get_mut(id)
            .ok_or_else(|| ConclaveError::NotFound(format!("collaboration '{id}'")))
    }
}

/// Structured teams with roles, optional strict hierarchy, and broadcast
/// collaborations. Every check runs before any mutation.
pub struct TeamCoordinator {
    state: RwLock<TeamState>,
    handlers: Arc<HandlerRegistry>,
}

impl TeamCoordinator {
    pub fn new(handlers: Arc<HandlerRegistry>) -> Self {
        Self {
            state: RwLock::new(TeamState::default()),
            handlers,
        }
    }

    pub async fn create_team(&self, team: AgentTeam) -> ConclaveResult<String> {
        team.validate()?;
        let mut state = self.state.write().await;
        if state.teams.contains_key(&team.id) {
            return Err(ConclaveError::Validation(format!(
                "team '{}' already exists",
                team.id
            )));
        }
        let id = team.id.clone();
        info!(team_id = %id, members = team.members.len(), "Team created");
        state.teams.insert(id.clone(), team);
        Ok(id)
    }

    pub async fn get_team(&self, team_id: &str) -> Option<AgentTeam> {
        self.state.read().await.teams.get(team_id).cloned()
    }

    pub async fn team_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.read().await.teams.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn add_member(&self, team_id: &str, member: TeamMember) -> ConclaveResult<()> {
        let mut state = self.state.write().await;
        let team = state.team_mut(team_id)?;
        if team.is_member(&member.agent_id) {
            return Err(ConclaveError::Validation(format!(
                "'{}' is already a member of team '{team_id}'",
                member.agent_id
            )));
        }
        info!(team_id, agent_id = %member.agent_id, role = %member.role, "Member added");
        team.members.push(member);
        Ok(())
    }

    /// Remove a member. The leader, and any manager who still has reports,
    /// cannot be removed. The member leaves every active collaboration of the
    /// team; collaborations left empty are ended. Returns the ids of the
    /// collaborations that ended.
    pub async fn remove_member(&self, team_id: &str, agent_id: &str) -> ConclaveResult<Vec<String>> {
        let mut state = self.state.write().await;
        let team = state.team_mut(team_id)?;
        if !team.is_member(agent_id) {
            return Err(ConclaveError::NotFound(format!(
                "'{agent_id}' is not a member of team '{team_id}'"
            )));
        }
        if let Some(hierarchy) = &team.hierarchy {
            if hierarchy.leader_id == agent_id {
                return Err(ConclaveError::InvariantViolation(format!(
                    "'{agent_id}' leads team '{team_id}' and cannot be removed"
                )));
            }
            if hierarchy.has_reports(agent_id) {
                return Err(ConclaveError::InvariantViolation(format!(
                    "'{agent_id}' still has reports in team '{team_id}'"
                )));
            }
        }

        team.members.retain(|m| m.agent_id != agent_id);
        if let Some(hierarchy) = team.hierarchy.as_mut() {
            hierarchy.reporting_chain.remove(agent_id);
            for reports in hierarchy.reporting_chain.values_mut() {
                reports.retain(|r| r != agent_id);
            }
        }

        let mut ended = Vec::new();
        for collaboration in state
            .collaborations
            .values_mut()
            .filter(|c| c.team_id == team_id && c.is_active())
        {
            collaboration.participants.retain(|p| p != agent_id);
            if collaboration.participants.is_empty() {
                collaboration.complete(AUTO_END_SUMMARY);
                ended.push(collaboration.id.clone());
            }
        }
        ended.sort();
        info!(team_id, agent_id, ended_collaborations = ended.len(), "Member removed");
        Ok(ended)
    }

    pub async fn set_member_status(
        &self,
        team_id: &str,
        agent_id: &str,
        status: MemberStatus,
    ) -> ConclaveResult<()> {
        let mut state = self.state.write().await;
        let team = state.team_mut(team_id)?;
        let member = team
            .members
            .iter_mut()
            .find(|m| m.agent_id == agent_id)
            .ok_or_else(|| {
                ConclaveError::NotFound(format!("'{agent_id}' is not a member of team '{team_id}'"))
            })?;
        member.status = status;
        Ok(())
    }

    pub async fn start_collaboration(
        &self,
        team_id: &str,
        kind: &str,
        participants: Vec<String>,
    ) -> ConclaveResult<String> {
        let mut state = self.state.write().await;
        let team = state.team(team_id)?;
        if participants.is_empty() {
            return Err(ConclaveError::Validation(
                "a collaboration needs at least one participant".into(),
            ));
        }
        if let Some(outsider) = participants.iter().find(|p| !team.is_member(p)) {
            return Err(ConclaveError::Validation(format!(
                "'{outsider}' is not a member of team '{team_id}'"
            )));
        }
        let mut unique = Vec::with_capacity(participants.len());
        for p in participants {
            if !unique.contains(&p) {
                unique.push(p);
            }
        }

        let id = Uuid::new_v4().to_string();
        info!(team_id, collaboration_id = %id, kind, participants = unique.len(), "Collaboration started");
        state.collaborations.insert(
            id.clone(),
            Collaboration {
                id: id.clone(),
                team_id: team_id.to_string(),
                kind: kind.to_string(),
                status: CollaborationStatus::Active,
                participants: unique,
                shared_knowledge: HashMap::new(),
                messages: Vec::new(),
                started_at: Utc::now(),
                ended_at: None,
            },
        );
        Ok(id)
    }

    /// Store `summary` in the shared knowledge and mark the collaboration
    /// completed.
    pub async fn end_collaboration(&self, collaboration_id: &str, summary: &str) -> ConclaveResult<()> {
        let mut state = self.state.write().await;
        let collaboration = state.collaboration_mut(collaboration_id)?;
        if !collaboration.is_active() {
            return Err(ConclaveError::InvariantViolation(format!(
                "collaboration '{collaboration_id}' has already ended"
            )));
        }
        collaboration.complete(summary);
        info!(collaboration_id, "Collaboration ended");
        Ok(())
    }

    pub async fn share_knowledge(
        &self,
        collaboration_id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> ConclaveResult<()> {
        let mut state = self.state.write().await;
        let collaboration = state.collaboration_mut(collaboration_id)?;
        if !collaboration.is_active() {
            return Err(ConclaveError::InvariantViolation(format!(
                "collaboration '{collaboration_id}' has already ended"
            )));
        }
        collaboration.shared_knowledge.insert(key.to_string(), value);
        Ok(())
    }

    /// Append to the collaboration log and deliver to the other participants.
    pub async fn post_to_collaboration(
        &self,
        collaboration_id: &str,
        sender: &str,
        content: &str,
    ) -> ConclaveResult<DeliveryReport> {
        let (team_id, recipients) = {
            let mut state = self.state.write().await;
            let collaboration = state.collaboration_mut(collaboration_id)?;
            if !collaboration.is_active() {
                return Err(ConclaveError::InvariantViolation(format!(
                    "collaboration '{collaboration_id}' has already ended"
                )));
            }
            if !collaboration.participants.iter().any(|p| p == sender) {
                return Err(ConclaveError::Validation(format!(
                    "'{sender}' is not part of collaboration '{collaboration_id}'"
                )));
            }
            collaboration.messages.push(CollaborationMessage {
                sender: sender.to_string(),
                content: content.to_string(),
                timestamp: Utc::now(),
            });
            let recipients: Vec<String> = collaboration
                .participants
                .iter()
                .filter(|p| *p != sender)
                .cloned()
                .collect();
            (collaboration.team_id.clone(), recipients)
        };

        let message = Message::user(content)
            .with_kind(MessageKind::Broadcast {
                team_id,
                sender: Some(sender.to_string()),
            })
            .with_metadata("collaboration_id", serde_json::json!(collaboration_id));
        Ok(self.handlers.deliver(&recipients, &message).await)
    }

    pub async fn get_collaboration(&self, collaboration_id: &str) -> Option<Collaboration> {
        self.state
            .read()
            .await
            .collaborations
            .get(collaboration_id)
            .cloned()
    }

    /// Deliver `message` concurrently to every active member. A failing
    /// recipient is logged and reported, never aborting the others.
    pub async fn broadcast_message(&self, team_id: &str, message: Message) -> ConclaveResult<DeliveryReport> {
        let recipients: Vec<String> = {
            let state = self.state.read().await;
            state
                .team(team_id)?
                .members
                .iter()
                .filter(|m| m.status == MemberStatus::Active)
                .map(|m| m.agent_id.clone())
                .collect()
        };

        let message = if matches!(message.kind, MessageKind::Broadcast { .. }) {
            message
        } else {
            message.with_kind(MessageKind::Broadcast {
                team_id: team_id.to_string(),
                sender: None,
            })
        };
        let report = self.handlers.deliver(&recipients, &message).await;
        if !report.is_complete() {
            warn!(
                team_id,
                delivered = report.delivered.len(),
                failed = report.failed.len(),
                missing = report.missing.len(),
                "Broadcast partially delivered"
            );
        } else {
            info!(team_id, delivered = report.delivered.len(), "Broadcast delivered");
        }
        Ok(report)
    }

    pub async fn get_team_status(&self, team_id: &str) -> ConclaveResult<TeamStatus> {
        let state = self.state.read().await;
        let team = state.team(team_id)?;

        let mut role_distribution = BTreeMap::new();
        for member in &team.members {
            *role_distribution.entry(member.role.clone()).or_insert(0) += 1;
        }
        let (active_collaborations, completed_collaborations) = state
            .collaborations
            .values()
            .filter(|c| c.team_id == team_id)
            .fold((0, 0), |(active, done), c| {
                if c.is_active() {
                    (active + 1, done)
                } else {
                    (active, done + 1)
                }
            });

        Ok(TeamStatus {
            team_id: team_id.to_string(),
            active_members: team
                .members
                .iter()
                .filter(|m| m.status == MemberStatus::Active)
                .count(),
            active_collaborations,
            metrics: TeamMetrics {
                total_members: team.members.len(),
                role_distribution,
                hierarchy_depth: team.hierarchy.as_ref().map_or(1, Hierarchy::depth),
                completed_collaborations,
            },
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn lmr_team() -> AgentTeam {
        AgentTeam::new(
            "core",
            vec![
                TeamMember::new("L", "lead"),
                TeamMember::new("M", "manager"),
                TeamMember::new("R", "engineer"),
            ],
        )
        .with_hierarchy(
            Hierarchy::new("L")
                .with_reports("L", vec!["M".into()])
                .with_reports("M", vec!["R".into()]),
        )
    }

    fn coordinator() -> TeamCoordinator {
        TeamCoordinator::new(Arc::new(HandlerRegistry::new()))
    }

    #[test]
    fn test_depth_linear_chain() {
        assert_eq!(lmr_team().hierarchy.unwrap().depth(), 3);
    }

    #[test]
    fn test_depth_tolerates_cycles() {
        let cyclic = Hierarchy::new("A")
            .with_reports("A", vec!["B".into()])
            .with_reports("B", vec!["A".into()]);
        assert_eq!(cyclic.depth(), 2);
    }

    #[test]
    fn test_depth_takes_deepest_branch() {
        let h = Hierarchy::new("A")
            .with_reports("A", vec!["B".into(), "C".into()])
            .with_reports("C", vec!["D".into()]);
        assert_eq!(h.depth(), 3);
        assert_eq!(Hierarchy::new("solo").depth(), 1);
    }

    #[tokio::test]
    async fn test_create_rejects_report_outside_team() {
        let coord = coordinator();
        let team = AgentTeam::new("t", vec![TeamMember::new("a", "lead")])
            .with_hierarchy(Hierarchy::new("a").with_reports("a", vec!["ghost".into()]));
        assert!(matches!(
            coord.create_team(team).await,
            Err(ConclaveError::Validation(_))
        ));
        assert!(coord.team_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_create_rejects_empty_and_duplicate_members() {
        let coord = coordinator();
        assert!(coord.create_team(AgentTeam::new("t", vec![])).await.is_err());
        let dup = AgentTeam::new("t", vec![TeamMember::new("a", "x"), TeamMember::new("a", "y")]);
        assert!(coord.create_team(dup).await.is_err());
        assert!(coord.get_team("t").await.is_none());
    }

    #[tokio::test]
    async fn test_status_reports_roles_and_depth() {
        let coord = coordinator();
        coord.create_team(lmr_team()).await.unwrap();
        coord
            .set_member_status("core", "R", MemberStatus::Inactive)
            .await
            .unwrap();
        let status = coord.get_team_status("core").await.unwrap();
        assert_eq!(status.active_members, 2);
        assert_eq!(status.metrics.total_members, 3);
        assert_eq!(status.metrics.hierarchy_depth, 3);
        assert_eq!(status.metrics.role_distribution["engineer"], 1);
    }

    #[tokio::test]
    async fn test_status_without_hierarchy_has_depth_one() {
        let coord = coordinator();
        coord
            .create_team(AgentTeam::new("flat", vec![TeamMember::new("a", "x")]))
            .await
            .unwrap();
        let status = coord.get_team_status("flat").await.unwrap();
        assert_eq!(status.metrics.hierarchy_depth, 1);
        assert!(coord.get_team_status("nope").await.is_err());
    }

    #[tokio::test]
    async fn test_end_collaboration_stores_summary() {
        let coord = coordinator();
        coord.create_team(lmr_team()).await.unwrap();
        let id = coord
            .start_collaboration("core", "review", vec!["M".into(), "R".into()])
            .await
            .unwrap();
        coord
            .share_knowledge(&id, "decision", serde_json::json!("ship it"))
            .await
            .unwrap();
        coord.end_collaboration(&id, "Reviewed and approved").await.unwrap();

        let collab = coord.get_collaboration(&id).await.unwrap();
        assert_eq!(collab.status, CollaborationStatus::Completed);
        assert_eq!(collab.shared_knowledge["summary"], "Reviewed and approved");
        assert_eq!(collab.shared_knowledge["decision"], "ship it");
        assert!(matches!(
            coord.end_collaboration(&id, "again").await,
            Err(ConclaveError::InvariantViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_start_collaboration_requires_members() {
        let coord = coordinator();
        coord.create_team(lmr_team()).await.unwrap();
        assert!(matches!(
            coord
                .start_collaboration("core", "x", vec!["M".into(), "Z".into()])
                .await,
            Err(ConclaveError::Validation(_))
        ));
        assert!(coord.start_collaboration("core", "x", vec![]).await.is_err());
    }
}
