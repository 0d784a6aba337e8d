//! Task scheduling and multi-agent coordination.
//!
//! The scheduler fires eligible tasks into an agent's message loop; the
//! swarm and team coordinators manage pools of agents that exchange messages
//! through a shared [`HandlerRegistry`].
//!
//! # Main types
//!
//! - [`GoalManager`]: In-memory goal and task registry ([`TaskSource`]).
//! - [`TaskScheduler`]: Periodic job selecting tasks by priority and schedule.
//! - [`SwarmCoordinator`]: Dynamically sized agent pool with quorum voting.
//! - [`TeamCoordinator`]: Teams, hierarchies, and broadcast collaborations.
//! - [`HandlerRegistry`]: Per-agent handlers with isolated concurrent fan-out.

/// Goal and task registry.
pub mod goals;
/// Per-agent message handlers and fan-out delivery.
pub mod handlers;
/// Time-windowed task scheduler.
pub mod scheduler;
/// Swarm coordinator.
pub mod swarm;
/// Team coordinator.
pub mod team;
/// Task, goal, and schedule types.
pub mod types;

pub use goals::{GoalManager, TaskSource};
pub use handlers::{AgentHandler, DeliveryReport, HandlerRegistry, QueueHandler};
pub use scheduler::{SchedulerConfig, TaskScheduler};
pub use swarm::{
    Consensus, ScaleAction, SwarmAgent, SwarmConfig, SwarmCoordinator, SwarmDecision,
    SwarmMetrics, Vote, MAX_TASKS_PER_AGENT,
};
pub use team::{
    AgentTeam, Collaboration, CollaborationMessage, CollaborationStatus, Hierarchy, MemberStatus,
    TeamCoordinator, TeamMember, TeamMetrics, TeamStatus, AUTO_END_SUMMARY,
};
pub use types::{ExecutionStats, Goal, GoalStatus, Task, TaskSchedule, TaskStatus, TimeRange};
