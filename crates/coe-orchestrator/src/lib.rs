//! COE Orchestrator - task routing for coding agents
//!
//! The [`Orchestrator`] owns a dependency-aware [`TaskQueue`], hands ready
//! tasks to callers, forwards planning, verification and answer requests to
//! external agents, and re-enqueues work when the plan it executes against
//! changes.

pub mod agents;
mod orchestrator;
mod queue;

pub use agents::{
    parse_verdict, AgentSet, AnswerAgent, CommandAgent, MockAgent, PlanningAgent,
    UnconfiguredAgent, VerificationAgent,
};
pub use orchestrator::{
    ExecutionContext, Orchestrator, PlanUpdate, DEFAULT_VERIFICATION_DESCRIPTION,
};
pub use queue::{QueueSnapshot, TaskQueue};
