//! Task router and orchestrator

use chrono::{DateTime, Utc};
use coe_core::{CoeConfig, CoeError, Result, Task, TaskId, TaskStatus, Verdict};
use coe_planning::{
    detect_changes, ChangeAnalysisResult, ElementType, ImpactAnalyzer, PlanSnapshot,
    StaticBreakdown, TaskBreakdown, TaskBreakdownResult,
};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::agents::AgentSet;
use crate::queue::{QueueSnapshot, TaskQueue};

/// Description used when a verification request carries none
pub const DEFAULT_VERIFICATION_DESCRIPTION: &str = "Verification";

/// The plan the orchestrator is currently executing against
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub run_id: Uuid,
    pub plan: PlanSnapshot,
    /// Number of plan updates applied since the run started
    pub revision: u64,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionContext {
    fn new(plan: PlanSnapshot) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            plan,
            revision: 0,
            started_at: now,
            updated_at: now,
        }
    }
}

/// What a plan update changed and which tasks went back in line
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanUpdate {
    pub analysis: ChangeAnalysisResult,
    pub requeued: Vec<TaskId>,
    /// Claimed tasks whose feature changed; left with their agent
    pub stale_claims: Vec<TaskId>,
}

/// Owns the task queue and brokers calls to the agent collaborators
///
/// Constructed explicitly and shared by `Arc`; queue mutations are
/// serialized by an async mutex.
pub struct Orchestrator {
    agents: AgentSet,
    queue: Mutex<TaskQueue>,
    context: Mutex<Option<ExecutionContext>>,
    analyzer: ImpactAnalyzer,
    breakdown: Option<Arc<dyn TaskBreakdown>>,
}

impl Orchestrator {
    pub fn new(agents: AgentSet) -> Self {
        Self {
            agents,
            queue: Mutex::new(TaskQueue::new()),
            context: Mutex::new(None),
            analyzer: ImpactAnalyzer::default(),
            breakdown: None,
        }
    }

    /// Agents and impact settings from repository configuration
    pub fn from_config(config: &CoeConfig) -> Self {
        Self::new(AgentSet::from_config(&config.agents))
            .with_analyzer(ImpactAnalyzer::from_config(config))
    }

    pub fn with_analyzer(mut self, analyzer: ImpactAnalyzer) -> Self {
        self.analyzer = analyzer;
        self
    }

    /// Consult `breakdown` for ticket/task impact on plan updates
    ///
    /// Without one, the backlog's own feature-tagged tasks are used.
    pub fn with_breakdown(mut self, breakdown: Arc<dyn TaskBreakdown>) -> Self {
        self.breakdown = Some(breakdown);
        self
    }

    // ---- Queue ----

    pub async fn enqueue(&self, task: Task) -> TaskStatus {
        let id = task.id.clone();
        let status = self.queue.lock().await.enqueue(task);
        debug!(task_id = %id, %status, "Task enqueued");
        status
    }

    /// Enqueue in order; returns how many landed in `ready`
    pub async fn enqueue_all(&self, tasks: Vec<Task>) -> usize {
        let mut queue = self.queue.lock().await;
        let count = tasks.len();
        let ready = tasks
            .into_iter()
            .map(|task| queue.enqueue(task))
            .filter(|status| *status == TaskStatus::Ready)
            .count();
        info!(count, ready, "Backlog enqueued");
        ready
    }

    /// Claim the head of the ready queue
    pub async fn get_next_task(&self) -> Option<Task> {
        let task = self.queue.lock().await.dequeue();
        match &task {
            Some(t) => info!(task_id = %t.id, "Dispatched task"),
            None => debug!("Ready queue empty"),
        }
        task
    }

    pub async fn requeue(&self, task_id: &str) -> Result<TaskStatus> {
        let status = self.queue.lock().await.requeue(task_id)?;
        info!(task_id, %status, "Task requeued");
        Ok(status)
    }

    /// Mark a claimed task done; returns the dependents it unblocked
    pub async fn complete_task(&self, task_id: &str) -> Result<Vec<TaskId>> {
        let promoted = self.queue.lock().await.complete(task_id)?;
        info!(task_id, unblocked = promoted.len(), "Task completed");
        Ok(promoted)
    }

    pub async fn fail_task(&self, task_id: &str) -> Result<()> {
        self.queue.lock().await.fail(task_id)?;
        warn!(task_id, "Task marked failed");
        Ok(())
    }

    pub async fn record_verification(&self, task_id: &str, verdict: &Verdict) -> Result<TaskStatus> {
        let status = self
            .queue
            .lock()
            .await
            .record_verification(task_id, verdict)?;
        info!(task_id, %status, "Verification recorded");
        Ok(status)
    }

    pub async fn task(&self, task_id: &str) -> Option<Task> {
        self.queue.lock().await.get(task_id).cloned()
    }

    pub async fn snapshot(&self) -> QueueSnapshot {
        self.queue.lock().await.snapshot()
    }

    // ---- Agent routing ----

    #[instrument(skip(self, task_description))]
    pub async fn route_to_planning_agent(&self, task_description: &str) -> Result<String> {
        if task_description.trim().is_empty() {
            return Err(CoeError::InvalidArgument(
                "task description must not be empty".to_string(),
            ));
        }
        debug!("Routing to planning agent");
        self.agents.planning.plan(task_description).await
    }

    #[instrument(skip(self, task_description, code))]
    pub async fn route_to_verification_agent(
        &self,
        task_description: Option<&str>,
        code: &str,
    ) -> Result<Verdict> {
        let description = task_description
            .filter(|d| !d.trim().is_empty())
            .unwrap_or(DEFAULT_VERIFICATION_DESCRIPTION);
        debug!(description, "Routing to verification agent");
        let verdict = self.agents.verification.verify(description, code).await?;
        info!(passed = verdict.passed, "Verification agent replied");
        Ok(verdict)
    }

    #[instrument(skip(self, question))]
    pub async fn route_to_answer_agent(&self, question: &str) -> Result<String> {
        debug!("Routing to answer agent");
        self.agents.answer.answer(question).await
    }

    // ---- Plan updates ----

    pub async fn current_plan(&self) -> Option<PlanSnapshot> {
        self.context.lock().await.as_ref().map(|c| c.plan.clone())
    }

    pub async fn execution_context(&self) -> Option<ExecutionContext> {
        self.context.lock().await.clone()
    }

    /// Replace the held plan and propagate the edit to the backlog
    ///
    /// Finished tasks (done, verified, under investigation) whose feature was
    /// changed or affected go back in line. Claimed tasks stay with their
    /// agent and are reported as stale. The first plan is only stored.
    pub async fn apply_plan_update(&self, new_plan: PlanSnapshot) -> PlanUpdate {
        let mut context = self.context.lock().await;
        let Some(mut current) = context.take() else {
            let started = ExecutionContext::new(new_plan);
            info!(run_id = %started.run_id, "Execution context started");
            *context = Some(started);
            return PlanUpdate::default();
        };

        let previous = std::mem::replace(&mut current.plan, new_plan);
        current.revision += 1;
        current.updated_at = Utc::now();

        let changes = detect_changes(&previous, &current.plan);
        let analysis = match &self.breakdown {
            Some(breakdown) => {
                self.analyzer
                    .analyze_with_tasks(&current.plan, Some(&previous), &changes, breakdown.as_ref())
                    .await
            }
            None => {
                let backlog = {
                    let queue = self.queue.lock().await;
                    StaticBreakdown::new(TaskBreakdownResult::from_backlog(queue.tasks()))
                };
                self.analyzer
                    .analyze_with_tasks(&current.plan, Some(&previous), &changes, &backlog)
                    .await
            }
        };

        let mut features: HashSet<String> = analysis
            .affected_items
            .iter()
            .filter(|i| i.item_type == ElementType::Feature)
            .map(|i| i.id.clone())
            .collect();
        features.extend(
            analysis
                .changes
                .iter()
                .filter(|c| c.element_type == ElementType::Feature)
                .map(|c| c.element_id.clone()),
        );

        let mut requeued = Vec::new();
        let mut stale_claims = Vec::new();
        {
            let mut queue = self.queue.lock().await;
            for id in queue.tasks_for_features(&features) {
                match queue.get(&id).map(|t| t.status) {
                    Some(TaskStatus::InProgress) => stale_claims.push(id),
                    Some(TaskStatus::Done | TaskStatus::Verified | TaskStatus::Investigation) => {
                        if queue.requeue(&id).is_ok() {
                            requeued.push(id);
                        }
                    }
                    _ => {}
                }
            }
        }

        info!(
            revision = current.revision,
            changes = analysis.changes.len(),
            risk = %analysis.overall_risk,
            requeued = requeued.len(),
            stale_claims = stale_claims.len(),
            "Plan update applied"
        );
        for warning in &analysis.warnings {
            warn!("{}", warning);
        }
        *context = Some(current);

        PlanUpdate {
            analysis,
            requeued,
            stale_claims,
        }
    }

    /// Drop all tasks and the execution context
    pub async fn reset_for_tests(&self) {
        self.queue.lock().await.clear();
        *self.context.lock().await = None;
        debug!("Orchestrator reset");
    }
}
