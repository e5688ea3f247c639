//! Built-in methods
//!
//! | Method | Params | Result |
//! |---|---|---|
//! | `getNextTask` | none | Task or `null` |
//! | `callCOEAgent` | `{command, args}` | string |
//! | `requeueTask` | `{taskId}` | new status |
//! | `completeTask` | `{taskId}` | `true` |
//! | `updatePlan` | `{plan}` | analysis and requeued task ids |
//! | `reportFileChange` | `{path}` | sessions reset |
//! | `waitForStability` | `{files, delayMs?, maxWaitMs?}` | `{sessionId, elapsedMs, timedOut}` |

use async_trait::async_trait;
use coe_orchestrator::Orchestrator;
use coe_planning::PlanSnapshot;
use coe_stability::StabilityGate;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::jsonrpc::RpcError;
use crate::registry::MethodHandler;

/// `params` as an object; absent params count as an empty object
fn params_object(params: &Option<Value>) -> Result<Map<String, Value>, RpcError> {
    match params {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(_) => Err(RpcError::InvalidParams(
            "params must be an object".to_string(),
        )),
    }
}

fn required_str<'a>(object: &'a Map<String, Value>, field: &str) -> Result<&'a str, RpcError> {
    object
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::missing_field(field))
}

/// Claim the next ready task
pub struct GetNextTask {
    orchestrator: Arc<Orchestrator>,
}

impl GetNextTask {
    pub const METHOD: &'static str = "getNextTask";

    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl MethodHandler for GetNextTask {
    async fn call(&self, _params: Option<Value>) -> Result<Value, RpcError> {
        match self.orchestrator.get_next_task().await {
            Some(task) => Ok(serde_json::to_value(task)?),
            None => Ok(Value::Null),
        }
    }
}

/// Sub-commands of `callCOEAgent`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentCommand {
    Plan,
    Verify,
    Ask,
}

impl AgentCommand {
    pub const ALL: [AgentCommand; 3] = [Self::Plan, Self::Verify, Self::Ask];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Verify => "verify",
            Self::Ask => "ask",
        }
    }

    /// Field of `args` the command cannot run without
    pub fn required_field(&self) -> &'static str {
        match self {
            Self::Plan => "task",
            Self::Verify => "code",
            Self::Ask => "question",
        }
    }

    fn unknown(command: &str) -> RpcError {
        let valid: Vec<&str> = Self::ALL.iter().map(AgentCommand::name).collect();
        RpcError::InvalidParams(format!(
            "Unknown command: {}. Valid commands: {}",
            command,
            valid.join(", ")
        ))
    }
}

impl std::str::FromStr for AgentCommand {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| Self::unknown(s))
    }
}

/// Command table routing to the planning, verification and answer agents
///
/// `verify` replies are flattened to `"PASS - ..."` / `"FAIL - ..."`.
pub struct CallCoeAgent {
    orchestrator: Arc<Orchestrator>,
}

impl CallCoeAgent {
    pub const METHOD: &'static str = "callCOEAgent";

    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl MethodHandler for CallCoeAgent {
    async fn call(&self, params: Option<Value>) -> Result<Value, RpcError> {
        let params = params_object(&params)?;
        let command = required_str(&params, "command")?;
        let args = params
            .get("args")
            .and_then(Value::as_object)
            .ok_or_else(|| RpcError::InvalidParams("Missing or invalid args object".to_string()))?;

        let command: AgentCommand = command.parse()?;
        let field = required_str(args, command.required_field())?;
        debug!(command = command.name(), "callCOEAgent");

        let reply = match command {
            AgentCommand::Plan => self.orchestrator.route_to_planning_agent(field).await?,
            AgentCommand::Verify => {
                let task = args.get("task").and_then(Value::as_str);
                self.orchestrator
                    .route_to_verification_agent(task, field)
                    .await?
                    .to_string()
            }
            AgentCommand::Ask => self.orchestrator.route_to_answer_agent(field).await?,
        };
        Ok(Value::String(reply))
    }
}

/// Put a claimed or finished task back in line
pub struct RequeueTask {
    orchestrator: Arc<Orchestrator>,
}

impl RequeueTask {
    pub const METHOD: &'static str = "requeueTask";

    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl MethodHandler for RequeueTask {
    async fn call(&self, params: Option<Value>) -> Result<Value, RpcError> {
        let params = params_object(&params)?;
        let task_id = required_str(&params, "taskId")?;
        let status = self.orchestrator.requeue(task_id).await?;
        Ok(Value::String(status.to_string()))
    }
}

/// Mark a claimed task done
pub struct CompleteTask {
    orchestrator: Arc<Orchestrator>,
}

impl CompleteTask {
    pub const METHOD: &'static str = "completeTask";

    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl MethodHandler for CompleteTask {
    async fn call(&self, params: Option<Value>) -> Result<Value, RpcError> {
        let params = params_object(&params)?;
        let task_id = required_str(&params, "taskId")?;
        self.orchestrator.complete_task(task_id).await?;
        Ok(Value::Bool(true))
    }
}

/// Swap in a revised plan and requeue work on the features it touches
pub struct UpdatePlan {
    orchestrator: Arc<Orchestrator>,
}

impl UpdatePlan {
    pub const METHOD: &'static str = "updatePlan";

    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl MethodHandler for UpdatePlan {
    async fn call(&self, params: Option<Value>) -> Result<Value, RpcError> {
        let mut params = params_object(&params)?;
        let plan = params
            .remove("plan")
            .ok_or_else(|| RpcError::missing_field("plan"))?;
        let plan: PlanSnapshot = serde_json::from_value(plan)
            .map_err(|e| RpcError::InvalidParams(format!("Invalid plan: {}", e)))?;

        let update = self.orchestrator.apply_plan_update(plan).await;
        Ok(serde_json::to_value(update)?)
    }
}

/// Forward a watcher notification to the stability gate
pub struct ReportFileChange {
    gate: StabilityGate,
}

impl ReportFileChange {
    pub const METHOD: &'static str = "reportFileChange";

    pub fn new(gate: StabilityGate) -> Self {
        Self { gate }
    }
}

#[async_trait]
impl MethodHandler for ReportFileChange {
    async fn call(&self, params: Option<Value>) -> Result<Value, RpcError> {
        let params = params_object(&params)?;
        let path = required_str(&params, "path")?;
        Ok(Value::from(self.gate.report_file_change(path)))
    }
}

/// Block until the listed files have been quiet, bounded by a maximum wait
///
/// Durations default to the gate's configured `[stability]` values.
pub struct WaitForStability {
    gate: StabilityGate,
}

impl WaitForStability {
    pub const METHOD: &'static str = "waitForStability";

    pub fn new(gate: StabilityGate) -> Self {
        Self { gate }
    }
}

fn optional_millis(object: &Map<String, Value>, field: &str) -> Result<Option<Duration>, RpcError> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .map(|ms| Some(Duration::from_millis(ms)))
            .ok_or_else(|| {
                RpcError::InvalidParams(format!("{} must be a non-negative integer", field))
            }),
    }
}

#[async_trait]
impl MethodHandler for WaitForStability {
    async fn call(&self, params: Option<Value>) -> Result<Value, RpcError> {
        let params = params_object(&params)?;
        let files = params
            .get("files")
            .and_then(Value::as_array)
            .ok_or_else(|| RpcError::missing_field("files"))?
            .iter()
            .map(|f| f.as_str().map(str::to_string))
            .collect::<Option<Vec<String>>>()
            .ok_or_else(|| RpcError::InvalidParams("files must be strings".to_string()))?;

        let delay = optional_millis(&params, "delayMs")?.unwrap_or(self.gate.defaults().delay());
        let max_wait =
            optional_millis(&params, "maxWaitMs")?.unwrap_or(self.gate.defaults().max_wait());

        let outcome = self.gate.wait_for_stability(files, delay, max_wait).await;
        Ok(json!({
            "sessionId": outcome.session_id,
            "elapsedMs": u64::try_from(outcome.elapsed.as_millis()).unwrap_or(u64::MAX),
            "timedOut": outcome.timed_out,
        }))
    }
}
