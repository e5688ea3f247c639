//! External agent collaborators
//!
//! The orchestrator never produces proposals, verdicts or answers itself; it
//! forwards to one agent per [`AgentRole`]. Agents are trait objects so the
//! process-backed [`CommandAgent`] can be swapped for [`MockAgent`] in tests.

use async_trait::async_trait;
use coe_core::config::AgentsConfig;
use coe_core::{AgentRole, CoeError, Result, Verdict};
use parking_lot::Mutex;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument};

/// Produces free-form implementation proposals
#[async_trait]
pub trait PlanningAgent: Send + Sync {
    async fn plan(&self, task_description: &str) -> Result<String>;
}

/// Judges submitted code against a task description
#[async_trait]
pub trait VerificationAgent: Send + Sync {
    async fn verify(&self, task_description: &str, code: &str) -> Result<Verdict>;
}

/// Answers free-form questions
#[async_trait]
pub trait AnswerAgent: Send + Sync {
    async fn answer(&self, question: &str) -> Result<String>;
}

/// The three collaborators an orchestrator routes to
#[derive(Clone)]
pub struct AgentSet {
    pub planning: Arc<dyn PlanningAgent>,
    pub verification: Arc<dyn VerificationAgent>,
    pub answer: Arc<dyn AnswerAgent>,
}

impl AgentSet {
    pub fn new(
        planning: Arc<dyn PlanningAgent>,
        verification: Arc<dyn VerificationAgent>,
        answer: Arc<dyn AnswerAgent>,
    ) -> Self {
        Self {
            planning,
            verification,
            answer,
        }
    }

    /// One agent object serving all three roles
    pub fn uniform<A>(agent: Arc<A>) -> Self
    where
        A: PlanningAgent + VerificationAgent + AnswerAgent + 'static,
    {
        Self {
            planning: agent.clone(),
            verification: agent.clone(),
            answer: agent,
        }
    }

    /// Every role errors with [`CoeError::AgentNotConfigured`]
    pub fn unconfigured() -> Self {
        Self {
            planning: Arc::new(UnconfiguredAgent::new(AgentRole::Planning)),
            verification: Arc::new(UnconfiguredAgent::new(AgentRole::Verification)),
            answer: Arc::new(UnconfiguredAgent::new(AgentRole::Answer)),
        }
    }

    /// Command-backed agents for configured roles, unconfigured for the rest
    pub fn from_config(config: &AgentsConfig) -> Self {
        let timeout = config.timeout_secs.map(Duration::from_secs);
        let build = |role: AgentRole, command: &[String]| -> Arc<CommandAgent> {
            let agent = CommandAgent::from_command(role, command);
            Arc::new(match timeout {
                Some(t) => agent.with_timeout(t),
                None => agent,
            })
        };

        let planning: Arc<dyn PlanningAgent> = if config.planning_command.is_empty() {
            Arc::new(UnconfiguredAgent::new(AgentRole::Planning))
        } else {
            build(AgentRole::Planning, &config.planning_command)
        };
        let verification: Arc<dyn VerificationAgent> = if config.verification_command.is_empty() {
            Arc::new(UnconfiguredAgent::new(AgentRole::Verification))
        } else {
            build(AgentRole::Verification, &config.verification_command)
        };
        let answer: Arc<dyn AnswerAgent> = if config.answer_command.is_empty() {
            Arc::new(UnconfiguredAgent::new(AgentRole::Answer))
        } else {
            build(AgentRole::Answer, &config.answer_command)
        };

        Self::new(planning, verification, answer)
    }
}

/// Placeholder for a role with no configured agent
#[derive(Debug, Clone, Copy)]
pub struct UnconfiguredAgent {
    role: AgentRole,
}

impl UnconfiguredAgent {
    pub fn new(role: AgentRole) -> Self {
        Self { role }
    }

    fn error(&self) -> CoeError {
        CoeError::AgentNotConfigured(format!(
            "no {} agent configured (set agents.{}_command in .coe/config.toml)",
            self.role, self.role
        ))
    }
}

#[async_trait]
impl PlanningAgent for UnconfiguredAgent {
    async fn plan(&self, _task_description: &str) -> Result<String> {
        Err(self.error())
    }
}

#[async_trait]
impl VerificationAgent for UnconfiguredAgent {
    async fn verify(&self, _task_description: &str, _code: &str) -> Result<Verdict> {
        Err(self.error())
    }
}

#[async_trait]
impl AnswerAgent for UnconfiguredAgent {
    async fn answer(&self, _question: &str) -> Result<String> {
        Err(self.error())
    }
}

/// Agent backed by an external command
///
/// The prompt is written to the command's stdin and the trimmed stdout is
/// the reply. `COE_AGENT_ROLE` is set in the child's environment. A non-zero
/// exit status is an agent error carrying stderr.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    role: AgentRole,
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandAgent {
    pub fn new(role: AgentRole, program: impl Into<String>) -> Self {
        Self {
            role,
            program: program.into(),
            args: Vec::new(),
            timeout: None,
        }
    }

    /// Build from an argv list; the first element is the program
    pub fn from_command(role: AgentRole, command: &[String]) -> Self {
        let (program, args) = command
            .split_first()
            .map_or(("", &[][..]), |(p, a)| (p.as_str(), a));
        Self::new(role, program).with_args(args.to_vec())
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn role(&self) -> AgentRole {
        self.role
    }

    #[instrument(skip(self, prompt), fields(role = %self.role, program = %self.program))]
    async fn run(&self, prompt: &str) -> Result<String> {
        if self.program.is_empty() {
            return Err(CoeError::AgentNotConfigured(format!(
                "{} agent command is empty",
                self.role
            )));
        }

        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.exchange(prompt))
                .await
                .map_err(|_| CoeError::AgentTimeout(limit.as_secs()))?,
            None => self.exchange(prompt).await,
        }
    }

    async fn exchange(&self, prompt: &str) -> Result<String> {
        debug!("Spawning agent command");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("COE_AGENT_ROLE", self.role.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CoeError::Agent(format!("Failed to spawn {}: {}", self.program, e))
            })?;

        // Feed stdin while draining stdout/stderr; a child that echoes as it
        // reads would otherwise stall on a full pipe.
        let stdin = child.stdin.take();
        let payload = prompt.as_bytes();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // Commands that ignore stdin may exit before the prompt is written.
                if let Err(e) = stdin.write_all(payload).await {
                    if e.kind() != std::io::ErrorKind::BrokenPipe {
                        return Err(e);
                    }
                    debug!("Agent closed stdin early");
                }
            }
            Ok(())
        };

        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        fed?;
        let output =
            output.map_err(|e| CoeError::Agent(format!("Failed to read agent output: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CoeError::Agent(format!(
                "{} agent exited with {}: {}",
                self.role,
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Read a verification reply: `PASS` prefix passes, anything else fails
///
/// A leading `PASS`/`FAIL` label and the separator after it are stripped
/// from the explanation.
pub fn parse_verdict(reply: &str) -> Verdict {
    let reply = reply.trim();
    let strip = |rest: &str| {
        rest.trim_start_matches(|c: char| c.is_whitespace() || c == '-' || c == ':')
            .to_string()
    };

    if let Some(rest) = reply.strip_prefix("PASS") {
        Verdict::pass(strip(rest))
    } else if let Some(rest) = reply.strip_prefix("FAIL") {
        Verdict::fail(strip(rest))
    } else {
        Verdict::fail(reply)
    }
}

#[async_trait]
impl PlanningAgent for CommandAgent {
    async fn plan(&self, task_description: &str) -> Result<String> {
        self.run(task_description).await
    }
}

#[async_trait]
impl VerificationAgent for CommandAgent {
    async fn verify(&self, task_description: &str, code: &str) -> Result<Verdict> {
        let prompt = format!("Task: {}\n\nCode:\n{}\n", task_description, code);
        let reply = self.run(&prompt).await?;
        Ok(parse_verdict(&reply))
    }
}

#[async_trait]
impl AnswerAgent for CommandAgent {
    async fn answer(&self, question: &str) -> Result<String> {
        self.run(question).await
    }
}

/// Agent with canned replies that records what it was asked
#[derive(Debug)]
pub struct MockAgent {
    proposal: String,
    verdict: Option<Verdict>,
    answer: String,
    failure: Option<String>,
    calls: Mutex<Vec<(AgentRole, String)>>,
}

impl Default for MockAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAgent {
    pub fn new() -> Self {
        Self {
            proposal: "mock proposal".to_string(),
            verdict: None,
            answer: "mock answer".to_string(),
            failure: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_proposal(mut self, proposal: impl Into<String>) -> Self {
        self.proposal = proposal.into();
        self
    }

    pub fn with_verdict(mut self, verdict: Verdict) -> Self {
        self.verdict = Some(verdict);
        self
    }

    pub fn with_answer(mut self, answer: impl Into<String>) -> Self {
        self.answer = answer.into();
        self
    }

    /// Every call fails with [`CoeError::Agent`]
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Recorded `(role, input)` pairs; verification input is the description
    pub fn calls(&self) -> Vec<(AgentRole, String)> {
        self.calls.lock().clone()
    }

    fn record(&self, role: AgentRole, input: &str) -> Result<()> {
        self.calls.lock().push((role, input.to_string()));
        match &self.failure {
            Some(message) => Err(CoeError::Agent(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PlanningAgent for MockAgent {
    async fn plan(&self, task_description: &str) -> Result<String> {
        self.record(AgentRole::Planning, task_description)?;
        Ok(self.proposal.clone())
    }
}

#[async_trait]
impl VerificationAgent for MockAgent {
    async fn verify(&self, task_description: &str, _code: &str) -> Result<Verdict> {
        self.record(AgentRole::Verification, task_description)?;
        Ok(self
            .verdict
            .clone()
            .unwrap_or_else(|| Verdict::pass("mock verification")))
    }
}

#[async_trait]
impl AnswerAgent for MockAgent {
    async fn answer(&self, question: &str) -> Result<String> {
        self.record(AgentRole::Answer, question)?;
        Ok(self.answer.clone())
    }
}
