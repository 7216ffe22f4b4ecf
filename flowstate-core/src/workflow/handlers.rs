//! Built-in handler implementations

use crate::models::workflow::{ExecutionContext, StateExecutionResult, StepStatus};
use crate::workflow::handler::{StateHandler, TransitionHandler};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

/// Handler backed by a synchronous closure
///
/// `Ok(value)` completes the state with `value` as output, `Err` fails it.
pub struct FnHandler<F> {
    func: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&ExecutionContext) -> Result<Value> + Send + Sync,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> StateHandler for FnHandler<F>
where
    F: Fn(&ExecutionContext) -> Result<Value> + Send + Sync,
{
    async fn execute(&self, ctx: &ExecutionContext) -> Result<StateExecutionResult> {
        let output = (self.func)(ctx)?;
        Ok(StateExecutionResult::completed(&ctx.current_state, output))
    }
}

/// Handler that always reports the same outcome
#[derive(Debug, Clone)]
pub struct StaticHandler {
    status: StepStatus,
    output: Value,
    error: Option<String>,
}

impl StaticHandler {
    pub fn new(status: StepStatus, output: Value, error: Option<String>) -> Self {
        Self {
            status,
            output,
            error,
        }
    }

    /// Always completes with `output`
    pub fn completed(output: Value) -> Self {
        Self {
            status: StepStatus::Completed,
            output,
            error: None,
        }
    }

    /// Always fails with `error`
    pub fn failing(error: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Failed,
            output: Value::Null,
            error: Some(error.into()),
        }
    }
}

#[async_trait]
impl StateHandler for StaticHandler {
    async fn execute(&self, ctx: &ExecutionContext) -> Result<StateExecutionResult> {
        let mut result = StateExecutionResult::completed(&ctx.current_state, self.output.clone());
        result.status = self.status;
        result.error = self.error.clone();
        Ok(result)
    }
}

/// Runs a bash command for the state
///
/// Output is `{exit_code, stdout, stderr}`; when stdout is a JSON object its
/// fields are merged in so that predicates can branch on them. A non-zero
/// exit code fails the attempt. The child is killed if the engine drops the
/// invocation on timeout.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    command: String,
    working_dir: Option<PathBuf>,
}

impl CommandHandler {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            working_dir: None,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

#[async_trait]
impl StateHandler for CommandHandler {
    async fn execute(&self, ctx: &ExecutionContext) -> Result<StateExecutionResult> {
        let mut command = Command::new("bash");
        command
            .arg("-c")
            .arg(&self.command)
            .env("FLOWSTATE_WORKFLOW_ID", ctx.workflow_id.to_string())
            .env("FLOWSTATE_WORKFLOW_NAME", &ctx.workflow_name)
            .env("FLOWSTATE_STATE", &ctx.current_state)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let output = command
            .output()
            .await
            .context("Failed to spawn bash process")?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        for line in stdout.lines() {
            tracing::debug!(state = %ctx.current_state, "stdout: {}", line);
        }
        for line in stderr.lines() {
            tracing::debug!(state = %ctx.current_state, "stderr: {}", line);
        }

        let exit_code = output.status.code();
        let mut fields = match serde_json::from_str::<Value>(&stdout) {
            Ok(Value::Object(parsed)) => parsed,
            _ => Map::new(),
        };
        fields.insert("exit_code".to_string(), json!(exit_code));
        fields.insert("stdout".to_string(), json!(stdout));
        fields.insert("stderr".to_string(), json!(stderr));

        let mut result = StateExecutionResult::completed(&ctx.current_state, Value::Object(fields));
        if !output.status.success() {
            result.status = StepStatus::Failed;
            result.error = Some(format!("Command failed with exit code {:?}", exit_code));
        }
        Ok(result)
    }
}

/// Action that writes a log line
#[derive(Debug, Clone)]
pub struct LogAction {
    message: String,
}

impl LogAction {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl TransitionHandler for LogAction {
    async fn execute(&self, ctx: &ExecutionContext) -> Result<Value> {
        tracing::info!(
            workflow_id = %ctx.workflow_id,
            state = %ctx.current_state,
            "{}",
            self.message
        );
        Ok(Value::Null)
    }
}

/// Action backed by closures for the guard and the effect
pub struct FnAction<F> {
    func: F,
    guard: Option<Box<dyn Fn(&ExecutionContext) -> bool + Send + Sync>>,
}

impl<F> FnAction<F>
where
    F: Fn(&ExecutionContext) -> Result<Value> + Send + Sync,
{
    pub fn new(func: F) -> Self {
        Self { func, guard: None }
    }

    /// Only run the action when `guard` holds
    pub fn when(mut self, guard: impl Fn(&ExecutionContext) -> bool + Send + Sync + 'static) -> Self {
        self.guard = Some(Box::new(guard));
        self
    }
}

#[async_trait]
impl<F> TransitionHandler for FnAction<F>
where
    F: Fn(&ExecutionContext) -> Result<Value> + Send + Sync,
{
    fn evaluate(&self, ctx: &ExecutionContext) -> bool {
        self.guard.as_ref().map(|guard| guard(ctx)).unwrap_or(true)
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<Value> {
        (self.func)(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::workflow::{Metadata, WorkflowInstance, WorkflowPriority};

    fn context(state: &str) -> ExecutionContext {
        let instance = WorkflowInstance::new("test", state, WorkflowPriority::Normal, Metadata::new());
        ExecutionContext::from_instance(&instance)
    }

    #[tokio::test]
    async fn test_fn_handler() {
        let ok = FnHandler::new(|ctx| Ok(json!({ "seen": ctx.current_state })));
        let result = ok.execute(&context("a")).await.unwrap();
        assert_eq!(result.status, StepStatus::Completed);
        assert_eq!(result.output, json!({"seen": "a"}));

        let err = FnHandler::new(|_| Err(anyhow::anyhow!("nope")));
        assert!(err.execute(&context("a")).await.is_err());
    }

    #[tokio::test]
    async fn test_static_handler() {
        let failing = StaticHandler::failing("always");
        let result = failing.execute(&context("x")).await.unwrap();
        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("always"));
        assert_eq!(result.state_name, "x");
    }

    #[tokio::test]
    async fn test_fn_action_guard() {
        let action = FnAction::new(|_| Ok(json!(1))).when(|ctx| ctx.current_state == "go");
        assert!(action.evaluate(&context("go")));
        assert!(!action.evaluate(&context("stop")));
        assert_eq!(action.execute(&context("go")).await.unwrap(), json!(1));
    }

    /// Uses bash; skip on Windows where bash may be unavailable.
    #[cfg(not(target_os = "windows"))]
    #[tokio::test]
    async fn test_command_handler_success_merges_json_stdout() {
        let handler = CommandHandler::new(r#"echo '{"status": "success"}'"#);
        let result = handler.execute(&context("build")).await.unwrap();

        assert_eq!(result.status, StepStatus::Completed);
        assert_eq!(result.output["status"], json!("success"));
        assert_eq!(result.output["exit_code"], json!(0));
    }

    #[cfg(not(target_os = "windows"))]
    #[tokio::test]
    async fn test_command_handler_failure() {
        let handler = CommandHandler::new("echo oops >&2; exit 3");
        let result = handler.execute(&context("build")).await.unwrap();

        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.output["exit_code"], json!(3));
        assert_eq!(result.output["stderr"], json!("oops"));
        assert!(result.error.unwrap().contains("exit code"));
    }

    #[cfg(not(target_os = "windows"))]
    #[tokio::test]
    async fn test_command_handler_sees_context_env() {
        let handler = CommandHandler::new("echo $FLOWSTATE_STATE");
        let result = handler.execute(&context("deploy")).await.unwrap();
        assert_eq!(result.output["stdout"], json!("deploy"));
    }
}
