//! Work dispatch
//!
//! Node-level work fans out as independent units. Each unit runs either in
//! a worker subprocess (`<program> worker`, JSON in on stdin, JSON out on
//! stdout) or on a task in this process. `join` waits for every unit and
//! only then reports failures, so one bad node never aborts its siblings.

use crate::context::RunContext;
use crate::error::{CoreError, Result};
use crate::node::{AuthCheck, DeployNode, DestroyNode, NodeInfo};
use async_trait::async_trait;
use couchformation_config::CONFIG_DIR_ENV;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Kinds of work a worker can be asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkKind {
    DeployNode,
    DestroyNode,
    NodeInfo,
    AuthCheck,
}

impl std::fmt::Display for WorkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkKind::DeployNode => write!(f, "deploy_node"),
            WorkKind::DestroyNode => write!(f, "destroy_node"),
            WorkKind::NodeInfo => write!(f, "node_info"),
            WorkKind::AuthCheck => write!(f, "auth_check"),
        }
    }
}

/// One serializable unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkUnit {
    pub kind: WorkKind,
    pub params: Value,
}

impl WorkUnit {
    pub fn new<P: Serialize>(kind: WorkKind, params: &P) -> Result<Self> {
        Ok(Self {
            kind,
            params: serde_json::to_value(params)?,
        })
    }

    /// Short label for logs, e.g. `deploy_node cbs-node-01-02`
    pub fn label(&self) -> String {
        let field = |name: &str| self.params.get(name);
        match (
            field("service").and_then(Value::as_str),
            field("group").and_then(Value::as_u64),
            field("number").and_then(Value::as_u64),
        ) {
            (Some(service), Some(group), Some(number)) => format!(
                "{} {}-node-{:02}-{:02}",
                self.kind, service, group, number
            ),
            _ => self.kind.to_string(),
        }
    }
}

/// Code that carries out one kind of work
#[async_trait]
pub trait WorkHandler: Send + Sync {
    async fn run(&self, ctx: &RunContext, params: Value) -> Result<Value>;
}

/// Maps work kinds to their handlers
#[derive(Clone, Default)]
pub struct WorkRegistry {
    handlers: HashMap<WorkKind, Arc<dyn WorkHandler>>,
}

impl WorkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in node handler
    pub fn standard() -> Self {
        Self::new()
            .register(WorkKind::DeployNode, DeployNode)
            .register(WorkKind::DestroyNode, DestroyNode)
            .register(WorkKind::NodeInfo, NodeInfo)
            .register(WorkKind::AuthCheck, AuthCheck)
    }

    pub fn register(mut self, kind: WorkKind, handler: impl WorkHandler + 'static) -> Self {
        self.handlers.insert(kind, Arc::new(handler));
        self
    }

    pub fn get(&self, kind: WorkKind) -> Result<Arc<dyn WorkHandler>> {
        self.handlers
            .get(&kind)
            .cloned()
            .ok_or_else(|| CoreError::NoHandler(kind.to_string()))
    }

    /// Run `unit` on the current task
    pub async fn run(&self, ctx: &RunContext, unit: WorkUnit) -> Result<Value> {
        let handler = self.get(unit.kind)?;
        handler.run(ctx, unit.params).await
    }
}

/// Where dispatched units run
#[derive(Debug, Clone, PartialEq)]
pub enum Executor {
    /// Spawn `<program> worker` per unit
    Subprocess { program: PathBuf },

    /// Run on a task of this process
    InProcess,
}

impl Executor {
    /// Workers re-enter the running binary
    pub fn current_exe() -> Result<Self> {
        Ok(Executor::Subprocess {
            program: std::env::current_exe()?,
        })
    }
}

/// What a worker prints on stdout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerReply {
    pub ok: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkerReply {
    pub fn success(result: Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn into_result(self) -> std::result::Result<Value, String> {
        if self.ok {
            Ok(self.result.unwrap_or(Value::Null))
        } else {
            Err(self
                .error
                .unwrap_or_else(|| "worker reported failure".to_string()))
        }
    }
}

/// A unit that finished successfully
#[derive(Debug, Clone)]
pub struct Completed {
    pub id: usize,
    pub label: String,
    pub value: Value,
}

/// A unit that failed; `id` is unknown when its task panicked
#[derive(Debug, Clone)]
pub struct Failure {
    pub id: Option<usize>,
    pub label: String,
    pub message: String,
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.label, self.message)
    }
}

fn describe_failures(failures: &[Failure]) -> String {
    failures
        .iter()
        .map(Failure::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(
        "{failed} of {total} work unit(s) failed: {detail}",
        failed = .failures.len(),
        total = .failures.len() + .completed.len(),
        detail = describe_failures(.failures)
    )]
    Aggregate {
        completed: Vec<Completed>,
        failures: Vec<Failure>,
    },
}

type Outcome = (usize, std::result::Result<Value, String>);

/// Fans work units out and collects their results
pub struct Dispatcher {
    ctx: Arc<RunContext>,
    registry: Arc<WorkRegistry>,
    executor: Executor,
    permits: Arc<Semaphore>,
    tasks: JoinSet<Outcome>,
    labels: HashMap<usize, String>,
    next_id: usize,
}

impl Dispatcher {
    /// Concurrency is capped at `settings.workers`
    pub fn new(ctx: Arc<RunContext>, registry: Arc<WorkRegistry>, executor: Executor) -> Self {
        let workers = ctx.settings().workers.max(1);
        Self {
            ctx,
            registry,
            executor,
            permits: Arc::new(Semaphore::new(workers)),
            tasks: JoinSet::new(),
            labels: HashMap::new(),
            next_id: 0,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.permits = Arc::new(Semaphore::new(workers.max(1)));
        self
    }

    /// Queue `unit`; it starts once a worker slot is free
    pub fn dispatch(&mut self, unit: WorkUnit) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        let label = unit.label();
        tracing::debug!("Dispatching {} (#{})", label, id);
        self.labels.insert(id, label);

        let ctx = self.ctx.clone();
        let registry = self.registry.clone();
        let executor = self.executor.clone();
        let permits = self.permits.clone();
        self.tasks.spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => return (id, Err(e.to_string())),
            };
            let outcome = match executor {
                Executor::InProcess => registry
                    .run(&ctx, unit)
                    .await
                    .map_err(|e| e.to_string()),
                Executor::Subprocess { program } => {
                    run_subprocess(&program, ctx.base(), &unit).await
                }
            };
            (id, outcome)
        });
        id
    }

    /// Run `unit` right away on the caller's task
    pub async fn foreground(&self, unit: WorkUnit) -> Result<Value> {
        tracing::debug!("Running {} in foreground", unit.label());
        self.registry.run(&self.ctx, unit).await
    }

    /// Units dispatched but not yet joined
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for every dispatched unit.
    ///
    /// Results come back in completion order. If any unit failed the
    /// successes are still returned inside the aggregate error.
    pub async fn join(&mut self) -> std::result::Result<Vec<Completed>, DispatchError> {
        let mut completed = Vec::new();
        let mut failures = Vec::new();

        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok((id, Ok(value))) => {
                    let label = self.labels.remove(&id).unwrap_or_default();
                    tracing::debug!("{} completed", label);
                    completed.push(Completed { id, label, value });
                }
                Ok((id, Err(message))) => {
                    let label = self.labels.remove(&id).unwrap_or_default();
                    tracing::error!("{} failed: {}", label, message);
                    failures.push(Failure {
                        id: Some(id),
                        label,
                        message,
                    });
                }
                Err(e) => {
                    tracing::error!("Worker task aborted: {}", e);
                    failures.push(Failure {
                        id: None,
                        label: "worker task".to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }
        self.labels.clear();

        if failures.is_empty() {
            Ok(completed)
        } else {
            Err(DispatchError::Aggregate {
                completed,
                failures,
            })
        }
    }
}

async fn run_subprocess(
    program: &Path,
    base: &Path,
    unit: &WorkUnit,
) -> std::result::Result<Value, String> {
    let input = serde_json::to_vec(unit).map_err(|e| e.to_string())?;
    let mut child = Command::new(program)
        .arg("worker")
        .env(CONFIG_DIR_ENV, base)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("failed to start worker {}: {}", program.display(), e))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(&input)
            .await
            .map_err(|e| format!("failed to send work to worker: {}", e))?;
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| format!("worker did not finish: {}", e))?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    for line in stderr.lines() {
        tracing::debug!("[{}] {}", unit.label(), line);
    }

    match serde_json::from_slice::<WorkerReply>(&output.stdout) {
        Ok(reply) => reply.into_result(),
        Err(_) if !output.status.success() => Err(format!(
            "worker exited with {}: {}",
            output.status,
            stderr.lines().last().unwrap_or("no output")
        )),
        Err(e) => Err(format!("unreadable worker reply: {}", e)),
    }
}

/// Worker side: decode one unit from `input`, run it, build the reply
pub async fn serve(ctx: &RunContext, registry: &WorkRegistry, input: &str) -> WorkerReply {
    let unit: WorkUnit = match serde_json::from_str(input) {
        Ok(unit) => unit,
        Err(e) => return WorkerReply::failure(format!("invalid work unit: {}", e)),
    };
    let label = unit.label();
    match registry.run(ctx, unit).await {
        Ok(value) => WorkerReply::success(value),
        Err(e) => {
            tracing::error!("{} failed: {}", label, e);
            WorkerReply::failure(e.to_string())
        }
    }
}
