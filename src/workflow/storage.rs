/// Workflow sources and execution sinks
///
/// The engine reads workflow definitions through `WorkflowSource` and reports
/// execution progress through `ExecutionSink`; it never writes a definition
/// back. Sinks are best effort: the engine logs their failures and keeps
/// running.

use crate::runtime::trace::{Execution, ExecutionStep};
use crate::workflow::types::Workflow;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions},
    Row,
};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    str::FromStr,
};
use tokio::sync::RwLock;

/// Loads workflow definitions by id
#[async_trait]
pub trait WorkflowSource: Send + Sync {
    async fn load(&self, workflow_id: &str) -> Result<Workflow>;
}

/// Receives execution snapshots and individual trace steps
#[async_trait]
pub trait ExecutionSink: Send + Sync {
    async fn save(&self, execution: &Execution) -> Result<()>;
    async fn append_step(&self, execution_id: &str, step: &ExecutionStep) -> Result<()>;
}

/// Sink that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

#[async_trait]
impl ExecutionSink for NullSink {
    async fn save(&self, _execution: &Execution) -> Result<()> {
        Ok(())
    }

    async fn append_step(&self, _execution_id: &str, _step: &ExecutionStep) -> Result<()> {
        Ok(())
    }
}

/// In-process store for workflows, executions and steps
#[derive(Debug, Default)]
pub struct MemoryStore {
    workflows: RwLock<HashMap<String, Workflow>>,
    executions: RwLock<HashMap<String, Execution>>,
    steps: RwLock<HashMap<String, Vec<ExecutionStep>>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a workflow loadable by id
    pub async fn insert_workflow(&self, workflow: Workflow) {
        self.workflows.write().await.insert(workflow.id.clone(), workflow);
    }

    /// Last saved snapshot of an execution
    pub async fn execution(&self, execution_id: &str) -> Option<Execution> {
        self.executions.read().await.get(execution_id).cloned()
    }

    /// Steps appended for an execution, in arrival order
    pub async fn steps(&self, execution_id: &str) -> Vec<ExecutionStep> {
        self.steps.read().await.get(execution_id).cloned().unwrap_or_default()
    }

    /// Number of distinct executions saved
    pub async fn execution_count(&self) -> usize {
        self.executions.read().await.len()
    }
}

#[async_trait]
impl WorkflowSource for MemoryStore {
    async fn load(&self, workflow_id: &str) -> Result<Workflow> {
        self.workflows
            .read()
            .await
            .get(workflow_id)
            .cloned()
            .with_context(|| format!("workflow not found: {workflow_id}"))
    }
}

#[async_trait]
impl ExecutionSink for MemoryStore {
    async fn save(&self, execution: &Execution) -> Result<()> {
        self.executions.write().await.insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    async fn append_step(&self, execution_id: &str, step: &ExecutionStep) -> Result<()> {
        self.steps
            .write()
            .await
            .entry(execution_id.to_string())
            .or_default()
            .push(step.clone());
        Ok(())
    }
}

/// Reads `{dir}/{workflow_id}.json` as written by the editor
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    dir: PathBuf,
}

impl JsonFileSource {
    /// Source reading from `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Parse a workflow file at an explicit path
    pub async fn load_path(path: &Path) -> Result<Workflow> {
        let json = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read workflow file {}", path.display()))?;
        Workflow::from_json(&json).with_context(|| format!("invalid workflow JSON in {}", path.display()))
    }
}

#[async_trait]
impl WorkflowSource for JsonFileSource {
    async fn load(&self, workflow_id: &str) -> Result<Workflow> {
        if workflow_id.is_empty() || workflow_id.contains(['/', '\\']) || workflow_id.contains("..") {
            bail!("invalid workflow id: {workflow_id:?}");
        }
        let path = self.dir.join(format!("{workflow_id}.json"));
        Self::load_path(&path).await
    }
}

/// SQLite-backed workflow and execution store
///
/// Workflows and execution snapshots are stored as JSON next to a few indexed
/// columns; steps get one row each so they can be streamed as they happen.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Wrap an existing pool; call `init_schema` before use
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the database at `url` and ensure the schema
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("invalid database url: {url}"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(if url.contains(":memory:") { 1 } else { 4 })
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open database: {url}"))?;
        let store = Self::new(pool);
        store.init_schema().await?;
        Ok(store)
    }

    /// Create tables and indexes. Safe to call multiple times.
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                definition TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                status TEXT NOT NULL,
                total_cost REAL NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                completed_at TEXT,
                record TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS execution_steps (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                execution_id TEXT NOT NULL,
                node_id TEXT,
                action TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                data TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_executions_workflow ON executions(workflow_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_steps_execution ON execution_steps(execution_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Store a new workflow or update an existing one
    pub async fn save_workflow(&self, workflow: &Workflow) -> Result<()> {
        let definition = serde_json::to_string(workflow)?;
        sqlx::query(
            r#"
            INSERT INTO workflows (id, name, definition, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                definition = excluded.definition,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&workflow.id)
        .bind(&workflow.name)
        .bind(&definition)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Last saved snapshot of an execution
    pub async fn get_execution(&self, execution_id: &str) -> Result<Option<Execution>> {
        let row = sqlx::query("SELECT record FROM executions WHERE id = ?")
            .bind(execution_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let record: String = row.get("record");
                Ok(Some(serde_json::from_str(&record)?))
            }
            None => Ok(None),
        }
    }

    /// Steps appended for an execution, in insertion order
    pub async fn steps(&self, execution_id: &str) -> Result<Vec<ExecutionStep>> {
        let rows = sqlx::query("SELECT node_id, action, timestamp, data FROM execution_steps WHERE execution_id = ? ORDER BY id")
            .bind(execution_id)
            .fetch_all(&self.pool)
            .await?;

        let mut steps = Vec::with_capacity(rows.len());
        for row in rows {
            let action: String = row.get("action");
            let timestamp: String = row.get("timestamp");
            let data: Option<String> = row.get("data");
            steps.push(ExecutionStep {
                node_id: row.get("node_id"),
                action: serde_json::from_value(serde_json::Value::String(action))?,
                timestamp: chrono::DateTime::parse_from_rfc3339(&timestamp)?.with_timezone(&Utc),
                data: data.map(|d| serde_json::from_str(&d)).transpose()?,
            });
        }
        Ok(steps)
    }
}

#[async_trait]
impl WorkflowSource for SqliteStore {
    async fn load(&self, workflow_id: &str) -> Result<Workflow> {
        let row = sqlx::query("SELECT definition FROM workflows WHERE id = ?")
            .bind(workflow_id)
            .fetch_optional(&self.pool)
            .await?
            .with_context(|| format!("workflow not found: {workflow_id}"))?;
        let definition: String = row.get("definition");
        Ok(serde_json::from_str(&definition)?)
    }
}

#[async_trait]
impl ExecutionSink for SqliteStore {
    async fn save(&self, execution: &Execution) -> Result<()> {
        let record = serde_json::to_string(execution)?;
        sqlx::query(
            r#"
            INSERT INTO executions (id, workflow_id, status, total_cost, created_at, completed_at, record)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                total_cost = excluded.total_cost,
                completed_at = excluded.completed_at,
                record = excluded.record
            "#,
        )
        .bind(&execution.id)
        .bind(&execution.workflow_id)
        .bind(execution.status.as_str())
        .bind(execution.total_cost)
        .bind(execution.created_at.to_rfc3339())
        .bind(execution.completed_at.map(|t| t.to_rfc3339()))
        .bind(&record)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_step(&self, execution_id: &str, step: &ExecutionStep) -> Result<()> {
        let action = serde_json::to_value(step.action)?;
        sqlx::query("INSERT INTO execution_steps (execution_id, node_id, action, timestamp, data) VALUES (?, ?, ?, ?, ?)")
            .bind(execution_id)
            .bind(&step.node_id)
            .bind(action.as_str().unwrap_or_default())
            .bind(step.timestamp.to_rfc3339())
            .bind(step.data.as_ref().map(|d| d.to_string()))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::trace::StepAction;
    use crate::workflow::types::Node;

    fn workflow() -> Workflow {
        Workflow::new("wf-1", "demo")
            .with_node(Node::new("a", "text_input").with_config("text", "hi"))
            .with_node(Node::new("b", "uppercase"))
            .with_edge("a", "b")
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        store.insert_workflow(workflow()).await;
        assert_eq!(store.load("wf-1").await.unwrap().nodes.len(), 2);
        assert!(store.load("missing").await.is_err());

        let execution = Execution::new("wf-1");
        store.save(&execution).await.unwrap();
        store
            .append_step(&execution.id, &ExecutionStep::new(Some("a"), StepAction::Started, None))
            .await
            .unwrap();
        assert_eq!(store.steps(&execution.id).await.len(), 1);
        assert!(store.execution(&execution.id).await.is_some());
    }

    #[tokio::test]
    async fn test_json_file_source() {
        let dir = tempfile::tempdir().unwrap();
        let json = serde_json::to_string(&workflow()).unwrap();
        std::fs::write(dir.path().join("wf-1.json"), json).unwrap();

        let source = JsonFileSource::new(dir.path());
        let loaded = source.load("wf-1").await.unwrap();
        assert_eq!(loaded.edges[0].source, "a");
        assert!(source.load("../etc/passwd").await.is_err());
        assert!(source.load("absent").await.is_err());
    }

    #[tokio::test]
    async fn test_sqlite_store() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        store.save_workflow(&workflow()).await.unwrap();
        store.save_workflow(&workflow()).await.unwrap();
        assert_eq!(store.load("wf-1").await.unwrap().name, "demo");
        assert!(store.load("missing").await.is_err());

        let mut execution = Execution::new("wf-1");
        store.save(&execution).await.unwrap();
        execution.total_cost = 0.5;
        store.save(&execution).await.unwrap();
        let loaded = store.get_execution(&execution.id).await.unwrap().unwrap();
        assert_eq!(loaded.total_cost, 0.5);

        let step = ExecutionStep::new(Some("a"), StepAction::Completed, Some(serde_json::json!({"cost": 0.1})));
        store.append_step(&execution.id, &step).await.unwrap();
        let steps = store.steps(&execution.id).await.unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].action, StepAction::Completed);
        assert_eq!(steps[0].node_id.as_deref(), Some("a"));
    }
}
