pub mod bash;
pub mod glob;
pub mod grep;
pub mod permission;
pub mod read;
pub mod report_issue;
pub mod think;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use permission::ToolPermission;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

use crate::types::DiffFile;

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;
    fn permission(&self) -> ToolPermission {
        ToolPermission::ReadOnly
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult>;
}

#[derive(Clone)]
pub struct ToolContext {
    pub session_id: String,
    pub cwd: PathBuf,
    pub project_root: PathBuf,
    /// 0 = orchestrator, 1 = reviewer/validator/fix-verifier agent.
    pub depth: u32,
    pub event_tx: Option<broadcast::Sender<crate::agent::AgentEvent>>,
    /// If set, only these tools are visible to the agent (role-based filtering).
    pub allowed_tool_names: Option<Vec<String>>,
    /// This agent's role name (security-reviewer, fix-verifier, ...), used to
    /// tag reported issues and to route the style-reviewer filter.
    pub agent_name: Option<String>,
    /// Channel report_issue uses to hand accepted submissions to the dedup/
    /// validate pipeline. None when a tool is invoked outside a live review run.
    pub issue_tx: Option<mpsc::UnboundedSender<report_issue::IssueSubmission>>,
    /// The diff under review, keyed by file path, used by report_issue's
    /// style-reviewer filter to drop findings outside changed lines.
    pub diff_files: Option<Arc<HashMap<String, DiffFile>>>,
    /// Bumped once per issue dropped at the report_issue boundary (the
    /// style-reviewer filter), so the orchestrator can report a true
    /// `metrics.filtered` count instead of a hard-coded zero.
    pub filtered_count: Option<Arc<AtomicU64>>,
}

pub struct ToolResult {
    pub output: String,
    pub title: String,
    pub metadata: Value,
}

pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn definitions(&self) -> Vec<sentinel_provider::ToolDefinition> {
        let mut defs: Vec<_> = self
            .tools
            .values()
            .map(|t| sentinel_provider::ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn definitions_read_only(&self) -> Vec<sentinel_provider::ToolDefinition> {
        let mut defs: Vec<_> = self
            .tools
            .values()
            .filter(|t| t.permission() == permission::ToolPermission::ReadOnly)
            .map(|t| sentinel_provider::ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Return definitions filtered to only the given tool names (role-based roster).
    pub fn definitions_filtered(
        &self,
        allowed_names: &[String],
    ) -> Vec<sentinel_provider::ToolDefinition> {
        let allow_set: std::collections::HashSet<&str> =
            allowed_names.iter().map(|s| s.as_str()).collect();
        let mut defs: Vec<_> = self
            .tools
            .values()
            .filter(|t| allow_set.contains(t.name()))
            .map(|t| sentinel_provider::ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub async fn execute(&self, name: &str, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        if let Some(allowed) = &ctx.allowed_tool_names {
            if !allowed.iter().any(|a| a == name) {
                anyhow::bail!("Tool `{name}` is not available for this agent role");
            }
        }
        let tool = self
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("Unknown tool: {name}"))?;
        tool.execute(args, ctx).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Every reviewer/validator/fix-verifier agent gets the same investigation
/// tools plus the report_issue endpoint; roster scoping happens via
/// `ToolContext::allowed_tool_names` in `agent_roles`, not by registering a
/// different set per role.
pub fn default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(Box::new(bash::BashTool));
    registry.register(Box::new(read::ReadTool));
    registry.register(Box::new(glob::GlobTool));
    registry.register(Box::new(grep::GrepTool));
    registry.register(Box::new(think::ThinkTool));
    registry.register(Box::new(report_issue::ReportIssueTool));

    registry
}
