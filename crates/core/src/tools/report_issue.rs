use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use super::permission::ToolPermission;
use super::{Tool, ToolContext, ToolResult};
use crate::types::{IssueCategory, RawIssue, Severity};

/// A `report_issue` call paired with a one-shot channel for the acknowledgement
/// the calling agent expects back (accepted / auto-rejected / deduplicated / filtered).
pub struct IssueSubmission {
    pub issue: RawIssue,
    pub respond: tokio::sync::oneshot::Sender<String>,
}

/// The single tool endpoint exposed to every reviewer and fix-verifier agent.
/// Applies the style-reviewer filter at this boundary (§4.D.6) before handing
/// the issue to the dedup/validate pipeline via `ctx.issue_tx`.
pub struct ReportIssueTool;

#[async_trait]
impl Tool for ReportIssueTool {
    fn name(&self) -> &str {
        "report_issue"
    }

    fn description(&self) -> &str {
        "Report a single code review finding. Call this once per distinct issue you find. \
         The response tells you whether the issue was accepted, auto-rejected for low \
         confidence, recognized as a duplicate of an earlier finding, or filtered as a \
         pre-existing style issue outside the diff."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file": { "type": "string", "description": "Path of the file the issue is in" },
                "line_start": { "type": "integer" },
                "line_end": { "type": "integer" },
                "severity": { "type": "string", "enum": ["critical", "error", "warning", "suggestion"] },
                "category": { "type": "string", "enum": ["security", "logic", "performance", "style", "maintainability"] },
                "title": { "type": "string" },
                "description": { "type": "string" },
                "suggestion": { "type": "string" },
                "code_snippet": { "type": "string" },
                "confidence": { "type": "number", "description": "0.0 to 1.0" }
            },
            "required": ["file", "line_start", "line_end", "severity", "category", "title", "description", "confidence"]
        })
    }

    fn permission(&self) -> ToolPermission {
        ToolPermission::ReadOnly
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let file = args
            .get("file")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("Missing required parameter: file"))?
            .to_string();
        let line_start = args
            .get("line_start")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| anyhow::anyhow!("Missing required parameter: line_start"))?
            as u32;
        let line_end = args
            .get("line_end")
            .and_then(|v| v.as_u64())
            .unwrap_or(line_start as u64) as u32;
        let severity: Severity =
            serde_json::from_value(args.get("severity").cloned().unwrap_or(json!("warning")))?;
        let category: IssueCategory =
            serde_json::from_value(args.get("category").cloned().unwrap_or(json!("maintainability")))?;
        let title = args
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or("untitled")
            .to_string();
        let description = args
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let confidence = args
            .get("confidence")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.5)
            .clamp(0.0, 1.0);
        let source_agent = ctx.agent_name.clone().unwrap_or_else(|| "unknown".to_string());

        let issue = RawIssue {
            id: uuid::Uuid::new_v4().to_string(),
            file: file.clone(),
            line_start,
            line_end,
            category,
            severity,
            title,
            description,
            suggestion: args.get("suggestion").and_then(|v| v.as_str()).map(String::from),
            code_snippet: args.get("code_snippet").and_then(|v| v.as_str()).map(String::from),
            confidence,
            source_agent: source_agent.clone(),
        };

        if source_agent == "style-reviewer" {
            if let Some(filtered) = filter_style_issue(ctx, &issue) {
                if let Some(counter) = &ctx.filtered_count {
                    counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                }
                return Ok(ToolResult {
                    output: format!("filtered: {filtered}"),
                    title: format!("report_issue: {} ({}:{})", issue.title, file, line_start),
                    metadata: json!({ "outcome": "filtered", "reason": filtered }),
                });
            }
        }

        let Some(tx) = &ctx.issue_tx else {
            return Ok(ToolResult {
                output: "accepted".to_string(),
                title: format!("report_issue: {} ({}:{})", issue.title, file, line_start),
                metadata: json!({ "outcome": "accepted" }),
            });
        };

        let (respond_tx, respond_rx) = tokio::sync::oneshot::channel();
        if tx
            .send(IssueSubmission {
                issue: issue.clone(),
                respond: respond_tx,
            })
            .is_err()
        {
            return Ok(ToolResult {
                output: "accepted".to_string(),
                title: format!("report_issue: {} ({}:{})", issue.title, file, line_start),
                metadata: json!({ "outcome": "accepted" }),
            });
        }

        let ack = respond_rx.await.unwrap_or_else(|_| "accepted".to_string());
        Ok(ToolResult {
            output: ack.clone(),
            title: format!("report_issue: {} ({}:{})", issue.title, file, line_start),
            metadata: json!({ "outcome": ack }),
        })
    }
}

/// Returns Some(reason) if the issue should be dropped per §4.D.6.
fn filter_style_issue(ctx: &ToolContext, issue: &RawIssue) -> Option<String> {
    let diff_files = ctx.diff_files.as_ref()?;
    let file = diff_files.get(&issue.file)?;

    if file.changed_lines.is_empty() {
        return Some("pre-existing file, no lines changed by this diff".to_string());
    }

    let intersects = (issue.line_start..=issue.line_end).any(|l| file.changed_lines.contains(&l));
    if !intersects {
        return Some("line range does not intersect the diff's changed lines".to_string());
    }

    if file.whitespace_only_lines.contains(&issue.line_start) {
        return Some("whitespace-only change, issue pre-exists".to_string());
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChangeType, DiffFile, FileCategory};
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn ctx_with_diff(changed: &[u32], whitespace: &[u32]) -> ToolContext {
        let mut map = std::collections::HashMap::new();
        map.insert(
            "src/y.ts".to_string(),
            DiffFile {
                path: "src/y.ts".to_string(),
                change_type: ChangeType::Modify,
                raw_patch: String::new(),
                changed_lines: changed.iter().copied().collect::<BTreeSet<_>>(),
                whitespace_only_lines: whitespace.iter().copied().collect::<BTreeSet<_>>(),
                category: FileCategory::Source,
            },
        );
        ToolContext {
            session_id: "s".into(),
            cwd: std::path::PathBuf::from("."),
            project_root: std::path::PathBuf::from("."),
            depth: 0,
            event_tx: None,
            allowed_tool_names: None,
            agent_name: Some("style-reviewer".into()),
            issue_tx: None,
            diff_files: Some(Arc::new(map)),
            filtered_count: None,
        }
    }

    fn issue_at(line: u32) -> RawIssue {
        RawIssue {
            id: "1".into(),
            file: "src/y.ts".into(),
            line_start: line,
            line_end: line,
            category: IssueCategory::Style,
            severity: Severity::Suggestion,
            title: "t".into(),
            description: "d".into(),
            suggestion: None,
            code_snippet: None,
            confidence: 0.9,
            source_agent: "style-reviewer".into(),
        }
    }

    #[test]
    fn filters_whitespace_only_line() {
        let ctx = ctx_with_diff(&[42], &[42]);
        assert!(filter_style_issue(&ctx, &issue_at(42)).is_some());
    }

    #[test]
    fn keeps_genuine_changed_line() {
        let ctx = ctx_with_diff(&[42], &[]);
        assert!(filter_style_issue(&ctx, &issue_at(42)).is_none());
    }

    #[test]
    fn filters_line_outside_diff() {
        let ctx = ctx_with_diff(&[10], &[]);
        assert!(filter_style_issue(&ctx, &issue_at(42)).is_some());
    }
}
