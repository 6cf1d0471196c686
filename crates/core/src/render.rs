use serde::Serialize;

use crate::types::{IssueStatus, ReviewReport, Severity};

/// One issue in the shape a PR-commenting integration actually posts:
/// confidence rescaled to 0..100 and the rest flattened out of `ValidatedIssue`.
#[derive(Debug, Clone, Serialize)]
pub struct PrComment {
    pub id: String,
    pub file: String,
    pub line_start: u32,
    pub line_end: u32,
    pub severity: Severity,
    pub category: crate::types::IssueCategory,
    pub title: String,
    pub body: String,
    pub confidence: u8,
    pub source_agent: String,
}

/// Full JSON report, or evidence-stripped when `strip_evidence` is set — the
/// shape a size-conscious PR bot posts instead of the full evidence trail.
pub fn to_json(report: &ReviewReport, strip_evidence: bool) -> serde_json::Value {
    let mut value = serde_json::to_value(report).expect("ReviewReport always serializes");
    if strip_evidence {
        if let Some(issues) = value.get_mut("issues").and_then(|v| v.as_array_mut()) {
            for issue in issues {
                if let Some(obj) = issue.as_object_mut() {
                    obj.remove("evidence");
                }
            }
        }
    }
    value
}

/// Markdown report grouped by severity, most severe first. Only confirmed
/// issues are listed — rejected/uncertain findings stay in the JSON form.
pub fn to_markdown(report: &ReviewReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Review report — risk: {:?}\n\n", report.risk_level));
    out.push_str(&report.summary);
    out.push_str("\n\n");

    for severity in [Severity::Critical, Severity::Error, Severity::Warning, Severity::Suggestion] {
        let group: Vec<_> = report
            .issues
            .iter()
            .filter(|i| i.status == IssueStatus::Confirmed && i.issue.severity == severity)
            .collect();
        if group.is_empty() {
            continue;
        }
        out.push_str(&format!("## {severity:?}\n\n"));
        for issue in group {
            out.push_str(&format!(
                "- **{}:{}** {} ({:?})\n  {}\n",
                issue.issue.file, issue.issue.line_start, issue.issue.title, issue.issue.category,
                issue.issue.description,
            ));
            if let Some(suggestion) = &issue.issue.suggestion {
                out.push_str(&format!("  - suggestion: {suggestion}\n"));
            }
        }
        out.push('\n');
    }

    if let Some(fix) = &report.fix_verification {
        out.push_str("## Fix verification\n\n");
        for (status, count) in &fix.by_status {
            out.push_str(&format!("- {status}: {count}\n"));
        }
        out.push('\n');
    }

    out.push_str(&format!(
        "_{} tokens used, {}ms, agents: {}_\n",
        report.metrics.tokens_used,
        report.metadata.duration_ms,
        report.metadata.agents_run.join(", "),
    ));

    out
}

/// One-line-per-severity-bucket summary suitable for a CLI's final stdout line.
pub fn to_summary(report: &ReviewReport) -> String {
    format!(
        "risk={:?} confirmed={} rejected={} uncertain={} deduplicated={} filtered={}",
        report.risk_level,
        report.metrics.confirmed,
        report.metrics.rejected,
        report.metrics.uncertain,
        report.metrics.deduplicated,
        report.metrics.filtered,
    )
}

/// Confirmed issues in PR-comment shape, confidence rescaled to 0..100.
pub fn to_pr_comments(report: &ReviewReport) -> Vec<PrComment> {
    report
        .issues
        .iter()
        .filter(|i| i.status == IssueStatus::Confirmed)
        .map(|i| PrComment {
            id: i.issue.id.clone(),
            file: i.issue.file.clone(),
            line_start: i.issue.line_start,
            line_end: i.issue.line_end,
            severity: i.issue.severity,
            category: i.issue.category,
            title: i.issue.title.clone(),
            body: i.issue.description.clone(),
            confidence: (i.final_confidence.clamp(0.0, 1.0) * 100.0).round() as u8,
            source_agent: i.issue.source_agent.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::assemble_report;
    use crate::types::{Evidence, IssueCategory, RawIssue, ValidatedIssue};

    fn sample_report() -> ReviewReport {
        let issue = ValidatedIssue {
            issue: RawIssue {
                id: "1".into(),
                file: "src/x.ts".into(),
                line_start: 10,
                line_end: 12,
                category: IssueCategory::Security,
                severity: Severity::Critical,
                title: "SQL injection".into(),
                description: "unsanitized input reaches the query".into(),
                suggestion: Some("use a parameterized query".into()),
                code_snippet: None,
                confidence: 0.95,
                source_agent: "security-reviewer".into(),
            },
            status: IssueStatus::Confirmed,
            evidence: Evidence::default(),
            final_confidence: 0.95,
            rejection_reason: None,
            revised_severity: None,
            revised_description: None,
        };
        assemble_report(vec![issue], 0, 0, 100, 500, vec!["security-reviewer".into()], None)
    }

    #[test]
    fn json_strip_evidence_removes_the_field() {
        let report = sample_report();
        let value = to_json(&report, true);
        let issue = &value["issues"][0];
        assert!(issue.get("evidence").is_none());
        assert!(issue.get("title").is_some());
    }

    #[test]
    fn markdown_lists_confirmed_issue_under_its_severity() {
        let report = sample_report();
        let markdown = to_markdown(&report);
        assert!(markdown.contains("## Critical"));
        assert!(markdown.contains("SQL injection"));
    }

    #[test]
    fn pr_comments_rescale_confidence_to_0_100() {
        let report = sample_report();
        let comments = to_pr_comments(&report);
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].confidence, 95);
    }

    #[test]
    fn summary_reports_every_bucket() {
        let report = sample_report();
        let summary = to_summary(&report);
        assert!(summary.contains("confirmed=1"));
    }
}
