use crate::types::{
    FixVerificationSummary, IssueCategory, IssueStatus, ReviewMetadata, ReviewMetrics, ReviewReport,
    RiskLevel, Severity, ValidatedIssue,
};

/// Risk rule, applied only to `confirmed` issues: any critical escalates to
/// high; a confirmed security issue alongside any error also escalates to
/// high; more than two errors is high; any error is at least medium; more
/// than five warnings is at least medium; otherwise low.
pub fn compute_risk_level(issues: &[ValidatedIssue]) -> RiskLevel {
    let confirmed: Vec<&ValidatedIssue> = issues
        .iter()
        .filter(|i| i.status == IssueStatus::Confirmed)
        .collect();

    let has_critical = confirmed.iter().any(|i| i.issue.severity == Severity::Critical);
    let error_count = confirmed
        .iter()
        .filter(|i| i.issue.severity == Severity::Error)
        .count();
    let warning_count = confirmed
        .iter()
        .filter(|i| i.issue.severity == Severity::Warning)
        .count();
    let has_security_and_error = confirmed
        .iter()
        .any(|i| i.issue.category == IssueCategory::Security) && error_count > 0;

    if has_critical || has_security_and_error || error_count > 2 {
        RiskLevel::High
    } else if error_count > 0 || warning_count > 5 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

pub fn compute_metrics(issues: &[ValidatedIssue], deduplicated: u64, filtered: u64, tokens_used: u64) -> ReviewMetrics {
    let confirmed = issues.iter().filter(|i| i.status == IssueStatus::Confirmed).count() as u64;
    let rejected = issues.iter().filter(|i| i.status == IssueStatus::Rejected).count() as u64;
    let uncertain = issues.iter().filter(|i| i.status == IssueStatus::Uncertain).count() as u64;

    ReviewMetrics {
        total_scanned: issues.len() as u64 + deduplicated,
        confirmed,
        rejected,
        uncertain,
        deduplicated,
        filtered,
        tokens_used,
    }
}

fn severity_rank(severity: Severity) -> u8 {
    match severity {
        Severity::Critical => 0,
        Severity::Error => 1,
        Severity::Warning => 2,
        Severity::Suggestion => 3,
    }
}

/// Groups confirmed issues by severity into a human-readable checklist,
/// most severe first.
pub fn build_checklist(issues: &[ValidatedIssue]) -> Vec<String> {
    let mut confirmed: Vec<&ValidatedIssue> = issues
        .iter()
        .filter(|i| i.status == IssueStatus::Confirmed)
        .collect();
    confirmed.sort_by_key(|i| severity_rank(i.issue.severity));

    confirmed
        .into_iter()
        .map(|i| format!("[{:?}] {}:{} — {}", i.issue.severity, i.issue.file, i.issue.line_start, i.issue.title))
        .collect()
}

pub fn summarize(issues: &[ValidatedIssue], risk: RiskLevel) -> String {
    let confirmed = issues.iter().filter(|i| i.status == IssueStatus::Confirmed).count();
    if confirmed == 0 {
        return "No confirmed issues found.".to_string();
    }
    format!(
        "{confirmed} confirmed issue(s) found; overall risk {risk:?}.",
    )
}

#[allow(clippy::too_many_arguments)]
pub fn assemble_report(
    mut issues: Vec<ValidatedIssue>,
    deduplicated: u64,
    filtered: u64,
    tokens_used: u64,
    duration_ms: u64,
    agents_run: Vec<String>,
    fix_verification: Option<FixVerificationSummary>,
) -> ReviewReport {
    issues.sort_by(|a, b| a.issue.file.cmp(&b.issue.file).then(a.issue.line_start.cmp(&b.issue.line_start)));

    let risk_level = compute_risk_level(&issues);
    let metrics = compute_metrics(&issues, deduplicated, filtered, tokens_used);
    let checklist = build_checklist(&issues);
    let summary = summarize(&issues, risk_level);

    ReviewReport {
        summary,
        risk_level,
        issues,
        checklist,
        metrics,
        metadata: ReviewMetadata {
            tokens_used,
            duration_ms,
            agents_run,
        },
        fix_verification,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Evidence, IssueCategory, RawIssue};

    fn issue(severity: Severity, category: IssueCategory, status: IssueStatus) -> ValidatedIssue {
        ValidatedIssue {
            issue: RawIssue {
                id: "1".into(),
                file: "src/x.ts".into(),
                line_start: 1,
                line_end: 1,
                category,
                severity,
                title: "t".into(),
                description: "d".into(),
                suggestion: None,
                code_snippet: None,
                confidence: 0.9,
                source_agent: "logic-reviewer".into(),
            },
            status,
            evidence: Evidence::default(),
            final_confidence: 0.9,
            rejection_reason: None,
            revised_severity: None,
            revised_description: None,
        }
    }

    #[test]
    fn empty_issues_is_low_risk() {
        assert_eq!(compute_risk_level(&[]), RiskLevel::Low);
    }

    #[test]
    fn critical_confirmed_is_high_risk() {
        let issues = vec![issue(Severity::Critical, IssueCategory::Logic, IssueStatus::Confirmed)];
        assert_eq!(compute_risk_level(&issues), RiskLevel::High);
    }

    #[test]
    fn security_plus_error_is_high_risk() {
        let issues = vec![
            issue(Severity::Error, IssueCategory::Security, IssueStatus::Confirmed),
        ];
        assert_eq!(compute_risk_level(&issues), RiskLevel::High);
    }

    #[test]
    fn three_errors_is_high_risk() {
        let issues = vec![
            issue(Severity::Error, IssueCategory::Logic, IssueStatus::Confirmed),
            issue(Severity::Error, IssueCategory::Logic, IssueStatus::Confirmed),
            issue(Severity::Error, IssueCategory::Logic, IssueStatus::Confirmed),
        ];
        assert_eq!(compute_risk_level(&issues), RiskLevel::High);
    }

    #[test]
    fn six_warnings_is_medium_risk() {
        let issues: Vec<_> = (0..6)
            .map(|_| issue(Severity::Warning, IssueCategory::Style, IssueStatus::Confirmed))
            .collect();
        assert_eq!(compute_risk_level(&issues), RiskLevel::Medium);
    }

    #[test]
    fn rejected_issues_do_not_affect_risk() {
        let issues = vec![issue(Severity::Critical, IssueCategory::Logic, IssueStatus::Rejected)];
        assert_eq!(compute_risk_level(&issues), RiskLevel::Low);
    }
}
