use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Add,
    Modify,
    Delete,
    Rename,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCategory {
    Source,
    Style,
    Test,
    Config,
    Docs,
    Database,
    Template,
    SecuritySensitive,
}

/// One file touched by the diff under review. Immutable once parsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffFile {
    pub path: String,
    pub change_type: ChangeType,
    pub raw_patch: String,
    pub changed_lines: BTreeSet<u32>,
    pub whitespace_only_lines: BTreeSet<u32>,
    pub category: FileCategory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    Security,
    Logic,
    Performance,
    Style,
    Maintainability,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Suggestion,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Pending,
    Confirmed,
    Rejected,
    Uncertain,
}

/// A finding reported by a reviewer agent, before dedup/validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawIssue {
    pub id: String,
    pub file: String,
    pub line_start: u32,
    pub line_end: u32,
    pub category: IssueCategory,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub suggestion: Option<String>,
    #[serde(default)]
    pub code_snippet: Option<String>,
    pub confidence: f64,
    pub source_agent: String,
}

impl RawIssue {
    pub fn overlaps(&self, other: &RawIssue) -> bool {
        self.file == other.file
            && self.line_start <= other.line_end
            && other.line_start <= self.line_end
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Evidence {
    pub checked_files: Vec<String>,
    pub checked_symbols: Vec<String>,
    pub related_context: Vec<String>,
    pub reasoning: String,
}

/// A `RawIssue` after passing through the validator (or synthesized directly
/// by the confidence gate). Every accepted raw issue produces exactly one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatedIssue {
    #[serde(flatten)]
    pub issue: RawIssue,
    pub status: IssueStatus,
    pub evidence: Evidence,
    pub final_confidence: f64,
    #[serde(default)]
    pub rejection_reason: Option<String>,
    #[serde(default)]
    pub revised_severity: Option<Severity>,
    #[serde(default)]
    pub revised_description: Option<String>,
}

/// Per-round parsed reply from the validator's challenge dialogue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeResponse {
    pub status: IssueStatus,
    pub final_confidence: f64,
    pub evidence: Evidence,
    #[serde(default)]
    pub rejection_reason: Option<String>,
    #[serde(default)]
    pub revised_severity: Option<Severity>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixStatus {
    Fixed,
    Missed,
    FalsePositive,
    Obsolete,
    Uncertain,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixVerification {
    pub original_id: String,
    pub status: FixStatus,
    pub confidence: f64,
    pub evidence: Evidence,
    #[serde(default)]
    pub updated_issue: Option<RawIssue>,
    #[serde(default)]
    pub false_positive_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewMetrics {
    pub total_scanned: u64,
    pub confirmed: u64,
    pub rejected: u64,
    pub uncertain: u64,
    pub deduplicated: u64,
    pub filtered: u64,
    pub tokens_used: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewMetadata {
    pub tokens_used: u64,
    pub duration_ms: u64,
    pub agents_run: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixVerificationSummary {
    pub by_status: std::collections::BTreeMap<String, u64>,
    pub verifications: Vec<FixVerification>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewReport {
    pub summary: String,
    pub risk_level: RiskLevel,
    pub issues: Vec<ValidatedIssue>,
    pub checklist: Vec<String>,
    pub metrics: ReviewMetrics,
    pub metadata: ReviewMetadata,
    #[serde(default)]
    pub fix_verification: Option<FixVerificationSummary>,
}

/// A previously reported issue, fed back in for fix verification (§4.E).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviousIssue {
    pub id: String,
    pub file: String,
    pub line_start: u32,
    pub line_end: u32,
    pub category: IssueCategory,
    pub severity: Severity,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviousReviewData {
    pub issues: Vec<PreviousIssue>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlap_detects_shared_range() {
        let a = sample_issue("a", 10, 12);
        let b = sample_issue("b", 11, 13);
        assert!(a.overlaps(&b));
    }

    #[test]
    fn overlap_rejects_disjoint_range() {
        let a = sample_issue("a", 10, 12);
        let b = sample_issue("b", 13, 15);
        assert!(!a.overlaps(&b));
    }

    fn sample_issue(id: &str, start: u32, end: u32) -> RawIssue {
        RawIssue {
            id: id.to_string(),
            file: "src/x.ts".to_string(),
            line_start: start,
            line_end: end,
            category: IssueCategory::Logic,
            severity: Severity::Warning,
            title: "t".to_string(),
            description: "d".to_string(),
            suggestion: None,
            code_snippet: None,
            confidence: 0.9,
            source_agent: "logic-reviewer".to_string(),
        }
    }
}
