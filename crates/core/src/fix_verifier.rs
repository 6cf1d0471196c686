use sentinel_provider::{ChatRequest, Message, MessageContent, ModelInfo, Provider, Role};

use crate::json_repair::parse_llm_json;
use crate::types::{
    DiffFile, Evidence, FixStatus, FixVerification, FixVerificationSummary, PreviousIssue,
    PreviousReviewData, RawIssue,
};

const FIX_VERIFIER_SYSTEM_PROMPT: &str = "You are classifying whether previously reported code \
review issues are fixed, missed, a false positive, or obsolete in a new diff. For each issue, \
read the current state of the named file and reply with JSON: {\"status\": \"fixed\"|\"missed\"| \
\"false_positive\"|\"obsolete\"|\"uncertain\", \"confidence\": 0..1, \"evidence\": \
{\"checked_files\": [...], \"checked_symbols\": [...], \"related_context\": [...], \
\"reasoning\": \"...\"}, \"false_positive_reason\": string|null}.";

/// Classifies each issue from a prior review against the current diff.
/// Runs as a single agent session independent of the reviewer fan-out;
/// a per-issue LLM failure degrades that one issue to `uncertain` rather
/// than failing the whole verification pass.
pub async fn verify_fixes(
    previous: &PreviousReviewData,
    diff_files: &[DiffFile],
    provider: &dyn Provider,
    model: &ModelInfo,
) -> (FixVerificationSummary, u64) {
    let mut verifications = Vec::with_capacity(previous.issues.len());
    let mut tokens_used = 0u64;

    for issue in &previous.issues {
        let diff_file = diff_files.iter().find(|f| f.path == issue.file);
        let (verification, tokens) = verify_one(issue, diff_file, provider, model).await;
        tokens_used += tokens;
        verifications.push(verification);
    }

    let mut by_status = std::collections::BTreeMap::new();
    for v in &verifications {
        *by_status.entry(status_key(v.status).to_string()).or_insert(0u64) += 1;
    }

    (
        FixVerificationSummary {
            by_status,
            verifications,
        },
        tokens_used,
    )
}

async fn verify_one(
    issue: &PreviousIssue,
    diff_file: Option<&DiffFile>,
    provider: &dyn Provider,
    model: &ModelInfo,
) -> (FixVerification, u64) {
    let context = match diff_file {
        Some(f) => format!("The file was touched by the new diff:\n{}\n", f.raw_patch),
        None => "The file was not touched by the new diff at all.\n".to_string(),
    };

    let prompt = format!(
        "Previously reported issue:\nfile={} lines={}..{} severity={:?} category={:?}\n\
         title={:?}\ndescription={:?}\n\n{context}\n\
         Classify this issue's status against the new diff.",
        issue.file,
        issue.line_start,
        issue.line_end,
        issue.severity,
        issue.category,
        issue.title,
        issue.description,
    );

    let request = ChatRequest {
        model: model.id.clone(),
        messages: vec![Message {
            role: Role::User,
            content: MessageContent::Text(prompt),
        }],
        tools: Vec::new(),
        max_tokens: Some(1024),
        temperature: Some(0.0),
        system: Some(FIX_VERIFIER_SYSTEM_PROMPT.to_string()),
        stream: false,
        thinking: None,
    };

    let response = match provider.chat(&request).await {
        Ok(r) => r,
        Err(_) => return (uncertain(issue, "llm transport error"), 0),
    };

    let tokens = response
        .usage
        .as_ref()
        .map(|u| (u.input_tokens + u.output_tokens) as u64)
        .unwrap_or(0);
    let text = response.message.content.as_text();

    #[derive(serde::Deserialize)]
    struct Reply {
        status: FixStatus,
        #[serde(default)]
        confidence: f64,
        #[serde(default)]
        evidence: Evidence,
        #[serde(default)]
        false_positive_reason: Option<String>,
    }

    match parse_llm_json::<Reply>(text) {
        Some(reply) => (
            FixVerification {
                original_id: issue.id.clone(),
                status: reply.status,
                confidence: reply.confidence.clamp(0.0, 1.0),
                evidence: reply.evidence,
                updated_issue: updated_issue_if_missed(reply.status, issue),
                false_positive_reason: reply.false_positive_reason,
            },
            tokens,
        ),
        None => (uncertain(issue, "parse failed"), tokens),
    }
}

/// Missed issues are permitted to re-enter the pipeline as fresh raw issues
/// so they get another shot at dedup/validation in the current run.
fn updated_issue_if_missed(status: FixStatus, issue: &PreviousIssue) -> Option<RawIssue> {
    if status != FixStatus::Missed {
        return None;
    }
    Some(RawIssue {
        id: uuid::Uuid::new_v4().to_string(),
        file: issue.file.clone(),
        line_start: issue.line_start,
        line_end: issue.line_end,
        category: issue.category,
        severity: issue.severity,
        title: issue.title.clone(),
        description: issue.description.clone(),
        suggestion: None,
        code_snippet: None,
        confidence: 0.7,
        source_agent: "fix-verifier".to_string(),
    })
}

fn uncertain(issue: &PreviousIssue, reason: &str) -> FixVerification {
    FixVerification {
        original_id: issue.id.clone(),
        status: FixStatus::Uncertain,
        confidence: 0.0,
        evidence: Evidence {
            reasoning: reason.to_string(),
            ..Evidence::default()
        },
        updated_issue: None,
        false_positive_reason: None,
    }
}

fn status_key(status: FixStatus) -> &'static str {
    match status {
        FixStatus::Fixed => "fixed",
        FixStatus::Missed => "missed",
        FixStatus::FalsePositive => "false_positive",
        FixStatus::Obsolete => "obsolete",
        FixStatus::Uncertain => "uncertain",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IssueCategory, Severity};

    fn previous_issue(id: &str, file: &str) -> PreviousIssue {
        PreviousIssue {
            id: id.to_string(),
            file: file.to_string(),
            line_start: 10,
            line_end: 12,
            category: IssueCategory::Logic,
            severity: Severity::Warning,
            title: "t".to_string(),
            description: "d".to_string(),
        }
    }

    #[test]
    fn status_key_matches_expected_strings() {
        assert_eq!(status_key(FixStatus::Fixed), "fixed");
        assert_eq!(status_key(FixStatus::FalsePositive), "false_positive");
    }

    #[test]
    fn missed_status_produces_updated_issue() {
        let issue = previous_issue("a", "src/x.ts");
        let updated = updated_issue_if_missed(FixStatus::Missed, &issue);
        assert!(updated.is_some());
        assert_eq!(updated.unwrap().source_agent, "fix-verifier");
    }

    #[test]
    fn fixed_status_produces_no_updated_issue() {
        let issue = previous_issue("a", "src/x.ts");
        assert!(updated_issue_if_missed(FixStatus::Fixed, &issue).is_none());
    }
}
