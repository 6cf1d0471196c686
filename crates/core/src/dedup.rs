use sentinel_provider::{ChatRequest, Message, MessageContent, ModelInfo, Provider, Role};
use tokio::sync::Mutex;

use crate::json_repair::parse_llm_json;
use crate::types::RawIssue;

#[derive(Debug, Clone)]
pub struct DedupOutcome {
    pub is_duplicate: bool,
    pub duplicate_of: Option<String>,
    pub reason: Option<String>,
    pub tokens_used: u64,
}

impl DedupOutcome {
    fn accepted() -> Self {
        Self {
            is_duplicate: false,
            duplicate_of: None,
            reason: None,
            tokens_used: 0,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct DedupStats {
    pub accepted: u64,
    pub deduplicated: u64,
    pub tokens_used: u64,
}

struct State {
    accepted: Vec<RawIssue>,
    stats: DedupStats,
}

/// Real-time duplicate checker shared by every reviewer agent's
/// `report_issue` calls. `check_and_add` holds its internal lock for the
/// full duration of the call — including the semantic LLM round-trip — so
/// the accepted set is a consistent snapshot at every decision point; two
/// near-simultaneous near-duplicates can never both be accepted.
pub struct Deduplicator {
    state: Mutex<State>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                accepted: Vec::new(),
                stats: DedupStats::default(),
            }),
        }
    }

    pub async fn check_and_add(
        &self,
        issue: RawIssue,
        llm: Option<(&dyn Provider, &ModelInfo)>,
    ) -> DedupOutcome {
        let mut state = self.state.lock().await;

        let candidates: Vec<RawIssue> = state
            .accepted
            .iter()
            .filter(|existing| existing.overlaps(&issue))
            .cloned()
            .collect();

        if candidates.is_empty() {
            state.accepted.push(issue);
            state.stats.accepted += 1;
            return DedupOutcome::accepted();
        }

        let Some((provider, model)) = llm else {
            state.accepted.push(issue);
            state.stats.accepted += 1;
            return DedupOutcome::accepted();
        };

        match semantic_check(provider, model, &issue, &candidates).await {
            Ok(reply) => {
                state.stats.tokens_used += reply.tokens_used;
                if reply.is_duplicate {
                    if let Some(dup_id) = reply
                        .duplicate_of_id
                        .filter(|id| candidates.iter().any(|c| &c.id == id))
                    {
                        state.stats.deduplicated += 1;
                        return DedupOutcome {
                            is_duplicate: true,
                            duplicate_of: Some(dup_id),
                            reason: reply.reason,
                            tokens_used: reply.tokens_used,
                        };
                    }
                }
                // Missing or invalid duplicate_of_id is treated as "not a duplicate".
                state.accepted.push(issue);
                state.stats.accepted += 1;
                DedupOutcome {
                    is_duplicate: false,
                    duplicate_of: None,
                    reason: None,
                    tokens_used: reply.tokens_used,
                }
            }
            // Any LLM error or unparseable reply: accept. False negatives are
            // preferred over false positives since missed duplicates are
            // recoverable downstream, wrongly absorbed issues are not.
            Err(_) => {
                state.accepted.push(issue);
                state.stats.accepted += 1;
                DedupOutcome::accepted()
            }
        }
    }

    pub async fn stats(&self) -> DedupStats {
        self.state.lock().await.stats.clone()
    }
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, serde::Deserialize)]
struct SemanticReply {
    #[serde(default)]
    is_duplicate: bool,
    #[serde(default)]
    duplicate_of_id: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

struct SemanticOutcome {
    is_duplicate: bool,
    duplicate_of_id: Option<String>,
    reason: Option<String>,
    tokens_used: u64,
}

async fn semantic_check(
    provider: &dyn Provider,
    model: &ModelInfo,
    issue: &RawIssue,
    candidates: &[RawIssue],
) -> anyhow::Result<SemanticOutcome> {
    let mut candidate_list = String::new();
    for c in candidates {
        candidate_list.push_str(&format!(
            "- id={} lines={}..{} title={:?} description={:?}\n",
            c.id, c.line_start, c.line_end, c.title, c.description
        ));
    }

    let prompt = format!(
        "New issue: lines={}..{} title={:?} description={:?}\n\n\
         Potential duplicates already accepted for this file:\n{candidate_list}\n\
         Is the new issue a duplicate of any of these? Reply with JSON: \
         {{\"is_duplicate\": bool, \"duplicate_of_id\": string|null, \"reason\": string}}.",
        issue.line_start, issue.line_end, issue.title, issue.description,
    );

    let request = ChatRequest {
        model: model.id.clone(),
        messages: vec![Message {
            role: Role::User,
            content: MessageContent::Text(prompt),
        }],
        tools: Vec::new(),
        max_tokens: Some(512),
        temperature: Some(0.0),
        system: Some(
            "You detect duplicate code-review findings. Respond with JSON only.".to_string(),
        ),
        stream: false,
        thinking: None,
    };

    let response = provider.chat(&request).await?;
    let tokens_used = response
        .usage
        .as_ref()
        .map(|u| (u.input_tokens + u.output_tokens) as u64)
        .unwrap_or(0);
    let text = response.message.content.as_text();

    let reply: SemanticReply =
        parse_llm_json(text).ok_or_else(|| anyhow::anyhow!("unparseable dedup reply"))?;

    Ok(SemanticOutcome {
        is_duplicate: reply.is_duplicate,
        duplicate_of_id: reply.duplicate_of_id,
        reason: reply.reason,
        tokens_used,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IssueCategory, Severity};

    fn issue(id: &str, file: &str, start: u32, end: u32) -> RawIssue {
        RawIssue {
            id: id.to_string(),
            file: file.to_string(),
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

    #[tokio::test]
    async fn non_overlapping_issue_accepts_without_llm_call() {
        let dedup = Deduplicator::new();
        let a = dedup
            .check_and_add(issue("a", "src/x.ts", 10, 12), None)
            .await;
        assert!(!a.is_duplicate);

        let b = dedup
            .check_and_add(issue("b", "src/x.ts", 50, 52), None)
            .await;
        assert!(!b.is_duplicate);

        let stats = dedup.stats().await;
        assert_eq!(stats.accepted, 2);
        assert_eq!(stats.deduplicated, 0);
    }

    #[tokio::test]
    async fn overlapping_issue_without_llm_is_accepted_not_rejected() {
        // No LLM collaborator supplied: accept is the documented fallback,
        // not a silent drop.
        let dedup = Deduplicator::new();
        dedup
            .check_and_add(issue("a", "src/x.ts", 10, 12), None)
            .await;
        let b = dedup
            .check_and_add(issue("b", "src/x.ts", 11, 13), None)
            .await;
        assert!(!b.is_duplicate);
        let stats = dedup.stats().await;
        assert_eq!(stats.accepted, 2);
    }
}
