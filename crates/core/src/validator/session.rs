use sentinel_provider::{ChatRequest, Message, MessageContent, ModelInfo, Provider, Role};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::json_repair::parse_llm_json;
use crate::types::{ChallengeResponse, DiffFile, Evidence, IssueStatus, RawIssue, Severity, ValidatedIssue};

use super::Inner;
use std::sync::Arc;

pub(crate) enum SessionMsg {
    Issue(RawIssue),
    Close,
}

const SESSION_SYSTEM_PROMPT: &str = "You are validating a single code-review finding through a \
multi-round challenge dialogue. Examine the file and line range named in the finding, reason \
about whether it is a real issue, and reply with JSON matching: {\"status\": \"confirmed\"| \
\"rejected\"|\"uncertain\", \"final_confidence\": 0..1, \"evidence\": {\"checked_files\": [...], \
\"checked_symbols\": [...], \"related_context\": [...], \"reasoning\": \"...\"}, \
\"rejection_reason\": string|null, \"revised_severity\": \"critical\"|\"error\"|\"warning\"| \
\"suggestion\"|null}. `status` \"pending\" is never a valid reply.";

pub(crate) fn max_rounds_for(severity: Severity, confidence: f64) -> u32 {
    match severity {
        Severity::Critical => 5,
        Severity::Error => 3,
        Severity::Warning if confidence > 0.85 => 1,
        Severity::Warning => 2,
        Severity::Suggestion => 1,
    }
}

fn round_prompt(round: u32, issue: &RawIssue, diff_file: Option<&DiffFile>) -> String {
    let context = diff_file
        .map(|f| format!("\nRelevant hunk(s) for {}:\n{}\n", f.path, f.raw_patch))
        .unwrap_or_default();

    match round {
        1 => format!(
            "Validate this finding.\n\nfile={} lines={}..{} severity={:?} category={:?}\n\
             title={:?}\ndescription={:?}\n{context}\nReply with the JSON validation format.",
            issue.file,
            issue.line_start,
            issue.line_end,
            issue.severity,
            issue.category,
            issue.title,
            issue.description,
        ),
        2 => "Are you certain? Re-examine the evidence and reply with the JSON validation format again.".to_string(),
        3 => "Provide concrete line-level evidence supporting your status. Cite exact lines and \
              symbols in `evidence.checked_symbols`/`evidence.related_context`, then reply with \
              the JSON validation format."
            .to_string(),
        4 => "Argue the opposite of your current position as persuasively as you can, then \
              reconsider and reply with your honest final JSON validation format."
            .to_string(),
        _ => "This is the final round. Reply with a definitive, non-revisable decision in the \
              JSON validation format."
            .to_string(),
    }
}

/// Runs every round of the challenge protocol for one issue within a
/// session's persistent conversation, returning the finalized issue and the
/// input+output tokens spent across all rounds.
pub(crate) async fn run_challenge_protocol(
    provider: &dyn Provider,
    model: &ModelInfo,
    thread: &mut Vec<Message>,
    diff_file: Option<&DiffFile>,
    issue: &RawIssue,
) -> (ValidatedIssue, u64) {
    let max_rounds = max_rounds_for(issue.severity, issue.confidence);
    let mut rounds: Vec<ChallengeResponse> = Vec::new();
    let mut tokens_used = 0u64;

    for round in 1..=max_rounds {
        thread.push(Message {
            role: Role::User,
            content: MessageContent::Text(round_prompt(round, issue, diff_file)),
        });

        let request = ChatRequest {
            model: model.id.clone(),
            messages: thread.clone(),
            tools: Vec::new(),
            max_tokens: Some(1024),
            temperature: Some(0.0),
            system: Some(SESSION_SYSTEM_PROMPT.to_string()),
            stream: false,
            thinking: None,
        };

        let response = match provider.chat(&request).await {
            Ok(r) => r,
            Err(_) => return (uncertain_with_reason(issue, "llm transport error"), tokens_used),
        };

        if let Some(usage) = &response.usage {
            tokens_used += (usage.input_tokens + usage.output_tokens) as u64;
        }
        let text = response.message.content.as_text().to_string();
        thread.push(response.message.clone());

        match parse_llm_json::<ChallengeResponse>(&text) {
            Some(parsed) => {
                let agrees_with_previous = rounds
                    .last()
                    .map(|prev| prev.status == parsed.status)
                    .unwrap_or(false);
                rounds.push(parsed.clone());

                if round >= 2 && agrees_with_previous {
                    return (finalize_agreement(issue, parsed), tokens_used);
                }
                if round == max_rounds {
                    return (finalize_exhaustion(issue, rounds), tokens_used);
                }
            }
            None => {
                if round == 1 {
                    return (uncertain_with_reason(issue, "parse failed"), tokens_used);
                }
                let prev = rounds.last().cloned().expect("round > 1 has a prior result");
                return (finalize_from_previous(issue, prev, "parse failed on later round"), tokens_used);
            }
        }
    }

    // Unreachable: the loop above always returns by `round == max_rounds`.
    (uncertain_with_reason(issue, "parse failed"), tokens_used)
}

fn finalize_agreement(issue: &RawIssue, latest: ChallengeResponse) -> ValidatedIssue {
    ValidatedIssue {
        issue: issue.clone(),
        status: latest.status,
        rejection_reason: if latest.status == IssueStatus::Rejected {
            latest.rejection_reason.clone().or_else(|| Some("two rounds agree".to_string()))
        } else {
            None
        },
        evidence: latest.evidence,
        final_confidence: latest.final_confidence.clamp(0.0, 1.0),
        revised_severity: latest.revised_severity,
        revised_description: None,
    }
}

fn finalize_exhaustion(issue: &RawIssue, rounds: Vec<ChallengeResponse>) -> ValidatedIssue {
    use std::collections::HashMap;

    let mut counts: HashMap<IssueStatus, u32> = HashMap::new();
    for r in &rounds {
        *counts.entry(r.status).or_insert(0) += 1;
    }
    let max_count = counts.values().copied().max().unwrap_or(0);
    let winners: Vec<IssueStatus> = counts
        .iter()
        .filter(|&(_, &c)| c == max_count)
        .map(|(s, _)| *s)
        .collect();
    let status = if winners.len() == 1 {
        winners[0]
    } else {
        IssueStatus::Uncertain
    };

    let last_confidence = rounds
        .last()
        .map(|r| r.final_confidence)
        .unwrap_or(issue.confidence);
    let final_confidence = (last_confidence - 0.3).max(0.3);

    let mut evidence = Evidence::default();
    for r in &rounds {
        evidence.checked_files.extend(r.evidence.checked_files.iter().cloned());
        evidence.checked_symbols.extend(r.evidence.checked_symbols.iter().cloned());
        evidence.related_context.extend(r.evidence.related_context.iter().cloned());
    }
    dedup_in_place(&mut evidence.checked_files);
    dedup_in_place(&mut evidence.checked_symbols);
    dedup_in_place(&mut evidence.related_context);

    let mut tally: Vec<(IssueStatus, u32)> = counts.into_iter().collect();
    tally.sort_by(|a, b| b.1.cmp(&a.1));
    let tally_str = tally
        .iter()
        .map(|(_, c)| c.to_string())
        .collect::<Vec<_>>()
        .join("/");
    evidence.reasoning = format!(
        "exhausted {} rounds without two-round agreement; majority vote {}",
        rounds.len(),
        tally_str
    );

    ValidatedIssue {
        issue: issue.clone(),
        status,
        rejection_reason: if status == IssueStatus::Rejected {
            Some("majority vote rejected".to_string())
        } else {
            None
        },
        evidence,
        final_confidence,
        revised_severity: rounds.last().and_then(|r| r.revised_severity),
        revised_description: None,
    }
}

fn finalize_from_previous(issue: &RawIssue, prev: ChallengeResponse, note: &str) -> ValidatedIssue {
    let mut evidence = prev.evidence;
    evidence.reasoning = format!("{} ({note})", evidence.reasoning);
    ValidatedIssue {
        issue: issue.clone(),
        status: prev.status,
        rejection_reason: prev.rejection_reason,
        evidence,
        final_confidence: prev.final_confidence,
        revised_severity: prev.revised_severity,
        revised_description: None,
    }
}

fn uncertain_with_reason(issue: &RawIssue, reason: &str) -> ValidatedIssue {
    ValidatedIssue {
        issue: issue.clone(),
        status: IssueStatus::Uncertain,
        rejection_reason: None,
        evidence: Evidence {
            reasoning: reason.to_string(),
            ..Evidence::default()
        },
        final_confidence: issue.confidence,
        revised_severity: None,
        revised_description: None,
    }
}

pub(crate) fn cancelled_result(issue: &RawIssue) -> ValidatedIssue {
    uncertain_with_reason(issue, "cancelled")
}

fn dedup_in_place(v: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    v.retain(|s| seen.insert(s.clone()));
}

pub(crate) struct SessionParams {
    pub file: String,
    pub session_id: String,
    pub provider: Arc<dyn Provider>,
    pub model: ModelInfo,
    pub diff_file: Option<DiffFile>,
    pub cancel: CancellationToken,
}

/// One file's long-lived validator conversation. Processes issues
/// sequentially so the conversation history stays coherent; closes on an
/// explicit `Close` message (idle timeout or drain) or cancellation.
pub(crate) async fn run_session(
    params: SessionParams,
    mut rx: mpsc::UnboundedReceiver<SessionMsg>,
    inner: Arc<Inner>,
) {
    let mut thread: Vec<Message> = Vec::new();

    loop {
        tokio::select! {
            _ = params.cancel.cancelled() => {
                while let Ok(msg) = rx.try_recv() {
                    if let SessionMsg::Issue(issue) = msg {
                        inner.record_result(cancelled_result(&issue), 0);
                    }
                }
                break;
            }
            msg = rx.recv() => {
                match msg {
                    Some(SessionMsg::Issue(issue)) => {
                        let (validated, tokens) = run_challenge_protocol(
                            params.provider.as_ref(),
                            &params.model,
                            &mut thread,
                            params.diff_file.as_ref(),
                            &issue,
                        )
                        .await;
                        inner.record_result(validated, tokens);
                    }
                    Some(SessionMsg::Close) | None => break,
                }
            }
        }
    }

    inner.close_session(&params.file, &params.session_id);
}
