use std::collections::{BTreeSet, HashMap};

use sentinel_provider::{ChatRequest, Message, MessageContent, ModelInfo, Provider, Role};

use crate::agent_roles::reviewer_roster;
use crate::json_repair::parse_llm_json;
use crate::types::{DiffFile, FileCategory};

#[derive(Debug, Clone)]
pub struct SelectionResult {
    pub agents: Vec<String>,
    pub reasons: HashMap<String, String>,
    pub used_llm: bool,
    pub confidence: f64,
    pub tokens_used: u64,
}

/// Picks which of the four fixed reviewer agents run over this diff.
/// Runs the cheap rule tier first; only consults the model when the rule
/// tier's confidence falls below `llm_fallback_threshold` and a provider is
/// supplied. Any LLM failure falls back to the rule tier's own result.
pub async fn select_agents(
    files: &[DiffFile],
    llm: Option<(&dyn Provider, &ModelInfo)>,
    llm_fallback_threshold: f64,
) -> SelectionResult {
    let rule_result = rule_tier(files);

    if rule_result.confidence >= llm_fallback_threshold {
        return rule_result;
    }

    let Some((provider, model)) = llm else {
        return rule_result;
    };

    match llm_tier(files, &rule_result, provider, model).await {
        Some((agents, tokens_used)) => SelectionResult {
            agents,
            reasons: rule_result.reasons,
            used_llm: true,
            confidence: 0.95,
            tokens_used,
        },
        None => rule_result,
    }
}

struct FileFlags {
    has_source: bool,
    has_security_sensitive: bool,
    has_database: bool,
    has_templates: bool,
    has_config: bool,
    has_docs: bool,
    has_style: bool,
    #[allow(dead_code)]
    has_tests: bool,
    docs_only: bool,
    config_only: bool,
    category_count: usize,
}

fn compute_flags(files: &[DiffFile]) -> FileFlags {
    let categories: BTreeSet<FileCategory> = files.iter().map(|f| f.category).collect();
    FileFlags {
        has_source: categories.contains(&FileCategory::Source)
            || categories.contains(&FileCategory::SecuritySensitive),
        has_security_sensitive: categories.contains(&FileCategory::SecuritySensitive),
        has_database: categories.contains(&FileCategory::Database),
        has_templates: categories.contains(&FileCategory::Template),
        has_config: categories.contains(&FileCategory::Config),
        has_docs: categories.contains(&FileCategory::Docs),
        has_style: categories.contains(&FileCategory::Style),
        has_tests: categories.contains(&FileCategory::Test),
        docs_only: categories.len() == 1 && categories.contains(&FileCategory::Docs),
        config_only: categories.len() == 1 && categories.contains(&FileCategory::Config),
        category_count: categories.len(),
    }
}

fn rule_tier(files: &[DiffFile]) -> SelectionResult {
    if files.is_empty() {
        return SelectionResult {
            agents: Vec::new(),
            reasons: HashMap::new(),
            used_llm: false,
            confidence: 1.0,
            tokens_used: 0,
        };
    }

    let flags = compute_flags(files);
    let mut agents = Vec::new();
    let mut reasons = HashMap::new();
    let mut confidence = 0.9_f64;

    if flags.docs_only {
        agents.push("style-reviewer".to_string());
        reasons.insert(
            "style-reviewer".to_string(),
            "docs-only change; reviewing prose and formatting only".to_string(),
        );
        confidence = 0.5;
    } else {
        if flags.has_security_sensitive || flags.has_database || flags.has_templates || flags.has_config
        {
            agents.push("security-reviewer".to_string());
            reasons.insert(
                "security-reviewer".to_string(),
                "touches security-sensitive, database, template, or config surface".to_string(),
            );
        } else if flags.has_source {
            agents.push("security-reviewer".to_string());
            reasons.insert(
                "security-reviewer".to_string(),
                "source code present; broad security sweep".to_string(),
            );
            confidence = confidence.min(0.6);
        }

        if flags.has_source {
            agents.push("logic-reviewer".to_string());
            reasons.insert(
                "logic-reviewer".to_string(),
                "source changes require a correctness review".to_string(),
            );
            agents.push("performance-reviewer".to_string());
            reasons.insert(
                "performance-reviewer".to_string(),
                "source changes may affect performance".to_string(),
            );
        }

        if flags.has_style || flags.has_docs || flags.has_source {
            agents.push("style-reviewer".to_string());
            reasons.insert(
                "style-reviewer".to_string(),
                "style and maintainability pass".to_string(),
            );
        }

        if flags.config_only {
            confidence = confidence.min(0.6);
        }
    }

    if flags.category_count >= 3 {
        confidence = (confidence - 0.2).max(0.0);
    }

    agents.sort();
    agents.dedup();

    SelectionResult {
        agents,
        reasons,
        used_llm: false,
        confidence,
        tokens_used: 0,
    }
}

async fn llm_tier(
    files: &[DiffFile],
    proposal: &SelectionResult,
    provider: &dyn Provider,
    model: &ModelInfo,
) -> Option<(Vec<String>, u64)> {
    let universe: Vec<&str> = reviewer_roster().iter().map(|r| r.name).collect();

    let mut file_list = String::new();
    for f in files {
        file_list.push_str(&format!("- {} (category={:?})\n", f.path, f.category));
    }

    let prompt = format!(
        "Changed files:\n{file_list}\n\
         Rule-based proposal: {:?} (confidence {:.2}).\n\
         Reply with JSON: {{\"agents\": [...]}} naming a subset of {:?} that should review this diff.",
        proposal.agents, proposal.confidence, universe,
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
            "You select which fixed reviewer agents should examine a diff. \
             Respond with JSON only."
                .to_string(),
        ),
        stream: false,
        thinking: None,
    };

    let response = provider.chat(&request).await.ok()?;
    let tokens_used = response
        .usage
        .as_ref()
        .map(|u| u.input_tokens as u64 + u.output_tokens as u64)
        .unwrap_or(0);
    let text = response.message.content.as_text();

    #[derive(serde::Deserialize)]
    struct Reply {
        agents: Vec<String>,
    }

    let reply: Reply = parse_llm_json(text)?;
    let valid: Vec<String> = reply
        .agents
        .into_iter()
        .filter(|a| universe.contains(&a.as_str()))
        .collect();

    if valid.is_empty() {
        None
    } else {
        Some((valid, tokens_used))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChangeType;
    use std::collections::BTreeSet;

    fn file(path: &str, category: FileCategory) -> DiffFile {
        DiffFile {
            path: path.to_string(),
            change_type: ChangeType::Modify,
            raw_patch: String::new(),
            changed_lines: BTreeSet::new(),
            whitespace_only_lines: BTreeSet::new(),
            category,
        }
    }

    #[tokio::test]
    async fn empty_diff_selects_nothing() {
        let result = select_agents(&[], None, 0.8).await;
        assert!(result.agents.is_empty());
        assert_eq!(result.confidence, 1.0);
    }

    #[tokio::test]
    async fn docs_only_selects_style_reviewer_with_lowered_confidence() {
        let files = vec![file("README.md", FileCategory::Docs)];
        let result = select_agents(&files, None, 0.8).await;
        assert_eq!(result.agents, vec!["style-reviewer".to_string()]);
        assert!(result.confidence < 0.8);
        assert!(result.reasons["style-reviewer"].contains("docs-only"));
    }

    #[tokio::test]
    async fn security_sensitive_source_selects_security_reviewer_with_high_confidence() {
        let files = vec![file("src/auth/login.ts", FileCategory::SecuritySensitive)];
        let result = select_agents(&files, None, 0.8).await;
        assert!(result.agents.contains(&"security-reviewer".to_string()));
        assert!(result.agents.contains(&"logic-reviewer".to_string()));
    }

    #[tokio::test]
    async fn no_llm_supplied_returns_rule_tier_even_if_low_confidence() {
        let files = vec![file("README.md", FileCategory::Docs)];
        let result = select_agents(&files, None, 0.9).await;
        assert!(!result.used_llm);
    }
}
