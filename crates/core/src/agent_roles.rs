use sentinel_provider::{ModelInfo, ModelTier, Provider};

use crate::agent::AgentConfig;
use crate::types::{IssueCategory, Severity};

/// One of the fixed reviewer agents (or the fix-verifier). `category_focus`
/// and `default_severity_floor` are read by the selector and the validator's
/// confidence gate respectively; `system_prompt_focus` is the role-specific
/// paragraph appended to the shared prompt template.
#[derive(Debug, Clone, Copy)]
pub struct AgentRoleDefinition {
    pub name: &'static str,
    pub system_prompt_focus: &'static str,
    pub category_focus: &'static [IssueCategory],
    pub default_severity_floor: Severity,
    pub preferred_tier: ModelTier,
}

pub const SECURITY_REVIEWER: AgentRoleDefinition = AgentRoleDefinition {
    name: "security-reviewer",
    system_prompt_focus: "## Your focus: security\n\n\
        Look for injection (SQL, command, template), authentication and \
        authorization gaps, unsafe deserialization, secrets committed to the \
        diff, missing input validation at trust boundaries, and unsafe use of \
        cryptographic primitives. Favor precision: a security finding you cannot \
        back with a concrete exploitable path should be reported at a lower \
        confidence rather than omitted.",
    category_focus: &[IssueCategory::Security],
    default_severity_floor: Severity::Warning,
    preferred_tier: ModelTier::High,
};

pub const LOGIC_REVIEWER: AgentRoleDefinition = AgentRoleDefinition {
    name: "logic-reviewer",
    system_prompt_focus: "## Your focus: logic and correctness\n\n\
        Look for off-by-one errors, incorrect conditionals, race conditions, \
        unhandled edge cases (empty collections, nulls, boundary values), \
        resource leaks, and behavior that contradicts the surrounding code's \
        existing invariants. Read the functions that call into or are called \
        by the changed code before deciding something is wrong.",
    category_focus: &[IssueCategory::Logic],
    default_severity_floor: Severity::Warning,
    preferred_tier: ModelTier::High,
};

pub const STYLE_REVIEWER: AgentRoleDefinition = AgentRoleDefinition {
    name: "style-reviewer",
    system_prompt_focus: "## Your focus: style and maintainability\n\n\
        Look for naming inconsistencies, dead code, duplicated logic, missing \
        or misleading comments, and deviations from the project's coding \
        standards below. Only report issues on lines this diff actually \
        changed — if a nearby line has the same problem but wasn't touched by \
        this diff, leave it alone.",
    category_focus: &[IssueCategory::Style, IssueCategory::Maintainability],
    default_severity_floor: Severity::Suggestion,
    preferred_tier: ModelTier::Low,
};

pub const PERFORMANCE_REVIEWER: AgentRoleDefinition = AgentRoleDefinition {
    name: "performance-reviewer",
    system_prompt_focus: "## Your focus: performance\n\n\
        Look for accidental quadratic behavior, unnecessary allocations or \
        copies in hot paths, N+1 query patterns, blocking calls on an async \
        path, and missing indices or pagination on data-access code. Weigh \
        findings against the code's apparent hot-path status — a slow loop in \
        a one-time setup function is not worth reporting.",
    category_focus: &[IssueCategory::Performance],
    default_severity_floor: Severity::Warning,
    preferred_tier: ModelTier::Medium,
};

pub const FIX_VERIFIER: AgentRoleDefinition = AgentRoleDefinition {
    name: "fix-verifier",
    system_prompt_focus: "## Your focus: fix verification\n\n\
        You are given a list of issues from a prior review of this same file or \
        area. For each one, determine whether the new diff fixes it, leaves it \
        present, or whether it no longer applies (the surrounding code was \
        removed or rewritten such that the issue is moot). Use the tools \
        available to read the current state of each file before deciding.",
    category_focus: &[
        IssueCategory::Security,
        IssueCategory::Logic,
        IssueCategory::Performance,
        IssueCategory::Style,
        IssueCategory::Maintainability,
    ],
    default_severity_floor: Severity::Suggestion,
    preferred_tier: ModelTier::High,
};

/// The fixed reviewer universe selected from in `selector.rs`. `fix-verifier`
/// is deliberately excluded — it is never chosen by the selector, only run
/// conditionally when `PreviousReviewData` is supplied.
pub fn reviewer_roster() -> Vec<AgentRoleDefinition> {
    vec![
        SECURITY_REVIEWER,
        LOGIC_REVIEWER,
        STYLE_REVIEWER,
        PERFORMANCE_REVIEWER,
    ]
}

pub fn resolve_role(name: &str) -> Option<AgentRoleDefinition> {
    match name {
        "security-reviewer" => Some(SECURITY_REVIEWER),
        "logic-reviewer" => Some(LOGIC_REVIEWER),
        "style-reviewer" => Some(STYLE_REVIEWER),
        "performance-reviewer" => Some(PERFORMANCE_REVIEWER),
        "fix-verifier" => Some(FIX_VERIFIER),
        _ => None,
    }
}

/// Picks the model for a role: an explicit per-agent override from
/// `ReviewConfig.agents`, falling back to the provider's model for the
/// role's preferred tier.
pub fn resolve_model_for_role<'a>(
    provider: &'a dyn Provider,
    role: &AgentRoleDefinition,
    overrides: &sentinel_config::AgentRosterSettings,
) -> Option<&'a ModelInfo> {
    if let Some(over) = overrides.overrides.get(role.name) {
        if let Some(model_id) = &over.model {
            if let Some(m) = provider.supported_models().iter().find(|m| &m.id == model_id) {
                return Some(m);
            }
        }
    }
    provider.model_for_tier(role.preferred_tier)
}

/// Builds the `AgentConfig` for a role: system prompt composed from the
/// shared template plus the role's focus paragraph, and any system-prompt
/// override from configuration applied on top.
pub fn build_agent_config(
    role: &AgentRoleDefinition,
    diff_summary: &str,
    standards_text: Option<&str>,
    tool_names: &[String],
    overrides: &sentinel_config::AgentRosterSettings,
    retry: sentinel_config::RetrySettings,
) -> AgentConfig {
    let system_prompt = overrides
        .overrides
        .get(role.name)
        .and_then(|o| o.system_prompt.clone())
        .unwrap_or_else(|| {
            crate::prompt::build_agent_system_prompt(
                role.system_prompt_focus,
                diff_summary,
                standards_text,
                tool_names,
            )
        });

    AgentConfig {
        name: role.name.to_string(),
        system_prompt,
        agent_name: Some(role.name.to_string()),
        retry,
        ..AgentConfig::default()
    }
}

pub fn role_disabled(name: &str, overrides: &sentinel_config::AgentRosterSettings) -> bool {
    overrides
        .overrides
        .get(name)
        .and_then(|o| o.disabled)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reviewer_roster_excludes_fix_verifier() {
        let roster = reviewer_roster();
        assert_eq!(roster.len(), 4);
        assert!(!roster.iter().any(|r| r.name == "fix-verifier"));
    }

    #[test]
    fn resolve_role_finds_each_builtin() {
        for name in [
            "security-reviewer",
            "logic-reviewer",
            "style-reviewer",
            "performance-reviewer",
            "fix-verifier",
        ] {
            assert!(resolve_role(name).is_some(), "missing role {name}");
        }
        assert!(resolve_role("made-up").is_none());
    }
}
