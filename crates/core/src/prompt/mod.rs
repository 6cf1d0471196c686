/// Builds the system prompt for one reviewer/validator/fix-verifier agent.
///
/// Every agent shares the same preamble (who it is, the diff under review,
/// the project's coding standards, and the tools it has) and differs only in
/// its role-specific focus paragraph.
pub fn build_agent_system_prompt(
    role_focus: &str,
    diff_summary: &str,
    standards_text: Option<&str>,
    tool_names: &[String],
) -> String {
    let mut prompt = String::new();

    prompt.push_str(
        "You are an automated code reviewer examining a single diff. You work \
         unattended: report every finding through the `report_issue` tool rather \
         than narrating it in your final message. Read surrounding code with the \
         tools available to you before judging whether something is a real issue.\n\n",
    );

    prompt.push_str(role_focus.trim_end());
    prompt.push_str("\n\n");

    prompt.push_str("## Diff under review\n\n");
    prompt.push_str(diff_summary.trim_end());
    prompt.push_str("\n\n");

    if let Some(standards) = standards_text {
        if !standards.trim().is_empty() {
            prompt.push_str("## Project coding standards\n\n");
            prompt.push_str(standards.trim_end());
            prompt.push_str("\n\n");
        }
    }

    prompt.push_str("## Tools available\n\n");
    for name in tool_names {
        prompt.push_str("- ");
        prompt.push_str(name);
        prompt.push('\n');
    }
    prompt.push('\n');

    prompt.push_str(
        "Call `report_issue` once per distinct finding. When you have finished \
         examining every changed file relevant to your focus, reply with a short \
         summary of what you reviewed and stop.",
    );

    prompt
}

/// Summarizes a set of `DiffFile`s for inclusion in an agent's system prompt:
/// path, change type, and line-change counts, one line per file.
pub fn summarize_diff_files(files: &[crate::types::DiffFile]) -> String {
    if files.is_empty() {
        return "(empty diff — no files changed)".to_string();
    }
    let mut out = String::new();
    for file in files {
        out.push_str(&format!(
            "- {} ({:?}, {} changed lines, category={:?})\n",
            file.path,
            file.change_type,
            file.changed_lines.len(),
            file.category
        ));
    }
    out
}
