#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolPermission {
    ReadOnly,
    NeedsApproval,
}

const DANGEROUS_COMMANDS: &[&str] = &[
    "rm -rf /",
    "rm -rf /*",
    "sudo rm",
    "mkfs.",
    "dd if=",
    ":(){:|:&};:",
    "curl | bash",
    "curl | sh",
    "wget | bash",
    "wget | sh",
    "> /dev/sd",
    "chmod 777 /",
];

/// Review agents run unattended, so there is no human in the loop to approve
/// a command. This is the one remaining guardrail on the bash tool: commands
/// matching a known-destructive pattern are refused outright rather than run.
pub fn is_dangerous_bash(command: &str) -> bool {
    let lower = command.to_lowercase();
    DANGEROUS_COMMANDS
        .iter()
        .any(|pat| lower.contains(&pat.to_lowercase()))
}
