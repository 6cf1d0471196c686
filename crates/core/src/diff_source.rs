/// How the orchestrator obtains the diff under review. Variants (b)–(d)
/// bypass ref resolution (and therefore worktree creation for a *second*
/// ref) entirely — the caller already has the patch text in hand.
#[derive(Debug, Clone)]
pub enum DiffSource {
    /// Two VCS refs to diff against each other, e.g. a base branch and a
    /// feature branch, resolved via `crate::worktree`.
    Refs {
        source_ref: String,
        target_ref: String,
    },
    /// A unified-diff already produced elsewhere (e.g. `git diff` piped in).
    Text(String),
    /// A path to a file containing unified-diff text.
    File(std::path::PathBuf),
    /// A set of commit hashes whose combined patch should be reviewed.
    Commits(Vec<String>),
}

impl DiffSource {
    /// True when this source names refs that must be checked out into a
    /// worktree before diffing; false when raw diff text is already in hand.
    pub fn requires_worktree(&self) -> bool {
        matches!(self, DiffSource::Refs { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_refs_require_a_worktree() {
        assert!(DiffSource::Refs {
            source_ref: "main".into(),
            target_ref: "feature".into(),
        }
        .requires_worktree());
        assert!(!DiffSource::Text("diff --git".into()).requires_worktree());
        assert!(!DiffSource::File("patch.diff".into()).requires_worktree());
        assert!(!DiffSource::Commits(vec!["abc123".into()]).requires_worktree());
    }
}
