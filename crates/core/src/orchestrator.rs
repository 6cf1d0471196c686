use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use sentinel_provider::{ModelTier, Provider};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent_manager::AgentManager;
use crate::agent_roles::{build_agent_config, resolve_model_for_role, resolve_role, role_disabled};
use crate::dedup::Deduplicator;
use crate::diff::parse_diff;
use crate::diff_source::DiffSource;
use crate::error::ReviewError;
use crate::fix_verifier::verify_fixes;
use crate::progress::ProgressEmitter;
use crate::prompt::summarize_diff_files;
use crate::report::assemble_report;
use crate::selector::select_agents;
use crate::tools::report_issue::IssueSubmission;
use crate::tools::{default_registry, ToolContext};
use crate::types::{DiffFile, PreviousReviewData, ReviewReport};

/// Runs a single review end to end: context build, agent selection, reviewer
/// fan-out (plus the fix-verifier in parallel), issue drain, aggregation,
/// and report assembly. One instance per process; `run` may be called
/// repeatedly against different diffs.
pub struct Orchestrator {
    config: sentinel_config::ReviewConfig,
    provider: Arc<dyn Provider>,
    project_root: PathBuf,
}

impl Orchestrator {
    pub fn new(
        config: sentinel_config::ReviewConfig,
        provider: Arc<dyn Provider>,
        project_root: PathBuf,
    ) -> Self {
        Self {
            config,
            provider,
            project_root,
        }
    }

    pub async fn run(
        &self,
        diff_source: DiffSource,
        previous: Option<PreviousReviewData>,
        progress: &ProgressEmitter,
    ) -> Result<ReviewReport, ReviewError> {
        let cancel = CancellationToken::new();
        let budget_secs = self.config.budget.overall_timeout_secs;
        let deadline = tokio::time::sleep(std::time::Duration::from_secs(budget_secs));
        tokio::pin!(deadline);

        tokio::select! {
            result = self.run_inner(diff_source, previous, progress, cancel.clone()) => result,
            _ = &mut deadline => {
                cancel.cancel();
                progress.review_error("overall review budget exceeded");
                Err(ReviewError::BudgetExceeded(format!("exceeded {budget_secs}s overall timeout")))
            }
        }
    }

    async fn run_inner(
        &self,
        diff_source: DiffSource,
        previous: Option<PreviousReviewData>,
        progress: &ProgressEmitter,
        cancel: CancellationToken,
    ) -> Result<ReviewReport, ReviewError> {
        let review_id = uuid::Uuid::new_v4().to_string();
        progress.review_start(&review_id);
        let start = std::time::Instant::now();

        progress.phase_start("context-build");
        let raw_diff = self.obtain_diff_text(&diff_source)?;
        let files = parse_diff(&raw_diff)?;
        let diff_files: Arc<HashMap<String, DiffFile>> =
            Arc::new(files.iter().map(|f| (f.path.clone(), f.clone())).collect());
        let standards_text = self.load_standards();
        let diff_summary = summarize_diff_files(&files);
        progress.phase_complete("context-build");

        progress.phase_start("selection");
        let selector_model = self.provider.model_for_tier(ModelTier::Medium);
        let llm_pair = selector_model.map(|m| (self.provider.as_ref(), m));
        let selection = select_agents(&files, llm_pair, self.config.validator.llm_fallback_threshold)
            .await;
        let mut total_tokens = selection.tokens_used;
        progress.phase_complete("selection");

        let validation_model = self
            .provider
            .model_for_tier(ModelTier::High)
            .or_else(|| self.provider.supported_models().first())
            .ok_or_else(|| ReviewError::ProviderUnavailable(self.provider.name().to_string()))?
            .clone();

        let dedup = Arc::new(Deduplicator::new());
        let dedup_model = if self.config.dedup.enabled {
            match &self.config.dedup.model {
                Some(id) => self
                    .provider
                    .supported_models()
                    .iter()
                    .find(|m| &m.id == id)
                    .cloned()
                    .or_else(|| Some(validation_model.clone())),
                None => Some(validation_model.clone()),
            }
        } else {
            None
        };
        let validator = Arc::new(crate::validator::StreamingValidator::new(
            self.provider.clone(),
            validation_model.clone(),
            diff_files.clone(),
            &self.config.validator,
            cancel.clone(),
        ));

        progress.phase_start("fan-out");
        let (issue_tx, issue_rx) = mpsc::unbounded_channel::<IssueSubmission>();
        let registry = Arc::new(default_registry());
        let tool_names = registry.names();
        let (event_tx, _event_rx) = tokio::sync::broadcast::channel(1024);
        let manager = AgentManager::new(self.provider.clone(), registry, event_tx, 16, 2);

        let filtered_count = Arc::new(AtomicU64::new(0));
        let base_ctx = ToolContext {
            session_id: review_id.clone(),
            cwd: self.project_root.clone(),
            project_root: self.project_root.clone(),
            depth: 0,
            event_tx: None,
            allowed_tool_names: None,
            agent_name: None,
            issue_tx: Some(issue_tx.clone()),
            diff_files: Some(diff_files.clone()),
            filtered_count: Some(filtered_count.clone()),
        };

        let mut agent_ids: Vec<String> = Vec::new();
        let mut agent_name_by_id: HashMap<String, String> = HashMap::new();

        for role_name in &selection.agents {
            if role_disabled(role_name, &self.config.agents) {
                continue;
            }
            let Some(role) = resolve_role(role_name) else {
                continue;
            };
            let Some(model) = resolve_model_for_role(self.provider.as_ref(), &role, &self.config.agents)
            else {
                continue;
            };
            let agent_config = build_agent_config(
                &role,
                &diff_summary,
                standards_text.as_deref(),
                &tool_names,
                &self.config.agents,
                self.config.retry.clone(),
            );

            progress.agent_start(role.name);
            match manager
                .spawn_agent(
                    "Begin reviewing the diff now.".to_string(),
                    Some(role.name.to_string()),
                    0,
                    &base_ctx,
                    agent_config,
                    Some(model.clone()),
                    None,
                )
                .await
            {
                Ok((id, _nickname)) => {
                    agent_name_by_id.insert(id.clone(), role.name.to_string());
                    agent_ids.push(id);
                }
                Err(e) => {
                    // A reviewer failing to even start is fatal: the selector
                    // already committed to this roster, so a silent gap here
                    // would make the report's coverage claims false.
                    cancel.cancel();
                    return Err(ReviewError::ProviderUnavailable(format!(
                        "failed to start {}: {e}",
                        role.name
                    )));
                }
            }
        }

        let fix_verifier_task = previous.clone().map(|prev| {
            let provider = self.provider.clone();
            let model = validation_model.clone();
            let files = files.clone();
            tokio::spawn(async move { verify_fixes(&prev, &files, provider.as_ref(), &model).await })
        });

        // Drain loop: every accepted report_issue submission runs through
        // dedup, then the streaming validator, before its ack is sent back.
        let drain_dedup = dedup.clone();
        let drain_validator = validator.clone();
        let drain_provider = self.provider.clone();
        let drain_model = dedup_model.clone();
        let drain_handle = tokio::spawn(async move {
            let mut rx = issue_rx;
            while let Some(submission) = rx.recv().await {
                let IssueSubmission { issue, respond } = submission;
                let llm_pair = drain_model.as_ref().map(|m| (drain_provider.as_ref(), m));
                let outcome = drain_dedup.check_and_add(issue.clone(), llm_pair).await;
                let ack = if outcome.is_duplicate {
                    format!(
                        "deduplicated: duplicate of {}",
                        outcome.duplicate_of.unwrap_or_default()
                    )
                } else {
                    match drain_validator.enqueue(issue).await {
                        Some(validated) => format!(
                            "auto-rejected: {}",
                            validated.rejection_reason.unwrap_or_default()
                        ),
                        None => "accepted".to_string(),
                    }
                };
                let _ = respond.send(ack);
            }
        });

        drop(issue_tx);
        drop(base_ctx);
        progress.phase_complete("fan-out");

        progress.phase_start("drain");
        let mut remaining = agent_ids.clone();
        while !remaining.is_empty() {
            let (finished, timed_out) = manager
                .wait_any(&remaining, 300_000)
                .await
                .map_err(|e| ReviewError::ProviderUnavailable(e.to_string()))?;
            if timed_out {
                continue;
            }
            for (id, _status) in finished {
                remaining.retain(|r| r != &id);
                let usage = manager.get_usage(&id).await;
                total_tokens += usage.total_input_tokens + usage.total_output_tokens;
                let name = agent_name_by_id.get(&id).cloned().unwrap_or_default();
                progress.agent_complete(name, 0);
            }
        }

        let fix_verification = if let Some(task) = fix_verifier_task {
            match task.await {
                Ok((summary, tokens)) => {
                    total_tokens += tokens;
                    for v in &summary.verifications {
                        if let Some(missed) = &v.updated_issue {
                            let llm_pair = dedup_model.as_ref().map(|m| (self.provider.as_ref(), m));
                            let outcome = dedup.check_and_add(missed.clone(), llm_pair).await;
                            if !outcome.is_duplicate {
                                validator.enqueue(missed.clone()).await;
                            }
                        }
                    }
                    Some(summary)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "fix-verifier task panicked");
                    None
                }
            }
        } else {
            None
        };

        validator.mark_agents_complete();
        let _ = drain_handle.await;
        let flush_result = validator.flush().await;
        progress.phase_complete("drain");

        progress.phase_start("aggregate");
        let dedup_stats = dedup.stats().await;
        total_tokens += flush_result.tokens_used + dedup_stats.tokens_used;

        let report = assemble_report(
            flush_result.issues,
            dedup_stats.deduplicated,
            filtered_count.load(Ordering::Relaxed),
            total_tokens,
            start.elapsed().as_millis() as u64,
            agent_name_by_id.into_values().collect(),
            fix_verification,
        );
        progress.phase_complete("aggregate");
        progress.review_complete(format!("{:?}", report.risk_level));

        Ok(report)
    }

    fn obtain_diff_text(&self, source: &DiffSource) -> Result<String, ReviewError> {
        match source {
            DiffSource::Text(text) => Ok(text.clone()),
            DiffSource::File(path) => std::fs::read_to_string(path)
                .map_err(|e| ReviewError::DiffParseError(format!("reading {path:?}: {e}"))),
            DiffSource::Commits(commits) => {
                if commits.is_empty() {
                    return Err(ReviewError::MissingRef("no commits given".to_string()));
                }
                let output = std::process::Command::new("git")
                    .arg("diff")
                    .arg(format!("{}^", commits[0]))
                    .arg(commits.last().unwrap())
                    .current_dir(&self.project_root)
                    .output()
                    .map_err(|e| ReviewError::ProviderUnavailable(format!("git diff: {e}")))?;
                if !output.status.success() {
                    return Err(ReviewError::DiffParseError(
                        String::from_utf8_lossy(&output.stderr).to_string(),
                    ));
                }
                Ok(String::from_utf8_lossy(&output.stdout).to_string())
            }
            DiffSource::Refs {
                source_ref,
                target_ref,
            } => {
                let output = std::process::Command::new("git")
                    .args(["diff", source_ref, target_ref])
                    .current_dir(&self.project_root)
                    .output()
                    .map_err(|e| ReviewError::ProviderUnavailable(format!("git diff: {e}")))?;
                if !output.status.success() {
                    return Err(ReviewError::MissingRef(format!(
                        "{source_ref}..{target_ref}: {}",
                        String::from_utf8_lossy(&output.stderr)
                    )));
                }
                Ok(String::from_utf8_lossy(&output.stdout).to_string())
            }
        }
    }

    fn load_standards(&self) -> Option<String> {
        for name in ["REVIEW_STANDARDS.md", "CONTRIBUTING.md"] {
            let path = self.project_root.join(name);
            if let Ok(text) = std::fs::read_to_string(&path) {
                return Some(text);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_diff_source_is_read_back_verbatim() {
        let source = DiffSource::Text("diff --git a/x b/x\n".to_string());
        let config = sentinel_config::ReviewConfig::default();
        // Orchestrator::new never touches the filesystem or the provider, so
        // constructing one with a stub is safe without a live Provider.
        struct NoopProvider;
        #[async_trait::async_trait]
        impl sentinel_provider::Provider for NoopProvider {
            fn name(&self) -> &str {
                "noop"
            }
            fn supported_models(&self) -> &[sentinel_provider::ModelInfo] {
                &[]
            }
            async fn chat(
                &self,
                _request: &sentinel_provider::ChatRequest,
            ) -> anyhow::Result<sentinel_provider::ChatResponse> {
                anyhow::bail!("noop provider has no models")
            }
            async fn chat_stream(
                &self,
                _request: &sentinel_provider::ChatRequest,
            ) -> anyhow::Result<
                futures::stream::BoxStream<'static, anyhow::Result<sentinel_provider::StreamEvent>>,
            > {
                anyhow::bail!("noop provider has no models")
            }
        }
        let orchestrator = Orchestrator::new(config, Arc::new(NoopProvider), PathBuf::from("."));
        let text = orchestrator.obtain_diff_text(&source).unwrap();
        assert_eq!(text, "diff --git a/x b/x\n");
    }
}
