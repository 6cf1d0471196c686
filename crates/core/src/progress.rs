use serde::Serialize;

use crate::types::IssueStatus;

/// The orchestrator's review-level observer stream. Coarser than
/// `crate::agent::AgentEvent` (which carries per-tool-call detail for one
/// agent) and `AgentManager`'s `SubAgent*` events (per-spawn lifecycle) —
/// this layer aggregates both into the six-phase, whole-review view an
/// external progress renderer actually wants. Every event carries a
/// monotonically increasing sequence number standing in for a timestamp,
/// since the runtime clock is not available to this crate's pure logic.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProgressEvent {
    ReviewStart { seq: u64, review_id: String },
    PhaseStart { seq: u64, phase: String },
    PhaseComplete { seq: u64, phase: String },
    AgentStart { seq: u64, agent: String },
    AgentProgress { seq: u64, agent: String, message: String },
    AgentComplete { seq: u64, agent: String, issues_reported: u64 },
    ValidationStart { seq: u64, file: String },
    ValidationIssue { seq: u64, file: String, status: IssueStatus },
    ValidationComplete { seq: u64, file: String },
    ReviewComplete { seq: u64, risk: String },
    ReviewError { seq: u64, message: String },
    Log { seq: u64, message: String },
}

/// Assigns each emitted event the next sequence number and forwards it to
/// an optional sink. A missing sink (no observer attached) is not an error —
/// the review still runs, it just isn't watched.
pub struct ProgressEmitter {
    seq: std::sync::atomic::AtomicU64,
    sink: Option<tokio::sync::mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressEmitter {
    pub fn new(sink: Option<tokio::sync::mpsc::UnboundedSender<ProgressEvent>>) -> Self {
        Self {
            seq: std::sync::atomic::AtomicU64::new(0),
            sink,
        }
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, std::sync::atomic::Ordering::SeqCst)
    }

    fn emit(&self, build: impl FnOnce(u64) -> ProgressEvent) {
        let event = build(self.next_seq());
        if let Some(sink) = &self.sink {
            let _ = sink.send(event);
        }
    }

    pub fn review_start(&self, review_id: impl Into<String>) {
        let review_id = review_id.into();
        self.emit(|seq| ProgressEvent::ReviewStart { seq, review_id });
    }

    pub fn phase_start(&self, phase: impl Into<String>) {
        let phase = phase.into();
        self.emit(|seq| ProgressEvent::PhaseStart { seq, phase });
    }

    pub fn phase_complete(&self, phase: impl Into<String>) {
        let phase = phase.into();
        self.emit(|seq| ProgressEvent::PhaseComplete { seq, phase });
    }

    pub fn agent_start(&self, agent: impl Into<String>) {
        let agent = agent.into();
        self.emit(|seq| ProgressEvent::AgentStart { seq, agent });
    }

    pub fn agent_progress(&self, agent: impl Into<String>, message: impl Into<String>) {
        let agent = agent.into();
        let message = message.into();
        self.emit(|seq| ProgressEvent::AgentProgress { seq, agent, message });
    }

    pub fn agent_complete(&self, agent: impl Into<String>, issues_reported: u64) {
        let agent = agent.into();
        self.emit(|seq| ProgressEvent::AgentComplete { seq, agent, issues_reported });
    }

    pub fn validation_start(&self, file: impl Into<String>) {
        let file = file.into();
        self.emit(|seq| ProgressEvent::ValidationStart { seq, file });
    }

    pub fn validation_issue(&self, file: impl Into<String>, status: IssueStatus) {
        let file = file.into();
        self.emit(|seq| ProgressEvent::ValidationIssue { seq, file, status });
    }

    pub fn validation_complete(&self, file: impl Into<String>) {
        let file = file.into();
        self.emit(|seq| ProgressEvent::ValidationComplete { seq, file });
    }

    pub fn review_complete(&self, risk: impl Into<String>) {
        let risk = risk.into();
        self.emit(|seq| ProgressEvent::ReviewComplete { seq, risk });
    }

    pub fn review_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.emit(|seq| ProgressEvent::ReviewError { seq, message });
    }

    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        self.emit(|seq| ProgressEvent::Log { seq, message });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_increase_monotonically() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let emitter = ProgressEmitter::new(Some(tx));
        emitter.review_start("r1");
        emitter.phase_start("context-build");
        emitter.phase_complete("context-build");

        let mut seqs = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seqs.push(match event {
                ProgressEvent::ReviewStart { seq, .. } => seq,
                ProgressEvent::PhaseStart { seq, .. } => seq,
                ProgressEvent::PhaseComplete { seq, .. } => seq,
                _ => unreachable!(),
            });
        }
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn missing_sink_does_not_panic() {
        let emitter = ProgressEmitter::new(None);
        emitter.log("no observer attached");
    }
}
