mod session;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use sentinel_provider::{ModelInfo, Provider};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use session::{run_session, SessionMsg, SessionParams};

use crate::types::{DiffFile, IssueStatus, RawIssue, Severity, ValidatedIssue};

#[derive(Debug, Default, Clone, Copy)]
pub struct ValidatorStats {
    pub completed: u64,
    pub total: u64,
    pub active_sessions: u64,
}

#[derive(Debug, Default)]
pub struct FlushResult {
    pub issues: Vec<ValidatedIssue>,
    pub tokens_used: u64,
}

struct SessionEntry {
    id: String,
    tx: mpsc::UnboundedSender<SessionMsg>,
    generation: Arc<AtomicU64>,
}

pub(crate) struct Inner {
    sessions: Mutex<HashMap<String, SessionEntry>>,
    results: Mutex<Vec<ValidatedIssue>>,
    min_confidence: f64,
    idle_timeout_secs: u64,
    provider: Arc<dyn Provider>,
    model: ModelInfo,
    diff_files: Arc<HashMap<String, DiffFile>>,
    cancel: CancellationToken,
    agents_complete: AtomicBool,
    total: AtomicU64,
    completed: AtomicU64,
    tokens_used: AtomicU64,
    active_sessions: AtomicU64,
    drained: Notify,
}

impl Inner {
    pub(crate) fn record_result(&self, issue: ValidatedIssue, tokens: u64) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.tokens_used.fetch_add(tokens, Ordering::SeqCst);
        self.results.lock().unwrap().push(issue);
    }

    pub(crate) fn close_session(&self, file: &str, session_id: &str) {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(entry) = sessions.get(file) {
            if entry.id == session_id {
                sessions.remove(file);
            }
        }
        drop(sessions);
        self.active_sessions.fetch_sub(1, Ordering::SeqCst);
        self.drained.notify_waiters();
    }
}

/// Per-file streaming validator: a bounded-concurrency pool of long-lived
/// LLM sessions, each running the multi-round challenge protocol
/// sequentially over the issues enqueued for its file.
pub struct StreamingValidator {
    inner: Arc<Inner>,
    max_concurrent_sessions: usize,
    semaphore: Arc<tokio::sync::Semaphore>,
}

impl StreamingValidator {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: ModelInfo,
        diff_files: Arc<HashMap<String, DiffFile>>,
        settings: &sentinel_config::ValidatorSettings,
        cancel: CancellationToken,
    ) -> Self {
        let max_concurrent_sessions = settings.max_concurrent_sessions.max(1);
        Self {
            inner: Arc::new(Inner {
                sessions: Mutex::new(HashMap::new()),
                results: Mutex::new(Vec::new()),
                min_confidence: settings.min_confidence,
                idle_timeout_secs: settings.idle_timeout_secs,
                provider,
                model,
                diff_files,
                cancel,
                agents_complete: AtomicBool::new(false),
                total: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                tokens_used: AtomicU64::new(0),
                active_sessions: AtomicU64::new(0),
                drained: Notify::new(),
            }),
            max_concurrent_sessions,
            semaphore: Arc::new(tokio::sync::Semaphore::new(max_concurrent_sessions)),
        }
    }

    /// Enqueues an issue for validation. Returns `Some` only when the
    /// confidence gate rejects it outright, without ever reaching a session.
    pub async fn enqueue(&self, issue: RawIssue) -> Option<ValidatedIssue> {
        self.inner.total.fetch_add(1, Ordering::SeqCst);

        if issue.severity != Severity::Critical && issue.confidence < self.inner.min_confidence {
            let validated = ValidatedIssue {
                issue: issue.clone(),
                status: IssueStatus::Rejected,
                evidence: crate::types::Evidence::default(),
                final_confidence: issue.confidence,
                rejection_reason: Some("low confidence".to_string()),
                revised_severity: None,
                revised_description: None,
            };
            self.inner.completed.fetch_add(1, Ordering::SeqCst);
            self.inner.results.lock().unwrap().push(validated.clone());
            return Some(validated);
        }

        self.route_to_session(issue).await;
        None
    }

    pub fn mark_agents_complete(&self) {
        self.inner.agents_complete.store(true, Ordering::SeqCst);
    }

    pub async fn flush(&self) -> FlushResult {
        loop {
            // Register as a waiter before checking the count: a session that
            // closes (and calls `notify_waiters`) between the check and the
            // await would otherwise be missed, and if it was the last
            // session this future would never wake up again.
            let notified = self.inner.drained.notified();
            if self.inner.active_sessions.load(Ordering::SeqCst) == 0 {
                break;
            }
            notified.await;
        }
        FlushResult {
            issues: self.inner.results.lock().unwrap().clone(),
            tokens_used: self.inner.tokens_used.load(Ordering::SeqCst),
        }
    }

    pub fn get_stats(&self) -> ValidatorStats {
        ValidatorStats {
            completed: self.inner.completed.load(Ordering::SeqCst),
            total: self.inner.total.load(Ordering::SeqCst),
            active_sessions: self.inner.active_sessions.load(Ordering::SeqCst),
        }
    }

    async fn route_to_session(&self, issue: RawIssue) {
        enum Action {
            Sent,
            NeedsNew,
        }

        let action = {
            let mut sessions = self.inner.sessions.lock().unwrap();
            if let Some(entry) = sessions.get(&issue.file) {
                let generation = entry.generation.fetch_add(1, Ordering::SeqCst) + 1;
                if entry.tx.send(SessionMsg::Issue(issue.clone())).is_ok() {
                    self.schedule_idle_timeout(entry.tx.clone(), entry.generation.clone(), generation);
                    Action::Sent
                } else {
                    sessions.remove(&issue.file);
                    Action::NeedsNew
                }
            } else {
                Action::NeedsNew
            }
        };

        if matches!(action, Action::NeedsNew) {
            self.spawn_fresh_session(issue).await;
        }
    }

    async fn spawn_fresh_session(&self, issue: RawIssue) {
        let (tx, rx) = mpsc::unbounded_channel();
        let generation = Arc::new(AtomicU64::new(0));
        let session_id = Uuid::new_v4().to_string();

        tx.send(SessionMsg::Issue(issue.clone())).ok();
        self.schedule_idle_timeout(tx.clone(), generation.clone(), 0);

        {
            let mut sessions = self.inner.sessions.lock().unwrap();
            sessions.insert(
                issue.file.clone(),
                SessionEntry {
                    id: session_id.clone(),
                    tx,
                    generation,
                },
            );
        }
        self.inner.active_sessions.fetch_add(1, Ordering::SeqCst);

        let diff_file = self.inner.diff_files.get(&issue.file).cloned();
        let params = SessionParams {
            file: issue.file.clone(),
            session_id,
            provider: self.inner.provider.clone(),
            model: self.inner.model.clone(),
            diff_file,
            cancel: self.inner.cancel.clone(),
        };
        let semaphore = self.semaphore.clone();
        let inner = self.inner.clone();

        tokio::spawn(async move {
            // Acquire a permit for the session's whole lifetime so at most
            // `maxConcurrentSessions` sessions are ever mid-conversation.
            let _permit = semaphore.acquire_owned().await.ok();
            run_session(params, rx, inner).await;
        });
    }

    fn schedule_idle_timeout(
        &self,
        tx: mpsc::UnboundedSender<SessionMsg>,
        generation: Arc<AtomicU64>,
        expected: u64,
    ) {
        let idle_secs = self.inner.idle_timeout_secs.max(1);
        let inner = self.inner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(idle_secs)).await;
            if generation.load(Ordering::SeqCst) == expected && inner.agents_complete.load(Ordering::SeqCst)
            {
                let _ = tx.send(SessionMsg::Close);
            }
        });
    }
}
