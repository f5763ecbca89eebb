//! Round-scoped verification tasks: generate a proof, submit it on-chain,
//! and track each task through its lifecycle.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::watch;

use crate::circuit::CircuitKind;
use crate::error::VerificationError;
use crate::inputs::ProverInputs;
use crate::prover::ProofGenerator;
use crate::verifier::{ProofSubmitter, VerificationOutcome};

pub type RoundId = u64;
pub type TaskId = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Generating,
    Verifying,
    Success,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failed)
    }

    /// Pending -> Generating -> Verifying -> Success, with Failed reachable
    /// from either working state.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Generating)
                | (Generating, Verifying)
                | (Verifying, Success)
                | (Generating, Failed)
                | (Verifying, Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Generating => "generating",
            TaskStatus::Verifying => "verifying",
            TaskStatus::Success => "success",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    pub status: TaskStatus,
    pub at: DateTime<Utc>,
}

struct TaskState {
    status: TaskStatus,
    history: Vec<StatusChange>,
    outcome: Option<VerificationOutcome>,
    error: Option<Arc<VerificationError>>,
    completed_at: Option<DateTime<Utc>>,
}

/// One proof-and-verify job within a round.
///
/// Only the task's own spawned execution writes its status; everyone else
/// reads snapshots.
pub struct VerificationTask {
    id: TaskId,
    round_id: RoundId,
    kind: CircuitKind,
    queued_at: DateTime<Utc>,
    state: Mutex<TaskState>,
    settled: watch::Sender<bool>,
}

/// Point-in-time view of a task, as reported in round summaries.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub round_id: RoundId,
    pub circuit: CircuitKind,
    pub status: TaskStatus,
    pub history: Vec<StatusChange>,
    pub outcome: Option<VerificationOutcome>,
    pub error: Option<String>,
    pub queued_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl VerificationTask {
    fn new(id: TaskId, round_id: RoundId, kind: CircuitKind) -> Self {
        let queued_at = Utc::now();
        let (settled, _) = watch::channel(false);
        Self {
            id,
            round_id,
            kind,
            queued_at,
            state: Mutex::new(TaskState {
                status: TaskStatus::Pending,
                history: vec![StatusChange {
                    status: TaskStatus::Pending,
                    at: queued_at,
                }],
                outcome: None,
                error: None,
                completed_at: None,
            }),
            settled,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn round_id(&self) -> RoundId {
        self.round_id
    }

    pub fn kind(&self) -> CircuitKind {
        self.kind
    }

    pub fn status(&self) -> TaskStatus {
        self.lock_state().status
    }

    pub fn outcome(&self) -> Option<VerificationOutcome> {
        self.lock_state().outcome.clone()
    }

    pub fn error(&self) -> Option<Arc<VerificationError>> {
        self.lock_state().error.clone()
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let state = self.lock_state();
        TaskSnapshot {
            id: self.id,
            round_id: self.round_id,
            circuit: self.kind,
            status: state.status,
            history: state.history.clone(),
            outcome: state.outcome.clone(),
            error: state.error.as_ref().map(|e| e.to_string()),
            queued_at: self.queued_at,
            completed_at: state.completed_at,
        }
    }

    /// Resolves once the task has reached a terminal state.
    pub async fn settled(&self) {
        let mut rx = self.settled.subscribe();
        // The sender lives as long as `self`, so this cannot fail while we hold it.
        let _ = rx.wait_for(|done| *done).await;
    }

    fn lock_state(&self) -> MutexGuard<'_, TaskState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply a transition if the state machine allows it; returns whether it did.
    fn transition(
        &self,
        next: TaskStatus,
        result: Option<Result<VerificationOutcome, VerificationError>>,
    ) -> bool {
        let mut state = self.lock_state();
        let from = state.status;
        if !from.can_transition_to(next) {
            tracing::warn!(
                "Task {} round={} ignored transition {} -> {}",
                self.id,
                self.round_id,
                from,
                next
            );
            return false;
        }

        let now = Utc::now();
        state.status = next;
        state.history.push(StatusChange { status: next, at: now });
        match result {
            Some(Ok(outcome)) => state.outcome = Some(outcome),
            Some(Err(error)) => state.error = Some(Arc::new(error)),
            None => {}
        }
        if next.is_terminal() {
            state.completed_at = Some(now);
        }
        drop(state);

        tracing::info!(
            "Task {} round={} circuit={}: {} -> {}",
            self.id,
            self.round_id,
            self.kind,
            from,
            next
        );
        if next.is_terminal() {
            self.settled.send_replace(true);
        }
        true
    }

    fn advance(&self, next: TaskStatus) -> bool {
        self.transition(next, None)
    }

    fn succeed(&self, outcome: VerificationOutcome) {
        self.transition(TaskStatus::Success, Some(Ok(outcome)));
    }

    fn fail(&self, error: VerificationError) {
        tracing::warn!("Task {} round={} failed: {}", self.id, self.round_id, error);
        self.transition(TaskStatus::Failed, Some(Err(error)));
    }
}

/// Aggregate view of a round's tasks.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundSummary {
    pub round_id: RoundId,
    pub total_tasks: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub pending_count: usize,
    pub signatures: Vec<String>,
    pub tasks: Vec<TaskSnapshot>,
    pub all_success: bool,
}

impl RoundSummary {
    fn from_tasks(round_id: RoundId, tasks: &[Arc<VerificationTask>]) -> Self {
        let tasks: Vec<TaskSnapshot> = tasks.iter().map(|t| t.snapshot()).collect();
        let count = |status: TaskStatus| tasks.iter().filter(|t| t.status == status).count();
        let success_count = count(TaskStatus::Success);
        let failed_count = count(TaskStatus::Failed);
        let signatures = tasks
            .iter()
            .filter_map(|t| t.outcome.as_ref().map(|o| o.signature.clone()))
            .collect();

        Self {
            round_id,
            total_tasks: tasks.len(),
            success_count,
            failed_count,
            pending_count: tasks.len() - success_count - failed_count,
            signatures,
            // Vacuously true for an empty round.
            all_success: success_count == tasks.len(),
            tasks,
        }
    }
}

/// Owns every round's tasks and runs them on the tokio runtime.
pub struct VerificationManager {
    generator: Arc<ProofGenerator>,
    submitter: Arc<dyn ProofSubmitter>,
    rounds: Mutex<HashMap<RoundId, Vec<Arc<VerificationTask>>>>,
    next_task_id: AtomicU64,
}

impl VerificationManager {
    pub fn new(generator: Arc<ProofGenerator>, submitter: Arc<dyn ProofSubmitter>) -> Self {
        Self {
            generator,
            submitter,
            rounds: Mutex::new(HashMap::new()),
            next_task_id: AtomicU64::new(1),
        }
    }

    /// Queue a verification task and start it immediately.
    ///
    /// Never fails: generation and submission errors end up on the task and in
    /// the round summary. Must be called from within a tokio runtime.
    pub fn queue_task(
        &self,
        round_id: RoundId,
        kind: CircuitKind,
        inputs: ProverInputs,
    ) -> Arc<VerificationTask> {
        let id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        let task = Arc::new(VerificationTask::new(id, round_id, kind));
        self.lock_rounds()
            .entry(round_id)
            .or_default()
            .push(task.clone());
        tracing::info!("Queued task {} round={} circuit={}", id, round_id, kind);

        let generator = self.generator.clone();
        let submitter = self.submitter.clone();
        let running = task.clone();
        tokio::spawn(async move {
            let work = execute(&running, &generator, submitter.as_ref(), &inputs);
            if let Err(panic) = AssertUnwindSafe(work).catch_unwind().await {
                let message = panic_message(panic.as_ref());
                tracing::error!("Task {} round={} panicked: {}", running.id, running.round_id, message);
                running.fail(VerificationError::Aborted(message));
            }
        });

        task
    }

    /// Wait for every task in the round to settle, then summarize.
    ///
    /// Never short-circuits on failure. A round with no tasks returns an empty,
    /// all-success summary right away.
    pub async fn round_verification(&self, round_id: RoundId) -> RoundSummary {
        let tasks = self.round_tasks(round_id);
        tracing::info!("Awaiting {} task(s) for round {}", tasks.len(), round_id);
        futures::future::join_all(tasks.iter().map(|t| t.settled())).await;

        let summary = RoundSummary::from_tasks(round_id, &tasks);
        tracing::info!(
            "Round {} settled: {}/{} verified, {} failed",
            round_id,
            summary.success_count,
            summary.total_tasks,
            summary.failed_count
        );
        summary
    }

    /// Live snapshot; unfinished tasks count as pending.
    pub fn get_summary(&self, round_id: RoundId) -> RoundSummary {
        RoundSummary::from_tasks(round_id, &self.round_tasks(round_id))
    }

    /// Drop the round's task list, returning how many tasks it held.
    ///
    /// Running tasks are not cancelled, but their results are no longer
    /// reachable through the manager.
    pub fn cleanup(&self, round_id: RoundId) -> usize {
        let removed = self.lock_rounds().remove(&round_id).map_or(0, |t| t.len());
        tracing::info!("Cleaned up round {} ({} task(s))", round_id, removed);
        removed
    }

    pub fn round_tasks(&self, round_id: RoundId) -> Vec<Arc<VerificationTask>> {
        self.lock_rounds()
            .get(&round_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn round_count(&self) -> usize {
        self.lock_rounds().len()
    }

    fn lock_rounds(&self) -> MutexGuard<'_, HashMap<RoundId, Vec<Arc<VerificationTask>>>> {
        self.rounds.lock().unwrap_or_else(|e| e.into_inner())
    }
}

async fn execute(
    task: &VerificationTask,
    generator: &ProofGenerator,
    submitter: &dyn ProofSubmitter,
    inputs: &ProverInputs,
) {
    task.advance(TaskStatus::Generating);
    let payload = match generator.generate_proof(task.kind, inputs).await {
        Ok(payload) => payload,
        Err(e) => return task.fail(e.into()),
    };

    task.advance(TaskStatus::Verifying);
    match submitter.submit(&payload).await {
        Ok(outcome) => task.succeed(outcome),
        Err(e) => task.fail(e.into()),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
