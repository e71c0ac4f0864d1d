//! Process-wide job state: the single source of truth for "what is the
//! automation doing right now".
//!
//! One `JobStore` lives in `AppState`. The active session task is the sole
//! writer; request handlers only ever read snapshot copies. Every mutator
//! takes the run id handed out by [`JobStore::begin`] and silently ignores
//! calls from a run that is no longer current, so a task that kept going
//! after an operator reset can never clobber a newer run's state.

use std::sync::Mutex;

use thiserror::Error;
use tokio::sync::{oneshot, watch};
use uuid::Uuid;

use super::types::{GroupRecord, JobStatus, SessionGoal};

#[derive(Debug, Error)]
pub enum JobStateError {
    #[error("a session is already running")]
    AlreadyRunning,

    #[error("no session is waiting for two-factor continuation")]
    NoPendingSession,

    #[error("continuation signal could not be delivered — the session is gone")]
    SignalDelivery,
}

/// Opaque reference to the in-flight session. Present iff a session exists;
/// its presence is what `isRunning` reports.
struct ControlHandle {
    /// Consumed by the first successful `/continue`.
    resume_tx: Option<oneshot::Sender<()>>,
    /// Raised by `reset` (and server shutdown) so the session task tears
    /// itself down at its next checkpoint.
    abort_tx: watch::Sender<bool>,
}

/// Channels handed to the session task when a run begins.
pub struct RunSignals {
    pub run_id: Uuid,
    pub resume_rx: oneshot::Receiver<()>,
    pub abort_rx: watch::Receiver<bool>,
}

/// Read-only copy of the store. The underlying state keeps mutating between
/// polls; treat this as a point-in-time value.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    pub status: JobStatus,
    pub output: String,
    pub is_running: bool,
    pub groups: Vec<GroupRecord>,
}

#[derive(Default)]
struct JobState {
    status: Option<JobStatus>,
    output: String,
    control: Option<ControlHandle>,
    run_id: Option<Uuid>,
    groups: Vec<GroupRecord>,
}

impl JobState {
    // Lazily initialized on first access: status defaults to idle.
    fn status(&self) -> JobStatus {
        self.status.unwrap_or(JobStatus::Idle)
    }
}

/// Injectable singleton store. Interior mutability behind a `std::sync`
/// mutex; every critical section is a handful of field writes, never an
/// await, so holding it across handlers is safe.
#[derive(Default)]
pub struct JobStore {
    inner: Mutex<JobState>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let st = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        JobSnapshot {
            status: st.status(),
            output: st.output.clone(),
            is_running: st.control.is_some(),
            groups: st.groups.clone(),
        }
    }

    /// Claim the store for a new run.
    ///
    /// Rejects with [`JobStateError::AlreadyRunning`] while a session handle
    /// exists (running or suspended at 2FA); a second start is refused, not
    /// queued. Resets the output log and hands back the run's signal
    /// channels.
    pub fn begin(&self, goal: &SessionGoal) -> Result<RunSignals, JobStateError> {
        let mut st = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if st.control.is_some() || st.status() == JobStatus::Running {
            return Err(JobStateError::AlreadyRunning);
        }

        let (resume_tx, resume_rx) = oneshot::channel();
        let (abort_tx, abort_rx) = watch::channel(false);
        let run_id = Uuid::new_v4();

        st.status = Some(JobStatus::Running);
        st.output = format!("{goal} session starting…\n");
        st.run_id = Some(run_id);
        st.control = Some(ControlHandle {
            resume_tx: Some(resume_tx),
            abort_tx,
        });

        Ok(RunSignals {
            run_id,
            resume_rx,
            abort_rx,
        })
    }

    /// Deliver the operator's continuation signal to the suspended session.
    ///
    /// Valid only in `waiting-2fa` with a live handle; consuming the one-shot
    /// sender twice, or sending into a dead task, surfaces as
    /// [`JobStateError::SignalDelivery`].
    pub fn resume(&self) -> Result<(), JobStateError> {
        let mut st = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if st.status() != JobStatus::Waiting2fa {
            return Err(JobStateError::NoPendingSession);
        }
        let control = st.control.as_mut().ok_or(JobStateError::NoPendingSession)?;
        let tx = control
            .resume_tx
            .take()
            .ok_or(JobStateError::NoPendingSession)?;
        tx.send(()).map_err(|_| JobStateError::SignalDelivery)?;
        st.status = Some(JobStatus::Running);
        st.output.push_str("continue signal delivered\n");
        Ok(())
    }

    /// Operator reset: back to idle from any state, output cleared, handle
    /// dropped, harvested list forgotten. Raises the abort flag first so the
    /// in-flight task (if any) shuts down at its next checkpoint.
    pub fn reset(&self) {
        let mut st = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(control) = st.control.take() {
            let _ = control.abort_tx.send(true);
        }
        st.status = Some(JobStatus::Idle);
        st.output.clear();
        st.run_id = None;
        st.groups.clear();
    }

    /// Raise the abort flag without touching bookkeeping (server shutdown).
    pub fn abort_active(&self) {
        let st = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(control) = st.control.as_ref() {
            let _ = control.abort_tx.send(true);
        }
    }

    // ── Session-task mutators (run-id guarded) ──────────────────────────────

    pub fn append_output(&self, run_id: Uuid, line: &str) {
        let mut st = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if st.run_id != Some(run_id) {
            return;
        }
        st.output.push_str(line);
        st.output.push('\n');
    }

    /// Enter the 2FA suspension checkpoint.
    pub fn mark_waiting(&self, run_id: Uuid) {
        let mut st = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if st.run_id != Some(run_id) {
            return;
        }
        st.status = Some(JobStatus::Waiting2fa);
    }

    /// Leave the checkpoint without an operator signal (auto-continue path).
    pub fn mark_running(&self, run_id: Uuid) {
        let mut st = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if st.run_id != Some(run_id) {
            return;
        }
        st.status = Some(JobStatus::Running);
    }

    pub fn finish_ok(&self, run_id: Uuid, summary: &str, groups: Option<Vec<GroupRecord>>) {
        let mut st = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if st.run_id != Some(run_id) {
            return;
        }
        st.status = Some(JobStatus::Completed);
        st.output.push_str(summary);
        st.output.push('\n');
        if let Some(groups) = groups {
            st.groups = groups;
        }
        st.control = None;
    }

    pub fn finish_err(&self, run_id: Uuid, message: &str) {
        let mut st = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if st.run_id != Some(run_id) {
            return;
        }
        st.status = Some(JobStatus::Error);
        st.output.push_str("Error: ");
        st.output.push_str(message);
        st.output.push('\n');
        st.control = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn harvest() -> SessionGoal {
        SessionGoal::Harvest
    }

    #[test]
    fn test_snapshot_defaults_to_idle() {
        let store = JobStore::new();
        let snap = store.snapshot();
        assert_eq!(snap.status, JobStatus::Idle);
        assert_eq!(snap.output, "");
        assert!(!snap.is_running);
        assert!(snap.groups.is_empty());
    }

    #[test]
    fn test_begin_rejects_while_handle_exists() {
        let store = JobStore::new();
        let _signals = store.begin(&harvest()).unwrap();
        assert!(matches!(
            store.begin(&harvest()),
            Err(JobStateError::AlreadyRunning)
        ));

        // Suspended at 2FA is still "a session exists".
        let snap = store.snapshot();
        assert!(snap.is_running);
    }

    #[test]
    fn test_begin_allowed_from_terminal_states() {
        let store = JobStore::new();
        let signals = store.begin(&harvest()).unwrap();
        store.finish_err(signals.run_id, "boom");
        assert_eq!(store.snapshot().status, JobStatus::Error);
        assert!(store.begin(&harvest()).is_ok());
    }

    #[tokio::test]
    async fn test_resume_only_valid_while_waiting() {
        let store = JobStore::new();
        assert!(matches!(
            store.resume(),
            Err(JobStateError::NoPendingSession)
        ));

        let mut signals = store.begin(&harvest()).unwrap();
        // Still running, not suspended.
        assert!(matches!(
            store.resume(),
            Err(JobStateError::NoPendingSession)
        ));

        store.mark_waiting(signals.run_id);
        assert_eq!(store.snapshot().status, JobStatus::Waiting2fa);
        store.resume().unwrap();
        assert_eq!(store.snapshot().status, JobStatus::Running);
        signals.resume_rx.try_recv().unwrap();

        // The one-shot is spent; a second continue is out of sequence.
        store.mark_waiting(signals.run_id);
        assert!(matches!(
            store.resume(),
            Err(JobStateError::NoPendingSession)
        ));
    }

    #[test]
    fn test_resume_into_dead_task_is_delivery_failure() {
        let store = JobStore::new();
        let signals = store.begin(&harvest()).unwrap();
        store.mark_waiting(signals.run_id);
        drop(signals.resume_rx);
        assert!(matches!(store.resume(), Err(JobStateError::SignalDelivery)));
    }

    #[test]
    fn test_reset_from_any_state_yields_idle_empty() {
        let store = JobStore::new();
        let signals = store.begin(&harvest()).unwrap();
        store.mark_waiting(signals.run_id);
        store.reset();

        let snap = store.snapshot();
        assert_eq!(snap.status, JobStatus::Idle);
        assert_eq!(snap.output, "");
        assert!(!snap.is_running);

        // The abort flag must have been raised toward the old task.
        assert!(*signals.abort_rx.borrow());
    }

    #[test]
    fn test_stale_run_updates_are_ignored_after_reset() {
        let store = JobStore::new();
        let old = store.begin(&harvest()).unwrap();
        store.reset();
        let new = store.begin(&harvest()).unwrap();

        store.finish_err(old.run_id, "stale failure");
        assert_eq!(store.snapshot().status, JobStatus::Running);

        store.append_output(old.run_id, "stale line");
        assert!(!store.snapshot().output.contains("stale line"));

        store.finish_ok(new.run_id, "done", None);
        assert_eq!(store.snapshot().status, JobStatus::Completed);
    }

    #[test]
    fn test_finish_ok_stores_harvest_and_clears_handle() {
        let store = JobStore::new();
        let signals = store.begin(&harvest()).unwrap();
        let groups = vec![GroupRecord {
            id: "g1".into(),
            name: "G1".into(),
            url: "https://example.com/groups/g1".into(),
            member_count: None,
        }];
        store.finish_ok(signals.run_id, "harvested 1 group", Some(groups.clone()));

        let snap = store.snapshot();
        assert_eq!(snap.status, JobStatus::Completed);
        assert!(!snap.is_running);
        assert_eq!(snap.groups, groups);
        assert!(snap.output.contains("harvested 1 group"));
    }
}
