use super::session::{JobStatus, Session, SessionMode, SessionStatus};

/// Session-level status derived from the owned job handles.
///
/// Truth table:
/// - Pending while no job has started
/// - Running while at least one job is non-terminal
/// - Completed when every configured step has a terminal job and none failed
/// - Failed when all existing jobs are terminal with at least one failure;
///   in sequential mode a single failure fails the session immediately,
///   without waiting for steps that will never be scheduled
pub fn aggregate_status(session: &Session) -> SessionStatus {
    let jobs = &session.jobs;
    if jobs.is_empty() {
        return SessionStatus::Pending;
    }

    let any_failed = jobs.iter().any(|j| j.status == JobStatus::Failed);
    let all_terminal = jobs.iter().all(|j| j.status.is_terminal());

    if any_failed && (all_terminal || session.mode == SessionMode::Sequential) {
        return SessionStatus::Failed;
    }
    if all_terminal && jobs.len() == session.total_steps {
        return SessionStatus::Completed;
    }
    if jobs.iter().all(|j| j.status == JobStatus::Pending) {
        return SessionStatus::Pending;
    }
    SessionStatus::Running
}

/// Recompute `completed_steps` and `status` after a job transition.
///
/// `completed_steps` never decreases, and a session already in a terminal
/// state stays there: a late poll result must not resurrect a failed or
/// deleted session.
pub fn apply_progress(session: &mut Session) {
    let terminal = session
        .jobs
        .iter()
        .filter(|j| j.status.is_terminal())
        .count();
    session.completed_steps = session.completed_steps.max(terminal);

    if session.status.is_terminal() {
        return;
    }
    session.status = aggregate_status(session);
}
