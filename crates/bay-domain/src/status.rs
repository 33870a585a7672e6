use chrono::{DateTime, Utc};

use crate::types::{SandboxStatus, SessionState};

/// Compute the caller-visible status of a sandbox.
///
/// Pure function: callers capture a single `now` at request entry and use it
/// for every status/expiry computation within that request, so two reads in
/// one response can never disagree.
pub fn sandbox_status(
    deleted_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    session: Option<(SessionState, Option<DateTime<Utc>>)>,
    now: DateTime<Utc>,
) -> SandboxStatus {
    if deleted_at.is_some() {
        return SandboxStatus::Deleted;
    }
    if let Some(exp) = expires_at {
        if now > exp {
            return SandboxStatus::Expired;
        }
    }
    match session {
        None => SandboxStatus::Idle,
        Some((state, ready_at)) => match state {
            SessionState::Stopped | SessionState::Stopping => SandboxStatus::Idle,
            SessionState::Pending | SessionState::Starting => SandboxStatus::Starting,
            // Running without a recorded ready-at means readiness probing is
            // still in flight after a restart; report starting, not ready.
            SessionState::Running => {
                if ready_at.is_some() {
                    SandboxStatus::Ready
                } else {
                    SandboxStatus::Starting
                }
            }
            SessionState::Degraded => SandboxStatus::Degraded,
            SessionState::Failed => SandboxStatus::Failed,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn deleted_wins_over_everything() {
        let t = now();
        let s = sandbox_status(
            Some(t),
            Some(t - Duration::hours(1)),
            Some((SessionState::Running, Some(t))),
            t,
        );
        assert_eq!(s, SandboxStatus::Deleted);
    }

    #[test]
    fn expired_wins_over_session_state() {
        let t = now();
        let s = sandbox_status(
            None,
            Some(t - Duration::seconds(1)),
            Some((SessionState::Running, Some(t))),
            t,
        );
        assert_eq!(s, SandboxStatus::Expired);
    }

    #[test]
    fn ttl_boundary_is_exclusive() {
        // now == expires_at is not yet expired.
        let t = now();
        assert_eq!(sandbox_status(None, Some(t), None, t), SandboxStatus::Idle);
    }

    #[test]
    fn no_session_is_idle() {
        let t = now();
        assert_eq!(sandbox_status(None, None, None, t), SandboxStatus::Idle);
    }

    #[test]
    fn session_states_map_through() {
        let t = now();
        let cases = [
            (SessionState::Pending, None, SandboxStatus::Starting),
            (SessionState::Starting, None, SandboxStatus::Starting),
            (SessionState::Running, Some(t), SandboxStatus::Ready),
            (SessionState::Running, None, SandboxStatus::Starting),
            (SessionState::Degraded, Some(t), SandboxStatus::Degraded),
            (SessionState::Stopping, None, SandboxStatus::Idle),
            (SessionState::Stopped, None, SandboxStatus::Idle),
            (SessionState::Failed, None, SandboxStatus::Failed),
        ];
        for (state, ready, want) in cases {
            assert_eq!(sandbox_status(None, None, Some((state, ready)), t), want);
        }
    }
}
