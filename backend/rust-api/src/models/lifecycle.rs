use serde::Serialize;
use std::fmt;

use super::SessionStatus;

/// Lifecycle of a single problem session.
///
/// `Idle -> Generating -> Active -> {Submitted | Expired} -> Scored -> Archived`,
/// with `Active -> Abandoned` when the client moves on without answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Generating,
    Active,
    Submitted,
    Expired,
    Scored,
    Archived,
    Abandoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    NewProblem,
    Generated,
    Answer,
    Timeout,
    Evaluated,
    Persisted,
    Cancel,
}

impl SessionPhase {
    /// Phase reached by applying `event`, or `None` if the event is not legal
    /// in the current phase.
    pub fn next(self, event: SessionEvent) -> Option<SessionPhase> {
        use SessionEvent as E;
        use SessionPhase as P;

        match (self, event) {
            (P::Idle, E::NewProblem) => Some(P::Generating),
            (P::Generating, E::Generated) => Some(P::Active),
            (P::Active, E::Answer) => Some(P::Submitted),
            (P::Active, E::Timeout) => Some(P::Expired),
            (P::Active, E::Cancel) => Some(P::Abandoned),
            (P::Submitted, E::Evaluated) | (P::Expired, E::Evaluated) => Some(P::Scored),
            (P::Scored, E::Persisted) => Some(P::Archived),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::Archived | SessionPhase::Abandoned)
    }
}

impl From<SessionStatus> for SessionPhase {
    fn from(status: SessionStatus) -> Self {
        match status {
            SessionStatus::Active => SessionPhase::Active,
            SessionStatus::Archived => SessionPhase::Archived,
            SessionStatus::Abandoned => SessionPhase::Abandoned,
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Generating => "generating",
            SessionPhase::Active => "active",
            SessionPhase::Submitted => "submitted",
            SessionPhase::Expired => "expired",
            SessionPhase::Scored => "scored",
            SessionPhase::Archived => "archived",
            SessionPhase::Abandoned => "abandoned",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_reaches_archived() {
        let phase = SessionPhase::Idle
            .next(SessionEvent::NewProblem)
            .and_then(|p| p.next(SessionEvent::Generated))
            .and_then(|p| p.next(SessionEvent::Answer))
            .and_then(|p| p.next(SessionEvent::Evaluated))
            .and_then(|p| p.next(SessionEvent::Persisted));
        assert_eq!(phase, Some(SessionPhase::Archived));
    }

    #[test]
    fn timeout_path_is_scored_like_a_submission() {
        let phase = SessionPhase::Active
            .next(SessionEvent::Timeout)
            .and_then(|p| p.next(SessionEvent::Evaluated));
        assert_eq!(phase, Some(SessionPhase::Scored));
    }

    #[test]
    fn terminal_phases_reject_further_events() {
        for phase in [SessionPhase::Archived, SessionPhase::Abandoned] {
            assert!(phase.is_terminal());
            assert_eq!(phase.next(SessionEvent::Answer), None);
            assert_eq!(phase.next(SessionEvent::Timeout), None);
            assert_eq!(phase.next(SessionEvent::Cancel), None);
        }
    }

    #[test]
    fn answer_is_only_legal_while_active() {
        assert_eq!(SessionPhase::Generating.next(SessionEvent::Answer), None);
        assert_eq!(SessionPhase::Submitted.next(SessionEvent::Answer), None);
        assert_eq!(
            SessionPhase::from(SessionStatus::Active).next(SessionEvent::Answer),
            Some(SessionPhase::Submitted)
        );
    }
}
