//! The quiz session engine.
//!
//! A session is created `Active` with a countdown. It leaves `Active` exactly
//! once: by an answer, by expiry (countdown, client request or a late
//! answer) or by being abandoned. Answer and expiry both end in a single
//! conditional submission insert; whichever lands first wins and the other
//! caller receives [`QuizError::AlreadyTerminal`].

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use super::countdown::CountdownRegistry;
use super::feedback_service::FeedbackService;
use super::problem_service::ProblemGenerator;
use super::scoring;
use super::session_store::SessionStore;
use super::tally_service::TallyService;
use crate::error::QuizError;
use crate::metrics::{ANSWERS_SUBMITTED_TOTAL, SESSIONS_ACTIVE, SESSIONS_TOTAL};
use crate::models::answer::{ExpireSessionResponse, SubmitAnswerRequest, SubmitAnswerResponse};
use crate::models::lifecycle::{SessionEvent, SessionPhase};
use crate::models::solution::Solution;
use crate::models::tally::{RunningTally, TallyView};
use crate::models::{
    DifficultyTable, NewSubmission, ProblemSession, SessionStatus, SessionView,
    StartSessionRequest, StartSessionResponse, Submission,
};

pub struct SessionSettings {
    pub difficulty: DifficultyTable,
    pub tick_interval: Duration,
    pub late_grace: chrono::Duration,
}

struct Inner {
    store: Arc<dyn SessionStore>,
    problems: ProblemGenerator,
    feedback: FeedbackService,
    tally: TallyService,
    countdowns: CountdownRegistry,
    settings: SessionSettings,
}

#[derive(Clone)]
pub struct SessionService {
    inner: Arc<Inner>,
}

/// Outcome of a committed terminal transition.
struct Closed {
    submission: Submission,
    tally: Option<TallyView>,
}

impl SessionService {
    pub fn new(
        store: Arc<dyn SessionStore>,
        problems: ProblemGenerator,
        feedback: FeedbackService,
        tally: TallyService,
        settings: SessionSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                problems,
                feedback,
                tally,
                countdowns: CountdownRegistry::new(),
                settings,
            }),
        }
    }

    pub fn countdowns(&self) -> &CountdownRegistry {
        &self.inner.countdowns
    }

    pub fn tally(&self) -> &TallyService {
        &self.inner.tally
    }

    pub async fn start_session(
        &self,
        req: StartSessionRequest,
    ) -> Result<StartSessionResponse, QuizError> {
        for (field, value) in [("run_id", &req.run_id), ("user_id", &req.user_id)] {
            if matches!(value, Some(v) if v.trim().is_empty()) {
                return Err(QuizError::validation(format!("{} must not be empty", field)));
            }
        }

        let phase = advance(SessionPhase::Idle, SessionEvent::NewProblem, "new")?;

        if let Some(run_id) = &req.run_id {
            self.abandon_active_in_run(run_id).await?;
        }

        let problem = self
            .inner
            .problems
            .generate(req.operation, req.difficulty)
            .await;
        let time_limit_seconds = self
            .inner
            .settings
            .difficulty
            .time_limit_seconds(req.difficulty);

        let session = self
            .inner
            .store
            .create_session(problem, req.run_id, req.user_id, time_limit_seconds)
            .await
            .map_err(|e| {
                tracing::error!("Failed to persist new session: {}", e);
                QuizError::from(e)
            })?;
        let phase = advance(phase, SessionEvent::Generated, &session.id)?;

        self.arm_countdown(&session);

        SESSIONS_TOTAL.with_label_values(&["created"]).inc();
        SESSIONS_ACTIVE.inc();
        tracing::info!(
            "Session {} {}: {} {} problem from {}, {}s to answer",
            session.id,
            phase,
            session.problem.difficulty,
            session.problem.operation,
            session.problem.source.as_str(),
            time_limit_seconds
        );

        Ok(StartSessionResponse {
            session_id: session.id,
            problem_text: session.problem.text,
            hint: session.problem.hint,
            operation: session.problem.operation,
            difficulty: session.problem.difficulty,
            time_limit_seconds,
            expires_at: session.expires_at,
        })
    }

    pub async fn get_session(&self, session_id: &str) -> Result<ProblemSession, QuizError> {
        self.inner
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| QuizError::NotFound(session_id.to_string()))
    }

    pub async fn session_view(&self, session_id: &str) -> Result<SessionView, QuizError> {
        let session = self.get_session(session_id).await?;
        Ok(SessionView::from(&session))
    }

    pub async fn submit_answer(
        &self,
        session_id: &str,
        req: SubmitAnswerRequest,
    ) -> Result<SubmitAnswerResponse, QuizError> {
        let session = self.get_session(session_id).await?;
        let (user_answer, is_correct) =
            scoring::evaluate_input(session.problem.correct_answer, &req.answer)
                .map_err(QuizError::Validation)?;

        let phase = self.phase_of(&session).await?;
        let now = Utc::now();

        if now > session.expires_at + self.inner.settings.late_grace {
            tracing::info!(
                "Session {} answer arrived {}s after the deadline; closing as expired",
                session_id,
                (now - session.expires_at).num_seconds()
            );
            let closed = self.close_as_expired(&session).await?;
            return Ok(SubmitAnswerResponse {
                is_correct: false,
                feedback_text: closed.submission.feedback_text,
                score_delta: 0.0,
                expired: true,
                tally: closed.tally,
            });
        }

        let phase = advance(phase, SessionEvent::Answer, session_id)?;

        // The answer is in; a countdown firing from here on would only race
        // the insert below.
        self.inner.countdowns.cancel(session_id);

        let difficulty = session.problem.difficulty;
        let score_delta = scoring::score_delta(&self.inner.settings.difficulty, difficulty, is_correct);
        let time_limit = session.time_limit_seconds();
        let time_used_seconds = match req.time_used_seconds {
            0 => elapsed_seconds(&session).min(time_limit),
            reported => reported.min(time_limit),
        };

        let feedback_text = self
            .inner
            .feedback
            .feedback(
                &session.problem.text,
                session.problem.correct_answer,
                Some(user_answer),
                is_correct,
            )
            .await;

        let closed = self
            .finalize(
                &session,
                phase,
                NewSubmission {
                    session_id: session.id.clone(),
                    user_answer: Some(user_answer),
                    is_correct,
                    feedback_text,
                    difficulty,
                    time_used_seconds,
                    score_delta,
                },
            )
            .await?;

        ANSWERS_SUBMITTED_TOTAL
            .with_label_values(&[if is_correct { "true" } else { "false" }])
            .inc();

        Ok(SubmitAnswerResponse {
            is_correct,
            feedback_text: closed.submission.feedback_text,
            score_delta,
            expired: false,
            tally: closed.tally,
        })
    }

    /// Client-requested expiry. Allowed at any time while the session is
    /// active.
    pub async fn expire_session(&self, session_id: &str) -> Result<ExpireSessionResponse, QuizError> {
        let session = self.get_session(session_id).await?;
        let closed = self.close_as_expired(&session).await?;
        Ok(ExpireSessionResponse {
            feedback_text: closed.submission.feedback_text,
            is_correct: false,
            score_delta: 0.0,
        })
    }

    /// Cancels an active session without recording a submission.
    pub async fn abandon_session(&self, session_id: &str) -> Result<SessionView, QuizError> {
        let session = self.get_session(session_id).await?;
        let phase = self.phase_of(&session).await?;
        advance(phase, SessionEvent::Cancel, session_id)?;

        self.abandon(&session).await?;
        let mut session = session;
        session.status = SessionStatus::Abandoned;
        Ok(SessionView::from(&session))
    }

    /// Step-by-step solution. Served at any time; asking while the session
    /// is still open is logged because it discloses the answer early.
    pub async fn get_solution(&self, session_id: &str) -> Result<Solution, QuizError> {
        let session = self.get_session(session_id).await?;
        if !self.phase_of(&session).await?.is_terminal() {
            tracing::warn!(
                "Solution requested for session {} before it was closed",
                session_id
            );
        }

        Ok(self
            .inner
            .feedback
            .solution(
                &session.id,
                &session.problem.text,
                session.problem.correct_answer,
                session.problem.difficulty,
            )
            .await)
    }

    /// Effective phase of a stored session. An `Active` row that already has
    /// a submission is past its commit point and counts as `Scored`.
    async fn phase_of(&self, session: &ProblemSession) -> Result<SessionPhase, QuizError> {
        let phase = SessionPhase::from(session.status);
        if phase == SessionPhase::Active
            && self.inner.store.get_submission(&session.id).await?.is_some()
        {
            return Ok(SessionPhase::Scored);
        }
        Ok(phase)
    }

    async fn close_as_expired(&self, session: &ProblemSession) -> Result<Closed, QuizError> {
        let phase = self.phase_of(session).await?;
        let phase = advance(phase, SessionEvent::Timeout, &session.id)?;
        self.inner.countdowns.cancel(&session.id);

        let feedback_text = self
            .inner
            .feedback
            .feedback(
                &session.problem.text,
                session.problem.correct_answer,
                None,
                false,
            )
            .await;

        self.finalize(
            session,
            phase,
            NewSubmission {
                session_id: session.id.clone(),
                user_answer: None,
                is_correct: false,
                feedback_text,
                difficulty: session.problem.difficulty,
                time_used_seconds: session.time_limit_seconds(),
                score_delta: 0.0,
            },
        )
        .await
    }

    /// Commits a terminal transition. The submission insert is the commit
    /// point; everything after it is bookkeeping that may be retried or
    /// lost without changing the outcome.
    async fn finalize(
        &self,
        session: &ProblemSession,
        phase: SessionPhase,
        new: NewSubmission,
    ) -> Result<Closed, QuizError> {
        let outcome = if new.user_answer.is_some() {
            "submitted"
        } else {
            "expired"
        };

        let submission = match self.inner.store.create_submission(new).await {
            Ok(submission) => submission,
            Err(e) => {
                let err = QuizError::from(e);
                match &err {
                    QuizError::AlreadyTerminal(_) => tracing::info!(
                        "Session {} already closed; {} discarded",
                        session.id,
                        outcome
                    ),
                    _ => {
                        tracing::error!("Failed to record {} for session {}: {}", outcome, session.id, err);
                        // Nothing was committed, so the session is still open.
                        if Utc::now() < session.expires_at {
                            self.arm_countdown(session);
                        }
                    }
                }
                return Err(err);
            }
        };
        let phase = advance(phase, SessionEvent::Evaluated, &session.id)?;

        self.inner.countdowns.cancel(&session.id);
        self.archive(&session.id).await;
        let phase = advance(phase, SessionEvent::Persisted, &session.id)?;

        SESSIONS_TOTAL.with_label_values(&[outcome]).inc();
        SESSIONS_ACTIVE.dec();

        let tally = match &session.run_id {
            Some(run_id) => match self
                .inner
                .tally
                .record(
                    run_id,
                    submission.difficulty,
                    submission.score_delta,
                    submission.is_correct,
                )
                .await
            {
                Ok(tally) => Some(TallyView::new(run_id, &tally)),
                Err(e) => {
                    tracing::warn!("Failed to update tally for run {}: {}", run_id, e);
                    None
                }
            },
            None => None,
        };

        tracing::info!(
            "Session {} {} ({}): correct={}, score_delta={}, time_used={}s",
            session.id,
            phase,
            outcome,
            submission.is_correct,
            submission.score_delta,
            submission.time_used_seconds
        );

        Ok(Closed { submission, tally })
    }

    /// Marks a scored session archived. The submission claim keeps abandon
    /// from flipping it first.
    async fn archive(&self, session_id: &str) {
        match self
            .inner
            .store
            .update_status(session_id, SessionStatus::Active, SessionStatus::Archived)
            .await
        {
            Ok(true) => {}
            Ok(false) => tracing::debug!("Session {} was no longer active to archive", session_id),
            // The submission row already marks the session closed.
            Err(e) => tracing::error!("Failed to archive session {}: {}", session_id, e),
        }
    }

    async fn abandon(&self, session: &ProblemSession) -> Result<(), QuizError> {
        // Loses to a submission that has already been claimed or recorded.
        if !self.inner.store.abandon_session(&session.id).await? {
            return Err(QuizError::AlreadyTerminal(session.id.clone()));
        }

        self.inner.countdowns.cancel(&session.id);
        SESSIONS_TOTAL.with_label_values(&["abandoned"]).inc();
        SESSIONS_ACTIVE.dec();
        tracing::info!("Session {} {}", session.id, SessionPhase::Abandoned);
        Ok(())
    }

    async fn abandon_active_in_run(&self, run_id: &str) -> Result<(), QuizError> {
        let active = self.inner.store.active_sessions_in_run(run_id).await?;
        for session in active {
            match self.abandon(&session).await {
                Ok(()) => tracing::info!(
                    "Abandoned session {} in run {} for a new problem",
                    session.id,
                    run_id
                ),
                Err(QuizError::AlreadyTerminal(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn arm_countdown(&self, session: &ProblemSession) {
        self.arm_expiry(&session.id, session.expires_at, 0);
    }

    fn arm_expiry(&self, session_id: &str, at: DateTime<Utc>, attempt: u32) {
        let service = self.clone();
        let id = session_id.to_string();
        self.inner.countdowns.start(
            session_id,
            at,
            self.inner.settings.tick_interval,
            move || async move { service.expire_from_countdown(&id, attempt).await },
        );
    }

    /// Closes a session whose deadline passed. A storage failure re-arms
    /// the countdown with backoff until the expiry lands or another caller
    /// closes the session.
    async fn expire_from_countdown(&self, session_id: &str, attempt: u32) {
        let result = match self.get_session(session_id).await {
            Ok(session) if session.status != SessionStatus::Active => return,
            Ok(session) => self.close_as_expired(&session).await.map(|_| ()),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {}
            Err(QuizError::AlreadyTerminal(_)) => {
                tracing::debug!("Countdown lost the race for session {}", session_id)
            }
            Err(QuizError::Persistence(e)) => {
                let delay = expiry_retry_delay(self.inner.settings.tick_interval, attempt);
                tracing::warn!(
                    "Countdown failed to expire session {} (attempt {}): {:#}; retrying in {:?}",
                    session_id,
                    attempt + 1,
                    e,
                    delay
                );
                let at = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::seconds(30));
                self.arm_expiry(session_id, at, attempt + 1);
            }
            Err(e) => tracing::error!("Countdown failed to expire session {}: {}", session_id, e),
        }
    }

    pub async fn get_tally(&self, run_id: &str) -> Result<TallyView, QuizError> {
        let tally: RunningTally = self.inner.tally.get(run_id).await?;
        Ok(TallyView::new(run_id, &tally))
    }
}

fn advance(phase: SessionPhase, event: SessionEvent, session_id: &str) -> Result<SessionPhase, QuizError> {
    phase
        .next(event)
        .ok_or_else(|| QuizError::AlreadyTerminal(session_id.to_string()))
}

const EXPIRY_RETRY_CEILING: Duration = Duration::from_secs(30);

/// One tick, doubling per failed attempt, capped at thirty seconds.
fn expiry_retry_delay(tick: Duration, attempt: u32) -> Duration {
    tick.saturating_mul(1u32 << attempt.min(16))
        .min(EXPIRY_RETRY_CEILING)
}

fn elapsed_seconds(session: &ProblemSession) -> u32 {
    (Utc::now() - session.created_at).num_seconds().max(0) as u32
}
