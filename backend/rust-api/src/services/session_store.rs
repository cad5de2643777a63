//! Persistence boundary for sessions, submissions, high scores and users.
//!
//! The unique constraint on `submissions.session_id` is the commit point of
//! every terminal transition: whichever insert lands first wins and any
//! other attempt sees [`StoreError::DuplicateSubmission`].

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::IndexOptions;
use mongodb::{Collection, Database, IndexModel};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::metrics::track_db_operation;
use crate::models::history::HighScoreEntry;
use crate::models::user::User;
use crate::models::{
    Difficulty, NewSubmission, Problem, ProblemSession, SessionStatus, Submission,
};
use crate::utils::retry::{retry_store, RetryConfig};
use crate::utils::time::bson_datetime_as_chrono;

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(
        &self,
        problem: Problem,
        run_id: Option<String>,
        user_id: Option<String>,
        time_limit_seconds: u32,
    ) -> Result<ProblemSession, StoreError>;

    async fn get_session(&self, session_id: &str) -> Result<Option<ProblemSession>, StoreError>;

    /// Compare-and-set on the session status. Returns `false` when the
    /// session was not in `from`.
    async fn update_status(
        &self,
        session_id: &str,
        from: SessionStatus,
        to: SessionStatus,
    ) -> Result<bool, StoreError>;

    async fn active_sessions_in_run(&self, run_id: &str)
        -> Result<Vec<ProblemSession>, StoreError>;

    /// Flips Active to Abandoned unless a submission has been recorded or
    /// is being recorded. Returns `false` when the session was not flipped.
    async fn abandon_session(&self, session_id: &str) -> Result<bool, StoreError>;

    /// Fails with `DuplicateSubmission` if the session already has one and
    /// with `NotActive` once the session has left Active.
    async fn create_submission(&self, new: NewSubmission) -> Result<Submission, StoreError>;

    async fn get_submission(&self, session_id: &str) -> Result<Option<Submission>, StoreError>;

    /// Sessions that have a submission, newest submission first.
    async fn list_recent_sessions_with_submissions(
        &self,
        limit: usize,
    ) -> Result<Vec<(ProblemSession, Submission)>, StoreError>;

    async fn save_high_score(&self, entry: &HighScoreEntry) -> Result<(), StoreError>;

    /// Highest score first; ties go to the earlier entry.
    async fn top_scores(&self, limit: usize) -> Result<Vec<HighScoreEntry>, StoreError>;

    /// Exact, case-sensitive lookup by name.
    async fn find_or_create_user(&self, name: &str) -> Result<User, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    fn backend(&self) -> &'static str;
}

fn new_session(
    problem: Problem,
    run_id: Option<String>,
    user_id: Option<String>,
    time_limit_seconds: u32,
) -> ProblemSession {
    let created_at = Utc::now();
    ProblemSession {
        id: Uuid::new_v4().to_string(),
        problem,
        status: SessionStatus::Active,
        run_id,
        user_id,
        created_at,
        expires_at: created_at + Duration::seconds(i64::from(time_limit_seconds)),
    }
}

fn new_submission(new: NewSubmission) -> Submission {
    Submission {
        id: Uuid::new_v4().to_string(),
        session_id: new.session_id,
        user_answer: new.user_answer,
        is_correct: new.is_correct,
        feedback_text: new.feedback_text,
        difficulty: new.difficulty,
        time_used_seconds: new.time_used_seconds,
        score_delta: new.score_delta,
        created_at: Utc::now(),
    }
}

// ---------------------------------------------------------------------------
// MongoDB
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionDocument {
    #[serde(rename = "_id")]
    id: String,
    problem: Problem,
    status: SessionStatus,
    run_id: Option<String>,
    user_id: Option<String>,
    #[serde(with = "bson_datetime_as_chrono")]
    created_at: DateTime<Utc>,
    #[serde(with = "bson_datetime_as_chrono")]
    expires_at: DateTime<Utc>,
    /// Set when a submission claims the session, before it is inserted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    submission_id: Option<String>,
}

impl From<&ProblemSession> for SessionDocument {
    fn from(s: &ProblemSession) -> Self {
        Self {
            id: s.id.clone(),
            problem: s.problem.clone(),
            status: s.status,
            run_id: s.run_id.clone(),
            user_id: s.user_id.clone(),
            created_at: s.created_at,
            expires_at: s.expires_at,
            submission_id: None,
        }
    }
}

impl From<SessionDocument> for ProblemSession {
    fn from(d: SessionDocument) -> Self {
        Self {
            id: d.id,
            problem: d.problem,
            status: d.status,
            run_id: d.run_id,
            user_id: d.user_id,
            created_at: d.created_at,
            expires_at: d.expires_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SubmissionDocument {
    #[serde(rename = "_id")]
    id: String,
    session_id: String,
    user_answer: Option<f64>,
    is_correct: bool,
    feedback_text: String,
    difficulty: Difficulty,
    time_used_seconds: u32,
    score_delta: f64,
    #[serde(with = "bson_datetime_as_chrono")]
    created_at: DateTime<Utc>,
}

impl From<&Submission> for SubmissionDocument {
    fn from(s: &Submission) -> Self {
        Self {
            id: s.id.clone(),
            session_id: s.session_id.clone(),
            user_answer: s.user_answer,
            is_correct: s.is_correct,
            feedback_text: s.feedback_text.clone(),
            difficulty: s.difficulty,
            time_used_seconds: s.time_used_seconds,
            score_delta: s.score_delta,
            created_at: s.created_at,
        }
    }
}

impl From<SubmissionDocument> for Submission {
    fn from(d: SubmissionDocument) -> Self {
        Self {
            id: d.id,
            session_id: d.session_id,
            user_answer: d.user_answer,
            is_correct: d.is_correct,
            feedback_text: d.feedback_text,
            difficulty: d.difficulty,
            time_used_seconds: d.time_used_seconds,
            score_delta: d.score_delta,
            created_at: d.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HighScoreDocument {
    #[serde(rename = "_id")]
    id: String,
    run_id: String,
    user_id: Option<String>,
    score: f64,
    correct_count: u32,
    attempted_count: u32,
    difficulty: Difficulty,
    #[serde(with = "bson_datetime_as_chrono")]
    created_at: DateTime<Utc>,
}

impl From<&HighScoreEntry> for HighScoreDocument {
    fn from(e: &HighScoreEntry) -> Self {
        Self {
            id: e.id.clone(),
            run_id: e.run_id.clone(),
            user_id: e.user_id.clone(),
            score: e.score,
            correct_count: e.correct_count,
            attempted_count: e.attempted_count,
            difficulty: e.difficulty,
            created_at: e.created_at,
        }
    }
}

impl From<HighScoreDocument> for HighScoreEntry {
    fn from(d: HighScoreDocument) -> Self {
        Self {
            id: d.id,
            run_id: d.run_id,
            user_id: d.user_id,
            score: d.score,
            correct_count: d.correct_count,
            attempted_count: d.attempted_count,
            difficulty: d.difficulty,
            created_at: d.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserDocument {
    #[serde(rename = "_id")]
    id: String,
    name: String,
    #[serde(with = "bson_datetime_as_chrono")]
    created_at: DateTime<Utc>,
}

impl From<UserDocument> for User {
    fn from(d: UserDocument) -> Self {
        Self {
            id: d.id,
            name: d.name,
            created_at: d.created_at,
        }
    }
}

fn is_duplicate_key(err: &anyhow::Error) -> bool {
    match err.downcast_ref::<mongodb::error::Error>() {
        Some(e) => matches!(
            *e.kind,
            ErrorKind::Write(WriteFailure::WriteError(ref we)) if we.code == 11000
        ),
        None => false,
    }
}

pub struct MongoSessionStore {
    db: Database,
    retry: RetryConfig,
}

impl MongoSessionStore {
    /// Connects and makes sure the indexes backing the store's constraints
    /// exist.
    pub async fn connect(uri: &str, database: &str) -> anyhow::Result<Self> {
        let client = mongodb::Client::with_uri_str(uri)
            .await
            .context("Failed to connect to MongoDB")?;
        let store = Self {
            db: client.database(database),
            retry: RetryConfig::idempotent_write(),
        };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> anyhow::Result<()> {
        let unique = || IndexOptions::builder().unique(true).build();

        self.submissions()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "session_id": 1 })
                    .options(unique())
                    .build(),
            )
            .await
            .context("Failed to create submissions.session_id index")?;
        self.submissions()
            .create_index(IndexModel::builder().keys(doc! { "created_at": -1 }).build())
            .await
            .context("Failed to create submissions.created_at index")?;
        self.users()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "name": 1 })
                    .options(unique())
                    .build(),
            )
            .await
            .context("Failed to create users.name index")?;
        self.sessions()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "run_id": 1, "status": 1 })
                    .build(),
            )
            .await
            .context("Failed to create sessions.run_id index")?;
        self.high_scores()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "score": -1, "created_at": 1 })
                    .build(),
            )
            .await
            .context("Failed to create high_scores.score index")?;

        tracing::info!("MongoDB indexes ensured");
        Ok(())
    }

    fn sessions(&self) -> Collection<SessionDocument> {
        self.db.collection("sessions")
    }

    fn submissions(&self) -> Collection<SubmissionDocument> {
        self.db.collection("submissions")
    }

    fn high_scores(&self) -> Collection<HighScoreDocument> {
        self.db.collection("high_scores")
    }

    fn users(&self) -> Collection<UserDocument> {
        self.db.collection("users")
    }

    /// Marks an active, unclaimed session as owned by `submission_id`.
    async fn claim_session(&self, session_id: &str, submission_id: &str) -> anyhow::Result<bool> {
        let result = track_db_operation("update", "sessions", async {
            self.sessions()
                .update_one(
                    doc! {
                        "_id": session_id,
                        "status": SessionStatus::Active.as_str(),
                        "submission_id": null,
                    },
                    doc! { "$set": { "submission_id": submission_id } },
                )
                .await
                .context("Failed to claim session for submission")
        })
        .await?;
        Ok(result.modified_count == 1)
    }

    async fn release_claim(&self, session_id: &str, submission_id: &str) {
        let released = track_db_operation("update", "sessions", async {
            self.sessions()
                .update_one(
                    doc! { "_id": session_id, "submission_id": submission_id },
                    doc! { "$unset": { "submission_id": "" } },
                )
                .await
                .context("Failed to release submission claim")
        })
        .await;
        if let Err(e) = released {
            tracing::warn!(session_id = %session_id, "Submission claim left in place: {:#}", e);
        }
    }

    /// Explains why a claim did not land.
    async fn claim_conflict(&self, session_id: &str) -> StoreError {
        let claimed = self
            .sessions()
            .find_one(doc! { "_id": session_id })
            .await
            .ok()
            .flatten()
            .is_some_and(|d| d.status == SessionStatus::Active && d.submission_id.is_some());
        let submitted = matches!(
            self.submissions().find_one(doc! { "session_id": session_id }).await,
            Ok(Some(_))
        );
        if claimed || submitted {
            StoreError::DuplicateSubmission(session_id.to_string())
        } else {
            StoreError::NotActive(session_id.to_string())
        }
    }
}

#[async_trait]
impl SessionStore for MongoSessionStore {
    async fn create_session(
        &self,
        problem: Problem,
        run_id: Option<String>,
        user_id: Option<String>,
        time_limit_seconds: u32,
    ) -> Result<ProblemSession, StoreError> {
        let session = new_session(problem, run_id, user_id, time_limit_seconds);
        let document = SessionDocument::from(&session);

        // The id is fixed before the first attempt, so a replay after an
        // ambiguous failure hits the _id constraint instead of duplicating.
        retry_store(self.retry.clone(), || async {
            track_db_operation("insert", "sessions", async {
                self.sessions()
                    .insert_one(&document)
                    .await
                    .map(|_| ())
                    .map_err(anyhow::Error::from)
            })
            .await
            .or_else(|e| {
                if is_duplicate_key(&e) {
                    Ok(())
                } else {
                    Err(StoreError::Backend(e))
                }
            })
        })
        .await?;

        Ok(session)
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<ProblemSession>, StoreError> {
        let document = retry_store(self.retry.clone(), || async {
            track_db_operation("find_one", "sessions", async {
                self.sessions()
                    .find_one(doc! { "_id": session_id })
                    .await
                    .context("Failed to load session")
            })
            .await
            .map_err(StoreError::Backend)
        })
        .await?;
        Ok(document.map(ProblemSession::from))
    }

    async fn update_status(
        &self,
        session_id: &str,
        from: SessionStatus,
        to: SessionStatus,
    ) -> Result<bool, StoreError> {
        let result = track_db_operation("update", "sessions", async {
            self.sessions()
                .update_one(
                    doc! { "_id": session_id, "status": from.as_str() },
                    doc! { "$set": { "status": to.as_str() } },
                )
                .await
                .context("Failed to update session status")
        })
        .await?;
        Ok(result.modified_count == 1)
    }

    async fn active_sessions_in_run(
        &self,
        run_id: &str,
    ) -> Result<Vec<ProblemSession>, StoreError> {
        let sessions = track_db_operation("find", "sessions", async {
            let mut cursor = self
                .sessions()
                .find(doc! { "run_id": run_id, "status": SessionStatus::Active.as_str() })
                .await
                .context("Failed to query active sessions")?;
            let mut sessions = Vec::new();
            while let Some(document) = cursor
                .try_next()
                .await
                .context("Failed to iterate active sessions")?
            {
                sessions.push(ProblemSession::from(document));
            }
            Ok(sessions)
        })
        .await?;
        Ok(sessions)
    }

    async fn abandon_session(&self, session_id: &str) -> Result<bool, StoreError> {
        let result = track_db_operation("update", "sessions", async {
            self.sessions()
                .update_one(
                    doc! {
                        "_id": session_id,
                        "status": SessionStatus::Active.as_str(),
                        "submission_id": null,
                    },
                    doc! { "$set": { "status": SessionStatus::Abandoned.as_str() } },
                )
                .await
                .context("Failed to abandon session")
        })
        .await?;
        Ok(result.modified_count == 1)
    }

    async fn create_submission(&self, new: NewSubmission) -> Result<Submission, StoreError> {
        let submission = new_submission(new);
        let document = SubmissionDocument::from(&submission);
        let session_id = submission.session_id.as_str();

        // The claim is the compare-and-set against Active; an abandon that
        // runs after it no longer matches.
        if !self.claim_session(session_id, &submission.id).await? {
            return Err(self.claim_conflict(session_id).await);
        }

        let inserted = retry_store(self.retry.clone(), || async {
            track_db_operation("insert", "submissions", async {
                self.submissions()
                    .insert_one(&document)
                    .await
                    .map(|_| ())
                    .map_err(anyhow::Error::from)
            })
            .await
            .map_err(|e| {
                if is_duplicate_key(&e) {
                    StoreError::DuplicateSubmission(session_id.to_string())
                } else {
                    StoreError::Backend(e)
                }
            })
        })
        .await;

        match inserted {
            Ok(()) => Ok(submission),
            Err(StoreError::DuplicateSubmission(id)) => {
                // A replay of our own insert after an ambiguous failure.
                match self.get_submission(session_id).await? {
                    Some(existing) if existing.id == submission.id => Ok(submission),
                    _ => Err(StoreError::DuplicateSubmission(id)),
                }
            }
            Err(StoreError::Backend(e)) => {
                self.release_claim(session_id, &submission.id).await;
                Err(StoreError::Backend(e.context("Failed to insert submission")))
            }
            Err(e) => Err(e),
        }
    }

    async fn get_submission(&self, session_id: &str) -> Result<Option<Submission>, StoreError> {
        let document = track_db_operation("find_one", "submissions", async {
            self.submissions()
                .find_one(doc! { "session_id": session_id })
                .await
                .context("Failed to load submission")
        })
        .await?;
        Ok(document.map(Submission::from))
    }

    async fn list_recent_sessions_with_submissions(
        &self,
        limit: usize,
    ) -> Result<Vec<(ProblemSession, Submission)>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let submissions: Vec<Submission> = track_db_operation("find", "submissions", async {
            let mut cursor = self
                .submissions()
                .find(doc! {})
                .sort(doc! { "created_at": -1 })
                .limit(limit)
                .await
                .context("Failed to query submissions")?;
            let mut rows = Vec::new();
            while let Some(document) = cursor
                .try_next()
                .await
                .context("Failed to iterate submissions")?
            {
                rows.push(Submission::from(document));
            }
            Ok(rows)
        })
        .await?;

        let ids: Vec<String> = submissions.iter().map(|s| s.session_id.clone()).collect();
        let mut sessions: HashMap<String, ProblemSession> =
            track_db_operation("find", "sessions", async {
                let mut cursor = self
                    .sessions()
                    .find(doc! { "_id": { "$in": ids } })
                    .await
                    .context("Failed to query sessions for history")?;
                let mut by_id = HashMap::new();
                while let Some(document) = cursor
                    .try_next()
                    .await
                    .context("Failed to iterate sessions for history")?
                {
                    by_id.insert(document.id.clone(), ProblemSession::from(document));
                }
                Ok(by_id)
            })
            .await?;

        Ok(submissions
            .into_iter()
            .filter_map(|submission| {
                sessions
                    .remove(&submission.session_id)
                    .map(|session| (session, submission))
            })
            .collect())
    }

    async fn save_high_score(&self, entry: &HighScoreEntry) -> Result<(), StoreError> {
        let document = HighScoreDocument::from(entry);
        retry_store(self.retry.clone(), || async {
            track_db_operation("insert", "high_scores", async {
                self.high_scores()
                    .insert_one(&document)
                    .await
                    .map(|_| ())
                    .map_err(anyhow::Error::from)
            })
            .await
            .or_else(|e| {
                if is_duplicate_key(&e) {
                    Ok(())
                } else {
                    Err(StoreError::Backend(e))
                }
            })
        })
        .await
    }

    async fn top_scores(&self, limit: usize) -> Result<Vec<HighScoreEntry>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let entries = track_db_operation("find", "high_scores", async {
            let mut cursor = self
                .high_scores()
                .find(doc! {})
                .sort(doc! { "score": -1, "created_at": 1 })
                .limit(limit)
                .await
                .context("Failed to query high scores")?;
            let mut entries = Vec::new();
            while let Some(document) = cursor
                .try_next()
                .await
                .context("Failed to iterate high scores")?
            {
                entries.push(HighScoreEntry::from(document));
            }
            Ok(entries)
        })
        .await?;
        Ok(entries)
    }

    async fn find_or_create_user(&self, name: &str) -> Result<User, StoreError> {
        let existing = track_db_operation("find_one", "users", async {
            self.users()
                .find_one(doc! { "name": name })
                .await
                .context("Failed to look up user")
        })
        .await?;
        if let Some(document) = existing {
            return Ok(document.into());
        }

        let document = UserDocument {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        let inserted = track_db_operation("insert", "users", async {
            self.users()
                .insert_one(&document)
                .await
                .map(|_| ())
                .map_err(anyhow::Error::from)
        })
        .await;

        match inserted {
            Ok(()) => {
                tracing::info!("Created user {} ({})", document.name, document.id);
                Ok(document.into())
            }
            // Lost a race with a concurrent create of the same name
            Err(e) if is_duplicate_key(&e) => self
                .users()
                .find_one(doc! { "name": name })
                .await
                .context("Failed to reload user")?
                .map(User::from)
                .ok_or_else(|| StoreError::Backend(anyhow!("User {} vanished after insert", name))),
            Err(e) => Err(StoreError::Backend(e)),
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        tokio::time::timeout(
            std::time::Duration::from_secs(1),
            self.db.run_command(doc! { "ping": 1 }),
        )
        .await
        .context("MongoDB timeout after 1s")?
        .context("MongoDB ping failed")?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "mongodb"
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryState {
    sessions: HashMap<String, ProblemSession>,
    submissions: HashMap<String, Submission>,
    high_scores: Vec<HighScoreEntry>,
    users: HashMap<String, User>,
}

/// Store used by tests and single-process runs. Every check-then-write
/// happens under one write lock.
#[derive(Default)]
pub struct InMemorySessionStore {
    state: RwLock<MemoryState>,
    unavailable: AtomicBool,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent operation fail with a backend error until
    /// switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Backend(anyhow!("in-memory store marked unavailable")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create_session(
        &self,
        problem: Problem,
        run_id: Option<String>,
        user_id: Option<String>,
        time_limit_seconds: u32,
    ) -> Result<ProblemSession, StoreError> {
        self.check_available()?;
        let session = new_session(problem, run_id, user_id, time_limit_seconds);
        self.state
            .write()
            .await
            .sessions
            .insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<ProblemSession>, StoreError> {
        self.check_available()?;
        Ok(self.state.read().await.sessions.get(session_id).cloned())
    }

    async fn update_status(
        &self,
        session_id: &str,
        from: SessionStatus,
        to: SessionStatus,
    ) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        match state.sessions.get_mut(session_id) {
            Some(session) if session.status == from => {
                session.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn active_sessions_in_run(
        &self,
        run_id: &str,
    ) -> Result<Vec<ProblemSession>, StoreError> {
        self.check_available()?;
        Ok(self
            .state
            .read()
            .await
            .sessions
            .values()
            .filter(|s| s.status == SessionStatus::Active && s.run_id.as_deref() == Some(run_id))
            .cloned()
            .collect())
    }

    async fn abandon_session(&self, session_id: &str) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        if state.submissions.contains_key(session_id) {
            return Ok(false);
        }
        match state.sessions.get_mut(session_id) {
            Some(session) if session.status == SessionStatus::Active => {
                session.status = SessionStatus::Abandoned;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn create_submission(&self, new: NewSubmission) -> Result<Submission, StoreError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        if state.submissions.contains_key(&new.session_id) {
            return Err(StoreError::DuplicateSubmission(new.session_id));
        }
        let active = state
            .sessions
            .get(&new.session_id)
            .is_some_and(|s| s.status == SessionStatus::Active);
        if !active {
            return Err(StoreError::NotActive(new.session_id));
        }
        let submission = new_submission(new);
        state
            .submissions
            .insert(submission.session_id.clone(), submission.clone());
        Ok(submission)
    }

    async fn get_submission(&self, session_id: &str) -> Result<Option<Submission>, StoreError> {
        self.check_available()?;
        Ok(self.state.read().await.submissions.get(session_id).cloned())
    }

    async fn list_recent_sessions_with_submissions(
        &self,
        limit: usize,
    ) -> Result<Vec<(ProblemSession, Submission)>, StoreError> {
        self.check_available()?;
        let state = self.state.read().await;
        let mut submissions: Vec<&Submission> = state.submissions.values().collect();
        submissions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(submissions
            .into_iter()
            .filter_map(|submission| {
                state
                    .sessions
                    .get(&submission.session_id)
                    .map(|session| (session.clone(), submission.clone()))
            })
            .take(limit)
            .collect())
    }

    async fn save_high_score(&self, entry: &HighScoreEntry) -> Result<(), StoreError> {
        self.check_available()?;
        self.state.write().await.high_scores.push(entry.clone());
        Ok(())
    }

    async fn top_scores(&self, limit: usize) -> Result<Vec<HighScoreEntry>, StoreError> {
        self.check_available()?;
        let mut entries = self.state.read().await.high_scores.clone();
        entries.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        entries.truncate(limit);
        Ok(entries)
    }

    async fn find_or_create_user(&self, name: &str) -> Result<User, StoreError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let user = state
            .users
            .entry(name.to_string())
            .or_insert_with(|| User {
                id: Uuid::new_v4().to_string(),
                name: name.to_string(),
                created_at: Utc::now(),
            })
            .clone();
        Ok(user)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContentSource, OperationType};

    fn problem() -> Problem {
        Problem {
            text: "A bookshop packs 6 books into each carton. How many books are there in 4 cartons?"
                .to_string(),
            correct_answer: 24.0,
            operation: OperationType::Multiplication,
            difficulty: Difficulty::Beginner,
            hint: "Multiply.".to_string(),
            source: ContentSource::Fallback,
        }
    }

    fn submission_for(session_id: &str) -> NewSubmission {
        NewSubmission {
            session_id: session_id.to_string(),
            user_answer: Some(24.0),
            is_correct: true,
            feedback_text: "Well done".to_string(),
            difficulty: Difficulty::Beginner,
            time_used_seconds: 12,
            score_delta: 1.0,
        }
    }

    #[tokio::test]
    async fn session_expiry_follows_time_limit() {
        let store = InMemorySessionStore::new();
        let session = store.create_session(problem(), None, None, 60).await.unwrap();
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.time_limit_seconds(), 60);
        assert_eq!(
            store.get_session(&session.id).await.unwrap(),
            Some(session)
        );
    }

    #[tokio::test]
    async fn second_submission_is_rejected() {
        let store = InMemorySessionStore::new();
        let session = store.create_session(problem(), None, None, 60).await.unwrap();

        store.create_submission(submission_for(&session.id)).await.unwrap();
        let err = store
            .create_submission(submission_for(&session.id))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::DuplicateSubmission(_)));
    }

    #[tokio::test]
    async fn status_update_is_compare_and_set() {
        let store = InMemorySessionStore::new();
        let session = store.create_session(problem(), None, None, 60).await.unwrap();

        assert!(store
            .update_status(&session.id, SessionStatus::Active, SessionStatus::Archived)
            .await
            .unwrap());
        assert!(!store
            .update_status(&session.id, SessionStatus::Active, SessionStatus::Abandoned)
            .await
            .unwrap());
        assert!(!store
            .update_status("missing", SessionStatus::Active, SessionStatus::Archived)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn submission_needs_an_active_session() {
        let store = InMemorySessionStore::new();
        let session = store.create_session(problem(), None, None, 60).await.unwrap();
        assert!(store.abandon_session(&session.id).await.unwrap());

        let err = store
            .create_submission(submission_for(&session.id))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotActive(_)));
        assert!(store.get_submission(&session.id).await.unwrap().is_none());

        let err = store
            .create_submission(submission_for("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotActive(_)));
    }

    #[tokio::test]
    async fn abandon_loses_once_a_submission_is_recorded() {
        let store = InMemorySessionStore::new();
        let session = store.create_session(problem(), None, None, 60).await.unwrap();
        store.create_submission(submission_for(&session.id)).await.unwrap();

        assert!(!store.abandon_session(&session.id).await.unwrap());
        let stored = store.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Active);
        assert!(!store.abandon_session("missing").await.unwrap());
    }

    #[tokio::test]
    async fn history_lists_only_submitted_sessions() {
        let store = InMemorySessionStore::new();
        let answered = store.create_session(problem(), None, None, 60).await.unwrap();
        let _open = store.create_session(problem(), None, None, 60).await.unwrap();
        store.create_submission(submission_for(&answered.id)).await.unwrap();

        let rows = store.list_recent_sessions_with_submissions(10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0.id, answered.id);
    }

    #[tokio::test]
    async fn users_are_case_sensitive() {
        let store = InMemorySessionStore::new();
        let a = store.find_or_create_user("Aisha").await.unwrap();
        let again = store.find_or_create_user("Aisha").await.unwrap();
        let other = store.find_or_create_user("aisha").await.unwrap();

        assert_eq!(a.id, again.id);
        assert_ne!(a.id, other.id);
    }

    #[tokio::test]
    async fn unavailable_store_fails_with_backend_error() {
        let store = InMemorySessionStore::new();
        store.set_unavailable(true);
        let err = store.create_session(problem(), None, None, 60).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
        store.set_unavailable(false);
        assert!(store.ping().await.is_ok());
    }
}
