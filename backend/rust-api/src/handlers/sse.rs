use axum::{
    extract::{Path, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
};
use chrono::Utc;
use futures::stream::{self, Stream};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use super::ApiError;
use crate::metrics::SSE_CONNECTIONS_ACTIVE;
use crate::models::timer::TimerEvent;
use crate::models::{ProblemSession, SessionStatus};
use crate::services::session_service::SessionService;
use crate::services::AppState;

/// Keeps the connection gauge in step with the stream's lifetime.
struct ConnectionGuard;

impl ConnectionGuard {
    fn new() -> Self {
        SSE_CONNECTIONS_ACTIVE.inc();
        ConnectionGuard
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        SSE_CONNECTIONS_ACTIVE.dec();
    }
}

struct StreamState {
    sessions: SessionService,
    session: ProblemSession,
    tick: Duration,
    first: bool,
    _guard: ConnectionGuard,
}

/// SSE countdown for one session
/// GET /api/v1/sessions/{id}/stream
pub async fn session_stream(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.sessions.get_session(&session_id).await?;
    tracing::info!(
        "Client connected to SSE stream: session={}, tick_interval={}ms",
        session_id,
        state.config.tick_interval_ms
    );

    let stream = create_timer_stream(StreamState {
        sessions: state.sessions.clone(),
        session,
        tick: Duration::from_millis(state.config.tick_interval_ms),
        first: true,
        _guard: ConnectionGuard::new(),
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Emits `timer-tick` until the deadline, then one `time-expired`. Ends
/// early once the session has been closed some other way.
fn create_timer_stream(state: StreamState) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(Some(state), |state| async move {
        let mut state = state?;

        if !state.first {
            sleep(state.tick).await;
            match state.sessions.get_session(&state.session.id).await {
                Ok(current) if current.status == SessionStatus::Active => {}
                Ok(_) => {
                    tracing::debug!("SSE stream ended, session closed: {}", state.session.id);
                    return None;
                }
                Err(e) => {
                    tracing::warn!("SSE stream lost session {}: {}", state.session.id, e);
                    return None;
                }
            }
        }
        state.first = false;

        let timer_event = TimerEvent::at(
            &state.session.id,
            state.session.created_at,
            state.session.expires_at,
            Utc::now(),
        );
        let event = Event::default()
            .event(timer_event.event_name())
            .data(timer_event.to_sse_data());

        match timer_event {
            TimerEvent::TimeExpired(_) => {
                tracing::info!("Timer expired: session={}", state.session.id);
                Some((Ok(event), None))
            }
            TimerEvent::TimerTick(_) => Some((Ok(event), Some(state))),
        }
    })
}
