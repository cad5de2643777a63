use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TimerEvent {
    TimerTick(TimerTick),
    TimeExpired(TimeExpired),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TimerTick {
    pub session_id: String,
    pub remaining_seconds: u32,
    pub elapsed_seconds: u32,
    pub total_seconds: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TimeExpired {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl TimerEvent {
    pub fn to_sse_data(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            TimerEvent::TimerTick(_) => "timer-tick",
            TimerEvent::TimeExpired(_) => "time-expired",
        }
    }

    /// Snapshot of the countdown for a session with the given window.
    pub fn at(
        session_id: &str,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        let total = (expires_at - created_at).num_seconds().max(0) as u32;
        let remaining = (expires_at - now).num_seconds().max(0) as u32;

        if now >= expires_at {
            return TimerEvent::TimeExpired(TimeExpired {
                session_id: session_id.to_string(),
                timestamp: now,
                message: "Time limit exceeded".to_string(),
            });
        }

        TimerEvent::TimerTick(TimerTick {
            session_id: session_id.to_string(),
            remaining_seconds: remaining,
            elapsed_seconds: total.saturating_sub(remaining),
            total_seconds: total,
            timestamp: now,
        })
    }
}
