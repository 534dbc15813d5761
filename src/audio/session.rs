//! # Pipeline Session
//!
//! Lifecycle bookkeeping for one run of the accumulate-and-emit pipeline.
//! Only the control side (start/stop, reporting) touches a session; the
//! real-time producer thread never does, so plain locks are fine here.
//!
//! ## Session Lifecycle:
//! 1. **Created**: channel and accumulator built, threads not started
//! 2. **Running**: producer and consumer active
//! 3. **Stopping**: stop requested, producer flushing, consumer draining
//! 4. **Stopped**: both sides joined
//! 5. **Error**: a side failed to join

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionStatus {
    Created,
    Running,
    Stopping,
    Stopped,
    Error(String),
}

impl SessionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            SessionStatus::Created => "created",
            SessionStatus::Running => "running",
            SessionStatus::Stopping => "stopping",
            SessionStatus::Stopped => "stopped",
            SessionStatus::Error(_) => "error",
        }
    }
}

#[derive(Debug)]
pub struct PipelineSession {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    status: RwLock<SessionStatus>,
    started_at: RwLock<Option<DateTime<Utc>>>,
    ended_at: RwLock<Option<DateTime<Utc>>>,
}

/// Serializable view of a session for reports.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub status: String,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub running_seconds: f64,
}

impl PipelineSession {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            status: RwLock::new(SessionStatus::Created),
            started_at: RwLock::new(None),
            ended_at: RwLock::new(None),
        }
    }

    pub fn status(&self) -> SessionStatus {
        match self.status.read() {
            Ok(status) => status.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_status(&self, new_status: SessionStatus) {
        match self.status.write() {
            Ok(mut status) => *status = new_status,
            Err(poisoned) => *poisoned.into_inner() = new_status,
        }
    }

    fn stamp(slot: &RwLock<Option<DateTime<Utc>>>) {
        match slot.write() {
            Ok(mut time) => *time = Some(Utc::now()),
            Err(poisoned) => *poisoned.into_inner() = Some(Utc::now()),
        }
    }

    fn read_stamp(slot: &RwLock<Option<DateTime<Utc>>>) -> Option<DateTime<Utc>> {
        match slot.read() {
            Ok(time) => *time,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// ## State Transition:
    /// Created → Running
    pub fn start(&self) -> Result<(), String> {
        match self.status() {
            SessionStatus::Created => {
                self.set_status(SessionStatus::Running);
                Self::stamp(&self.started_at);
                Ok(())
            }
            other => Err(format!("Cannot start session from status: {:?}", other)),
        }
    }

    /// ## State Transition:
    /// Running → Stopping
    pub fn begin_stop(&self) -> Result<(), String> {
        match self.status() {
            SessionStatus::Running => {
                self.set_status(SessionStatus::Stopping);
                Ok(())
            }
            other => Err(format!("Cannot stop session from status: {:?}", other)),
        }
    }

    /// ## State Transition:
    /// Stopping → Stopped
    pub fn finish(&self) -> Result<(), String> {
        match self.status() {
            SessionStatus::Stopping => {
                self.set_status(SessionStatus::Stopped);
                Self::stamp(&self.ended_at);
                Ok(())
            }
            other => Err(format!("Cannot finish session from status: {:?}", other)),
        }
    }

    /// Mark the session as failed. Allowed from any state.
    pub fn set_error(&self, error_message: String) {
        self.set_status(SessionStatus::Error(error_message));
        if Self::read_stamp(&self.ended_at).is_none() {
            Self::stamp(&self.ended_at);
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.status(), SessionStatus::Running)
    }

    /// Seconds between start and end (or now, while running). 0 if never started.
    pub fn running_seconds(&self) -> f64 {
        match Self::read_stamp(&self.started_at) {
            Some(started) => {
                let end_time = Self::read_stamp(&self.ended_at).unwrap_or_else(Utc::now);
                end_time.signed_duration_since(started).num_milliseconds() as f64 / 1000.0
            }
            None => 0.0,
        }
    }

    pub fn summary(&self) -> SessionSummary {
        let status = self.status();
        SessionSummary {
            session_id: self.session_id.clone(),
            status: status.as_str().to_string(),
            error: match status {
                SessionStatus::Error(message) => Some(message),
                _ => None,
            },
            created_at: self.created_at,
            started_at: Self::read_stamp(&self.started_at),
            ended_at: Self::read_stamp(&self.ended_at),
            running_seconds: self.running_seconds(),
        }
    }
}

impl Default for PipelineSession {
    fn default() -> Self {
        Self::new()
    }
}
