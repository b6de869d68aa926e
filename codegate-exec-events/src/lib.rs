//! Structured telemetry events for codegate validation sessions.
//!
//! This crate exposes the serialized schema for session lifecycle updates
//! (attempts, regeneration requests, terminal states) emitted by the retry
//! coordinator. Downstream applications can deserialize these structures to
//! drive dashboards or audit pipelines without depending on `codegate-core`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Semantic version of the serialized event schema exported by this crate.
pub const EVENT_SCHEMA_VERSION: &str = "0.2.0";

/// Wraps a [`SessionEvent`] with schema metadata so downstream consumers can
/// negotiate compatibility before processing an event stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VersionedSessionEvent {
    /// Semantic version describing the schema of the nested event payload.
    pub schema_version: String,
    /// Wall-clock time at which the event was wrapped.
    pub emitted_at: DateTime<Utc>,
    /// Concrete event emitted by the coordinator.
    pub event: SessionEvent,
}

impl VersionedSessionEvent {
    /// Creates a new [`VersionedSessionEvent`] using the current
    /// [`EVENT_SCHEMA_VERSION`].
    pub fn new(event: SessionEvent) -> Self {
        Self {
            schema_version: EVENT_SCHEMA_VERSION.to_string(),
            emitted_at: Utc::now(),
            event,
        }
    }

    /// Returns the nested [`SessionEvent`], consuming the wrapper.
    pub fn into_event(self) -> SessionEvent {
        self.event
    }
}

impl From<SessionEvent> for VersionedSessionEvent {
    fn from(event: SessionEvent) -> Self {
        Self::new(event)
    }
}

/// Sink for processing [`SessionEvent`] instances.
pub trait EventEmitter: Send {
    /// Invoked for each event emitted by a validation session.
    fn emit(&mut self, event: &SessionEvent);
}

impl<F> EventEmitter for F
where
    F: FnMut(&SessionEvent) + Send,
{
    fn emit(&mut self, event: &SessionEvent) {
        self(event);
    }
}

/// Collects events in memory, mostly useful for tests and for callers that
/// persist the stream after the session ends.
#[derive(Debug, Default, Clone)]
pub struct RecordingEmitter {
    events: Vec<SessionEvent>,
}

impl RecordingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[SessionEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<SessionEvent> {
        self.events
    }
}

impl EventEmitter for RecordingEmitter {
    fn emit(&mut self, event: &SessionEvent) {
        self.events.push(event.clone());
    }
}

/// JSON helper utilities for serializing and deserializing session events.
#[cfg(feature = "serde-json")]
pub mod json {
    use super::{SessionEvent, VersionedSessionEvent};

    /// Converts an event into a `serde_json::Value`.
    pub fn to_value(event: &SessionEvent) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(event)
    }

    /// Serializes an event into a JSON string.
    pub fn to_string(event: &SessionEvent) -> serde_json::Result<String> {
        serde_json::to_string(event)
    }

    /// Deserializes an event from a JSON string.
    pub fn from_str(payload: &str) -> serde_json::Result<SessionEvent> {
        serde_json::from_str(payload)
    }

    /// Serializes a [`VersionedSessionEvent`] wrapper.
    pub fn versioned_to_string(event: &SessionEvent) -> serde_json::Result<String> {
        serde_json::to_string(&VersionedSessionEvent::new(event.clone()))
    }

    /// Deserializes a [`VersionedSessionEvent`] wrapper.
    pub fn versioned_from_str(payload: &str) -> serde_json::Result<VersionedSessionEvent> {
        serde_json::from_str(payload)
    }
}

#[cfg(feature = "telemetry-tracing")]
mod tracing_support {
    use tracing::Level;

    use super::{EVENT_SCHEMA_VERSION, EventEmitter, SessionEvent};

    /// Emits structured events as `tracing` events at the specified level.
    #[derive(Debug, Clone)]
    pub struct TracingEmitter {
        level: Level,
    }

    impl TracingEmitter {
        /// Creates a new [`TracingEmitter`] with the provided [`Level`].
        pub fn new(level: Level) -> Self {
            Self { level }
        }
    }

    impl Default for TracingEmitter {
        fn default() -> Self {
            Self { level: Level::INFO }
        }
    }

    impl EventEmitter for TracingEmitter {
        fn emit(&mut self, event: &SessionEvent) {
            let kind = event.kind();
            let session_id = event.session_id();
            match self.level {
                Level::TRACE => tracing::event!(
                    target: "codegate_exec_events",
                    Level::TRACE,
                    schema_version = EVENT_SCHEMA_VERSION,
                    session_id,
                    kind,
                    event = ?event,
                    "codegate_session_event"
                ),
                Level::DEBUG => tracing::event!(
                    target: "codegate_exec_events",
                    Level::DEBUG,
                    schema_version = EVENT_SCHEMA_VERSION,
                    session_id,
                    kind,
                    event = ?event,
                    "codegate_session_event"
                ),
                Level::INFO => tracing::event!(
                    target: "codegate_exec_events",
                    Level::INFO,
                    schema_version = EVENT_SCHEMA_VERSION,
                    session_id,
                    kind,
                    event = ?event,
                    "codegate_session_event"
                ),
                Level::WARN => tracing::event!(
                    target: "codegate_exec_events",
                    Level::WARN,
                    schema_version = EVENT_SCHEMA_VERSION,
                    session_id,
                    kind,
                    event = ?event,
                    "codegate_session_event"
                ),
                Level::ERROR => tracing::event!(
                    target: "codegate_exec_events",
                    Level::ERROR,
                    schema_version = EVENT_SCHEMA_VERSION,
                    session_id,
                    kind,
                    event = ?event,
                    "codegate_session_event"
                ),
            }
        }
    }

    pub use TracingEmitter as PublicTracingEmitter;
}

#[cfg(feature = "telemetry-tracing")]
pub use tracing_support::PublicTracingEmitter as TracingEmitter;

/// Structured events emitted while a validation session runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum SessionEvent {
    /// A new session has started from an initial artifact.
    #[serde(rename = "session.started")]
    SessionStarted(SessionStartedEvent),
    /// The coordinator is about to validate an artifact.
    #[serde(rename = "attempt.started")]
    AttemptStarted(AttemptStartedEvent),
    /// A validation finished and its report was appended to the attempt log.
    #[serde(rename = "attempt.completed")]
    AttemptCompleted(AttemptCompletedEvent),
    /// The coordinator handed findings back to the generator.
    #[serde(rename = "regeneration.requested")]
    RegenerationRequested(RegenerationRequestedEvent),
    /// The session reached a terminal state.
    #[serde(rename = "session.finished")]
    SessionFinished(SessionFinishedEvent),
}

impl SessionEvent {
    /// Stable dotted name of the event, matching the serialized `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionStarted(_) => "session.started",
            Self::AttemptStarted(_) => "attempt.started",
            Self::AttemptCompleted(_) => "attempt.completed",
            Self::RegenerationRequested(_) => "regeneration.requested",
            Self::SessionFinished(_) => "session.finished",
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            Self::SessionStarted(event) => &event.session_id,
            Self::AttemptStarted(event) => &event.session_id,
            Self::AttemptCompleted(event) => &event.session_id,
            Self::RegenerationRequested(event) => &event.session_id,
            Self::SessionFinished(event) => &event.session_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionStartedEvent {
    /// Unique identifier of the session.
    pub session_id: String,
    /// Content address of the initial artifact.
    pub artifact_id: String,
    /// Maximum number of validations the session may perform.
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttemptStartedEvent {
    pub session_id: String,
    /// 1-based attempt number.
    pub attempt: u32,
    pub artifact_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttemptCompletedEvent {
    pub session_id: String,
    pub attempt: u32,
    pub artifact_id: String,
    /// Whether the report marked the artifact as valid.
    pub valid: bool,
    /// Security score in `[0, 1]`.
    pub security_score: f64,
    /// Number of findings attached to the report.
    pub finding_count: usize,
    /// Whether the sandbox run timed out.
    #[serde(default)]
    pub timed_out: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegenerationRequestedEvent {
    pub session_id: String,
    /// Attempt whose findings are being handed to the generator.
    pub attempt: u32,
    /// Finding codes (or messages when no code is attached), in report order.
    pub findings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionFinishedEvent {
    pub session_id: String,
    /// Terminal state name (`accepted`, `exhausted`, `cancelled`).
    pub state: String,
    /// Extra detail for exhausted sessions (for example `no_change`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Number of validations actually performed.
    pub attempts: u32,
}
