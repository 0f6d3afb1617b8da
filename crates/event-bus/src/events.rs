//! # Events
//!
//! Defines the event value object that flows through the bus, together with
//! its metadata, priority and lifecycle status.
//!
//! Events are values: status transitions return a new `Event` that keeps the
//! original `id`, so consumers can correlate every copy of one publication.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Default retry budget carried by a freshly constructed event.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Kinds of events that can be published to the bus.
///
/// The dispatch engine only uses `EventType` as a lookup key, so new kinds
/// can be introduced through `Custom` without touching the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // =========================================================================
    // SYSTEM
    // =========================================================================
    /// Application finished starting up.
    SystemStartup,
    /// Application is shutting down.
    SystemShutdown,
    /// An unrecoverable error was observed somewhere in the process.
    SystemError,

    // =========================================================================
    // CONFIGURATION
    // =========================================================================
    /// A configuration source was loaded.
    ConfigLoaded,
    /// A configuration value changed.
    ConfigChanged,
    /// A configuration document passed validation.
    ConfigValidated,
    /// A configuration document was written back to its source.
    ConfigSaved,

    // =========================================================================
    // TEMPLATES
    // =========================================================================
    /// A template was rendered.
    TemplateRendered,
    /// A rendered template was stored in the cache.
    TemplateCached,
    /// A template was added.
    TemplateCreated,
    /// A template's source changed.
    TemplateUpdated,
    /// A template was removed.
    TemplateDeleted,

    // =========================================================================
    // HANDLER LIFECYCLE
    // =========================================================================
    /// A handler registration was added.
    HandlerRegistered,
    /// A handler registration was removed.
    HandlerUnregistered,
    /// A handler exhausted its retries.
    HandlerFailed,

    // =========================================================================
    // COMMANDS
    // =========================================================================
    /// A command began executing.
    CommandStarted,
    /// A command completed successfully.
    CommandCompleted,
    /// A command failed.
    CommandFailed,

    /// Domain-specific kind identified by name.
    Custom(String),
}

impl EventType {
    /// Build a domain-specific event type.
    pub fn custom(name: impl Into<String>) -> Self {
        Self::Custom(name.into())
    }

    /// Stable string name of this kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::SystemStartup => "system.startup",
            Self::SystemShutdown => "system.shutdown",
            Self::SystemError => "system.error",
            Self::ConfigLoaded => "config.loaded",
            Self::ConfigChanged => "config.changed",
            Self::ConfigValidated => "config.validated",
            Self::ConfigSaved => "config.saved",
            Self::TemplateRendered => "template.rendered",
            Self::TemplateCached => "template.cached",
            Self::TemplateCreated => "template.created",
            Self::TemplateUpdated => "template.updated",
            Self::TemplateDeleted => "template.deleted",
            Self::HandlerRegistered => "handler.registered",
            Self::HandlerUnregistered => "handler.unregistered",
            Self::HandlerFailed => "handler.failed",
            Self::CommandStarted => "command.started",
            Self::CommandCompleted => "command.completed",
            Self::CommandFailed => "command.failed",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = std::convert::Infallible;

    /// Known names map to their variant; anything else becomes `Custom`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "system.startup" => Self::SystemStartup,
            "system.shutdown" => Self::SystemShutdown,
            "system.error" => Self::SystemError,
            "config.loaded" => Self::ConfigLoaded,
            "config.changed" => Self::ConfigChanged,
            "config.validated" => Self::ConfigValidated,
            "config.saved" => Self::ConfigSaved,
            "template.rendered" => Self::TemplateRendered,
            "template.cached" => Self::TemplateCached,
            "template.created" => Self::TemplateCreated,
            "template.updated" => Self::TemplateUpdated,
            "template.deleted" => Self::TemplateDeleted,
            "handler.registered" => Self::HandlerRegistered,
            "handler.unregistered" => Self::HandlerUnregistered,
            "handler.failed" => Self::HandlerFailed,
            "command.started" => Self::CommandStarted,
            "command.completed" => Self::CommandCompleted,
            "command.failed" => Self::CommandFailed,
            other => Self::Custom(other.to_string()),
        })
    }
}

/// Urgency of an event or of a handler registration.
///
/// Lower rank is more urgent and is processed first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EventPriority {
    Critical = 0,
    High = 1,
    #[default]
    Normal = 2,
    Low = 3,
    Background = 4,
}

impl EventPriority {
    /// Numeric rank (0 = most urgent).
    #[must_use]
    pub fn rank(self) -> u8 {
        self as u8
    }

    /// All priorities, most urgent first.
    pub const ALL: [EventPriority; 5] = [
        Self::Critical,
        Self::High,
        Self::Normal,
        Self::Low,
        Self::Background,
    ];
}

/// Lifecycle of one publication.
///
/// `Pending -> Processing -> {Completed | Failed | Cancelled}`. The terminal
/// states never move back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
    /// Reserved for cooperative cancellation; the engine never sets it.
    Cancelled,
}

impl EventStatus {
    /// Whether this status ends the lifecycle.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether moving from `self` to `next` follows the state machine.
    #[must_use]
    pub fn can_transition_to(self, next: EventStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Processing | Self::Cancelled) => true,
            (Self::Processing, Self::Completed | Self::Failed | Self::Cancelled) => true,
            _ => false,
        }
    }
}

/// Metadata carried alongside every event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Creation time (UTC).
    pub created_at: DateTime<Utc>,
    /// Free-text origin identifier.
    pub source: Option<String>,
    /// Id shared by causally related events.
    pub correlation_id: Option<String>,
    /// Tags used by filters.
    pub tags: BTreeSet<String>,
    /// Urgency of the event itself.
    pub priority: EventPriority,
    /// Retries already spent on this event.
    pub retry_count: u32,
    /// Retry budget per handler invocation.
    pub max_retries: u32,
    /// Execution budget for handlers that have no timeout of their own.
    #[serde(with = "optional_duration_secs")]
    pub timeout: Option<Duration>,
}

impl Default for EventMetadata {
    fn default() -> Self {
        Self {
            created_at: Utc::now(),
            source: None,
            correlation_id: None,
            tags: BTreeSet::new(),
            priority: EventPriority::Normal,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: None,
        }
    }
}

/// An immutable record of something that happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    id: Uuid,
    event_type: EventType,
    payload: HashMap<String, serde_json::Value>,
    metadata: EventMetadata,
    status: EventStatus,
}

impl Event {
    /// Create a pending event of the given type with default metadata.
    #[must_use]
    pub fn new(event_type: EventType) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            payload: HashMap::new(),
            metadata: EventMetadata::default(),
            status: EventStatus::Pending,
        }
    }

    #[must_use]
    pub fn with_payload(mut self, payload: HashMap<String, serde_json::Value>) -> Self {
        self.payload = payload;
        self
    }

    /// Insert one payload entry.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.metadata.priority = priority;
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.metadata.source = Some(source.into());
        self
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.metadata.correlation_id = Some(correlation_id.into());
        self
    }

    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metadata.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.metadata.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.metadata.timeout = Some(timeout);
        self
    }

    /// Add a tag before the event is published.
    pub fn add_tag(&mut self, tag: impl Into<String>) {
        self.metadata.tags.insert(tag.into());
    }

    /// Set the correlation id before the event is published.
    pub fn set_correlation_id(&mut self, correlation_id: impl Into<String>) {
        self.metadata.correlation_id = Some(correlation_id.into());
    }

    /// Copy of this event carrying `status`. The id and payload are kept.
    #[must_use]
    pub fn with_status(&self, status: EventStatus) -> Self {
        let mut next = self.clone();
        next.status = status;
        next
    }

    /// Copy of this event for a retry attempt.
    pub(crate) fn with_retry_count(&self, retry_count: u32) -> Self {
        let mut next = self.clone();
        next.metadata.retry_count = retry_count;
        next
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn event_type(&self) -> &EventType {
        &self.event_type
    }

    pub fn payload(&self) -> &HashMap<String, serde_json::Value> {
        &self.payload
    }

    /// Look up one payload entry.
    pub fn field(&self, key: &str) -> Option<&serde_json::Value> {
        self.payload.get(key)
    }

    pub fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    pub fn status(&self) -> EventStatus {
        self.status
    }

    pub fn priority(&self) -> EventPriority {
        self.metadata.priority
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.metadata.tags
    }

    pub fn source(&self) -> Option<&str> {
        self.metadata.source.as_deref()
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.metadata.correlation_id.as_deref()
    }

    pub fn retry_count(&self) -> u32 {
        self.metadata.retry_count
    }

    pub fn max_retries(&self) -> u32 {
        self.metadata.max_retries
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.metadata.created_at
    }
}

mod optional_duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let secs = Option::<f64>::deserialize(d)?;
        Ok(secs.map(Duration::from_secs_f64))
    }
}
