//! Events submitted to the pipeline by the SDK.
//!
//! Events are immutable values. The processor never changes them: it derives output records
//! (index, feature, debug, summary...) from them at flush time.
use std::sync::Arc;

use chrono::Utc;
use derive_more::From;
use serde::{Deserialize, Serialize};

use crate::{Str, User};

/// An analytics event. The set of kinds is closed, so the formatter can match on it exhaustively.
#[derive(Debug, Clone, PartialEq, From)]
pub enum Event {
    /// The SDK was told about a user.
    Identify(IdentifyEvent),
    /// A flag was evaluated.
    FeatureRequest(FeatureRequestEvent),
    /// The application tracked a custom event.
    Custom(CustomEvent),
}

impl Event {
    /// Epoch milliseconds at which the event was created.
    pub fn creation_date(&self) -> i64 {
        match self {
            Event::Identify(e) => e.creation_date,
            Event::FeatureRequest(e) => e.creation_date,
            Event::Custom(e) => e.creation_date,
        }
    }

    /// The user that the event refers to.
    pub fn user(&self) -> &Arc<User> {
        match self {
            Event::Identify(e) => &e.user,
            Event::FeatureRequest(e) => &e.user,
            Event::Custom(e) => &e.user,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdentifyEvent {
    pub creation_date: i64,
    pub user: Arc<User>,
}

impl IdentifyEvent {
    pub fn new(user: impl Into<Arc<User>>) -> IdentifyEvent {
        IdentifyEvent {
            creation_date: now_millis(),
            user: user.into(),
        }
    }
}

/// Result of a single flag evaluation, as produced by the evaluation engine.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRequestEvent {
    pub creation_date: i64,
    pub user: Arc<User>,
    /// Key of the evaluated flag.
    pub key: Str,
    /// Version of the flag. `None` if the flag is unknown.
    pub version: Option<u64>,
    /// Index of the returned variation. `None` when the default value was served.
    pub variation: Option<usize>,
    pub value: serde_json::Value,
    /// Default value the application passed in.
    pub default: serde_json::Value,
    pub reason: Option<EvaluationReason>,
    /// Whether the flag asks for full feature events (not only summary counters).
    pub track_events: bool,
    /// Epoch milliseconds until which debug events are generated for this flag.
    pub debug_events_until_date: Option<i64>,
    /// Set when the flag was evaluated as a prerequisite of another flag.
    pub prereq_of: Option<Str>,
}

impl FeatureRequestEvent {
    pub fn new(
        key: impl Into<Str>,
        user: impl Into<Arc<User>>,
        value: serde_json::Value,
        default: serde_json::Value,
    ) -> FeatureRequestEvent {
        FeatureRequestEvent {
            creation_date: now_millis(),
            user: user.into(),
            key: key.into(),
            version: None,
            variation: None,
            value,
            default,
            reason: None,
            track_events: false,
            debug_events_until_date: None,
            prereq_of: None,
        }
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_variation(mut self, variation: usize) -> Self {
        self.variation = Some(variation);
        self
    }

    pub fn with_reason(mut self, reason: EvaluationReason) -> Self {
        self.reason = Some(reason);
        self
    }

    pub fn with_track_events(mut self, track_events: bool) -> Self {
        self.track_events = track_events;
        self
    }

    pub fn with_debug_events_until_date(mut self, date: i64) -> Self {
        self.debug_events_until_date = Some(date);
        self
    }

    pub fn with_prereq_of(mut self, flag_key: impl Into<Str>) -> Self {
        self.prereq_of = Some(flag_key.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CustomEvent {
    pub creation_date: i64,
    pub user: Arc<User>,
    pub key: Str,
    pub data: Option<serde_json::Value>,
    pub metric_value: Option<f64>,
}

impl CustomEvent {
    pub fn new(
        key: impl Into<Str>,
        user: impl Into<Arc<User>>,
        data: Option<serde_json::Value>,
    ) -> CustomEvent {
        CustomEvent {
            creation_date: now_millis(),
            user: user.into(),
            key: key.into(),
            data,
            metric_value: None,
        }
    }

    pub fn with_metric_value(mut self, metric_value: f64) -> Self {
        self.metric_value = Some(metric_value);
        self
    }
}

/// Why a flag evaluated to a particular value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluationReason {
    Off,
    Fallthrough,
    TargetMatch,
    #[serde(rename_all = "camelCase")]
    RuleMatch { rule_index: usize, rule_id: String },
    #[serde(rename_all = "camelCase")]
    PrerequisiteFailed { prerequisite_key: String },
    #[serde(rename_all = "camelCase")]
    Error { error_kind: EvaluationErrorKind },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluationErrorKind {
    ClientNotReady,
    FlagNotFound,
    UserNotSpecified,
    MalformedFlag,
    WrongType,
    Exception,
}

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
