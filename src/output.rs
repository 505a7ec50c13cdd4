//! Conversion of buffered events into the JSON records posted to the collector.
use std::{collections::BTreeMap, sync::Arc};

use serde::Serialize;

use crate::{
    events::{CustomEvent, EvaluationReason, FeatureRequestEvent, IdentifyEvent},
    summarizer::EventSummary,
    user_filter::{FilteredUser, UserFilter},
    Config, Event, Str, User,
};

/// An entry of the outbox, not yet formatted.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PendingEvent {
    /// Full user details for a user seen for the first time.
    Index { creation_date: i64, user: Arc<User> },
    /// A submitted event, sent as is.
    Full(Event),
    /// Copy of a flag evaluation sent because the flag is in debug mode.
    Debug(FeatureRequestEvent),
}

/// A record of the bulk payload.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub(crate) enum OutputEvent {
    Identify(IdentifyOutput),
    Index(IndexOutput),
    Feature(FeatureOutput),
    Debug(FeatureOutput),
    Custom(CustomOutput),
    Summary(SummaryOutput),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IdentifyOutput {
    creation_date: i64,
    key: Str,
    user: FilteredUser,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IndexOutput {
    creation_date: i64,
    user: FilteredUser,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FeatureOutput {
    creation_date: i64,
    key: Str,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<u64>,
    value: serde_json::Value,
    default: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    variation: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<EvaluationReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prereq_of: Option<Str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_key: Option<Str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<FilteredUser>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CustomOutput {
    creation_date: i64,
    key: Str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metric_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_key: Option<Str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<FilteredUser>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SummaryOutput {
    start_date: i64,
    end_date: i64,
    features: BTreeMap<Str, FlagSummaryOutput>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct FlagSummaryOutput {
    default: serde_json::Value,
    counters: Vec<CounterOutput>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct CounterOutput {
    value: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    variation: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unknown: Option<bool>,
    count: u64,
}

impl OutputEvent {
    fn user(&self) -> Option<&FilteredUser> {
        match self {
            OutputEvent::Identify(e) => Some(&e.user),
            OutputEvent::Index(e) => Some(&e.user),
            OutputEvent::Feature(e) | OutputEvent::Debug(e) => e.user.as_ref(),
            OutputEvent::Custom(e) => e.user.as_ref(),
            OutputEvent::Summary(_) => None,
        }
    }

    /// The same record with custom user attributes dropped.
    fn without_custom_attributes(self) -> OutputEvent {
        match self {
            OutputEvent::Identify(mut e) => {
                e.user = e.user.without_custom();
                OutputEvent::Identify(e)
            }
            OutputEvent::Index(mut e) => {
                e.user = e.user.without_custom();
                OutputEvent::Index(e)
            }
            OutputEvent::Feature(mut e) => {
                e.user = e.user.map(FilteredUser::without_custom);
                OutputEvent::Feature(e)
            }
            OutputEvent::Debug(mut e) => {
                e.user = e.user.map(FilteredUser::without_custom);
                OutputEvent::Debug(e)
            }
            OutputEvent::Custom(mut e) => {
                e.user = e.user.map(FilteredUser::without_custom);
                OutputEvent::Custom(e)
            }
            summary @ OutputEvent::Summary(_) => summary,
        }
    }
}

/// Turns outbox snapshots into JSON records.
///
/// Every record is converted separately. A record whose user has custom attributes that cannot be
/// serialized is sent without those attributes; the rest of the batch is not affected.
#[derive(Debug, Clone)]
pub(crate) struct EventOutputFormatter {
    user_filter: UserFilter,
    inline_users: bool,
    log_user_key_in_errors: bool,
}

impl EventOutputFormatter {
    pub fn new(config: &Config) -> EventOutputFormatter {
        EventOutputFormatter {
            user_filter: UserFilter::new(
                config.all_attributes_private,
                config.private_attribute_names.iter().cloned(),
            ),
            inline_users: config.inline_users_in_events,
            log_user_key_in_errors: config.log_user_key_in_errors,
        }
    }

    /// Format buffered events followed by the summary record (if the summary is not empty).
    pub fn make_output_events(
        &self,
        events: &[PendingEvent],
        summary: &EventSummary,
    ) -> Vec<serde_json::Value> {
        let mut records = Vec::with_capacity(events.len() + 1);
        for event in events {
            if let Some(record) = self.to_json(self.make_output_event(event)) {
                records.push(record);
            }
        }
        if !summary.is_empty() {
            if let Some(record) = self.to_json(make_summary_event(summary)) {
                records.push(record);
            }
        }
        records
    }

    fn make_output_event(&self, event: &PendingEvent) -> OutputEvent {
        match event {
            PendingEvent::Index {
                creation_date,
                user,
            } => OutputEvent::Index(IndexOutput {
                creation_date: *creation_date,
                user: self.user_filter.filter(user),
            }),
            PendingEvent::Full(Event::Identify(e)) => self.make_identify_event(e),
            PendingEvent::Full(Event::FeatureRequest(e)) => {
                OutputEvent::Feature(self.make_feature_output(e, self.inline_users))
            }
            PendingEvent::Full(Event::Custom(e)) => self.make_custom_event(e),
            // Debug events always carry the full user.
            PendingEvent::Debug(e) => OutputEvent::Debug(self.make_feature_output(e, true)),
        }
    }

    fn make_identify_event(&self, e: &IdentifyEvent) -> OutputEvent {
        OutputEvent::Identify(IdentifyOutput {
            creation_date: e.creation_date,
            key: e.user.key.clone(),
            user: self.user_filter.filter(&e.user),
        })
    }

    fn make_feature_output(&self, e: &FeatureRequestEvent, inline_user: bool) -> FeatureOutput {
        let (user_key, user) = self.user_reference(&e.user, inline_user);
        FeatureOutput {
            creation_date: e.creation_date,
            key: e.key.clone(),
            version: e.version,
            value: e.value.clone(),
            default: e.default.clone(),
            variation: e.variation,
            reason: e.reason.clone(),
            prereq_of: e.prereq_of.clone(),
            user_key,
            user,
        }
    }

    fn make_custom_event(&self, e: &CustomEvent) -> OutputEvent {
        let (user_key, user) = self.user_reference(&e.user, self.inline_users);
        OutputEvent::Custom(CustomOutput {
            creation_date: e.creation_date,
            key: e.key.clone(),
            data: e.data.clone(),
            metric_value: e.metric_value,
            user_key,
            user,
        })
    }

    fn user_reference(&self, user: &User, inline: bool) -> (Option<Str>, Option<FilteredUser>) {
        if inline {
            (None, Some(self.user_filter.filter(user)))
        } else {
            (Some(user.key.clone()), None)
        }
    }

    fn to_json(&self, record: OutputEvent) -> Option<serde_json::Value> {
        match serde_json::to_value(&record) {
            Ok(value) => Some(value),
            Err(err) => {
                log::error!(target: "flag_events",
                    "an error occurred while processing custom attributes for {}, sending the event without them: {}",
                    self.describe_user(record.user()), err);
                match serde_json::to_value(record.without_custom_attributes()) {
                    Ok(value) => Some(value),
                    Err(err) => {
                        log::error!(target: "flag_events", "dropping event that cannot be serialized: {}", err);
                        None
                    }
                }
            }
        }
    }

    fn describe_user(&self, user: Option<&FilteredUser>) -> String {
        match user {
            Some(user) if self.log_user_key_in_errors => format!("user '{}'", user.key),
            _ => "a user (enable log_user_key_in_errors to see the user key)".to_owned(),
        }
    }
}

fn make_summary_event(summary: &EventSummary) -> OutputEvent {
    let features = summary
        .features
        .iter()
        .map(|(key, flag)| {
            let counters = flag
                .counters
                .iter()
                .map(|counter| CounterOutput {
                    value: counter.value.clone(),
                    variation: counter.variation,
                    version: counter.version,
                    unknown: counter.version.is_none().then_some(true),
                    count: counter.count,
                })
                .collect();
            (
                key.clone(),
                FlagSummaryOutput {
                    default: flag.default.clone(),
                    counters,
                },
            )
        })
        .collect();

    OutputEvent::Summary(SummaryOutput {
        start_date: summary.start_date,
        end_date: summary.end_date,
        features,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::{EventOutputFormatter, PendingEvent};
    use crate::{
        summarizer::{EventSummarizer, EventSummary},
        Config, CustomEvent, EvaluationReason, Event, FeatureRequestEvent, IdentifyEvent, User,
        UserBuilder,
    };

    fn user() -> Arc<User> {
        Arc::new(UserBuilder::new("userKey").name("Red").build())
    }

    fn formatter(config: Config) -> EventOutputFormatter {
        EventOutputFormatter::new(&config)
    }

    fn feature_event() -> FeatureRequestEvent {
        let mut event = FeatureRequestEvent::new("flagkey", user(), json!("value"), json!(null))
            .with_version(11)
            .with_variation(2);
        event.creation_date = 1000;
        event
    }

    fn format_one(formatter: &EventOutputFormatter, event: PendingEvent) -> serde_json::Value {
        let mut records = formatter.make_output_events(&[event], &EventSummary::default());
        assert_eq!(records.len(), 1);
        records.remove(0)
    }

    #[test]
    fn identify_event_has_key_and_user() {
        let mut event = IdentifyEvent::new(user());
        event.creation_date = 1000;

        let record = format_one(
            &formatter(Config::from_sdk_key("key")),
            PendingEvent::Full(event.into()),
        );

        assert_eq!(
            record,
            json!({
                "kind": "identify",
                "creationDate": 1000,
                "key": "userKey",
                "user": {"key": "userKey", "name": "Red"},
            })
        );
    }

    #[test]
    fn identify_event_user_is_filtered() {
        let mut event = IdentifyEvent::new(user());
        event.creation_date = 1000;

        let record = format_one(
            &formatter(Config::from_sdk_key("key").all_attributes_private(true)),
            PendingEvent::Full(event.into()),
        );

        assert_eq!(
            record["user"],
            json!({"key": "userKey", "privateAttrs": ["name"]})
        );
    }

    #[test]
    fn index_event_has_user_only() {
        let record = format_one(
            &formatter(Config::from_sdk_key("key")),
            PendingEvent::Index {
                creation_date: 1000,
                user: user(),
            },
        );

        assert_eq!(
            record,
            json!({
                "kind": "index",
                "creationDate": 1000,
                "user": {"key": "userKey", "name": "Red"},
            })
        );
    }

    #[test]
    fn feature_event_references_user_by_key() {
        let record = format_one(
            &formatter(Config::from_sdk_key("key")),
            PendingEvent::Full(feature_event().into()),
        );

        assert_eq!(
            record,
            json!({
                "kind": "feature",
                "creationDate": 1000,
                "key": "flagkey",
                "version": 11,
                "value": "value",
                "default": null,
                "variation": 2,
                "userKey": "userKey",
            })
        );
    }

    #[test]
    fn feature_event_can_inline_user_and_include_reason() {
        let event = feature_event()
            .with_reason(EvaluationReason::Fallthrough)
            .with_prereq_of("parent");

        let record = format_one(
            &formatter(Config::from_sdk_key("key").inline_users_in_events(true)),
            PendingEvent::Full(event.into()),
        );

        assert_eq!(
            record,
            json!({
                "kind": "feature",
                "creationDate": 1000,
                "key": "flagkey",
                "version": 11,
                "value": "value",
                "default": null,
                "variation": 2,
                "reason": {"kind": "FALLTHROUGH"},
                "prereqOf": "parent",
                "user": {"key": "userKey", "name": "Red"},
            })
        );
    }

    #[test]
    fn debug_event_always_inlines_user() {
        let record = format_one(
            &formatter(Config::from_sdk_key("key")),
            PendingEvent::Debug(feature_event()),
        );

        assert_eq!(record["kind"], json!("debug"));
        assert_eq!(record["user"], json!({"key": "userKey", "name": "Red"}));
        assert!(record.get("userKey").is_none());
    }

    #[test]
    fn custom_event_has_data_and_metric_value() {
        let mut event = CustomEvent::new("eventkey", user(), Some(json!({"thing": "stuff"})))
            .with_metric_value(2.5);
        event.creation_date = 1000;

        let record = format_one(
            &formatter(Config::from_sdk_key("key")),
            PendingEvent::Full(event.into()),
        );

        assert_eq!(
            record,
            json!({
                "kind": "custom",
                "creationDate": 1000,
                "key": "eventkey",
                "data": {"thing": "stuff"},
                "metricValue": 2.5,
                "userKey": "userKey",
            })
        );
    }

    #[test]
    fn summary_event_lists_counters() {
        let mut summarizer = EventSummarizer::new();
        summarizer.summarize_event(&Event::from(feature_event()));
        let mut unknown = FeatureRequestEvent::new("missing", user(), json!(false), json!(false));
        unknown.creation_date = 2000;
        summarizer.summarize_event(&Event::from(unknown));

        let records = formatter(Config::from_sdk_key("key"))
            .make_output_events(&[], &summarizer.snapshot());

        assert_eq!(
            records,
            vec![json!({
                "kind": "summary",
                "startDate": 1000,
                "endDate": 2000,
                "features": {
                    "flagkey": {
                        "default": null,
                        "counters": [{"value": "value", "variation": 2, "version": 11, "count": 1}],
                    },
                    "missing": {
                        "default": false,
                        "counters": [{"value": false, "unknown": true, "count": 1}],
                    },
                },
            })]
        );
    }

    #[test]
    fn bad_custom_attributes_do_not_drop_other_events() {
        let _ = env_logger::builder().is_test(true).try_init();

        let good = Arc::new(UserBuilder::new("user1").name("Bandit").build());
        let bad = Arc::new(
            UserBuilder::new("user3")
                .name("Pirate")
                .custom("uh-oh", f64::NAN)
                .build(),
        );
        let mut identify_good = IdentifyEvent::new(good);
        identify_good.creation_date = 1000;
        let mut identify_bad = IdentifyEvent::new(bad);
        identify_bad.creation_date = 1001;

        let records = formatter(Config::from_sdk_key("key")).make_output_events(
            &[
                PendingEvent::Full(identify_good.into()),
                PendingEvent::Full(identify_bad.into()),
            ],
            &EventSummary::default(),
        );

        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["user"], json!({"key": "user1", "name": "Bandit"}));
        assert_eq!(records[1]["kind"], json!("identify"));
        assert_eq!(records[1]["user"], json!({"key": "user3", "name": "Pirate"}));
    }
}
