//! Summary counters of flag evaluations within a flush window.
use std::collections::BTreeMap;

use crate::{events::FeatureRequestEvent, Event, Str};

/// Summary of all flag evaluations of one flush window.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventSummary {
    /// Creation date of the earliest counted evaluation.
    pub start_date: i64,
    /// Creation date of the latest counted evaluation.
    pub end_date: i64,
    pub features: BTreeMap<Str, FlagSummary>,
}

impl EventSummary {
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlagSummary {
    /// Default value of the first counted evaluation.
    pub default: serde_json::Value,
    pub counters: Vec<FlagCounter>,
}

/// Number of evaluations that produced the same (variation, value, version) triple.
#[derive(Debug, Clone, PartialEq)]
pub struct FlagCounter {
    pub variation: Option<usize>,
    pub value: serde_json::Value,
    /// `None` for unknown flags.
    pub version: Option<u64>,
    pub count: u64,
}

/// Accumulates evaluation counters. Owned by the event processor loop.
#[derive(Debug, Default)]
pub struct EventSummarizer {
    summary: EventSummary,
}

impl EventSummarizer {
    pub fn new() -> EventSummarizer {
        EventSummarizer::default()
    }

    /// Count the event if it is a flag evaluation. Other events are ignored.
    pub fn summarize_event(&mut self, event: &Event) {
        if let Event::FeatureRequest(fe) = event {
            self.summarize_feature_request(fe);
        }
    }

    fn summarize_feature_request(&mut self, fe: &FeatureRequestEvent) {
        self.record(
            &fe.key,
            fe.version,
            fe.variation,
            &fe.value,
            &fe.default,
            fe.creation_date,
        );
    }

    /// Increment the counter for `(variation, value, version)` of `flag_key`.
    pub fn record(
        &mut self,
        flag_key: &Str,
        version: Option<u64>,
        variation: Option<usize>,
        value: &serde_json::Value,
        default: &serde_json::Value,
        creation_date: i64,
    ) {
        let summary = &mut self.summary;
        if summary.features.is_empty() {
            summary.start_date = creation_date;
            summary.end_date = creation_date;
        } else {
            summary.start_date = summary.start_date.min(creation_date);
            summary.end_date = summary.end_date.max(creation_date);
        }

        let flag = summary
            .features
            .entry(flag_key.clone())
            .or_insert_with(|| FlagSummary {
                default: default.clone(),
                counters: Vec::new(),
            });

        // Flags rarely have more than a handful of counters per window, so a linear scan is
        // fine here.
        match flag.counters.iter_mut().find(|counter| {
            counter.variation == variation && counter.version == version && counter.value == *value
        }) {
            Some(counter) => counter.count += 1,
            None => flag.counters.push(FlagCounter {
                variation,
                value: value.clone(),
                version,
                count: 1,
            }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.summary.is_empty()
    }

    /// Take the current summary, starting a new window.
    pub fn snapshot(&mut self) -> EventSummary {
        std::mem::take(&mut self.summary)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::{EventSummarizer, FlagCounter};
    use crate::{CustomEvent, Event, FeatureRequestEvent, IdentifyEvent, User};

    fn evaluation(flag_key: &str, variation: usize, value: serde_json::Value, date: i64) -> Event {
        let mut event = FeatureRequestEvent::new(
            flag_key,
            Arc::new(User::new("key")),
            value,
            json!("default"),
        )
        .with_version(11)
        .with_variation(variation);
        event.creation_date = date;
        event.into()
    }

    #[test]
    fn starts_empty() {
        let mut summarizer = EventSummarizer::new();

        assert!(summarizer.is_empty());
        assert!(summarizer.snapshot().is_empty());
    }

    #[test]
    fn ignores_non_feature_events() {
        let mut summarizer = EventSummarizer::new();
        let user = Arc::new(User::new("key"));

        summarizer.summarize_event(&IdentifyEvent::new(user.clone()).into());
        summarizer.summarize_event(&CustomEvent::new("custom", user, None).into());

        assert!(summarizer.is_empty());
    }

    #[test]
    fn tracks_window_start_and_end() {
        let mut summarizer = EventSummarizer::new();

        summarizer.summarize_event(&evaluation("flag", 1, json!("a"), 2000));
        summarizer.summarize_event(&evaluation("flag", 1, json!("a"), 1000));
        summarizer.summarize_event(&evaluation("flag", 1, json!("a"), 1500));

        let summary = summarizer.snapshot();
        assert_eq!(summary.start_date, 1000);
        assert_eq!(summary.end_date, 2000);
    }

    #[test]
    fn counts_identical_evaluations_together() {
        let mut summarizer = EventSummarizer::new();

        summarizer.summarize_event(&evaluation("flag1", 1, json!("a"), 1000));
        summarizer.summarize_event(&evaluation("flag1", 1, json!("a"), 1001));
        summarizer.summarize_event(&evaluation("flag1", 2, json!("b"), 1002));
        summarizer.summarize_event(&evaluation("flag2", 1, json!("a"), 1003));

        let summary = summarizer.snapshot();
        let flag1 = &summary.features["flag1"];
        assert_eq!(flag1.default, json!("default"));
        assert_eq!(
            flag1.counters,
            vec![
                FlagCounter {
                    variation: Some(1),
                    value: json!("a"),
                    version: Some(11),
                    count: 2,
                },
                FlagCounter {
                    variation: Some(2),
                    value: json!("b"),
                    version: Some(11),
                    count: 1,
                },
            ]
        );
        assert_eq!(summary.features["flag2"].counters[0].count, 1);
    }

    #[test]
    fn snapshot_resets_state() {
        let mut summarizer = EventSummarizer::new();
        summarizer.summarize_event(&evaluation("flag", 1, json!("a"), 1000));

        assert!(!summarizer.snapshot().is_empty());
        assert!(summarizer.is_empty());
    }
}
