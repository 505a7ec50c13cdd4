//! Diagnostic events describing the SDK configuration and the health of the event pipeline.
use std::time::Duration;

use serde::Serialize;

use crate::{events::now_millis, Config};

/// Identity of an SDK client in diagnostic events.
///
/// [`new_event_processor`](crate::new_event_processor) generates one for each processor it
/// starts, and every diagnostic event of that processor carries it. To keep one id for the whole
/// process, create it once and pass it to [`DiagnosticsManager::new`] for each processor started
/// with [`DefaultEventProcessor::start`](crate::DefaultEventProcessor::start).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticId {
    pub diagnostic_id: String,
    /// Last six characters of the SDK key.
    pub sdk_key_suffix: String,
}

impl DiagnosticId {
    pub fn new(sdk_key: &str) -> DiagnosticId {
        let suffix_start = sdk_key
            .char_indices()
            .rev()
            .nth(5)
            .map(|(i, _)| i)
            .unwrap_or(0);
        DiagnosticId {
            diagnostic_id: uuid::Uuid::new_v4().to_string(),
            sdk_key_suffix: sdk_key[suffix_start..].to_owned(),
        }
    }
}

/// Pipeline counters reported by periodic diagnostic events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiagnosticCounters {
    /// Number of records in the last flushed batch.
    pub events_in_last_batch: u64,
    /// Events dropped because the outbox was full.
    pub dropped_events: u64,
    /// Events whose user was already known to the dedup cache.
    pub deduplicated_users: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticInitEvent {
    pub kind: &'static str,
    pub id: DiagnosticId,
    pub creation_date: i64,
    pub sdk: DiagnosticSdkData,
    pub platform: DiagnosticPlatformData,
    pub configuration: DiagnosticConfigData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticSdkData {
    pub name: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticPlatformData {
    pub name: &'static str,
    pub os_name: &'static str,
    pub os_arch: &'static str,
}

/// Flattened configuration. Never includes the SDK key or any URI.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticConfigData {
    #[serde(rename = "customBaseURI")]
    pub custom_base_uri: bool,
    #[serde(rename = "customStreamURI")]
    pub custom_stream_uri: bool,
    #[serde(rename = "customEventsURI")]
    pub custom_events_uri: bool,
    pub events_capacity: usize,
    pub connect_timeout_millis: u64,
    pub socket_timeout_millis: u64,
    pub events_flush_interval_millis: u64,
    pub polling_interval_millis: u64,
    pub start_wait_millis: u64,
    pub reconnect_time_millis: u64,
    pub streaming_disabled: bool,
    pub using_relay_daemon: bool,
    pub offline: bool,
    pub all_attributes_private: bool,
    pub inline_users_in_events: bool,
    pub user_keys_capacity: u64,
    pub user_keys_flush_interval_millis: u64,
    pub diagnostic_recording_interval_millis: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_store_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticPeriodicEvent {
    pub kind: &'static str,
    pub id: DiagnosticId,
    pub creation_date: i64,
    pub data_since_date: i64,
    pub dropped_events: u64,
    pub deduplicated_users: u64,
    pub events_in_last_batch: u64,
}

/// Builds diagnostic events. Owned by the event processor loop.
#[derive(Debug)]
pub struct DiagnosticsManager {
    id: DiagnosticId,
    config: DiagnosticConfigData,
    start_time: i64,
    data_since: i64,
}

impl DiagnosticsManager {
    /// `start_wait` is how long the client waited for initialization; `start_time` is the epoch
    /// milliseconds at which the SDK started.
    pub fn new(
        id: DiagnosticId,
        config: &Config,
        start_wait: Duration,
        start_time: i64,
    ) -> DiagnosticsManager {
        DiagnosticsManager {
            id,
            config: make_config_data(config, start_wait),
            start_time,
            data_since: start_time,
        }
    }

    pub fn create_init_event(&self) -> DiagnosticInitEvent {
        DiagnosticInitEvent {
            kind: "diagnostic-init",
            id: self.id.clone(),
            creation_date: self.start_time,
            sdk: DiagnosticSdkData {
                name: env!("CARGO_PKG_NAME"),
                version: env!("CARGO_PKG_VERSION"),
            },
            platform: DiagnosticPlatformData {
                name: "Rust",
                os_name: std::env::consts::OS,
                os_arch: std::env::consts::ARCH,
            },
            configuration: self.config.clone(),
        }
    }

    /// Build a periodic event from `counters`. The next periodic event covers the time since this
    /// one.
    pub fn create_periodic_event(&mut self, counters: DiagnosticCounters) -> DiagnosticPeriodicEvent {
        let now = now_millis();
        let event = DiagnosticPeriodicEvent {
            kind: "diagnostic",
            id: self.id.clone(),
            creation_date: now,
            data_since_date: self.data_since,
            dropped_events: counters.dropped_events,
            deduplicated_users: counters.deduplicated_users,
            events_in_last_batch: counters.events_in_last_batch,
        };
        self.data_since = now;
        event
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn make_config_data(config: &Config, start_wait: Duration) -> DiagnosticConfigData {
    let data_store_type = config.feature_store.as_ref().map(|store| {
        store
            .diagnostic_component_type_name()
            .unwrap_or("custom")
            .to_owned()
    });

    DiagnosticConfigData {
        custom_base_uri: config.base_uri != Config::DEFAULT_BASE_URI,
        custom_stream_uri: config.stream_uri != Config::DEFAULT_STREAM_URI,
        custom_events_uri: config.events_uri != Config::DEFAULT_EVENTS_URI,
        events_capacity: config.capacity,
        connect_timeout_millis: millis(config.timeout),
        socket_timeout_millis: millis(config.timeout),
        events_flush_interval_millis: millis(config.flush_interval),
        polling_interval_millis: millis(config.poll_interval),
        start_wait_millis: millis(start_wait),
        reconnect_time_millis: millis(config.stream_initial_reconnect_delay),
        streaming_disabled: !config.stream,
        using_relay_daemon: config.use_ldd,
        offline: config.offline,
        all_attributes_private: config.all_attributes_private,
        inline_users_in_events: config.inline_users_in_events,
        user_keys_capacity: config.user_keys_capacity,
        user_keys_flush_interval_millis: millis(config.user_keys_flush_interval),
        diagnostic_recording_interval_millis: millis(config.diagnostic_recording_interval),
        data_store_type,
    }
}
