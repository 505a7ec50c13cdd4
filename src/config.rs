use std::{sync::Arc, time::Duration};

use crate::FeatureStore;

/// Configuration for the event pipeline.
///
/// Only the SDK key is required. Everything else has defaults that fit most applications.
///
/// # Examples
/// ```
/// # use std::time::Duration;
/// # use flag_events::Config;
/// let config = Config::from_sdk_key("sdk-key")
///     .capacity(500)
///     .flush_interval(Duration::from_secs(10))
///     .inline_users_in_events(true);
/// ```
#[derive(Clone)]
pub struct Config {
    pub(crate) sdk_key: String,
    pub(crate) base_uri: String,
    pub(crate) stream_uri: String,
    pub(crate) events_uri: String,
    /// When set, events are posted to this URI verbatim instead of `<events_uri>/bulk`.
    pub(crate) events_endpoint_uri: Option<String>,
    pub(crate) send_events: bool,
    pub(crate) offline: bool,
    pub(crate) capacity: usize,
    pub(crate) flush_interval: Duration,
    pub(crate) user_keys_capacity: u64,
    pub(crate) user_keys_flush_interval: Duration,
    pub(crate) inline_users_in_events: bool,
    pub(crate) all_attributes_private: bool,
    pub(crate) private_attribute_names: Vec<String>,
    pub(crate) log_user_key_in_errors: bool,
    pub(crate) user_agent: Option<String>,
    pub(crate) timeout: Duration,
    pub(crate) poll_interval: Duration,
    pub(crate) stream: bool,
    pub(crate) stream_initial_reconnect_delay: Duration,
    pub(crate) use_ldd: bool,
    pub(crate) start_wait: Duration,
    pub(crate) diagnostic_opt_out: bool,
    pub(crate) diagnostic_recording_interval: Duration,
    pub(crate) feature_store: Option<Arc<dyn FeatureStore>>,
    pub(crate) http_client: Option<reqwest::Client>,
    /// Delay before the single retry of a failed delivery. Not user-configurable; tests shorten
    /// it.
    pub(crate) retry_delay: Duration,
}

impl Config {
    /// Default base URI for flag requests.
    pub const DEFAULT_BASE_URI: &'static str = "https://app.launchdarkly.com";
    /// Default streaming URI.
    pub const DEFAULT_STREAM_URI: &'static str = "https://stream.launchdarkly.com";
    /// Default base URI of the events collector.
    pub const DEFAULT_EVENTS_URI: &'static str = "https://events.launchdarkly.com";

    /// Default value for [`Config::capacity`].
    pub const DEFAULT_CAPACITY: usize = 10_000;
    /// Default value for [`Config::flush_interval`].
    pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
    /// Default value for [`Config::user_keys_capacity`].
    pub const DEFAULT_USER_KEYS_CAPACITY: u64 = 1000;
    /// Default value for [`Config::user_keys_flush_interval`].
    pub const DEFAULT_USER_KEYS_FLUSH_INTERVAL: Duration = Duration::from_secs(5 * 60);
    /// Default value for [`Config::timeout`].
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(3000);
    /// Default value for [`Config::poll_interval`].
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
    /// Default value for [`Config::stream_initial_reconnect_delay`].
    pub const DEFAULT_STREAM_RECONNECT_DELAY: Duration = Duration::from_secs(1);
    /// Default value for [`Config::start_wait`].
    pub const DEFAULT_START_WAIT: Duration = Duration::from_secs(5);
    /// Default value for [`Config::diagnostic_recording_interval`].
    pub const DEFAULT_DIAGNOSTIC_RECORDING_INTERVAL: Duration = Duration::from_secs(15 * 60);
    /// Smallest accepted diagnostic recording interval.
    pub const MIN_DIAGNOSTIC_RECORDING_INTERVAL: Duration = Duration::from_secs(60);

    pub(crate) const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

    /// Create a default configuration using the specified SDK key.
    ///
    /// ```
    /// # use flag_events::Config;
    /// Config::from_sdk_key("sdk-key");
    /// ```
    pub fn from_sdk_key(sdk_key: impl Into<String>) -> Config {
        Config {
            sdk_key: sdk_key.into(),
            base_uri: Config::DEFAULT_BASE_URI.to_owned(),
            stream_uri: Config::DEFAULT_STREAM_URI.to_owned(),
            events_uri: Config::DEFAULT_EVENTS_URI.to_owned(),
            events_endpoint_uri: None,
            send_events: true,
            offline: false,
            capacity: Config::DEFAULT_CAPACITY,
            flush_interval: Config::DEFAULT_FLUSH_INTERVAL,
            user_keys_capacity: Config::DEFAULT_USER_KEYS_CAPACITY,
            user_keys_flush_interval: Config::DEFAULT_USER_KEYS_FLUSH_INTERVAL,
            inline_users_in_events: false,
            all_attributes_private: false,
            private_attribute_names: Vec::new(),
            log_user_key_in_errors: false,
            user_agent: None,
            timeout: Config::DEFAULT_TIMEOUT,
            poll_interval: Config::DEFAULT_POLL_INTERVAL,
            stream: true,
            stream_initial_reconnect_delay: Config::DEFAULT_STREAM_RECONNECT_DELAY,
            use_ldd: false,
            start_wait: Config::DEFAULT_START_WAIT,
            diagnostic_opt_out: false,
            diagnostic_recording_interval: Config::DEFAULT_DIAGNOSTIC_RECORDING_INTERVAL,
            feature_store: None,
            http_client: None,
            retry_delay: Config::DEFAULT_RETRY_DELAY,
        }
    }

    /// Override base URI for flag requests. Only reported in diagnostics.
    pub fn base_uri(mut self, base_uri: impl Into<String>) -> Self {
        self.base_uri = base_uri.into();
        self
    }

    /// Override streaming URI. Only reported in diagnostics.
    pub fn stream_uri(mut self, stream_uri: impl Into<String>) -> Self {
        self.stream_uri = stream_uri.into();
        self
    }

    /// Override base URI of the events collector. `/bulk` and `/diagnostic` are appended to it.
    pub fn events_uri(mut self, events_uri: impl Into<String>) -> Self {
        self.events_uri = events_uri.into();
        self
    }

    /// Post analytics events to exactly this URI, without appending `/bulk`.
    pub fn events_endpoint_uri(mut self, uri: impl Into<String>) -> Self {
        self.events_endpoint_uri = Some(uri.into());
        self
    }

    /// Whether to send analytics events at all. Defaults to `true`.
    pub fn send_events(mut self, send_events: bool) -> Self {
        self.send_events = send_events;
        self
    }

    /// Offline mode: no network activity. Defaults to `false`.
    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    /// Maximum number of events buffered between flushes.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// How often buffered events are flushed.
    pub fn flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    /// Number of user keys remembered for deduplication of index events.
    pub fn user_keys_capacity(mut self, capacity: u64) -> Self {
        self.user_keys_capacity = capacity;
        self
    }

    /// How often the remembered user keys are forgotten.
    pub fn user_keys_flush_interval(mut self, interval: Duration) -> Self {
        self.user_keys_flush_interval = interval;
        self
    }

    /// Include full user details in every feature and custom event instead of sending index
    /// events.
    pub fn inline_users_in_events(mut self, inline: bool) -> Self {
        self.inline_users_in_events = inline;
        self
    }

    /// Treat all user attributes (except the key) as private.
    pub fn all_attributes_private(mut self, all_private: bool) -> Self {
        self.all_attributes_private = all_private;
        self
    }

    /// Attribute names that are private for every user.
    pub fn private_attribute_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.private_attribute_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Include user keys in error log messages.
    pub fn log_user_key_in_errors(mut self, log_user_key: bool) -> Self {
        self.log_user_key_in_errors = log_user_key;
        self
    }

    /// `User-Agent` header sent with every request.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Timeout for HTTP requests. Ignored when a custom [`Config::http_client`] is set.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Poll interval of the update source. Only reported in diagnostics.
    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Config::DEFAULT_POLL_INTERVAL);
        self
    }

    /// Whether the update source streams. Only reported in diagnostics.
    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Initial stream reconnect delay. Only reported in diagnostics.
    pub fn stream_initial_reconnect_delay(mut self, delay: Duration) -> Self {
        self.stream_initial_reconnect_delay = delay;
        self
    }

    /// Whether flags are read from a relay daemon. Only reported in diagnostics.
    pub fn use_ldd(mut self, use_ldd: bool) -> Self {
        self.use_ldd = use_ldd;
        self
    }

    /// How long the client waited for initialization. Only reported in diagnostics.
    pub fn start_wait(mut self, start_wait: Duration) -> Self {
        self.start_wait = start_wait;
        self
    }

    /// Disable diagnostic events.
    pub fn diagnostic_opt_out(mut self, opt_out: bool) -> Self {
        self.diagnostic_opt_out = opt_out;
        self
    }

    /// How often periodic diagnostic events are sent. Values below
    /// [`Config::MIN_DIAGNOSTIC_RECORDING_INTERVAL`] are raised to it.
    pub fn diagnostic_recording_interval(mut self, interval: Duration) -> Self {
        self.diagnostic_recording_interval = interval.max(Config::MIN_DIAGNOSTIC_RECORDING_INTERVAL);
        self
    }

    /// Feature store used by the SDK. Only its component name is reported in diagnostics.
    pub fn feature_store(mut self, store: Arc<dyn FeatureStore>) -> Self {
        self.feature_store = Some(store);
        self
    }

    /// HTTP client used to post events.
    ///
    /// Use this to route deliveries through a proxy or to customize TLS. The client is used as
    /// is: it must carry its own timeout, [`Config::timeout`] is not applied to it.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }
}
