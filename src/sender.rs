//! Delivery of serialized payloads to the events collector.
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::DateTime;
use reqwest::{
    header::{AUTHORIZATION, CONTENT_TYPE, DATE, USER_AGENT},
    StatusCode, Url,
};

use crate::{Config, Error, Result};

const BULK_ENDPOINT: &str = "/bulk";
const DIAGNOSTIC_ENDPOINT: &str = "/diagnostic";

const PAYLOAD_ID_HEADER: &str = "X-LaunchDarkly-Payload-ID";
const EVENT_SCHEMA_HEADER: &str = "X-LaunchDarkly-Event-Schema";
const CURRENT_EVENT_SCHEMA: &str = "3";

const MAX_ATTEMPTS: usize = 2;

/// Outcome of a delivery, after the retry if there was one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeliveryResult {
    /// Accepted by the collector. Carries the collector's clock (epoch milliseconds) if the
    /// response had a `Date` header.
    Delivered { server_time: Option<i64> },
    /// The payload was dropped.
    Failed,
    /// The SDK key was rejected. No further deliveries will be attempted.
    Unauthorized,
}

/// Posts payloads with at most one retry.
///
/// Sharing one sender between concurrent flushes is fine: it only holds the HTTP client (which
/// keeps a connection pool internally) and the shared breaker flag.
#[derive(Debug, Clone)]
pub(crate) struct EventSender {
    client: reqwest::Client,
    bulk_url: Url,
    diagnostic_url: Url,
    sdk_key: String,
    user_agent: Option<String>,
    retry_delay: Duration,
    /// Set once the collector rejects the SDK key.
    disabled: Arc<AtomicBool>,
}

impl EventSender {
    pub fn new(config: &Config, disabled: Arc<AtomicBool>) -> Result<EventSender> {
        let events_uri = config.events_uri.trim_end_matches('/');
        let bulk_url = match &config.events_endpoint_uri {
            Some(uri) => Url::parse(uri),
            None => Url::parse(&format!("{}{}", events_uri, BULK_ENDPOINT)),
        }
        .map_err(Error::InvalidEventsUri)?;
        let diagnostic_url = Url::parse(&format!("{}{}", events_uri, DIAGNOSTIC_ENDPOINT))
            .map_err(Error::InvalidEventsUri)?;

        let client = match &config.http_client {
            Some(client) => client.clone(),
            None => reqwest::Client::builder().timeout(config.timeout).build()?,
        };

        Ok(EventSender {
            client,
            bulk_url,
            diagnostic_url,
            sdk_key: config.sdk_key.clone(),
            user_agent: config.user_agent.clone(),
            retry_delay: config.retry_delay,
            disabled,
        })
    }

    /// Whether the collector has rejected the SDK key.
    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Acquire)
    }

    /// Post a bulk payload. The same `payload_id` is used for the retry, so the collector can
    /// discard duplicates.
    pub async fn send_events(&self, body: Vec<u8>, payload_id: &str) -> DeliveryResult {
        self.post(&self.bulk_url, body, Some(payload_id), "analytics events")
            .await
    }

    pub async fn send_diagnostic(&self, body: Vec<u8>) -> DeliveryResult {
        self.post(&self.diagnostic_url, body, None, "diagnostic event")
            .await
    }

    async fn post(
        &self,
        url: &Url,
        body: Vec<u8>,
        payload_id: Option<&str>,
        description: &str,
    ) -> DeliveryResult {
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                log::warn!(target: "flag_events", "will retry posting {} after {:?}", description, self.retry_delay);
                tokio::time::sleep(self.retry_delay).await;
            }
            if self.is_disabled() {
                return DeliveryResult::Unauthorized;
            }

            let mut request = self
                .client
                .post(url.clone())
                .header(AUTHORIZATION, &self.sdk_key)
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone());
            if let Some(user_agent) = &self.user_agent {
                request = request.header(USER_AGENT, user_agent);
            }
            if let Some(payload_id) = payload_id {
                request = request
                    .header(PAYLOAD_ID_HEADER, payload_id)
                    .header(EVENT_SCHEMA_HEADER, CURRENT_EVENT_SCHEMA);
            }

            log::debug!(target: "flag_events", "posting {}", description);
            let response = match request.send().await {
                Ok(response) => response,
                Err(err) => {
                    log::warn!(target: "flag_events", "unexpected error while sending {}: {}", description, err.without_url());
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                log::debug!(target: "flag_events", status = status.as_u16(); "posted {}", description);
                return DeliveryResult::Delivered {
                    server_time: server_time(&response),
                };
            }
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                log::error!(target: "flag_events", status = status.as_u16();
                    "received {} while sending {}. Check your SDK key. No further events will be sent",
                    status, description);
                self.disabled.store(true, Ordering::Release);
                return DeliveryResult::Unauthorized;
            }
            if !is_recoverable(status) {
                log::warn!(target: "flag_events", status = status.as_u16();
                    "received {} while sending {}, dropping the payload", status, description);
                return DeliveryResult::Failed;
            }
            log::warn!(target: "flag_events", status = status.as_u16(); "received {} while sending {}", status, description);
        }

        log::warn!(target: "flag_events", "giving up on {} after {} attempts", description, MAX_ATTEMPTS);
        DeliveryResult::Failed
    }
}

/// 5xx and a few 4xx codes are worth retrying. Everything else in 4xx means the payload (or the
/// key) is bad and will stay bad.
fn is_recoverable(status: StatusCode) -> bool {
    if status.is_client_error() {
        matches!(
            status,
            StatusCode::BAD_REQUEST | StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS
        )
    } else {
        true
    }
}

fn server_time(response: &reqwest::Response) -> Option<i64> {
    let date = response.headers().get(DATE)?.to_str().ok()?;
    DateTime::parse_from_rfc2822(date)
        .ok()
        .map(|date| date.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{atomic::AtomicBool, Arc, Mutex},
        time::Duration,
    };

    use mockito::Matcher;
    use reqwest::{
        header::{HeaderMap, HeaderValue},
        StatusCode,
    };

    use super::{is_recoverable, DeliveryResult, EventSender};
    use crate::{Config, Error};

    fn test_config(events_uri: &str) -> Config {
        let mut config = Config::from_sdk_key("sdk-key").events_uri(events_uri);
        config.retry_delay = Duration::from_millis(10);
        config
    }

    fn sender(config: &Config) -> EventSender {
        EventSender::new(config, Arc::new(AtomicBool::new(false))).unwrap()
    }

    #[test]
    fn builds_endpoint_urls() {
        let sender = sender(&test_config("http://localhost:1234"));
        assert_eq!(sender.bulk_url.as_str(), "http://localhost:1234/bulk");
        assert_eq!(
            sender.diagnostic_url.as_str(),
            "http://localhost:1234/diagnostic"
        );

        let sender = self::sender(&test_config("http://localhost:1234/"));
        assert_eq!(sender.bulk_url.as_str(), "http://localhost:1234/bulk");

        let sender = self::sender(
            &test_config("http://localhost:1234").events_endpoint_uri("http://other:5678/custom"),
        );
        assert_eq!(sender.bulk_url.as_str(), "http://other:5678/custom");
    }

    #[test]
    fn rejects_invalid_events_uri() {
        let result = EventSender::new(
            &test_config("not a uri"),
            Arc::new(AtomicBool::new(false)),
        );

        assert!(matches!(result, Err(Error::InvalidEventsUri(_))));
    }

    #[test]
    fn classifies_status_codes() {
        for code in [400, 408, 429, 500, 503] {
            assert!(is_recoverable(StatusCode::from_u16(code).unwrap()), "{code}");
        }
        for code in [401, 403, 404, 413] {
            assert!(!is_recoverable(StatusCode::from_u16(code).unwrap()), "{code}");
        }
    }

    #[tokio::test]
    async fn sends_headers_and_reads_server_date() {
        let _ = env_logger::builder().is_test(true).try_init();

        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/bulk")
            .match_header("authorization", "sdk-key")
            .match_header("user-agent", "test-agent/1.0")
            .match_header("content-type", "application/json")
            .match_header("x-launchdarkly-event-schema", "3")
            .match_header("x-launchdarkly-payload-id", "payload-1")
            .match_body("[]")
            .with_status(202)
            .with_header("date", "Tue, 15 Nov 1994 08:12:31 GMT")
            .create_async()
            .await;

        let sender = sender(&test_config(&server.url()).user_agent("test-agent/1.0"));
        let result = sender.send_events(b"[]".to_vec(), "payload-1").await;

        mock.assert_async().await;
        assert_eq!(
            result,
            DeliveryResult::Delivered {
                server_time: Some(784887151000)
            }
        );
    }

    #[tokio::test]
    async fn custom_http_client_is_used_for_deliveries() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/bulk")
            .match_header("x-custom-client", "yes")
            .match_header("authorization", "sdk-key")
            .with_status(202)
            .create_async()
            .await;

        let mut headers = HeaderMap::new();
        headers.insert("x-custom-client", HeaderValue::from_static("yes"));
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .unwrap();

        let sender = sender(&test_config(&server.url()).http_client(client));
        let result = sender.send_events(b"[]".to_vec(), "payload-1").await;

        mock.assert_async().await;
        assert!(matches!(result, DeliveryResult::Delivered { .. }));
    }

    #[tokio::test]
    async fn retries_once_with_same_payload_id() {
        let mut server = mockito::Server::new_async().await;
        let payload_ids = Arc::new(Mutex::new(Vec::new()));
        let mock = {
            let payload_ids = payload_ids.clone();
            server
                .mock("POST", "/bulk")
                .with_status(503)
                .with_body_from_request(move |request| {
                    let ids = request
                        .header("x-launchdarkly-payload-id")
                        .iter()
                        .filter_map(|value| value.to_str().ok())
                        .map(str::to_owned)
                        .collect::<Vec<_>>();
                    payload_ids.lock().unwrap().extend(ids);
                    Vec::new()
                })
                .expect(2)
                .create_async()
                .await
        };

        let sender = sender(&test_config(&server.url()));
        let result = sender.send_events(b"[]".to_vec(), "payload-1").await;

        mock.assert_async().await;
        assert_eq!(result, DeliveryResult::Failed);
        assert_eq!(*payload_ids.lock().unwrap(), vec!["payload-1", "payload-1"]);
    }

    #[tokio::test]
    async fn does_not_retry_other_client_errors() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/bulk")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let sender = sender(&test_config(&server.url()));
        let result = sender.send_events(b"[]".to_vec(), "payload-1").await;

        mock.assert_async().await;
        assert_eq!(result, DeliveryResult::Failed);
        assert!(!sender.is_disabled());
    }

    #[tokio::test]
    async fn unauthorized_disables_sender() {
        let mut server = mockito::Server::new_async().await;
        let bulk = server
            .mock("POST", "/bulk")
            .with_status(401)
            .expect(1)
            .create_async()
            .await;
        let diagnostic = server
            .mock("POST", "/diagnostic")
            .expect(0)
            .create_async()
            .await;

        let sender = sender(&test_config(&server.url()));
        assert_eq!(
            sender.send_events(b"[]".to_vec(), "payload-1").await,
            DeliveryResult::Unauthorized
        );
        assert!(sender.is_disabled());
        assert_eq!(
            sender.send_diagnostic(b"{}".to_vec()).await,
            DeliveryResult::Unauthorized
        );

        bulk.assert_async().await;
        diagnostic.assert_async().await;
    }

    #[tokio::test]
    async fn diagnostic_payload_has_no_payload_id() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/diagnostic")
            .match_header("authorization", "sdk-key")
            .match_header("x-launchdarkly-payload-id", Matcher::Missing)
            .match_body(r#"{"kind":"diagnostic"}"#)
            .with_status(202)
            .create_async()
            .await;

        let sender = sender(&test_config(&server.url()));
        let result = sender
            .send_diagnostic(br#"{"kind":"diagnostic"}"#.to_vec())
            .await;

        mock.assert_async().await;
        assert!(matches!(result, DeliveryResult::Delivered { .. }));
    }
}
