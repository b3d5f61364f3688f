use std::fmt;
use std::time::Duration;

use fleet_core::{CategoryMeta, RetryPolicy};
use fleet_logging::{fleet_debug, fleet_trace, fleet_warn};
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Retry policy for network failures and unreadable replies.
    pub transport_retry: RetryPolicy,
    /// Retry policy for `keepGoing: false` replies.
    pub admission_retry: RetryPolicy,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
            transport_retry: RetryPolicy::unbounded(Duration::from_millis(500)),
            admission_retry: RetryPolicy::unbounded(Duration::from_millis(50)),
        }
    }
}

/// Body of `POST <pageWorkerURL>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    pub category: String,
    pub url: String,
    pub pages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_date: Option<String>,
    #[serde(default)]
    pub ignore_words: Vec<String>,
    #[serde(default)]
    pub filters: Vec<String>,
}

impl PageRequest {
    pub fn new(
        category: &str,
        page_base_url: &str,
        pages: Vec<String>,
        meta: &CategoryMeta,
    ) -> Self {
        Self {
            category: category.to_string(),
            url: format!("{page_base_url}{}", meta.category_number),
            pages,
            minimum_date: meta.minimum_date.clone(),
            ignore_words: meta.ignore_words.clone(),
            filters: meta.filters.clone(),
        }
    }
}

/// Body of `POST <itemWorkerURL>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemRequest {
    pub base_url: String,
    pub category: String,
    pub pcodes: Vec<String>,
}

/// Admission reply of both worker services.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdmissionReply {
    keep_going: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchReport {
    /// Requests sent, including the accepted one.
    pub attempts: u32,
    pub busy_retries: u32,
    pub transport_retries: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct DispatchError {
    pub kind: DispatchFailure,
    pub message: String,
}

impl DispatchError {
    pub(crate) fn new(kind: DispatchFailure, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchFailure {
    InvalidUrl,
    Serialize,
    Client,
    /// Only reachable with a bounded transport policy.
    TransportRetriesExhausted { attempts: u32 },
    /// Only reachable with a bounded admission policy.
    AdmissionRetriesExhausted { attempts: u32 },
}

impl fmt::Display for DispatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchFailure::InvalidUrl => write!(f, "invalid url"),
            DispatchFailure::Serialize => write!(f, "payload serialization failed"),
            DispatchFailure::Client => write!(f, "http client setup failed"),
            DispatchFailure::TransportRetriesExhausted { attempts } => {
                write!(f, "transport failed {attempts} times")
            }
            DispatchFailure::AdmissionRetriesExhausted { attempts } => {
                write!(f, "worker busy {attempts} times")
            }
        }
    }
}

/// Outbound call to a downstream worker service with cooperative backpressure.
#[async_trait::async_trait]
pub trait Dispatcher: Send + Sync {
    /// Deliver `payload` to `url`, retrying until the worker admits it.
    async fn dispatch(
        &self,
        url: &str,
        payload: &serde_json::Value,
    ) -> Result<DispatchReport, DispatchError>;
}

/// Serialize a typed request and hand it to `dispatcher`.
pub async fn dispatch_request<T: Serialize + Sync>(
    dispatcher: &dyn Dispatcher,
    url: &str,
    request: &T,
) -> Result<DispatchReport, DispatchError> {
    let payload = serde_json::to_value(request)
        .map_err(|err| DispatchError::new(DispatchFailure::Serialize, err.to_string()))?;
    dispatcher.dispatch(url, &payload).await
}

enum Attempt {
    Accepted,
    Busy,
    Transport(String),
}

#[derive(Debug, Clone)]
pub struct ReqwestDispatcher {
    client: reqwest::Client,
    settings: DispatchSettings,
}

impl ReqwestDispatcher {
    pub fn new(settings: DispatchSettings) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| DispatchError::new(DispatchFailure::Client, err.to_string()))?;
        Ok(Self { client, settings })
    }

    async fn attempt(&self, url: &reqwest::Url, body: &[u8]) -> Attempt {
        let response = match self
            .client
            .post(url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_vec())
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => return Attempt::Transport(err.to_string()),
        };

        let status = response.status();
        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(err) => return Attempt::Transport(err.to_string()),
        };

        match serde_json::from_slice::<AdmissionReply>(&bytes) {
            Ok(AdmissionReply { keep_going: true }) => Attempt::Accepted,
            Ok(AdmissionReply { keep_going: false }) => Attempt::Busy,
            Err(_) if status == StatusCode::SERVICE_UNAVAILABLE => Attempt::Busy,
            Err(err) => Attempt::Transport(format!("unreadable reply (status {status}): {err}")),
        }
    }
}

#[async_trait::async_trait]
impl Dispatcher for ReqwestDispatcher {
    async fn dispatch(
        &self,
        url: &str,
        payload: &serde_json::Value,
    ) -> Result<DispatchReport, DispatchError> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|err| DispatchError::new(DispatchFailure::InvalidUrl, err.to_string()))?;
        let body = serde_json::to_vec(payload)
            .map_err(|err| DispatchError::new(DispatchFailure::Serialize, err.to_string()))?;

        let transport = self.settings.transport_retry;
        let admission = self.settings.admission_retry;
        let started = Instant::now();
        let mut report = DispatchReport::default();

        loop {
            report.attempts += 1;
            match self.attempt(&parsed, &body).await {
                Attempt::Accepted => return Ok(report),
                Attempt::Busy => {
                    if !admission.allows_another(report.busy_retries + 1, started.elapsed()) {
                        return Err(DispatchError::new(
                            DispatchFailure::AdmissionRetriesExhausted {
                                attempts: report.busy_retries + 1,
                            },
                            format!("{url} kept answering keepGoing=false"),
                        ));
                    }
                    report.busy_retries += 1;
                    fleet_trace!("{} busy, retry #{}", url, report.busy_retries);
                    tokio::time::sleep(admission.delay).await;
                }
                Attempt::Transport(reason) => {
                    if !transport.allows_another(report.transport_retries + 1, started.elapsed()) {
                        return Err(DispatchError::new(
                            DispatchFailure::TransportRetriesExhausted {
                                attempts: report.transport_retries + 1,
                            },
                            reason,
                        ));
                    }
                    report.transport_retries += 1;
                    if report.transport_retries == 1 {
                        fleet_warn!("dispatch to {} failed: {}; retrying", url, reason);
                    } else {
                        fleet_debug!(
                            "dispatch to {} failed again (#{}): {}",
                            url,
                            report.transport_retries,
                            reason
                        );
                    }
                    tokio::time::sleep(transport.delay).await;
                }
            }
        }
    }
}
