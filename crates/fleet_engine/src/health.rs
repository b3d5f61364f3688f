use std::time::Duration;

use fleet_logging::fleet_info;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum HealthCheckError {
    #[error("proxy url '{url}' is invalid: {reason}")]
    InvalidProxy { url: String, reason: String },
    #[error("probe url '{url}' is invalid: {reason}")]
    InvalidProbe { url: String, reason: String },
    #[error("proxy is down: {0}")]
    Unreachable(String),
    #[error("probe through proxy answered {0}")]
    Status(u16),
}

/// Probe that must succeed through the outbound proxy before a production run.
#[derive(Debug, Clone)]
pub struct ProxyHealthCheck {
    pub proxy_url: String,
    pub probe_url: String,
    pub timeout: Duration,
}

impl ProxyHealthCheck {
    pub fn new(proxy_url: impl Into<String>, probe_url: impl Into<String>) -> Self {
        Self {
            proxy_url: proxy_url.into(),
            probe_url: probe_url.into(),
            timeout: Duration::from_secs(10),
        }
    }

    pub async fn check(&self) -> Result<(), HealthCheckError> {
        let probe = Url::parse(&self.probe_url).map_err(|err| HealthCheckError::InvalidProbe {
            url: self.probe_url.clone(),
            reason: err.to_string(),
        })?;
        let proxy = reqwest::Proxy::all(&self.proxy_url).map_err(|err| {
            HealthCheckError::InvalidProxy {
                url: self.proxy_url.clone(),
                reason: err.to_string(),
            }
        })?;
        let client = reqwest::Client::builder()
            .proxy(proxy)
            .timeout(self.timeout)
            .build()
            .map_err(|err| HealthCheckError::Unreachable(err.to_string()))?;

        let response = client
            .get(probe)
            .send()
            .await
            .map_err(|err| HealthCheckError::Unreachable(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(HealthCheckError::Status(status.as_u16()));
        }
        fleet_info!("[Startup] proxy {} is up", self.proxy_url);
        Ok(())
    }
}
