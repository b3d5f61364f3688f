use fleet_engine::{HealthCheckError, ProxyHealthCheck};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

const STATUS_URL: &str = "http://probe.internal/proxyStatus";

// The mock server plays the proxy: plain HTTP requests arrive in absolute form.
async fn proxy_answering(status: u16) -> MockServer {
    let proxy = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(status))
        .expect(1)
        .mount(&proxy)
        .await;
    proxy
}

#[tokio::test]
async fn healthy_proxy_passes() {
    let proxy = proxy_answering(200).await;

    ProxyHealthCheck::new(proxy.uri(), STATUS_URL)
        .check()
        .await
        .unwrap();
}

#[tokio::test]
async fn rejected_status_request_reports_the_code() {
    let proxy = proxy_answering(403).await;

    let err = ProxyHealthCheck::new(proxy.uri(), STATUS_URL)
        .check()
        .await
        .unwrap_err();

    assert!(matches!(err, HealthCheckError::Status(403)));
}

#[tokio::test]
async fn unreachable_proxy_is_down() {
    let err = ProxyHealthCheck::new("http://127.0.0.1:1", STATUS_URL)
        .check()
        .await
        .unwrap_err();

    assert!(matches!(err, HealthCheckError::Unreachable(_)));
    assert!(err.to_string().starts_with("proxy is down"));
}

#[tokio::test]
async fn invalid_status_url_is_rejected_before_any_request() {
    let proxy = MockServer::start().await;

    let err = ProxyHealthCheck::new(proxy.uri(), "not a url")
        .check()
        .await
        .unwrap_err();

    assert!(matches!(err, HealthCheckError::InvalidProbe { ref url, .. } if url == "not a url"));
    assert!(proxy.received_requests().await.unwrap().is_empty());
}
