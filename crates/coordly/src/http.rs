// HTTP JSON fetcher for the coordinator.
//
// Classifies transport and status failures into `FetchError` so the
// coordinator can tell rejected credentials from a flaky network.

use std::time::Duration;

use coordly_core::{Fetch, FetchError};
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::trace;
use url::Url;

const USER_AGENT: &str = concat!("coordly/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Fetches one JSON document per refresh.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    url: Url,
    token: Option<SecretString>,
}

impl HttpFetcher {
    pub fn new(url: Url, token: Option<SecretString>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client, url, token })
    }

    pub async fn get(&self) -> Result<Value, FetchError> {
        let mut request = self.client.get(self.url.clone());
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await.map_err(classify_transport)?;
        let status = response.status();
        trace!(url = %self.url, %status, "response received");
        if !status.is_success() {
            return Err(classify_status(status, response.headers()));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| FetchError::unknown(format!("invalid JSON body: {e}")))
    }
}

impl Fetch<Value> for HttpFetcher {
    fn fetch(&self) -> futures_util::future::BoxFuture<'static, Result<Value, FetchError>> {
        let this = self.clone();
        Box::pin(async move { this.get().await })
    }
}

/// Map a non-success status to a fetch error.
pub fn classify_status(status: StatusCode, headers: &HeaderMap) -> FetchError {
    let reason = format!("HTTP {status}");
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FetchError::auth_required(reason),
        StatusCode::TOO_MANY_REQUESTS => {
            let err = FetchError::unavailable(reason);
            match retry_after(headers) {
                Some(delay) => err.with_retry_after(delay),
                None => err,
            }
        }
        StatusCode::REQUEST_TIMEOUT => FetchError::unavailable(reason),
        s if s.is_server_error() => FetchError::unavailable(reason),
        _ => FetchError::unknown(reason),
    }
}

fn classify_transport(err: reqwest::Error) -> FetchError {
    if err.is_timeout() || err.is_connect() {
        FetchError::unavailable(err.to_string())
    } else {
        FetchError::unknown(err.to_string())
    }
}

/// `Retry-After` in delta-seconds form.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use coordly_core::ErrorKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    // ── Helpers ─────────────────────────────────────────────────────

    fn fetcher_for(server: &MockServer, token: Option<&str>) -> HttpFetcher {
        let url = Url::parse(&format!("{}/status", server.uri())).unwrap();
        HttpFetcher::new(url, token.map(|t| SecretString::from(t.to_owned()))).unwrap()
    }

    async fn respond(template: ResponseTemplate) -> Result<Value, FetchError> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(template)
            .mount(&server)
            .await;
        fetcher_for(&server, None).get().await
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn returns_the_json_body() {
        let body = respond(ResponseTemplate::new(200).set_body_json(json!({ "power": 12.5 })))
            .await
            .unwrap();
        assert_eq!(body, json!({ "power": 12.5 }));
    }

    #[tokio::test]
    async fn sends_the_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("authorization", "Bearer s3cret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
            .expect(1)
            .mount(&server)
            .await;

        let body = fetcher_for(&server, Some("s3cret")).get().await.unwrap();
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn rejected_credentials_require_auth() {
        let err = respond(ResponseTemplate::new(401)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthRequired);

        let err = respond(ResponseTemplate::new(403)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthRequired);
    }

    #[tokio::test]
    async fn rate_limit_carries_retry_after() {
        let err = respond(ResponseTemplate::new(429).insert_header("Retry-After", "120"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(120)));
    }

    #[tokio::test]
    async fn server_errors_are_transient() {
        let err = respond(ResponseTemplate::new(503)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert_eq!(err.retry_after(), None);
    }

    #[tokio::test]
    async fn other_statuses_and_bad_bodies_are_unknown() {
        let err = respond(ResponseTemplate::new(404)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unknown);

        let err = respond(ResponseTemplate::new(200).set_body_string("<html>"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unknown);
    }

    #[tokio::test]
    async fn unreachable_host_is_transient() {
        // Port 9 (discard) is closed on any sane test host.
        let url = Url::parse("http://127.0.0.1:9/status").unwrap();
        let err = HttpFetcher::new(url, None).unwrap().get().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
    }
}
