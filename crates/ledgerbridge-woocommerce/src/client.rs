use ledgerbridge::Result;
use ledgerbridge_api::SyncError;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{RequestBuilder, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, error};

/// Longest response body quoted in an error message.
const ERROR_BODY_LIMIT: usize = 500;

/// JSON-over-HTTP access to one REST namespace of a WordPress site
/// (`wp-json/wc/v3` or `wp-json/wp/v2`), authenticated with HTTP basic auth.
pub struct RestClient {
    base_url: String,
    user: String,
    secret: String,
    client: reqwest::Client,
}

impl RestClient {
    pub fn new(
        site_url: &str,
        namespace: &str,
        user: &str,
        secret: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            base_url: format!(
                "{}/wp-json/{}",
                site_url.trim_end_matches('/'),
                namespace.trim_matches('/')
            ),
            user: user.to_string(),
            secret: secret.to_string(),
            client,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// `None` when the resource does not exist.
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>> {
        let url = self.url(path);
        let request = self.client.get(&url).query(query);
        match self.execute(request, &url, "fetch").await? {
            Some(body) => parse(&body, &url).map(Some),
            None => Ok(None),
        }
    }

    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = self.url(path);
        let request = self.client.post(&url).json(body);
        let body = self
            .execute(request, &url, "create")
            .await?
            .ok_or_else(|| SyncError::not_found("Remote endpoint", url.clone()))?;
        parse(&body, &url)
    }

    pub async fn put<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = self.url(path);
        let request = self.client.put(&url).json(body);
        let body = self
            .execute(request, &url, "update")
            .await?
            .ok_or_else(|| SyncError::not_found("Remote record", url.clone()))?;
        parse(&body, &url)
    }

    pub async fn post_multipart<T: DeserializeOwned>(
        &self,
        path: &str,
        form: reqwest::multipart::Form,
    ) -> Result<T> {
        let url = self.url(path);
        let request = self.client.post(&url).multipart(form);
        let body = self
            .execute(request, &url, "upload")
            .await?
            .ok_or_else(|| SyncError::not_found("Remote endpoint", url.clone()))?;
        parse(&body, &url)
    }

    /// Deleting something already gone is not an error.
    pub async fn delete(&self, path: &str, query: &[(&str, String)]) -> Result<()> {
        let url = self.url(path);
        let request = self.client.delete(&url).query(query);
        self.execute(request, &url, "delete").await?;
        Ok(())
    }

    async fn execute(
        &self,
        request: RequestBuilder,
        url: &str,
        operation: &str,
    ) -> Result<Option<String>> {
        debug!("[WooCommerceClient] {} {}", operation, url);
        let response = request
            .headers(trace_headers())
            .basic_auth(&self.user, Some(&self.secret))
            .send()
            .await
            .map_err(|e| {
                let error = transport_error(e, url, operation);
                error!("[WooCommerceClient] {}", error);
                error
            })?;
        handle_response(response, url).await
    }
}

/// Injects the current trace context so remote logs can be correlated with
/// the cycle that caused the call.
fn trace_headers() -> HeaderMap {
    use opentelemetry::Context;
    use opentelemetry::global;

    struct HeaderInjector {
        headers: HeaderMap,
    }
    impl opentelemetry::propagation::Injector for HeaderInjector {
        fn set(&mut self, key: &str, value: String) {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(key.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                self.headers.insert(name, value);
            }
        }
    }

    let mut injector = HeaderInjector {
        headers: HeaderMap::new(),
    };
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(&Context::current(), &mut injector);
    });
    injector.headers
}

fn transport_error(e: reqwest::Error, url: &str, operation: &str) -> SyncError {
    let detail = if e.is_timeout() {
        "timeout - request took too long".to_string()
    } else if e.is_connect() {
        format!("connection error - check network and DNS. Error: {}", e)
    } else if e.is_request() {
        format!("request error - malformed URL or parameters. Error: {}", e)
    } else {
        e.to_string()
    };
    SyncError::remote(format!("Failed to {} {}: {}", operation, url, detail))
}

pub(crate) fn truncate_body(body: &str) -> String {
    if body.chars().count() > ERROR_BODY_LIMIT {
        let head: String = body.chars().take(ERROR_BODY_LIMIT).collect();
        format!("{}... (truncated)", head)
    } else {
        body.to_string()
    }
}

/// Maps an HTTP status onto the error taxonomy: 404 is an absent record,
/// 400 a rejected payload, 401/403 bad credentials, anything else a remote
/// outage worth retrying.
pub(crate) fn status_error(status: StatusCode, url: &str, body: &str) -> Option<SyncError> {
    if status.is_success() || status == StatusCode::NOT_FOUND {
        return None;
    }
    let message = format!("HTTP {} from {}: {}", status.as_u16(), url, truncate_body(body));
    Some(match status {
        StatusCode::BAD_REQUEST => SyncError::invalid(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SyncError::config(message),
        _ => SyncError::remote(message),
    })
}

async fn handle_response(response: reqwest::Response, url: &str) -> Result<Option<String>> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| SyncError::remote(format!("Failed to read response body from {}: {}", url, e)))?;

    if let Some(error) = status_error(status, url, &body) {
        error!("[WooCommerceClient] {}", error);
        return Err(error);
    }
    if status == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    Ok(Some(body))
}

fn parse<T: DeserializeOwned>(body: &str, url: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|e| {
        SyncError::remote(format!(
            "Unexpected response from {}: {} - body: {}",
            url,
            e,
            truncate_body(body)
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_namespace_and_path() {
        let client = RestClient::new(
            "https://shop.example.com/",
            "/wc/v3/",
            "ck",
            "cs",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            client.url("/products/7"),
            "https://shop.example.com/wp-json/wc/v3/products/7"
        );
    }

    #[test]
    fn test_status_mapping() {
        let url = "https://shop.example.com/wp-json/wc/v3/orders";
        assert!(status_error(StatusCode::OK, url, "").is_none());
        assert!(status_error(StatusCode::NOT_FOUND, url, "").is_none());
        assert!(matches!(
            status_error(StatusCode::BAD_REQUEST, url, "bad"),
            Some(SyncError::InvalidInput { .. })
        ));
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, url, ""),
            Some(SyncError::Config { .. })
        ));
        let outage = status_error(StatusCode::BAD_GATEWAY, url, "").unwrap();
        assert!(outage.is_retryable());
    }

    #[test]
    fn test_long_bodies_are_truncated_on_char_boundaries() {
        let body = "é".repeat(600);
        let truncated = truncate_body(&body);
        assert!(truncated.ends_with("... (truncated)"));
        assert_eq!(truncated.chars().filter(|c| *c == 'é').count(), 500);
        assert_eq!(truncate_body("short"), "short");
    }
}
