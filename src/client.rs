//! HTTP client wrapper for metadata requests.

use std::future::Future;
use std::time::Duration;

use reqwest::{Client, Method, Response};
use tracing::debug;

use crate::config::RetryPolicy;
use crate::error::CloudError;

/// HTTP client wrapper for metadata service requests.
///
/// Transport failures are retried according to the client's [`RetryPolicy`];
/// HTTP-level errors are returned immediately.
#[derive(Debug, Clone)]
pub struct MetadataClient {
    inner: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl MetadataClient {
    /// Create a new metadata client with the specified timeout, base URL and retry policy.
    pub fn new(timeout: Duration, base_url: &str, retry: RetryPolicy) -> Result<Self, CloudError> {
        let inner = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(false)
            .build()?;
        Ok(Self {
            inner,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry,
        })
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a request, retrying transport failures, and map HTTP errors.
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<Response, CloudError> {
        let response = with_retry(&self.retry, url, || {
            let mut request = self.inner.request(method.clone(), url);
            for (name, value) in headers {
                request = request.header(*name, *value);
            }
            async move { request.send().await.map_err(transport_error) }
        })
        .await?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(CloudError::MetadataNotFound);
        }
        if !status.is_success() {
            return Err(CloudError::Http(status.as_u16()));
        }
        Ok(response)
    }

    /// GET `url` and return the raw body.
    pub async fn fetch(&self, url: &str, headers: &[(&str, &str)]) -> Result<Vec<u8>, CloudError> {
        let response = self.send(Method::GET, url, headers).await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// GET `url` and return the body as UTF-8 text.
    pub async fn fetch_text(&self, url: &str, headers: &[(&str, &str)]) -> Result<String, CloudError> {
        let body = self.fetch(url, headers).await?;
        String::from_utf8(body).map_err(|_| CloudError::Utf8)
    }

    /// GET `url` and return the body, failing if it exceeds `max_size`.
    pub async fn fetch_limited(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        max_size: Option<usize>,
    ) -> Result<Vec<u8>, CloudError> {
        let response = self.send(Method::GET, url, headers).await?;
        read_body_limited(response, max_size).await
    }
}

fn transport_error(err: reqwest::Error) -> CloudError {
    if err.is_timeout() {
        CloudError::Timeout
    } else {
        CloudError::Request(err)
    }
}

/// Run `op` until it succeeds, fails with a non-transport error, or the
/// policy's attempt budget is spent.
///
/// Exhausting the budget yields [`CloudError::Unreachable`] wrapping the last
/// transport error.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    url: &str,
    mut op: F,
) -> Result<T, CloudError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CloudError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transport() => {
                if attempt >= max_attempts {
                    return Err(CloudError::Unreachable {
                        url: url.to_string(),
                        attempts: attempt,
                        source: Box::new(err),
                    });
                }
                debug!(%url, attempt, max_attempts, error = %err, "metadata request failed, retrying");
                tokio::time::sleep(policy.backoff).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Read response body with an optional size limit.
///
/// If `max_size` is `Some`, this will:
/// 1. Check the `Content-Length` header and fail early if it exceeds the limit
/// 2. Read the body with a pre-allocated capped buffer, aborting immediately if exceeded
pub async fn read_body_limited(
    response: Response,
    max_size: Option<usize>,
) -> Result<Vec<u8>, CloudError> {
    let Some(max_size) = max_size else {
        return Ok(response.bytes().await?.to_vec());
    };

    if let Some(content_length) = response.content_length() {
        if content_length as usize > max_size {
            return Err(CloudError::TooLarge(content_length as usize, max_size));
        }
    }

    let capacity = response
        .content_length()
        .map(|cl| (cl as usize).min(max_size))
        .unwrap_or(max_size.min(8192));
    let mut body = Vec::with_capacity(capacity);
    let mut total_read = 0usize;

    let mut stream = response;
    while let Some(chunk) = stream.chunk().await? {
        if total_read.saturating_add(chunk.len()) > max_size {
            return Err(CloudError::TooLarge(
                total_read.saturating_add(chunk.len()),
                max_size,
            ));
        }
        total_read += chunk.len();
        body.extend_from_slice(&chunk);
    }

    Ok(body)
}
