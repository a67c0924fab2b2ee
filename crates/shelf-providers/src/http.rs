// SPDX-License-Identifier: MIT OR Apache-2.0
//! HTTP backend abstraction for provider clients.
//!
//! Clients hold an `Arc<dyn HttpBackend>` so tests can inject stub
//! transports. The production backend wraps reqwest; the per-call
//! deadline is enforced here so every client gets identical timeout
//! semantics. Backends never retry; retry is the caller's policy.

use crate::error::{ErrorKind, ProviderError};
use async_trait::async_trait;
use shelf_core::ProviderId;
use std::time::Duration;
use url::Url;

/// A provider response: status, body, and the parsed `Retry-After`.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Raw body bytes.
    pub body: Vec<u8>,
    /// `Retry-After` header in whole seconds, when present.
    pub retry_after_s: Option<u64>,
}

impl HttpResponse {
    /// Decode the body as JSON after classifying the status.
    ///
    /// # Errors
    ///
    /// Status-derived [`ProviderError`]s for non-2xx, and
    /// [`ErrorKind::InvalidResponse`] when the body fails to decode.
    pub fn decode<T: serde::de::DeserializeOwned>(
        self,
        provider: ProviderId,
        operation: &'static str,
    ) -> Result<T, ProviderError> {
        if let Some(err) =
            ProviderError::from_status(provider, operation, self.status, self.retry_after_s)
        {
            return Err(err);
        }
        serde_json::from_slice(&self.body).map_err(|e| {
            ProviderError::new(
                provider,
                operation,
                ErrorKind::InvalidResponse,
                format!("body decode failed: {e}"),
            )
        })
    }
}

/// Transport seam for provider clients.
#[async_trait]
pub trait HttpBackend: Send + Sync {
    /// GET `url` with `headers`, failing after `deadline`.
    async fn get(
        &self,
        url: &Url,
        headers: &[(&'static str, String)],
        deadline: Duration,
    ) -> Result<HttpResponse, (ErrorKind, String)>;

    /// POST a JSON `body` to `url`, failing after `deadline`.
    async fn post_json(
        &self,
        url: &Url,
        body: &serde_json::Value,
        headers: &[(&'static str, String)],
        deadline: Duration,
    ) -> Result<HttpResponse, (ErrorKind, String)>;
}

/// Production backend over a shared reqwest client.
pub struct ReqwestBackend {
    client: reqwest::Client,
}

impl ReqwestBackend {
    /// Build a backend. Deadlines are per call, so the underlying client
    /// carries no ambient timeout.
    ///
    /// # Errors
    ///
    /// Returns the reqwest builder error when TLS initialisation fails.
    pub fn new() -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
        })
    }

    async fn execute(
        &self,
        request: reqwest::RequestBuilder,
        deadline: Duration,
    ) -> Result<HttpResponse, (ErrorKind, String)> {
        let send = async {
            let response = request.send().await.map_err(classify_reqwest_error)?;
            let status = response.status().as_u16();
            let retry_after_s = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let body = response
                .bytes()
                .await
                .map_err(classify_reqwest_error)?
                .to_vec();
            Ok(HttpResponse {
                status,
                body,
                retry_after_s,
            })
        };

        match tokio::time::timeout(deadline, send).await {
            Ok(result) => result,
            Err(_) => Err((
                ErrorKind::Timeout,
                format!("deadline of {} ms elapsed", deadline.as_millis()),
            )),
        }
    }
}

#[async_trait]
impl HttpBackend for ReqwestBackend {
    async fn get(
        &self,
        url: &Url,
        headers: &[(&'static str, String)],
        deadline: Duration,
    ) -> Result<HttpResponse, (ErrorKind, String)> {
        let mut request = self.client.get(url.as_str());
        for (name, value) in headers {
            request = request.header(*name, value);
        }
        self.execute(request, deadline).await
    }

    async fn post_json(
        &self,
        url: &Url,
        body: &serde_json::Value,
        headers: &[(&'static str, String)],
        deadline: Duration,
    ) -> Result<HttpResponse, (ErrorKind, String)> {
        let mut request = self.client.post(url.as_str()).json(body);
        for (name, value) in headers {
            request = request.header(*name, value);
        }
        self.execute(request, deadline).await
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> (ErrorKind, String) {
    let kind = if err.is_timeout() {
        ErrorKind::Timeout
    } else {
        ErrorKind::Transport
    };
    // `without_url` keeps query-string secrets (API keys) out of messages.
    (kind, err.without_url().to_string())
}

/// Convert a backend transport error into a [`ProviderError`].
pub(crate) fn transport_error(
    provider: ProviderId,
    operation: &'static str,
    (kind, message): (ErrorKind, String),
) -> ProviderError {
    ProviderError::new(provider, operation, kind, message)
}
