use crate::CancellableFuture;
use serde::Serialize;
use serde_json::Value;

/// HTTP-style request verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

/// A request built by a [`RemoteAccessor`](super::RemoteAccessor) adapter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl TransportRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            query: Vec::new(),
            body: Some(body),
        }
    }

    /// Append a query parameter.
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// Moves requests to a backend and returns the decoded JSON body.
///
/// A missing resource resolves to `Value::Null`; any other failure rejects
/// with [`Error::Transport`](crate::Error::Transport).
pub trait Transport: Send + Sync {
    fn send(&self, request: TransportRequest) -> CancellableFuture<Value>;
}

#[cfg(feature = "reqwest")]
mod http {
    use super::{Method, Transport, TransportRequest};
    use crate::{CancellableFuture, Error};
    use serde_json::Value;
    use tracing::debug;

    /// [`Transport`] over a shared `reqwest` client.
    #[derive(Debug, Clone, Default)]
    pub struct ReqwestTransport {
        client: reqwest::Client,
    }

    impl ReqwestTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_client(client: reqwest::Client) -> Self {
            Self { client }
        }
    }

    impl Transport for ReqwestTransport {
        fn send(&self, request: TransportRequest) -> CancellableFuture<Value> {
            let client = self.client.clone();
            CancellableFuture::new(async move {
                let method = match request.method {
                    Method::Get => reqwest::Method::GET,
                    Method::Post => reqwest::Method::POST,
                    Method::Put => reqwest::Method::PUT,
                    Method::Patch => reqwest::Method::PATCH,
                    Method::Delete => reqwest::Method::DELETE,
                };
                debug!(method = %method, url = %request.url, "sending request");

                let mut builder = client.request(method, &request.url);
                if !request.query.is_empty() {
                    builder = builder.query(&request.query);
                }
                if let Some(body) = &request.body {
                    builder = builder.json(body);
                }

                let response = builder
                    .send()
                    .await
                    .map_err(|e| Error::Transport(e.to_string()))?;

                let status = response.status();
                if status == reqwest::StatusCode::NOT_FOUND {
                    return Ok(Value::Null);
                }
                if !status.is_success() {
                    let text = response.text().await.unwrap_or_default();
                    return Err(Error::Transport(format!("{status}: {text}")));
                }

                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| Error::Transport(e.to_string()))?;
                if bytes.is_empty() {
                    return Ok(Value::Null);
                }
                serde_json::from_slice(&bytes).map_err(|e| Error::InvalidResponse(e.to_string()))
            })
        }
    }
}

#[cfg(feature = "reqwest")]
pub use http::ReqwestTransport;
