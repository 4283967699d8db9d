//! Privileged fetch adapter
//!
//! The host's cross-origin request capability is injected as a
//! [`FetchCapability`] so tests can swap in a scripted double. Everything
//! else in the crate talks to the network through [`FetchAdapter`].

use crate::config::RenderConfig;
use crate::logging;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// What the caller wants the response body as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseKind {
    Text,
    Binary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<String>,
    pub headers: Vec<(String, String)>,
    pub response_kind: ResponseKind,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>, response_kind: ResponseKind) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            body: None,
            headers: Vec::new(),
            response_kind,
        }
    }

    pub fn post(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            body: Some(body.into()),
            headers: Vec::new(),
            response_kind: ResponseKind::Text,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchBody {
    Text(String),
    Binary(Vec<u8>),
}

impl FetchBody {
    pub fn into_text(self) -> String {
        match self {
            FetchBody::Text(text) => text,
            FetchBody::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            FetchBody::Text(text) => text.into_bytes(),
            FetchBody::Binary(bytes) => bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Non-2xx answer; the raw body is kept for callers that mine it
    #[error("Request failed: {code}\n{body}")]
    Status { code: u16, body: String },
    #[error("Network error: {0}")]
    Transport(String),
    #[error("Request timed out")]
    Timeout,
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// Cross-origin request capability provided by the host
#[async_trait]
pub trait FetchCapability: Send + Sync {
    async fn request(&self, request: FetchRequest) -> Result<FetchBody, FetchError>;
}

/// Single async call contract over the host capability
#[derive(Clone)]
pub struct FetchAdapter {
    capability: Arc<dyn FetchCapability>,
}

impl FetchAdapter {
    pub fn new(capability: Arc<dyn FetchCapability>) -> Self {
        Self { capability }
    }

    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchBody, FetchError> {
        let method = request.method;
        let url = request.url.clone();
        let result = self.capability.request(request).await;
        match &result {
            Ok(FetchBody::Text(text)) => {
                logging::request(method.as_str(), &url, &format!("{} chars", text.len()))
            }
            Ok(FetchBody::Binary(bytes)) => {
                logging::request(method.as_str(), &url, &format!("{} bytes", bytes.len()))
            }
            Err(e) => logging::request(method.as_str(), &url, &e.to_string()),
        }
        result
    }

    pub async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        self.fetch(FetchRequest::get(url, ResponseKind::Text))
            .await
            .map(FetchBody::into_text)
    }

    pub async fn get_binary(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.fetch(FetchRequest::get(url, ResponseKind::Binary))
            .await
            .map(FetchBody::into_bytes)
    }

    /// POST a text body and read the answer as text
    pub async fn post_text(&self, request: FetchRequest) -> Result<String, FetchError> {
        self.fetch(request).await.map(FetchBody::into_text)
    }
}

/// Real network access through reqwest
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent(config.user_agent.clone())
                .build()
                .unwrap_or_default(),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
        }
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else if e.is_builder() {
        FetchError::InvalidUrl(e.to_string())
    } else {
        FetchError::Transport(e.to_string())
    }
}

#[async_trait]
impl FetchCapability for HttpFetcher {
    async fn request(&self, request: FetchRequest) -> Result<FetchBody, FetchError> {
        let url = reqwest::Url::parse(&request.url)
            .map_err(|e| FetchError::InvalidUrl(format!("{}: {}", request.url, e)))?;

        let mut builder = match request.method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
        }
        .timeout(self.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(classify_reqwest_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                code: status.as_u16(),
                body,
            });
        }

        match request.response_kind {
            ResponseKind::Text => response
                .text()
                .await
                .map(FetchBody::Text)
                .map_err(classify_reqwest_error),
            ResponseKind::Binary => response
                .bytes()
                .await
                .map(|b| FetchBody::Binary(b.to_vec()))
                .map_err(classify_reqwest_error),
        }
    }
}
