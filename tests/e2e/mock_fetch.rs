//! Mock fetch capability for e2e tests
//!
//! Answers requests from per-URL routes or, failing that, from a queue of
//! scripted responses. Every request is logged for later inspection.

use async_trait::async_trait;
use chatrender::fetch::{FetchBody, FetchCapability, FetchError, FetchRequest, Method};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct LoggedRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<String>,
    pub headers: Vec<(String, String)>,
}

pub struct MockFetcher {
    routes: Mutex<HashMap<String, Result<FetchBody, FetchError>>>,
    delays: Mutex<HashMap<String, Duration>>,
    queue: Mutex<VecDeque<Result<FetchBody, FetchError>>>,
    log: Mutex<Vec<LoggedRequest>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            delays: Mutex::new(HashMap::new()),
            queue: Mutex::new(VecDeque::new()),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Always answer `url` with this text
    pub fn route_text(&self, url: &str, text: &str) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), Ok(FetchBody::Text(text.to_string())));
    }

    pub fn route_bytes(&self, url: &str, bytes: &[u8]) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), Ok(FetchBody::Binary(bytes.to_vec())));
    }

    pub fn route_error(&self, url: &str, error: FetchError) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), Err(error));
    }

    /// Hold the answer for `url` back by `delay`
    pub fn delay(&self, url: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(url.to_string(), delay);
    }

    /// Answer for the next request that has no route
    pub fn queue_response(&self, response: Result<FetchBody, FetchError>) {
        self.queue.lock().unwrap().push_back(response);
    }

    pub fn requests(&self) -> Vec<LoggedRequest> {
        self.log.lock().unwrap().clone()
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.log.lock().unwrap().iter().filter(|r| r.url == url).count()
    }
}

#[async_trait]
impl FetchCapability for MockFetcher {
    async fn request(&self, request: FetchRequest) -> Result<FetchBody, FetchError> {
        self.log.lock().unwrap().push(LoggedRequest {
            method: request.method,
            url: request.url.clone(),
            body: request.body.clone(),
            headers: request.headers.clone(),
        });

        let delay = self.delays.lock().unwrap().get(&request.url).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let routed = self
            .routes
            .lock()
            .unwrap()
            .get(&request.url)
            .cloned();
        if let Some(response) = routed {
            return response;
        }

        self.queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(FetchError::Transport(format!("no mock for {}", request.url))))
    }
}
