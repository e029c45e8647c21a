//! Test doubles shared by the unit tests

use crate::error::{FetchError, FetchResult};
use crate::network::{FetchMode, Fetcher};
use crate::types::ImageResponse;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::Semaphore;

#[derive(Clone)]
pub(crate) enum Reply {
    Image(&'static [u8]),
    Status(u16),
    Cors,
}

/// Scripted fetcher that counts calls and can hold fetches until released
pub(crate) struct StubFetcher {
    replies: Mutex<HashMap<String, Reply>>,
    calls: Mutex<HashMap<String, usize>>,
    total: AtomicUsize,
    gate: Option<Semaphore>,
}

impl StubFetcher {
    pub(crate) fn new() -> Self {
        Self {
            replies: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            total: AtomicUsize::new(0),
            gate: None,
        }
    }

    /// Every fetch waits for a permit from [`StubFetcher::release`]
    pub(crate) fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new()
        }
    }

    pub(crate) fn reply(self, url: &str, reply: Reply) -> Self {
        self.replies.lock().unwrap().insert(url.to_string(), reply);
        self
    }

    pub(crate) fn release(&self, permits: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(permits);
        }
    }

    pub(crate) fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(&self, url: &str, _mode: FetchMode) -> FetchResult<ImageResponse> {
        self.total.fetch_add(1, Ordering::SeqCst);
        *self.calls.lock().unwrap().entry(url.to_string()).or_default() += 1;

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }

        let reply = self.replies.lock().unwrap().get(url).cloned();
        match reply {
            Some(Reply::Image(body)) => Ok(ImageResponse::new(
                200,
                vec![("content-type".to_string(), "image/jpeg".to_string())],
                body,
            )),
            Some(Reply::Status(status)) => Ok(ImageResponse::new(status, Vec::new(), &b""[..])),
            Some(Reply::Cors) | None => Err(FetchError::CorsRejected(format!(
                "{url} sent no Access-Control-Allow-Origin"
            ))),
        }
    }
}
