//! In-memory doubles for the pipeline's external seams. Compiled for tests
//! and for the `test-support` feature only.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::capture::{CaptureAgent, CaptureSession, CapturedPage};
use crate::oracle::{ExtractionOracle, OracleError};
use crate::transport::{StreamMessage, StreamTransport};

// --- Capture agent double ---

#[derive(Default, Clone)]
pub struct MockCaptureAgent {
    pages: HashMap<String, CapturedPage>,
    failing: HashSet<String>,
    closed: Arc<AtomicBool>,
}

impl MockCaptureAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_page(mut self, url: &str, html: &str, title: &str) -> Self {
        self.pages.insert(
            url.to_string(),
            CapturedPage {
                html: html.to_string(),
                title: title.to_string(),
            },
        );
        self
    }

    pub fn failing(mut self, url: &str) -> Self {
        self.failing.insert(url.to_string());
        self
    }

    pub fn session_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptureAgent for MockCaptureAgent {
    async fn open_session(&self) -> Result<Box<dyn CaptureSession>> {
        Ok(Box::new(MockSession {
            pages: self.pages.clone(),
            failing: self.failing.clone(),
            closed: self.closed.clone(),
        }))
    }
}

struct MockSession {
    pages: HashMap<String, CapturedPage>,
    failing: HashSet<String>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl CaptureSession for MockSession {
    async fn fetch(&self, url: &str) -> Result<CapturedPage> {
        if self.failing.contains(url) {
            return Err(anyhow!("simulated navigation failure for {url}"));
        }
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("no scripted page for {url}"))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// --- Stream transport double ---

/// In-memory transport. Published messages land in a per-topic queue and in
/// an append-only log; polls pop from subscribed topics in FIFO order.
#[derive(Default)]
pub struct MemoryTransport {
    subscriptions: Vec<String>,
    queues: Mutex<HashMap<String, VecDeque<StreamMessage>>>,
    log: Mutex<Vec<StreamMessage>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_subscription(mut self, topics: &[&str]) -> Self {
        self.subscriptions = topics.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Everything ever published to `topic`, regardless of consumption.
    pub fn published(&self, topic: &str) -> Vec<StreamMessage> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    fn pop_subscribed(&self) -> Option<StreamMessage> {
        let mut queues = self.queues.lock().unwrap();
        for topic in &self.subscriptions {
            if let Some(queue) = queues.get_mut(topic) {
                if let Some(msg) = queue.pop_front() {
                    return Some(msg);
                }
            }
        }
        None
    }
}

#[async_trait]
impl StreamTransport for MemoryTransport {
    async fn publish(&self, topic: &str, key: &str, value: &serde_json::Value) -> Result<()> {
        let msg = StreamMessage {
            topic: topic.to_string(),
            key: Some(key.to_string()),
            value: value.clone(),
        };
        self.log.lock().unwrap().push(msg.clone());
        self.queues
            .lock()
            .unwrap()
            .entry(topic.to_string())
            .or_default()
            .push_back(msg);
        Ok(())
    }

    async fn poll(&self, timeout: Duration) -> Result<Option<StreamMessage>> {
        if let Some(msg) = self.pop_subscribed() {
            return Ok(Some(msg));
        }
        // Mimic a blocking fetch: wait out the timeout before reporting empty
        tokio::time::sleep(timeout).await;
        Ok(self.pop_subscribed())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

// --- Oracle double ---

/// Oracle with a scripted queue of outcomes. Records the instant of each
/// call so tests can assert on retry spacing.
#[derive(Default)]
pub struct StubOracle {
    responses: Mutex<VecDeque<Result<String, OracleError>>>,
    calls: Mutex<Vec<tokio::time::Instant>>,
}

impl StubOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, text: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(text.to_string()));
        self
    }

    pub fn rate_limited(self) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(OracleError::RateLimited));
        self
    }

    pub fn fail(self, detail: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(OracleError::Failed(detail.to_string())));
        self
    }

    pub fn call_times(&self) -> Vec<tokio::time::Instant> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ExtractionOracle for StubOracle {
    async fn complete(&self, _prompt: &str) -> Result<String, OracleError> {
        self.calls.lock().unwrap().push(tokio::time::Instant::now());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(OracleError::Failed("no scripted response".to_string())))
    }

    fn model_id(&self) -> &str {
        "stub-model"
    }
}
