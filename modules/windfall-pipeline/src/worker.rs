use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use windfall_common::{CaptureRecord, Config, EnrichedOpportunity};

use crate::clean::{clean_page, CleanedPage, MIN_CONTENT_BYTES};
use crate::dedup::{DedupStats, DedupWindow};
use crate::oracle::{build_batch_prompt, complete_with_backoff, ExtractionOracle};
use crate::parse::{parse_candidates, validate};
use crate::transport::{StreamTransport, TOPIC_ENRICHED};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub batch_size: usize,
    pub batch_window: Duration,
    pub poll_timeout: Duration,
    pub page_content_max_bytes: usize,
    pub oracle_max_retries: u32,
    pub oracle_base_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 2,
            batch_window: Duration::from_secs(2),
            poll_timeout: Duration::from_millis(500),
            page_content_max_bytes: 50_000,
            oracle_max_retries: 3,
            oracle_base_delay: Duration::from_secs(10),
        }
    }
}

impl From<&Config> for WorkerConfig {
    fn from(config: &Config) -> Self {
        Self {
            batch_size: config.batch_size,
            batch_window: config.batch_window,
            poll_timeout: config.poll_timeout,
            page_content_max_bytes: config.page_content_max_bytes,
            oracle_max_retries: config.oracle_max_retries,
            oracle_base_delay: config.oracle_base_delay,
        }
    }
}

/// Consumes raw captures, batches them into oracle calls, validates and
/// deduplicates the candidates, and publishes the survivors.
///
/// Delivery is at-least-once end to end; the dedup window makes redelivered
/// captures approximately idempotent downstream.
pub struct ExtractionWorker {
    transport: Arc<dyn StreamTransport>,
    oracle: Arc<dyn ExtractionOracle>,
    dedup: DedupWindow,
    config: WorkerConfig,
}

impl ExtractionWorker {
    pub fn new(
        transport: Arc<dyn StreamTransport>,
        oracle: Arc<dyn ExtractionOracle>,
        dedup_window: Duration,
        config: WorkerConfig,
    ) -> Self {
        Self {
            transport,
            oracle,
            dedup: DedupWindow::new(dedup_window),
            config,
        }
    }

    /// Run until cancelled. Each iteration assembles one batch and processes
    /// it; an empty poll cycle just loops again.
    pub async fn run(&mut self, cancel: CancellationToken) {
        info!(
            batch_size = self.config.batch_size,
            batch_window_ms = self.config.batch_window.as_millis() as u64,
            "Extraction worker starting"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                emitted = self.tick() => {
                    if emitted > 0 {
                        debug!(emitted, "Batch cycle complete");
                    }
                }
            }
        }

        let stats = self.dedup.stats();
        info!(
            processed = stats.processed,
            dropped = stats.dropped,
            "Extraction worker stopping"
        );
        if let Err(e) = self.transport.close().await {
            warn!(error = %e, "Failed to close transport");
        }
    }

    /// One batch cycle: collect up to B records within the batch window,
    /// process them, return the number of opportunities emitted.
    pub async fn tick(&mut self) -> usize {
        let batch = self.collect_batch().await;
        if batch.is_empty() {
            return 0;
        }
        self.process_batch(&batch).await
    }

    /// Flush condition: B records buffered, or the batch window has elapsed
    /// with at least one record waiting. Malformed records are dropped with
    /// a warning and never poison the batch.
    async fn collect_batch(&mut self) -> Vec<CaptureRecord> {
        let mut batch = Vec::with_capacity(self.config.batch_size);
        let deadline = Instant::now() + self.config.batch_window;

        while batch.len() < self.config.batch_size && Instant::now() < deadline {
            match self.transport.poll(self.config.poll_timeout).await {
                Ok(Some(msg)) => {
                    match serde_json::from_value::<CaptureRecord>(msg.value) {
                        Ok(record) if !record.url.is_empty() && !record.html.is_empty() => {
                            batch.push(record);
                        }
                        Ok(record) => {
                            warn!(url = record.url.as_str(), "Dropping capture with empty fields");
                        }
                        Err(e) => {
                            warn!(error = %e, "Dropping malformed capture record");
                        }
                    }
                }
                Ok(None) => {
                    if batch.is_empty() {
                        // Nothing waiting; reset the window so a lone record
                        // arriving later still gets a full batch window.
                        return Vec::new();
                    }
                    // Poll already waited out its bound; go straight back in
                    // so the batch window stays the flush ceiling.
                }
                Err(e) => {
                    warn!(error = %e, "Poll failed, backing off");
                    tokio::time::sleep(self.config.poll_timeout).await;
                }
            }
        }

        batch
    }

    async fn process_batch(&mut self, batch: &[CaptureRecord]) -> usize {
        let pages: Vec<CleanedPage> = batch
            .iter()
            .filter_map(|record| {
                let content =
                    clean_page(&record.url, &record.html, self.config.page_content_max_bytes);
                if content.len() < MIN_CONTENT_BYTES {
                    debug!(
                        url = record.url.as_str(),
                        content_bytes = content.len(),
                        "Skipping page below junk floor"
                    );
                    return None;
                }
                Some(CleanedPage {
                    url: record.url.clone(),
                    content,
                })
            })
            .collect();

        if pages.is_empty() {
            debug!(batch_len = batch.len(), "No usable pages in batch");
            return 0;
        }

        let prompt = build_batch_prompt(&pages);
        let Some(response) = complete_with_backoff(
            self.oracle.as_ref(),
            &prompt,
            self.config.oracle_max_retries,
            self.config.oracle_base_delay,
        )
        .await
        else {
            return 0;
        };

        let candidates = parse_candidates(&response);
        debug!(
            pages = pages.len(),
            candidates = candidates.len(),
            "Oracle response parsed"
        );

        let mut emitted = 0;
        for candidate in candidates {
            let Some(opportunity) = validate(candidate) else {
                continue;
            };
            let Some(opportunity) = self.dedup.process(opportunity) else {
                continue;
            };

            let enriched = EnrichedOpportunity {
                origin_url: opportunity.url.clone(),
                ai_model: self.oracle.model_id().to_string(),
                enriched_at: Utc::now(),
                opportunity,
            };
            let key = enriched.opportunity.content_id.clone();
            match serde_json::to_value(&enriched) {
                Ok(value) => {
                    match self.transport.publish(TOPIC_ENRICHED, &key, &value).await {
                        Ok(()) => {
                            info!(
                                title = enriched.opportunity.title.as_str(),
                                content_id = key.as_str(),
                                "Opportunity published"
                            );
                            emitted += 1;
                        }
                        Err(e) => {
                            warn!(content_id = key.as_str(), error = %e, "Publish failed");
                        }
                    }
                }
                Err(e) => {
                    warn!(content_id = key.as_str(), error = %e, "Serialization failed");
                }
            }
        }

        if let Err(e) = self.transport.flush().await {
            warn!(error = %e, "Flush failed");
        }
        emitted
    }

    pub fn dedup_stats(&self) -> DedupStats {
        self.dedup.stats()
    }
}
