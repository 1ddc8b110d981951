use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use rand::Rng;
use tracing::{info, warn};
use uuid::Uuid;

use windfall_common::CaptureRecord;

use crate::capture::{CaptureAgent, CaptureSession};
use crate::transport::{StreamTransport, TOPIC_RAW_CAPTURE};

/// Outcome of one dispatch run over a target list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub published: usize,
    pub failed: usize,
}

/// Walks the configured target list through one browser session, publishing a
/// capture record per page. Per-URL failures are absorbed; one dead target
/// never stops the rest of the run.
pub struct DispatchScheduler {
    agent: Arc<dyn CaptureAgent>,
    transport: Arc<dyn StreamTransport>,
    html_cap: usize,
    courtesy_delay_ms: (u64, u64),
}

impl DispatchScheduler {
    pub fn new(
        agent: Arc<dyn CaptureAgent>,
        transport: Arc<dyn StreamTransport>,
        html_cap: usize,
        courtesy_delay_ms: (u64, u64),
    ) -> Self {
        Self {
            agent,
            transport,
            html_cap,
            courtesy_delay_ms,
        }
    }

    pub async fn run(&self, urls: &[String], intent: &str) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        info!(%run_id, targets = urls.len(), intent, "Dispatch run starting");

        let session = self
            .agent
            .open_session()
            .await
            .context("Failed to acquire browser session")?;

        let report = self.visit_all(session.as_ref(), urls, intent).await;

        if let Err(e) = session.close().await {
            warn!(%run_id, error = %e, "Failed to close capture session");
        }

        info!(
            %run_id,
            published = report.published,
            failed = report.failed,
            "Dispatch run finished"
        );
        Ok(report)
    }

    async fn visit_all(
        &self,
        session: &dyn CaptureSession,
        urls: &[String],
        intent: &str,
    ) -> RunReport {
        let mut report = RunReport::default();

        for url in urls {
            let captured = match session.fetch(url).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(url, error = %e, "Capture failed, skipping target");
                    report.failed += 1;
                    continue;
                }
            };

            let record = CaptureRecord::new(
                url,
                &captured.title,
                &captured.html,
                intent,
                self.html_cap,
                Utc::now(),
            );

            match serde_json::to_value(&record) {
                Ok(value) => match self.transport.publish(TOPIC_RAW_CAPTURE, url, &value).await {
                    Ok(()) => {
                        info!(url, html_bytes = record.html.len(), "Capture published");
                        report.published += 1;
                    }
                    Err(e) => {
                        warn!(url, error = %e, "Publish failed, dropping capture");
                        report.failed += 1;
                    }
                },
                Err(e) => {
                    warn!(url, error = %e, "Capture record serialization failed");
                    report.failed += 1;
                }
            }

            self.courtesy_pause().await;
        }

        report
    }

    async fn courtesy_pause(&self) {
        let (lo, hi) = self.courtesy_delay_ms;
        if hi == 0 {
            return;
        }
        let delay = rand::rng().random_range(lo..=hi);
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
}
