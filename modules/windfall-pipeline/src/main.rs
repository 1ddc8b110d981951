use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use windfall_common::Config;
use windfall_pipeline::capture::ChromiumCaptureAgent;
use windfall_pipeline::dispatch::DispatchScheduler;
use windfall_pipeline::oracle::GeminiOracle;
use windfall_pipeline::transport::{KafkaRestTransport, StreamTransport, TOPIC_RAW_CAPTURE};
use windfall_pipeline::worker::{ExtractionWorker, WorkerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("windfall=info,windfall_pipeline=info")),
        )
        .init();

    let config = Config::from_env();
    config.log_redacted();

    let cancel = CancellationToken::new();
    let worker_task = spawn_worker(&config, cancel.clone());

    let agent = Arc::new(ChromiumCaptureAgent::new(
        config.chrome_executable.clone(),
        config.nav_timeout,
    ));
    let producer: Arc<dyn StreamTransport> = Arc::new(KafkaRestTransport::new(
        &config.kafka_rest_url,
        &config.kafka_consumer_group,
    ));
    let dispatcher = DispatchScheduler::new(
        agent,
        producer,
        config.capture_html_max_bytes,
        config.courtesy_delay_ms,
    );

    let mut interval = tokio::time::interval(config.crawl_interval);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            _ = interval.tick() => {
                if config.crawl_targets.is_empty() {
                    warn!("No crawl targets configured, skipping dispatch run");
                    continue;
                }
                match dispatcher.run(&config.crawl_targets, &config.crawl_intent).await {
                    Ok(report) => {
                        info!(published = report.published, failed = report.failed, "Dispatch cycle done");
                    }
                    Err(e) => error!(error = %e, "Dispatch cycle failed"),
                }
            }
        }
    }

    cancel.cancel();
    if let Err(e) = worker_task.await {
        warn!(error = %e, "Worker task did not shut down cleanly");
    }
    info!("Pipeline stopped");
    Ok(())
}

/// Run the extraction worker under a supervisor: a panic inside the worker
/// restarts it after a short pause instead of taking the process down.
fn spawn_worker(config: &Config, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    let config = config.clone();
    tokio::spawn(async move {
        loop {
            let transport = Arc::new(
                KafkaRestTransport::new(&config.kafka_rest_url, &config.kafka_consumer_group)
                    .with_subscription(&[TOPIC_RAW_CAPTURE]),
            );
            let oracle = Arc::new(GeminiOracle::new(&config.gemini_api_key, &config.gemini_model));
            let mut worker = ExtractionWorker::new(
                transport,
                oracle,
                config.dedup_window,
                WorkerConfig::from(&config),
            );

            let inner_cancel = cancel.clone();
            let run = tokio::spawn(async move {
                worker.run(inner_cancel).await;
            });

            match run.await {
                Ok(()) => {}
                Err(e) => error!(error = %e, "Extraction worker crashed"),
            }

            if cancel.is_cancelled() {
                break;
            }
            warn!("Restarting extraction worker in 5s");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_secs(5)) => {}
            }
        }
    })
}
