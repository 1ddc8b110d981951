use std::time::Duration;

use async_trait::async_trait;
use gemini_client::{GeminiClient, GeminiError};
use thiserror::Error;
use tracing::{error, warn};

use windfall_common::text::truncate_utf8;

use crate::clean::CleanedPage;

#[derive(Error, Debug)]
pub enum OracleError {
    /// Explicit rate-limit signal. The only retryable failure.
    #[error("oracle rate limited")]
    RateLimited,

    /// Anything else (auth, malformed request, transport). Not retryable.
    #[error("oracle call failed: {0}")]
    Failed(String),
}

/// External LLM turning page content into candidate records. No output
/// schema is enforced at this boundary; all structural guarantees belong to
/// the extraction worker.
#[async_trait]
pub trait ExtractionOracle: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, OracleError>;
    fn model_id(&self) -> &str;
}

// --- Gemini-backed oracle ---

pub struct GeminiOracle {
    client: GeminiClient,
    model: String,
}

impl GeminiOracle {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            client: GeminiClient::new(api_key),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl ExtractionOracle for GeminiOracle {
    async fn complete(&self, prompt: &str) -> Result<String, OracleError> {
        self.client
            .generate(&self.model, prompt)
            .await
            .map_err(|e| match e {
                GeminiError::RateLimited => OracleError::RateLimited,
                other => OracleError::Failed(other.to_string()),
            })
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

// --- Retry policy ---

/// Delay before retrying after rate-limited attempt `attempt` (0-based):
/// exponential growth from the base delay.
pub fn backoff_delay(attempt: u32, base: Duration) -> Duration {
    base * 2u32.pow(attempt)
}

/// Call the oracle with bounded retries. Rate limits back off exponentially
/// up to `max_retries` attempts; any other error drops the call immediately.
/// `None` means the caller should drop the batch and move on.
pub async fn complete_with_backoff(
    oracle: &dyn ExtractionOracle,
    prompt: &str,
    max_retries: u32,
    base_delay: Duration,
) -> Option<String> {
    for attempt in 0..max_retries {
        match oracle.complete(prompt).await {
            Ok(text) => return Some(text),
            Err(OracleError::RateLimited) => {
                if attempt + 1 < max_retries {
                    let delay = backoff_delay(attempt, base_delay);
                    warn!(
                        attempt = attempt + 1,
                        max_retries,
                        delay_secs = delay.as_secs(),
                        "Oracle rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
            Err(OracleError::Failed(detail)) => {
                error!(
                    error = truncate_utf8(&detail, 500),
                    "Oracle call failed, dropping batch"
                );
                return None;
            }
        }
    }
    warn!(max_retries, "Oracle retries exhausted, dropping batch");
    None
}

/// Concatenate cleaned pages into one oracle request, each page delimited
/// and tagged with its source URL so relative links can be resolved.
pub fn build_batch_prompt(pages: &[CleanedPage]) -> String {
    let mut context = String::new();
    for (i, page) in pages.iter().enumerate() {
        context.push_str(&format!(
            "\n\n=== START PAGE {} URL: {} ===\n",
            i + 1,
            page.url
        ));
        context.push_str(&page.content);
        context.push_str(&format!("\n=== END PAGE {} ===\n", i + 1));
    }

    format!(
        "You are an expert financial opportunity extractor. Below are {count} \
         webpages, concatenated. Extract ALL financial opportunities \
         (scholarships, grants, hackathons, bounties, competitions) from ALL \
         pages.\n\
         \n\
         INSTRUCTIONS:\n\
         1. Process each PAGE block independently but return a single combined JSON array.\n\
         2. Resolve relative links against the URL in the PAGE header.\n\
         3. Fields per opportunity: title, organization, amount_value (integer), \
         amount_display, deadline (YYYY-MM-DD or \"Unknown\"), description \
         (2-3 sentences from the actual page text), url (absolute), type, eligibility.\n\
         4. If a page has no opportunities, skip it.\n\
         \n\
         DATA:{context}\n\
         \n\
         RETURN JSON ARRAY ONLY.",
        count = pages.len(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_base() {
        let base = Duration::from_secs(10);
        assert_eq!(backoff_delay(0, base), Duration::from_secs(10));
        assert_eq!(backoff_delay(1, base), Duration::from_secs(20));
        assert_eq!(backoff_delay(2, base), Duration::from_secs(40));
    }

    #[test]
    fn batch_prompt_delimits_each_page() {
        let pages = vec![
            CleanedPage {
                url: "https://a.example/list".into(),
                content: "First page".into(),
            },
            CleanedPage {
                url: "https://b.example/grants".into(),
                content: "Second page".into(),
            },
        ];
        let prompt = build_batch_prompt(&pages);
        assert!(prompt.contains("=== START PAGE 1 URL: https://a.example/list ==="));
        assert!(prompt.contains("=== START PAGE 2 URL: https://b.example/grants ==="));
        assert!(prompt.contains("First page"));
        assert!(prompt.contains("RETURN JSON ARRAY ONLY."));
    }
}
