use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::text::truncate_utf8;

/// One successfully fetched page plus metadata. Produced by the dispatch
/// scheduler, consumed (at least once) by the extraction worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureRecord {
    pub url: String,
    pub title: String,
    pub html: String,
    pub captured_at: DateTime<Utc>,
    pub source_domain: String,
    /// Routing/analytics tag for the dispatch run that produced this record
    /// (e.g. "scholarships", "bounties").
    pub intent: String,
}

impl CaptureRecord {
    /// Build a record from a fetched page. Oversized HTML is truncated at
    /// `html_cap` bytes (char boundary), never rejected.
    pub fn new(
        url: &str,
        title: &str,
        html: &str,
        intent: &str,
        html_cap: usize,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            url: url.to_string(),
            title: title.to_string(),
            html: truncate_utf8(html, html_cap).to_string(),
            captured_at,
            source_domain: domain_of(url),
            intent: intent.to_string(),
        }
    }
}

/// Extract the host portion of a URL, or empty string if unparseable.
pub fn domain_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default()
}

/// A structured opportunity posting derived from a capture. Immutable once
/// published: a later sighting of the same logical item produces a new
/// message sharing the same `content_id`, never an in-place mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub title: String,
    pub organization: String,
    pub amount_value: i64,
    pub amount_display: String,
    pub deadline: Option<NaiveDate>,
    pub description: String,
    pub url: String,
    #[serde(rename = "type")]
    pub opportunity_type: String,
    pub eligibility: String,
    /// Deterministic content fingerprint, attached by the dedup window.
    #[serde(default)]
    pub content_id: String,
}

/// Envelope published to the enriched-opportunity stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedOpportunity {
    pub opportunity: Opportunity,
    pub ai_model: String,
    pub enriched_at: DateTime<Utc>,
    pub origin_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_record_truncates_at_cap() {
        let html = "x".repeat(500);
        let rec = CaptureRecord::new(
            "https://example.com/list",
            "Listings",
            &html,
            "general",
            200,
            Utc::now(),
        );
        assert_eq!(rec.html.len(), 200);
        assert_eq!(rec.source_domain, "example.com");
    }

    #[test]
    fn capture_record_keeps_short_html() {
        let rec = CaptureRecord::new("https://example.com", "t", "<p>hi</p>", "general", 200, Utc::now());
        assert_eq!(rec.html, "<p>hi</p>");
    }

    #[test]
    fn domain_of_unparseable_url_is_empty() {
        assert_eq!(domain_of("not a url"), "");
    }
}
