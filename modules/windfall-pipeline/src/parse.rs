use chrono::NaiveDate;
use serde::Deserialize;
use tracing::warn;

use windfall_common::Opportunity;

/// Untrusted candidate shape as the oracle returns it. Every field is
/// optional; the validation gate decides what survives.
#[derive(Debug, Default, Deserialize)]
pub struct RawCandidate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub amount_value: Option<serde_json::Value>,
    #[serde(default)]
    pub amount_display: Option<String>,
    #[serde(default)]
    pub deadline: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, rename = "type")]
    pub opportunity_type: Option<String>,
    #[serde(default)]
    pub eligibility: Option<String>,
}

/// Strip markdown code fences from an oracle response.
fn strip_code_fences(response: &str) -> &str {
    response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

/// Parse the oracle response into candidates. Tolerates raw JSON, JSON
/// wrapped in markdown fences, and a single object in place of an array.
pub fn parse_candidates(response: &str) -> Vec<RawCandidate> {
    let text = strip_code_fences(response);

    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(serde_json::Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        Ok(obj @ serde_json::Value::Object(_)) => {
            serde_json::from_value(obj).ok().into_iter().collect()
        }
        Ok(_) | Err(_) => {
            warn!(
                response_bytes = response.len(),
                "Oracle response was not parseable JSON"
            );
            Vec::new()
        }
    }
}

const DEFAULT_ELIGIBILITY: &str = "Open to all applicants.";

/// Per-candidate validation gate. Title and URL are required; missing
/// amounts coerce to 0, missing eligibility to a neutral default, an
/// "Unknown" deadline to none. Placeholder descriptions are rejected.
/// `None` means the candidate is dropped; the rest of the batch survives.
pub fn validate(candidate: RawCandidate) -> Option<Opportunity> {
    let title = candidate.title.filter(|t| !t.trim().is_empty())?;
    let url = candidate.url.filter(|u| !u.trim().is_empty())?;

    let description = candidate.description.unwrap_or_default();
    if description.to_lowercase().contains("lorem") {
        warn!(title = title.as_str(), "Dropping candidate with placeholder description");
        return None;
    }

    Some(Opportunity {
        title,
        organization: candidate.organization.unwrap_or_default(),
        amount_value: candidate
            .amount_value
            .as_ref()
            .map(coerce_amount)
            .unwrap_or(0),
        amount_display: candidate.amount_display.unwrap_or_default(),
        deadline: candidate.deadline.as_deref().and_then(parse_deadline),
        description,
        url,
        opportunity_type: candidate
            .opportunity_type
            .unwrap_or_else(|| "opportunity".to_string()),
        eligibility: candidate
            .eligibility
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ELIGIBILITY.to_string()),
        content_id: String::new(),
    })
}

/// Amounts arrive as integers, floats, numeric strings, or null.
fn coerce_amount(value: &serde_json::Value) -> i64 {
    match value {
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        serde_json::Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// An explicit "Unknown" sentinel or unparseable date becomes no deadline.
fn parse_deadline(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("unknown") {
        return None;
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(title: &str, url: &str) -> RawCandidate {
        RawCandidate {
            title: Some(title.to_string()),
            url: Some(url.to_string()),
            description: Some("A real grant for students.".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn parses_raw_json_array() {
        let out = parse_candidates(r#"[{"title":"A","url":"https://x.com/a"}]"#);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].title.as_deref(), Some("A"));
    }

    #[test]
    fn parses_fenced_json() {
        let out = parse_candidates("```json\n[{\"title\":\"A\",\"url\":\"https://x.com/a\"}]\n```");
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn single_object_becomes_one_candidate() {
        let out = parse_candidates(r#"{"title":"A","url":"https://x.com/a"}"#);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn garbage_yields_no_candidates() {
        assert!(parse_candidates("I could not find any opportunities.").is_empty());
    }

    #[test]
    fn missing_title_or_url_is_rejected() {
        let mut c = candidate("Scholarship", "https://x.com/a");
        c.title = None;
        assert!(validate(c).is_none());

        let mut c = candidate("Scholarship", "https://x.com/a");
        c.url = Some("  ".to_string());
        assert!(validate(c).is_none());
    }

    #[test]
    fn null_amount_coerces_to_zero() {
        let mut c = candidate("Scholarship", "https://x.com/a");
        c.amount_value = Some(serde_json::Value::Null);
        assert_eq!(validate(c).unwrap().amount_value, 0);
    }

    #[test]
    fn string_amount_is_parsed() {
        let mut c = candidate("Scholarship", "https://x.com/a");
        c.amount_value = Some(serde_json::Value::String("5000".to_string()));
        assert_eq!(validate(c).unwrap().amount_value, 5000);
    }

    #[test]
    fn unknown_deadline_becomes_none() {
        let mut c = candidate("Scholarship", "https://x.com/a");
        c.deadline = Some("Unknown".to_string());
        assert!(validate(c).unwrap().deadline.is_none());

        let mut c = candidate("Scholarship", "https://x.com/a");
        c.deadline = Some("2025-01-01".to_string());
        assert_eq!(
            validate(c).unwrap().deadline,
            NaiveDate::from_ymd_opt(2025, 1, 1)
        );
    }

    #[test]
    fn missing_eligibility_gets_neutral_default() {
        let c = candidate("Scholarship", "https://x.com/a");
        assert_eq!(validate(c).unwrap().eligibility, DEFAULT_ELIGIBILITY);
    }

    #[test]
    fn placeholder_description_is_rejected() {
        let mut c = candidate("Scholarship", "https://x.com/a");
        c.description = Some("Lorem ipsum dolor sit amet.".to_string());
        assert!(validate(c).is_none());
    }
}
