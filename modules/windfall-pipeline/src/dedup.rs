use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::debug;

use windfall_common::Opportunity;

/// Deterministic content fingerprint: hash of the normalized source URL when
/// present, otherwise of normalized title + organization. Never a function
/// of time.
pub fn content_id(opp: &Opportunity) -> String {
    let basis = if !opp.url.trim().is_empty() {
        normalize_url(&opp.url)
    } else {
        format!("{}|{}", normalize(&opp.title), normalize(&opp.organization))
    };
    let mut hasher = Sha256::new();
    hasher.update(basis.as_bytes());
    hex::encode(hasher.finalize())
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

fn normalize_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_lowercase()
}

#[derive(Debug, Clone, PartialEq)]
pub struct DedupStats {
    pub processed: u64,
    pub dropped: u64,
    pub window_len: usize,
    pub seen_len: usize,
    pub duplicate_rate: f64,
}

/// Stateful filter suppressing repeated emission of logically identical
/// opportunities within a rolling horizon W, with bounded memory.
///
/// Two eviction horizons: the window queue (the visible/recent set) is
/// trimmed at W, while the seen-map keeps entries up to 2W so an item
/// arriving exactly at the W boundary is not re-admitted by a just-evicted
/// entry. Both bounds are enforced on every process call, so memory is
/// capped independent of throughput.
///
/// State is process-local and mutated by exactly one owning consumer task;
/// a restart resets "seen" memory (known gap, see DESIGN.md).
pub struct DedupWindow {
    window: chrono::Duration,
    last_seen: HashMap<String, DateTime<Utc>>,
    queue: VecDeque<(DateTime<Utc>, String)>,
    processed: u64,
    dropped: u64,
}

impl DedupWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window: chrono::Duration::from_std(window)
                .expect("dedup window duration out of range"),
            last_seen: HashMap::new(),
            queue: VecDeque::new(),
            processed: 0,
            dropped: 0,
        }
    }

    /// Admit or suppress one opportunity. A duplicate within the window is
    /// dropped; otherwise the event gets its content_id attached and is
    /// returned for emission.
    pub fn process(&mut self, opp: Opportunity) -> Option<Opportunity> {
        self.process_at(opp, Utc::now())
    }

    pub fn process_at(&mut self, mut opp: Opportunity, now: DateTime<Utc>) -> Option<Opportunity> {
        self.evict(now);

        let id = content_id(&opp);
        if let Some(last) = self.last_seen.get(&id) {
            if now - *last < self.window {
                self.dropped += 1;
                debug!(content_id = id.as_str(), "Duplicate suppressed");
                return None;
            }
        }

        self.last_seen.insert(id.clone(), now);
        self.queue.push_back((now, id.clone()));
        opp.content_id = id;
        self.processed += 1;
        Some(opp)
    }

    /// Read-only duplicate check for out-of-band callers. No state change.
    pub fn is_duplicate(&self, opp: &Opportunity) -> bool {
        self.is_duplicate_at(opp, Utc::now())
    }

    pub fn is_duplicate_at(&self, opp: &Opportunity, now: DateTime<Utc>) -> bool {
        let id = content_id(opp);
        self.last_seen
            .get(&id)
            .is_some_and(|last| now - *last < self.window)
    }

    fn evict(&mut self, now: DateTime<Utc>) {
        while let Some((ts, _)) = self.queue.front() {
            if now - *ts > self.window {
                self.queue.pop_front();
            } else {
                break;
            }
        }

        let seen_horizon = self.window * 2;
        self.last_seen.retain(|_, ts| now - *ts <= seen_horizon);
    }

    pub fn stats(&self) -> DedupStats {
        let total = self.processed + self.dropped;
        DedupStats {
            processed: self.processed,
            dropped: self.dropped,
            window_len: self.queue.len(),
            seen_len: self.last_seen.len(),
            duplicate_rate: if total == 0 {
                0.0
            } else {
                self.dropped as f64 / total as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const WINDOW_SECS: u64 = 3600;

    fn window() -> DedupWindow {
        DedupWindow::new(Duration::from_secs(WINDOW_SECS))
    }

    fn t(offset_secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap() + chrono::Duration::seconds(offset_secs)
    }

    fn opp(url: &str) -> Opportunity {
        Opportunity {
            title: "STEM Scholarship".to_string(),
            organization: "Acme Foundation".to_string(),
            amount_value: 500,
            amount_display: "$500".to_string(),
            deadline: None,
            description: "A scholarship.".to_string(),
            url: url.to_string(),
            opportunity_type: "scholarship".to_string(),
            eligibility: "Open to all applicants.".to_string(),
            content_id: String::new(),
        }
    }

    #[test]
    fn content_id_is_deterministic_over_url_normalization() {
        let a = content_id(&opp("https://X.com/a/"));
        let b = content_id(&opp("  https://x.com/a"));
        assert_eq!(a, b);
    }

    #[test]
    fn content_id_falls_back_to_title_and_org() {
        let mut a = opp("");
        a.title = " STEM Scholarship ".to_string();
        let mut b = opp("");
        b.title = "stem scholarship".to_string();
        assert_eq!(content_id(&a), content_id(&b));

        let mut c = opp("");
        c.organization = "Other Org".to_string();
        assert_ne!(content_id(&a), content_id(&c));
    }

    #[test]
    fn immediate_repeat_is_dropped_once() {
        let mut w = window();
        assert!(w.process_at(opp("https://x.com/a"), t(0)).is_some());
        assert!(w.process_at(opp("https://x.com/a"), t(1)).is_none());
        assert_eq!(w.stats().dropped, 1);
        assert_eq!(w.stats().processed, 1);
    }

    #[test]
    fn emitted_event_carries_content_id() {
        let mut w = window();
        let out = w.process_at(opp("https://x.com/a"), t(0)).unwrap();
        assert_eq!(out.content_id, content_id(&opp("https://x.com/a")));
    }

    #[test]
    fn readmitted_after_window_elapses() {
        let mut w = window();
        assert!(w.process_at(opp("https://x.com/a"), t(0)).is_some());
        assert!(w
            .process_at(opp("https://x.com/a"), t(WINDOW_SECS as i64 + 1))
            .is_some());
        assert_eq!(w.stats().processed, 2);
        assert_eq!(w.stats().dropped, 0);
    }

    #[test]
    fn is_duplicate_does_not_mutate() {
        let mut w = window();
        w.process_at(opp("https://x.com/a"), t(0));
        assert!(w.is_duplicate_at(&opp("https://x.com/a"), t(10)));
        assert!(!w.is_duplicate_at(&opp("https://x.com/b"), t(10)));
        assert_eq!(w.stats().dropped, 0);
    }

    #[test]
    fn sustained_insertion_keeps_memory_bounded() {
        let mut w = window();
        // One unique URL every 60s for 10x the window horizon
        let total = (WINDOW_SECS as i64 / 60) * 10;
        for i in 0..total {
            let url = format!("https://x.com/page-{i}");
            assert!(w.process_at(opp(&url), t(i * 60)).is_some());
        }
        let stats = w.stats();
        // Window queue holds nothing older than W, seen-map nothing older than 2W
        assert!(stats.window_len <= (WINDOW_SECS / 60) as usize + 1);
        assert!(stats.seen_len <= (2 * WINDOW_SECS / 60) as usize + 1);
        assert_eq!(stats.processed as i64, total);
    }

    #[test]
    fn boundary_entry_between_w_and_2w_still_suppresses() {
        let mut w = window();
        assert!(w.process_at(opp("https://x.com/a"), t(0)).is_some());
        // Just inside the window: suppressed
        assert!(w
            .process_at(opp("https://x.com/a"), t(WINDOW_SECS as i64 - 1))
            .is_none());
    }

    #[test]
    fn duplicate_rate_reflects_drops() {
        let mut w = window();
        w.process_at(opp("https://x.com/a"), t(0));
        w.process_at(opp("https://x.com/a"), t(1));
        w.process_at(opp("https://x.com/a"), t(2));
        w.process_at(opp("https://x.com/b"), t(3));
        let stats = w.stats();
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.dropped, 2);
        assert!((stats.duplicate_rate - 0.5).abs() < f64::EPSILON);
    }
}
