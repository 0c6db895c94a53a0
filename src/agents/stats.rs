//! Segment statistics shared by the analyzers.

use std::collections::HashMap;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

use crate::data::{ConversionRules, Session};

/// Behaviour of the sessions sharing one segment key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentStats {
    pub key: String,
    pub sessions: usize,
    /// Fraction of all sessions in this segment.
    pub share: f64,
    pub bounce_rate: f64,
    pub conversion_rate: f64,
    pub avg_pages: f64,
}

#[derive(Default)]
struct Tally {
    sessions: usize,
    bounces: usize,
    conversions: usize,
    pages: usize,
}

/// Group sessions by `key` and compute per-segment rates, largest first.
///
/// Sessions for which `key` returns `None` are skipped.
pub fn segment_by<F>(sessions: &[Session], rules: &ConversionRules, key: F) -> Vec<SegmentStats>
where
    F: Fn(&Session) -> Option<String>,
{
    let mut tallies: HashMap<String, Tally> = HashMap::new();
    for session in sessions {
        let Some(k) = key(session) else { continue };
        let t = tallies.entry(k).or_default();
        t.sessions += 1;
        t.pages += session.page_views();
        if session.is_bounce() {
            t.bounces += 1;
        }
        if session.converted(rules) {
            t.conversions += 1;
        }
    }

    let total = sessions.len();
    let mut segments: Vec<SegmentStats> = tallies
        .into_iter()
        .map(|(key, t)| SegmentStats {
            key,
            sessions: t.sessions,
            share: rate(t.sessions, total),
            bounce_rate: rate(t.bounces, t.sessions),
            conversion_rate: rate(t.conversions, t.sessions),
            avg_pages: round(t.pages as f64 / t.sessions as f64),
        })
        .collect();
    segments.sort_by(|a, b| b.sessions.cmp(&a.sessions).then_with(|| a.key.cmp(&b.key)));
    segments
}

/// Count occurrences, largest first, ties broken by key.
pub fn top_counts<K, I>(items: I, n: usize) -> Vec<(K, usize)>
where
    K: Eq + Hash + Ord,
    I: IntoIterator<Item = K>,
{
    let mut counts: HashMap<K, usize> = HashMap::new();
    for item in items {
        *counts.entry(item).or_default() += 1;
    }
    let mut ranked: Vec<(K, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(n);
    ranked
}

/// `part / whole` rounded to four places; zero when `whole` is zero.
pub fn rate(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        round4(part as f64 / whole as f64)
    }
}

pub fn round(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

/// Render a fraction as a percentage (`0.4256` → `42.6%`).
pub fn pct(fraction: f64) -> String {
    format!("{:.1}%", fraction * 100.0)
}
