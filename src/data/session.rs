//! Sessions and the analysis window.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::data::event::{
    DeviceClass, DeviceInfo, EventType, InteractionEvent, LocationInfo, TrafficChannel,
    TrafficInfo, VisitInfo,
};
use crate::error::DataError;

/// Page-path patterns that count as a conversion.
#[derive(Debug, Clone, Default)]
pub struct ConversionRules {
    patterns: Vec<Regex>,
}

impl ConversionRules {
    pub fn new(patterns: Vec<Regex>) -> Self {
        Self { patterns }
    }

    pub fn matches_page(&self, page: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(page))
    }
}

/// Ordered events sharing one session id.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    visitor_id: Option<String>,
    events: Vec<InteractionEvent>,
    device: DeviceInfo,
    traffic: TrafficInfo,
    location: LocationInfo,
    visit: VisitInfo,
}

impl Session {
    /// Build a session, ordering events by `(timestamp, sequence)`; untimed
    /// events sort first in ingest order.
    ///
    /// Attribute groups come from the earliest event, with gaps filled
    /// from later ones.
    pub fn from_events(id: impl Into<String>, mut events: Vec<InteractionEvent>) -> Self {
        events.sort_by_key(|e| (e.timestamp, e.sequence));

        let mut device = DeviceInfo::default();
        let mut traffic = TrafficInfo::default();
        let mut location = LocationInfo::default();
        let mut visit = VisitInfo::default();
        let mut visitor_id = None;
        for event in &events {
            device.fill_from(&event.device);
            traffic.fill_from(&event.traffic);
            location.fill_from(&event.location);
            visit.fill_from(&event.visit);
            if visitor_id.is_none() {
                visitor_id.clone_from(&event.visitor_id);
            }
        }

        Self {
            id: id.into(),
            visitor_id,
            events,
            device,
            traffic,
            location,
            visit,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn visitor_id(&self) -> Option<&str> {
        self.visitor_id.as_deref()
    }

    pub fn events(&self) -> &[InteractionEvent] {
        &self.events
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    pub fn traffic(&self) -> &TrafficInfo {
        &self.traffic
    }

    pub fn location(&self) -> &LocationInfo {
        &self.location
    }

    pub fn visit(&self) -> &VisitInfo {
        &self.visit
    }

    /// Pages viewed, in order. Sessions without explicit page views fall
    /// back to the pages of all their events.
    pub fn pages(&self) -> Vec<&str> {
        let views: Vec<&str> = self
            .events
            .iter()
            .filter(|e| e.event_type == EventType::PageView && !e.page.is_empty())
            .map(|e| e.page.as_str())
            .collect();
        if !views.is_empty() {
            return views;
        }
        self.events
            .iter()
            .filter(|e| !e.page.is_empty())
            .map(|e| e.page.as_str())
            .collect()
    }

    pub fn landing_page(&self) -> Option<&str> {
        self.pages().first().copied()
    }

    pub fn exit_page(&self) -> Option<&str> {
        self.pages().last().copied()
    }

    pub fn page_views(&self) -> usize {
        self.pages().len()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.events.iter().filter_map(|e| e.timestamp).min()
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.events.iter().filter_map(|e| e.timestamp).max()
    }

    /// Reported time on site, else the span between first and last event.
    pub fn duration(&self) -> Option<Duration> {
        if let Some(secs) = self.visit.time_on_site
            && let Ok(reported) = Duration::try_from_secs_f64(secs)
        {
            return Some(reported);
        }
        let span = self.ended_at()? - self.started_at()?;
        span.to_std().ok()
    }

    /// At most one page view and no interaction events.
    pub fn is_bounce(&self) -> bool {
        self.page_views() <= 1 && !self.events.iter().any(|e| e.event_type.is_interaction())
    }

    /// A purchase event, a positive transaction count, or a page matching
    /// the conversion rules.
    pub fn converted(&self, rules: &ConversionRules) -> bool {
        self.events.iter().any(|e| e.event_type == EventType::Purchase)
            || self.visit.transactions.is_some_and(|t| t > 0.0)
            || self.visit.revenue.is_some_and(|r| r > 0.0)
            || self.pages().iter().any(|p| rules.matches_page(p))
    }

    pub fn device_class(&self) -> DeviceClass {
        self.device.class()
    }

    pub fn browser(&self) -> Option<String> {
        self.device.browser_name()
    }

    pub fn channel(&self) -> TrafficChannel {
        self.traffic.channel()
    }

    pub fn country(&self) -> Option<&str> {
        self.location.country.as_deref()
    }

    /// `Some(true)` for a first visit, when the data says so.
    pub fn is_new_visitor(&self) -> Option<bool> {
        self.visit
            .new_visit
            .or_else(|| self.visit.visit_number.map(|n| n <= 1))
    }

    /// True when the visitor returned to a page seen earlier, ignoring
    /// consecutive reloads.
    pub fn has_revisits(&self) -> bool {
        let path = collapse_repeats(&self.pages());
        path.iter()
            .enumerate()
            .any(|(i, page)| path[..i].contains(page))
    }
}

/// Drop consecutive duplicates (`a a b a` → `a b a`).
pub fn collapse_repeats<'a>(pages: &[&'a str]) -> Vec<&'a str> {
    let mut out: Vec<&str> = Vec::with_capacity(pages.len());
    for &page in pages {
        if out.last() != Some(&page) {
            out.push(page);
        }
    }
    out
}

/// Group events into sessions.
///
/// Events with a session id are grouped by it. The rest are grouped per
/// visitor and split wherever consecutive timestamps are more than
/// `timeout` apart, producing ids `"{visitor}#{n}"`. Events with neither a
/// session id nor a timed visitor are dropped; their count is returned.
pub fn sessionize(events: Vec<InteractionEvent>, timeout: Duration) -> (Vec<Session>, usize) {
    let mut by_session: BTreeMap<String, Vec<InteractionEvent>> = BTreeMap::new();
    let mut by_visitor: BTreeMap<String, Vec<InteractionEvent>> = BTreeMap::new();
    let mut dropped = 0;

    for event in events {
        if let Some(id) = event.session_id.clone() {
            by_session.entry(id).or_default().push(event);
        } else if let (Some(visitor), Some(_)) = (event.visitor_id.clone(), event.timestamp) {
            by_visitor.entry(visitor).or_default().push(event);
        } else {
            dropped += 1;
        }
    }

    let gap = TimeDelta::from_std(timeout).unwrap_or(TimeDelta::MAX);
    for (visitor, mut events) in by_visitor {
        events.sort_by_key(|e| (e.timestamp, e.sequence));
        let mut n = 1;
        let mut last: Option<DateTime<Utc>> = None;
        for mut event in events {
            if let (Some(prev), Some(ts)) = (last, event.timestamp)
                && ts - prev > gap
            {
                n += 1;
            }
            last = event.timestamp;
            let id = format!("{visitor}#{n}");
            event.session_id = Some(id.clone());
            by_session.entry(id).or_default().push(event);
        }
    }

    let sessions = by_session
        .into_iter()
        .map(|(id, events)| Session::from_events(id, events))
        .collect();
    (sessions, dropped)
}

/// Contiguous `[start, end]` range of 7 to 14 days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl AnalysisWindow {
    pub const MIN_DAYS: u32 = 7;
    pub const MAX_DAYS: u32 = 14;

    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, DataError> {
        let days = (end - start).num_seconds() as f64 / 86_400.0;
        if days < f64::from(Self::MIN_DAYS) || days > f64::from(Self::MAX_DAYS) {
            return Err(DataError::InvalidWindow { days });
        }
        Ok(Self { start, end })
    }

    /// Trailing window of `days` ending at `end`.
    pub fn ending_at(end: DateTime<Utc>, days: u32) -> Result<Self, DataError> {
        Self::new(end - TimeDelta::days(i64::from(days)), end)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn days(&self) -> f64 {
        (self.end - self.start).num_seconds() as f64 / 86_400.0
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }
}

impl std::fmt::Display for AnalysisWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to {}",
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + TimeDelta::minutes(minute)
    }

    fn event(session: Option<&str>, visitor: Option<&str>, minute: Option<i64>, page: &str, seq: usize) -> InteractionEvent {
        InteractionEvent {
            session_id: session.map(String::from),
            visitor_id: visitor.map(String::from),
            timestamp: minute.map(at),
            page: page.to_string(),
            page_title: None,
            event_type: EventType::PageView,
            device: DeviceInfo::default(),
            traffic: TrafficInfo::default(),
            location: LocationInfo::default(),
            visit: VisitInfo::default(),
            record: seq,
            sequence: seq,
        }
    }

    #[test]
    fn session_orders_events_and_derives_pages() {
        let s = Session::from_events(
            "s1",
            vec![
                event(Some("s1"), None, Some(5), "/cart", 0),
                event(Some("s1"), None, Some(0), "/home", 1),
                event(Some("s1"), None, Some(2), "/product", 2),
            ],
        );
        assert_eq!(s.pages(), vec!["/home", "/product", "/cart"]);
        assert_eq!(s.landing_page(), Some("/home"));
        assert_eq!(s.exit_page(), Some("/cart"));
        assert_eq!(s.duration(), Some(Duration::from_secs(300)));
        assert!(!s.is_bounce());
    }

    #[test]
    fn single_page_without_interaction_is_bounce() {
        let s = Session::from_events("s", vec![event(Some("s"), None, Some(0), "/home", 0)]);
        assert!(s.is_bounce());

        let mut click = event(Some("s"), None, Some(1), "/home", 1);
        click.event_type = EventType::Click;
        let s = Session::from_events("s", vec![event(Some("s"), None, Some(0), "/home", 0), click]);
        assert!(!s.is_bounce());
    }

    #[test]
    fn conversion_by_event_or_pattern() {
        let rules = ConversionRules::new(vec![Regex::new(r"/thank-you").unwrap()]);
        let s = Session::from_events(
            "s",
            vec![
                event(Some("s"), None, Some(0), "/cart", 0),
                event(Some("s"), None, Some(1), "/thank-you", 1),
            ],
        );
        assert!(s.converted(&rules));

        let mut purchase = event(Some("p"), None, Some(1), "/cart", 1);
        purchase.event_type = EventType::Purchase;
        let s = Session::from_events("p", vec![purchase]);
        assert!(s.converted(&ConversionRules::default()));

        let s = Session::from_events("n", vec![event(Some("n"), None, Some(0), "/cart", 0)]);
        assert!(!s.converted(&rules));
    }

    #[test]
    fn revisits_ignore_reloads() {
        let reload = Session::from_events(
            "r",
            vec![
                event(Some("r"), None, Some(0), "/a", 0),
                event(Some("r"), None, Some(1), "/a", 1),
                event(Some("r"), None, Some(2), "/b", 2),
            ],
        );
        assert!(!reload.has_revisits());

        let back = Session::from_events(
            "b",
            vec![
                event(Some("b"), None, Some(0), "/a", 0),
                event(Some("b"), None, Some(1), "/b", 1),
                event(Some("b"), None, Some(2), "/a", 2),
            ],
        );
        assert!(back.has_revisits());
    }

    #[test]
    fn sessionize_splits_visitor_on_inactivity() {
        let events = vec![
            event(None, Some("v1"), Some(0), "/a", 0),
            event(None, Some("v1"), Some(10), "/b", 1),
            event(None, Some("v1"), Some(90), "/c", 2),
            event(Some("explicit"), None, None, "/x", 3),
            event(None, None, Some(5), "/orphan", 4),
            event(None, Some("v2"), None, "/untimed", 5),
        ];
        let (sessions, dropped) = sessionize(events, Duration::from_secs(30 * 60));
        assert_eq!(dropped, 2);
        let ids: Vec<&str> = sessions.iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec!["explicit", "v1#1", "v1#2"]);
        assert_eq!(sessions[1].pages(), vec!["/a", "/b"]);
        assert_eq!(sessions[2].pages(), vec!["/c"]);
        assert_eq!(sessions[1].visitor_id(), Some("v1"));
    }

    #[test]
    fn window_bounds_are_enforced() {
        let end = at(0);
        assert!(AnalysisWindow::ending_at(end, 7).is_ok());
        assert!(AnalysisWindow::ending_at(end, 14).is_ok());
        assert!(matches!(
            AnalysisWindow::ending_at(end, 6),
            Err(DataError::InvalidWindow { .. })
        ));
        assert!(AnalysisWindow::new(end, end - TimeDelta::days(10)).is_err());

        let window = AnalysisWindow::ending_at(end, 10).unwrap();
        assert_eq!(window.days(), 10.0);
        assert!(window.contains(end - TimeDelta::days(3)));
        assert!(!window.contains(end - TimeDelta::days(11)));
    }

    #[test]
    fn new_visitor_from_visit_number() {
        let mut e = event(Some("s"), None, Some(0), "/a", 0);
        e.visit.visit_number = Some(3);
        let s = Session::from_events("s", vec![e]);
        assert_eq!(s.is_new_visitor(), Some(false));
        assert_eq!(
            Session::from_events("t", vec![event(Some("t"), None, Some(0), "/a", 0)]).is_new_visitor(),
            None
        );
    }
}
