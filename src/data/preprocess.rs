//! Cleaning raw records into sessions.

use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::AnalyzerConfig;
use crate::data::event::{
    DeviceInfo, EventType, InteractionEvent, LocationInfo, TrafficInfo, VisitInfo,
    normalize_page, query_param,
};
use crate::data::fields::{
    Field, FieldIndex, RawRecord, available_columns, is_missing_marker, normalize_key,
    parse_timestamp, project,
};
use crate::data::session::{AnalysisWindow, Session, sessionize};
use crate::error::DataError;

/// Counters describing what preprocessing kept and dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreprocessStats {
    pub input_records: usize,
    pub events: usize,
    pub sessions: usize,
    pub dropped_no_session: usize,
    pub duplicates: usize,
    pub expanded_session_records: usize,
    pub untimed_sessions: usize,
    pub outside_window: usize,
}

/// Cleaned input ready for the agents.
#[derive(Debug, Clone)]
pub struct Dataset {
    /// Normalized raw records, indexed by `InteractionEvent::record`.
    pub records: Vec<RawRecord>,
    pub sessions: Vec<Session>,
    pub window: Option<AnalysisWindow>,
    pub stats: PreprocessStats,
}

impl Dataset {
    pub fn events(&self) -> impl Iterator<Item = &InteractionEvent> {
        self.sessions.iter().flat_map(|s| s.events().iter())
    }

    /// Column names present in any record.
    pub fn columns(&self) -> BTreeSet<String> {
        available_columns(&self.records)
    }

    /// The first `n` normalized records.
    pub fn sample(&self, n: usize) -> &[RawRecord] {
        &self.records[..n.min(self.records.len())]
    }

    /// Up to `n` records from retained sessions, projected onto `columns`.
    pub fn excerpt(&self, columns: &[String], n: usize) -> Vec<RawRecord> {
        let mut seen = HashSet::new();
        let picked: Vec<RawRecord> = self
            .events()
            .filter(|e| seen.insert(e.record))
            .take(n)
            .filter_map(|e| self.records.get(e.record).cloned())
            .collect();
        project(&picked, columns)
    }
}

/// Turns raw records into a [`Dataset`].
#[derive(Debug, Clone)]
pub struct Preprocessor {
    session_timeout: Duration,
    window_days: u32,
}

impl Preprocessor {
    pub fn new(session_timeout: Duration, window_days: u32) -> Self {
        Self {
            session_timeout,
            window_days,
        }
    }

    pub fn from_config(config: &AnalyzerConfig) -> Self {
        Self::new(config.session_timeout, config.window_days)
    }

    pub fn run(&self, raw: Vec<RawRecord>) -> Result<Dataset, DataError> {
        let mut stats = PreprocessStats {
            input_records: raw.len(),
            ..Default::default()
        };
        if raw.is_empty() {
            return Err(DataError::Empty);
        }

        let records: Vec<RawRecord> = raw.into_iter().map(normalize_record).collect();

        let mut events = Vec::new();
        let mut seen = HashSet::new();
        let mut sequence = 0usize;
        for (record_index, record) in records.iter().enumerate() {
            let index = FieldIndex::new(record);
            let base = base_event(&index, record_index);

            let candidates = match index.string(Field::NavigationFlow) {
                Some(flow) if !index.has(Field::Page) => {
                    let expanded = expand_flow(&index, base, &flow, &mut sequence);
                    if !expanded.is_empty() {
                        stats.expanded_session_records += 1;
                    }
                    expanded
                }
                _ => {
                    let mut event = base;
                    event.sequence = sequence;
                    sequence += 1;
                    vec![event]
                }
            };

            // Step position keeps a flow that revisits a page intact when
            // its steps share a timestamp.
            for (step, event) in candidates.into_iter().enumerate() {
                let key = (
                    event.session_id.clone().or_else(|| event.visitor_id.clone()),
                    event.timestamp,
                    event.page.clone(),
                    event.event_type.to_string(),
                    step,
                );
                if !seen.insert(key) {
                    stats.duplicates += 1;
                    continue;
                }
                events.push(event);
            }
        }

        let (sessions, dropped) = sessionize(events, self.session_timeout);
        stats.dropped_no_session = dropped;

        let latest = sessions.iter().filter_map(Session::ended_at).max();
        let window = latest
            .map(|end| AnalysisWindow::ending_at(end, self.window_days))
            .transpose()?;

        let sessions: Vec<Session> = match window {
            Some(window) => sessions
                .into_iter()
                .filter(|s| match s.started_at() {
                    Some(start) if window.contains(start) => true,
                    Some(_) => {
                        stats.outside_window += 1;
                        false
                    }
                    None => true,
                })
                .collect(),
            None => sessions,
        };

        stats.untimed_sessions = sessions.iter().filter(|s| s.started_at().is_none()).count();
        stats.sessions = sessions.len();
        stats.events = sessions.iter().map(|s| s.events().len()).sum();

        if stats.sessions == 0 {
            return Err(DataError::NoUsableEvents {
                input_records: stats.input_records,
            });
        }

        info!(
            input_records = stats.input_records,
            events = stats.events,
            sessions = stats.sessions,
            duplicates = stats.duplicates,
            dropped = stats.dropped_no_session,
            outside_window = stats.outside_window,
            window = ?window.map(|w| w.to_string()),
            "Preprocessing complete"
        );

        Ok(Dataset {
            records,
            sessions,
            window,
            stats,
        })
    }
}

/// Trim strings, drop missing markers and repair flow arrows.
pub fn normalize_record(record: RawRecord) -> RawRecord {
    record
        .into_iter()
        .filter_map(|(key, value)| {
            let is_flow = normalize_key(&key).ends_with("flow");
            normalize_value(value, is_flow).map(|v| (key, v))
        })
        .collect()
}

fn normalize_value(value: Value, is_flow: bool) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::String(s) if is_missing_marker(&s) => None,
        Value::String(s) if is_flow => Some(Value::String(repair_arrows(s.trim()))),
        Value::String(s) => Some(Value::String(s.trim().to_string())),
        Value::Array(items) => Some(Value::Array(
            items
                .into_iter()
                .filter_map(|v| normalize_value(v, is_flow))
                .collect(),
        )),
        Value::Object(map) => Some(Value::Object(normalize_record(map))),
        other => Some(other),
    }
}

/// Undo double-escaped arrows (`->`) and long arrows in flow strings.
pub fn repair_arrows(flow: &str) -> String {
    flow.replace("\\u002d", "-")
        .replace("\\u003e", ">")
        .replace("\\u003E", ">")
        .replace("&gt;", ">")
        .replace("-->", "->")
}

fn session_key(index: &FieldIndex<'_>) -> Option<String> {
    if let Some(id) = index.string(Field::SessionId) {
        return Some(id);
    }
    match (index.string(Field::VisitorId), index.string(Field::VisitId)) {
        (Some(visitor), Some(visit)) => Some(format!("{visitor}-{visit}")),
        (None, Some(visit)) => Some(visit),
        _ => None,
    }
}

fn base_event(index: &FieldIndex<'_>, record: usize) -> InteractionEvent {
    let raw_page = index.string(Field::Page);
    let page = raw_page.as_deref().map(normalize_page).unwrap_or_default();
    let from_url = |name: &str| raw_page.as_deref().and_then(|p| query_param(p, name));

    let event_type = match index.string(Field::EventType) {
        Some(raw) => EventType::parse(&raw),
        None => EventType::PageView,
    };

    InteractionEvent {
        session_id: session_key(index),
        visitor_id: index.string(Field::VisitorId),
        timestamp: index
            .timestamp(Field::Timestamp)
            .or_else(|| index.timestamp(Field::VisitStart)),
        page,
        page_title: index.string(Field::PageTitle),
        event_type,
        device: DeviceInfo {
            category: index.string(Field::Device),
            user_agent: index.string(Field::UserAgent),
            browser: index.string(Field::Browser),
            is_mobile: index.bool(Field::IsMobile),
        },
        traffic: TrafficInfo {
            source: index.string(Field::Source).or_else(|| from_url("utm_source")),
            medium: index.string(Field::Medium).or_else(|| from_url("utm_medium")),
            channel_grouping: index.string(Field::ChannelGrouping),
            referrer: index.string(Field::Referrer),
            campaign: index.string(Field::Campaign).or_else(|| from_url("utm_campaign")),
        },
        location: LocationInfo {
            continent: index.string(Field::Continent),
            country: index.string(Field::Country),
            city: index.string(Field::City),
        },
        visit: VisitInfo {
            time_on_site: index.f64(Field::TimeOnSite),
            visit_number: index
                .f64(Field::VisitNumber)
                .filter(|n| *n >= 0.0)
                .map(|n| n as u32),
            new_visit: index.bool(Field::NewVisits),
            transactions: index.f64(Field::Transactions),
            revenue: index.f64(Field::Revenue),
        },
        record,
        sequence: 0,
    }
}

fn split_flow(flow: &str) -> Vec<String> {
    flow.split("->")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Visit start for a session-level record. GA `visitId` values are the
/// visit start as epoch seconds.
fn visit_start(index: &FieldIndex<'_>) -> Option<DateTime<Utc>> {
    index
        .timestamp(Field::VisitStart)
        .or_else(|| index.timestamp(Field::Timestamp))
        .or_else(|| {
            let visit = index.string(Field::VisitId)?;
            if (9..=10).contains(&visit.len()) && visit.bytes().all(|b| b.is_ascii_digit()) {
                parse_timestamp(&Value::String(visit))
            } else {
                None
            }
        })
}

/// One page view per flow step, spread over the reported time on site,
/// plus a trailing purchase when the visit transacted.
fn expand_flow(
    index: &FieldIndex<'_>,
    base: InteractionEvent,
    flow: &str,
    sequence: &mut usize,
) -> Vec<InteractionEvent> {
    let steps = split_flow(flow);
    if steps.is_empty() {
        return Vec::new();
    }
    let titles = index
        .string(Field::PageTitleFlow)
        .map(|t| split_flow(&repair_arrows(&t)))
        .filter(|t| t.len() == steps.len());

    let start = visit_start(index);
    let time_on_site = base.visit.time_on_site.unwrap_or(0.0).max(0.0);
    let offset = |fraction: f64| {
        TimeDelta::try_milliseconds((time_on_site * fraction * 1000.0) as i64)
            .unwrap_or_else(TimeDelta::zero)
    };
    let at = |fraction: f64| {
        start.map(|s| s.checked_add_signed(offset(fraction)).unwrap_or(s))
    };

    let mut events = Vec::with_capacity(steps.len() + 1);
    let count = steps.len() as f64;
    for (i, step) in steps.iter().enumerate() {
        let mut event = base.clone();
        event.page = normalize_page(step);
        event.page_title = titles.as_ref().map(|t| t[i].clone());
        event.event_type = EventType::PageView;
        event.timestamp = at(i as f64 / count);
        event.sequence = *sequence;
        *sequence += 1;
        events.push(event);
    }

    let transacted = base.visit.transactions.is_some_and(|t| t > 0.0)
        || base.visit.revenue.is_some_and(|r| r > 0.0);
    if transacted {
        let mut purchase = base;
        purchase.page = events
            .last()
            .map(|e| e.page.clone())
            .unwrap_or_default();
        purchase.event_type = EventType::Purchase;
        purchase.timestamp = at(1.0);
        purchase.sequence = *sequence;
        *sequence += 1;
        events.push(purchase);
    }

    debug!(steps = steps.len(), transacted, "Expanded session record");
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn records(value: Value) -> Vec<RawRecord> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    fn preprocessor() -> Preprocessor {
        Preprocessor::new(Duration::from_secs(30 * 60), 14)
    }

    #[test]
    fn event_rows_become_sessions() {
        let data = records(json!([
            {"session_id": "s1", "timestamp": "2024-03-01T10:00:00Z", "page": "https://shop.example.com/home", "device": "mobile"},
            {"session_id": "s1", "timestamp": "2024-03-01T10:01:00Z", "page": "/cart", "event_type": "add_to_cart"},
            {"session_id": "s2", "timestamp": "2024-03-02T09:00:00Z", "page": "/home", "device": "(not set)"}
        ]));
        let dataset = preprocessor().run(data).unwrap();
        assert_eq!(dataset.stats.sessions, 2);
        assert_eq!(dataset.stats.events, 3);
        let s1 = &dataset.sessions[0];
        assert_eq!(s1.id(), "s1");
        assert_eq!(s1.pages(), vec!["/home"]);
        assert_eq!(s1.events()[1].event_type, EventType::AddToCart);
        assert_eq!(s1.device().category.as_deref(), Some("mobile"));
        assert!(!dataset.records[2].contains_key("device"));
        assert!(dataset.window.is_some());
    }

    #[test]
    fn exact_duplicates_are_dropped() {
        let data = records(json!([
            {"session_id": "s1", "timestamp": 1709287200, "page": "/home"},
            {"session_id": "s1", "timestamp": 1709287200, "page": "/home"},
            {"session_id": "s1", "timestamp": 1709287260, "page": "/home"}
        ]));
        let dataset = preprocessor().run(data).unwrap();
        assert_eq!(dataset.stats.duplicates, 1);
        assert_eq!(dataset.stats.events, 2);
    }

    #[test]
    fn session_records_expand_navigation_flow() {
        let data = records(json!([{
            "fullVisitorId": "9001",
            "visitId": "1501583974",
            "visitStartTime": "1501583974",
            "navigationFlow": "/home -\\u003e /product -\\u003e /checkout",
            "timeOnSite": "90",
            "transactions": "1",
            "deviceCategory": "desktop",
            "channelGrouping": "Organic Search"
        }]));
        let dataset = preprocessor().run(data).unwrap();
        assert_eq!(dataset.stats.expanded_session_records, 1);
        let session = &dataset.sessions[0];
        assert_eq!(session.id(), "9001-1501583974");
        assert_eq!(session.pages(), vec!["/home", "/product", "/checkout"]);
        let events = session.events();
        assert_eq!(events.len(), 4);
        assert_eq!(events[3].event_type, EventType::Purchase);
        let start = events[0].timestamp.unwrap();
        assert_eq!(events[1].timestamp.unwrap() - start, TimeDelta::seconds(30));
        assert_eq!(events[3].timestamp.unwrap() - start, TimeDelta::seconds(90));
        assert_eq!(session.duration(), Some(Duration::from_secs(90)));
    }

    #[test]
    fn oversized_time_on_site_does_not_overflow() {
        let data = records(json!([{
            "visitId": "7",
            "visitStartTime": 1500000000,
            "timeOnSite": 1e300,
            "navigationFlow": "/home -> /cart"
        }]));
        let dataset = preprocessor().run(data).unwrap();
        let session = &dataset.sessions[0];
        assert_eq!(session.pages(), vec!["/home", "/cart"]);
        let start = session.events()[0].timestamp.unwrap();
        assert_eq!(session.events()[1].timestamp, Some(start));
    }

    #[test]
    fn duplicated_flow_rows_are_dropped() {
        let row = json!({
            "fullVisitorId": "v1",
            "visitId": "1",
            "visitStartTime": 1709287200,
            "timeOnSite": "60",
            "navigationFlow": "/home -> /cart -> /home"
        });
        let dataset = preprocessor().run(records(json!([row, row]))).unwrap();
        assert_eq!(dataset.stats.sessions, 1);
        assert_eq!(dataset.sessions[0].pages(), vec!["/home", "/cart", "/home"]);
        assert_eq!(dataset.stats.duplicates, 3);
    }

    #[test]
    fn untimed_duplicates_are_dropped() {
        let row = json!({"sessionId": "s1", "page": "/home", "eventType": "page_view"});
        let dataset = preprocessor().run(records(json!([row, row]))).unwrap();
        assert_eq!(dataset.stats.events, 1);
        assert_eq!(dataset.stats.duplicates, 1);
    }

    #[test]
    fn arrows_are_repaired() {
        assert_eq!(repair_arrows("a -\\u003e b --> c"), "a -> b -> c");
        assert_eq!(repair_arrows("a \\u002d\\u003e b"), "a -> b");
    }

    #[test]
    fn sessions_outside_window_are_excluded() {
        let data = records(json!([
            {"session_id": "old", "timestamp": "2024-01-01T10:00:00Z", "page": "/home"},
            {"session_id": "new", "timestamp": "2024-03-01T10:00:00Z", "page": "/home"},
            {"session_id": "untimed", "page": "/home"}
        ]));
        let dataset = Preprocessor::new(Duration::from_secs(1800), 7).run(data).unwrap();
        let ids: Vec<&str> = dataset.sessions.iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec!["new", "untimed"]);
        assert_eq!(dataset.stats.outside_window, 1);
        assert_eq!(dataset.stats.untimed_sessions, 1);
    }

    #[test]
    fn untimed_data_has_no_window() {
        let data = records(json!([{"session_id": "a", "page": "/"}]));
        let dataset = preprocessor().run(data).unwrap();
        assert!(dataset.window.is_none());
    }

    #[test]
    fn nothing_usable_is_an_error() {
        let data = records(json!([{"page": "/orphan"}, {"page": "/lost"}]));
        let err = preprocessor().run(data).unwrap_err();
        assert!(matches!(err, DataError::NoUsableEvents { input_records: 2 }));
        assert!(matches!(preprocessor().run(Vec::new()), Err(DataError::Empty)));
    }

    #[test]
    fn utm_parameters_fill_traffic() {
        let data = records(json!([
            {"session_id": "s", "timestamp": "2024-03-01T10:00:00Z", "page": "/land?utm_source=news&utm_medium=email&utm_campaign=spring"}
        ]));
        let dataset = preprocessor().run(data).unwrap();
        let traffic = dataset.sessions[0].traffic();
        assert_eq!(traffic.campaign.as_deref(), Some("spring"));
        assert_eq!(traffic.medium.as_deref(), Some("email"));
        assert_eq!(dataset.sessions[0].landing_page(), Some("/land"));
    }

    #[test]
    fn excerpt_projects_retained_records() {
        let data = records(json!([
            {"session_id": "s", "timestamp": "2024-03-01T10:00:00Z", "page": "/a", "device": "mobile"},
            {"session_id": "s", "timestamp": "2024-03-01T10:01:00Z", "page": "/b", "device": "mobile"}
        ]));
        let dataset = preprocessor().run(data).unwrap();
        let rows = dataset.excerpt(&["page".to_string()], 1);
        assert_eq!(rows.len(), 1);
        assert_eq!(Value::Object(rows[0].clone()), json!({"page": "/a"}));
        assert_eq!(dataset.sample(5).len(), 2);
    }
}
