//! Field resolution over loosely-shaped raw records.
//!
//! Exports from different analytics tools name the same thing differently
//! (`session_id`, `sessionId`, `visitId`…). Lookups here compare keys
//! case- and separator-insensitively against a per-field alias list.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};

/// One raw input row.
pub type RawRecord = Map<String, Value>;

/// Canonical fields the preprocessor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    SessionId,
    VisitId,
    VisitorId,
    Timestamp,
    VisitStart,
    Page,
    PageTitle,
    EventType,
    Device,
    UserAgent,
    Browser,
    IsMobile,
    Source,
    Medium,
    ChannelGrouping,
    Referrer,
    Campaign,
    Continent,
    Country,
    City,
    NavigationFlow,
    PageTitleFlow,
    TimeOnSite,
    VisitNumber,
    NewVisits,
    Transactions,
    Revenue,
}

impl Field {
    /// Accepted source keys, in priority order.
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            Self::SessionId => &["session_id", "session"],
            Self::VisitId => &["visit_id"],
            Self::VisitorId => &[
                "fullVisitorId",
                "visitor_id",
                "user_id",
                "client_id",
                "anonymous_id",
            ],
            Self::Timestamp => &[
                "timestamp",
                "event_timestamp",
                "event_time",
                "ts",
                "time",
                "datetime",
                "hit_time",
            ],
            Self::VisitStart => &["visitStartTime", "session_start"],
            Self::Page => &[
                "page",
                "page_path",
                "url",
                "page_url",
                "path",
                "screen_name",
            ],
            Self::PageTitle => &["page_title", "title"],
            Self::EventType => &["event_type", "event", "event_name", "hit_type", "action"],
            Self::Device => &["deviceCategory", "device", "device_type"],
            Self::UserAgent => &["user_agent", "ua"],
            Self::Browser => &["browser"],
            Self::IsMobile => &["isMobile", "mobile"],
            Self::Source => &["source", "utm_source", "traffic_source"],
            Self::Medium => &["medium", "utm_medium"],
            Self::ChannelGrouping => &["channelGrouping", "channel"],
            Self::Referrer => &["referrer", "referer", "referrer_url", "referralPath"],
            Self::Campaign => &["campaign", "utm_campaign"],
            Self::Continent => &["continent"],
            Self::Country => &["country"],
            Self::City => &["city"],
            Self::NavigationFlow => &["navigationFlow", "page_flow"],
            Self::PageTitleFlow => &["pageTitleFlow"],
            Self::TimeOnSite => &["timeOnSite", "session_duration"],
            Self::VisitNumber => &["visitNumber"],
            Self::NewVisits => &["newVisits", "is_new_visitor", "new_visitor"],
            Self::Transactions => &["transactions"],
            Self::Revenue => &["transactionRevenue", "totalTransactionRevenue", "revenue"],
        }
    }
}

/// Normalize a key for comparison: lowercase, separators removed.
pub fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Values that mean "no data" in common analytics exports.
pub fn is_missing_marker(value: &str) -> bool {
    let v = value.trim();
    v.is_empty()
        || v.eq_ignore_ascii_case("null")
        || v.eq_ignore_ascii_case("none")
        || v.eq_ignore_ascii_case("(not set)")
        || v.eq_ignore_ascii_case("not set")
        || v.eq_ignore_ascii_case("n/a")
        || v.eq_ignore_ascii_case("not available in demo dataset")
}

/// Case-insensitive key index over one record.
pub struct FieldIndex<'a> {
    by_key: HashMap<String, &'a Value>,
}

impl<'a> FieldIndex<'a> {
    pub fn new(record: &'a RawRecord) -> Self {
        let by_key = record
            .iter()
            .map(|(k, v)| (normalize_key(k), v))
            .collect();
        Self { by_key }
    }

    /// First present, non-null value among the field's aliases.
    pub fn get(&self, field: Field) -> Option<&'a Value> {
        field
            .aliases()
            .iter()
            .filter_map(|alias| self.by_key.get(&normalize_key(alias)).copied())
            .find(|v| !v.is_null())
    }

    pub fn string(&self, field: Field) -> Option<String> {
        self.get(field).and_then(value_to_string)
    }

    pub fn f64(&self, field: Field) -> Option<f64> {
        self.get(field).and_then(value_to_f64)
    }

    pub fn bool(&self, field: Field) -> Option<bool> {
        self.get(field).and_then(value_to_bool)
    }

    pub fn timestamp(&self, field: Field) -> Option<DateTime<Utc>> {
        self.get(field).and_then(parse_timestamp)
    }

    pub fn has(&self, field: Field) -> bool {
        self.string(field).is_some()
    }
}

/// Render scalar values as strings; missing markers become `None`.
pub fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if is_missing_marker(s) => None,
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub fn value_to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

pub fn value_to_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|v| v != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" | "1" => Some(true),
            "false" | "no" | "n" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Parse the timestamp shapes seen in analytics exports.
///
/// Numbers are epoch seconds, or milliseconds when they have 13+ digits.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_f64().and_then(epoch_to_datetime),
        Value::String(s) => parse_timestamp_str(s.trim()),
        _ => None,
    }
}

fn epoch_to_datetime(raw: f64) -> Option<DateTime<Utc>> {
    if !raw.is_finite() || raw <= 0.0 {
        return None;
    }
    let millis = if raw >= 1e12 { raw } else { raw * 1000.0 };
    Utc.timestamp_millis_opt(millis as i64).single()
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    if s.bytes().all(|b| b.is_ascii_digit()) {
        // GA exports carry `date` as YYYYMMDD.
        if s.len() == 8 {
            return NaiveDate::parse_from_str(s, "%Y%m%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc());
        }
        return s.parse::<f64>().ok().and_then(epoch_to_datetime);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y/%m/%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Sorted set of top-level column names across records.
pub fn available_columns(records: &[RawRecord]) -> BTreeSet<String> {
    records
        .iter()
        .flat_map(|r| r.keys().cloned())
        .collect()
}

/// Keep only the named columns of each record.
///
/// `parent.child` selects `child` from every object in an array-valued
/// `parent`, producing `parent: [{child: …}, …]`.
pub fn project(records: &[RawRecord], columns: &[String]) -> Vec<RawRecord> {
    records
        .iter()
        .map(|record| {
            let mut out = RawRecord::new();
            for column in columns {
                if let Some((parent, child)) = column.split_once('.') {
                    if let Some(Value::Array(items)) = record.get(parent) {
                        let picked: Vec<Value> = items
                            .iter()
                            .filter_map(|item| item.get(child))
                            .map(|v| {
                                let mut m = Map::new();
                                m.insert(child.to_string(), v.clone());
                                Value::Object(m)
                            })
                            .collect();
                        let entry = out
                            .entry(parent.to_string())
                            .or_insert_with(|| Value::Array(Vec::new()));
                        if let Value::Array(existing) = entry {
                            existing.extend(picked);
                        }
                    }
                } else if let Some(v) = record.get(column) {
                    out.insert(column.clone(), v.clone());
                }
            }
            out
        })
        .collect()
}
