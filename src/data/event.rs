//! Interaction events and the attribute groups they carry.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a telemetry row records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PageView,
    Click,
    FormSubmit,
    AddToCart,
    Checkout,
    Purchase,
    Error,
    Other(String),
}

impl EventType {
    /// Parse a raw event label, accepting the usual spellings.
    pub fn parse(raw: &str) -> Self {
        let key: String = raw
            .trim()
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .flat_map(char::to_lowercase)
            .collect();
        match key.as_str() {
            "pageview" | "page" | "view" | "screenview" | "pageload" => Self::PageView,
            "click" | "tap" => Self::Click,
            "formsubmit" | "submit" | "form" => Self::FormSubmit,
            "addtocart" | "cart" | "addtobasket" => Self::AddToCart,
            "checkout" | "begincheckout" => Self::Checkout,
            "purchase" | "order" | "transaction" => Self::Purchase,
            "error" | "exception" => Self::Error,
            _ => Self::Other(raw.trim().to_string()),
        }
    }

    /// True for events that show engagement beyond viewing a page.
    pub fn is_interaction(&self) -> bool {
        matches!(
            self,
            Self::Click | Self::FormSubmit | Self::AddToCart | Self::Checkout | Self::Purchase
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PageView => write!(f, "page_view"),
            Self::Click => write!(f, "click"),
            Self::FormSubmit => write!(f, "form_submit"),
            Self::AddToCart => write!(f, "add_to_cart"),
            Self::Checkout => write!(f, "checkout"),
            Self::Purchase => write!(f, "purchase"),
            Self::Error => write!(f, "error"),
            Self::Other(s) => write!(f, "{s}"),
        }
    }
}

/// Coarse device family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Desktop,
    Mobile,
    Tablet,
    Unknown,
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Desktop => write!(f, "Desktop"),
            Self::Mobile => write!(f, "Mobile"),
            Self::Tablet => write!(f, "Tablet"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub category: Option<String>,
    pub user_agent: Option<String>,
    pub browser: Option<String>,
    pub is_mobile: Option<bool>,
}

impl DeviceInfo {
    /// Classify from the category, then the user agent, then `is_mobile`.
    pub fn class(&self) -> DeviceClass {
        if let Some(category) = &self.category {
            let c = category.to_ascii_lowercase();
            if c.contains("tablet") || c.contains("ipad") {
                return DeviceClass::Tablet;
            }
            if c.contains("mobile") || c.contains("phone") {
                return DeviceClass::Mobile;
            }
            if c.contains("desktop") || c.contains("laptop") || c == "pc" || c.contains("computer") {
                return DeviceClass::Desktop;
            }
        }
        if let Some(ua) = &self.user_agent {
            let ua = ua.to_ascii_lowercase();
            if ua.contains("ipad") || ua.contains("tablet") {
                return DeviceClass::Tablet;
            }
            if ua.contains("android") && !ua.contains("mobile") {
                return DeviceClass::Tablet;
            }
            if ua.contains("mobi") || ua.contains("iphone") || ua.contains("android") {
                return DeviceClass::Mobile;
            }
            if ua.contains("windows") || ua.contains("macintosh") || ua.contains("x11") {
                return DeviceClass::Desktop;
            }
        }
        match self.is_mobile {
            Some(true) => DeviceClass::Mobile,
            Some(false) => DeviceClass::Desktop,
            None => DeviceClass::Unknown,
        }
    }

    /// Browser from the explicit field, else sniffed from the user agent.
    pub fn browser_name(&self) -> Option<String> {
        if let Some(b) = &self.browser {
            return Some(b.clone());
        }
        let ua = self.user_agent.as_deref()?.to_ascii_lowercase();
        // Order matters: Chromium forks also advertise Chrome and Safari.
        let name = if ua.contains("edg/") || ua.contains("edge") {
            "Edge"
        } else if ua.contains("opr/") || ua.contains("opera") {
            "Opera"
        } else if ua.contains("samsungbrowser") {
            "Samsung Internet"
        } else if ua.contains("firefox") || ua.contains("fxios") {
            "Firefox"
        } else if ua.contains("chrome") || ua.contains("crios") {
            "Chrome"
        } else if ua.contains("safari") {
            "Safari"
        } else {
            return None;
        };
        Some(name.to_string())
    }

    /// Fill unset fields from `other`.
    pub fn fill_from(&mut self, other: &Self) {
        fill(&mut self.category, &other.category);
        fill(&mut self.user_agent, &other.user_agent);
        fill(&mut self.browser, &other.browser);
        if self.is_mobile.is_none() {
            self.is_mobile = other.is_mobile;
        }
    }
}

/// Marketing channel a session arrived through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficChannel {
    Direct,
    OrganicSearch,
    PaidSearch,
    Social,
    Email,
    Referral,
    Display,
    Affiliates,
    Other,
}

impl TrafficChannel {
    fn from_grouping(raw: &str) -> Self {
        let key: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .flat_map(char::to_lowercase)
            .collect();
        match key.as_str() {
            "direct" => Self::Direct,
            "organicsearch" | "organic" => Self::OrganicSearch,
            "paidsearch" | "paid" | "cpc" => Self::PaidSearch,
            "social" | "organicsocial" | "paidsocial" => Self::Social,
            "email" => Self::Email,
            "referral" => Self::Referral,
            "display" => Self::Display,
            "affiliates" | "affiliate" => Self::Affiliates,
            _ => Self::Other,
        }
    }

    fn from_medium(raw: &str) -> Option<Self> {
        let m = raw.trim().to_ascii_lowercase();
        let channel = match m.as_str() {
            "organic" => Self::OrganicSearch,
            "cpc" | "ppc" | "paid" | "paidsearch" | "paid_search" => Self::PaidSearch,
            "social" | "social-network" | "social_network" | "sm" => Self::Social,
            "email" | "e-mail" | "newsletter" => Self::Email,
            "referral" => Self::Referral,
            "display" | "cpm" | "banner" => Self::Display,
            "affiliate" | "affiliates" => Self::Affiliates,
            "(none)" | "none" | "direct" => Self::Direct,
            _ => return None,
        };
        Some(channel)
    }
}

impl fmt::Display for TrafficChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Direct => "Direct",
            Self::OrganicSearch => "Organic Search",
            Self::PaidSearch => "Paid Search",
            Self::Social => "Social",
            Self::Email => "Email",
            Self::Referral => "Referral",
            Self::Display => "Display",
            Self::Affiliates => "Affiliates",
            Self::Other => "Other",
        };
        f.write_str(label)
    }
}

const SEARCH_ENGINES: &[&str] = &[
    "google", "bing", "yahoo", "duckduckgo", "baidu", "yandex", "ecosia",
];
const SOCIAL_NETWORKS: &[&str] = &[
    "facebook", "twitter", "linkedin", "instagram", "reddit", "youtube", "pinterest", "tiktok",
    "quora",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrafficInfo {
    pub source: Option<String>,
    pub medium: Option<String>,
    pub channel_grouping: Option<String>,
    pub referrer: Option<String>,
    pub campaign: Option<String>,
}

impl TrafficInfo {
    /// Attribute a channel: explicit grouping, then medium, then the
    /// referrer or source host, else Direct.
    pub fn channel(&self) -> TrafficChannel {
        if let Some(grouping) = &self.channel_grouping {
            return TrafficChannel::from_grouping(grouping);
        }
        if let Some(channel) = self.medium.as_deref().and_then(TrafficChannel::from_medium) {
            return channel;
        }

        let hosts = [self.referrer.as_deref(), self.source.as_deref()];
        for host in hosts.into_iter().flatten() {
            let h = host.to_ascii_lowercase();
            if SEARCH_ENGINES.iter().any(|s| h.contains(s)) {
                return TrafficChannel::OrganicSearch;
            }
            if SOCIAL_NETWORKS.iter().any(|s| h.contains(s)) {
                return TrafficChannel::Social;
            }
            if h.contains("mail.") || h.contains("newsletter") {
                return TrafficChannel::Email;
            }
        }

        match (&self.referrer, self.source.as_deref()) {
            (Some(_), _) => TrafficChannel::Referral,
            (None, Some(s)) if !is_direct_source(s) => TrafficChannel::Referral,
            _ => TrafficChannel::Direct,
        }
    }

    /// Source label: explicit source, else the referrer host, else `(direct)`.
    pub fn source_name(&self) -> String {
        if let Some(s) = &self.source {
            return s.clone();
        }
        if let Some(r) = &self.referrer {
            let without_scheme = r
                .strip_prefix("https://")
                .or_else(|| r.strip_prefix("http://"))
                .unwrap_or(r);
            let host = without_scheme.split('/').next().unwrap_or(without_scheme);
            if !host.is_empty() {
                return host.to_string();
            }
        }
        "(direct)".to_string()
    }

    pub fn fill_from(&mut self, other: &Self) {
        fill(&mut self.source, &other.source);
        fill(&mut self.medium, &other.medium);
        fill(&mut self.channel_grouping, &other.channel_grouping);
        fill(&mut self.referrer, &other.referrer);
        fill(&mut self.campaign, &other.campaign);
    }
}

fn is_direct_source(source: &str) -> bool {
    matches!(
        source.trim().to_ascii_lowercase().as_str(),
        "(direct)" | "direct" | "(none)" | "none"
    )
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationInfo {
    pub continent: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
}

impl LocationInfo {
    pub fn fill_from(&mut self, other: &Self) {
        fill(&mut self.continent, &other.continent);
        fill(&mut self.country, &other.country);
        fill(&mut self.city, &other.city);
    }
}

/// Visit-level facts carried by session-shaped exports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisitInfo {
    /// Seconds on site as reported by the source.
    pub time_on_site: Option<f64>,
    pub visit_number: Option<u32>,
    pub new_visit: Option<bool>,
    pub transactions: Option<f64>,
    pub revenue: Option<f64>,
}

impl VisitInfo {
    pub fn fill_from(&mut self, other: &Self) {
        self.time_on_site = self.time_on_site.or(other.time_on_site);
        self.visit_number = self.visit_number.or(other.visit_number);
        self.new_visit = self.new_visit.or(other.new_visit);
        self.transactions = self.transactions.or(other.transactions);
        self.revenue = self.revenue.or(other.revenue);
    }
}

fn fill(target: &mut Option<String>, source: &Option<String>) {
    if target.is_none() {
        target.clone_from(source);
    }
}

/// One row of website telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionEvent {
    pub session_id: Option<String>,
    pub visitor_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    /// Normalized path (scheme, host, query and fragment removed).
    pub page: String,
    pub page_title: Option<String>,
    pub event_type: EventType,
    pub device: DeviceInfo,
    pub traffic: TrafficInfo,
    pub location: LocationInfo,
    pub visit: VisitInfo,
    /// Index of the normalized source record in `Dataset::records`.
    pub record: usize,
    /// Ingest order.
    pub sequence: usize,
}

/// Strip scheme, host, query string and fragment from a page reference.
///
/// Bare screen names (`Home`, `Checkout Review`) pass through untouched.
pub fn normalize_page(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut path = if let Some(rest) = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
    {
        match rest.find('/') {
            Some(i) => &rest[i..],
            None => "/",
        }
    } else if !trimmed.starts_with('/')
        && let Some(i) = trimmed.find('/')
        && trimmed[..i].contains('.')
        && !trimmed[..i].contains(' ')
    {
        &trimmed[i..]
    } else {
        trimmed
    };

    if let Some(i) = path.find(['?', '#']) {
        path = &path[..i];
    }
    if path.len() > 1 {
        path = path.trim_end_matches('/');
    }
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

/// Read a query-string parameter from a URL-ish page reference.
pub fn query_param(raw: &str, name: &str) -> Option<String> {
    let query = raw.split_once('?')?.1;
    let query = query.split('#').next().unwrap_or(query);
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.replace('+', " "))
        .filter(|v| !v.trim().is_empty())
}
