//! Endpoint classification
//!
//! Turns the provider's endpoint records into the three sets the device
//! understands: bypass URLs, IPv4 networks and IPv6 networks. Each set is
//! deduplicated and kept in lexicographic order, so the output does not
//! depend on record order.
//!
//! URLs are kept raw here. The two URL targets shape them differently:
//! - [`ClassifiedSet::url_category_rules`] for the custom URL category
//! - [`ClassifiedSet::url_data_group_keys`] for the flat URL data-group

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use ipnetwork::{Ipv4Network, Ipv6Network};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::TargetToggles;

/// Coarse grouping of a provider's endpoints
///
/// Areas compare case-insensitively, including `Other` names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ServiceArea {
    Common,
    Exchange,
    SharePoint,
    /// Skype for Business and Teams
    Skype,
    Yammer,
    /// Any area this build does not know about
    Other(String),
}

impl ServiceArea {
    pub fn as_str(&self) -> &str {
        match self {
            ServiceArea::Common => "Common",
            ServiceArea::Exchange => "Exchange",
            ServiceArea::SharePoint => "SharePoint",
            ServiceArea::Skype => "Skype",
            ServiceArea::Yammer => "Yammer",
            ServiceArea::Other(name) => name,
        }
    }
}

impl PartialEq for ServiceArea {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ServiceArea::Other(a), ServiceArea::Other(b)) => a.eq_ignore_ascii_case(b),
            (a, b) => std::mem::discriminant(a) == std::mem::discriminant(b),
        }
    }
}

impl Eq for ServiceArea {}

impl Hash for ServiceArea {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        if let ServiceArea::Other(name) = self {
            name.to_ascii_lowercase().hash(state);
        }
    }
}

impl fmt::Display for ServiceArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for ServiceArea {
    fn from(s: &str) -> Self {
        let s = s.trim();
        match s.to_ascii_lowercase().as_str() {
            "common" => ServiceArea::Common,
            "exchange" => ServiceArea::Exchange,
            "sharepoint" => ServiceArea::SharePoint,
            "skype" | "teams" => ServiceArea::Skype,
            "yammer" => ServiceArea::Yammer,
            _ => ServiceArea::Other(s.to_string()),
        }
    }
}

impl From<String> for ServiceArea {
    fn from(s: String) -> Self {
        ServiceArea::from(s.as_str())
    }
}

impl From<ServiceArea> for String {
    fn from(area: ServiceArea) -> Self {
        area.as_str().to_string()
    }
}

impl FromStr for ServiceArea {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(crate::Error::config("Service area cannot be empty"));
        }
        Ok(ServiceArea::from(s))
    }
}

/// One record of the provider's endpoint list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointRecord {
    pub id: u64,
    pub service_area: ServiceArea,
    #[serde(default)]
    pub service_area_display_name: Option<String>,

    /// Required URLs
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub allow_urls: Vec<String>,
    #[serde(default)]
    pub default_urls: Vec<String>,

    /// IPv4 and IPv6 networks, mixed
    #[serde(default)]
    pub ips: Vec<String>,

    #[serde(default)]
    pub tcp_ports: Option<String>,
    #[serde(default)]
    pub udp_ports: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub express_route: Option<bool>,
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl EndpointRecord {
    /// A bare record with no URLs or networks
    pub fn new(id: u64, service_area: ServiceArea) -> Self {
        Self {
            id,
            service_area,
            service_area_display_name: None,
            urls: Vec::new(),
            allow_urls: Vec::new(),
            default_urls: Vec::new(),
            ips: Vec::new(),
            tcp_ports: None,
            udp_ports: None,
            category: None,
            express_route: None,
            required: None,
            notes: None,
        }
    }

    pub fn with_urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.urls = urls.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_ips<I, S>(mut self, ips: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ips = ips.into_iter().map(Into::into).collect();
        self
    }

    /// All URLs in required, allowed, default order
    pub fn all_urls(&self) -> impl Iterator<Item = &String> {
        self.urls
            .iter()
            .chain(self.allow_urls.iter())
            .chain(self.default_urls.iter())
    }
}

/// How a URL category rule matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MatchType {
    Exact,
    Glob,
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchType::Exact => f.write_str("exact-match"),
            MatchType::Glob => f.write_str("glob-match"),
        }
    }
}

/// One URL category rule
///
/// `pattern` is unescaped; escaping `*` for a particular CLI is the device
/// client's concern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UrlRule {
    pub pattern: String,
    pub match_type: MatchType,
}

impl UrlRule {
    pub fn exact(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            match_type: MatchType::Exact,
        }
    }

    pub fn glob(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            match_type: MatchType::Glob,
        }
    }

    /// First entry of a freshly reset category, naming the applied version
    pub fn version_marker(version: &str) -> Self {
        Self::exact(format!("https://{version}/"))
    }
}

/// Counts of accumulated entries before deduplication
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassificationStats {
    pub records_matched: usize,
    pub urls_seen: usize,
    pub ipv4_seen: usize,
    pub ipv6_seen: usize,
}

/// Deduplicated, sorted classification output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifiedSet {
    urls: BTreeSet<String>,
    ipv4: BTreeSet<String>,
    ipv6: BTreeSet<String>,
    stats: ClassificationStats,
}

impl ClassifiedSet {
    /// Raw bypass URLs
    pub fn urls(&self) -> &BTreeSet<String> {
        &self.urls
    }

    pub fn ipv4(&self) -> &BTreeSet<String> {
        &self.ipv4
    }

    pub fn ipv6(&self) -> &BTreeSet<String> {
        &self.ipv6
    }

    pub fn stats(&self) -> ClassificationStats {
        self.stats
    }

    /// Rules for the custom URL category
    ///
    /// Each URL is lower-cased. A URL starting with `*` yields two glob rules
    /// (`https://<url>/` and `https://<url>`); any other URL yields the same
    /// pair as exact rules. Both forms are needed because the category
    /// lookup for plain HTTP omits the trailing slash.
    pub fn url_category_rules(&self) -> Vec<UrlRule> {
        let lowered: BTreeSet<String> = self.urls.iter().map(|u| u.to_lowercase()).collect();

        let rules: BTreeSet<UrlRule> = lowered
            .iter()
            .flat_map(|url| {
                let with_slash = format!("https://{url}/");
                let without_slash = format!("https://{url}");
                if url.starts_with('*') {
                    [UrlRule::glob(with_slash), UrlRule::glob(without_slash)]
                } else {
                    [UrlRule::exact(with_slash), UrlRule::exact(without_slash)]
                }
            })
            .collect();

        rules.into_iter().collect()
    }

    /// Keys for the URL data-group
    ///
    /// Wildcards are widened away (see [`strip_wildcard`]), then keys are
    /// lower-cased, deduplicated and sorted. Keys that are empty after
    /// stripping are dropped.
    pub fn url_data_group_keys(&self) -> BTreeSet<String> {
        self.urls
            .iter()
            .map(|url| strip_wildcard(url).to_lowercase())
            .filter(|key| !key.is_empty())
            .collect()
    }
}

/// Remove a wildcard prefix from a URL
///
/// Everything up to and including the last `*`, plus the non-dot characters
/// that follow it and the separating dot, is removed:
/// `*.outlook.com` becomes `outlook.com`, `autodiscover.*.onmicrosoft.com`
/// becomes `onmicrosoft.com`. URLs without `*` are returned unchanged.
pub fn strip_wildcard(url: &str) -> &str {
    match url.rfind('*') {
        Some(pos) => {
            let rest = &url[pos + 1..];
            let rest = rest.trim_start_matches(|c: char| c != '.');
            rest.strip_prefix('.').unwrap_or(rest)
        }
        None => url,
    }
}

/// Classify endpoint records
///
/// Only records whose service area is in `interest` contribute. URLs are
/// collected when either URL target is enabled, IPv4 and IPv6 networks only
/// when their own target is enabled. A network is IPv6 if it contains a
/// colon, IPv4 otherwise; entries that do not parse as a network of their
/// class are dropped with a warning.
pub fn classify(
    records: &[EndpointRecord],
    interest: &[ServiceArea],
    targets: &TargetToggles,
) -> ClassifiedSet {
    let want_urls = targets.url_category || targets.url_data_group;
    let mut set = ClassifiedSet::default();

    for record in records.iter().filter(|r| interest.contains(&r.service_area)) {
        set.stats.records_matched += 1;

        if want_urls {
            for url in record.all_urls() {
                set.stats.urls_seen += 1;
                let url = url.trim();
                if !url.is_empty() {
                    set.urls.insert(url.to_string());
                }
            }
        }

        for ip in &record.ips {
            let ip = ip.trim();
            if ip.contains(':') {
                if !targets.ipv6 {
                    continue;
                }
                set.stats.ipv6_seen += 1;
                if parse_network::<Ipv6Network>(ip).is_some() {
                    set.ipv6.insert(ip.to_string());
                } else {
                    warn!("Dropping malformed IPv6 network '{}' (record {})", ip, record.id);
                }
            } else {
                if !targets.ipv4 {
                    continue;
                }
                set.stats.ipv4_seen += 1;
                if parse_network::<Ipv4Network>(ip).is_some() {
                    set.ipv4.insert(ip.to_string());
                } else {
                    warn!("Dropping malformed IPv4 network '{}' (record {})", ip, record.id);
                }
            }
        }
    }

    debug!(
        "Classified {} records: {} URLs, {} IPv4, {} IPv6 (unique)",
        set.stats.records_matched,
        set.urls.len(),
        set.ipv4.len(),
        set.ipv6.len()
    );
    set
}

/// Parse a network in address or `address/prefix` form; the prefix must be
/// plain decimal digits
fn parse_network<N: FromStr>(s: &str) -> Option<N> {
    if let Some((_, prefix)) = s.split_once('/') {
        if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
    }
    s.parse().ok()
}

/// Render data-group string entries (`<key> := 1,`)
pub fn render_string_entries<'a>(keys: impl IntoIterator<Item = &'a String>) -> String {
    keys.into_iter().map(|k| format!("{k} := 1,\n")).collect()
}

/// Render data-group network entries (`network <cidr>,`)
pub fn render_network_entries<'a>(networks: impl IntoIterator<Item = &'a String>) -> String {
    networks
        .into_iter()
        .map(|n| format!("network {n},\n"))
        .collect()
}
