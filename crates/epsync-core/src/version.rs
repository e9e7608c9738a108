//! Provider version tracking
//!
//! The provider republishes its endpoint list under a 10-digit version
//! stamp. The tracker remembers the last stamp it observed and decides
//! whether a pass has anything to do.
//!
//! The version check is advisory: if the provider cannot answer, the pass
//! proceeds as though the version changed. Only the endpoint list fetch is
//! mandatory.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::Instance;
use crate::error::{Error, Result};
use crate::identity::ClientIdentity;
use crate::traits::{EndpointService, StateKey, StateStore};

/// Stamp persisted when nothing valid has been observed yet
pub const SENTINEL_VERSION: &str = "1970010200";

/// Provider-issued freshness token (exactly 10 decimal digits)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VersionStamp(String);

impl VersionStamp {
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() == 10 && s.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(s.to_string()))
        } else {
            Err(Error::invalid_input(format!(
                "'{s}' is not a 10-digit version stamp"
            )))
        }
    }

    pub fn sentinel() -> Self {
        Self(SENTINEL_VERSION.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One entry of the provider's version listing
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VersionRecord {
    #[serde(default)]
    pub instance: Option<String>,
    #[serde(default)]
    pub latest: Option<String>,
}

impl VersionRecord {
    pub fn new(instance: impl Into<String>, latest: impl Into<String>) -> Self {
        Self {
            instance: Some(instance.into()),
            latest: Some(latest.into()),
        }
    }
}

/// Pick the well-formed stamp published for `instance`, if any
pub fn select_latest(records: &[VersionRecord], instance: Instance) -> Option<VersionStamp> {
    records
        .iter()
        .filter(|r| r.instance.as_deref() == Some(instance.as_str()))
        .filter_map(|r| r.latest.as_deref())
        .find_map(|latest| VersionStamp::parse(latest).ok())
}

/// Whether a pass must fetch and reconcile
///
/// True when the provider gave no usable stamp, when the stamp differs from
/// the previous one, or when a refresh is forced.
pub fn needs_update(previous: &VersionStamp, latest: Option<&VersionStamp>, force: bool) -> bool {
    match latest {
        None => true,
        Some(latest) => force || latest != previous,
    }
}

/// Persists and compares provider version stamps
pub struct VersionTracker<'a> {
    store: &'a dyn StateStore,
}

impl<'a> VersionTracker<'a> {
    pub fn new(store: &'a dyn StateStore) -> Self {
        Self { store }
    }

    /// Load the previously observed stamp
    ///
    /// A missing or malformed value is replaced by [`SENTINEL_VERSION`] so the
    /// backing file always exists afterwards.
    pub async fn load_previous(&self) -> Result<VersionStamp> {
        if let Some(raw) = self.store.load(StateKey::LastVersion).await? {
            match VersionStamp::parse(&raw) {
                Ok(stamp) => {
                    debug!("Previous version is {}", stamp);
                    return Ok(stamp);
                }
                Err(e) => warn!("Stored version is malformed ({}), resetting", e),
            }
        }

        let sentinel = VersionStamp::sentinel();
        self.store
            .store(StateKey::LastVersion, sentinel.as_str())
            .await?;
        info!("No valid previous version found, stored {}", sentinel);
        Ok(sentinel)
    }

    /// Ask the provider for the latest stamp of `instance`
    ///
    /// Returns `Ok(None)` if the request fails or the answer holds no
    /// well-formed stamp for the instance. A stamp that is found is
    /// persisted immediately: it records what was observed, not what was
    /// applied.
    ///
    /// # Errors
    ///
    /// Only storage failures.
    pub async fn fetch_latest(
        &self,
        service: &dyn EndpointService,
        identity: &ClientIdentity,
        instance: Instance,
    ) -> Result<Option<VersionStamp>> {
        let records = match service.fetch_versions(identity).await {
            Ok(records) => records,
            Err(e) => {
                warn!(
                    "Version request to {} failed ({}), assuming the version changed",
                    service.service_name(),
                    e
                );
                return Ok(None);
            }
        };

        let Some(latest) = select_latest(&records, instance) else {
            warn!(
                "Version response has no valid stamp for instance {}, assuming the version changed",
                instance
            );
            return Ok(None);
        };

        self.store
            .store(StateKey::LastVersion, latest.as_str())
            .await?;
        debug!("Latest version is {}", latest);
        Ok(Some(latest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryStateStore;

    fn stamp(s: &str) -> VersionStamp {
        VersionStamp::parse(s).unwrap()
    }

    #[test]
    fn stamp_requires_exactly_ten_digits() {
        assert!(VersionStamp::parse("2024010100").is_ok());
        assert!(VersionStamp::parse(" 2024010100\n").is_ok());
        assert!(VersionStamp::parse("202401010").is_err());
        assert!(VersionStamp::parse("20240101000").is_err());
        assert!(VersionStamp::parse("2024-01-01").is_err());
        assert!(VersionStamp::parse("").is_err());
    }

    #[test]
    fn needs_update_truth_table() {
        let prev = stamp("2024010100");
        let same = stamp("2024010100");
        let newer = stamp("2024020100");

        assert!(!needs_update(&prev, Some(&same), false));
        assert!(needs_update(&prev, Some(&same), true));
        assert!(needs_update(&prev, Some(&newer), false));
        assert!(needs_update(&prev, Some(&newer), true));
        assert!(needs_update(&prev, None, false));
        assert!(needs_update(&prev, None, true));
    }

    #[test]
    fn select_latest_matches_instance_and_format() {
        let records = vec![
            VersionRecord::new("China", "2024030100"),
            VersionRecord {
                instance: None,
                latest: Some("2024040100".to_string()),
            },
            VersionRecord::new("Worldwide", "garbage"),
            VersionRecord::new("Worldwide", "2024050100"),
        ];

        assert_eq!(
            select_latest(&records, Instance::Worldwide),
            Some(stamp("2024050100"))
        );
        assert_eq!(
            select_latest(&records, Instance::China),
            Some(stamp("2024030100"))
        );
        assert_eq!(select_latest(&records, Instance::Germany), None);
    }

    #[tokio::test]
    async fn load_previous_persists_sentinel_when_absent() {
        let store = MemoryStateStore::new();
        let tracker = VersionTracker::new(&store);

        let previous = tracker.load_previous().await.unwrap();

        assert_eq!(previous.as_str(), SENTINEL_VERSION);
        assert_eq!(
            store.load(StateKey::LastVersion).await.unwrap().as_deref(),
            Some(SENTINEL_VERSION)
        );
    }

    #[tokio::test]
    async fn load_previous_resets_malformed_value() {
        let store = MemoryStateStore::new();
        store.store(StateKey::LastVersion, "yesterday").await.unwrap();

        let previous = VersionTracker::new(&store).load_previous().await.unwrap();

        assert_eq!(previous, VersionStamp::sentinel());
        assert_eq!(
            store.load(StateKey::LastVersion).await.unwrap().as_deref(),
            Some(SENTINEL_VERSION)
        );
    }

    #[tokio::test]
    async fn load_previous_keeps_valid_value() {
        let store = MemoryStateStore::new();
        store.store(StateKey::LastVersion, "2024010100").await.unwrap();

        let previous = VersionTracker::new(&store).load_previous().await.unwrap();
        assert_eq!(previous, stamp("2024010100"));
    }
}
