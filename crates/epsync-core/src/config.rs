//! Configuration types for the synchronizer
//!
//! This module defines all configuration structures used throughout the crate.
//! Defaults mirror a stand-alone device consuming the worldwide endpoint list
//! into URL and IPv4 data-groups.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::classify::ServiceArea;
use crate::reconcile::TargetKind;

/// Main synchronizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Which reconciliation targets are maintained
    #[serde(default)]
    pub targets: TargetToggles,

    /// Service areas whose endpoints are consumed
    #[serde(default = "default_service_areas")]
    pub service_areas: Vec<ServiceArea>,

    /// Proceed even when the provider version has not changed
    #[serde(default)]
    pub force_refresh: bool,

    /// High-availability settings
    #[serde(default)]
    pub ha: HaConfig,

    /// Provider instance to query
    #[serde(default)]
    pub instance: Instance,

    /// Base URL of the provider web service
    #[serde(default = "default_service_url")]
    pub service_url: String,

    /// Device object names
    #[serde(default)]
    pub names: ObjectNames,

    /// Local file locations
    #[serde(default)]
    pub storage: StorageConfig,
}

impl SyncConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self {
            targets: TargetToggles::default(),
            service_areas: default_service_areas(),
            force_refresh: false,
            ha: HaConfig::default(),
            instance: Instance::default(),
            service_url: default_service_url(),
            names: ObjectNames::default(),
            storage: StorageConfig::default(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if !self.targets.any() {
            return Err(crate::Error::config("No reconciliation targets enabled"));
        }

        if self.service_areas.is_empty() {
            return Err(crate::Error::config("No service areas configured"));
        }

        if self.service_url.is_empty() {
            return Err(crate::Error::config("Service URL cannot be empty"));
        }

        if self.ha.enabled && self.ha.device_group.trim().is_empty() {
            return Err(crate::Error::config(
                "HA mode requires a device group name",
            ));
        }

        self.names.validate(&self.targets)?;
        self.storage.validate()?;

        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Enabled reconciliation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetToggles {
    /// Custom URL category (inline rules)
    #[serde(default)]
    pub url_category: bool,

    /// URL data-group
    #[serde(default = "default_enabled")]
    pub url_data_group: bool,

    /// IPv4 data-group
    #[serde(default = "default_enabled")]
    pub ipv4: bool,

    /// IPv6 data-group
    #[serde(default)]
    pub ipv6: bool,
}

impl TargetToggles {
    /// Every target enabled
    pub fn all() -> Self {
        Self {
            url_category: true,
            url_data_group: true,
            ipv4: true,
            ipv6: true,
        }
    }

    /// No target enabled
    pub fn none() -> Self {
        Self {
            url_category: false,
            url_data_group: false,
            ipv4: false,
            ipv6: false,
        }
    }

    /// Enable or disable a single target
    pub fn with(mut self, target: TargetKind, enabled: bool) -> Self {
        match target {
            TargetKind::UrlCategory => self.url_category = enabled,
            TargetKind::UrlDataGroup => self.url_data_group = enabled,
            TargetKind::Ipv4DataGroup => self.ipv4 = enabled,
            TargetKind::Ipv6DataGroup => self.ipv6 = enabled,
        }
        self
    }

    pub fn is_enabled(&self, target: TargetKind) -> bool {
        match target {
            TargetKind::UrlCategory => self.url_category,
            TargetKind::UrlDataGroup => self.url_data_group,
            TargetKind::Ipv4DataGroup => self.ipv4,
            TargetKind::Ipv6DataGroup => self.ipv6,
        }
    }

    /// Enabled targets, in reconciliation order
    pub fn enabled(&self) -> Vec<TargetKind> {
        TargetKind::ALL
            .into_iter()
            .filter(|t| self.is_enabled(*t))
            .collect()
    }

    pub fn any(&self) -> bool {
        self.url_category || self.url_data_group || self.ipv4 || self.ipv6
    }
}

impl Default for TargetToggles {
    fn default() -> Self {
        Self {
            url_category: false,
            url_data_group: true,
            ipv4: true,
            ipv6: false,
        }
    }
}

/// High-availability configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HaConfig {
    /// Whether the device is part of a sync-failover group
    #[serde(default)]
    pub enabled: bool,

    /// Name of the sync-failover device group
    #[serde(default = "default_device_group")]
    pub device_group: String,
}

impl Default for HaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            device_group: default_device_group(),
        }
    }
}

/// Provider instance (cloud) to query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Instance {
    #[default]
    Worldwide,
    #[serde(rename = "USGovDoD")]
    UsGovDod,
    #[serde(rename = "USGovGCCHigh")]
    UsGovGccHigh,
    China,
    Germany,
}

impl Instance {
    /// Name used in provider paths and version records
    pub fn as_str(&self) -> &'static str {
        match self {
            Instance::Worldwide => "Worldwide",
            Instance::UsGovDod => "USGovDoD",
            Instance::UsGovGccHigh => "USGovGCCHigh",
            Instance::China => "China",
            Instance::Germany => "Germany",
        }
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Instance {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "worldwide" => Ok(Instance::Worldwide),
            "usgovdod" => Ok(Instance::UsGovDod),
            "usgovgcchigh" => Ok(Instance::UsGovGccHigh),
            "china" => Ok(Instance::China),
            "germany" => Ok(Instance::Germany),
            other => Err(crate::Error::config(format!(
                "Unknown instance '{other}'. \
                Valid: Worldwide, USGovDoD, USGovGCCHigh, China, Germany"
            ))),
        }
    }
}

/// Names of the device objects maintained by the synchronizer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectNames {
    #[serde(default = "default_url_category")]
    pub url_category: String,

    #[serde(default = "default_url_data_group")]
    pub url_data_group: String,

    #[serde(default = "default_ipv4_data_group")]
    pub ipv4_data_group: String,

    #[serde(default = "default_ipv6_data_group")]
    pub ipv6_data_group: String,
}

impl ObjectNames {
    /// Name of the consumer object for a target
    pub fn for_target(&self, target: TargetKind) -> &str {
        match target {
            TargetKind::UrlCategory => &self.url_category,
            TargetKind::UrlDataGroup => &self.url_data_group,
            TargetKind::Ipv4DataGroup => &self.ipv4_data_group,
            TargetKind::Ipv6DataGroup => &self.ipv6_data_group,
        }
    }

    /// Name of the data-group file object backing a data-group
    pub fn file_object(data_group: &str) -> String {
        format!("{data_group}_object")
    }

    fn validate(&self, targets: &TargetToggles) -> Result<(), crate::Error> {
        for target in targets.enabled() {
            let name = self.for_target(target);
            if name.trim().is_empty() {
                return Err(crate::Error::config(format!(
                    "Object name for {target} cannot be empty"
                )));
            }
            if name.chars().any(|c| c.is_whitespace() || c == '{' || c == '}') {
                return Err(crate::Error::config(format!(
                    "Object name '{name}' for {target} contains whitespace or braces"
                )));
            }
        }
        Ok(())
    }
}

impl Default for ObjectNames {
    fn default() -> Self {
        Self {
            url_category: default_url_category(),
            url_data_group: default_url_data_group(),
            ipv4_data_group: default_ipv4_data_group(),
            ipv6_data_group: default_ipv6_data_group(),
        }
    }
}

/// Local file locations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding identity, version, artifact and lock files
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    #[serde(default = "default_identity_file")]
    pub identity_file: String,

    #[serde(default = "default_version_file")]
    pub version_file: String,

    #[serde(default = "default_url_artifact")]
    pub url_artifact: String,

    #[serde(default = "default_ipv4_artifact")]
    pub ipv4_artifact: String,

    #[serde(default = "default_ipv6_artifact")]
    pub ipv6_artifact: String,

    #[serde(default = "default_lock_file")]
    pub lock_file: String,

    /// Age after which an existing lock is considered abandoned (in seconds)
    #[serde(default = "default_lock_stale_secs")]
    pub lock_stale_secs: u64,
}

impl StorageConfig {
    /// Storage rooted at `work_dir` with default file names
    pub fn in_dir(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            ..Self::default()
        }
    }

    /// Artifact file name for a data-group target
    ///
    /// `None` for the URL category, whose rules are inline.
    pub fn artifact_for(&self, target: TargetKind) -> Option<&str> {
        match target {
            TargetKind::UrlCategory => None,
            TargetKind::UrlDataGroup => Some(&self.url_artifact),
            TargetKind::Ipv4DataGroup => Some(&self.ipv4_artifact),
            TargetKind::Ipv6DataGroup => Some(&self.ipv6_artifact),
        }
    }

    pub fn lock_path(&self) -> PathBuf {
        self.work_dir.join(&self.lock_file)
    }

    fn validate(&self) -> Result<(), crate::Error> {
        if self.work_dir.as_os_str().is_empty() {
            return Err(crate::Error::config("Work directory cannot be empty"));
        }

        let files = [
            &self.identity_file,
            &self.version_file,
            &self.url_artifact,
            &self.ipv4_artifact,
            &self.ipv6_artifact,
            &self.lock_file,
        ];
        for file in files {
            if file.is_empty() || file.contains('/') {
                return Err(crate::Error::config(format!(
                    "Storage file name '{file}' must be a plain, non-empty file name"
                )));
            }
        }

        if self.lock_stale_secs == 0 {
            return Err(crate::Error::config("Lock staleness must be > 0"));
        }

        Ok(())
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            identity_file: default_identity_file(),
            version_file: default_version_file(),
            url_artifact: default_url_artifact(),
            ipv4_artifact: default_ipv4_artifact(),
            ipv6_artifact: default_ipv6_artifact(),
            lock_file: default_lock_file(),
            lock_stale_secs: default_lock_stale_secs(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_service_areas() -> Vec<ServiceArea> {
    vec![
        ServiceArea::Common,
        ServiceArea::Exchange,
        ServiceArea::SharePoint,
        ServiceArea::Skype,
        ServiceArea::Yammer,
    ]
}

fn default_service_url() -> String {
    "https://endpoints.office.com".to_string()
}

fn default_device_group() -> String {
    "device-group1".to_string()
}

fn default_url_category() -> String {
    "Office365".to_string()
}

fn default_url_data_group() -> String {
    "o365_url_dg".to_string()
}

fn default_ipv4_data_group() -> String {
    "o365_ipv4_dg".to_string()
}

fn default_ipv6_data_group() -> String {
    "o365_ipv6_dg".to_string()
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("/var/tmp/o365")
}

fn default_identity_file() -> String {
    "guid.txt".to_string()
}

fn default_version_file() -> String {
    "o365_version.txt".to_string()
}

fn default_url_artifact() -> String {
    "o365_urls.txt".to_string()
}

fn default_ipv4_artifact() -> String {
    "o365_ip4.txt".to_string()
}

fn default_ipv6_artifact() -> String {
    "o365_ip6.txt".to_string()
}

fn default_lock_file() -> String {
    "epsync.lock".to_string()
}

fn default_lock_stale_secs() -> u64 {
    1800
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = SyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.targets.enabled(),
            vec![TargetKind::UrlDataGroup, TargetKind::Ipv4DataGroup]
        );
    }

    #[test]
    fn no_targets_rejected() {
        let config = SyncConfig {
            targets: TargetToggles::none(),
            ..SyncConfig::default()
        };
        assert!(matches!(config.validate(), Err(crate::Error::Config(_))));
    }

    #[test]
    fn ha_requires_device_group() {
        let mut config = SyncConfig::default();
        config.ha.enabled = true;
        config.ha.device_group = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn disabled_target_name_not_checked() {
        let mut config = SyncConfig::default();
        config.names.ipv6_data_group = String::new();
        assert!(config.validate().is_ok());

        config.targets.ipv6 = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn instance_parses_case_insensitively() {
        assert_eq!("usgovgcchigh".parse::<Instance>().unwrap(), Instance::UsGovGccHigh);
        assert_eq!(" Worldwide ".parse::<Instance>().unwrap(), Instance::Worldwide);
        assert!("mars".parse::<Instance>().is_err());
        assert_eq!(Instance::UsGovDod.to_string(), "USGovDoD");
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: SyncConfig = serde_json::from_value(serde_json::json!({
            "targets": { "ipv6": true },
            "service_areas": ["exchange", "Skype"],
            "instance": "USGovDoD"
        }))
        .unwrap();

        assert!(config.targets.ipv6);
        assert!(config.targets.url_data_group);
        assert_eq!(
            config.service_areas,
            vec![ServiceArea::Exchange, ServiceArea::Skype]
        );
        assert_eq!(config.instance, Instance::UsGovDod);
        assert_eq!(config.storage.work_dir, PathBuf::from("/var/tmp/o365"));
    }

    #[test]
    fn file_object_name_suffix() {
        assert_eq!(ObjectNames::file_object("o365_ipv4_dg"), "o365_ipv4_dg_object");
    }
}
