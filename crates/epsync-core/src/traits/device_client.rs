// # Device Client Trait
//
// Defines the interface for querying and mutating device configuration
// objects.
//
// ## Implementations
//
// - tmsh: `epsync-device-tmsh` crate
// - Tests: recording fakes in `tests/common`
//
// ## Object model
//
// The engine works with three object kinds:
//
// - Data-group file: a device-side handle on an artifact file
// - External data-group: the lookup table bound to a data-group file
// - URL category: a named list of inline URL match rules
//
// Parameters are structured values rather than command strings. Turning
// them into a concrete command line is the implementation's job.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::classify::UrlRule;

/// Kind of device configuration object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// File object backing an external data-group
    DataGroupFile,
    /// External data-group bound to a file object
    ExternalDataGroup,
    /// Custom URL category
    UrlCategory,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectKind::DataGroupFile => "data-group file",
            ObjectKind::ExternalDataGroup => "external data-group",
            ObjectKind::UrlCategory => "url category",
        };
        f.write_str(name)
    }
}

/// Value type of a data-group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// String keys (URL data-group)
    String,
    /// IP network keys (IPv4/IPv6 data-groups)
    Ip,
}

/// How a rule update applies to a URL category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleMode {
    /// Discard every existing rule, then install the given ones
    ReplaceAll,
    /// Append the given rules
    Add,
}

/// Structured parameters for create/modify
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectParams {
    /// Data-group file pointed at an artifact
    ///
    /// `value_type` is only honoured on create.
    DataGroupFile {
        value_type: ValueType,
        source_path: PathBuf,
    },

    /// External data-group bound to a file object
    ExternalDataGroup { external_file_name: String },

    /// URL category header
    UrlCategory { display_name: String },

    /// URL category rule list update
    UrlRules { mode: RuleMode, rules: Vec<UrlRule> },
}

/// Result of an existence probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectState {
    /// Whether the object exists on the device
    pub exists: bool,
    /// Raw listing or diagnostic text
    pub detail: String,
}

impl ObjectState {
    /// An object that is present
    pub fn present(detail: impl Into<String>) -> Self {
        Self {
            exists: true,
            detail: detail.into(),
        }
    }

    /// An object that is absent
    pub fn absent(detail: impl Into<String>) -> Self {
        Self {
            exists: false,
            detail: detail.into(),
        }
    }
}

/// Trait for device client implementations
///
/// # Single-shot
///
/// Each method performs exactly one device operation. Implementations must
/// not retry, and must report "object not found" from [`query`](Self::query)
/// as `Ok(ObjectState { exists: false, .. })`, never as an error. Any other
/// failure is a [`crate::Error::DeviceCli`].
#[async_trait]
pub trait DeviceClient: Send + Sync {
    /// Raw failover/cluster status text
    async fn failover_status(&self) -> Result<String, crate::Error>;

    /// Probe whether an object exists
    async fn query(&self, kind: ObjectKind, name: &str) -> Result<ObjectState, crate::Error>;

    /// Create an object
    async fn create(
        &self,
        kind: ObjectKind,
        name: &str,
        params: &ObjectParams,
    ) -> Result<(), crate::Error>;

    /// Modify an existing object in place
    async fn modify(
        &self,
        kind: ObjectKind,
        name: &str,
        params: &ObjectParams,
    ) -> Result<(), crate::Error>;

    /// Persist the running configuration
    async fn save_config(&self) -> Result<(), crate::Error>;

    /// Push configuration to the rest of the device group
    async fn sync_group(&self, group: &str) -> Result<(), crate::Error>;

    /// Get the device backend name (for logging/debugging)
    fn device_name(&self) -> &'static str;
}
