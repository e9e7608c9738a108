//! Device reconciliation
//!
//! Converges device objects with a classified endpoint set, one target at a
//! time. Existence checks drive the control flow, so a pass interrupted at
//! any point is repaired by the next one:
//!
//! ```text
//! data-group targets                     URL category target
//! ──────────────────                     ───────────────────
//! write artifact (full overwrite)        query category
//! query file object                        absent  → create
//!   absent  → create (type, path)        reset rules to version marker
//!   present → modify (path)              add classified rules
//! query data-group
//!   absent  → create (bound to file)
//!   present → nothing
//! ```
//!
//! Objects are never deleted.

use std::fmt;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::classify::{ClassifiedSet, UrlRule, render_network_entries, render_string_entries};
use crate::config::{ObjectNames, SyncConfig};
use crate::error::{Error, ReconcileFailure};
use crate::traits::{
    ArtifactStore, DeviceClient, ObjectKind, ObjectParams, RuleMode, ValueType,
};

/// Device configuration surface kept in sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TargetKind {
    UrlCategory,
    UrlDataGroup,
    Ipv4DataGroup,
    Ipv6DataGroup,
}

impl TargetKind {
    /// Every target, in reconciliation order
    pub const ALL: [TargetKind; 4] = [
        TargetKind::UrlCategory,
        TargetKind::UrlDataGroup,
        TargetKind::Ipv4DataGroup,
        TargetKind::Ipv6DataGroup,
    ];

    /// Data-group value type, `None` for the URL category
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            TargetKind::UrlCategory => None,
            TargetKind::UrlDataGroup => Some(ValueType::String),
            TargetKind::Ipv4DataGroup | TargetKind::Ipv6DataGroup => Some(ValueType::Ip),
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TargetKind::UrlCategory => "url-category",
            TargetKind::UrlDataGroup => "url-data-group",
            TargetKind::Ipv4DataGroup => "ipv4-data-group",
            TargetKind::Ipv6DataGroup => "ipv6-data-group",
        };
        f.write_str(name)
    }
}

/// A configured target: kind, device object name and artifact file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileTarget {
    pub kind: TargetKind,
    /// Name of the consumer object (data-group or URL category)
    pub name: String,
    /// Artifact file name, `None` for the URL category
    pub artifact: Option<String>,
}

impl ReconcileTarget {
    pub fn from_config(kind: TargetKind, config: &SyncConfig) -> Self {
        Self {
            kind,
            name: config.names.for_target(kind).to_string(),
            artifact: config.storage.artifact_for(kind).map(str::to_string),
        }
    }

    /// Name of the data-group file object
    pub fn file_object(&self) -> String {
        ObjectNames::file_object(&self.name)
    }
}

/// What a target should contain after reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DesiredContent {
    /// Inline rules for a URL category
    UrlRules { marker: UrlRule, rules: Vec<UrlRule> },

    /// Rendered artifact for a data-group
    DataGroup {
        value_type: ValueType,
        content: String,
        entries: usize,
    },
}

impl DesiredContent {
    /// Shape a classified set for one target
    ///
    /// `version` labels the URL category's marker rule.
    pub fn build(kind: TargetKind, set: &ClassifiedSet, version: &str) -> Self {
        match kind {
            TargetKind::UrlCategory => DesiredContent::UrlRules {
                marker: UrlRule::version_marker(version),
                rules: set.url_category_rules(),
            },
            TargetKind::UrlDataGroup => {
                let keys = set.url_data_group_keys();
                DesiredContent::DataGroup {
                    value_type: ValueType::String,
                    content: render_string_entries(&keys),
                    entries: keys.len(),
                }
            }
            TargetKind::Ipv4DataGroup => DesiredContent::DataGroup {
                value_type: ValueType::Ip,
                content: render_network_entries(set.ipv4()),
                entries: set.ipv4().len(),
            },
            TargetKind::Ipv6DataGroup => DesiredContent::DataGroup {
                value_type: ValueType::Ip,
                content: render_network_entries(set.ipv6()),
                entries: set.ipv6().len(),
            },
        }
    }

    pub fn entries(&self) -> usize {
        match self {
            DesiredContent::UrlRules { rules, .. } => rules.len(),
            DesiredContent::DataGroup { entries, .. } => *entries,
        }
    }
}

/// What happened to a device object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectAction {
    Created,
    Updated,
    Unchanged,
}

/// Outcome of reconciling one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileResult {
    pub target: TargetKind,
    /// Data-group file object action, `None` for the URL category
    pub file_object: Option<ObjectAction>,
    /// Data-group or URL category action
    pub consumer: ObjectAction,
    pub entries: usize,
    /// Where the artifact was written, `None` for the URL category
    pub artifact_path: Option<PathBuf>,
}

impl ReconcileResult {
    /// Whether any object was created during this reconciliation
    pub fn created_objects(&self) -> bool {
        self.consumer == ObjectAction::Created || self.file_object == Some(ObjectAction::Created)
    }
}

/// Applies desired content to the device
pub struct Reconciler<'a> {
    device: &'a dyn DeviceClient,
    artifacts: &'a dyn ArtifactStore,
}

impl<'a> Reconciler<'a> {
    pub fn new(device: &'a dyn DeviceClient, artifacts: &'a dyn ArtifactStore) -> Self {
        Self { device, artifacts }
    }

    /// Converge one target with `desired`
    ///
    /// # Errors
    ///
    /// The first failing step, as a [`ReconcileFailure`]. Steps already taken
    /// are not rolled back; the next pass picks up from the device state.
    pub async fn reconcile(
        &self,
        target: &ReconcileTarget,
        desired: &DesiredContent,
    ) -> Result<ReconcileResult, ReconcileFailure> {
        debug!("Reconciling {} ({})", target.kind, target.name);

        match (target.kind, desired) {
            (TargetKind::UrlCategory, DesiredContent::UrlRules { marker, rules }) => {
                self.reconcile_url_category(target, marker, rules).await
            }
            (
                TargetKind::UrlDataGroup | TargetKind::Ipv4DataGroup | TargetKind::Ipv6DataGroup,
                DesiredContent::DataGroup {
                    value_type,
                    content,
                    entries,
                },
            ) => {
                self.reconcile_data_group(target, *value_type, content, *entries)
                    .await
            }
            _ => Err(ReconcileFailure::new(
                target.kind,
                "prepare",
                &Error::invalid_input(format!(
                    "desired content does not fit target {}",
                    target.kind
                )),
            )),
        }
    }

    async fn reconcile_data_group(
        &self,
        target: &ReconcileTarget,
        value_type: ValueType,
        content: &str,
        entries: usize,
    ) -> Result<ReconcileResult, ReconcileFailure> {
        let fail = |operation: &str, e: Error| ReconcileFailure::new(target.kind, operation, &e);

        let artifact = target.artifact.as_deref().ok_or_else(|| {
            fail(
                "write artifact",
                Error::config(format!("no artifact configured for {}", target.kind)),
            )
        })?;
        let source_path = self
            .artifacts
            .write(artifact, content)
            .await
            .map_err(|e| fail("write artifact", e))?;
        debug!("Wrote {} entries to {}", entries, source_path.display());

        let file_object = target.file_object();
        let file_params = ObjectParams::DataGroupFile {
            value_type,
            source_path: source_path.clone(),
        };
        let file_state = self
            .device
            .query(ObjectKind::DataGroupFile, &file_object)
            .await
            .map_err(|e| fail("query file object", e))?;

        let file_action = if file_state.exists {
            self.device
                .modify(ObjectKind::DataGroupFile, &file_object, &file_params)
                .await
                .map_err(|e| fail("modify file object", e))?;
            debug!("Data-group file {} updated from {}", file_object, source_path.display());
            ObjectAction::Updated
        } else {
            self.device
                .create(ObjectKind::DataGroupFile, &file_object, &file_params)
                .await
                .map_err(|e| fail("create file object", e))?;
            info!("Data-group file {} created from {}", file_object, source_path.display());
            ObjectAction::Created
        };

        let group_state = self
            .device
            .query(ObjectKind::ExternalDataGroup, &target.name)
            .await
            .map_err(|e| fail("query data-group", e))?;

        let group_action = if group_state.exists {
            ObjectAction::Unchanged
        } else {
            self.device
                .create(
                    ObjectKind::ExternalDataGroup,
                    &target.name,
                    &ObjectParams::ExternalDataGroup {
                        external_file_name: file_object.clone(),
                    },
                )
                .await
                .map_err(|e| fail("create data-group", e))?;
            info!("Data-group {} created from {}", target.name, file_object);
            ObjectAction::Created
        };

        Ok(ReconcileResult {
            target: target.kind,
            file_object: Some(file_action),
            consumer: group_action,
            entries,
            artifact_path: Some(source_path),
        })
    }

    async fn reconcile_url_category(
        &self,
        target: &ReconcileTarget,
        marker: &UrlRule,
        rules: &[UrlRule],
    ) -> Result<ReconcileResult, ReconcileFailure> {
        let fail = |operation: &str, e: Error| ReconcileFailure::new(target.kind, operation, &e);

        let state = self
            .device
            .query(ObjectKind::UrlCategory, &target.name)
            .await
            .map_err(|e| fail("query url category", e))?;

        let action = if state.exists {
            debug!("URL category {} exists, clearing entries", target.name);
            ObjectAction::Updated
        } else {
            self.device
                .create(
                    ObjectKind::UrlCategory,
                    &target.name,
                    &ObjectParams::UrlCategory {
                        display_name: target.name.clone(),
                    },
                )
                .await
                .map_err(|e| fail("create url category", e))?;
            info!("URL category {} created", target.name);
            ObjectAction::Created
        };

        self.device
            .modify(
                ObjectKind::UrlCategory,
                &target.name,
                &ObjectParams::UrlRules {
                    mode: RuleMode::ReplaceAll,
                    rules: vec![marker.clone()],
                },
            )
            .await
            .map_err(|e| fail("reset url category", e))?;

        if !rules.is_empty() {
            self.device
                .modify(
                    ObjectKind::UrlCategory,
                    &target.name,
                    &ObjectParams::UrlRules {
                        mode: RuleMode::Add,
                        rules: rules.to_vec(),
                    },
                )
                .await
                .map_err(|e| fail("add url rules", e))?;
        }
        debug!("URL category {} holds {} rules", target.name, rules.len() + 1);

        Ok(ReconcileResult {
            target: target.kind,
            file_object: None,
            consumer: action,
            entries: rules.len(),
            artifact_path: None,
        })
    }
}
