//! Synchronization engine
//!
//! The SyncEngine runs one synchronization pass:
//! - Checks that this node may write configuration
//! - Loads the client identity and the previously observed version
//! - Short-circuits when the provider version is unchanged
//! - Fetches, classifies and reconciles the endpoint list
//! - Saves the device configuration and syncs the device group
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────────┐
//! │ DeviceClient │   │ EndpointService │
//! └──────────────┘   └─────────────────┘
//!        │                    │
//!        ▼                    ▼
//!     ┌──────────────────────────┐       ┌────────────┐
//!     │        SyncEngine        │──────▶│ PassEvents │
//!     └──────────────────────────┘       └────────────┘
//!        │                    │
//!        ▼                    ▼
//! ┌──────────────┐   ┌───────────────┐
//! │  StateStore  │   │ ArtifactStore │
//! └──────────────┘   └───────────────┘
//! ```
//!
//! ## Pass States
//!
//! ```text
//! CheckingWriter → LoadingIdentity → CheckingVersion → {UpToDate | Fetching}
//!   → Classifying → Reconciling (per target) → SavingConfig → {SyncingGroup | Done}
//! ```
//!
//! Not being the writer and an unchanged version end the pass early without
//! error. A failed endpoint fetch ends it with an error before anything on
//! the device or in the artifacts is touched.

use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::classify::{ClassificationStats, classify};
use crate::config::SyncConfig;
use crate::error::{ReconcileFailure, Result};
use crate::identity::IdentityStore;
use crate::reconcile::{DesiredContent, ReconcileResult, ReconcileTarget, Reconciler, TargetKind};
use crate::traits::{ArtifactStore, DeviceClient, EndpointService, StateStore};
use crate::version::{VersionTracker, needs_update};
use crate::writer_gate::WriterGate;

/// Capacity of the pass event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Stage of a pass, for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassState {
    CheckingWriter,
    LoadingIdentity,
    CheckingVersion,
    Fetching,
    Classifying,
    Reconciling(TargetKind),
    SavingConfig,
    SyncingGroup,
    Done,
}

impl fmt::Display for PassState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassState::CheckingWriter => f.write_str("checking writer"),
            PassState::LoadingIdentity => f.write_str("loading identity"),
            PassState::CheckingVersion => f.write_str("checking version"),
            PassState::Fetching => f.write_str("fetching endpoints"),
            PassState::Classifying => f.write_str("classifying"),
            PassState::Reconciling(target) => write!(f, "reconciling {target}"),
            PassState::SavingConfig => f.write_str("saving config"),
            PassState::SyncingGroup => f.write_str("syncing group"),
            PassState::Done => f.write_str("done"),
        }
    }
}

/// Events emitted by the SyncEngine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassEvent {
    /// Pass started
    Started,

    /// This node is not the writer; nothing was done
    NotWriter,

    /// Provider version unchanged; nothing was done
    UpToDate { version: String },

    /// Update needed
    UpdateNeeded {
        previous: String,
        latest: Option<String>,
        forced: bool,
    },

    /// Endpoint list retrieved
    EndpointsFetched { records: usize },

    /// Endpoint list could not be retrieved
    FetchFailed { error: String },

    /// One target converged
    TargetReconciled {
        target: TargetKind,
        entries: usize,
        created: bool,
    },

    /// One target failed; the pass continues
    TargetFailed {
        target: TargetKind,
        operation: String,
        detail: String,
    },

    /// Device configuration saved
    ConfigSaved,

    /// Device group sync triggered
    GroupSynced { group: String },
}

/// Result of a pass that went past the version check
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PassReport {
    /// Latest provider version, `None` if the version check gave no answer
    pub version: Option<String>,
    pub stats: ClassificationStats,
    pub results: Vec<ReconcileResult>,
    pub failures: Vec<ReconcileFailure>,
    pub saved: bool,
    pub synced: bool,
}

impl PassReport {
    /// Whether every enabled target converged
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn result_for(&self, target: TargetKind) -> Option<&ReconcileResult> {
        self.results.iter().find(|r| r.target == target)
    }

    pub fn failure_for(&self, target: TargetKind) -> Option<&ReconcileFailure> {
        self.failures.iter().find(|f| f.target == target)
    }
}

/// How a pass ended
///
/// A failed endpoint fetch is not an outcome; `run_pass` returns an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// Not the active node
    NotWriter,
    /// Provider version matches the previously observed one
    UpToDate { version: String },
    /// Endpoints were fetched and targets reconciled
    Synced(PassReport),
}

/// Core synchronization engine
///
/// One engine runs any number of passes, one at a time. Nothing is carried
/// in memory between passes; all state lives in the state store and on the
/// device.
pub struct SyncEngine {
    /// Provider of the endpoint list
    endpoints: Box<dyn EndpointService>,

    /// Device whose configuration is kept in sync
    device: Box<dyn DeviceClient>,

    /// Identity and version persistence
    state_store: Box<dyn StateStore>,

    /// Data-group list files
    artifacts: Box<dyn ArtifactStore>,

    config: SyncConfig,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<PassEvent>,
}

impl SyncEngine {
    /// Create a new engine
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver) where event_receiver yields pass events
    ///
    /// # Errors
    ///
    /// [`crate::Error::Config`] if the configuration does not validate.
    pub fn new(
        endpoints: Box<dyn EndpointService>,
        device: Box<dyn DeviceClient>,
        state_store: Box<dyn StateStore>,
        artifacts: Box<dyn ArtifactStore>,
        config: SyncConfig,
    ) -> Result<(Self, mpsc::Receiver<PassEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let engine = Self {
            endpoints,
            device,
            state_store,
            artifacts,
            config,
            event_tx: tx,
        };

        Ok((engine, rx))
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Run one synchronization pass
    ///
    /// # Returns
    ///
    /// - `Ok(PassOutcome)`: The pass ended normally, possibly early
    /// - `Err(Error)`: Persistence failure, endpoint fetch failure, or a
    ///   failed save or group sync
    pub async fn run_pass(&self) -> Result<PassOutcome> {
        self.emit_event(PassEvent::Started);

        self.enter(PassState::CheckingWriter);
        let gate = WriterGate::new(self.device.as_ref(), self.config.ha.enabled);
        if !gate.is_writer().await {
            info!("Not the active device, nothing to do");
            self.emit_event(PassEvent::NotWriter);
            self.enter(PassState::Done);
            return Ok(PassOutcome::NotWriter);
        }

        self.enter(PassState::LoadingIdentity);
        let identity = IdentityStore::new(self.state_store.as_ref())
            .load_or_create()
            .await?;

        self.enter(PassState::CheckingVersion);
        let tracker = VersionTracker::new(self.state_store.as_ref());
        let previous = tracker.load_previous().await?;
        let latest = tracker
            .fetch_latest(self.endpoints.as_ref(), &identity, self.config.instance)
            .await?;

        if !needs_update(&previous, latest.as_ref(), self.config.force_refresh) {
            info!("Endpoint version {} unchanged, nothing to do", previous);
            self.emit_event(PassEvent::UpToDate {
                version: previous.to_string(),
            });
            self.enter(PassState::Done);
            return Ok(PassOutcome::UpToDate {
                version: previous.to_string(),
            });
        }

        match &latest {
            Some(latest) if *latest != previous => {
                info!("Endpoint version changed: {} -> {}", previous, latest)
            }
            Some(latest) => info!("Refreshing endpoint version {} (forced)", latest),
            None => info!("Endpoint version unknown, refreshing"),
        }
        self.emit_event(PassEvent::UpdateNeeded {
            previous: previous.to_string(),
            latest: latest.as_ref().map(|v| v.to_string()),
            forced: self.config.force_refresh,
        });

        self.enter(PassState::Fetching);
        let records = match self
            .endpoints
            .fetch_endpoints(self.config.instance, &identity)
            .await
        {
            Ok(records) => records,
            Err(e) => {
                error!(
                    "Failed to fetch endpoints from {}: {}",
                    self.endpoints.service_name(),
                    e
                );
                self.emit_event(PassEvent::FetchFailed {
                    error: e.to_string(),
                });
                return Err(e);
            }
        };
        info!("Fetched {} endpoint records", records.len());
        self.emit_event(PassEvent::EndpointsFetched {
            records: records.len(),
        });

        self.enter(PassState::Classifying);
        let set = classify(&records, &self.config.service_areas, &self.config.targets);
        let stats = set.stats();
        info!(
            "Classified {} records: {} URLs, {} IPv4 networks, {} IPv6 networks",
            stats.records_matched,
            set.urls().len(),
            set.ipv4().len(),
            set.ipv6().len()
        );

        // The marker labels the category with what was applied; fall back to
        // the previous stamp when the version check gave no answer.
        let marker_version = latest.as_ref().unwrap_or(&previous).to_string();

        let mut report = PassReport {
            version: latest.as_ref().map(|v| v.to_string()),
            stats,
            ..PassReport::default()
        };

        let reconciler = Reconciler::new(self.device.as_ref(), self.artifacts.as_ref());
        // Validation guarantees at least one target, so save always follows
        for kind in &self.config.targets.enabled() {
            self.enter(PassState::Reconciling(*kind));
            let target = ReconcileTarget::from_config(*kind, &self.config);
            let desired = DesiredContent::build(*kind, &set, &marker_version);

            match reconciler.reconcile(&target, &desired).await {
                Ok(result) => {
                    info!(
                        "{} {} converged with {} entries",
                        target.kind, target.name, result.entries
                    );
                    self.emit_event(PassEvent::TargetReconciled {
                        target: *kind,
                        entries: result.entries,
                        created: result.created_objects(),
                    });
                    report.results.push(result);
                }
                Err(failure) => {
                    error!("{}", failure);
                    self.emit_event(PassEvent::TargetFailed {
                        target: *kind,
                        operation: failure.operation.clone(),
                        detail: failure.detail.clone(),
                    });
                    report.failures.push(failure);
                }
            }
        }

        self.enter(PassState::SavingConfig);
        self.device.save_config().await?;
        report.saved = true;
        info!("Device configuration saved");
        self.emit_event(PassEvent::ConfigSaved);

        if self.config.ha.enabled {
            self.enter(PassState::SyncingGroup);
            let group = &self.config.ha.device_group;
            self.device.sync_group(group).await?;
            report.synced = true;
            info!("Synced device group {}", group);
            self.emit_event(PassEvent::GroupSynced {
                group: group.clone(),
            });
        }

        self.enter(PassState::Done);
        if report.is_clean() {
            info!("Pass complete");
        } else {
            warn!("Pass complete with {} failed targets", report.failures.len());
        }
        Ok(PassOutcome::Synced(report))
    }

    fn enter(&self, state: PassState) {
        debug!("Pass state: {}", state);
    }

    /// Emit an event
    ///
    /// Uses try_send so a slow observer never stalls a pass. Events are
    /// dropped with a warning when the channel is full.
    fn emit_event(&self, event: PassEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!("Event channel full, dropping event: {:?}", event);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Event channel closed, event not delivered");
            }
        }
    }
}
