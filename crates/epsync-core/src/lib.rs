// # epsync-core
//
// Core library for synchronizing a device's bypass configuration with a
// provider's published service endpoint list.
//
// ## Architecture Overview
//
// This library provides the synchronization engine and the seams it talks
// through:
// - **EndpointService**: Trait for the provider's version and endpoint lookups
// - **DeviceClient**: Trait for querying and changing device objects
// - **StateStore**: Trait for the identity and version that outlive a pass
// - **ArtifactStore**: Trait for the list files data-groups read from
// - **SyncEngine**: Runs one pass: writer check → version check → fetch →
//   classify → reconcile → save/sync
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Core logic is separate from transport and device syntax
// 2. **Idempotency**: Every device change is preceded by an existence check
// 3. **Fail Closed**: A node that cannot prove it is active does not write
// 4. **Library-First**: All core functionality can be used as a library

pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod identity;
pub mod reconcile;
pub mod state;
pub mod traits;
pub mod version;
pub mod writer_gate;

// Re-export core types for convenience
pub use classify::{ClassifiedSet, EndpointRecord, MatchType, ServiceArea, UrlRule, classify};
pub use config::{HaConfig, Instance, ObjectNames, StorageConfig, SyncConfig, TargetToggles};
pub use engine::{PassEvent, PassOutcome, PassReport, SyncEngine};
pub use error::{Error, ReconcileFailure, Result};
pub use identity::ClientIdentity;
pub use reconcile::{ReconcileResult, TargetKind};
pub use state::{FileArtifactStore, FileStateStore, MemoryArtifactStore, MemoryStateStore, PassLock};
pub use traits::{ArtifactStore, DeviceClient, EndpointService, StateStore};
pub use version::VersionStamp;
