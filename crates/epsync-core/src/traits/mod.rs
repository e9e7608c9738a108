//! Core traits for the synchronizer
//!
//! This module defines the abstract interfaces the engine calls out to.
//!
//! - [`EndpointService`]: Fetch version stamps and endpoint lists from the provider
//! - [`DeviceClient`]: Query and mutate device configuration objects
//! - [`StateStore`]: Persist the client identity and last observed version
//! - [`ArtifactStore`]: Materialize data-group list files

pub mod endpoint_service;
pub mod device_client;
pub mod state_store;
pub mod artifact_store;

pub use endpoint_service::EndpointService;
pub use device_client::{DeviceClient, ObjectKind, ObjectParams, ObjectState, RuleMode, ValueType};
pub use state_store::{StateKey, StateStore};
pub use artifact_store::ArtifactStore;
