//! Contract Test: Reconciliation Idempotency
//!
//! Verifies that existence checks, not completion flags, drive device
//! changes, so repeated and interrupted passes converge without churn.
//!
//! Constraints verified:
//! - A second reconciliation of unchanged content creates nothing
//! - Artifacts are byte-identical across repeated reconciliations
//! - A pass interrupted after the file object creates only what is missing
//! - Identity and version survive a restart through the file store

mod common;

use common::*;
use epsync_core::classify::{ServiceArea, classify};
use epsync_core::config::TargetToggles;
use epsync_core::engine::PassOutcome;
use epsync_core::reconcile::{DesiredContent, ObjectAction, ReconcileTarget, Reconciler, TargetKind};
use epsync_core::state::{FileArtifactStore, FileStateStore, MemoryArtifactStore};
use epsync_core::traits::{ObjectKind, StateKey, StateStore};
use epsync_core::SyncEngine;
use tempfile::tempdir;

#[tokio::test]
async fn second_reconcile_creates_nothing_and_keeps_artifact() {
    let dir = tempdir().unwrap();
    let artifacts = FileArtifactStore::new(dir.path()).await.unwrap();
    let device = FakeDevice::new();
    let config = exchange_config();

    let set = classify(
        &[exchange_record()],
        &[ServiceArea::Exchange],
        &TargetToggles::all(),
    );
    let reconciler = Reconciler::new(&device, &artifacts);

    let mut first_artifacts = Vec::new();
    for kind in TargetKind::ALL {
        let target = ReconcileTarget::from_config(kind, &config);
        let desired = DesiredContent::build(kind, &set, "2024020100");
        let result = reconciler.reconcile(&target, &desired).await.unwrap();
        assert!(result.created_objects(), "{kind} objects should be created on first run");
        if let Some(path) = result.artifact_path {
            first_artifacts.push((path.clone(), std::fs::read(&path).unwrap()));
        }
    }
    assert_eq!(first_artifacts.len(), 3);

    device.clear_calls();

    for kind in TargetKind::ALL {
        let target = ReconcileTarget::from_config(kind, &config);
        let desired = DesiredContent::build(kind, &set, "2024020100");
        let result = reconciler.reconcile(&target, &desired).await.unwrap();
        assert!(!result.created_objects(), "{kind} must not be recreated");
        assert_eq!(result.consumer, match kind {
            TargetKind::UrlCategory => ObjectAction::Updated,
            _ => ObjectAction::Unchanged,
        });
    }

    assert!(device.creates().is_empty(), "creates on second run: {:?}", device.creates());
    for (path, bytes) in first_artifacts {
        assert_eq!(std::fs::read(&path).unwrap(), bytes, "{} changed", path.display());
    }
}

#[tokio::test]
async fn interrupted_pass_is_completed_by_the_next() {
    // File object exists from an interrupted pass, data-group does not
    let device = FakeDevice::new().with_object(ObjectKind::DataGroupFile, "o365_ipv4_dg_object");
    let artifacts = MemoryArtifactStore::new();
    let config = exchange_config();

    let set = classify(&[exchange_record()], &[ServiceArea::Exchange], &TargetToggles::all());
    let target = ReconcileTarget::from_config(TargetKind::Ipv4DataGroup, &config);
    let desired = DesiredContent::build(TargetKind::Ipv4DataGroup, &set, "2024020100");

    let result = Reconciler::new(&device, &artifacts)
        .reconcile(&target, &desired)
        .await
        .unwrap();

    assert_eq!(result.file_object, Some(ObjectAction::Updated));
    assert_eq!(result.consumer, ObjectAction::Created);
    assert_eq!(
        created_by_kind(&device).get(&ObjectKind::DataGroupFile),
        None,
        "existing file object must be modified, not recreated"
    );
    assert!(device.exists(ObjectKind::ExternalDataGroup, "o365_ipv4_dg"));
}

#[tokio::test]
async fn restart_reuses_identity_and_observed_version() {
    let dir = tempdir().unwrap();
    let device = FakeDevice::new();
    let endpoints = ScriptedEndpointService::new("2024020100", vec![exchange_record()]);

    // First process: version changed from the sentinel, full sync
    {
        let state = FileStateStore::new(dir.path(), "guid.txt", "o365_version.txt")
            .await
            .unwrap();
        let artifacts = FileArtifactStore::new(dir.path()).await.unwrap();
        let (engine, _events) = SyncEngine::new(
            Box::new(endpoints.clone()),
            Box::new(device.clone()),
            Box::new(state),
            Box::new(artifacts),
            exchange_config(),
        )
        .unwrap();
        assert!(matches!(engine.run_pass().await.unwrap(), PassOutcome::Synced(_)));
    }

    device.clear_calls();

    // Second process: same stamp, nothing to do
    let state = FileStateStore::new(dir.path(), "guid.txt", "o365_version.txt")
        .await
        .unwrap();
    let (engine, _events) = SyncEngine::new(
        Box::new(endpoints.clone()),
        Box::new(device.clone()),
        Box::new(state.clone()),
        Box::new(FileArtifactStore::new(dir.path()).await.unwrap()),
        exchange_config(),
    )
    .unwrap();
    assert_eq!(
        engine.run_pass().await.unwrap(),
        PassOutcome::UpToDate {
            version: "2024020100".to_string()
        }
    );
    assert!(device.calls().is_empty());

    let identities = endpoints.identities();
    assert_eq!(identities.len(), 3);
    assert!(identities.iter().all(|id| id == &identities[0]), "identity changed across restart");
    assert_eq!(
        state.load(StateKey::ClientIdentity).await.unwrap().as_deref(),
        Some(identities[0].as_str())
    );
    assert_eq!(
        std::fs::read_to_string(dir.path().join("o365_version.txt")).unwrap(),
        "2024020100\n"
    );
    assert_eq!(
        std::fs::read_to_string(dir.path().join("o365_urls.txt")).unwrap(),
        "outlook.com := 1,\n"
    );
}

#[tokio::test]
async fn malformed_state_files_are_replaced() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("guid.txt"), "not-a-guid\n").unwrap();
    std::fs::write(dir.path().join("o365_version.txt"), "yesterday\n").unwrap();

    let endpoints =
        ScriptedEndpointService::new("2024020100", vec![exchange_record()]).failing_versions(500);
    let state = FileStateStore::new(dir.path(), "guid.txt", "o365_version.txt")
        .await
        .unwrap();
    let (engine, _events) = SyncEngine::new(
        Box::new(endpoints.clone()),
        Box::new(FakeDevice::new()),
        Box::new(state),
        Box::new(MemoryArtifactStore::new()),
        exchange_config(),
    )
    .unwrap();

    assert!(matches!(engine.run_pass().await.unwrap(), PassOutcome::Synced(_)));

    let identity = std::fs::read_to_string(dir.path().join("guid.txt")).unwrap();
    assert!(epsync_core::ClientIdentity::parse(&identity).is_ok());
    assert_eq!(identity.trim(), endpoints.identities()[0]);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("o365_version.txt")).unwrap(),
        "1970010200\n"
    );
}
