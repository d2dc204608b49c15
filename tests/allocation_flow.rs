use std::sync::Arc;
use std::time::Duration;

use ulid::Ulid;

use equipalloc::conflict::ConflictEvent;
use equipalloc::inventory::{
    BulkEquipmentItem, IndividualEquipment, InventorySnapshot, InventoryStatus, InventoryStore,
    MemoryInventory,
};
use equipalloc::model::{EquipmentStatus, ResolutionChoice};
use equipalloc::reconciler::Background;
use equipalloc::{CoordinatorConfig, EngineError, SyncCoordinator};

// ── Test infrastructure ──────────────────────────────────────

fn test_config() -> CoordinatorConfig {
    let dir = std::env::temp_dir().join(format!("equipalloc_int_test_{}", Ulid::new()));
    CoordinatorConfig {
        ledger_path: dir.join("allocations.wal"),
        sync_interval: Duration::from_secs(3600),
        ..CoordinatorConfig::default()
    }
}

fn yard() -> Arc<MemoryInventory> {
    Arc::new(MemoryInventory::from_snapshot(InventorySnapshot {
        individual: vec![
            IndividualEquipment {
                id: "eq-1".into(),
                name: "Excavator".into(),
                status: InventoryStatus::Available,
                job_id: None,
            },
            IndividualEquipment {
                id: "eq-2".into(),
                name: "Crane".into(),
                status: InventoryStatus::Deployed,
                job_id: Some("job-1".into()),
            },
            IndividualEquipment {
                id: "eq-3".into(),
                name: "Generator".into(),
                status: InventoryStatus::Maintenance,
                job_id: None,
            },
        ],
        bulk: vec![BulkEquipmentItem {
            id: "barrier-1".into(),
            type_id: "barrier".into(),
            status: InventoryStatus::Available,
            job_id: None,
            quantity: 20,
        }],
    }))
}

// ── Scenarios ────────────────────────────────────────────────

#[tokio::test]
async fn conflict_then_resolve_in_favour_of_requester() {
    let inventory = yard();
    let engine = SyncCoordinator::open(test_config(), inventory.clone()).unwrap();
    let mut feed = engine.conflict_manager().subscribe();

    let validation = engine.validate_equipment_availability("eq-2", "job-2").await;
    assert!(!validation.is_available());

    let conflicts = engine.conflicts();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].equipment_id, "eq-2");
    assert_eq!(conflicts[0].current_job_id, "job-1");
    assert_eq!(conflicts[0].requested_job_id, "job-2");
    assert!(matches!(feed.recv().await.unwrap(), ConflictEvent::Raised(_)));

    engine
        .resolve_conflict(&conflicts[0], ResolutionChoice::Requested)
        .await
        .unwrap();

    assert!(engine.conflicts().is_empty());
    assert_eq!(engine.get_job_equipment("job-2").await, vec!["eq-2".to_string()]);
    assert!(engine.get_job_equipment("job-1").await.is_empty());
    assert!(matches!(feed.recv().await.unwrap(), ConflictEvent::Cleared { .. }));
}

#[tokio::test]
async fn allocation_reported_before_any_sync() {
    let engine = SyncCoordinator::open(test_config(), yard()).unwrap();

    engine.allocate_equipment("eq-1", "job-2", "Job Two").await.unwrap();

    assert_eq!(engine.get_equipment_status("eq-1").await, EquipmentStatus::Allocated);
}

#[tokio::test]
async fn background_sync_pushes_ledger_to_store() {
    let inventory = yard();
    let engine = Arc::new(SyncCoordinator::open(test_config(), inventory.clone()).unwrap());
    engine
        .registry()
        .set_allocation(equipalloc::model::AllocationRecord::new("eq-1", "job-2", "Job Two"));

    let background = Background::spawn(&engine);
    let synced = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let item = inventory.find_individual_equipment("eq-1").await.unwrap().unwrap();
            if item.status == InventoryStatus::Deployed {
                return item;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("startup reconciliation did not run");
    background.abort();

    assert_eq!(synced.job_id.as_deref(), Some("job-2"));
}

#[tokio::test]
async fn maintenance_equipment_rejected_without_conflict() {
    let engine = SyncCoordinator::open(test_config(), yard()).unwrap();

    let validation = engine.validate_equipment_availability("eq-3", "job-4").await;

    assert!(!validation.is_available());
    assert!(engine.conflicts().is_empty());
    let err = engine.allocate_equipment("eq-3", "job-4", "Job Four").await.unwrap_err();
    assert!(matches!(err, EngineError::NotAvailable(_)));
}

#[tokio::test]
async fn full_lifecycle_survives_restart() {
    let config = test_config();
    let inventory = yard();
    {
        let engine = SyncCoordinator::open(config.clone(), inventory.clone()).unwrap();
        engine.allocate_equipment("eq-1", "job-7", "Job Seven").await.unwrap();
        engine.allocate_equipment("barrier-1", "job-7", "Job Seven").await.unwrap();
        engine.release_equipment("barrier-1", "job-7").await.unwrap();
        engine.registry().flush().await.unwrap();
    }

    let engine = SyncCoordinator::open(config, inventory.clone()).unwrap();
    assert_eq!(engine.registry().len(), 1);
    assert_eq!(engine.get_job_equipment("job-7").await, vec!["eq-1".to_string()]);
    assert_eq!(engine.get_equipment_status("barrier-1").await, EquipmentStatus::Available);

    engine.release_equipment("eq-1", "job-7").await.unwrap();
    engine.release_equipment("eq-1", "job-7").await.unwrap();
    assert!(engine.get_job_equipment("job-7").await.is_empty());
}
