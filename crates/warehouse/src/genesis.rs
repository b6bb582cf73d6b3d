//! Warehouse opening-stock bootstrap.
//!
//! A new warehouse starts in `SETUP`. The admin records opening stock one
//! crop at a time; each record creates a `GENESIS`-source batch so physical
//! bags are batch-tracked from day one, and the first record parks the
//! warehouse in `GENESIS_PENDING`. The owner's confirmation is the sign-off
//! that makes the warehouse `ACTIVE` and opens it for normal intake and
//! dispatch.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use granary_auth::{ActorContext, Role, require_owner, require_role, require_scope};
use granary_core::{Crop, DomainError, DomainResult, SourceType, WarehouseId};
use granary_events::{
    EventKind, EventPayload, GenesisConfirmed, GenesisInventoryRecorded, StockDelta,
};
use granary_store::{
    Batch, EventDraft, EventFilter, EventRecord, GenesisConfirmation, LedgerStore,
    ProjectionUpdates, WarehouseStatus, WarehouseTransition,
};

use crate::batch::BatchRegistry;

/// Source name printed on genesis batch labels.
const OPENING_SOURCE: &str = "Opening stock";

/// Opening stock declaration for one crop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenesisIntake {
    pub warehouse_id: WarehouseId,
    pub crop: Crop,
    pub bags: u32,
    pub photo_url: Option<String>,
    pub notes: Option<String>,
}

/// Result of recording one crop's opening stock.
#[derive(Debug, Clone, PartialEq)]
pub struct GenesisRecord {
    pub event: EventRecord,
    pub batch: Batch,
}

/// Bootstrap service taking a warehouse from `SETUP` to `ACTIVE`.
#[derive(Debug, Clone)]
pub struct GenesisBootstrap<S> {
    store: S,
    batches: BatchRegistry<S>,
}

impl<S: LedgerStore> GenesisBootstrap<S> {
    pub fn new(store: S, batches: BatchRegistry<S>) -> Self {
        Self { store, batches }
    }

    /// Record opening stock for one crop.
    ///
    /// One record per crop per warehouse. The event, the genesis batch, the
    /// stock credit and the `SETUP -> GENESIS_PENDING` move (on the first
    /// record) commit in a single transaction.
    #[instrument(
        skip(self, actor, intake),
        fields(warehouse_id = %intake.warehouse_id, crop = %intake.crop, bags = intake.bags),
        err
    )]
    pub async fn record(
        &self,
        actor: &ActorContext,
        intake: GenesisIntake,
    ) -> DomainResult<GenesisRecord> {
        require_role(actor, &[Role::Admin])?;
        require_scope(actor, intake.warehouse_id)?;
        if intake.bags == 0 {
            return Err(DomainError::validation("bags must be greater than zero"));
        }

        let warehouse = crate::directory::load(&self.store, intake.warehouse_id).await?;
        if !matches!(
            warehouse.status,
            WarehouseStatus::Setup | WarehouseStatus::GenesisPending
        ) {
            return Err(DomainError::state_conflict(format!(
                "warehouse {} is {}, genesis stock can no longer be recorded",
                warehouse.warehouse_id, warehouse.status
            )));
        }
        let recorded = self
            .store
            .exists(
                warehouse.warehouse_id,
                EventKind::GenesisInventoryRecorded,
                intake.crop.as_str(),
            )
            .await?;
        if recorded {
            return Err(DomainError::state_conflict(format!(
                "genesis stock for {} already recorded",
                intake.crop
            )));
        }

        let now = Utc::now();
        let bags = i64::from(intake.bags);
        let batch = self
            .batches
            .build_batch(
                &warehouse,
                intake.crop,
                bags,
                SourceType::Genesis,
                OPENING_SOURCE,
                actor.actor_id,
                now,
            )
            .await?;

        let payload = EventPayload::GenesisInventoryRecorded(GenesisInventoryRecorded {
            crop: intake.crop,
            bags,
            batch_id: batch.batch_id,
            photo_url: intake.photo_url.clone(),
            notes: intake.notes.clone(),
        });
        let draft = EventDraft::new(warehouse.warehouse_id, actor.actor_id, payload);
        let updates = ProjectionUpdates {
            warehouse_status: (warehouse.status == WarehouseStatus::Setup).then(|| {
                WarehouseTransition {
                    warehouse_id: warehouse.warehouse_id,
                    from: WarehouseStatus::Setup,
                    to: WarehouseStatus::GenesisPending,
                }
            }),
            stock: Some(StockDelta {
                crop: intake.crop,
                bags,
            }),
            batch: Some(batch.clone()),
            ..ProjectionUpdates::none()
        };
        let event = self.store.append(draft, updates).await?;

        info!(batch_code = %batch.batch_code, "genesis stock recorded");
        Ok(GenesisRecord { event, batch })
    }

    /// Owner sign-off closing the bootstrap.
    ///
    /// Annotates every recorded genesis event as confirmed and moves the
    /// warehouse to `ACTIVE`, atomically with the `GenesisConfirmed` event.
    #[instrument(skip(self, actor), fields(warehouse_id = %warehouse_id), err)]
    pub async fn confirm(
        &self,
        actor: &ActorContext,
        warehouse_id: WarehouseId,
    ) -> DomainResult<EventRecord> {
        require_scope(actor, warehouse_id)?;
        let warehouse = crate::directory::load(&self.store, warehouse_id).await?;
        require_owner(actor, warehouse.owner_id)?;
        if warehouse.status != WarehouseStatus::GenesisPending {
            return Err(DomainError::state_conflict(format!(
                "warehouse {} is {}, expected GENESIS_PENDING",
                warehouse.warehouse_id, warehouse.status
            )));
        }

        let recorded = self
            .store
            .read(
                warehouse_id,
                EventFilter::of_kind(EventKind::GenesisInventoryRecorded),
            )
            .await?;
        if recorded.is_empty() {
            return Err(DomainError::state_conflict(
                "no genesis stock recorded for this warehouse",
            ));
        }

        let now = Utc::now();
        let mut crops = Vec::with_capacity(recorded.len());
        let mut confirmed_event_ids = Vec::with_capacity(recorded.len());
        let mut confirmations = Vec::with_capacity(recorded.len());
        for event in &recorded {
            if let EventPayload::GenesisInventoryRecorded(genesis) = &event.payload {
                crops.push(genesis.crop);
                confirmed_event_ids.push(event.event_id);
                confirmations.push(GenesisConfirmation {
                    warehouse_id,
                    event_id: event.event_id,
                    confirmed_by: actor.actor_id,
                    confirmed_at: now,
                });
            }
        }
        let confirmed = confirmations.len();

        let payload = EventPayload::GenesisConfirmed(GenesisConfirmed {
            crops,
            confirmed_event_ids,
        });
        let draft = EventDraft::new(warehouse_id, actor.actor_id, payload);
        let updates = ProjectionUpdates {
            warehouse_status: Some(WarehouseTransition {
                warehouse_id,
                from: WarehouseStatus::GenesisPending,
                to: WarehouseStatus::Active,
            }),
            genesis_confirmations: confirmations,
            ..ProjectionUpdates::none()
        };
        let event = self.store.append(draft, updates).await?;

        info!(confirmed, "genesis confirmed, warehouse active");
        Ok(event)
    }

    /// Owner sign-offs recorded for a warehouse.
    pub async fn confirmations(
        &self,
        warehouse_id: WarehouseId,
    ) -> DomainResult<Vec<GenesisConfirmation>> {
        Ok(self.store.genesis_confirmations(warehouse_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use granary_core::ActorId;
    use granary_events::WarehouseRegistered;
    use granary_store::{MemoryLedgerStore, Warehouse};

    type Store = Arc<MemoryLedgerStore>;

    struct Setup {
        store: Store,
        bootstrap: GenesisBootstrap<Store>,
        warehouse: Warehouse,
        admin: ActorContext,
        owner: ActorContext,
    }

    async fn setup() -> Setup {
        let store: Store = Arc::new(MemoryLedgerStore::new());
        let owner_id = ActorId::new();
        let warehouse = Warehouse {
            warehouse_id: WarehouseId::new(),
            name: "Unit Test Depot".to_string(),
            code: "UTD".to_string(),
            owner_id,
            status: WarehouseStatus::Setup,
            registered_at: Utc::now(),
        };
        let payload = EventPayload::WarehouseRegistered(WarehouseRegistered {
            name: warehouse.name.clone(),
            code: warehouse.code.clone(),
            owner_id,
        });
        let draft = EventDraft::new(warehouse.warehouse_id, ActorId::new(), payload);
        let updates = ProjectionUpdates {
            warehouse: Some(warehouse.clone()),
            ..ProjectionUpdates::none()
        };
        store.append(draft, updates).await.unwrap();

        let batches = BatchRegistry::new(store.clone(), "https://granary.example/scan");
        Setup {
            bootstrap: GenesisBootstrap::new(store.clone(), batches),
            admin: ActorContext::new(ActorId::new(), Role::Admin, warehouse.warehouse_id),
            owner: ActorContext::new(owner_id, Role::Owner, warehouse.warehouse_id),
            warehouse,
            store,
        }
    }

    fn intake(warehouse_id: WarehouseId, crop: Crop, bags: u32) -> GenesisIntake {
        GenesisIntake {
            warehouse_id,
            crop,
            bags,
            photo_url: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn first_record_moves_setup_to_genesis_pending() {
        let s = setup().await;
        let wid = s.warehouse.warehouse_id;

        let record = s
            .bootstrap
            .record(&s.admin, intake(wid, Crop::Maize, 30))
            .await
            .unwrap();

        assert_eq!(record.batch.source_type, SourceType::Genesis);
        assert_eq!(record.batch.source_name, "Opening stock");
        assert_eq!(record.batch.remaining_bags, 30);
        assert_eq!(record.event.sequence, 2);

        let warehouse = s.store.warehouse(wid).await.unwrap().unwrap();
        assert_eq!(warehouse.status, WarehouseStatus::GenesisPending);
        let line = s.store.stock_line(wid, Crop::Maize).await.unwrap().unwrap();
        assert_eq!(line.bag_count, 30);
    }

    #[tokio::test]
    async fn later_records_keep_genesis_pending() {
        let s = setup().await;
        let wid = s.warehouse.warehouse_id;

        s.bootstrap
            .record(&s.admin, intake(wid, Crop::Maize, 30))
            .await
            .unwrap();
        s.bootstrap
            .record(&s.admin, intake(wid, Crop::Beans, 20))
            .await
            .unwrap();

        let warehouse = s.store.warehouse(wid).await.unwrap().unwrap();
        assert_eq!(warehouse.status, WarehouseStatus::GenesisPending);
    }

    #[tokio::test]
    async fn one_genesis_record_per_crop() {
        let s = setup().await;
        let wid = s.warehouse.warehouse_id;

        s.bootstrap
            .record(&s.admin, intake(wid, Crop::Maize, 30))
            .await
            .unwrap();
        let err = s
            .bootstrap
            .record(&s.admin, intake(wid, Crop::Maize, 10))
            .await
            .unwrap_err();
        match err {
            DomainError::StateConflict(msg) => assert!(msg.contains("maize")),
            other => panic!("expected StateConflict, got {other:?}"),
        }

        // the duplicate wrote nothing
        let line = s.store.stock_line(wid, Crop::Maize).await.unwrap().unwrap();
        assert_eq!(line.bag_count, 30);
    }

    #[tokio::test]
    async fn record_is_admin_only_and_scoped() {
        let s = setup().await;
        let wid = s.warehouse.warehouse_id;

        assert!(matches!(
            s.bootstrap.record(&s.owner, intake(wid, Crop::Maize, 30)).await,
            Err(DomainError::Unauthorized(_))
        ));

        let foreign = ActorContext::new(ActorId::new(), Role::Admin, WarehouseId::new());
        assert!(matches!(
            s.bootstrap.record(&foreign, intake(wid, Crop::Maize, 30)).await,
            Err(DomainError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn confirm_activates_and_annotates_every_record() {
        let s = setup().await;
        let wid = s.warehouse.warehouse_id;

        let maize = s
            .bootstrap
            .record(&s.admin, intake(wid, Crop::Maize, 30))
            .await
            .unwrap();
        let beans = s
            .bootstrap
            .record(&s.admin, intake(wid, Crop::Beans, 20))
            .await
            .unwrap();

        let event = s.bootstrap.confirm(&s.owner, wid).await.unwrap();
        match &event.payload {
            EventPayload::GenesisConfirmed(confirmed) => {
                assert_eq!(confirmed.crops, vec![Crop::Maize, Crop::Beans]);
                assert_eq!(
                    confirmed.confirmed_event_ids,
                    vec![maize.event.event_id, beans.event.event_id]
                );
            }
            other => panic!("expected GenesisConfirmed payload, got {other:?}"),
        }

        let warehouse = s.store.warehouse(wid).await.unwrap().unwrap();
        assert_eq!(warehouse.status, WarehouseStatus::Active);

        let confirmations = s.bootstrap.confirmations(wid).await.unwrap();
        assert_eq!(confirmations.len(), 2);
        assert!(confirmations.iter().all(|c| c.confirmed_by == s.owner.actor_id));
    }

    #[tokio::test]
    async fn confirm_requires_the_owner_of_this_warehouse() {
        let s = setup().await;
        let wid = s.warehouse.warehouse_id;
        s.bootstrap
            .record(&s.admin, intake(wid, Crop::Maize, 30))
            .await
            .unwrap();

        assert!(matches!(
            s.bootstrap.confirm(&s.admin, wid).await,
            Err(DomainError::Unauthorized(_))
        ));

        let stranger = ActorContext::new(ActorId::new(), Role::Owner, wid);
        assert!(matches!(
            s.bootstrap.confirm(&stranger, wid).await,
            Err(DomainError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn confirm_needs_genesis_pending_status() {
        let s = setup().await;
        let wid = s.warehouse.warehouse_id;

        // nothing recorded yet: still SETUP
        let err = s.bootstrap.confirm(&s.owner, wid).await.unwrap_err();
        match err {
            DomainError::StateConflict(msg) => assert!(msg.contains("SETUP")),
            other => panic!("expected StateConflict, got {other:?}"),
        }

        s.bootstrap
            .record(&s.admin, intake(wid, Crop::Maize, 30))
            .await
            .unwrap();
        s.bootstrap.confirm(&s.owner, wid).await.unwrap();

        // already active: confirming twice is a conflict
        let err = s.bootstrap.confirm(&s.owner, wid).await.unwrap_err();
        match err {
            DomainError::StateConflict(msg) => assert!(msg.contains("ACTIVE")),
            other => panic!("expected StateConflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn record_is_closed_once_active() {
        let s = setup().await;
        let wid = s.warehouse.warehouse_id;
        s.bootstrap
            .record(&s.admin, intake(wid, Crop::Maize, 30))
            .await
            .unwrap();
        s.bootstrap.confirm(&s.owner, wid).await.unwrap();

        let err = s
            .bootstrap
            .record(&s.admin, intake(wid, Crop::Beans, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::StateConflict(_)));
    }
}
