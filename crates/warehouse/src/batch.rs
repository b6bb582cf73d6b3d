//! Batch registry: inbound intake, codes and labels, allocation planning.
//!
//! A batch is a physical lot of bagged grain. Every bag that enters the
//! warehouse belongs to exactly one batch, and every dispatch names the
//! batches it drew from, so a bag can be traced from its source to the truck
//! it left on.
//!
//! Balances only ever move inside [`LedgerStore::append`] transactions. This
//! service plans draws and validates them against the live rows; the store's
//! conditional decrements settle who wins under concurrency.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use granary_auth::{ActorContext, Role, require_role, require_scope};
use granary_core::{ActorId, BatchId, Crop, DomainError, DomainResult, SourceType, WarehouseId};
use granary_events::{BatchDraw, EventPayload, InboundRecorded, StockDelta};
use granary_store::{
    Batch, EventDraft, LedgerStore, ProjectionUpdates, Warehouse, WarehouseStatus,
};

use crate::qr::{self, QrToken};

/// Intake form for an inbound delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchIntake {
    pub warehouse_id: WarehouseId,
    pub crop: Crop,
    pub bags: u32,
    pub source_type: SourceType,
    pub source_name: String,
}

/// How execution picks the batches that physically leave the warehouse.
#[derive(Debug, Clone, PartialEq)]
pub enum AllocationMode {
    /// Draw from open batches oldest first.
    Fifo,
    /// Caller names the exact draws; they must cover the quantity exactly.
    Explicit(Vec<BatchDraw>),
}

/// Batch lifecycle service: intake, labeling, and allocation planning.
#[derive(Debug, Clone)]
pub struct BatchRegistry<S> {
    store: S,
    scan_base_url: String,
}

impl<S: LedgerStore> BatchRegistry<S> {
    pub fn new(store: S, scan_base_url: impl Into<String>) -> Self {
        Self {
            store,
            scan_base_url: scan_base_url.into(),
        }
    }

    /// Record an inbound delivery as a new batch.
    ///
    /// The batch row and the stock credit commit atomically with the
    /// `InboundRecorded` event.
    #[instrument(
        skip(self, actor, intake),
        fields(warehouse_id = %intake.warehouse_id, crop = %intake.crop, bags = intake.bags),
        err
    )]
    pub async fn create(&self, actor: &ActorContext, intake: BatchIntake) -> DomainResult<Batch> {
        require_role(actor, &[Role::Admin, Role::Attendant])?;
        require_scope(actor, intake.warehouse_id)?;
        if intake.bags == 0 {
            return Err(DomainError::validation("bags must be greater than zero"));
        }
        let source_name = intake.source_name.trim();
        if source_name.is_empty() {
            return Err(DomainError::validation("source name must not be blank"));
        }
        if intake.source_type == SourceType::Genesis {
            return Err(DomainError::validation(
                "genesis stock is recorded during warehouse setup, not as an inbound batch",
            ));
        }

        let warehouse = crate::directory::load(&self.store, intake.warehouse_id).await?;
        if warehouse.status != WarehouseStatus::Active {
            return Err(DomainError::state_conflict(format!(
                "warehouse {} is {}, expected ACTIVE",
                warehouse.warehouse_id, warehouse.status
            )));
        }

        let now = Utc::now();
        let batch = self
            .build_batch(
                &warehouse,
                intake.crop,
                i64::from(intake.bags),
                intake.source_type,
                source_name,
                actor.actor_id,
                now,
            )
            .await?;

        let payload = EventPayload::InboundRecorded(InboundRecorded {
            batch_id: batch.batch_id,
            crop: batch.crop,
            bags: batch.initial_bags,
            source_type: batch.source_type,
            source_name: batch.source_name.clone(),
            batch_code: batch.batch_code.clone(),
        });
        let draft = EventDraft::new(warehouse.warehouse_id, actor.actor_id, payload);
        let updates = ProjectionUpdates {
            stock: Some(StockDelta {
                crop: batch.crop,
                bags: batch.initial_bags,
            }),
            batch: Some(batch.clone()),
            ..ProjectionUpdates::none()
        };
        self.store.append(draft, updates).await?;

        info!(batch_code = %batch.batch_code, "inbound batch recorded");
        Ok(batch)
    }

    /// Assemble a batch row with its code and printed label token.
    ///
    /// Shared with the genesis bootstrap so opening stock is batch-tracked
    /// the same way as inbound deliveries.
    pub(crate) async fn build_batch(
        &self,
        warehouse: &Warehouse,
        crop: Crop,
        bags: i64,
        source_type: SourceType,
        source_name: &str,
        created_by: ActorId,
        now: DateTime<Utc>,
    ) -> DomainResult<Batch> {
        let batch_id = BatchId::new();
        let batch_code = self.next_code(warehouse, crop, now.date_naive()).await?;
        let token = QrToken {
            batch_id,
            batch_code: batch_code.clone(),
            crop,
            source: source_name.to_string(),
            bags,
            date: now.date_naive(),
            scan_url: qr::scan_url(&self.scan_base_url, batch_id),
        };
        Ok(Batch {
            batch_id,
            warehouse_id: warehouse.warehouse_id,
            batch_code,
            crop,
            source_type,
            source_name: source_name.to_string(),
            initial_bags: bags,
            remaining_bags: bags,
            qr_token: token.encode()?,
            created_by,
            created_at: now,
        })
    }

    /// Next code in the warehouse's `{CODE}-{CROP}-{YYYYMMDD}-{NNNN}` series.
    async fn next_code(
        &self,
        warehouse: &Warehouse,
        crop: Crop,
        date: NaiveDate,
    ) -> DomainResult<String> {
        let count = self.store.batch_count(warehouse.warehouse_id).await?;
        Ok(format!(
            "{}-{}-{}-{:04}",
            warehouse.code,
            crop.code(),
            date.format("%Y%m%d"),
            count + 1
        ))
    }

    /// Resolve the batches a dispatch will draw from, without moving anything.
    ///
    /// FIFO plans against open batches oldest first; explicit draws are
    /// validated and must cover the quantity exactly.
    pub async fn verify_for_dispatch(
        &self,
        warehouse_id: WarehouseId,
        crop: Crop,
        bags: i64,
        mode: &AllocationMode,
    ) -> DomainResult<Vec<BatchDraw>> {
        match mode {
            AllocationMode::Fifo => self.plan_fifo(warehouse_id, crop, bags).await,
            AllocationMode::Explicit(draws) => {
                self.validate_allocation(warehouse_id, crop, draws).await?;
                let total: i64 = draws.iter().map(|d| d.bags).sum();
                if total != bags {
                    return Err(DomainError::validation(format!(
                        "allocation covers {total} bags, dispatch requires {bags}"
                    )));
                }
                Ok(draws.clone())
            }
        }
    }

    async fn plan_fifo(
        &self,
        warehouse_id: WarehouseId,
        crop: Crop,
        bags: i64,
    ) -> DomainResult<Vec<BatchDraw>> {
        let open = self.store.open_batches(warehouse_id, crop).await?;
        let available: i64 = open.iter().map(|b| b.remaining_bags).sum();
        if available < bags {
            return Err(DomainError::validation(format!(
                "Insufficient stock. Requested: {bags}, Available: {available}"
            )));
        }

        let mut draws = Vec::new();
        let mut outstanding = bags;
        for batch in open {
            if outstanding == 0 {
                break;
            }
            let take = outstanding.min(batch.remaining_bags);
            draws.push(BatchDraw {
                batch_id: batch.batch_id,
                bags: take,
            });
            outstanding -= take;
        }
        Ok(draws)
    }

    /// Check a set of explicit draws against the live batch rows.
    pub async fn validate_allocation(
        &self,
        warehouse_id: WarehouseId,
        crop: Crop,
        draws: &[BatchDraw],
    ) -> DomainResult<()> {
        if draws.is_empty() {
            return Err(DomainError::validation(
                "allocation must name at least one batch",
            ));
        }
        let mut seen = HashSet::new();
        for draw in draws {
            if !seen.insert(draw.batch_id) {
                return Err(DomainError::validation(format!(
                    "batch {} listed more than once",
                    draw.batch_id
                )));
            }
            if draw.bags <= 0 {
                return Err(DomainError::validation(format!(
                    "draw from batch {} must be greater than zero",
                    draw.batch_id
                )));
            }
            let batch = self
                .store
                .batch(warehouse_id, draw.batch_id)
                .await?
                .ok_or_else(|| {
                    DomainError::not_found(format!("batch {} not found", draw.batch_id))
                })?;
            if batch.crop != crop {
                return Err(DomainError::validation(format!(
                    "batch {} holds {}, not {}",
                    batch.batch_code, batch.crop, crop
                )));
            }
            if batch.remaining_bags < draw.bags {
                return Err(DomainError::validation(format!(
                    "Insufficient stock in batch {}. Requested: {}, Available: {}",
                    batch.batch_code, draw.bags, batch.remaining_bags
                )));
            }
        }
        Ok(())
    }

    /// Resolve a scanned label (JSON document or URI fallback) to its batch.
    pub async fn verify_scan(&self, warehouse_id: WarehouseId, token: &str) -> DomainResult<Batch> {
        let batch_id = qr::parse_scan(token)?;
        self.store
            .batch(warehouse_id, batch_id)
            .await?
            .ok_or_else(|| {
                DomainError::not_found(format!("batch {batch_id} not found in this warehouse"))
            })
    }

    pub async fn get(&self, warehouse_id: WarehouseId, batch_id: BatchId) -> DomainResult<Batch> {
        self.store
            .batch(warehouse_id, batch_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("batch {batch_id} not found")))
    }

    pub async fn by_code(&self, warehouse_id: WarehouseId, batch_code: &str) -> DomainResult<Batch> {
        self.store
            .batch_by_code(warehouse_id, batch_code)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("batch {batch_code} not found")))
    }

    pub async fn list(&self, warehouse_id: WarehouseId) -> DomainResult<Vec<Batch>> {
        Ok(self.store.batches(warehouse_id).await?)
    }

    /// Batches of a crop with bags remaining, in FIFO draw order.
    pub async fn open(&self, warehouse_id: WarehouseId, crop: Crop) -> DomainResult<Vec<Batch>> {
        Ok(self.store.open_batches(warehouse_id, crop).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use granary_events::WarehouseRegistered;
    use granary_store::MemoryLedgerStore;

    type Store = Arc<MemoryLedgerStore>;

    fn registry(store: &Store) -> BatchRegistry<Store> {
        BatchRegistry::new(store.clone(), "https://granary.example/scan")
    }

    async fn seed_warehouse(store: &Store, status: WarehouseStatus) -> (Warehouse, ActorContext) {
        let warehouse = Warehouse {
            warehouse_id: WarehouseId::new(),
            name: "Unit Test Depot".to_string(),
            code: "UTD".to_string(),
            owner_id: ActorId::new(),
            status,
            registered_at: Utc::now(),
        };
        let payload = EventPayload::WarehouseRegistered(WarehouseRegistered {
            name: warehouse.name.clone(),
            code: warehouse.code.clone(),
            owner_id: warehouse.owner_id,
        });
        let draft = EventDraft::new(warehouse.warehouse_id, ActorId::new(), payload);
        let updates = ProjectionUpdates {
            warehouse: Some(warehouse.clone()),
            ..ProjectionUpdates::none()
        };
        store.append(draft, updates).await.unwrap();

        let admin = ActorContext::new(ActorId::new(), Role::Admin, warehouse.warehouse_id);
        (warehouse, admin)
    }

    fn intake(warehouse_id: WarehouseId, crop: Crop, bags: u32) -> BatchIntake {
        BatchIntake {
            warehouse_id,
            crop,
            bags,
            source_type: SourceType::FarmerDelivery,
            source_name: "Chebet Farm".to_string(),
        }
    }

    #[tokio::test]
    async fn create_records_batch_stock_and_event_atomically() {
        let store = Arc::new(MemoryLedgerStore::new());
        let (warehouse, admin) = seed_warehouse(&store, WarehouseStatus::Active).await;
        let registry = registry(&store);

        let batch = registry
            .create(&admin, intake(warehouse.warehouse_id, Crop::Maize, 40))
            .await
            .unwrap();

        assert!(batch.batch_code.starts_with("UTD-MAIZE-"));
        assert!(batch.batch_code.ends_with("-0001"));
        assert_eq!(batch.initial_bags, 40);
        assert_eq!(batch.remaining_bags, 40);

        let line = store
            .stock_line(warehouse.warehouse_id, Crop::Maize)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line.bag_count, 40);

        let stored = registry
            .get(warehouse.warehouse_id, batch.batch_id)
            .await
            .unwrap();
        assert_eq!(stored, batch);
    }

    #[tokio::test]
    async fn batch_codes_count_up_within_a_warehouse() {
        let store = Arc::new(MemoryLedgerStore::new());
        let (warehouse, admin) = seed_warehouse(&store, WarehouseStatus::Active).await;
        let registry = registry(&store);

        let first = registry
            .create(&admin, intake(warehouse.warehouse_id, Crop::Maize, 10))
            .await
            .unwrap();
        let second = registry
            .create(&admin, intake(warehouse.warehouse_id, Crop::Beans, 10))
            .await
            .unwrap();

        assert!(first.batch_code.ends_with("-0001"));
        assert!(second.batch_code.ends_with("-0002"));
        assert!(second.batch_code.contains("BEANS"));
    }

    #[tokio::test]
    async fn create_requires_an_active_warehouse() {
        let store = Arc::new(MemoryLedgerStore::new());
        let (warehouse, admin) = seed_warehouse(&store, WarehouseStatus::Setup).await;
        let registry = registry(&store);

        let err = registry
            .create(&admin, intake(warehouse.warehouse_id, Crop::Maize, 10))
            .await
            .unwrap_err();
        match err {
            DomainError::StateConflict(msg) => assert!(msg.contains("SETUP")),
            other => panic!("expected StateConflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn create_rejects_bad_input_and_foreign_actors() {
        let store = Arc::new(MemoryLedgerStore::new());
        let (warehouse, admin) = seed_warehouse(&store, WarehouseStatus::Active).await;
        let registry = registry(&store);
        let wid = warehouse.warehouse_id;

        let zero = registry.create(&admin, intake(wid, Crop::Maize, 0)).await;
        assert!(matches!(zero, Err(DomainError::Validation(_))));

        let mut blank = intake(wid, Crop::Maize, 10);
        blank.source_name = "   ".to_string();
        assert!(matches!(
            registry.create(&admin, blank).await,
            Err(DomainError::Validation(_))
        ));

        let mut genesis = intake(wid, Crop::Maize, 10);
        genesis.source_type = SourceType::Genesis;
        assert!(matches!(
            registry.create(&admin, genesis).await,
            Err(DomainError::Validation(_))
        ));

        let owner = ActorContext::new(ActorId::new(), Role::Owner, wid);
        assert!(matches!(
            registry.create(&owner, intake(wid, Crop::Maize, 10)).await,
            Err(DomainError::Unauthorized(_))
        ));

        let foreign = ActorContext::new(ActorId::new(), Role::Admin, WarehouseId::new());
        assert!(matches!(
            registry.create(&foreign, intake(wid, Crop::Maize, 10)).await,
            Err(DomainError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn fifo_plan_draws_oldest_batches_first() {
        let store = Arc::new(MemoryLedgerStore::new());
        let (warehouse, admin) = seed_warehouse(&store, WarehouseStatus::Active).await;
        let registry = registry(&store);
        let wid = warehouse.warehouse_id;

        let older = registry
            .create(&admin, intake(wid, Crop::Maize, 30))
            .await
            .unwrap();
        let newer = registry
            .create(&admin, intake(wid, Crop::Maize, 40))
            .await
            .unwrap();

        let draws = registry
            .verify_for_dispatch(wid, Crop::Maize, 50, &AllocationMode::Fifo)
            .await
            .unwrap();

        assert_eq!(draws.len(), 2);
        assert_eq!(draws[0].batch_id, older.batch_id);
        assert_eq!(draws[0].bags, 30);
        assert_eq!(draws[1].batch_id, newer.batch_id);
        assert_eq!(draws[1].bags, 20);
    }

    #[tokio::test]
    async fn fifo_shortfall_uses_the_stock_message() {
        let store = Arc::new(MemoryLedgerStore::new());
        let (warehouse, admin) = seed_warehouse(&store, WarehouseStatus::Active).await;
        let registry = registry(&store);
        let wid = warehouse.warehouse_id;

        registry
            .create(&admin, intake(wid, Crop::Maize, 30))
            .await
            .unwrap();

        let err = registry
            .verify_for_dispatch(wid, Crop::Maize, 100, &AllocationMode::Fifo)
            .await
            .unwrap_err();
        match err {
            DomainError::Validation(msg) => {
                assert_eq!(msg, "Insufficient stock. Requested: 100, Available: 30");
            }
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn explicit_allocation_must_cover_the_quantity_exactly() {
        let store = Arc::new(MemoryLedgerStore::new());
        let (warehouse, admin) = seed_warehouse(&store, WarehouseStatus::Active).await;
        let registry = registry(&store);
        let wid = warehouse.warehouse_id;

        let batch = registry
            .create(&admin, intake(wid, Crop::Maize, 40))
            .await
            .unwrap();

        let short = AllocationMode::Explicit(vec![BatchDraw {
            batch_id: batch.batch_id,
            bags: 25,
        }]);
        let err = registry
            .verify_for_dispatch(wid, Crop::Maize, 30, &short)
            .await
            .unwrap_err();
        match err {
            DomainError::Validation(msg) => {
                assert!(msg.contains("25"));
                assert!(msg.contains("30"));
            }
            other => panic!("expected Validation, got {other:?}"),
        }

        let exact = AllocationMode::Explicit(vec![BatchDraw {
            batch_id: batch.batch_id,
            bags: 30,
        }]);
        let draws = registry
            .verify_for_dispatch(wid, Crop::Maize, 30, &exact)
            .await
            .unwrap();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].bags, 30);
    }

    #[tokio::test]
    async fn validate_allocation_checks_each_draw() {
        let store = Arc::new(MemoryLedgerStore::new());
        let (warehouse, admin) = seed_warehouse(&store, WarehouseStatus::Active).await;
        let registry = registry(&store);
        let wid = warehouse.warehouse_id;

        let maize = registry
            .create(&admin, intake(wid, Crop::Maize, 40))
            .await
            .unwrap();

        let unknown = vec![BatchDraw {
            batch_id: BatchId::new(),
            bags: 5,
        }];
        assert!(matches!(
            registry.validate_allocation(wid, Crop::Maize, &unknown).await,
            Err(DomainError::NotFound(_))
        ));

        let wrong_crop = vec![BatchDraw {
            batch_id: maize.batch_id,
            bags: 5,
        }];
        assert!(matches!(
            registry.validate_allocation(wid, Crop::Beans, &wrong_crop).await,
            Err(DomainError::Validation(_))
        ));

        let duplicate = vec![
            BatchDraw {
                batch_id: maize.batch_id,
                bags: 5,
            },
            BatchDraw {
                batch_id: maize.batch_id,
                bags: 5,
            },
        ];
        assert!(matches!(
            registry.validate_allocation(wid, Crop::Maize, &duplicate).await,
            Err(DomainError::Validation(_))
        ));

        let overdraw = vec![BatchDraw {
            batch_id: maize.batch_id,
            bags: 45,
        }];
        let err = registry
            .validate_allocation(wid, Crop::Maize, &overdraw)
            .await
            .unwrap_err();
        match err {
            DomainError::Validation(msg) => {
                assert!(msg.contains(&maize.batch_code));
                assert!(msg.contains("Requested: 45"));
                assert!(msg.contains("Available: 40"));
            }
            other => panic!("expected Validation, got {other:?}"),
        }

        assert!(matches!(
            registry.validate_allocation(wid, Crop::Maize, &[]).await,
            Err(DomainError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn verify_scan_resolves_both_label_formats() {
        let store = Arc::new(MemoryLedgerStore::new());
        let (warehouse, admin) = seed_warehouse(&store, WarehouseStatus::Active).await;
        let registry = registry(&store);
        let wid = warehouse.warehouse_id;

        let batch = registry
            .create(&admin, intake(wid, Crop::Maize, 40))
            .await
            .unwrap();

        let by_json = registry.verify_scan(wid, &batch.qr_token).await.unwrap();
        assert_eq!(by_json.batch_id, batch.batch_id);

        let by_uri = registry
            .verify_scan(wid, &QrToken::uri(batch.batch_id))
            .await
            .unwrap();
        assert_eq!(by_uri.batch_id, batch.batch_id);

        assert!(matches!(
            registry.verify_scan(wid, "definitely not a label").await,
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            registry.verify_scan(wid, &QrToken::uri(BatchId::new())).await,
            Err(DomainError::NotFound(_))
        ));
    }
}
