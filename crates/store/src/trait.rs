use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use granary_core::{ActorId, BatchId, Crop, DomainError, EventId, RequestId, ToolId, WarehouseId};
use granary_events::{EventKind, EventPayload};

use crate::model::{
    Batch, BatchAllocation, DispatchRequest, GenesisConfirmation, RequestStatus, StockLine, Tool,
    Warehouse,
};
use crate::writes::ProjectionUpdates;

/// An event ready to be appended (not yet assigned a sequence number).
///
/// The store assigns `event_id`, `sequence`, and `recorded_at` during append.
/// The event's kind and idempotency key are derived from the payload, so a
/// draft cannot disagree with what it carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDraft {
    pub warehouse_id: WarehouseId,
    pub actor_id: ActorId,
    pub payload: EventPayload,
}

impl EventDraft {
    pub fn new(warehouse_id: WarehouseId, actor_id: ActorId, payload: EventPayload) -> Self {
        Self {
            warehouse_id,
            actor_id,
            payload,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

/// A committed event with its assigned position in the warehouse stream.
///
/// Sequences are per-warehouse, start at 1, and are gapless: a warehouse with
/// `n` events has exactly sequences `1..=n`. Once assigned they never change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_id: EventId,
    pub warehouse_id: WarehouseId,
    pub sequence: u64,
    pub kind: EventKind,
    pub actor_id: ActorId,
    pub recorded_at: DateTime<Utc>,
    pub payload: EventPayload,
}

/// Read-side filter for [`LedgerStore::read`].
///
/// All fields are optional; the default reads the whole stream in sequence
/// order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    /// Only events with `sequence > after_sequence`.
    pub after_sequence: Option<u64>,
    /// Only events of these kinds. `None` means all kinds.
    pub kinds: Option<Vec<EventKind>>,
    /// Cap on the number of returned events.
    pub limit: Option<u32>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn of_kind(kind: EventKind) -> Self {
        Self {
            kinds: Some(vec![kind]),
            ..Self::default()
        }
    }
}

/// Storage-layer error.
///
/// These are infrastructure outcomes, not domain rulings. The domain layer
/// converts them via `From<StoreError> for DomainError`:
///
/// | Variant    | Becomes              | Scenario                                           |
/// |------------|----------------------|----------------------------------------------------|
/// | `Conflict` | `StateConflict`      | Precondition lost to a concurrent append           |
/// | `NotFound` | `NotFound`           | Referenced row absent                              |
/// | `Backend`  | `Storage`            | Pool, connection, or SQL failure                   |
/// | `Corrupt`  | `Storage`            | Stored row failed to decode                        |
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("corrupt stored data: {0}")]
    Corrupt(String),
}

impl From<StoreError> for DomainError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => DomainError::StateConflict(msg),
            StoreError::NotFound(msg) => DomainError::NotFound(msg),
            StoreError::Backend(msg) => DomainError::Storage(msg),
            StoreError::Corrupt(msg) => DomainError::Storage(msg),
        }
    }
}

/// Append-only, warehouse-scoped ledger with transactional projections.
///
/// ## Streams
///
/// Events are organized into one stream per warehouse. Within a stream,
/// sequences are assigned monotonically starting at 1, with no gaps and no
/// duplicates.
///
/// ## Append semantics
///
/// `append()` commits the event row and every effect in the accompanying
/// [`ProjectionUpdates`] atomically:
///
/// - If the payload carries an idempotency key and an event with the same
///   `(warehouse, kind, key)` already exists, the append fails with
///   `Conflict` and writes nothing.
/// - If any conditional effect (status transition, batch draw) finds its
///   precondition no longer true, the append fails with `Conflict` and
///   writes nothing.
/// - On success, the returned [`EventRecord`] carries the assigned sequence.
///
/// There is no partial outcome: either the event and all its effects are
/// durable, or none of them are.
///
/// ## Implementation requirements
///
/// - Enforce warehouse scoping on every read and write.
/// - Keep sequences gapless under concurrent appends.
/// - Enforce `(warehouse, kind, correlation)` uniqueness where the payload
///   defines a key.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Append one event and its projection effects in a single transaction.
    async fn append(
        &self,
        draft: EventDraft,
        updates: ProjectionUpdates,
    ) -> Result<EventRecord, StoreError>;

    /// Read a warehouse's stream in sequence order, optionally filtered.
    async fn read(
        &self,
        warehouse_id: WarehouseId,
        filter: EventFilter,
    ) -> Result<Vec<EventRecord>, StoreError>;

    /// Whether an event with this `(warehouse, kind, correlation)` key exists.
    async fn exists(
        &self,
        warehouse_id: WarehouseId,
        kind: EventKind,
        correlation: &str,
    ) -> Result<bool, StoreError>;

    async fn warehouse(&self, warehouse_id: WarehouseId) -> Result<Option<Warehouse>, StoreError>;

    async fn warehouses(&self) -> Result<Vec<Warehouse>, StoreError>;

    async fn stock_line(
        &self,
        warehouse_id: WarehouseId,
        crop: Crop,
    ) -> Result<Option<StockLine>, StoreError>;

    /// All stock lines for a warehouse, ordered by crop.
    async fn stock_lines(&self, warehouse_id: WarehouseId) -> Result<Vec<StockLine>, StoreError>;

    /// Overwrite a warehouse's stock lines wholesale (projection rebuild).
    async fn replace_stock_lines(
        &self,
        warehouse_id: WarehouseId,
        lines: Vec<StockLine>,
    ) -> Result<(), StoreError>;

    async fn dispatch_request(
        &self,
        warehouse_id: WarehouseId,
        request_id: RequestId,
    ) -> Result<Option<DispatchRequest>, StoreError>;

    /// Requests for a warehouse, newest first, optionally filtered by status.
    async fn dispatch_requests(
        &self,
        warehouse_id: WarehouseId,
        status: Option<RequestStatus>,
    ) -> Result<Vec<DispatchRequest>, StoreError>;

    async fn allocations_for_request(
        &self,
        warehouse_id: WarehouseId,
        request_id: RequestId,
    ) -> Result<Vec<BatchAllocation>, StoreError>;

    async fn batch(
        &self,
        warehouse_id: WarehouseId,
        batch_id: BatchId,
    ) -> Result<Option<Batch>, StoreError>;

    async fn batch_by_code(
        &self,
        warehouse_id: WarehouseId,
        batch_code: &str,
    ) -> Result<Option<Batch>, StoreError>;

    async fn batches(&self, warehouse_id: WarehouseId) -> Result<Vec<Batch>, StoreError>;

    /// Batches of one crop with bags remaining, oldest first.
    ///
    /// This is the draw order for first-in-first-out allocation.
    async fn open_batches(
        &self,
        warehouse_id: WarehouseId,
        crop: Crop,
    ) -> Result<Vec<Batch>, StoreError>;

    /// Total batches ever created in a warehouse (feeds the batch code's
    /// running number).
    async fn batch_count(&self, warehouse_id: WarehouseId) -> Result<u64, StoreError>;

    async fn tool(
        &self,
        warehouse_id: WarehouseId,
        tool_id: ToolId,
    ) -> Result<Option<Tool>, StoreError>;

    async fn tools(&self, warehouse_id: WarehouseId) -> Result<Vec<Tool>, StoreError>;

    async fn genesis_confirmations(
        &self,
        warehouse_id: WarehouseId,
    ) -> Result<Vec<GenesisConfirmation>, StoreError>;
}

#[async_trait]
impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    async fn append(
        &self,
        draft: EventDraft,
        updates: ProjectionUpdates,
    ) -> Result<EventRecord, StoreError> {
        (**self).append(draft, updates).await
    }

    async fn read(
        &self,
        warehouse_id: WarehouseId,
        filter: EventFilter,
    ) -> Result<Vec<EventRecord>, StoreError> {
        (**self).read(warehouse_id, filter).await
    }

    async fn exists(
        &self,
        warehouse_id: WarehouseId,
        kind: EventKind,
        correlation: &str,
    ) -> Result<bool, StoreError> {
        (**self).exists(warehouse_id, kind, correlation).await
    }

    async fn warehouse(&self, warehouse_id: WarehouseId) -> Result<Option<Warehouse>, StoreError> {
        (**self).warehouse(warehouse_id).await
    }

    async fn warehouses(&self) -> Result<Vec<Warehouse>, StoreError> {
        (**self).warehouses().await
    }

    async fn stock_line(
        &self,
        warehouse_id: WarehouseId,
        crop: Crop,
    ) -> Result<Option<StockLine>, StoreError> {
        (**self).stock_line(warehouse_id, crop).await
    }

    async fn stock_lines(&self, warehouse_id: WarehouseId) -> Result<Vec<StockLine>, StoreError> {
        (**self).stock_lines(warehouse_id).await
    }

    async fn replace_stock_lines(
        &self,
        warehouse_id: WarehouseId,
        lines: Vec<StockLine>,
    ) -> Result<(), StoreError> {
        (**self).replace_stock_lines(warehouse_id, lines).await
    }

    async fn dispatch_request(
        &self,
        warehouse_id: WarehouseId,
        request_id: RequestId,
    ) -> Result<Option<DispatchRequest>, StoreError> {
        (**self).dispatch_request(warehouse_id, request_id).await
    }

    async fn dispatch_requests(
        &self,
        warehouse_id: WarehouseId,
        status: Option<RequestStatus>,
    ) -> Result<Vec<DispatchRequest>, StoreError> {
        (**self).dispatch_requests(warehouse_id, status).await
    }

    async fn allocations_for_request(
        &self,
        warehouse_id: WarehouseId,
        request_id: RequestId,
    ) -> Result<Vec<BatchAllocation>, StoreError> {
        (**self).allocations_for_request(warehouse_id, request_id).await
    }

    async fn batch(
        &self,
        warehouse_id: WarehouseId,
        batch_id: BatchId,
    ) -> Result<Option<Batch>, StoreError> {
        (**self).batch(warehouse_id, batch_id).await
    }

    async fn batch_by_code(
        &self,
        warehouse_id: WarehouseId,
        batch_code: &str,
    ) -> Result<Option<Batch>, StoreError> {
        (**self).batch_by_code(warehouse_id, batch_code).await
    }

    async fn batches(&self, warehouse_id: WarehouseId) -> Result<Vec<Batch>, StoreError> {
        (**self).batches(warehouse_id).await
    }

    async fn open_batches(
        &self,
        warehouse_id: WarehouseId,
        crop: Crop,
    ) -> Result<Vec<Batch>, StoreError> {
        (**self).open_batches(warehouse_id, crop).await
    }

    async fn batch_count(&self, warehouse_id: WarehouseId) -> Result<u64, StoreError> {
        (**self).batch_count(warehouse_id).await
    }

    async fn tool(
        &self,
        warehouse_id: WarehouseId,
        tool_id: ToolId,
    ) -> Result<Option<Tool>, StoreError> {
        (**self).tool(warehouse_id, tool_id).await
    }

    async fn tools(&self, warehouse_id: WarehouseId) -> Result<Vec<Tool>, StoreError> {
        (**self).tools(warehouse_id).await
    }

    async fn genesis_confirmations(
        &self,
        warehouse_id: WarehouseId,
    ) -> Result<Vec<GenesisConfirmation>, StoreError> {
        (**self).genesis_confirmations(warehouse_id).await
    }
}
