//! Postgres-backed ledger store.
//!
//! Persists the event stream and its projections in one database and commits
//! each append inside a single transaction: the event row, the idempotency
//! check, and every projection effect either all land or none do.
//!
//! ## Schema
//!
//! Expects the following tables (constraints abbreviated):
//!
//! ```sql
//! CREATE TABLE warehouses (
//!     warehouse_id   UUID PRIMARY KEY,
//!     name           TEXT NOT NULL,
//!     code           TEXT NOT NULL UNIQUE,
//!     owner_id       UUID NOT NULL,
//!     status         TEXT NOT NULL,
//!     registered_at  TIMESTAMPTZ NOT NULL
//! );
//!
//! CREATE TABLE ledger_events (
//!     event_id        UUID PRIMARY KEY,
//!     warehouse_id    UUID NOT NULL,
//!     sequence        BIGINT NOT NULL CHECK (sequence > 0),
//!     kind            TEXT NOT NULL,
//!     correlation_id  TEXT,
//!     actor_id        UUID NOT NULL,
//!     recorded_at     TIMESTAMPTZ NOT NULL,
//!     payload         JSONB NOT NULL,
//!     UNIQUE (warehouse_id, sequence)
//! );
//! CREATE UNIQUE INDEX ledger_events_correlation
//!     ON ledger_events (warehouse_id, kind, correlation_id)
//!     WHERE correlation_id IS NOT NULL;
//!
//! CREATE TABLE stock_lines (
//!     warehouse_id         UUID NOT NULL,
//!     crop                 TEXT NOT NULL,
//!     bag_count            BIGINT NOT NULL CHECK (bag_count >= 0),
//!     last_event_sequence  BIGINT NOT NULL,
//!     updated_at           TIMESTAMPTZ NOT NULL,
//!     PRIMARY KEY (warehouse_id, crop)
//! );
//!
//! CREATE TABLE dispatch_requests (
//!     request_id        UUID PRIMARY KEY,
//!     warehouse_id      UUID NOT NULL,
//!     crop              TEXT NOT NULL,
//!     bags              BIGINT NOT NULL CHECK (bags > 0),
//!     recipient         TEXT NOT NULL,
//!     notes             TEXT,
//!     status            TEXT NOT NULL,
//!     requested_by      UUID NOT NULL,
//!     requested_at      TIMESTAMPTZ NOT NULL,
//!     decided_by        UUID,
//!     decided_at        TIMESTAMPTZ,
//!     rejection_reason  TEXT,
//!     terms             JSONB,
//!     executed_by       UUID,
//!     executed_at       TIMESTAMPTZ,
//!     photo_url         TEXT
//! );
//!
//! CREATE TABLE batches (
//!     batch_id        UUID PRIMARY KEY,
//!     warehouse_id    UUID NOT NULL,
//!     batch_code      TEXT NOT NULL,
//!     crop            TEXT NOT NULL,
//!     source_type     TEXT NOT NULL,
//!     source_name     TEXT NOT NULL,
//!     initial_bags    BIGINT NOT NULL CHECK (initial_bags > 0),
//!     remaining_bags  BIGINT NOT NULL CHECK (remaining_bags >= 0),
//!     qr_token        TEXT NOT NULL,
//!     created_by      UUID NOT NULL,
//!     created_at      TIMESTAMPTZ NOT NULL,
//!     UNIQUE (warehouse_id, batch_code)
//! );
//!
//! CREATE TABLE batch_allocations (
//!     request_id    UUID NOT NULL,
//!     batch_id      UUID NOT NULL,
//!     warehouse_id  UUID NOT NULL,
//!     bags          BIGINT NOT NULL CHECK (bags > 0),
//!     allocated_at  TIMESTAMPTZ NOT NULL,
//!     PRIMARY KEY (request_id, batch_id)
//! );
//!
//! CREATE TABLE tools (
//!     tool_id       UUID PRIMARY KEY,
//!     warehouse_id  UUID NOT NULL,
//!     tool_type     TEXT NOT NULL,
//!     tag           TEXT NOT NULL,
//!     status        TEXT NOT NULL,
//!     assigned_to   UUID,
//!     assigned_at   TIMESTAMPTZ
//! );
//!
//! CREATE TABLE genesis_confirmations (
//!     event_id      UUID PRIMARY KEY,
//!     warehouse_id  UUID NOT NULL,
//!     confirmed_by  UUID NOT NULL,
//!     confirmed_at  TIMESTAMPTZ NOT NULL
//! );
//! ```
//!
//! ## Error Mapping
//!
//! SQLx errors are mapped to `StoreError` as follows:
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Conflict` | Duplicate correlation key, concurrent sequence, taken batch code |
//! | Database (check constraint violation) | `23514` | `Backend` | Counts went negative (schema guards a service bug) |
//! | Database (other) | Any other | `Backend` | Other database errors |
//! | PoolClosed / network | N/A | `Backend` | Connection failures |
//! | Row decode failure | N/A | `Corrupt` | Stored row no longer matches the model |
//!
//! Conditional updates that match zero rows are reported as `Conflict` without
//! involving an error code: the row moved on while this append was in flight.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use std::str::FromStr;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use async_trait::async_trait;

use granary_core::{
    ActorId, BatchId, Crop, EventId, RequestId, SourceType, ToolId, WarehouseId,
};
use granary_events::{EventKind, EventPayload};

use crate::model::{
    Batch, BatchAllocation, DispatchRequest, GenesisConfirmation, RequestStatus, StockLine, Tool,
    ToolStatus, Warehouse, WarehouseStatus,
};
use crate::r#trait::{EventDraft, EventFilter, EventRecord, LedgerStore, StoreError};
use crate::writes::{ProjectionUpdates, RequestTransition, ToolTransition};

/// Postgres implementation of [`LedgerStore`].
///
/// Uses the SQLx connection pool, so the handle is cheap to clone and safe to
/// share across tasks. Sequence assignment reads `MAX(sequence)` inside the
/// append transaction; the unique constraint on `(warehouse_id, sequence)`
/// turns a concurrent assignment of the same slot into a `Conflict` instead
/// of a gap or a duplicate.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect with a small default pool.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(|e| StoreError::Backend(format!("failed to connect to postgres: {e}")))?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    #[instrument(
        skip(self, draft, updates),
        fields(
            warehouse_id = %draft.warehouse_id,
            kind = %draft.kind()
        ),
        err
    )]
    async fn append(
        &self,
        draft: EventDraft,
        updates: ProjectionUpdates,
    ) -> Result<EventRecord, StoreError> {
        let kind = draft.kind();
        let correlation = draft.payload.correlation();
        let payload_json = serde_json::to_value(&draft.payload)
            .map_err(|e| StoreError::Backend(format!("payload serialization failed: {e}")))?;

        let event_id = EventId::new();
        let now = Utc::now();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let row = sqlx::query(
            "SELECT COALESCE(MAX(sequence), 0) + 1 AS next FROM ledger_events WHERE warehouse_id = $1",
        )
        .bind(draft.warehouse_id.as_uuid())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("next_sequence", e))?;
        let sequence: i64 = row
            .try_get("next")
            .map_err(|e| StoreError::Backend(format!("failed to read next sequence: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO ledger_events (
                event_id,
                warehouse_id,
                sequence,
                kind,
                correlation_id,
                actor_id,
                recorded_at,
                payload
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(event_id.as_uuid())
        .bind(draft.warehouse_id.as_uuid())
        .bind(sequence)
        .bind(kind.as_str())
        .bind(correlation.as_deref())
        .bind(draft.actor_id.as_uuid())
        .bind(now)
        .bind(&payload_json)
        .execute(&mut *tx)
        .await
        .map_err(|e| match unique_constraint(&e) {
            Some(name) if name.contains("correlation") => {
                let key = correlation.as_deref().unwrap_or("?");
                StoreError::Conflict(format!("{kind} already recorded for {key}"))
            }
            Some(_) => StoreError::Conflict(format!(
                "concurrent append detected: sequence {sequence} already taken"
            )),
            None => map_sqlx_error("insert_event", e),
        })?;

        if let Err(e) = apply_updates(&mut tx, draft.warehouse_id, &updates, sequence, now).await {
            tx.rollback()
                .await
                .map_err(|re| map_sqlx_error("rollback", re))?;
            return Err(e);
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(EventRecord {
            event_id,
            warehouse_id: draft.warehouse_id,
            sequence: sequence as u64,
            kind,
            actor_id: draft.actor_id,
            recorded_at: now,
            payload: draft.payload,
        })
    }

    #[instrument(skip(self, filter), fields(warehouse_id = %warehouse_id), err)]
    async fn read(
        &self,
        warehouse_id: WarehouseId,
        filter: EventFilter,
    ) -> Result<Vec<EventRecord>, StoreError> {
        let after: Option<i64> = filter.after_sequence.map(|s| s as i64);
        let kinds: Option<Vec<String>> = filter
            .kinds
            .as_ref()
            .map(|ks| ks.iter().map(|k| k.as_str().to_string()).collect());
        let limit: Option<i64> = filter.limit.map(|l| l as i64);

        let rows = sqlx::query(
            r#"
            SELECT event_id, warehouse_id, sequence, actor_id, recorded_at, payload
            FROM ledger_events
            WHERE warehouse_id = $1
                AND ($2::bigint IS NULL OR sequence > $2)
                AND ($3::text[] IS NULL OR kind = ANY($3))
            ORDER BY sequence ASC
            LIMIT $4
            "#,
        )
        .bind(warehouse_id.as_uuid())
        .bind(after)
        .bind(kinds)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("read_events", e))?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let row = LedgerEventRow::from_row(&row)
                .map_err(|e| StoreError::Corrupt(format!("failed to decode event row: {e}")))?;
            events.push(EventRecord::try_from(row)?);
        }
        Ok(events)
    }

    async fn exists(
        &self,
        warehouse_id: WarehouseId,
        kind: EventKind,
        correlation: &str,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM ledger_events
                WHERE warehouse_id = $1 AND kind = $2 AND correlation_id = $3
            ) AS present
            "#,
        )
        .bind(warehouse_id.as_uuid())
        .bind(kind.as_str())
        .bind(correlation)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("exists", e))?;

        row.try_get("present")
            .map_err(|e| StoreError::Backend(format!("failed to read exists flag: {e}")))
    }

    async fn warehouse(&self, warehouse_id: WarehouseId) -> Result<Option<Warehouse>, StoreError> {
        let row = sqlx::query(
            "SELECT warehouse_id, name, code, owner_id, status, registered_at FROM warehouses WHERE warehouse_id = $1",
        )
        .bind(warehouse_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_warehouse", e))?;

        row.map(|r| decode_row::<WarehouseRow, Warehouse>(&r, "warehouse"))
            .transpose()
    }

    async fn warehouses(&self) -> Result<Vec<Warehouse>, StoreError> {
        let rows = sqlx::query(
            "SELECT warehouse_id, name, code, owner_id, status, registered_at FROM warehouses ORDER BY registered_at ASC, warehouse_id ASC",
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_warehouses", e))?;

        rows.iter()
            .map(|r| decode_row::<WarehouseRow, Warehouse>(r, "warehouse"))
            .collect()
    }

    async fn stock_line(
        &self,
        warehouse_id: WarehouseId,
        crop: Crop,
    ) -> Result<Option<StockLine>, StoreError> {
        let row = sqlx::query(
            "SELECT warehouse_id, crop, bag_count, last_event_sequence, updated_at FROM stock_lines WHERE warehouse_id = $1 AND crop = $2",
        )
        .bind(warehouse_id.as_uuid())
        .bind(crop.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_stock_line", e))?;

        row.map(|r| decode_row::<StockLineRow, StockLine>(&r, "stock line"))
            .transpose()
    }

    async fn stock_lines(&self, warehouse_id: WarehouseId) -> Result<Vec<StockLine>, StoreError> {
        let rows = sqlx::query(
            "SELECT warehouse_id, crop, bag_count, last_event_sequence, updated_at FROM stock_lines WHERE warehouse_id = $1 ORDER BY crop ASC",
        )
        .bind(warehouse_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_stock_lines", e))?;

        rows.iter()
            .map(|r| decode_row::<StockLineRow, StockLine>(r, "stock line"))
            .collect()
    }

    #[instrument(skip(self, lines), fields(warehouse_id = %warehouse_id, line_count = lines.len()), err)]
    async fn replace_stock_lines(
        &self,
        warehouse_id: WarehouseId,
        lines: Vec<StockLine>,
    ) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query("DELETE FROM stock_lines WHERE warehouse_id = $1")
            .bind(warehouse_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("clear_stock_lines", e))?;

        for line in &lines {
            sqlx::query(
                "INSERT INTO stock_lines (warehouse_id, crop, bag_count, last_event_sequence, updated_at) VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(warehouse_id.as_uuid())
            .bind(line.crop.as_str())
            .bind(line.bag_count)
            .bind(line.last_event_sequence as i64)
            .bind(line.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_stock_line", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn dispatch_request(
        &self,
        warehouse_id: WarehouseId,
        request_id: RequestId,
    ) -> Result<Option<DispatchRequest>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT request_id, warehouse_id, crop, bags, recipient, notes, status,
                   requested_by, requested_at, decided_by, decided_at, rejection_reason,
                   terms, executed_by, executed_at, photo_url
            FROM dispatch_requests
            WHERE warehouse_id = $1 AND request_id = $2
            "#,
        )
        .bind(warehouse_id.as_uuid())
        .bind(request_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_dispatch_request", e))?;

        row.map(|r| decode_row::<DispatchRequestRow, DispatchRequest>(&r, "dispatch request"))
            .transpose()
    }

    async fn dispatch_requests(
        &self,
        warehouse_id: WarehouseId,
        status: Option<RequestStatus>,
    ) -> Result<Vec<DispatchRequest>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT request_id, warehouse_id, crop, bags, recipient, notes, status,
                   requested_by, requested_at, decided_by, decided_at, rejection_reason,
                   terms, executed_by, executed_at, photo_url
            FROM dispatch_requests
            WHERE warehouse_id = $1
                AND ($2::text IS NULL OR status = $2)
            ORDER BY requested_at DESC, request_id DESC
            "#,
        )
        .bind(warehouse_id.as_uuid())
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_dispatch_requests", e))?;

        rows.iter()
            .map(|r| decode_row::<DispatchRequestRow, DispatchRequest>(r, "dispatch request"))
            .collect()
    }

    async fn allocations_for_request(
        &self,
        warehouse_id: WarehouseId,
        request_id: RequestId,
    ) -> Result<Vec<BatchAllocation>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT request_id, batch_id, warehouse_id, bags, allocated_at
            FROM batch_allocations
            WHERE warehouse_id = $1 AND request_id = $2
            ORDER BY allocated_at ASC, batch_id ASC
            "#,
        )
        .bind(warehouse_id.as_uuid())
        .bind(request_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_allocations", e))?;

        rows.iter()
            .map(|r| decode_row::<AllocationRow, BatchAllocation>(r, "allocation"))
            .collect()
    }

    async fn batch(
        &self,
        warehouse_id: WarehouseId,
        batch_id: BatchId,
    ) -> Result<Option<Batch>, StoreError> {
        let row = sqlx::query(&format!(
            "{BATCH_SELECT} WHERE warehouse_id = $1 AND batch_id = $2"
        ))
        .bind(warehouse_id.as_uuid())
        .bind(batch_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_batch", e))?;

        row.map(|r| decode_row::<BatchRow, Batch>(&r, "batch")).transpose()
    }

    async fn batch_by_code(
        &self,
        warehouse_id: WarehouseId,
        batch_code: &str,
    ) -> Result<Option<Batch>, StoreError> {
        let row = sqlx::query(&format!(
            "{BATCH_SELECT} WHERE warehouse_id = $1 AND batch_code = $2"
        ))
        .bind(warehouse_id.as_uuid())
        .bind(batch_code)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_batch_by_code", e))?;

        row.map(|r| decode_row::<BatchRow, Batch>(&r, "batch")).transpose()
    }

    async fn batches(&self, warehouse_id: WarehouseId) -> Result<Vec<Batch>, StoreError> {
        let rows = sqlx::query(&format!(
            "{BATCH_SELECT} WHERE warehouse_id = $1 ORDER BY created_at ASC, batch_id ASC"
        ))
        .bind(warehouse_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_batches", e))?;

        rows.iter()
            .map(|r| decode_row::<BatchRow, Batch>(r, "batch"))
            .collect()
    }

    async fn open_batches(
        &self,
        warehouse_id: WarehouseId,
        crop: Crop,
    ) -> Result<Vec<Batch>, StoreError> {
        let rows = sqlx::query(&format!(
            "{BATCH_SELECT} WHERE warehouse_id = $1 AND crop = $2 AND remaining_bags > 0 ORDER BY created_at ASC, batch_id ASC"
        ))
        .bind(warehouse_id.as_uuid())
        .bind(crop.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_open_batches", e))?;

        rows.iter()
            .map(|r| decode_row::<BatchRow, Batch>(r, "batch"))
            .collect()
    }

    async fn batch_count(&self, warehouse_id: WarehouseId) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM batches WHERE warehouse_id = $1")
            .bind(warehouse_id.as_uuid())
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_batches", e))?;

        let total: i64 = row
            .try_get("total")
            .map_err(|e| StoreError::Backend(format!("failed to read batch count: {e}")))?;
        Ok(total as u64)
    }

    async fn tool(
        &self,
        warehouse_id: WarehouseId,
        tool_id: ToolId,
    ) -> Result<Option<Tool>, StoreError> {
        let row = sqlx::query(
            "SELECT tool_id, warehouse_id, tool_type, tag, status, assigned_to, assigned_at FROM tools WHERE warehouse_id = $1 AND tool_id = $2",
        )
        .bind(warehouse_id.as_uuid())
        .bind(tool_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_tool", e))?;

        row.map(|r| decode_row::<ToolRow, Tool>(&r, "tool")).transpose()
    }

    async fn tools(&self, warehouse_id: WarehouseId) -> Result<Vec<Tool>, StoreError> {
        let rows = sqlx::query(
            "SELECT tool_id, warehouse_id, tool_type, tag, status, assigned_to, assigned_at FROM tools WHERE warehouse_id = $1 ORDER BY tag ASC",
        )
        .bind(warehouse_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_tools", e))?;

        rows.iter()
            .map(|r| decode_row::<ToolRow, Tool>(r, "tool"))
            .collect()
    }

    async fn genesis_confirmations(
        &self,
        warehouse_id: WarehouseId,
    ) -> Result<Vec<GenesisConfirmation>, StoreError> {
        let rows = sqlx::query(
            "SELECT event_id, warehouse_id, confirmed_by, confirmed_at FROM genesis_confirmations WHERE warehouse_id = $1 ORDER BY confirmed_at ASC, event_id ASC",
        )
        .bind(warehouse_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_genesis_confirmations", e))?;

        rows.iter()
            .map(|r| decode_row::<ConfirmationRow, GenesisConfirmation>(r, "genesis confirmation"))
            .collect()
    }
}

const BATCH_SELECT: &str = "SELECT batch_id, warehouse_id, batch_code, crop, source_type, source_name, initial_bags, remaining_bags, qr_token, created_by, created_at FROM batches";

/// Apply every projection effect inside the append transaction.
///
/// Conditional statements carry their precondition in the WHERE clause; zero
/// affected rows means the precondition no longer holds and the whole append
/// must roll back. `sequence` is the appended event's slot, stamped onto any
/// stock line the event touches.
async fn apply_updates(
    tx: &mut Transaction<'_, Postgres>,
    warehouse_id: WarehouseId,
    updates: &ProjectionUpdates,
    sequence: i64,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    if let Some(w) = &updates.warehouse {
        sqlx::query(
            r#"
            INSERT INTO warehouses (warehouse_id, name, code, owner_id, status, registered_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(w.warehouse_id.as_uuid())
        .bind(&w.name)
        .bind(&w.code)
        .bind(w.owner_id.as_uuid())
        .bind(w.status.as_str())
        .bind(w.registered_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| match unique_constraint(&e) {
            Some(_) => StoreError::Conflict(format!(
                "warehouse {} or code {} already registered",
                w.warehouse_id, w.code
            )),
            None => map_sqlx_error("insert_warehouse", e),
        })?;
    }

    if let Some(t) = &updates.warehouse_status {
        let result = sqlx::query(
            "UPDATE warehouses SET status = $3 WHERE warehouse_id = $1 AND status = $2",
        )
        .bind(t.warehouse_id.as_uuid())
        .bind(t.from.as_str())
        .bind(t.to.as_str())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("transition_warehouse", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "warehouse {} is no longer {}",
                t.warehouse_id, t.from
            )));
        }
    }

    if let Some(delta) = &updates.stock {
        sqlx::query(
            r#"
            INSERT INTO stock_lines (warehouse_id, crop, bag_count, last_event_sequence, updated_at)
            VALUES ($1, $2, GREATEST($3, 0), $4, $5)
            ON CONFLICT (warehouse_id, crop)
            DO UPDATE SET bag_count = GREATEST(stock_lines.bag_count + $3, 0),
                          last_event_sequence = $4,
                          updated_at = $5
            "#,
        )
        .bind(warehouse_id.as_uuid())
        .bind(delta.crop.as_str())
        .bind(delta.bags)
        .bind(sequence)
        .bind(now)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("upsert_stock_line", e))?;
    }

    if let Some(r) = &updates.request {
        sqlx::query(
            r#"
            INSERT INTO dispatch_requests (
                request_id, warehouse_id, crop, bags, recipient, notes, status,
                requested_by, requested_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(r.request_id.as_uuid())
        .bind(r.warehouse_id.as_uuid())
        .bind(r.crop.as_str())
        .bind(r.bags)
        .bind(&r.recipient)
        .bind(r.notes.as_deref())
        .bind(r.status.as_str())
        .bind(r.requested_by.as_uuid())
        .bind(r.requested_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| match unique_constraint(&e) {
            Some(_) => StoreError::Conflict(format!(
                "dispatch request {} already exists",
                r.request_id
            )),
            None => map_sqlx_error("insert_dispatch_request", e),
        })?;
    }

    if let Some(t) = &updates.request_transition {
        let result = match t {
            RequestTransition::Approve {
                request_id,
                approver,
                at,
                terms,
            } => {
                sqlx::query(
                    r#"
                    UPDATE dispatch_requests
                    SET status = $4, decided_by = $5, decided_at = $6, terms = $7
                    WHERE request_id = $1 AND warehouse_id = $2 AND status = $3
                    "#,
                )
                .bind(request_id.as_uuid())
                .bind(warehouse_id.as_uuid())
                .bind(t.required_status().as_str())
                .bind(t.target_status().as_str())
                .bind(approver.as_uuid())
                .bind(at)
                .bind(terms)
                .execute(&mut **tx)
                .await
            }
            RequestTransition::Reject {
                request_id,
                approver,
                at,
                reason,
            } => {
                sqlx::query(
                    r#"
                    UPDATE dispatch_requests
                    SET status = $4, decided_by = $5, decided_at = $6, rejection_reason = $7
                    WHERE request_id = $1 AND warehouse_id = $2 AND status = $3
                    "#,
                )
                .bind(request_id.as_uuid())
                .bind(warehouse_id.as_uuid())
                .bind(t.required_status().as_str())
                .bind(t.target_status().as_str())
                .bind(approver.as_uuid())
                .bind(at)
                .bind(reason)
                .execute(&mut **tx)
                .await
            }
            RequestTransition::Execute {
                request_id,
                executor,
                at,
                photo_url,
            } => {
                sqlx::query(
                    r#"
                    UPDATE dispatch_requests
                    SET status = $4, executed_by = $5, executed_at = $6, photo_url = $7
                    WHERE request_id = $1 AND warehouse_id = $2 AND status = $3
                    "#,
                )
                .bind(request_id.as_uuid())
                .bind(warehouse_id.as_uuid())
                .bind(t.required_status().as_str())
                .bind(t.target_status().as_str())
                .bind(executor.as_uuid())
                .bind(at)
                .bind(photo_url)
                .execute(&mut **tx)
                .await
            }
        }
        .map_err(|e| map_sqlx_error("transition_dispatch_request", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "dispatch request {} is not {}",
                t.request_id(),
                t.required_status()
            )));
        }
    }

    if let Some(b) = &updates.batch {
        sqlx::query(
            r#"
            INSERT INTO batches (
                batch_id, warehouse_id, batch_code, crop, source_type, source_name,
                initial_bags, remaining_bags, qr_token, created_by, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(b.batch_id.as_uuid())
        .bind(b.warehouse_id.as_uuid())
        .bind(&b.batch_code)
        .bind(b.crop.as_str())
        .bind(b.source_type.as_str())
        .bind(&b.source_name)
        .bind(b.initial_bags)
        .bind(b.remaining_bags)
        .bind(&b.qr_token)
        .bind(b.created_by.as_uuid())
        .bind(b.created_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| match unique_constraint(&e) {
            Some(_) => {
                StoreError::Conflict(format!("batch code {} already used", b.batch_code))
            }
            None => map_sqlx_error("insert_batch", e),
        })?;
    }

    // Each draw locks its batch row. The stable order keeps two concurrent
    // appends drawing from the same batches from deadlocking each other.
    let draws = updates.ordered_draws();
    for draw in &draws {
        let result = sqlx::query(
            r#"
            UPDATE batches
            SET remaining_bags = remaining_bags - $3
            WHERE batch_id = $1 AND warehouse_id = $2 AND remaining_bags >= $3
            "#,
        )
        .bind(draw.batch_id.as_uuid())
        .bind(warehouse_id.as_uuid())
        .bind(draw.bags)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("draw_from_batch", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "batch {} cannot supply {} bags",
                draw.batch_id, draw.bags
            )));
        }
    }

    for a in &updates.allocations {
        sqlx::query(
            r#"
            INSERT INTO batch_allocations (request_id, batch_id, warehouse_id, bags, allocated_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(a.request_id.as_uuid())
        .bind(a.batch_id.as_uuid())
        .bind(a.warehouse_id.as_uuid())
        .bind(a.bags)
        .bind(a.allocated_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_allocation", e))?;
    }

    if let Some(t) = &updates.tool {
        sqlx::query(
            r#"
            INSERT INTO tools (tool_id, warehouse_id, tool_type, tag, status, assigned_to, assigned_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(t.tool_id.as_uuid())
        .bind(t.warehouse_id.as_uuid())
        .bind(&t.tool_type)
        .bind(&t.tag)
        .bind(t.status.as_str())
        .bind(t.assigned_to.map(|a| *a.as_uuid()))
        .bind(t.assigned_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| match unique_constraint(&e) {
            Some(_) => StoreError::Conflict(format!("tool {} already registered", t.tool_id)),
            None => map_sqlx_error("insert_tool", e),
        })?;
    }

    if let Some(t) = &updates.tool_transition {
        let result = match t {
            ToolTransition::Assign {
                tool_id,
                assignee,
                at,
            } => {
                sqlx::query(
                    r#"
                    UPDATE tools
                    SET status = 'ASSIGNED', assigned_to = $3, assigned_at = $4
                    WHERE tool_id = $1 AND warehouse_id = $2 AND status = 'AVAILABLE'
                    "#,
                )
                .bind(tool_id.as_uuid())
                .bind(warehouse_id.as_uuid())
                .bind(assignee.as_uuid())
                .bind(at)
                .execute(&mut **tx)
                .await
            }
            ToolTransition::Return { tool_id, .. } => {
                sqlx::query(
                    r#"
                    UPDATE tools
                    SET status = 'AVAILABLE', assigned_to = NULL, assigned_at = NULL
                    WHERE tool_id = $1 AND warehouse_id = $2 AND status = 'ASSIGNED'
                    "#,
                )
                .bind(tool_id.as_uuid())
                .bind(warehouse_id.as_uuid())
                .execute(&mut **tx)
                .await
            }
        }
        .map_err(|e| map_sqlx_error("transition_tool", e))?;

        if result.rows_affected() == 0 {
            let expected = match t {
                ToolTransition::Assign { .. } => ToolStatus::Available,
                ToolTransition::Return { .. } => ToolStatus::Assigned,
            };
            return Err(StoreError::Conflict(format!(
                "tool {} is not {}",
                t.tool_id(),
                expected
            )));
        }
    }

    for c in &updates.genesis_confirmations {
        sqlx::query(
            r#"
            INSERT INTO genesis_confirmations (event_id, warehouse_id, confirmed_by, confirmed_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(c.event_id.as_uuid())
        .bind(c.warehouse_id.as_uuid())
        .bind(c.confirmed_by.as_uuid())
        .bind(c.confirmed_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| match unique_constraint(&e) {
            Some(_) => StoreError::Conflict(format!(
                "genesis event {} already confirmed",
                c.event_id
            )),
            None => map_sqlx_error("insert_genesis_confirmation", e),
        })?;
    }

    Ok(())
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::RowNotFound => {
            StoreError::Backend(format!("unexpected row not found in {operation}"))
        }
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}

/// Constraint name if the error is a unique violation, `None` otherwise.
fn unique_constraint(err: &sqlx::Error) -> Option<String> {
    if let sqlx::Error::Database(db_err) = err {
        if db_err.code().as_deref() == Some("23505") {
            return Some(db_err.constraint().unwrap_or_default().to_string());
        }
    }
    None
}

fn decode_row<'r, R, T>(row: &'r sqlx::postgres::PgRow, what: &str) -> Result<T, StoreError>
where
    R: FromRow<'r, sqlx::postgres::PgRow>,
    T: TryFrom<R, Error = StoreError>,
{
    let raw =
        R::from_row(row).map_err(|e| StoreError::Corrupt(format!("failed to decode {what} row: {e}")))?;
    T::try_from(raw)
}

fn parse_crop(text: &str) -> Result<Crop, StoreError> {
    Crop::from_str(text).map_err(|e| StoreError::Corrupt(e.message().to_string()))
}

// SQLx row types. The sqlx feature set here excludes the derive macros, so
// FromRow is written out by hand.

#[derive(Debug)]
struct LedgerEventRow {
    event_id: Uuid,
    warehouse_id: Uuid,
    sequence: i64,
    actor_id: Uuid,
    recorded_at: DateTime<Utc>,
    payload: JsonValue,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for LedgerEventRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(LedgerEventRow {
            event_id: row.try_get("event_id")?,
            warehouse_id: row.try_get("warehouse_id")?,
            sequence: row.try_get("sequence")?,
            actor_id: row.try_get("actor_id")?,
            recorded_at: row.try_get("recorded_at")?,
            payload: row.try_get("payload")?,
        })
    }
}

impl TryFrom<LedgerEventRow> for EventRecord {
    type Error = StoreError;

    fn try_from(row: LedgerEventRow) -> Result<Self, StoreError> {
        let payload: EventPayload = serde_json::from_value(row.payload)
            .map_err(|e| StoreError::Corrupt(format!("undecodable event payload: {e}")))?;
        // The kind column is denormalized for SQL filtering; the payload tag
        // is authoritative on the way back out.
        let kind = payload.kind();
        Ok(EventRecord {
            event_id: EventId::from_uuid(row.event_id),
            warehouse_id: WarehouseId::from_uuid(row.warehouse_id),
            sequence: row.sequence as u64,
            kind,
            actor_id: ActorId::from_uuid(row.actor_id),
            recorded_at: row.recorded_at,
            payload,
        })
    }
}

#[derive(Debug)]
struct WarehouseRow {
    warehouse_id: Uuid,
    name: String,
    code: String,
    owner_id: Uuid,
    status: String,
    registered_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for WarehouseRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(WarehouseRow {
            warehouse_id: row.try_get("warehouse_id")?,
            name: row.try_get("name")?,
            code: row.try_get("code")?,
            owner_id: row.try_get("owner_id")?,
            status: row.try_get("status")?,
            registered_at: row.try_get("registered_at")?,
        })
    }
}

impl TryFrom<WarehouseRow> for Warehouse {
    type Error = StoreError;

    fn try_from(row: WarehouseRow) -> Result<Self, StoreError> {
        Ok(Warehouse {
            warehouse_id: WarehouseId::from_uuid(row.warehouse_id),
            name: row.name,
            code: row.code,
            owner_id: ActorId::from_uuid(row.owner_id),
            status: WarehouseStatus::from_str(&row.status).map_err(StoreError::Corrupt)?,
            registered_at: row.registered_at,
        })
    }
}

#[derive(Debug)]
struct StockLineRow {
    warehouse_id: Uuid,
    crop: String,
    bag_count: i64,
    last_event_sequence: i64,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for StockLineRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StockLineRow {
            warehouse_id: row.try_get("warehouse_id")?,
            crop: row.try_get("crop")?,
            bag_count: row.try_get("bag_count")?,
            last_event_sequence: row.try_get("last_event_sequence")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<StockLineRow> for StockLine {
    type Error = StoreError;

    fn try_from(row: StockLineRow) -> Result<Self, StoreError> {
        Ok(StockLine {
            warehouse_id: WarehouseId::from_uuid(row.warehouse_id),
            crop: parse_crop(&row.crop)?,
            bag_count: row.bag_count,
            last_event_sequence: row.last_event_sequence as u64,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug)]
struct DispatchRequestRow {
    request_id: Uuid,
    warehouse_id: Uuid,
    crop: String,
    bags: i64,
    recipient: String,
    notes: Option<String>,
    status: String,
    requested_by: Uuid,
    requested_at: DateTime<Utc>,
    decided_by: Option<Uuid>,
    decided_at: Option<DateTime<Utc>>,
    rejection_reason: Option<String>,
    terms: Option<JsonValue>,
    executed_by: Option<Uuid>,
    executed_at: Option<DateTime<Utc>>,
    photo_url: Option<String>,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for DispatchRequestRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(DispatchRequestRow {
            request_id: row.try_get("request_id")?,
            warehouse_id: row.try_get("warehouse_id")?,
            crop: row.try_get("crop")?,
            bags: row.try_get("bags")?,
            recipient: row.try_get("recipient")?,
            notes: row.try_get("notes")?,
            status: row.try_get("status")?,
            requested_by: row.try_get("requested_by")?,
            requested_at: row.try_get("requested_at")?,
            decided_by: row.try_get("decided_by")?,
            decided_at: row.try_get("decided_at")?,
            rejection_reason: row.try_get("rejection_reason")?,
            terms: row.try_get("terms")?,
            executed_by: row.try_get("executed_by")?,
            executed_at: row.try_get("executed_at")?,
            photo_url: row.try_get("photo_url")?,
        })
    }
}

impl TryFrom<DispatchRequestRow> for DispatchRequest {
    type Error = StoreError;

    fn try_from(row: DispatchRequestRow) -> Result<Self, StoreError> {
        Ok(DispatchRequest {
            request_id: RequestId::from_uuid(row.request_id),
            warehouse_id: WarehouseId::from_uuid(row.warehouse_id),
            crop: parse_crop(&row.crop)?,
            bags: row.bags,
            recipient: row.recipient,
            notes: row.notes,
            status: RequestStatus::from_str(&row.status).map_err(StoreError::Corrupt)?,
            requested_by: ActorId::from_uuid(row.requested_by),
            requested_at: row.requested_at,
            decided_by: row.decided_by.map(ActorId::from_uuid),
            decided_at: row.decided_at,
            rejection_reason: row.rejection_reason,
            terms: row.terms,
            executed_by: row.executed_by.map(ActorId::from_uuid),
            executed_at: row.executed_at,
            photo_url: row.photo_url,
        })
    }
}

#[derive(Debug)]
struct BatchRow {
    batch_id: Uuid,
    warehouse_id: Uuid,
    batch_code: String,
    crop: String,
    source_type: String,
    source_name: String,
    initial_bags: i64,
    remaining_bags: i64,
    qr_token: String,
    created_by: Uuid,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for BatchRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(BatchRow {
            batch_id: row.try_get("batch_id")?,
            warehouse_id: row.try_get("warehouse_id")?,
            batch_code: row.try_get("batch_code")?,
            crop: row.try_get("crop")?,
            source_type: row.try_get("source_type")?,
            source_name: row.try_get("source_name")?,
            initial_bags: row.try_get("initial_bags")?,
            remaining_bags: row.try_get("remaining_bags")?,
            qr_token: row.try_get("qr_token")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<BatchRow> for Batch {
    type Error = StoreError;

    fn try_from(row: BatchRow) -> Result<Self, StoreError> {
        Ok(Batch {
            batch_id: BatchId::from_uuid(row.batch_id),
            warehouse_id: WarehouseId::from_uuid(row.warehouse_id),
            batch_code: row.batch_code,
            crop: parse_crop(&row.crop)?,
            source_type: SourceType::from_str(&row.source_type)
                .map_err(|e| StoreError::Corrupt(e.message().to_string()))?,
            source_name: row.source_name,
            initial_bags: row.initial_bags,
            remaining_bags: row.remaining_bags,
            qr_token: row.qr_token,
            created_by: ActorId::from_uuid(row.created_by),
            created_at: row.created_at,
        })
    }
}

#[derive(Debug)]
struct AllocationRow {
    request_id: Uuid,
    batch_id: Uuid,
    warehouse_id: Uuid,
    bags: i64,
    allocated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for AllocationRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(AllocationRow {
            request_id: row.try_get("request_id")?,
            batch_id: row.try_get("batch_id")?,
            warehouse_id: row.try_get("warehouse_id")?,
            bags: row.try_get("bags")?,
            allocated_at: row.try_get("allocated_at")?,
        })
    }
}

impl TryFrom<AllocationRow> for BatchAllocation {
    type Error = StoreError;

    fn try_from(row: AllocationRow) -> Result<Self, StoreError> {
        Ok(BatchAllocation {
            request_id: RequestId::from_uuid(row.request_id),
            batch_id: BatchId::from_uuid(row.batch_id),
            warehouse_id: WarehouseId::from_uuid(row.warehouse_id),
            bags: row.bags,
            allocated_at: row.allocated_at,
        })
    }
}

#[derive(Debug)]
struct ToolRow {
    tool_id: Uuid,
    warehouse_id: Uuid,
    tool_type: String,
    tag: String,
    status: String,
    assigned_to: Option<Uuid>,
    assigned_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for ToolRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(ToolRow {
            tool_id: row.try_get("tool_id")?,
            warehouse_id: row.try_get("warehouse_id")?,
            tool_type: row.try_get("tool_type")?,
            tag: row.try_get("tag")?,
            status: row.try_get("status")?,
            assigned_to: row.try_get("assigned_to")?,
            assigned_at: row.try_get("assigned_at")?,
        })
    }
}

impl TryFrom<ToolRow> for Tool {
    type Error = StoreError;

    fn try_from(row: ToolRow) -> Result<Self, StoreError> {
        Ok(Tool {
            tool_id: ToolId::from_uuid(row.tool_id),
            warehouse_id: WarehouseId::from_uuid(row.warehouse_id),
            tool_type: row.tool_type,
            tag: row.tag,
            status: ToolStatus::from_str(&row.status).map_err(StoreError::Corrupt)?,
            assigned_to: row.assigned_to.map(ActorId::from_uuid),
            assigned_at: row.assigned_at,
        })
    }
}

#[derive(Debug)]
struct ConfirmationRow {
    event_id: Uuid,
    warehouse_id: Uuid,
    confirmed_by: Uuid,
    confirmed_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for ConfirmationRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(ConfirmationRow {
            event_id: row.try_get("event_id")?,
            warehouse_id: row.try_get("warehouse_id")?,
            confirmed_by: row.try_get("confirmed_by")?,
            confirmed_at: row.try_get("confirmed_at")?,
        })
    }
}

impl TryFrom<ConfirmationRow> for GenesisConfirmation {
    type Error = StoreError;

    fn try_from(row: ConfirmationRow) -> Result<Self, StoreError> {
        Ok(GenesisConfirmation {
            warehouse_id: WarehouseId::from_uuid(row.warehouse_id),
            event_id: EventId::from_uuid(row.event_id),
            confirmed_by: ActorId::from_uuid(row.confirmed_by),
            confirmed_at: row.confirmed_at,
        })
    }
}
