//! In-memory ledger store.
//!
//! Intended for tests/dev. Holds all state behind one `RwLock`, so an append
//! stages its checks and applies its effects under a single write guard; that
//! gives the same either-everything-or-nothing outcome the Postgres backend
//! gets from a transaction.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use granary_core::{BatchId, Crop, EventId, RequestId, ToolId, WarehouseId};
use granary_events::EventKind;

use crate::model::{
    Batch, BatchAllocation, DispatchRequest, GenesisConfirmation, RequestStatus, StockLine, Tool,
    ToolStatus, Warehouse,
};
use crate::r#trait::{EventDraft, EventFilter, EventRecord, LedgerStore, StoreError};
use crate::writes::{ProjectionUpdates, RequestTransition, ToolTransition};

#[derive(Debug, Default)]
struct State {
    events: HashMap<WarehouseId, Vec<EventRecord>>,
    correlations: HashSet<(WarehouseId, EventKind, String)>,
    warehouses: HashMap<WarehouseId, Warehouse>,
    stock: HashMap<(WarehouseId, Crop), StockLine>,
    requests: HashMap<RequestId, DispatchRequest>,
    batches: HashMap<BatchId, Batch>,
    allocations: Vec<BatchAllocation>,
    tools: HashMap<ToolId, Tool>,
    confirmations: Vec<GenesisConfirmation>,
}

impl State {
    /// Validate every conditional effect against current state.
    ///
    /// Runs before any mutation; a failure here aborts the append with
    /// nothing written.
    fn check(
        &self,
        warehouse_id: WarehouseId,
        updates: &ProjectionUpdates,
    ) -> Result<(), StoreError> {
        if let Some(w) = &updates.warehouse {
            if self.warehouses.contains_key(&w.warehouse_id) {
                return Err(StoreError::Conflict(format!(
                    "warehouse {} already registered",
                    w.warehouse_id
                )));
            }
            let code_taken = self.warehouses.values().any(|x| x.code == w.code);
            if code_taken {
                return Err(StoreError::Conflict(format!(
                    "warehouse code {} already used",
                    w.code
                )));
            }
        }

        if let Some(t) = &updates.warehouse_status {
            let current = self.warehouses.get(&t.warehouse_id).ok_or_else(|| {
                StoreError::NotFound(format!("warehouse {} not found", t.warehouse_id))
            })?;
            if current.status != t.from {
                return Err(StoreError::Conflict(format!(
                    "warehouse {} is {}, expected {}",
                    t.warehouse_id, current.status, t.from
                )));
            }
        }

        if let Some(r) = &updates.request {
            if self.requests.contains_key(&r.request_id) {
                return Err(StoreError::Conflict(format!(
                    "dispatch request {} already exists",
                    r.request_id
                )));
            }
        }

        if let Some(t) = &updates.request_transition {
            let current = self
                .requests
                .get(&t.request_id())
                .filter(|r| r.warehouse_id == warehouse_id)
                .ok_or_else(|| {
                    StoreError::NotFound(format!("dispatch request {} not found", t.request_id()))
                })?;
            if current.status != t.required_status() {
                return Err(StoreError::Conflict(format!(
                    "dispatch request {} is {}, expected {}",
                    t.request_id(),
                    current.status,
                    t.required_status()
                )));
            }
        }

        if let Some(b) = &updates.batch {
            if self.batches.contains_key(&b.batch_id) {
                return Err(StoreError::Conflict(format!(
                    "batch {} already exists",
                    b.batch_id
                )));
            }
            let code_taken = self
                .batches
                .values()
                .any(|x| x.warehouse_id == b.warehouse_id && x.batch_code == b.batch_code);
            if code_taken {
                return Err(StoreError::Conflict(format!(
                    "batch code {} already used",
                    b.batch_code
                )));
            }
        }

        // Fold draws per batch first so repeated draws against the same batch
        // are checked against the combined total.
        let mut drawn: HashMap<BatchId, i64> = HashMap::new();
        for draw in &updates.batch_draws {
            *drawn.entry(draw.batch_id).or_insert(0) += draw.bags;
        }
        for (batch_id, bags) in &drawn {
            let batch = self
                .batches
                .get(batch_id)
                .filter(|b| b.warehouse_id == warehouse_id)
                .ok_or_else(|| StoreError::NotFound(format!("batch {batch_id} not found")))?;
            if batch.remaining_bags < *bags {
                return Err(StoreError::Conflict(format!(
                    "batch {} has {} bags remaining, cannot draw {}",
                    batch.batch_code, batch.remaining_bags, bags
                )));
            }
        }

        if let Some(t) = &updates.tool {
            if self.tools.contains_key(&t.tool_id) {
                return Err(StoreError::Conflict(format!(
                    "tool {} already registered",
                    t.tool_id
                )));
            }
        }

        if let Some(t) = &updates.tool_transition {
            let current = self
                .tools
                .get(&t.tool_id())
                .filter(|x| x.warehouse_id == warehouse_id)
                .ok_or_else(|| StoreError::NotFound(format!("tool {} not found", t.tool_id())))?;
            match t {
                ToolTransition::Assign { .. } if current.status != ToolStatus::Available => {
                    return Err(StoreError::Conflict(format!(
                        "tool {} is already assigned",
                        t.tool_id()
                    )));
                }
                ToolTransition::Return { .. } if current.status != ToolStatus::Assigned => {
                    return Err(StoreError::Conflict(format!(
                        "tool {} is not assigned",
                        t.tool_id()
                    )));
                }
                _ => {}
            }
        }

        for c in &updates.genesis_confirmations {
            if self.confirmations.iter().any(|x| x.event_id == c.event_id) {
                return Err(StoreError::Conflict(format!(
                    "genesis event {} already confirmed",
                    c.event_id
                )));
            }
        }

        Ok(())
    }

    /// Apply effects. Preconditions were validated by `check`, so every
    /// lookup here succeeds. `sequence` is the appended event's slot, stamped
    /// onto any stock line the event touches.
    fn apply(
        &mut self,
        warehouse_id: WarehouseId,
        updates: ProjectionUpdates,
        sequence: u64,
        now: DateTime<Utc>,
    ) {
        if let Some(w) = updates.warehouse {
            self.warehouses.insert(w.warehouse_id, w);
        }

        if let Some(t) = updates.warehouse_status {
            if let Some(w) = self.warehouses.get_mut(&t.warehouse_id) {
                w.status = t.to;
            }
        }

        if let Some(delta) = updates.stock {
            let line = self
                .stock
                .entry((warehouse_id, delta.crop))
                .or_insert_with(|| StockLine {
                    warehouse_id,
                    crop: delta.crop,
                    bag_count: 0,
                    last_event_sequence: 0,
                    updated_at: now,
                });
            line.bag_count = (line.bag_count + delta.bags).max(0);
            line.last_event_sequence = sequence;
            line.updated_at = now;
        }

        if let Some(r) = updates.request {
            self.requests.insert(r.request_id, r);
        }

        if let Some(t) = updates.request_transition {
            if let Some(r) = self.requests.get_mut(&t.request_id()) {
                r.status = t.target_status();
                match t {
                    RequestTransition::Approve {
                        approver, at, terms, ..
                    } => {
                        r.decided_by = Some(approver);
                        r.decided_at = Some(at);
                        r.terms = terms;
                    }
                    RequestTransition::Reject {
                        approver, at, reason, ..
                    } => {
                        r.decided_by = Some(approver);
                        r.decided_at = Some(at);
                        r.rejection_reason = Some(reason);
                    }
                    RequestTransition::Execute {
                        executor,
                        at,
                        photo_url,
                        ..
                    } => {
                        r.executed_by = Some(executor);
                        r.executed_at = Some(at);
                        r.photo_url = Some(photo_url);
                    }
                }
            }
        }

        if let Some(b) = updates.batch {
            self.batches.insert(b.batch_id, b);
        }

        for draw in updates.batch_draws {
            if let Some(b) = self.batches.get_mut(&draw.batch_id) {
                b.remaining_bags -= draw.bags;
            }
        }

        self.allocations.extend(updates.allocations);

        if let Some(t) = updates.tool {
            self.tools.insert(t.tool_id, t);
        }

        if let Some(t) = updates.tool_transition {
            if let Some(tool) = self.tools.get_mut(&t.tool_id()) {
                match t {
                    ToolTransition::Assign { assignee, at, .. } => {
                        tool.status = ToolStatus::Assigned;
                        tool.assigned_to = Some(assignee);
                        tool.assigned_at = Some(at);
                    }
                    ToolTransition::Return { .. } => {
                        tool.status = ToolStatus::Available;
                        tool.assigned_to = None;
                        tool.assigned_at = None;
                    }
                }
            }
        }

        self.confirmations.extend(updates.genesis_confirmations);
    }
}

/// In-memory implementation of [`LedgerStore`].
#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    state: RwLock<State>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_state<T>(&self, f: impl FnOnce(&State) -> T) -> Result<T, StoreError> {
        let state = self
            .state
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        Ok(f(&state))
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn append(
        &self,
        draft: EventDraft,
        updates: ProjectionUpdates,
    ) -> Result<EventRecord, StoreError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;

        let kind = draft.kind();
        let correlation = draft.payload.correlation();
        if let Some(c) = &correlation {
            if state
                .correlations
                .contains(&(draft.warehouse_id, kind, c.clone()))
            {
                return Err(StoreError::Conflict(format!(
                    "{kind} already recorded for {c}"
                )));
            }
        }

        state.check(draft.warehouse_id, &updates)?;

        let now = Utc::now();
        let sequence = state
            .events
            .get(&draft.warehouse_id)
            .map(|stream| stream.len() as u64)
            .unwrap_or(0)
            + 1;

        let record = EventRecord {
            event_id: EventId::new(),
            warehouse_id: draft.warehouse_id,
            sequence,
            kind,
            actor_id: draft.actor_id,
            recorded_at: now,
            payload: draft.payload,
        };

        state.apply(draft.warehouse_id, updates, sequence, now);
        if let Some(c) = correlation {
            state.correlations.insert((draft.warehouse_id, kind, c));
        }
        state
            .events
            .entry(draft.warehouse_id)
            .or_default()
            .push(record.clone());

        Ok(record)
    }

    async fn read(
        &self,
        warehouse_id: WarehouseId,
        filter: EventFilter,
    ) -> Result<Vec<EventRecord>, StoreError> {
        self.read_state(|state| {
            let mut events: Vec<EventRecord> =
                state.events.get(&warehouse_id).cloned().unwrap_or_default();

            if let Some(after) = filter.after_sequence {
                events.retain(|e| e.sequence > after);
            }
            if let Some(kinds) = &filter.kinds {
                events.retain(|e| kinds.contains(&e.kind));
            }
            if let Some(limit) = filter.limit {
                events.truncate(limit as usize);
            }
            events
        })
    }

    async fn exists(
        &self,
        warehouse_id: WarehouseId,
        kind: EventKind,
        correlation: &str,
    ) -> Result<bool, StoreError> {
        self.read_state(|state| {
            state
                .correlations
                .contains(&(warehouse_id, kind, correlation.to_string()))
        })
    }

    async fn warehouse(&self, warehouse_id: WarehouseId) -> Result<Option<Warehouse>, StoreError> {
        self.read_state(|state| state.warehouses.get(&warehouse_id).cloned())
    }

    async fn warehouses(&self) -> Result<Vec<Warehouse>, StoreError> {
        self.read_state(|state| {
            let mut all: Vec<Warehouse> = state.warehouses.values().cloned().collect();
            all.sort_by_key(|w| (w.registered_at, *w.warehouse_id.as_uuid().as_bytes()));
            all
        })
    }

    async fn stock_line(
        &self,
        warehouse_id: WarehouseId,
        crop: Crop,
    ) -> Result<Option<StockLine>, StoreError> {
        self.read_state(|state| state.stock.get(&(warehouse_id, crop)).cloned())
    }

    async fn stock_lines(&self, warehouse_id: WarehouseId) -> Result<Vec<StockLine>, StoreError> {
        self.read_state(|state| {
            let mut lines: Vec<StockLine> = state
                .stock
                .values()
                .filter(|l| l.warehouse_id == warehouse_id)
                .cloned()
                .collect();
            lines.sort_by_key(|l| l.crop);
            lines
        })
    }

    async fn replace_stock_lines(
        &self,
        warehouse_id: WarehouseId,
        lines: Vec<StockLine>,
    ) -> Result<(), StoreError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        state.stock.retain(|(w, _), _| *w != warehouse_id);
        for line in lines {
            state.stock.insert((warehouse_id, line.crop), line);
        }
        Ok(())
    }

    async fn dispatch_request(
        &self,
        warehouse_id: WarehouseId,
        request_id: RequestId,
    ) -> Result<Option<DispatchRequest>, StoreError> {
        self.read_state(|state| {
            state
                .requests
                .get(&request_id)
                .filter(|r| r.warehouse_id == warehouse_id)
                .cloned()
        })
    }

    async fn dispatch_requests(
        &self,
        warehouse_id: WarehouseId,
        status: Option<RequestStatus>,
    ) -> Result<Vec<DispatchRequest>, StoreError> {
        self.read_state(|state| {
            let mut requests: Vec<DispatchRequest> = state
                .requests
                .values()
                .filter(|r| r.warehouse_id == warehouse_id)
                .filter(|r| status.is_none_or(|s| r.status == s))
                .cloned()
                .collect();
            requests.sort_by_key(|r| {
                (
                    std::cmp::Reverse(r.requested_at),
                    *r.request_id.as_uuid().as_bytes(),
                )
            });
            requests
        })
    }

    async fn allocations_for_request(
        &self,
        warehouse_id: WarehouseId,
        request_id: RequestId,
    ) -> Result<Vec<BatchAllocation>, StoreError> {
        self.read_state(|state| {
            state
                .allocations
                .iter()
                .filter(|a| a.warehouse_id == warehouse_id && a.request_id == request_id)
                .cloned()
                .collect()
        })
    }

    async fn batch(
        &self,
        warehouse_id: WarehouseId,
        batch_id: BatchId,
    ) -> Result<Option<Batch>, StoreError> {
        self.read_state(|state| {
            state
                .batches
                .get(&batch_id)
                .filter(|b| b.warehouse_id == warehouse_id)
                .cloned()
        })
    }

    async fn batch_by_code(
        &self,
        warehouse_id: WarehouseId,
        batch_code: &str,
    ) -> Result<Option<Batch>, StoreError> {
        self.read_state(|state| {
            state
                .batches
                .values()
                .find(|b| b.warehouse_id == warehouse_id && b.batch_code == batch_code)
                .cloned()
        })
    }

    async fn batches(&self, warehouse_id: WarehouseId) -> Result<Vec<Batch>, StoreError> {
        self.read_state(|state| {
            let mut batches: Vec<Batch> = state
                .batches
                .values()
                .filter(|b| b.warehouse_id == warehouse_id)
                .cloned()
                .collect();
            batches.sort_by_key(|b| (b.created_at, *b.batch_id.as_uuid().as_bytes()));
            batches
        })
    }

    async fn open_batches(
        &self,
        warehouse_id: WarehouseId,
        crop: Crop,
    ) -> Result<Vec<Batch>, StoreError> {
        self.read_state(|state| {
            let mut batches: Vec<Batch> = state
                .batches
                .values()
                .filter(|b| {
                    b.warehouse_id == warehouse_id && b.crop == crop && b.remaining_bags > 0
                })
                .cloned()
                .collect();
            // Oldest first: the draw order for first-in-first-out allocation.
            batches.sort_by_key(|b| (b.created_at, *b.batch_id.as_uuid().as_bytes()));
            batches
        })
    }

    async fn batch_count(&self, warehouse_id: WarehouseId) -> Result<u64, StoreError> {
        self.read_state(|state| {
            state
                .batches
                .values()
                .filter(|b| b.warehouse_id == warehouse_id)
                .count() as u64
        })
    }

    async fn tool(
        &self,
        warehouse_id: WarehouseId,
        tool_id: ToolId,
    ) -> Result<Option<Tool>, StoreError> {
        self.read_state(|state| {
            state
                .tools
                .get(&tool_id)
                .filter(|t| t.warehouse_id == warehouse_id)
                .cloned()
        })
    }

    async fn tools(&self, warehouse_id: WarehouseId) -> Result<Vec<Tool>, StoreError> {
        self.read_state(|state| {
            let mut tools: Vec<Tool> = state
                .tools
                .values()
                .filter(|t| t.warehouse_id == warehouse_id)
                .cloned()
                .collect();
            tools.sort_by(|a, b| a.tag.cmp(&b.tag));
            tools
        })
    }

    async fn genesis_confirmations(
        &self,
        warehouse_id: WarehouseId,
    ) -> Result<Vec<GenesisConfirmation>, StoreError> {
        self.read_state(|state| {
            state
                .confirmations
                .iter()
                .filter(|c| c.warehouse_id == warehouse_id)
                .cloned()
                .collect()
        })
    }
}
