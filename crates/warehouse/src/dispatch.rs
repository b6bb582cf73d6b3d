//! Dispatch workflow: request, decide, execute.
//!
//! Outbound grain moves through `PENDING -> APPROVED -> EXECUTED`, with
//! `REJECTED` as the terminal alternative to approval. Stock is checked twice:
//! at request time (so hopeless requests never enter the queue) and again at
//! execution (the queue may have been overtaken by other dispatches). The
//! store's conditional transition settles concurrent executions: exactly one
//! append finds the request still `APPROVED`, the rest surface
//! `StateConflict` and leave nothing behind.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{info, instrument};

use granary_auth::{ActorContext, Role, require_owner, require_role, require_scope};
use granary_core::{Crop, DomainError, DomainResult, RequestId, WarehouseId};
use granary_events::{
    BatchDraw, DispatchApproved, DispatchExecuted, DispatchRejected, DispatchRequested,
    EventPayload, StockDelta,
};
use granary_store::{
    BatchAllocation, DispatchRequest, EventDraft, LedgerStore, ProjectionUpdates, RequestStatus,
    RequestTransition, WarehouseStatus,
};

use crate::batch::{AllocationMode, BatchRegistry};
use crate::stock::StockLedger;

/// Outbound request form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchIntent {
    pub warehouse_id: WarehouseId,
    pub crop: Crop,
    pub bags: u32,
    pub recipient: String,
    pub notes: Option<String>,
}

/// What an executed dispatch did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchOutcome {
    pub request_id: RequestId,
    /// Stock level for the crop after the dispatch committed.
    pub new_stock_level: i64,
    pub draws: Vec<BatchDraw>,
}

/// The request-approve-execute pipeline for outbound grain.
#[derive(Debug, Clone)]
pub struct DispatchWorkflow<S> {
    store: S,
    stock: StockLedger<S>,
    batches: BatchRegistry<S>,
}

impl<S: LedgerStore + Clone> DispatchWorkflow<S> {
    pub fn new(store: S, batches: BatchRegistry<S>) -> Self {
        Self {
            stock: StockLedger::new(store.clone()),
            store,
            batches,
        }
    }

    /// File a new outbound request. Enters the queue as `PENDING`.
    #[instrument(
        skip(self, actor, intent),
        fields(warehouse_id = %intent.warehouse_id, crop = %intent.crop, bags = intent.bags),
        err
    )]
    pub async fn request(
        &self,
        actor: &ActorContext,
        intent: DispatchIntent,
    ) -> DomainResult<DispatchRequest> {
        require_role(actor, &[Role::Admin, Role::Attendant])?;
        require_scope(actor, intent.warehouse_id)?;
        if intent.bags == 0 {
            return Err(DomainError::validation("bags must be greater than zero"));
        }
        let recipient = intent.recipient.trim();
        if recipient.is_empty() {
            return Err(DomainError::validation("recipient must not be blank"));
        }

        let warehouse = crate::directory::load(&self.store, intent.warehouse_id).await?;
        if warehouse.status != WarehouseStatus::Active {
            return Err(DomainError::state_conflict(format!(
                "warehouse {} is {}, expected ACTIVE",
                warehouse.warehouse_id, warehouse.status
            )));
        }

        let bags = i64::from(intent.bags);
        let available = self.stock.available(intent.warehouse_id, intent.crop).await?;
        if available < bags {
            return Err(DomainError::validation(format!(
                "Insufficient stock. Requested: {bags}, Available: {available}"
            )));
        }

        let request = DispatchRequest {
            request_id: RequestId::new(),
            warehouse_id: intent.warehouse_id,
            crop: intent.crop,
            bags,
            recipient: recipient.to_string(),
            notes: intent.notes.clone(),
            status: RequestStatus::Pending,
            requested_by: actor.actor_id,
            requested_at: Utc::now(),
            decided_by: None,
            decided_at: None,
            rejection_reason: None,
            terms: None,
            executed_by: None,
            executed_at: None,
            photo_url: None,
        };
        let payload = EventPayload::DispatchRequested(DispatchRequested {
            request_id: request.request_id,
            crop: intent.crop,
            bags,
            recipient: request.recipient.clone(),
            notes: request.notes.clone(),
        });
        let draft = EventDraft::new(intent.warehouse_id, actor.actor_id, payload);
        let updates = ProjectionUpdates {
            request: Some(request.clone()),
            ..ProjectionUpdates::none()
        };
        self.store.append(draft, updates).await?;

        info!(request_id = %request.request_id, "dispatch requested");
        Ok(request)
    }

    /// Approve a pending request, optionally attaching commercial terms.
    ///
    /// Deciding a request is an owner-only operation, like confirming
    /// genesis stock: the actor must be the owner of the request's warehouse.
    #[instrument(skip(self, actor, terms), fields(request_id = %request_id), err)]
    pub async fn approve(
        &self,
        actor: &ActorContext,
        request_id: RequestId,
        terms: Option<JsonValue>,
    ) -> DomainResult<DispatchRequest> {
        let request = self.load_request(actor.warehouse_id, request_id).await?;
        let warehouse = crate::directory::load(&self.store, request.warehouse_id).await?;
        require_owner(actor, warehouse.owner_id)?;
        ensure_status(&request, RequestStatus::Pending)?;

        let payload = EventPayload::DispatchApproved(DispatchApproved {
            request_id,
            terms: terms.clone(),
        });
        let draft = EventDraft::new(request.warehouse_id, actor.actor_id, payload);
        let updates = ProjectionUpdates {
            request_transition: Some(RequestTransition::Approve {
                request_id,
                approver: actor.actor_id,
                at: Utc::now(),
                terms,
            }),
            ..ProjectionUpdates::none()
        };
        self.store.append(draft, updates).await?;

        info!("dispatch approved");
        self.load_request(request.warehouse_id, request_id).await
    }

    /// Reject a pending request with a reason. Owner-only, like approval.
    #[instrument(skip(self, actor, reason), fields(request_id = %request_id), err)]
    pub async fn reject(
        &self,
        actor: &ActorContext,
        request_id: RequestId,
        reason: &str,
    ) -> DomainResult<DispatchRequest> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(DomainError::validation("rejection reason must not be blank"));
        }
        let request = self.load_request(actor.warehouse_id, request_id).await?;
        let warehouse = crate::directory::load(&self.store, request.warehouse_id).await?;
        require_owner(actor, warehouse.owner_id)?;
        ensure_status(&request, RequestStatus::Pending)?;

        let payload = EventPayload::DispatchRejected(DispatchRejected {
            request_id,
            reason: reason.to_string(),
        });
        let draft = EventDraft::new(request.warehouse_id, actor.actor_id, payload);
        let updates = ProjectionUpdates {
            request_transition: Some(RequestTransition::Reject {
                request_id,
                approver: actor.actor_id,
                at: Utc::now(),
                reason: reason.to_string(),
            }),
            ..ProjectionUpdates::none()
        };
        self.store.append(draft, updates).await?;

        info!("dispatch rejected");
        self.load_request(request.warehouse_id, request_id).await
    }

    /// Execute an approved request: pick batches, debit stock, close it out.
    ///
    /// Photo evidence of the loaded dispatch is mandatory; a missing or blank
    /// `photo_url` never reaches the store. Stock is re-checked at execution
    /// time and the allocation is resolved once; the draws that were checked
    /// are exactly the draws committed.
    #[instrument(skip(self, actor, mode, photo_url), fields(request_id = %request_id), err)]
    pub async fn execute(
        &self,
        actor: &ActorContext,
        request_id: RequestId,
        mode: AllocationMode,
        photo_url: Option<String>,
    ) -> DomainResult<DispatchOutcome> {
        require_role(actor, &[Role::Admin, Role::Attendant])?;
        let photo_url = photo_url
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                DomainError::validation("photo evidence is required to execute a dispatch")
            })?;
        let request = self.load_request(actor.warehouse_id, request_id).await?;
        ensure_status(&request, RequestStatus::Approved)?;

        let available = self.stock.available(request.warehouse_id, request.crop).await?;
        if available < request.bags {
            return Err(DomainError::validation(format!(
                "Insufficient stock. Requested: {}, Available: {}",
                request.bags, available
            )));
        }

        let draws = self
            .batches
            .verify_for_dispatch(request.warehouse_id, request.crop, request.bags, &mode)
            .await?;

        let now = Utc::now();
        let allocations: Vec<BatchAllocation> = draws
            .iter()
            .map(|draw| BatchAllocation {
                request_id,
                batch_id: draw.batch_id,
                warehouse_id: request.warehouse_id,
                bags: draw.bags,
                allocated_at: now,
            })
            .collect();

        let payload = EventPayload::DispatchExecuted(DispatchExecuted {
            request_id,
            crop: request.crop,
            bags: request.bags,
            batches: draws.clone(),
            photo_url: photo_url.clone(),
        });
        let draft = EventDraft::new(request.warehouse_id, actor.actor_id, payload);
        let updates = ProjectionUpdates {
            stock: Some(StockDelta {
                crop: request.crop,
                bags: -request.bags,
            }),
            request_transition: Some(RequestTransition::Execute {
                request_id,
                executor: actor.actor_id,
                at: now,
                photo_url,
            }),
            batch_draws: draws.clone(),
            allocations,
            ..ProjectionUpdates::none()
        };
        self.store.append(draft, updates).await?;

        let new_stock_level = self.stock.available(request.warehouse_id, request.crop).await?;
        info!(bags = request.bags, new_stock_level, "dispatch executed");
        Ok(DispatchOutcome {
            request_id,
            new_stock_level,
            draws,
        })
    }

    pub async fn get(
        &self,
        warehouse_id: WarehouseId,
        request_id: RequestId,
    ) -> DomainResult<DispatchRequest> {
        self.load_request(warehouse_id, request_id).await
    }

    /// Requests for a warehouse, newest first, optionally filtered by status.
    pub async fn list(
        &self,
        warehouse_id: WarehouseId,
        status: Option<RequestStatus>,
    ) -> DomainResult<Vec<DispatchRequest>> {
        Ok(self.store.dispatch_requests(warehouse_id, status).await?)
    }

    /// Batch draws recorded when the request executed.
    pub async fn allocations(
        &self,
        warehouse_id: WarehouseId,
        request_id: RequestId,
    ) -> DomainResult<Vec<BatchAllocation>> {
        Ok(self
            .store
            .allocations_for_request(warehouse_id, request_id)
            .await?)
    }

    async fn load_request(
        &self,
        warehouse_id: WarehouseId,
        request_id: RequestId,
    ) -> DomainResult<DispatchRequest> {
        self.store
            .dispatch_request(warehouse_id, request_id)
            .await?
            .ok_or_else(|| {
                DomainError::not_found(format!("dispatch request {request_id} not found"))
            })
    }
}

fn ensure_status(request: &DispatchRequest, expected: RequestStatus) -> DomainResult<()> {
    if request.status != expected {
        return Err(DomainError::state_conflict(format!(
            "dispatch request {} is {}, expected {}",
            request.request_id, request.status, expected
        )));
    }
    Ok(())
}
