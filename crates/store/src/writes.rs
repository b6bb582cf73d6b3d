//! Projection effects committed atomically with an event append.
//!
//! A service describes the full effect of one event as a [`ProjectionUpdates`]
//! value and hands it to [`LedgerStore::append`](crate::LedgerStore::append).
//! The store applies the event row and every listed effect in a single
//! transaction; if any conditional effect fails its precondition, nothing is
//! written, including the event.
//!
//! Conditional effects (status transitions, batch draws) double as the
//! concurrency guard: two racing appends both pass their service-level checks,
//! but only the first one finds the precondition still true inside the
//! transaction. The loser gets [`StoreError::Conflict`](crate::StoreError).

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use granary_core::{ActorId, RequestId, ToolId, WarehouseId};
use granary_events::{BatchDraw, StockDelta};

use crate::model::{
    Batch, BatchAllocation, DispatchRequest, GenesisConfirmation, RequestStatus, Tool, Warehouse,
    WarehouseStatus,
};

/// Conditional warehouse status change.
///
/// Applies only while the row still holds `from`; anything else is a conflict.
#[derive(Debug, Clone, PartialEq)]
pub struct WarehouseTransition {
    pub warehouse_id: WarehouseId,
    pub from: WarehouseStatus,
    pub to: WarehouseStatus,
}

/// Conditional dispatch request status change.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestTransition {
    Approve {
        request_id: RequestId,
        approver: ActorId,
        at: DateTime<Utc>,
        terms: Option<JsonValue>,
    },
    Reject {
        request_id: RequestId,
        approver: ActorId,
        at: DateTime<Utc>,
        reason: String,
    },
    Execute {
        request_id: RequestId,
        executor: ActorId,
        at: DateTime<Utc>,
        photo_url: String,
    },
}

impl RequestTransition {
    pub fn request_id(&self) -> RequestId {
        match self {
            RequestTransition::Approve { request_id, .. }
            | RequestTransition::Reject { request_id, .. }
            | RequestTransition::Execute { request_id, .. } => *request_id,
        }
    }

    /// Status the row must still hold for this transition to apply.
    pub fn required_status(&self) -> RequestStatus {
        match self {
            RequestTransition::Approve { .. } | RequestTransition::Reject { .. } => {
                RequestStatus::Pending
            }
            RequestTransition::Execute { .. } => RequestStatus::Approved,
        }
    }

    pub fn target_status(&self) -> RequestStatus {
        match self {
            RequestTransition::Approve { .. } => RequestStatus::Approved,
            RequestTransition::Reject { .. } => RequestStatus::Rejected,
            RequestTransition::Execute { .. } => RequestStatus::Executed,
        }
    }
}

/// Conditional tool custody change.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolTransition {
    Assign {
        tool_id: ToolId,
        assignee: ActorId,
        at: DateTime<Utc>,
    },
    Return {
        tool_id: ToolId,
        at: DateTime<Utc>,
    },
}

impl ToolTransition {
    pub fn tool_id(&self) -> ToolId {
        match self {
            ToolTransition::Assign { tool_id, .. } | ToolTransition::Return { tool_id, .. } => {
                *tool_id
            }
        }
    }
}

/// Everything one event does to the read side.
///
/// Unset fields are no-ops. Inserts fail on duplicate keys; transitions and
/// draws fail when their precondition no longer holds. Either way the whole
/// append rolls back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectionUpdates {
    /// Insert a new warehouse row.
    pub warehouse: Option<Warehouse>,
    /// Conditionally advance a warehouse's lifecycle status.
    pub warehouse_status: Option<WarehouseTransition>,
    /// Adjust one crop's stock line by a signed bag count.
    pub stock: Option<StockDelta>,
    /// Insert a new dispatch request row (status `Pending`).
    pub request: Option<DispatchRequest>,
    /// Conditionally move a dispatch request through its lifecycle.
    pub request_transition: Option<RequestTransition>,
    /// Insert a new batch row.
    pub batch: Option<Batch>,
    /// Conditionally decrement batch balances. Each draw requires
    /// `remaining_bags >= draw.bags` at commit time.
    pub batch_draws: Vec<BatchDraw>,
    /// Insert allocation rows tying batches to a request.
    pub allocations: Vec<BatchAllocation>,
    /// Insert a new tool row.
    pub tool: Option<Tool>,
    /// Conditionally change a tool's custody.
    pub tool_transition: Option<ToolTransition>,
    /// Insert genesis sign-off annotations, one per confirmed event.
    pub genesis_confirmations: Vec<GenesisConfirmation>,
}

impl ProjectionUpdates {
    /// No projection effects; the append writes only the event row.
    pub fn none() -> Self {
        Self::default()
    }

    /// Batch draws in a stable order, by batch id.
    ///
    /// Backends that lock one batch row per draw apply them in this order so
    /// two concurrent appends drawing from the same batches never take the
    /// locks in opposite orders.
    pub fn ordered_draws(&self) -> Vec<BatchDraw> {
        let mut draws = self.batch_draws.clone();
        draws.sort_by(|a, b| a.batch_id.as_uuid().cmp(b.batch_id.as_uuid()));
        draws
    }
}
