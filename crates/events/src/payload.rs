use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use granary_core::{ActorId, BatchId, Crop, EventId, RequestId, SourceType, ToolId};

use crate::kind::EventKind;

/// Signed stock movement derived from a payload.
///
/// Positive for intake (genesis, inbound), negative for dispatch execution.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockDelta {
    pub crop: Crop,
    pub bags: i64,
}

/// A draw of bags against one batch.
///
/// Appears on execution payloads and doubles as the conditional-decrement
/// instruction applied to the batch projection.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchDraw {
    pub batch_id: BatchId,
    pub bags: i64,
}

/// Event: a warehouse joined the directory (sequence 1 of its stream).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarehouseRegistered {
    pub name: String,
    pub code: String,
    pub owner_id: ActorId,
}

/// Event: admin recorded opening stock for one crop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenesisInventoryRecorded {
    pub crop: Crop,
    pub bags: i64,
    /// The GENESIS-source batch created alongside this record.
    pub batch_id: BatchId,
    pub photo_url: Option<String>,
    pub notes: Option<String>,
}

/// Event: the owner signed off on the recorded opening stock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenesisConfirmed {
    pub crops: Vec<Crop>,
    /// The `GenesisInventoryRecorded` events this confirmation covers.
    pub confirmed_event_ids: Vec<EventId>,
}

/// Event: grain arrived and was batched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundRecorded {
    pub batch_id: BatchId,
    pub crop: Crop,
    pub bags: i64,
    pub source_type: SourceType,
    pub source_name: String,
    pub batch_code: String,
}

/// Event: an outbound dispatch was requested (enters PENDING).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchRequested {
    pub request_id: RequestId,
    pub crop: Crop,
    pub bags: i64,
    pub recipient: String,
    pub notes: Option<String>,
}

/// Event: the owner approved a pending dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchApproved {
    pub request_id: RequestId,
    /// Opaque commercial metadata (price, transport, contract reference).
    pub terms: Option<JsonValue>,
}

/// Event: the owner rejected a pending dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchRejected {
    pub request_id: RequestId,
    pub reason: String,
}

/// Event: an approved dispatch physically left the warehouse.
///
/// Crop and quantity are denormalized from the request so stock replay never
/// joins against projections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchExecuted {
    pub request_id: RequestId,
    pub crop: Crop,
    pub bags: i64,
    pub batches: Vec<BatchDraw>,
    /// Evidence photo. Execution refuses to proceed without one.
    pub photo_url: String,
}

/// Event: a tool entered the warehouse inventory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRegistered {
    pub tool_id: ToolId,
    pub tool_type: String,
    pub tag: String,
}

/// Event: a tool was handed to an attendant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolAssigned {
    pub tool_id: ToolId,
    pub assignee: ActorId,
}

/// Event: a tool came back into the available pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolReturned {
    pub tool_id: ToolId,
}

/// The tagged union stored in the `payload` column.
///
/// Externally tagged (serde default): the JSON carries the variant name, so
/// replay decodes without consulting the `kind` column. The column is
/// denormalization for SQL filtering and must agree with [`Self::kind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventPayload {
    WarehouseRegistered(WarehouseRegistered),
    GenesisInventoryRecorded(GenesisInventoryRecorded),
    GenesisConfirmed(GenesisConfirmed),
    InboundRecorded(InboundRecorded),
    DispatchRequested(DispatchRequested),
    DispatchApproved(DispatchApproved),
    DispatchRejected(DispatchRejected),
    DispatchExecuted(DispatchExecuted),
    ToolRegistered(ToolRegistered),
    ToolAssigned(ToolAssigned),
    ToolReturned(ToolReturned),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::WarehouseRegistered(_) => EventKind::WarehouseRegistered,
            EventPayload::GenesisInventoryRecorded(_) => EventKind::GenesisInventoryRecorded,
            EventPayload::GenesisConfirmed(_) => EventKind::GenesisConfirmed,
            EventPayload::InboundRecorded(_) => EventKind::InboundRecorded,
            EventPayload::DispatchRequested(_) => EventKind::DispatchRequested,
            EventPayload::DispatchApproved(_) => EventKind::DispatchApproved,
            EventPayload::DispatchRejected(_) => EventKind::DispatchRejected,
            EventPayload::DispatchExecuted(_) => EventKind::DispatchExecuted,
            EventPayload::ToolRegistered(_) => EventKind::ToolRegistered,
            EventPayload::ToolAssigned(_) => EventKind::ToolAssigned,
            EventPayload::ToolReturned(_) => EventKind::ToolReturned,
        }
    }

    /// Idempotency/uniqueness key for this payload, if the kind has one.
    ///
    /// The store enforces a unique `(warehouse, kind, correlation)` key, which
    /// is what makes genesis once-per-crop and dispatch transitions
    /// once-per-request hold at the storage layer.
    pub fn correlation(&self) -> Option<String> {
        match self {
            EventPayload::WarehouseRegistered(_) => None,
            EventPayload::GenesisInventoryRecorded(e) => Some(e.crop.as_str().to_string()),
            EventPayload::GenesisConfirmed(_) => Some("genesis".to_string()),
            EventPayload::InboundRecorded(e) => Some(e.batch_id.to_string()),
            EventPayload::DispatchRequested(e) => Some(e.request_id.to_string()),
            EventPayload::DispatchApproved(e) => Some(e.request_id.to_string()),
            EventPayload::DispatchRejected(e) => Some(e.request_id.to_string()),
            EventPayload::DispatchExecuted(e) => Some(e.request_id.to_string()),
            EventPayload::ToolRegistered(e) => Some(e.tool_id.to_string()),
            EventPayload::ToolAssigned(_) | EventPayload::ToolReturned(_) => None,
        }
    }

    /// The stock movement this payload implies, if any.
    ///
    /// Both the incremental projection and full replay fold over this one
    /// definition, which is what makes rebuild equal the maintained lines.
    pub fn stock_delta(&self) -> Option<StockDelta> {
        match self {
            EventPayload::GenesisInventoryRecorded(e) => Some(StockDelta {
                crop: e.crop,
                bags: e.bags,
            }),
            EventPayload::InboundRecorded(e) => Some(StockDelta {
                crop: e.crop,
                bags: e.bags,
            }),
            EventPayload::DispatchExecuted(e) => Some(StockDelta {
                crop: e.crop,
                bags: -e.bags,
            }),
            _ => None,
        }
    }
}
