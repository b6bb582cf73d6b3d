//! Projection row types.
//!
//! Everything in this module is derived state: each row is maintained
//! transactionally alongside the event that caused it, and every table can be
//! dropped and rebuilt from the event stream. The event stream is the record;
//! these rows exist so queries do not replay it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use granary_core::{ActorId, BatchId, Crop, EventId, RequestId, SourceType, ToolId, WarehouseId};

/// Warehouse lifecycle: `Setup` until genesis stock is recorded,
/// `GenesisPending` until the owner confirms it, then `Active`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WarehouseStatus {
    Setup,
    GenesisPending,
    Active,
}

impl WarehouseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarehouseStatus::Setup => "SETUP",
            WarehouseStatus::GenesisPending => "GENESIS_PENDING",
            WarehouseStatus::Active => "ACTIVE",
        }
    }
}

impl std::fmt::Display for WarehouseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WarehouseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SETUP" => Ok(WarehouseStatus::Setup),
            "GENESIS_PENDING" => Ok(WarehouseStatus::GenesisPending),
            "ACTIVE" => Ok(WarehouseStatus::Active),
            other => Err(format!("unknown warehouse status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warehouse {
    pub warehouse_id: WarehouseId,
    pub name: String,
    /// Short uppercase code used as the batch code prefix.
    pub code: String,
    pub owner_id: ActorId,
    pub status: WarehouseStatus,
    pub registered_at: DateTime<Utc>,
}

/// Current bag count for one crop in one warehouse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockLine {
    pub warehouse_id: WarehouseId,
    pub crop: Crop,
    pub bag_count: i64,
    /// Sequence of the last event folded into this line.
    pub last_event_sequence: u64,
    pub updated_at: DateTime<Utc>,
}

/// Dispatch request lifecycle. `Pending -> Approved -> Executed`, with
/// `Rejected` as the terminal alternative to approval.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    Executed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "PENDING",
            RequestStatus::Approved => "APPROVED",
            RequestStatus::Rejected => "REJECTED",
            RequestStatus::Executed => "EXECUTED",
        }
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(RequestStatus::Pending),
            "APPROVED" => Ok(RequestStatus::Approved),
            "REJECTED" => Ok(RequestStatus::Rejected),
            "EXECUTED" => Ok(RequestStatus::Executed),
            other => Err(format!("unknown request status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub request_id: RequestId,
    pub warehouse_id: WarehouseId,
    pub crop: Crop,
    pub bags: i64,
    pub recipient: String,
    pub notes: Option<String>,
    pub status: RequestStatus,
    pub requested_by: ActorId,
    pub requested_at: DateTime<Utc>,
    /// Approver or rejecter, set on the decision transition.
    pub decided_by: Option<ActorId>,
    pub decided_at: Option<DateTime<Utc>>,
    /// Rejection reason. `None` for approved or still-pending requests.
    pub rejection_reason: Option<String>,
    /// Opaque commercial terms captured at approval.
    pub terms: Option<JsonValue>,
    pub executed_by: Option<ActorId>,
    pub executed_at: Option<DateTime<Utc>>,
    pub photo_url: Option<String>,
}

/// A physical lot of bagged grain with its remaining balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: BatchId,
    pub warehouse_id: WarehouseId,
    /// Human-readable code, unique per warehouse.
    pub batch_code: String,
    pub crop: Crop,
    pub source_type: SourceType,
    pub source_name: String,
    pub initial_bags: i64,
    pub remaining_bags: i64,
    /// Signed payload embedded in the printed QR label.
    pub qr_token: String,
    pub created_by: ActorId,
    pub created_at: DateTime<Utc>,
}

/// Reservation of bags from one batch for one dispatch request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchAllocation {
    pub request_id: RequestId,
    pub batch_id: BatchId,
    pub warehouse_id: WarehouseId,
    pub bags: i64,
    pub allocated_at: DateTime<Utc>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolStatus {
    Available,
    Assigned,
}

impl ToolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolStatus::Available => "AVAILABLE",
            ToolStatus::Assigned => "ASSIGNED",
        }
    }
}

impl std::fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ToolStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AVAILABLE" => Ok(ToolStatus::Available),
            "ASSIGNED" => Ok(ToolStatus::Assigned),
            other => Err(format!("unknown tool status '{other}'")),
        }
    }
}

/// Warehouse equipment under custody tracking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub tool_id: ToolId,
    pub warehouse_id: WarehouseId,
    /// What the tool is (scale, moisture meter, pallet jack).
    pub tool_type: String,
    /// Physical identifier painted or etched on the tool.
    pub tag: String,
    pub status: ToolStatus,
    pub assigned_to: Option<ActorId>,
    pub assigned_at: Option<DateTime<Utc>>,
}

/// Owner sign-off on one genesis inventory event.
///
/// Kept as an append-only annotation keyed by the confirmed event's id rather
/// than a flag on the event row. The event stream itself is never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenesisConfirmation {
    pub warehouse_id: WarehouseId,
    pub event_id: EventId,
    pub confirmed_by: ActorId,
    pub confirmed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn statuses_round_trip_as_text() {
        for status in [
            WarehouseStatus::Setup,
            WarehouseStatus::GenesisPending,
            WarehouseStatus::Active,
        ] {
            assert_eq!(WarehouseStatus::from_str(status.as_str()), Ok(status));
        }
        for status in [
            RequestStatus::Pending,
            RequestStatus::Approved,
            RequestStatus::Rejected,
            RequestStatus::Executed,
        ] {
            assert_eq!(RequestStatus::from_str(status.as_str()), Ok(status));
        }
        for status in [ToolStatus::Available, ToolStatus::Assigned] {
            assert_eq!(ToolStatus::from_str(status.as_str()), Ok(status));
        }
    }

    #[test]
    fn unknown_status_text_is_rejected() {
        assert!(RequestStatus::from_str("SHIPPED").is_err());
    }

    #[test]
    fn status_serde_uses_screaming_snake_case() {
        let json = serde_json::to_value(WarehouseStatus::GenesisPending).unwrap();
        assert_eq!(json, "GENESIS_PENDING");
    }
}
