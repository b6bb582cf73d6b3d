use serde::{Deserialize, Serialize};

/// Stable event type identifiers.
///
/// The wire strings are part of the storage contract (`kind` column, read
/// filters); renaming one is a data migration, not a refactor.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "warehouse.registered")]
    WarehouseRegistered,
    #[serde(rename = "genesis.inventory_recorded")]
    GenesisInventoryRecorded,
    #[serde(rename = "genesis.confirmed")]
    GenesisConfirmed,
    #[serde(rename = "stock.inbound_recorded")]
    InboundRecorded,
    #[serde(rename = "dispatch.requested")]
    DispatchRequested,
    #[serde(rename = "dispatch.approved")]
    DispatchApproved,
    #[serde(rename = "dispatch.rejected")]
    DispatchRejected,
    #[serde(rename = "dispatch.executed")]
    DispatchExecuted,
    #[serde(rename = "tool.registered")]
    ToolRegistered,
    #[serde(rename = "tool.assigned")]
    ToolAssigned,
    #[serde(rename = "tool.returned")]
    ToolReturned,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::WarehouseRegistered => "warehouse.registered",
            EventKind::GenesisInventoryRecorded => "genesis.inventory_recorded",
            EventKind::GenesisConfirmed => "genesis.confirmed",
            EventKind::InboundRecorded => "stock.inbound_recorded",
            EventKind::DispatchRequested => "dispatch.requested",
            EventKind::DispatchApproved => "dispatch.approved",
            EventKind::DispatchRejected => "dispatch.rejected",
            EventKind::DispatchExecuted => "dispatch.executed",
            EventKind::ToolRegistered => "tool.registered",
            EventKind::ToolAssigned => "tool.assigned",
            EventKind::ToolReturned => "tool.returned",
        }
    }
}

impl core::fmt::Display for EventKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_rename_matches_as_str() {
        for kind in [
            EventKind::WarehouseRegistered,
            EventKind::GenesisInventoryRecorded,
            EventKind::GenesisConfirmed,
            EventKind::InboundRecorded,
            EventKind::DispatchRequested,
            EventKind::DispatchApproved,
            EventKind::DispatchRejected,
            EventKind::DispatchExecuted,
            EventKind::ToolRegistered,
            EventKind::ToolAssigned,
            EventKind::ToolReturned,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }
}
