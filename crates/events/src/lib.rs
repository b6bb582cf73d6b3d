//! `granary-events` — the closed vocabulary of ledger events.
//!
//! Every mutation in the system is one of the payloads defined here. Payloads
//! are a tagged union decoded exactly once at the storage boundary; the
//! derived views ([`EventPayload::kind`], [`EventPayload::correlation`],
//! [`EventPayload::stock_delta`]) are the single definition both the
//! incremental projection path and full replay fold over.

pub mod kind;
pub mod payload;

pub use kind::EventKind;
pub use payload::{
    BatchDraw, DispatchApproved, DispatchExecuted, DispatchRejected, DispatchRequested,
    EventPayload, GenesisConfirmed, GenesisInventoryRecorded, InboundRecorded, StockDelta,
    ToolAssigned, ToolRegistered, ToolReturned, WarehouseRegistered,
};
