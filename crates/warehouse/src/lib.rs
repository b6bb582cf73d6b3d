//! `granary-warehouse` — the operational services of the grain ledger.
//!
//! Each service wraps the same [`LedgerStore`](granary_store::LedgerStore)
//! and speaks the event vocabulary from `granary-events`: validate against
//! current projections, build one event plus its projection effects, and hand
//! both to the store to commit atomically. Nothing here mutates state outside
//! an append.
//!
//! - [`WarehouseDirectory`]: registration and lookup
//! - [`GenesisBootstrap`]: opening stock and owner sign-off
//! - [`BatchRegistry`]: inbound intake, batch codes and QR labels, allocation
//! - [`DispatchWorkflow`]: request, approve or reject, execute
//! - [`StockLedger`]: stock queries, replay, rebuild and verification
//! - [`ToolRegistry`]: equipment custody

pub mod batch;
pub mod directory;
pub mod dispatch;
pub mod genesis;
pub mod qr;
pub mod stock;
pub mod tools;


pub use batch::{AllocationMode, BatchIntake, BatchRegistry};
pub use directory::{NewWarehouse, WarehouseDirectory};
pub use dispatch::{DispatchIntent, DispatchOutcome, DispatchWorkflow};
pub use genesis::{GenesisBootstrap, GenesisIntake, GenesisRecord};
pub use qr::QrToken;
pub use stock::{StockLedger, replay_totals};
pub use tools::{NewTool, ToolRegistry};
