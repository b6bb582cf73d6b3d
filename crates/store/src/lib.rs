//! `granary-store` — the append-only ledger and its projections.
//!
//! One trait, [`LedgerStore`], two implementations: [`MemoryLedgerStore`] for
//! tests and development, [`PostgresLedgerStore`] for production. Both commit
//! an event and its projection effects as one atomic unit, which is where the
//! domain's idempotency and concurrency guarantees actually live.

pub mod in_memory;
pub mod model;
pub mod postgres;
pub mod r#trait;
pub mod writes;

pub use in_memory::MemoryLedgerStore;
pub use model::{
    Batch, BatchAllocation, DispatchRequest, GenesisConfirmation, RequestStatus, StockLine, Tool,
    ToolStatus, Warehouse, WarehouseStatus,
};
pub use postgres::PostgresLedgerStore;
pub use r#trait::{EventDraft, EventFilter, EventRecord, LedgerStore, StoreError};
pub use writes::{ProjectionUpdates, RequestTransition, ToolTransition, WarehouseTransition};
