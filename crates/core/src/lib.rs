//! `granary-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod crop;
pub mod error;
pub mod id;
pub mod source;

pub use crop::Crop;
pub use error::{DomainError, DomainResult};
pub use id::{ActorId, BatchId, EventId, RequestId, ToolId, WarehouseId};
pub use source::SourceType;
