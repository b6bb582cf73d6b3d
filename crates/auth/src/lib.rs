//! `granary-auth` — pure authorization boundary for warehouse operations.
//!
//! The embedding API layer authenticates callers and hands the domain a
//! trusted [`ActorContext`]. This crate is intentionally decoupled from HTTP,
//! tokens and storage: the guards are pure functions over that context.

pub mod actor;
pub mod guard;
pub mod role;

pub use actor::ActorContext;
pub use guard::{require_owner, require_role, require_scope};
pub use role::Role;
