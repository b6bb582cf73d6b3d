//! Pure authorization checks over an [`ActorContext`].
//!
//! - No IO
//! - No panics
//! - No business logic (policy checks only)
//!
//! Cross-warehouse access is an authorization failure, not a lookup miss, so
//! scope violations surface as `Unauthorized` rather than `NotFound`.

use granary_core::{ActorId, DomainError, DomainResult, WarehouseId};

use crate::actor::ActorContext;
use crate::role::Role;

/// Require the actor's role to be one of `allowed`.
pub fn require_role(actor: &ActorContext, allowed: &[Role]) -> DomainResult<()> {
    if allowed.contains(&actor.role) {
        return Ok(());
    }
    let wanted: Vec<&str> = allowed.iter().map(Role::as_str).collect();
    Err(DomainError::unauthorized(format!(
        "role {} may not perform this operation (requires one of: {})",
        actor.role,
        wanted.join(", ")
    )))
}

/// Require the actor to be scoped to `warehouse_id`.
pub fn require_scope(actor: &ActorContext, warehouse_id: WarehouseId) -> DomainResult<()> {
    if actor.warehouse_id == warehouse_id {
        return Ok(());
    }
    Err(DomainError::unauthorized(format!(
        "actor is scoped to warehouse {}, not {}",
        actor.warehouse_id, warehouse_id
    )))
}

/// Require the actor to be the named owner (genesis confirmation and other
/// owner-only operations).
pub fn require_owner(actor: &ActorContext, owner_id: ActorId) -> DomainResult<()> {
    if actor.role == Role::Owner && actor.actor_id == owner_id {
        return Ok(());
    }
    Err(DomainError::unauthorized(
        "only the warehouse owner may perform this operation".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(role: Role) -> ActorContext {
        ActorContext::new(ActorId::new(), role, WarehouseId::new())
    }

    #[test]
    fn role_guard_allows_listed_roles() {
        let admin = actor(Role::Admin);
        assert!(require_role(&admin, &[Role::Admin, Role::Attendant]).is_ok());
    }

    #[test]
    fn role_guard_rejects_with_unauthorized() {
        let attendant = actor(Role::Attendant);
        let err = require_role(&attendant, &[Role::Admin]).unwrap_err();
        match err {
            DomainError::Unauthorized(msg) => {
                assert!(msg.contains("ATTENDANT"));
                assert!(msg.contains("ADMIN"));
            }
            other => panic!("expected Unauthorized, got {other:?}"),
        }
    }

    #[test]
    fn scope_guard_rejects_other_warehouses() {
        let admin = actor(Role::Admin);
        assert!(require_scope(&admin, admin.warehouse_id).is_ok());
        let err = require_scope(&admin, WarehouseId::new()).unwrap_err();
        assert!(matches!(err, DomainError::Unauthorized(_)));
    }

    #[test]
    fn owner_guard_requires_both_role_and_identity() {
        let owner = actor(Role::Owner);
        assert!(require_owner(&owner, owner.actor_id).is_ok());

        // Right identity, wrong role.
        let mut admin = owner;
        admin.role = Role::Admin;
        assert!(require_owner(&admin, owner.actor_id).is_err());

        // Right role, wrong identity.
        assert!(require_owner(&owner, ActorId::new()).is_err());
    }
}
