use serde::{Deserialize, Serialize};

use granary_core::{ActorId, WarehouseId};

use crate::role::Role;

/// The trusted identity tuple every operation receives.
///
/// Construction is the embedding layer's job (after it has verified the
/// caller); the domain treats the tuple as ground truth and only checks it
/// against the operation's role/scope/ownership requirements.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorContext {
    pub actor_id: ActorId,
    pub role: Role,
    /// The warehouse this actor is operating in for the current call.
    pub warehouse_id: WarehouseId,
}

impl ActorContext {
    pub fn new(actor_id: ActorId, role: Role, warehouse_id: WarehouseId) -> Self {
        Self {
            actor_id,
            role,
            warehouse_id,
        }
    }
}
