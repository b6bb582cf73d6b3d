//! Warehouse directory: registration and lookup.
//!
//! Registering a warehouse opens its event stream; `WarehouseRegistered` is
//! always sequence 1. The row starts in `SETUP` and only the genesis
//! bootstrap moves it further.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use granary_auth::{ActorContext, Role, require_role};
use granary_core::{ActorId, DomainError, DomainResult, WarehouseId};
use granary_events::{EventPayload, WarehouseRegistered};
use granary_store::{EventDraft, LedgerStore, ProjectionUpdates, Warehouse, WarehouseStatus};

/// Registration form for a new warehouse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewWarehouse {
    pub name: String,
    /// Short code used as the batch code prefix (stored uppercase).
    pub code: String,
    pub owner_id: ActorId,
}

/// Registration and lookup over the warehouse projection.
#[derive(Debug, Clone)]
pub struct WarehouseDirectory<S> {
    store: S,
}

impl<S: LedgerStore> WarehouseDirectory<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Register a new warehouse.
    ///
    /// Admin-wide, not scoped: the registering admin is typically scoped to
    /// head office, not to the warehouse being created.
    #[instrument(skip(self, actor, form), fields(code = %form.code), err)]
    pub async fn register(
        &self,
        actor: &ActorContext,
        form: NewWarehouse,
    ) -> DomainResult<Warehouse> {
        require_role(actor, &[Role::Admin])?;
        let name = form.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("warehouse name must not be blank"));
        }
        let code = form.code.trim().to_uppercase();
        if code.is_empty() {
            return Err(DomainError::validation("warehouse code must not be blank"));
        }
        let taken = self.store.warehouses().await?.iter().any(|w| w.code == code);
        if taken {
            return Err(DomainError::state_conflict(format!(
                "warehouse code {code} is already registered"
            )));
        }

        let warehouse = Warehouse {
            warehouse_id: WarehouseId::new(),
            name: name.to_string(),
            code: code.clone(),
            owner_id: form.owner_id,
            status: WarehouseStatus::Setup,
            registered_at: Utc::now(),
        };
        let payload = EventPayload::WarehouseRegistered(WarehouseRegistered {
            name: warehouse.name.clone(),
            code,
            owner_id: form.owner_id,
        });
        let draft = EventDraft::new(warehouse.warehouse_id, actor.actor_id, payload);
        let updates = ProjectionUpdates {
            warehouse: Some(warehouse.clone()),
            ..ProjectionUpdates::none()
        };
        self.store.append(draft, updates).await?;

        info!(warehouse_id = %warehouse.warehouse_id, "warehouse registered");
        Ok(warehouse)
    }

    pub async fn get(&self, warehouse_id: WarehouseId) -> DomainResult<Warehouse> {
        load(&self.store, warehouse_id).await
    }

    pub async fn list(&self) -> DomainResult<Vec<Warehouse>> {
        Ok(self.store.warehouses().await?)
    }
}

/// Warehouse fetch shared by the other services.
pub(crate) async fn load<S: LedgerStore>(
    store: &S,
    warehouse_id: WarehouseId,
) -> DomainResult<Warehouse> {
    store
        .warehouse(warehouse_id)
        .await?
        .ok_or_else(|| DomainError::not_found(format!("warehouse {warehouse_id} not found")))
}
