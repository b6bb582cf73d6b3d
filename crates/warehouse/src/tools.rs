//! Tool custody tracking.
//!
//! Scales, sealers, stitching machines and moisture meters move between the
//! store room and attendants' hands. Custody changes ride the same ledger as
//! stock movements, so who held what when is answerable from the stream.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use granary_auth::{ActorContext, Role, require_role, require_scope};
use granary_core::{ActorId, DomainError, DomainResult, ToolId, WarehouseId};
use granary_events::{EventPayload, ToolAssigned, ToolRegistered, ToolReturned};
use granary_store::{EventDraft, LedgerStore, ProjectionUpdates, Tool, ToolStatus, ToolTransition};

/// Registration form for a piece of warehouse equipment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTool {
    pub warehouse_id: WarehouseId,
    /// What the tool is (scale, moisture meter, pallet jack).
    pub tool_type: String,
    /// Physical identifier painted or etched on the tool.
    pub tag: String,
}

/// Custody service for warehouse equipment.
#[derive(Debug, Clone)]
pub struct ToolRegistry<S> {
    store: S,
}

impl<S: LedgerStore> ToolRegistry<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Add a tool to the warehouse inventory. Starts `AVAILABLE`.
    #[instrument(skip(self, actor, tool), fields(warehouse_id = %tool.warehouse_id), err)]
    pub async fn register(&self, actor: &ActorContext, tool: NewTool) -> DomainResult<Tool> {
        require_role(actor, &[Role::Admin])?;
        require_scope(actor, tool.warehouse_id)?;
        let tool_type = tool.tool_type.trim();
        if tool_type.is_empty() {
            return Err(DomainError::validation("tool type must not be blank"));
        }
        let tag = tool.tag.trim();
        if tag.is_empty() {
            return Err(DomainError::validation("tool tag must not be blank"));
        }
        crate::directory::load(&self.store, tool.warehouse_id).await?;

        let row = Tool {
            tool_id: ToolId::new(),
            warehouse_id: tool.warehouse_id,
            tool_type: tool_type.to_string(),
            tag: tag.to_string(),
            status: ToolStatus::Available,
            assigned_to: None,
            assigned_at: None,
        };
        let payload = EventPayload::ToolRegistered(ToolRegistered {
            tool_id: row.tool_id,
            tool_type: row.tool_type.clone(),
            tag: row.tag.clone(),
        });
        let draft = EventDraft::new(tool.warehouse_id, actor.actor_id, payload);
        let updates = ProjectionUpdates {
            tool: Some(row.clone()),
            ..ProjectionUpdates::none()
        };
        self.store.append(draft, updates).await?;

        info!(tool_id = %row.tool_id, tag = %row.tag, "tool registered");
        Ok(row)
    }

    /// Hand a tool to an attendant.
    #[instrument(skip(self, actor), fields(tool_id = %tool_id, assignee = %assignee), err)]
    pub async fn assign(
        &self,
        actor: &ActorContext,
        tool_id: ToolId,
        assignee: ActorId,
    ) -> DomainResult<Tool> {
        require_role(actor, &[Role::Admin])?;
        let tool = self.load_tool(actor.warehouse_id, tool_id).await?;
        if tool.status != ToolStatus::Available {
            return Err(DomainError::state_conflict(format!(
                "tool {} is already assigned",
                tool.tag
            )));
        }

        let payload = EventPayload::ToolAssigned(ToolAssigned { tool_id, assignee });
        let draft = EventDraft::new(tool.warehouse_id, actor.actor_id, payload);
        let updates = ProjectionUpdates {
            tool_transition: Some(ToolTransition::Assign {
                tool_id,
                assignee,
                at: Utc::now(),
            }),
            ..ProjectionUpdates::none()
        };
        self.store.append(draft, updates).await?;

        info!("tool assigned");
        self.load_tool(tool.warehouse_id, tool_id).await
    }

    /// Take a tool back into the available pool.
    #[instrument(skip(self, actor), fields(tool_id = %tool_id), err)]
    pub async fn return_tool(&self, actor: &ActorContext, tool_id: ToolId) -> DomainResult<Tool> {
        require_role(actor, &[Role::Admin])?;
        let tool = self.load_tool(actor.warehouse_id, tool_id).await?;
        if tool.status != ToolStatus::Assigned {
            return Err(DomainError::state_conflict(format!(
                "tool {} is not assigned",
                tool.tag
            )));
        }

        let payload = EventPayload::ToolReturned(ToolReturned { tool_id });
        let draft = EventDraft::new(tool.warehouse_id, actor.actor_id, payload);
        let updates = ProjectionUpdates {
            tool_transition: Some(ToolTransition::Return {
                tool_id,
                at: Utc::now(),
            }),
            ..ProjectionUpdates::none()
        };
        self.store.append(draft, updates).await?;

        info!("tool returned");
        self.load_tool(tool.warehouse_id, tool_id).await
    }

    pub async fn get(&self, warehouse_id: WarehouseId, tool_id: ToolId) -> DomainResult<Tool> {
        self.load_tool(warehouse_id, tool_id).await
    }

    pub async fn list(&self, warehouse_id: WarehouseId) -> DomainResult<Vec<Tool>> {
        Ok(self.store.tools(warehouse_id).await?)
    }

    async fn load_tool(&self, warehouse_id: WarehouseId, tool_id: ToolId) -> DomainResult<Tool> {
        self.store
            .tool(warehouse_id, tool_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("tool {tool_id} not found")))
    }
}
