//! Actor identity and reason codes attached to every inventory mutation.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::reason_code;
use crate::errors::ServiceError;

/// The authenticated caller, as resolved by the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub role: String,
    /// Sites the actor may write to. Empty means every site of the tenant.
    #[serde(default)]
    pub site_ids: Vec<Uuid>,
}

impl Actor {
    pub fn new(user_id: Uuid, tenant_id: Uuid, role: impl Into<String>, site_ids: Vec<Uuid>) -> Self {
        Self {
            user_id,
            tenant_id,
            role: role.into(),
            site_ids,
        }
    }

    pub fn ensure_tenant(&self, tenant_id: Uuid, what: &str) -> Result<(), ServiceError> {
        if self.tenant_id == tenant_id {
            Ok(())
        } else {
            Err(ServiceError::TenantMismatch(format!(
                "{} belongs to another tenant",
                what
            )))
        }
    }

    pub fn ensure_site(&self, site_id: Uuid) -> Result<(), ServiceError> {
        if self.site_ids.is_empty() || self.site_ids.contains(&site_id) {
            Ok(())
        } else {
            Err(ServiceError::TenantMismatch(format!(
                "User {} is not a member of site {}",
                self.user_id, site_id
            )))
        }
    }
}

/// Who did what, when and why; copied onto the ledger row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditStamp {
    pub user_id: Uuid,
    pub reason_code_id: Option<Uuid>,
    pub workcell_id: Option<String>,
    pub device_id: Option<String>,
    pub at: DateTime<Utc>,
}

impl AuditStamp {
    pub fn new(actor: &Actor, reason_code_id: Option<Uuid>) -> Self {
        Self {
            user_id: actor.user_id,
            reason_code_id,
            workcell_id: None,
            device_id: None,
            at: Utc::now(),
        }
    }

    pub fn with_station(mut self, workcell_id: Option<String>, device_id: Option<String>) -> Self {
        self.workcell_id = workcell_id;
        self.device_id = device_id;
        self
    }
}

/// Loads a reason code and checks it may be used by `tenant_id`.
pub async fn resolve_reason_code<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    reason_code_id: Uuid,
) -> Result<reason_code::Model, ServiceError> {
    let code = reason_code::Entity::find_by_id(reason_code_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::not_found("Reason code", reason_code_id))?;
    if code.tenant_id != tenant_id {
        return Err(ServiceError::TenantMismatch(format!(
            "Reason code {} belongs to another tenant",
            reason_code_id
        )));
    }
    if !code.active {
        return Err(ServiceError::ValidationError(format!(
            "Reason code {} is inactive",
            code.code
        )));
    }
    Ok(code)
}

pub struct ReasonCodeRegistry {
    db: Arc<DbPool>,
}

impl ReasonCodeRegistry {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    #[instrument(skip(self, actor), fields(tenant_id = %actor.tenant_id))]
    pub async fn register(
        &self,
        actor: &Actor,
        code: &str,
        description: &str,
    ) -> Result<reason_code::Model, ServiceError> {
        let code = code.trim().to_ascii_uppercase();
        if code.is_empty() || code.len() > 32 {
            return Err(ServiceError::ValidationError(
                "Reason code must be 1-32 characters".to_string(),
            ));
        }

        let model = reason_code::ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(actor.tenant_id),
            code: Set(code.clone()),
            description: Set(description.to_string()),
            active: Set(true),
            created_at: Set(Utc::now()),
        };
        let saved = model
            .insert(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)
            .map_err(|err| match err {
                ServiceError::StorageConflict(_) => {
                    ServiceError::ValidationError(format!("Reason code {} already exists", code))
                }
                other => other,
            })?;

        info!(reason_code_id = %saved.id, code = %saved.code, "Reason code registered");
        Ok(saved)
    }

    pub async fn deactivate(&self, actor: &Actor, reason_code_id: Uuid) -> Result<reason_code::Model, ServiceError> {
        let db = self.db.as_ref();
        let existing = resolve_reason_code(db, actor.tenant_id, reason_code_id).await?;
        let mut active: reason_code::ActiveModel = existing.into();
        active.active = Set(false);
        active.update(db).await.map_err(ServiceError::db_error)
    }

    pub async fn list(&self, actor: &Actor) -> Result<Vec<reason_code::Model>, ServiceError> {
        reason_code::Entity::find()
            .filter(reason_code::Column::TenantId.eq(actor.tenant_id))
            .order_by_asc(reason_code::Column::Code)
            .all(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }
}
