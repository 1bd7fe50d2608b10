//! Permission derivation for emitted records. Team-scoped connectors share
//! everything with the organisation; individually-scoped connectors attach
//! the connector owner, with an org-wide READ fallback so no record is ever
//! emitted unreadable.

use std::sync::Arc;

use tracing::warn;

use crate::config::ConnectorScope;
use crate::contract::RecordStore;
use crate::records::{AppUser, EntityType, Permission, PermissionType};

#[derive(Clone)]
pub struct PermissionResolver {
    scope: ConnectorScope,
    org_id: String,
    created_by: Option<String>,
    store: Arc<dyn RecordStore>,
}

impl PermissionResolver {
    pub fn new(
        scope: ConnectorScope,
        org_id: String,
        created_by: Option<String>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        PermissionResolver {
            scope,
            org_id,
            created_by,
            store,
        }
    }

    /// The permission set attached to one record.
    pub async fn resolve(&self) -> Vec<Permission> {
        match self.scope {
            ConnectorScope::Team => vec![self.org_read()],
            ConnectorScope::Individual => match self.owner_permission().await {
                Some(owner) => vec![owner],
                None => vec![self.org_read()],
            },
        }
    }

    /// The connector owner as an app user, pushed to the sink once per full
    /// sync. `None` in team scope or when the owner cannot be resolved.
    pub async fn owner_app_user(&self) -> Option<AppUser> {
        if self.scope != ConnectorScope::Individual {
            return None;
        }
        let user_id = self.created_by.as_deref()?;
        match self.store.get_user_by_id(user_id).await {
            Ok(Some(user)) => Some(AppUser {
                external_user_id: user_id.to_string(),
                email: Some(user.email),
            }),
            Ok(None) => {
                warn!(user = %user_id, "Connector owner not found in user directory");
                None
            }
            Err(e) => {
                warn!(user = %user_id, error = ?e, "Owner lookup failed");
                None
            }
        }
    }

    async fn owner_permission(&self) -> Option<Permission> {
        let user_id = match self.created_by.as_deref() {
            Some(id) if !id.is_empty() => id,
            _ => {
                warn!("Individual scope without a created_by user, granting org read instead");
                return None;
            }
        };
        match self.store.get_user_by_id(user_id).await {
            Ok(Some(user)) => Some(Permission {
                permission_type: PermissionType::Owner,
                entity_type: EntityType::User,
                external_id: user_id.to_string(),
                email: Some(user.email),
            }),
            Ok(None) => {
                warn!(user = %user_id, "Connector owner not found, granting org read instead");
                None
            }
            Err(e) => {
                warn!(user = %user_id, error = ?e, "Owner lookup failed, granting org read instead");
                None
            }
        }
    }

    fn org_read(&self) -> Permission {
        Permission {
            permission_type: PermissionType::Read,
            entity_type: EntityType::Org,
            external_id: self.org_id.clone(),
            email: None,
        }
    }
}
