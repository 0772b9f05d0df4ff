//! Idempotent application of permission and role definition batches.
//!
//! Reading the definitions from disk is up to the caller; anything serde can
//! deserialize works. Existing names are skipped, never overwritten, and
//! missing references are reported as warnings while the rest of the batch
//! proceeds.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::authz::RbacService;
use crate::errors::{AppError, AppResult};
use crate::models::rbac::{PermissionCreateRequest, RoleCreateRequest};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PermissionDefinition {
    pub name: String,
    pub resource: String,
    pub action: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct RoleDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_system: bool,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub inherits: Vec<String>,
    #[serde(default)]
    pub additional_permissions: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct ConfigLoadReport {
    pub created: Vec<String>,
    pub skipped: Vec<String>,
    pub warnings: Vec<String>,
}

impl ConfigLoadReport {
    fn warn(&mut self, message: String) {
        tracing::warn!("{}", message);
        self.warnings.push(message);
    }
}

pub async fn apply_permissions(service: &RbacService, batch: &[PermissionDefinition]) -> AppResult<ConfigLoadReport> {
    let mut report = ConfigLoadReport::default();

    for def in batch {
        if service.find_permission_by_name(&def.name).await?.is_some() {
            tracing::debug!(permission = %def.name, "Permission already exists, skipping");
            report.skipped.push(def.name.clone());
            continue;
        }

        let req = PermissionCreateRequest {
            name: Some(def.name.clone()),
            resource: def.resource.clone(),
            action: def.action.clone(),
            description: def.description.clone(),
        };
        match service.create_permission(req).await {
            Ok(permission) => report.created.push(permission.name),
            // lost a race with a concurrent creator
            Err(AppError::AlreadyExists(_)) => report.skipped.push(def.name.clone()),
            Err(err) => return Err(err),
        }
    }

    tracing::info!(
        created = report.created.len(),
        skipped = report.skipped.len(),
        "Applied permission definitions"
    );
    Ok(report)
}

/// Roles are applied in batch order; an `inherits` entry naming a role that
/// only appears later in the same batch is reported and skipped. Inheritance
/// edges are written with the role itself, which cannot close a cycle since
/// nothing inherits from a role that did not exist yet.
pub async fn apply_roles(service: &RbacService, batch: &[RoleDefinition]) -> AppResult<ConfigLoadReport> {
    let mut report = ConfigLoadReport::default();

    for def in batch {
        if service.find_role_by_name(&def.name).await?.is_some() {
            tracing::debug!(role = %def.name, "Role already exists, skipping");
            report.skipped.push(def.name.clone());
            continue;
        }

        let mut wanted: Vec<String> = def.permissions.clone();
        for extra in &def.additional_permissions {
            if !wanted.contains(extra) {
                wanted.push(extra.clone());
            }
        }

        let permissions = service.find_permissions(&wanted).await?;
        if !permissions.is_complete() {
            report.warn(format!(
                "role {}: permissions not found: {}",
                def.name,
                permissions.missing.join(", ")
            ));
        }

        let inherited = service.find_roles(&def.inherits).await?;
        if !inherited.is_complete() {
            report.warn(format!(
                "role {}: inherited roles not found: {}",
                def.name,
                inherited.missing.join(", ")
            ));
        }

        let role = match service
            .create_composite_role(RoleCreateRequest {
                name: def.name.clone(),
                description: def.description.clone(),
                is_system: def.is_system,
                inherits: inherited.found.iter().map(|r| r.name.clone()).collect(),
                permissions: permissions.found.iter().map(|p| p.name.clone()).collect(),
            })
            .await
        {
            Ok(role) => role,
            Err(AppError::AlreadyExists(_)) => {
                report.skipped.push(def.name.clone());
                continue;
            }
            Err(err) => return Err(err),
        };

        report.created.push(role.name);
    }

    tracing::info!(
        created = report.created.len(),
        skipped = report.skipped.len(),
        warnings = report.warnings.len(),
        "Applied role definitions"
    );
    Ok(report)
}
