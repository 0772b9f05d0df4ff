use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Slot value that matches any resource or action.
pub const WILDCARD: &str = "*";

// =============================================================================
// PERMISSION
// =============================================================================

/// Atomic `RESOURCE:ACTION` capability. Identity is the name alone.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Permission {
    pub id: Uuid,
    #[schema(example = "NOTES:READ")]
    pub name: String,
    #[schema(example = "NOTES")]
    pub resource: String,
    #[schema(example = "READ")]
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Permission {
    pub fn canonical_name(resource: &str, action: &str) -> String {
        format!("{}:{}", resource, action)
    }

    /// `*` in either slot matches any value in that slot.
    pub fn matches(&self, resource: &str, action: &str) -> bool {
        let resource_matches = self.resource == WILDCARD || self.resource == resource;
        let action_matches = self.action == WILDCARD || self.action == action;
        resource_matches && action_matches
    }
}

impl PartialEq for Permission {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Permission {}

impl Hash for Permission {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PermissionCreateRequest {
    /// Defaults to `RESOURCE:ACTION` when omitted
    #[schema(example = "NOTES:ARCHIVE")]
    pub name: Option<String>,
    #[schema(example = "NOTES")]
    pub resource: String,
    #[schema(example = "ARCHIVE")]
    pub action: String,
    #[schema(example = "Archive notes")]
    pub description: Option<String>,
}

impl PermissionCreateRequest {
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            name: None,
            resource: resource.into(),
            action: action.into(),
            description: None,
        }
    }

    pub fn resolved_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| Permission::canonical_name(&self.resource, &self.action))
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct DescriptionUpdateRequest {
    pub description: Option<String>,
}

// =============================================================================
// ROLE
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// System roles cannot be edited or deleted
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A role together with its outgoing graph edges.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RoleDetail {
    pub role: Role,
    pub permissions: Vec<Permission>,
    /// Names of the roles this role inherits from
    pub child_roles: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct RoleCreateRequest {
    #[schema(example = "EDITOR")]
    pub name: String,
    #[schema(example = "Can read and modify notes")]
    pub description: Option<String>,
    #[serde(default)]
    pub is_system: bool,
    /// Names of roles to inherit from
    #[serde(default)]
    pub inherits: Vec<String>,
    /// Names of permissions granted directly
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AssignPermissionToRoleRequest {
    pub permission_id: Uuid,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddChildRoleRequest {
    pub child_role_id: Uuid,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AssignRoleRequest {
    #[schema(example = "EDITOR")]
    pub role: String,
}

// =============================================================================
// EFFECTIVE PERMISSIONS (computed)
// =============================================================================

/// Resolved permission set of one user, as held by the permission cache.
#[derive(Debug, Clone)]
pub struct EffectivePermissions {
    pub user_id: Uuid,
    pub username: String,
    pub roles: Vec<String>,
    pub permissions: HashSet<Permission>,
}

impl EffectivePermissions {
    pub fn allows(&self, resource: &str, action: &str) -> bool {
        self.permissions.iter().any(|p| p.matches(resource, action))
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EffectivePermissionsResponse {
    pub user_id: Uuid,
    pub username: String,
    pub roles: Vec<String>,
    pub permissions: Vec<Permission>,
}

impl From<&EffectivePermissions> for EffectivePermissionsResponse {
    fn from(value: &EffectivePermissions) -> Self {
        let mut permissions: Vec<Permission> = value.permissions.iter().cloned().collect();
        permissions.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            user_id: value.user_id,
            username: value.username.clone(),
            roles: value.roles.clone(),
            permissions,
        }
    }
}

// =============================================================================
// ACCESS CHECK
// =============================================================================

#[derive(Debug, Deserialize, ToSchema)]
pub struct CheckRequest {
    #[schema(example = "bob")]
    pub username: String,
    #[schema(example = "NOTES")]
    pub resource: String,
    #[schema(example = "READ")]
    pub action: String,
    pub resource_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CheckResponse {
    pub granted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn permission(resource: &str, action: &str) -> Permission {
        let now = Utc::now();
        Permission {
            id: Uuid::new_v4(),
            name: Permission::canonical_name(resource, action),
            resource: resource.to_string(),
            action: action.to_string(),
            description: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn wildcard_resource_matches_any_resource_for_fixed_action() {
        let p = permission("*", "READ");
        assert!(p.matches("ACCOUNT", "READ"));
        assert!(p.matches("TRANSACTION", "READ"));
        assert!(!p.matches("ACCOUNT", "WRITE"));
    }

    #[test]
    fn full_wildcard_matches_everything() {
        let p = permission("*", "*");
        assert!(p.matches("ANYTHING", "AT_ALL"));
        assert!(p.matches("", ""));
    }

    #[test]
    fn exact_permission_is_case_sensitive() {
        let p = permission("NOTES", "READ");
        assert!(p.matches("NOTES", "READ"));
        assert!(!p.matches("notes", "READ"));
        assert!(!p.matches("NOTES", "DELETE"));
    }

    #[test]
    fn permissions_with_same_name_collapse_in_sets() {
        let a = permission("NOTES", "READ");
        let mut b = permission("NOTES", "READ");
        b.description = Some("different".into());

        let set: HashSet<Permission> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn create_request_defaults_name_to_canonical_form() {
        let req = PermissionCreateRequest::new("NOTES", "DELETE");
        assert_eq!(req.resolved_name(), "NOTES:DELETE");
    }
}
