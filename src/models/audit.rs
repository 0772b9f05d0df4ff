use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::audit::RequestContext;
use crate::models::rbac::Permission;

/// One persisted access decision. Rows are append-only.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PermissionAudit {
    /// Sequence number assigned by the audit log
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    pub username: String,
    /// `RESOURCE:ACTION`
    pub permission: String,
    pub resource: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    pub action: String,
    pub granted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Audit record as submitted by the decision point, before it has a sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub user_id: Option<Uuid>,
    pub username: String,
    pub resource: String,
    pub resource_id: Option<String>,
    pub action: String,
    pub granted: bool,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub details: Option<String>,
    /// Stamped at write time when absent
    pub timestamp: Option<DateTime<Utc>>,
}

impl AuditEntry {
    pub fn new(username: impl Into<String>, resource: impl Into<String>, action: impl Into<String>, granted: bool) -> Self {
        Self {
            user_id: None,
            username: username.into(),
            resource: resource.into(),
            resource_id: None,
            action: action.into(),
            granted,
            ip_address: None,
            user_agent: None,
            details: None,
            timestamp: None,
        }
    }

    pub fn with_user_id(mut self, user_id: Option<Uuid>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn with_resource_id(mut self, resource_id: Option<String>) -> Self {
        self.resource_id = resource_id;
        self
    }

    pub fn with_context(mut self, context: Option<RequestContext>) -> Self {
        if let Some(ctx) = context {
            self.ip_address = ctx.ip;
            self.user_agent = ctx.user_agent;
            self.details = ctx.details;
        }
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn permission(&self) -> String {
        Permission::canonical_name(&self.resource, &self.action)
    }
}

/// Inclusive time window, RFC 3339 on the wire.
#[derive(Debug, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AuditRangeQuery {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FailureCountResponse {
    pub username: String,
    pub user_id: Uuid,
    pub hours: i64,
    pub failures: i64,
}
