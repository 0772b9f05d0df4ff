use std::sync::Arc;

use super::cache::PermissionCache;
use crate::audit::{AuditSink, RequestContext};
use crate::errors::{AppError, AppResult};
use crate::models::audit::AuditEntry;

/// Resource name used when an object check has no target.
pub const UNKNOWN_RESOURCE: &str = "UNKNOWN";

/// Answers whether a user may perform an action on a resource.
///
/// Decision flow:
/// 1. effective permissions from the cache (resolver on a miss)
/// 2. grant iff some permission matches resource and action, `*` matching any
/// 3. enqueue exactly one audit record carrying the outcome
///
/// An unknown username is an error (`UserNotFound`), distinct from a denial,
/// and produces no audit record.
#[derive(Clone)]
pub struct AccessDecisionPoint {
    cache: Arc<PermissionCache>,
    audit: AuditSink,
}

impl AccessDecisionPoint {
    pub fn new(cache: Arc<PermissionCache>, audit: AuditSink) -> Self {
        Self { cache, audit }
    }

    pub fn cache(&self) -> &Arc<PermissionCache> {
        &self.cache
    }

    pub async fn check(&self, username: &str, resource: &str, action: &str, resource_id: Option<&str>) -> AppResult<bool> {
        self.check_with_context(username, resource, action, resource_id, None).await
    }

    pub async fn check_with_context(
        &self,
        username: &str,
        resource: &str,
        action: &str,
        resource_id: Option<&str>,
        context: Option<RequestContext>,
    ) -> AppResult<bool> {
        tracing::debug!(
            username = %username,
            resource = %resource,
            action = %action,
            "Checking permission"
        );

        let effective = self.cache.get(username).await?;
        let granted = effective.allows(resource, action);

        self.audit.record(
            AuditEntry::new(username, resource, action, granted)
                .with_user_id(Some(effective.user_id))
                .with_resource_id(resource_id.map(str::to_string))
                .with_context(context),
        );

        if granted {
            tracing::debug!(username = %username, resource = %resource, action = %action, "Permission GRANTED");
        } else {
            tracing::warn!(
                username = %username,
                resource = %resource,
                resource_id = ?resource_id,
                action = %action,
                "Permission DENIED"
            );
        }

        Ok(granted)
    }

    /// Object form: the resource is the target's type name, uppercased
    /// (`Note` -> `NOTE`); a missing target checks against `UNKNOWN`.
    pub async fn check_object<T: ?Sized>(&self, username: &str, target: Option<&T>, permission: &str) -> AppResult<bool> {
        let resource = match target {
            Some(_) => resource_name_of::<T>(),
            None => UNKNOWN_RESOURCE.to_string(),
        };
        self.check(username, &resource, permission, None).await
    }

    /// Explicit form: `(resource_id, resource_type, action)`.
    pub async fn check_target(
        &self,
        username: &str,
        resource_id: Option<&str>,
        resource_type: &str,
        action: &str,
    ) -> AppResult<bool> {
        self.check(username, &resource_type.to_uppercase(), action, resource_id).await
    }

    /// Like [`check_with_context`](Self::check_with_context) but turns a denial into `Forbidden`.
    pub async fn require(
        &self,
        username: &str,
        resource: &str,
        action: &str,
        context: Option<RequestContext>,
    ) -> AppResult<()> {
        if self.check_with_context(username, resource, action, None, context).await? {
            Ok(())
        } else {
            Err(AppError::forbidden(format!("{} may not {} {}", username, action, resource)))
        }
    }
}

/// Last path segment of the type name, generics stripped, uppercased.
pub fn resource_name_of<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    struct Note;

    #[allow(dead_code)]
    struct Envelope<T>(T);

    #[test]
    fn resource_name_is_uppercased_type_name() {
        assert_eq!(resource_name_of::<Note>(), "NOTE");
        assert_eq!(resource_name_of::<Envelope<Note>>(), "ENVELOPE");
        assert_eq!(resource_name_of::<str>(), "STR");
    }
}
