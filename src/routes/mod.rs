pub mod audit;
pub mod health;
pub mod rbac;

use crate::app::AppState;
use crate::errors::AppResult;
use crate::jwt::AuthUser;

/// Admin endpoints are themselves protected by the decision point, so every
/// admin call leaves an audit record of its own.
pub(crate) async fn authorize(state: &AppState, auth: &AuthUser, resource: &str, action: &str) -> AppResult<()> {
    state
        .access
        .require(&auth.username, resource, action, Some(auth.context.clone()))
        .await
}
