use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Map, Value};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{authz, config_loader, models, routes};

#[derive(OpenApi)]
#[openapi(
	paths(
		routes::health::health,
		routes::rbac::list_roles,
		routes::rbac::create_role,
		routes::rbac::get_role,
		routes::rbac::update_role,
		routes::rbac::delete_role,
		routes::rbac::assign_permission_to_role,
		routes::rbac::remove_permission_from_role,
		routes::rbac::add_child_role,
		routes::rbac::remove_child_role,
		routes::rbac::get_role_effective_permissions,
		routes::rbac::list_permissions,
		routes::rbac::create_permission,
		routes::rbac::update_permission,
		routes::rbac::delete_permission,
		routes::rbac::list_users,
		routes::rbac::create_user,
		routes::rbac::get_user_roles,
		routes::rbac::assign_role_to_user,
		routes::rbac::revoke_role_from_user,
		routes::rbac::get_effective_permissions,
		routes::rbac::check,
		routes::rbac::cache_stats,
		routes::audit::by_user,
		routes::audit::denied,
		routes::audit::by_permission,
		routes::audit::audit_between,
		routes::audit::recent_failures
	),
	components(
		schemas(
			routes::health::HealthResponse,
			models::rbac::Permission,
			models::rbac::PermissionCreateRequest,
			models::rbac::DescriptionUpdateRequest,
			models::rbac::Role,
			models::rbac::RoleDetail,
			models::rbac::RoleCreateRequest,
			models::rbac::AssignPermissionToRoleRequest,
			models::rbac::AddChildRoleRequest,
			models::rbac::AssignRoleRequest,
			models::rbac::EffectivePermissionsResponse,
			models::rbac::CheckRequest,
			models::rbac::CheckResponse,
			models::user::User,
			models::user::UserCreateRequest,
			models::audit::PermissionAudit,
			models::audit::FailureCountResponse,
			authz::CacheStats,
			config_loader::PermissionDefinition,
			config_loader::RoleDefinition,
			config_loader::ConfigLoadReport
		)
	),
	tags(
		(name = "Health", description = "Liveness"),
		(name = "RBAC", description = "Roles, permissions, inheritance and assignments"),
		(name = "Audit", description = "Access decision audit log")
	)
)]
pub struct ApiDoc;

/// Generated document plus the bearer security scheme and a `servers` entry.
pub fn build_openapi(port: u16) -> anyhow::Result<utoipa::openapi::OpenApi> {
	let mut doc = serde_json::to_value(ApiDoc::openapi())?;

	ensure_security_components(&mut doc);
	ensure_servers(&mut doc, port);

	Ok(serde_json::from_value(doc)?)
}

/// Serves the JSON at `/api-docs/openapi.json` and Swagger UI at `/docs`.
pub fn swagger_routes(doc: utoipa::openapi::OpenApi) -> anyhow::Result<Router> {
	let swagger_config = utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
		.try_it_out_enabled(true)
		.with_credentials(true)
		.persist_authorization(true);

	let doc_json = Arc::new(serde_json::to_value(&doc)?);

	let json_route = get(move || {
		let doc_json = Arc::clone(&doc_json);
		async move { Json((*doc_json).clone()) }
	});

	Ok(Router::new()
		.route("/api-docs/openapi.json", json_route)
		.merge(SwaggerUi::new("/docs").config(swagger_config)))
}

fn ensure_security_components(doc: &mut Value) {
	let Some(root) = doc.as_object_mut() else {
		return;
	};
	let components = root.entry("components").or_insert_with(|| Value::Object(Map::new()));
	let Some(components) = components.as_object_mut() else {
		return;
	};
	let schemes = components
		.entry("securitySchemes")
		.or_insert_with(|| Value::Object(Map::new()));

	if let Some(schemes) = schemes.as_object_mut() {
		schemes.insert(
			"bearerAuth".to_string(),
			json!({
				"type": "http",
				"scheme": "bearer",
				"bearerFormat": "JWT"
			}),
		);
	}
}

fn ensure_servers(doc: &mut Value, port: u16) {
	if let Some(root) = doc.as_object_mut() {
		root.entry("servers")
			.or_insert_with(|| json!([{ "url": format!("http://localhost:{}", port) }]));
	}
}
