use axum::{
    routing::{get, patch, post},
    Router,
};

use crate::actions::routes as action_routes;
use crate::{admin_api, auth, keys_api, report, users_api};

pub fn api_routes() -> Router {
    Router::new()
        .route("/api/auth/login", post(auth::login_user))
        .route("/api/auth/me", get(auth::current_user))
        .route(
            "/api/users",
            get(users_api::list_users).post(users_api::create_user),
        )
        .route(
            "/api/users/:user_id",
            patch(users_api::update_user).delete(users_api::request_user_deletion),
        )
        .route(
            "/api/pending-actions",
            get(action_routes::list_pending_actions),
        )
        .route(
            "/api/pending-actions/:action_id/approve",
            post(action_routes::approve_action),
        )
        .route(
            "/api/pending-actions/:action_id/deny",
            post(action_routes::deny_action),
        )
        .route(
            "/api/keys",
            get(keys_api::list_keys).post(keys_api::create_key),
        )
        .route("/api/keys/detail", get(keys_api::get_key))
        .route("/api/keys/enable", post(keys_api::enable_key))
        .route("/api/keys/disable", post(keys_api::disable_key))
        .route("/api/keys/rotation", post(keys_api::set_rotation))
        .route(
            "/api/keys/schedule-deletion",
            post(keys_api::schedule_deletion),
        )
        .route("/api/keys/encrypt", post(keys_api::encrypt))
        .route("/api/keys/decrypt", post(keys_api::decrypt))
        .route("/api/sync", post(admin_api::trigger_sync))
        .route("/api/modules/status", get(admin_api::list_module_statuses))
        .route(
            "/api/modules/status/:provider",
            patch(admin_api::update_module_status),
        )
        .route("/api/alarms", get(admin_api::list_alarms))
        .route("/api/alarms/:alarm_id", patch(admin_api::acknowledge_alarm))
        .route("/api/cbom", get(report::get_cbom))
}
