//! Request handlers: the authorization endpoint, reload, and the
//! operational endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, StatusCode, header};
use axum::Json;
use serde_json::{Value, json};
use tracing::warn;

use crate::authn::UserInfo;
use crate::policy::Request;

use super::router::AppState;

type Reply = (StatusCode, Json<Value>);

fn message(status: StatusCode, text: impl Into<String>) -> Reply {
    (status, Json(json!({"message": text.into()})))
}

/// `POST /allowed` — the authorization decision endpoint.
///
/// The pipeline, in order: require an `Origin` header naming the service;
/// resolve the service (unknown → 401); when the service has an identity
/// provider, validate the bearer token and derive the principals from it
/// (posting principals is then forbidden); without one, principals must be
/// posted in the body. Principals are expanded with the service tags and the
/// `roles` context field before evaluation.
pub(super) async fn allowed(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<Request>, JsonRejection>,
) -> Reply {
    // The service requesting a decision sends its own identifier as Origin;
    // it is matched against the services of the policies files.
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    if origin.is_empty() {
        return message(StatusCode::BAD_REQUEST, "Missing `Origin` request header");
    }
    let origin = origin.to_string();

    let Ok(authenticator) = state.registry.authenticator(&origin) else {
        return message(
            StatusCode::UNAUTHORIZED,
            "Unknown service specified in `Origin`",
        );
    };

    let user: Option<UserInfo> = match authenticator {
        Some(authenticator) => match authenticator.validate_request(&headers, &origin).await {
            Ok(user) => Some(user),
            Err(e) => return message(StatusCode::UNAUTHORIZED, e.to_string()),
        },
        None => None,
    };

    let mut request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => return message(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    match user {
        Some(user) => {
            if !request.principals.is_empty() {
                return message(
                    StatusCode::BAD_REQUEST,
                    "cannot submit principals with authentication enabled",
                );
            }
            request.principals = principals_from(&user);
        }
        None => {
            if request.principals.is_empty() {
                return message(StatusCode::BAD_REQUEST, "missing principals");
            }
        }
    }

    // Expand principals with local tags, then with the requested roles.
    request.principals = state.registry.expand_principals(&origin, request.principals);
    let roles = request.roles();
    request.principals.extend(roles);

    let allowed = state.registry.evaluate(&origin, &request);

    (
        StatusCode::OK,
        Json(json!({
            "allowed": allowed,
            "principals": request.principals,
        })),
    )
}

/// Principals derived from an authenticated user.
fn principals_from(user: &UserInfo) -> Vec<String> {
    let mut principals = vec![format!("userid:{}", user.id)];
    if !user.email.is_empty() {
        principals.push(format!("email:{}", user.email));
    }
    for group in &user.groups {
        principals.push(format!("group:{group}"));
    }
    principals
}

/// `POST /__reload__` — reload every policies source and swap the registry.
pub(super) async fn reload(State(state): State<Arc<AppState>>) -> Reply {
    let configs = match state.loaders.load(&state.sources).await {
        Ok(configs) => configs,
        Err(e) => {
            warn!(error = %e, "reload failed while loading sources");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"success": false, "message": e.to_string()})),
            );
        }
    };

    if let Err(e) = state.registry.load(&configs).await {
        warn!(error = %e, "reload failed while building the registry");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"success": false, "message": e.to_string()})),
        );
    }

    (StatusCode::OK, Json(json!({"success": true, "message": ""})))
}

/// `GET /__lbheartbeat__` — load balancer liveness.
pub(super) async fn lbheartbeat() -> Json<Value> {
    Json(json!({"ok": true}))
}

/// `GET /__heartbeat__` — deep health check.
pub(super) async fn heartbeat() -> Json<Value> {
    Json(json!({}))
}

/// `GET /__version__` — build metadata.
pub(super) async fn version() -> Json<Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Any unknown route.
pub(super) async fn not_found() -> Reply {
    message(StatusCode::NOT_FOUND, "not found")
}
