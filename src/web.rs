//! HTTP surface: the renewal route behind the authentication gate, plus the
//! logout endpoints that revoke the caller's refresh token(s).
use crate::cookie::RefreshCookie;
use crate::errors;
use crate::gate::{self, AuthGate, AuthenticatedSession};
use crate::identity::{DbIdentityResolver, IdentityResolver};
use crate::settings::Settings;
use crate::storage::{SqlTokenStore, TokenStore};
use crate::tokens::RefreshTokenManager;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use miette::IntoDiagnostic;
use sea_orm::DatabaseConnection;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;

pub const LOGOUT_PATH: &str = "/api/v1/auth/logout";
pub const LOGOUT_ALL_PATH: &str = "/api/v1/auth/logout-all";

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub tokens: Arc<RefreshTokenManager>,
    pub gate: AuthGate,
}

impl AppState {
    /// Wire the manager, resolver, and gate explicitly; nothing is global.
    pub fn new(
        settings: Settings,
        store: Arc<dyn TokenStore>,
        identity: Arc<dyn IdentityResolver>,
    ) -> Self {
        let tokens = Arc::new(RefreshTokenManager::from_settings(store, &settings.tokens));
        let gate = AuthGate::from_settings(tokens.clone(), identity, &settings.tokens);
        Self {
            settings: Arc::new(settings),
            tokens,
            gate,
        }
    }

    pub fn with_database(settings: Settings, db: DatabaseConnection) -> Self {
        Self::new(
            settings,
            Arc::new(SqlTokenStore::new(db.clone())),
            Arc::new(DbIdentityResolver::new(db)),
        )
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(&state.settings.tokens.renewal_path, post(refresh))
        .route(LOGOUT_PATH, post(logout))
        .route(LOGOUT_ALL_PATH, post(logout_all))
        .route("/healthz", get(health))
        .layer(middleware::from_fn_with_state(
            state.gate.clone(),
            gate::authenticate,
        ))
        .with_state(state)
}

pub async fn serve(settings: Settings, db: DatabaseConnection) -> miette::Result<()> {
    let addr: SocketAddr = settings
        .listen_addr()
        .parse()
        .map_err(|e| miette::miette!("bad listen addr: {e}"))?;

    let state = AppState::with_database(settings, db);
    tracing::info!(
        renewal_path = %state.settings.tokens.renewal_path,
        ttl_secs = state.settings.tokens.ttl_secs,
        reuse_detection = state.settings.tokens.revoke_family_on_reuse,
        "Refresh token gate configured"
    );
    let router = router(state);

    tracing::info!(%addr, "Public API listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .into_diagnostic()?;
    axum::serve(listener, router).await.into_diagnostic()?;
    Ok(())
}

fn json_with_headers(status: StatusCode, value: Value, headers: &[(HeaderName, String)]) -> Response {
    let mut resp = (status, Json(value)).into_response();
    let h = resp.headers_mut();
    for (name, val) in headers {
        if let Ok(v) = HeaderValue::from_str(val) {
            h.append(name.clone(), v);
        }
    }
    resp
}

fn clear_cookie(state: &AppState, mut resp: Response) -> Response {
    if let Ok(v) = HeaderValue::from_str(&RefreshCookie::delete_cookie_header(&state.settings.tokens)) {
        resp.headers_mut().append(header::SET_COOKIE, v);
    }
    resp
}

/// POST {renewal_path}
/// Rotate the token the gate validated and hand the successor back in the cookie.
async fn refresh(State(state): State<AppState>, session: AuthenticatedSession) -> Response {
    // Detached so a dropped request cannot stop between revoke and successor insert
    let tokens = state.tokens.clone();
    let record = session.record.clone();
    let rotation = tokio::spawn(async move { tokens.rotate(&record).await });

    let rotated = match rotation.await {
        Ok(rotated) => rotated,
        Err(e) => {
            tracing::error!(user_id = %session.principal.user_id, error = %e, "Token rotation task failed");
            return errors::server_error();
        }
    };

    let plaintext = match rotated {
        Ok(p) => p,
        Err(e) if e.is_rejection() => {
            // Lost a rotation race against a concurrent request with the same token
            return clear_cookie(&state, errors::unauthorized());
        }
        Err(e) => {
            tracing::error!(user_id = %session.principal.user_id, error = %e, "Token rotation failed");
            return e.into_response();
        }
    };

    let cookie = RefreshCookie::new(plaintext).to_cookie_header(&state.settings.tokens);
    json_with_headers(
        StatusCode::OK,
        json!({
            "user_id": session.principal.user_id,
            "email": session.principal.email,
            "authorities": session.principal.authorities,
        }),
        &[
            (header::SET_COOKIE, cookie),
            (header::CACHE_CONTROL, "no-store".to_string()),
            (header::PRAGMA, "no-cache".to_string()),
        ],
    )
}

/// POST /api/v1/auth/logout
/// Revoke the presented token. Answers 204 whether or not it existed.
async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(cookie) = RefreshCookie::from_headers(&headers, &state.settings.tokens.cookie_name) {
        match state.tokens.revoke(&cookie.token).await {
            Ok(()) => {}
            Err(e) if e.is_rejection() => {}
            Err(e) => return e.into_response(),
        }
    }

    clear_cookie(&state, StatusCode::NO_CONTENT.into_response())
}

/// POST /api/v1/auth/logout-all
/// Revoke every token of the owner of the presented token.
async fn logout_all(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(cookie) = RefreshCookie::from_headers(&headers, &state.settings.tokens.cookie_name)
    else {
        return errors::unauthorized();
    };

    let record = match state.tokens.validate(&cookie.token).await {
        Ok(r) => r,
        Err(e) if e.is_rejection() => return clear_cookie(&state, errors::unauthorized()),
        Err(e) => return e.into_response(),
    };

    match state.tokens.revoke_all(&record.user_id).await {
        Ok(revoked) => clear_cookie(
            &state,
            (StatusCode::OK, Json(json!({ "revoked": revoked }))).into_response(),
        ),
        Err(e) => e.into_response(),
    }
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
