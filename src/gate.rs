//! Request-time authentication on the token-renewal route.
//!
//! Only a request whose path is exactly the renewal path is inspected. Every
//! other request passes through untouched. On the renewal path the request
//! either reaches the handler with an [`AuthenticatedSession`] attached, or is
//! answered here and never runs downstream.

use crate::cookie::RefreshCookie;
use crate::errors::{self, IdentityError, TokenError};
use crate::identity::{IdentityResolver, Principal};
use crate::settings::Tokens;
use crate::storage::TokenRecord;
use crate::tokens::RefreshTokenManager;
use axum::body::Body;
use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

/// Outcome of a validated renewal request, attached to request extensions.
#[derive(Debug, Clone)]
pub struct AuthenticatedSession {
    pub principal: Principal,
    pub record: TokenRecord,
}

impl<S> FromRequestParts<S> for AuthenticatedSession
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedSession>()
            .cloned()
            .ok_or_else(errors::unauthorized)
    }
}

#[derive(Debug)]
pub enum GateRejection {
    /// Missing, unknown, expired, or revoked token, or an owner that cannot sign in.
    Unauthenticated,
    /// Token or user store failed; not the caller's fault.
    Unavailable,
    Internal,
}

impl IntoResponse for GateRejection {
    fn into_response(self) -> Response {
        match self {
            GateRejection::Unauthenticated => errors::unauthorized(),
            GateRejection::Unavailable => errors::service_unavailable(),
            GateRejection::Internal => errors::server_error(),
        }
    }
}

impl From<TokenError> for GateRejection {
    fn from(value: TokenError) -> Self {
        match value {
            TokenError::NotFound | TokenError::ExpiredOrRevoked | TokenError::UnknownUser => {
                GateRejection::Unauthenticated
            }
            TokenError::StoreUnavailable(_) => GateRejection::Unavailable,
            TokenError::Generation(_) => GateRejection::Internal,
        }
    }
}

impl From<IdentityError> for GateRejection {
    fn from(value: IdentityError) -> Self {
        match value {
            // A token whose owner vanished or was suspended authenticates no one
            IdentityError::UserNotFound | IdentityError::Disabled => {
                GateRejection::Unauthenticated
            }
            IdentityError::StoreUnavailable(_) => GateRejection::Unavailable,
        }
    }
}

#[derive(Clone)]
pub struct AuthGate {
    tokens: Arc<RefreshTokenManager>,
    identity: Arc<dyn IdentityResolver>,
    renewal_path: String,
    cookie_name: String,
}

impl AuthGate {
    pub fn new(
        tokens: Arc<RefreshTokenManager>,
        identity: Arc<dyn IdentityResolver>,
        renewal_path: impl Into<String>,
        cookie_name: impl Into<String>,
    ) -> Self {
        Self {
            tokens,
            identity,
            renewal_path: renewal_path.into(),
            cookie_name: cookie_name.into(),
        }
    }

    pub fn from_settings(
        tokens: Arc<RefreshTokenManager>,
        identity: Arc<dyn IdentityResolver>,
        cfg: &Tokens,
    ) -> Self {
        Self::new(tokens, identity, &cfg.renewal_path, &cfg.cookie_name)
    }

    pub fn guards(&self, path: &str) -> bool {
        path == self.renewal_path
    }

    /// Validate a presented plaintext and resolve its owner.
    pub async fn authenticate(&self, plaintext: &str) -> Result<AuthenticatedSession, GateRejection> {
        let record = self.tokens.validate(plaintext).await.map_err(|e| {
            log_failure("validate", &e.to_string(), e.is_rejection());
            GateRejection::from(e)
        })?;

        let principal = self
            .identity
            .load_principal(&record.user_id)
            .await
            .map_err(|e| {
                let rejection = GateRejection::from(e);
                log_failure(
                    "resolve",
                    "owner could not be resolved",
                    matches!(rejection, GateRejection::Unauthenticated),
                );
                rejection
            })?;

        Ok(AuthenticatedSession { principal, record })
    }
}

fn log_failure(stage: &str, reason: &str, rejection: bool) {
    if rejection {
        tracing::debug!(stage, reason, "Renewal request rejected");
    } else {
        tracing::warn!(stage, reason, "Renewal request failed");
    }
}

/// Axum middleware; install with `middleware::from_fn_with_state(gate, authenticate)`.
pub async fn authenticate(
    State(gate): State<AuthGate>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    if !gate.guards(req.uri().path()) {
        return next.run(req).await;
    }

    // Identity on this route comes from the cookie alone
    req.extensions_mut().remove::<AuthenticatedSession>();
    req.extensions_mut().remove::<Principal>();

    let Some(cookie) = RefreshCookie::from_headers(req.headers(), &gate.cookie_name) else {
        tracing::debug!("Renewal request without refresh cookie");
        return GateRejection::Unauthenticated.into_response();
    };

    match gate.authenticate(&cookie.token).await {
        Ok(session) => {
            tracing::debug!(user_id = %session.principal.user_id, "Renewal request authenticated");
            req.extensions_mut().insert(session.principal.clone());
            req.extensions_mut().insert(session);
            next.run(req).await
        }
        Err(rejection) => rejection.into_response(),
    }
}
