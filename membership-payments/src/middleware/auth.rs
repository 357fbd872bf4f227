//! Bearer-token authentication for `/api/payments` routes.
//!
//! `require_auth` rejects requests without a verifiable token; `optional_auth`
//! attaches the caller's [`Identity`] when it can and otherwise lets the
//! request through anonymously.

use axum::async_trait;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::{header, request::Parts, HeaderMap};
use axum::middleware::Next;
use axum::response::Response;
use service_core::error::AppError;
use std::convert::Infallible;
use std::sync::Arc;

use crate::services::{Identity, IdentityVerifier};

#[derive(Clone)]
pub struct AuthGate {
    verifier: Option<Arc<IdentityVerifier>>,
    allow_unverified: bool,
}

impl AuthGate {
    pub fn new(verifier: Option<IdentityVerifier>, allow_unverified: bool) -> Self {
        Self {
            verifier: verifier.map(Arc::new),
            allow_unverified,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.verifier.is_some()
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

pub async fn require_auth(
    State(gate): State<AuthGate>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(verifier) = &gate.verifier else {
        if gate.allow_unverified {
            tracing::warn!(
                path = %req.uri().path(),
                "No identity verifier configured; letting request through unauthenticated"
            );
            return Ok(next.run(req).await);
        }
        return Err(AppError::ServiceUnavailable(
            "Authentication is not configured".to_string(),
        ));
    };

    let token = bearer_token(req.headers()).ok_or_else(|| {
        AppError::Unauthorized(anyhow::anyhow!("Unauthorized - No token provided"))
    })?;

    let identity = verifier.verify(token).map_err(|e| {
        tracing::warn!(error = %e, "Bearer token rejected");
        AppError::Unauthorized(anyhow::anyhow!("Unauthorized - Invalid token"))
    })?;

    tracing::Span::current().record("user_id", identity.uid.as_str());
    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}

pub async fn optional_auth(State(gate): State<AuthGate>, mut req: Request, next: Next) -> Response {
    if let (Some(verifier), Some(token)) = (&gate.verifier, bearer_token(req.headers())) {
        match verifier.verify(token) {
            Ok(identity) => {
                req.extensions_mut().insert(identity);
            }
            Err(e) => tracing::debug!(error = %e, "Ignoring invalid optional bearer token"),
        }
    }
    next.run(req).await
}

/// Identity attached by the auth middleware, if any.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Option<Identity>);

impl CurrentUser {
    pub fn uid(&self) -> Option<&str> {
        self.0.as_ref().map(|identity| identity.uid.as_str())
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(CurrentUser(parts.extensions.get::<Identity>().cloned()))
    }
}
