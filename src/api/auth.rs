//! Caller identity: the `x-tenant-id` header and the optional bearer token.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use crate::error::SlotError;
use crate::platform::Platform;

use super::ApiError;

pub const TENANT_HEADER: &str = "x-tenant-id";

/// The tenant a request acts for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tenant(pub String);

impl Tenant {
    /// A body or query may name its tenant; it must be the caller's own.
    pub fn check(&self, claimed: Option<&str>) -> Result<&str, ApiError> {
        match claimed {
            Some(claimed) if claimed != self.0 => {
                warn!("tenant {} attempted to act for tenant {claimed}", self.0);
                Err(SlotError::TenantMismatch {
                    expected: self.0.clone(),
                    actual: claimed.to_string(),
                }
                .into())
            }
            _ => Ok(&self.0),
        }
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Tenant {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(TENANT_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Tenant(v.to_string()))
            .ok_or(ApiError::MissingTenant)
    }
}

/// Refuse requests without the configured bearer token. No token configured
/// means no check.
pub async fn require_token(
    State(platform): State<Arc<Platform>>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(expected) = platform.config.api_token.as_deref() {
        let presented = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if presented != Some(expected) {
            return ApiError::Unauthorized.into_response();
        }
    }
    next.run(request).await
}
