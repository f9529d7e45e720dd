//! Acting user, taken from the header the authenticating gateway sets.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;

pub const ACTOR_HEADER: &str = "X-User-ID";

/// The staff member performing a reconciliation action.
#[derive(Debug, Clone)]
pub struct ActorContext {
    pub user_id: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for ActorContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Missing X-User-ID header")))?;

        tracing::Span::current().record("user_id", user_id);

        Ok(Self {
            user_id: user_id.to_string(),
        })
    }
}
