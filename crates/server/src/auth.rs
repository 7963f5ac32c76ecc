use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use tireline_core::auth::{bearer_token, Principal};
use tireline_core::errors::InterfaceError;
use tracing::warn;

use crate::api::{ApiError, CorrelationId};
use crate::routes::AppState;
use crate::service::RequestContext;

/// Verified admin bearer session. Rejects with 401 before the handler runs.
#[derive(Clone, Debug)]
pub struct AdminSession {
    pub principal: Principal,
    pub correlation_id: String,
}

impl AdminSession {
    pub fn context(&self) -> RequestContext {
        RequestContext::new(self.correlation_id.clone(), self.principal.actor())
    }
}

impl FromRequestParts<AppState> for AdminSession {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let correlation_id = CorrelationId::of(parts);
        let header = parts.headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok());

        let verified = bearer_token(header)
            .and_then(|token| state.signer.verify_admin(token, state.service.now()));
        match verified {
            Ok(principal) => Ok(Self { principal, correlation_id }),
            Err(rejection) => {
                warn!(
                    event_name = "auth.rejected",
                    correlation_id = %correlation_id,
                    path = %parts.uri.path(),
                    reason = %rejection,
                    "admin session rejected"
                );
                Err(ApiError(InterfaceError::Unauthorized {
                    message: rejection.to_string(),
                    correlation_id,
                }))
            }
        }
    }
}
