/// Authentication extractors
use crate::{
    account::ValidatedSession,
    admin::Role,
    api::middleware::extract_bearer_token,
    context::AppContext,
    db::account::Account,
    error::AuthError,
};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

/// Authenticated context - extracts and validates the session from the request
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub token: String,
    pub session: ValidatedSession,
}

#[async_trait]
impl FromRequestParts<AppContext> for AuthContext {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_bearer_token(&parts.headers)
            .ok_or_else(|| AuthError::Authentication("Missing authorization header".to_string()))?;

        let session = state
            .account_manager
            .sessions()
            .validate_token(&token)
            .await?;

        Ok(AuthContext { token, session })
    }
}

/// Admin authentication context - requires a session whose account holds `Admin`
#[derive(Debug, Clone)]
pub struct AdminAuthContext {
    pub account: Account,
    pub session: ValidatedSession,
}

#[async_trait]
impl FromRequestParts<AppContext> for AdminAuthContext {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let AuthContext { session, .. } = AuthContext::from_request_parts(parts, state).await?;

        // Roles are re-read on every request so revocation takes effect at once
        let account = state
            .account_manager
            .accounts()
            .find_by_username(&session.username)
            .await
            .map_err(|e| match e {
                AuthError::NotFound(_) => {
                    AuthError::Authentication("Invalid session token".to_string())
                }
                other => other,
            })?;

        if !account.has_role(Role::Admin) {
            tracing::warn!("{} attempted an admin action without the Admin role", account.username);
            return Err(AuthError::Authorization("Admin role required".to_string()));
        }

        Ok(AdminAuthContext { account, session })
    }
}
