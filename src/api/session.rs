/// Session, setup, invitation and reset endpoints
use crate::{
    account::{
        CompleteResetRequest, LoginRequest, LoginResponse, RedeemInvitationRequest,
        SelectRoleRequest, SessionInfo, SetupRequest,
    },
    admin::Role,
    auth::AuthContext,
    context::AppContext,
    db::account::Account,
    error::AuthResult,
};
use axum::{
    extract::State,
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};

/// Build session routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/setup", post(setup))
        .route(
            "/api/session",
            post(login).get(get_session).delete(logout),
        )
        .route("/api/session/current", axum::routing::get(current_principal))
        .route("/api/session/role", post(select_role))
        .route("/api/invites/redeem", post(redeem_invitation))
        .route("/api/reset/confirm", post(confirm_reset))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CurrentPrincipalResponse {
    pub principal: Option<Account>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SelectRoleResponse {
    pub role: Role,
}

/// Create the first administrator
async fn setup(
    State(ctx): State<AppContext>,
    Json(req): Json<SetupRequest>,
) -> AuthResult<(StatusCode, Json<Account>)> {
    let account = ctx.account_manager.bootstrap_admin(req).await?;
    Ok((StatusCode::CREATED, Json(account)))
}

/// Log in
async fn login(
    State(ctx): State<AppContext>,
    Json(req): Json<LoginRequest>,
) -> AuthResult<Json<LoginResponse>> {
    ctx.rate_limiter.check("login", &req.username)?;

    let outcome = ctx
        .account_manager
        .login(&req.username, &req.password)
        .await?;

    Ok(Json(outcome.into()))
}

/// Describe the caller's session
async fn get_session(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> AuthResult<Json<SessionInfo>> {
    let info = ctx.account_manager.session_info(&auth.token).await?;
    Ok(Json(info))
}

/// Log out
async fn logout(State(ctx): State<AppContext>, auth: AuthContext) -> AuthResult<StatusCode> {
    ctx.account_manager.logout(&auth.token).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Account currently holding the global session flag
async fn current_principal(
    State(ctx): State<AppContext>,
    _auth: AuthContext,
) -> AuthResult<Json<CurrentPrincipalResponse>> {
    let principal = ctx.account_manager.sessions().current_principal().await?;
    Ok(Json(CurrentPrincipalResponse { principal }))
}

/// Choose the working role for a multi-role account
async fn select_role(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Json(req): Json<SelectRoleRequest>,
) -> AuthResult<Json<SelectRoleResponse>> {
    let role = ctx.account_manager.select_role(&auth.token, req.role).await?;

    tracing::debug!("{} selected role {}", auth.session.username, role);
    Ok(Json(SelectRoleResponse { role }))
}

/// Create an account from an invitation code
async fn redeem_invitation(
    State(ctx): State<AppContext>,
    Json(req): Json<RedeemInvitationRequest>,
) -> AuthResult<(StatusCode, Json<Account>)> {
    let account = ctx.account_manager.redeem_invitation(req).await?;
    Ok((StatusCode::CREATED, Json(account)))
}

/// Set a new password with a one-time code
async fn confirm_reset(
    State(ctx): State<AppContext>,
    Json(req): Json<CompleteResetRequest>,
) -> AuthResult<StatusCode> {
    ctx.rate_limiter.check("reset", &req.username)?;

    ctx.account_manager.complete_reset(req).await?;
    Ok(StatusCode::NO_CONTENT)
}
