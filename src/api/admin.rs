/// Admin API Endpoints
///
/// Account administration and invitation management. Every handler takes
/// an `AdminAuthContext`, so the caller must hold the `Admin` role.
use crate::{
    account::{CreateAccountRequest, CreatedAccount, OneTimeCodeResponse},
    admin::{InvitationCode, RoleSet},
    auth::AdminAuthContext,
    context::AppContext,
    db::account::Account,
    error::{AuthError, AuthResult},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

/// Build admin API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/admin/accounts", get(list_accounts).post(create_account))
        .route("/api/admin/accounts/:username", delete(remove_account))
        .route("/api/admin/accounts/:username/roles", put(set_roles))
        .route("/api/admin/accounts/:username/reset", post(reset_account))
        .route("/api/admin/invites", get(list_invites).post(create_invite))
        .route("/api/admin/invites/:code", delete(revoke_invite))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListAccountsResponse {
    pub accounts: Vec<Account>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SetRolesRequest {
    pub roles: RoleSet,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateInviteRequest {
    /// Administrator-chosen code; a random one is generated when absent
    #[serde(default)]
    pub code: Option<String>,
    pub roles: RoleSet,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListInvitesResponse {
    pub codes: Vec<InvitationCode>,
}

/// List all accounts
async fn list_accounts(
    State(ctx): State<AppContext>,
    _auth: AdminAuthContext,
) -> AuthResult<Json<ListAccountsResponse>> {
    let accounts = ctx.account_manager.accounts().list_all().await?;
    Ok(Json(ListAccountsResponse { accounts }))
}

/// Create an account
async fn create_account(
    State(ctx): State<AppContext>,
    auth: AdminAuthContext,
    Json(req): Json<CreateAccountRequest>,
) -> AuthResult<(StatusCode, Json<CreatedAccount>)> {
    let created = ctx.account_manager.create_account(req).await?;

    tracing::info!(
        "{} created account {}",
        auth.account.username,
        created.account.username
    );
    Ok((StatusCode::CREATED, Json(created)))
}

/// Delete an account
async fn remove_account(
    State(ctx): State<AppContext>,
    auth: AdminAuthContext,
    Path(username): Path<String>,
) -> AuthResult<StatusCode> {
    if auth.account.username == username {
        return Err(AuthError::Validation(
            "Administrators cannot delete their own account".to_string(),
        ));
    }

    ctx.account_manager.remove_account(&username).await?;

    tracing::info!("{} removed account {}", auth.account.username, username);
    Ok(StatusCode::NO_CONTENT)
}

/// Replace an account's roles
async fn set_roles(
    State(ctx): State<AppContext>,
    auth: AdminAuthContext,
    Path(username): Path<String>,
    Json(req): Json<SetRolesRequest>,
) -> AuthResult<Json<Account>> {
    let account = ctx.account_manager.set_roles(&username, req.roles).await?;

    tracing::info!(
        "{} set roles of {} to {:?}",
        auth.account.username,
        username,
        account.roles
    );
    Ok(Json(account))
}

/// Flag an account for reset and hand back its one-time code
async fn reset_account(
    State(ctx): State<AppContext>,
    auth: AdminAuthContext,
    Path(username): Path<String>,
) -> AuthResult<Json<OneTimeCodeResponse>> {
    let issued = ctx.account_manager.request_reset(&username).await?;

    tracing::info!("{} reset account {}", auth.account.username, username);
    Ok(Json(issued))
}

/// List outstanding invitation codes
async fn list_invites(
    State(ctx): State<AppContext>,
    _auth: AdminAuthContext,
) -> AuthResult<Json<ListInvitesResponse>> {
    let codes = ctx.account_manager.invites().list().await?;
    Ok(Json(ListInvitesResponse { codes }))
}

/// Register or generate an invitation code
async fn create_invite(
    State(ctx): State<AppContext>,
    auth: AdminAuthContext,
    Json(req): Json<CreateInviteRequest>,
) -> AuthResult<(StatusCode, Json<InvitationCode>)> {
    let invites = ctx.account_manager.invites();
    let code = match req.code {
        Some(ref code) => invites.register(code, req.roles).await?,
        None => invites.generate(req.roles).await?,
    };

    tracing::info!("{} created an invitation code", auth.account.username);
    Ok((StatusCode::CREATED, Json(code)))
}

/// Revoke an unredeemed invitation code
async fn revoke_invite(
    State(ctx): State<AppContext>,
    auth: AdminAuthContext,
    Path(code): Path<String>,
) -> AuthResult<StatusCode> {
    ctx.account_manager.invites().revoke(&code).await?;

    tracing::info!("{} revoked an invitation code", auth.account.username);
    Ok(StatusCode::NO_CONTENT)
}
