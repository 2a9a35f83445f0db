/// Account management system
///
/// Handles account records, credentials, one-time reset codes, sessions,
/// and the login / invitation / reset flows built on top of them.

mod credentials;
mod manager;
mod session;
mod store;

pub use credentials::CredentialManager;
pub use manager::AccountManager;
pub use session::SessionTracker;
pub use store::{validate_username, AccountStore};

use crate::{
    admin::roles::{Resolution, Role, RoleSet},
    db::account::{Account, Session},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Input for `AccountStore::create`
#[derive(Debug, Clone, Default)]
pub struct NewAccount {
    pub username: String,
    pub password_hash: Option<String>,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub roles: RoleSet,
    /// Password is a temporary one that must be replaced
    pub is_one_time: bool,
    /// When a temporary password stops being accepted
    pub one_time_expiry: Option<DateTime<Utc>>,
}

/// Field updates accepted by `AccountStore::update_field`
///
/// Credential and session columns are owned by `CredentialManager` and
/// `SessionTracker` and cannot be written through here.
#[derive(Debug, Clone, PartialEq)]
pub enum AccountField {
    Email(Option<String>),
    FullName(Option<String>),
    Roles(RoleSet),
    IsReset(bool),
    IsOneTime(bool),
}

impl AccountField {
    pub fn name(&self) -> &'static str {
        match self {
            AccountField::Email(_) => "email",
            AccountField::FullName(_) => "full_name",
            AccountField::Roles(_) => "roles",
            AccountField::IsReset(_) => "is_reset",
            AccountField::IsOneTime(_) => "onetime",
        }
    }
}

/// Result of a login attempt that did not fail outright
#[derive(Debug, Clone)]
pub enum LoginOutcome {
    /// Account is flagged for reset; the password must be replaced through a
    /// one-time code before a session is granted.
    ResetRequired { username: String },
    /// Credentials accepted and a session opened
    Authenticated {
        account: Account,
        session: Session,
        resolution: Resolution,
    },
}

/// Administrator account creation request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountRequest {
    pub username: String,
    /// Temporary password; the holder must replace it
    pub password: Option<String>,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub roles: RoleSet,
}

/// Account created by an administrator
///
/// Accounts created without a temporary password are flagged for reset and
/// carry the one-time code their holder needs to set one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedAccount {
    pub account: Account,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub one_time_code: Option<OneTimeCodeResponse>,
}

/// First-administrator setup request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupRequest {
    pub username: String,
    pub password: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
}

/// Invitation redemption request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemInvitationRequest {
    pub code: String,
    pub username: String,
    pub password: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
}

/// Login request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Login response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum LoginResponse {
    #[serde(rename_all = "camelCase")]
    ResetRequired { username: String },
    #[serde(rename_all = "camelCase")]
    Authenticated {
        username: String,
        token: String,
        expires_at: DateTime<Utc>,
        resolution: Resolution,
    },
}

impl From<LoginOutcome> for LoginResponse {
    fn from(outcome: LoginOutcome) -> Self {
        match outcome {
            LoginOutcome::ResetRequired { username } => LoginResponse::ResetRequired { username },
            LoginOutcome::Authenticated {
                account,
                session,
                resolution,
            } => LoginResponse::Authenticated {
                username: account.username,
                token: session.token,
                expires_at: session.expires_at,
                resolution,
            },
        }
    }
}

/// Role selection request for multi-role accounts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectRoleRequest {
    pub role: Role,
}

/// Reset completion request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteResetRequest {
    pub username: String,
    pub code: String,
    pub new_password: String,
}

/// Issued one-time code, returned to the administrator who requested it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneTimeCodeResponse {
    pub username: String,
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

/// Validated session from bearer token
#[derive(Debug, Clone)]
pub struct ValidatedSession {
    pub session_id: String,
    pub username: String,
    pub expires_at: DateTime<Utc>,
}

/// Session info (for getSession)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub username: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub roles: RoleSet,
    pub resolution: Resolution,
    pub expires_at: DateTime<Utc>,
}
