/// Account database models and row mapping
use crate::{
    admin::roles::{Role, RoleSet},
    error::{AuthError, AuthResult},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Columns selected for every account read
pub(crate) const ACCOUNT_COLUMNS: &str = "id, username, password_hash, email, full_name, roles, \
     onetime, password_expires_at, onetime_code, onetime_expires_at, is_reset, session_active, created_at";

/// Pending one-time code; code and expiry are always stored together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneTimeCode {
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

/// Account record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password_hash: Option<String>,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub roles: RoleSet,
    /// Current password is a temporary one handed out by an administrator
    pub is_one_time: bool,
    pub password_expires_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub one_time_code: Option<OneTimeCode>,
    /// Password must be replaced through a one-time code before login
    pub is_reset: bool,
    pub session_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

/// Raw `account` row as stored in SQLite
#[derive(Debug, FromRow)]
pub(crate) struct AccountRow {
    id: i64,
    username: String,
    password_hash: Option<String>,
    email: Option<String>,
    full_name: Option<String>,
    roles: String,
    onetime: bool,
    password_expires_at: Option<i64>,
    onetime_code: Option<String>,
    onetime_expires_at: Option<i64>,
    is_reset: bool,
    session_active: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = AuthError;

    fn try_from(row: AccountRow) -> AuthResult<Self> {
        let one_time_code = match (row.onetime_code, row.onetime_expires_at) {
            (Some(code), Some(expires_at)) => Some(OneTimeCode {
                code,
                expires_at: from_millis(expires_at)?,
            }),
            (None, None) => None,
            _ => {
                return Err(AuthError::Internal(format!(
                    "Account {} has a one-time code without expiry",
                    row.username
                )))
            }
        };

        Ok(Account {
            id: row.id,
            roles: decode_roles(&row.roles)?,
            password_hash: row.password_hash,
            email: row.email,
            full_name: row.full_name,
            is_one_time: row.onetime,
            password_expires_at: row.password_expires_at.map(from_millis).transpose()?,
            one_time_code,
            is_reset: row.is_reset,
            session_active: row.session_active,
            created_at: row.created_at,
            username: row.username,
        })
    }
}

/// Keyed session as returned when it is opened; the raw token is only
/// available here, storage keeps its digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub token: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Raw `session` row
#[derive(Debug, FromRow)]
pub(crate) struct SessionRow {
    pub id: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: i64,
}

/// Serialize a role set for the `roles` column
pub(crate) fn encode_roles(roles: &RoleSet) -> String {
    roles
        .iter()
        .map(|r| r.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse the `roles` column; blanks between delimiters are ignored
pub(crate) fn decode_roles(raw: &str) -> AuthResult<RoleSet> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse::<Role>)
        .collect()
}

/// Timestamps that take part in expiry comparisons are stored as UTC epoch
/// milliseconds so SQLite compares them numerically.
pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> AuthResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| AuthError::Internal(format!("Invalid timestamp: {}", millis)))
}
