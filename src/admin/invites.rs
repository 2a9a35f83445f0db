/// Invitation Code Registry
///
/// Codes pre-authorize a role set for an account that does not exist yet.
/// Redemption is single-use: the row is deleted in the same statement that
/// reads it, so two concurrent redemptions cannot both succeed.
use crate::{
    admin::roles::RoleSet,
    clock::SharedClock,
    crypto::generate_secret,
    db::account::{decode_roles, encode_roles},
    error::{AuthError, AuthResult},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

/// Invitation code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvitationCode {
    pub code: String,
    pub roles: RoleSet,
    pub created_at: DateTime<Utc>,
}

/// Invitation code registry
#[derive(Clone)]
pub struct InvitationCodeRegistry {
    db: SqlitePool,
    clock: SharedClock,
}

impl InvitationCodeRegistry {
    pub fn new(db: SqlitePool, clock: SharedClock) -> Self {
        Self { db, clock }
    }

    /// Generate a new random code
    pub fn generate_code() -> String {
        generate_secret(16).to_lowercase()
    }

    /// Register an administrator-chosen code
    pub async fn register(&self, code: &str, roles: RoleSet) -> AuthResult<InvitationCode> {
        validate_code(code)?;
        if roles.is_empty() {
            return Err(AuthError::Validation(
                "Invitation code must grant at least one role".to_string(),
            ));
        }

        let now = self.clock.now();

        sqlx::query(
            r#"
            INSERT INTO invitation_code (code, roles, created_at)
            VALUES (?1, ?2, ?3)
            "#,
        )
        .bind(code)
        .bind(encode_roles(&roles))
        .bind(now)
        .execute(&self.db)
        .await
        .map_err(|e| {
            AuthError::from_write(e, || format!("Invitation code {} already exists", code))
        })?;

        tracing::info!("Registered invitation code granting {:?}", roles);

        Ok(InvitationCode {
            code: code.to_string(),
            roles,
            created_at: now,
        })
    }

    /// Mint a random code granting `roles`
    pub async fn generate(&self, roles: RoleSet) -> AuthResult<InvitationCode> {
        self.register(&Self::generate_code(), roles).await
    }

    /// Redeem a code, consuming it, and return the roles it grants
    pub async fn redeem(&self, code: &str) -> AuthResult<RoleSet> {
        let row = sqlx::query("DELETE FROM invitation_code WHERE code = ?1 RETURNING roles")
            .bind(code)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AuthError::NotFound("Invalid invitation code".to_string()))?;

        let raw: String = row.try_get("roles")?;
        decode_roles(&raw)
    }

    /// Put a redeemed code back, used when the account it was meant for
    /// could not be created.
    pub(crate) async fn restore(&self, code: &str, roles: &RoleSet) -> AuthResult<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO invitation_code (code, roles, created_at)
            VALUES (?1, ?2, ?3)
            "#,
        )
        .bind(code)
        .bind(encode_roles(roles))
        .bind(self.clock.now())
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Revoke an unredeemed code
    pub async fn revoke(&self, code: &str) -> AuthResult<()> {
        let result = sqlx::query("DELETE FROM invitation_code WHERE code = ?1")
            .bind(code)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AuthError::NotFound("Invitation code not found".to_string()));
        }

        Ok(())
    }

    /// Get invitation code details
    pub async fn get(&self, code: &str) -> AuthResult<Option<InvitationCode>> {
        let row = sqlx::query(
            "SELECT code, roles, created_at FROM invitation_code WHERE code = ?1",
        )
        .bind(code)
        .fetch_optional(&self.db)
        .await?;

        row.map(|row| Self::from_row(&row)).transpose()
    }

    /// List outstanding codes, oldest first
    pub async fn list(&self) -> AuthResult<Vec<InvitationCode>> {
        let rows = sqlx::query(
            "SELECT code, roles, created_at FROM invitation_code ORDER BY created_at, code",
        )
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(Self::from_row).collect()
    }

    fn from_row(row: &sqlx::sqlite::SqliteRow) -> AuthResult<InvitationCode> {
        let raw: String = row.try_get("roles")?;
        Ok(InvitationCode {
            code: row.try_get("code")?,
            roles: decode_roles(&raw)?,
            created_at: row.try_get("created_at")?,
        })
    }
}

fn validate_code(code: &str) -> AuthResult<()> {
    if code.trim().is_empty() {
        return Err(AuthError::Validation(
            "Invitation code cannot be empty".to_string(),
        ));
    }

    if code.len() > 255 || code.chars().any(char::is_whitespace) {
        return Err(AuthError::Validation(
            "Invitation code must be at most 255 characters without spaces".to_string(),
        ));
    }

    Ok(())
}
