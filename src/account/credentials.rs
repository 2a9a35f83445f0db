/// Password verification and one-time reset codes
use crate::{
    account::AccountStore,
    clock::{expires_after, SharedClock},
    config::CredentialConfig,
    crypto::{generate_secret, password},
    db::account::{from_millis, to_millis, OneTimeCode},
    error::{AuthError, AuthResult},
};
use chrono::Duration;
use sqlx::{Row, SqlitePool};

/// Credential manager
#[derive(Clone)]
pub struct CredentialManager {
    db: SqlitePool,
    accounts: AccountStore,
    clock: SharedClock,
    config: CredentialConfig,
}

impl CredentialManager {
    pub fn new(
        db: SqlitePool,
        accounts: AccountStore,
        clock: SharedClock,
        config: CredentialConfig,
    ) -> Self {
        Self {
            db,
            accounts,
            clock,
            config,
        }
    }

    /// True iff the account exists and `candidate` matches its password.
    ///
    /// Accounts without a password, and temporary passwords past their
    /// expiry, never match.
    pub async fn validate_password(&self, username: &str, candidate: &str) -> AuthResult<bool> {
        let account = self.accounts.find_by_username(username).await?;

        if account.is_one_time {
            if let Some(expires_at) = account.password_expires_at {
                if to_millis(self.clock.now()) > to_millis(expires_at) {
                    return Ok(false);
                }
            }
        }

        match account.password_hash {
            Some(ref hash) => password::verify(candidate, hash),
            None => Ok(false),
        }
    }

    /// Issue a fresh one-time code valid for `ttl`, replacing any pending one
    pub async fn issue_one_time_code(&self, username: &str, ttl: Duration) -> AuthResult<OneTimeCode> {
        if ttl <= Duration::zero() {
            return Err(AuthError::Validation(
                "One-time code lifetime must be positive".to_string(),
            ));
        }

        let code = generate_secret(self.config.one_time_code_length);
        let expires_at = expires_after(self.clock.now(), ttl)?;

        let result = sqlx::query(
            "UPDATE account SET onetime_code = ?1, onetime_expires_at = ?2 WHERE username = ?3",
        )
        .bind(&code)
        .bind(to_millis(expires_at))
        .bind(username)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AuthError::NotFound(format!("Account {} not found", username)));
        }

        tracing::info!("Issued one-time code for {} (expires {})", username, expires_at);

        Ok(OneTimeCode { code, expires_at })
    }

    /// Issue a one-time code with the configured lifetime
    pub async fn issue_default_one_time_code(&self, username: &str) -> AuthResult<OneTimeCode> {
        self.issue_one_time_code(username, self.config.one_time_code_ttl()?)
            .await
    }

    /// Flag the account for reset and issue its one-time code in one write
    pub async fn require_reset(&self, username: &str) -> AuthResult<OneTimeCode> {
        let code = generate_secret(self.config.one_time_code_length);
        let expires_at = expires_after(self.clock.now(), self.config.one_time_code_ttl()?)?;

        let result = sqlx::query(
            "UPDATE account SET is_reset = 1, onetime_code = ?1, onetime_expires_at = ?2 WHERE username = ?3",
        )
        .bind(&code)
        .bind(to_millis(expires_at))
        .bind(username)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AuthError::NotFound(format!("Account {} not found", username)));
        }

        tracing::info!("Account {} flagged for reset", username);

        Ok(OneTimeCode { code, expires_at })
    }

    /// Check a candidate code without consuming it, reporting why it fails
    pub async fn check_one_time_code(&self, username: &str, candidate: &str) -> AuthResult<()> {
        let row = sqlx::query(
            "SELECT onetime_code, onetime_expires_at FROM account WHERE username = ?1",
        )
        .bind(username)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AuthError::NotFound(format!("Account {} not found", username)))?;

        let stored: Option<String> = row.try_get("onetime_code")?;
        let expires_at: Option<i64> = row.try_get("onetime_expires_at")?;

        let (stored, expires_at) = match (stored, expires_at) {
            (Some(code), Some(expires_at)) => (code, from_millis(expires_at)?),
            _ => return Err(AuthError::NoPendingCode(username.to_string())),
        };

        // A mismatch is reported as such even when the pending code expired
        if stored != candidate {
            return Err(AuthError::WrongCode);
        }

        // Stored at millisecond precision; compare at the same precision
        if to_millis(self.clock.now()) > to_millis(expires_at) {
            return Err(AuthError::ExpiredCode);
        }

        Ok(())
    }

    /// True iff a code is pending, equals `candidate`, and has not expired.
    ///
    /// Read-only: the code stays pending. Reset flows should use
    /// [`consume_one_time_code`](Self::consume_one_time_code) instead.
    pub async fn validate_one_time_code(&self, username: &str, candidate: &str) -> AuthResult<bool> {
        match self.check_one_time_code(username, candidate).await {
            Ok(()) => Ok(true),
            Err(AuthError::WrongCode | AuthError::ExpiredCode | AuthError::NoPendingCode(_)) => {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Validate and clear the pending code in a single conditional write so
    /// a code can only ever be used once.
    pub async fn consume_one_time_code(&self, username: &str, candidate: &str) -> AuthResult<()> {
        let now = self.clock.now();

        let result = sqlx::query(
            "UPDATE account SET onetime_code = NULL, onetime_expires_at = NULL
             WHERE username = ?1 AND onetime_code = ?2 AND onetime_expires_at >= ?3",
        )
        .bind(username)
        .bind(candidate)
        .bind(to_millis(now))
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 1 {
            tracing::info!("One-time code consumed for {}", username);
            return Ok(());
        }

        // Nothing consumed; work out why for the caller
        match self.check_one_time_code(username, candidate).await {
            Err(e) => Err(e),
            // Another caller replaced the code between the two statements
            Ok(()) => Err(AuthError::WrongCode),
        }
    }

    /// Drop any pending one-time code
    pub async fn clear_one_time_code(&self, username: &str) -> AuthResult<()> {
        let result = sqlx::query(
            "UPDATE account SET onetime_code = NULL, onetime_expires_at = NULL WHERE username = ?1",
        )
        .bind(username)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AuthError::NotFound(format!("Account {} not found", username)));
        }

        Ok(())
    }

    /// Replace the password.
    ///
    /// Clears the temporary-password and reset flags, and any pending
    /// one-time code so a stale code cannot be replayed.
    pub async fn update_password(&self, username: &str, new_password: &str) -> AuthResult<()> {
        validate_password_strength(new_password)?;

        let password_hash = password::hash(new_password)?;

        let result = sqlx::query(
            "UPDATE account
             SET password_hash = ?1, onetime = 0, password_expires_at = NULL, is_reset = 0,
                 onetime_code = NULL, onetime_expires_at = NULL
             WHERE username = ?2",
        )
        .bind(&password_hash)
        .bind(username)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AuthError::NotFound(format!("Account {} not found", username)));
        }

        tracing::info!("Password updated for {}", username);
        Ok(())
    }

    /// Clear every one-time code whose window has closed
    pub async fn purge_expired_codes(&self) -> AuthResult<u64> {
        let result = sqlx::query(
            "UPDATE account SET onetime_code = NULL, onetime_expires_at = NULL
             WHERE onetime_expires_at IS NOT NULL AND onetime_expires_at < ?1",
        )
        .bind(to_millis(self.clock.now()))
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected())
    }
}

/// Minimal password policy
pub(crate) fn validate_password_strength(password: &str) -> AuthResult<()> {
    if password.is_empty() {
        return Err(AuthError::Validation("Password cannot be empty".to_string()));
    }

    if password.chars().count() < 8 {
        return Err(AuthError::Validation(
            "Password must be at least 8 characters".to_string(),
        ));
    }

    Ok(())
}
