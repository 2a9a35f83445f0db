/// Session tracking
///
/// Two layers live here. The account-level `session_active` flag marks the
/// single current principal; a partial unique index keeps it held by at
/// most one account. Keyed sessions back bearer tokens: the caller gets a
/// random token and only its SHA-256 digest is stored.
use crate::{
    account::ValidatedSession,
    clock::{expires_after, SharedClock},
    crypto::{generate_secret, token_digest},
    db::account::{
        from_millis, to_millis, Account, AccountRow, Session, SessionRow, ACCOUNT_COLUMNS,
    },
    error::{AuthError, AuthResult},
};
use chrono::Duration;
use sqlx::SqlitePool;
use uuid::Uuid;

/// Session tracker
#[derive(Clone)]
pub struct SessionTracker {
    db: SqlitePool,
    clock: SharedClock,
}

impl SessionTracker {
    pub fn new(db: SqlitePool, clock: SharedClock) -> Self {
        Self { db, clock }
    }

    /// Make `username` the current principal, clearing whoever held it
    pub async fn mark_active(&self, username: &str) -> AuthResult<()> {
        let mut tx = self.db.begin().await?;

        sqlx::query("UPDATE account SET session_active = 0 WHERE session_active = 1 AND username != ?1")
            .bind(username)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("UPDATE account SET session_active = 1 WHERE username = ?1")
            .bind(username)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            // Dropping the transaction rolls back the clear above
            return Err(AuthError::NotFound(format!("Account {} not found", username)));
        }

        tx.commit().await?;

        tracing::debug!("Session flag moved to {}", username);
        Ok(())
    }

    /// Clear the flag for `username`; a no-op if it was not set
    pub async fn mark_inactive(&self, username: &str) -> AuthResult<()> {
        let result = sqlx::query("UPDATE account SET session_active = 0 WHERE username = ?1")
            .bind(username)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AuthError::NotFound(format!("Account {} not found", username)));
        }

        Ok(())
    }

    /// Account currently holding the session flag, if any
    pub async fn current_principal(&self) -> AuthResult<Option<Account>> {
        let query = format!(
            "SELECT {} FROM account WHERE session_active = 1",
            ACCOUNT_COLUMNS
        );

        let row = sqlx::query_as::<_, AccountRow>(&query)
            .fetch_optional(&self.db)
            .await?;

        row.map(Account::try_from).transpose()
    }

    /// Open a keyed session for an existing account
    pub async fn open_session(&self, username: &str, ttl: Duration) -> AuthResult<Session> {
        if ttl <= Duration::zero() {
            return Err(AuthError::Validation(
                "Session lifetime must be positive".to_string(),
            ));
        }

        let id = Uuid::new_v4().to_string();
        let token = generate_secret(48);
        let now = self.clock.now();
        let expires_at = expires_after(now, ttl)?;

        // Selecting from account makes a missing username insert nothing
        let result = sqlx::query(
            r#"
            INSERT INTO session (id, token_hash, username, created_at, expires_at)
            SELECT ?1, ?2, username, ?3, ?4 FROM account WHERE username = ?5
            "#,
        )
        .bind(&id)
        .bind(token_digest(&token))
        .bind(now)
        .bind(to_millis(expires_at))
        .bind(username)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AuthError::NotFound(format!("Account {} not found", username)));
        }

        tracing::debug!("Opened session {} for {}", id, username);

        Ok(Session {
            id,
            token,
            username: username.to_string(),
            created_at: now,
            expires_at,
        })
    }

    /// Resolve a bearer token to its live session
    pub async fn validate_token(&self, token: &str) -> AuthResult<ValidatedSession> {
        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT id, username, created_at, expires_at FROM session WHERE token_hash = ?1",
        )
        .bind(token_digest(token))
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AuthError::Authentication("Invalid session token".to_string()))?;

        let expires_at = from_millis(row.expires_at)?;
        if to_millis(self.clock.now()) > row.expires_at {
            return Err(AuthError::Authentication("Session expired".to_string()));
        }

        Ok(ValidatedSession {
            session_id: row.id,
            username: row.username,
            expires_at,
        })
    }

    /// Account owning the live session behind `token`
    pub async fn resolve_session(&self, token: &str) -> AuthResult<Account> {
        let validated = self.validate_token(token).await?;

        let query = format!("SELECT {} FROM account WHERE username = ?1", ACCOUNT_COLUMNS);
        let row = sqlx::query_as::<_, AccountRow>(&query)
            .bind(&validated.username)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AuthError::Authentication("Invalid session token".to_string()))?;

        Account::try_from(row)
    }

    /// Close the session behind `token`, returning its owner
    pub async fn close_session(&self, token: &str) -> AuthResult<String> {
        let row = sqlx::query_as::<_, (String,)>(
            "DELETE FROM session WHERE token_hash = ?1 RETURNING username",
        )
        .bind(token_digest(token))
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AuthError::NotFound("Session not found".to_string()))?;

        Ok(row.0)
    }

    /// Close every session `username` holds
    pub async fn close_all_sessions(&self, username: &str) -> AuthResult<u64> {
        let result = sqlx::query("DELETE FROM session WHERE username = ?1")
            .bind(username)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected())
    }

    /// Number of unexpired sessions `username` holds
    pub async fn count_sessions(&self, username: &str) -> AuthResult<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM session WHERE username = ?1 AND expires_at >= ?2",
        )
        .bind(username)
        .bind(to_millis(self.clock.now()))
        .fetch_one(&self.db)
        .await?;

        Ok(count)
    }

    /// Delete sessions past their expiry and release the principal flag of
    /// any holder left without a live session
    pub async fn purge_expired(&self) -> AuthResult<u64> {
        let now = to_millis(self.clock.now());
        let mut tx = self.db.begin().await?;

        let result = sqlx::query("DELETE FROM session WHERE expires_at < ?1")
            .bind(now)
            .execute(&mut *tx)
            .await?;

        let released = sqlx::query(
            r#"
            UPDATE account SET session_active = 0
            WHERE session_active = 1 AND NOT EXISTS (
                SELECT 1 FROM session
                WHERE session.username = account.username AND session.expires_at >= ?1
            )
            "#,
        )
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        if released.rows_affected() > 0 {
            tracing::debug!("Released principal flag after session expiry");
        }

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        account::{AccountStore, NewAccount},
        admin::roles::Role,
        clock::ManualClock,
        db,
    };
    use std::sync::Arc;

    struct Fixture {
        sessions: SessionTracker,
        accounts: AccountStore,
        clock: ManualClock,
    }

    async fn fixture() -> Fixture {
        let pool = db::memory_pool().await.unwrap();
        let clock = ManualClock::default();
        let shared: SharedClock = Arc::new(clock.clone());

        Fixture {
            sessions: SessionTracker::new(pool.clone(), shared.clone()),
            accounts: AccountStore::new(pool, shared),
            clock,
        }
    }

    async fn create(accounts: &AccountStore, username: &str) {
        accounts
            .create(NewAccount {
                username: username.to_string(),
                roles: [Role::Student].into_iter().collect(),
                ..Default::default()
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_mark_active_moves_flag() {
        let f = fixture().await;
        create(&f.accounts, "bob").await;
        create(&f.accounts, "carol").await;

        assert!(f.sessions.current_principal().await.unwrap().is_none());

        f.sessions.mark_active("bob").await.unwrap();
        let current = f.sessions.current_principal().await.unwrap().unwrap();
        assert_eq!(current.username, "bob");

        f.sessions.mark_active("carol").await.unwrap();
        let current = f.sessions.current_principal().await.unwrap().unwrap();
        assert_eq!(current.username, "carol");

        let bob = f.accounts.find_by_username("bob").await.unwrap();
        assert!(!bob.session_active);
    }

    #[tokio::test]
    async fn test_mark_active_is_idempotent() {
        let f = fixture().await;
        create(&f.accounts, "bob").await;

        f.sessions.mark_active("bob").await.unwrap();
        f.sessions.mark_active("bob").await.unwrap();

        let current = f.sessions.current_principal().await.unwrap().unwrap();
        assert_eq!(current.username, "bob");
    }

    #[tokio::test]
    async fn test_mark_active_unknown_keeps_holder() {
        let f = fixture().await;
        create(&f.accounts, "bob").await;
        f.sessions.mark_active("bob").await.unwrap();

        assert!(matches!(
            f.sessions.mark_active("ghost").await,
            Err(AuthError::NotFound(_))
        ));

        let current = f.sessions.current_principal().await.unwrap().unwrap();
        assert_eq!(current.username, "bob");
    }

    #[tokio::test]
    async fn test_mark_inactive() {
        let f = fixture().await;
        create(&f.accounts, "bob").await;
        create(&f.accounts, "carol").await;
        f.sessions.mark_active("bob").await.unwrap();

        // Clearing someone else leaves the holder alone
        f.sessions.mark_inactive("carol").await.unwrap();
        assert!(f.sessions.current_principal().await.unwrap().is_some());

        f.sessions.mark_inactive("bob").await.unwrap();
        assert!(f.sessions.current_principal().await.unwrap().is_none());

        assert!(matches!(
            f.sessions.mark_inactive("ghost").await,
            Err(AuthError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_open_and_validate_session() {
        let f = fixture().await;
        create(&f.accounts, "bob").await;

        let session = f
            .sessions
            .open_session("bob", Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(session.token.len(), 48);

        let validated = f.sessions.validate_token(&session.token).await.unwrap();
        assert_eq!(validated.username, "bob");
        assert_eq!(validated.session_id, session.id);

        assert!(matches!(
            f.sessions.validate_token("not-a-token").await,
            Err(AuthError::Authentication(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_session() {
        let f = fixture().await;
        create(&f.accounts, "bob").await;

        let session = f
            .sessions
            .open_session("bob", Duration::hours(1))
            .await
            .unwrap();

        let account = f.sessions.resolve_session(&session.token).await.unwrap();
        assert_eq!(account.username, "bob");
        assert!(account.has_role(Role::Student));
    }

    #[tokio::test]
    async fn test_session_for_missing_account() {
        let f = fixture().await;
        assert!(matches!(
            f.sessions.open_session("ghost", Duration::hours(1)).await,
            Err(AuthError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_session_expiry_and_purge() {
        let f = fixture().await;
        create(&f.accounts, "bob").await;

        let short = f
            .sessions
            .open_session("bob", Duration::minutes(1))
            .await
            .unwrap();
        let long = f
            .sessions
            .open_session("bob", Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(f.sessions.count_sessions("bob").await.unwrap(), 2);

        f.clock.advance(Duration::minutes(2));
        assert!(matches!(
            f.sessions.validate_token(&short.token).await,
            Err(AuthError::Authentication(_))
        ));
        assert!(f.sessions.validate_token(&long.token).await.is_ok());

        assert_eq!(f.sessions.purge_expired().await.unwrap(), 1);
        assert_eq!(f.sessions.count_sessions("bob").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_purge_releases_flag_only_without_live_session() {
        let f = fixture().await;
        create(&f.accounts, "bob").await;

        f.sessions
            .open_session("bob", Duration::minutes(1))
            .await
            .unwrap();
        let long = f
            .sessions
            .open_session("bob", Duration::hours(1))
            .await
            .unwrap();
        f.sessions.mark_active("bob").await.unwrap();

        // One session still live: the flag stays
        f.clock.advance(Duration::minutes(2));
        assert_eq!(f.sessions.purge_expired().await.unwrap(), 1);
        let current = f.sessions.current_principal().await.unwrap().unwrap();
        assert_eq!(current.username, "bob");

        f.clock.advance(Duration::hours(2));
        assert_eq!(f.sessions.purge_expired().await.unwrap(), 1);
        assert!(f.sessions.validate_token(&long.token).await.is_err());
        assert!(f.sessions.current_principal().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unrepresentable_session_ttl_is_rejected() {
        let f = fixture().await;
        create(&f.accounts, "bob").await;

        assert!(matches!(
            f.sessions.open_session("bob", Duration::MAX).await,
            Err(AuthError::Validation(_))
        ));
        assert_eq!(f.sessions.count_sessions("bob").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_close_sessions() {
        let f = fixture().await;
        create(&f.accounts, "bob").await;

        let first = f
            .sessions
            .open_session("bob", Duration::hours(1))
            .await
            .unwrap();
        let second = f
            .sessions
            .open_session("bob", Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(f.sessions.close_session(&first.token).await.unwrap(), "bob");
        assert!(f.sessions.validate_token(&first.token).await.is_err());
        assert!(matches!(
            f.sessions.close_session(&first.token).await,
            Err(AuthError::NotFound(_))
        ));

        assert_eq!(f.sessions.close_all_sessions("bob").await.unwrap(), 1);
        assert!(f.sessions.validate_token(&second.token).await.is_err());
    }

    #[tokio::test]
    async fn test_removing_account_drops_sessions() {
        let f = fixture().await;
        create(&f.accounts, "bob").await;

        let session = f
            .sessions
            .open_session("bob", Duration::hours(1))
            .await
            .unwrap();
        f.accounts.remove("bob").await.unwrap();

        assert!(f.sessions.validate_token(&session.token).await.is_err());
    }
}
