/// Persistence-backed CRUD for account records
///
/// Every call goes to SQLite; nothing is cached in memory.
use crate::{
    account::{AccountField, NewAccount},
    clock::SharedClock,
    db::account::{encode_roles, to_millis, Account, AccountRow, ACCOUNT_COLUMNS},
    error::{AuthError, AuthResult},
};
use sqlx::SqlitePool;
use validator::ValidateEmail;

/// Account store
#[derive(Clone)]
pub struct AccountStore {
    db: SqlitePool,
    clock: SharedClock,
}

impl AccountStore {
    pub fn new(db: SqlitePool, clock: SharedClock) -> Self {
        Self { db, clock }
    }

    /// Create a new account
    pub async fn create(&self, account: NewAccount) -> AuthResult<Account> {
        self.validate_new(&account)?;

        if self.exists(&account.username).await? {
            return Err(AuthError::Conflict(format!(
                "Username {} already taken",
                account.username
            )));
        }

        let now = self.clock.now();
        let result = sqlx::query(
            "INSERT INTO account (username, password_hash, email, full_name, roles, onetime, password_expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&account.username)
        .bind(&account.password_hash)
        .bind(&account.email)
        .bind(&account.full_name)
        .bind(encode_roles(&account.roles))
        .bind(account.is_one_time)
        .bind(account.one_time_expiry.map(to_millis))
        .bind(now)
        .execute(&self.db)
        .await
        .map_err(|e| {
            AuthError::from_write(e, || format!("Username {} already taken", account.username))
        })?;

        Ok(Self::inserted(result.last_insert_rowid(), account, now))
    }

    /// Create the first account; fails with `Conflict` once any account exists
    pub async fn create_first(&self, account: NewAccount) -> AuthResult<Account> {
        self.validate_new(&account)?;

        let now = self.clock.now();
        let result = sqlx::query(
            "INSERT INTO account (username, password_hash, email, full_name, roles, onetime, password_expires_at, created_at)
             SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8
             WHERE NOT EXISTS (SELECT 1 FROM account)",
        )
        .bind(&account.username)
        .bind(&account.password_hash)
        .bind(&account.email)
        .bind(&account.full_name)
        .bind(encode_roles(&account.roles))
        .bind(account.is_one_time)
        .bind(account.one_time_expiry.map(to_millis))
        .bind(now)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AuthError::Conflict(
                "Initial account has already been set up".to_string(),
            ));
        }

        Ok(Self::inserted(result.last_insert_rowid(), account, now))
    }

    /// Find account by username
    pub async fn find_by_username(&self, username: &str) -> AuthResult<Account> {
        let sql = format!("SELECT {} FROM account WHERE username = ?1", ACCOUNT_COLUMNS);
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(username)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AuthError::NotFound(format!("Account {} not found", username)))?;

        Account::try_from(row)
    }

    /// Update one descriptive or flag field
    pub async fn update_field(&self, username: &str, field: AccountField) -> AuthResult<()> {
        let query = match &field {
            AccountField::Email(email) => {
                if let Some(email) = email {
                    validate_email(email)?;
                }
                sqlx::query("UPDATE account SET email = ?1 WHERE username = ?2").bind(email.clone())
            }
            AccountField::FullName(name) => {
                sqlx::query("UPDATE account SET full_name = ?1 WHERE username = ?2").bind(name.clone())
            }
            AccountField::Roles(roles) => {
                sqlx::query("UPDATE account SET roles = ?1 WHERE username = ?2").bind(encode_roles(roles))
            }
            AccountField::IsReset(flag) => {
                sqlx::query("UPDATE account SET is_reset = ?1 WHERE username = ?2").bind(*flag)
            }
            AccountField::IsOneTime(flag) => {
                sqlx::query("UPDATE account SET onetime = ?1 WHERE username = ?2").bind(*flag)
            }
        };

        let result = query.bind(username).execute(&self.db).await?;

        if result.rows_affected() == 0 {
            return Err(AuthError::NotFound(format!("Account {} not found", username)));
        }

        tracing::debug!("Updated {} for {}", field.name(), username);
        Ok(())
    }

    /// Delete an account; its keyed sessions go with it
    pub async fn remove(&self, username: &str) -> AuthResult<()> {
        let result = sqlx::query("DELETE FROM account WHERE username = ?1")
            .bind(username)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AuthError::NotFound(format!("Account {} not found", username)));
        }

        tracing::info!("Removed account {}", username);
        Ok(())
    }

    /// All accounts in creation order
    pub async fn list_all(&self) -> AuthResult<Vec<Account>> {
        let sql = format!("SELECT {} FROM account ORDER BY id", ACCOUNT_COLUMNS);
        let rows = sqlx::query_as::<_, AccountRow>(&sql)
            .fetch_all(&self.db)
            .await?;

        rows.into_iter().map(Account::try_from).collect()
    }

    /// Number of accounts
    pub async fn count(&self) -> AuthResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM account")
            .fetch_one(&self.db)
            .await?;

        Ok(count)
    }

    /// True when no account has been created yet
    pub async fn is_empty(&self) -> AuthResult<bool> {
        Ok(self.count().await? == 0)
    }

    /// Check if username exists
    pub async fn exists(&self, username: &str) -> AuthResult<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM account WHERE username = ?1")
            .bind(username)
            .fetch_one(&self.db)
            .await?;

        Ok(count > 0)
    }

    fn validate_new(&self, account: &NewAccount) -> AuthResult<()> {
        validate_username(&account.username)?;

        if let Some(ref email) = account.email {
            validate_email(email)?;
        }

        if account.roles.is_empty() {
            return Err(AuthError::Validation(
                "Account must hold at least one role".to_string(),
            ));
        }

        if account.one_time_expiry.is_some() && !account.is_one_time {
            return Err(AuthError::Validation(
                "Password expiry only applies to one-time passwords".to_string(),
            ));
        }

        Ok(())
    }

    fn inserted(id: i64, account: NewAccount, now: chrono::DateTime<chrono::Utc>) -> Account {
        Account {
            id,
            username: account.username,
            password_hash: account.password_hash,
            email: account.email,
            full_name: account.full_name,
            roles: account.roles,
            is_one_time: account.is_one_time,
            password_expires_at: account.one_time_expiry,
            one_time_code: None,
            is_reset: false,
            session_active: false,
            created_at: now,
        }
    }
}

/// Validate username format
pub fn validate_username(username: &str) -> AuthResult<()> {
    if username.trim().is_empty() {
        return Err(AuthError::Validation("Username cannot be empty".to_string()));
    }

    if username.len() > 255 {
        return Err(AuthError::Validation("Username too long".to_string()));
    }

    if username.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(AuthError::Validation(
            "Username cannot contain whitespace".to_string(),
        ));
    }

    Ok(())
}

/// Validate email format
fn validate_email(email: &str) -> AuthResult<()> {
    if !email.validate_email() {
        return Err(AuthError::Validation("Invalid email format".to_string()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        admin::roles::{Role, RoleSet},
        clock::SystemClock,
        db,
    };
    use std::sync::Arc;

    async fn store() -> AccountStore {
        let pool = db::memory_pool().await.unwrap();
        AccountStore::new(pool, Arc::new(SystemClock))
    }

    fn student(username: &str) -> NewAccount {
        NewAccount {
            username: username.to_string(),
            roles: [Role::Student].into_iter().collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let store = store().await;

        let created = store
            .create(NewAccount {
                email: Some("alice@example.com".to_string()),
                full_name: Some("Alice Liddell".to_string()),
                ..student("alice")
            })
            .await
            .unwrap();

        let found = store.find_by_username("alice").await.unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(found.email.as_deref(), Some("alice@example.com"));
        assert_eq!(found.full_name.as_deref(), Some("Alice Liddell"));
        assert!(found.has_role(Role::Student));
        assert!(!found.has_password());
        assert!(!found.session_active);
        assert!(found.one_time_code.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_username() {
        let store = store().await;

        store.create(student("dup")).await.unwrap();
        let result = store.create(student("dup")).await;

        match result.unwrap_err() {
            AuthError::Conflict(_) => {}
            other => panic!("Expected Conflict error, got {:?}", other),
        }
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_create_validation() {
        let store = store().await;

        assert!(matches!(
            store.create(student("")).await,
            Err(AuthError::Validation(_))
        ));
        assert!(matches!(
            store.create(student("two words")).await,
            Err(AuthError::Validation(_))
        ));
        assert!(matches!(
            store
                .create(NewAccount {
                    roles: RoleSet::new(),
                    ..student("noroles")
                })
                .await,
            Err(AuthError::Validation(_))
        ));
        assert!(matches!(
            store
                .create(NewAccount {
                    email: Some("not-an-email".to_string()),
                    ..student("bademail")
                })
                .await,
            Err(AuthError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_find_missing() {
        let store = store().await;
        assert!(matches!(
            store.find_by_username("ghost").await,
            Err(AuthError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_field() {
        let store = store().await;
        store.create(student("bob")).await.unwrap();

        store
            .update_field("bob", AccountField::FullName(Some("Bob Builder".to_string())))
            .await
            .unwrap();
        store
            .update_field(
                "bob",
                AccountField::Roles([Role::Instructor, Role::Student].into_iter().collect()),
            )
            .await
            .unwrap();
        store
            .update_field("bob", AccountField::IsReset(true))
            .await
            .unwrap();

        let bob = store.find_by_username("bob").await.unwrap();
        assert_eq!(bob.full_name.as_deref(), Some("Bob Builder"));
        assert_eq!(bob.roles.len(), 2);
        assert!(bob.is_reset);

        assert!(matches!(
            store
                .update_field("ghost", AccountField::IsReset(true))
                .await,
            Err(AuthError::NotFound(_))
        ));
        assert!(matches!(
            store
                .update_field("bob", AccountField::Email(Some("nope".to_string())))
                .await,
            Err(AuthError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_remove() {
        let store = store().await;
        store.create(student("carol")).await.unwrap();

        store.remove("carol").await.unwrap();
        assert!(!store.exists("carol").await.unwrap());

        assert!(matches!(
            store.remove("carol").await,
            Err(AuthError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_all_in_creation_order() {
        let store = store().await;
        for name in ["zed", "amy", "mia"] {
            store.create(student(name)).await.unwrap();
        }

        let names: Vec<String> = store
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.username)
            .collect();
        assert_eq!(names, vec!["zed", "amy", "mia"]);
    }

    #[tokio::test]
    async fn test_ids_are_not_reused() {
        let store = store().await;
        let first = store.create(student("one")).await.unwrap();
        store.remove("one").await.unwrap();
        let second = store.create(student("one")).await.unwrap();
        assert!(second.id > first.id);
    }

    #[tokio::test]
    async fn test_create_first_only_once() {
        let store = store().await;
        assert!(store.is_empty().await.unwrap());

        store.create_first(student("root")).await.unwrap();
        assert!(!store.is_empty().await.unwrap());

        assert!(matches!(
            store.create_first(student("other")).await,
            Err(AuthError::Conflict(_))
        ));
    }
}
