/// Account manager
///
/// Ties the store, credentials, sessions and invitation registry together
/// into the flows the service exposes: setup, login, logout, invitation
/// redemption and password reset.

use crate::{
    account::{
        credentials::validate_password_strength, AccountField, AccountStore, CompleteResetRequest,
        CreateAccountRequest, CreatedAccount, CredentialManager, LoginOutcome, NewAccount,
        OneTimeCodeResponse, RedeemInvitationRequest, SessionInfo, SessionTracker, SetupRequest,
        validate_username,
    },
    admin::{
        invites::InvitationCodeRegistry,
        roles::{Resolution, Role, RoleResolver, RoleSet},
    },
    clock::{expires_after, SharedClock},
    config::ServerConfig,
    crypto::password,
    db::account::Account,
    error::{AuthError, AuthResult},
    metrics,
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Account manager service
#[derive(Clone)]
pub struct AccountManager {
    accounts: AccountStore,
    credentials: CredentialManager,
    sessions: SessionTracker,
    invites: InvitationCodeRegistry,
    clock: SharedClock,
    config: Arc<ServerConfig>,
}

impl AccountManager {
    /// Create a new account manager
    pub fn new(db: SqlitePool, config: Arc<ServerConfig>, clock: SharedClock) -> Self {
        let accounts = AccountStore::new(db.clone(), clock.clone());
        let credentials = CredentialManager::new(
            db.clone(),
            accounts.clone(),
            clock.clone(),
            config.credentials.clone(),
        );
        let sessions = SessionTracker::new(db.clone(), clock.clone());
        let invites = InvitationCodeRegistry::new(db, clock.clone());

        Self {
            accounts,
            credentials,
            sessions,
            invites,
            clock,
            config,
        }
    }

    pub fn accounts(&self) -> &AccountStore {
        &self.accounts
    }

    pub fn credentials(&self) -> &CredentialManager {
        &self.credentials
    }

    pub fn sessions(&self) -> &SessionTracker {
        &self.sessions
    }

    pub fn invites(&self) -> &InvitationCodeRegistry {
        &self.invites
    }

    /// Create the first administrator. Only succeeds while no account exists.
    pub async fn bootstrap_admin(&self, request: SetupRequest) -> AuthResult<Account> {
        validate_password_strength(&request.password)?;

        let account = self
            .accounts
            .create_first(NewAccount {
                username: request.username,
                password_hash: Some(password::hash(&request.password)?),
                email: request.email,
                full_name: request.full_name,
                roles: [Role::Admin].into_iter().collect(),
                ..Default::default()
            })
            .await?;

        metrics::record_account_creation("setup");
        tracing::info!("Bootstrapped administrator {}", account.username);

        Ok(account)
    }

    /// Administrator-driven account creation.
    ///
    /// With a password, it is stored as a temporary one that stops working
    /// after the configured lifetime. Without one, the account is flagged for
    /// reset and a one-time code is returned for the administrator to hand out.
    pub async fn create_account(&self, request: CreateAccountRequest) -> AuthResult<CreatedAccount> {
        if request.roles.is_empty() {
            return Err(AuthError::Validation(
                "Account must be created with at least one role".to_string(),
            ));
        }

        let mut new_account = NewAccount {
            username: request.username,
            email: request.email,
            full_name: request.full_name,
            roles: request.roles,
            ..Default::default()
        };

        if let Some(ref temporary) = request.password {
            validate_password_strength(temporary)?;
            new_account.password_hash = Some(password::hash(temporary)?);
            new_account.is_one_time = true;
            new_account.one_time_expiry = Some(expires_after(
                self.clock.now(),
                self.config.credentials.temporary_password_ttl()?,
            )?);
        }

        let account = self.accounts.create(new_account).await?;
        metrics::record_account_creation("admin");

        let one_time_code = if account.has_password() {
            None
        } else {
            let issued = self.credentials.require_reset(&account.username).await?;
            metrics::record_code_issued("setup");
            Some(OneTimeCodeResponse {
                username: account.username.clone(),
                code: issued.code,
                expires_at: issued.expires_at,
            })
        };

        tracing::info!(
            "Created account {} with roles {:?}",
            account.username,
            account.roles
        );

        // Re-read so the returned record reflects the reset flag
        let account = self.accounts.find_by_username(&account.username).await?;

        Ok(CreatedAccount {
            account,
            one_time_code,
        })
    }

    /// Log in with username and password.
    ///
    /// An account flagged for reset is sent to the reset flow before its
    /// password is looked at. Unknown usernames and wrong passwords are
    /// reported identically.
    pub async fn login(&self, username: &str, password: &str) -> AuthResult<LoginOutcome> {
        let account = match self.accounts.find_by_username(username).await {
            Ok(account) => account,
            Err(AuthError::NotFound(_)) => {
                metrics::record_login("failure");
                return Err(invalid_credentials());
            }
            Err(e) => return Err(e),
        };

        if account.is_reset {
            metrics::record_login("reset_required");
            tracing::info!("Login for {} redirected to reset", username);
            return Ok(LoginOutcome::ResetRequired {
                username: account.username,
            });
        }

        if !self.credentials.validate_password(username, password).await? {
            metrics::record_login("failure");
            tracing::debug!("Rejected password for {}", username);
            return Err(invalid_credentials());
        }

        let resolution = RoleResolver::resolve(&account.roles);
        if resolution == Resolution::NoRoles {
            metrics::record_login("no_roles");
            return Err(AuthError::NoRolesAssigned(account.username));
        }

        let session = self
            .sessions
            .open_session(username, self.config.sessions.ttl()?)
            .await?;
        self.sessions.mark_active(username).await?;

        metrics::record_login("success");
        tracing::info!("{} logged in", username);

        Ok(LoginOutcome::Authenticated {
            account,
            session,
            resolution,
        })
    }

    /// Pick the working role for a multi-role session
    pub async fn select_role(&self, token: &str, role: Role) -> AuthResult<Role> {
        let account = self.sessions.resolve_session(token).await?;
        RoleResolver::resolve(&account.roles).select(role)
    }

    /// Describe the account behind a session token
    pub async fn session_info(&self, token: &str) -> AuthResult<SessionInfo> {
        let session = self.sessions.validate_token(token).await?;
        let account = self.accounts.find_by_username(&session.username).await?;
        let resolution = RoleResolver::resolve(&account.roles);

        Ok(SessionInfo {
            username: account.username,
            email: account.email,
            full_name: account.full_name,
            roles: account.roles,
            resolution,
            expires_at: session.expires_at,
        })
    }

    /// End the session behind `token`.
    ///
    /// The principal flag is only released once the account has no other
    /// live session.
    pub async fn logout(&self, token: &str) -> AuthResult<()> {
        let username = self.sessions.close_session(token).await?;
        if self.sessions.count_sessions(&username).await? == 0 {
            self.sessions.mark_inactive(&username).await?;
        }

        tracing::info!("{} logged out", username);
        Ok(())
    }

    /// Create an account from an invitation code.
    ///
    /// The code is consumed before the account is written; if the write fails
    /// the code is put back so it can be used again.
    pub async fn redeem_invitation(&self, request: RedeemInvitationRequest) -> AuthResult<Account> {
        validate_username(&request.username)?;
        validate_password_strength(&request.password)?;

        // Refuse early so a taken username does not burn the code
        if self.accounts.exists(&request.username).await? {
            return Err(AuthError::Conflict(format!(
                "Username {} already taken",
                request.username
            )));
        }

        let password_hash = password::hash(&request.password)?;

        let roles = match self.invites.redeem(&request.code).await {
            Ok(roles) => roles,
            Err(e) => {
                metrics::record_invite_redeemed(false);
                return Err(e);
            }
        };

        let created = self
            .accounts
            .create(NewAccount {
                username: request.username,
                password_hash: Some(password_hash),
                email: request.email,
                full_name: request.full_name,
                roles: roles.clone(),
                ..Default::default()
            })
            .await;

        match created {
            Ok(account) => {
                metrics::record_invite_redeemed(true);
                metrics::record_account_creation("invite");
                tracing::info!(
                    "Invitation redeemed by {} for roles {:?}",
                    account.username,
                    account.roles
                );
                Ok(account)
            }
            Err(e) => {
                if let Err(restore_err) = self.invites.restore(&request.code, &roles).await {
                    tracing::error!("Failed to restore invitation code: {}", restore_err);
                }
                metrics::record_invite_redeemed(false);
                Err(e)
            }
        }
    }

    /// Flag an account for reset, end its sessions, and issue its code
    pub async fn request_reset(&self, username: &str) -> AuthResult<OneTimeCodeResponse> {
        let issued = self.credentials.require_reset(username).await?;

        let closed = self.sessions.close_all_sessions(username).await?;
        self.sessions.mark_inactive(username).await?;

        metrics::record_code_issued("reset");
        tracing::info!(
            "Reset requested for {} ({} sessions closed)",
            username,
            closed
        );

        Ok(OneTimeCodeResponse {
            username: username.to_string(),
            code: issued.code,
            expires_at: issued.expires_at,
        })
    }

    /// Replace the password using a one-time code
    pub async fn complete_reset(&self, request: CompleteResetRequest) -> AuthResult<()> {
        // Check the new password first so a rejected one does not burn the code
        validate_password_strength(&request.new_password)?;

        if let Err(e) = self
            .credentials
            .consume_one_time_code(&request.username, &request.code)
            .await
        {
            metrics::record_password_reset(false);
            return Err(e);
        }

        self.credentials
            .update_password(&request.username, &request.new_password)
            .await?;
        self.sessions.close_all_sessions(&request.username).await?;
        self.sessions.mark_inactive(&request.username).await?;

        metrics::record_password_reset(true);
        tracing::info!("Password reset completed for {}", request.username);

        Ok(())
    }

    /// Replace an account's role set
    pub async fn set_roles(&self, username: &str, roles: RoleSet) -> AuthResult<Account> {
        self.accounts
            .update_field(username, AccountField::Roles(roles))
            .await?;

        tracing::info!("Updated roles for {}", username);
        self.accounts.find_by_username(username).await
    }

    /// Delete an account
    pub async fn remove_account(&self, username: &str) -> AuthResult<()> {
        self.accounts.remove(username).await?;
        metrics::record_account_removal();
        Ok(())
    }

    /// Whether the currently active principal holds `role`
    pub async fn current_principal_has_role(&self, role: Role) -> AuthResult<bool> {
        let principal = self.sessions.current_principal().await?;
        Ok(RoleResolver::has_role(principal.as_ref(), role))
    }

    /// Drop expired sessions and one-time codes; returns (sessions, codes)
    pub async fn purge_expired(&self) -> AuthResult<(u64, u64)> {
        let sessions = self.sessions.purge_expired().await?;
        let codes = self.credentials.purge_expired_codes().await?;

        if sessions > 0 || codes > 0 {
            tracing::info!(
                "Purged {} expired sessions and {} expired one-time codes",
                sessions,
                codes
            );
        } else {
            tracing::debug!("Expiry cleanup: nothing to purge");
        }

        Ok((sessions, codes))
    }
}

fn invalid_credentials() -> AuthError {
    AuthError::Authentication("Invalid credentials".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::Duration;

    struct Fixture {
        manager: AccountManager,
        clock: ManualClock,
    }

    async fn fixture() -> Fixture {
        let pool = crate::db::memory_pool().await.unwrap();
        let clock = ManualClock::default();
        let manager = AccountManager::new(
            pool,
            Arc::new(ServerConfig::default()),
            Arc::new(clock.clone()),
        );
        Fixture { manager, clock }
    }

    fn roles(list: &[Role]) -> RoleSet {
        list.iter().copied().collect()
    }

    async fn setup_admin(manager: &AccountManager) -> Account {
        manager
            .bootstrap_admin(SetupRequest {
                username: "admin".to_string(),
                password: "correct-horse".to_string(),
                email: Some("admin@example.com".to_string()),
                full_name: Some("Site Admin".to_string()),
            })
            .await
            .unwrap()
    }

    async fn invite(manager: &AccountManager, code: &str, username: &str, granted: &[Role]) {
        manager
            .invites()
            .register(code, roles(granted))
            .await
            .unwrap();
        manager
            .redeem_invitation(RedeemInvitationRequest {
                code: code.to_string(),
                username: username.to_string(),
                password: "student-pass".to_string(),
                email: None,
                full_name: None,
            })
            .await
            .unwrap();
    }

    fn expect_authenticated(outcome: LoginOutcome) -> (Account, crate::db::account::Session, Resolution) {
        match outcome {
            LoginOutcome::Authenticated {
                account,
                session,
                resolution,
            } => (account, session, resolution),
            other => panic!("Expected Authenticated, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bootstrap_only_once() {
        let f = fixture().await;
        let admin = setup_admin(&f.manager).await;
        assert!(admin.has_role(Role::Admin));

        let again = f
            .manager
            .bootstrap_admin(SetupRequest {
                username: "other".to_string(),
                password: "correct-horse".to_string(),
                email: None,
                full_name: None,
            })
            .await;
        assert!(matches!(again, Err(AuthError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_login_success() {
        let f = fixture().await;
        setup_admin(&f.manager).await;

        let outcome = f.manager.login("admin", "correct-horse").await.unwrap();
        let (account, session, resolution) = expect_authenticated(outcome);
        assert_eq!(account.username, "admin");
        assert_eq!(resolution, Resolution::SingleRole(Role::Admin));

        let validated = f.manager.sessions().validate_token(&session.token).await.unwrap();
        assert_eq!(validated.username, "admin");

        assert!(f
            .manager
            .current_principal_has_role(Role::Admin)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_login_failures_look_alike() {
        let f = fixture().await;
        setup_admin(&f.manager).await;

        let wrong = f.manager.login("admin", "wrong-password").await.unwrap_err();
        let missing = f.manager.login("ghost", "wrong-password").await.unwrap_err();

        assert!(matches!(wrong, AuthError::Authentication(_)));
        assert_eq!(wrong.to_string(), missing.to_string());
    }

    #[tokio::test]
    async fn test_login_without_roles() {
        let f = fixture().await;
        setup_admin(&f.manager).await;
        invite(&f.manager, "CODE1", "student", &[Role::Student]).await;

        f.manager.set_roles("student", RoleSet::new()).await.unwrap();

        assert!(matches!(
            f.manager.login("student", "student-pass").await,
            Err(AuthError::NoRolesAssigned(_))
        ));
        // No session flag was granted
        assert!(f.manager.sessions().current_principal().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_multi_role_selection() {
        let f = fixture().await;
        setup_admin(&f.manager).await;
        invite(&f.manager, "CODE1", "lecturer", &[Role::Admin, Role::Instructor]).await;

        let outcome = f.manager.login("lecturer", "student-pass").await.unwrap();
        let (_, session, resolution) = expect_authenticated(outcome);
        assert_eq!(
            resolution,
            Resolution::AmbiguousRoles(roles(&[Role::Admin, Role::Instructor]))
        );

        let selected = f
            .manager
            .select_role(&session.token, Role::Instructor)
            .await
            .unwrap();
        assert_eq!(selected, Role::Instructor);

        assert!(matches!(
            f.manager.select_role(&session.token, Role::Student).await,
            Err(AuthError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_logout_clears_principal() {
        let f = fixture().await;
        setup_admin(&f.manager).await;

        let outcome = f.manager.login("admin", "correct-horse").await.unwrap();
        let (_, session, _) = expect_authenticated(outcome);

        f.manager.logout(&session.token).await.unwrap();

        assert!(f.manager.sessions().current_principal().await.unwrap().is_none());
        assert!(matches!(
            f.manager.session_info(&session.token).await,
            Err(AuthError::Authentication(_))
        ));
    }

    #[tokio::test]
    async fn test_logout_keeps_principal_while_other_session_lives() {
        let f = fixture().await;
        setup_admin(&f.manager).await;

        let (_, first, _) =
            expect_authenticated(f.manager.login("admin", "correct-horse").await.unwrap());
        let (_, second, _) =
            expect_authenticated(f.manager.login("admin", "correct-horse").await.unwrap());

        f.manager.logout(&first.token).await.unwrap();

        assert_eq!(
            f.manager.session_info(&second.token).await.unwrap().username,
            "admin"
        );
        let principal = f.manager.sessions().current_principal().await.unwrap().unwrap();
        assert_eq!(principal.username, "admin");

        f.manager.logout(&second.token).await.unwrap();
        assert!(f.manager.sessions().current_principal().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_second_login_takes_principal() {
        let f = fixture().await;
        setup_admin(&f.manager).await;
        invite(&f.manager, "CODE1", "bob", &[Role::Student]).await;
        invite(&f.manager, "CODE2", "carol", &[Role::Student]).await;

        f.manager.login("bob", "student-pass").await.unwrap();
        f.manager.login("carol", "student-pass").await.unwrap();

        let principal = f.manager.sessions().current_principal().await.unwrap().unwrap();
        assert_eq!(principal.username, "carol");
    }

    #[tokio::test]
    async fn test_redeem_invitation() {
        let f = fixture().await;
        invite(&f.manager, "CODE1", "student", &[Role::Student]).await;

        let account = f.manager.accounts().find_by_username("student").await.unwrap();
        assert_eq!(account.roles, roles(&[Role::Student]));

        let reused = f
            .manager
            .redeem_invitation(RedeemInvitationRequest {
                code: "CODE1".to_string(),
                username: "another".to_string(),
                password: "student-pass".to_string(),
                email: None,
                full_name: None,
            })
            .await;
        assert!(matches!(reused, Err(AuthError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_taken_username_keeps_invitation() {
        let f = fixture().await;
        setup_admin(&f.manager).await;
        f.manager
            .invites()
            .register("CODE1", roles(&[Role::Student]))
            .await
            .unwrap();

        let result = f
            .manager
            .redeem_invitation(RedeemInvitationRequest {
                code: "CODE1".to_string(),
                username: "admin".to_string(),
                password: "student-pass".to_string(),
                email: None,
                full_name: None,
            })
            .await;
        assert!(matches!(result, Err(AuthError::Conflict(_))));

        assert!(f.manager.invites().get("CODE1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_creation_restores_invitation() {
        let f = fixture().await;
        f.manager
            .invites()
            .register("CODE1", roles(&[Role::Student]))
            .await
            .unwrap();

        // Passes the early checks but fails email validation in the store
        let result = f
            .manager
            .redeem_invitation(RedeemInvitationRequest {
                code: "CODE1".to_string(),
                username: "student".to_string(),
                password: "student-pass".to_string(),
                email: Some("not-an-email".to_string()),
                full_name: None,
            })
            .await;
        assert!(matches!(result, Err(AuthError::Validation(_))));

        let restored = f.manager.invites().get("CODE1").await.unwrap().unwrap();
        assert_eq!(restored.roles, roles(&[Role::Student]));
    }

    #[tokio::test]
    async fn test_reset_flow() {
        let f = fixture().await;
        setup_admin(&f.manager).await;
        invite(&f.manager, "CODE1", "student", &[Role::Student]).await;

        let (_, session, _) =
            expect_authenticated(f.manager.login("student", "student-pass").await.unwrap());

        let issued = f.manager.request_reset("student").await.unwrap();

        // Existing sessions are gone and login now redirects
        assert!(f.manager.sessions().validate_token(&session.token).await.is_err());
        assert!(matches!(
            f.manager.login("student", "student-pass").await.unwrap(),
            LoginOutcome::ResetRequired { .. }
        ));

        let wrong = f
            .manager
            .complete_reset(CompleteResetRequest {
                username: "student".to_string(),
                code: "wrong-code".to_string(),
                new_password: "brand-new-pass".to_string(),
            })
            .await;
        assert!(matches!(wrong, Err(AuthError::WrongCode)));

        f.manager
            .complete_reset(CompleteResetRequest {
                username: "student".to_string(),
                code: issued.code.clone(),
                new_password: "brand-new-pass".to_string(),
            })
            .await
            .unwrap();

        expect_authenticated(f.manager.login("student", "brand-new-pass").await.unwrap());

        // The code cannot be replayed
        let replay = f
            .manager
            .complete_reset(CompleteResetRequest {
                username: "student".to_string(),
                code: issued.code,
                new_password: "another-pass".to_string(),
            })
            .await;
        assert!(matches!(replay, Err(AuthError::NoPendingCode(_))));
    }

    #[tokio::test]
    async fn test_reset_code_expires() {
        let f = fixture().await;
        setup_admin(&f.manager).await;

        let issued = f.manager.request_reset("admin").await.unwrap();
        f.clock.advance(Duration::hours(1));

        let result = f
            .manager
            .complete_reset(CompleteResetRequest {
                username: "admin".to_string(),
                code: issued.code,
                new_password: "brand-new-pass".to_string(),
            })
            .await;
        assert!(matches!(result, Err(AuthError::ExpiredCode)));
    }

    #[tokio::test]
    async fn test_weak_password_keeps_reset_code() {
        let f = fixture().await;
        setup_admin(&f.manager).await;
        let issued = f.manager.request_reset("admin").await.unwrap();

        let weak = f
            .manager
            .complete_reset(CompleteResetRequest {
                username: "admin".to_string(),
                code: issued.code.clone(),
                new_password: "short".to_string(),
            })
            .await;
        assert!(matches!(weak, Err(AuthError::Validation(_))));

        assert!(f
            .manager
            .credentials()
            .validate_one_time_code("admin", &issued.code)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_admin_created_temporary_password() {
        let f = fixture().await;
        setup_admin(&f.manager).await;

        let created = f
            .manager
            .create_account(CreateAccountRequest {
                username: "temp".to_string(),
                password: Some("temporary-pass".to_string()),
                email: None,
                full_name: None,
                roles: roles(&[Role::Instructor]),
            })
            .await
            .unwrap();
        assert!(created.account.is_one_time);
        assert!(created.one_time_code.is_none());

        expect_authenticated(f.manager.login("temp", "temporary-pass").await.unwrap());

        f.clock.advance(Duration::days(2));
        assert!(matches!(
            f.manager.login("temp", "temporary-pass").await,
            Err(AuthError::Authentication(_))
        ));
    }

    #[tokio::test]
    async fn test_admin_created_without_password() {
        let f = fixture().await;
        setup_admin(&f.manager).await;

        let created = f
            .manager
            .create_account(CreateAccountRequest {
                username: "fresh".to_string(),
                password: None,
                email: None,
                full_name: None,
                roles: roles(&[Role::Student]),
            })
            .await
            .unwrap();
        assert!(created.account.is_reset);
        let code = created.one_time_code.unwrap();

        f.manager
            .complete_reset(CompleteResetRequest {
                username: "fresh".to_string(),
                code: code.code,
                new_password: "chosen-pass".to_string(),
            })
            .await
            .unwrap();

        expect_authenticated(f.manager.login("fresh", "chosen-pass").await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let f = fixture().await;
        setup_admin(&f.manager).await;
        invite(&f.manager, "CODE1", "student", &[Role::Student]).await;

        f.manager.login("admin", "correct-horse").await.unwrap();
        f.manager.request_reset("student").await.unwrap();

        f.clock.advance(Duration::days(1));
        let (sessions, codes) = f.manager.purge_expired().await.unwrap();
        assert_eq!(sessions, 1);
        assert_eq!(codes, 1);

        assert_eq!(f.manager.purge_expired().await.unwrap(), (0, 0));
    }

    #[tokio::test]
    async fn test_expired_session_releases_principal() {
        let f = fixture().await;
        setup_admin(&f.manager).await;
        f.manager.login("admin", "correct-horse").await.unwrap();

        f.clock.advance(Duration::days(30));
        assert_eq!(f.manager.purge_expired().await.unwrap(), (1, 0));

        assert!(f.manager.sessions().current_principal().await.unwrap().is_none());
        assert!(!f
            .manager
            .current_principal_has_role(Role::Admin)
            .await
            .unwrap());
    }
}
