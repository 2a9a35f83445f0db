/// Helpdesk Auth - account credential and session service
///
/// Account records, password and one-time-code credentials, keyed sessions
/// with a single active principal, role resolution and invitation codes,
/// served over a small JSON API.

pub mod account;
pub mod admin;
pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod context;
pub mod crypto;
pub mod db;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod rate_limit;
pub mod server;

pub use account::{AccountManager, AccountStore, CredentialManager, LoginOutcome, SessionTracker};
pub use admin::{InvitationCodeRegistry, Resolution, Role, RoleResolver, RoleSet};
pub use config::ServerConfig;
pub use context::AppContext;
pub use error::{AuthError, AuthResult};
