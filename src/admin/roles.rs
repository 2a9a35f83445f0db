/// Role names and single-role resolution
use crate::{
    db::account::Account,
    error::{AuthError, AuthResult},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Capability grouping attached to an account
///
/// Serialized with its canonical capitalized name; parsing accepts any case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Role {
    /// Manages accounts, invitation codes and resets
    Admin,
    /// Maintains help articles
    Instructor,
    /// Reads help articles
    Student,
}

/// Set of roles held by an account or granted by an invitation code
pub type RoleSet = BTreeSet<Role>;

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "Admin",
            Role::Instructor => "Instructor",
            Role::Student => "Student",
        }
    }
}

impl FromStr for Role {
    type Err = AuthError;

    fn from_str(s: &str) -> AuthResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "instructor" => Ok(Role::Instructor),
            "student" => Ok(Role::Student),
            _ => Err(AuthError::Validation(format!("Invalid role: {}", s))),
        }
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

impl TryFrom<String> for Role {
    type Error = AuthError;

    fn try_from(value: String) -> AuthResult<Self> {
        value.parse()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of collapsing a role set to one effective role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum Resolution {
    /// Account is unusable until an administrator assigns a role
    NoRoles,
    /// Exactly one role, used directly
    SingleRole(Role),
    /// Caller must pick one before proceeding
    AmbiguousRoles(RoleSet),
}

impl Resolution {
    /// Role to proceed with without prompting, if there is one
    pub fn effective_role(&self) -> Option<Role> {
        match self {
            Resolution::SingleRole(role) => Some(*role),
            _ => None,
        }
    }

    /// Pick `role` as the active role.
    ///
    /// A single-role resolution accepts only its own role.
    pub fn select(&self, role: Role) -> AuthResult<Role> {
        match self {
            Resolution::NoRoles => Err(AuthError::NoRolesAssigned(
                "account has no roles to select from".to_string(),
            )),
            Resolution::SingleRole(only) if *only == role => Ok(role),
            Resolution::AmbiguousRoles(roles) if roles.contains(&role) => Ok(role),
            _ => Err(AuthError::Validation(format!(
                "Role {} is not held by this account",
                role
            ))),
        }
    }
}

/// Turns a role set into a single effective role
pub struct RoleResolver;

impl RoleResolver {
    /// Pure function of the role set
    pub fn resolve(roles: &RoleSet) -> Resolution {
        let mut iter = roles.iter();
        match (iter.next(), iter.next()) {
            (None, _) => Resolution::NoRoles,
            (Some(role), None) => Resolution::SingleRole(*role),
            _ => Resolution::AmbiguousRoles(roles.clone()),
        }
    }

    /// Whether `principal` holds `role`; no principal holds nothing
    pub fn has_role(principal: Option<&Account>, role: Role) -> bool {
        principal.map(|account| account.has_role(role)).unwrap_or(false)
    }
}
