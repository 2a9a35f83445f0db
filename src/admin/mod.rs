/// Administrative role and invitation management
///
/// Role resolution for multi-role accounts and the invitation codes that
/// mint new accounts with a pre-authorized role set.

pub mod invites;
pub mod roles;

pub use invites::{InvitationCode, InvitationCodeRegistry};
pub use roles::{Resolution, Role, RoleResolver, RoleSet};
