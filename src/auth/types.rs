//! Authentication user types.

use crate::db::UserRole;
use crate::jwt::IdentityClaim;

/// Authenticated user information extracted from a verified access token.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub claim: IdentityClaim,
}

impl AuthenticatedUser {
    /// User UUID.
    pub fn subject(&self) -> &str {
        &self.claim.sub
    }

    pub fn role(&self) -> UserRole {
        self.claim.role
    }
}
