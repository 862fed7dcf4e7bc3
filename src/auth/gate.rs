//! Authorization gates applied after authentication.

use std::fmt::Display;
use std::future::Future;

use super::errors::{ApiAuthError, AuthErrorKind};
use crate::db::UserRole;
use crate::jwt::IdentityClaim;

/// Resolves which subject owns a resource.
pub trait OwnerLookup {
    type Error: Display;

    /// Owner subject for `resource_id`, or `None` if the resource does not exist.
    fn find_owner(
        &self,
        resource_id: &str,
    ) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send;
}

/// Pass only administrators.
pub fn require_admin(claim: &IdentityClaim) -> Result<(), ApiAuthError> {
    match claim.role {
        UserRole::Admin => Ok(()),
        UserRole::Employee => {
            tracing::debug!(sub = %claim.sub, "Rejected non-admin");
            Err(AuthErrorKind::InsufficientRole.into())
        }
    }
}

/// Pass administrators and the owner of `resource_id`.
///
/// The owner is looked up first, so a missing resource is `NotFound` for
/// every caller.
pub async fn require_self_or_admin<L>(
    claim: &IdentityClaim,
    lookup: &L,
    resource_id: &str,
) -> Result<(), ApiAuthError>
where
    L: OwnerLookup + Sync,
{
    let owner = lookup.find_owner(resource_id).await.map_err(|e| {
        tracing::error!(resource_id, "Owner lookup failed: {}", e);
        ApiAuthError::new(AuthErrorKind::LookupFailed)
    })?;

    let Some(owner) = owner else {
        return Err(AuthErrorKind::NotFound.into());
    };

    match claim.role {
        UserRole::Admin => Ok(()),
        UserRole::Employee if owner == claim.sub => Ok(()),
        UserRole::Employee => {
            tracing::debug!(sub = %claim.sub, resource_id, "Rejected non-owner");
            Err(AuthErrorKind::InsufficientRole.into())
        }
    }
}
