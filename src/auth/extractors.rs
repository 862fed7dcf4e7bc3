//! Axum extractors for bearer-token authentication.

use std::marker::PhantomData;

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header, request::Parts},
};

use super::errors::{ApiAuthError, AuthErrorKind};
use super::gate::require_admin;
use super::state::HasAuthBackend;
use super::types::AuthenticatedUser;
use crate::jwt::IdentityClaim;

/// Role requirement checked right after the token is verified.
pub trait RoleConstraint {
    fn check(claim: &IdentityClaim) -> Result<(), ApiAuthError>;
}

/// Any authenticated user.
pub struct AnyRole;

impl RoleConstraint for AnyRole {
    fn check(_claim: &IdentityClaim) -> Result<(), ApiAuthError> {
        Ok(())
    }
}

/// Administrators only.
pub struct AdminOnly;

impl RoleConstraint for AdminOnly {
    fn check(claim: &IdentityClaim) -> Result<(), ApiAuthError> {
        require_admin(claim)
    }
}

/// Pull the token out of `Authorization: Bearer <token>`.
///
/// `Ok(None)` means the header is absent. A header without a usable token is
/// `MissingToken`.
pub fn bearer_token(headers: &HeaderMap) -> Result<Option<&str>, AuthErrorKind> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value.to_str().map_err(|_| AuthErrorKind::MissingToken)?;
    let mut parts = value.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => {
            Ok(Some(token))
        }
        _ => Err(AuthErrorKind::MissingToken),
    }
}

fn authenticate<S: HasAuthBackend>(parts: &Parts, state: &S) -> Result<IdentityClaim, AuthErrorKind> {
    let token = bearer_token(&parts.headers)?.ok_or(AuthErrorKind::NotAuthenticated)?;

    state.jwt().verify_access_token(token).map_err(|e| {
        tracing::debug!(error = %e, "Access token rejected");
        if e.is_expired() {
            AuthErrorKind::TokenExpired
        } else {
            AuthErrorKind::InvalidToken
        }
    })
}

/// Extractor for endpoints that require a verified access token.
///
/// `Auth` accepts any role; `Auth<AdminOnly>` also runs the admin gate.
/// The verified identity is attached to the request extensions as an
/// [`AuthenticatedUser`].
pub struct Auth<R = AnyRole> {
    pub user: AuthenticatedUser,
    _role: PhantomData<R>,
}

impl<R> Auth<R> {
    pub fn claim(&self) -> &IdentityClaim {
        &self.user.claim
    }
}

impl<S, R> FromRequestParts<S> for Auth<R>
where
    S: HasAuthBackend + Send + Sync,
    R: RoleConstraint,
{
    type Rejection = ApiAuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let claim = authenticate(parts, state)?;
        R::check(&claim)?;

        let user = AuthenticatedUser { claim };
        parts.extensions.insert(user.clone());
        Ok(Auth {
            user,
            _role: PhantomData,
        })
    }
}
