//! Bearer-token authentication and authorization gates.
//!
//! Access tokens arrive in the `Authorization: Bearer` header and are verified
//! statelessly. The refresh token lives only in an HttpOnly cookie scoped to
//! the refresh endpoint. Gates compose after authentication: `require_admin`
//! and `require_self_or_admin`.

mod cookie;
mod errors;
mod extractors;
mod gate;
mod ip;
mod state;
mod types;

pub use cookie::{
    REFRESH_COOKIE_NAME, REFRESH_COOKIE_PATH, clear_refresh_cookie, get_cookie, refresh_cookie,
};
pub use errors::{ApiAuthError, AuthErrorKind};
pub use extractors::{AdminOnly, AnyRole, Auth, RoleConstraint, bearer_token};
pub use gate::{OwnerLookup, require_admin, require_self_or_admin};
pub use ip::{HasHeadersAndExtensions, extract_client_ip};
pub use state::HasAuthBackend;
pub use types::AuthenticatedUser;
