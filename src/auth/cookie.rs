//! Refresh cookie construction and parsing.

use axum::http::{HeaderMap, header};

/// Cookie name for the refresh token.
pub const REFRESH_COOKIE_NAME: &str = "refresh_token";

/// The refresh cookie is only ever sent to the refresh endpoint.
pub const REFRESH_COOKIE_PATH: &str = "/api/auth/refresh-token";

/// Extract a cookie value from the Cookie header.
pub fn get_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;
    for part in cookie_header.split(';') {
        let part = part.trim();
        if let Some((key, value)) = part.split_once('=') {
            if key.trim() == name {
                return Some(value.trim());
            }
        }
    }
    None
}

/// `Set-Cookie` value carrying a refresh token.
pub fn refresh_cookie(token: &str, max_age_secs: u64, secure: bool) -> String {
    format!(
        "{}={}; HttpOnly; SameSite=Strict; Path={}; Max-Age={}{}",
        REFRESH_COOKIE_NAME,
        token,
        REFRESH_COOKIE_PATH,
        max_age_secs,
        secure_attr(secure)
    )
}

/// `Set-Cookie` value that removes the refresh cookie. Attributes must match
/// the ones it was set with or the browser keeps the original.
pub fn clear_refresh_cookie(secure: bool) -> String {
    format!(
        "{}=; HttpOnly; SameSite=Strict; Path={}; Max-Age=0{}",
        REFRESH_COOKIE_NAME,
        REFRESH_COOKIE_PATH,
        secure_attr(secure)
    )
}

fn secure_attr(secure: bool) -> &'static str {
    if secure { "; Secure" } else { "" }
}
