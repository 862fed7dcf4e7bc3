//! JWT token generation and validation.
//!
//! Access and refresh tokens are signed with distinct secrets, so a leaked
//! access secret cannot mint refresh tokens and vice versa. Neither token is
//! stored server-side: validity is a function of signature and expiry only.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::db::UserRole;
use crate::server_config::{ConfigError, TokenSettings};

/// Default access token lifetime: 15 minutes
pub const DEFAULT_ACCESS_TOKEN_TTL_SECS: u64 = 15 * 60;

/// Default refresh token lifetime: 7 days
pub const DEFAULT_REFRESH_TOKEN_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Token type for distinguishing access vs refresh tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
}

/// The identity carried by both token kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityClaim {
    /// Subject (user UUID)
    pub sub: String,
    pub role: UserRole,
}

impl IdentityClaim {
    pub fn new(sub: impl Into<String>, role: UserRole) -> Self {
        Self {
            sub: sub.into(),
            role,
        }
    }
}

/// Registered JWT claims as they appear on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenClaims {
    sub: String,
    role: UserRole,
    #[serde(rename = "typ")]
    token_type: TokenType,
    iat: u64,
    exp: u64,
}

struct SigningKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SigningKeys {
    fn from_secret(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }
}

/// Token service. Built once at start-up and shared behind an `Arc`.
pub struct JwtConfig {
    access: SigningKeys,
    refresh: SigningKeys,
    access_ttl_secs: u64,
    refresh_ttl_secs: u64,
}

impl JwtConfig {
    /// Create the token service, rejecting unusable settings.
    pub fn new(settings: &TokenSettings) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            access: SigningKeys::from_secret(&settings.access_secret),
            refresh: SigningKeys::from_secret(&settings.refresh_secret),
            access_ttl_secs: settings.access_ttl_secs,
            refresh_ttl_secs: settings.refresh_ttl_secs,
        })
    }

    pub fn access_ttl_secs(&self) -> u64 {
        self.access_ttl_secs
    }

    pub fn refresh_ttl_secs(&self) -> u64 {
        self.refresh_ttl_secs
    }

    /// Sign a short-lived access token for the claim.
    pub fn issue_access_token(&self, claim: &IdentityClaim) -> Result<String, JwtError> {
        self.issue_access_token_at(claim, now()?)
    }

    /// Sign an access token as if it had been issued at `issued_at` (Unix seconds).
    pub fn issue_access_token_at(
        &self,
        claim: &IdentityClaim,
        issued_at: u64,
    ) -> Result<String, JwtError> {
        sign(
            &self.access,
            claim,
            TokenType::Access,
            issued_at,
            self.access_ttl_secs,
        )
    }

    /// Sign a long-lived refresh token for the claim.
    pub fn issue_refresh_token(&self, claim: &IdentityClaim) -> Result<String, JwtError> {
        self.issue_refresh_token_at(claim, now()?)
    }

    /// Sign a refresh token as if it had been issued at `issued_at` (Unix seconds).
    pub fn issue_refresh_token_at(
        &self,
        claim: &IdentityClaim,
        issued_at: u64,
    ) -> Result<String, JwtError> {
        sign(
            &self.refresh,
            claim,
            TokenType::Refresh,
            issued_at,
            self.refresh_ttl_secs,
        )
    }

    /// Validate an access token and return its claim.
    pub fn verify_access_token(&self, token: &str) -> Result<IdentityClaim, JwtError> {
        verify(&self.access, token, TokenType::Access)
    }

    /// Validate a refresh token.
    ///
    /// An expired or tampered refresh token is a routine outcome (the session
    /// ended), so failures yield `None` rather than an error.
    pub fn verify_refresh_token(&self, token: &str) -> Option<IdentityClaim> {
        match verify(&self.refresh, token, TokenType::Refresh) {
            Ok(claim) => Some(claim),
            Err(e) => {
                tracing::debug!(error = %e, "Refresh token rejected");
                None
            }
        }
    }
}

fn now() -> Result<u64, JwtError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|_| JwtError::TimeError)
}

fn sign(
    keys: &SigningKeys,
    claim: &IdentityClaim,
    token_type: TokenType,
    issued_at: u64,
    ttl_secs: u64,
) -> Result<String, JwtError> {
    let claims = TokenClaims {
        sub: claim.sub.clone(),
        role: claim.role,
        token_type,
        iat: issued_at,
        exp: issued_at
            .checked_add(ttl_secs)
            .ok_or(JwtError::ExpiryOverflow)?,
    };

    jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &keys.encoding)
        .map_err(JwtError::Encoding)
}

fn verify(
    keys: &SigningKeys,
    token: &str,
    expected: TokenType,
) -> Result<IdentityClaim, JwtError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;

    let token_data = jsonwebtoken::decode::<TokenClaims>(token, &keys.decoding, &validation)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => JwtError::Expired,
            _ => JwtError::Invalid(e),
        })?;

    if token_data.claims.token_type != expected {
        return Err(JwtError::WrongTokenType);
    }

    Ok(IdentityClaim {
        sub: token_data.claims.sub,
        role: token_data.claims.role,
    })
}

/// Errors that can occur during JWT operations.
#[derive(Debug)]
pub enum JwtError {
    /// Error encoding the token
    Encoding(jsonwebtoken::errors::Error),
    /// Bad signature, malformed token, or missing claims
    Invalid(jsonwebtoken::errors::Error),
    /// Signature is valid but the token is past its expiry
    Expired,
    /// System time error
    TimeError,
    /// Wrong token type (e.g., using refresh token as access token)
    WrongTokenType,
    /// Issue time plus lifetime does not fit in a timestamp
    ExpiryOverflow,
}

impl JwtError {
    pub fn is_expired(&self) -> bool {
        matches!(self, JwtError::Expired)
    }
}

impl std::fmt::Display for JwtError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JwtError::Encoding(e) => write!(f, "Failed to encode token: {}", e),
            JwtError::Invalid(e) => write!(f, "Invalid token: {}", e),
            JwtError::Expired => write!(f, "Token expired"),
            JwtError::TimeError => write!(f, "System time error"),
            JwtError::WrongTokenType => write!(f, "Wrong token type"),
            JwtError::ExpiryOverflow => write!(f, "Token expiry out of range"),
        }
    }
}

impl std::error::Error for JwtError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> JwtConfig {
        JwtConfig::new(&TokenSettings::new(
            "test-access-secret-key-for-testing",
            "test-refresh-secret-key-for-testing",
        ))
        .unwrap()
    }

    fn alice() -> IdentityClaim {
        IdentityClaim::new("uuid-123", UserRole::Employee)
    }

    fn unix_now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    #[test]
    fn test_issue_and_verify_access_token() {
        let config = config();
        let token = config.issue_access_token(&alice()).unwrap();
        assert_eq!(config.verify_access_token(&token).unwrap(), alice());
    }

    #[test]
    fn test_issue_and_verify_refresh_token() {
        let config = config();
        let token = config.issue_refresh_token(&alice()).unwrap();
        assert_eq!(config.verify_refresh_token(&token), Some(alice()));
    }

    #[test]
    fn test_admin_role_in_token() {
        let config = config();
        let claim = IdentityClaim::new("uuid-456", UserRole::Admin);
        let token = config.issue_access_token(&claim).unwrap();
        assert_eq!(
            config.verify_access_token(&token).unwrap().role,
            UserRole::Admin
        );
    }

    #[test]
    fn test_access_token_expires_after_ttl() {
        let config = config();
        let issued_at = unix_now() - DEFAULT_ACCESS_TOKEN_TTL_SECS - 5;
        let token = config.issue_access_token_at(&alice(), issued_at).unwrap();

        let err = config.verify_access_token(&token).unwrap_err();
        assert!(err.is_expired());
    }

    #[test]
    fn test_access_token_valid_just_before_expiry() {
        let config = config();
        let issued_at = unix_now() - DEFAULT_ACCESS_TOKEN_TTL_SECS + 30;
        let token = config.issue_access_token_at(&alice(), issued_at).unwrap();
        assert_eq!(config.verify_access_token(&token).unwrap(), alice());
    }

    #[test]
    fn test_expired_refresh_token_is_none() {
        let config = config();
        let issued_at = unix_now() - DEFAULT_REFRESH_TOKEN_TTL_SECS - 5;
        let token = config.issue_refresh_token_at(&alice(), issued_at).unwrap();
        assert_eq!(config.verify_refresh_token(&token), None);
    }

    #[test]
    fn test_tampered_refresh_token_is_none() {
        let config = config();
        let token = config.issue_refresh_token(&alice()).unwrap();

        // Flip a character in the signature segment.
        let mut tampered = token.into_bytes();
        let last = tampered.len() - 2;
        tampered[last] = if tampered[last] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(tampered).unwrap();

        assert_eq!(config.verify_refresh_token(&tampered), None);
        assert_eq!(config.verify_refresh_token("not-a-token"), None);
    }

    #[test]
    fn test_tokens_not_interchangeable() {
        let config = config();
        let access = config.issue_access_token(&alice()).unwrap();
        let refresh = config.issue_refresh_token(&alice()).unwrap();

        assert_eq!(config.verify_refresh_token(&access), None);
        assert!(config.verify_access_token(&refresh).is_err());
    }

    #[test]
    fn test_wrong_token_type_with_shared_key() {
        // Same key for both would still be caught by the typ claim.
        let config = config();
        let forged = sign(
            &config.access,
            &alice(),
            TokenType::Refresh,
            unix_now(),
            60,
        )
        .unwrap();

        assert!(matches!(
            config.verify_access_token(&forged),
            Err(JwtError::WrongTokenType)
        ));
    }

    #[test]
    fn test_wrong_secret() {
        let other = JwtConfig::new(&TokenSettings::new(
            "another-access-secret-key-xxxxxxxx",
            "another-refresh-secret-key-xxxxxxx",
        ))
        .unwrap();

        let token = config().issue_access_token(&alice()).unwrap();
        let err = other.verify_access_token(&token).unwrap_err();
        assert!(!err.is_expired());
    }

    #[test]
    fn test_invalid_token() {
        assert!(config().verify_access_token("invalid-token").is_err());
    }

    #[test]
    fn test_custom_lifetimes() {
        let config = JwtConfig::new(
            &TokenSettings::new(
                "test-access-secret-key-for-testing",
                "test-refresh-secret-key-for-testing",
            )
            .with_lifetimes(60, 120),
        )
        .unwrap();
        assert_eq!(config.access_ttl_secs(), 60);
        assert_eq!(config.refresh_ttl_secs(), 120);

        let token = config
            .issue_access_token_at(&alice(), unix_now() - 61)
            .unwrap();
        assert!(config.verify_access_token(&token).unwrap_err().is_expired());
    }

    #[test]
    fn test_missing_secret_is_configuration_error() {
        let result = JwtConfig::new(&TokenSettings::new("", "test-refresh-secret-key-for-testing"));
        assert!(matches!(result, Err(ConfigError::MissingSecret(_))));
    }

    #[test]
    fn test_short_secret_is_configuration_error() {
        let result = JwtConfig::new(&TokenSettings::new("short-a", "short-b"));
        assert!(matches!(result, Err(ConfigError::SecretTooShort { .. })));
    }

    #[test]
    fn test_oversized_lifetime_is_configuration_error() {
        let result = JwtConfig::new(
            &TokenSettings::new(
                "test-access-secret-key-for-testing",
                "test-refresh-secret-key-for-testing",
            )
            .with_lifetimes(u64::MAX, 60),
        );
        assert!(matches!(result, Err(ConfigError::LifetimeTooLong { .. })));
    }

    #[test]
    fn test_expiry_overflow_is_error() {
        let config = config();
        let result = config.issue_access_token_at(&alice(), u64::MAX);
        assert!(matches!(result, Err(JwtError::ExpiryOverflow)));
    }
}
