//! Start-up configuration shared by the server and the CLI.
//!
//! Everything here is built once before the router exists and is read-only
//! afterwards. Nothing in request handling reads process-wide state.

use thiserror::Error;

use crate::jwt::{DEFAULT_ACCESS_TOKEN_TTL_SECS, DEFAULT_REFRESH_TOKEN_TTL_SECS};

/// Minimum accepted length for either signing secret.
pub const MIN_SECRET_LENGTH: usize = 32;

/// Longest accepted token lifetime: ten years.
pub const MAX_TOKEN_LIFETIME_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Fatal configuration problems. The process must not start when one occurs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    MissingSecret(&'static str),

    #[error("{name} is shorter than {min} bytes")]
    SecretTooShort { name: &'static str, min: usize },

    #[error("access and refresh token secrets must differ")]
    SharedSecret,

    #[error("failed to read {name} from {path}: {reason}")]
    SecretFile {
        name: &'static str,
        path: String,
        reason: String,
    },

    #[error("token lifetime for {0} must be greater than zero")]
    ZeroLifetime(&'static str),

    #[error("token lifetime for {name} must be at most {max} seconds")]
    LifetimeTooLong { name: &'static str, max: u64 },

    #[error("invalid CORS origin: {0}")]
    InvalidOrigin(String),
}

/// Secrets and lifetimes for the token service.
#[derive(Clone)]
pub struct TokenSettings {
    pub access_secret: Vec<u8>,
    pub refresh_secret: Vec<u8>,
    pub access_ttl_secs: u64,
    pub refresh_ttl_secs: u64,
}

impl TokenSettings {
    /// Settings with the default lifetimes (15 minutes / 7 days).
    pub fn new(access_secret: impl Into<Vec<u8>>, refresh_secret: impl Into<Vec<u8>>) -> Self {
        Self {
            access_secret: access_secret.into(),
            refresh_secret: refresh_secret.into(),
            access_ttl_secs: DEFAULT_ACCESS_TOKEN_TTL_SECS,
            refresh_ttl_secs: DEFAULT_REFRESH_TOKEN_TTL_SECS,
        }
    }

    pub fn with_lifetimes(mut self, access_ttl_secs: u64, refresh_ttl_secs: u64) -> Self {
        self.access_ttl_secs = access_ttl_secs;
        self.refresh_ttl_secs = refresh_ttl_secs;
        self
    }

    /// Check the invariants the token service relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.access_secret.is_empty() {
            return Err(ConfigError::MissingSecret("ACCESS_TOKEN_SECRET"));
        }
        if self.refresh_secret.is_empty() {
            return Err(ConfigError::MissingSecret("REFRESH_TOKEN_SECRET"));
        }
        for (name, secret) in [
            ("ACCESS_TOKEN_SECRET", &self.access_secret),
            ("REFRESH_TOKEN_SECRET", &self.refresh_secret),
        ] {
            if secret.len() < MIN_SECRET_LENGTH {
                return Err(ConfigError::SecretTooShort {
                    name,
                    min: MIN_SECRET_LENGTH,
                });
            }
        }
        if self.access_secret == self.refresh_secret {
            return Err(ConfigError::SharedSecret);
        }
        for (name, ttl) in [
            ("access tokens", self.access_ttl_secs),
            ("refresh tokens", self.refresh_ttl_secs),
        ] {
            if ttl == 0 {
                return Err(ConfigError::ZeroLifetime(name));
            }
            if ttl > MAX_TOKEN_LIFETIME_SECS {
                return Err(ConfigError::LifetimeTooLong {
                    name,
                    max: MAX_TOKEN_LIFETIME_SECS,
                });
            }
        }
        Ok(())
    }
}
