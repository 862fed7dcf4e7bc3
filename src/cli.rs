//! CLI argument parsing, validation, and startup helpers.

use crate::ServerConfig;
use crate::db::{Database, NewUser, UserRole};
use crate::jwt::JwtConfig;
use crate::password::{DEFAULT_COST, PasswordError, hash_password};
use crate::rate_limit::RateLimitSettings;
use crate::server_config::{ConfigError, TokenSettings};
use clap::Parser;
use rand::{Rng, distr::Alphanumeric};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

const ACCESS_SECRET_ENV: &str = "ACCESS_TOKEN_SECRET";
const REFRESH_SECRET_ENV: &str = "REFRESH_TOKEN_SECRET";
const GENERATED_PASSWORD_LENGTH: usize = 20;

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "staffdir", about = "Employee directory API server")]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "4000")]
    pub port: u16,

    /// Path to SQLite database file
    #[arg(short, long, env = "DATABASE_PATH", default_value = "staffdir.db")]
    pub database: String,

    /// File containing the access token secret. Prefer the ACCESS_TOKEN_SECRET env var
    #[arg(long)]
    pub access_token_secret_file: Option<String>,

    /// File containing the refresh token secret. Prefer the REFRESH_TOKEN_SECRET env var
    #[arg(long)]
    pub refresh_token_secret_file: Option<String>,

    /// Access token lifetime in seconds
    #[arg(long, env = "ACCESS_TOKEN_TTL", default_value = "900")]
    pub access_token_ttl: u64,

    /// Refresh token lifetime in seconds
    #[arg(long, env = "REFRESH_TOKEN_TTL", default_value = "604800")]
    pub refresh_token_ttl: u64,

    /// Mark the refresh cookie Secure (enable behind HTTPS)
    #[arg(long, env = "SECURE_COOKIES")]
    pub secure_cookies: bool,

    /// Comma-separated origins allowed to call the API with credentials
    #[arg(
        long,
        env = "CORS_ORIGINS",
        value_delimiter = ',',
        default_value = "http://localhost:3000"
    )]
    pub cors_origins: Vec<String>,

    /// bcrypt cost for password hashes
    #[arg(long, env = "BCRYPT_COST", default_value_t = DEFAULT_COST,
        value_parser = clap::value_parser!(u32).range(4..=31))]
    pub bcrypt_cost: u32,

    /// Disable self-registration (admins can still create employees)
    #[arg(long)]
    pub no_signup: bool,

    /// Create an admin with this email (or promote the existing user) on startup
    #[arg(long, value_name = "EMAIL")]
    pub create_admin: Option<String>,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Load a signing secret from an environment variable or a file.
///
/// The environment variable wins and is removed once read. Length is checked
/// when the token service is built.
pub fn load_secret(env_var: &'static str, file: Option<&str>) -> Result<Vec<u8>, ConfigError> {
    let secret = if let Ok(secret) = std::env::var(env_var) {
        // SAFETY: called during single-threaded startup before the runtime
        // spawns any tasks that read the environment.
        unsafe { std::env::remove_var(env_var) };
        secret
    } else if let Some(path) = file {
        std::fs::read_to_string(path)
            .map_err(|e| ConfigError::SecretFile {
                name: env_var,
                path: path.to_string(),
                reason: e.to_string(),
            })?
            .trim()
            .to_string()
    } else {
        return Err(ConfigError::MissingSecret(env_var));
    };

    if secret.is_empty() {
        return Err(ConfigError::MissingSecret(env_var));
    }

    Ok(secret.into_bytes())
}

/// Load both secrets and lifetimes and build the token service.
pub fn load_token_service(args: &Args) -> Result<JwtConfig, ConfigError> {
    let access = load_secret(ACCESS_SECRET_ENV, args.access_token_secret_file.as_deref())?;
    let refresh = load_secret(REFRESH_SECRET_ENV, args.refresh_token_secret_file.as_deref())?;
    let settings = TokenSettings::new(access, refresh)
        .with_lifetimes(args.access_token_ttl, args.refresh_token_ttl);
    JwtConfig::new(&settings)
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Password(#[from] PasswordError),

    #[error("invalid email address: {0}")]
    InvalidEmail(String),
}

/// Outcome of `--create-admin`.
#[derive(Debug, PartialEq, Eq)]
pub enum AdminBootstrap {
    /// An existing user now has the admin role
    Promoted,
    /// A new admin was created with this generated password
    Created { password: String },
}

fn generate_password() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_PASSWORD_LENGTH)
        .map(char::from)
        .collect()
}

/// Promote the user with `email` to admin, or create one with a random password.
pub async fn create_or_promote_admin(
    db: &Database,
    email: &str,
    password_cost: u32,
) -> Result<AdminBootstrap, AdminError> {
    let email = email.trim();
    if !email.contains('@') {
        return Err(AdminError::InvalidEmail(email.to_string()));
    }

    if let Some(user) = db.users().get_by_email(email).await? {
        db.users().set_role(user.id, UserRole::Admin).await?;
        return Ok(AdminBootstrap::Promoted);
    }

    let password = generate_password();
    let password_hash = hash_password(&password, password_cost).await?;
    let uuid = uuid::Uuid::new_v4().to_string();
    db.users()
        .create(&NewUser {
            uuid: &uuid,
            email,
            password_hash: &password_hash,
            first_name: "Admin",
            last_name: "User",
            phone: None,
            picture_url: None,
            role: UserRole::Admin,
        })
        .await?;

    Ok(AdminBootstrap::Created { password })
}

/// Handle the --create-admin flag, printing the generated password once.
pub async fn handle_create_admin(db: &Database, email: &str, password_cost: u32) {
    match create_or_promote_admin(db, email, password_cost).await {
        Ok(AdminBootstrap::Promoted) => {
            info!(email = %email, "Existing user promoted to admin");
            println!();
            println!("User {} is now an admin", email);
            println!();
        }
        Ok(AdminBootstrap::Created { password }) => {
            info!(email = %email, "Admin user created");
            println!();
            println!("Admin user created: {}", email);
            println!("Password: {}", password);
            println!("This password is not shown again.");
            println!();
        }
        Err(e) => {
            error!(error = %e, "Failed to create admin user");
            std::process::exit(1);
        }
    }
}

/// Build ServerConfig from validated arguments.
pub fn build_config(args: &Args, db: Database, jwt: JwtConfig) -> ServerConfig {
    ServerConfig {
        db,
        jwt: Arc::new(jwt),
        secure_cookies: args.secure_cookies,
        no_signup: args.no_signup,
        cors_origins: args
            .cors_origins
            .iter()
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect(),
        password_cost: args.bcrypt_cost,
        rate_limits: RateLimitSettings::default(),
    }
}
