//! Session endpoints.
//!
//! - POST `/register` - Create an employee account
//! - POST `/login` - Exchange credentials for an access token and refresh cookie
//! - POST `/refresh-token` - Exchange the refresh cookie for a new access token
//! - POST `/logout` - Clear the refresh cookie

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    middleware,
    response::IntoResponse,
    routing::post,
};
use std::sync::Arc;

use super::error::{ApiError, ResultExt, validate_email};
use super::types::{
    LoginRequest, MessageResponse, RegisterRequest, RegisterResponse, SessionResponse,
    SessionUser,
};
use crate::auth::{REFRESH_COOKIE_NAME, clear_refresh_cookie, get_cookie, refresh_cookie};
use crate::db::{
    Database, EmployeeOwner, NewEmployee, NewUser, UserProfile, UserRole, is_unique_violation,
};
use crate::jwt::{IdentityClaim, JwtConfig};
use crate::password::{hash_password, validate_password, verify_password};
use crate::rate_limit::{RateLimitConfig, rate_limit_login, rate_limit_register};

const INVALID_CREDENTIALS: &str = "Invalid credentials";
const INVALID_REFRESH_TOKEN: &str = "Invalid refresh token";

#[derive(Clone)]
pub struct SessionState {
    pub db: Database,
    pub jwt: Arc<JwtConfig>,
    pub secure_cookies: bool,
    pub no_signup: bool,
    pub password_cost: u32,
    pub rate_limit_config: Arc<RateLimitConfig>,
}

pub fn router(state: SessionState) -> Router {
    let login_router = Router::new()
        .route("/login", post(login))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            state.rate_limit_config.clone(),
            rate_limit_login,
        ));

    let session_router = Router::new()
        .route("/refresh-token", post(refresh))
        .route("/logout", post(logout))
        .with_state(state.clone())
        .merge(login_router);

    if state.no_signup {
        session_router
    } else {
        let register_router = Router::new()
            .route("/register", post(register))
            .with_state(state.clone())
            .layer(middleware::from_fn_with_state(
                state.rate_limit_config,
                rate_limit_register,
            ));

        session_router.merge(register_router)
    }
}

impl From<UserProfile> for SessionUser {
    fn from(profile: UserProfile) -> Self {
        Self {
            id: profile.uuid,
            email: profile.email,
            first_name: profile.first_name,
            last_name: profile.last_name,
            role: profile.role,
            employee_id: profile.employee_id,
        }
    }
}

/// Trimmed value of a required text field.
fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, ApiError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ApiError::bad_request(format!("{} is required", name))),
    }
}

/// Trimmed optional text field; blank counts as absent.
fn optional(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

async fn register(
    State(state): State<SessionState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload?;

    let email = required(&payload.email, "email")?;
    let first_name = required(&payload.first_name, "firstName")?;
    let last_name = required(&payload.last_name, "lastName")?;
    let job_title = required(&payload.job_title, "jobTitle")?;
    let department = required(&payload.department, "department")?;
    let password = payload
        .password
        .as_deref()
        .ok_or_else(|| ApiError::bad_request("password is required"))?;

    validate_email(email)?;
    validate_password(password).map_err(ApiError::bad_request)?;

    let available = state
        .db
        .users()
        .is_email_available(email)
        .await
        .db_err("Failed to check email availability")?;
    if !available {
        return Err(ApiError::bad_request("User already exists"));
    }

    let password_hash = hash_password(password, state.password_cost)
        .await
        .map_err(|e| ApiError::db_error("Failed to hash password", e))?;

    let user_uuid = uuid::Uuid::new_v4().to_string();
    let owner = EmployeeOwner::New(NewUser {
        uuid: &user_uuid,
        email,
        password_hash: &password_hash,
        first_name,
        last_name,
        phone: optional(&payload.phone),
        picture_url: None,
        role: UserRole::Employee,
    });
    let employee = NewEmployee {
        job_title,
        department,
        location: optional(&payload.location),
        hire_date: None,
    };

    match state.db.employees().create(owner, &employee).await {
        Ok(_) => {}
        // Lost a race with a concurrent signup for the same address
        Err(e) if is_unique_violation(&e) => {
            return Err(ApiError::bad_request("User already exists"));
        }
        Err(e) => return Err(ApiError::db_error("Failed to create user", e)),
    }

    tracing::info!(user = %user_uuid, "User registered");

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "User created".to_string(),
            user_id: user_uuid,
        }),
    ))
}

async fn login(
    State(state): State<SessionState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload?;

    let user = state
        .db
        .users()
        .get_by_email(payload.email.trim())
        .await
        .db_err("Failed to look up user")?
        .ok_or_else(|| ApiError::bad_request(INVALID_CREDENTIALS))?;

    let valid = verify_password(&payload.password, &user.password_hash)
        .await
        .map_err(|e| ApiError::db_error("Failed to verify password", e))?;
    if !valid {
        tracing::debug!(user = %user.uuid, "Wrong password");
        return Err(ApiError::bad_request(INVALID_CREDENTIALS));
    }

    let claim = IdentityClaim::new(&user.uuid, user.role);
    let access_token = state
        .jwt
        .issue_access_token(&claim)
        .map_err(|e| ApiError::db_error("Failed to issue access token", e))?;
    let refresh_token = state
        .jwt
        .issue_refresh_token(&claim)
        .map_err(|e| ApiError::db_error("Failed to issue refresh token", e))?;

    let profile = state
        .db
        .users()
        .get_profile(&user.uuid)
        .await
        .db_err("Failed to load user profile")?
        .ok_or_else(|| ApiError::internal("User disappeared during login"))?;

    let cookie = refresh_cookie(
        &refresh_token,
        state.jwt.refresh_ttl_secs(),
        state.secure_cookies,
    );

    tracing::info!(user = %user.uuid, "User logged in");

    Ok((
        [(SET_COOKIE, cookie)],
        Json(SessionResponse {
            access_token,
            user: profile.into(),
        }),
    ))
}

/// Issue a fresh access token from the refresh cookie. The refresh token
/// itself is not rotated.
async fn refresh(
    State(state): State<SessionState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let token = get_cookie(&headers, REFRESH_COOKIE_NAME)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::unauthorized("Missing token"))?;

    let claim = state
        .jwt
        .verify_refresh_token(token)
        .ok_or_else(|| ApiError::forbidden(INVALID_REFRESH_TOKEN))?;

    let profile = state
        .db
        .users()
        .get_profile(&claim.sub)
        .await
        .db_err("Failed to load user profile")?
        .ok_or_else(|| {
            tracing::debug!(user = %claim.sub, "Refresh for deleted user");
            ApiError::forbidden(INVALID_REFRESH_TOKEN)
        })?;

    // Carry the current role, so a promotion or demotion takes effect at the
    // next refresh.
    let access_token = state
        .jwt
        .issue_access_token(&IdentityClaim::new(&profile.uuid, profile.role))
        .map_err(|e| ApiError::db_error("Failed to issue access token", e))?;

    Ok(Json(SessionResponse {
        access_token,
        user: profile.into(),
    }))
}

/// Clear the refresh cookie. An already-issued access token stays valid
/// until it expires.
async fn logout(State(state): State<SessionState>) -> impl IntoResponse {
    (
        [(SET_COOKIE, clear_refresh_cookie(state.secure_cookies))],
        Json(MessageResponse {
            message: "Logged out".to_string(),
        }),
    )
}
