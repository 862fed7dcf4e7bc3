mod employees;
mod error;
mod session;
pub mod types;

use axum::Router;
use std::sync::Arc;

use crate::ServerConfig;
use crate::rate_limit::RateLimitConfig;

pub use employees::DEFAULT_EMPLOYEE_PASSWORD;
pub use error::ApiError;

/// Create the API router (mounted under `/api`).
pub fn create_api_router(config: &ServerConfig) -> Router {
    let rate_limit_config = Arc::new(RateLimitConfig::new(config.rate_limits));

    let session_state = session::SessionState {
        db: config.db.clone(),
        jwt: config.jwt.clone(),
        secure_cookies: config.secure_cookies,
        no_signup: config.no_signup,
        password_cost: config.password_cost,
        rate_limit_config,
    };

    let employees_state = employees::EmployeesState {
        db: config.db.clone(),
        jwt: config.jwt.clone(),
        password_cost: config.password_cost,
    };

    Router::new()
        .nest("/auth", session::router(session_state))
        .nest("/employees", employees::router(employees_state))
}
