#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Request, StatusCode, header},
};
use serde_json::Value;
use staffdir::{
    ServerConfig, create_app,
    db::{Database, EmployeeOwner, NewEmployee, NewUser, UserRole},
    jwt::{IdentityClaim, JwtConfig},
    password::hash_password,
    rate_limit::RateLimitSettings,
    server_config::TokenSettings,
};
use std::sync::Arc;
use tower::ServiceExt;

pub const ACCESS_SECRET: &str = "test-access-secret-0123456789abcdef";
pub const REFRESH_SECRET: &str = "test-refresh-secret-0123456789abcdef";

/// Lowest bcrypt cost, to keep tests fast.
pub const TEST_COST: u32 = 4;

pub struct TestApp {
    pub app: Router,
    pub db: Database,
    pub jwt: Arc<JwtConfig>,
}

/// A user with an employee record.
pub struct TestUser {
    pub uuid: String,
    pub employee_id: String,
    pub email: String,
    pub password: String,
}

pub async fn test_config() -> ServerConfig {
    test_config_with(TokenSettings::new(ACCESS_SECRET, REFRESH_SECRET)).await
}

pub async fn test_config_with(settings: TokenSettings) -> ServerConfig {
    let db = Database::open(":memory:")
        .await
        .expect("Failed to open test database");
    let jwt = JwtConfig::new(&settings).expect("Invalid token settings");
    ServerConfig {
        db,
        jwt: Arc::new(jwt),
        secure_cookies: false, // Tests run over plain HTTP
        no_signup: false,
        cors_origins: vec!["http://localhost:3000".to_string()],
        password_cost: TEST_COST,
        rate_limits: RateLimitSettings::unlimited(),
    }
}

pub fn app_for(config: &ServerConfig) -> TestApp {
    TestApp {
        app: create_app(config).expect("Failed to build app"),
        db: config.db.clone(),
        jwt: config.jwt.clone(),
    }
}

pub async fn setup() -> TestApp {
    app_for(&test_config().await)
}

/// Build an app after adjusting the default test configuration.
pub async fn setup_with(adjust: impl FnOnce(&mut ServerConfig)) -> TestApp {
    let mut config = test_config().await;
    adjust(&mut config);
    app_for(&config)
}

pub async fn create_user(db: &Database, email: &str, role: UserRole) -> TestUser {
    create_user_named(db, email, role, "Test", "User", "Engineer", "Engineering").await
}

pub async fn create_user_named(
    db: &Database,
    email: &str,
    role: UserRole,
    first_name: &str,
    last_name: &str,
    job_title: &str,
    department: &str,
) -> TestUser {
    let password = "password123".to_string();
    let hash = hash_password(&password, TEST_COST).await.unwrap();
    let uuid = uuid::Uuid::new_v4().to_string();
    let employee_id = db
        .employees()
        .create(
            EmployeeOwner::New(NewUser {
                uuid: &uuid,
                email,
                password_hash: &hash,
                first_name,
                last_name,
                phone: None,
                picture_url: None,
                role,
            }),
            &NewEmployee {
                job_title,
                department,
                location: None,
                hire_date: None,
            },
        )
        .await
        .unwrap()
        .unwrap();

    TestUser {
        uuid,
        employee_id,
        email: email.to_string(),
        password,
    }
}

impl TestApp {
    pub fn token_for(&self, user: &TestUser, role: UserRole) -> String {
        self.jwt
            .issue_access_token(&IdentityClaim::new(&user.uuid, role))
            .unwrap()
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or(Value::Null)
        };
        (status, headers, json)
    }

    /// Log in through the API. Returns (access token, refresh cookie value).
    pub async fn login(&self, email: &str, password: &str) -> (String, String) {
        let (status, headers, body) = self
            .send(json_request(
                "POST",
                "/api/auth/login",
                None,
                Some(serde_json::json!({ "email": email, "password": password })),
            ))
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {body}");
        let cookie = refresh_cookie_value(&headers).expect("login should set the refresh cookie");
        (body["accessToken"].as_str().unwrap().to_string(), cookie)
    }
}

pub fn json_request(
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// The raw `Set-Cookie` header for the refresh cookie.
pub fn refresh_set_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("refresh_token="))
        .map(str::to_string)
}

/// The refresh token value from a `Set-Cookie` header.
pub fn refresh_cookie_value(headers: &HeaderMap) -> Option<String> {
    let cookie = refresh_set_cookie(headers)?;
    let value = cookie.strip_prefix("refresh_token=")?.split(';').next()?;
    Some(value.to_string())
}

pub fn refresh_request(cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/auth/refresh-token");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, format!("refresh_token={}", cookie));
    }
    builder.body(Body::empty()).unwrap()
}
