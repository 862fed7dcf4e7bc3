//! Tests for the directory client's token refresh handling.

mod common;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use common::*;
use serde_json::json;
use staffdir::api::types::{ListQuery, RegisterRequest, UpdateEmployeeRequest};
use staffdir::client::DirectoryClient;
use staffdir::server_config::TokenSettings;
use staffdir::start_server;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// How the mock refresh endpoint behaves.
#[derive(Clone, Copy)]
enum RefreshMode {
    Succeed,
    Reject,
    Hang,
}

#[derive(Clone)]
struct Mock {
    mode: RefreshMode,
    refresh_calls: Arc<AtomicUsize>,
    employee_calls: Arc<AtomicUsize>,
}

fn session_body(token: &str) -> serde_json::Value {
    json!({
        "accessToken": token,
        "user": {
            "id": "user-1",
            "email": "alice@example.com",
            "firstName": "Alice",
            "lastName": "Smith",
            "role": "EMPLOYEE",
            "employeeId": "emp-1"
        }
    })
}

fn employee_body(id: &str) -> serde_json::Value {
    json!({
        "id": id,
        "userId": "user-1",
        "jobTitle": "Engineer",
        "department": "Engineering",
        "location": null,
        "hireDate": null,
        "createdAt": "2024-01-01 00:00:00",
        "updatedAt": "2024-01-01 00:00:00",
        "user": {
            "id": "user-1",
            "email": "alice@example.com",
            "firstName": "Alice",
            "lastName": "Smith",
            "role": "EMPLOYEE",
            "pictureUrl": null,
            "phone": null
        }
    })
}

fn unauthorized(message: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": message }))).into_response()
}

async fn mock_login() -> Json<serde_json::Value> {
    Json(session_body("stale"))
}

async fn mock_refresh(State(mock): State<Mock>) -> Response {
    mock.refresh_calls.fetch_add(1, Ordering::SeqCst);
    match mock.mode {
        RefreshMode::Succeed => {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Json(session_body("fresh")).into_response()
        }
        RefreshMode::Reject => {
            tokio::time::sleep(Duration::from_millis(200)).await;
            (StatusCode::FORBIDDEN, Json(json!({ "error": "Invalid refresh token" })))
                .into_response()
        }
        RefreshMode::Hang => {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Json(session_body("too-late")).into_response()
        }
    }
}

/// Accepts only the "fresh" token. The "locked" record rejects every token;
/// the "slow" record answers after the mock refresh has settled.
async fn mock_employee(
    State(mock): State<Mock>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    mock.employee_calls.fetch_add(1, Ordering::SeqCst);
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if id == "locked" {
        return unauthorized("Locked");
    }
    if id == "slow" {
        tokio::time::sleep(Duration::from_millis(400)).await;
    }
    match token {
        Some("fresh") => Json(employee_body(&id)).into_response(),
        _ => unauthorized("Token expired"),
    }
}

async fn spawn_mock(mode: RefreshMode) -> (Mock, SocketAddr) {
    let mock = Mock {
        mode,
        refresh_calls: Arc::new(AtomicUsize::new(0)),
        employee_calls: Arc::new(AtomicUsize::new(0)),
    };
    let app = Router::new()
        .route("/api/auth/login", post(mock_login))
        .route("/api/auth/refresh-token", post(mock_refresh))
        .route("/api/employees/{id}", get(mock_employee))
        .with_state(mock.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    (mock, addr)
}

async fn signed_in_client(addr: SocketAddr) -> DirectoryClient {
    let client = DirectoryClient::new(&format!("http://{}", addr)).unwrap();
    client.login("alice@example.com", "password123").await.unwrap();
    assert_eq!(client.access_token().as_deref(), Some("stale"));
    client
}

#[tokio::test]
async fn test_concurrent_401s_share_one_refresh() {
    let (mock, addr) = spawn_mock(RefreshMode::Succeed).await;
    let client = signed_in_client(addr).await;

    let calls = (0..8).map(|i| {
        let client = client.clone();
        tokio::spawn(async move { client.get_employee(&format!("emp-{i}")).await })
    });
    let results = futures::future::join_all(calls).await;

    for (i, result) in results.into_iter().enumerate() {
        let employee = result.unwrap().unwrap();
        assert_eq!(employee.id, format!("emp-{i}"));
    }
    assert_eq!(mock.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(client.access_token().as_deref(), Some("fresh"));
    assert!(!client.refresh_in_flight());

    // Later calls use the new token directly
    let before = mock.employee_calls.load(Ordering::SeqCst);
    client.get_employee("emp-9").await.unwrap();
    assert_eq!(mock.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(mock.employee_calls.load(Ordering::SeqCst), before + 1);
}

#[tokio::test]
async fn test_failed_refresh_fails_all_waiters() {
    let (mock, addr) = spawn_mock(RefreshMode::Reject).await;
    let client = signed_in_client(addr).await;

    let calls = (0..5).map(|i| {
        let client = client.clone();
        tokio::spawn(async move { client.get_employee(&format!("emp-{i}")).await })
    });
    let results = futures::future::join_all(calls).await;

    for result in results {
        let err = result.unwrap().unwrap_err();
        assert!(err.is_unauthorized(), "{err}");
        assert!(err.to_string().contains("Token expired"), "{err}");
    }
    assert_eq!(mock.refresh_calls.load(Ordering::SeqCst), 1);
    // No replays after a failed refresh
    assert_eq!(mock.employee_calls.load(Ordering::SeqCst), 5);
    assert_eq!(client.access_token(), None);
}

#[tokio::test]
async fn test_late_401_shares_settled_refresh_failure() {
    let (mock, addr) = spawn_mock(RefreshMode::Reject).await;
    let client = signed_in_client(addr).await;

    let slow = {
        let client = client.clone();
        tokio::spawn(async move { client.get_employee("slow").await })
    };
    let fast = client.get_employee("emp-1").await.unwrap_err();
    assert!(fast.is_unauthorized());
    assert_eq!(client.access_token(), None);

    // Sent with the old token, rejected only after the refresh had failed
    let err = slow.await.unwrap().unwrap_err();
    assert!(err.is_unauthorized());
    assert!(err.to_string().contains("Token expired"), "{err}");
    assert_eq!(mock.refresh_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_retry_401_is_not_refreshed_again() {
    let (mock, addr) = spawn_mock(RefreshMode::Succeed).await;
    let client = signed_in_client(addr).await;

    let err = client.get_employee("locked").await.unwrap_err();
    assert!(err.is_unauthorized());
    assert!(err.to_string().contains("Locked"));
    assert_eq!(mock.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(mock.employee_calls.load(Ordering::SeqCst), 2);
    // The refreshed token is kept
    assert_eq!(client.access_token().as_deref(), Some("fresh"));
}

#[tokio::test]
async fn test_refresh_timeout_counts_as_failure() {
    let (mock, addr) = spawn_mock(RefreshMode::Hang).await;
    let client = signed_in_client(addr)
        .await
        .with_refresh_timeout(Duration::from_millis(100));

    let err = client.get_employee("emp-1").await.unwrap_err();
    assert!(err.is_unauthorized());
    assert_eq!(mock.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(client.access_token(), None);
    assert!(!client.refresh_in_flight());
}

#[tokio::test]
async fn test_restore_session_without_cookie() {
    let (_mock, addr) = spawn_mock(RefreshMode::Reject).await;
    let client = DirectoryClient::new(&format!("http://{}", addr)).unwrap();

    assert!(client.restore_session().await.is_none());
    assert_eq!(client.access_token(), None);
}

#[tokio::test]
async fn test_session_survives_access_token_expiry() {
    let config =
        test_config_with(TokenSettings::new(ACCESS_SECRET, REFRESH_SECRET).with_lifetimes(1, 3600))
            .await;
    let (_handle, addr) = start_server(config, 0).await;
    let client = DirectoryClient::new(&format!("http://{}", addr)).unwrap();

    let user = client
        .register(&RegisterRequest {
            email: Some("alice@example.com".into()),
            password: Some("password123".into()),
            first_name: Some("Alice".into()),
            last_name: Some("Smith".into()),
            job_title: Some("Engineer".into()),
            department: Some("Engineering".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    let employee_id = user.employee_id.clone().unwrap();

    let list = client.list_employees(&ListQuery::default()).await.unwrap();
    assert_eq!(list.meta.total, 1);
    let first_token = client.access_token().unwrap();

    tokio::time::sleep(Duration::from_millis(2100)).await;

    // The expired token is swapped for a new one through the cookie
    let updated = client
        .update_employee(
            &employee_id,
            &UpdateEmployeeRequest {
                location: Some("Lisbon".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.location.as_deref(), Some("Lisbon"));
    assert_ne!(client.access_token().unwrap(), first_token);

    let restored = client.restore_session().await.unwrap();
    assert_eq!(restored.id, user.id);

    client.logout().await.unwrap();
    assert_eq!(client.access_token(), None);
    assert!(client.restore_session().await.is_none());

    let err = client.list_employees(&ListQuery::default()).await.unwrap_err();
    assert!(err.is_unauthorized());
}
