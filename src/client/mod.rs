//! HTTP client for the directory API.
//!
//! The access token lives only in memory and is attached to every call. The
//! refresh token is an HttpOnly cookie kept in the client's cookie jar. When a
//! call comes back 401 the client exchanges the cookie for a new access token
//! and replays the call once. Concurrent 401s share a single exchange.

mod error;
mod single_flight;
mod token;

pub use error::ClientError;
pub use single_flight::SingleFlight;
pub use token::AccessTokenStore;

use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::api::types::{
    CreateEmployeeRequest, EmployeeList, EmployeeView, ListQuery, LoginRequest, RegisterRequest,
    RegisterResponse, SessionResponse, SessionUser, UpdateEmployeeRequest,
};

/// Default upper bound on a refresh exchange.
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

const LOGIN_PATH: &str = "/api/auth/login";
const REGISTER_PATH: &str = "/api/auth/register";
const REFRESH_PATH: &str = "/api/auth/refresh-token";
const LOGOUT_PATH: &str = "/api/auth/logout";
const EMPLOYEES_PATH: &str = "/api/employees";

#[derive(Clone)]
pub struct DirectoryClient {
    base_url: Url,
    http: reqwest::Client,
    token: AccessTokenStore,
    refresh: Arc<SingleFlight<Option<SessionResponse>>>,
    refresh_timeout: Duration,
}

impl DirectoryClient {
    /// Create a client for the server at `base_url` (e.g. `http://localhost:4000`).
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().cookie_store(true).build()?;
        Ok(Self {
            base_url: Url::parse(base_url)?,
            http,
            token: AccessTokenStore::default(),
            refresh: Arc::new(SingleFlight::new()),
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
        })
    }

    /// Bound how long a refresh exchange may take. A timeout counts as a
    /// failed refresh.
    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    /// The access token currently held, if signed in.
    pub fn access_token(&self) -> Option<String> {
        self.token.get()
    }

    /// Whether a refresh exchange is in flight.
    pub fn refresh_in_flight(&self) -> bool {
        self.refresh.is_pending()
    }

    fn url(&self, path: &str) -> Result<Url, ClientError> {
        Ok(self.base_url.join(path)?)
    }

    async fn execute(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
        token: Option<&str>,
    ) -> Result<reqwest::Response, ClientError> {
        let mut request = self.http.request(method, url);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    /// Send an authenticated request.
    ///
    /// On a 401 the request is retried once: with the token another caller
    /// already obtained, or else with the result of a (shared) refresh. If
    /// the refresh fails, or another caller's refresh already failed while
    /// this request was in flight, the original 401 is returned. A 401 on
    /// the retry is returned as is.
    pub async fn send<B>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
    ) -> Result<reqwest::Response, ClientError>
    where
        B: Serialize + ?Sized,
    {
        let body = body.map(serde_json::to_value).transpose()?;
        let sent_with = self.token.get();

        let response = self
            .execute(method.clone(), url.clone(), body.as_ref(), sent_with.as_deref())
            .await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return ensure_success(response).await;
        }

        let original = api_error(response).await;

        let current = self.token.get();
        let token = match (&sent_with, &current) {
            // A refresh that settled while this request was in flight
            // already failed and cleared the session.
            (Some(_), None) => None,
            (_, Some(_)) if current != sent_with => {
                tracing::debug!(%url, "Token changed while request was in flight, replaying");
                current
            }
            _ => self.refresh_session().await.map(|s| s.access_token),
        };

        let Some(token) = token else {
            return Err(original);
        };

        let response = self
            .execute(method, url, body.as_ref(), Some(&token))
            .await?;
        ensure_success(response).await
    }

    async fn send_json<B, T>(&self, method: Method, url: Url, body: Option<&B>) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.send(method, url, body).await?;
        decode(response).await
    }

    /// Exchange the refresh cookie for a new access token, sharing the
    /// exchange with every concurrent caller. `None` means the session is
    /// gone; the stored token has been cleared.
    async fn refresh_session(&self) -> Option<SessionResponse> {
        let http = self.http.clone();
        let store = self.token.clone();
        let timeout = self.refresh_timeout;
        let url = self.url(REFRESH_PATH);

        self.refresh
            .run(move || async move {
                let exchange = async move {
                    let response = http.post(url?).send().await?;
                    let session: SessionResponse = decode(ensure_success(response).await?).await?;
                    Ok::<_, ClientError>(session)
                };

                match tokio::time::timeout(timeout, exchange).await {
                    Ok(Ok(session)) => {
                        tracing::debug!(user = %session.user.id, "Access token refreshed");
                        store.set(session.access_token.clone());
                        Some(session)
                    }
                    Ok(Err(e)) => {
                        tracing::debug!(error = %e, "Refresh rejected");
                        store.clear();
                        None
                    }
                    Err(_) => {
                        tracing::warn!(?timeout, "Refresh timed out");
                        store.clear();
                        None
                    }
                }
            })
            .await
    }

    /// Sign in and keep the access token for later calls.
    pub async fn login(&self, email: &str, password: &str) -> Result<SessionUser, ClientError> {
        let body = serde_json::to_value(LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        })?;
        let response = self
            .execute(Method::POST, self.url(LOGIN_PATH)?, Some(&body), None)
            .await?;
        let session: SessionResponse = decode(ensure_success(response).await?).await?;
        self.token.set(session.access_token);
        Ok(session.user)
    }

    /// Create an account, then sign in with it.
    pub async fn register(&self, request: &RegisterRequest) -> Result<SessionUser, ClientError> {
        let body = serde_json::to_value(request)?;
        let response = self
            .execute(Method::POST, self.url(REGISTER_PATH)?, Some(&body), None)
            .await?;
        let _: RegisterResponse = decode(ensure_success(response).await?).await?;

        self.login(
            request.email.as_deref().unwrap_or_default(),
            request.password.as_deref().unwrap_or_default(),
        )
        .await
    }

    /// Sign out. The local token is dropped even if the server call fails.
    pub async fn logout(&self) -> Result<(), ClientError> {
        let result = match self.url(LOGOUT_PATH) {
            Ok(url) => match self.execute(Method::POST, url, None, None).await {
                Ok(response) => ensure_success(response).await.map(|_| ()),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };
        self.token.clear();
        result
    }

    /// Resume a session from the refresh cookie, e.g. at start-up.
    /// Returns `None` when there is no session to resume.
    pub async fn restore_session(&self) -> Option<SessionUser> {
        self.refresh_session().await.map(|s| s.user)
    }

    pub async fn list_employees(&self, query: &ListQuery) -> Result<EmployeeList, ClientError> {
        let mut url = self.url(EMPLOYEES_PATH)?;
        {
            let mut pairs = url.query_pairs_mut();
            if let Some(page) = query.page {
                pairs.append_pair("page", &page.to_string());
            }
            if let Some(limit) = query.limit {
                pairs.append_pair("limit", &limit.to_string());
            }
            for (key, value) in [
                ("search", &query.search),
                ("department", &query.department),
                ("title", &query.title),
                ("location", &query.location),
            ] {
                if let Some(value) = value {
                    pairs.append_pair(key, value);
                }
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
        self.send_json(Method::GET, url, None::<&()>).await
    }

    pub async fn get_employee(&self, id: &str) -> Result<EmployeeView, ClientError> {
        let url = self.url(&format!("{}/{}", EMPLOYEES_PATH, id))?;
        self.send_json(Method::GET, url, None::<&()>).await
    }

    pub async fn create_employee(
        &self,
        request: &CreateEmployeeRequest,
    ) -> Result<EmployeeView, ClientError> {
        let url = self.url(EMPLOYEES_PATH)?;
        self.send_json(Method::POST, url, Some(request)).await
    }

    pub async fn update_employee(
        &self,
        id: &str,
        request: &UpdateEmployeeRequest,
    ) -> Result<EmployeeView, ClientError> {
        let url = self.url(&format!("{}/{}", EMPLOYEES_PATH, id))?;
        self.send_json(Method::PUT, url, Some(request)).await
    }

    pub async fn delete_employee(&self, id: &str) -> Result<(), ClientError> {
        let url = self.url(&format!("{}/{}", EMPLOYEES_PATH, id))?;
        self.send(Method::DELETE, url, None::<&()>).await?;
        Ok(())
    }
}

/// Turn a non-success response into [`ClientError::Api`].
async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(api_error(response).await)
    }
}

/// Build an API error from the `{error}` (or `{message}`) body, falling back
/// to the status text.
async fn api_error(response: reqwest::Response) -> ClientError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .or_else(|| v.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| {
            if body.is_empty() {
                status.canonical_reason().unwrap_or("Unknown error").to_string()
            } else {
                body
            }
        });
    ClientError::Api { status, message }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}
