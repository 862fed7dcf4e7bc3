//! Employee directory endpoints.
//!
//! - GET `/` - List and search employees (any role)
//! - GET `/{id}` - Get one employee (any role)
//! - POST `/` - Create an employee (admin)
//! - PUT `/{id}` - Update an employee (the employee themself or admin)
//! - DELETE `/{id}` - Delete an employee and their account (admin)

use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde_json::Value;
use std::sync::Arc;

use super::error::{
    ApiError, ResultExt, validate_date, validate_email, validate_picture_url, validate_uuid,
};
use super::types::{
    CreateEmployeeRequest, EmployeeList, EmployeeUserView, EmployeeView, ListQuery, PageMeta,
    UpdateEmployeeRequest,
};
use crate::auth::{AdminOnly, Auth, require_self_or_admin};
use crate::db::{
    Database, Employee, EmployeeFilter, EmployeeOwner, EmployeeUpdate, NewEmployee, NewUser,
    UserRole, is_unique_violation,
};
use crate::impl_has_auth_backend;
use crate::jwt::JwtConfig;
use crate::password::{hash_password, validate_password};

/// Password given to accounts created by an administrator without one.
pub const DEFAULT_EMPLOYEE_PASSWORD: &str = "changeme";

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;
/// Highest page whose offset still fits in an `i64` at the largest page size.
const MAX_PAGE: i64 = i64::MAX / MAX_PAGE_SIZE;

/// Body keys that can never be changed through an update.
const IMMUTABLE_FIELDS: [&str; 4] = ["id", "createdAt", "updatedAt", "userId"];

#[derive(Clone)]
pub struct EmployeesState {
    pub db: Database,
    pub jwt: Arc<JwtConfig>,
    pub password_cost: u32,
}

impl_has_auth_backend!(EmployeesState);

pub fn router(state: EmployeesState) -> Router {
    Router::new()
        .route("/", get(list_employees).post(create_employee))
        .route(
            "/{id}",
            get(get_employee)
                .put(update_employee)
                .delete(delete_employee),
        )
        .with_state(state)
}

impl From<Employee> for EmployeeView {
    fn from(employee: Employee) -> Self {
        Self {
            id: employee.id,
            user_id: employee.user.id.clone(),
            job_title: employee.job_title,
            department: employee.department,
            location: employee.location,
            hire_date: employee.hire_date,
            created_at: employee.created_at,
            updated_at: employee.updated_at,
            user: EmployeeUserView {
                id: employee.user.id,
                email: employee.user.email,
                first_name: employee.user.first_name,
                last_name: employee.user.last_name,
                role: employee.user.role,
                picture_url: employee.user.picture_url,
                phone: employee.user.phone,
            },
        }
    }
}

/// Trimmed value; blank counts as absent.
fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn non_blank_owned(value: Option<String>) -> Option<String> {
    non_blank(value.as_deref()).map(str::to_string)
}

/// A present field must not be blank.
fn present_not_blank(value: &Option<String>, name: &str) -> Result<(), ApiError> {
    match value {
        Some(v) if v.trim().is_empty() => {
            Err(ApiError::bad_request(format!("{} cannot be empty", name)))
        }
        _ => Ok(()),
    }
}

fn filter_from_query(query: ListQuery) -> EmployeeFilter {
    EmployeeFilter {
        page: query.page.unwrap_or(1).clamp(1, MAX_PAGE),
        limit: query
            .limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE),
        search: non_blank_owned(query.search),
        department: non_blank_owned(query.department),
        title: non_blank_owned(query.title),
        location: non_blank_owned(query.location),
    }
}

async fn list_employees(
    _auth: Auth,
    State(state): State<EmployeesState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<EmployeeList>, ApiError> {
    let Query(query) = query?;
    let filter = filter_from_query(query);

    let page = state
        .db
        .employees()
        .list(&filter)
        .await
        .db_err("Failed to list employees")?;

    Ok(Json(EmployeeList {
        meta: PageMeta {
            total: page.total,
            page: filter.page,
            limit: filter.limit,
            pages: (page.total + filter.limit - 1) / filter.limit,
        },
        data: page.employees.into_iter().map(EmployeeView::from).collect(),
    }))
}

async fn get_employee(
    _auth: Auth,
    State(state): State<EmployeesState>,
    Path(id): Path<String>,
) -> Result<Json<EmployeeView>, ApiError> {
    let employee = state
        .db
        .employees()
        .get(&id)
        .await
        .db_err("Failed to get employee")?
        .ok_or_else(|| ApiError::not_found("Employee not found"))?;
    Ok(Json(employee.into()))
}

/// Account details for a user created alongside the employee record.
struct NewAccount {
    uuid: String,
    email: String,
    password_hash: String,
    first_name: String,
    last_name: String,
    phone: Option<String>,
    picture_url: Option<String>,
    role: UserRole,
}

impl NewAccount {
    fn as_new_user(&self) -> NewUser<'_> {
        NewUser {
            uuid: &self.uuid,
            email: &self.email,
            password_hash: &self.password_hash,
            first_name: &self.first_name,
            last_name: &self.last_name,
            phone: self.phone.as_deref(),
            picture_url: self.picture_url.as_deref(),
            role: self.role,
        }
    }
}

enum ResolvedOwner {
    Existing(String),
    New(NewAccount),
}

/// Work out whose record this is, preparing the account if one must be created.
async fn resolve_owner(
    payload: &CreateEmployeeRequest,
    password_cost: u32,
) -> Result<ResolvedOwner, ApiError> {
    if let Some(user_id) = &payload.user_id {
        validate_uuid(user_id)?;
        return Ok(ResolvedOwner::Existing(user_id.clone()));
    }

    let top_phone = non_blank(payload.phone.as_deref());
    let top_picture = non_blank(payload.picture_url.as_deref());

    let (email, password, first_name, last_name, role, phone, picture_url) =
        if let Some(user) = &payload.user {
            let first_name = non_blank(user.first_name.as_deref())
                .or(non_blank(payload.first_name.as_deref()));
            let last_name = non_blank(user.last_name.as_deref())
                .or(non_blank(payload.last_name.as_deref()));
            let (Some(first_name), Some(last_name)) = (first_name, last_name) else {
                return Err(ApiError::bad_request("firstName and lastName are required"));
            };
            if let Some(password) = &user.password {
                validate_password(password).map_err(ApiError::bad_request)?;
            }
            (
                user.email.trim(),
                user.password.as_deref().unwrap_or(DEFAULT_EMPLOYEE_PASSWORD),
                first_name,
                last_name,
                user.role.unwrap_or(UserRole::Employee),
                non_blank(user.phone.as_deref()).or(top_phone),
                non_blank(user.picture_url.as_deref()).or(top_picture),
            )
        } else {
            let (Some(first_name), Some(last_name), Some(email)) = (
                non_blank(payload.first_name.as_deref()),
                non_blank(payload.last_name.as_deref()),
                non_blank(payload.email.as_deref()),
            ) else {
                return Err(ApiError::bad_request(
                    "Provide either userId, a nested user, or top-level firstName, lastName, and email",
                ));
            };
            (
                email,
                DEFAULT_EMPLOYEE_PASSWORD,
                first_name,
                last_name,
                UserRole::Employee,
                top_phone,
                top_picture,
            )
        };

    validate_email(email)?;
    if let Some(url) = picture_url {
        validate_picture_url(url)?;
    }

    let password_hash = hash_password(password, password_cost)
        .await
        .map_err(|e| ApiError::db_error("Failed to hash password", e))?;

    Ok(ResolvedOwner::New(NewAccount {
        uuid: uuid::Uuid::new_v4().to_string(),
        email: email.to_string(),
        password_hash,
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
        phone: phone.map(str::to_string),
        picture_url: picture_url.map(str::to_string),
        role,
    }))
}

async fn create_employee(
    Auth { user: admin, .. }: Auth<AdminOnly>,
    State(state): State<EmployeesState>,
    payload: Result<Json<CreateEmployeeRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload?;

    let job_title = non_blank(Some(payload.job_title.as_str()))
        .ok_or_else(|| ApiError::bad_request("jobTitle is required"))?;
    let department = non_blank(Some(payload.department.as_str()))
        .ok_or_else(|| ApiError::bad_request("department is required"))?;
    let hire_date = non_blank(payload.hire_date.as_deref());
    if let Some(date) = hire_date {
        validate_date(date)?;
    }
    if let Some(email) = non_blank(payload.email.as_deref()) {
        validate_email(email)?;
    }
    if let Some(url) = non_blank(payload.picture_url.as_deref()) {
        validate_picture_url(url)?;
    }

    let resolved = resolve_owner(&payload, state.password_cost).await?;
    let owner = match &resolved {
        ResolvedOwner::Existing(user_id) => EmployeeOwner::Existing(user_id),
        ResolvedOwner::New(account) => EmployeeOwner::New(account.as_new_user()),
    };

    let employee = NewEmployee {
        job_title,
        department,
        location: non_blank(payload.location.as_deref()),
        hire_date,
    };

    let id = match state.db.employees().create(owner, &employee).await {
        Ok(Some(id)) => id,
        Ok(None) => return Err(ApiError::not_found("User not found")),
        Err(e) if is_unique_violation(&e) => {
            return Err(ApiError::conflict("Record already exists"));
        }
        Err(e) => return Err(ApiError::db_error("Failed to create employee", e)),
    };

    tracing::info!(employee = %id, by = %admin.subject(), "Employee created");

    let created = state
        .db
        .employees()
        .get(&id)
        .await
        .db_err("Failed to load employee")?
        .ok_or_else(|| ApiError::internal("Employee disappeared after creation"))?;

    Ok((StatusCode::CREATED, Json(EmployeeView::from(created))))
}

/// Reject edits to immutable fields and password changes before decoding.
fn check_update_body(body: &Value) -> Result<(), ApiError> {
    let Some(object) = body.as_object() else {
        return Err(ApiError::bad_request("Request body must be a JSON object"));
    };
    for key in IMMUTABLE_FIELDS {
        if object.contains_key(key) {
            return Err(ApiError::bad_request(format!(
                "Updating field \"{}\" is not allowed",
                key
            )));
        }
    }
    let password = object
        .get("user")
        .and_then(|user| user.get("password"))
        .is_some_and(|p| !p.is_null());
    if password {
        return Err(ApiError::bad_request(
            "Password updates are not allowed through this endpoint",
        ));
    }
    Ok(())
}

fn changes_from_request(request: UpdateEmployeeRequest) -> Result<EmployeeUpdate, ApiError> {
    let user = request.user.unwrap_or_default();
    let changes = EmployeeUpdate {
        job_title: request.job_title.map(|v| v.trim().to_string()),
        department: request.department.map(|v| v.trim().to_string()),
        location: request.location,
        hire_date: request.hire_date,
        first_name: request.first_name.or(user.first_name),
        last_name: request.last_name.or(user.last_name),
        email: request.email.or(user.email).map(|v| v.trim().to_string()),
        phone: request.phone.or(user.phone),
        picture_url: request.picture_url.or(user.picture_url),
    };

    present_not_blank(&changes.job_title, "jobTitle")?;
    present_not_blank(&changes.department, "department")?;
    present_not_blank(&changes.first_name, "firstName")?;
    present_not_blank(&changes.last_name, "lastName")?;
    if let Some(email) = &changes.email {
        validate_email(email)?;
    }
    if let Some(url) = &changes.picture_url {
        validate_picture_url(url)?;
    }
    if let Some(date) = &changes.hire_date {
        validate_date(date)?;
    }
    Ok(changes)
}

async fn update_employee(
    auth: Auth,
    State(state): State<EmployeesState>,
    Path(id): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<EmployeeView>, ApiError> {
    let store = state.db.employees();
    require_self_or_admin(auth.claim(), &store, &id).await?;

    let Json(body) = body?;
    check_update_body(&body)?;
    let request: UpdateEmployeeRequest =
        serde_json::from_value(body).map_err(|e| ApiError::bad_request(e.to_string()))?;
    let changes = changes_from_request(request)?;

    match store.update(&id, &changes).await {
        Ok(true) => {}
        Ok(false) => return Err(ApiError::not_found("Employee not found")),
        Err(e) if is_unique_violation(&e) => {
            return Err(ApiError::conflict("Email already in use"));
        }
        Err(e) => return Err(ApiError::db_error("Failed to update employee", e)),
    }

    let updated = store
        .get(&id)
        .await
        .db_err("Failed to load employee")?
        .ok_or_else(|| ApiError::not_found("Employee not found"))?;
    Ok(Json(updated.into()))
}

async fn delete_employee(
    Auth { user: admin, .. }: Auth<AdminOnly>,
    State(state): State<EmployeesState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let deleted = state
        .db
        .employees()
        .delete(&id)
        .await
        .db_err("Failed to delete employee")?;

    if !deleted {
        return Err(ApiError::not_found("Employee not found"));
    }

    tracing::info!(employee = %id, by = %admin.subject(), "Employee deleted");
    Ok(StatusCode::NO_CONTENT)
}
