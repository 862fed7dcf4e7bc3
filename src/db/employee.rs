//! Employee records and the directory queries over them.

use sqlx::QueryBuilder;
use sqlx::sqlite::{Sqlite, SqlitePool};

use super::user::{NewUser, UserRole, UserStore};

#[derive(Clone)]
pub struct EmployeeStore {
    pool: SqlitePool,
}

/// The user fields exposed alongside an employee record.
#[derive(Debug, Clone)]
pub struct EmployeeUser {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: UserRole,
    pub picture_url: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Employee {
    pub id: String,
    pub job_title: String,
    pub department: String,
    pub location: Option<String>,
    pub hire_date: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub user: EmployeeUser,
}

#[derive(sqlx::FromRow)]
struct EmployeeRow {
    id: String,
    job_title: String,
    department: String,
    location: Option<String>,
    hire_date: Option<String>,
    created_at: String,
    updated_at: String,
    user_uuid: String,
    email: String,
    first_name: String,
    last_name: String,
    role: String,
    picture_url: Option<String>,
    phone: Option<String>,
}

impl From<EmployeeRow> for Employee {
    fn from(row: EmployeeRow) -> Self {
        Self {
            id: row.id,
            job_title: row.job_title,
            department: row.department,
            location: row.location,
            hire_date: row.hire_date,
            created_at: row.created_at,
            updated_at: row.updated_at,
            user: EmployeeUser {
                id: row.user_uuid,
                email: row.email,
                first_name: row.first_name,
                last_name: row.last_name,
                role: UserRole::parse(&row.role),
                picture_url: row.picture_url,
                phone: row.phone,
            },
        }
    }
}

const EMPLOYEE_SELECT: &str = "SELECT e.uuid AS id, e.job_title, e.department, e.location, e.hire_date,
        e.created_at, e.updated_at, u.uuid AS user_uuid, u.email, u.first_name, u.last_name,
        u.role, u.picture_url, u.phone
     FROM employees e JOIN users u ON u.id = e.user_id";

/// Directory listing parameters. `page` is 1-based.
#[derive(Debug, Clone)]
pub struct EmployeeFilter {
    pub page: i64,
    pub limit: i64,
    pub search: Option<String>,
    pub department: Option<String>,
    pub title: Option<String>,
    pub location: Option<String>,
}

impl Default for EmployeeFilter {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 20,
            search: None,
            department: None,
            title: None,
            location: None,
        }
    }
}

/// One page of the directory plus the total match count.
#[derive(Debug, Clone)]
pub struct EmployeePage {
    pub total: i64,
    pub employees: Vec<Employee>,
}

/// Who the new employee record belongs to.
#[derive(Debug, Clone)]
pub enum EmployeeOwner<'a> {
    /// An existing user, by UUID.
    Existing(&'a str),
    /// A user created in the same transaction.
    New(NewUser<'a>),
}

#[derive(Debug, Clone)]
pub struct NewEmployee<'a> {
    pub job_title: &'a str,
    pub department: &'a str,
    pub location: Option<&'a str>,
    pub hire_date: Option<&'a str>,
}

/// Partial update. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct EmployeeUpdate {
    pub job_title: Option<String>,
    pub department: Option<String>,
    pub location: Option<String>,
    pub hire_date: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub picture_url: Option<String>,
}

impl EmployeeUpdate {
    fn touches_employee(&self) -> bool {
        self.job_title.is_some()
            || self.department.is_some()
            || self.location.is_some()
            || self.hire_date.is_some()
    }

    fn touches_user(&self) -> bool {
        self.first_name.is_some()
            || self.last_name.is_some()
            || self.email.is_some()
            || self.phone.is_some()
            || self.picture_url.is_some()
    }
}

/// Escape LIKE wildcards so user input matches literally.
fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, filter: &EmployeeFilter) {
    qb.push(" WHERE 1 = 1");

    if let Some(department) = &filter.department {
        qb.push(" AND e.department = ").push_bind(department.clone());
    }
    if let Some(title) = &filter.title {
        qb.push(" AND e.job_title = ").push_bind(title.clone());
    }
    if let Some(location) = &filter.location {
        qb.push(" AND e.location = ").push_bind(location.clone());
    }

    if let Some(search) = &filter.search {
        let pattern = like_pattern(search);
        let columns = [
            "e.job_title",
            "e.department",
            "e.location",
            "u.first_name",
            "u.last_name",
            "u.email",
            "u.phone",
        ];
        qb.push(" AND (");
        for (i, column) in columns.iter().enumerate() {
            if i > 0 {
                qb.push(" OR ");
            }
            qb.push(*column)
                .push(" LIKE ")
                .push_bind(pattern.clone())
                .push(" ESCAPE '\\'");
        }
        qb.push(")");
    }
}

impl EmployeeStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// List employees matching the filter, newest first.
    pub async fn list(&self, filter: &EmployeeFilter) -> Result<EmployeePage, sqlx::Error> {
        let mut count_query = QueryBuilder::<Sqlite>::new(
            "SELECT COUNT(*) FROM employees e JOIN users u ON u.id = e.user_id",
        );
        push_filters(&mut count_query, filter);
        let (total,) = count_query
            .build_query_as::<(i64,)>()
            .fetch_one(&self.pool)
            .await?;

        let offset = (filter.page.max(1) - 1).saturating_mul(filter.limit);
        let mut list_query = QueryBuilder::<Sqlite>::new(EMPLOYEE_SELECT);
        push_filters(&mut list_query, filter);
        list_query
            .push(" ORDER BY e.created_at DESC, e.id DESC LIMIT ")
            .push_bind(filter.limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let rows = list_query
            .build_query_as::<EmployeeRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok(EmployeePage {
            total,
            employees: rows.into_iter().map(Employee::from).collect(),
        })
    }

    /// Get an employee by UUID.
    pub async fn get(&self, uuid: &str) -> Result<Option<Employee>, sqlx::Error> {
        let row: Option<EmployeeRow> =
            sqlx::query_as(&format!("{EMPLOYEE_SELECT} WHERE e.uuid = ?"))
                .bind(uuid)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Employee::from))
    }

    /// Create an employee record. Returns the new employee UUID, or `None` if
    /// an existing owner was requested and does not exist.
    pub async fn create(
        &self,
        owner: EmployeeOwner<'_>,
        employee: &NewEmployee<'_>,
    ) -> Result<Option<String>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let user_id = match owner {
            EmployeeOwner::Existing(user_uuid) => {
                let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM users WHERE uuid = ?")
                    .bind(user_uuid)
                    .fetch_optional(&mut *tx)
                    .await?;
                match row {
                    Some((id,)) => id,
                    None => return Ok(None),
                }
            }
            EmployeeOwner::New(user) => UserStore::insert(&mut tx, &user).await?,
        };

        let uuid = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO employees (uuid, user_id, job_title, department, location, hire_date)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&uuid)
        .bind(user_id)
        .bind(employee.job_title)
        .bind(employee.department)
        .bind(employee.location)
        .bind(employee.hire_date)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(uuid))
    }

    /// Apply a partial update to an employee and its user.
    /// Returns false if the employee does not exist.
    pub async fn update(&self, uuid: &str, changes: &EmployeeUpdate) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(i64, i64)> =
            sqlx::query_as("SELECT id, user_id FROM employees WHERE uuid = ?")
                .bind(uuid)
                .fetch_optional(&mut *tx)
                .await?;
        let Some((employee_id, user_id)) = row else {
            return Ok(false);
        };

        if changes.touches_employee() {
            let mut qb =
                QueryBuilder::<Sqlite>::new("UPDATE employees SET updated_at = datetime('now')");
            let fields = [
                ("job_title", &changes.job_title),
                ("department", &changes.department),
                ("location", &changes.location),
                ("hire_date", &changes.hire_date),
            ];
            for (column, value) in fields {
                if let Some(value) = value {
                    qb.push(", ")
                        .push(column)
                        .push(" = ")
                        .push_bind(value.clone());
                }
            }
            qb.push(" WHERE id = ").push_bind(employee_id);
            qb.build().execute(&mut *tx).await?;
        }

        if changes.touches_user() {
            let mut qb =
                QueryBuilder::<Sqlite>::new("UPDATE users SET updated_at = datetime('now')");
            let fields = [
                ("first_name", &changes.first_name),
                ("last_name", &changes.last_name),
                ("email", &changes.email),
                ("phone", &changes.phone),
                ("picture_url", &changes.picture_url),
            ];
            for (column, value) in fields {
                if let Some(value) = value {
                    qb.push(", ")
                        .push(column)
                        .push(" = ")
                        .push_bind(value.clone());
                }
            }
            qb.push(" WHERE id = ").push_bind(user_id);
            qb.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    /// Delete an employee and the user it belongs to.
    pub async fn delete(&self, uuid: &str) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(i64,)> = sqlx::query_as("SELECT user_id FROM employees WHERE uuid = ?")
            .bind(uuid)
            .fetch_optional(&mut *tx)
            .await?;
        let Some((user_id,)) = row else {
            return Ok(false);
        };

        sqlx::query("DELETE FROM employees WHERE uuid = ?")
            .bind(uuid)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// UUID of the user who owns an employee record.
    pub async fn owner_of(&self, uuid: &str) -> Result<Option<String>, sqlx::Error> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT u.uuid FROM employees e JOIN users u ON u.id = e.user_id WHERE e.uuid = ?",
        )
        .bind(uuid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.0))
    }
}

impl crate::auth::OwnerLookup for EmployeeStore {
    type Error = sqlx::Error;

    async fn find_owner(&self, resource_id: &str) -> Result<Option<String>, Self::Error> {
        self.owner_of(resource_id).await
    }
}
