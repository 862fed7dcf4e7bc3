use sqlx::sqlite::{SqliteConnection, SqlitePool};

#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

/// User role for authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserRole {
    Admin,
    Employee,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "ADMIN",
            UserRole::Employee => "EMPLOYEE",
        }
    }

    /// Parse a stored role. Anything unrecognised is the least privileged role.
    pub fn parse(s: &str) -> Self {
        match s {
            "ADMIN" => UserRole::Admin,
            _ => UserRole::Employee,
        }
    }
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub uuid: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub picture_url: Option<String>,
    pub role: UserRole,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    uuid: String,
    email: String,
    password_hash: String,
    first_name: String,
    last_name: String,
    phone: Option<String>,
    picture_url: Option<String>,
    role: String,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            uuid: row.uuid,
            email: row.email,
            password_hash: row.password_hash,
            first_name: row.first_name,
            last_name: row.last_name,
            phone: row.phone,
            picture_url: row.picture_url,
            role: UserRole::parse(&row.role),
        }
    }
}

/// The signed-in user as returned by the session endpoints.
#[derive(Debug, Clone)]
pub struct UserProfile {
    pub uuid: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: UserRole,
    pub employee_id: Option<String>,
}

#[derive(sqlx::FromRow)]
struct UserProfileRow {
    uuid: String,
    email: String,
    first_name: String,
    last_name: String,
    role: String,
    employee_id: Option<String>,
}

impl From<UserProfileRow> for UserProfile {
    fn from(row: UserProfileRow) -> Self {
        Self {
            uuid: row.uuid,
            email: row.email,
            first_name: row.first_name,
            last_name: row.last_name,
            role: UserRole::parse(&row.role),
            employee_id: row.employee_id,
        }
    }
}

/// Fields for inserting a user.
#[derive(Debug, Clone)]
pub struct NewUser<'a> {
    pub uuid: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub phone: Option<&'a str>,
    pub picture_url: Option<&'a str>,
    pub role: UserRole,
}

const USER_COLUMNS: &str =
    "id, uuid, email, password_hash, first_name, last_name, phone, picture_url, role";

impl UserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a user. Returns the user ID.
    pub async fn create(&self, user: &NewUser<'_>) -> Result<i64, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        Self::insert(&mut conn, user).await
    }

    /// Insert a user on an existing connection or transaction.
    pub(crate) async fn insert(
        conn: &mut SqliteConnection,
        user: &NewUser<'_>,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO users (uuid, email, password_hash, first_name, last_name, phone, picture_url, role)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(user.uuid)
        .bind(user.email)
        .bind(user.password_hash)
        .bind(user.first_name)
        .bind(user.last_name)
        .bind(user.phone)
        .bind(user.picture_url)
        .bind(user.role.as_str())
        .execute(conn)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Get a user by email (case-insensitive).
    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?"))
                .bind(email)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(User::from))
    }

    /// Get a user by UUID.
    pub async fn get_by_uuid(&self, uuid: &str) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE uuid = ?"))
                .bind(uuid)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(User::from))
    }

    /// Get the session profile for a user, including their employee record ID.
    pub async fn get_profile(&self, uuid: &str) -> Result<Option<UserProfile>, sqlx::Error> {
        let row: Option<UserProfileRow> = sqlx::query_as(
            "SELECT u.uuid, u.email, u.first_name, u.last_name, u.role, e.uuid AS employee_id
             FROM users u LEFT JOIN employees e ON e.user_id = u.id
             WHERE u.uuid = ?",
        )
        .bind(uuid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(UserProfile::from))
    }

    /// Check whether an email is free to register.
    pub async fn is_email_available(&self, email: &str) -> Result<bool, sqlx::Error> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE email = ?")
            .bind(email)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0 == 0)
    }

    /// Set the role for a user.
    pub async fn set_role(&self, id: i64, role: UserRole) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET role = ?, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(role.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
