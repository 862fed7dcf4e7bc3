mod employee;
mod user;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

pub use employee::{
    Employee, EmployeeFilter, EmployeeOwner, EmployeePage, EmployeeStore, EmployeeUpdate,
    EmployeeUser, NewEmployee,
};
pub use user::{NewUser, User, UserProfile, UserRole, UserStore};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open or create a database at the given path.
    /// Use ":memory:" for an in-memory database.
    pub async fn open(path: &str) -> Result<Self, sqlx::Error> {
        let url = if path == ":memory:" {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite:{}?mode=rwc", path)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Get the current schema version.
    async fn get_version(&self) -> Result<i32, sqlx::Error> {
        let result: Option<(i32,)> = sqlx::query_as("SELECT version FROM schema_version LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(result.map(|r| r.0).unwrap_or(0))
    }

    /// Set the schema version within a transaction.
    async fn set_version(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        version: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM schema_version")
            .execute(&mut **tx)
            .await?;
        sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
            .bind(version)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Run database migrations.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")
            .execute(&self.pool)
            .await?;

        let version = self.get_version().await?;

        if version < 1 {
            self.migrate_v1().await?;
        }

        Ok(())
    }

    /// Execute a list of queries in a transaction, then set the version.
    async fn run_migration(
        &self,
        version: i32,
        queries: &[&'static str],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for query in queries {
            sqlx::query(*query).execute(&mut *tx).await?;
        }
        Self::set_version(&mut tx, version).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn migrate_v1(&self) -> Result<(), sqlx::Error> {
        self.run_migration(
            1,
            &[
                "CREATE TABLE users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    uuid TEXT UNIQUE NOT NULL,
                    email TEXT UNIQUE NOT NULL COLLATE NOCASE,
                    password_hash TEXT NOT NULL,
                    first_name TEXT NOT NULL,
                    last_name TEXT NOT NULL,
                    phone TEXT,
                    picture_url TEXT,
                    role TEXT NOT NULL DEFAULT 'EMPLOYEE',
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                )",
                "CREATE INDEX idx_users_uuid ON users(uuid)",
                "CREATE INDEX idx_users_email ON users(email)",
                // One employee record per user; deleting the user removes it.
                "CREATE TABLE employees (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    uuid TEXT UNIQUE NOT NULL,
                    user_id INTEGER UNIQUE NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    job_title TEXT NOT NULL,
                    department TEXT NOT NULL,
                    location TEXT,
                    hire_date TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                )",
                "CREATE INDEX idx_employees_uuid ON employees(uuid)",
                "CREATE INDEX idx_employees_department ON employees(department)",
                "CREATE INDEX idx_employees_created_at ON employees(created_at)",
            ],
        )
        .await
    }

    /// Get the user store.
    pub fn users(&self) -> UserStore {
        UserStore::new(self.pool.clone())
    }

    /// Get the employee store.
    pub fn employees(&self) -> EmployeeStore {
        EmployeeStore::new(self.pool.clone())
    }

    /// Get the underlying connection pool (for tests that need raw SQL access).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Whether a database error is a UNIQUE constraint violation.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(e) if e.is_unique_violation())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user<'a>(uuid: &'a str, email: &'a str) -> NewUser<'a> {
        NewUser {
            uuid,
            email,
            password_hash: "hash",
            first_name: "Alice",
            last_name: "Smith",
            phone: None,
            picture_url: None,
            role: UserRole::Employee,
        }
    }

    fn engineer() -> NewEmployee<'static> {
        NewEmployee {
            job_title: "Engineer",
            department: "Engineering",
            location: Some("London"),
            hire_date: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_get_user() {
        let db = Database::open(":memory:").await.unwrap();

        let id = db
            .users()
            .create(&new_user("uuid-123", "alice@example.com"))
            .await
            .unwrap();

        let user = db
            .users()
            .get_by_email("alice@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.id, id);
        assert_eq!(user.uuid, "uuid-123");
        assert_eq!(user.role, UserRole::Employee);

        let user = db.users().get_by_uuid("uuid-123").await.unwrap().unwrap();
        assert_eq!(user.id, id);
    }

    #[tokio::test]
    async fn test_email_is_case_insensitive() {
        let db = Database::open(":memory:").await.unwrap();

        db.users()
            .create(&new_user("uuid-1", "Alice@Example.com"))
            .await
            .unwrap();

        assert!(
            !db.users()
                .is_email_available("alice@example.com")
                .await
                .unwrap()
        );
        let result = db
            .users()
            .create(&new_user("uuid-2", "alice@example.com"))
            .await;
        assert!(is_unique_violation(&result.unwrap_err()));
    }

    #[tokio::test]
    async fn test_set_role() {
        let db = Database::open(":memory:").await.unwrap();

        let id = db
            .users()
            .create(&new_user("uuid-1", "alice@example.com"))
            .await
            .unwrap();
        db.users().set_role(id, UserRole::Admin).await.unwrap();

        let user = db.users().get_by_uuid("uuid-1").await.unwrap().unwrap();
        assert_eq!(user.role, UserRole::Admin);
    }

    #[tokio::test]
    async fn test_create_employee_with_new_user() {
        let db = Database::open(":memory:").await.unwrap();

        let employee_id = db
            .employees()
            .create(
                EmployeeOwner::New(new_user("uuid-1", "alice@example.com")),
                &engineer(),
            )
            .await
            .unwrap()
            .unwrap();

        let employee = db.employees().get(&employee_id).await.unwrap().unwrap();
        assert_eq!(employee.user.id, "uuid-1");
        assert_eq!(employee.job_title, "Engineer");
        assert_eq!(employee.location.as_deref(), Some("London"));

        let owner = db.employees().owner_of(&employee_id).await.unwrap();
        assert_eq!(owner.as_deref(), Some("uuid-1"));

        let profile = db.users().get_profile("uuid-1").await.unwrap().unwrap();
        assert_eq!(profile.employee_id.as_deref(), Some(employee_id.as_str()));
    }

    #[tokio::test]
    async fn test_create_employee_for_missing_user() {
        let db = Database::open(":memory:").await.unwrap();

        let result = db
            .employees()
            .create(EmployeeOwner::Existing("no-such-user"), &engineer())
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_one_employee_per_user() {
        let db = Database::open(":memory:").await.unwrap();

        db.employees()
            .create(
                EmployeeOwner::New(new_user("uuid-1", "alice@example.com")),
                &engineer(),
            )
            .await
            .unwrap();

        let result = db
            .employees()
            .create(EmployeeOwner::Existing("uuid-1"), &engineer())
            .await;
        assert!(is_unique_violation(&result.unwrap_err()));
    }

    #[tokio::test]
    async fn test_delete_employee_removes_user() {
        let db = Database::open(":memory:").await.unwrap();

        let employee_id = db
            .employees()
            .create(
                EmployeeOwner::New(new_user("uuid-1", "alice@example.com")),
                &engineer(),
            )
            .await
            .unwrap()
            .unwrap();

        assert!(db.employees().delete(&employee_id).await.unwrap());
        assert!(db.employees().get(&employee_id).await.unwrap().is_none());
        assert!(db.users().get_by_uuid("uuid-1").await.unwrap().is_none());
        assert!(!db.employees().delete(&employee_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_employee_and_user_fields() {
        let db = Database::open(":memory:").await.unwrap();

        let employee_id = db
            .employees()
            .create(
                EmployeeOwner::New(new_user("uuid-1", "alice@example.com")),
                &engineer(),
            )
            .await
            .unwrap()
            .unwrap();

        let changes = EmployeeUpdate {
            job_title: Some("Staff Engineer".into()),
            phone: Some("555-0100".into()),
            ..Default::default()
        };
        assert!(
            db.employees()
                .update(&employee_id, &changes)
                .await
                .unwrap()
        );

        let employee = db.employees().get(&employee_id).await.unwrap().unwrap();
        assert_eq!(employee.job_title, "Staff Engineer");
        assert_eq!(employee.department, "Engineering");
        assert_eq!(employee.user.phone.as_deref(), Some("555-0100"));

        assert!(
            !db.employees()
                .update("missing", &changes)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_list_search_and_paginate() {
        let db = Database::open(":memory:").await.unwrap();

        let people = [
            ("uuid-1", "alice@example.com", "Engineering"),
            ("uuid-2", "bob@example.com", "Design"),
            ("uuid-3", "carol@example.com", "Engineering"),
        ];
        for (uuid, email, department) in people {
            let employee = NewEmployee {
                department,
                ..engineer()
            };
            db.employees()
                .create(EmployeeOwner::New(new_user(uuid, email)), &employee)
                .await
                .unwrap();
        }

        let page = db
            .employees()
            .list(&EmployeeFilter {
                department: Some("Engineering".into()),
                ..EmployeeFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 2);

        let page = db
            .employees()
            .list(&EmployeeFilter {
                search: Some("BOB".into()),
                ..EmployeeFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.employees[0].user.email, "bob@example.com");

        let page = db
            .employees()
            .list(&EmployeeFilter {
                page: 2,
                limit: 2,
                ..EmployeeFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.employees.len(), 1);
        // Newest first, so the last page holds the first insert.
        assert_eq!(page.employees[0].user.id, "uuid-1");
    }

    #[tokio::test]
    async fn test_search_treats_wildcards_literally() {
        let db = Database::open(":memory:").await.unwrap();

        db.employees()
            .create(
                EmployeeOwner::New(new_user("uuid-1", "alice@example.com")),
                &engineer(),
            )
            .await
            .unwrap();

        let page = db
            .employees()
            .list(&EmployeeFilter {
                search: Some("%".into()),
                ..EmployeeFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 0);
    }
}
