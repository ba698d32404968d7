//! Postgres-backed entity store.
//!
//! ## Error Mapping
//!
//! sqlx errors are classified into `StoreError` as follows:
//!
//! | sqlx error | Postgres class | StoreError | Scenario |
//! |------------|----------------|------------|----------|
//! | Io / PoolTimedOut / PoolClosed | N/A | `Transient` | Connection or pool trouble |
//! | Database | `22xxx` (data) | `Permanent` | Malformed data rejected by the store |
//! | Database | `23xxx` (integrity) | `Permanent` | Constraint violation |
//! | Database | `42xxx` (syntax/undefined) | `Permanent` | Missing relation, bad statement |
//! | Database | any other class | `Transient` | Throttling, cancelled queries, resource limits |
//! | Decode / ColumnDecode | N/A | `Permanent` | Row shape mismatch |
//! | anything else | N/A | `Transient` | Network-level failures |
//!
//! ## Thread Safety
//!
//! Uses the sqlx connection pool, which is `Send + Sync`; the pool is the
//! single shared resource across consumer invocations.

use std::sync::Arc;

use sqlx::{PgPool, Row};
use tracing::instrument;

use dinesync_core::{EntityKind, Restaurant, User};

use super::r#trait::{EntityStore, StoreError};
use async_trait::async_trait;

const CREATE_USERS: &str = r#"
    CREATE TABLE IF NOT EXISTS users (
        id BIGINT PRIMARY KEY,
        name TEXT NOT NULL
    )
"#;

const CREATE_RESTAURANTS: &str = r#"
    CREATE TABLE IF NOT EXISTS restaurants (
        id BIGINT PRIMARY KEY,
        name TEXT NOT NULL,
        address TEXT NOT NULL,
        cuisine TEXT NOT NULL
    )
"#;

/// Postgres entity store over an injected connection pool.
///
/// The pool's lifecycle (connect, close) is owned by the process's startup
/// sequence and passed in explicitly; this type never constructs ambient
/// global state.
#[derive(Debug, Clone)]
pub struct PostgresEntityStore {
    pool: Arc<PgPool>,
}

impl PostgresEntityStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl EntityStore for PostgresEntityStore {
    #[instrument(skip(self), fields(table = %entity.table_name()), err)]
    async fn ensure_schema(&self, entity: EntityKind) -> Result<(), StoreError> {
        let ddl = match entity {
            EntityKind::User => CREATE_USERS,
            EntityKind::Restaurant => CREATE_RESTAURANTS,
        };

        match sqlx::query(ddl).execute(&*self.pool).await {
            Ok(_) => Ok(()),
            // Concurrent CREATE TABLE IF NOT EXISTS can still race on the
            // catalog's unique index; both invocations end with the table
            // existing, so a unique violation here is success.
            Err(e) if is_unique_violation(&e) => Ok(()),
            Err(e) => Err(map_sqlx_error("ensure_schema", e)),
        }
    }

    #[instrument(skip(self, name), fields(id = id), err)]
    async fn insert_user(&self, id: i64, name: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (id, name)
            VALUES ($1, $2)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(name)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_user", e))?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), fields(id = id), err)]
    async fn delete_user(&self, id: i64) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_user", e))?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self, name, address, cuisine), fields(id = id), err)]
    async fn insert_restaurant(
        &self,
        id: i64,
        name: &str,
        address: &str,
        cuisine: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO restaurants (id, name, address, cuisine)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(address)
        .bind(cuisine)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_restaurant", e))?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), fields(id = id), err)]
    async fn delete_restaurant(&self, id: i64) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM restaurants WHERE id = $1")
            .bind(id)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_restaurant", e))?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self), err)]
    async fn all_users(&self) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query("SELECT id, name FROM users ORDER BY id")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("all_users", e))?;

        rows.into_iter()
            .map(|row| {
                Ok(User {
                    id: row
                        .try_get("id")
                        .map_err(|e| map_sqlx_error("all_users", e))?,
                    name: row
                        .try_get("name")
                        .map_err(|e| map_sqlx_error("all_users", e))?,
                })
            })
            .collect()
    }

    #[instrument(skip(self), err)]
    async fn all_restaurants(&self) -> Result<Vec<Restaurant>, StoreError> {
        let rows = sqlx::query("SELECT id, name, address, cuisine FROM restaurants ORDER BY id")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("all_restaurants", e))?;

        rows.into_iter()
            .map(|row| {
                Ok(Restaurant {
                    id: row
                        .try_get("id")
                        .map_err(|e| map_sqlx_error("all_restaurants", e))?,
                    name: row
                        .try_get("name")
                        .map_err(|e| map_sqlx_error("all_restaurants", e))?,
                    address: row
                        .try_get("address")
                        .map_err(|e| map_sqlx_error("all_restaurants", e))?,
                    cuisine: row
                        .try_get("cuisine")
                        .map_err(|e| map_sqlx_error("all_restaurants", e))?,
                })
            })
            .collect()
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23505"),
        _ => false,
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());

            match db_err.code().as_deref().map(|c| &c[..2.min(c.len())]) {
                // Data exceptions, integrity violations, and missing
                // relations/statements cannot be fixed by retrying.
                Some("22") | Some("23") | Some("42") => StoreError::permanent(msg),
                // Everything else (resource limits, cancelled queries,
                // serialization failures) is worth a retry.
                _ => StoreError::transient(msg),
            }
        }
        sqlx::Error::Io(e) => StoreError::transient(format!("io error in {operation}: {e}")),
        sqlx::Error::PoolTimedOut => {
            StoreError::transient(format!("pool timed out in {operation}"))
        }
        sqlx::Error::PoolClosed => StoreError::transient(format!("pool closed in {operation}")),
        sqlx::Error::Decode(e) => {
            StoreError::permanent(format!("decode error in {operation}: {e}"))
        }
        sqlx::Error::ColumnDecode { index, source } => StoreError::permanent(format!(
            "column decode error in {operation} at {index}: {source}"
        )),
        other => StoreError::transient(format!("sqlx error in {operation}: {other}")),
    }
}
