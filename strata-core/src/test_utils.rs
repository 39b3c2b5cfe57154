use std::sync::Arc;

use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;

use crate::dialect::SqliteDialect;
use crate::executor::Executor;

/// Lightweight test helper for constructing a dedicated in-memory database.
///
/// The pool holds exactly one connection that is never recycled: an in-memory
/// SQLite database disappears with its connection.
pub struct MockDatabase {
    pool: AnyPool,
}

impl MockDatabase {
    pub async fn new_sqlite() -> Result<Self, sqlx::Error> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    /// An executor over this database with the SQLite dialect.
    pub fn executor(&self) -> Executor {
        Executor::new(self.pool.clone(), Arc::new(SqliteDialect))
    }

    pub fn into_pool(self) -> AnyPool {
        self.pool
    }
}
