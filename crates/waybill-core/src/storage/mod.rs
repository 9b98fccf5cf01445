//! PostgreSQL repositories.
//!
//! All SQL lives here and in [`crate::claim`]. Services never issue queries
//! directly; they go through a [`Storage`] handle.

use std::sync::Arc;

use sqlx::PgPool;

pub mod courier_requests;
pub mod schema;
pub mod shipments;

use crate::error::Result;

/// Repository handles sharing one connection pool.
#[derive(Clone)]
pub struct Storage {
    /// Delivery-side shipments.
    pub shipments: Arc<shipments::Repository>,

    /// Courier-side tracking rows.
    pub courier_requests: Arc<courier_requests::Repository>,

    pool: Arc<PgPool>,
}

impl Storage {
    /// Creates a storage handle over `pool`.
    pub fn new(pool: PgPool) -> Self {
        let pool = Arc::new(pool);

        Self {
            shipments: Arc::new(shipments::Repository::new(pool.clone())),
            courier_requests: Arc::new(courier_requests::Repository::new(pool.clone())),
            pool,
        }
    }

    /// Returns the shared pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Verifies database connectivity with `SELECT 1`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the connection is unhealthy.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&*self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn storage_can_be_created_lazily() {
        let pool = PgPool::connect_lazy("postgresql://localhost/waybill");
        assert!(pool.is_ok());
        if let Ok(pool) = pool {
            let storage = Storage::new(pool);
            assert_eq!(Arc::strong_count(&storage.pool), 3);
        }
    }
}
