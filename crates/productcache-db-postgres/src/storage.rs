//! PostgreSQL implementation of the ProductStorage trait.

use async_trait::async_trait;
use sqlx_core::query_as::query_as;
use sqlx_postgres::PgPool;
use tracing::{debug, instrument};

use productcache_storage::{Product, ProductId, ProductPatch, ProductStorage, StorageError};

use crate::config::PostgresConfig;
use crate::error::PostgresError;
use crate::migrations;
use crate::pool;

type ProductRow = (i64, String, String, String);

const SELECT_PRODUCT: &str =
    r#"SELECT id::bigint, name, description, price FROM "Product" WHERE id = $1"#;

// COALESCE keeps the stored value for every field the patch leaves unset.
const UPDATE_PRODUCT: &str = r#"UPDATE "Product"
       SET name = COALESCE($2, name),
           description = COALESCE($3, description),
           price = COALESCE($4, price)
     WHERE id = $1
 RETURNING id::bigint, name, description, price"#;

fn row_to_product((id, name, description, price): ProductRow) -> Product {
    Product {
        id,
        name,
        description,
        price,
    }
}

/// PostgreSQL backing store for products.
#[derive(Debug, Clone)]
pub struct PostgresProductStorage {
    pool: PgPool,
}

impl PostgresProductStorage {
    /// Creates a new `PostgresProductStorage` with the given configuration.
    ///
    /// This will:
    /// 1. Create a connection pool
    /// 2. Run migrations (if configured)
    ///
    /// # Errors
    ///
    /// Returns an error if the connection pool cannot be created
    /// or if migrations fail.
    pub async fn new(config: PostgresConfig) -> Result<Self, StorageError> {
        let pool = pool::connect(&config).await?;

        if config.run_migrations {
            migrations::run(&pool).await?;
        }

        Ok(Self { pool })
    }

    /// Creates a new `PostgresProductStorage` from an existing connection pool.
    ///
    /// Migrations are not run automatically when using this constructor.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns a reference to the connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ProductStorage for PostgresProductStorage {
    #[instrument(skip(self))]
    async fn find_by_id(&self, id: ProductId) -> Result<Option<Product>, StorageError> {
        let row: Option<ProductRow> = query_as(SELECT_PRODUCT)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(PostgresError::from)?;

        debug!(found = row.is_some(), "product lookup");
        Ok(row.map(row_to_product))
    }

    #[instrument(skip(self, patch))]
    async fn update(
        &self,
        id: ProductId,
        patch: &ProductPatch,
    ) -> Result<Option<Product>, StorageError> {
        let row: Option<ProductRow> = query_as(UPDATE_PRODUCT)
            .bind(id)
            .bind(patch.name.as_deref())
            .bind(patch.description.as_deref())
            .bind(patch.price.as_deref())
            .fetch_optional(&self.pool)
            .await
            .map_err(PostgresError::from)?;

        debug!(found = row.is_some(), "product update");
        Ok(row.map(row_to_product))
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
