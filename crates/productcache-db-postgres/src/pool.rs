//! Pool setup for the PostgreSQL backing store.

use sqlx_core::pool::PoolOptions;
use sqlx_postgres::{PgPool, Postgres};
use tracing::{debug, info, instrument};

use crate::config::PostgresConfig;
use crate::error::{PostgresError, Result};

/// Opens the pool described by `config`.
///
/// The product table is tiny and hot, so a quarter of the pool is kept warm.
#[instrument(skip(config), fields(url = %redact_url(&config.url)))]
pub(crate) async fn connect(config: &PostgresConfig) -> Result<PgPool> {
    validate(config)?;

    info!(
        pool_size = config.pool_size,
        connect_timeout_ms = config.connect_timeout.as_millis() as u64,
        "Opening backing store pool"
    );

    let pool = PoolOptions::<Postgres>::new()
        .max_connections(config.pool_size)
        .min_connections((config.pool_size / 4).max(1))
        .acquire_timeout(config.connect_timeout)
        .idle_timeout(config.idle_timeout)
        .connect(&config.url)
        .await?;

    debug!("Backing store pool ready");
    Ok(pool)
}

fn validate(config: &PostgresConfig) -> Result<()> {
    if config.pool_size == 0 {
        return Err(PostgresError::config("pool_size must be > 0"));
    }
    if !(config.url.starts_with("postgres://") || config.url.starts_with("postgresql://")) {
        return Err(PostgresError::config(format!(
            "unsupported connection URL {}",
            redact_url(&config.url)
        )));
    }
    Ok(())
}

/// Replaces the password in `url`, if any, for logging.
pub(crate) fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((userinfo, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match userinfo.split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:****@{host}"),
        None => url.to_string(),
    }
}
