//! Postgres connection-pool bootstrap, grounded in the teacher crate's own
//! `db::init_db`/`db::DbConfig`: a `PgPoolOptions` built from [`crate::config::Config`]
//! and a thin `init_db_default` wrapper that reads `Config::default()`.
//! Unlike the teacher crate this carries no hand-written row-mapping SQL —
//! the only tables this service owns are the two the [`crate::kvs::postgres`]
//! and [`crate::messaging::postgres`] adapters create via `ensure_schema`.

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::Config;

pub async fn init_db(config: &Config) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect(&config.database_url)
        .await
        .context("failed to connect to database")
}

pub async fn init_db_default() -> Result<PgPool> {
    init_db(&Config::default()).await
}
