use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::config::Config;

pub type DbPool = PgPool;

pub const MIGRATIONS: &str = include_str!("schema.sql");

pub async fn init_pool(config: &Config) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await
}

pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(MIGRATIONS).execute(pool).await?;
    log::info!("Database migrations complete");
    Ok(())
}
