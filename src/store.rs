use crate::config::PostgresConfig;
use crate::record::Record;
use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};

/// Builds the pool and probes the server. Runs before any sensor is touched.
pub async fn connect(postgres: &PostgresConfig) -> Result<PgPool> {
    let url = postgres
        .url
        .as_deref()
        .context("postgres.url is not configured")?;
    let pool = PgPoolOptions::new()
        .max_connections(postgres.pool_size)
        .connect(url)
        .await
        .context("failed to connect to postgres")?;

    let version: String = sqlx::query_scalar("SELECT version()")
        .fetch_one(&pool)
        .await
        .context("postgres connection probe failed")?;
    tracing::debug!(version = %version, "postgres connection validated");

    Ok(pool)
}

/// Appends the record as a single row. One attempt per batch; a failure
/// propagates to the caller, which owns closing the pool.
pub async fn insert_record(
    pool: &PgPool,
    table: &str,
    record: &Record,
) -> Result<(), sqlx::Error> {
    let mut builder = insert_builder(table, record);
    builder.build().execute(pool).await?;
    Ok(())
}

fn insert_builder(table: &str, record: &Record) -> QueryBuilder<'static, Postgres> {
    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("INSERT INTO ");
    builder.push(quote_ident(table));
    builder.push(" (");
    builder.push(quote_ident("timestamp"));
    for (column, _) in &record.columns {
        builder.push(", ");
        builder.push(quote_ident(column));
    }
    builder.push(") VALUES (");
    {
        let mut values = builder.separated(", ");
        values.push_bind(record.finalized_at);
        for (_, value) in &record.columns {
            values.push_bind(*value);
        }
    }
    builder.push(")");
    builder
}

// Column names come from the settings file, so identifiers are quoted rather
// than trusted.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
