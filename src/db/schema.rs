//! Schema inspection against `sqlite_master`.

use std::collections::BTreeMap;

use serde::Serialize;
use sqlx::SqlitePool;

use crate::db::policy::{policy_names, rls_enabled, Table};
use crate::error::Result;

/// Summary of the live schema and the access policies attached to it.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaReport {
    pub tables: usize,
    pub indexes: usize,
    /// True when every application table is known and has policies.
    pub rls_enabled: bool,
    pub policies: BTreeMap<String, Vec<&'static str>>,
}

/// Application tables, excluding SQLite internals and migration bookkeeping.
pub async fn user_tables(pool: &SqlitePool) -> Result<Vec<String>> {
    let names = sqlx::query_scalar::<_, String>(
        r#"
        SELECT name FROM sqlite_master
        WHERE type = 'table'
          AND name NOT LIKE 'sqlite_%'
          AND name NOT LIKE '_sqlx_%'
        ORDER BY name
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(names)
}

/// Explicitly created indexes (automatic UNIQUE / PRIMARY KEY indexes excluded).
pub async fn user_indexes(pool: &SqlitePool) -> Result<Vec<String>> {
    let names = sqlx::query_scalar::<_, String>(
        r#"
        SELECT name FROM sqlite_master
        WHERE type = 'index'
          AND name NOT LIKE 'sqlite_%'
          AND tbl_name NOT LIKE '_sqlx_%'
        ORDER BY name
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(names)
}

pub async fn inspect(pool: &SqlitePool) -> Result<SchemaReport> {
    let tables = user_tables(pool).await?;
    let indexes = user_indexes(pool).await?;
    let known: Vec<Option<Table>> = tables.iter().map(|name| Table::from_name(name)).collect();
    let rls = known.iter().all(|t| t.is_some_and(rls_enabled));
    let policies = known
        .into_iter()
        .flatten()
        .map(|t| (t.name().to_string(), policy_names(t).collect()))
        .collect();
    Ok(SchemaReport {
        tables: tables.len(),
        indexes: indexes.len(),
        rls_enabled: rls,
        policies,
    })
}

/// Connectivity check used by the status and health endpoints.
pub async fn ping(pool: &SqlitePool) -> bool {
    sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(pool)
        .await
        .is_ok()
}
