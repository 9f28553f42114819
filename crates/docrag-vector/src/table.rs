//! LanceDB connection and housekeeping helpers.
//!
//! Opens the database, creates tables on demand and keeps a small key/value
//! `meta` table for facts that must survive restarts (dimension, metric,
//! write sequence).
use std::sync::Arc;

use arrow_array::{Array, RecordBatch, RecordBatchIterator, StringArray, TimestampMillisecondArray};
use arrow_schema::{ArrowError, Schema};
use chrono::Utc;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection};

use docrag_core::error::{Error, Result};

use crate::schema::build_meta_schema;

pub async fn open_db(uri: &str) -> Result<Connection> {
    connect(uri).execute().await.map_err(Error::storage)
}

pub async fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let names = conn.table_names().execute().await.map_err(Error::storage)?;
    Ok(names.iter().any(|n| n == name))
}

pub async fn ensure_table(conn: &Connection, name: &str, schema: Arc<Schema>) -> Result<()> {
    if table_exists(conn, name).await? {
        return Ok(());
    }
    let empty: Vec<std::result::Result<RecordBatch, ArrowError>> = Vec::new();
    let iter = RecordBatchIterator::new(empty.into_iter(), schema);
    conn.create_table(name, Box::new(iter)).execute().await.map_err(Error::storage)?;
    Ok(())
}

pub async fn set_meta(conn: &Connection, table: &str, key: &str, value: &str) -> Result<()> {
    ensure_table(conn, table, build_meta_schema()).await?;
    let t = conn.open_table(table).execute().await.map_err(Error::storage)?;
    let rb = RecordBatch::try_new(
        build_meta_schema(),
        vec![
            Arc::new(StringArray::from(vec![key.to_string()])),
            Arc::new(StringArray::from(vec![value.to_string()])),
            Arc::new(TimestampMillisecondArray::from(vec![Utc::now().timestamp_millis()])),
        ],
    )
    .map_err(Error::storage)?;
    let reader = Box::new(RecordBatchIterator::new(vec![Ok(rb)].into_iter(), build_meta_schema()));
    let mut mi = t.merge_insert(&["key"]);
    mi.when_matched_update_all(None).when_not_matched_insert_all();
    mi.execute(reader).await.map_err(Error::storage)?;
    Ok(())
}

pub async fn get_meta(conn: &Connection, table: &str, key: &str) -> Result<Option<String>> {
    if !table_exists(conn, table).await? {
        return Ok(None);
    }
    let t = conn.open_table(table).execute().await.map_err(Error::storage)?;
    let mut stream = t
        .query()
        .only_if(format!("key = '{}'", escape_literal(key)))
        .execute()
        .await
        .map_err(Error::storage)?;
    while let Some(batch) = stream.try_next().await.map_err(Error::storage)? {
        if batch.num_rows() == 0 {
            continue;
        }
        let val = batch
            .column_by_name("value")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>())
            .ok_or_else(|| Error::Storage("meta.value column missing".to_string()))?;
        if val.is_valid(0) {
            return Ok(Some(val.value(0).to_string()));
        }
    }
    Ok(None)
}

/// Doubles single quotes for use inside a SQL string literal.
pub fn escape_literal(s: &str) -> String {
    s.replace('\'', "''")
}
