//! Idempotent DDL for the conversation collection and its query indexes.

use anyhow::{Context, Result};
use oxbow_clickhouse::{escape_identifier, validate_identifier, ClickHouseClient};

/// Ensures the database, the collection table and every index the store's
/// query shapes depend on. Safe to run on every construction; each statement
/// is guarded with IF NOT EXISTS.
pub(crate) async fn ensure_schema(ch: &ClickHouseClient, collection: &str) -> Result<()> {
    validate_identifier(&ch.config().database)?;
    validate_identifier(collection)?;

    for statement in schema_statements(&ch.config().database, collection) {
        ch.request_text(&statement, None, None, false, None)
            .await
            .with_context(|| format!("failed schema statement: {statement}"))?;
    }

    Ok(())
}

pub(crate) fn schema_statements(database: &str, collection: &str) -> Vec<String> {
    let db = escape_identifier(database);
    let table = format!("{db}.{}", escape_identifier(collection));

    let mut statements = vec![
        format!("CREATE DATABASE IF NOT EXISTS {db}"),
        format!(
            "CREATE TABLE IF NOT EXISTS {table} (\
             sender_id String, \
             legacy_sender_id Int64 DEFAULT 0, \
             conversation_id String, \
             record_type LowCardinality(String) DEFAULT 'event', \
             event_type LowCardinality(String) DEFAULT '', \
             event_name String DEFAULT '', \
             event_timestamp Float64, \
             event_json String, \
             inserted_at DateTime64(3) DEFAULT now64(3)\
             ) ENGINE = MergeTree ORDER BY (sender_id, event_timestamp)"
        ),
    ];

    let indexes: [(&str, &str, &str); 6] = [
        ("idx_sender_type", "(sender_id, event_type)", "bloom_filter"),
        ("idx_record_type_ts", "(record_type, event_timestamp)", "minmax"),
        (
            "idx_sender_conversation",
            "(sender_id, conversation_id)",
            "bloom_filter",
        ),
        ("idx_type_ts", "(event_type, event_timestamp)", "minmax"),
        ("idx_name_ts", "(event_name, event_timestamp)", "minmax"),
        ("idx_ts", "(event_timestamp)", "minmax"),
    ];

    for (name, expr, kind) in indexes {
        statements.push(format!(
            "ALTER TABLE {table} ADD INDEX IF NOT EXISTS {name} {expr} TYPE {kind} GRANULARITY 4"
        ));
    }

    statements
}
