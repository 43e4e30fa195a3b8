use async_trait::async_trait;
use oxbow_clickhouse::{escape_identifier, escape_literal, ClickHouseClient};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use crate::domain::{
    ConversationEvent, FlattenedTurn, SessionWindow, EVENT_SESSION_STARTED, RECORD_TYPE_EVENT,
    RECORD_TYPE_FLATTENED,
};
use crate::error::{StoreError, StoreResult};
use crate::flatten::flatten_batch;
use crate::pipeline::Pipeline;
use crate::schema;
use crate::store::ConversationStore;

/// Conversation event store over a ClickHouse collection.
///
/// One row per immutable event document; the flattened per-turn summary rows
/// live in the same collection tagged with their own record type. Handles are
/// cheap to clone and safe to share across conversation workers; writes to
/// the same conversation must be serialized by the caller.
#[derive(Clone)]
pub struct ClickHouseConversationStore {
    ch: ClickHouseClient,
    collection: String,
}

#[derive(Debug, Deserialize)]
struct EventGroupRow {
    events: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct LastSessionRow {
    last_timestamp: f64,
}

#[derive(Debug, Deserialize)]
struct KeyRow {
    sender_id: String,
}

impl ClickHouseConversationStore {
    /// Opens the store and ensures the collection schema and indexes exist.
    pub async fn connect(ch: ClickHouseClient, collection: impl Into<String>) -> StoreResult<Self> {
        let collection = collection.into();
        schema::ensure_schema(&ch, &collection)
            .await
            .map_err(|err| StoreError::backend(err.to_string()))?;
        Ok(Self { ch, collection })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn table_ref(&self) -> String {
        format!(
            "{}.{}",
            escape_identifier(&self.ch.config().database),
            escape_identifier(&self.collection)
        )
    }

    fn map_backend<T>(result: anyhow::Result<T>) -> StoreResult<T> {
        result.map_err(|err| StoreError::backend(err.to_string()))
    }

    fn validate_key(sender_id: &str) -> StoreResult<()> {
        // The empty string is reserved: legacy rows awaiting migration hold
        // an empty canonical key column.
        if sender_id.is_empty() {
            return Err(StoreError::invalid_key("conversation key must not be empty"));
        }
        Ok(())
    }

    /// Timestamp boundary of the most recent session, or the unbounded
    /// window when no session-start marker exists. When several markers
    /// share the maximum timestamp, the window starts at that timestamp and
    /// callers must not depend on which marker produced it.
    pub async fn session_window(&self, sender_id: &str) -> StoreResult<SessionWindow> {
        Self::validate_key(sender_id)?;

        let sql = Pipeline::over(&self.table_ref())
            .match_eq("sender_id", sender_id)
            .match_eq("record_type", RECORD_TYPE_EVENT)
            .match_eq("event_type", EVENT_SESSION_STARTED)
            .latest("sender_id", "event_timestamp");

        let rows: Vec<LastSessionRow> = Self::map_backend(self.ch.query_rows(&sql, None).await)?;
        Ok(rows
            .first()
            .map(|row| SessionWindow::From(row.last_timestamp))
            .unwrap_or(SessionWindow::Unbounded))
    }

    /// Ordered events for one conversation, or `None` when the key has no
    /// rows at all. Session-scoped reads exclude the session-start markers
    /// themselves.
    async fn stored_events(
        &self,
        sender_id: &str,
        all_sessions: bool,
    ) -> StoreResult<Option<Vec<ConversationEvent>>> {
        let mut pipeline = Pipeline::over(&self.table_ref())
            .match_eq("sender_id", sender_id)
            .match_eq("record_type", RECORD_TYPE_EVENT);

        if !all_sessions {
            pipeline = pipeline.match_ne("event_type", EVENT_SESSION_STARTED);
            if let SessionWindow::From(start) = self.session_window(sender_id).await? {
                pipeline = pipeline.match_at_least("event_timestamp", start);
            }
        }

        let sql = pipeline.collect_sorted("sender_id", "event_timestamp", "event_json");
        let rows: Vec<EventGroupRow> = Self::map_backend(self.ch.query_rows(&sql, None).await)?;

        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };
        if row.events.is_empty() {
            return Ok(None);
        }

        let mut events = Vec::with_capacity(row.events.len());
        for document in row.events {
            let event = serde_json::from_str::<ConversationEvent>(&document)
                .map_err(|err| StoreError::corrupt(format!("{err}: {document}")))?;
            events.push(event);
        }
        Ok(Some(events))
    }

    /// Read path shared by `retrieve` and `retrieve_full`: when the string
    /// key has no rows and the identifier looks numeric, rewrite any rows
    /// still stored under the legacy integer key and retry the read once.
    async fn events_with_migration(
        &self,
        sender_id: &str,
        all_sessions: bool,
    ) -> StoreResult<Option<Vec<ConversationEvent>>> {
        Self::validate_key(sender_id)?;

        if let Some(events) = self.stored_events(sender_id, all_sessions).await? {
            return Ok(Some(events));
        }

        if !numeric_key(sender_id) {
            return Ok(None);
        }

        self.migrate_legacy_key(sender_id).await?;
        self.stored_events(sender_id, all_sessions).await
    }

    /// Best-effort rewrite of rows persisted under the deprecated integer
    /// key. Matching zero rows is success; a concurrent write under the
    /// legacy key may leave stragglers, which the next read sweeps up.
    async fn migrate_legacy_key(&self, sender_id: &str) -> StoreResult<()> {
        debug!(sender_id, "rewriting legacy integer-keyed rows");

        let sql = format!(
            "ALTER TABLE {} UPDATE sender_id = {}, legacy_sender_id = 0 WHERE legacy_sender_id = {} AND sender_id = '' SETTINGS mutations_sync = 1",
            self.table_ref(),
            escape_literal(sender_id),
            sender_id,
        );
        Self::map_backend(self.ch.execute(&sql).await)
    }

    fn event_row(&self, sender_id: &str, conversation_id: &str, event: &ConversationEvent) -> Value {
        json!({
            "sender_id": sender_id,
            "legacy_sender_id": 0,
            "conversation_id": conversation_id,
            "record_type": RECORD_TYPE_EVENT,
            "event_type": event.type_tag(),
            "event_name": event.name(),
            "event_timestamp": event.timestamp(),
            "event_json": event.document().to_string(),
        })
    }

    fn flattened_row(&self, sender_id: &str, conversation_id: &str, turn: &FlattenedTurn) -> Value {
        json!({
            "sender_id": sender_id,
            "legacy_sender_id": 0,
            "conversation_id": conversation_id,
            "record_type": RECORD_TYPE_FLATTENED,
            "event_type": "",
            "event_name": "",
            "event_timestamp": turn.timestamp,
            "event_json": turn.data_json().to_string(),
        })
    }
}

#[async_trait]
impl ConversationStore for ClickHouseConversationStore {
    async fn save(&self, sender_id: &str, events: &[ConversationEvent]) -> StoreResult<()> {
        Self::validate_key(sender_id)?;

        let stored = self
            .stored_events(sender_id, true)
            .await?
            .map(|persisted| persisted.len())
            .unwrap_or(0);
        let suffix = events.get(stored..).unwrap_or_default();
        if suffix.is_empty() {
            return Ok(());
        }

        let conversation_id = Uuid::now_v7().simple().to_string();
        let mut rows: Vec<Value> = suffix
            .iter()
            .map(|event| self.event_row(sender_id, &conversation_id, event))
            .collect();
        if let Some(turn) = flatten_batch(suffix) {
            rows.push(self.flattened_row(sender_id, &conversation_id, &turn));
        }

        debug!(sender_id, appended = rows.len(), "appending suffix batch");
        Self::map_backend(self.ch.insert_json_rows(&self.collection, &rows).await)
    }

    async fn retrieve(&self, sender_id: &str) -> StoreResult<Option<Vec<ConversationEvent>>> {
        self.events_with_migration(sender_id, false).await
    }

    async fn retrieve_full(&self, sender_id: &str) -> StoreResult<Option<Vec<ConversationEvent>>> {
        self.events_with_migration(sender_id, true).await
    }

    async fn keys(&self) -> StoreResult<Vec<String>> {
        let sql = Pipeline::over(&self.table_ref())
            .match_ne("sender_id", "")
            .distinct_keys("sender_id");

        let rows: Vec<KeyRow> = Self::map_backend(self.ch.query_rows(&sql, None).await)?;
        Ok(rows.into_iter().map(|row| row.sender_id).collect())
    }
}

fn numeric_key(sender_id: &str) -> bool {
    !sender_id.is_empty()
        && sender_id.bytes().all(|b| b.is_ascii_digit())
        && sender_id.parse::<i64>().is_ok()
}
