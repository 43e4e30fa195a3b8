use async_trait::async_trait;

use crate::domain::ConversationEvent;
use crate::error::StoreResult;

/// Persistence surface handed to the dialogue engine.
///
/// Absence of a conversation is reported as `None`, never as an error or an
/// empty sequence; callers rely on the distinction.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Persists the suffix of `events` not yet stored under `sender_id`.
    ///
    /// `events` must be the conversation's full in-memory history, in order.
    /// The unsaved suffix is found by comparing lengths against what is
    /// already persisted, which is only sound while the history is
    /// append-only and exactly one writer is active per conversation at a
    /// time; callers serialize writes per conversation themselves.
    async fn save(&self, sender_id: &str, events: &[ConversationEvent]) -> StoreResult<()>;

    /// Events of the current session, oldest first, excluding the
    /// session-start marker itself.
    async fn retrieve(&self, sender_id: &str) -> StoreResult<Option<Vec<ConversationEvent>>>;

    /// The entire event history, oldest first.
    async fn retrieve_full(&self, sender_id: &str) -> StoreResult<Option<Vec<ConversationEvent>>>;

    /// Every conversation key known to the store.
    async fn keys(&self) -> StoreResult<Vec<String>>;
}
