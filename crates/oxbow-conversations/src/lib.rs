mod clickhouse_store;
mod domain;
mod error;
mod flatten;
mod pipeline;
mod schema;
mod store;

pub use clickhouse_store::ClickHouseConversationStore;
pub use domain::{
    BotResponse, ConversationEvent, EventKind, FlattenedTurn, SessionWindow, EVENT_ACTION,
    EVENT_BOT, EVENT_SESSION_STARTED, EVENT_USER,
};
pub use error::{StoreError, StoreResult};
pub use store::ConversationStore;
