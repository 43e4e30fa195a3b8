use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Event-type tags the store interprets. Every other tag is carried opaquely.
pub const EVENT_SESSION_STARTED: &str = "session_started";
pub const EVENT_USER: &str = "user";
pub const EVENT_ACTION: &str = "action";
pub const EVENT_BOT: &str = "bot";

pub(crate) const RECORD_TYPE_EVENT: &str = "event";
pub(crate) const RECORD_TYPE_FLATTENED: &str = "flattened";

/// Parsed view of an event document, limited to the kinds the store needs
/// for session windowing and turn summarization.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    SessionStarted,
    User {
        text: String,
        intent: String,
        confidence: f64,
    },
    Action {
        name: String,
    },
    Bot {
        text: String,
        data: Value,
    },
    Other,
}

/// One immutable dialogue-engine event.
///
/// The raw document is preserved verbatim: serializing an event yields
/// exactly the document it was built from, whatever fields the dialogue
/// engine put in it. The parsed [`EventKind`] view only covers the tags the
/// store acts on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub struct ConversationEvent {
    raw: Value,
    kind: EventKind,
    type_tag: String,
    name: String,
    timestamp: f64,
}

impl ConversationEvent {
    pub fn from_document(raw: Value) -> Self {
        let type_tag = raw
            .get("event")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let timestamp = raw
            .get("timestamp")
            .and_then(Value::as_f64)
            .unwrap_or_default();
        let name = raw
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let kind = match type_tag.as_str() {
            EVENT_SESSION_STARTED => EventKind::SessionStarted,
            EVENT_USER => EventKind::User {
                text: raw
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                intent: raw
                    .pointer("/parse_data/intent/name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                confidence: raw
                    .pointer("/parse_data/intent/confidence")
                    .and_then(Value::as_f64)
                    .unwrap_or_default(),
            },
            EVENT_ACTION => EventKind::Action { name: name.clone() },
            EVENT_BOT => EventKind::Bot {
                text: raw
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                data: raw.get("data").cloned().unwrap_or(Value::Null),
            },
            _ => EventKind::Other,
        };

        Self {
            raw,
            kind,
            type_tag,
            name,
            timestamp,
        }
    }

    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    /// `name` field of the document, empty when absent.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    /// The verbatim document as produced by the dialogue engine.
    pub fn document(&self) -> &Value {
        &self.raw
    }
}

impl From<Value> for ConversationEvent {
    fn from(raw: Value) -> Self {
        Self::from_document(raw)
    }
}

impl From<ConversationEvent> for Value {
    fn from(event: ConversationEvent) -> Self {
        event.raw
    }
}

/// Timestamp boundary of the active session: either the full history or the
/// half-open interval starting at the most recent session-start marker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SessionWindow {
    Unbounded,
    From(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BotResponse {
    pub text: String,
    pub data: Value,
}

/// Denormalized summary of one user-turn-plus-response cycle, derived from
/// a single write batch. Never updated in place and never rebuilt from
/// history.
#[derive(Debug, Clone, PartialEq)]
pub struct FlattenedTurn {
    pub timestamp: f64,
    pub user_input: String,
    pub intent: String,
    pub confidence: f64,
    pub actions: Vec<String>,
    pub bot_responses: Vec<BotResponse>,
}

impl FlattenedTurn {
    pub(crate) fn data_json(&self) -> Value {
        json!({
            "user_input": self.user_input,
            "intent": self.intent,
            "confidence": self.confidence,
            "action": self.actions,
            "bot_response": self
                .bot_responses
                .iter()
                .map(|response| json!({"text": response.text, "data": response.data}))
                .collect::<Vec<_>>(),
        })
    }
}
