use crate::domain::{BotResponse, ConversationEvent, EventKind, FlattenedTurn};

/// Derives the denormalized turn summary for one write batch.
///
/// Only the first `user` event seeds the turn; every `action` name and every
/// `bot` response in the batch accumulates in encounter order. Batches
/// without a `user` event produce nothing.
pub(crate) fn flatten_batch(suffix: &[ConversationEvent]) -> Option<FlattenedTurn> {
    let mut turn: Option<FlattenedTurn> = None;
    let mut actions = Vec::new();
    let mut bot_responses = Vec::new();

    for event in suffix {
        match event.kind() {
            EventKind::User {
                text,
                intent,
                confidence,
            } => {
                if turn.is_none() {
                    turn = Some(FlattenedTurn {
                        timestamp: event.timestamp(),
                        user_input: text.clone(),
                        intent: intent.clone(),
                        confidence: *confidence,
                        actions: Vec::new(),
                        bot_responses: Vec::new(),
                    });
                }
            }
            EventKind::Action { name } => actions.push(name.clone()),
            EventKind::Bot { text, data } => bot_responses.push(BotResponse {
                text: text.clone(),
                data: data.clone(),
            }),
            EventKind::SessionStarted | EventKind::Other => {}
        }
    }

    let mut turn = turn?;
    turn.actions = actions;
    turn.bot_responses = bot_responses;
    Some(turn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(document: serde_json::Value) -> ConversationEvent {
        ConversationEvent::from_document(document)
    }

    #[test]
    fn one_user_two_actions_one_bot_yields_one_turn() {
        let suffix = [
            event(json!({
                "event": "user",
                "timestamp": 10.0,
                "text": "find hotels in lisbon",
                "parse_data": {"intent": {"name": "find_hotels", "confidence": 0.88}},
            })),
            event(json!({"event": "action", "timestamp": 10.5, "name": "action_search"})),
            event(json!({"event": "action", "timestamp": 10.9, "name": "action_rank"})),
            event(json!({
                "event": "bot",
                "timestamp": 11.2,
                "text": "found 3 hotels",
                "data": {"elements": [1, 2, 3]},
            })),
        ];

        let turn = flatten_batch(&suffix).expect("a user event seeds a turn");
        assert_eq!(turn.timestamp, 10.0);
        assert_eq!(turn.user_input, "find hotels in lisbon");
        assert_eq!(turn.intent, "find_hotels");
        assert_eq!(turn.confidence, 0.88);
        assert_eq!(turn.actions, vec!["action_search", "action_rank"]);
        assert_eq!(turn.bot_responses.len(), 1);
        assert_eq!(turn.bot_responses[0].text, "found 3 hotels");
        assert_eq!(turn.bot_responses[0].data, json!({"elements": [1, 2, 3]}));
    }

    #[test]
    fn batches_without_a_user_event_produce_nothing() {
        let suffix = [
            event(json!({"event": "action", "timestamp": 1.0, "name": "action_listen"})),
            event(json!({"event": "bot", "timestamp": 1.5, "text": "hello"})),
        ];

        assert!(flatten_batch(&suffix).is_none());
    }

    #[test]
    fn first_user_event_wins_when_a_batch_spans_two_turns() {
        let suffix = [
            event(json!({
                "event": "user",
                "timestamp": 5.0,
                "text": "first",
                "parse_data": {"intent": {"name": "greet", "confidence": 0.9}},
            })),
            event(json!({"event": "bot", "timestamp": 5.5, "text": "hi"})),
            event(json!({
                "event": "user",
                "timestamp": 6.0,
                "text": "second",
                "parse_data": {"intent": {"name": "bye", "confidence": 0.8}},
            })),
        ];

        let turn = flatten_batch(&suffix).expect("turn");
        assert_eq!(turn.user_input, "first");
        assert_eq!(turn.intent, "greet");
        assert_eq!(turn.bot_responses.len(), 1);
    }

    #[test]
    fn session_markers_and_opaque_events_do_not_contribute() {
        let suffix = [
            event(json!({"event": "session_started", "timestamp": 0.0})),
            event(json!({"event": "slot", "timestamp": 0.5, "name": "city", "value": "lisbon"})),
            event(json!({
                "event": "user",
                "timestamp": 1.0,
                "text": "hi",
                "parse_data": {"intent": {"name": "greet", "confidence": 1.0}},
            })),
        ];

        let turn = flatten_batch(&suffix).expect("turn");
        assert!(turn.actions.is_empty());
        assert!(turn.bot_responses.is_empty());
        assert_eq!(turn.user_input, "hi");
    }
}
