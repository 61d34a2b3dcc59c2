//! Turns a raw `teloxide::types::Update` into the neutral shapes the
//! orchestrator consumes, grounded on
//! `original_source/src/takopi/telegram/parsing.py`'s `parse_incoming_update`.
//! Voice and document payloads are out of scope (file upload/download
//! plumbing and voice transcription are spec.md Non-goals), so only the
//! text-message and callback-query shapes survive here.

use teloxide::types::{Update, UpdateKind};

/// One incoming text message, already filtered to an allowed chat.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub chat_id: i64,
    pub message_id: i32,
    pub text: String,
    pub thread_id: Option<i32>,
    pub is_topic_message: bool,
    pub sender_id: Option<i64>,
    pub reply_to_message_id: Option<i32>,
    pub reply_to_text: Option<String>,
}

/// One incoming inline-keyboard callback, e.g. `takopi:cancel`.
#[derive(Debug, Clone)]
pub struct IncomingCallbackQuery {
    pub chat_id: i64,
    pub message_id: i32,
    pub callback_query_id: String,
    pub data: Option<String>,
    pub sender_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub enum IncomingUpdate {
    Message(IncomingMessage),
    Callback(IncomingCallbackQuery),
}

/// Parses `update`, dropping it if it isn't a message/callback we handle or
/// if it's addressed to a chat outside `allowed` (`None` means "all chats
/// allowed", matching the original's `chat_ids=None` default).
pub fn parse_incoming_update(update: &Update, allowed: Option<&[i64]>) -> Option<IncomingUpdate> {
    match &update.kind {
        UpdateKind::Message(msg) => parse_message(msg, allowed).map(IncomingUpdate::Message),
        UpdateKind::CallbackQuery(query) => {
            parse_callback_query(query, allowed).map(IncomingUpdate::Callback)
        }
        _ => None,
    }
}

fn chat_allowed(chat_id: i64, allowed: Option<&[i64]>) -> bool {
    match allowed {
        None => true,
        Some(ids) => ids.contains(&chat_id),
    }
}

fn parse_message(msg: &teloxide::types::Message, allowed: Option<&[i64]>) -> Option<IncomingMessage> {
    let chat_id = msg.chat.id.0;
    if !chat_allowed(chat_id, allowed) {
        return None;
    }
    let text = msg.text().or_else(|| msg.caption())?;
    let reply = msg.reply_to_message();
    Some(IncomingMessage {
        chat_id,
        message_id: msg.id.0,
        text: text.to_string(),
        thread_id: msg.thread_id.map(|id| id.0.0),
        is_topic_message: msg.is_topic_message(),
        sender_id: msg.from.as_ref().map(|user| user.id.0 as i64),
        reply_to_message_id: reply.map(|m| m.id.0),
        reply_to_text: reply.and_then(|m| m.text().or_else(|| m.caption())).map(str::to_string),
    })
}

fn parse_callback_query(
    query: &teloxide::types::CallbackQuery,
    allowed: Option<&[i64]>,
) -> Option<IncomingCallbackQuery> {
    let msg = query.message.as_ref()?;
    let chat_id = msg.chat().id.0;
    if !chat_allowed(chat_id, allowed) {
        return None;
    }
    Some(IncomingCallbackQuery {
        chat_id,
        message_id: msg.id().0,
        callback_query_id: query.id.clone(),
        data: query.data.clone(),
        sender_id: Some(query.from.id.0 as i64),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_allowed_passes_through_with_no_allowlist() {
        assert!(chat_allowed(42, None));
    }

    #[test]
    fn chat_allowed_rejects_ids_outside_the_list() {
        assert!(chat_allowed(1, Some(&[1, 2])));
        assert!(!chat_allowed(3, Some(&[1, 2])));
    }
}
