//! `TelegramClient`: the teloxide-backed Bot API surface, wired through
//! `relay_outbox::Outbox` so every call gets priority queuing, per-chat rate
//! limiting, and 429 retry for free. Grounded on
//! `original_source/src/takopi/telegram/client.py`'s `TelegramClient` (the
//! method set, op keys, and priorities below mirror its `enqueue_op` call
//! sites) and on `dbot-telegram/src/bot_adapter.rs` for the actual teloxide
//! call shapes.

use std::sync::Arc;
use std::time::Duration;

use relay_outbox::{ExecError, Outbox, OutboxKey, OutboxOp, Priority};
use teloxide::payloads::{
    EditForumTopicSetters, SendDocumentSetters, SendMessageSetters,
};
use teloxide::prelude::*;
use teloxide::types::{
    ChatId, ForumTopic, InputFile, MessageId, ThreadId, UserId,
};
use teloxide::RequestError;

fn map_err(err: RequestError) -> ExecError {
    if let RequestError::RetryAfter(seconds) = err {
        ExecError::RetryAfter(Duration::from(seconds).as_secs())
    } else {
        ExecError::Failed(err.to_string())
    }
}

/// One message just sent or edited, stripped to what callers need: its id
/// (to key later edits/deletes/replaces).
#[derive(Debug, Clone, Copy)]
pub struct SentMessage {
    pub message_id: i32,
}

/// Options for `TelegramClient::send_message`, mirroring `client.py`'s
/// keyword arguments.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub reply_to_message_id: Option<i32>,
    pub disable_notification: bool,
    pub thread_id: Option<i32>,
    /// If set, any pending edit to this message is dropped and the message
    /// is deleted once this send succeeds (spec.md §4.7's `("send", ...)`
    /// coalescing key).
    pub replace_message_id: Option<i32>,
}

pub struct TelegramClient {
    bot: Bot,
    outbox: Arc<Outbox>,
}

impl TelegramClient {
    pub fn new(bot: Bot, outbox: Arc<Outbox>) -> Self {
        Self { bot, outbox }
    }

    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    pub async fn close(&self) {
        self.outbox.close().await;
    }

    /// Sends a message through the `Send`-priority outbox bucket, returning
    /// the new message's id (needed to register a fresh progress message,
    /// spec.md §4.8 step 1). If `opts.replace_message_id` is set, any
    /// pending edit to that message is dropped first and the message is
    /// deleted once this send succeeds (spec.md §4.7).
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: impl Into<String>,
        opts: SendOptions,
    ) -> Result<SentMessage, ExecError> {
        let text = text.into();
        let bot = self.bot.clone();
        let reply_to = opts.reply_to_message_id;
        let disable_notification = opts.disable_notification;
        let thread = opts.thread_id;
        let result = Arc::new(tokio::sync::Mutex::new(None));
        let result_slot = result.clone();
        let execute = Arc::new(move || {
            let bot = bot.clone();
            let text = text.clone();
            let result_slot = result_slot.clone();
            Box::pin(async move {
                let mut request = bot.send_message(ChatId(chat_id), text).disable_notification(disable_notification);
                if let Some(id) = reply_to {
                    request = request.reply_to_message_id(MessageId(id));
                }
                if let Some(id) = thread {
                    request = request.message_thread_id(ThreadId(MessageId(id)));
                }
                match request.await {
                    Ok(msg) => {
                        *result_slot.lock().await = Some(msg.id.0);
                        Ok(())
                    }
                    Err(err) => Err(map_err(err)),
                }
            }) as relay_outbox::BoxFuture<Result<(), ExecError>>
        });

        let key = match opts.replace_message_id {
            Some(replace_id) => {
                self.outbox.drop_pending_edits(chat_id, replace_id as i64).await;
                OutboxKey::Send { chat_id, replace_message_id: replace_id as i64 }
            }
            None => self.outbox.unique_key(),
        };
        let op = OutboxOp::new("send_message", Priority::Send, Some(chat_id), key, execute);
        let rx = self.outbox.enqueue(op).await;
        let outcome = rx.await.map_err(|_| ExecError::Failed("send_message: op dropped".into()))?;
        outcome?;

        if let Some(replace_id) = opts.replace_message_id {
            let _ = self.delete_message(chat_id, replace_id).await;
        }

        let message_id = result.lock().await.ok_or_else(|| {
            ExecError::Failed("send_message: op succeeded without recording a message id".into())
        })?;
        Ok(SentMessage { message_id })
    }

    pub async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i32,
        text: impl Into<String>,
        wait: bool,
    ) -> Result<(), ExecError> {
        let text = text.into();
        let bot = self.bot.clone();
        let execute = Arc::new(move || {
            let bot = bot.clone();
            let text = text.clone();
            Box::pin(async move {
                bot.edit_message_text(ChatId(chat_id), MessageId(message_id), text)
                    .await
                    .map(|_| ())
                    .map_err(map_err)
            }) as relay_outbox::BoxFuture<Result<(), ExecError>>
        });
        let op = OutboxOp::new(
            "edit_message_text",
            Priority::Edit,
            Some(chat_id),
            OutboxKey::Edit { chat_id, message_id: message_id as i64 },
            execute,
        );
        let rx = self.outbox.enqueue(op).await;
        if !wait {
            return Ok(());
        }
        rx.await.map_err(|_| ExecError::Failed("edit_message_text: op dropped".into()))?
    }

    pub async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<(), ExecError> {
        self.outbox.drop_pending_edits(chat_id, message_id as i64).await;
        let bot = self.bot.clone();
        let execute = Arc::new(move || {
            let bot = bot.clone();
            Box::pin(async move {
                bot.delete_message(ChatId(chat_id), MessageId(message_id))
                    .await
                    .map(|_| ())
                    .map_err(map_err)
            }) as relay_outbox::BoxFuture<Result<(), ExecError>>
        });
        let op = OutboxOp::new(
            "delete_message",
            Priority::Delete,
            Some(chat_id),
            OutboxKey::Delete { chat_id, message_id: message_id as i64 },
            execute,
        );
        let rx = self.outbox.enqueue(op).await;
        rx.await.map_err(|_| ExecError::Failed("delete_message: op dropped".into()))?
    }

    pub async fn send_document(
        &self,
        chat_id: i64,
        filename: impl Into<String>,
        content: Vec<u8>,
        caption: Option<String>,
    ) -> Result<(), ExecError> {
        let filename = filename.into();
        let bot = self.bot.clone();
        let execute = Arc::new(move || {
            let bot = bot.clone();
            let filename = filename.clone();
            let content = content.clone();
            let caption = caption.clone();
            Box::pin(async move {
                let file = InputFile::memory(content).file_name(filename);
                let mut request = bot.send_document(ChatId(chat_id), file);
                if let Some(caption) = caption {
                    request = request.caption(caption);
                }
                request.await.map(|_| ()).map_err(map_err)
            }) as relay_outbox::BoxFuture<Result<(), ExecError>>
        });
        let op = OutboxOp::new(
            "send_document",
            Priority::Send,
            Some(chat_id),
            self.outbox.unique_key(),
            execute,
        );
        let rx = self.outbox.enqueue(op).await;
        rx.await.map_err(|_| ExecError::Failed("send_document: op dropped".into()))?
    }

    pub async fn set_my_commands(&self, commands: Vec<teloxide::types::BotCommand>) -> Result<(), ExecError> {
        let bot = self.bot.clone();
        let execute = Arc::new(move || {
            let bot = bot.clone();
            let commands = commands.clone();
            Box::pin(async move { bot.set_my_commands(commands).await.map(|_| ()).map_err(map_err) })
                as relay_outbox::BoxFuture<Result<(), ExecError>>
        });
        let op = OutboxOp::new("set_my_commands", Priority::Send, None, self.outbox.unique_key(), execute);
        let rx = self.outbox.enqueue(op).await;
        rx.await.map_err(|_| ExecError::Failed("set_my_commands: op dropped".into()))?
    }

    pub async fn get_me(&self) -> Result<teloxide::types::Me, ExecError> {
        let bot = self.bot.clone();
        let result = Arc::new(tokio::sync::Mutex::new(None));
        let slot = result.clone();
        let execute = Arc::new(move || {
            let bot = bot.clone();
            let slot = slot.clone();
            Box::pin(async move {
                let me = bot.get_me().await.map_err(map_err)?;
                *slot.lock().await = Some(me);
                Ok(())
            }) as relay_outbox::BoxFuture<Result<(), ExecError>>
        });
        let op = OutboxOp::new("get_me", Priority::Send, None, self.outbox.unique_key(), execute);
        let rx = self.outbox.enqueue(op).await;
        rx.await.map_err(|_| ExecError::Failed("get_me: op dropped".into()))??;
        result.lock().await.clone().ok_or_else(|| ExecError::Failed("get_me: no result recorded".into()))
    }

    pub async fn answer_callback_query(&self, callback_query_id: impl Into<String>) -> Result<(), ExecError> {
        let callback_query_id = callback_query_id.into();
        let bot = self.bot.clone();
        let execute = Arc::new(move || {
            let bot = bot.clone();
            let callback_query_id = callback_query_id.clone();
            Box::pin(async move {
                bot.answer_callback_query(callback_query_id).await.map(|_| ()).map_err(map_err)
            }) as relay_outbox::BoxFuture<Result<(), ExecError>>
        });
        let op = OutboxOp::new(
            "answer_callback_query",
            Priority::Send,
            None,
            self.outbox.unique_key(),
            execute,
        );
        let rx = self.outbox.enqueue(op).await;
        rx.await.map_err(|_| ExecError::Failed("answer_callback_query: op dropped".into()))?
    }

    pub async fn create_forum_topic(&self, chat_id: i64, name: impl Into<String>) -> Result<ForumTopic, ExecError> {
        let name = name.into();
        let bot = self.bot.clone();
        let result = Arc::new(tokio::sync::Mutex::new(None));
        let slot = result.clone();
        let execute = Arc::new(move || {
            let bot = bot.clone();
            let name = name.clone();
            let slot = slot.clone();
            Box::pin(async move {
                let topic = bot.create_forum_topic(ChatId(chat_id), name, 0, String::new())
                    .await
                    .map_err(map_err)?;
                *slot.lock().await = Some(topic);
                Ok(())
            }) as relay_outbox::BoxFuture<Result<(), ExecError>>
        });
        let op = OutboxOp::new(
            "create_forum_topic",
            Priority::Send,
            Some(chat_id),
            self.outbox.unique_key(),
            execute,
        );
        let rx = self.outbox.enqueue(op).await;
        rx.await.map_err(|_| ExecError::Failed("create_forum_topic: op dropped".into()))??;
        result
            .lock()
            .await
            .clone()
            .ok_or_else(|| ExecError::Failed("create_forum_topic: no result recorded".into()))
    }

    pub async fn edit_forum_topic(
        &self,
        chat_id: i64,
        thread_id: i32,
        name: impl Into<String>,
    ) -> Result<(), ExecError> {
        let name = name.into();
        let bot = self.bot.clone();
        let execute = Arc::new(move || {
            let bot = bot.clone();
            let name = name.clone();
            Box::pin(async move {
                bot.edit_forum_topic(ChatId(chat_id), ThreadId(MessageId(thread_id)))
                    .name(name)
                    .await
                    .map(|_| ())
                    .map_err(map_err)
            }) as relay_outbox::BoxFuture<Result<(), ExecError>>
        });
        let op = OutboxOp::new(
            "edit_forum_topic",
            Priority::Send,
            Some(chat_id),
            self.outbox.unique_key(),
            execute,
        );
        let rx = self.outbox.enqueue(op).await;
        rx.await.map_err(|_| ExecError::Failed("edit_forum_topic: op dropped".into()))?
    }

    pub async fn delete_forum_topic(&self, chat_id: i64, thread_id: i32) -> Result<(), ExecError> {
        let bot = self.bot.clone();
        let execute = Arc::new(move || {
            let bot = bot.clone();
            Box::pin(async move {
                bot.delete_forum_topic(ChatId(chat_id), ThreadId(MessageId(thread_id)))
                    .await
                    .map(|_| ())
                    .map_err(map_err)
            }) as relay_outbox::BoxFuture<Result<(), ExecError>>
        });
        let op = OutboxOp::new(
            "delete_forum_topic",
            Priority::Delete,
            Some(chat_id),
            self.outbox.unique_key(),
            execute,
        );
        let rx = self.outbox.enqueue(op).await;
        rx.await.map_err(|_| ExecError::Failed("delete_forum_topic: op dropped".into()))?
    }

    pub async fn get_chat(&self, chat_id: i64) -> Result<teloxide::types::Chat, ExecError> {
        let bot = self.bot.clone();
        let result = Arc::new(tokio::sync::Mutex::new(None));
        let slot = result.clone();
        let execute = Arc::new(move || {
            let bot = bot.clone();
            let slot = slot.clone();
            Box::pin(async move {
                let chat = bot.get_chat(ChatId(chat_id)).await.map_err(map_err)?;
                *slot.lock().await = Some(chat);
                Ok(())
            }) as relay_outbox::BoxFuture<Result<(), ExecError>>
        });
        let op = OutboxOp::new("get_chat", Priority::Send, Some(chat_id), self.outbox.unique_key(), execute);
        let rx = self.outbox.enqueue(op).await;
        rx.await.map_err(|_| ExecError::Failed("get_chat: op dropped".into()))??;
        result.lock().await.clone().ok_or_else(|| ExecError::Failed("get_chat: no result recorded".into()))
    }

    pub async fn get_chat_member(&self, chat_id: i64, user_id: i64) -> Result<teloxide::types::ChatMember, ExecError> {
        let bot = self.bot.clone();
        let result = Arc::new(tokio::sync::Mutex::new(None));
        let slot = result.clone();
        let execute = Arc::new(move || {
            let bot = bot.clone();
            let slot = slot.clone();
            Box::pin(async move {
                let member = bot
                    .get_chat_member(ChatId(chat_id), UserId(user_id as u64))
                    .await
                    .map_err(map_err)?;
                *slot.lock().await = Some(member);
                Ok(())
            }) as relay_outbox::BoxFuture<Result<(), ExecError>>
        });
        let op = OutboxOp::new(
            "get_chat_member",
            Priority::Send,
            Some(chat_id),
            self.outbox.unique_key(),
            execute,
        );
        let rx = self.outbox.enqueue(op).await;
        rx.await.map_err(|_| ExecError::Failed("get_chat_member: op dropped".into()))??;
        result
            .lock()
            .await
            .clone()
            .ok_or_else(|| ExecError::Failed("get_chat_member: no result recorded".into()))
    }
}
