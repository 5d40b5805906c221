//! Message fan-out engine
//!
//! Turns a send request into a durable message plus live deliveries. The
//! ordering invariant is durability-before-delivery: the message record must
//! be persisted before anything is emitted to anyone, and a chat's
//! last-message update precedes every fan-out emission. Live delivery to the
//! recipient is best-effort: attempted at most once, no queue, no retry.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{ChatError, Result};
use crate::protocol::events::{
    DeleteMessage, EditMessage, MessageDeleted, MessageEdited, MessageRead, MessageSent,
    NewMessage, ReadReceipt, SendMessage, UserSummary,
};
use crate::server::connection::Delivery;
use crate::server::presence::{ConnectionHandle, PresenceRegistry};
use crate::server::rooms::ChatRooms;
use crate::store::{Chat, Message, Store, StoreError};
use crate::{current_timestamp, EDIT_WINDOW_MS, MAX_CONTENT_LEN};

/// Persists messages and delivers them to live connections
pub struct MessageFanout {
    store: Arc<dyn Store>,
    presence: Arc<PresenceRegistry>,
    rooms: Arc<ChatRooms>,
    store_timeout: Duration,
}

impl MessageFanout {
    pub fn new(
        store: Arc<dyn Store>,
        presence: Arc<PresenceRegistry>,
        rooms: Arc<ChatRooms>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            presence,
            rooms,
            store_timeout,
        }
    }

    /// Send a message from an authenticated connection
    ///
    /// Steps run in order, each gated on the previous one succeeding:
    /// reject self-send, resolve the recipient, persist the message, resolve
    /// or create the chat, bump the chat, confirm to the sender, then
    /// best-effort deliver to the recipient and the chat room channel.
    pub async fn send(
        &self,
        origin: &ConnectionHandle,
        sender: &UserSummary,
        req: SendMessage,
    ) -> Result<()> {
        if req.to == sender.user_id {
            return Err(ChatError::SelfMessage);
        }
        check_content(&req.content)?;

        let recipient = self
            .store_call(self.store.find_user(&req.to))
            .await?
            .filter(|user| user.active)
            .ok_or_else(|| ChatError::recipient_not_found(&req.to))?;

        // Durable write completes before anything is emitted to anyone
        let message = Message::new(&sender.user_id, &recipient.id, &req.content, req.kind);
        self.store_call(self.store.create_message(message.clone()))
            .await?;

        let chat = self
            .resolve_chat(sender, &recipient.id, req.chat_id.as_deref())
            .await?;
        self.store_call(self.store.update_chat_last_message(
            &chat.id,
            &message.id,
            message.sent_at,
        ))
        .await?;

        // Sender confirmation: the sender is connected by definition
        origin.deliver(Delivery::MessageSent(MessageSent {
            message_id: message.id.clone(),
            chat_id: chat.id.clone(),
            timestamp: message.sent_at,
        }));

        let event = NewMessage {
            message_id: message.id.clone(),
            sender: sender.user_id.clone(),
            sender_name: sender.username.clone(),
            content: message.content.clone(),
            kind: message.kind,
            timestamp: message.sent_at,
            chat_id: chat.id.clone(),
        };

        // Best-effort live delivery; an unreachable recipient reads the
        // message later from history
        match self.presence.lookup(&recipient.id).await {
            Some(handle) => {
                handle.deliver(Delivery::NewMessage(event.clone()));
            }
            None => {
                debug!(recipient = %recipient.id, "recipient unreachable, skipping live delivery");
            }
        }

        // Chat room channel: connections joined to this chat also get the
        // event; a recipient that is both reachable and joined sees it twice
        // and deduplicates by message ID client-side
        for member in self.rooms.members(&chat.id).await {
            if member == sender.user_id {
                continue;
            }
            if let Some(handle) = self.presence.lookup(&member).await {
                handle.deliver(Delivery::NewMessage(event.clone()));
            }
        }

        Ok(())
    }

    /// Edit a message: sender only, within the edit window
    pub async fn edit(
        &self,
        origin: &ConnectionHandle,
        requester: &UserSummary,
        req: EditMessage,
    ) -> Result<()> {
        check_content(&req.content)?;

        let mut message = self
            .store_call(self.store.find_message(&req.message_id))
            .await?
            .ok_or_else(|| ChatError::forbidden(format!("message {}", req.message_id)))?;

        if message.sender != requester.user_id {
            return Err(ChatError::forbidden(format!("message {}", req.message_id)));
        }
        let now = current_timestamp();
        if now.saturating_sub(message.sent_at) > EDIT_WINDOW_MS {
            return Err(ChatError::EditWindowExpired(req.message_id));
        }

        message.content = req.content;
        message.edited = true;
        message.edited_at = Some(now);
        self.store_call(self.store.update_message(&message)).await?;

        let event = MessageEdited {
            message_id: message.id.clone(),
            content: message.content.clone(),
            edited_at: now,
        };
        origin.deliver(Delivery::MessageEdited(event.clone()));
        if let Some(handle) = self.presence.lookup(&message.receiver).await {
            handle.deliver(Delivery::MessageEdited(event));
        }
        Ok(())
    }

    /// Soft-delete a message: either participant may delete
    pub async fn delete(
        &self,
        origin: &ConnectionHandle,
        requester: &UserSummary,
        req: DeleteMessage,
    ) -> Result<()> {
        let mut message = self
            .store_call(self.store.find_message(&req.message_id))
            .await?
            .ok_or_else(|| ChatError::forbidden(format!("message {}", req.message_id)))?;

        if message.sender != requester.user_id && message.receiver != requester.user_id {
            return Err(ChatError::forbidden(format!("message {}", req.message_id)));
        }

        let now = current_timestamp();
        message.deleted = true;
        message.deleted_at = Some(now);
        self.store_call(self.store.update_message(&message)).await?;

        let event = MessageDeleted {
            message_id: message.id.clone(),
            deleted_at: now,
        };
        origin.deliver(Delivery::MessageDeleted(event.clone()));
        let other = if message.sender == requester.user_id {
            &message.receiver
        } else {
            &message.sender
        };
        if let Some(handle) = self.presence.lookup(other).await {
            handle.deliver(Delivery::MessageDeleted(event));
        }
        Ok(())
    }

    /// Mark a message read: only its recipient may do so
    ///
    /// The sender notification is attempted regardless of the mirror write's
    /// outcome; a receipt is an ephemeral signal first, durable state second.
    pub async fn mark_read(&self, reader: &UserSummary, req: ReadReceipt) -> Result<()> {
        let mut message = self
            .store_call(self.store.find_message(&req.message_id))
            .await?
            .ok_or_else(|| ChatError::forbidden(format!("message {}", req.message_id)))?;

        if message.receiver != reader.user_id {
            return Err(ChatError::forbidden(format!("message {}", req.message_id)));
        }

        // Idempotent: a second receipt keeps the original read timestamp
        let read_at = match (message.read, message.read_at) {
            (true, Some(at)) => at,
            _ => current_timestamp(),
        };
        message.read = true;
        message.read_at = Some(read_at);
        let persisted = self.store_call(self.store.update_message(&message)).await;
        if let Err(ref e) = persisted {
            warn!(message_id = %message.id, "read-state mirror failed: {}", e);
        }

        let event = MessageRead {
            message_id: message.id.clone(),
            chat_id: req.chat_id.clone(),
            reader_id: reader.user_id.clone(),
            read_at,
        };
        if let Some(handle) = self.presence.lookup(&message.sender).await {
            handle.deliver(Delivery::MessageRead(event.clone()));
        }
        for member in self.rooms.members(&req.chat_id).await {
            if member == reader.user_id {
                continue;
            }
            if let Some(handle) = self.presence.lookup(&member).await {
                handle.deliver(Delivery::MessageRead(event.clone()));
            }
        }

        persisted
    }

    /// Resolve the chat a message belongs to
    ///
    /// An explicit chat ID must reference a chat containing both parties;
    /// otherwise the pair is canonicalized and the chat found or created.
    async fn resolve_chat(
        &self,
        sender: &UserSummary,
        recipient: &str,
        chat_id: Option<&str>,
    ) -> Result<Chat> {
        match chat_id {
            Some(id) => {
                let chat = self
                    .store_call(self.store.find_chat(id))
                    .await?
                    .ok_or_else(|| ChatError::chat_forbidden(id))?;
                if !chat.has_participant(&sender.user_id) || !chat.has_participant(recipient) {
                    return Err(ChatError::chat_forbidden(id));
                }
                Ok(chat)
            }
            None => {
                if let Some(chat) = self
                    .store_call(
                        self.store
                            .find_chat_by_participants(&sender.user_id, recipient),
                    )
                    .await?
                {
                    return Ok(chat);
                }
                // create_chat is create-or-fetch-on-conflict, so a racing
                // first message for the same pair converges on one record
                self.store_call(self.store.create_chat(&sender.user_id, recipient))
                    .await
            }
        }
    }

    /// Run a store call with a bounded wait
    ///
    /// Timeouts surface as `PersistenceFailure`, never as silent hangs.
    async fn store_call<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, StoreError>>,
    {
        match timeout(self.store_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(ChatError::persistence(e.to_string())),
            Err(_) => Err(ChatError::persistence("store call timed out")),
        }
    }
}

fn check_content(content: &str) -> Result<()> {
    if content.is_empty() {
        return Err(ChatError::invalid_message("empty content"));
    }
    if content.len() > MAX_CONTENT_LEN {
        return Err(ChatError::invalid_message(format!(
            "content exceeds {} bytes",
            MAX_CONTENT_LEN
        )));
    }
    Ok(())
}
