//! Chat relay: conversation listing, bot activation flags and advisor
//! interventions forwarded through the WhatsApp relay.
//!
//! Conversation history lives in the store's chat table; each row carries a
//! session id (the client phone number), a serialized message document and a
//! timestamp. The activation table holds one row per session telling whether
//! the bot still owns the conversation.

use crate::errors::{AppError, ResultExt};
use crate::store::{StoreClient, StoreFilter, CHAT_ACTIVATION_TABLE, CHAT_TABLE};
use crate::whatsapp::WhatsAppClient;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashSet;
use tracing::{info, warn};

/// Media types the advisor is allowed to relay.
const ALLOWED_MEDIA_TYPES: [&str; 5] = [
    "image/jpeg",
    "image/png",
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
];

/// Upload size cap, matching the relay's document limit.
pub const MAX_MEDIA_BYTES: usize = 30 * 1024 * 1024;

const CHAT_PAGE: usize = 1000;

pub struct ChatService {
    store: StoreClient,
    whatsapp: Option<WhatsAppClient>,
}

impl ChatService {
    pub fn new(store: StoreClient, whatsapp: Option<WhatsAppClient>) -> Self {
        Self { store, whatsapp }
    }

    /// Latest message per session, newest session first.
    pub async fn active_conversations(&self) -> Result<Vec<Value>, AppError> {
        let rows = self
            .store
            .fetch_all_raw(CHAT_TABLE, "*", &[], "time", true, CHAT_PAGE)
            .await?;

        let mut seen = HashSet::new();
        let mut conversations = Vec::new();
        for row in rows {
            let session = row
                .get("session_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if session.is_empty() || !seen.insert(session) {
                continue;
            }
            conversations.push(row);
        }
        Ok(conversations)
    }

    /// Full history of one session, oldest first.
    pub async fn session_messages(&self, session_id: &str) -> Result<Vec<Value>, AppError> {
        self.store
            .fetch_all_raw(
                CHAT_TABLE,
                "*",
                &[StoreFilter::Eq(
                    "session_id".to_string(),
                    session_id.to_string(),
                )],
                "time",
                false,
                CHAT_PAGE,
            )
            .await
    }

    /// Messages strictly newer than `since` (an RFC 3339 timestamp), across
    /// all sessions. Polling clients pass the newest timestamp they hold.
    pub async fn messages_since(&self, since: Option<&str>) -> Result<Vec<Value>, AppError> {
        let since = since
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::BadRequest("Missing 'since' parameter".to_string()))?;

        self.store
            .fetch_all_raw(
                CHAT_TABLE,
                "*",
                &[StoreFilter::Gt("time".to_string(), since.to_string())],
                "time",
                false,
                CHAT_PAGE,
            )
            .await
    }

    /// Whether the bot currently owns the session. A session with no
    /// activation row gets one created as active; if the store cannot be
    /// reached the bot is assumed active, so the advisor path stays closed
    /// rather than double-replying.
    pub async fn bot_status(&self, session_id: &str) -> bool {
        match self.fetch_bot_row(session_id).await {
            Ok(Some(row)) => row
                .get("is_active")
                .and_then(Value::as_bool)
                .unwrap_or(true),
            Ok(None) => {
                let row = json!({ "session_id": session_id, "is_active": true });
                if let Err(e) = self.store.insert(CHAT_ACTIVATION_TABLE, &row).await {
                    warn!(session_id, error = %e, "Failed to seed bot activation row");
                }
                true
            }
            Err(e) => {
                warn!(session_id, error = %e, "Failed to read bot status, assuming active");
                true
            }
        }
    }

    pub async fn set_bot_status(
        &self,
        session_id: &str,
        is_active: bool,
    ) -> Result<Value, AppError> {
        let row = json!({ "session_id": session_id, "is_active": is_active });
        let updated = self
            .store
            .upsert(CHAT_ACTIVATION_TABLE, "session_id", &row)
            .await?;
        info!(session_id, is_active, "Bot activation updated");
        Ok(updated.into_iter().next().unwrap_or(row))
    }

    /// Relays an advisor text message: refused while the bot is active,
    /// persisted to the chat history and then forwarded to the phone.
    pub async fn send_advisor_message(
        &self,
        session_id: &str,
        message: &str,
    ) -> Result<Value, AppError> {
        if self.bot_status(session_id).await {
            return Err(AppError::Forbidden(
                "Bot is active for this session; deactivate it before intervening".to_string(),
            ));
        }
        let whatsapp = self.relay()?;

        self.persist_message(session_id, message).await?;
        let data = whatsapp.send_text(session_id, message).await?;
        info!(session_id, "Advisor message relayed");

        Ok(json!({ "status": "message_sent", "data": data }))
    }

    /// Relays an advisor media file: MIME allowlist and size cap first, then
    /// same bot gate as text, then upload + send + history row.
    pub async fn send_media(
        &self,
        session_id: &str,
        file_name: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<Value, AppError> {
        if !ALLOWED_MEDIA_TYPES.contains(&mime_type) {
            return Err(AppError::BadRequest(format!(
                "Unsupported media type: {}",
                mime_type
            )));
        }
        if bytes.len() > MAX_MEDIA_BYTES {
            return Err(AppError::BadRequest(format!(
                "File too large: {} bytes (max {})",
                bytes.len(),
                MAX_MEDIA_BYTES
            )));
        }
        if self.bot_status(session_id).await {
            return Err(AppError::Forbidden(
                "Bot is active for this session; deactivate it before intervening".to_string(),
            ));
        }
        let whatsapp = self.relay()?;

        let media_kind = if mime_type.starts_with("image/") {
            "image"
        } else {
            "document"
        };
        let media_id = whatsapp.upload_media(file_name, mime_type, bytes).await?;
        let data = whatsapp
            .send_media(session_id, media_kind, &media_id, Some(file_name))
            .await?;
        self.persist_message(session_id, &format!("[{}] {}", media_kind, file_name))
            .await?;
        info!(session_id, media_kind, "Advisor media relayed");

        Ok(json!({ "status": "media_sent", "data": data }))
    }

    async fn fetch_bot_row(&self, session_id: &str) -> Result<Option<Value>, AppError> {
        let rows = self
            .store
            .fetch_page_raw(
                CHAT_ACTIVATION_TABLE,
                "*",
                &[StoreFilter::Eq(
                    "session_id".to_string(),
                    session_id.to_string(),
                )],
                "session_id",
                false,
                0,
                1,
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    /// Appends an advisor turn to the chat history in the same document
    /// shape the bot writes, so history readers see one uniform format.
    async fn persist_message(&self, session_id: &str, content: &str) -> Result<(), AppError> {
        let message = json!({
            "type": "ai",
            "content": content,
            "tool_calls": [],
            "additional_kwargs": {},
            "response_metadata": {},
            "invalid_tool_calls": [],
        });
        let row = json!({
            "session_id": session_id,
            "message": message.to_string(),
            "time": Utc::now().to_rfc3339(),
        });
        self.store
            .insert(CHAT_TABLE, &row)
            .await
            .context("Failed to persist advisor message")?;
        Ok(())
    }

    fn relay(&self) -> Result<&WhatsAppClient, AppError> {
        self.whatsapp.as_ref().ok_or_else(|| {
            AppError::ExternalApiError("WhatsApp relay is not configured".to_string())
        })
    }
}
