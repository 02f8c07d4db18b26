//! Thin client for the WhatsApp Cloud API.
//!
//! Only the three calls the advisor relay needs: send a text message,
//! upload a media blob, and send a previously uploaded media id.

use crate::errors::AppError;
use reqwest::multipart;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

#[derive(Clone)]
pub struct WhatsAppClient {
    client: reqwest::Client,
    api_url: String,
    access_token: String,
}

impl WhatsAppClient {
    pub fn new(api_url: String, access_token: String) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create WhatsApp client: {}", e))
            })?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            access_token,
        })
    }

    /// Sends a plain text message to a phone number.
    pub async fn send_text(&self, to: &str, body: &str) -> Result<Value, AppError> {
        let payload = json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": "text",
            "text": { "body": body },
        });
        self.post_message(&payload).await
    }

    /// Uploads a media blob and returns the media id assigned by the API.
    pub async fn upload_media(
        &self,
        file_name: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String, AppError> {
        let part = multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(mime_type)
            .map_err(|e| AppError::BadRequest(format!("Invalid media type: {}", e)))?;
        let form = multipart::Form::new()
            .text("messaging_product", "whatsapp")
            .part("file", part);

        let response = self
            .client
            .post(format!("{}/media", self.api_url))
            .bearer_auth(&self.access_token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                AppError::ExternalApiError(format!("WhatsApp media upload failed: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalApiError(format!(
                "WhatsApp media upload returned {}: {}",
                status, error_text
            )));
        }

        let body: Value = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Invalid WhatsApp upload response: {}", e))
        })?;
        body.get("id")
            .and_then(Value::as_str)
            .map(|id| id.to_string())
            .ok_or_else(|| {
                AppError::ExternalApiError("WhatsApp upload response missing media id".to_string())
            })
    }

    /// Sends an already uploaded media id. `media_kind` is the Cloud API
    /// message type ("image" or "document").
    pub async fn send_media(
        &self,
        to: &str,
        media_kind: &str,
        media_id: &str,
        file_name: Option<&str>,
    ) -> Result<Value, AppError> {
        let mut media = json!({ "id": media_id });
        if media_kind == "document" {
            if let Some(name) = file_name {
                media["filename"] = json!(name);
            }
        }
        let payload = json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": media_kind,
            media_kind: media,
        });
        self.post_message(&payload).await
    }

    async fn post_message(&self, payload: &Value) -> Result<Value, AppError> {
        debug!(url = %format!("{}/messages", self.api_url), "Sending WhatsApp message");
        let response = self
            .client
            .post(format!("{}/messages", self.api_url))
            .bearer_auth(&self.access_token)
            .json(payload)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("WhatsApp send failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalApiError(format!(
                "WhatsApp API returned {}: {}",
                status, error_text
            )));
        }

        response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Invalid WhatsApp response: {}", e))
        })
    }
}
