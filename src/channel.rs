//! WhatsApp Cloud API: outbound sends and webhook parsing.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{error, warn};

use crate::config::WhatsAppConfig;
use crate::error::{Error, Result};
use crate::ports::ChannelConnection;
use crate::types::OutboundEnvelope;

pub struct WhatsAppCloudChannel {
    http: reqwest::Client,
    config: WhatsAppConfig,
    ready: AtomicBool,
}

impl WhatsAppCloudChannel {
    pub fn new(http: reqwest::Client, config: WhatsAppConfig) -> Self {
        let ready = config.is_configured();
        if !ready {
            warn!("whatsapp access token or phone number id missing, outbound sends disabled");
        }
        Self {
            http,
            config,
            ready: AtomicBool::new(ready),
        }
    }
}

#[async_trait]
impl ChannelConnection for WhatsAppCloudChannel {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    async fn transmit(&self, recipient: &str, envelope: &OutboundEnvelope) -> Result<String> {
        let payload = message_payload(recipient, envelope);
        let response = self
            .http
            .post(self.config.messages_url())
            .bearer_auth(&self.config.access_token)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        let raw_body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            if status.as_u16() == 401 {
                // An expired token will not fix itself; stop sending until
                // the service is restarted with a fresh one.
                self.ready.store(false, Ordering::Relaxed);
                error!(body = %raw_body, "whatsapp rejected the access token, channel disabled");
            }
            return Err(Error::ChannelRejected {
                status: status.as_u16(),
                body: raw_body,
            });
        }

        let body = serde_json::from_str::<Value>(&raw_body).unwrap_or_else(|_| json!({}));
        let message_id = body
            .get("messages")
            .and_then(Value::as_array)
            .and_then(|messages| messages.first())
            .and_then(|message| message.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string);
        // Accepted without an id is still a send.
        Ok(message_id.unwrap_or_else(|| {
            warn!(recipient = %recipient, body = %raw_body, "whatsapp accepted the message without an id");
            String::new()
        }))
    }
}

fn message_payload(recipient: &str, envelope: &OutboundEnvelope) -> Value {
    let mut payload = json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": recipient,
        "type": envelope.content_type(),
    });
    match envelope {
        OutboundEnvelope::Text { body } => {
            payload["text"] = json!({ "preview_url": false, "body": body });
        }
        OutboundEnvelope::Image { link, caption } => {
            payload["image"] = media_object(link, caption.as_deref());
        }
        OutboundEnvelope::Video { link, caption } => {
            payload["video"] = media_object(link, caption.as_deref());
        }
        OutboundEnvelope::Audio { link } => {
            payload["audio"] = json!({ "link": link });
        }
        OutboundEnvelope::Document {
            link,
            filename,
            caption,
        } => {
            let mut document = media_object(link, caption.as_deref());
            document["filename"] = json!(filename);
            payload["document"] = document;
        }
    }
    payload
}

fn media_object(link: &str, caption: Option<&str>) -> Value {
    let mut object = json!({ "link": link });
    if let Some(caption) = caption {
        object["caption"] = json!(caption);
    }
    object
}

pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits = raw
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect::<String>();
    if digits.is_empty() {
        None
    } else {
        Some(digits)
    }
}

/// Checks Meta's `X-Hub-Signature-256` header. An unset app secret disables
/// the check.
pub fn verify_signature(app_secret: &str, signature_header: Option<&str>, body: &[u8]) -> bool {
    if app_secret.is_empty() {
        return true;
    }
    let signature = signature_header.unwrap_or("").trim();
    let signature = signature
        .strip_prefix("sha256=")
        .unwrap_or(signature)
        .trim();
    if signature.is_empty() {
        return false;
    }
    let Ok(signature_bytes) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(app_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&signature_bytes).is_ok()
}

/// A customer message taken from a webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub from: String,
    pub profile_name: Option<String>,
    pub text: String,
    pub message_id: Option<String>,
}

/// Every customer message with readable text in a webhook payload. Status
/// callbacks and changes for other phone numbers are skipped.
pub fn inbound_messages(payload: &Value, expected_phone_number_id: &str) -> Vec<InboundMessage> {
    let mut found = Vec::new();
    let entries = payload
        .get("entry")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for entry in entries {
        let changes = entry
            .get("changes")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for change in changes {
            let Some(value) = change.get("value") else {
                continue;
            };
            let metadata_phone_id = value
                .get("metadata")
                .and_then(|m| m.get("phone_number_id"))
                .and_then(Value::as_str)
                .unwrap_or("");
            if !expected_phone_number_id.is_empty()
                && !metadata_phone_id.is_empty()
                && expected_phone_number_id != metadata_phone_id
            {
                continue;
            }

            let names = contact_profile_names(value);
            let messages = value
                .get("messages")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();
            for message in messages {
                let from = message.get("from").and_then(Value::as_str).unwrap_or("");
                let Some(from) = normalize_phone(from) else {
                    continue;
                };
                let Some(text) = message_text(message) else {
                    continue;
                };
                found.push(InboundMessage {
                    profile_name: names.get(&from).cloned().filter(|n| !n.is_empty()),
                    from,
                    text,
                    message_id: message
                        .get("id")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                });
            }
        }
    }
    found
}

fn contact_profile_names(value: &Value) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let contacts = value
        .get("contacts")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for contact in contacts {
        let wa_id = contact
            .get("wa_id")
            .and_then(Value::as_str)
            .or_else(|| contact.get("input").and_then(Value::as_str))
            .unwrap_or("");
        let Some(digits) = normalize_phone(wa_id) else {
            continue;
        };
        let name = contact
            .get("profile")
            .and_then(|p| p.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim()
            .to_string();
        map.insert(digits, name);
    }
    map
}

fn message_text(message: &Value) -> Option<String> {
    let msg_type = message
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_ascii_lowercase();
    let text = match msg_type.as_str() {
        "text" => message.get("text").and_then(|v| v.get("body")),
        "button" => message.get("button").and_then(|v| v.get("text")),
        "interactive" => message.get("interactive").and_then(|v| {
            v.get("button_reply")
                .and_then(|r| r.get("title"))
                .or_else(|| v.get("list_reply").and_then(|r| r.get("title")))
        }),
        "image" | "video" | "document" => message
            .get(msg_type.as_str())
            .and_then(|v| v.get("caption")),
        _ => None,
    };
    text.and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}
