//! WhatsApp Cloud API: webhook payloads, verification and outbound sends.
//!
//! Meta delivers notifications as
//! `{"entry": [{"changes": [{"value": {"metadata": {...}, "messages": [...]}}]}]}`.
//! Status updates (delivered/read receipts) arrive in the same envelope but
//! without a `messages` key; they are ignored, as are non-text messages.
//!
//! Replies go out through `POST {graph}/{version}/{phone_number_id}/messages`.

use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;

use crate::app::Responder;
use crate::config::WhatsAppConfig;

type HmacSha256 = Hmac<Sha256>;

/// Sent to the user when the assistant fails for any reason.
pub const APOLOGY: &str = "Sorry, something went wrong.";

// ============ Inbound payload ============

#[derive(Debug, Default, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub entry: Vec<Entry>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Entry {
    #[serde(default)]
    pub changes: Vec<Change>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Change {
    #[serde(default)]
    pub value: ChangeValue,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChangeValue {
    #[serde(default)]
    pub metadata: Option<Metadata>,
    /// Absent for status notifications.
    #[serde(default)]
    pub messages: Option<Vec<Message>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub phone_number_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub from: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<TextBody>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TextBody {
    #[serde(default)]
    pub body: String,
}

/// A text message worth answering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundText {
    /// Business number that received the message; replies go out from it.
    pub phone_number_id: String,
    /// Sender's WhatsApp id.
    pub from: String,
    pub body: String,
}

/// Parse a webhook body. Anything that is not a recognisable envelope
/// yields `None`.
pub fn parse_payload(body: &[u8]) -> Option<WebhookPayload> {
    match serde_json::from_slice(body) {
        Ok(payload) => Some(payload),
        Err(e) => {
            tracing::debug!("ignoring unrecognised webhook body: {e}");
            None
        }
    }
}

pub fn extract_text_messages(payload: &WebhookPayload) -> Vec<InboundText> {
    let mut out = Vec::new();
    for change in payload.entry.iter().flat_map(|e| e.changes.iter()) {
        let Some(messages) = &change.value.messages else {
            continue;
        };
        let phone_number_id = change
            .value
            .metadata
            .as_ref()
            .map(|m| m.phone_number_id.as_str())
            .unwrap_or("");

        for message in messages {
            if message.kind != "text" {
                tracing::debug!("ignoring {} message from {}", message.kind, message.from);
                continue;
            }
            let body = message
                .text
                .as_ref()
                .map(|t| t.body.trim())
                .unwrap_or("");
            if body.is_empty() || message.from.is_empty() {
                continue;
            }
            if phone_number_id.is_empty() {
                tracing::warn!("text message without metadata.phone_number_id; cannot reply");
                continue;
            }
            out.push(InboundText {
                phone_number_id: phone_number_id.to_string(),
                from: message.from.clone(),
                body: body.to_string(),
            });
        }
    }
    out
}

// ============ Verification ============

/// Webhook subscription handshake. Returns the challenge to echo back when
/// the mode is `subscribe` and the token matches.
pub fn verify_subscription(
    mode: Option<&str>,
    token: Option<&str>,
    challenge: Option<&str>,
    expected_token: &str,
) -> Option<String> {
    if mode == Some("subscribe") && token == Some(expected_token) {
        Some(challenge.unwrap_or_default().to_string())
    } else {
        None
    }
}

/// Check an `X-Hub-Signature-256: sha256=<hex>` header against the body.
pub fn verify_signature(app_secret: &str, body: &[u8], header: Option<&str>) -> bool {
    let Some(provided) = header.and_then(|h| h.strip_prefix("sha256=")) else {
        return false;
    };
    let Ok(provided) = hex::decode(provided) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(app_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&provided).is_ok()
}

// ============ Outbound ============

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("WhatsApp API request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("WhatsApp API error {status}: {body}")]
    Api { status: u16, body: String },
}

#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_text(&self, phone_number_id: &str, to: &str, body: &str) -> Result<(), SendError>;
}

pub struct GraphApiClient {
    client: reqwest::Client,
    base_url: String,
    api_version: String,
    access_token: String,
}

impl GraphApiClient {
    pub fn new(config: &WhatsAppConfig, access_token: impl Into<String>) -> Result<Self, SendError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.graph_base_url.trim_end_matches('/').to_string(),
            api_version: config.api_version.clone(),
            access_token: access_token.into(),
        })
    }

    pub fn message_url(&self, phone_number_id: &str) -> String {
        format!(
            "{}/{}/{}/messages",
            self.base_url, self.api_version, phone_number_id
        )
    }
}

pub fn text_message_body(to: &str, body: &str) -> serde_json::Value {
    json!({
        "messaging_product": "whatsapp",
        "to": to,
        "text": { "body": body },
    })
}

#[async_trait]
impl MessageSender for GraphApiClient {
    async fn send_text(&self, phone_number_id: &str, to: &str, body: &str) -> Result<(), SendError> {
        let response = self
            .client
            .post(self.message_url(phone_number_id))
            .header("Authorization", format!("Bearer {}", self.access_token))
            .json(&text_message_body(to, body))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SendError::Api {
                status: status.as_u16(),
                body,
            });
        }
        tracing::debug!("WhatsApp reply sent to {to}");
        Ok(())
    }
}

// ============ Processing ============

/// Answer every text message in `payload` and send the replies.
///
/// Assistant failures are replaced by [`APOLOGY`]; send failures are
/// logged. Returns the number of replies delivered.
pub async fn process_payload(
    payload: &WebhookPayload,
    responder: &dyn Responder,
    sender: &dyn MessageSender,
) -> usize {
    let mut delivered = 0;
    for message in extract_text_messages(payload) {
        tracing::info!("message from {}", message.from);

        let reply = match responder.respond(&message.body).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!("assistant failed for message from {}: {e:#}", message.from);
                APOLOGY.to_string()
            }
        };

        match sender
            .send_text(&message.phone_number_id, &message.from, &reply)
            .await
        {
            Ok(()) => delivered += 1,
            Err(e) => tracing::error!("failed to reply to {}: {e}", message.from),
        }
    }
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn text_payload(body: &str) -> String {
        json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "id": "WABA",
                "changes": [{
                    "field": "messages",
                    "value": {
                        "messaging_product": "whatsapp",
                        "metadata": {"display_phone_number": "15550001111", "phone_number_id": "PNID"},
                        "contacts": [{"profile": {"name": "Asha"}, "wa_id": "919800000000"}],
                        "messages": [{
                            "from": "919800000000",
                            "id": "wamid.1",
                            "timestamp": "1700000000",
                            "type": "text",
                            "text": {"body": body}
                        }]
                    }
                }]
            }]
        })
        .to_string()
    }

    #[test]
    fn extracts_text_message() {
        let payload = parse_payload(text_payload("When is the exam?").as_bytes()).unwrap();
        assert_eq!(
            extract_text_messages(&payload),
            vec![InboundText {
                phone_number_id: "PNID".to_string(),
                from: "919800000000".to_string(),
                body: "When is the exam?".to_string(),
            }]
        );
    }

    #[test]
    fn status_receipts_are_ignored() {
        let body = json!({
            "entry": [{"changes": [{"value": {
                "metadata": {"phone_number_id": "PNID"},
                "statuses": [{"id": "wamid.1", "status": "read"}]
            }}]}]
        });
        let payload = parse_payload(body.to_string().as_bytes()).unwrap();
        assert!(extract_text_messages(&payload).is_empty());
    }

    #[test]
    fn non_text_messages_are_ignored() {
        let body = json!({
            "entry": [{"changes": [{"value": {
                "metadata": {"phone_number_id": "PNID"},
                "messages": [{"from": "1", "type": "image", "image": {"id": "media"}}]
            }}]}]
        });
        let payload = parse_payload(body.to_string().as_bytes()).unwrap();
        assert!(extract_text_messages(&payload).is_empty());
    }

    #[test]
    fn malformed_bodies_are_tolerated() {
        assert!(parse_payload(b"not json").is_none());
        let payload = parse_payload(b"{}").unwrap();
        assert!(extract_text_messages(&payload).is_empty());
        let payload = parse_payload(br#"{"entry": [{}]}"#).unwrap();
        assert!(extract_text_messages(&payload).is_empty());
    }

    #[test]
    fn subscription_requires_mode_and_token() {
        assert_eq!(
            verify_subscription(Some("subscribe"), Some("tok"), Some("123"), "tok"),
            Some("123".to_string())
        );
        assert_eq!(
            verify_subscription(Some("subscribe"), Some("bad"), Some("123"), "tok"),
            None
        );
        assert_eq!(
            verify_subscription(Some("unsubscribe"), Some("tok"), Some("123"), "tok"),
            None
        );
        assert_eq!(verify_subscription(None, None, None, "tok"), None);
    }

    #[test]
    fn signature_check() {
        let body = b"{\"entry\":[]}";
        let mut mac = HmacSha256::new_from_slice(b"secret").unwrap();
        mac.update(body);
        let header = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));

        assert!(verify_signature("secret", body, Some(&header)));
        assert!(!verify_signature("other", body, Some(&header)));
        assert!(!verify_signature("secret", b"tampered", Some(&header)));
        assert!(!verify_signature("secret", body, None));
        assert!(!verify_signature("secret", body, Some("sha256=zz")));
    }

    #[test]
    fn graph_url_and_body() {
        let config = WhatsAppConfig {
            graph_base_url: "https://graph.example.test/".to_string(),
            ..WhatsAppConfig::default()
        };
        let client = GraphApiClient::new(&config, "token").unwrap();
        assert_eq!(
            client.message_url("PNID"),
            "https://graph.example.test/v24.0/PNID/messages"
        );
        assert_eq!(
            text_message_body("91", "hi"),
            json!({"messaging_product": "whatsapp", "to": "91", "text": {"body": "hi"}})
        );
    }

    struct EchoResponder {
        fail: bool,
    }

    #[async_trait]
    impl Responder for EchoResponder {
        async fn respond(&self, input: &str) -> anyhow::Result<String> {
            if self.fail {
                anyhow::bail!("model unavailable");
            }
            Ok(format!("echo: {input}"))
        }
    }

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl MessageSender for RecordingSender {
        async fn send_text(&self, phone_number_id: &str, to: &str, body: &str) -> Result<(), SendError> {
            self.sent
                .lock()
                .unwrap()
                .push((phone_number_id.into(), to.into(), body.into()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn replies_to_text_messages() {
        let payload = parse_payload(text_payload("hello").as_bytes()).unwrap();
        let sender = RecordingSender::default();
        let n = process_payload(&payload, &EchoResponder { fail: false }, &sender).await;
        assert_eq!(n, 1);
        assert_eq!(
            sender.sent.lock().unwrap()[0],
            ("PNID".into(), "919800000000".into(), "echo: hello".into())
        );
    }

    #[tokio::test]
    async fn assistant_failure_sends_apology() {
        let payload = parse_payload(text_payload("hello").as_bytes()).unwrap();
        let sender = RecordingSender::default();
        process_payload(&payload, &EchoResponder { fail: true }, &sender).await;
        assert_eq!(sender.sent.lock().unwrap()[0].2, APOLOGY);
    }
}
