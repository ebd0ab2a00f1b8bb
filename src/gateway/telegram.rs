//! Telegram gateway: sendMessage / pinChatMessage / unpinChatMessage.
//!
//! Native Bot API calls over reqwest. Failures are classified so the retry
//! policy only repeats calls that can plausibly succeed on a second try.

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, info};

use super::retry::RetryPolicy;
use super::{MessagingGateway, UnpinOutcome};
use crate::error::GatewayError;
use crate::events::model::{MessageId, OutboundCard, Topic};

/// Default Bot API host.
pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Envelope every Bot API method responds with.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error_code: Option<u16>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

/// Telegram Bot API implementation of [`MessagingGateway`].
pub struct TelegramGateway {
    bot_token: SecretString,
    api_base: String,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl TelegramGateway {
    pub fn new(bot_token: SecretString, retry: RetryPolicy) -> Self {
        Self {
            bot_token,
            api_base: TELEGRAM_API_BASE.to_string(),
            retry,
            client: reqwest::Client::new(),
        }
    }

    /// Point the gateway at a different Bot API host (local API server, tests).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.api_base,
            self.bot_token.expose_secret()
        )
    }

    /// POST one Bot API method and decode the envelope.
    async fn post(
        &self,
        operation: &'static str,
        method: &str,
        body: &serde_json::Value,
    ) -> Result<(StatusCode, ApiResponse), GatewayError> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(operation, &e))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| transport_error(operation, &e))?;

        match serde_json::from_str::<ApiResponse>(&text) {
            Ok(parsed) => Ok((status, parsed)),
            Err(_) if status.is_server_error() => Err(GatewayError::transient(
                operation,
                format!("{method} returned {status}"),
            )),
            Err(e) => Err(GatewayError::permanent(
                operation,
                format!("{method} returned {status} with unreadable body: {e}"),
            )),
        }
    }

    /// Check that the bot token is valid.
    pub async fn health_check(&self) -> Result<(), GatewayError> {
        let (status, resp) = self
            .post("health_check", "getMe", &serde_json::json!({}))
            .await?;
        if resp.ok {
            Ok(())
        } else {
            Err(api_failure("health_check", status, &resp))
        }
    }
}

#[async_trait]
impl MessagingGateway for TelegramGateway {
    async fn unpin(&self, topic: &Topic, id: MessageId) -> Result<UnpinOutcome, GatewayError> {
        let body = serde_json::json!({
            "chat_id": topic.chat_id,
            "message_id": id.0,
        });
        let outcome = self
            .retry
            .run("unpin", || async {
                let (status, resp) = self.post("unpin", "unpinChatMessage", &body).await?;
                if resp.ok {
                    Ok(UnpinOutcome::Unpinned)
                } else if is_not_found(&resp) {
                    Ok(UnpinOutcome::NotFound)
                } else {
                    Err(api_failure("unpin", status, &resp))
                }
            })
            .await?;

        debug!(topic = %topic, message_id = %id, ?outcome, "Telegram unpin");
        Ok(outcome)
    }

    async fn send(&self, topic: &Topic, card: &OutboundCard) -> Result<MessageId, GatewayError> {
        let mut body = serde_json::json!({
            "chat_id": topic.chat_id,
            "text": card.text,
            "parse_mode": "HTML",
            "link_preview_options": { "is_disabled": true },
        });
        if let Some(thread_id) = topic.thread_id {
            body["message_thread_id"] = serde_json::json!(thread_id);
        }

        let id = self
            .retry
            .run("send", || async {
                let (status, resp) = self.post("send", "sendMessage", &body).await?;
                if !resp.ok {
                    return Err(api_failure("send", status, &resp));
                }
                resp.result
                    .as_ref()
                    .and_then(|r| r.get("message_id"))
                    .and_then(serde_json::Value::as_i64)
                    .map(MessageId)
                    .ok_or_else(|| {
                        GatewayError::permanent("send", "sendMessage result has no message_id")
                    })
            })
            .await?;

        info!(topic = %topic, message_id = %id, "Telegram message sent");
        Ok(id)
    }

    async fn pin(&self, topic: &Topic, id: MessageId) -> Result<(), GatewayError> {
        let body = serde_json::json!({
            "chat_id": topic.chat_id,
            "message_id": id.0,
            "disable_notification": true,
        });
        self.retry
            .run("pin", || async {
                let (status, resp) = self.post("pin", "pinChatMessage", &body).await?;
                if resp.ok {
                    Ok(())
                } else {
                    Err(api_failure("pin", status, &resp))
                }
            })
            .await?;

        debug!(topic = %topic, message_id = %id, "Telegram pin");
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn transport_error(operation: &'static str, e: &reqwest::Error) -> GatewayError {
    if e.is_builder() {
        GatewayError::permanent(operation, e.to_string())
    } else {
        GatewayError::transient(operation, e.to_string())
    }
}

/// Classify an `ok: false` response.
fn api_failure(operation: &'static str, status: StatusCode, resp: &ApiResponse) -> GatewayError {
    let code = resp
        .error_code
        .and_then(|c| StatusCode::from_u16(c).ok())
        .unwrap_or(status);
    let reason = format!(
        "{code}: {}",
        resp.description.as_deref().unwrap_or("no description")
    );

    if code == StatusCode::TOO_MANY_REQUESTS {
        GatewayError::Transient {
            operation,
            reason,
            retry_after: resp
                .parameters
                .as_ref()
                .and_then(|p| p.retry_after)
                .map(std::time::Duration::from_secs),
        }
    } else if code.is_server_error() {
        GatewayError::transient(operation, reason)
    } else {
        GatewayError::permanent(operation, reason)
    }
}

/// Telegram reports an already-unpinned or deleted message as a 400.
fn is_not_found(resp: &ApiResponse) -> bool {
    if resp.error_code != Some(400) {
        return false;
    }
    let desc = resp
        .description
        .as_deref()
        .unwrap_or_default()
        .to_ascii_lowercase();
    desc.contains("message to unpin not found")
        || desc.contains("message not found")
        || desc.contains("not pinned")
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn response(json: &str) -> ApiResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn telegram_api_url() {
        let gw = TelegramGateway::new(SecretString::from("123:ABC"), RetryPolicy::default());
        assert_eq!(
            gw.api_url("sendMessage"),
            "https://api.telegram.org/bot123:ABC/sendMessage"
        );
    }

    #[test]
    fn telegram_api_url_custom_base_strips_slash() {
        let gw = TelegramGateway::new(SecretString::from("t"), RetryPolicy::default())
            .with_api_base("http://127.0.0.1:9000/");
        assert_eq!(gw.api_url("getMe"), "http://127.0.0.1:9000/bott/getMe");
    }

    #[test]
    fn rate_limit_is_transient_with_retry_after() {
        let resp = response(
            r#"{"ok":false,"error_code":429,"description":"Too Many Requests: retry after 3","parameters":{"retry_after":3}}"#,
        );
        match api_failure("send", StatusCode::TOO_MANY_REQUESTS, &resp) {
            GatewayError::Transient { retry_after, .. } => {
                assert_eq!(retry_after, Some(std::time::Duration::from_secs(3)));
            }
            other => panic!("expected transient, got {other:?}"),
        }
    }

    #[test]
    fn server_errors_are_transient() {
        let resp = response(r#"{"ok":false,"error_code":502,"description":"Bad Gateway"}"#);
        assert!(api_failure("send", StatusCode::BAD_GATEWAY, &resp).is_transient());
    }

    #[test]
    fn permission_errors_are_permanent() {
        let resp = response(
            r#"{"ok":false,"error_code":403,"description":"Forbidden: bot was kicked from the supergroup chat"}"#,
        );
        let err = api_failure("pin", StatusCode::FORBIDDEN, &resp);
        assert!(!err.is_transient());
        assert!(err.to_string().contains("bot was kicked"));
    }

    #[test]
    fn unpin_not_found_descriptions() {
        assert!(is_not_found(&response(
            r#"{"ok":false,"error_code":400,"description":"Bad Request: message to unpin not found"}"#
        )));
        assert!(is_not_found(&response(
            r#"{"ok":false,"error_code":400,"description":"Bad Request: message is not pinned"}"#
        )));
        assert!(!is_not_found(&response(
            r#"{"ok":false,"error_code":400,"description":"Bad Request: chat not found"}"#
        )));
        assert!(!is_not_found(&response(
            r#"{"ok":false,"error_code":403,"description":"Forbidden: not enough rights"}"#
        )));
    }
}
