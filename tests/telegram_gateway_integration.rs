//! Integration tests for the Telegram gateway.
//!
//! Each test points a real `TelegramGateway` at a fake Bot API running on a
//! random port and checks the requests it makes and how replies are classified.

mod common;

use std::time::Duration;

use secrecy::SecretString;
use serde_json::json;
use tokio::time::timeout;

use common::{BOT_TOKEN, TEST_TIMEOUT, api_error, start_fake_telegram};
use pin_relay::error::GatewayError;
use pin_relay::events::model::{MessageId, OutboundCard, Topic};
use pin_relay::gateway::{MessagingGateway, RetryPolicy, TelegramGateway, UnpinOutcome};

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        call_timeout: Duration::from_secs(2),
    }
}

fn gateway(base: &str) -> TelegramGateway {
    TelegramGateway::new(SecretString::from(BOT_TOKEN.to_string()), fast_retry()).with_api_base(base)
}

fn card() -> OutboundCard {
    OutboundCard {
        text: "🔍 <b>github</b> · review #42".into(),
    }
}

#[tokio::test]
async fn send_posts_html_into_thread() {
    timeout(TEST_TIMEOUT, async {
        let (base, fake) = start_fake_telegram().await;
        let gw = gateway(&base);

        let id = gw
            .send(&Topic::new("-100", Some(7)), &card())
            .await
            .unwrap();
        assert_eq!(id, MessageId(1001));

        let call = &fake.calls()[0];
        assert_eq!(call.method, "sendMessage");
        assert_eq!(call.body["chat_id"], "-100");
        assert_eq!(call.body["message_thread_id"], 7);
        assert_eq!(call.body["parse_mode"], "HTML");
        assert_eq!(call.body["link_preview_options"]["is_disabled"], true);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn pin_is_silent_and_unpin_is_idempotent() {
    timeout(TEST_TIMEOUT, async {
        let (base, fake) = start_fake_telegram().await;
        let gw = gateway(&base);
        let topic = Topic::new("-100", None);

        gw.pin(&topic, MessageId(1001)).await.unwrap();
        assert_eq!(fake.calls()[0].body["disable_notification"], true);
        assert!(fake.pinned_in("-100").contains(&1001));

        let first = gw.unpin(&topic, MessageId(1001)).await.unwrap();
        let second = gw.unpin(&topic, MessageId(1001)).await.unwrap();
        assert_eq!(first, UnpinOutcome::Unpinned);
        assert_eq!(second, UnpinOutcome::NotFound);
        // Not-found is an answer, not a failure, so it is not retried.
        assert_eq!(fake.count("unpinChatMessage"), 2);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn server_errors_are_retried() {
    timeout(TEST_TIMEOUT, async {
        let (base, fake) = start_fake_telegram().await;
        fake.script("sendMessage", 502, api_error(502, "Bad Gateway"));

        let id = gateway(&base)
            .send(&Topic::new("-100", None), &card())
            .await
            .unwrap();

        assert_eq!(id, MessageId(1001));
        assert_eq!(fake.count("sendMessage"), 2);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn rate_limit_is_retried() {
    timeout(TEST_TIMEOUT, async {
        let (base, fake) = start_fake_telegram().await;
        fake.script(
            "pinChatMessage",
            429,
            json!({
                "ok": false,
                "error_code": 429,
                "description": "Too Many Requests: retry after 0",
                "parameters": {"retry_after": 0}
            }),
        );

        gateway(&base)
            .pin(&Topic::new("-100", None), MessageId(5))
            .await
            .unwrap();
        assert_eq!(fake.count("pinChatMessage"), 2);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn retries_give_up_as_transient() {
    timeout(TEST_TIMEOUT, async {
        let (base, fake) = start_fake_telegram().await;
        for _ in 0..3 {
            fake.script("sendMessage", 500, api_error(500, "Internal Server Error"));
        }

        let err = gateway(&base)
            .send(&Topic::new("-100", None), &card())
            .await
            .unwrap_err();

        assert!(err.is_transient());
        assert_eq!(fake.count("sendMessage"), 3);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn forbidden_is_permanent_and_not_retried() {
    timeout(TEST_TIMEOUT, async {
        let (base, fake) = start_fake_telegram().await;
        fake.script(
            "sendMessage",
            403,
            api_error(403, "Forbidden: bot was kicked from the supergroup chat"),
        );

        let err = gateway(&base)
            .send(&Topic::new("-100", None), &card())
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::Permanent { operation: "send", .. }));
        assert_eq!(fake.count("sendMessage"), 1);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unreachable_api_is_transient() {
    timeout(TEST_TIMEOUT, async {
        // Bind then drop to get a port with nothing listening.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = gateway(&format!("http://127.0.0.1:{port}"))
            .send(&Topic::new("-100", None), &card())
            .await
            .unwrap_err();
        assert!(err.is_transient());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn health_check_calls_get_me() {
    timeout(TEST_TIMEOUT, async {
        let (base, fake) = start_fake_telegram().await;
        gateway(&base).health_check().await.unwrap();
        assert_eq!(fake.methods(), vec!["getMe"]);

        fake.script("getMe", 401, api_error(401, "Unauthorized"));
        let err = gateway(&base).health_check().await.unwrap_err();
        assert!(!err.is_transient());
    })
    .await
    .expect("test timed out");
}
