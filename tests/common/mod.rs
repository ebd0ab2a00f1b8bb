//! Fake Telegram Bot API served by Axum on a random port.
//!
//! Tracks pinned messages per chat so unpin of an unknown id answers the way
//! Telegram does. Individual methods can be scripted to fail.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::post,
};
use serde_json::{Value, json};
use tokio::net::TcpListener;

/// Maximum time any test is allowed to run before we consider it hung.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

pub const BOT_TOKEN: &str = "123:fake";

#[derive(Debug, Clone)]
pub struct ApiCall {
    pub method: String,
    pub body: Value,
}

#[derive(Default)]
pub struct FakeTelegram {
    calls: Mutex<Vec<ApiCall>>,
    next_id: Mutex<i64>,
    pinned: Mutex<HashMap<String, HashSet<i64>>>,
    scripted: Mutex<HashMap<String, VecDeque<(u16, Value)>>>,
}

impl FakeTelegram {
    /// Queue a canned reply for the next call of `method`.
    pub fn script(&self, method: &str, status: u16, body: Value) {
        self.scripted
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back((status, body));
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.method).collect()
    }

    pub fn count(&self, method: &str) -> usize {
        self.calls().iter().filter(|c| c.method == method).count()
    }

    pub fn pinned_in(&self, chat_id: &str) -> HashSet<i64> {
        self.pinned
            .lock()
            .unwrap()
            .get(chat_id)
            .cloned()
            .unwrap_or_default()
    }

    fn handle(&self, method: &str, body: Value) -> (u16, Value) {
        self.calls.lock().unwrap().push(ApiCall {
            method: method.to_string(),
            body: body.clone(),
        });

        if let Some(reply) = self
            .scripted
            .lock()
            .unwrap()
            .get_mut(method)
            .and_then(VecDeque::pop_front)
        {
            return reply;
        }

        let chat = body["chat_id"].as_str().unwrap_or_default().to_string();
        let message_id = body["message_id"].as_i64().unwrap_or_default();
        match method {
            "getMe" => (200, json!({"ok": true, "result": {"id": 123, "is_bot": true}})),
            "sendMessage" => {
                let mut next = self.next_id.lock().unwrap();
                *next += 1;
                (
                    200,
                    json!({"ok": true, "result": {"message_id": 1000 + *next}}),
                )
            }
            "pinChatMessage" => {
                self.pinned
                    .lock()
                    .unwrap()
                    .entry(chat)
                    .or_default()
                    .insert(message_id);
                (200, json!({"ok": true, "result": true}))
            }
            "unpinChatMessage" => {
                let removed = self
                    .pinned
                    .lock()
                    .unwrap()
                    .get_mut(&chat)
                    .is_some_and(|ids| ids.remove(&message_id));
                if removed {
                    (200, json!({"ok": true, "result": true}))
                } else {
                    (400, not_found())
                }
            }
            other => (
                404,
                json!({"ok": false, "error_code": 404, "description": format!("Not Found: {other}")}),
            ),
        }
    }
}

pub fn not_found() -> Value {
    json!({
        "ok": false,
        "error_code": 400,
        "description": "Bad Request: message to unpin not found"
    })
}

pub fn api_error(code: u16, description: &str) -> Value {
    json!({"ok": false, "error_code": code, "description": description})
}

async fn bot_method(
    State(fake): State<Arc<FakeTelegram>>,
    Path((_bot, method)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let (status, reply) = fake.handle(&method, body);
    (
        StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(reply),
    )
}

/// Start the fake Bot API, return its base URL and handle.
pub async fn start_fake_telegram() -> (String, Arc<FakeTelegram>) {
    let fake = Arc::new(FakeTelegram::default());
    let app = Router::new()
        .route("/{bot}/{method}", post(bot_method))
        .with_state(Arc::clone(&fake));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    (format!("http://127.0.0.1:{port}"), fake)
}
