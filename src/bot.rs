//! Telegram Bot API client and the `/start` front door.
//!
//! The client speaks the Bot HTTP API directly over reqwest; only the two
//! methods this service needs are wired up. The front door long-polls
//! `getUpdates` for `/start` commands, registers the sender through the same
//! resolve-or-create path the web surface uses, and replies with an inline
//! button that opens the mini-app.

use crate::config::BotConfig;
use crate::db::Database;
use crate::notify::MessageSink;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Minimal Telegram Bot API client.
#[derive(Clone)]
pub struct BotClient {
    http: reqwest::Client,
    base: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub chat: Chat,
    pub from: Option<TgUser>,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct TgUser {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
}

impl TgUser {
    pub fn full_name(&self) -> String {
        match self.last_name.as_deref() {
            Some(last) if !last.is_empty() => format!("{} {}", self.first_name, last),
            _ => self.first_name.clone(),
        }
    }
}

impl BotClient {
    pub fn new(token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: format!("https://api.telegram.org/bot{}", token),
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: serde_json::Value) -> Result<T> {
        let resp = self
            .http
            .post(format!("{}/{}", self.base, method))
            .json(&body)
            .send()
            .await?;
        let parsed: ApiResponse<T> = resp.json().await?;
        if !parsed.ok {
            return Err(anyhow!(
                "telegram api error: {}",
                parsed.description.unwrap_or_else(|| "unknown".to_string())
            ));
        }
        parsed
            .result
            .ok_or_else(|| anyhow!("telegram api returned empty result"))
    }

    /// Send a plain text message.
    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        let _: serde_json::Value = self
            .call("sendMessage", json!({ "chat_id": chat_id, "text": text }))
            .await?;
        Ok(())
    }

    /// Send a message with an inline button that opens the mini-app.
    pub async fn send_webapp_button(&self, chat_id: i64, text: &str, url: &str) -> Result<()> {
        let body = json!({
            "chat_id": chat_id,
            "text": text,
            "reply_markup": {
                "inline_keyboard": [[
                    { "text": "Open App", "web_app": { "url": url } }
                ]]
            }
        });
        let _: serde_json::Value = self.call("sendMessage", body).await?;
        Ok(())
    }

    /// Long-poll for new updates starting at `offset`.
    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>> {
        let body = json!({
            "offset": offset,
            "timeout": timeout_secs,
            "allowed_updates": ["message"],
        });
        self.call("getUpdates", body).await
    }
}

#[async_trait]
impl MessageSink for BotClient {
    async fn deliver(&self, chat_id: i64, text: &str) -> Result<()> {
        self.send_message(chat_id, text).await
    }
}

/// Long-poll for `/start` commands and reply with the launch button.
///
/// Poll failures back off and the loop continues; the front door never takes
/// the process down.
pub async fn run_start_listener(bot: BotClient, db: Database, config: BotConfig) {
    info!("Bot front door listening for /start");

    let mut offset = 0i64;
    loop {
        let updates = match bot.get_updates(offset, config.poll_timeout_secs).await {
            Ok(updates) => updates,
            Err(e) => {
                warn!(error = %e, "getUpdates failed, backing off");
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);

            let Some(message) = update.message else {
                continue;
            };
            let Some(text) = message.text.as_deref() else {
                continue;
            };
            if text != "/start" && !text.starts_with("/start ") {
                continue;
            }
            let Some(from) = message.from else {
                continue;
            };

            match db.resolve_or_create(from.id, &from.full_name(), config.owner_id) {
                Ok(user) => {
                    debug!(telegram_id = from.id, role = %user.role, "start command handled");
                }
                Err(e) => {
                    warn!(telegram_id = from.id, error = %e, "failed to resolve user on /start");
                    continue;
                }
            }

            if let Err(e) = bot
                .send_webapp_button(message.chat.id, "Task Manager:", &config.webapp_url)
                .await
            {
                warn!(chat_id = message.chat.id, error = %e, "failed to send launch button");
            }
        }
    }
}
