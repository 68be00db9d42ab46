//! Telegram gateway -- deliver check-in messages via the Bot API.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use super::traits::MessageSender;
use crate::error::GatewayError;

pub struct TelegramSender {
    bot_token: String,
    client: Client,
}

impl TelegramSender {
    pub fn new(bot_token: &str) -> Self {
        Self {
            bot_token: bot_token.to_string(),
            client: Client::new(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.bot_token.is_empty()
    }
}

#[async_trait]
impl MessageSender for TelegramSender {
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), GatewayError> {
        if !self.is_configured() {
            return Err(GatewayError::NotConfigured {
                gateway: "telegram".to_string(),
                message: "bot token is empty".to_string(),
            });
        }

        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let body = json!({ "chat_id": chat_id, "text": text });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|source| GatewayError::Transport {
                gateway: "telegram".to_string(),
                source,
            })?;

        if resp.status().is_success() {
            Ok(())
        } else {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            Err(GatewayError::Rejected {
                gateway: "telegram".to_string(),
                status,
                body,
            })
        }
    }
}
