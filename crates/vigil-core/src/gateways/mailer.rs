//! HTTP mail-relay gateway.
//!
//! Posts JSON to a configured relay endpoint (bearer-token auth). The
//! relay owns SMTP and templating; this side only carries the fields the
//! engine is responsible for: the verification code on pings, the
//! farewell message and plaintext access code on disclosures.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use super::traits::EmailSender;
use crate::config::MailerConfig;
use crate::error::GatewayError;

pub struct HttpMailer {
    endpoint: String,
    token: String,
    from_address: String,
    client: Client,
}

impl HttpMailer {
    pub fn new(config: &MailerConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            token: config.token.clone(),
            from_address: config.from_address.clone(),
            client: Client::new(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.endpoint.is_empty()
    }

    async fn post(&self, body: serde_json::Value) -> Result<(), GatewayError> {
        if !self.is_configured() {
            return Err(GatewayError::NotConfigured {
                gateway: "mailer".to_string(),
                message: "relay endpoint is empty".to_string(),
            });
        }

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|source| GatewayError::Transport {
                gateway: "mailer".to_string(),
                source,
            })?;

        if resp.status().is_success() {
            Ok(())
        } else {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            Err(GatewayError::Rejected {
                gateway: "mailer".to_string(),
                status,
                body,
            })
        }
    }
}

#[async_trait]
impl EmailSender for HttpMailer {
    async fn send_ping(&self, to: &str, verification_code: &str) -> Result<(), GatewayError> {
        self.post(json!({
            "template": "ping",
            "from": self.from_address,
            "to": to,
            "verification_code": verification_code,
        }))
        .await
    }

    async fn send_disclosure(
        &self,
        to: &str,
        message: &str,
        access_code: &str,
    ) -> Result<(), GatewayError> {
        self.post(json!({
            "template": "disclosure",
            "from": self.from_address,
            "to": to,
            "message": message,
            "access_code": access_code,
        }))
        .await
    }
}
