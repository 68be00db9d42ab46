//! Gateway contracts consumed by the engine tasks.
//!
//! Senders are fire-and-forget collaborators: fallible, safe to retry at
//! the caller's discretion, and never retried within a single task run.

use async_trait::async_trait;

use crate::error::GatewayError;

/// Delivers check-in pings and secret disclosures over email.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Send a check-in request carrying a fresh verification code.
    async fn send_ping(&self, to: &str, verification_code: &str) -> Result<(), GatewayError>;

    /// Send a secret-disclosure notification to a recipient: the
    /// subject's farewell message plus the plaintext access code.
    async fn send_disclosure(
        &self,
        to: &str,
        message: &str,
        access_code: &str,
    ) -> Result<(), GatewayError>;
}

/// Delivers short check-in messages over a chat platform.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), GatewayError>;
}
