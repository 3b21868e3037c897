// Moderator notification sinks.
//
// - LogNotifier: writes notices to the tracing log
// - WebhookNotifier: posts a JSON payload per notice to a chat/webhook URL

use crate::core::moderation::{ModerationError, ModeratorNotifier, SpamReportNotice, User};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

pub struct LogNotifier;

#[async_trait]
impl ModeratorNotifier for LogNotifier {
    async fn notify(
        &self,
        recipient: &User,
        notice: &SpamReportNotice,
    ) -> Result<(), ModerationError> {
        tracing::info!(
            recipient = recipient.id,
            spammer_id = notice.spammer_id,
            report = %notice.target,
            "{}",
            notice.title()
        );
        Ok(())
    }
}

pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        Self {
            client: Client::new(),
            url,
        }
    }
}

#[async_trait]
impl ModeratorNotifier for WebhookNotifier {
    async fn notify(
        &self,
        recipient: &User,
        notice: &SpamReportNotice,
    ) -> Result<(), ModerationError> {
        let payload = json!({
            "recipient": {
                "id": recipient.id,
                "username": recipient.username,
                "email": recipient.email,
            },
            "title": notice.title(),
            "body": notice.body(),
            "spammer_id": notice.spammer_id,
            "target": notice.target.to_string(),
            "review_url": notice.review_url,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ModerationError::StorageError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ModerationError::StorageError(format!(
                "webhook error: {} - {}",
                status, text
            )));
        }
        Ok(())
    }
}
