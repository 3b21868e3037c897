// Akismet adapter for the external spam checker port.
//
// The key is verified once at construction. Every failure after that
// (invalid key, timeouts, non-2xx responses) is logged and treated as
// "not spam" / "not acknowledged" so submissions are never held up.

use crate::core::moderation::{
    ExternalSpamCandidate, ExternalSpamChecker, ModerationError, SpamCheckRequest,
};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

const VERIFY_KEY_URL: &str = "https://rest.akismet.com/1.1/verify-key";

/// Where the three Akismet calls go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AkismetEndpoints {
    pub verify_key: String,
    pub comment_check: String,
    pub submit_spam: String,
}

impl AkismetEndpoints {
    pub fn production(key: &str) -> Self {
        Self {
            verify_key: VERIFY_KEY_URL.to_string(),
            comment_check: format!("https://{}.rest.akismet.com/1.1/comment-check", key),
            submit_spam: format!("https://{}.rest.akismet.com/1.1/submit-spam", key),
        }
    }

    /// All three endpoints under one base URL, e.g. a local mock server.
    pub fn at(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            verify_key: format!("{}/1.1/verify-key", base),
            comment_check: format!("{}/1.1/comment-check", base),
            submit_spam: format!("{}/1.1/submit-spam", base),
        }
    }
}

pub struct AkismetClient {
    client: Client,
    key: String,
    site_url: String,
    endpoints: AkismetEndpoints,
    key_valid: bool,
}

impl AkismetClient {
    /// Connect to the production service and verify `key` for `site_url`.
    pub async fn connect(key: &str, site_url: &str, timeout: Duration) -> Self {
        Self::connect_to(AkismetEndpoints::production(key), key, site_url, timeout).await
    }

    pub async fn connect_to(
        endpoints: AkismetEndpoints,
        key: &str,
        site_url: &str,
        timeout: Duration,
    ) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build Akismet HTTP client, using defaults: {}", e);
                Client::new()
            });

        let mut checker = Self {
            client,
            key: key.to_string(),
            site_url: site_url.to_string(),
            endpoints,
            key_valid: false,
        };
        checker.key_valid = checker.verify_key().await;
        if !checker.key_valid {
            tracing::warn!("Akismet key is not valid for {}; content checks are disabled", site_url);
        }
        checker
    }

    pub fn is_key_valid(&self) -> bool {
        self.key_valid
    }

    async fn verify_key(&self) -> bool {
        let params = [("key", self.key.as_str()), ("blog", self.site_url.as_str())];
        match self.post_form(&self.endpoints.verify_key, &params).await {
            Ok(body) => body.trim() == "valid",
            Err(e) => {
                tracing::warn!("Akismet key verification failed: {}", e);
                false
            }
        }
    }

    /// POST a form and return the body of a 2xx response.
    async fn post_form(&self, url: &str, params: &[(&str, &str)]) -> Result<String, ModerationError> {
        let response = self
            .client
            .post(url)
            .form(params)
            .send()
            .await
            .map_err(|e| ModerationError::ExternalServiceDegraded(format!("{} unreachable: {}", url, e)))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ModerationError::ExternalServiceDegraded(format!("{} body: {}", url, e)))?;
        if !status.is_success() {
            return Err(ModerationError::ExternalServiceDegraded(format!(
                "{} returned {}: {}",
                url, status, body
            )));
        }
        Ok(body)
    }

    /// Like `post_form`, but refuses to call out with an unverified key.
    async fn call(&self, url: &str, params: &[(&str, &str)]) -> Result<String, ModerationError> {
        if !self.key_valid {
            return Err(ModerationError::ExternalServiceDegraded(
                "Akismet key not valid".to_string(),
            ));
        }
        self.post_form(url, params).await
    }
}

#[async_trait]
impl ExternalSpamChecker for AkismetClient {
    async fn check_content(&self, request: &SpamCheckRequest) -> bool {
        let params = [
            ("blog", self.site_url.as_str()),
            ("user_ip", request.user_ip.as_str()),
            ("user_agent", request.user_agent.as_str()),
            ("referrer", request.referrer.as_str()),
            ("comment_type", "comment"),
            ("comment_author", request.author_name.as_str()),
            ("comment_author_email", request.author_email.as_str()),
            ("comment_author_url", request.author_url.as_str()),
            ("comment_content", request.content.as_str()),
            ("blog_lang", request.locale.as_str()),
            ("blog_charset", "UTF-8"),
        ];

        match self.call(&self.endpoints.comment_check, &params).await {
            Ok(body) => body.trim() == "true",
            Err(e) => {
                tracing::warn!("Could not check post content: {}", e);
                false
            }
        }
    }

    async fn report_missed_spam(&self, candidate: &ExternalSpamCandidate) -> bool {
        let params = [
            ("blog", self.site_url.as_str()),
            ("user_ip", candidate.user_ip.as_str()),
            ("user_agent", candidate.user_agent.as_str()),
            ("comment_type", "comment"),
            ("comment_author", candidate.comment_author.as_str()),
            ("comment_author_email", candidate.comment_author_email.as_str()),
            ("comment_content", candidate.comment_content.as_str()),
        ];

        match self.call(&self.endpoints.submit_spam, &params).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(candidate_id = candidate.id, "Could not submit spam: {}", e);
                false
            }
        }
    }
}
