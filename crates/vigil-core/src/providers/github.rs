//! GitHub activity provider -- polls a user's public events feed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;

use super::ActivityProvider;
use crate::error::ProviderError;
use crate::model::Subject;

const USER_AGENT: &str = "vigil";

pub struct GitHubActivityProvider {
    client: Client,
}

impl Default for GitHubActivityProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl GitHubActivityProvider {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// Newest `created_at` across the events in one feed page. The feed
    /// is returned newest-first, but we scan all entries rather than
    /// trust the ordering.
    fn newest_event_time(events: &serde_json::Value) -> Option<DateTime<Utc>> {
        events
            .as_array()?
            .iter()
            .filter_map(|event| event["created_at"].as_str())
            .filter_map(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.with_timezone(&Utc))
            .max()
    }
}

#[async_trait]
impl ActivityProvider for GitHubActivityProvider {
    fn name(&self) -> &str {
        "github"
    }

    fn is_configured(&self, subject: &Subject) -> bool {
        subject
            .github_username
            .as_deref()
            .is_some_and(|u| !u.is_empty())
    }

    async fn last_activity(
        &self,
        subject: &Subject,
    ) -> Result<Option<DateTime<Utc>>, ProviderError> {
        let Some(username) = subject.github_username.as_deref() else {
            return Ok(None);
        };

        let url = format!("https://api.github.com/users/{username}/events/public?per_page=30");
        let resp = self
            .client
            .get(&url)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .await
            .map_err(|source| ProviderError::Transport {
                provider: "github".to_string(),
                source,
            })?;

        if !resp.status().is_success() {
            return Err(ProviderError::Rejected {
                provider: "github".to_string(),
                status: resp.status().as_u16(),
            });
        }

        let events: serde_json::Value =
            resp.json().await.map_err(|source| ProviderError::Transport {
                provider: "github".to_string(),
                source,
            })?;

        if !events.is_array() {
            return Err(ProviderError::MalformedFeed {
                provider: "github".to_string(),
                message: "expected a JSON array of events".to_string(),
            });
        }

        Ok(Self::newest_event_time(&events))
    }
}
