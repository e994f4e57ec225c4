//! Minimal Discord REST client (channel metadata and message history).

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

pub const DISCORD_API_URL: &str = "https://discord.com/api/v10";

/// Discord caps `limit` on the messages endpoint at 100.
pub const MAX_PAGE_SIZE: u8 = 100;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on a server-supplied rate limit wait.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// A message as returned by `GET /channels/{id}/messages`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Channel {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CurrentUser {
    pub id: String,
    pub username: String,
}

#[derive(Debug, Deserialize)]
struct RateLimitBody {
    retry_after: f64,
}

#[derive(Debug, Clone)]
pub struct DiscordClient {
    http: Client,
    token: String,
    base_url: String,
}

impl DiscordClient {
    /// Create client for a bot token. A leading `Bot ` prefix is accepted.
    pub fn new<S: Into<String>>(token: S) -> Result<Self> {
        let token = token.into();
        let token = token.trim_start();
        let token = token.strip_prefix("Bot ").unwrap_or(token).trim();
        if token.is_empty() {
            return Err(Error::MissingToken);
        }

        let http = Client::builder()
            .user_agent(format!(
                "DiscordBot (https://github.com/msggrab/msggrab, {})",
                env!("CARGO_PKG_VERSION")
            ))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            token: token.to_string(),
            base_url: DISCORD_API_URL.to_string(),
        })
    }

    /// Create client with custom base url (primarily for tests).
    pub fn with_base_url<S1: Into<String>, S2: Into<String>>(
        token: S1,
        base_url: S2,
    ) -> Result<Self> {
        let mut client = Self::new(token)?;
        client.base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(client)
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Response> {
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .header("Authorization", format!("Bot {}", self.token))
            .query(query)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("Request to {} failed: {}", path, e)))?;
        Ok(response)
    }

    /// `GET /users/@me`, used to validate the token.
    pub async fn current_user(&self) -> Result<CurrentUser> {
        let response = self.get("/users/@me", &[]).await?;
        decode(response, "@me").await
    }

    /// `GET /channels/{id}`.
    pub async fn channel(&self, channel_id: &str) -> Result<Channel> {
        let response = self.get(&format!("/channels/{}", channel_id), &[]).await?;
        decode(response, channel_id).await
    }

    /// `GET /channels/{id}/messages`, newest first, strictly older than `before`.
    pub async fn channel_messages(
        &self,
        channel_id: &str,
        limit: u8,
        before: Option<&str>,
    ) -> Result<Vec<Message>> {
        if limit == 0 || limit > MAX_PAGE_SIZE {
            return Err(Error::InvalidArgument(format!(
                "page size must be between 1 and {}, got {}",
                MAX_PAGE_SIZE, limit
            )));
        }

        let mut query = vec![("limit", limit.to_string())];
        if let Some(before) = before {
            query.push(("before", before.to_string()));
        }

        debug!(channel = channel_id, limit, before, "Fetching message page");
        let response = self
            .get(&format!("/channels/{}/messages", channel_id), &query)
            .await?;
        decode(response, channel_id).await
    }
}

async fn decode<T: for<'de> Deserialize<'de>>(response: Response, subject: &str) -> Result<T> {
    let status = response.status();
    let retry_header = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<f64>().ok());

    let text = response
        .text()
        .await
        .map_err(|e| Error::Transport(format!("Failed to read response body: {}", e)))?;

    if !status.is_success() {
        return Err(status_error(status, text, subject, retry_header));
    }

    Ok(serde_json::from_str(&text)?)
}

fn status_error(
    status: StatusCode,
    body: String,
    subject: &str,
    retry_header: Option<f64>,
) -> Error {
    match status {
        StatusCode::UNAUTHORIZED => Error::Unauthorized,
        StatusCode::FORBIDDEN => Error::Forbidden(subject.to_string()),
        StatusCode::NOT_FOUND => Error::UnknownChannel(subject.to_string()),
        StatusCode::TOO_MANY_REQUESTS => {
            let seconds = serde_json::from_str::<RateLimitBody>(&body)
                .map(|b| b.retry_after)
                .ok()
                .or(retry_header)
                .unwrap_or(1.0);
            Error::RateLimited {
                retry_after: Duration::try_from_secs_f64(seconds.max(0.0))
                    .unwrap_or(MAX_RETRY_AFTER)
                    .min(MAX_RETRY_AFTER),
            }
        }
        _ => Error::Http { status, body },
    }
}
