//! Pushover push notifications
//!
//! Delivers formatted whale alerts to the configured Pushover account. The
//! pipeline treats delivery as fire-and-forget; failures are surfaced as
//! errors here and logged by the caller.

use crate::config::PushoverConfig;
use crate::error::{Result, WatchError};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info};

const PUSHOVER_API_URL: &str = "https://api.pushover.net/1/messages.json";

/// External notification collaborator.
///
/// `sound` doubles as the urgency hint: the provider maps it to an alert
/// tone on the receiving device.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &str, title: &str, sound: &str) -> Result<()>;
}

#[derive(Serialize)]
struct PushoverPayload<'a> {
    token: &'a str,
    user: &'a str,
    message: &'a str,
    title: &'a str,
    sound: &'a str,
    priority: i8,
    retry: u32,
    expire: u32,
    html: u8,
}

/// Pushover notification client
#[derive(Clone)]
pub struct PushoverNotifier {
    client: Client,
    api_url: String,
    user_key: String,
    api_token: String,
}

impl PushoverNotifier {
    /// Build from config; errors when credentials are missing so the gap is
    /// caught at bootstrap rather than on the first alert.
    pub fn new(config: &PushoverConfig) -> Result<Self> {
        let (user_key, api_token) = match (&config.user_key, &config.api_token) {
            (Some(u), Some(t)) => (u.clone(), t.clone()),
            _ => {
                return Err(WatchError::Validation(
                    "Pushover credentials not configured".to_string(),
                ))
            }
        };

        Ok(Self {
            client: Client::new(),
            api_url: PUSHOVER_API_URL.to_string(),
            user_key,
            api_token,
        })
    }
}

#[async_trait]
impl Notifier for PushoverNotifier {
    async fn send(&self, message: &str, title: &str, sound: &str) -> Result<()> {
        let payload = PushoverPayload {
            token: &self.api_token,
            user: &self.user_key,
            message,
            title,
            sound,
            priority: 2,
            retry: 60,
            expire: 3600,
            html: 1,
        };

        let resp = self
            .client
            .post(&self.api_url)
            .json(&payload)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(WatchError::Notify(format!("HTTP {}: {}", status, body)));
        }

        debug!("Notification sent: {}", title);
        Ok(())
    }
}

/// Log-only notifier used when no push credentials are configured
#[derive(Debug, Clone, Default)]
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn send(&self, message: &str, title: &str, sound: &str) -> Result<()> {
        info!("[alert:{}] {}: {}", sound, title, message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_credentials_rejected_at_construction() {
        let config = PushoverConfig {
            user_key: Some("u".to_string()),
            api_token: None,
        };
        assert!(PushoverNotifier::new(&config).is_err());
    }

    #[test]
    fn test_payload_is_emergency_priority_html() {
        let payload = PushoverPayload {
            token: "t",
            user: "u",
            message: "<b>big</b>",
            title: "Whale Trade Alert",
            sound: "war_alarm",
            priority: 2,
            retry: 60,
            expire: 3600,
            html: 1,
        };

        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["priority"], 2);
        assert_eq!(value["retry"], 60);
        assert_eq!(value["expire"], 3600);
        assert_eq!(value["html"], 1);
        assert_eq!(value["sound"], "war_alarm");
    }
}
