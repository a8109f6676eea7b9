//! Delivery channels.
//!
//! `Mock`, `Email`, and `Slack` are simulated: the platform does not carry an
//! SMTP or Slack API client, so these channels log the would-be delivery and
//! always succeed. `Webhook` is the one channel with a real side effect — it
//! POSTs the notification as JSON to `Config::webhook_url`. With no URL
//! configured it falls back to mock behavior rather than failing the request.

use incident_core::types::notification::{Channel, Notification};
use incident_core::Config;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("webhook delivery to {0} failed: {1}")]
    DeliveryFailed(String, String),
}

pub async fn dispatch(http: &reqwest::Client, config: &Config, channel: Channel, notification: &Notification) -> Result<(), ChannelError> {
    match channel {
        Channel::Mock => {
            tracing::info!(recipient = %notification.recipient, "mock channel delivered notification");
            Ok(())
        }
        Channel::Email => {
            tracing::info!(recipient = %notification.recipient, "simulated email delivery");
            Ok(())
        }
        Channel::Slack => {
            tracing::info!(recipient = %notification.recipient, "simulated Slack delivery");
            Ok(())
        }
        Channel::Webhook => deliver_webhook(http, config, notification).await,
    }
}

async fn deliver_webhook(http: &reqwest::Client, config: &Config, notification: &Notification) -> Result<(), ChannelError> {
    let Some(url) = &config.webhook_url else {
        tracing::info!(recipient = %notification.recipient, "webhook unconfigured, behaving as mock");
        return Ok(());
    };
    let response = http
        .post(url)
        .json(notification)
        .send()
        .await
        .map_err(|e| ChannelError::DeliveryFailed(url.clone(), e.to_string()))?;
    if !response.status().is_success() {
        return Err(ChannelError::DeliveryFailed(url.clone(), response.status().to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use incident_core::types::notification::NotificationStatus;
    use incident_core::IncidentId;

    fn notification() -> Notification {
        Notification::new(IncidentId::new(), Channel::Mock, "oncall@example.com".into(), "hi".into(), None, None, NotificationStatus::Sent)
    }

    #[tokio::test]
    async fn webhook_without_configured_url_behaves_as_mock() {
        let config = Config::from_env(0);
        let http = reqwest::Client::new();
        assert!(dispatch(&http, &config, Channel::Webhook, &notification()).await.is_ok());
    }

    #[tokio::test]
    async fn mock_channel_always_succeeds() {
        let config = Config::from_env(0);
        let http = reqwest::Client::new();
        assert!(dispatch(&http, &config, Channel::Mock, &notification()).await.is_ok());
    }
}
