use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, error, info};

use shared_config::AppConfig;

use crate::models::AppointmentNotification;

/// Notification collaborator invoked inside the transition's transaction.
/// An `Err` vetoes the transition.
#[async_trait]
pub trait AppointmentNotifier: Send + Sync {
    async fn notify(&self, notification: &AppointmentNotification) -> Result<()>;
}

/// Writes notifications to the log and never fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl AppointmentNotifier for LogNotifier {
    async fn notify(&self, notification: &AppointmentNotification) -> Result<()> {
        info!(
            target: "notifications",
            event = ?notification.event,
            appointment_id = %notification.appointment_id,
            patient_id = %notification.patient_id,
            slot_id = %notification.slot_id,
            "appointment notification"
        );
        Ok(())
    }
}

/// POSTs each notification as JSON. A transport error, a timeout or a non-2xx reply
/// is a hard failure.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("building notification webhook client")?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl AppointmentNotifier for WebhookNotifier {
    async fn notify(&self, notification: &AppointmentNotification) -> Result<()> {
        debug!("Posting {:?} notification for appointment {} to {}", notification.event, notification.appointment_id, self.url);

        let response = self.client.post(&self.url).json(notification).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Notification webhook returned {}: {}", status, body);
            return Err(anyhow!("notification webhook returned {}: {}", status, body));
        }

        Ok(())
    }
}

/// Webhook when `NOTIFICATION_WEBHOOK_URL` is set, log otherwise.
pub fn notifier_from_config(config: &AppConfig) -> Result<Arc<dyn AppointmentNotifier>> {
    match &config.notification_webhook_url {
        Some(url) => {
            let timeout = Duration::from_secs(config.notification_timeout_secs);
            info!("Appointment notifications will be posted to {} ({:?} timeout)", url, timeout);
            Ok(Arc::new(WebhookNotifier::new(url.clone(), timeout)?))
        }
        None => Ok(Arc::new(LogNotifier)),
    }
}
