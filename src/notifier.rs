use crate::config::WorkerConfig;
use bluebase_protocol::TaskNotification;
use std::time::Duration;

/// Delivers the outcome of a task somewhere outside the worker.
///
/// Delivery is best effort: implementations log their failures and never
/// hand them back, so a broken receiver cannot turn a finished task into a
/// failed one.
pub trait Notifier {
    fn notify(&self, notification: &TaskNotification);
}

/// POSTs the notification as JSON to a configured URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    url: Option<String>,
    timeout: Duration,
}

impl WebhookNotifier {
    pub fn new(url: Option<String>, timeout: Duration) -> Self {
        Self { url, timeout }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(config.webhook_url.clone(), config.webhook_timeout)
    }

    fn deliver(&self, url: &str, notification: &TaskNotification) -> Result<(), String> {
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| format!("could not build webhook client: {e}"))?;
        let response = client
            .post(url)
            .json(notification)
            .send()
            .map_err(|e| format!("webhook request failed: {e}"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(format!("webhook answered {status}: {}", body.trim()));
        }
        log::info!("Webhook answered {status} for task {}", notification.task_id);
        Ok(())
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, notification: &TaskNotification) {
        let Some(url) = self.url.as_deref() else {
            log::warn!(
                "No webhook URL configured; not reporting task {}",
                notification.task_id
            );
            return;
        };
        log::info!(
            "Sending {:?} notification for task {} to {url}",
            notification.status,
            notification.task_id
        );
        if let Err(e) = self.deliver(url, notification) {
            log::warn!("[Webhook error] task {}: {e}", notification.task_id);
        }
    }
}
