//! Notification workflow — delivers a task's payload to an HTTP webhook.
//! With no webhook configured the notification is only logged.

use async_trait::async_trait;
use serde::Deserialize;
use tickflow_core::{NotifyConfig, Result, TickflowError};
use tickflow_scheduler::{Task, Workflow, WorkflowResult};

/// Payload accepted by `send-notification` tasks.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    /// Free-form recipient hint, forwarded as-is.
    #[serde(default)]
    pub to: Option<String>,
}

pub struct NotifyWorkflow {
    config: NotifyConfig,
    client: reqwest::Client,
}

impl NotifyWorkflow {
    pub const NAME: &'static str = "send-notification";

    pub fn new(config: NotifyConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// JSON body sent to the webhook.
    fn webhook_body(task: &Task, payload: &NotificationPayload) -> serde_json::Value {
        serde_json::json!({
            "title": payload.title,
            "body": payload.body,
            "to": payload.to,
            "source": "tickflow",
            "task_id": task.id,
            "attempt": task.retry_count + 1,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })
    }
}

impl Default for NotifyWorkflow {
    fn default() -> Self {
        Self::new(NotifyConfig::default())
    }
}

/// Map a webhook response status to a workflow result.
/// Timeouts, rate limits and server errors are worth retrying; other client errors are not.
fn classify_status(status: reqwest::StatusCode) -> WorkflowResult {
    if status.is_success() {
        WorkflowResult::ok_with(serde_json::json!({"status": status.as_u16()}))
    } else if status.is_server_error()
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
    {
        WorkflowResult::retryable(format!("Webhook error {status}"))
    } else {
        WorkflowResult::permanent(format!("Webhook rejected notification: {status}"))
    }
}

#[async_trait]
impl Workflow for NotifyWorkflow {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn execute(&self, task: &Task) -> Result<WorkflowResult> {
        let payload: NotificationPayload = match serde_json::from_value(task.payload.clone()) {
            Ok(p) => p,
            Err(e) => {
                return Ok(WorkflowResult::permanent(format!("Invalid notification payload: {e}")));
            }
        };

        let Some(url) = self.config.webhook_url.as_deref() else {
            tracing::info!(
                "📢 Notification (no webhook configured): {} — {}",
                payload.title,
                payload.body
            );
            return Ok(WorkflowResult::ok_with(serde_json::json!({"delivered": false})));
        };

        tracing::info!("📨 Sending notification '{}' to {}", payload.title, url);
        let mut req = self
            .client
            .post(url)
            .json(&Self::webhook_body(task, &payload))
            .timeout(std::time::Duration::from_secs(self.config.timeout_secs));

        for (key, value) in &self.config.headers {
            req = req.header(key.as_str(), value.as_str());
        }

        let resp = req
            .send()
            .await
            .map_err(|e| TickflowError::Http(format!("Webhook send failed: {e}")))?;

        let result = classify_status(resp.status());
        if result.success {
            tracing::info!("✅ Webhook notification sent to {}: {}", url, payload.title);
        }
        Ok(result)
    }
}
