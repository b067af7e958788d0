use chrono::Utc;
use reqwest;
use serde_json::json;
use std::time::Duration;
use tracing;

use crate::errors::AppError;
use crate::models::CallbackRequest;

/// Posts callback lifecycle events to an outbound webhook.
///
/// Delivery is best effort: a failed post is logged by the caller and never
/// rolls back the state change that produced it.
#[derive(Clone)]
pub struct CallbackNotifier {
    client: reqwest::Client,
    url: String,
}

impl CallbackNotifier {
    /// Creates a new `CallbackNotifier`.
    ///
    /// # Arguments
    ///
    /// * `url` - The webhook endpoint receiving events.
    pub fn new(url: String) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create notifier client: {}", e))
            })?;

        Ok(Self { client, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Posts one event describing `request`'s current state.
    ///
    /// # Arguments
    ///
    /// * `event` - Event name, e.g. `callback.created` or `callback.completed`.
    /// * `request` - The callback request after the change.
    pub async fn notify(&self, event: &str, request: &CallbackRequest) -> Result<(), AppError> {
        let body = json!({
            "event": event,
            "callbackId": request.id,
            "representativeId": request.representative_id,
            "status": request.status,
            "at": Utc::now(),
        });

        tracing::debug!("Posting {} for callback {} to {}", event, request.id, self.url);

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Notification failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "Notification webhook returned {}: {}",
                status, error_text
            )));
        }

        Ok(())
    }

    /// Fires `notify` on a background task, logging failures only.
    pub fn spawn_notify(&self, event: &'static str, request: CallbackRequest) {
        let notifier = self.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(event, &request).await {
                tracing::warn!("Failed to deliver {} for callback {}: {}", event, request.id, e);
            }
        });
    }
}

/// Event name for a request that just entered `status`.
pub fn event_for(request: &CallbackRequest) -> &'static str {
    use crate::models::CallbackStatus;
    match request.status {
        CallbackStatus::Pending => "callback.created",
        CallbackStatus::Scheduled => "callback.scheduled",
        CallbackStatus::Completed => "callback.completed",
        CallbackStatus::Cancelled => "callback.cancelled",
    }
}
