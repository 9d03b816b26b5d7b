//! HTTP implementation of the remote gateway.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::gateway::RemoteGateway;
use crate::error::{Result, SyncError};
use crate::queue::{
  ActionId, ActionReceipt, Channel, CommitmentPayload, DocumentPayload, PaymentPayload,
  ReminderPayload,
};

/// Header carrying the action id so the service can deduplicate replays.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Gateway that posts JSON to the savings-group REST API.
#[derive(Clone)]
pub struct HttpGateway {
  client: reqwest::Client,
  base_url: Url,
  token: Option<String>,
}

#[derive(Serialize)]
struct OutboundMessage<'a> {
  recipient_id: &'a str,
  message: &'a str,
}

impl HttpGateway {
  pub fn new(base_url: &str, timeout: Duration, token: Option<String>) -> Result<Self> {
    // A trailing slash makes `join` append instead of replacing the last segment.
    let normalized = format!("{}/", base_url.trim_end_matches('/'));
    let base_url = Url::parse(&normalized)
      .map_err(|e| SyncError::Validation(format!("invalid gateway url '{}': {}", base_url, e)))?;

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| SyncError::Network(format!("failed to build HTTP client: {}", e)))?;

    Ok(Self {
      client,
      base_url,
      token,
    })
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  fn endpoint(&self, path: &str) -> Result<Url> {
    self
      .base_url
      .join(path)
      .map_err(|e| SyncError::Validation(format!("invalid endpoint '{}': {}", path, e)))
  }

  async fn post_action<T: Serialize + Sync>(
    &self,
    path: &str,
    id: &ActionId,
    payload: &T,
  ) -> Result<ActionReceipt> {
    let url = self.endpoint(path)?;
    debug!(url = %url, id = %id, "Posting action");

    let mut request = self
      .client
      .post(url)
      .header(IDEMPOTENCY_HEADER, id.as_str())
      .json(payload);
    if let Some(token) = &self.token {
      request = request.bearer_auth(token);
    }

    let response = request.send().await.map_err(transport_error)?;
    let status = response.status();
    if status == StatusCode::CONFLICT {
      info!(id = %id, "Service already applied action");
      return Ok(ActionReceipt {
        duplicate: true,
        updates: Vec::new(),
      });
    }

    let body = response.text().await.map_err(transport_error)?;
    classify(status, &body)?;
    if body.trim().is_empty() {
      return Ok(ActionReceipt::default());
    }
    serde_json::from_str(&body)
      .map_err(|e| SyncError::Network(format!("unreadable receipt for '{}': {}", id, e)))
  }

  async fn post_message(&self, channel: Channel, recipient_id: &str, message: &str) -> Result<()> {
    let url = self.endpoint(&format!("notifications/{}", channel))?;
    debug!(url = %url, channel = %channel, "Posting notification");

    let mut request = self.client.post(url).json(&OutboundMessage {
      recipient_id,
      message,
    });
    if let Some(token) = &self.token {
      request = request.bearer_auth(token);
    }

    let response = request.send().await.map_err(transport_error)?;
    let status = response.status();
    let body = response.text().await.map_err(transport_error)?;
    classify(status, &body)
  }
}

fn transport_error(e: reqwest::Error) -> SyncError {
  SyncError::Network(e.to_string())
}

/// Map a response status onto the retry taxonomy.
///
/// Client errors other than timeouts and rate limiting are the service
/// refusing the request and will not succeed on replay.
fn classify(status: StatusCode, body: &str) -> Result<()> {
  if status.is_success() {
    return Ok(());
  }
  let detail = if body.trim().is_empty() {
    status.to_string()
  } else {
    format!("{}: {}", status, body.trim())
  };
  match status {
    StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => Err(SyncError::Network(detail)),
    s if s.is_client_error() => Err(SyncError::Rejected(detail)),
    _ => Err(SyncError::Network(detail)),
  }
}

#[async_trait]
impl RemoteGateway for HttpGateway {
  async fn submit_payment(&self, id: &ActionId, payload: &PaymentPayload) -> Result<ActionReceipt> {
    self.post_action("payments", id, payload).await
  }

  async fn record_commitment(
    &self,
    id: &ActionId,
    payload: &CommitmentPayload,
  ) -> Result<ActionReceipt> {
    self.post_action("commitments", id, payload).await
  }

  async fn schedule_reminder(
    &self,
    id: &ActionId,
    payload: &ReminderPayload,
  ) -> Result<ActionReceipt> {
    self.post_action("reminders", id, payload).await
  }

  async fn upload_document(&self, id: &ActionId, payload: &DocumentPayload) -> Result<ActionReceipt> {
    self.post_action("documents", id, payload).await
  }

  async fn send_app(&self, recipient_id: &str, message: &str) -> Result<()> {
    self.post_message(Channel::App, recipient_id, message).await
  }

  async fn send_email(&self, recipient_id: &str, message: &str) -> Result<()> {
    self.post_message(Channel::Email, recipient_id, message).await
  }

  async fn send_sms(&self, recipient_id: &str, message: &str) -> Result<()> {
    self.post_message(Channel::Sms, recipient_id, message).await
  }

  async fn send_whatsapp(&self, recipient_id: &str, message: &str) -> Result<()> {
    self.post_message(Channel::Whatsapp, recipient_id, message).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_endpoints_extend_base_path() {
    let gateway = HttpGateway::new("https://api.example.org/v1", Duration::from_secs(5), None).unwrap();
    assert_eq!(
      gateway.endpoint("payments").unwrap().as_str(),
      "https://api.example.org/v1/payments"
    );
    assert_eq!(
      gateway.endpoint("notifications/sms").unwrap().as_str(),
      "https://api.example.org/v1/notifications/sms"
    );
  }

  #[test]
  fn test_invalid_url_is_rejected() {
    assert!(matches!(
      HttpGateway::new("not a url", Duration::from_secs(5), None),
      Err(SyncError::Validation(_))
    ));
  }

  #[test]
  fn test_status_classification() {
    assert!(classify(StatusCode::OK, "").is_ok());
    assert!(classify(StatusCode::CREATED, "{}").is_ok());

    let rejected = classify(StatusCode::UNPROCESSABLE_ENTITY, "insufficient balance").unwrap_err();
    assert!(matches!(rejected, SyncError::Rejected(ref m) if m.contains("insufficient balance")));

    assert!(classify(StatusCode::SERVICE_UNAVAILABLE, "").unwrap_err().is_transient());
    assert!(classify(StatusCode::TOO_MANY_REQUESTS, "").unwrap_err().is_transient());
    assert!(!classify(StatusCode::FORBIDDEN, "").unwrap_err().is_transient());
  }
}
