use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::EmailError;
use crate::config::{EmailConfig, EmailTransportKind};

#[derive(Debug, Clone, Serialize)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub provider_message_id: String,
}

#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<SentEmail, EmailError>;

    fn name(&self) -> &'static str;
}

/// Writes the message to the log instead of delivering it
#[derive(Debug, Default)]
pub struct LogTransport;

#[async_trait]
impl EmailTransport for LogTransport {
    async fn send(&self, email: &OutgoingEmail) -> Result<SentEmail, EmailError> {
        let id = format!("log-{}", Uuid::new_v4().simple());
        tracing::info!(
            to = %email.to,
            subject = %email.subject,
            message_id = %id,
            "Email not sent (log transport)"
        );
        Ok(SentEmail { provider_message_id: id })
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Generic JSON-over-HTTP provider: POST `{from, to, subject, html, text}` with a bearer key
pub struct HttpEmailTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

#[derive(Deserialize)]
struct ProviderResponse {
    id: Option<String>,
}

impl HttpEmailTransport {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl EmailTransport for HttpEmailTransport {
    async fn send(&self, email: &OutgoingEmail) -> Result<SentEmail, EmailError> {
        tracing::debug!("POST {} for {}", self.endpoint, email.to);
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(email)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmailError::Provider { status: status.as_u16(), body });
        }

        let parsed: ProviderResponse = response
            .json()
            .await
            .map_err(|e| EmailError::InvalidResponse(e.to_string()))?;
        match parsed.id {
            Some(id) if !id.is_empty() => Ok(SentEmail { provider_message_id: id }),
            _ => Err(EmailError::InvalidResponse("missing message id".to_string())),
        }
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Log transport unless sending is enabled with a complete HTTP configuration
pub fn transport_from_config(config: &EmailConfig) -> Result<Arc<dyn EmailTransport>, EmailError> {
    if !config.send_enabled {
        return Ok(Arc::new(LogTransport));
    }
    match config.transport {
        EmailTransportKind::Log => Ok(Arc::new(LogTransport)),
        EmailTransportKind::Http => {
            let endpoint = config
                .endpoint
                .as_deref()
                .filter(|e| !e.trim().is_empty())
                .ok_or_else(|| EmailError::NotConfigured("EMAIL_ENDPOINT".to_string()))?;
            let api_key = config
                .api_key
                .as_deref()
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| EmailError::NotConfigured("EMAIL_API_KEY".to_string()))?;
            Ok(Arc::new(HttpEmailTransport::new(endpoint, api_key)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email_config(send_enabled: bool, transport: EmailTransportKind, endpoint: Option<&str>) -> EmailConfig {
        EmailConfig {
            send_enabled,
            transport,
            endpoint: endpoint.map(str::to_string),
            api_key: Some("test-key-0123456789abcdef".to_string()),
            from_address: "atlas@example.org".to_string(),
            max_batch_size: 10,
        }
    }

    #[test]
    fn disabled_sending_uses_log_transport() {
        let t = transport_from_config(&email_config(false, EmailTransportKind::Http, None)).unwrap();
        assert_eq!(t.name(), "log");
    }

    #[test]
    fn http_without_endpoint_is_not_configured() {
        let err = transport_from_config(&email_config(true, EmailTransportKind::Http, Some(" "))).err().unwrap();
        assert!(matches!(err, EmailError::NotConfigured(ref v) if v == "EMAIL_ENDPOINT"));
    }

    #[tokio::test]
    async fn log_transport_returns_synthetic_id() {
        let sent = LogTransport
            .send(&OutgoingEmail {
                from: "a@example.org".into(),
                to: "b@example.org".into(),
                subject: "s".into(),
                html: "<p>h</p>".into(),
                text: None,
            })
            .await
            .unwrap();
        assert!(sent.provider_message_id.starts_with("log-"));
    }
}
