use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::PgPool;
use uuid::Uuid;

use super::{is_valid_email, render, EmailTransport, OutgoingEmail, RenderedEmail, TemplateError};
use crate::database::models::{BatchRecipient, EmailBatch, EmailTemplate};
use crate::database::{with_transaction, DatabaseError};
use crate::error::{ApiError, FieldErrors};
use crate::types::{EmailBatchStatus, RecipientStatus};

const TEMPLATE_COLUMNS: &str = "id, template_key, name, subject, body_html, body_text, is_active";
const BATCH_COLUMNS: &str =
    "id, template_id, status, recipient_count, sent_count, failed_count, created_by, created_at, sent_at";
const RECIPIENT_COLUMNS: &str = "id, email, person_id, variables, status, provider_message_id, error, sent_at";

#[derive(Debug, Clone, Deserialize)]
pub struct RecipientInput {
    pub email: String,
    pub person_id: Option<Uuid>,
    #[serde(default)]
    pub vars: Map<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct BatchDetail {
    #[serde(flatten)]
    pub batch: EmailBatch,
    pub template_key: String,
    pub recipients: Vec<BatchRecipient>,
}

impl EmailTemplate {
    pub fn render(&self, vars: &Map<String, Value>) -> Result<RenderedEmail, TemplateError> {
        render(&self.subject, &self.body_html, self.body_text.as_deref(), vars)
    }
}

pub async fn list_templates(pool: &PgPool) -> Result<Vec<EmailTemplate>, DatabaseError> {
    let sql = format!(
        "SELECT {} FROM ops.email_templates WHERE is_active ORDER BY name",
        TEMPLATE_COLUMNS
    );
    Ok(sqlx::query_as::<_, EmailTemplate>(&sql).fetch_all(pool).await?)
}

pub async fn find_template(pool: &PgPool, key: &str) -> Result<Option<EmailTemplate>, DatabaseError> {
    let sql = format!("SELECT {} FROM ops.email_templates WHERE template_key = $1", TEMPLATE_COLUMNS);
    Ok(sqlx::query_as::<_, EmailTemplate>(&sql).bind(key).fetch_optional(pool).await?)
}

/// Check size, addresses, duplicates and that every recipient renders.
/// Error keys look like `recipients[2].email`.
pub fn validate_recipients(
    template: &EmailTemplate,
    recipients: &[RecipientInput],
    max_batch_size: usize,
) -> Result<(), FieldErrors> {
    let mut errors = FieldErrors::new();
    if recipients.is_empty() || recipients.len() > max_batch_size {
        errors.insert(
            "recipients".to_string(),
            format!("must contain between 1 and {} recipients", max_batch_size),
        );
        return Err(errors);
    }

    let mut seen = HashSet::new();
    for (i, r) in recipients.iter().enumerate() {
        let email = r.email.trim().to_lowercase();
        if !is_valid_email(&email) {
            errors.insert(format!("recipients[{}].email", i), "invalid email address".to_string());
        } else if !seen.insert(email) {
            errors.insert(format!("recipients[{}].email", i), "duplicate recipient".to_string());
        }
        if let Err(TemplateError::MissingVariables(missing)) = template.render(&r.vars) {
            errors.insert(format!("recipients[{}].vars", i), format!("missing: {}", missing.join(", ")));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

pub async fn create_batch(
    pool: &PgPool,
    template_key: &str,
    recipients: Vec<RecipientInput>,
    max_batch_size: usize,
    created_by: Uuid,
) -> Result<BatchDetail, ApiError> {
    let template = find_template(pool, template_key)
        .await?
        .filter(|t| t.is_active)
        .ok_or_else(|| ApiError::invalid_field("template_key", "no active template with this key"))?;

    validate_recipients(&template, &recipients, max_batch_size)
        .map_err(|errors| ApiError::unprocessable("Batch validation failed", errors))?;

    let template_id = template.id;
    let batch_id = with_transaction(pool, move |tx| {
        Box::pin(async move {
            let batch_id: Uuid = sqlx::query_scalar(
                "INSERT INTO ops.email_batches (template_id, status, recipient_count, created_by) \
                 VALUES ($1, $2, $3, $4) RETURNING id",
            )
            .bind(template_id)
            .bind(EmailBatchStatus::Draft.as_str())
            .bind(recipients.len() as i32)
            .bind(created_by)
            .fetch_one(&mut **tx)
            .await
            .map_err(DatabaseError::from)?;

            for r in &recipients {
                sqlx::query(
                    "INSERT INTO ops.email_batch_recipients (batch_id, email, person_id, variables, status) \
                     VALUES ($1, $2, $3, $4, $5)",
                )
                .bind(batch_id)
                .bind(r.email.trim())
                .bind(r.person_id)
                .bind(Value::Object(r.vars.clone()))
                .bind(RecipientStatus::Pending.as_str())
                .execute(&mut **tx)
                .await
                .map_err(DatabaseError::from)?;
            }
            Ok::<_, ApiError>(batch_id)
        })
    })
    .await?;

    tracing::info!(%batch_id, template = %template_key, "Created email batch");
    get_batch(pool, batch_id).await
}

pub async fn get_batch(pool: &PgPool, batch_id: Uuid) -> Result<BatchDetail, ApiError> {
    let sql = format!("SELECT {} FROM ops.email_batches WHERE id = $1", BATCH_COLUMNS);
    let batch = sqlx::query_as::<_, EmailBatch>(&sql)
        .bind(batch_id)
        .fetch_optional(pool)
        .await
        .map_err(DatabaseError::from)?
        .ok_or_else(|| ApiError::not_found(format!("Email batch {} not found", batch_id)))?;

    let template_key: String = sqlx::query_scalar("SELECT template_key FROM ops.email_templates WHERE id = $1")
        .bind(batch.template_id)
        .fetch_one(pool)
        .await
        .map_err(DatabaseError::from)?;

    let sql = format!(
        "SELECT {} FROM ops.email_batch_recipients WHERE batch_id = $1 ORDER BY email",
        RECIPIENT_COLUMNS
    );
    let recipients = sqlx::query_as::<_, BatchRecipient>(&sql)
        .bind(batch_id)
        .fetch_all(pool)
        .await
        .map_err(DatabaseError::from)?;

    Ok(BatchDetail { batch, template_key, recipients })
}

/// Final status from delivery counts
pub fn final_status(sent: i64, failed: i64) -> EmailBatchStatus {
    if failed == 0 {
        EmailBatchStatus::Sent
    } else if sent == 0 {
        EmailBatchStatus::Failed
    } else {
        EmailBatchStatus::Partial
    }
}

/// Status a batch falls back to when delivery stops before the final update
pub fn interrupted_status(sent: i64) -> EmailBatchStatus {
    if sent > 0 {
        EmailBatchStatus::Partial
    } else {
        EmailBatchStatus::Draft
    }
}

/// Deliver every pending recipient of a draft or partial batch.
/// Resending a partial batch retries its failed recipients.
pub async fn send_batch(
    pool: &PgPool,
    transport: &dyn EmailTransport,
    from_address: &str,
    batch_id: Uuid,
) -> Result<BatchDetail, ApiError> {
    let template_id = claim_batch(pool, batch_id).await?;

    match deliver_pending(pool, transport, from_address, batch_id, template_id).await {
        Ok(status) => {
            tracing::debug!(%batch_id, %status, "Email batch settled");
            get_batch(pool, batch_id).await
        }
        Err(e) => {
            tracing::error!(%batch_id, "Email batch interrupted: {}", e);
            if let Err(release_error) = release_batch(pool, batch_id).await {
                tracing::error!(%batch_id, "Could not release interrupted batch: {}", release_error);
            }
            Err(e)
        }
    }
}

/// Lock the batch, requeue failed recipients of a partial batch, and mark it sending
async fn claim_batch(pool: &PgPool, batch_id: Uuid) -> Result<Uuid, ApiError> {
    with_transaction(pool, move |tx| {
        Box::pin(async move {
            let row: Option<(String, Uuid)> =
                sqlx::query_as("SELECT status, template_id FROM ops.email_batches WHERE id = $1 FOR UPDATE")
                    .bind(batch_id)
                    .fetch_optional(&mut **tx)
                    .await
                    .map_err(DatabaseError::from)?;
            let (status, template_id) =
                row.ok_or_else(|| ApiError::not_found(format!("Email batch {} not found", batch_id)))?;
            let status: EmailBatchStatus = status.parse()?;
            if !status.can_send() {
                return Err(ApiError::conflict(format!("Batch is {} and cannot be sent", status)));
            }
            if status == EmailBatchStatus::Partial {
                let requeued = sqlx::query(
                    "UPDATE ops.email_batch_recipients SET status = $2, error = NULL \
                     WHERE batch_id = $1 AND status = $3",
                )
                .bind(batch_id)
                .bind(RecipientStatus::Pending.as_str())
                .bind(RecipientStatus::Failed.as_str())
                .execute(&mut **tx)
                .await
                .map_err(DatabaseError::from)?;
                tracing::info!(%batch_id, requeued = requeued.rows_affected(), "Retrying failed recipients");
            }
            sqlx::query("UPDATE ops.email_batches SET status = $2 WHERE id = $1")
                .bind(batch_id)
                .bind(EmailBatchStatus::Sending.as_str())
                .execute(&mut **tx)
                .await
                .map_err(DatabaseError::from)?;
            Ok(template_id)
        })
    })
    .await
}

async fn deliver_pending(
    pool: &PgPool,
    transport: &dyn EmailTransport,
    from_address: &str,
    batch_id: Uuid,
    template_id: Uuid,
) -> Result<EmailBatchStatus, ApiError> {
    let sql = format!("SELECT {} FROM ops.email_templates WHERE id = $1", TEMPLATE_COLUMNS);
    let template = sqlx::query_as::<_, EmailTemplate>(&sql)
        .bind(template_id)
        .fetch_one(pool)
        .await
        .map_err(DatabaseError::from)?;

    let sql = format!(
        "SELECT {} FROM ops.email_batch_recipients WHERE batch_id = $1 AND status = $2 ORDER BY email",
        RECIPIENT_COLUMNS
    );
    let pending = sqlx::query_as::<_, BatchRecipient>(&sql)
        .bind(batch_id)
        .bind(RecipientStatus::Pending.as_str())
        .fetch_all(pool)
        .await
        .map_err(DatabaseError::from)?;

    tracing::info!(%batch_id, pending = pending.len(), transport = transport.name(), "Sending email batch");
    for recipient in pending {
        let outcome = deliver(transport, &template, from_address, &recipient).await;
        match outcome {
            Ok(message_id) => {
                sqlx::query(
                    "UPDATE ops.email_batch_recipients \
                     SET status = $2, provider_message_id = $3, error = NULL, sent_at = now() WHERE id = $1",
                )
                .bind(recipient.id)
                .bind(RecipientStatus::Sent.as_str())
                .bind(message_id)
                .execute(pool)
                .await
                .map_err(DatabaseError::from)?;
            }
            Err(error) => {
                tracing::warn!(%batch_id, recipient = %recipient.email, "Delivery failed: {}", error);
                sqlx::query("UPDATE ops.email_batch_recipients SET status = $2, error = $3 WHERE id = $1")
                    .bind(recipient.id)
                    .bind(RecipientStatus::Failed.as_str())
                    .bind(error)
                    .execute(pool)
                    .await
                    .map_err(DatabaseError::from)?;
            }
        }
    }

    let (sent, failed) = delivery_counts(pool, batch_id).await?;
    let status = final_status(sent, failed);
    sqlx::query(
        "UPDATE ops.email_batches SET status = $2, sent_count = $3, failed_count = $4, sent_at = now() WHERE id = $1",
    )
    .bind(batch_id)
    .bind(status.as_str())
    .bind(sent as i32)
    .bind(failed as i32)
    .execute(pool)
    .await
    .map_err(DatabaseError::from)?;

    tracing::info!(%batch_id, %status, sent, failed, "Email batch finished");
    Ok(status)
}

async fn delivery_counts(pool: &PgPool, batch_id: Uuid) -> Result<(i64, i64), DatabaseError> {
    Ok(sqlx::query_as(
        "SELECT COUNT(*) FILTER (WHERE status = 'sent'), COUNT(*) FILTER (WHERE status = 'failed') \
         FROM ops.email_batch_recipients WHERE batch_id = $1",
    )
    .bind(batch_id)
    .fetch_one(pool)
    .await?)
}

/// Move a batch stuck in `sending` back to a sendable status.
/// Returns `None` when the batch was not sending.
pub async fn release_batch(pool: &PgPool, batch_id: Uuid) -> Result<Option<EmailBatchStatus>, DatabaseError> {
    let (sent, failed) = delivery_counts(pool, batch_id).await?;
    let status = interrupted_status(sent);
    let result = sqlx::query(
        "UPDATE ops.email_batches SET status = $2, sent_count = $3, failed_count = $4 \
         WHERE id = $1 AND status = $5",
    )
    .bind(batch_id)
    .bind(status.as_str())
    .bind(sent as i32)
    .bind(failed as i32)
    .bind(EmailBatchStatus::Sending.as_str())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(None);
    }
    tracing::warn!(%batch_id, %status, sent, failed, "Released interrupted email batch");
    Ok(Some(status))
}

async fn deliver(
    transport: &dyn EmailTransport,
    template: &EmailTemplate,
    from_address: &str,
    recipient: &BatchRecipient,
) -> Result<String, String> {
    let vars = recipient.variables.as_object().cloned().unwrap_or_default();
    let rendered = template.render(&vars).map_err(|e| e.to_string())?;
    let email = OutgoingEmail {
        from: from_address.to_string(),
        to: recipient.email.clone(),
        subject: rendered.subject,
        html: rendered.html,
        text: rendered.text,
    };
    transport
        .send(&email)
        .await
        .map(|sent| sent.provider_message_id)
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn template() -> EmailTemplate {
        EmailTemplate {
            id: Uuid::new_v4(),
            template_key: "appointment_reminder".into(),
            name: "Appointment reminder".into(),
            subject: "Reminder for {{name}}".into(),
            body_html: "<p>{{ name }}, bring {{cat_count}} cats</p>".into(),
            body_text: None,
            is_active: true,
        }
    }

    fn recipient(email: &str, vars: Value) -> RecipientInput {
        RecipientInput { email: email.into(), person_id: None, vars: vars.as_object().unwrap().clone() }
    }

    #[test]
    fn rejects_empty_and_oversized_batches() {
        assert!(validate_recipients(&template(), &[], 5).unwrap_err().contains_key("recipients"));
        let many: Vec<_> = (0..3)
            .map(|i| recipient(&format!("p{}@example.org", i), json!({"name": "x", "cat_count": 1})))
            .collect();
        assert!(validate_recipients(&template(), &many, 2).is_err());
        assert!(validate_recipients(&template(), &many, 3).is_ok());
    }

    #[test]
    fn flags_bad_duplicate_and_unrenderable_recipients() {
        let recipients = vec![
            recipient("ann@example.org", json!({"name": "Ann", "cat_count": 2})),
            recipient("ANN@example.org ", json!({"name": "Ann", "cat_count": 2})),
            recipient("not-an-email", json!({"name": "Bo", "cat_count": 1})),
            recipient("cy@example.org", json!({"name": "Cy"})),
        ];
        let errors = validate_recipients(&template(), &recipients, 10).unwrap_err();
        assert_eq!(errors["recipients[1].email"], "duplicate recipient");
        assert_eq!(errors["recipients[2].email"], "invalid email address");
        assert!(errors["recipients[3].vars"].contains("cat_count"));
        assert!(!errors.contains_key("recipients[0].email"));
    }

    #[test]
    fn final_status_from_counts() {
        assert_eq!(final_status(5, 0), EmailBatchStatus::Sent);
        assert_eq!(final_status(0, 0), EmailBatchStatus::Sent);
        assert_eq!(final_status(0, 3), EmailBatchStatus::Failed);
        assert_eq!(final_status(2, 1), EmailBatchStatus::Partial);
    }

    #[test]
    fn interrupted_batches_stay_sendable() {
        assert_eq!(interrupted_status(0), EmailBatchStatus::Draft);
        assert_eq!(interrupted_status(4), EmailBatchStatus::Partial);
        assert!(interrupted_status(0).can_send());
        assert!(interrupted_status(1).can_send());
    }
}
