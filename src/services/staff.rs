use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::{self, hash_password};
use crate::database::models::staff::STAFF_COLUMNS;
use crate::database::models::Staff;
use crate::database::{with_transaction, DatabaseError};
use crate::error::{ApiError, FieldErrors};
use crate::services::audit::EditContext;
use crate::services::email::is_valid_email;
use crate::services::patch::{self, FieldKind, FieldSpec, Patch, PatchOutcome, PatchTarget};
use crate::types::{EntityType, StaffRole};

static STAFF_SELECT: Lazy<String> = Lazy::new(|| format!("SELECT {} FROM ops.staff s", STAFF_COLUMNS));

pub static STAFF_PATCH: PatchTarget = PatchTarget {
    entity: EntityType::Staff,
    table: "ops.staff",
    fields: &[
        FieldSpec::required("display_name", FieldKind::Text),
        FieldSpec::required("role", FieldKind::Enum(StaffRole::ALL)),
        FieldSpec::required("is_active", FieldKind::Bool),
    ],
};

#[derive(Debug, Clone, Deserialize)]
pub struct NewStaff {
    pub email: String,
    pub display_name: String,
    pub role: StaffRole,
    pub password: String,
}

impl NewStaff {
    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        if !is_valid_email(&self.email) {
            errors.insert("email".into(), "must be a valid email address".into());
        }
        if self.display_name.trim().is_empty() {
            errors.insert("display_name".into(), "is required".into());
        }
        if let Err(e) = auth::validate_password(&self.password) {
            errors.insert("password".into(), e.to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

pub async fn list_staff(pool: &PgPool) -> Result<Vec<Staff>, DatabaseError> {
    let sql = format!("{} ORDER BY s.is_active DESC, s.display_name", STAFF_SELECT.as_str());
    Ok(sqlx::query_as(&sql).fetch_all(pool).await?)
}

/// New account. A taken email is a 409.
pub async fn create_staff(pool: &PgPool, input: &NewStaff) -> Result<Staff, ApiError> {
    input
        .validate()
        .map_err(|errors| ApiError::unprocessable("Invalid staff member", errors))?;
    let hash = hash_password(&input.password).await?;

    let sql = format!(
        "INSERT INTO ops.staff AS s (email, display_name, role, password_hash) VALUES ($1, $2, $3, $4) \
         RETURNING {}",
        STAFF_COLUMNS
    );
    let staff: Staff = sqlx::query_as(&sql)
        .bind(input.email.trim().to_lowercase())
        .bind(input.display_name.trim())
        .bind(input.role.as_str())
        .bind(&hash)
        .fetch_one(pool)
        .await
        .map_err(|e| match DatabaseError::from(e) {
            DatabaseError::UniqueViolation { .. } => ApiError::conflict("A staff member with that email already exists"),
            other => other.into(),
        })?;
    tracing::info!(staff_id = %staff.id, role = %input.role, "Created staff member");
    Ok(staff)
}

/// Admins may not lock themselves out
pub fn check_self_edit(target: Uuid, editor: Uuid, patch: &Patch) -> Result<(), ApiError> {
    if target != editor {
        return Ok(());
    }
    if patch.get("is_active") == Some(&Value::Bool(false)) {
        return Err(ApiError::invalid_field("is_active", "you cannot deactivate your own account"));
    }
    if matches!(patch.get("role").and_then(Value::as_str), Some(role) if role != StaffRole::Admin.as_str()) {
        return Err(ApiError::invalid_field("role", "you cannot remove your own admin role"));
    }
    Ok(())
}

/// Audited staff edit. Deactivation revokes every open session.
pub async fn patch_staff(pool: &PgPool, id: Uuid, body: &Value, editor: Uuid) -> Result<PatchOutcome, ApiError> {
    let patch = patch::parse_patch(&STAFF_PATCH, body, &["reason"])?;
    check_self_edit(id, editor, &patch)?;
    let reason = patch::reason_of(body);

    with_transaction(pool, move |tx| {
        Box::pin(async move {
            let ctx = EditContext::api(editor).with_reason(reason.as_deref());
            let before = patch::lock_row(tx, &STAFF_PATCH, id).await?;
            let outcome = patch::apply_patch(tx, &STAFF_PATCH, id, &before, &patch, &[], ctx).await?;
            let deactivated = outcome
                .changes
                .iter()
                .any(|c| c.field == "is_active" && c.new == Value::Bool(false));
            if deactivated {
                let revoked = auth::revoke_all_for_staff(&mut **tx, id).await?;
                tracing::info!(staff_id = %id, revoked, "Deactivated staff member");
            }
            Ok(outcome)
        })
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_staff() -> NewStaff {
        NewStaff {
            email: "lead@example.org".into(),
            display_name: "Lead".into(),
            role: StaffRole::Staff,
            password: "correct horse".into(),
        }
    }

    #[test]
    fn validates_new_staff() {
        assert!(new_staff().validate().is_ok());
        let errors = NewStaff { email: "x".into(), display_name: " ".into(), password: "short".into(), ..new_staff() }
            .validate()
            .unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn admin_cannot_lock_self_out() {
        let me = Uuid::new_v4();
        let deactivate = patch::parse_patch(&STAFF_PATCH, &json!({"is_active": false}), &[]).unwrap();
        assert!(check_self_edit(me, me, &deactivate).is_err());
        assert!(check_self_edit(Uuid::new_v4(), me, &deactivate).is_ok());

        let demote = patch::parse_patch(&STAFF_PATCH, &json!({"role": "volunteer"}), &[]).unwrap();
        assert!(check_self_edit(me, me, &demote).is_err());
        let rename = patch::parse_patch(&STAFF_PATCH, &json!({"display_name": "Me"}), &[]).unwrap();
        assert!(check_self_edit(me, me, &rename).is_ok());
    }
}
