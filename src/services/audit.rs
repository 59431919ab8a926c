use serde::Serialize;
use serde_json::Value;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::database::models::EntityEdit;
use crate::database::DatabaseError;
use crate::types::EntityType;

/// One field whose stored value changed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub field: String,
    pub old: Value,
    pub new: Value,
}

/// Who made an edit and through which surface
#[derive(Debug, Clone, Copy)]
pub struct EditContext<'a> {
    pub editor: Option<Uuid>,
    pub source: &'a str,
    pub reason: Option<&'a str>,
}

impl<'a> EditContext<'a> {
    pub fn api(editor: Uuid) -> Self {
        Self { editor: Some(editor), source: "api", reason: None }
    }

    pub fn with_reason(mut self, reason: Option<&'a str>) -> Self {
        self.reason = reason;
        self
    }
}

/// Changed whitelisted fields between two JSON objects. Missing keys read as null.
pub fn diff_fields(before: &Value, after: &Value, fields: &[&str]) -> Vec<FieldChange> {
    fields
        .iter()
        .filter_map(|&field| {
            let old = before.get(field).cloned().unwrap_or(Value::Null);
            let new = after.get(field).cloned().unwrap_or(Value::Null);
            (!values_equal(&old, &new)).then(|| FieldChange { field: field.to_string(), old, new })
        })
        .collect()
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

pub async fn record_edits(
    conn: &mut PgConnection,
    entity_type: EntityType,
    entity_id: Uuid,
    changes: &[FieldChange],
    ctx: EditContext<'_>,
) -> Result<(), DatabaseError> {
    for change in changes {
        sqlx::query(
            "INSERT INTO ops.entity_edits \
             (entity_type, entity_id, field_name, old_value, new_value, edited_by, edit_source, reason) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(entity_type.as_str())
        .bind(entity_id)
        .bind(&change.field)
        .bind(&change.old)
        .bind(&change.new)
        .bind(ctx.editor)
        .bind(ctx.source)
        .bind(ctx.reason)
        .execute(&mut *conn)
        .await?;
    }
    if !changes.is_empty() {
        tracing::debug!(entity = %entity_type, %entity_id, changes = changes.len(), "Recorded edits");
    }
    Ok(())
}

/// Edits for one entity, newest first
pub async fn history(
    pool: &PgPool,
    entity_type: EntityType,
    entity_id: Uuid,
    limit: i64,
) -> Result<Vec<EntityEdit>, DatabaseError> {
    let rows = sqlx::query_as::<_, EntityEdit>(
        "SELECT e.id, e.entity_type, e.entity_id, e.field_name, e.old_value, e.new_value, e.edited_by, \
                s.display_name AS editor_name, e.edit_source, e.reason, e.created_at \
         FROM ops.entity_edits e LEFT JOIN ops.staff s ON s.id = e.edited_by \
         WHERE e.entity_type = $1 AND e.entity_id = $2 \
         ORDER BY e.created_at DESC, e.id \
         LIMIT $3",
    )
    .bind(entity_type.as_str())
    .bind(entity_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn only_changed_whitelisted_fields() {
        let before = json!({"name": "Tom", "notes": null, "secret": 1});
        let after = json!({"name": "Tommy", "notes": null, "secret": 2});
        let changes = diff_fields(&before, &after, &["name", "notes"]);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].field, "name");
        assert_eq!(changes[0].old, json!("Tom"));
        assert_eq!(changes[0].new, json!("Tommy"));
    }

    #[test]
    fn integer_and_float_forms_are_equal() {
        let changes = diff_fields(&json!({"total": 1}), &json!({"total": 1.0}), &["total"]);
        assert!(changes.is_empty());
    }

    #[test]
    fn missing_key_is_null() {
        let changes = diff_fields(&json!({}), &json!({"phone": "707"}), &["phone"]);
        assert_eq!(changes[0].old, Value::Null);
        assert!(diff_fields(&json!({}), &json!({"phone": null}), &["phone"]).is_empty());
    }
}
