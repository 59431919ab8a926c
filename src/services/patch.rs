use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::database::query_builder::{bind_param_query, SqlParam};
use crate::database::{with_transaction, DatabaseError};
use crate::error::{ApiError, FieldErrors};
use crate::services::audit::{self, EditContext, FieldChange};
use crate::types::EntityType;

#[derive(Debug, Clone, Copy)]
pub enum FieldKind {
    Text,
    Int { min: i64, max: i64 },
    Float,
    Bool,
    Date,
    Uuid,
    Enum(&'static [&'static str]),
}

impl FieldKind {
    fn cast(&self) -> &'static str {
        match self {
            FieldKind::Text | FieldKind::Enum(_) => "text",
            FieldKind::Int { .. } => "integer",
            FieldKind::Float => "double precision",
            FieldKind::Bool => "boolean",
            FieldKind::Date => "date",
            FieldKind::Uuid => "uuid",
        }
    }
}

/// An editable column
#[derive(Debug)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub nullable: bool,
}

impl FieldSpec {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind, nullable: true }
    }

    pub const fn required(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind, nullable: false }
    }

    /// Validate and normalize one incoming value
    pub fn coerce(&self, value: &Value) -> Result<Value, String> {
        if value.is_null() {
            return if self.nullable { Ok(Value::Null) } else { Err("may not be null".to_string()) };
        }
        match self.kind {
            FieldKind::Text => {
                let s = value.as_str().ok_or("must be a string")?.trim();
                if s.is_empty() {
                    return if self.nullable { Ok(Value::Null) } else { Err("may not be blank".to_string()) };
                }
                Ok(Value::String(s.to_string()))
            }
            FieldKind::Int { min, max } => {
                let n = match value.as_i64() {
                    Some(n) => n,
                    None => match value.as_f64() {
                        Some(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => f as i64,
                        _ => return Err("must be an integer".to_string()),
                    },
                };
                if n < min || n > max {
                    return Err(format!("must be between {} and {}", min, max));
                }
                Ok(Value::from(n))
            }
            FieldKind::Float => match value.as_f64() {
                Some(f) if f.is_finite() => Ok(Value::from(f)),
                _ => Err("must be a number".to_string()),
            },
            FieldKind::Bool => value.as_bool().map(Value::Bool).ok_or_else(|| "must be true or false".to_string()),
            FieldKind::Date => {
                let s = value.as_str().ok_or("must be a YYYY-MM-DD date")?;
                let date = NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                    .map_err(|_| "must be a YYYY-MM-DD date".to_string())?;
                Ok(Value::String(date.format("%Y-%m-%d").to_string()))
            }
            FieldKind::Uuid => {
                let s = value.as_str().ok_or("must be a UUID")?;
                let id = Uuid::parse_str(s.trim()).map_err(|_| "must be a UUID".to_string())?;
                Ok(Value::String(id.to_string()))
            }
            FieldKind::Enum(allowed) => {
                let s = value.as_str().ok_or("must be a string")?.trim();
                if allowed.contains(&s) {
                    Ok(Value::String(s.to_string()))
                } else {
                    Err(format!("must be one of: {}", allowed.join(", ")))
                }
            }
        }
    }

    fn to_param(&self, value: &Value) -> SqlParam {
        match (self.kind, value) {
            (_, Value::Null) => SqlParam::Null,
            (FieldKind::Int { .. }, v) => v.as_i64().map(SqlParam::Int).unwrap_or(SqlParam::Null),
            (FieldKind::Float, v) => v.as_f64().map(SqlParam::Float).unwrap_or(SqlParam::Null),
            (FieldKind::Bool, v) => v.as_bool().map(SqlParam::Bool).unwrap_or(SqlParam::Null),
            (_, Value::String(s)) => SqlParam::Text(s.clone()),
            (_, other) => SqlParam::Text(other.to_string()),
        }
    }
}

/// Table whose rows are edited through the audited patch path
#[derive(Debug)]
pub struct PatchTarget {
    pub entity: EntityType,
    pub table: &'static str,
    pub fields: &'static [FieldSpec],
}

impl PatchTarget {
    pub fn field(&self, name: &str) -> Option<&'static FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Validated column assignments in body order
#[derive(Debug, Default)]
pub struct Patch {
    values: Vec<(&'static FieldSpec, Value)>,
}

impl Patch {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.iter().find(|(f, _)| f.name == name).map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Add or replace a server-computed column
    pub fn set(&mut self, field: &'static FieldSpec, value: Value) {
        match self.values.iter_mut().find(|(f, _)| f.name == field.name) {
            Some(slot) => slot.1 = value,
            None => self.values.push((field, value)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let idx = self.values.iter().position(|(f, _)| f.name == name)?;
        Some(self.values.remove(idx).1)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn field_names(&self) -> Vec<&'static str> {
        self.values.iter().map(|(f, _)| f.name).collect()
    }
}

/// Outcome of an audited update
#[derive(Debug, Serialize)]
pub struct PatchOutcome {
    pub record: Value,
    pub changes: Vec<FieldChange>,
}

/// Parse a JSON object body against the target's whitelist.
/// `extra` lists keys the caller handles itself (for example `reason`).
pub fn parse_patch(target: &PatchTarget, body: &Value, extra: &[&str]) -> Result<Patch, ApiError> {
    let obj: &Map<String, Value> = body
        .as_object()
        .ok_or_else(|| ApiError::bad_request("Request body must be a JSON object"))?;

    let unknown: Vec<&str> = obj
        .keys()
        .map(String::as_str)
        .filter(|k| target.field(k).is_none() && !extra.contains(k))
        .collect();
    if !unknown.is_empty() {
        return Err(ApiError::bad_request(format!(
            "Unknown or read-only fields: {} (editable: {})",
            unknown.join(", "),
            target.fields.iter().map(|f| f.name).collect::<Vec<_>>().join(", ")
        )));
    }

    let mut patch = Patch::default();
    let mut field_errors = FieldErrors::new();
    for (key, value) in obj {
        let Some(spec) = target.field(key) else { continue };
        match spec.coerce(value) {
            Ok(v) => patch.values.push((spec, v)),
            Err(problem) => {
                field_errors.insert(key.clone(), problem);
            }
        }
    }
    if !field_errors.is_empty() {
        return Err(ApiError::unprocessable("Validation failed", field_errors));
    }
    if patch.is_empty() {
        return Err(ApiError::bad_request("No editable fields supplied"));
    }
    Ok(patch)
}

/// Optional free-text `reason` carried next to the edited fields
pub fn reason_of(body: &Value) -> Option<String> {
    body.get("reason")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
}

/// `SELECT ... FOR UPDATE` the row as a JSON object
pub async fn lock_row(conn: &mut PgConnection, target: &PatchTarget, id: Uuid) -> Result<Value, ApiError> {
    let sql = format!("SELECT row_to_json(t) FROM {} t WHERE t.id = $1 FOR UPDATE", target.table);
    sqlx::query_scalar::<_, Value>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(DatabaseError::from)?
        .ok_or_else(|| ApiError::not_found(format!("{} {} not found", target.entity, id)))
}

/// Write the changed columns of `patch`, plus `raw_sets` when anything changed,
/// and audit each change.
pub async fn apply_patch(
    conn: &mut PgConnection,
    target: &PatchTarget,
    id: Uuid,
    before: &Value,
    patch: &Patch,
    raw_sets: &[&'static str],
    ctx: EditContext<'_>,
) -> Result<PatchOutcome, ApiError> {
    let mut after = before.clone();
    if let Some(obj) = after.as_object_mut() {
        for (spec, value) in &patch.values {
            obj.insert(spec.name.to_string(), value.clone());
        }
    }
    let changes = audit::diff_fields(before, &after, &patch.field_names());
    if changes.is_empty() {
        return Ok(PatchOutcome { record: before.clone(), changes });
    }

    let mut params = vec![SqlParam::Uuid(id)];
    let mut sets = Vec::with_capacity(changes.len() + raw_sets.len() + 1);
    for change in &changes {
        let Some((spec, value)) = patch.values.iter().find(|(f, _)| f.name == change.field) else {
            continue;
        };
        params.push(spec.to_param(value));
        sets.push(format!("{} = ${}::{}", spec.name, params.len(), spec.kind.cast()));
    }
    sets.extend(raw_sets.iter().map(|s| s.to_string()));
    sets.push("updated_at = now()".to_string());

    let sql = format!(
        "UPDATE {} AS t SET {} WHERE t.id = $1 RETURNING row_to_json(t)",
        target.table,
        sets.join(", ")
    );
    let mut q = sqlx::query(&sql);
    for p in &params {
        q = bind_param_query(q, p);
    }
    let row = q.fetch_one(&mut *conn).await.map_err(DatabaseError::from)?;
    let record: Value = sqlx::Row::try_get(&row, 0).map_err(DatabaseError::from)?;

    audit::record_edits(conn, target.entity, id, &changes, ctx).await?;
    tracing::info!(entity = %target.entity, %id, changed = changes.len(), "Patched record");
    Ok(PatchOutcome { record, changes })
}

/// Lock, diff, update and audit in one transaction
pub async fn patch_entity(
    pool: &PgPool,
    target: &'static PatchTarget,
    id: Uuid,
    patch: Patch,
    ctx: EditContext<'_>,
) -> Result<PatchOutcome, ApiError> {
    let editor = ctx.editor;
    let source = ctx.source.to_string();
    let reason = ctx.reason.map(str::to_string);
    with_transaction(pool, move |tx| {
        Box::pin(async move {
            let ctx = EditContext { editor, source: &source, reason: reason.as_deref() };
            let before = lock_row(tx, target, id).await?;
            apply_patch(tx, target, id, &before, &patch, &[], ctx).await
        })
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    static TARGET: PatchTarget = PatchTarget {
        entity: EntityType::Cat,
        table: "sot.cats",
        fields: &[
            FieldSpec::new("name", FieldKind::Text),
            FieldSpec::required("sex", FieldKind::Enum(&["male", "female", "unknown"])),
            FieldSpec::new("count", FieldKind::Int { min: 0, max: 500 }),
            FieldSpec::new("altered_on", FieldKind::Date),
            FieldSpec::new("place_id", FieldKind::Uuid),
        ],
    };

    #[test]
    fn unknown_fields_are_rejected() {
        let err = parse_patch(&TARGET, &json!({"name": "Tux", "id": "x"}), &[]).unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
        assert!(err.message().contains("id"));
    }

    #[test]
    fn type_errors_are_field_errors() {
        let err = parse_patch(&TARGET, &json!({"sex": "tabby", "count": 501, "altered_on": "May 1"}), &[])
            .unwrap_err();
        let body = err.to_json();
        assert_eq!(err.status_code(), axum::http::StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["field_errors"]["sex"].as_str().unwrap().contains("male"));
        assert!(body["field_errors"]["count"].is_string());
        assert!(body["field_errors"]["altered_on"].is_string());
    }

    #[test]
    fn empty_patch_is_bad_request() {
        let err = parse_patch(&TARGET, &json!({"reason": "typo"}), &["reason"]).unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn values_are_normalized() {
        let id = Uuid::new_v4();
        let patch = parse_patch(
            &TARGET,
            &json!({"name": "  Tux ", "count": 3.0, "place_id": id.to_string().to_uppercase()}),
            &[],
        )
        .unwrap();
        assert_eq!(patch.get("name"), Some(&json!("Tux")));
        assert_eq!(patch.get("count"), Some(&json!(3)));
        assert_eq!(patch.get("place_id"), Some(&json!(id.to_string())));
    }

    #[test]
    fn reason_is_trimmed() {
        assert_eq!(reason_of(&json!({"reason": "  typo "})), Some("typo".to_string()));
        assert_eq!(reason_of(&json!({"reason": " "})), None);
        assert_eq!(reason_of(&json!({})), None);
    }

    #[test]
    fn blank_text_clears_nullable_field() {
        let patch = parse_patch(&TARGET, &json!({"name": "   "}), &[]).unwrap();
        assert_eq!(patch.get("name"), Some(&Value::Null));
        let err = parse_patch(&TARGET, &json!({"sex": null}), &[]).unwrap_err();
        assert!(err.to_json()["field_errors"]["sex"].is_string());
    }
}
