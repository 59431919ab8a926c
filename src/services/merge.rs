//! Soft merges for people and places.
//!
//! The merged row stays readable and points at its survivor; references
//! elsewhere are moved to the survivor in the same transaction.

use serde::Serialize;
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::{with_transaction, DatabaseError};
use crate::error::ApiError;
use crate::services::audit::{self, EditContext, FieldChange};
use crate::types::EntityType;

pub struct MergeTarget {
    pub entity: EntityType,
    pub table: &'static str,
    pub pointer: &'static str,
    /// Statements run with `$1` = merged id and `$2` = survivor id
    pub repoint: &'static [&'static str],
}

#[derive(Debug, Serialize)]
pub struct MergeOutcome {
    pub merged_id: Uuid,
    pub into_id: Uuid,
    pub references_moved: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Source,
    Survivor,
}

/// Reject self-merges and chains before touching the database
fn check_pair(from: Uuid, into: Uuid) -> Result<(), ApiError> {
    if from == into {
        return Err(ApiError::bad_request("Cannot merge a record into itself"));
    }
    Ok(())
}

pub async fn merge(
    pool: &PgPool,
    target: &'static MergeTarget,
    from: Uuid,
    into: Uuid,
    editor: Uuid,
    reason: Option<String>,
) -> Result<MergeOutcome, ApiError> {
    check_pair(from, into)?;

    with_transaction(pool, move |tx| {
        Box::pin(async move {
            // Both rows, locked in id order
            let sql = format!(
                "SELECT id, {} FROM {} WHERE id = ANY($1) ORDER BY id FOR UPDATE",
                target.pointer, target.table
            );
            let rows: Vec<(Uuid, Option<Uuid>)> = sqlx::query_as(&sql)
                .bind(vec![from, into])
                .fetch_all(&mut **tx)
                .await
                .map_err(DatabaseError::from)?;

            for side in [Side::Source, Side::Survivor] {
                let id = if side == Side::Source { from } else { into };
                match rows.iter().find(|(row_id, _)| *row_id == id) {
                    None => return Err(ApiError::not_found(format!("{} {} not found", target.entity, id))),
                    Some((_, Some(pointer))) => {
                        return Err(ApiError::conflict(format!(
                            "{} {} is already merged into {}",
                            target.entity, id, pointer
                        )))
                    }
                    Some(_) => {}
                }
            }

            let sql = format!(
                "UPDATE {} SET {} = $2, updated_at = now() WHERE id = $1",
                target.table, target.pointer
            );
            sqlx::query(&sql)
                .bind(from)
                .bind(into)
                .execute(&mut **tx)
                .await
                .map_err(DatabaseError::from)?;

            let mut references_moved = 0;
            for statement in target.repoint {
                let done = sqlx::query(statement)
                    .bind(from)
                    .bind(into)
                    .execute(&mut **tx)
                    .await
                    .map_err(DatabaseError::from)?;
                references_moved += done.rows_affected();
            }

            let change = FieldChange {
                field: target.pointer.to_string(),
                old: Value::Null,
                new: json!(into),
            };
            let ctx = EditContext::api(editor).with_reason(reason.as_deref());
            audit::record_edits(&mut **tx, target.entity, from, &[change], ctx).await?;

            tracing::info!(entity = %target.entity, %from, %into, references_moved, "Merged record");
            Ok(MergeOutcome {
                merged_id: from,
                into_id: into,
                references_moved,
            })
        })
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_merge_is_bad_request() {
        let id = Uuid::new_v4();
        let err = check_pair(id, id).unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
        assert!(check_pair(id, Uuid::new_v4()).is_ok());
    }
}
