use axum::{
    extract::{Path, Query},
    Extension,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::AuthStaff;
use crate::database::{models::MatchCandidateRow, Paged};
use crate::error::ApiError;
use crate::handlers::pool;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::matching;
use crate::types::{MatchStatus, StaffRole};

#[derive(Debug, Deserialize)]
pub struct CandidateQuery {
    /// `open` (default), `accepted`, `rejected` or `all`
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

fn status_filter(raw: Option<&str>) -> Result<Option<MatchStatus>, ApiError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(Some(MatchStatus::Open)),
        Some("all") => Ok(None),
        Some(s) => Ok(Some(s.parse()?)),
    }
}

/// GET /api/match-candidates
pub async fn list(Query(query): Query<CandidateQuery>) -> ApiResult<Paged<MatchCandidateRow>> {
    let status = status_filter(query.status.as_deref())?;
    let pool = pool().await?;
    let page = matching::list_candidates(&pool, status, query.limit, query.offset).await?;
    Ok(ApiResponse::success(page))
}

async fn resolve(staff: AuthStaff, id: Uuid, decision: MatchStatus) -> ApiResult<MatchCandidateRow> {
    staff.require_role(StaffRole::Staff)?;
    let pool = pool().await?;
    let row = matching::resolve_candidate(&pool, id, decision, staff.staff_id).await?;
    Ok(ApiResponse::success(row))
}

/// POST /api/match-candidates/:id/accept
pub async fn accept(Extension(staff): Extension<AuthStaff>, Path(id): Path<Uuid>) -> ApiResult<MatchCandidateRow> {
    resolve(staff, id, MatchStatus::Accepted).await
}

/// POST /api/match-candidates/:id/reject
pub async fn reject(Extension(staff): Extension<AuthStaff>, Path(id): Path<Uuid>) -> ApiResult<MatchCandidateRow> {
    resolve(staff, id, MatchStatus::Rejected).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_open_candidates() {
        assert_eq!(status_filter(None).unwrap(), Some(MatchStatus::Open));
        assert_eq!(status_filter(Some("all")).unwrap(), None);
        assert_eq!(status_filter(Some("rejected")).unwrap(), Some(MatchStatus::Rejected));
        assert!(status_filter(Some("maybe")).is_err());
    }
}
