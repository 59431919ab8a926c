use axum::Extension;

use crate::auth::AuthStaff;
use crate::middleware::{ApiResponse, ApiResult};

/// GET /api/auth/me
pub async fn me(Extension(staff): Extension<AuthStaff>) -> ApiResult<AuthStaff> {
    Ok(ApiResponse::success(staff))
}
