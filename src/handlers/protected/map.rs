use axum::extract::Query;

use crate::handlers::pool;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::map::{self, MapPoint, MapQuery};

/// GET /api/map/places?bbox=w,s,e,n&layer=all|colonies|requests&limit=
pub async fn places(Query(query): Query<MapQuery>) -> ApiResult<Vec<MapPoint>> {
    let request = query.resolve()?;
    let pool = pool().await?;
    Ok(ApiResponse::success(map::map_points(&pool, &request).await?))
}
