//! Place points for the map view.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::database::DatabaseError;
use crate::error::ApiError;
use crate::services::colony::alteration_rate;

pub const DEFAULT_LIMIT: i64 = 2000;
pub const MAX_LIMIT: i64 = 5000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BBox {
    /// `west,south,east,north` in degrees
    pub fn parse(raw: &str) -> Result<Self, ApiError> {
        let invalid = |why: &str| ApiError::bad_request(format!("Invalid bbox: {}", why));
        let parts: Vec<f64> = raw
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|_| invalid("expected four numbers west,south,east,north"))?;
        let [west, south, east, north] = parts[..] else {
            return Err(invalid("expected four numbers west,south,east,north"));
        };
        if parts.iter().any(|v| !v.is_finite()) {
            return Err(invalid("values must be finite"));
        }
        if !(-180.0..=180.0).contains(&west) || !(-180.0..=180.0).contains(&east) {
            return Err(invalid("longitude must be within -180..180"));
        }
        if !(-90.0..=90.0).contains(&south) || !(-90.0..=90.0).contains(&north) {
            return Err(invalid("latitude must be within -90..90"));
        }
        if west >= east || south >= north {
            return Err(invalid("west must be less than east and south less than north"));
        }
        Ok(Self { west, south, east, north })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MapLayer {
    #[default]
    All,
    Colonies,
    Requests,
}

impl MapLayer {
    pub fn parse(raw: &str) -> Result<Self, ApiError> {
        match raw.trim() {
            "all" => Ok(MapLayer::All),
            "colonies" => Ok(MapLayer::Colonies),
            "requests" => Ok(MapLayer::Requests),
            other => Err(ApiError::bad_request(format!(
                "Invalid layer '{}' (allowed: all, colonies, requests)",
                other
            ))),
        }
    }

    fn having(&self) -> &'static str {
        match self {
            MapLayer::All => "",
            MapLayer::Colonies => " HAVING COUNT(DISTINCT c.id) > 0",
            MapLayer::Requests => " HAVING COUNT(DISTINCT r.id) > 0",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct MapQuery {
    pub bbox: Option<String>,
    pub layer: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapRequest {
    pub bbox: Option<BBox>,
    pub layer: MapLayer,
    pub limit: i64,
}

impl MapQuery {
    pub fn resolve(&self) -> Result<MapRequest, ApiError> {
        let bbox = self.bbox.as_deref().filter(|b| !b.trim().is_empty()).map(BBox::parse).transpose()?;
        let layer = self.layer.as_deref().map(MapLayer::parse).transpose()?.unwrap_or_default();
        let limit = match self.limit {
            Some(n) if n < 1 => return Err(ApiError::bad_request("limit must be at least 1")),
            Some(n) => n.min(MAX_LIMIT),
            None => DEFAULT_LIMIT,
        };
        Ok(MapRequest { bbox, layer, limit })
    }
}

#[derive(Debug, FromRow)]
struct MapRow {
    id: Uuid,
    display_name: String,
    latitude: f64,
    longitude: f64,
    cat_count: i64,
    altered_count: i64,
    active_request_count: i64,
}

#[derive(Debug, Serialize)]
pub struct MapPoint {
    pub id: Uuid,
    pub display_name: String,
    pub lat: f64,
    pub lng: f64,
    pub cat_count: i64,
    pub altered_count: i64,
    pub active_request_count: i64,
    pub alteration_rate: Option<f64>,
}

impl From<MapRow> for MapPoint {
    fn from(row: MapRow) -> Self {
        MapPoint {
            id: row.id,
            display_name: row.display_name,
            lat: row.latitude,
            lng: row.longitude,
            cat_count: row.cat_count,
            altered_count: row.altered_count,
            active_request_count: row.active_request_count,
            alteration_rate: alteration_rate(row.altered_count, row.cat_count),
        }
    }
}

pub fn map_sql(req: &MapRequest) -> String {
    let bbox = if req.bbox.is_some() {
        " AND a.longitude BETWEEN $1 AND $3 AND a.latitude BETWEEN $2 AND $4"
    } else {
        ""
    };
    format!(
        "SELECT pl.id, pl.display_name, a.latitude, a.longitude, \
                COUNT(DISTINCT c.id) AS cat_count, \
                COUNT(DISTINCT c.id) FILTER (WHERE c.altered_status = 'altered') AS altered_count, \
                COUNT(DISTINCT r.id) AS active_request_count \
         FROM sot.places pl \
         JOIN sot.addresses a ON a.id = pl.address_id \
         LEFT JOIN sot.cats c ON c.place_id = pl.id \
         LEFT JOIN ops.requests r ON r.primary_place_id = pl.id AND r.archived_at IS NULL \
              AND coalesce(r.status, 'new') NOT IN ('resolved', 'closed') \
         WHERE pl.merged_into_place_id IS NULL AND a.latitude IS NOT NULL AND a.longitude IS NOT NULL{} \
         GROUP BY pl.id, pl.display_name, a.latitude, a.longitude{} \
         ORDER BY pl.display_name \
         LIMIT {}",
        bbox,
        req.layer.having(),
        req.limit
    )
}

pub async fn map_points(pool: &PgPool, req: &MapRequest) -> Result<Vec<MapPoint>, DatabaseError> {
    let sql = map_sql(req);
    let mut q = sqlx::query_as::<_, MapRow>(&sql);
    if let Some(b) = req.bbox {
        q = q.bind(b.west).bind(b.south).bind(b.east).bind(b.north);
    }
    let rows = q.fetch_all(pool).await?;
    Ok(rows.into_iter().map(MapPoint::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_bbox() {
        let b = BBox::parse("-122.9, 38.1, -122.4, 38.6").unwrap();
        assert_eq!(b, BBox { west: -122.9, south: 38.1, east: -122.4, north: 38.6 });
    }

    #[test]
    fn rejects_bad_bboxes() {
        for raw in ["1,2,3", "a,b,c,d", "10,0,5,1", "0,10,1,5", "-200,0,1,1", "0,-91,1,1", "NaN,0,1,1", "0,0,1,1,2"] {
            let err = BBox::parse(raw).unwrap_err();
            assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST, "{}", raw);
        }
    }

    #[test]
    fn limit_defaults_and_clamps() {
        assert_eq!(MapQuery::default().resolve().unwrap().limit, DEFAULT_LIMIT);
        let q = MapQuery { limit: Some(50_000), ..Default::default() };
        assert_eq!(q.resolve().unwrap().limit, MAX_LIMIT);
        assert!(MapQuery { limit: Some(0), ..Default::default() }.resolve().is_err());
    }

    #[test]
    fn layer_controls_having() {
        let q = MapQuery { layer: Some("colonies".into()), ..Default::default() };
        let sql = map_sql(&q.resolve().unwrap());
        assert!(sql.contains("HAVING COUNT(DISTINCT c.id) > 0"));
        assert!(!sql.contains("BETWEEN"));
        assert!(MapQuery { layer: Some("heat".into()), ..Default::default() }.resolve().is_err());
    }

    #[test]
    fn bbox_adds_bound_predicates() {
        let q = MapQuery { bbox: Some("0,0,1,1".into()), ..Default::default() };
        let sql = map_sql(&q.resolve().unwrap());
        assert!(sql.contains("a.longitude BETWEEN $1 AND $3"));
    }
}
