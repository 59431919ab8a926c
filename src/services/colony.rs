use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::database::models::ColonyObservation;
use crate::database::DatabaseError;
use crate::error::FieldErrors;
use crate::types::ObservationSource;

const Z_95: f64 = 1.96;
const RELIABLE_RECAPTURES: i64 = 7;

/// Chapman mark-resight estimate with a 95% interval
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChapmanEstimate {
    pub estimate: f64,
    pub variance: f64,
    pub ci_low: f64,
    pub ci_high: f64,
    pub reliable: bool,
}

/// `marked` known ear-tipped cats, `captured` cats seen, `recaptured` ear-tipped among them
pub fn chapman(marked: i64, captured: i64, recaptured: i64) -> Option<ChapmanEstimate> {
    if marked < 0 || captured < 0 || recaptured < 0 || recaptured > captured || recaptured > marked {
        return None;
    }
    let (m, c, r) = (marked as f64, captured as f64, recaptured as f64);
    let estimate = (m + 1.0) * (c + 1.0) / (r + 1.0) - 1.0;
    let variance = (m + 1.0) * (c + 1.0) * (m - r) * (c - r) / ((r + 1.0).powi(2) * (r + 2.0));
    let margin = Z_95 * variance.sqrt();

    let known_distinct = m + (c - r);
    let ci_low = (estimate - margin).max(known_distinct);
    let ci_high = (estimate + margin).max(ci_low);

    Some(ChapmanEstimate {
        estimate,
        variance,
        ci_low,
        ci_high,
        reliable: recaptured >= RELIABLE_RECAPTURES,
    })
}

pub fn recency_factor(age_days: i64) -> f64 {
    match age_days {
        d if d <= 30 => 1.0,
        d if d <= 90 => 0.9,
        d if d <= 180 => 0.75,
        d if d <= 365 => 0.5,
        _ => 0.25,
    }
}

/// Minimal view of an observation used by the estimators
#[derive(Debug, Clone)]
pub struct Observation {
    pub source: ObservationSource,
    pub observed_on: NaiveDate,
    pub total_cats: Option<i32>,
    pub eartipped_seen: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightedEstimate {
    pub estimate: i64,
    pub mean_confidence: f64,
    pub observations_used: usize,
}

/// Source confidence times recency, over observations that carry a total
pub fn weighted_average(observations: &[Observation], today: NaiveDate) -> Option<WeightedEstimate> {
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    let mut confidence_sum = 0.0;
    let mut used = 0usize;

    for obs in observations {
        let Some(total) = obs.total_cats else { continue };
        let age = (today - obs.observed_on).num_days().max(0);
        let weight = obs.source.confidence() * recency_factor(age);
        weighted_sum += f64::from(total) * weight;
        weight_total += weight;
        confidence_sum += obs.source.confidence();
        used += 1;
    }

    if used == 0 || weight_total <= 0.0 {
        return None;
    }
    Some(WeightedEstimate {
        estimate: (weighted_sum / weight_total).round() as i64,
        mean_confidence: confidence_sum / used as f64,
        observations_used: used,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateMethod {
    Chapman,
    WeightedAverage,
    VerifiedOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColonyStatus {
    Managed,
    NearlyManaged,
    InProgress,
    Started,
    NeedsWork,
    Unknown,
}

pub fn alteration_rate(altered: i64, estimate: i64) -> Option<f64> {
    if estimate <= 0 {
        return None;
    }
    Some((altered as f64 / estimate as f64).clamp(0.0, 1.0))
}

pub fn status_label(rate: Option<f64>) -> ColonyStatus {
    match rate {
        None => ColonyStatus::Unknown,
        Some(r) if r >= 0.90 => ColonyStatus::Managed,
        Some(r) if r >= 0.70 => ColonyStatus::NearlyManaged,
        Some(r) if r >= 0.40 => ColonyStatus::InProgress,
        Some(r) if r > 0.0 => ColonyStatus::Started,
        Some(_) => ColonyStatus::NeedsWork,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColonyEstimate {
    pub method: EstimateMethod,
    pub estimate: i64,
    pub ci_low: Option<i64>,
    pub ci_high: Option<i64>,
    pub reliable: Option<bool>,
    pub confidence: Option<f64>,
    pub verified_cats: i64,
    pub altered_count: i64,
    pub alteration_rate: Option<f64>,
    pub work_remaining: i64,
    pub status: ColonyStatus,
}

/// Pick the best estimate for a place.
///
/// `observations` may be in any order. The result never drops below the
/// verified cat count.
pub fn select_estimate(
    observations: &[Observation],
    verified_cats: i64,
    verified_altered: i64,
    today: NaiveDate,
) -> ColonyEstimate {
    let newest_resight = observations
        .iter()
        .filter(|o| o.total_cats.is_some() && o.eartipped_seen.is_some())
        .max_by_key(|o| o.observed_on);

    let chapman_result = newest_resight.and_then(|o| {
        let captured = i64::from(o.total_cats?);
        let recaptured = i64::from(o.eartipped_seen?);
        if recaptured == 0 {
            return None;
        }
        chapman(verified_altered, captured, recaptured)
    });

    let (method, raw, ci_low, ci_high, reliable, confidence) = if let Some(c) = chapman_result {
        (
            EstimateMethod::Chapman,
            c.estimate.round() as i64,
            Some(c.ci_low.round() as i64),
            Some(c.ci_high.round() as i64),
            Some(c.reliable),
            None,
        )
    } else if let Some(w) = weighted_average(observations, today) {
        (EstimateMethod::WeightedAverage, w.estimate, None, None, None, Some(w.mean_confidence))
    } else {
        (EstimateMethod::VerifiedOnly, verified_cats, None, None, None, Some(1.0))
    };

    let estimate = raw.max(verified_cats);
    let rate = alteration_rate(verified_altered, estimate);
    ColonyEstimate {
        method,
        estimate,
        ci_low,
        ci_high,
        reliable,
        confidence,
        verified_cats,
        altered_count: verified_altered,
        alteration_rate: rate,
        work_remaining: (estimate - verified_altered).max(0),
        status: status_label(rate),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewObservation {
    pub source_type: ObservationSource,
    pub observed_on: Option<NaiveDate>,
    pub total_cats: Option<i32>,
    pub altered_count: Option<i32>,
    pub eartipped_seen: Option<i32>,
    pub notes: Option<String>,
}

impl NewObservation {
    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        for (field, value) in [
            ("total_cats", self.total_cats),
            ("altered_count", self.altered_count),
            ("eartipped_seen", self.eartipped_seen),
        ] {
            if matches!(value, Some(v) if v < 0) {
                errors.insert(field.to_string(), "must be 0 or greater".to_string());
            }
        }
        if let Some(total) = self.total_cats {
            if matches!(self.altered_count, Some(a) if a > total) {
                errors.insert("altered_count".to_string(), "cannot exceed total_cats".to_string());
            }
            if matches!(self.eartipped_seen, Some(e) if e > total) {
                errors.insert("eartipped_seen".to_string(), "cannot exceed total_cats".to_string());
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

pub async fn insert_observation(
    conn: &mut PgConnection,
    place_id: Uuid,
    obs: &NewObservation,
    recorded_by: Option<Uuid>,
) -> Result<ColonyObservation, DatabaseError> {
    let row = sqlx::query_as::<_, ColonyObservation>(
        "INSERT INTO ops.colony_observations \
         (place_id, source_type, observed_on, total_cats, altered_count, eartipped_seen, notes, recorded_by) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         RETURNING id, place_id, source_type, observed_on, total_cats, altered_count, eartipped_seen, \
                   notes, recorded_by, created_at",
    )
    .bind(place_id)
    .bind(obs.source_type.as_str())
    .bind(obs.observed_on.unwrap_or_else(|| Utc::now().date_naive()))
    .bind(obs.total_cats)
    .bind(obs.altered_count)
    .bind(obs.eartipped_seen)
    .bind(obs.notes.as_deref())
    .bind(recorded_by)
    .fetch_one(&mut *conn)
    .await?;
    Ok(row)
}

#[derive(Debug, Serialize)]
pub struct PlaceColony {
    pub place_id: Uuid,
    pub estimate: ColonyEstimate,
    pub observations: Vec<ColonyObservation>,
}

#[derive(sqlx::FromRow)]
struct VerifiedCounts {
    total: i64,
    altered: i64,
}

/// Observations plus the selected estimate for one place
pub async fn load_place_colony(pool: &PgPool, place_id: Uuid) -> Result<PlaceColony, DatabaseError> {
    let counts = sqlx::query_as::<_, VerifiedCounts>(
        "SELECT COUNT(*) AS total, COUNT(*) FILTER (WHERE altered_status = 'altered') AS altered \
         FROM sot.cats WHERE place_id = $1",
    )
    .bind(place_id)
    .fetch_one(pool)
    .await?;

    let observations = sqlx::query_as::<_, ColonyObservation>(
        "SELECT id, place_id, source_type, observed_on, total_cats, altered_count, eartipped_seen, \
                notes, recorded_by, created_at \
         FROM ops.colony_observations WHERE place_id = $1 \
         ORDER BY observed_on DESC, created_at DESC",
    )
    .bind(place_id)
    .fetch_all(pool)
    .await?;

    let usable: Vec<Observation> = observations
        .iter()
        .filter_map(|o| match o.source_type.parse::<ObservationSource>() {
            Ok(source) => Some(Observation {
                source,
                observed_on: o.observed_on,
                total_cats: o.total_cats,
                eartipped_seen: o.eartipped_seen,
            }),
            Err(e) => {
                tracing::warn!(observation_id = %o.id, "Skipping observation: {}", e);
                None
            }
        })
        .collect();

    let estimate = select_estimate(&usable, counts.total, counts.altered, Utc::now().date_naive());
    Ok(PlaceColony { place_id, estimate, observations })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn obs(source: ObservationSource, on: &str, total: Option<i32>, tipped: Option<i32>) -> Observation {
        Observation { source, observed_on: day(on), total_cats: total, eartipped_seen: tipped }
    }

    #[test]
    fn chapman_point_estimate() {
        // (10+1)(12+1)/(6+1) - 1 = 19.43
        let c = chapman(10, 12, 6).unwrap();
        assert!((c.estimate - 19.428_571).abs() < 1e-4);
        assert!(!c.reliable);
        assert!(c.ci_low >= 16.0);
        assert!(c.ci_high >= c.ci_low);
    }

    #[test]
    fn chapman_rejects_impossible_counts() {
        assert!(chapman(3, 5, 6).is_none());
        assert!(chapman(2, 10, 3).is_none());
        assert!(chapman(-1, 4, 0).is_none());
    }

    #[test]
    fn chapman_reliable_at_seven_recaptures() {
        assert!(chapman(20, 15, 7).unwrap().reliable);
    }

    #[test]
    fn lower_bound_is_known_distinct_cats() {
        // Full resight: every cat seen is tipped and every tipped cat seen
        let c = chapman(8, 8, 8).unwrap();
        assert_eq!(c.variance, 0.0);
        assert_eq!(c.ci_low, 8.0);
        assert_eq!(c.ci_high, 8.0);
    }

    #[test]
    fn recency_steps() {
        assert_eq!(recency_factor(0), 1.0);
        assert_eq!(recency_factor(30), 1.0);
        assert_eq!(recency_factor(31), 0.9);
        assert_eq!(recency_factor(180), 0.75);
        assert_eq!(recency_factor(365), 0.5);
        assert_eq!(recency_factor(366), 0.25);
    }

    #[test]
    fn weighted_average_favors_confident_recent_sources() {
        let today = day("2024-06-30");
        let observations = [
            obs(ObservationSource::VerifiedCats, "2024-06-20", Some(10), None),
            obs(ObservationSource::AiParsed, "2022-01-01", Some(40), None),
            obs(ObservationSource::IntakeForm, "2024-06-01", None, None),
        ];
        let w = weighted_average(&observations, today).unwrap();
        // (10*1.0 + 40*0.1) / 1.1 = 12.7
        assert_eq!(w.estimate, 13);
        assert_eq!(w.observations_used, 2);
        assert!((w.mean_confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn weighted_average_needs_a_total() {
        let only_blank = [obs(ObservationSource::ManualObservation, "2024-01-01", None, Some(3))];
        assert!(weighted_average(&only_blank, day("2024-02-01")).is_none());
    }

    #[test]
    fn selection_prefers_chapman_then_average_then_verified() {
        let today = day("2024-06-30");
        let with_resight = [
            obs(ObservationSource::TrapperSiteVisit, "2024-06-01", Some(12), Some(6)),
            obs(ObservationSource::IntakeForm, "2024-05-01", Some(50), None),
        ];
        let e = select_estimate(&with_resight, 10, 10, today);
        assert_eq!(e.method, EstimateMethod::Chapman);
        assert_eq!(e.estimate, 19);

        let no_tips = [obs(ObservationSource::ManualObservation, "2024-06-01", Some(12), Some(0))];
        let e = select_estimate(&no_tips, 4, 2, today);
        assert_eq!(e.method, EstimateMethod::WeightedAverage);
        assert_eq!(e.estimate, 12);

        let e = select_estimate(&[], 4, 2, today);
        assert_eq!(e.method, EstimateMethod::VerifiedOnly);
        assert_eq!(e.estimate, 4);
        assert_eq!(e.work_remaining, 2);
    }

    #[test]
    fn estimate_never_below_verified_cats() {
        let today = day("2024-06-30");
        let low = [obs(ObservationSource::IntakeForm, "2024-06-01", Some(2), None)];
        let e = select_estimate(&low, 9, 9, today);
        assert_eq!(e.estimate, 9);
        assert_eq!(e.alteration_rate, Some(1.0));
        assert_eq!(e.status, ColonyStatus::Managed);
    }

    #[test]
    fn status_thresholds() {
        assert_eq!(status_label(Some(0.9)), ColonyStatus::Managed);
        assert_eq!(status_label(Some(0.7)), ColonyStatus::NearlyManaged);
        assert_eq!(status_label(Some(0.4)), ColonyStatus::InProgress);
        assert_eq!(status_label(Some(0.01)), ColonyStatus::Started);
        assert_eq!(status_label(Some(0.0)), ColonyStatus::NeedsWork);
        assert_eq!(status_label(None), ColonyStatus::Unknown);
        assert_eq!(alteration_rate(3, 0), None);
        assert_eq!(alteration_rate(30, 10), Some(1.0));
    }

    #[test]
    fn observation_validation() {
        let bad = NewObservation {
            source_type: ObservationSource::ManualObservation,
            observed_on: None,
            total_cats: Some(5),
            altered_count: Some(6),
            eartipped_seen: Some(-1),
            notes: None,
        };
        let errors = bad.validate().unwrap_err();
        assert!(errors.contains_key("altered_count"));
        assert!(errors.contains_key("eartipped_seen"));
    }
}
