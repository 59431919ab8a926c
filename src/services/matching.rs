//! Person match candidates.
//!
//! Unlinked source contacts are scored against canonical people and the
//! best few are queued for staff review. Nothing is linked automatically.

use serde::Serialize;
use serde_json::{json, Value};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::database::models::MatchCandidateRow;
use crate::database::{with_transaction, DatabaseError, ListQuery, Paged, SqlParam};
use crate::error::ApiError;
use crate::services::ingest::normalize::{norm_ws, normalize_phone};
use crate::types::MatchStatus;

pub const MAX_CANDIDATES_PER_SOURCE: usize = 5;
pub const MIN_NAME_LENGTH: usize = 2;

/// Systems that feed the review queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchSource {
    AppointmentRequests,
    Intake,
}

impl MatchSource {
    pub const ALL: &'static [MatchSource] = &[MatchSource::AppointmentRequests, MatchSource::Intake];

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchSource::AppointmentRequests => "appointment_requests",
            MatchSource::Intake => "intake",
        }
    }

    /// `all` expands to every source
    pub fn parse_selection(s: &str) -> Option<Vec<MatchSource>> {
        match s.trim() {
            "all" => Some(Self::ALL.to_vec()),
            "appointment_requests" => Some(vec![MatchSource::AppointmentRequests]),
            "intake" => Some(vec![MatchSource::Intake]),
            _ => None,
        }
    }

    fn load_sql(&self) -> &'static str {
        match self {
            MatchSource::AppointmentRequests => {
                "SELECT ar.id::text AS source_record_id, \
                        coalesce(ar.requester_name, concat_ws(' ', ar.first_name, ar.last_name), '') AS display_name, \
                        ar.email, ar.phone \
                 FROM source.appointment_requests ar \
                 WHERE NOT EXISTS (SELECT 1 FROM ops.person_source_links psl \
                                   WHERE psl.source_system = 'appointment_requests' AND psl.source_pk = ar.id::text) \
                 ORDER BY ar.submitted_at DESC NULLS LAST \
                 LIMIT $1"
            }
            MatchSource::Intake => {
                "SELECT i.id::text AS source_record_id, \
                        concat_ws(' ', i.first_name, i.last_name) AS display_name, \
                        i.email, i.phone \
                 FROM ops.intake_submissions i \
                 WHERE i.status NOT IN ('converted', 'spam') \
                   AND NOT EXISTS (SELECT 1 FROM ops.person_source_links psl \
                                   WHERE psl.source_system = 'intake' AND psl.source_pk = i.id::text) \
                 ORDER BY i.submitted_at DESC \
                 LIMIT $1"
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct SourceContact {
    pub source_record_id: String,
    pub display_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct CanonicalPerson {
    pub person_id: Uuid,
    pub display_name: String,
    pub email: Option<String>,
    pub phone_normalized: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchCandidate {
    pub source_system: &'static str,
    pub source_record_id: String,
    pub candidate_person_id: Uuid,
    pub confidence: f64,
    pub evidence: Value,
}

impl MatchCandidate {
    pub fn tier(&self) -> u8 {
        tier_for(self.confidence)
    }
}

/// Character edit distance
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

fn normalize_name(name: &str) -> String {
    norm_ws(&name.to_lowercase())
}

/// 0.0..=1.0, where 1.0 is identical after normalization
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let (a, b) = (normalize_name(a), normalize_name(b));
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let max_len = a.chars().count().max(b.chars().count());
    (1.0 - levenshtein(&a, &b) as f64 / max_len as f64).max(0.0)
}

pub fn tier_for(confidence: f64) -> u8 {
    if confidence >= 0.95 {
        0
    } else if confidence >= 0.80 {
        1
    } else if confidence >= 0.50 {
        2
    } else {
        3
    }
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

pub fn calculate_match(source_system: MatchSource, source: &SourceContact, person: &CanonicalPerson) -> Option<MatchCandidate> {
    let mut matched_on: Vec<&'static str> = vec![];
    let mut confidence: f64 = 0.0;

    let source_phone = source.phone.as_deref().map(normalize_phone).unwrap_or_default();
    let person_phone = person.phone_normalized.as_deref().map(normalize_phone).unwrap_or_default();

    if source_phone.len() >= 10 && source_phone == person_phone {
        matched_on.push("phone_normalized");
        confidence = confidence.max(1.0);
    }

    let source_email = source.email.as_deref().map(|e| e.trim().to_lowercase()).unwrap_or_default();
    let person_email = person.email.as_deref().map(|e| e.trim().to_lowercase()).unwrap_or_default();
    if !source_email.is_empty() && source_email == person_email {
        matched_on.push("email");
        confidence = confidence.max(0.98);
    }

    let similarity = name_similarity(&source.display_name, &person.display_name);
    if similarity >= 0.7 {
        matched_on.push("name_fuzzy");
        if source_phone.len() >= 3 && person_phone.len() >= 3 && source_phone[..3] == person_phone[..3] {
            matched_on.push("area_code");
            confidence = confidence.max(0.85 + similarity * 0.1);
        } else {
            confidence = confidence.max(0.50 + similarity * 0.3);
        }
    }

    if matched_on.is_empty() || confidence < 0.40 {
        return None;
    }

    let evidence = json!({
        "matched_on": matched_on,
        "phone_match": matched_on.contains(&"phone_normalized"),
        "email_match": matched_on.contains(&"email"),
        "name_similarity": round3(similarity),
        "tier": tier_for(confidence),
        "source_name": source.display_name,
        "source_email": source.email,
        "source_phone": source.phone,
    });

    Some(MatchCandidate {
        source_system: source_system.as_str(),
        source_record_id: source.source_record_id.clone(),
        candidate_person_id: person.person_id,
        confidence: round3(confidence),
        evidence,
    })
}

/// Best `max` candidates for one source contact, highest confidence first
pub fn candidates_for(
    source_system: MatchSource,
    source: &SourceContact,
    people: &[CanonicalPerson],
    max: usize,
) -> Vec<MatchCandidate> {
    let mut candidates: Vec<MatchCandidate> =
        people.iter().filter_map(|p| calculate_match(source_system, source, p)).collect();
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    candidates.truncate(max);
    candidates
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct MatchStats {
    pub sources_processed: usize,
    pub sources_skipped: usize,
    pub candidates_generated: usize,
    pub candidates_inserted: usize,
    pub candidates_updated: usize,
    pub tier0_count: usize,
    pub tier1_count: usize,
    pub tier2_count: usize,
    pub dry_run: bool,
}

impl MatchStats {
    fn count(&mut self, candidate: &MatchCandidate) {
        self.candidates_generated += 1;
        match candidate.tier() {
            0 => self.tier0_count += 1,
            1 => self.tier1_count += 1,
            2 => self.tier2_count += 1,
            _ => {}
        }
    }
}

pub async fn load_people(pool: &PgPool) -> Result<Vec<CanonicalPerson>, DatabaseError> {
    Ok(sqlx::query_as(
        "SELECT p.id AS person_id, p.display_name, p.email, p.phone_normalized \
         FROM sot.people p \
         WHERE p.merged_into_person_id IS NULL AND p.display_name <> ''",
    )
    .fetch_all(pool)
    .await?)
}

pub async fn load_sources(pool: &PgPool, source: MatchSource, limit: i64) -> Result<Vec<SourceContact>, DatabaseError> {
    Ok(sqlx::query_as(source.load_sql()).bind(limit).fetch_all(pool).await?)
}

/// Score every unlinked contact from `sources` and upsert the candidates
pub async fn generate_candidates(
    pool: &PgPool,
    sources: &[MatchSource],
    limit: i64,
    dry_run: bool,
) -> Result<MatchStats, DatabaseError> {
    let people = load_people(pool).await?;
    tracing::info!("Loaded {} canonical people", people.len());

    let mut stats = MatchStats { dry_run, ..Default::default() };
    for &source in sources {
        let contacts = load_sources(pool, source, limit).await?;
        tracing::info!("Loaded {} unlinked {} records", contacts.len(), source.as_str());

        let mut batch = Vec::new();
        for contact in &contacts {
            if contact.display_name.trim().chars().count() < MIN_NAME_LENGTH {
                stats.sources_skipped += 1;
                continue;
            }
            stats.sources_processed += 1;
            let candidates = candidates_for(source, contact, &people, MAX_CANDIDATES_PER_SOURCE);
            if let Some(best) = candidates.first() {
                tracing::debug!(
                    "{}: {} candidates (best {:.2})",
                    contact.display_name,
                    candidates.len(),
                    best.confidence
                );
            }
            for c in &candidates {
                stats.count(c);
            }
            batch.extend(candidates);
        }

        if dry_run || batch.is_empty() {
            continue;
        }
        let (inserted, updated) = with_transaction(pool, move |tx| {
            Box::pin(async move {
                let (mut inserted, mut updated) = (0, 0);
                for c in &batch {
                    let was_insert: bool = sqlx::query_scalar(
                        "INSERT INTO ops.person_match_candidates \
                           (source_system, source_record_id, candidate_person_id, confidence, evidence) \
                         VALUES ($1, $2, $3, $4, $5) \
                         ON CONFLICT (source_system, source_record_id, candidate_person_id) DO UPDATE SET \
                           confidence = GREATEST(ops.person_match_candidates.confidence, EXCLUDED.confidence), \
                           evidence = EXCLUDED.evidence \
                         RETURNING (xmax = 0)",
                    )
                    .bind(c.source_system)
                    .bind(&c.source_record_id)
                    .bind(c.candidate_person_id)
                    .bind(c.confidence)
                    .bind(&c.evidence)
                    .fetch_one(&mut **tx)
                    .await?;
                    if was_insert {
                        inserted += 1;
                    } else {
                        updated += 1;
                    }
                }
                Ok::<_, DatabaseError>((inserted, updated))
            })
        })
        .await?;
        stats.candidates_inserted += inserted;
        stats.candidates_updated += updated;
    }
    Ok(stats)
}

const CANDIDATE_SELECT: &str = "SELECT mc.id, mc.source_system, mc.source_record_id, mc.candidate_person_id, \
     p.display_name AS candidate_name, mc.confidence, mc.evidence, mc.status, mc.resolved_by, mc.resolved_at, \
     mc.created_at \
     FROM ops.person_match_candidates mc \
     JOIN sot.people p ON p.id = mc.candidate_person_id";

pub async fn list_candidates(
    pool: &PgPool,
    status: Option<MatchStatus>,
    limit: Option<i64>,
    offset: Option<i64>,
) -> Result<Paged<MatchCandidateRow>, DatabaseError> {
    let mut q = ListQuery::new(CANDIDATE_SELECT);
    if let Some(status) = status {
        q.where_eq("mc.status", SqlParam::Text(status.as_str().to_string()));
    }
    q.order_by("mc.confidence DESC, mc.created_at DESC").paginate(limit, offset)?;
    q.fetch_page(pool).await
}

/// Accept or reject an open candidate. Accepting links the source record to the person.
pub async fn resolve_candidate(
    pool: &PgPool,
    id: Uuid,
    decision: MatchStatus,
    staff_id: Uuid,
) -> Result<MatchCandidateRow, ApiError> {
    if decision == MatchStatus::Open {
        return Err(ApiError::bad_request("A candidate can only be accepted or rejected"));
    }
    with_transaction(pool, move |tx| {
        Box::pin(async move {
            let current: Option<(String, String, String, Uuid)> = sqlx::query_as(
                "SELECT status, source_system, source_record_id, candidate_person_id \
                 FROM ops.person_match_candidates WHERE id = $1 FOR UPDATE",
            )
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(DatabaseError::from)?;
            let Some((status, source_system, source_record_id, person_id)) = current else {
                return Err(ApiError::not_found("Match candidate not found"));
            };
            if status != MatchStatus::Open.as_str() {
                return Err(ApiError::conflict(format!("Match candidate is already {}", status)));
            }

            sqlx::query(
                "UPDATE ops.person_match_candidates SET status = $2, resolved_by = $3, resolved_at = now() \
                 WHERE id = $1",
            )
            .bind(id)
            .bind(decision.as_str())
            .bind(staff_id)
            .execute(&mut **tx)
            .await
            .map_err(DatabaseError::from)?;

            if decision == MatchStatus::Accepted {
                sqlx::query(
                    "INSERT INTO ops.person_source_links (person_id, source_system, source_pk) \
                     VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
                )
                .bind(person_id)
                .bind(&source_system)
                .bind(&source_record_id)
                .execute(&mut **tx)
                .await
                .map_err(DatabaseError::from)?;
            }

            let sql = format!("{} WHERE mc.id = $1", CANDIDATE_SELECT);
            let row: MatchCandidateRow = sqlx::query_as(&sql)
                .bind(id)
                .fetch_one(&mut **tx)
                .await
                .map_err(DatabaseError::from)?;
            Ok(row)
        })
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(name: &str, email: Option<&str>, phone: Option<&str>) -> SourceContact {
        SourceContact {
            source_record_id: "src-1".into(),
            display_name: name.into(),
            email: email.map(String::from),
            phone: phone.map(String::from),
        }
    }

    fn person(name: &str, email: Option<&str>, phone: Option<&str>) -> CanonicalPerson {
        CanonicalPerson {
            person_id: Uuid::new_v4(),
            display_name: name.into(),
            email: email.map(String::from),
            phone_normalized: phone.map(String::from),
        }
    }

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", ""), 3);
        assert_eq!(levenshtein("café", "cafe"), 1);
    }

    #[test]
    fn similarity_normalizes_case_and_spacing() {
        assert_eq!(name_similarity("Ann  LEE", "ann lee"), 1.0);
        assert_eq!(name_similarity("", "ann"), 0.0);
        assert!((name_similarity("Jon Smith", "John Smith") - 0.9).abs() < 1e-9);
    }

    #[test]
    fn phone_match_is_tier_zero() {
        let m = calculate_match(
            MatchSource::Intake,
            &contact("Someone Else", None, Some("1 (707) 555-1212")),
            &person("Ann Lee", None, Some("7075551212")),
        )
        .unwrap();
        assert_eq!(m.confidence, 1.0);
        assert_eq!(m.tier(), 0);
        assert_eq!(m.evidence["phone_match"], true);
        assert_eq!(m.evidence["matched_on"], json!(["phone_normalized"]));
    }

    #[test]
    fn email_match_is_case_insensitive() {
        let m = calculate_match(
            MatchSource::AppointmentRequests,
            &contact("Zed", Some(" ANN@x.org"), None),
            &person("Ann Lee", Some("ann@x.org"), None),
        )
        .unwrap();
        assert_eq!(m.confidence, 0.98);
        assert_eq!(m.source_system, "appointment_requests");
    }

    #[test]
    fn fuzzy_name_with_area_code() {
        let m = calculate_match(
            MatchSource::Intake,
            &contact("Jon Smith", None, Some("7071112222")),
            &person("John Smith", None, Some("7079998888")),
        )
        .unwrap();
        assert_eq!(m.confidence, 0.94);
        assert_eq!(m.tier(), 1);
        assert_eq!(m.evidence["matched_on"], json!(["name_fuzzy", "area_code"]));
    }

    #[test]
    fn fuzzy_name_alone() {
        let m = calculate_match(MatchSource::Intake, &contact("Jon Smith", None, None), &person("John Smith", None, None))
            .unwrap();
        assert_eq!(m.confidence, 0.77);
        assert_eq!(m.tier(), 2);
        assert_eq!(m.evidence["name_similarity"], 0.9);
    }

    #[test]
    fn unrelated_people_do_not_match() {
        assert!(calculate_match(MatchSource::Intake, &contact("Ann Lee", None, None), &person("Bob Stone", None, None))
            .is_none());
    }

    #[test]
    fn candidates_sorted_and_capped() {
        let people = vec![
            person("Jon Smyth", None, None),
            person("John Smith", Some("j@x.org"), None),
            person("Jon Smith", None, None),
            person("Bob Stone", None, None),
        ];
        let found = candidates_for(MatchSource::Intake, &contact("Jon Smith", Some("j@x.org"), None), &people, 2);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].confidence, 0.98);
        assert_eq!(found[1].confidence, 0.8);
    }

    #[test]
    fn source_selection() {
        assert_eq!(MatchSource::parse_selection("all").unwrap().len(), 2);
        assert_eq!(MatchSource::parse_selection("intake"), Some(vec![MatchSource::Intake]));
        assert!(MatchSource::parse_selection("clinichq").is_none());
    }

    #[test]
    fn tiers() {
        assert_eq!(tier_for(0.95), 0);
        assert_eq!(tier_for(0.8), 1);
        assert_eq!(tier_for(0.5), 2);
        assert_eq!(tier_for(0.45), 3);
    }
}
