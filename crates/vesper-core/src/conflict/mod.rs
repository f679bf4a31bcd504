//! Conflict detection
//!
//! Three passes, most specific first:
//!
//! 1. Direct contradiction - same `(entity, property)`, different values,
//!    both currently open, identical `valid_from` (severity medium)
//! 2. Temporal overlap - same `(entity, property)`, different values,
//!    overlapping validity windows, excluding pairs already covered by
//!    pass 1 (severity high)
//! 3. Preference shift - two preference entities with the same description
//!    but different names, created more than 7 days apart (severity low)
//!
//! Conflicts are flagged, never auto-resolved. Each detected pair is filed
//! once (normalized id order), and the confidence downgrade to 0.5 happens in
//! the same transaction as the conflict insert so readers never see a torn
//! state.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row, Transaction};
use uuid::Uuid;

use crate::error::Result;
use crate::model::{Conflict, ConflictKind, ConflictSeverity, ResolutionStatus};
use crate::storage::Database;

/// Downgraded confidence for conflicting facts
const CONFLICT_CONFIDENCE: f64 = 0.5;

/// Minimum age gap for a preference shift, in days
const PREFERENCE_SHIFT_DAYS: i64 = 7;

/// The conflict detector (C4)
pub struct ConflictDetector {
    db: Arc<Database>,
}

/// A candidate pair produced by one of the detection passes
struct Candidate {
    id_1: String,
    id_2: String,
    entity_id: String,
    property: Option<String>,
    kind: ConflictKind,
    description: String,
    severity: ConflictSeverity,
}

impl ConflictDetector {
    /// Create a detector over a shared database
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Run all three passes in order. Returns the number of newly filed
    /// conflicts.
    pub fn detect_all(&self, namespace: &str) -> Result<u64> {
        let mut filed = 0;
        filed += self.detect_contradictions(namespace)?;
        filed += self.detect_temporal_overlaps(namespace)?;
        filed += self.detect_preference_shifts(namespace)?;
        if filed > 0 {
            tracing::info!(namespace, filed, "Conflict detection filed new conflicts");
        }
        Ok(filed)
    }

    /// Pass 1: direct contradictions
    pub fn detect_contradictions(&self, namespace: &str) -> Result<u64> {
        let candidates = self.db.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT f1.id, f2.id, f1.entity_id, f1.property, f1.value, f2.value
                 FROM facts f1
                 JOIN facts f2
                   ON f1.entity_id = f2.entity_id
                  AND f1.property = f2.property
                  AND f1.id < f2.id
                 WHERE f1.namespace = ?1
                   AND f1.value <> f2.value
                   AND f1.valid_until IS NULL AND f2.valid_until IS NULL
                   AND f1.valid_from = f2.valid_from
                   AND f1.is_archived = 0 AND f2.is_archived = 0",
            )?;
            let rows = stmt
                .query_map(params![namespace], |row| {
                    let id_1: String = row.get(0)?;
                    let id_2: String = row.get(1)?;
                    let entity_id: String = row.get(2)?;
                    let property: String = row.get(3)?;
                    let v1: String = row.get(4)?;
                    let v2: String = row.get(5)?;
                    Ok((id_1, id_2, entity_id, property, v1, v2))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        let candidates: Vec<Candidate> = candidates
            .into_iter()
            .map(|(id_1, id_2, entity_id, property, v1, v2)| Candidate {
                id_1,
                id_2,
                entity_id,
                description: format!("'{property}' is both '{v1}' and '{v2}'"),
                property: Some(property),
                kind: ConflictKind::Contradiction,
                severity: ConflictSeverity::Medium,
            })
            .collect();

        self.file(namespace, candidates, true)
    }

    /// Pass 2: temporal overlaps not already covered by pass 1
    pub fn detect_temporal_overlaps(&self, namespace: &str) -> Result<u64> {
        let candidates = self.db.with_reader(|conn| {
            // RFC 3339 UTC strings compare correctly as text; an open window
            // overlaps everything after its start.
            let mut stmt = conn.prepare(
                "SELECT f1.id, f2.id, f1.entity_id, f1.property, f1.value, f2.value
                 FROM facts f1
                 JOIN facts f2
                   ON f1.entity_id = f2.entity_id
                  AND f1.property = f2.property
                  AND f1.id < f2.id
                 WHERE f1.namespace = ?1
                   AND f1.value <> f2.value
                   AND (f2.valid_until IS NULL OR f1.valid_from < f2.valid_until)
                   AND (f1.valid_until IS NULL OR f2.valid_from < f1.valid_until)
                   AND NOT (f1.valid_until IS NULL AND f2.valid_until IS NULL
                            AND f1.valid_from = f2.valid_from)
                   AND f1.is_archived = 0 AND f2.is_archived = 0",
            )?;
            let rows = stmt
                .query_map(params![namespace], |row| {
                    let id_1: String = row.get(0)?;
                    let id_2: String = row.get(1)?;
                    let entity_id: String = row.get(2)?;
                    let property: String = row.get(3)?;
                    let v1: String = row.get(4)?;
                    let v2: String = row.get(5)?;
                    Ok((id_1, id_2, entity_id, property, v1, v2))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        let candidates: Vec<Candidate> = candidates
            .into_iter()
            .map(|(id_1, id_2, entity_id, property, v1, v2)| Candidate {
                id_1,
                id_2,
                entity_id,
                description: format!(
                    "'{property}' was '{v1}' and '{v2}' over overlapping periods"
                ),
                property: Some(property),
                kind: ConflictKind::TemporalOverlap,
                severity: ConflictSeverity::High,
            })
            .collect();

        self.file(namespace, candidates, true)
    }

    /// Pass 3: preference shifts between entities
    pub fn detect_preference_shifts(&self, namespace: &str) -> Result<u64> {
        let candidates = self.db.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT e1.id, e2.id, e1.name, e2.name, e1.description
                 FROM entities e1
                 JOIN entities e2
                   ON e1.description = e2.description
                  AND e1.name <> e2.name
                  AND e1.id < e2.id
                 WHERE e1.namespace = ?1
                   AND e1.entity_type = 'preference' AND e2.entity_type = 'preference'
                   AND e1.description IS NOT NULL
                   AND ABS(julianday(e1.created_at) - julianday(e2.created_at)) > ?2
                   AND e1.is_archived = 0 AND e2.is_archived = 0",
            )?;
            let rows = stmt
                .query_map(params![namespace, PREFERENCE_SHIFT_DAYS], |row| {
                    let id_1: String = row.get(0)?;
                    let id_2: String = row.get(1)?;
                    let n1: String = row.get(2)?;
                    let n2: String = row.get(3)?;
                    let description: String = row.get(4)?;
                    Ok((id_1, id_2, n1, n2, description))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        let candidates: Vec<Candidate> = candidates
            .into_iter()
            .map(|(id_1, id_2, n1, n2, description)| Candidate {
                entity_id: id_2.clone(),
                description: format!(
                    "Preference '{description}' shifted from '{n1}' to '{n2}'"
                ),
                id_1,
                id_2,
                property: None,
                kind: ConflictKind::PreferenceShift,
                severity: ConflictSeverity::Low,
            })
            .collect();

        self.file(namespace, candidates, false)
    }

    /// Insert candidates that are not already on file, downgrading the
    /// confidence of both members in the same transaction.
    fn file(&self, namespace: &str, candidates: Vec<Candidate>, facts: bool) -> Result<u64> {
        if candidates.is_empty() {
            return Ok(0);
        }

        let now = Utc::now().to_rfc3339();
        self.db.with_writer(|conn| {
            let tx = conn.transaction()?;
            let mut filed = 0u64;
            for candidate in candidates {
                let (first, second) =
                    crate::model::normalize_pair(&candidate.id_1, &candidate.id_2);
                let inserted = tx.execute(
                    "INSERT OR IGNORE INTO conflicts
                         (id, fact_id_1, fact_id_2, entity_id, property, kind,
                          description, severity, resolution_status, detected_at, namespace)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'flagged', ?9, ?10)",
                    params![
                        format!("conf_{}", Uuid::new_v4()),
                        first,
                        second,
                        candidate.entity_id,
                        candidate.property,
                        candidate.kind.as_str(),
                        candidate.description,
                        candidate.severity.as_str(),
                        now,
                        namespace,
                    ],
                )?;
                if inserted == 0 {
                    continue;
                }
                filed += 1;

                let table = if facts { "facts" } else { "entities" };
                downgrade_confidence(&tx, table, first)?;
                downgrade_confidence(&tx, table, second)?;
            }
            tx.commit()?;
            Ok(filed)
        })
    }

    /// Conflicts on file, optionally filtered by resolution status
    pub fn list_conflicts(
        &self,
        namespace: &str,
        status: Option<ResolutionStatus>,
    ) -> Result<Vec<Conflict>> {
        self.db.with_reader(|conn| {
            let status_str = status.map(|s| s.as_str().to_string());
            let mut stmt = conn.prepare(
                "SELECT id, fact_id_1, fact_id_2, entity_id, property, kind,
                        description, severity, resolution_status, user_resolution,
                        detected_at, namespace
                 FROM conflicts
                 WHERE namespace = ?1
                   AND (?2 IS NULL OR resolution_status = ?2)
                 ORDER BY detected_at DESC",
            )?;
            let conflicts = stmt
                .query_map(params![namespace, status_str], conflict_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(conflicts)
        })
    }

    /// Advance a conflict's resolution lifecycle. Resolution is always
    /// user-driven; the engine never chooses a winner.
    pub fn resolve_conflict(
        &self,
        conflict_id: &str,
        status: ResolutionStatus,
        user_resolution: Option<&str>,
    ) -> Result<Option<Conflict>> {
        self.db.with_writer(|conn| {
            let conflict = conn
                .query_row(
                    "UPDATE conflicts SET
                         resolution_status = ?1,
                         user_resolution = COALESCE(?2, user_resolution)
                     WHERE id = ?3
                     RETURNING id, fact_id_1, fact_id_2, entity_id, property, kind,
                               description, severity, resolution_status, user_resolution,
                               detected_at, namespace",
                    params![status.as_str(), user_resolution, conflict_id],
                    conflict_from_row,
                )
                .optional()?;
            Ok(conflict)
        })
    }
}

fn downgrade_confidence(tx: &Transaction<'_>, table: &str, id: &str) -> Result<()> {
    tx.execute(
        &format!("UPDATE {table} SET confidence = ?1 WHERE id = ?2"),
        params![CONFLICT_CONFIDENCE, id],
    )?;
    Ok(())
}

fn conflict_from_row(row: &Row<'_>) -> rusqlite::Result<Conflict> {
    let kind_str: String = row.get(5)?;
    let severity_str: String = row.get(7)?;
    let status_str: String = row.get(8)?;
    Ok(Conflict {
        id: row.get(0)?,
        fact_id_1: row.get(1)?,
        fact_id_2: row.get(2)?,
        entity_id: row.get(3)?,
        property: row.get(4)?,
        kind: ConflictKind::parse_name(&kind_str).unwrap_or(ConflictKind::Contradiction),
        description: row.get(6)?,
        severity: ConflictSeverity::parse_name(&severity_str).unwrap_or(ConflictSeverity::Medium),
        resolution_status: ResolutionStatus::parse_name(&status_str).unwrap_or_default(),
        user_resolution: row.get(9)?,
        detected_at: row.get(10)?,
        namespace: row.get(11)?,
    })
}

// ============================================================================
// TESTS
// ============================================================================
