//! Database Migrations
//!
//! Schema migration definitions for the semantic tier.

use rusqlite::Connection;

use crate::error::Result;

/// Migration definitions
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial semantic graph: entities, relationships, facts, conflicts",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "Skill library: skills, embeddings, skill relationships",
        up: MIGRATION_V2_UP,
    },
    Migration {
        version: 3,
        description: "Consolidation log, backup metadata, decision decay factor",
        up: MIGRATION_V3_UP,
    },
];

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number
    pub version: u32,
    /// Description
    pub description: &'static str,
    /// SQL to apply
    pub up: &'static str,
}

/// V1: semantic graph
const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS entities (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    entity_type TEXT NOT NULL DEFAULT 'concept',
    description TEXT,
    confidence REAL NOT NULL DEFAULT 1.0,
    created_at TEXT NOT NULL,
    last_accessed TEXT NOT NULL,
    access_count INTEGER NOT NULL DEFAULT 0,
    is_archived INTEGER NOT NULL DEFAULT 0,
    namespace TEXT NOT NULL DEFAULT 'default',
    UNIQUE(namespace, name, entity_type)
);

CREATE INDEX IF NOT EXISTS idx_entities_name ON entities(name);
CREATE INDEX IF NOT EXISTS idx_entities_type_accessed
    ON entities(entity_type, last_accessed DESC);

CREATE TABLE IF NOT EXISTS relationships (
    id TEXT PRIMARY KEY,
    source_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    target_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    relation_type TEXT NOT NULL,
    strength REAL NOT NULL DEFAULT 0.8,
    evidence TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    last_reinforced TEXT NOT NULL,
    access_count INTEGER NOT NULL DEFAULT 0,
    is_archived INTEGER NOT NULL DEFAULT 0,
    namespace TEXT NOT NULL DEFAULT 'default',
    UNIQUE(source_id, target_id, relation_type),
    CHECK(source_id <> target_id)
);

-- Decay scans walk this index
CREATE INDEX IF NOT EXISTS idx_relationships_reinforced
    ON relationships(last_reinforced);
CREATE INDEX IF NOT EXISTS idx_relationships_source ON relationships(source_id);
CREATE INDEX IF NOT EXISTS idx_relationships_target ON relationships(target_id);

CREATE TABLE IF NOT EXISTS facts (
    id TEXT PRIMARY KEY,
    entity_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    property TEXT NOT NULL,
    value TEXT NOT NULL,
    confidence REAL NOT NULL DEFAULT 1.0,
    valid_from TEXT NOT NULL,
    valid_until TEXT,
    source_conversation TEXT,
    contradicts TEXT NOT NULL DEFAULT '[]',
    is_archived INTEGER NOT NULL DEFAULT 0,
    namespace TEXT NOT NULL DEFAULT 'default',
    UNIQUE(entity_id, property, value, valid_from)
);

-- Currently-true facts per entity property
CREATE INDEX IF NOT EXISTS idx_facts_active
    ON facts(entity_id, property, valid_from DESC)
    WHERE valid_until IS NULL AND is_archived = 0;

CREATE TABLE IF NOT EXISTS conflicts (
    id TEXT PRIMARY KEY,
    fact_id_1 TEXT NOT NULL,
    fact_id_2 TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    property TEXT,
    kind TEXT NOT NULL,
    description TEXT NOT NULL,
    severity TEXT NOT NULL,
    resolution_status TEXT NOT NULL DEFAULT 'flagged',
    user_resolution TEXT,
    detected_at TEXT NOT NULL,
    namespace TEXT NOT NULL DEFAULT 'default',
    UNIQUE(fact_id_1, fact_id_2),
    CHECK(fact_id_1 < fact_id_2)
);

CREATE INDEX IF NOT EXISTS idx_conflicts_status ON conflicts(resolution_status);

-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);
"#;

/// V2: skill library
const MIGRATION_V2_UP: &str = r#"
CREATE TABLE IF NOT EXISTS skills (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    summary TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    category TEXT NOT NULL DEFAULT '',
    triggers TEXT NOT NULL DEFAULT '[]',
    code TEXT,
    code_type TEXT NOT NULL DEFAULT 'inline',
    prerequisites TEXT NOT NULL DEFAULT '[]',
    uses_skills TEXT NOT NULL DEFAULT '[]',
    used_by_skills TEXT NOT NULL DEFAULT '[]',
    success_count INTEGER NOT NULL DEFAULT 0,
    failure_count INTEGER NOT NULL DEFAULT 0,
    avg_user_satisfaction REAL NOT NULL DEFAULT 0.0,
    last_used TEXT,
    is_archived INTEGER NOT NULL DEFAULT 0,
    version INTEGER NOT NULL DEFAULT 1,
    namespace TEXT NOT NULL DEFAULT 'default',
    UNIQUE(namespace, name)
);

-- Lazy summary listing walks this index
CREATE INDEX IF NOT EXISTS idx_skills_summary
    ON skills(is_archived, avg_user_satisfaction DESC, success_count DESC);

-- Embeddings storage table (binary blob for efficiency)
CREATE TABLE IF NOT EXISTS skill_embeddings (
    skill_id TEXT PRIMARY KEY REFERENCES skills(id) ON DELETE CASCADE,
    embedding BLOB NOT NULL,
    dimensions INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS skill_relationships (
    id TEXT PRIMARY KEY,
    skill_id_1 TEXT NOT NULL REFERENCES skills(id) ON DELETE CASCADE,
    skill_id_2 TEXT NOT NULL REFERENCES skills(id) ON DELETE CASCADE,
    relationship_type TEXT NOT NULL DEFAULT 'co_occurrence',
    co_occurrence_count INTEGER NOT NULL DEFAULT 0,
    relational_vector BLOB,
    created_at TEXT NOT NULL,
    last_updated TEXT NOT NULL,
    UNIQUE(skill_id_1, skill_id_2, relationship_type),
    CHECK(skill_id_1 < skill_id_2)
);
"#;

/// V3: consolidation bookkeeping + decision decay
const MIGRATION_V3_UP: &str = r#"
CREATE TABLE IF NOT EXISTS consolidation_log (
    id TEXT PRIMARY KEY,
    started_at TEXT NOT NULL,
    finished_at TEXT NOT NULL,
    success INTEGER NOT NULL,
    error TEXT,
    stats TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_consolidation_log_started
    ON consolidation_log(started_at DESC);

CREATE TABLE IF NOT EXISTS backup_metadata (
    id TEXT PRIMARY KEY,
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    descriptor TEXT NOT NULL
);

-- Decision-derived edges decay at a quarter of the normal rate
ALTER TABLE relationships ADD COLUMN decay_factor REAL NOT NULL DEFAULT 1.0;
"#;

/// Apply all pending migrations to a connection
pub fn apply_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    for migration in MIGRATIONS {
        if migration.version <= current {
            continue;
        }
        tracing::info!(
            version = migration.version,
            description = migration.description,
            "Applying migration"
        );
        conn.execute_batch(migration.up)?;
        conn.execute(
            "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
            rusqlite::params![migration.version, chrono::Utc::now().to_rfc3339()],
        )?;
    }

    Ok(())
}
