//! SQLite schema for the record store
//!
//! Applied idempotently on open. Timestamps are stored as integer
//! milliseconds since the Unix epoch; JSON payloads as TEXT. The partial
//! unique indexes encode the "among non-deleted rows" and "current memory"
//! uniqueness rules.

/// Full DDL, executed as one batch on open
pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS file_paths (
    path_id          TEXT PRIMARY KEY,
    virtual_path     TEXT NOT NULL,
    zone_id          TEXT NOT NULL,
    backend_id       TEXT NOT NULL,
    physical_path    TEXT NOT NULL,
    size_bytes       INTEGER NOT NULL DEFAULT 0,
    content_hash     TEXT,
    file_type        TEXT,
    created_at       INTEGER NOT NULL,
    updated_at       INTEGER NOT NULL,
    accessed_at      INTEGER,
    deleted_at       INTEGER,
    current_version  INTEGER NOT NULL DEFAULT 1,
    owner_id         TEXT,
    locked_by        TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS ux_file_paths_zone_path
    ON file_paths (zone_id, virtual_path) WHERE deleted_at IS NULL;
CREATE INDEX IF NOT EXISTS ix_file_paths_zone ON file_paths (zone_id);
CREATE INDEX IF NOT EXISTS ix_file_paths_hash ON file_paths (content_hash);
CREATE INDEX IF NOT EXISTS ix_file_paths_accessed ON file_paths (accessed_at);
CREATE INDEX IF NOT EXISTS ix_file_paths_locked_by ON file_paths (locked_by);

CREATE TABLE IF NOT EXISTS version_history (
    version_id         TEXT PRIMARY KEY,
    resource_type      TEXT NOT NULL,
    resource_id        TEXT NOT NULL,
    version_number     INTEGER NOT NULL,
    content_hash       TEXT,
    size_bytes         INTEGER NOT NULL DEFAULT 0,
    mime_type          TEXT,
    parent_version_id  TEXT,
    source_type        TEXT NOT NULL,
    change_reason      TEXT,
    created_by         TEXT,
    created_at         INTEGER NOT NULL,
    UNIQUE (resource_type, resource_id, version_number)
);

CREATE TABLE IF NOT EXISTS operation_log (
    operation_id       TEXT PRIMARY KEY,
    operation_type     TEXT NOT NULL,
    zone_id            TEXT NOT NULL,
    agent_id           TEXT,
    path               TEXT NOT NULL,
    new_path           TEXT,
    snapshot_hash      TEXT,
    metadata_snapshot  TEXT,
    status             TEXT NOT NULL,
    error_message      TEXT,
    created_at         INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS ix_operation_log_zone ON operation_log (zone_id, created_at);

CREATE TABLE IF NOT EXISTS memories (
    memory_id          TEXT PRIMARY KEY,
    content_hash       TEXT NOT NULL,
    zone_id            TEXT,
    user_id            TEXT,
    agent_id           TEXT,
    scope              TEXT NOT NULL DEFAULT 'agent',
    visibility         TEXT NOT NULL DEFAULT 'private',
    memory_type        TEXT,
    importance         REAL NOT NULL DEFAULT 0.5,
    namespace          TEXT,
    path_key           TEXT,
    current_version    INTEGER NOT NULL DEFAULT 1,
    supersedes_id      TEXT,
    superseded_by_id   TEXT,
    valid_at           INTEGER,
    invalid_at         INTEGER,
    created_at         INTEGER NOT NULL,
    state              TEXT NOT NULL DEFAULT 'active',
    is_archived        INTEGER NOT NULL DEFAULT 0,
    parent_memory_id   TEXT,
    consolidated_from  TEXT,
    entities_json      TEXT,
    embedding_json     TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS ux_memories_user_path_key
    ON memories (user_id, path_key)
    WHERE invalid_at IS NULL AND superseded_by_id IS NULL AND path_key IS NOT NULL;
CREATE INDEX IF NOT EXISTS ix_memories_user ON memories (user_id);
CREATE INDEX IF NOT EXISTS ix_memories_agent ON memories (agent_id);
CREATE INDEX IF NOT EXISTS ix_memories_zone ON memories (zone_id);
CREATE INDEX IF NOT EXISTS ix_memories_type ON memories (memory_type);
CREATE INDEX IF NOT EXISTS ix_memories_created ON memories (created_at);

CREATE TABLE IF NOT EXISTS rebac_tuples (
    tuple_id          TEXT PRIMARY KEY,
    subject_type      TEXT NOT NULL,
    subject_id        TEXT NOT NULL,
    subject_relation  TEXT,
    relation          TEXT NOT NULL,
    object_type       TEXT NOT NULL,
    object_id         TEXT NOT NULL,
    tenant_id         TEXT NOT NULL,
    conditions        TEXT,
    expires_at        INTEGER,
    created_at        INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS ix_rebac_forward
    ON rebac_tuples (subject_type, subject_id, tenant_id, relation);
CREATE INDEX IF NOT EXISTS ix_rebac_reverse
    ON rebac_tuples (object_type, object_id, relation, tenant_id);

CREATE TABLE IF NOT EXISTS spending_ledger (
    ledger_id           TEXT PRIMARY KEY,
    agent_id            TEXT NOT NULL,
    zone_id             TEXT NOT NULL,
    period_type         TEXT NOT NULL,
    period_start        INTEGER NOT NULL,
    amount_spent_micro  INTEGER NOT NULL DEFAULT 0,
    tx_count            INTEGER NOT NULL DEFAULT 0,
    updated_at          INTEGER NOT NULL,
    UNIQUE (agent_id, zone_id, period_type, period_start)
);

CREATE TABLE IF NOT EXISTS audit_log (
    audit_id       TEXT PRIMARY KEY,
    bypass_type    TEXT,
    allowed        INTEGER NOT NULL,
    denial_reason  TEXT,
    subject_type   TEXT NOT NULL,
    subject_id     TEXT NOT NULL,
    permission     TEXT NOT NULL,
    path           TEXT NOT NULL,
    zone_id        TEXT NOT NULL,
    created_at     INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS ix_audit_log_subject ON audit_log (subject_type, subject_id);

CREATE TABLE IF NOT EXISTS file_metadata (
    path        TEXT NOT NULL,
    key         TEXT NOT NULL,
    value       TEXT NOT NULL,
    updated_at  INTEGER NOT NULL,
    UNIQUE (path, key)
);

CREATE TABLE IF NOT EXISTS agents (
    agent_id       TEXT PRIMARY KEY,
    zone_id        TEXT NOT NULL,
    name           TEXT NOT NULL,
    state          TEXT NOT NULL DEFAULT 'idle',
    generation     INTEGER NOT NULL DEFAULT 0,
    metadata_json  TEXT,
    created_at     INTEGER NOT NULL,
    updated_at     INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS ix_agents_zone ON agents (zone_id);

CREATE TABLE IF NOT EXISTS document_chunks (
    chunk_id     TEXT PRIMARY KEY,
    path_id      TEXT NOT NULL,
    chunk_index  INTEGER NOT NULL,
    chunk_text   TEXT NOT NULL,
    embedding    TEXT,
    created_at   INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS ix_document_chunks_path ON document_chunks (path_id);
";
