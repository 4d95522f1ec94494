//! Database schema and migrations for Arbor.
//!
//! Migrations are applied in order when the database is first opened or
//! upgraded. The `schema_version` table tracks which ones have run.

/// Database migrations.
pub const MIGRATIONS: &[&str] = &[
    // v1: Node tree
    r#"
-- Files and folders. `path` is the dot-separated materialized path of
-- ancestor ids ending with the node's own id (e.g. '1.4.9').
CREATE TABLE nodes (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    kind          TEXT NOT NULL CHECK (kind IN ('file', 'folder')),
    name          TEXT NOT NULL,
    parent_id     INTEGER REFERENCES nodes(id),
    path          TEXT NOT NULL,
    content_type  TEXT,
    size          INTEGER NOT NULL DEFAULT 0,
    created_at    TEXT NOT NULL,
    expires_at    TEXT,
    metadata      TEXT
);

CREATE INDEX idx_nodes_path ON nodes(path);
CREATE INDEX idx_nodes_parent_id ON nodes(parent_id);
CREATE UNIQUE INDEX idx_nodes_parent_name ON nodes(parent_id, name);
CREATE INDEX idx_nodes_expires_at ON nodes(expires_at);
"#,
    // v2: Roots with quota counters
    r#"
CREATE TABLE roots (
    node_id     INTEGER PRIMARY KEY REFERENCES nodes(id) ON DELETE CASCADE,
    category    TEXT NOT NULL,   -- 'personal', 'personal_temporary', 'organizational', 'shared'
    max_bytes   INTEGER NOT NULL,
    used_bytes  INTEGER NOT NULL DEFAULT 0,
    created_by  TEXT NOT NULL
);

CREATE INDEX idx_roots_category ON roots(category);
"#,
    // v3: Permission grants
    r#"
CREATE TABLE grants (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id     TEXT NOT NULL,
    folder_id   INTEGER NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    level       TEXT NOT NULL,   -- 'read', 'write', 'admin', 'owner'
    granted_by  TEXT,
    created_at  TEXT NOT NULL,
    UNIQUE (user_id, folder_id)
);

CREATE INDEX idx_grants_folder_id ON grants(folder_id);
"#,
];
