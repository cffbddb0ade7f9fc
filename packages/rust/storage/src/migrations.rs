//! SQL migration definitions for the OpenCraft database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: materials, combination_cache, combinations",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Material registry; the name is the only enforced uniqueness
CREATE TABLE IF NOT EXISTS materials (
    name                TEXT PRIMARY KEY COLLATE NOCASE,
    emoji               TEXT NOT NULL,
    first_discovered_at TEXT NOT NULL,
    discoverer          TEXT,
    embedding           BLOB
);

-- Memoized pair -> result rows (append-only, not deduplicated)
CREATE TABLE IF NOT EXISTS combination_cache (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    first_word  TEXT NOT NULL COLLATE NOCASE,
    second_word TEXT NOT NULL COLLATE NOCASE,
    result      TEXT NOT NULL COLLATE NOCASE,
    emoji       TEXT NOT NULL,
    created_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_cache_pair ON combination_cache(first_word, second_word);
CREATE INDEX IF NOT EXISTS idx_cache_second ON combination_cache(second_word);

-- Per-user provenance log, one row per craft event
CREATE TABLE IF NOT EXISTS combinations (
    seq           INTEGER PRIMARY KEY AUTOINCREMENT,
    id            TEXT NOT NULL UNIQUE,
    first_word    TEXT NOT NULL COLLATE NOCASE,
    second_word   TEXT NOT NULL COLLATE NOCASE,
    result_name   TEXT NOT NULL COLLATE NOCASE,
    result_emoji  TEXT NOT NULL,
    username      TEXT NOT NULL,
    created_at    TEXT NOT NULL,
    per_user_rank INTEGER NOT NULL CHECK (per_user_rank >= 1),
    is_discovery  INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_combinations_user_result ON combinations(username, result_name);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
