//! libSQL storage layer for OpenCraft.
//!
//! The [`Storage`] struct wraps a libSQL database holding three tables:
//! the material registry, the combination cache, and the per-user
//! provenance log.
//!
//! **Access rules:**
//! - Crafting engine: read-write via [`Storage::open`]
//! - View commands (graph, lists, similarity): read-only via [`Storage::open_readonly`]
//!
//! Name columns are `COLLATE NOCASE`, so every lookup here is
//! case-insensitive without callers having to fold case.

mod migrations;

use std::path::Path;

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use opencraft_shared::{
    BASE_ELEMENTS, CachedCombination, Combination, CombinationId, Material, MaterialSummary,
    OpenCraftError, Result,
};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode, applying
    /// migrations and seeding the base elements.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| OpenCraftError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| OpenCraftError::StoreUnavailable(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| OpenCraftError::StoreUnavailable(e.to_string()))?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        storage.seed_base_elements().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| OpenCraftError::StoreUnavailable(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| OpenCraftError::StoreUnavailable(e.to_string()))?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        OpenCraftError::StoreUnavailable(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(OpenCraftError::StoreUnavailable(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    /// Liveness probe.
    pub async fn ping(&self) -> Result<()> {
        let mut rows = self
            .conn
            .query("SELECT 1", params![])
            .await
            .map_err(|e| OpenCraftError::StoreUnavailable(e.to_string()))?;
        rows.next()
            .await
            .map_err(|e| OpenCraftError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Material registry
    // -----------------------------------------------------------------------

    /// Insert the base elements if absent. Returns how many were inserted.
    pub async fn seed_base_elements(&self) -> Result<usize> {
        self.check_writable()?;
        let mut inserted = 0;
        for (name, emoji) in BASE_ELEMENTS {
            if self.register_material(name, emoji, None, None).await? {
                inserted += 1;
            }
        }
        if inserted > 0 {
            tracing::info!(inserted, "seeded base elements");
        }
        Ok(inserted)
    }

    /// Register a material if no material with that name exists.
    ///
    /// Returns `false` iff the name was already taken. The check and the
    /// insert are one statement, so among concurrent callers for the same
    /// name at most one sees `true`.
    pub async fn register_material(
        &self,
        name: &str,
        emoji: &str,
        discoverer: Option<&str>,
        embedding: Option<&[f32]>,
    ) -> Result<bool> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let affected = self
            .conn
            .execute(
                "INSERT INTO materials (name, emoji, first_discovered_at, discoverer, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(name) DO NOTHING",
                params![
                    name,
                    emoji,
                    now.as_str(),
                    discoverer,
                    embedding.map(encode_embedding),
                ],
            )
            .await
            .map_err(|e| OpenCraftError::StoreUnavailable(e.to_string()))?;
        Ok(affected == 1)
    }

    /// Get a material by name (case-insensitive).
    pub async fn get_material(&self, name: &str) -> Result<Option<Material>> {
        let mut rows = self
            .conn
            .query(
                "SELECT name, emoji, first_discovered_at, discoverer, embedding
                 FROM materials WHERE name = ?1",
                params![name],
            )
            .await
            .map_err(|e| OpenCraftError::StoreUnavailable(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_material(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(OpenCraftError::StoreUnavailable(e.to_string())),
        }
    }

    /// List every registered material in registration order.
    pub async fn list_materials(&self) -> Result<Vec<Material>> {
        let mut rows = self
            .conn
            .query(
                "SELECT name, emoji, first_discovered_at, discoverer, embedding
                 FROM materials ORDER BY rowid",
                params![],
            )
            .await
            .map_err(|e| OpenCraftError::StoreUnavailable(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_material(&row)?);
        }
        Ok(results)
    }

    /// Names of materials that still lack an embedding.
    pub async fn materials_missing_embedding(&self) -> Result<Vec<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT name FROM materials WHERE embedding IS NULL ORDER BY rowid",
                params![],
            )
            .await
            .map_err(|e| OpenCraftError::StoreUnavailable(e.to_string()))?;

        let mut names = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            names.push(
                row.get::<String>(0)
                    .map_err(|e| OpenCraftError::StoreUnavailable(e.to_string()))?,
            );
        }
        Ok(names)
    }

    /// Backfill a missing embedding. Existing embeddings are never replaced;
    /// returns whether a row was updated.
    pub async fn set_embedding(&self, name: &str, embedding: &[f32]) -> Result<bool> {
        self.check_writable()?;
        let affected = self
            .conn
            .execute(
                "UPDATE materials SET embedding = ?1 WHERE name = ?2 AND embedding IS NULL",
                params![encode_embedding(embedding), name],
            )
            .await
            .map_err(|e| OpenCraftError::StoreUnavailable(e.to_string()))?;
        Ok(affected == 1)
    }

    // -----------------------------------------------------------------------
    // Combination cache
    // -----------------------------------------------------------------------

    /// Look up a cached result for the unordered pair `(a, b)`.
    ///
    /// Probes `(a, b)` first, then `(b, a)`; the oldest row for an ordering
    /// wins so repeated lookups are stable.
    pub async fn lookup(&self, a: &str, b: &str) -> Result<Option<CachedCombination>> {
        if let Some(hit) = self.lookup_ordered(a, b).await? {
            return Ok(Some(hit));
        }
        self.lookup_ordered(b, a).await
    }

    async fn lookup_ordered(&self, first: &str, second: &str) -> Result<Option<CachedCombination>> {
        let mut rows = self
            .conn
            .query(
                "SELECT first_word, second_word, result, emoji FROM combination_cache
                 WHERE first_word = ?1 AND second_word = ?2
                 ORDER BY id LIMIT 1",
                params![first, second],
            )
            .await
            .map_err(|e| OpenCraftError::StoreUnavailable(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_cached(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(OpenCraftError::StoreUnavailable(e.to_string())),
        }
    }

    /// Append a cache row. Rows are never deduplicated.
    pub async fn insert_cache(&self, a: &str, b: &str, result: &str, emoji: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO combination_cache (first_word, second_word, result, emoji, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![a, b, result, emoji, now.as_str()],
            )
            .await
            .map_err(|e| OpenCraftError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    /// Up to `limit` cache rows with `a` or `b` as an operand, newest first.
    pub async fn recent_combinations_touching(
        &self,
        a: &str,
        b: &str,
        limit: u32,
    ) -> Result<Vec<CachedCombination>> {
        let mut rows = self
            .conn
            .query(
                "SELECT first_word, second_word, result, emoji FROM combination_cache
                 WHERE first_word IN (?1, ?2) OR second_word IN (?1, ?2)
                 ORDER BY id DESC LIMIT ?3",
                params![a, b, limit],
            )
            .await
            .map_err(|e| OpenCraftError::StoreUnavailable(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_cached(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Provenance log
    // -----------------------------------------------------------------------

    /// Append a provenance row.
    pub async fn append_combination(&self, combo: &Combination) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO combinations (id, first_word, second_word, result_name, result_emoji,
                                           username, created_at, per_user_rank, is_discovery)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    combo.id.to_string(),
                    combo.first_word.as_str(),
                    combo.second_word.as_str(),
                    combo.result_name.as_str(),
                    combo.result_emoji.as_str(),
                    combo.username.as_str(),
                    combo.timestamp.to_rfc3339(),
                    i64::from(combo.per_user_rank),
                    i64::from(combo.is_discovery),
                ],
            )
            .await
            .map_err(|e| OpenCraftError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    /// List provenance rows in log order, optionally for a single user.
    pub async fn list_combinations(&self, username: Option<&str>) -> Result<Vec<Combination>> {
        let mut rows = match username {
            Some(user) => self
                .conn
                .query(
                    "SELECT id, first_word, second_word, result_name, result_emoji, username,
                            created_at, per_user_rank, is_discovery
                     FROM combinations WHERE username = ?1 ORDER BY seq",
                    params![user],
                )
                .await,
            None => self
                .conn
                .query(
                    "SELECT id, first_word, second_word, result_name, result_emoji, username,
                            created_at, per_user_rank, is_discovery
                     FROM combinations ORDER BY seq",
                    params![],
                )
                .await,
        }
        .map_err(|e| OpenCraftError::StoreUnavailable(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_combination(&row)?);
        }
        Ok(results)
    }

    /// Shallowest rank at which `username` has produced `word`, if ever.
    pub async fn min_rank(&self, word: &str, username: &str) -> Result<Option<u32>> {
        let mut rows = self
            .conn
            .query(
                "SELECT MIN(per_user_rank) FROM combinations
                 WHERE username = ?1 AND result_name = ?2",
                params![username, word],
            )
            .await
            .map_err(|e| OpenCraftError::StoreUnavailable(e.to_string()))?;

        match rows.next().await {
            // MIN over zero rows yields NULL, which fails the integer read.
            Ok(Some(row)) => Ok(row.get::<i64>(0).ok().map(|r| r as u32)),
            Ok(None) => Ok(None),
            Err(e) => Err(OpenCraftError::StoreUnavailable(e.to_string())),
        }
    }

    /// Distinct materials a user has produced, in order of first appearance.
    /// The registry emoji is preferred over the one logged with the craft.
    pub async fn user_materials(&self, username: &str) -> Result<Vec<MaterialSummary>> {
        let mut rows = self
            .conn
            .query(
                "SELECT c.result_name, COALESCE(m.emoji, c.result_emoji), MIN(c.seq) AS first_seq
                 FROM combinations c
                 LEFT JOIN materials m ON m.name = c.result_name
                 WHERE c.username = ?1
                 GROUP BY c.result_name
                 ORDER BY first_seq",
                params![username],
            )
            .await
            .map_err(|e| OpenCraftError::StoreUnavailable(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(MaterialSummary {
                name: row
                    .get::<String>(0)
                    .map_err(|e| OpenCraftError::StoreUnavailable(e.to_string()))?,
                emoji: row
                    .get::<String>(1)
                    .map_err(|e| OpenCraftError::StoreUnavailable(e.to_string()))?,
            });
        }
        Ok(results)
    }
}

// ---------------------------------------------------------------------------
// Row conversion
// ---------------------------------------------------------------------------

/// Embeddings are stored as little-endian `f32` bytes.
fn encode_embedding(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(OpenCraftError::validation(format!(
            "embedding blob length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| OpenCraftError::StoreUnavailable(format!("invalid date: {e}")))
}

/// Convert a database row to a [`Material`].
fn row_to_material(row: &libsql::Row) -> Result<Material> {
    let embedding = match row.get::<Vec<u8>>(4).ok() {
        Some(bytes) => Some(decode_embedding(&bytes)?),
        None => None,
    };
    Ok(Material {
        name: row
            .get::<String>(0)
            .map_err(|e| OpenCraftError::StoreUnavailable(e.to_string()))?,
        emoji: row
            .get::<String>(1)
            .map_err(|e| OpenCraftError::StoreUnavailable(e.to_string()))?,
        first_discovered_at: {
            let s: String = row
                .get(2)
                .map_err(|e| OpenCraftError::StoreUnavailable(e.to_string()))?;
            parse_timestamp(&s)?
        },
        discoverer: row.get::<String>(3).ok(),
        embedding,
    })
}

fn row_to_cached(row: &libsql::Row) -> Result<CachedCombination> {
    Ok(CachedCombination {
        first_word: row
            .get::<String>(0)
            .map_err(|e| OpenCraftError::StoreUnavailable(e.to_string()))?,
        second_word: row
            .get::<String>(1)
            .map_err(|e| OpenCraftError::StoreUnavailable(e.to_string()))?,
        result: row
            .get::<String>(2)
            .map_err(|e| OpenCraftError::StoreUnavailable(e.to_string()))?,
        emoji: row
            .get::<String>(3)
            .map_err(|e| OpenCraftError::StoreUnavailable(e.to_string()))?,
    })
}

/// Convert a database row to a [`Combination`].
fn row_to_combination(row: &libsql::Row) -> Result<Combination> {
    let id: String = row
        .get(0)
        .map_err(|e| OpenCraftError::StoreUnavailable(e.to_string()))?;
    let created_at: String = row
        .get(6)
        .map_err(|e| OpenCraftError::StoreUnavailable(e.to_string()))?;
    Ok(Combination {
        id: id
            .parse::<CombinationId>()
            .map_err(|e| OpenCraftError::StoreUnavailable(format!("invalid id {id}: {e}")))?,
        first_word: row
            .get::<String>(1)
            .map_err(|e| OpenCraftError::StoreUnavailable(e.to_string()))?,
        second_word: row
            .get::<String>(2)
            .map_err(|e| OpenCraftError::StoreUnavailable(e.to_string()))?,
        result_name: row
            .get::<String>(3)
            .map_err(|e| OpenCraftError::StoreUnavailable(e.to_string()))?,
        result_emoji: row
            .get::<String>(4)
            .map_err(|e| OpenCraftError::StoreUnavailable(e.to_string()))?,
        username: row
            .get::<String>(5)
            .map_err(|e| OpenCraftError::StoreUnavailable(e.to_string()))?,
        timestamp: parse_timestamp(&created_at)?,
        per_user_rank: row
            .get::<i64>(7)
            .map_err(|e| OpenCraftError::StoreUnavailable(e.to_string()))? as u32,
        is_discovery: row
            .get::<i64>(8)
            .map_err(|e| OpenCraftError::StoreUnavailable(e.to_string()))?
            != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("oc_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn combo(first: &str, second: &str, result: &str, user: &str, rank: u32) -> Combination {
        Combination {
            id: CombinationId::new(),
            first_word: first.into(),
            second_word: second.into(),
            result_name: result.into(),
            result_emoji: "✨".into(),
            username: user.into(),
            timestamp: Utc::now(),
            per_user_rank: rank,
            is_discovery: false,
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        let version = storage.get_schema_version().await;
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn idempotent_migration_and_seed() {
        let tmp = std::env::temp_dir().join(format!("oc_test_{}.db", Uuid::now_v7()));
        let s1 = Storage::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
        assert_eq!(s2.list_materials().await.unwrap().len(), 4);
        assert_eq!(s2.seed_base_elements().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn base_elements_are_seeded() {
        let storage = test_storage().await;
        let fire = storage.get_material("fire").await.unwrap().expect("Fire seeded");
        assert_eq!(fire.name, "Fire");
        assert_eq!(fire.emoji, "🔥");
        assert!(fire.discoverer.is_none());
        assert!(fire.embedding.is_none());
    }

    #[tokio::test]
    async fn lookup_probes_both_orderings() {
        let storage = test_storage().await;
        assert!(storage.lookup("Water", "Fire").await.unwrap().is_none());

        storage.insert_cache("Water", "Fire", "Steam", "💧").await.unwrap();

        let forward = storage.lookup("Water", "Fire").await.unwrap().expect("hit");
        let reverse = storage.lookup("Fire", "Water").await.unwrap().expect("hit");
        assert_eq!(forward.result, reverse.result);
        assert_eq!(forward.emoji, reverse.emoji);

        let folded = storage.lookup("fire", "WATER").await.unwrap().expect("hit");
        assert_eq!(folded.result, "Steam");
    }

    #[tokio::test]
    async fn cache_rows_are_not_deduplicated() {
        let storage = test_storage().await;
        storage.insert_cache("Water", "Fire", "Steam", "💧").await.unwrap();
        storage.insert_cache("Fire", "Water", "Vapor", "🌫️").await.unwrap();

        let rows = storage
            .recent_combinations_touching("Fire", "Water", 10)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].result, "Vapor", "newest first");

        // The oldest row for the probed ordering is stable.
        let hit = storage.lookup("Water", "Fire").await.unwrap().unwrap();
        assert_eq!(hit.result, "Steam");
    }

    #[tokio::test]
    async fn recent_combinations_respects_limit_and_filter() {
        let storage = test_storage().await;
        storage.insert_cache("Water", "Fire", "Steam", "💧").await.unwrap();
        storage.insert_cache("Earth", "Air", "Dust", "🌫️").await.unwrap();
        storage.insert_cache("Steam", "Earth", "Mud", "🟤").await.unwrap();

        let rows = storage
            .recent_combinations_touching("Steam", "Lava", 10)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].result, "Mud");

        let rows = storage
            .recent_combinations_touching("Earth", "Fire", 1)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].result, "Mud");
    }

    #[tokio::test]
    async fn register_material_is_unique_by_name() {
        let storage = test_storage().await;
        let first = storage
            .register_material("Steam", "💧", Some("alice"), Some(&[0.5, -0.5]))
            .await
            .unwrap();
        let second = storage
            .register_material("STEAM", "🌫️", Some("bob"), None)
            .await
            .unwrap();
        assert!(first);
        assert!(!second);

        let steam = storage.get_material("steam").await.unwrap().unwrap();
        assert_eq!(steam.emoji, "💧");
        assert_eq!(steam.discoverer.as_deref(), Some("alice"));
        assert_eq!(steam.embedding, Some(vec![0.5, -0.5]));
    }

    #[tokio::test]
    async fn concurrent_registration_has_one_winner() {
        let storage = Arc::new(test_storage().await);
        let mut handles = Vec::new();
        for i in 0..8 {
            let storage = storage.clone();
            handles.push(tokio::spawn(async move {
                let user = format!("user{i}");
                storage
                    .register_material("Lava", "🌋", Some(user.as_str()), None)
                    .await
                    .expect("register")
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.expect("join") {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn embedding_backfill_only_fills_missing() {
        let storage = test_storage().await;
        let missing = storage.materials_missing_embedding().await.unwrap();
        assert_eq!(missing, vec!["Fire", "Water", "Earth", "Air"]);

        assert!(storage.set_embedding("fire", &[1.0, 0.0]).await.unwrap());
        assert!(!storage.set_embedding("Fire", &[0.0, 1.0]).await.unwrap());

        let fire = storage.get_material("Fire").await.unwrap().unwrap();
        assert_eq!(fire.embedding, Some(vec![1.0, 0.0]));
        assert_eq!(storage.materials_missing_embedding().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn provenance_log_and_min_rank() {
        let storage = test_storage().await;
        storage
            .append_combination(&combo("Water", "Fire", "Steam", "alice", 1))
            .await
            .unwrap();
        storage
            .append_combination(&combo("Steam", "Earth", "Mud", "alice", 2))
            .await
            .unwrap();
        storage
            .append_combination(&combo("Water", "Earth", "Mud", "alice", 1))
            .await
            .unwrap();
        storage
            .append_combination(&combo("Water", "Fire", "Steam", "bob", 1))
            .await
            .unwrap();

        assert_eq!(storage.min_rank("Mud", "alice").await.unwrap(), Some(1));
        assert_eq!(storage.min_rank("steam", "alice").await.unwrap(), Some(1));
        assert_eq!(storage.min_rank("Mud", "bob").await.unwrap(), None);

        assert_eq!(storage.list_combinations(None).await.unwrap().len(), 4);
        let alice = storage.list_combinations(Some("alice")).await.unwrap();
        assert_eq!(alice.len(), 3);
        assert_eq!(alice[1].result_name, "Mud");
        assert_eq!(alice[1].per_user_rank, 2);
    }

    #[tokio::test]
    async fn user_materials_in_first_seen_order() {
        let storage = test_storage().await;
        storage
            .register_material("Steam", "💧", Some("alice"), None)
            .await
            .unwrap();
        storage
            .append_combination(&combo("Water", "Fire", "Steam", "alice", 1))
            .await
            .unwrap();
        storage
            .append_combination(&combo("Steam", "Earth", "Mud", "alice", 2))
            .await
            .unwrap();
        storage
            .append_combination(&combo("Fire", "Water", "Steam", "alice", 1))
            .await
            .unwrap();

        let materials = storage.user_materials("alice").await.unwrap();
        let names: Vec<&str> = materials.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Steam", "Mud"]);
        // Registry emoji wins over the logged one.
        assert_eq!(materials[0].emoji, "💧");
        assert_eq!(materials[1].emoji, "✨");

        assert!(storage.user_materials("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("oc_test_{}.db", Uuid::now_v7()));
        let rw = Storage::open(&tmp).await.unwrap();
        rw.insert_cache("Water", "Fire", "Steam", "💧").await.unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        assert!(ro.lookup("Fire", "Water").await.unwrap().is_some());
        let result = ro.insert_cache("Earth", "Air", "Dust", "🌫️").await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
        ro.ping().await.expect("ping");
    }

    #[test]
    fn embedding_blob_roundtrip_rejects_ragged_input() {
        let bytes = encode_embedding(&[0.25, -1.0, 3.5]);
        assert_eq!(bytes.len(), 12);
        assert_eq!(decode_embedding(&bytes).unwrap(), vec![0.25, -1.0, 3.5]);
        assert!(decode_embedding(&bytes[..5]).is_err());
    }
}
