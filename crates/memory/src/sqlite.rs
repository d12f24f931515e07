//! SQLite backends for the conversation store and the semantic index.
//!
//! One database file holds both sides:
//! - `turns`, `profiles`, `tasks` — the durable store
//! - `turn_vectors` — embeddings and display fields for similarity search
//! - `index_meta` — the vector dimensionality the index was created with
//!
//! Timestamps are stored as UTC microseconds so ordering is numeric.

use crate::vector;
use async_trait::async_trait;
use buddy_core::error::{IndexError, StoreError};
use buddy_core::{
    ConversationStore, IndexHit, IndexedMemory, NewTask, SemanticIndex, Task, TaskFilter,
    TaskStatus, Turn, TurnId, UserProfile,
};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Open a pool on `url` (e.g. `"sqlite::memory:"` or `"sqlite://buddy.db"`).
pub async fn connect(url: &str) -> Result<SqlitePool, StoreError> {
    let options = SqliteConnectOptions::from_str(url)
        .map_err(|e| StoreError::Unavailable(format!("Invalid SQLite path: {e}")))?;
    connect_with(options).await
}

/// Open a pool on a database file, creating it if needed.
pub async fn connect_file(path: &Path) -> Result<SqlitePool, StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!("Cannot create {}: {e}", parent.display()))
            })?;
        }
    }
    connect_with(SqliteConnectOptions::new().filename(path)).await
}

async fn connect_with(options: SqliteConnectOptions) -> Result<SqlitePool, StoreError> {
    let options = options
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .pragma("foreign_keys", "ON");

    SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .map_err(|e| StoreError::Unavailable(format!("Failed to open SQLite: {e}")))
}

fn store_err(what: &str, e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
            StoreError::Unavailable(format!("{what}: {e}"))
        }
        other => StoreError::QueryFailed(format!("{what}: {other}")),
    }
}

fn index_err(what: &str, e: sqlx::Error) -> IndexError {
    match e {
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
            IndexError::Unavailable(format!("{what}: {e}"))
        }
        other => IndexError::QueryFailed(format!("{what}: {other}")),
    }
}

fn to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

fn from_micros(us: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(us).unwrap_or_default()
}

// ── Store ───────────────────────────────────────────────────────────────

/// The production conversation store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the store at `url`.
    ///
    /// Pass `"sqlite::memory:"` for an ephemeral database (useful for tests).
    pub async fn new(url: &str) -> Result<Self, StoreError> {
        let store = Self::from_pool(connect(url).await?).await?;
        info!("SQLite store initialized at {url}");
        Ok(store)
    }

    /// Open (or create) the store in a database file.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let store = Self::from_pool(connect_file(path).await?).await?;
        info!("SQLite store initialized at {}", path.display());
        Ok(store)
    }

    /// Create from an existing pool (shared with [`SqliteIndex`]).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool. Later calls fail with [`StoreError::Unavailable`].
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Append a turn with an explicit timestamp.
    pub async fn append_turn_at(
        &self,
        user_id: &str,
        message: &str,
        response: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Turn, StoreError> {
        let result = sqlx::query(
            "INSERT INTO turns (user_id, message, response, created_at, indexed) \
             VALUES (?1, ?2, ?3, ?4, 0)",
        )
        .bind(user_id)
        .bind(message)
        .bind(response)
        .bind(to_micros(timestamp))
        .execute(&self.pool)
        .await
        .map_err(|e| store_err("INSERT turn", e))?;

        let id = TurnId(result.last_insert_rowid());
        debug!(turn_id = %id, user_id, "Stored turn");

        Ok(Turn {
            id,
            user_id: user_id.to_string(),
            message: message.to_string(),
            response: response.to_string(),
            timestamp: from_micros(to_micros(timestamp)),
        })
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        let steps: [(&str, &str); 5] = [
            (
                "turns table",
                r#"
                CREATE TABLE IF NOT EXISTS turns (
                    id          INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id     TEXT NOT NULL,
                    message     TEXT NOT NULL,
                    response    TEXT NOT NULL,
                    created_at  INTEGER NOT NULL,
                    indexed     INTEGER NOT NULL DEFAULT 0
                )
                "#,
            ),
            (
                "turns recency index",
                "CREATE INDEX IF NOT EXISTS idx_turns_user_recent \
                 ON turns(user_id, created_at DESC, id DESC)",
            ),
            (
                "turns unindexed index",
                "CREATE INDEX IF NOT EXISTS idx_turns_unindexed ON turns(indexed, id)",
            ),
            (
                "profiles table",
                r#"
                CREATE TABLE IF NOT EXISTS profiles (
                    user_id     TEXT PRIMARY KEY,
                    data        TEXT NOT NULL,
                    updated_at  INTEGER NOT NULL
                )
                "#,
            ),
            (
                "tasks table",
                r#"
                CREATE TABLE IF NOT EXISTS tasks (
                    id          INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id     TEXT NOT NULL,
                    description TEXT NOT NULL,
                    due         TEXT,
                    status      TEXT NOT NULL DEFAULT 'pending',
                    created_at  INTEGER NOT NULL,
                    updated_at  INTEGER NOT NULL
                )
                "#,
            ),
        ];

        for (what, sql) in steps {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::MigrationFailed(format!("{what}: {e}")))?;
        }

        debug!("SQLite store migrations complete");
        Ok(())
    }

    fn row_to_turn(row: &SqliteRow) -> Result<Turn, StoreError> {
        let get = |col: &str, e: sqlx::Error| StoreError::QueryFailed(format!("{col} column: {e}"));
        Ok(Turn {
            id: TurnId(row.try_get("id").map_err(|e| get("id", e))?),
            user_id: row.try_get("user_id").map_err(|e| get("user_id", e))?,
            message: row.try_get("message").map_err(|e| get("message", e))?,
            response: row.try_get("response").map_err(|e| get("response", e))?,
            timestamp: from_micros(row.try_get("created_at").map_err(|e| get("created_at", e))?),
        })
    }

    fn row_to_task(row: &SqliteRow) -> Result<Task, StoreError> {
        let get = |col: &str, e: sqlx::Error| StoreError::QueryFailed(format!("{col} column: {e}"));
        let status: String = row.try_get("status").map_err(|e| get("status", e))?;
        let status = status.parse::<TaskStatus>().map_err(StoreError::QueryFailed)?;

        Ok(Task {
            id: row.try_get("id").map_err(|e| get("id", e))?,
            user_id: row.try_get("user_id").map_err(|e| get("user_id", e))?,
            description: row.try_get("description").map_err(|e| get("description", e))?,
            due: row.try_get("due").map_err(|e| get("due", e))?,
            status,
            created_at: from_micros(row.try_get("created_at").map_err(|e| get("created_at", e))?),
            updated_at: from_micros(row.try_get("updated_at").map_err(|e| get("updated_at", e))?),
        })
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn append_turn(
        &self,
        user_id: &str,
        message: &str,
        response: &str,
    ) -> Result<Turn, StoreError> {
        self.append_turn_at(user_id, message, response, Utc::now()).await
    }

    async fn fetch_recent(&self, user_id: &str, limit: usize) -> Result<Vec<Turn>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, user_id, message, response, created_at FROM turns \
             WHERE user_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2",
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_err("fetch_recent", e))?;

        rows.iter().map(Self::row_to_turn).collect()
    }

    async fn count_turns(&self, user_id: &str) -> Result<usize, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM turns WHERE user_id = ?1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| store_err("count_turns", e))?;
        let count: i64 = row
            .try_get("cnt")
            .map_err(|e| StoreError::QueryFailed(format!("cnt column: {e}")))?;
        Ok(count as usize)
    }

    async fn clear_turns(&self, user_id: &str) -> Result<usize, StoreError> {
        let result = sqlx::query("DELETE FROM turns WHERE user_id = ?1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| store_err("clear_turns", e))?;
        Ok(result.rows_affected() as usize)
    }

    async fn fetch_unindexed(&self, limit: usize) -> Result<Vec<Turn>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, user_id, message, response, created_at FROM turns \
             WHERE indexed = 0 ORDER BY id ASC LIMIT ?1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_err("fetch_unindexed", e))?;

        rows.iter().map(Self::row_to_turn).collect()
    }

    async fn mark_indexed(&self, id: TurnId) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE turns SET indexed = 1 WHERE id = ?1")
            .bind(id.0)
            .execute(&self.pool)
            .await
            .map_err(|e| store_err("mark_indexed", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("turn {id}")));
        }
        Ok(())
    }

    async fn mark_unindexed(&self, user_id: &str) -> Result<usize, StoreError> {
        let result = sqlx::query("UPDATE turns SET indexed = 0 WHERE user_id = ?1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| store_err("mark_unindexed", e))?;
        Ok(result.rows_affected() as usize)
    }

    async fn fetch_profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError> {
        let row = sqlx::query("SELECT data FROM profiles WHERE user_id = ?1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_err("fetch_profile", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let data: String = row
            .try_get("data")
            .map_err(|e| StoreError::QueryFailed(format!("data column: {e}")))?;
        match serde_json::from_str(&data) {
            Ok(profile) => Ok(Some(profile)),
            Err(e) => {
                warn!(user_id, error = %e, "Stored profile is unreadable, starting fresh");
                Ok(None)
            }
        }
    }

    async fn store_profile(&self, profile: &UserProfile) -> Result<(), StoreError> {
        let data = serde_json::to_string(profile)
            .map_err(|e| StoreError::QueryFailed(format!("Profile serialization: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO profiles (user_id, data, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(user_id) DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&profile.user_id)
        .bind(&data)
        .bind(to_micros(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| store_err("store_profile", e))?;
        Ok(())
    }

    async fn append_task(&self, user_id: &str, task: NewTask) -> Result<Task, StoreError> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO tasks (user_id, description, due, status, created_at, updated_at) \
             VALUES (?1, ?2, ?3, 'pending', ?4, ?4)",
        )
        .bind(user_id)
        .bind(&task.description)
        .bind(&task.due)
        .bind(to_micros(now))
        .execute(&self.pool)
        .await
        .map_err(|e| store_err("INSERT task", e))?;

        let now = from_micros(to_micros(now));
        Ok(Task {
            id: result.last_insert_rowid(),
            user_id: user_id.to_string(),
            description: task.description,
            due: task.due,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
        })
    }

    async fn fetch_tasks(
        &self,
        user_id: &str,
        filter: TaskFilter,
    ) -> Result<Vec<Task>, StoreError> {
        let rows = match filter.status {
            Some(status) => {
                sqlx::query(
                    "SELECT * FROM tasks WHERE user_id = ?1 AND status = ?2 \
                     ORDER BY id DESC LIMIT ?3",
                )
                .bind(user_id)
                .bind(status.as_str())
                .bind(filter.limit as i64)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query("SELECT * FROM tasks WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2")
                    .bind(user_id)
                    .bind(filter.limit as i64)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(|e| store_err("fetch_tasks", e))?;

        rows.iter().map(Self::row_to_task).collect()
    }

    async fn update_task_status(
        &self,
        task_id: i64,
        status: TaskStatus,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(status.as_str())
            .bind(to_micros(Utc::now()))
            .bind(task_id)
            .execute(&self.pool)
            .await
            .map_err(|e| store_err("update_task_status", e))?;
        Ok(result.rows_affected() > 0)
    }
}

// ── Index ───────────────────────────────────────────────────────────────

/// Semantic index stored next to the turns.
///
/// Queries load the user's vectors and rank them with brute-force cosine,
/// which is fine at personal-assistant scale.
pub struct SqliteIndex {
    pool: SqlitePool,
    dimensions: usize,
}

impl SqliteIndex {
    /// Attach to `pool`, creating the vector tables if needed.
    ///
    /// A database created with a different dimensionality is rejected with
    /// [`IndexError::DimensionMismatch`].
    pub async fn new(pool: SqlitePool, dimensions: usize) -> Result<Self, IndexError> {
        let index = Self { pool, dimensions };
        index.run_migrations().await?;
        index.check_stored_dimensions().await?;
        Ok(index)
    }

    async fn run_migrations(&self) -> Result<(), IndexError> {
        let steps: [(&str, &str); 3] = [
            (
                "turn_vectors table",
                r#"
                CREATE TABLE IF NOT EXISTS turn_vectors (
                    turn_id       INTEGER PRIMARY KEY,
                    user_id       TEXT NOT NULL,
                    message       TEXT,
                    response      TEXT,
                    created_at    INTEGER NOT NULL,
                    combined_text TEXT NOT NULL,
                    embedding     BLOB NOT NULL
                )
                "#,
            ),
            (
                "turn_vectors user index",
                "CREATE INDEX IF NOT EXISTS idx_turn_vectors_user ON turn_vectors(user_id)",
            ),
            (
                "index_meta table",
                "CREATE TABLE IF NOT EXISTS index_meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            ),
        ];

        for (what, sql) in steps {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| IndexError::Unavailable(format!("migration {what}: {e}")))?;
        }
        Ok(())
    }

    async fn check_stored_dimensions(&self) -> Result<(), IndexError> {
        let row = sqlx::query("SELECT value FROM index_meta WHERE key = 'dimensions'")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| index_err("read dimensions", e))?;

        match row {
            Some(row) => {
                let value: String = row
                    .try_get("value")
                    .map_err(|e| IndexError::QueryFailed(format!("value column: {e}")))?;
                let stored: usize = value
                    .parse()
                    .map_err(|e| IndexError::QueryFailed(format!("dimensions '{value}': {e}")))?;
                if stored != self.dimensions {
                    return Err(IndexError::DimensionMismatch {
                        expected: stored,
                        actual: self.dimensions,
                    });
                }
            }
            None => {
                sqlx::query("INSERT INTO index_meta (key, value) VALUES ('dimensions', ?1)")
                    .bind(self.dimensions.to_string())
                    .execute(&self.pool)
                    .await
                    .map_err(|e| index_err("write dimensions", e))?;
            }
        }
        Ok(())
    }

    fn row_to_memory(row: &SqliteRow) -> Result<IndexedMemory, IndexError> {
        let get = |col: &str, e: sqlx::Error| IndexError::QueryFailed(format!("{col} column: {e}"));
        let blob: Vec<u8> = row.try_get("embedding").map_err(|e| get("embedding", e))?;
        Ok(IndexedMemory {
            turn_id: TurnId(row.try_get("turn_id").map_err(|e| get("turn_id", e))?),
            user_id: row.try_get("user_id").map_err(|e| get("user_id", e))?,
            message: row.try_get("message").map_err(|e| get("message", e))?,
            response: row.try_get("response").map_err(|e| get("response", e))?,
            timestamp: from_micros(row.try_get("created_at").map_err(|e| get("created_at", e))?),
            combined_text: row
                .try_get("combined_text")
                .map_err(|e| get("combined_text", e))?,
            embedding: vector::blob_to_embedding(&blob),
        })
    }
}

#[async_trait]
impl SemanticIndex for SqliteIndex {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn add(&self, memory: IndexedMemory) -> Result<(), IndexError> {
        self.check_dimensions(&memory.embedding)?;

        sqlx::query(
            r#"
            INSERT INTO turn_vectors
                (turn_id, user_id, message, response, created_at, combined_text, embedding)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(turn_id) DO UPDATE SET
                user_id = excluded.user_id,
                message = excluded.message,
                response = excluded.response,
                created_at = excluded.created_at,
                combined_text = excluded.combined_text,
                embedding = excluded.embedding
            "#,
        )
        .bind(memory.turn_id.0)
        .bind(&memory.user_id)
        .bind(&memory.message)
        .bind(&memory.response)
        .bind(to_micros(memory.timestamp))
        .bind(&memory.combined_text)
        .bind(vector::embedding_to_blob(&memory.embedding))
        .execute(&self.pool)
        .await
        .map_err(|e| index_err("INSERT vector", e))?;

        debug!(turn_id = %memory.turn_id, "Indexed turn");
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        user_id: &str,
    ) -> Result<Vec<IndexHit>, IndexError> {
        self.check_dimensions(vector)?;

        let rows = sqlx::query("SELECT * FROM turn_vectors WHERE user_id = ?1")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| index_err("vector scan", e))?;

        let memories = rows
            .iter()
            .map(Self::row_to_memory)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(vector::rank_nearest(&memories, vector, k))
    }

    async fn contains(&self, id: TurnId) -> Result<bool, IndexError> {
        let row = sqlx::query("SELECT 1 FROM turn_vectors WHERE turn_id = ?1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| index_err("contains", e))?;
        Ok(row.is_some())
    }

    async fn remove_user(&self, user_id: &str) -> Result<usize, IndexError> {
        let result = sqlx::query("DELETE FROM turn_vectors WHERE user_id = ?1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| index_err("remove_user", e))?;
        Ok(result.rows_affected() as usize)
    }

    async fn count(&self) -> Result<usize, IndexError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM turn_vectors")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| index_err("count", e))?;
        let count: i64 = row
            .try_get("cnt")
            .map_err(|e| IndexError::QueryFailed(format!("cnt column: {e}")))?;
        Ok(count as usize)
    }
}
