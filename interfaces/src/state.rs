use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("document store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("document serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Durable key-value storage of JSON documents.
///
/// Each `save` replaces the whole document atomically; concurrent writers
/// to the same key resolve as last-writer-wins.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<Value>, StoreError>;

    async fn save(&self, key: &str, document: &Value) -> Result<(), StoreError>;

    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

pub async fn load_document<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.load(key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

pub async fn save_document<T: Serialize + Sync>(
    store: &dyn DocumentStore,
    key: &str,
    document: &T,
) -> Result<(), StoreError> {
    let value = serde_json::to_value(document)?;
    store.save(key, &value).await
}

/// One pretty-printed `<key>.json` file per document.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

#[async_trait]
impl DocumentStore for JsonFileStore {
    async fn load(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let path = self.path(key);
        if !fs::try_exists(&path).await? {
            return Ok(None);
        }
        let data = fs::read_to_string(&path).await?;
        Ok(Some(serde_json::from_str(&data)?))
    }

    async fn save(&self, key: &str, document: &Value) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).await?;
        let json = serde_json::to_string_pretty(document)?;
        let path = self.path(key);
        let tmp = path.with_extension("json.tmp");

        // Write aside and flush to disk, then rename over the target so readers never see a torn file
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path(key);
        if fs::try_exists(&path).await? {
            fs::remove_file(&path).await?;
        }
        Ok(())
    }
}

/// Documents kept as rows of a single SQLite table.
pub struct SqliteDocumentStore {
    pool: SqlitePool,
}

impl SqliteDocumentStore {
    /// Open (creating if needed) the database at `database_url` and ensure the schema.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // A single connection keeps `sqlite::memory:` databases coherent
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    pub async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                key TEXT PRIMARY KEY,
                body TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn load(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let row = sqlx::query("SELECT body FROM documents WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let body: String = row.try_get("body")?;
                Ok(Some(serde_json::from_str(&body)?))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, key: &str, document: &Value) -> Result<(), StoreError> {
        let body = serde_json::to_string(document)?;
        sqlx::query(
            r#"
            INSERT INTO documents (key, body, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                body = excluded.body,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(&body)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM documents WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Volatile store for tests and dry runs. Can be told to fail upcoming writes.
#[derive(Default)]
pub struct MemoryStore {
    documents: Mutex<HashMap<String, Value>>,
    failing_writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` calls to `save` fail with an I/O error.
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    pub fn snapshot(&self, key: &str) -> Option<Value> {
        let documents = self.documents.lock().unwrap_or_else(|e| e.into_inner());
        documents.get(key).cloned()
    }

    fn take_failure(&self) -> bool {
        self.failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn load(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.snapshot(key))
    }

    async fn save(&self, key: &str, document: &Value) -> Result<(), StoreError> {
        if self.take_failure() {
            return Err(StoreError::Io(std::io::Error::other(format!(
                "injected write failure for {key}"
            ))));
        }
        let mut documents = self.documents.lock().unwrap_or_else(|e| e.into_inner());
        documents.insert(key.to_owned(), document.clone());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut documents = self.documents.lock().unwrap_or_else(|e| e.into_inner());
        documents.remove(key);
        Ok(())
    }
}
