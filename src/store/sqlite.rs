use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use tracing::debug;

use super::{Data, DocPath, Document, StoreResult};

/// Write-through backing for [`super::MemoryStore`]: every committed document
/// is upserted into a single `documents` table and reloaded on startup.
#[derive(Clone)]
pub struct SqlitePersistence {
    db_pool: SqlitePool,
}

impl SqlitePersistence {
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let db_pool = SqlitePoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await?;
        Self::from_pool(db_pool).await
    }

    pub async fn from_pool(db_pool: SqlitePool) -> StoreResult<Self> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (
                path TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                update_time INTEGER NOT NULL
            )",
        )
        .execute(&db_pool)
        .await?;

        Ok(Self { db_pool })
    }

    pub async fn load_all(&self) -> StoreResult<Vec<Document>> {
        let rows: Vec<(String, String, i64)> =
            sqlx::query_as("SELECT path,data,update_time FROM documents")
                .fetch_all(&self.db_pool)
                .await?;

        let mut docs = Vec::with_capacity(rows.len());
        for (path, data, update_time) in rows {
            let data: Data = serde_json::from_str(&data)?;
            docs.push(Document { path: DocPath::parse(&path)?, data, update_time });
        }
        debug!(count = docs.len(), "loaded persisted documents");
        Ok(docs)
    }

    /// Saves run unordered, so an older version never replaces a newer one.
    pub async fn save(&self, docs: &[Document]) -> StoreResult<()> {
        let mut tx = self.db_pool.begin().await?;
        for doc in docs {
            sqlx::query(
                "INSERT INTO documents (path,data,update_time) VALUES (?,?,?)
                 ON CONFLICT(path) DO UPDATE SET data=excluded.data, update_time=excluded.update_time
                 WHERE excluded.update_time > documents.update_time",
            )
            .bind(doc.path.as_str())
            .bind(serde_json::to_string(&doc.data)?)
            .bind(doc.update_time)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
