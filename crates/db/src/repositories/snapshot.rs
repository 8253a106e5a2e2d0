use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::Row;

use super::{RepositoryError, SnapshotStore};
use crate::DbPool;

pub struct SqlSnapshotStore {
    pool: DbPool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub name: String,
    pub updated_at: String,
    pub bytes: i64,
}

impl SqlSnapshotStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub async fn list(&self) -> Result<Vec<SnapshotInfo>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT name, updated_at, LENGTH(payload) AS bytes FROM state_snapshot ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<SnapshotInfo, RepositoryError> {
                Ok(SnapshotInfo {
                    name: row.try_get("name")?,
                    updated_at: row.try_get("updated_at")?,
                    bytes: row.try_get("bytes")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl SnapshotStore for SqlSnapshotStore {
    async fn load(&self, name: &str) -> Result<Option<Value>, RepositoryError> {
        let row = sqlx::query("SELECT payload FROM state_snapshot WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let payload: String = row.try_get("payload")?;
        serde_json::from_str(&payload)
            .map(Some)
            .map_err(|error| RepositoryError::Decode(format!("snapshot `{name}`: {error}")))
    }

    async fn save(&self, name: &str, payload: &Value) -> Result<(), RepositoryError> {
        let encoded = serde_json::to_string(payload)
            .map_err(|error| RepositoryError::Decode(format!("snapshot `{name}`: {error}")))?;

        sqlx::query(
            r#"
            INSERT INTO state_snapshot (name, payload, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                payload = excluded.payload,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(name)
        .bind(encoded)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            event_name = "persistence.snapshot.saved",
            snapshot = name,
            "snapshot persisted"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::SqlSnapshotStore;
    use crate::migrations::run_pending;
    use crate::repositories::{RepositoryError, SnapshotStore};
    use crate::connect_with_settings;

    async fn store() -> SqlSnapshotStore {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("migrate");
        SqlSnapshotStore::new(pool)
    }

    #[tokio::test]
    async fn missing_snapshot_loads_as_none() {
        let store = store().await;
        assert!(store.load("inventory").await.expect("load").is_none());
    }

    #[tokio::test]
    async fn save_overwrites_whole_payload() {
        let store = store().await;
        store.save("inventory", &json!({"revision": 1, "extra": true})).await.expect("first save");
        store.save("inventory", &json!({"revision": 2})).await.expect("second save");

        let loaded = store.load("inventory").await.expect("load");
        assert_eq!(loaded, Some(json!({"revision": 2})));

        let listed = store.list().await.expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "inventory");
    }

    #[tokio::test]
    async fn corrupt_payload_is_a_decode_error() {
        let store = store().await;
        sqlx::query("INSERT INTO state_snapshot (name, payload, updated_at) VALUES ('x', '{', 'now')")
            .execute(store.pool())
            .await
            .expect("insert corrupt row");

        assert!(matches!(store.load("x").await, Err(RepositoryError::Decode(_))));
    }
}
