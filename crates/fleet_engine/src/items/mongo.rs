use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use mongodb::bson::{doc, DateTime as BsonDateTime, Document};
use mongodb::error::{Error as MongoError, ErrorKind};
use mongodb::{Client, Collection, Database};

use super::{ItemStore, ItemStoreError, ItemStoreResult};

#[derive(Debug, Clone)]
pub struct MongoItemStoreConfig {
    pub url: String,
    pub database: String,
}

impl Default for MongoItemStoreConfig {
    fn default() -> Self {
        Self {
            url: "mongodb://127.0.0.1:27017".to_string(),
            database: "default_db".to_string(),
        }
    }
}

/// MongoDB-backed item store; each item category is a collection.
#[derive(Debug, Clone)]
pub struct MongoItemStore {
    db: Database,
}

impl MongoItemStore {
    /// Connect and verify the deployment answers `ping`.
    pub async fn connect(config: MongoItemStoreConfig) -> ItemStoreResult<Self> {
        let client = Client::with_uri_str(&config.url)
            .await
            .map_err(|e| ItemStoreError::Unavailable(format!("invalid mongodb url: {e}")))?;
        let db = client.database(&config.database);
        db.run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| ItemStoreError::Unavailable(e.to_string()))?;
        Ok(Self { db })
    }

    fn collection(&self, category: &str) -> Collection<Document> {
        self.db.collection::<Document>(category)
    }
}

fn map_mongo_error(err: MongoError) -> ItemStoreError {
    match *err.kind {
        ErrorKind::Io(_) | ErrorKind::ServerSelection { .. } => {
            ItemStoreError::Unavailable(err.to_string())
        }
        _ => ItemStoreError::Query(err.to_string()),
    }
}

fn stale_filter(cutoff: DateTime<Utc>) -> Document {
    doc! {
        "isUpdating": false,
        "updatedAt": { "$lt": BsonDateTime::from_millis(cutoff.timestamp_millis()) },
    }
}

#[async_trait::async_trait]
impl ItemStore for MongoItemStore {
    async fn stale_codes(
        &self,
        category: &str,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> ItemStoreResult<Vec<String>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let pipeline = vec![
            doc! { "$match": stale_filter(cutoff) },
            doc! { "$project": { "pcode": 1 } },
            doc! { "$limit": limit as i64 },
        ];
        let mut cursor = self
            .collection(category)
            .aggregate(pipeline)
            .await
            .map_err(map_mongo_error)?;

        let mut codes = Vec::with_capacity(limit);
        while let Some(document) = cursor.try_next().await.map_err(map_mongo_error)? {
            if let Ok(pcode) = document.get_str("pcode") {
                codes.push(pcode.to_string());
            }
        }
        Ok(codes)
    }

    async fn count_stale(&self, category: &str, cutoff: DateTime<Utc>) -> ItemStoreResult<u64> {
        self.collection(category)
            .count_documents(stale_filter(cutoff))
            .await
            .map_err(map_mongo_error)
    }

    async fn mark_updating(&self, category: &str, codes: &[String]) -> ItemStoreResult<u64> {
        if codes.is_empty() {
            return Ok(0);
        }
        let result = self
            .collection(category)
            .update_many(
                doc! { "pcode": { "$in": codes.to_vec() } },
                doc! { "$set": { "isUpdating": true } },
            )
            .await
            .map_err(map_mongo_error)?;
        Ok(result.modified_count)
    }

    async fn release_flagged(&self, category: &str, codes: &[String]) -> ItemStoreResult<u64> {
        if codes.is_empty() {
            return Ok(0);
        }
        // The isUpdating guard leaves items another process has since reclaimed
        // and completed untouched.
        let result = self
            .collection(category)
            .update_many(
                doc! { "pcode": { "$in": codes.to_vec() }, "isUpdating": true },
                doc! { "$set": { "isUpdating": false } },
            )
            .await
            .map_err(map_mongo_error)?;
        Ok(result.modified_count)
    }

    async fn clear_updating(&self, category: &str) -> ItemStoreResult<u64> {
        let result = self
            .collection(category)
            .update_many(
                doc! { "isUpdating": true },
                doc! { "$set": { "isUpdating": false } },
            )
            .await
            .map_err(map_mongo_error)?;
        Ok(result.modified_count)
    }
}
