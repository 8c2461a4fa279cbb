use anyhow::anyhow;
use async_trait::async_trait;
use bson::doc;
use chrono::NaiveDate;
use futures_util::TryStreamExt;
use mongodb::{
    Client, IndexModel,
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::{ClientOptions, IndexOptions, ServerApi, ServerApiVersion},
};
use std::sync::Arc;
use thiserror::Error;
use url::Url;

use crate::models::UrlRecord;

const DATABASE: &str = "db";
const COLLECTION: &str = "urls";

/// MongoDB duplicate-key error code.
const DUPLICATE_KEY: i32 = 11000;

/// Rounds `record_visit` is allowed to lose to concurrent visitors
/// before giving up.
const VISIT_UPDATE_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("a record with this code already exists")]
    DuplicateCode,
    #[error("this long URL already has a record")]
    DuplicateLongUrl,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<MongoError> for StoreError {
    fn from(err: MongoError) -> Self {
        Self::Backend(err.into())
    }
}

pub type SharedStore = Arc<dyn UrlStore>;

/// Injectable handle to the URL collection.
///
/// Implementations must make `insert` a conditional create and keep
/// `record_visit` atomic with respect to concurrent visits on the same
/// code, so callers never run read-modify-write cycles of their own.
#[async_trait]
pub trait UrlStore: Send + Sync {
    /// Exact-match lookup on the stored serialized long URL.
    async fn find_by_long_url(&self, long_url: &Url) -> Result<Option<UrlRecord>, StoreError>;

    /// Creates the record, failing with [`StoreError::DuplicateCode`] or
    /// [`StoreError::DuplicateLongUrl`] instead of overwriting.
    async fn insert(&self, record: &UrlRecord) -> Result<(), StoreError>;

    /// Counts one visit against `code` on `day` and returns the long URL,
    /// or `None` without writing when the code is unknown.
    async fn record_visit(&self, code: &str, day: NaiveDate) -> Result<Option<Url>, StoreError>;

    /// Every record, in the store's native enumeration order.
    async fn list(&self) -> Result<Vec<UrlRecord>, StoreError>;
}

#[derive(Clone)]
pub struct Database {
    client: Client,
}

impl Database {
    pub async fn new(connection_string: &str) -> Result<Self, MongoError> {
        let mut client_options = ClientOptions::parse(connection_string).await?;
        let server_api = ServerApi::builder().version(ServerApiVersion::V1).build();
        client_options.server_api = Some(server_api);

        let client = Client::with_options(client_options)?;

        let database = Self { client };
        database.ensure_indexes().await?;
        Ok(database)
    }

    fn urls(&self) -> mongodb::Collection<UrlRecord> {
        self.client.database(DATABASE).collection(COLLECTION)
    }

    /// The unique index on `longUrl` is what turns `insert` into a
    /// conditional create; `_id` already covers code uniqueness.
    async fn ensure_indexes(&self) -> Result<(), MongoError> {
        let index = IndexModel::builder()
            .keys(doc! { "longUrl": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        self.urls().create_index(index).await?;
        Ok(())
    }
}

fn classify_write(err: MongoError) -> StoreError {
    if let ErrorKind::Write(WriteFailure::WriteError(write_error)) = &*err.kind {
        if write_error.code == DUPLICATE_KEY {
            return if write_error.message.contains("longUrl") {
                StoreError::DuplicateLongUrl
            } else {
                StoreError::DuplicateCode
            };
        }
    }
    err.into()
}

#[async_trait]
impl UrlStore for Database {
    async fn find_by_long_url(&self, long_url: &Url) -> Result<Option<UrlRecord>, StoreError> {
        let record = self
            .urls()
            .find_one(doc! { "longUrl": long_url.as_str() })
            .await?;

        Ok(record)
    }

    async fn insert(&self, record: &UrlRecord) -> Result<(), StoreError> {
        self.urls().insert_one(record).await.map_err(classify_write)?;

        Ok(())
    }

    async fn record_visit(&self, code: &str, day: NaiveDate) -> Result<Option<Url>, StoreError> {
        let urls = self.urls();
        let day = day.to_string();

        // Two targeted updates instead of a read-modify-write: `$inc` into
        // the existing bucket for the day, else `$inc` the total while
        // `$push`ing a fresh bucket. Each update is atomic on the server,
        // so concurrent visits cannot overwrite each other's counts.
        for _ in 0..VISIT_UPDATE_ATTEMPTS {
            let existing_bucket = urls
                .find_one_and_update(
                    doc! { "_id": code, "analytics.date": day.as_str() },
                    doc! { "$inc": { "visits": 1, "analytics.$.visits": 1 } },
                )
                .await?;
            if let Some(record) = existing_bucket {
                return Ok(Some(record.long_url));
            }

            let fresh_bucket = urls
                .find_one_and_update(
                    doc! { "_id": code, "analytics.date": { "$ne": day.as_str() } },
                    doc! {
                        "$inc": { "visits": 1 },
                        "$push": { "analytics": { "date": day.as_str(), "visits": 1 } },
                    },
                )
                .await?;
            if let Some(record) = fresh_bucket {
                return Ok(Some(record.long_url));
            }

            // Neither filter matched: the code is unknown, or a concurrent
            // visit created the day's bucket between the two updates.
            if urls.find_one(doc! { "_id": code }).await?.is_none() {
                return Ok(None);
            }
        }

        Err(StoreError::Backend(anyhow!(
            "gave up updating visit counts for {code} after {VISIT_UPDATE_ATTEMPTS} rounds"
        )))
    }

    async fn list(&self) -> Result<Vec<UrlRecord>, StoreError> {
        let mut cursor = self.urls().find(doc! {}).await?;
        let mut records = Vec::new();
        while let Some(record) = cursor.try_next().await? {
            records.push(record);
        }

        Ok(records)
    }
}

/// In-memory stand-in used by the tests; mirrors the conditional-create
/// and visit semantics of the MongoDB implementation.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryStore {
    records: std::sync::Mutex<Vec<UrlRecord>>,
}

#[cfg(test)]
#[async_trait]
impl UrlStore for MemoryStore {
    async fn find_by_long_url(&self, long_url: &Url) -> Result<Option<UrlRecord>, StoreError> {
        let records = self.records.lock().unwrap();
        Ok(records
            .iter()
            .find(|record| record.long_url == *long_url)
            .cloned())
    }

    async fn insert(&self, record: &UrlRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap();
        if records.iter().any(|existing| existing.code == record.code) {
            return Err(StoreError::DuplicateCode);
        }
        if records
            .iter()
            .any(|existing| existing.long_url == record.long_url)
        {
            return Err(StoreError::DuplicateLongUrl);
        }
        records.push(record.clone());
        Ok(())
    }

    async fn record_visit(&self, code: &str, day: NaiveDate) -> Result<Option<Url>, StoreError> {
        let mut records = self.records.lock().unwrap();
        match records.iter_mut().find(|record| record.code == code) {
            Some(record) => {
                record.apply_visit(day);
                Ok(Some(record.long_url.clone()))
            }
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<UrlRecord>, StoreError> {
        Ok(self.records.lock().unwrap().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DayVisits;

    fn record(code: &str, long_url: &str) -> UrlRecord {
        UrlRecord::new(code.to_owned(), Url::parse(long_url).unwrap())
    }

    fn day(text: &str) -> NaiveDate {
        text.parse().unwrap()
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_code() {
        let store = MemoryStore::default();
        store
            .insert(&record("abc123", "https://example.com/a"))
            .await
            .unwrap();

        let err = store
            .insert(&record("abc123", "https://example.com/b"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateCode));
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_long_url() {
        let store = MemoryStore::default();
        store
            .insert(&record("abc123", "https://example.com/a"))
            .await
            .unwrap();

        let err = store
            .insert(&record("xyz789", "https://example.com/a"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateLongUrl));
    }

    #[tokio::test]
    async fn record_visit_returns_long_url_and_counts() {
        let store = MemoryStore::default();
        store
            .insert(&record("abc123", "https://example.com/a"))
            .await
            .unwrap();

        let target = store
            .record_visit("abc123", day("2026-08-07"))
            .await
            .unwrap();
        assert_eq!(
            target,
            Some(Url::parse("https://example.com/a").unwrap())
        );

        let records = store.list().await.unwrap();
        assert_eq!(records[0].visits, 1);
    }

    #[tokio::test]
    async fn record_visit_unknown_code_leaves_store_untouched() {
        let store = MemoryStore::default();
        store
            .insert(&record("abc123", "https://example.com/a"))
            .await
            .unwrap();

        let target = store
            .record_visit("ZZZZZZ", day("2026-08-07"))
            .await
            .unwrap();
        assert_eq!(target, None);

        let records = store.list().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].visits, 0);
        assert!(records[0].analytics.is_empty());
    }

    #[tokio::test]
    async fn visits_on_two_days_build_two_buckets() {
        let store = MemoryStore::default();
        store
            .insert(&record("abc123", "https://example.com/a"))
            .await
            .unwrap();

        store
            .record_visit("abc123", day("2026-08-07"))
            .await
            .unwrap();
        store
            .record_visit("abc123", day("2026-08-08"))
            .await
            .unwrap();

        let records = store.list().await.unwrap();
        assert_eq!(records[0].visits, 2);
        assert_eq!(
            records[0].analytics,
            vec![
                DayVisits {
                    date: day("2026-08-07"),
                    visits: 1,
                },
                DayVisits {
                    date: day("2026-08-08"),
                    visits: 1,
                },
            ]
        );
    }
}
