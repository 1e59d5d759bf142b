use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::error::{CronError, Result};

/// Sort direction for `find_many`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// A filtered, paged, optionally sorted lookup.
#[derive(Debug, Clone, Default)]
pub struct FindQuery {
    /// Field equality constraints, all of which must hold.
    pub filter: Map<String, Value>,
    pub skip: usize,
    pub limit: Option<usize>,
    pub sort: Option<(String, SortOrder)>,
}

impl FindQuery {
    pub fn filtered(filter: Map<String, Value>) -> Self {
        FindQuery {
            filter,
            ..Default::default()
        }
    }

    pub fn with_sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort = Some((field.into(), order));
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }
}

/// The document store cron tasks read their backlog from and write
/// progress back to. Documents are plain JSON objects keyed by an `id`
/// field.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Fetch one document by id, failing when absent.
    async fn get(&self, collection: &str, id: &str) -> Result<Map<String, Value>>;

    /// Fetch the first document matching the filter, failing when none
    /// does.
    async fn find_one(&self, collection: &str, filter: &Map<String, Value>)
        -> Result<Map<String, Value>>;

    async fn find_many(&self, collection: &str, query: &FindQuery)
        -> Result<Vec<Map<String, Value>>>;

    /// Insert or replace a document by its `id` field.
    async fn save(&self, collection: &str, doc: Map<String, Value>) -> Result<()>;

    async fn ping(&self) -> Result<()>;
}

/// In-memory document store for tests and local runs.
#[derive(Default)]
pub struct MemorySource {
    collections: RwLock<HashMap<String, Vec<Map<String, Value>>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }
}

fn matches_filter(doc: &Map<String, Value>, filter: &Map<String, Value>) -> bool {
    filter
        .iter()
        .all(|(key, value)| doc.get(key) == Some(value))
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => a
            .as_str()
            .unwrap_or_default()
            .cmp(b.as_str().unwrap_or_default()),
    }
}

#[async_trait]
impl DataSource for MemorySource {
    async fn get(&self, collection: &str, id: &str) -> Result<Map<String, Value>> {
        let mut filter = Map::new();
        filter.insert("id".to_string(), Value::String(id.to_string()));
        self.find_one(collection, &filter).await
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: &Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        let collections = self.collections.read();
        collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|doc| matches_filter(doc, filter)))
            .cloned()
            .ok_or_else(|| CronError::NotFound {
                collection: collection.to_string(),
            })
    }

    async fn find_many(
        &self,
        collection: &str,
        query: &FindQuery,
    ) -> Result<Vec<Map<String, Value>>> {
        let collections = self.collections.read();
        let mut docs: Vec<Map<String, Value>> = collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|doc| matches_filter(doc, &query.filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some((field, order)) = &query.sort {
            docs.sort_by(|a, b| {
                let ordering = compare_values(
                    a.get(field).unwrap_or(&Value::Null),
                    b.get(field).unwrap_or(&Value::Null),
                );
                match order {
                    SortOrder::Asc => ordering,
                    SortOrder::Desc => ordering.reverse(),
                }
            });
        }

        let docs = docs.into_iter().skip(query.skip);
        Ok(match query.limit {
            Some(limit) => docs.take(limit).collect(),
            None => docs.collect(),
        })
    }

    async fn save(&self, collection: &str, doc: Map<String, Value>) -> Result<()> {
        let mut collections = self.collections.write();
        let docs = collections.entry(collection.to_string()).or_default();
        if let Some(id) = doc.get("id") {
            if let Some(existing) = docs.iter_mut().find(|d| d.get("id") == Some(id)) {
                *existing = doc;
                return Ok(());
            }
        }
        docs.push(doc);
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Pages through a `find_many` result set in batches.
///
/// The skip offset advances by the batch size, so a processing loop that
/// mutates documents out of the filtered set should re-run the query
/// from a fresh cursor rather than continue this one.
pub struct Cursor {
    source: Arc<dyn DataSource>,
    collection: String,
    query: FindQuery,
    batch_size: usize,
    offset: usize,
    exhausted: bool,
}

impl Cursor {
    pub fn new(
        source: Arc<dyn DataSource>,
        collection: impl Into<String>,
        query: FindQuery,
        batch_size: usize,
    ) -> Self {
        Cursor {
            source,
            collection: collection.into(),
            query,
            batch_size,
            offset: 0,
            exhausted: false,
        }
    }

    /// Fetch the next batch; `None` once the result set is drained.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<Map<String, Value>>>> {
        if self.exhausted {
            return Ok(None);
        }

        let mut query = self.query.clone();
        query.skip = self.query.skip + self.offset;
        query.limit = Some(self.batch_size);

        let docs = self.source.find_many(&self.collection, &query).await?;
        if docs.is_empty() {
            self.exhausted = true;
            return Ok(None);
        }

        self.offset += docs.len();
        if docs.len() < self.batch_size {
            self.exhausted = true;
        }
        Ok(Some(docs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, status: &str, rank: i64) -> Map<String, Value> {
        let mut doc = Map::new();
        doc.insert("id".to_string(), json!(id));
        doc.insert("status".to_string(), json!(status));
        doc.insert("rank".to_string(), json!(rank));
        doc
    }

    async fn seeded() -> MemorySource {
        let source = MemorySource::new();
        source.save("cards", doc("a", "pending", 3)).await.unwrap();
        source.save("cards", doc("b", "done", 1)).await.unwrap();
        source.save("cards", doc("c", "pending", 2)).await.unwrap();
        source
    }

    #[tokio::test]
    async fn test_get_and_find_one() {
        let source = seeded().await;
        let found = source.get("cards", "b").await.unwrap();
        assert_eq!(found["status"], json!("done"));

        let err = source.get("cards", "zzz").await.unwrap_err();
        assert!(matches!(err, CronError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_find_many_filters_and_sorts() {
        let source = seeded().await;
        let query = FindQuery::filtered({
            let mut f = Map::new();
            f.insert("status".to_string(), json!("pending"));
            f
        })
        .with_sort("rank", SortOrder::Desc);

        let docs = source.find_many("cards", &query).await.unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_save_replaces_by_id() {
        let source = seeded().await;
        source.save("cards", doc("a", "done", 3)).await.unwrap();
        assert_eq!(source.len("cards"), 3);
        assert_eq!(source.get("cards", "a").await.unwrap()["status"], json!("done"));
    }

    #[tokio::test]
    async fn test_cursor_pages_through_results() {
        let source = Arc::new(MemorySource::new());
        for i in 0..5 {
            source
                .save("cards", doc(&format!("d{i}"), "pending", i))
                .await
                .unwrap();
        }

        let query = FindQuery::default().with_sort("rank", SortOrder::Asc);
        let mut cursor = Cursor::new(source, "cards", query, 2);

        let mut seen = Vec::new();
        while let Some(batch) = cursor.next_batch().await.unwrap() {
            assert!(batch.len() <= 2);
            seen.extend(batch.into_iter().map(|d| d["id"].as_str().unwrap().to_string()));
        }
        assert_eq!(seen, vec!["d0", "d1", "d2", "d3", "d4"]);
    }
}
