use anyhow::anyhow;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::{Map, Value};

/// A stored document: a JSON object addressed by `(collection, key)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub key: String,
    pub body: Value,
}

/// Equality test on one top-level field of a document body.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, body: &Value) -> bool {
        let Some(actual) = body.get(&self.field) else {
            return false;
        };
        if actual == &self.value {
            return true;
        }
        // Flat collections mix "5" and 5 for the same standard; compare textual forms.
        match (scalar_text(actual), scalar_text(&self.value)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

fn scalar_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Read/write/query capability over named collections. Injected into every consumer.
pub trait DocumentStore {
    fn get(&self, collection: &str, key: &str) -> anyhow::Result<Option<Document>>;

    /// All documents of a collection in insertion order.
    fn list(&self, collection: &str) -> anyhow::Result<Vec<Document>>;

    fn query(&self, collection: &str, filters: &[Filter]) -> anyhow::Result<Vec<Document>> {
        Ok(self
            .list(collection)?
            .into_iter()
            .filter(|d| filters.iter().all(|f| f.matches(&d.body)))
            .collect())
    }

    /// Create the document or merge `body`'s top-level fields into the existing one.
    fn upsert_merge(&self, collection: &str, key: &str, body: &Value) -> anyhow::Result<Document>;

    fn delete(&self, collection: &str, key: &str) -> anyhow::Result<bool>;
}

/// Joins the non-empty parts of a composite document id with `_`.
pub fn composite_key(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(|p| p.split_whitespace().collect::<Vec<_>>().join("-"))
        .collect::<Vec<_>>()
        .join("_")
}

pub fn merge_fields(existing: &mut Value, patch: &Value) -> anyhow::Result<()> {
    let patch = patch
        .as_object()
        .ok_or_else(|| anyhow!("document body must be a JSON object"))?;
    if !existing.is_object() {
        *existing = Value::Object(Map::new());
    }
    if let Some(obj) = existing.as_object_mut() {
        for (k, v) in patch {
            obj.insert(k.clone(), v.clone());
        }
    }
    Ok(())
}

pub struct SqliteStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl DocumentStore for SqliteStore<'_> {
    fn get(&self, collection: &str, key: &str) -> anyhow::Result<Option<Document>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT body FROM documents WHERE collection = ? AND doc_key = ?",
                (collection, key),
                |r| r.get(0),
            )
            .optional()?;
        match raw {
            Some(raw) => Ok(Some(Document {
                key: key.to_string(),
                body: serde_json::from_str(&raw)?,
            })),
            None => Ok(None),
        }
    }

    fn list(&self, collection: &str) -> anyhow::Result<Vec<Document>> {
        let mut stmt = self
            .conn
            .prepare("SELECT doc_key, body FROM documents WHERE collection = ? ORDER BY seq")?;
        let rows = stmt
            .query_map([collection], |r| {
                let key: String = r.get(0)?;
                let body: String = r.get(1)?;
                Ok((key, body))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut out = Vec::with_capacity(rows.len());
        for (key, body) in rows {
            match serde_json::from_str(&body) {
                Ok(body) => out.push(Document { key, body }),
                Err(e) => {
                    tracing::warn!(collection, key = %key, error = %e, "skipping unreadable document");
                }
            }
        }
        Ok(out)
    }

    fn upsert_merge(&self, collection: &str, key: &str, body: &Value) -> anyhow::Result<Document> {
        let mut merged = self
            .get(collection, key)?
            .map(|d| d.body)
            .unwrap_or_else(|| Value::Object(Map::new()));
        merge_fields(&mut merged, body)?;

        let now = chrono::Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO documents(collection, doc_key, body, created_at, updated_at)
             VALUES(?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(collection, doc_key)
             DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
            (collection, key, serde_json::to_string(&merged)?, now),
        )?;
        tracing::debug!(collection, key, "document merged");
        Ok(Document {
            key: key.to_string(),
            body: merged,
        })
    }

    fn delete(&self, collection: &str, key: &str) -> anyhow::Result<bool> {
        let n = self.conn.execute(
            "DELETE FROM documents WHERE collection = ? AND doc_key = ?",
            (collection, key),
        )?;
        Ok(n > 0)
    }
}

#[cfg(test)]
pub mod memory {
    use super::*;
    use std::cell::RefCell;

    /// In-process store for unit tests.
    #[derive(Default)]
    pub struct MemoryStore {
        docs: RefCell<Vec<(String, Document)>>,
    }

    impl MemoryStore {
        pub fn with(collection: &str, bodies: Vec<Value>) -> Self {
            let store = Self::default();
            for (i, body) in bodies.into_iter().enumerate() {
                store
                    .upsert_merge(collection, &format!("{collection}-{i}"), &body)
                    .expect("seed document");
            }
            store
        }

        pub fn seed(&self, collection: &str, bodies: Vec<Value>) {
            let start = self.docs.borrow().len();
            for (i, body) in bodies.into_iter().enumerate() {
                self.upsert_merge(collection, &format!("{collection}-{}", start + i), &body)
                    .expect("seed document");
            }
        }
    }

    impl DocumentStore for MemoryStore {
        fn get(&self, collection: &str, key: &str) -> anyhow::Result<Option<Document>> {
            Ok(self
                .docs
                .borrow()
                .iter()
                .find(|(c, d)| c == collection && d.key == key)
                .map(|(_, d)| d.clone()))
        }

        fn list(&self, collection: &str) -> anyhow::Result<Vec<Document>> {
            Ok(self
                .docs
                .borrow()
                .iter()
                .filter(|(c, _)| c == collection)
                .map(|(_, d)| d.clone())
                .collect())
        }

        fn upsert_merge(
            &self,
            collection: &str,
            key: &str,
            body: &Value,
        ) -> anyhow::Result<Document> {
            let mut docs = self.docs.borrow_mut();
            if let Some((_, d)) = docs
                .iter_mut()
                .find(|(c, d)| c == collection && d.key == key)
            {
                merge_fields(&mut d.body, body)?;
                return Ok(d.clone());
            }
            let mut fresh = Value::Object(Map::new());
            merge_fields(&mut fresh, body)?;
            let doc = Document {
                key: key.to_string(),
                body: fresh,
            };
            docs.push((collection.to_string(), doc.clone()));
            Ok(doc)
        }

        fn delete(&self, collection: &str, key: &str) -> anyhow::Result<bool> {
            let mut docs = self.docs.borrow_mut();
            let before = docs.len();
            docs.retain(|(c, d)| !(c == collection && d.key == key));
            Ok(docs.len() != before)
        }
    }

    /// Fails every read; used for the notification path.
    pub struct FailingStore;

    impl DocumentStore for FailingStore {
        fn get(&self, _collection: &str, _key: &str) -> anyhow::Result<Option<Document>> {
            Err(anyhow!("store unreachable"))
        }

        fn list(&self, _collection: &str) -> anyhow::Result<Vec<Document>> {
            Err(anyhow!("store unreachable"))
        }

        fn upsert_merge(
            &self,
            _collection: &str,
            _key: &str,
            _body: &Value,
        ) -> anyhow::Result<Document> {
            Err(anyhow!("store unreachable"))
        }

        fn delete(&self, _collection: &str, _key: &str) -> anyhow::Result<bool> {
            Err(anyhow!("store unreachable"))
        }
    }
}
