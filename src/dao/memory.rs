use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::error::Error;

use super::Sink;

/// In-process store keyed by full leaf path. Reading an inner path
/// assembles the subtree below it; reading below a leaf walks into its
/// JSON.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: RwLock<BTreeMap<String, Value>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> BTreeMap<String, Value> {
        self.entries.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

fn normalize(path: &str) -> String {
    path.trim_matches('/').to_owned()
}

fn is_below(key: &str, prefix: &str) -> bool {
    prefix.is_empty()
        || key
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

fn insert_nested(root: &mut Map<String, Value>, rest: &str, value: Value) {
    match rest.split_once('/') {
        None => {
            root.insert(rest.to_owned(), value);
        },
        Some((head, tail)) => {
            let child = root
                .entry(head.to_owned())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(child) = child {
                insert_nested(child, tail, value);
            }
        },
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn get(&self, path: &str) -> Result<Option<Value>, Error> {
        let path = normalize(path);
        let entries = self.entries.read().await;

        if let Some(value) = entries.get(&path) {
            return Ok(Some(value.clone()));
        }

        // The path may point inside a stored document.
        if let Some((key, value)) = entries.iter().find(|(k, _)| is_below(&path, k)) {
            let rest = if key.is_empty() {
                path.as_str()
            } else {
                &path[key.len() + 1..]
            };
            return Ok(rest
                .split('/')
                .try_fold(value, |node, segment| node.get(segment))
                .cloned());
        }

        let mut tree = Map::new();
        for (key, value) in entries.iter().filter(|(k, _)| is_below(k, &path)) {
            let rest = if path.is_empty() {
                key.as_str()
            } else {
                &key[path.len() + 1..]
            };
            insert_nested(&mut tree, rest, value.clone());
        }

        if tree.is_empty() {
            return Ok(None);
        }
        Ok(Some(Value::Object(tree)))
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), Error> {
        let path = normalize(path);
        let mut entries = self.entries.write().await;
        entries.retain(|key, _| !is_below(key, &path) && *key != path);
        // A parent leaf is shadowed by the new child.
        let parents: Vec<String> = entries
            .keys()
            .filter(|key| is_below(&path, key))
            .cloned()
            .collect();
        for parent in parents {
            entries.remove(&parent);
        }
        entries.insert(path, value);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), Error> {
        let path = normalize(path);
        let mut entries = self.entries.write().await;
        entries.retain(|key, _| !is_below(key, &path) && *key != path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_nested_read() {
        let sink = MemorySink::new();
        sink.set("users/0xa/UNI_V2/snaps/0xp/1", json!({"block": 1}))
            .await
            .unwrap();
        sink.set("users/0xa/UNI_V2/snaps/0xp/2", json!({"block": 2}))
            .await
            .unwrap();

        let value = sink.get("users/0xa/UNI_V2/snaps").await.unwrap();
        assert_eq!(
            value,
            Some(json!({"0xp": {"1": {"block": 1}, "2": {"block": 2}}}))
        );
        assert_eq!(sink.get("users/0xb").await.unwrap(), None);
        assert_eq!(sink.len().await, 2);
    }

    #[tokio::test]
    async fn test_set_replaces_subtree() {
        let sink = MemorySink::new();
        sink.set("poolSnaps/UNI_V2/0xp/a", json!(1)).await.unwrap();
        sink.set("poolSnaps/UNI_V2/0xp", json!({"id": "0xp"}))
            .await
            .unwrap();

        assert_eq!(sink.len().await, 1);
        assert_eq!(
            sink.get("poolSnaps/UNI_V2/0xp").await.unwrap(),
            Some(json!({"id": "0xp"}))
        );
    }

    #[tokio::test]
    async fn test_read_inside_stored_document() {
        let sink = MemorySink::new();
        sink.set("lastUpdate/UNI_V2", json!({"snaps": 5, "pools": {"at": 7}}))
            .await
            .unwrap();

        assert_eq!(sink.get("lastUpdate/UNI_V2/snaps").await.unwrap(), Some(json!(5)));
        assert_eq!(sink.get("/lastUpdate/UNI_V2/pools/at").await.unwrap(), Some(json!(7)));
        assert_eq!(sink.get("lastUpdate/UNI_V2/yields").await.unwrap(), None);
        assert_eq!(sink.get("lastUpdate/UNI_V2/snaps/x").await.unwrap(), None);
        assert_eq!(sink.get("lastUpdate/UNI").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_prefix_only() {
        let sink = MemorySink::new();
        sink.set("lastUpdate/UNI_V2/snaps", json!(1)).await.unwrap();
        sink.set("lastUpdate/UNI_V2/snapsX", json!(2)).await.unwrap();
        sink.delete("lastUpdate/UNI_V2/snaps").await.unwrap();

        assert_eq!(sink.get("lastUpdate/UNI_V2/snaps").await.unwrap(), None);
        assert_eq!(
            sink.get("lastUpdate/UNI_V2/snapsX").await.unwrap(),
            Some(json!(2))
        );
    }
}
