use crate::table::StudyTable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use sweep_core::fs::{absolute_path, atomic_write_json_pretty};
use sweep_core::{Result, SweepError};

pub const STORE_SCHEMA: &str = "store_v1";

#[derive(Debug, Serialize, Deserialize)]
struct StoreDocument {
    schema_version: String,
    updated_at: String,
    #[serde(default)]
    studies: BTreeMap<String, StudyTable>,
}

impl StoreDocument {
    fn empty() -> Self {
        Self {
            schema_version: STORE_SCHEMA.to_string(),
            updated_at: chrono::Utc::now().to_rfc3339(),
            studies: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TableStore {
    path: PathBuf,
}

impl TableStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<StoreDocument> {
        if !self.path.exists() {
            return Ok(StoreDocument::empty());
        }
        let bytes = fs::read(&self.path).map_err(|e| SweepError::io(&self.path, e))?;
        let doc: StoreDocument = serde_json::from_slice(&bytes)
            .map_err(|e| SweepError::store(&self.path, format!("parse failed: {}", e)))?;
        if doc.schema_version != STORE_SCHEMA {
            return Err(SweepError::store(
                &self.path,
                format!(
                    "unsupported schema_version `{}` (expected `{}`)",
                    doc.schema_version, STORE_SCHEMA
                ),
            ));
        }
        Ok(doc)
    }

    pub fn get(&self, key: &str) -> Result<StudyTable> {
        let mut doc = self.load()?;
        Ok(doc.studies.remove(key).unwrap_or_default())
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.load()?.studies.contains_key(key))
    }

    pub fn put(&self, key: &str, table: &StudyTable) -> Result<()> {
        let mut doc = self.load()?;
        doc.studies.insert(key.to_string(), table.clone());
        doc.updated_at = chrono::Utc::now().to_rfc3339();
        atomic_write_json_pretty(&self.path, &doc)?;
        tracing::debug!(path = %self.path.display(), key, rows = table.len(), "store entry replaced");
        Ok(())
    }

    pub fn keys(&self) -> Result<Vec<String>> {
        Ok(self.load()?.studies.into_keys().collect())
    }

    pub fn study_key(&self, root: &Path) -> String {
        let root = absolute_path(root);
        let base = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(absolute_path)
            .unwrap_or_else(|| absolute_path(Path::new(".")));
        let rel = match root.strip_prefix(&base) {
            Ok(rel) if rel.as_os_str().is_empty() => PathBuf::from("."),
            Ok(rel) => rel.to_path_buf(),
            Err(_) => root.clone(),
        };
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/")
            .replace("//", "/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::RunRecord;
    use serde_json::json;

    fn temp_root(tag: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!(
            "sweep_store_{}_{}_{}",
            tag,
            std::process::id(),
            chrono::Utc::now().timestamp_micros()
        ));
        fs::create_dir_all(&root).expect("create temp root");
        root
    }

    #[test]
    fn missing_file_and_missing_key_read_as_empty() {
        let root = temp_root("missing");
        let store = TableStore::open(root.join("results.json"));
        assert!(store.get("study").expect("get").is_empty());
        assert!(store.keys().expect("keys").is_empty());

        let mut table = StudyTable::new();
        table.upsert(RunRecord::new(root.join("000"), Default::default()));
        store.put("study", &table).expect("put");
        assert!(store.get("other").expect("get other").is_empty());
        assert!(store.contains("study").expect("contains"));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn put_replaces_entry_and_keeps_others() {
        let root = temp_root("put");
        let store = TableStore::open(root.join("results.json"));
        let mut a = StudyTable::new();
        let mut fields = crate::table::Fields::new();
        fields.insert("num".to_string(), json!(100));
        a.upsert(RunRecord::new(root.join("a/000"), fields));
        store.put("a", &a).expect("put a");
        store.put("b", &StudyTable::new()).expect("put b");

        a.rows[0].fields.insert("num".to_string(), json!(1000));
        store.put("a", &a).expect("put a again");

        let loaded = store.get("a").expect("get a");
        assert_eq!(loaded, a);
        assert_eq!(store.keys().expect("keys"), vec!["a".to_string(), "b".to_string()]);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn corrupt_or_foreign_documents_are_store_errors() {
        let root = temp_root("corrupt");
        let path = root.join("results.json");
        fs::write(&path, b"{ not json").expect("write");
        let store = TableStore::open(&path);
        assert!(matches!(store.get("x"), Err(SweepError::Store { .. })));

        fs::write(
            &path,
            br#"{"schema_version":"store_v0","updated_at":"","studies":{}}"#,
        )
        .expect("write");
        let err = store.get("x").expect_err("schema mismatch");
        assert!(err.to_string().contains("store_v0"));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn study_key_is_relative_to_store_directory() {
        let root = temp_root("key");
        let study = root.join("output").join("study");
        fs::create_dir_all(&study).expect("mkdir");
        let store = TableStore::open(root.join("output").join("results.json"));
        assert_eq!(store.study_key(&study), "study");
        assert_eq!(store.study_key(&root.join("output")), ".");

        let elsewhere = TableStore::open(study.join("results.json"));
        let key = elsewhere.study_key(&root);
        assert!(key.starts_with('/'), "absolute key expected, got {}", key);
        let _ = fs::remove_dir_all(root);
    }
}
