use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

pub type Fields = BTreeMap<String, Value>;

pub const RUN_DIR_COLUMN: &str = "run_dir";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_dir: PathBuf,
    #[serde(default)]
    pub fields: Fields,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

impl RunRecord {
    pub fn new(run_dir: impl Into<PathBuf>, fields: Fields) -> Self {
        Self {
            run_dir: run_dir.into(),
            fields,
            fingerprint: None,
        }
    }

    pub fn value(&self, column: &str) -> Option<Value> {
        match self.fields.get(column) {
            Some(v) => Some(v.clone()),
            None if column == RUN_DIR_COLUMN => {
                Some(Value::String(self.run_dir.display().to_string()))
            }
            None => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudyTable {
    #[serde(default)]
    pub rows: Vec<RunRecord>,
}

impl StudyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, run_dir: &Path) -> Option<&RunRecord> {
        self.rows.iter().find(|r| r.run_dir == run_dir)
    }

    pub fn upsert(&mut self, record: RunRecord) -> bool {
        match self.rows.iter_mut().find(|r| r.run_dir == record.run_dir) {
            Some(existing) => {
                *existing = record;
                true
            }
            None => {
                self.rows.push(record);
                false
            }
        }
    }

    pub fn remove(&mut self, run_dir: &Path) -> Option<RunRecord> {
        let idx = self.rows.iter().position(|r| r.run_dir == run_dir)?;
        Some(self.rows.remove(idx))
    }

    pub fn columns(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for row in &self.rows {
            for key in row.fields.keys() {
                if seen.insert(key.as_str()) {
                    out.push(key.clone());
                }
            }
        }
        out
    }

    pub fn column(&self, name: &str) -> Vec<Option<Value>> {
        self.rows.iter().map(|r| r.value(name)).collect()
    }

    pub fn set_column(&mut self, name: &str, values: Vec<Option<Value>>) {
        let mut values = values.into_iter();
        for row in &mut self.rows {
            match values.next().flatten() {
                Some(v) => {
                    row.fields.insert(name.to_string(), v);
                }
                None => {
                    row.fields.remove(name);
                }
            }
        }
    }

    pub fn derive_column<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&RunRecord) -> Option<Value>,
    {
        for row in &mut self.rows {
            match f(row) {
                Some(v) => {
                    row.fields.insert(name.to_string(), v);
                }
                None => {
                    row.fields.remove(name);
                }
            }
        }
    }

    pub fn sort_by(&mut self, keys: &[String]) {
        if keys.is_empty() {
            return;
        }
        self.rows.sort_by(|a, b| {
            for key in keys {
                let ord = match (a.value(key), b.value(key)) {
                    (None, None) => Ordering::Equal,
                    (None, Some(_)) => Ordering::Less,
                    (Some(_), None) => Ordering::Greater,
                    (Some(x), Some(y)) => compare_values(&x, &y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
    }
}

fn rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            match (x.as_i64(), y.as_i64()) {
                (Some(i), Some(j)) => i.cmp(&j),
                _ => {
                    let fx = x.as_f64().unwrap_or(f64::NAN);
                    let fy = y.as_f64().unwrap_or(f64::NAN);
                    fx.total_cmp(&fy)
                }
            }
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (i, j) in x.iter().zip(y.iter()) {
                let ord = compare_values(i, j);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(_), Value::Object(_)) => a.to_string().cmp(&b.to_string()),
        _ => rank(a).cmp(&rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(dir: &str, fields: Value) -> RunRecord {
        let fields = fields
            .as_object()
            .expect("object")
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        RunRecord::new(dir, fields)
    }

    #[test]
    fn upsert_replaces_rows_in_place() {
        let mut table = StudyTable::new();
        assert!(!table.upsert(record("/s/000", json!({"num": 1, "old": true}))));
        assert!(!table.upsert(record("/s/001", json!({"num": 2}))));
        assert!(table.upsert(record("/s/000", json!({"num": 10}))));
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows[0].run_dir, PathBuf::from("/s/000"));
        assert_eq!(table.rows[0].fields.get("num"), Some(&json!(10)));
        assert!(table.rows[0].fields.get("old").is_none(), "stale column survived");
        assert_eq!(table.columns(), vec!["num".to_string()]);
    }

    #[test]
    fn remove_drops_only_the_named_row() {
        let mut table = StudyTable::new();
        table.upsert(record("/s/000", json!({"num": 1})));
        table.upsert(record("/s/001", json!({"num": 2})));
        let removed = table.remove(Path::new("/s/000")).expect("row removed");
        assert_eq!(removed.fields.get("num"), Some(&json!(1)));
        assert!(table.remove(Path::new("/s/000")).is_none());
        assert_eq!(table.len(), 1);
        assert!(table.get(Path::new("/s/001")).is_some());
    }

    #[test]
    fn set_column_assigns_in_row_order_and_clears_the_tail() {
        let mut table = StudyTable::new();
        table.upsert(record("/s/000", json!({"seed": 7})));
        table.upsert(record("/s/001", json!({"seed": 8})));
        table.upsert(record("/s/002", json!({"seed": 9})));
        table.set_column("seed", vec![Some(json!(1)), None]);
        assert_eq!(table.column("seed"), vec![Some(json!(1)), None, None]);
        assert!(!table.rows[2].fields.contains_key("seed"));

        table.set_column(
            "win_rate",
            vec![Some(json!(0.5)), Some(json!(0.25)), Some(json!(1.0)), Some(json!(9.0))],
        );
        assert_eq!(
            table.column("win_rate"),
            vec![Some(json!(0.5)), Some(json!(0.25)), Some(json!(1.0))]
        );
    }

    #[test]
    fn columns_are_the_union_of_fields() {
        let mut table = StudyTable::new();
        table.upsert(record("/a", json!({"num": 1})));
        table.upsert(record("/b", json!({"num": 2, "seed": 5})));
        assert_eq!(table.columns(), vec!["num".to_string(), "seed".to_string()]);
        assert_eq!(table.column("seed"), vec![None, Some(json!(5))]);
    }

    #[test]
    fn sorting_handles_missing_values_and_run_dir() {
        let mut table = StudyTable::new();
        table.upsert(record("/c", json!({"num": 3, "seed": 1})));
        table.upsert(record("/a", json!({"num": 1.5})));
        table.upsert(record("/b", json!({"num": 3, "seed": 0})));
        table.sort_by(&["num".to_string(), "seed".to_string()]);
        let dirs: Vec<&Path> = table.rows.iter().map(|r| r.run_dir.as_path()).collect();
        assert_eq!(dirs, vec![Path::new("/a"), Path::new("/b"), Path::new("/c")]);

        table.sort_by(&["seed".to_string()]);
        assert_eq!(table.rows[0].run_dir, PathBuf::from("/a"));

        table.sort_by(&[RUN_DIR_COLUMN.to_string()]);
        assert_eq!(table.rows[2].run_dir, PathBuf::from("/c"));
    }

    #[test]
    fn derive_column_adds_and_clears() {
        let mut table = StudyTable::new();
        table.upsert(record("/a", json!({"x": 2})));
        table.upsert(record("/b", json!({"y": 1})));
        table.derive_column("x2", |r| {
            r.fields.get("x").and_then(Value::as_i64).map(|x| json!(x * 2))
        });
        assert_eq!(table.rows[0].fields.get("x2"), Some(&json!(4)));
        assert!(table.rows[1].fields.get("x2").is_none());
    }

    #[test]
    fn value_order_is_total() {
        assert_eq!(compare_values(&json!(2), &json!(10)), Ordering::Less);
        assert_eq!(compare_values(&json!(2.5), &json!(2)), Ordering::Greater);
        assert_eq!(compare_values(&json!(true), &json!(0)), Ordering::Less);
        assert_eq!(compare_values(&json!("b"), &json!("a")), Ordering::Greater);
        assert_eq!(compare_values(&json!([1, 2]), &json!([1, 2, 0])), Ordering::Less);
    }
}
