use crate::table::{compare_values, StudyTable};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;

pub fn parametric_uniques(table: &StudyTable, omit: &[&str]) -> BTreeMap<String, Vec<Value>> {
    let mut out = BTreeMap::new();
    for column in table.columns() {
        if omit.contains(&column.as_str()) {
            continue;
        }
        let mut values: Vec<Value> = table
            .rows
            .iter()
            .filter_map(|r| r.fields.get(&column))
            .filter(|v| !v.is_null())
            .cloned()
            .collect();
        values.sort_by(compare_values);
        values.dedup_by(|a, b| compare_values(a, b) == Ordering::Equal);
        if !values.is_empty() {
            out.insert(column, values);
        }
    }
    out
}

pub fn array_columns(table: &StudyTable) -> Vec<String> {
    table
        .columns()
        .into_iter()
        .filter(|c| {
            table
                .rows
                .iter()
                .any(|r| matches!(r.fields.get(c), Some(Value::Array(_))))
        })
        .collect()
}
