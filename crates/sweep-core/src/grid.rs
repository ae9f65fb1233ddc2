use crate::error::{Result, SweepError};
use crate::grammar::{check_grouped_lengths, ParameterAxis};
use crate::value::AxisValue;
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Assignment {
    entries: Vec<(String, AxisValue)>,
}

impl Assignment {
    pub fn get(&self, key: &str) -> Option<&AxisValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AxisValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for (k, v) in &self.entries {
            map.insert(k.clone(), v.to_json());
        }
        Value::Object(map)
    }
}

impl FromIterator<(String, AxisValue)> for Assignment {
    fn from_iter<T: IntoIterator<Item = (String, AxisValue)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunConfiguration {
    pub ordinal: usize,
    pub assignment: Assignment,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridSummary {
    pub axis_count: usize,
    pub grouped_keys: Vec<String>,
    pub grouped_len: usize,
    pub configurations: usize,
}

enum Dimension {
    Free(usize),
    Group(Vec<usize>),
}

impl Dimension {
    fn len(&self, axes: &[ParameterAxis]) -> usize {
        match self {
            Dimension::Free(i) => axes[*i].len(),
            Dimension::Group(members) => axes[members[0]].len(),
        }
    }
}

fn dimensions(axes: &[ParameterAxis]) -> Vec<Dimension> {
    let members: Vec<usize> = axes
        .iter()
        .enumerate()
        .filter(|(_, a)| a.grouped)
        .map(|(i, _)| i)
        .collect();
    let mut dims = Vec::new();
    for (i, axis) in axes.iter().enumerate() {
        if !axis.grouped {
            dims.push(Dimension::Free(i));
        } else if members.first() == Some(&i) {
            dims.push(Dimension::Group(members.clone()));
        }
    }
    dims
}

fn validate(axes: &[ParameterAxis]) -> Result<()> {
    if let Some(empty) = axes.iter().find(|a| a.is_empty()) {
        return Err(SweepError::configuration(&empty.key, "axis has no values"));
    }
    check_grouped_lengths(axes)
}

pub fn summarize_grid(axes: &[ParameterAxis]) -> Result<GridSummary> {
    validate(axes)?;
    let grouped_keys: Vec<String> = axes
        .iter()
        .filter(|a| a.grouped)
        .map(|a| a.key.clone())
        .collect();
    let grouped_len = axes.iter().find(|a| a.grouped).map(|a| a.len()).unwrap_or(1);
    let configurations: usize = dimensions(axes).iter().map(|d| d.len(axes)).product();
    Ok(GridSummary {
        axis_count: axes.len(),
        grouped_keys,
        grouped_len,
        configurations,
    })
}

pub fn generate_grid(axes: &[ParameterAxis]) -> Result<Vec<RunConfiguration>> {
    validate(axes)?;
    let dims = dimensions(axes);
    let lens: Vec<usize> = dims.iter().map(|d| d.len(axes)).collect();
    let total: usize = lens.iter().product();

    let mut out = Vec::with_capacity(total);
    let mut selected = vec![0usize; axes.len()];
    for ordinal in 0..total {
        let mut rem = ordinal;
        for (dim, len) in dims.iter().zip(lens.iter()).rev() {
            let idx = rem % len;
            rem /= len;
            match dim {
                Dimension::Free(i) => selected[*i] = idx,
                Dimension::Group(members) => {
                    for i in members {
                        selected[*i] = idx;
                    }
                }
            }
        }
        let assignment = axes
            .iter()
            .zip(selected.iter())
            .map(|(axis, idx)| (axis.key.clone(), axis.values[*idx].clone()))
            .collect();
        out.push(RunConfiguration {
            ordinal,
            assignment,
        });
    }
    Ok(out)
}
