use crate::error::{Result, SweepError};
use crate::grid::{Assignment, RunConfiguration};
use crate::report::Reporter;
use crate::value::AxisValue;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub command_template: String,
    #[serde(default)]
    pub optional_fragments: Vec<OptionalFragment>,
    pub output_dir_key: String,
    pub completion_marker: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionalFragment {
    pub key: String,
    pub fragment: String,
}

impl OptionalFragment {
    pub fn new(key: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            fragment: fragment.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl CommandTemplate {
    pub fn compile(source: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for n in chars.by_ref() {
                        if n == '}' {
                            closed = true;
                            break;
                        }
                        name.push(n);
                    }
                    if !closed || name.trim().is_empty() {
                        return Err(SweepError::configuration(
                            source,
                            "unterminated or empty `{}` placeholder",
                        ));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder(name.trim().to_string()));
                }
                '}' => {
                    return Err(SweepError::configuration(
                        source,
                        "unmatched `}` (write `}}` for a literal brace)",
                    ))
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Placeholder(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    pub fn references(&self, name: &str) -> bool {
        self.placeholders().any(|p| p == name)
    }

    pub fn render<F>(&self, lookup: F) -> Result<String>
    where
        F: Fn(&str) -> Result<Option<String>>,
    {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(name) => match lookup(name)? {
                    Some(value) => out.push_str(&value),
                    None => {
                        return Err(SweepError::configuration(
                            name,
                            format!("unknown template placeholder in `{}`", self.source),
                        ))
                    }
                },
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MaterializedRun {
    pub configuration: RunConfiguration,
    pub output_dir: PathBuf,
    pub command: String,
}

impl MaterializedRun {
    pub fn ordinal(&self) -> usize {
        self.configuration.ordinal
    }
}

pub struct Materializer {
    base: CommandTemplate,
    fragments: Vec<(String, CommandTemplate)>,
    output_dir_key: String,
    script: Option<PathBuf>,
}

impl Materializer {
    pub fn new(info: &RunInfo, script: Option<&Path>) -> Result<Self> {
        let collapsed = info
            .command_template
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        let base = CommandTemplate::compile(&collapsed)?;
        let mut fragments: Vec<(String, CommandTemplate)> =
            Vec::with_capacity(info.optional_fragments.len());
        for opt in &info.optional_fragments {
            if fragments.iter().any(|(k, _)| k == &opt.key) {
                return Err(SweepError::configuration(
                    &opt.key,
                    "optional fragment registered twice",
                ));
            }
            fragments.push((opt.key.clone(), CommandTemplate::compile(&opt.fragment)?));
        }
        if info.output_dir_key.trim().is_empty() {
            return Err(SweepError::configuration(
                "output_dir_key",
                "run info does not name an output directory key",
            ));
        }
        Ok(Self {
            base,
            fragments,
            output_dir_key: info.output_dir_key.clone(),
            script: script.map(Path::to_path_buf),
        })
    }

    pub fn output_dir(&self, config: &RunConfiguration) -> Result<PathBuf> {
        let template = match config.assignment.get(&self.output_dir_key) {
            Some(AxisValue::Concrete(v)) => v.render(),
            Some(_) => {
                return Err(SweepError::configuration(
                    &self.output_dir_key,
                    "output directory cannot be a presence toggle",
                ))
            }
            None => {
                return Err(SweepError::configuration(
                    &self.output_dir_key,
                    "no output directory given",
                ))
            }
        };
        let rendered = template
            .replace("%s", &format!("{:03}", config.ordinal))
            .replace("{ordinal}", &config.ordinal.to_string());
        Ok(PathBuf::from(rendered))
    }

    pub fn materialize(&self, config: &RunConfiguration) -> Result<MaterializedRun> {
        let output_dir = self.output_dir(config)?;
        let derived = self.derived_values(&output_dir);
        let assignment = &config.assignment;

        let mut command = self.base.render(|name| {
            if let Some(v) = derived.get(name) {
                return Ok(Some(v.clone()));
            }
            match assignment.get(name) {
                Some(AxisValue::Concrete(v)) => Ok(Some(v.render())),
                Some(_) => Err(SweepError::configuration(
                    name,
                    "mandatory option cannot be @defined or @undefined",
                )),
                None => Ok(None),
            }
        })?;

        for (key, fragment) in &self.fragments {
            match assignment.get(key) {
                None | Some(AxisValue::Omitted) => continue,
                Some(AxisValue::Included) if fragment.references(key) => {
                    return Err(SweepError::configuration(
                        key,
                        format!(
                            "@defined leaves no value for fragment `{}`",
                            fragment.source()
                        ),
                    ))
                }
                Some(_) => {}
            }
            let rendered = fragment.render(|name| {
                if let Some(v) = derived.get(name) {
                    return Ok(Some(v.clone()));
                }
                match assignment.get(name) {
                    Some(AxisValue::Concrete(v)) => Ok(Some(v.render())),
                    _ => Ok(None),
                }
            })?;
            command.push_str(&rendered);
        }

        Ok(MaterializedRun {
            configuration: config.clone(),
            output_dir,
            command,
        })
    }

    /// Materialize a whole batch up front so every configuration problem is
    /// reported before anything is launched.
    pub fn materialize_all(
        &self,
        configs: &[RunConfiguration],
        reporter: &Reporter,
    ) -> Result<Vec<MaterializedRun>> {
        if let Some(first) = configs.first() {
            for key in self.unreferenced_keys(&first.assignment) {
                reporter.warn(format!(
                    "option `{}` is not used by the command template or any optional fragment",
                    key
                ));
            }
        }
        let mut seen: BTreeMap<PathBuf, usize> = BTreeMap::new();
        let mut runs = Vec::with_capacity(configs.len());
        for config in configs {
            let run = self.materialize(config)?;
            if let Some(prev) = seen.insert(run.output_dir.clone(), run.ordinal()) {
                return Err(SweepError::configuration(
                    &self.output_dir_key,
                    format!(
                        "output directory {} is shared by configurations {} and {}",
                        run.output_dir.display(),
                        prev,
                        run.ordinal()
                    ),
                ));
            }
            runs.push(run);
        }
        Ok(runs)
    }

    pub fn unreferenced_keys(&self, assignment: &Assignment) -> Vec<String> {
        let mut used: BTreeSet<&str> = self.base.placeholders().collect();
        used.insert(self.output_dir_key.as_str());
        for (key, fragment) in &self.fragments {
            used.insert(key.as_str());
            used.extend(fragment.placeholders());
        }
        assignment
            .keys()
            .filter(|k| !used.contains(k))
            .map(str::to_string)
            .collect()
    }

    fn derived_values(&self, output_dir: &Path) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        let dir = output_dir.display().to_string();
        out.insert("output_dir".to_string(), dir.clone());
        out.insert(self.output_dir_key.clone(), dir);
        if let Some(script) = &self.script {
            let parent = script
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            out.insert("script_dir".to_string(), parent.display().to_string());
            out.insert("script".to_string(), script.display().to_string());
        }
        out
    }
}
