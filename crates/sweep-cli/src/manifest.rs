use crate::study::Study;
use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use sweep_analysis::{
    builtin_plugin, builtin_plugins, JsonParser, KeyValueParser, OptionsFileParser, Plugin,
    ScoopEntry,
};
use sweep_core::RunInfo;

pub const MANIFEST_SCHEMA: &str = "study_manifest_v1";

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "parser", rename_all = "snake_case")]
pub enum ParserSpec {
    Options {
        #[serde(default)]
        split_keys: Vec<String>,
    },
    KeyValue {
        #[serde(default)]
        separator: Option<String>,
        #[serde(default)]
        prefix: Option<String>,
        #[serde(default)]
        keys: Option<Vec<String>>,
    },
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScoopSpec {
    pub pattern: String,
    #[serde(flatten)]
    pub parser: ParserSpec,
}

/// A study described in YAML instead of compiled in:
///
/// ```yaml
/// schema_version: study_manifest_v1
/// name: sleepers
/// run:
///   command_template: "sh {script} {output_dir} {--secs}"
///   optional_fragments:
///     - { key: --tag, fragment: " --tag={--tag}" }
///   output_dir_key: output_dir
///   completion_marker: done.txt
/// scoop:
///   - { pattern: "*.json", parser: json }
///   - { pattern: log.txt, parser: key_value, separator: "=" }
/// plugins: [export_csv, report_uniques]
/// ```
///
/// Without a `plugins` list every built-in plugin runs.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestStudy {
    pub schema_version: String,
    pub name: String,
    pub run: RunInfo,
    #[serde(default)]
    pub scoop: Vec<ScoopSpec>,
    #[serde(default)]
    pub plugins: Option<Vec<String>>,
}

impl ManifestStudy {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read study manifest {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid study manifest {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let manifest: ManifestStudy = serde_yaml::from_str(raw)?;
        if manifest.schema_version != MANIFEST_SCHEMA {
            bail!(
                "unsupported schema_version `{}` (expected `{}`)",
                manifest.schema_version,
                MANIFEST_SCHEMA
            );
        }
        if let Some(names) = &manifest.plugins {
            for name in names {
                if builtin_plugin(name).is_none() {
                    return Err(anyhow!("unknown built-in plugin `{}`", name));
                }
            }
        }
        Ok(manifest)
    }
}

fn build_parser(spec: &ScoopSpec) -> ScoopEntry {
    match &spec.parser {
        ParserSpec::Options { split_keys } => ScoopEntry::new(
            spec.pattern.clone(),
            OptionsFileParser::new().with_split_keys(split_keys.iter().cloned()),
        ),
        ParserSpec::KeyValue {
            separator,
            prefix,
            keys,
        } => {
            let mut parser = KeyValueParser::new();
            if let Some(sep) = separator {
                parser = parser.separator(sep.clone());
            }
            if let Some(prefix) = prefix {
                parser = parser.prefix(prefix.clone());
            }
            if let Some(keys) = keys {
                parser = parser.keys(keys.iter().cloned());
            }
            ScoopEntry::new(spec.pattern.clone(), parser)
        }
        ParserSpec::Json => ScoopEntry::new(spec.pattern.clone(), JsonParser),
    }
}

impl Study for ManifestStudy {
    fn name(&self) -> &str {
        &self.name
    }

    fn run_info(&self) -> RunInfo {
        self.run.clone()
    }

    fn scoop_info(&self) -> Vec<ScoopEntry> {
        self.scoop.iter().map(build_parser).collect()
    }

    fn plugin_info(&self) -> Vec<Box<dyn Plugin>> {
        match &self.plugins {
            Some(names) => names.iter().filter_map(|n| builtin_plugin(n)).collect(),
            None => builtin_plugins(),
        }
    }
}
