use crate::parsers::ScoopEntry;
use crate::store::TableStore;
use crate::table::{Fields, RunRecord, StudyTable};
use glob::Pattern;
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use sweep_core::fs::{absolute_path, is_finished};
use sweep_core::{Reporter, Result, SweepError};
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct HarvestOptions {
    pub root: PathBuf,
    pub dir_pattern: String,
    pub completion_marker: Option<String>,
    pub reuse_unchanged: bool,
    pub sort_keys: Vec<String>,
    pub exclude: Vec<PathBuf>,
}

impl HarvestOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            dir_pattern: "*".to_string(),
            completion_marker: None,
            reuse_unchanged: true,
            sort_keys: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParseError {
    pub run_dir: PathBuf,
    pub file: PathBuf,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HarvestReport {
    pub candidates: usize,
    pub parsed: usize,
    pub reused: usize,
    pub unfinished: usize,
    pub failed: Vec<ParseError>,
}

impl HarvestReport {
    pub fn to_json(&self) -> Value {
        json!({
            "candidates": self.candidates,
            "parsed": self.parsed,
            "reused": self.reused,
            "unfinished": self.unfinished,
            "failed": self.failed,
        })
    }

    pub fn summary_line(&self) -> String {
        format!(
            "harvested {} run directories: {} parsed, {} reused, {} unfinished, {} failed",
            self.candidates,
            self.parsed,
            self.reused,
            self.unfinished,
            self.failed.len()
        )
    }
}

struct CompiledEntry<'a> {
    pattern: Pattern,
    entry: &'a ScoopEntry,
}

fn compile_pattern(text: &str) -> Result<Pattern> {
    Pattern::new(text).map_err(|e| SweepError::configuration(text, e.to_string()))
}

fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| SweepError::io(dir, e))? {
        let entry = entry.map_err(|e| SweepError::io(dir, e))?;
        let path = entry.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|s| s.to_str()).unwrap_or("")
}

pub fn fingerprint(files: &[PathBuf], settings: &str) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(settings.as_bytes());
    hasher.update([0u8]);
    for path in files {
        let meta = fs::metadata(path).map_err(|e| SweepError::io(path, e))?;
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        hasher.update(file_name(path).as_bytes());
        hasher.update([0u8]);
        hasher.update(meta.len().to_le_bytes());
        hasher.update(mtime.to_le_bytes());
    }
    Ok(hex::encode(hasher.finalize()))
}

fn unreadable(dir: &Path, err: SweepError) -> ParseError {
    ParseError {
        run_dir: dir.to_path_buf(),
        file: dir.to_path_buf(),
        message: err.to_string(),
    }
}

fn matching_artifacts(
    dir: &Path,
    compiled: &[CompiledEntry<'_>],
    exclude: &[PathBuf],
) -> std::result::Result<Vec<PathBuf>, ParseError> {
    let files = list_files(dir).map_err(|e| unreadable(dir, e))?;
    Ok(files
        .into_iter()
        .filter(|f| !exclude.iter().any(|x| x == f))
        .filter(|f| compiled.iter().any(|c| c.pattern.matches(file_name(f))))
        .collect())
}

/// Walk the run directories below `options.root`, parse every candidate and
/// assemble the table. Rows of `previous` whose artifacts and parser
/// settings are unchanged are reused when `reuse_unchanged` is set. A
/// directory that cannot be read or parsed is left out and listed in the
/// report.
pub fn harvest(
    options: &HarvestOptions,
    entries: &[ScoopEntry],
    previous: &StudyTable,
    reporter: &Reporter,
) -> Result<(StudyTable, HarvestReport)> {
    if !options.root.is_dir() {
        return Err(SweepError::io(
            &options.root,
            std::io::Error::new(std::io::ErrorKind::NotFound, "harvest root is not a directory"),
        ));
    }
    let root = absolute_path(&options.root);
    let dir_pattern = compile_pattern(&options.dir_pattern)?;
    let compiled = entries
        .iter()
        .map(|entry| {
            Ok(CompiledEntry {
                pattern: compile_pattern(&entry.pattern)?,
                entry,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let settings = entries
        .iter()
        .map(ScoopEntry::settings)
        .collect::<Vec<_>>()
        .join("\n");
    let exclude: Vec<PathBuf> = options.exclude.iter().map(|p| absolute_path(p)).collect();

    reporter.info(format!(
        "harvesting {} (directories matching `{}`)",
        root.display(),
        options.dir_pattern
    ));

    let mut table = StudyTable::new();
    let mut report = HarvestReport::default();
    for item in WalkDir::new(&root).min_depth(1).sort_by_file_name() {
        let item = match item {
            Ok(item) => item,
            Err(e) => {
                reporter.warn(format!("skipping unreadable entry: {}", e));
                continue;
            }
        };
        if !item.file_type().is_dir() || !dir_pattern.matches(file_name(item.path())) {
            continue;
        }
        let dir = item.path();
        let artifacts = match matching_artifacts(dir, &compiled, &exclude) {
            Ok(artifacts) => artifacts,
            Err(err) => {
                reporter.warn(format!("{}: {}", dir.display(), err.message));
                report.failed.push(err);
                continue;
            }
        };
        if artifacts.is_empty() {
            continue;
        }
        if let Some(marker) = &options.completion_marker {
            if !is_finished(dir, marker) {
                reporter.debug(format!("{}: unfinished, no {}", dir.display(), marker));
                report.unfinished += 1;
                continue;
            }
        }
        report.candidates += 1;

        let digest = match fingerprint(&artifacts, &settings) {
            Ok(digest) => digest,
            Err(e) => {
                let err = unreadable(dir, e);
                reporter.warn(format!("{}: {}", dir.display(), err.message));
                report.failed.push(err);
                continue;
            }
        };
        if options.reuse_unchanged {
            if let Some(old) = previous.get(dir) {
                if old.fingerprint.as_deref() == Some(digest.as_str()) {
                    reporter.debug(format!("{}: unchanged", dir.display()));
                    table.upsert(old.clone());
                    report.reused += 1;
                    continue;
                }
            }
        }

        match parse_run(dir, &artifacts, &compiled) {
            Ok(fields) => {
                reporter.debug(format!("{}: {} fields", dir.display(), fields.len()));
                let mut record = RunRecord::new(dir, fields);
                record.fingerprint = Some(digest);
                table.upsert(record);
                report.parsed += 1;
            }
            Err(err) => {
                reporter.warn(format!(
                    "{}: parser failed on {}: {}",
                    dir.display(),
                    err.file.display(),
                    err.message
                ));
                report.failed.push(err);
            }
        }
    }

    table.sort_by(&options.sort_keys);
    Ok((table, report))
}

fn parse_run(
    dir: &Path,
    artifacts: &[PathBuf],
    compiled: &[CompiledEntry<'_>],
) -> std::result::Result<Fields, ParseError> {
    let mut record = Fields::new();
    for c in compiled {
        for file in artifacts.iter().filter(|f| c.pattern.matches(file_name(f))) {
            match c.entry.parser.parse(file, &record) {
                Ok(fields) => record.extend(fields),
                Err(e) => {
                    return Err(ParseError {
                        run_dir: dir.to_path_buf(),
                        file: file.clone(),
                        message: format!("{:#}", e),
                    })
                }
            }
        }
    }
    Ok(record)
}

pub fn harvest_into_store(
    options: &HarvestOptions,
    entries: &[ScoopEntry],
    store: &TableStore,
    reporter: &Reporter,
) -> Result<(StudyTable, HarvestReport)> {
    let key = store.study_key(&options.root);
    let previous = store.get(&key)?;
    let mut options = options.clone();
    options.exclude.push(store.path().to_path_buf());
    let (table, report) = harvest(&options, entries, &previous, reporter)?;
    store.put(&key, &table)?;
    reporter.info(format!(
        "stored {} rows under `{}` in {}",
        table.len(),
        key,
        store.path().display()
    ));
    Ok((table, report))
}
