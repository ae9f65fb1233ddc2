use crate::table::{StudyTable, RUN_DIR_COLUMN};
use crate::uniques::{array_columns, parametric_uniques};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use sweep_core::fs::{atomic_write_bytes, atomic_write_json_pretty};
use sweep_core::{Reporter, Result, SweepError};

pub const RESULTS_CSV: &str = "results.csv";
pub const RESULTS_TABLE_JSON: &str = "results_table.json";

pub struct PluginContext<'a> {
    pub output_dir: PathBuf,
    pub shared: BTreeMap<String, Value>,
    pub reporter: &'a Reporter,
}

impl<'a> PluginContext<'a> {
    pub fn new(output_dir: impl Into<PathBuf>, reporter: &'a Reporter) -> Self {
        Self {
            output_dir: output_dir.into(),
            shared: BTreeMap::new(),
            reporter,
        }
    }
}

pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, table: StudyTable, ctx: &mut PluginContext<'_>) -> anyhow::Result<StudyTable>;
}

pub struct FnPlugin<F> {
    name: String,
    f: F,
}

impl<F> FnPlugin<F>
where
    F: Fn(StudyTable, &mut PluginContext<'_>) -> anyhow::Result<StudyTable> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> Plugin for FnPlugin<F>
where
    F: Fn(StudyTable, &mut PluginContext<'_>) -> anyhow::Result<StudyTable> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, table: StudyTable, ctx: &mut PluginContext<'_>) -> anyhow::Result<StudyTable> {
        (self.f)(table, ctx)
    }
}

pub fn select_plugins(
    plugins: Vec<Box<dyn Plugin>>,
    omit: &[String],
    only: Option<&[String]>,
    reporter: &Reporter,
) -> Vec<Box<dyn Plugin>> {
    let known: Vec<String> = plugins.iter().map(|p| p.name().to_string()).collect();
    for name in omit.iter().chain(only.unwrap_or(&[]).iter()) {
        if !known.contains(name) {
            reporter.warn(format!(
                "unknown plugin `{}` (available: {})",
                name,
                known.join(", ")
            ));
        }
    }
    plugins
        .into_iter()
        .filter(|p| !omit.iter().any(|n| n == p.name()))
        .filter(|p| only.map_or(true, |names| names.iter().any(|n| n == p.name())))
        .collect()
}

pub fn run_pipeline(
    plugins: &[Box<dyn Plugin>],
    mut table: StudyTable,
    ctx: &mut PluginContext<'_>,
) -> Result<StudyTable> {
    for plugin in plugins {
        ctx.reporter.info(format!("running plugin {}", plugin.name()));
        table = plugin.apply(table, ctx).map_err(|e| SweepError::Plugin {
            name: plugin.name().to_string(),
            source: e.into(),
        })?;
    }
    Ok(table)
}

pub fn builtin_plugin(name: &str) -> Option<Box<dyn Plugin>> {
    match name {
        ExportCsv::NAME => Some(Box::new(ExportCsv)),
        ExportJson::NAME => Some(Box::new(ExportJson)),
        ReportUniques::NAME => Some(Box::new(ReportUniques)),
        _ => None,
    }
}

pub fn builtin_plugins() -> Vec<Box<dyn Plugin>> {
    vec![Box::new(ExportCsv), Box::new(ExportJson), Box::new(ReportUniques)]
}

pub fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => format!(
            "[{}]",
            items.iter().map(render_cell).collect::<Vec<_>>().join(";")
        ),
        other => other.to_string(),
    }
}

fn export_columns(table: &StudyTable) -> Vec<String> {
    let mut columns = vec![RUN_DIR_COLUMN.to_string()];
    columns.extend(table.columns().into_iter().filter(|c| c != RUN_DIR_COLUMN));
    columns
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExportCsv;

impl ExportCsv {
    pub const NAME: &'static str = "export_csv";
}

impl Plugin for ExportCsv {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn apply(&self, table: StudyTable, ctx: &mut PluginContext<'_>) -> anyhow::Result<StudyTable> {
        let columns = export_columns(&table);
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&columns)?;
        for row in &table.rows {
            writer.write_record(
                columns
                    .iter()
                    .map(|c| row.value(c).map(|v| render_cell(&v)).unwrap_or_default()),
            )?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("failed to flush csv buffer: {}", e.error()))?;
        let path = ctx.output_dir.join(RESULTS_CSV);
        atomic_write_bytes(&path, &bytes)?;
        ctx.reporter.info(format!("wrote {}", path.display()));
        Ok(table)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExportJson;

impl ExportJson {
    pub const NAME: &'static str = "export_json";
}

impl Plugin for ExportJson {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn apply(&self, table: StudyTable, ctx: &mut PluginContext<'_>) -> anyhow::Result<StudyTable> {
        let rows: Vec<Value> = table
            .rows
            .iter()
            .map(|row| {
                let mut obj = Map::new();
                obj.insert(
                    RUN_DIR_COLUMN.to_string(),
                    json!(row.run_dir.display().to_string()),
                );
                for (k, v) in &row.fields {
                    obj.insert(k.clone(), v.clone());
                }
                Value::Object(obj)
            })
            .collect();
        let doc = json!({
            "schema_version": "results_table_v1",
            "generated_at": chrono::Utc::now().to_rfc3339(),
            "columns": export_columns(&table),
            "rows": rows,
        });
        let path = ctx.output_dir.join(RESULTS_TABLE_JSON);
        atomic_write_json_pretty(&path, &doc)?;
        ctx.reporter.info(format!("wrote {}", path.display()));
        Ok(table)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReportUniques;

impl ReportUniques {
    pub const NAME: &'static str = "report_uniques";
}

impl Plugin for ReportUniques {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn apply(&self, table: StudyTable, ctx: &mut PluginContext<'_>) -> anyhow::Result<StudyTable> {
        let skip = array_columns(&table);
        let omit: Vec<&str> = skip.iter().map(String::as_str).collect();
        let uniques = parametric_uniques(&table, &omit);
        for (column, values) in &uniques {
            let shown: Vec<String> = values.iter().map(render_cell).collect();
            ctx.reporter.info(format!("{}: {}", column, shown.join(", ")));
        }
        ctx.shared.insert("uniques".to_string(), json!(uniques));
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{Fields, RunRecord};
    use std::fs;
    use std::sync::{Arc, Mutex};

    fn temp_root(tag: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!(
            "sweep_plugins_{}_{}_{}",
            tag,
            std::process::id(),
            chrono::Utc::now().timestamp_micros()
        ));
        fs::create_dir_all(&root).expect("create temp root");
        root
    }

    fn recording(name: &str, log: Arc<Mutex<Vec<String>>>) -> Box<dyn Plugin> {
        let tag = name.to_string();
        Box::new(FnPlugin::new(name, move |mut table: StudyTable, _: &mut PluginContext<'_>| {
            log.lock().expect("log lock").push(tag.clone());
            table.upsert(RunRecord::new(format!("/{}", tag), Fields::new()));
            Ok(table)
        }))
    }

    fn sample_table() -> StudyTable {
        let mut table = StudyTable::new();
        let mut fields = Fields::new();
        fields.insert("num".to_string(), json!(100));
        fields.insert("wins".to_string(), json!([1, 0, 1]));
        fields.insert("host".to_string(), json!("random, first"));
        table.upsert(RunRecord::new("/study/000", fields));
        let mut fields = Fields::new();
        fields.insert("num".to_string(), json!(1000));
        table.upsert(RunRecord::new("/study/001", fields));
        table
    }

    #[test]
    fn omitted_plugin_never_runs_and_order_is_kept() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let plugins = vec![
            recording("A", log.clone()),
            recording("B", log.clone()),
            recording("C", log.clone()),
        ];
        let reporter = Reporter::new("test:");
        let selected = select_plugins(plugins, &["B".to_string()], None, &reporter);
        let mut ctx = PluginContext::new(std::env::temp_dir(), &reporter);
        let table = run_pipeline(&selected, StudyTable::new(), &mut ctx).expect("pipeline");
        assert_eq!(*log.lock().expect("log lock"), vec!["A".to_string(), "C".to_string()]);
        let dirs: Vec<String> = table
            .rows
            .iter()
            .map(|r| r.run_dir.display().to_string())
            .collect();
        assert_eq!(dirs, vec!["/A".to_string(), "/C".to_string()]);
        assert_eq!(reporter.warnings(), 0);
    }

    #[test]
    fn use_list_keeps_registration_order_and_warns_on_unknown_names() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let plugins = vec![
            recording("A", log.clone()),
            recording("B", log.clone()),
            recording("C", log.clone()),
        ];
        let reporter = Reporter::new("test:");
        let only = vec!["C".to_string(), "A".to_string(), "Z".to_string()];
        let selected = select_plugins(plugins, &[], Some(only.as_slice()), &reporter);
        let names: Vec<&str> = selected.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["A", "C"]);
        assert_eq!(reporter.warnings(), 1);
    }

    #[test]
    fn failure_stops_the_chain_and_names_the_plugin() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let failing: Box<dyn Plugin> = Box::new(FnPlugin::new(
            "plot",
            |_: StudyTable, _: &mut PluginContext<'_>| -> anyhow::Result<StudyTable> {
                anyhow::bail!("no display")
            },
        ));
        let plugins = vec![recording("A", log.clone()), failing, recording("C", log.clone())];
        let reporter = Reporter::new("test:");
        let mut ctx = PluginContext::new(std::env::temp_dir(), &reporter);
        let err = run_pipeline(&plugins, StudyTable::new(), &mut ctx).expect_err("failure");
        match &err {
            SweepError::Plugin { name, source } => {
                assert_eq!(name, "plot");
                assert!(source.to_string().contains("no display"));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(err.code(), "plugin_failure");
        assert_eq!(*log.lock().expect("log lock"), vec!["A".to_string()]);
    }

    #[test]
    fn builtin_exports_write_files() {
        let root = temp_root("exports");
        let reporter = Reporter::new("test:");
        let mut ctx = PluginContext::new(&root, &reporter);
        let table = run_pipeline(&builtin_plugins(), sample_table(), &mut ctx).expect("pipeline");
        assert_eq!(table, sample_table());

        let csv_text = fs::read_to_string(root.join(RESULTS_CSV)).expect("csv");
        let lines: Vec<&str> = csv_text.lines().collect();
        assert_eq!(lines[0], "run_dir,host,num,wins");
        assert_eq!(lines[1], "/study/000,\"random, first\",100,[1;0;1]");
        assert_eq!(lines[2], "/study/001,,1000,");

        let doc: Value = serde_json::from_str(
            &fs::read_to_string(root.join(RESULTS_TABLE_JSON)).expect("json"),
        )
        .expect("parse json");
        assert_eq!(doc["rows"][1]["num"], json!(1000));
        assert_eq!(doc["rows"][0]["run_dir"], json!("/study/000"));

        let uniques = ctx.shared.get("uniques").expect("uniques shared");
        assert_eq!(uniques["num"], json!([100, 1000]));
        assert!(uniques.get("wins").is_none());
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn builtins_resolve_by_name() {
        let plugin = builtin_plugin("export_csv").expect("export_csv");
        assert_eq!(plugin.name(), "export_csv");
        assert!(builtin_plugin("plot_everything").is_none());
    }
}
