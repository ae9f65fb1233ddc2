//! The Monty Hall simulator study.
//!
//! A typical session:
//!
//! ```text
//! sweep run -n 3 -c '--switch + --seed' -o output \
//!   "python='python3', output_dir='output/study/%s', --num=[100,1000,10000], \
//!    --repeat=[10,20], --switch=['@undefined', '@defined', '@undefined', '@defined'], \
//!    --seed=['@undefined', '@undefined', 12345, 12345], --host=['random', 'first'], \
//!    --silent=@defined, --no-show=@defined" examples/monty_hall.py
//! sweep scoop --study monty_hall output/study -s num
//! ```

use crate::study::Study;
use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;
use sweep_analysis::{
    builtin_plugins, parametric_uniques, Fields, FnPlugin, OptionsFileParser, Plugin,
    PluginContext, ScoopEntry, StudyTable,
};
use sweep_core::fs::atomic_write_bytes;
use sweep_core::{OptionalFragment, RunInfo};

pub const NAME: &str = "monty_hall";
pub const WIN_RATES_CSV: &str = "win_rates.csv";

const COMMAND_TEMPLATE: &str = "
    {python} {script_dir}/monty_hall.py
    --num={--num} --repeat={--repeat}
    {output_dir}
";

const LOG_HEADER_LINES: usize = 4;

pub struct MontyHall;

pub fn study() -> Box<dyn Study> {
    Box::new(MontyHall)
}

impl Study for MontyHall {
    fn name(&self) -> &str {
        NAME
    }

    fn run_info(&self) -> RunInfo {
        RunInfo {
            command_template: COMMAND_TEMPLATE.to_string(),
            optional_fragments: vec![
                OptionalFragment::new("--switch", " --switch"),
                OptionalFragment::new("--host", " --host={--host}"),
                OptionalFragment::new("--seed", " --seed={--seed}"),
                OptionalFragment::new("--plot-opts", " --plot-opts={--plot-opts}"),
                OptionalFragment::new("--no-show", " --no-show"),
                OptionalFragment::new("--silent", " --silent"),
            ],
            output_dir_key: "output_dir".to_string(),
            completion_marker: "wins.png".to_string(),
        }
    }

    fn scoop_info(&self) -> Vec<ScoopEntry> {
        vec![
            ScoopEntry::new("options.txt", OptionsFileParser::new()),
            ScoopEntry::new("output_log.txt", scrape_output),
        ]
    }

    fn plugin_info(&self) -> Vec<Box<dyn Plugin>> {
        let mut plugins: Vec<Box<dyn Plugin>> =
            vec![Box::new(FnPlugin::new("summarize_win_rates", summarize_win_rates))];
        plugins.extend(builtin_plugins());
        plugins
    }
}

fn last_float(line: &str) -> Result<f64> {
    let token = line
        .split_whitespace()
        .last()
        .ok_or_else(|| anyhow!("empty line where a value was expected"))?;
    token
        .parse::<f64>()
        .with_context(|| format!("`{}` is not a number", token))
}

pub fn scrape_output(path: &Path, record: &Fields) -> Result<Fields> {
    let repeat = record
        .get("repeat")
        .and_then(Value::as_u64)
        .ok_or_else(|| anyhow!("`repeat` must be parsed before {}", path.display()))?;
    let file = fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut lines = BufReader::new(file).lines().skip(LOG_HEADER_LINES);
    let mut next_value = |what: &str, ir: u64| -> Result<f64> {
        let line = lines
            .next()
            .ok_or_else(|| anyhow!("log ends before {} of simulation {} of {}", what, ir + 1, repeat))??;
        last_float(&line)
    };

    let mut elapsed = Vec::new();
    let mut win_rate = Vec::new();
    for ir in 0..repeat {
        elapsed.push(next_value("elapsed", ir)?);
        win_rate.push(next_value("win rate", ir)?);
    }
    let mut out = Fields::new();
    out.insert("elapsed".to_string(), json!(elapsed));
    out.insert("win_rate".to_string(), json!(win_rate));
    Ok(out)
}

fn mean(values: &[Value]) -> Option<f64> {
    let nums: Vec<f64> = values.iter().filter_map(Value::as_f64).collect();
    if nums.is_empty() {
        return None;
    }
    Some(nums.iter().sum::<f64>() / nums.len() as f64)
}

const UNSEEDED: i64 = -1;

const SUMMARY_COLUMNS: &[&str] = &["num", "repeat", "switch", "host", "seed", "mean_win_rate"];

pub fn summarize_win_rates(
    mut table: StudyTable,
    ctx: &mut PluginContext<'_>,
) -> Result<StudyTable> {
    table.derive_column("mean_win_rate", |row| {
        match row.fields.get("win_rate") {
            Some(Value::Array(rates)) => mean(rates).map(|m| json!(m)),
            _ => None,
        }
    });
    if table.columns().iter().any(|c| c == "seed") {
        table.derive_column("seed", |row| match row.fields.get("seed") {
            None | Some(Value::Null) => Some(json!(UNSEEDED)),
            Some(seed) => Some(seed.clone()),
        });
    }

    let uniques = parametric_uniques(&table, &["win_rate", "output_dir", "elapsed", "mean_win_rate"]);
    for (key, values) in &uniques {
        let shown: Vec<String> = values.iter().map(Value::to_string).collect();
        ctx.reporter.info(format!("{}: {}", key, shown.join(", ")));
    }

    let mut sorted = table.clone();
    sorted.sort_by(&["num".to_string(), "run_dir".to_string()]);
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(SUMMARY_COLUMNS)?;
    for row in &sorted.rows {
        writer.write_record(SUMMARY_COLUMNS.iter().map(|c| match row.fields.get(*c) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow!("failed to flush csv buffer: {}", e.error()))?;
    let path = ctx.output_dir.join(WIN_RATES_CSV);
    atomic_write_bytes(&path, &bytes)?;
    ctx.reporter.info(format!("wrote {}", path.display()));
    ctx.shared.insert("win_rates_csv".to_string(), json!(path.display().to_string()));
    Ok(table)
}
