mod manifest;
mod monty_hall;
mod study;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use sweep_analysis::plugins::{RESULTS_CSV, RESULTS_TABLE_JSON};
use sweep_analysis::{
    harvest_into_store, run_pipeline, select_plugins, HarvestOptions, HarvestReport,
    PluginContext, StudyTable, TableStore,
};
use sweep_core::{
    generate_grid, parse_study_axes, summarize_grid, GridSummary, Materializer, ParameterAxis,
    Reporter, SweepError,
};
use sweep_runner::{
    describe_failure, dispatch, write_batch_summary, DispatchOptions, DispatchReport, RunFailure,
    RunStatus,
};
use tracing_subscriber::EnvFilter;

const RUN_LOG: &str = "sweep_run.log";
const SCOOP_LOG: &str = "sweep_scoop.log";
const DEFAULT_STORE: &str = "results.json";

#[derive(Parser)]
#[command(name = "sweep", version = "0.3.0", about = "Parametric study runner and result harvester")]
struct Cli {
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone, Default)]
struct StudyArgs {
    #[arg(long)]
    study: Option<String>,
    #[arg(long, conflicts_with = "study")]
    manifest: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    Run {
        #[arg(allow_hyphen_values = true)]
        grammar: String,
        script: Option<PathBuf>,
        #[command(flatten)]
        study: StudyArgs,
        #[arg(short = 'c', long, allow_hyphen_values = true)]
        combine: Option<String>,
        #[arg(short = 'n', long = "concurrency", default_value_t = 1)]
        concurrency: usize,
        #[arg(short = 'r', long)]
        reverse: bool,
        #[arg(long)]
        dry_run: bool,
        #[arg(short = 'o', long = "output-dir", visible_alias = "log-dir", default_value = ".")]
        output_dir: PathBuf,
        #[arg(long)]
        strict: bool,
        #[arg(long)]
        json: bool,
    },
    Scoop {
        root: PathBuf,
        #[command(flatten)]
        study: StudyArgs,
        #[arg(long)]
        script: Option<PathBuf>,
        #[arg(short = 'd', long, default_value = "*")]
        dir_pattern: String,
        #[arg(short = 's', long = "sort", value_delimiter = ',')]
        sort: Vec<String>,
        #[arg(short = 'r', long)]
        store: Option<PathBuf>,
        #[arg(short = 'o', long = "output-dir")]
        output_dir: Option<PathBuf>,
        #[arg(long)]
        all: bool,
        #[arg(long, conflicts_with = "reuse")]
        reparse: bool,
        #[arg(long)]
        reuse: bool,
        #[arg(long)]
        no_plugins: bool,
        #[arg(long, value_delimiter = ',')]
        omit_plugins: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        use_plugins: Option<Vec<String>>,
        #[arg(long)]
        json: bool,
    },
    Describe {
        #[arg(allow_hyphen_values = true)]
        grammar: String,
        script: Option<PathBuf>,
        #[command(flatten)]
        study: StudyArgs,
        #[arg(short = 'c', long, allow_hyphen_values = true)]
        combine: Option<String>,
        #[arg(long)]
        json: bool,
    },
    Studies {
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let json_mode = command_json_mode(&cli.command);
    let result = run_command(cli.command);
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            if payload.get("ok") == Some(&Value::Bool(false)) {
                std::process::exit(1);
            }
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                let code = err
                    .downcast_ref::<SweepError>()
                    .map(SweepError::code)
                    .unwrap_or("command_failed");
                emit_json(&json_error(code, format!("{:#}", err), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Run {
            grammar,
            script,
            study: selection,
            combine,
            concurrency,
            reverse,
            dry_run,
            output_dir,
            strict,
            json,
        } => {
            let study = study::resolve_study(
                selection.study.as_deref(),
                selection.manifest.as_deref(),
                script.as_deref(),
            )?;
            let axes = parse_study_axes(&grammar, combine.as_deref())?;
            let configs = generate_grid(&axes)?;
            let info = study.run_info();
            let materializer = Materializer::new(&info, script.as_deref())?;

            let mut reporter = Reporter::new("sweep-run:");
            if !dry_run {
                reporter = reporter.with_log_file(&output_dir.join(RUN_LOG))?;
            }
            reporter.info(format!(
                "study {}: {} configurations from {} axes",
                study.name(),
                configs.len(),
                axes.len()
            ));
            let runs = materializer.materialize_all(&configs, &reporter)?;

            let options = DispatchOptions {
                max_concurrency: concurrency,
                reverse,
                dry_run,
                completion_marker: info.completion_marker.clone(),
            };
            let report = dispatch(&runs, &options, &reporter)?;
            let summary_path = if dry_run {
                None
            } else {
                Some(write_batch_summary(&report, &output_dir)?)
            };
            let counts = report.counts();
            reporter.finish(format!(
                "{} succeeded, {} failed, {} skipped, {} planned",
                counts.succeeded, counts.failed, counts.skipped, counts.planned
            ));

            let failed = if strict {
                counts.failed > 0
            } else {
                report.has_launch_failures()
            };
            if json {
                return Ok(Some(json!({
                    "ok": !failed,
                    "command": "run",
                    "study": study.name(),
                    "batch": report.to_json(),
                    "summary_path": summary_path.map(|p| p.display().to_string()),
                })));
            }
            print_dispatch(&report, dry_run);
            if let Some(path) = &summary_path {
                println!("batch_summary: {}", path.display());
            }
            if failed {
                let launch = report
                    .failures()
                    .filter(|o| matches!(o.status, RunStatus::Failed { failure: RunFailure::Launch { .. } }))
                    .count();
                bail!(
                    "{} of {} configurations failed ({} could not be launched)",
                    counts.failed,
                    report.outcomes.len(),
                    launch
                );
            }
        }
        Commands::Scoop {
            root,
            study: selection,
            script,
            dir_pattern,
            sort,
            store,
            output_dir,
            all,
            reparse,
            reuse,
            no_plugins,
            omit_plugins,
            use_plugins,
            json,
        } => {
            let study = study::resolve_study(
                selection.study.as_deref(),
                selection.manifest.as_deref(),
                script.as_deref(),
            )?;
            if !root.is_dir() {
                bail!("harvest root {} is not a directory", root.display());
            }
            let output_dir = output_dir.unwrap_or_else(|| root.clone());
            let store = TableStore::open(store.unwrap_or_else(|| output_dir.join(DEFAULT_STORE)));
            let reporter =
                Reporter::new("sweep-scoop:").with_log_file(&output_dir.join(SCOOP_LOG))?;

            let (mut table, harvest_report) = if reuse {
                let key = store.study_key(&root);
                let mut table = store
                    .get(&key)
                    .with_context(|| format!("failed to load stored results for `{}`", key))?;
                if table.is_empty() {
                    reporter.warn(format!(
                        "no stored results under `{}` in {}",
                        key,
                        store.path().display()
                    ));
                }
                table.sort_by(&sort);
                (table, None)
            } else {
                let options = HarvestOptions {
                    root: root.clone(),
                    dir_pattern,
                    completion_marker: if all {
                        None
                    } else {
                        Some(study.run_info().completion_marker)
                    },
                    reuse_unchanged: !reparse,
                    sort_keys: sort,
                    exclude: [RESULTS_CSV, RESULTS_TABLE_JSON, SCOOP_LOG]
                        .iter()
                        .map(|name| output_dir.join(name))
                        .collect(),
                };
                let (table, report) =
                    harvest_into_store(&options, &study.scoop_info(), &store, &reporter)?;
                reporter.info(report.summary_line());
                (table, Some(report))
            };

            let mut plugins_run = Vec::new();
            if !no_plugins {
                let selected = select_plugins(
                    study.plugin_info(),
                    &omit_plugins,
                    use_plugins.as_deref(),
                    &reporter,
                );
                plugins_run = selected.iter().map(|p| p.name().to_string()).collect();
                let mut ctx = PluginContext::new(&output_dir, &reporter);
                table = run_pipeline(&selected, table, &mut ctx)?;
            }
            reporter.finish(format!("{} rows, {} plugins", table.len(), plugins_run.len()));

            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "scoop",
                    "study": study.name(),
                    "store": store.path().display().to_string(),
                    "study_key": store.study_key(&root),
                    "rows": table.len(),
                    "columns": table.columns(),
                    "harvest": harvest_report.as_ref().map(HarvestReport::to_json),
                    "plugins": plugins_run,
                })));
            }
            print_scoop(&store, &root, &table, harvest_report.as_ref(), &plugins_run);
        }
        Commands::Describe {
            grammar,
            script,
            study: selection,
            combine,
            json,
        } => {
            let axes = parse_study_axes(&grammar, combine.as_deref())?;
            let summary = summarize_grid(&axes)?;
            let wants_study =
                selection.study.is_some() || selection.manifest.is_some() || script.is_some();
            let commands: Vec<(usize, PathBuf, String)> = if wants_study {
                let study = study::resolve_study(
                    selection.study.as_deref(),
                    selection.manifest.as_deref(),
                    script.as_deref(),
                )?;
                let materializer = Materializer::new(&study.run_info(), script.as_deref())?;
                let reporter = Reporter::new("sweep-describe:");
                let runs = materializer.materialize_all(&generate_grid(&axes)?, &reporter)?;
                runs.into_iter()
                    .map(|r| (r.ordinal(), r.output_dir, r.command))
                    .collect()
            } else {
                Vec::new()
            };
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "describe",
                    "axes": axes.iter().map(axis_to_json).collect::<Vec<_>>(),
                    "grid": grid_summary_to_json(&summary),
                    "runs": commands
                        .iter()
                        .map(|(ordinal, dir, command)| json!({
                            "ordinal": ordinal,
                            "output_dir": dir.display().to_string(),
                            "command": command,
                        }))
                        .collect::<Vec<_>>(),
                })));
            }
            print_describe(&axes, &summary);
            for (ordinal, dir, command) in &commands {
                println!("[{:03}] {} :: {}", ordinal, dir.display(), command);
            }
        }
        Commands::Studies { json } => {
            let names = study::study_names();
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "studies",
                    "studies": names,
                })));
            }
            for name in names {
                println!("{}", name);
            }
        }
    }
    Ok(None)
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Run { json, .. }
        | Commands::Scoop { json, .. }
        | Commands::Describe { json, .. }
        | Commands::Studies { json } => *json,
    }
}

fn axis_to_json(axis: &ParameterAxis) -> Value {
    json!({
        "key": axis.key,
        "kind": axis.kind.as_str(),
        "grouped": axis.grouped,
        "values": axis.values.iter().map(|v| v.to_json()).collect::<Vec<_>>(),
    })
}

fn grid_summary_to_json(summary: &GridSummary) -> Value {
    json!({
        "axis_count": summary.axis_count,
        "grouped_keys": summary.grouped_keys,
        "grouped_len": summary.grouped_len,
        "configurations": summary.configurations,
    })
}

fn print_describe(axes: &[ParameterAxis], summary: &GridSummary) {
    for axis in axes {
        let values: Vec<String> = axis.values.iter().map(|v| v.to_string()).collect();
        println!(
            "axis: {} ({}{}) [{}]",
            axis.key,
            axis.kind.as_str(),
            if axis.grouped { ", grouped" } else { "" },
            values.join(", ")
        );
    }
    if !summary.grouped_keys.is_empty() {
        println!(
            "combined: {} (length {})",
            summary.grouped_keys.join(" + "),
            summary.grouped_len
        );
    }
    println!("configurations: {}", summary.configurations);
}

fn print_dispatch(report: &DispatchReport, dry_run: bool) {
    for outcome in &report.outcomes {
        match &outcome.status {
            RunStatus::Planned => println!("[{:03}] {}", outcome.ordinal, outcome.command),
            RunStatus::Failed { failure } => println!(
                "failed: [{:03}] {} ({})",
                outcome.ordinal,
                outcome.output_dir.display(),
                describe_failure(failure)
            ),
            _ => {}
        }
    }
    let counts = report.counts();
    if dry_run {
        println!("planned: {}", counts.planned);
    }
    println!("succeeded: {}", counts.succeeded);
    println!("failed: {}", counts.failed);
    println!("skipped: {}", counts.skipped);
}

fn print_scoop(
    store: &TableStore,
    root: &Path,
    table: &StudyTable,
    report: Option<&HarvestReport>,
    plugins: &[String],
) {
    println!("store: {}", store.path().display());
    println!("study_key: {}", store.study_key(root));
    println!("rows: {}", table.len());
    println!("columns: {}", table.columns().join(", "));
    if let Some(report) = report {
        println!("parsed: {}", report.parsed);
        println!("reused: {}", report.reused);
        println!("unfinished: {}", report.unfinished);
        println!("failed: {}", report.failed.len());
        for failure in &report.failed {
            println!(
                "  {} ({}): {}",
                failure.run_dir.display(),
                failure.file.display(),
                failure.message
            );
        }
    }
    if plugins.is_empty() {
        println!("plugins: none");
    } else {
        println!("plugins: {}", plugins.join(", "));
    }
}
