use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Instant;
use sweep_core::fs::{atomic_write_json_pretty, ensure_dir, is_finished};
use sweep_core::{MaterializedRun, Reporter, Result, SweepError};

pub const STDOUT_CAPTURE: &str = "sweep_stdout.log";
pub const STDERR_CAPTURE: &str = "sweep_stderr.log";
pub const BATCH_SUMMARY: &str = "sweep_batch.json";

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub max_concurrency: usize,
    pub reverse: bool,
    pub dry_run: bool,
    pub completion_marker: String,
}

impl DispatchOptions {
    pub fn new(completion_marker: impl Into<String>) -> Self {
        Self {
            max_concurrency: 1,
            reverse: false,
            dry_run: false,
            completion_marker: completion_marker.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunFailure {
    Exited { code: Option<i32> },
    Launch { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    Planned,
    Skipped,
    Succeeded,
    Failed { failure: RunFailure },
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Planned => "planned",
            RunStatus::Skipped => "skipped",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub ordinal: usize,
    pub output_dir: PathBuf,
    pub command: String,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
}

impl RunOutcome {
    fn without_launch(run: &MaterializedRun, status: RunStatus) -> Self {
        Self {
            ordinal: run.ordinal(),
            output_dir: run.output_dir.clone(),
            command: run.command.clone(),
            status,
            stdout_path: None,
            stderr_path: None,
            started_at: None,
            elapsed_ms: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub planned: usize,
    pub skipped: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub started_at: String,
    pub finished_at: String,
    pub outcomes: Vec<RunOutcome>,
}

impl DispatchReport {
    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for outcome in &self.outcomes {
            match outcome.status {
                RunStatus::Planned => counts.planned += 1,
                RunStatus::Skipped => counts.skipped += 1,
                RunStatus::Succeeded => counts.succeeded += 1,
                RunStatus::Failed { .. } => counts.failed += 1,
            }
        }
        counts
    }

    pub fn failures(&self) -> impl Iterator<Item = &RunOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, RunStatus::Failed { .. }))
    }

    pub fn has_launch_failures(&self) -> bool {
        self.outcomes.iter().any(|o| {
            matches!(
                o.status,
                RunStatus::Failed {
                    failure: RunFailure::Launch { .. }
                }
            )
        })
    }

    pub fn to_json(&self) -> Value {
        json!({
            "schema_version": "sweep_batch_v1",
            "started_at": self.started_at,
            "finished_at": self.finished_at,
            "counts": self.counts(),
            "runs": self.outcomes,
        })
    }
}

pub fn dispatch_order(runs: &[MaterializedRun], reverse: bool) -> Vec<usize> {
    let mut order: Vec<usize> = (0..runs.len()).collect();
    order.sort_by_key(|&i| runs[i].ordinal());
    if reverse {
        order.reverse();
    }
    order
}

#[cfg(unix)]
pub fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(not(unix))]
pub fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

pub fn dispatch(
    runs: &[MaterializedRun],
    options: &DispatchOptions,
    reporter: &Reporter,
) -> Result<DispatchReport> {
    if options.max_concurrency == 0 {
        return Err(SweepError::configuration(
            "max_concurrency",
            "at least one concurrent run is required",
        ));
    }
    let started_at = Utc::now().to_rfc3339();
    let mut outcomes: Vec<RunOutcome> = Vec::with_capacity(runs.len());
    let mut pending: Vec<&MaterializedRun> = Vec::new();

    for idx in dispatch_order(runs, options.reverse) {
        let run = &runs[idx];
        if is_finished(&run.output_dir, &options.completion_marker) {
            reporter.info(format!(
                "skipping {} (finished): {}",
                run.ordinal(),
                run.output_dir.display()
            ));
            outcomes.push(RunOutcome::without_launch(run, RunStatus::Skipped));
        } else if options.dry_run {
            reporter.info(format!("would run {}: {}", run.ordinal(), run.command));
            outcomes.push(RunOutcome::without_launch(run, RunStatus::Planned));
        } else {
            pending.push(run);
        }
    }

    reporter.info(format!(
        "launching {} of {} configurations, {} at a time",
        pending.len(),
        runs.len(),
        options.max_concurrency
    ));

    thread::scope(|scope| {
        let (tx, rx) = mpsc::channel::<RunOutcome>();
        let mut in_flight = 0usize;
        for run in pending {
            if in_flight == options.max_concurrency {
                if let Ok(done) = rx.recv() {
                    report_outcome(reporter, &done);
                    outcomes.push(done);
                }
                in_flight -= 1;
            }
            let tx = tx.clone();
            reporter.info(format!("running {}: {}", run.ordinal(), run.command));
            scope.spawn(move || {
                let _ = tx.send(execute(run));
            });
            in_flight += 1;
        }
        drop(tx);
        for done in rx.iter() {
            report_outcome(reporter, &done);
            outcomes.push(done);
        }
    });

    outcomes.sort_by_key(|o| o.ordinal);
    Ok(DispatchReport {
        started_at,
        finished_at: Utc::now().to_rfc3339(),
        outcomes,
    })
}

fn report_outcome(reporter: &Reporter, outcome: &RunOutcome) {
    match &outcome.status {
        RunStatus::Failed { failure } => reporter.warn(format!(
            "run {} failed ({}): {}",
            outcome.ordinal,
            describe_failure(failure),
            outcome.command
        )),
        status => reporter.info(format!(
            "run {} {} in {} ms",
            outcome.ordinal,
            status.as_str(),
            outcome.elapsed_ms.unwrap_or(0)
        )),
    }
}

pub fn describe_failure(failure: &RunFailure) -> String {
    match failure {
        RunFailure::Exited { code: Some(code) } => format!("exit status {}", code),
        RunFailure::Exited { code: None } => "terminated by signal".to_string(),
        RunFailure::Launch { message } => format!("launch error: {}", message),
    }
}

fn execute(run: &MaterializedRun) -> RunOutcome {
    let started_at = Utc::now().to_rfc3339();
    let clock = Instant::now();
    let stdout_path = run.output_dir.join(STDOUT_CAPTURE);
    let stderr_path = run.output_dir.join(STDERR_CAPTURE);

    let status = match launch(run, &stdout_path, &stderr_path) {
        Ok(exit) if exit.success() => RunStatus::Succeeded,
        Ok(exit) => RunStatus::Failed {
            failure: RunFailure::Exited { code: exit.code() },
        },
        Err(message) => RunStatus::Failed {
            failure: RunFailure::Launch { message },
        },
    };

    RunOutcome {
        ordinal: run.ordinal(),
        output_dir: run.output_dir.clone(),
        command: run.command.clone(),
        status,
        stdout_path: Some(stdout_path),
        stderr_path: Some(stderr_path),
        started_at: Some(started_at),
        elapsed_ms: Some(clock.elapsed().as_millis() as u64),
    }
}

fn launch(
    run: &MaterializedRun,
    stdout_path: &Path,
    stderr_path: &Path,
) -> std::result::Result<std::process::ExitStatus, String> {
    ensure_dir(&run.output_dir).map_err(|e| e.to_string())?;
    let stdout = fs::File::create(stdout_path)
        .map_err(|e| format!("cannot create {}: {}", stdout_path.display(), e))?;
    let stderr = fs::File::create(stderr_path)
        .map_err(|e| format!("cannot create {}: {}", stderr_path.display(), e))?;

    let mut cmd = shell_command(&run.command);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::from(stdout));
    cmd.stderr(Stdio::from(stderr));
    let mut child = cmd.spawn().map_err(|e| e.to_string())?;
    child.wait().map_err(|e| e.to_string())
}

pub fn write_batch_summary(report: &DispatchReport, log_dir: &Path) -> Result<PathBuf> {
    let path = log_dir.join(BATCH_SUMMARY);
    atomic_write_json_pretty(&path, &report.to_json())?;
    Ok(path)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use sweep_core::{Assignment, RunConfiguration};

    fn temp_root(tag: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!(
            "sweep_dispatch_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        ensure_dir(&root).expect("temp root");
        root
    }

    fn run(ordinal: usize, output_dir: PathBuf, command: String) -> MaterializedRun {
        MaterializedRun {
            configuration: RunConfiguration {
                ordinal,
                assignment: Assignment::default(),
            },
            output_dir,
            command,
        }
    }

    fn marker_writing_runs(root: &Path, n: usize) -> Vec<MaterializedRun> {
        (0..n)
            .map(|i| {
                let dir = root.join(format!("{:03}", i));
                let cmd = format!(
                    "echo {i} >> {log} && touch {dir}/done",
                    i = i,
                    log = root.join("order.txt").display(),
                    dir = dir.display()
                );
                run(i, dir, cmd)
            })
            .collect()
    }

    #[test]
    fn runs_in_ordinal_order_and_reports_success() {
        let root = temp_root("order");
        let runs = marker_writing_runs(&root, 3);
        let options = DispatchOptions::new("done");
        let report = dispatch(&runs, &options, &Reporter::new("test")).expect("dispatch");
        assert_eq!(report.counts().succeeded, 3);
        let order = fs::read_to_string(root.join("order.txt")).expect("order");
        assert_eq!(order.lines().collect::<Vec<_>>(), vec!["0", "1", "2"]);
        for run in &runs {
            assert!(run.output_dir.join(STDOUT_CAPTURE).exists());
        }
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn reverse_flag_inverts_dispatch_but_not_report_order() {
        let root = temp_root("reverse");
        let runs = marker_writing_runs(&root, 3);
        let mut options = DispatchOptions::new("done");
        options.reverse = true;
        let report = dispatch(&runs, &options, &Reporter::new("test")).expect("dispatch");
        let order = fs::read_to_string(root.join("order.txt")).expect("order");
        assert_eq!(order.lines().collect::<Vec<_>>(), vec!["2", "1", "0"]);
        let ordinals: Vec<usize> = report.outcomes.iter().map(|o| o.ordinal).collect();
        assert_eq!(ordinals, vec![0, 1, 2]);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn finished_runs_are_skipped_on_resume() {
        let root = temp_root("resume");
        let runs = marker_writing_runs(&root, 3);
        ensure_dir(&runs[1].output_dir).expect("dir");
        fs::write(runs[1].output_dir.join("done"), b"").expect("marker");

        let options = DispatchOptions::new("done");
        let first = dispatch(&runs, &options, &Reporter::new("test")).expect("dispatch");
        assert_eq!(first.outcomes[1].status, RunStatus::Skipped);
        let order = fs::read_to_string(root.join("order.txt")).expect("order");
        assert_eq!(order.lines().collect::<Vec<_>>(), vec!["0", "2"]);

        let second = dispatch(&runs, &options, &Reporter::new("test")).expect("dispatch");
        assert_eq!(second.counts().skipped, 3);
        let order = fs::read_to_string(root.join("order.txt")).expect("order");
        assert_eq!(order.lines().count(), 2, "nothing relaunched");
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn failures_are_isolated() {
        let root = temp_root("isolate");
        let runs = vec![
            run(0, root.join("a"), "echo broken >&2; exit 7".to_string()),
            run(1, root.join("b"), format!("touch {}/done", root.join("b").display())),
        ];
        let options = DispatchOptions::new("done");
        let report = dispatch(&runs, &options, &Reporter::new("test")).expect("dispatch");
        assert_eq!(
            report.outcomes[0].status,
            RunStatus::Failed {
                failure: RunFailure::Exited { code: Some(7) }
            }
        );
        assert_eq!(report.outcomes[1].status, RunStatus::Succeeded);
        assert!(!report.has_launch_failures());
        let captured =
            fs::read_to_string(root.join("a").join(STDERR_CAPTURE)).expect("stderr capture");
        assert_eq!(captured.trim(), "broken");
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn unusable_output_directory_is_a_launch_failure() {
        let root = temp_root("launch");
        fs::write(root.join("file"), b"x").expect("blocker");
        let runs = vec![
            run(0, root.join("file").join("sub"), "true".to_string()),
            run(1, root.join("ok"), "true".to_string()),
        ];
        let report =
            dispatch(&runs, &DispatchOptions::new("done"), &Reporter::new("test")).expect("dispatch");
        assert!(matches!(
            report.outcomes[0].status,
            RunStatus::Failed {
                failure: RunFailure::Launch { .. }
            }
        ));
        assert_eq!(report.outcomes[1].status, RunStatus::Succeeded);
        assert!(report.has_launch_failures());
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn single_slot_never_overlaps_runs() {
        let root = temp_root("serial");
        let lock = root.join("lock");
        let runs: Vec<MaterializedRun> = (0..4)
            .map(|i| {
                run(
                    i,
                    root.join(format!("r{}", i)),
                    format!(
                        "mkdir {lock} || exit 3; sleep 0.05; rmdir {lock}",
                        lock = lock.display()
                    ),
                )
            })
            .collect();
        let report =
            dispatch(&runs, &DispatchOptions::new("done"), &Reporter::new("test")).expect("dispatch");
        assert_eq!(report.counts().succeeded, 4, "{:?}", report.outcomes);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn concurrency_limit_bounds_parallel_runs() {
        let root = temp_root("parallel");
        let runs: Vec<MaterializedRun> = (0..4)
            .map(|i| run(i, root.join(format!("r{}", i)), "sleep 0.2".to_string()))
            .collect();
        let mut options = DispatchOptions::new("done");
        options.max_concurrency = 2;
        let clock = Instant::now();
        let report = dispatch(&runs, &options, &Reporter::new("test")).expect("dispatch");
        assert_eq!(report.counts().succeeded, 4);
        // Two waves of two.
        assert!(clock.elapsed().as_millis() >= 400);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn dry_run_launches_nothing() {
        let root = temp_root("dry");
        let runs = marker_writing_runs(&root, 2);
        let mut options = DispatchOptions::new("done");
        options.dry_run = true;
        let report = dispatch(&runs, &options, &Reporter::new("test")).expect("dispatch");
        assert_eq!(report.counts().planned, 2);
        assert!(!root.join("order.txt").exists());
        assert!(!runs[0].output_dir.exists());
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut options = DispatchOptions::new("done");
        options.max_concurrency = 0;
        let err = dispatch(&[], &options, &Reporter::new("test")).expect_err("invalid");
        assert!(matches!(err, SweepError::Configuration { .. }));
    }

    #[test]
    fn batch_summary_is_written() {
        let root = temp_root("summary");
        let runs = vec![run(0, root.join("x"), "exit 2".to_string())];
        let report =
            dispatch(&runs, &DispatchOptions::new("done"), &Reporter::new("test")).expect("dispatch");
        let path = write_batch_summary(&report, &root).expect("summary");
        let value: Value =
            serde_json::from_slice(&fs::read(&path).expect("read")).expect("json");
        assert_eq!(value["schema_version"], "sweep_batch_v1");
        assert_eq!(value["counts"]["failed"], 1);
        assert_eq!(value["runs"][0]["status"]["state"], "failed");
        assert_eq!(value["runs"][0]["status"]["failure"]["kind"], "exited");
        assert_eq!(value["runs"][0]["status"]["failure"]["code"], 2);
        let _ = fs::remove_dir_all(root);
    }
}
