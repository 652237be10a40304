use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{anyhow, bail, Context};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use texcopy::{
    plan, run_case, CaseOutcome, CheckReport, EngineError, RunCase, RunError, SoftEngine, Suite,
    TextureFormat, TransferEngine, WgpuEngine,
};
use tracing_subscriber::EnvFilter;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum EngineKind {
    /// CPU reference engine
    Soft,
    /// Headless wgpu device
    Wgpu,
}

#[derive(Parser, Debug)]
#[command(
    name = "texcopy",
    about = "Verify linear-data <-> texture copies against a transfer engine."
)]
struct Args {
    /// Transfer engine to run the cases on
    #[arg(long, value_enum, default_value_t = EngineKind::Soft)]
    engine: EngineKind,

    /// Suite to run (repeatable; defaults to every suite)
    #[arg(long = "suite", value_name = "NAME")]
    suites: Vec<Suite>,

    /// Only run cases using this format (repeatable)
    #[arg(long = "format", value_name = "FORMAT")]
    formats: Vec<TextureFormat>,

    /// Number of worker threads, each with its own engine
    #[arg(long, value_name = "N", default_value_t = 1)]
    jobs: usize,

    /// Write a JSON report to this path
    #[arg(long, value_name = "PATH")]
    json: Option<PathBuf>,

    /// Stop after the first failing or erroring case
    #[arg(long, action = clap::ArgAction::SetTrue)]
    fail_fast: bool,

    /// Print the runnable cases and exit
    #[arg(long, action = clap::ArgAction::SetTrue)]
    list: bool,

    /// Emit logs as JSON
    #[arg(long, action = clap::ArgAction::SetTrue)]
    log_json: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum Status {
    Pass,
    Fail,
    Error,
    Skipped,
}

#[derive(Debug, Serialize)]
struct CaseRecord {
    suite: &'static str,
    status: Status,
    case: RunCase,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<CheckReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Default, Serialize)]
struct Totals {
    passed: usize,
    failed: usize,
    errors: usize,
    skipped: usize,
}

impl Totals {
    fn count(&mut self, status: Status) {
        match status {
            Status::Pass => self.passed += 1,
            Status::Fail => self.failed += 1,
            Status::Error => self.errors += 1,
            Status::Skipped => self.skipped += 1,
        }
    }
}

#[derive(Debug, Serialize)]
struct Report {
    engine: &'static str,
    #[serde(flatten)]
    totals: Totals,
    cases: Vec<CaseRecord>,
}

struct Planned {
    suite: Suite,
    case: RunCase,
}

type CaseResult = Result<CaseOutcome, RunError>;

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);
    run(args)
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn require_webgpu() -> bool {
    let Ok(raw) = std::env::var("TEXCOPY_REQUIRE_WEBGPU") else {
        return false;
    };
    let v = raw.trim();
    v == "1"
        || v.eq_ignore_ascii_case("true")
        || v.eq_ignore_ascii_case("yes")
        || v.eq_ignore_ascii_case("on")
}

/// Returns `None` when the wgpu engine has no adapter and a GPU is not required.
fn create_engine(kind: EngineKind) -> anyhow::Result<Option<Box<dyn TransferEngine>>> {
    match kind {
        EngineKind::Soft => Ok(Some(Box::new(SoftEngine::new()))),
        EngineKind::Wgpu => match pollster::block_on(WgpuEngine::new_headless()) {
            Ok(engine) => Ok(Some(Box::new(engine))),
            Err(EngineError::AdapterNotFound) if !require_webgpu() => Ok(None),
            Err(err) => Err(err).context("create wgpu engine"),
        },
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    if args.jobs == 0 {
        bail!("--jobs must be at least 1");
    }
    let suites = if args.suites.is_empty() {
        Suite::ALL.to_vec()
    } else {
        args.suites.clone()
    };

    let Some(mut engine) = create_engine(args.engine)? else {
        tracing::warn!("no wgpu adapter found; set TEXCOPY_REQUIRE_WEBGPU=1 to make this an error");
        println!("no wgpu adapter found; nothing was run");
        return Ok(());
    };
    let engine_name = engine.name();

    let wanted = |case: &RunCase| args.formats.is_empty() || args.formats.contains(&case.format);
    let mut runnable = Vec::new();
    let mut records = Vec::new();
    for &suite in &suites {
        let plan = plan(suite, engine.as_ref()).with_context(|| format!("plan suite {suite}"))?;
        runnable.extend(
            plan.runnable
                .into_iter()
                .filter(|case| wanted(case))
                .map(|case| Planned { suite, case }),
        );
        records.extend(plan.skipped.into_iter().filter(|case| wanted(case)).map(|case| {
            CaseRecord {
                suite: suite.name(),
                status: Status::Skipped,
                case,
                report: None,
                error: None,
            }
        }));
    }

    if args.list {
        for planned in &runnable {
            println!("{}\t{}", planned.suite, planned.case);
        }
        return Ok(());
    }

    let results = if args.jobs == 1 {
        let next = AtomicUsize::new(0);
        let stop = AtomicBool::new(false);
        run_worker(engine.as_mut(), &runnable, &next, &stop, args.fail_fast)
    } else {
        run_parallel(args.engine, engine, &runnable, args.jobs, args.fail_fast)?
    };

    for (index, result) in results {
        let planned = &runnable[index];
        let record = match result {
            Ok(outcome) => CaseRecord {
                suite: planned.suite.name(),
                status: if outcome.passed() {
                    Status::Pass
                } else {
                    Status::Fail
                },
                case: outcome.case,
                report: Some(outcome.report),
                error: None,
            },
            Err(err) => {
                tracing::error!(case = %planned.case, %err, "case aborted");
                CaseRecord {
                    suite: planned.suite.name(),
                    status: Status::Error,
                    case: planned.case,
                    report: None,
                    error: Some(err.to_string()),
                }
            }
        };
        records.push(record);
    }

    let mut totals = Totals::default();
    for &suite in &suites {
        let mut per_suite = Totals::default();
        for record in records.iter().filter(|r| r.suite == suite.name()) {
            per_suite.count(record.status);
            totals.count(record.status);
        }
        println!(
            "{suite}: {} passed, {} failed, {} errors, {} skipped",
            per_suite.passed, per_suite.failed, per_suite.errors, per_suite.skipped
        );
    }
    println!(
        "total ({engine_name}): {} passed, {} failed, {} errors, {} skipped",
        totals.passed, totals.failed, totals.errors, totals.skipped
    );

    let bad = totals.failed + totals.errors;
    if let Some(path) = &args.json {
        let report = Report {
            engine: engine_name,
            totals,
            cases: records,
        };
        let json = serde_json::to_string_pretty(&report).context("serialize report")?;
        fs::write(path, json).with_context(|| format!("write report {}", path.display()))?;
    }

    if bad > 0 {
        bail!("{bad} case(s) did not pass");
    }
    Ok(())
}

/// Pulls cases off the shared index until none are left or `stop` is raised.
fn run_worker(
    engine: &mut dyn TransferEngine,
    cases: &[Planned],
    next: &AtomicUsize,
    stop: &AtomicBool,
    fail_fast: bool,
) -> Vec<(usize, CaseResult)> {
    let mut out = Vec::new();
    while !stop.load(Ordering::Relaxed) {
        let index = next.fetch_add(1, Ordering::Relaxed);
        let Some(planned) = cases.get(index) else {
            break;
        };
        let result = pollster::block_on(run_case(&mut *engine, &planned.case));
        let passed = matches!(&result, Ok(outcome) if outcome.passed());
        if !passed && fail_fast {
            stop.store(true, Ordering::Relaxed);
        }
        out.push((index, result));
    }
    out
}

/// Runs `cases` on `jobs` workers. The first worker reuses `engine`; the others create their
/// own, so no surface or queue is ever shared between threads.
fn run_parallel(
    kind: EngineKind,
    mut engine: Box<dyn TransferEngine>,
    cases: &[Planned],
    jobs: usize,
    fail_fast: bool,
) -> anyhow::Result<Vec<(usize, CaseResult)>> {
    let next = AtomicUsize::new(0);
    let stop = AtomicBool::new(false);

    let mut results = std::thread::scope(|scope| -> anyhow::Result<Vec<(usize, CaseResult)>> {
        let workers: Vec<_> = (1..jobs)
            .map(|worker| {
                let (next, stop) = (&next, &stop);
                scope.spawn(move || -> anyhow::Result<Vec<(usize, CaseResult)>> {
                    let mut engine = create_engine(kind)?
                        .ok_or_else(|| anyhow!("worker {worker}: no adapter available"))?;
                    Ok(run_worker(engine.as_mut(), cases, next, stop, fail_fast))
                })
            })
            .collect();

        let mut results = run_worker(engine.as_mut(), cases, &next, &stop, fail_fast);
        for (worker, handle) in workers.into_iter().enumerate() {
            let done = handle
                .join()
                .map_err(|_| anyhow!("worker {} panicked", worker + 1))??;
            results.extend(done);
        }
        Ok(results)
    })?;

    results.sort_by_key(|(index, _)| *index);
    Ok(results)
}
