//! BackUP - Command-line interface for the backup engine.
//!
//! Loads a list of backup jobs and optional engine settings, runs them as one batch, and
//! reports progress to stderr. Typing `stop` on stdin cancels the batch at the next file
//! boundary.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use crossbeam_channel::unbounded;
use engine::{
    BackupEvent, BackupJob, BackupState, BatchReport, CancelToken, ChannelSink, ConfigError,
    EngineSettings, ExecutionMode, FileTransferRecord, JobOrchestrator, ProgressSnapshot,
};

/// BackUP - run backup jobs
#[derive(Parser, Debug)]
#[command(name = "backupjobs")]
#[command(version = "0.1.0")]
#[command(about = "Run full or differential backup jobs with progress tracking")]
struct Args {
    /// JSON file with the list of jobs
    #[arg(long, value_name = "PATH")]
    jobs: PathBuf,

    /// JSON file with engine settings (encryption, blocked processes)
    #[arg(long, value_name = "PATH")]
    settings: Option<PathBuf>,

    /// Run the selected jobs concurrently instead of one after another
    #[arg(long)]
    parallel: bool,

    /// Only run the named job (repeatable); all jobs run when omitted
    #[arg(long, value_name = "NAME")]
    only: Vec<String>,

    /// Append one JSON line per transferred file to this file
    #[arg(long, value_name = "PATH")]
    transfer_log: Option<PathBuf>,

    /// Enable verbose output
    #[arg(long)]
    verbose: bool,
}

/// No remaining-time estimate before a job has run this long.
const ETA_WARMUP: Duration = Duration::from_millis(500);

/// Renders engine events on stderr and appends transfer records to the log file.
struct CliReporter {
    verbose: bool,
    parallel: bool,
    start_time: Instant,
    job_started: HashMap<String, Instant>,
    transfer_log: Option<BufWriter<File>>,
    failed_transfers: Vec<FileTransferRecord>,
}

impl CliReporter {
    fn new(verbose: bool, parallel: bool, transfer_log: Option<File>) -> Self {
        CliReporter {
            verbose,
            parallel,
            start_time: Instant::now(),
            job_started: HashMap::new(),
            transfer_log: transfer_log.map(BufWriter::new),
            failed_transfers: Vec::new(),
        }
    }

    fn format_bytes(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit_idx = 0;

        while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
            size /= 1024.0;
            unit_idx += 1;
        }

        format!("{:.2} {}", size, UNITS[unit_idx])
    }

    fn format_duration(elapsed: std::time::Duration) -> String {
        let secs = elapsed.as_secs();
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        let secs = secs % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, mins, secs)
        } else if mins > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}s", secs)
        }
    }

    fn format_clock(remaining: Duration) -> String {
        let secs = remaining.as_secs();
        format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
    }

    /// Time left for a job at its average byte throughput so far.
    fn estimate_remaining(elapsed: Duration, bytes_done: u64, total_bytes: u64) -> Option<Duration> {
        if elapsed < ETA_WARMUP || bytes_done == 0 || bytes_done >= total_bytes {
            return None;
        }
        let remaining = (total_bytes - bytes_done) as f64 / bytes_done as f64;
        Some(Duration::from_secs_f64(elapsed.as_secs_f64() * remaining))
    }

    fn eta_suffix(&self, job_name: &str, progress: &ProgressSnapshot) -> String {
        self.job_started
            .get(job_name)
            .and_then(|started| {
                Self::estimate_remaining(
                    started.elapsed(),
                    progress.bytes_processed,
                    progress.total_bytes,
                )
            })
            .map(|eta| format!(" ETA {}", Self::format_clock(eta)))
            .unwrap_or_default()
    }

    fn progress_bar(percent: u8) -> String {
        let filled = usize::from(percent.min(100) / 5);
        format!("[{}{}] {:3}%", "=".repeat(filled), " ".repeat(20 - filled), percent)
    }

    fn handle(&mut self, event: BackupEvent) -> io::Result<()> {
        match event {
            BackupEvent::RunState {
                job_name, state, ..
            } => match state {
                BackupState::Active => {
                    self.job_started.insert(job_name.clone(), Instant::now());
                    eprintln!("[{}] started", job_name);
                }
                BackupState::Inactive => eprintln!("[{}] stopped", job_name),
                BackupState::Error => eprintln!("[{}] finished with errors", job_name),
                BackupState::Paused => eprintln!("[{}] paused", job_name),
            },
            BackupEvent::Progress { job_name, progress } => {
                let eta = self.eta_suffix(&job_name, &progress);
                if self.verbose {
                    eprintln!(
                        "[{}] {} {}/{} files, {}/{}{}: {}",
                        job_name,
                        Self::progress_bar(progress.percentage()),
                        progress.files_processed,
                        progress.total_files,
                        Self::format_bytes(progress.bytes_processed),
                        Self::format_bytes(progress.total_bytes),
                        eta,
                        progress.current_file_name
                    );
                } else if !self.parallel {
                    // Trailing blanks clear a longer ETA from the previous line
                    eprint!(
                        "\r[{}] {}{:<13}",
                        job_name,
                        Self::progress_bar(progress.percentage()),
                        eta
                    );
                    if progress.files_processed == progress.total_files {
                        eprintln!();
                    }
                }
            }
            BackupEvent::BatchProgress { percent } => {
                if self.parallel && !self.verbose {
                    eprint!("\rBatch: {}", Self::progress_bar(percent));
                    if percent == 100 {
                        eprintln!();
                    }
                }
            }
            BackupEvent::Transfer(record) => {
                if let Some(log) = self.transfer_log.as_mut() {
                    serde_json::to_writer(&mut *log, &record)?;
                    log.write_all(b"\n")?;
                    log.flush()?;
                }
                if record.copy_failed() || record.encryption_failed() {
                    self.failed_transfers.push(record);
                }
            }
        }
        Ok(())
    }

    fn finish(&mut self, report: &BatchReport) -> io::Result<()> {
        if let Some(log) = self.transfer_log.as_mut() {
            log.flush()?;
        }

        eprintln!();
        eprintln!("Batch {} ({:?}):", report.id, report.mode);
        for job in &report.outcomes {
            eprintln!("  {}: {}", job.job_name, job.outcome);
        }
        eprintln!("Elapsed: {}", Self::format_duration(self.start_time.elapsed()));

        if !self.failed_transfers.is_empty() {
            eprintln!();
            eprintln!("Failed files:");
            for record in &self.failed_transfers {
                let step = if record.copy_failed() { "copy" } else { "encryption" };
                eprintln!(
                    "  [{}] {}: {} failed",
                    record.job_name,
                    record.source_path.display(),
                    step
                );
            }
        }
        Ok(())
    }
}

/// Load the job list written by the job-definition tooling.
fn load_jobs(path: &Path) -> Result<Vec<BackupJob>, ConfigError> {
    let json = fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&json).map_err(|e| ConfigError::Parse {
        what: path.display().to_string(),
        source: e,
    })
}

fn select_jobs(jobs: Vec<BackupJob>, only: &[String]) -> Result<Vec<BackupJob>, String> {
    if let Some(job) = jobs.iter().find(|job| job.name.trim().is_empty()) {
        return Err(format!(
            "Job with source {} has an empty name",
            job.source_directory.display()
        ));
    }
    if only.is_empty() {
        return Ok(jobs);
    }
    if let Some(unknown) = only.iter().find(|name| !jobs.iter().any(|job| &job.name == *name)) {
        return Err(format!("Unknown job '{}'", unknown));
    }
    Ok(jobs
        .into_iter()
        .filter(|job| only.contains(&job.name))
        .collect())
}

/// Cancel the running batch when `stop` is typed on stdin.
fn spawn_stop_listener(orchestrator: Arc<JobOrchestrator>) {
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().eq_ignore_ascii_case("stop") {
                orchestrator.request_stop();
            }
        }
    });
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .init();
}

/// Parse and validate command-line arguments, then run the batch
fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    let exit_code = match run_cli(&args, true) {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            2
        }
    };

    std::process::exit(exit_code);
}

/// Main CLI logic - separated for testability.
///
/// Returns whether every job completed.
fn run_cli(args: &Args, listen_stdin: bool) -> Result<bool, String> {
    let settings = match &args.settings {
        Some(path) => EngineSettings::load(path).map_err(|e| e.to_string())?,
        None => EngineSettings::default(),
    };
    let jobs = load_jobs(&args.jobs).map_err(|e| e.to_string())?;
    let mut jobs = select_jobs(jobs, &args.only)?;

    let transfer_log = match &args.transfer_log {
        Some(path) => Some(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| format!("Cannot open transfer log {}: {}", path.display(), e))?,
        ),
        None => None,
    };

    let mode = if args.parallel {
        ExecutionMode::Parallel
    } else {
        ExecutionMode::Sequential
    };

    let orchestrator = Arc::new(JobOrchestrator::from_settings(&settings));
    if listen_stdin {
        spawn_stop_listener(Arc::clone(&orchestrator));
    }

    let (tx, rx) = unbounded::<BackupEvent>();
    let cancel = CancelToken::new();
    let worker = {
        let orchestrator = Arc::clone(&orchestrator);
        let cancel = cancel.clone();
        thread::spawn(move || {
            let sink = ChannelSink::new(tx);
            orchestrator.run(&mut jobs, mode, &cancel, &sink)
        })
    };

    let mut reporter = CliReporter::new(args.verbose, args.parallel, transfer_log);
    for event in rx.iter() {
        if let Err(e) = reporter.handle(event) {
            // The batch token, so this also covers a batch that has not registered yet
            cancel.cancel();
            if worker.join().is_err() {
                tracing::error!("Backup worker panicked after the transfer log failed");
            }
            return Err(format!("Failed to write transfer log: {}", e));
        }
    }

    let report = worker
        .join()
        .map_err(|_| "Backup worker panicked".to_string())?
        .map_err(|e| e.to_string())?;
    reporter
        .finish(&report)
        .map_err(|e| format!("Failed to write transfer log: {}", e))?;

    Ok(report.all_completed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_jobs(dir: &Path, jobs: &[(&str, &Path, &Path, &str)]) -> PathBuf {
        let entries: Vec<serde_json::Value> = jobs
            .iter()
            .map(|(name, src, dst, kind)| {
                serde_json::json!({
                    "name": name,
                    "source_directory": src,
                    "target_directory": dst,
                    "backup_type": kind,
                })
            })
            .collect();
        let path = dir.join("jobs.json");
        fs::write(&path, serde_json::to_string(&entries).unwrap()).expect("Failed to write jobs");
        path
    }

    fn args(jobs: PathBuf) -> Args {
        Args {
            jobs,
            settings: None,
            parallel: false,
            only: Vec::new(),
            transfer_log: None,
            verbose: false,
        }
    }

    #[test]
    fn test_cli_runs_jobs_and_writes_transfer_log() {
        let work = TempDir::new().expect("Failed to create temp dir");
        let src = work.path().join("src");
        let dst = work.path().join("dst");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("test.txt"), "hello").expect("Failed to write file");
        let jobs = write_jobs(work.path(), &[("docs", src.as_path(), dst.as_path(), "Full")]);

        let mut args = args(jobs);
        args.transfer_log = Some(work.path().join("transfers.jsonl"));

        let result = run_cli(&args, false);
        assert_eq!(result, Ok(true));
        assert_eq!(fs::read_to_string(dst.join("test.txt")).unwrap(), "hello");

        let log = fs::read_to_string(work.path().join("transfers.jsonl")).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 1);
        let record: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(record["job_name"], "docs");
        assert_eq!(record["file_size"], 5);
    }

    #[test]
    fn test_cli_parallel_reports_failed_job() {
        let work = TempDir::new().expect("Failed to create temp dir");
        let src = work.path().join("src");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("a.txt"), "a").unwrap();
        let missing = work.path().join("missing");
        let jobs = write_jobs(
            work.path(),
            &[
                ("good", src.as_path(), work.path().join("dst1").as_path(), "Differential"),
                ("bad", missing.as_path(), work.path().join("dst2").as_path(), "Full"),
            ],
        );

        let mut args = args(jobs);
        args.parallel = true;

        assert_eq!(run_cli(&args, false), Ok(false));
        assert!(work.path().join("dst1").join("a.txt").exists());
    }

    #[test]
    fn test_cli_only_selects_jobs() {
        let work = TempDir::new().expect("Failed to create temp dir");
        let src = work.path().join("src");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("a.txt"), "a").unwrap();
        let jobs = write_jobs(
            work.path(),
            &[
                ("one", src.as_path(), work.path().join("dst1").as_path(), "Full"),
                ("two", src.as_path(), work.path().join("dst2").as_path(), "Full"),
            ],
        );

        let mut args = args(jobs);
        args.only = vec!["two".to_string()];

        assert_eq!(run_cli(&args, false), Ok(true));
        assert!(!work.path().join("dst1").exists());
        assert!(work.path().join("dst2").join("a.txt").exists());
    }

    #[test]
    fn test_cli_rejects_unknown_job_name() {
        let work = TempDir::new().expect("Failed to create temp dir");
        let jobs = write_jobs(work.path(), &[("one", work.path(), work.path().join("dst").as_path(), "Full")]);

        let mut args = args(jobs);
        args.only = vec!["nope".to_string()];

        assert!(run_cli(&args, false).is_err(), "CLI should reject unknown job");
    }

    #[test]
    fn test_cli_rejects_invalid_jobs_file() {
        let work = TempDir::new().expect("Failed to create temp dir");
        let path = work.path().join("jobs.json");
        fs::write(&path, "[{\"name\": \"x\"}]").unwrap();

        assert!(run_cli(&args(path), false).is_err(), "CLI should reject invalid jobs file");
    }

    #[test]
    fn test_cli_rejects_missing_settings_file() {
        let work = TempDir::new().expect("Failed to create temp dir");
        let jobs = write_jobs(work.path(), &[]);

        let mut args = args(jobs);
        args.settings = Some(work.path().join("settings.json"));

        assert!(run_cli(&args, false).is_err(), "CLI should reject missing settings");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_cli_stops_batch_when_transfer_log_fails() {
        let work = TempDir::new().expect("Failed to create temp dir");
        let src = work.path().join("src");
        let dst = work.path().join("dst");
        fs::create_dir(&src).unwrap();
        for i in 0..50 {
            fs::write(src.join(format!("file{:02}.txt", i)), "data").unwrap();
        }
        let jobs = write_jobs(work.path(), &[("docs", src.as_path(), dst.as_path(), "Full")]);

        let mut args = args(jobs);
        // Every write fails with ENOSPC
        args.transfer_log = Some(PathBuf::from("/dev/full"));

        let result = run_cli(&args, false);
        assert!(
            matches!(&result, Err(msg) if msg.contains("transfer log")),
            "{:?}",
            result
        );

        // The worker was joined, so nothing copies after the error is returned
        let count = || fs::read_dir(&dst).map(|dir| dir.count()).unwrap_or(0);
        let copied = count();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(count(), copied);
    }

    #[test]
    fn test_estimate_remaining() {
        assert_eq!(
            CliReporter::estimate_remaining(Duration::from_secs(2), 100, 400),
            Some(Duration::from_secs(6))
        );
        assert_eq!(
            CliReporter::estimate_remaining(Duration::from_millis(100), 100, 400),
            None,
            "no estimate during warmup"
        );
        assert_eq!(CliReporter::estimate_remaining(Duration::from_secs(2), 0, 400), None);
        assert_eq!(CliReporter::estimate_remaining(Duration::from_secs(2), 400, 400), None);
    }

    #[test]
    fn test_format_clock() {
        assert_eq!(CliReporter::format_clock(Duration::from_secs(3725)), "01:02:05");
        assert_eq!(CliReporter::format_clock(Duration::from_millis(900)), "00:00:00");
    }

    #[test]
    fn test_progress_bar() {
        assert_eq!(CliReporter::progress_bar(0), format!("[{}]   0%", " ".repeat(20)));
        assert_eq!(CliReporter::progress_bar(100), format!("[{}] 100%", "=".repeat(20)));
    }
}
