// src/main.rs

//! The entry point for the `afd-mon` binary. A single executable plays four
//! roles depending on how it's invoked, since the supervisor (component E)
//! launches monitor and log workers by re-executing itself with a mode flag
//! rather than `fork()`ing a shared image (spec §4.E "`start_process`
//! contract").

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};

use afd_mon::config::AfdMonConfig;
use afd_mon::core::config_loader;
use afd_mon::core::errors::AfdMonError;
use afd_mon::core::log_worker::LogWorker;
use afd_mon::core::mon_log;
use afd_mon::core::monitor_worker;
use afd_mon::core::msa::store::MsaStore;
use afd_mon::core::options::AfdOptions;
use afd_mon::core::supervisor::Supervisor;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();

    let exit_code = match args.get(1).map(String::as_str) {
        Some("--monitor-worker") => run_monitor_worker(&args).await,
        Some("--log-worker") => run_log_worker(&args).await,
        Some("--dump-msa") => run_dump_msa(&args).await,
        Some("--version") => {
            println!("afd-mon version {}", env!("CARGO_PKG_VERSION"));
            0
        }
        _ => run_supervisor(&args).await,
    };

    std::process::exit(exit_code);
}

fn init_tracing(log_level: &str) {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.to_string());
    let _ = tracing_subscriber::fmt().with_env_filter(filter).compact().with_ansi(true).try_init();
}

/// Loads the ambient `AfdMonConfig` for a worker process re-exec'd with
/// `work_dir` as its only piece of context (spec §2.3).
fn load_ambient_config(work_dir: &std::path::Path) -> Result<AfdMonConfig, AfdMonError> {
    let path = work_dir.join("config.toml");
    AfdMonConfig::from_file(&path).map_err(|e| AfdMonError::Internal(format!("loading {}: {e}", path.display())))
}

/// Default, no-flag (or `--config <path>`) mode: starts the supervisor
/// (component E), which loads D, rebuilds B, and forks F/G pairs for every
/// configured remote (spec §4.E).
async fn run_supervisor(args: &[String]) -> i32 {
    let config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match AfdMonConfig::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load configuration from \"{}\": {e}", config_path.display());
            return AfdMonError::Incorrect.exit_code();
        }
    };

    init_tracing(&config.log_level);
    info!(work_dir = %config.work_dir.display(), "starting afd-mon supervisor");

    if let Some(addr) = config.metrics_addr.clone() {
        tokio::spawn(afd_mon::core::metrics_server::run(addr));
    }

    let fifodir = config.work_dir.join("fifodir");
    let afd_mon_config = config.resolved_afd_mon_config();
    let retry_interval = std::time::Duration::from_secs(config.retry_interval_s);
    match Supervisor::start(config.work_dir.clone(), afd_mon_config, retry_interval).await {
        Ok(supervisor) => match supervisor.run().await {
            Ok(()) => 0,
            Err(e) => {
                error!(error = %e, "supervisor exited with an error");
                mon_log::write_fatal_line(&fifodir, "ERROR", "supervisor/mod.rs", &format!("{e}"));
                e.exit_code()
            }
        },
        Err(e) => {
            error!(error = %e, "supervisor failed to start");
            mon_log::write_fatal_line(&fifodir, "ERROR", "supervisor/mod.rs", &format!("{e}"));
            e.exit_code()
        }
    }
}

/// `--monitor-worker <work_dir> <row>`: component F's entry point. Attaches
/// to the live MSA and polls one remote until the supervisor kills this
/// process (spec §4.F).
async fn run_monitor_worker(args: &[String]) -> i32 {
    let work_dir = match args.get(2) {
        Some(p) => PathBuf::from(p),
        None => {
            eprintln!("usage: afd-mon --monitor-worker <work_dir> <row>");
            return AfdMonError::Incorrect.exit_code();
        }
    };
    let row: usize = match args.get(3).and_then(|s| s.parse().ok()) {
        Some(r) => r,
        None => {
            eprintln!("usage: afd-mon --monitor-worker <work_dir> <row>");
            return AfdMonError::Incorrect.exit_code();
        }
    };

    let config = match load_ambient_config(&work_dir) {
        Ok(c) => c,
        Err(e) => return e.exit_code(),
    };
    init_tracing(&config.log_level);

    let fleet = match config_loader::load_from_file(&config.resolved_afd_mon_config()) {
        Ok(f) => f,
        Err(e) => {
            error!(error = %e, "monitor worker failed to load fleet configuration");
            return e.exit_code();
        }
    };
    let entry = match fleet.get(row) {
        Some(e) => e.clone(),
        None => {
            error!(row, "monitor worker: no such row in fleet configuration");
            return AfdMonError::Incorrect.exit_code();
        }
    };

    let store = match MsaStore::attach_active(&work_dir.join("fifodir")) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "monitor worker failed to attach to MSA");
            return e.exit_code();
        }
    };

    let shutdown = Arc::new(tokio::sync::Notify::new());
    spawn_shutdown_signals(shutdown.clone());

    info!(alias = %entry.alias, row, "monitor worker starting");
    monitor_worker::run(&store, row, &entry, config.tcp_timeout_s, &shutdown).await;
    0
}

/// `--log-worker <work_dir> <row> <log_capabilities>`: component G's entry
/// point. Streams one remote's requested log kinds into the local rolling
/// log tree (spec §4.G). Unlike the monitor worker, every exit path here is
/// an error; the supervisor restarts it.
async fn run_log_worker(args: &[String]) -> i32 {
    let work_dir = match args.get(2) {
        Some(p) => PathBuf::from(p),
        None => {
            eprintln!("usage: afd-mon --log-worker <work_dir> <row> <log_capabilities>");
            return AfdMonError::Incorrect.exit_code();
        }
    };
    let row: usize = match args.get(3).and_then(|s| s.parse().ok()) {
        Some(r) => r,
        None => {
            eprintln!("usage: afd-mon --log-worker <work_dir> <row> <log_capabilities>");
            return AfdMonError::Incorrect.exit_code();
        }
    };
    let log_capabilities: u32 = args.get(4).and_then(|s| s.parse().ok()).unwrap_or(0);

    let config = match load_ambient_config(&work_dir) {
        Ok(c) => c,
        Err(e) => return e.exit_code(),
    };
    init_tracing(&config.log_level);

    let fleet = match config_loader::load_from_file(&config.resolved_afd_mon_config()) {
        Ok(f) => f,
        Err(e) => {
            error!(error = %e, "log worker failed to load fleet configuration");
            return e.exit_code();
        }
    };
    let entry = match fleet.get(row) {
        Some(e) => e.clone(),
        None => {
            error!(row, "log worker: no such row in fleet configuration");
            return AfdMonError::Incorrect.exit_code();
        }
    };

    let store = match MsaStore::attach_active(&work_dir.join("fifodir")) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "log worker failed to attach to MSA");
            return e.exit_code();
        }
    };

    let options = AfdOptions::from_bits_truncate(log_capabilities);
    let mut worker = LogWorker::new(
        config.resolved_rlog_dir(),
        row,
        entry.alias.clone(),
        entry.host[0].clone(),
        entry.port[0],
        options,
        config.tcp_timeout_s,
        entry.poll_interval_s as u64,
    );

    info!(alias = %entry.alias, row, "log worker starting");
    let err = worker.run(&store).await;
    error!(alias = %entry.alias, error = %err, "log worker session ended");
    mon_log::write_fatal_line(
        &work_dir.join("fifodir"),
        "ERROR",
        "log_worker/mod.rs",
        &format!("{} session ended: {err}", entry.alias),
    );
    err.exit_code()
}

/// `--dump-msa <work_dir>`: a tiny read-only diagnostic dumper, attaching
/// passively and printing every row (spec §4.B `attach_passive`).
async fn run_dump_msa(args: &[String]) -> i32 {
    let work_dir = match args.get(2) {
        Some(p) => PathBuf::from(p),
        None => {
            eprintln!("usage: afd-mon --dump-msa <work_dir>");
            return AfdMonError::Incorrect.exit_code();
        }
    };

    let store = match MsaStore::attach_passive(&work_dir.join("fifodir")) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("failed to attach to MSA: {e}");
            return e.exit_code();
        }
    };

    println!("msa_id={} rows={}", store.msa_id(), store.row_count());
    for row in store.read_all_rows() {
        println!(
            "{:<12} connect={:?} amg={:?} fd={:?} fc={} log_bytes_received={}",
            row.alias,
            row.connect_status,
            row.amg,
            row.fd,
            row.fc,
            row.log_bytes_received.windows[0],
        );
    }
    0
}

/// Wires SIGINT and SIGTERM to a shared `Notify`, the same cooperative
/// shutdown signal `monitor_worker::run` races its connect/poll loops
/// against.
fn spawn_shutdown_signals(shutdown: Arc<tokio::sync::Notify>) {
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(_) => return,
        };
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => return,
        };
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
        shutdown.notify_waiters();
    });
}
