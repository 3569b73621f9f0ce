//! file-exporter - Prometheus exporter for the size of one directory.
//!
//! Watches a directory for changes, re-scans its total size after every
//! change, and serves the result on `/metrics`.

mod access_log;
mod handlers;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use file_exporter_core::metrics::DirectoryMetrics;
use file_exporter_core::source::{ChangeSource, DEFAULT_QUEUE_CAPACITY, OverflowPolicy, QueueConfig};
use file_exporter_core::update::{ScanErrorPolicy, UpdateLoop, publish_initial_size};
use file_exporter_core::walker::{DEFAULT_MAX_DEPTH, DirectorySizer, FileSystem, RealFs};

// ============================================================
// CLI
// ============================================================

#[derive(Parser)]
#[command(
    name = "file-exporter",
    about = "Exports the size of a directory as Prometheus metrics",
    version = file_exporter_core::VERSION
)]
struct Args {
    /// Address on which to expose metrics. A bare ":port" listens on all interfaces.
    #[arg(short, long, default_value = ":9393", env = "FILE_EXPORTER_LISTEN_HTTP")]
    listen: String,

    /// Path to directory for watch.
    #[arg(short, long, default_value = ".", env = "FILE_EXPORTER_DIRECTORY_NAME")]
    directory: PathBuf,

    /// Maximum directory nesting below the watched directory. Deeper trees fail the scan.
    #[arg(long, default_value_t = DEFAULT_MAX_DEPTH)]
    max_depth: usize,

    /// Capacity of the change event queue.
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY, value_parser = parse_capacity)]
    queue_capacity: usize,

    /// What to do with new events when the queue is full: block, drop-oldest or drop-newest.
    #[arg(long, default_value_t = OverflowPolicy::Block)]
    overflow: OverflowPolicy,

    /// What to do when a re-scan fails: exit (terminate the process) or skip (keep the last size).
    #[arg(long, default_value_t = ScanErrorPolicy::Exit)]
    on_scan_error: ScanErrorPolicy,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

fn parse_capacity(s: &str) -> Result<usize, String> {
    match s.trim().parse::<usize>() {
        Ok(0) => Err("queue capacity must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(format!("invalid capacity '{}': {}", s, e)),
    }
}

/// Expands a bare ":port" into an all-interfaces address.
fn normalize_listen_addr(listen: &str) -> String {
    let listen = listen.trim();
    if listen.starts_with(':') {
        format!("0.0.0.0{}", listen)
    } else {
        listen.to_string()
    }
}

/// Initializes the tracing subscriber with the appropriate log level.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["file_exporter", "file_exporter_core"] {
        if let Ok(directive) = format!("{}={}", target, level).parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

// ============================================================
// Main
// ============================================================

fn main() {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
        .block_on(async_main(args));
}

async fn async_main(args: Args) {
    info!(
        version = file_exporter_core::VERSION,
        directory = %args.directory.display(),
        listen = %args.listen,
        max_depth = args.max_depth,
        queue_capacity = args.queue_capacity,
        overflow = %args.overflow,
        on_scan_error = %args.on_scan_error,
        "starting file-exporter"
    );

    let fs = RealFs::new();
    if !fs.exists(&args.directory) {
        error!(path = %args.directory.display(), "directory does not exist");
        process::exit(1);
    }

    let metrics = match DirectoryMetrics::new() {
        Ok(m) => Arc::new(m),
        Err(e) => {
            error!(error = %e, "failed to register metrics");
            process::exit(1);
        }
    };

    let queue = QueueConfig {
        capacity: args.queue_capacity,
        overflow: args.overflow,
    };
    let (mut source, streams) = match ChangeSource::new(queue) {
        Ok(pair) => pair,
        Err(e) => {
            error!(error = %e, "failed to start directory watcher");
            process::exit(1);
        }
    };
    info!("started new directory watcher");

    let sizer = Arc::new(DirectorySizer::new(fs).with_max_depth(args.max_depth));
    if let Err(e) = publish_initial_size(&*sizer, &*metrics, &args.directory) {
        error!(error = %e, "failed to compute initial directory size");
        process::exit(1);
    }

    let update_loop = UpdateLoop::new(sizer, metrics.clone(), args.directory.clone(), streams)
        .with_scan_error_policy(args.on_scan_error);
    tokio::spawn(async move {
        match update_loop.run().await {
            Ok(summary) => warn!(
                scans = summary.scans,
                skipped = summary.skipped,
                backend_errors = summary.backend_errors,
                "update loop stopped, serving the last known size"
            ),
            Err(e) => {
                error!(error = %e, "update loop failed");
                process::exit(1);
            }
        }
    });

    if let Err(e) = source.watch(&args.directory) {
        error!(error = %e, "failed to add directory to watcher");
        process::exit(1);
    }
    info!(path = %args.directory.display(), "added directory to watcher");

    let app = handlers::router(metrics).into_make_service_with_connect_info::<SocketAddr>();

    let addr = normalize_listen_addr(&args.listen);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(addr = %addr, error = %e, "failed to bind");
            process::exit(1);
        }
    };
    info!(addr = %addr, "listening");

    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "server error");
        process::exit(1);
    }

    // The watch registration stays armed for as long as the server runs.
    drop(source);
}
