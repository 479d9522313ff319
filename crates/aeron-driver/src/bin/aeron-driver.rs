//! Standalone media driver process.
//!
//! Usage: aeron-driver [--dir PATH] [--term-length N] [--ipc-window N]

use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::Arc;
use std::thread;
use std::time::{ Duration, Instant };

use tracing::info;

use aeron_driver::{ DriverContext, DriverConductor, DriverResponse };

fn main() {
    tracing_subscriber::fmt::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let args: Vec<String> = std::env::args().collect();
    let mut builder = DriverContext::builder();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--dir" => {
                i += 1;
                builder = builder.aeron_dir(expect_arg(&args, i, "--dir"));
            }
            "--term-length" => {
                i += 1;
                builder = builder.term_length(parse_arg(&args, i, "--term-length"));
            }
            "--ipc-window" => {
                i += 1;
                builder = builder.ipc_publication_term_window_length(parse_arg(&args, i, "--ipc-window"));
            }
            "-h" | "--help" => {
                print_usage();
                return;
            }
            other => {
                eprintln!("unrecognized argument: {other}");
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let context = match builder.build() {
        Ok(context) => context,
        Err(err) => {
            eprintln!("invalid configuration: {err}");
            std::process::exit(1);
        }
    };

    info!(dir = %context.aeron_dir.display(), term_length = context.term_length, "starting aeron-driver");
    let clock = context.clock.clone();

    let mut conductor = match DriverConductor::new(context) {
        Ok(conductor) => conductor,
        Err(err) => {
            eprintln!("failed to start driver: {err}");
            std::process::exit(1);
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || r.store(false, Ordering::SeqCst)).expect("failed to install signal handler");

    let mut last_report = Instant::now();

    while running.load(Ordering::Relaxed) {
        let now_ns = clock.nanos();
        for response in conductor.duty_cycle(now_ns) {
            log_response(&response);
        }

        if last_report.elapsed() > Duration::from_secs(5) {
            info!(
                publications = conductor.publication_count(),
                subscriptions = conductor.subscription_count(),
                images = conductor.image_count(),
                "driver status"
            );
            last_report = Instant::now();
        }

        thread::yield_now();
    }

    info!("shutting down; final counters: {:?}", conductor.counters().snapshot());
}

fn log_response(response: &DriverResponse) {
    match response {
        DriverResponse::Error(err) => tracing::warn!(?err, "command failed"),
        other => tracing::debug!(?other, "driver response"),
    }
}

fn expect_arg(args: &[String], index: usize, flag: &str) -> String {
    args.get(index).unwrap_or_else(|| {
        eprintln!("{flag} requires an argument");
        std::process::exit(1);
    }).clone()
}

fn parse_arg(args: &[String], index: usize, flag: &str) -> i32 {
    expect_arg(args, index, flag).parse().unwrap_or_else(|_| {
        eprintln!("{flag} expects an integer argument");
        std::process::exit(1);
    })
}

fn print_usage() {
    eprintln!("Usage: aeron-driver [--dir PATH] [--term-length N] [--ipc-window N]");
}
