//! Passive JA3/JA3S collector daemon.
//!
//! Captures live TCP traffic, reassembles TLS Hellos, correlates client/server directions, and
//! serves the resulting fingerprints as an events table for a host-agent query callback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use ja3collector::capture::CaptureSupervisor;
use ja3collector::conntrack::Correlator;
use ja3collector::events::{generate_events_table, EventBuffer, DEFAULT_RETENTION};

/// Passive JA3/JA3S TLS fingerprint collector.
#[derive(Parser, Debug)]
#[command(name = "ja3collectord", version)]
struct Cli {
    /// Host-agent extension socket path. Accepted for compatibility; the RPC transport itself
    /// is not implemented, so this is logged and otherwise unused.
    #[arg(long)]
    socket: Option<String>,

    /// Log each synthesized fingerprint as it's produced.
    #[arg(short, long)]
    verbose: bool,

    /// Correlator idle-eviction timeout, in seconds.
    #[arg(long, default_value_t = 300)]
    timeout: u64,

    /// Accepted for host-agent compatibility; the polling interval is the agent's concern, not
    /// this collector's.
    #[arg(long, default_value_t = 0)]
    interval: u64,
}

fn main() {
    let cli = Cli::parse();
    let mut builder = env_logger::Builder::from_default_env();
    if cli.verbose {
        builder.filter_level(log::LevelFilter::Info);
    }
    builder.init();

    if cli.socket.is_none() {
        log::warn!("no --socket given; running with fingerprints retained in-process only");
    } else {
        log::info!(
            "accepted --socket {:?} (RPC transport not implemented)",
            cli.socket
        );
    }
    if cli.interval != 0 {
        log::debug!("--interval {} accepted, ignored", cli.interval);
    }

    let events = Arc::new(EventBuffer::new(DEFAULT_RETENTION));
    let correlator = Arc::new(Correlator::new(
        Arc::clone(&events),
        Duration::from_secs(cli.timeout),
    ));
    let running = Arc::new(AtomicBool::new(true));

    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || {
            log::info!("shutdown signal received");
            running.store(false, Ordering::Relaxed);
        })
        .expect("failed to install SIGINT handler");
    }

    let supervisor = match CaptureSupervisor::start(
        Arc::clone(&correlator),
        Arc::clone(&events),
        Arc::clone(&running),
    ) {
        Ok(s) => s,
        Err(e) => {
            log::error!("capture setup failed: {e}");
            std::process::exit(1);
        }
    };

    {
        let correlator = Arc::clone(&correlator);
        let events = Arc::clone(&events);
        let running = Arc::clone(&running);
        let tick = ja3collector::capture::eviction_tick(correlator.idle_timeout());
        let verbose = cli.verbose;
        std::thread::spawn(move || {
            let ticker = crossbeam_channel::tick(tick);
            while running.load(Ordering::Relaxed) {
                let _ = ticker.recv_timeout(Duration::from_secs(1));
                correlator.evict_idle();
                events.prune();
                if verbose {
                    for row in generate_events_table(&events) {
                        log::info!("ja3={} ja3s={} sni={}", row.ja3, row.ja3s, row.sni);
                    }
                }
            }
        });
    }

    supervisor.join();
    log::info!("clean shutdown");
}
