//! main - runs one downlink RLC-UM / DualPI² scenario

use anyhow::Result;
use clap::Parser;
use ransim::{Scenario, ScenarioConfig};
use slog::{Drain, Logger, o};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Traffic generation time in seconds.  The run continues a little
    /// longer so queues and timers drain.
    #[arg(long, default_value_t = 10)]
    duration_secs: u64,

    /// Size in bytes of each PDCP SDU, headers included.
    #[arg(long, default_value_t = 1000)]
    sdu_size: usize,

    /// Microseconds between SDUs of one source.
    #[arg(long, default_value_t = 2000)]
    sdu_interval_us: u64,

    /// Number of Classic (ECT0) sources.
    #[arg(long, default_value_t = 1)]
    classic_sources: u32,

    /// Number of L4S (ECT1) sources.
    #[arg(long, default_value_t = 1)]
    l4s_sources: u32,

    /// Byte budget of each MAC transmit opportunity.
    #[arg(long, default_value_t = 1500)]
    txop_bytes: usize,

    /// Microseconds between MAC transmit opportunities.
    #[arg(long, default_value_t = 1000)]
    txop_interval_us: u64,

    /// One-way MAC link delay in microseconds.
    #[arg(long, default_value_t = 5000)]
    link_delay_us: u64,

    /// Transmit buffer admission ceiling in bytes.
    #[arg(long, default_value_t = 10 * 1024)]
    max_tx_buffer_size: usize,

    /// t-Reordering in milliseconds.
    #[arg(long, default_value_t = 100)]
    reordering_timer_ms: u64,

    /// Discard timer in milliseconds; 0 uses the packet delay budget.
    #[arg(long, default_value_t = 0)]
    discard_timer_ms: u64,

    /// Disable the head-of-line discard check at admission.
    #[arg(long)]
    no_pdcp_discarding: bool,

    /// DualPI² queue limit in packets.
    #[arg(long, default_value_t = 25)]
    queue_limit: usize,

    /// DualPI² coupling factor.
    #[arg(long, default_value_t = 2)]
    coupling_factor: u32,

    /// Seed for the per-queue random streams.
    #[arg(long, default_value_t = 1)]
    seed: u64,
}

fn main() -> Result<()> {
    let logger = init_logging();
    let args = Args::parse();

    let mut cfg = ScenarioConfig {
        duration: Duration::from_secs(args.duration_secs),
        sdu_size: args.sdu_size,
        sdu_interval: Duration::from_micros(args.sdu_interval_us),
        classic_sources: args.classic_sources,
        l4s_sources: args.l4s_sources,
        txop_bytes: args.txop_bytes,
        txop_interval: Duration::from_micros(args.txop_interval_us),
        link_delay: Duration::from_micros(args.link_delay_us),
        ..Default::default()
    };
    cfg.rlc.max_tx_buffer_size = args.max_tx_buffer_size;
    cfg.rlc.reordering_timer = Duration::from_millis(args.reordering_timer_ms);
    cfg.rlc.discard_timer_ms = args.discard_timer_ms;
    cfg.rlc.enable_pdcp_discarding = !args.no_pdcp_discarding;
    cfg.rlc.aqm.queue_limit = args.queue_limit;
    cfg.rlc.aqm.k = args.coupling_factor;
    cfg.rlc.aqm.seed = args.seed;

    let scenario = Scenario::new(cfg, &logger)?;
    let report = scenario.run();

    slog::info!(logger, "SDUs";
        "offered" => report.offered_sdus,
        "delivered" => report.delivered_sdus,
        "bytes" => report.delivered_bytes,
        "out_of_order" => report.out_of_order_sdus,
        "admission_drops" => report.tx_counters.tx_sdu_drops);
    slog::info!(logger, "PDUs";
        "sent" => report.tx_counters.tx_pdus,
        "received" => report.rx_counters.rx_pdus,
        "mean_delay_ms" => format!("{:.3}", report.mean_pdu_delay_ms));
    slog::info!(logger, "AQM";
        "forced_drops" => report.aqm_stats.forced_drop,
        "classic_drops" => report.aqm_stats.unforced_classic_drop,
        "classic_marks" => report.aqm_stats.unforced_classic_mark,
        "l4s_marks" => report.aqm_stats.unforced_l4s_mark);

    Ok(())
}

fn init_logging() -> Logger {
    // Use info level logging by default
    if std::env::var("RUST_LOG").is_err() {
        unsafe { std::env::set_var("RUST_LOG", "info") }
    }
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let drain = slog_envlogger::new(drain);
    slog::Logger::root(drain, o!())
}
