use crate::channel::MacChannel;
use crate::traffic::{SduSink, TrafficSource};
use anyhow::{Result, ensure};
use dualpi2::Dualpi2Stats;
use rlc::{RlcUm, RlcUmConfig, RlcUmCounters, TxOpportunity};
use sim::{Scheduler, SimTime};
use slog::{Logger, info};
use std::net::Ipv4Addr;
use std::rc::Rc;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct ScenarioConfig {
    pub duration: Duration,
    /// Full SDU size handed down by PDCP, headers included.
    pub sdu_size: usize,
    /// Inter-arrival time per source.
    pub sdu_interval: Duration,
    pub classic_sources: u32,
    pub l4s_sources: u32,
    /// Byte budget of each MAC opportunity.
    pub txop_bytes: usize,
    pub txop_interval: Duration,
    /// One-way MAC link delay.
    pub link_delay: Duration,
    pub rlc: RlcUmConfig,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        ScenarioConfig {
            duration: Duration::from_secs(10),
            sdu_size: 1000,
            sdu_interval: Duration::from_millis(2),
            classic_sources: 1,
            l4s_sources: 1,
            txop_bytes: 1500,
            txop_interval: Duration::from_millis(1),
            link_delay: Duration::from_millis(5),
            rlc: RlcUmConfig::default(),
        }
    }
}

/// End-of-run summary.
#[derive(Clone, Debug)]
pub struct ScenarioReport {
    pub offered_sdus: u64,
    pub delivered_sdus: u64,
    pub delivered_bytes: u64,
    pub out_of_order_sdus: u64,
    pub mean_pdu_delay_ms: f64,
    pub tx_counters: RlcUmCounters,
    pub rx_counters: RlcUmCounters,
    pub aqm_stats: Dualpi2Stats,
}

/// One downlink bearer: sources -> RLC-UM Tx -> MAC link -> RLC-UM Rx ->
/// sink.
pub struct Scenario {
    cfg: ScenarioConfig,
    scheduler: Scheduler,
    logger: Logger,
    tx_rlc: RlcUm,
    rx_rlc: RlcUm,
    sources: Vec<TrafficSource>,
    sink: SduSink,
}

impl Scenario {
    pub fn new(cfg: ScenarioConfig, logger: &Logger) -> Result<Scenario> {
        ensure!(!cfg.duration.is_zero(), "Duration must be non-zero");
        ensure!(
            cfg.txop_bytes > 2,
            "Tx opportunities of {} bytes cannot carry data",
            cfg.txop_bytes
        );
        ensure!(
            cfg.sdu_size >= 22,
            "SDU size must cover the PDCP and IPv4 headers"
        );
        ensure!(
            cfg.classic_sources + cfg.l4s_sources > 0,
            "At least one traffic source is needed"
        );

        let scheduler = Scheduler::new();
        let downlink = MacChannel::new(&scheduler, cfg.link_delay);
        let uplink = MacChannel::new(&scheduler, cfg.link_delay);
        let sink = SduSink::new();

        let tx_rlc = RlcUm::new(
            cfg.rlc.clone(),
            &scheduler,
            Rc::new(downlink.clone()),
            Rc::new(sink.clone()),
            &logger.new(slog::o!("entity" => "tx")),
        );
        let mut rx_cfg = cfg.rlc.clone();
        rx_cfg.aqm.seed = cfg.rlc.aqm.seed.wrapping_add(1);
        let rx_rlc = RlcUm::new(
            rx_cfg,
            &scheduler,
            Rc::new(uplink),
            Rc::new(sink.clone()),
            &logger.new(slog::o!("entity" => "rx")),
        );
        downlink.connect(rx_rlc.clone());

        let stop_at = SimTime::ZERO + cfg.duration;
        let mut sources = Vec::new();
        for index in 0..cfg.classic_sources + cfg.l4s_sources {
            let l4s = index >= cfg.classic_sources;
            sources.push(TrafficSource::new(
                &scheduler,
                tx_rlc.clone(),
                l4s,
                cfg.sdu_size,
                cfg.sdu_interval,
                stop_at,
                Ipv4Addr::new(10, 0, 0, 1 + index as u8),
                Ipv4Addr::new(10, 255, 0, 1),
            ));
        }

        Ok(Scenario {
            cfg,
            scheduler,
            logger: logger.clone(),
            tx_rlc,
            rx_rlc,
            sources,
            sink,
        })
    }

    pub fn run(&self) -> ScenarioReport {
        info!(self.logger, "Scenario starting";
            "duration_s" => self.cfg.duration.as_secs_f64(),
            "sources" => self.sources.len());

        for source in &self.sources {
            source.start();
        }
        // Leave room after the last arrival for the transmit queue, the
        // link and the reordering timer to drain.
        let stop_at = SimTime::ZERO + self.cfg.duration;
        let drain = self.cfg.link_delay + self.cfg.rlc.reordering_timer + Duration::from_millis(100);
        schedule_tx_opportunities(
            &self.scheduler,
            &self.tx_rlc,
            self.cfg.txop_bytes,
            self.cfg.txop_interval,
            stop_at + drain,
        );
        self.scheduler.run_until(stop_at + drain);

        let report = self.report();
        info!(self.logger, "Scenario finished";
            "offered" => report.offered_sdus,
            "delivered" => report.delivered_sdus,
            "mean_pdu_delay_ms" => report.mean_pdu_delay_ms);
        report
    }

    pub fn report(&self) -> ScenarioReport {
        let rx_counters = self.rx_rlc.counters();
        let mean_pdu_delay_ms = if rx_counters.rx_pdus > 0 {
            rx_counters.rx_delay_total.as_secs_f64() * 1e3 / rx_counters.rx_pdus as f64
        } else {
            0.0
        };
        ScenarioReport {
            offered_sdus: self.sources.iter().map(|s| s.sent()).sum(),
            delivered_sdus: self.sink.received(),
            delivered_bytes: self.sink.bytes(),
            out_of_order_sdus: self.sink.out_of_order(),
            mean_pdu_delay_ms,
            tx_counters: self.tx_rlc.counters(),
            rx_counters,
            aqm_stats: self.tx_rlc.aqm_stats(),
        }
    }

    pub fn sink(&self) -> &SduSink {
        &self.sink
    }

    pub fn tx_rlc(&self) -> &RlcUm {
        &self.tx_rlc
    }
}

fn schedule_tx_opportunities(
    scheduler: &Scheduler,
    rlc: &RlcUm,
    bytes: usize,
    interval: Duration,
    stop_at: SimTime,
) {
    let sched = scheduler.clone();
    let rlc = rlc.clone();
    scheduler.schedule(interval, move || {
        rlc.notify_tx_opportunity(TxOpportunity {
            bytes,
            layer: 0,
            harq_id: 0,
            component_carrier_id: 0,
        });
        if sched.now() < stop_at {
            schedule_tx_opportunities(&sched, &rlc, bytes, interval, stop_at);
        }
    });
}
