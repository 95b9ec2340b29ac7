//! End-to-end runs through the full downlink wiring.

use ransim::{Scenario, ScenarioConfig};
use ransim_tests::init_logging;
use std::time::Duration;

#[test]
fn lossless_run_delivers_every_sdu_in_order() {
    let logger = init_logging();
    let cfg = ScenarioConfig {
        duration: Duration::from_secs(1),
        classic_sources: 1,
        l4s_sources: 0,
        ..Default::default()
    };
    let scenario = Scenario::new(cfg, &logger).unwrap();
    let report = scenario.run();

    assert_eq!(report.offered_sdus, 500);
    assert_eq!(report.delivered_sdus, report.offered_sdus);
    assert_eq!(report.out_of_order_sdus, 0);
    assert_eq!(report.tx_counters.tx_sdu_drops, 0);
    assert_eq!(report.aqm_stats.forced_drop, 0);
    assert_eq!(report.aqm_stats.unforced_classic_drop, 0);
    // Every PDU crossed the 5 ms link.
    assert!(report.mean_pdu_delay_ms >= 5.0);

    let sns = scenario.sink().sequence_numbers();
    assert!(sns.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn mixed_classes_share_the_bearer() {
    let logger = init_logging();
    let cfg = ScenarioConfig {
        duration: Duration::from_secs(1),
        classic_sources: 1,
        l4s_sources: 1,
        ..Default::default()
    };
    let scenario = Scenario::new(cfg, &logger).unwrap();
    let report = scenario.run();

    assert_eq!(report.offered_sdus, 1000);
    assert_eq!(report.delivered_sdus, report.offered_sdus);
    assert_eq!(report.aqm_stats.forced_drop, 0);
}

#[test]
fn overload_delivers_an_ordered_subsequence() {
    let logger = init_logging();
    let cfg = ScenarioConfig {
        duration: Duration::from_secs(1),
        sdu_interval: Duration::from_micros(500),
        txop_interval: Duration::from_millis(4),
        classic_sources: 1,
        l4s_sources: 0,
        ..Default::default()
    };
    let scenario = Scenario::new(cfg, &logger).unwrap();
    let report = scenario.run();

    // The bearer cannot carry the offered load: SDUs die at admission or in
    // the AQM, but whatever survives arrives exactly once and in order.
    assert!(report.delivered_sdus < report.offered_sdus);
    assert!(report.aqm_stats.forced_drop > 0 || report.tx_counters.tx_sdu_drops > 0);
    assert_eq!(report.out_of_order_sdus, 0);

    let sns = scenario.sink().sequence_numbers();
    assert!(sns.windows(2).all(|w| w[0] < w[1]));
}
