//! PI² control-law behaviour over simulated time.

use dualpi2::{Dualpi2, Dualpi2Config, QueueItem, TrafficClass};
use ransim_tests::{build_sdu_with_ecn, init_logging};
use sim::{Scheduler, SimTime};
use std::net::Ipv4Addr;

fn item(class: TrafficClass, ecn: packet::Ecn, size: usize, now: SimTime) -> QueueItem {
    let ect = u8::from(class == TrafficClass::L4S);
    QueueItem::new(
        build_sdu_with_ecn(ect, 0, size, ecn),
        Ipv4Addr::UNSPECIFIED,
        0,
        class,
        now,
    )
}

#[test]
fn idle_queue_keeps_probability_at_zero() {
    let scheduler = Scheduler::new();
    let logger = init_logging();
    let aqm = Dualpi2::new(Dualpi2Config::default(), &scheduler, &logger);

    scheduler.run_until(SimTime::from_secs(10));

    assert_eq!(aqm.drop_probability(), 0.0);
    assert_eq!(aqm.classic_drop_probability(), 0.0);
    assert_eq!(aqm.l4s_drop_probability(), 0.0);
    let stats = aqm.stats();
    assert_eq!(stats.forced_drop, 0);
    assert_eq!(stats.unforced_classic_drop, 0);
    assert_eq!(stats.unforced_classic_mark, 0);
    assert_eq!(stats.unforced_l4s_mark, 0);
}

#[test]
fn probabilities_stay_coupled_after_every_update() {
    let scheduler = Scheduler::new();
    let logger = init_logging();
    let cfg = Dualpi2Config::default();
    let k = cfg.k;
    let aqm = Dualpi2::new(cfg, &scheduler, &logger);

    // A standing Classic backlog that nobody serves drives the delay, and
    // with it the probability, upward.
    for _ in 0..5 {
        aqm.enqueue(item(
            TrafficClass::Classic,
            packet::Ecn::Ect0,
            1000,
            scheduler.now(),
        ));
    }

    for step in 1..=20u64 {
        scheduler.run_until(SimTime::from_millis(16 * step));
        let p = aqm.drop_probability();
        assert!((0.0..=1.0).contains(&p));
        assert_eq!(aqm.classic_drop_probability(), p * p);
        assert_eq!(aqm.l4s_drop_probability(), p * k as f64);
        assert!(aqm.classic_drop_probability() <= p || p == 0.0);
    }
    assert!(aqm.drop_probability() > 0.0);
}

#[test]
fn admission_accounting_balances() {
    let scheduler = Scheduler::new();
    let logger = init_logging();
    let aqm = Dualpi2::new(
        Dualpi2Config {
            queue_limit: 5,
            k: 1,
            ..Default::default()
        },
        &scheduler,
        &logger,
    );

    let mut accepted = 0;
    for _ in 0..8 {
        if aqm.enqueue(item(
            TrafficClass::Classic,
            packet::Ecn::NotEct,
            500,
            scheduler.now(),
        )) {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 5);
    assert_eq!(aqm.stats().forced_drop, 3);

    // Certain drop probability: every Not-ECT packet but the last dies.
    aqm.set_drop_probability(1.0);
    let mut returned = 0;
    while aqm.dequeue().is_some() {
        returned += 1;
    }

    let stats = aqm.stats();
    assert_eq!(
        accepted,
        returned + stats.unforced_classic_drop + aqm.packet_count() as u32
    );
    assert_eq!(returned, 1);
    assert_eq!(stats.unforced_classic_drop, 4);
}
