//! ECN marking and drop behaviour of the two dequeue paths.

use dualpi2::{Dualpi2, Dualpi2Config, QueueItem, TrafficClass};
use packet::Ecn;
use ransim_tests::{build_sdu_with_ecn, init_logging};
use sim::{Scheduler, SimTime};
use std::net::Ipv4Addr;

const PDCP_LEN: usize = 2;

fn l4s_item(size: usize, now: SimTime) -> QueueItem {
    QueueItem::new(
        build_sdu_with_ecn(1, 0, size, Ecn::Ect1),
        Ipv4Addr::UNSPECIFIED,
        0,
        TrafficClass::L4S,
        now,
    )
}

fn classic_item(ecn: Ecn, size: usize, now: SimTime) -> QueueItem {
    QueueItem::new(
        build_sdu_with_ecn(0, 0, size, ecn),
        Ipv4Addr::UNSPECIFIED,
        0,
        TrafficClass::Classic,
        now,
    )
}

#[test]
fn sojourn_over_threshold_marks_a_standing_l4s_queue() {
    let scheduler = Scheduler::new();
    let logger = init_logging();
    let aqm = Dualpi2::new(Dualpi2Config::default(), &scheduler, &logger);

    // Thirteen packets queued at t=0; ten are drained at t=5ms with the
    // queue still above the shallow-queue floor, so all ten get CE.
    for _ in 0..13 {
        aqm.enqueue(l4s_item(1000, scheduler.now()));
    }
    scheduler.run_until(SimTime::from_millis(5));

    for _ in 0..10 {
        let item = aqm.dequeue().unwrap();
        assert!(item.is_l4s());
        assert_eq!(item.packet().ecn(PDCP_LEN), Some(Ecn::Ce));
    }
    assert_eq!(aqm.stats().unforced_l4s_mark, 10);
    assert_eq!(aqm.stats().forced_drop, 0);

    // The last three sit below the floor and escape the threshold mark.
    for _ in 0..3 {
        let item = aqm.dequeue().unwrap();
        assert_eq!(item.packet().ecn(PDCP_LEN), Some(Ecn::Ect1));
    }
    assert_eq!(aqm.stats().unforced_l4s_mark, 10);
    assert_eq!(aqm.stats().unforced_classic_drop, 0);
}

#[test]
fn coupled_probability_marks_fresh_l4s_packets() {
    let scheduler = Scheduler::new();
    let logger = init_logging();
    let aqm = Dualpi2::new(Dualpi2Config::default(), &scheduler, &logger);

    // k = 2 makes the L4S probability 1.2: every dequeue marks, even with
    // zero sojourn.
    aqm.set_drop_probability(0.6);
    for _ in 0..3 {
        aqm.enqueue(l4s_item(100, scheduler.now()));
    }
    for _ in 0..3 {
        assert_eq!(aqm.dequeue().unwrap().packet().ecn(PDCP_LEN), Some(Ecn::Ce));
    }
    assert_eq!(aqm.stats().unforced_l4s_mark, 3);
}

#[test]
fn not_ect_classic_queue_drops_all_but_the_last() {
    let scheduler = Scheduler::new();
    let logger = init_logging();
    let aqm = Dualpi2::new(
        Dualpi2Config {
            k: 1,
            ..Default::default()
        },
        &scheduler,
        &logger,
    );

    for _ in 0..10 {
        aqm.enqueue(classic_item(Ecn::NotEct, 200, scheduler.now()));
    }
    aqm.set_drop_probability(1.0);

    // One dequeue call walks the queue, dropping every unmarkable packet
    // until only one remains, which is sent to avoid starvation.
    let survivor = aqm.dequeue().unwrap();
    assert_eq!(survivor.packet().ecn(PDCP_LEN), Some(Ecn::NotEct));
    assert!(aqm.is_empty());
    assert_eq!(aqm.stats().unforced_classic_drop, 9);
    assert_eq!(aqm.stats().unforced_classic_mark, 0);
}

#[test]
fn ect_classic_packets_are_marked_instead_of_dropped() {
    let scheduler = Scheduler::new();
    let logger = init_logging();
    let aqm = Dualpi2::new(
        Dualpi2Config {
            k: 1,
            ..Default::default()
        },
        &scheduler,
        &logger,
    );

    for _ in 0..4 {
        aqm.enqueue(classic_item(Ecn::Ect0, 200, scheduler.now()));
    }
    aqm.set_drop_probability(1.0);

    for _ in 0..4 {
        assert_eq!(aqm.dequeue().unwrap().packet().ecn(PDCP_LEN), Some(Ecn::Ce));
    }
    let stats = aqm.stats();
    assert_eq!(stats.unforced_classic_mark, 4);
    assert_eq!(stats.unforced_classic_drop, 0);
}
