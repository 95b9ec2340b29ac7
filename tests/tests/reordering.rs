//! Receive-side window, reordering timer and reassembly across PDUs.

use ransim_tests::{build_entity, make_pdu};
use rlc::{ReceivePduParams, RlcUmConfig};
use sim::{Scheduler, SimTime};

fn deliver(rlc: &rlc::RlcUm, pdu: packet::Packet) {
    rlc.receive_pdu(ReceivePduParams {
        packet: pdu,
        rnti: 1,
        lcid: 1,
    });
}

#[test]
fn out_of_order_pdus_are_delivered_in_sequence() {
    let scheduler = Scheduler::new();
    let (rlc, _mac, collector) = build_entity(RlcUmConfig::default(), &scheduler);
    let sent_at = scheduler.now();

    deliver(&rlc, make_pdu(0, true, true, &[b"sdu-zero"], sent_at));
    assert_eq!(collector.count(), 1);
    assert!(!rlc.reordering_timer_pending());

    // SN 1 is missing: SN 2 waits in the buffer and the timer arms.
    deliver(&rlc, make_pdu(2, true, true, &[b"sdu-two"], sent_at));
    assert_eq!(collector.count(), 1);
    assert!(rlc.reordering_timer_pending());
    assert_eq!(rlc.receiver_window(), (1, 3, 3));

    // The gap closes: everything comes out in order, the timer stops.
    deliver(&rlc, make_pdu(1, true, true, &[b"sdu-one"], sent_at));
    assert_eq!(
        collector.payloads(),
        vec![
            b"sdu-zero".to_vec(),
            b"sdu-one".to_vec(),
            b"sdu-two".to_vec()
        ]
    );
    assert!(!rlc.reordering_timer_pending());
    assert_eq!(rlc.receiver_window(), (3, 3, 3));
}

#[test]
fn timer_expiry_releases_the_buffered_tail() {
    let scheduler = Scheduler::new();
    let (rlc, _mac, collector) = build_entity(RlcUmConfig::default(), &scheduler);
    let sent_at = scheduler.now();

    deliver(&rlc, make_pdu(0, true, true, &[b"first"], sent_at));
    deliver(&rlc, make_pdu(2, true, true, &[b"third"], sent_at));
    assert_eq!(collector.count(), 1);
    assert!(rlc.reordering_timer_pending());

    // SN 1 never arrives; after t-Reordering the receiver moves on.
    scheduler.run_until(SimTime::from_millis(150));
    assert_eq!(
        collector.payloads(),
        vec![b"first".to_vec(), b"third".to_vec()]
    );
    assert!(!rlc.reordering_timer_pending());
    assert_eq!(rlc.receiver_window(), (3, 3, 3));
}

#[test]
fn duplicate_pdus_are_discarded() {
    let scheduler = Scheduler::new();
    let (rlc, _mac, collector) = build_entity(RlcUmConfig::default(), &scheduler);
    let sent_at = scheduler.now();

    deliver(&rlc, make_pdu(0, true, true, &[b"payload"], sent_at));
    deliver(&rlc, make_pdu(0, true, true, &[b"payload"], sent_at));
    assert_eq!(collector.count(), 1);

    // A duplicate of a PDU still waiting in the buffer is also dropped.
    deliver(&rlc, make_pdu(5, true, true, &[b"late"], sent_at));
    deliver(&rlc, make_pdu(5, true, true, &[b"late"], sent_at));
    assert_eq!(collector.count(), 1);
    assert_eq!(rlc.counters().rx_pdus, 4);
}

#[test]
fn segments_reassemble_across_pdus() {
    let scheduler = Scheduler::new();
    let (rlc, _mac, collector) = build_entity(RlcUmConfig::default(), &scheduler);
    let sent_at = scheduler.now();

    // One SDU split over three PDUs: first, middle, last.
    deliver(&rlc, make_pdu(0, true, false, &[b"alpha-"], sent_at));
    deliver(&rlc, make_pdu(1, false, false, &[b"beta-"], sent_at));
    assert_eq!(collector.count(), 0);
    deliver(&rlc, make_pdu(2, false, true, &[b"gamma"], sent_at));

    assert_eq!(collector.payloads(), vec![b"alpha-beta-gamma".to_vec()]);
}

#[test]
fn lost_continuation_discards_the_partial_sdu() {
    let scheduler = Scheduler::new();
    let (rlc, _mac, collector) = build_entity(RlcUmConfig::default(), &scheduler);
    let sent_at = scheduler.now();

    // SN 0 opens an SDU whose tail (SN 1) is lost; SN 2 starts a new one.
    deliver(&rlc, make_pdu(0, true, false, &[b"doomed"], sent_at));
    deliver(&rlc, make_pdu(2, true, true, &[b"whole"], sent_at));
    assert_eq!(collector.count(), 0);

    scheduler.run_until(SimTime::from_millis(150));
    assert_eq!(collector.payloads(), vec![b"whole".to_vec()]);
}

#[test]
fn concatenated_pdu_delivers_every_sdu() {
    let scheduler = Scheduler::new();
    let (rlc, _mac, collector) = build_entity(RlcUmConfig::default(), &scheduler);
    let sent_at = scheduler.now();

    deliver(
        &rlc,
        make_pdu(0, true, true, &[b"one", b"two", b"three"], sent_at),
    );
    assert_eq!(
        collector.payloads(),
        vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]
    );
}
