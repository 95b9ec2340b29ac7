use packet::{Ecn, Packet};
use pdcp::{PDCP_HEADER_LEN, PdcpHeader};
use rlc::{RlcSapUser, RlcUm};
use sim::{Scheduler, SimTime};
use std::cell::RefCell;
use std::net::Ipv4Addr;
use std::rc::{Rc, Weak};
use std::time::Duration;

const IPV4_HEADER_LEN: usize = 20;
const PROTOCOL_UDP: u8 = 17;

/// Constant-rate source of PDCP-encapsulated IPv4 SDUs.
///
/// L4S flows are stamped ECT(1) in both the PDCP ECT flag and the IP
/// header; Classic flows carry ECT(0) so the AQM can still CE-mark them.
pub struct TrafficSource {
    inner: Rc<RefCell<SourceInner>>,
}

struct SourceInner {
    scheduler: Scheduler,
    rlc: RlcUm,
    l4s: bool,
    sdu_size: usize,
    interval: Duration,
    stop_at: SimTime,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    next_sn: u16,
    sent: u64,
}

impl TrafficSource {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        scheduler: &Scheduler,
        rlc: RlcUm,
        l4s: bool,
        sdu_size: usize,
        interval: Duration,
        stop_at: SimTime,
        src: Ipv4Addr,
        dst: Ipv4Addr,
    ) -> Self {
        TrafficSource {
            inner: Rc::new(RefCell::new(SourceInner {
                scheduler: scheduler.clone(),
                rlc,
                l4s,
                sdu_size: sdu_size.max(PDCP_HEADER_LEN + IPV4_HEADER_LEN),
                interval,
                stop_at,
                src,
                dst,
                next_sn: 0,
                sent: 0,
            })),
        }
    }

    /// Send the first SDU now and keep going at the configured rate until
    /// the stop time.
    pub fn start(&self) {
        SourceInner::send(&self.inner);
    }

    pub fn sent(&self) -> u64 {
        self.inner.borrow().sent
    }
}

impl SourceInner {
    fn send(inner: &Rc<RefCell<SourceInner>>) {
        let (rlc, sdu) = {
            let mut s = inner.borrow_mut();
            if s.scheduler.now() >= s.stop_at {
                return;
            }
            let sdu = s.build_sdu();
            s.sent += 1;
            (s.rlc.clone(), sdu)
        };
        rlc.transmit_pdcp_pdu(sdu);

        let (scheduler, interval) = {
            let s = inner.borrow();
            (s.scheduler.clone(), s.interval)
        };
        let weak: Weak<RefCell<SourceInner>> = Rc::downgrade(inner);
        scheduler.schedule(interval, move || {
            if let Some(inner) = weak.upgrade() {
                SourceInner::send(&inner);
            }
        });
    }

    fn build_sdu(&mut self) -> Packet {
        let ecn = if self.l4s { Ecn::Ect1 } else { Ecn::Ect0 };
        let pdcp = PdcpHeader::new(self.l4s as u8, self.next_sn);
        self.next_sn = (self.next_sn + 1) & 0x0fff;

        let ip_len = (self.sdu_size - PDCP_HEADER_LEN) as u16;
        let mut data = Vec::with_capacity(self.sdu_size);
        data.extend_from_slice(&pdcp.encode());
        data.extend_from_slice(&build_ipv4_header(ecn, ip_len, self.src, self.dst));
        data.resize(self.sdu_size, 0);
        Packet::new(data)
    }
}

fn build_ipv4_header(ecn: Ecn, total_len: u16, src: Ipv4Addr, dst: Ipv4Addr) -> [u8; IPV4_HEADER_LEN] {
    let mut header = [0u8; IPV4_HEADER_LEN];
    header[0] = 0x45; // version 4, IHL 5
    header[1] = ecn.apply(0);
    header[2..4].copy_from_slice(&total_len.to_be_bytes());
    header[8] = 64; // TTL
    header[9] = PROTOCOL_UDP;
    // Checksum left zero; nothing on this path verifies it.
    header[12..16].copy_from_slice(&src.octets());
    header[16..20].copy_from_slice(&dst.octets());
    header
}

/// Upper-layer sink counting reassembled SDUs and watching PDCP sequence
/// numbers for ordering violations.
#[derive(Clone)]
pub struct SduSink {
    inner: Rc<RefCell<SinkInner>>,
}

#[derive(Default)]
struct SinkInner {
    received: u64,
    bytes: u64,
    sequence_numbers: Vec<u16>,
    out_of_order: u64,
}

impl SduSink {
    pub fn new() -> Self {
        SduSink {
            inner: Rc::new(RefCell::new(SinkInner::default())),
        }
    }

    pub fn received(&self) -> u64 {
        self.inner.borrow().received
    }

    pub fn bytes(&self) -> u64 {
        self.inner.borrow().bytes
    }

    pub fn out_of_order(&self) -> u64 {
        self.inner.borrow().out_of_order
    }

    /// PDCP sequence numbers in delivery order.
    pub fn sequence_numbers(&self) -> Vec<u16> {
        self.inner.borrow().sequence_numbers.clone()
    }
}

impl Default for SduSink {
    fn default() -> Self {
        SduSink::new()
    }
}

impl RlcSapUser for SduSink {
    fn receive_pdcp_pdu(&self, sdu: Packet) {
        let mut inner = self.inner.borrow_mut();
        inner.received += 1;
        inner.bytes += sdu.len() as u64;
        if let Ok(header) = PdcpHeader::decode(sdu.bytes()) {
            let sn = header.sequence_number();
            if let Some(&last) = inner.sequence_numbers.last() {
                if sn <= last {
                    inner.out_of_order += 1;
                }
            }
            inner.sequence_numbers.push(sn);
        }
    }
}
