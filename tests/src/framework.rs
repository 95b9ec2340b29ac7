use packet::{Ecn, Packet};
use pdcp::PdcpHeader;
use rlc::{
    BufferStatusReport, FramingInfo, MacSapProvider, RlcHeader, RlcSapUser, RlcUm, RlcUmConfig,
    SequenceNumber10, TransmitPduParams,
};
use sim::{Scheduler, SimTime};
use slog::{Drain, Logger, o};
use std::cell::RefCell;
use std::rc::Rc;

pub fn init_logging() -> Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::CompactFormat::new(decorator).build();
    let drain = std::sync::Mutex::new(drain).fuse();
    let drain = slog_envlogger::new(drain);
    slog::Logger::root(drain, o!())
}

/// MAC stub recording everything the RLC hands down.
#[derive(Clone, Default)]
pub struct MockMac {
    pub pdus: Rc<RefCell<Vec<TransmitPduParams>>>,
    pub reports: Rc<RefCell<Vec<BufferStatusReport>>>,
}

impl MockMac {
    pub fn new() -> Self {
        MockMac::default()
    }

    pub fn pdu_count(&self) -> usize {
        self.pdus.borrow().len()
    }

    pub fn last_report(&self) -> BufferStatusReport {
        *self.reports.borrow().last().expect("no buffer status report")
    }
}

impl MacSapProvider for MockMac {
    fn transmit_pdu(&self, params: TransmitPduParams) {
        self.pdus.borrow_mut().push(params);
    }

    fn report_buffer_status(&self, report: BufferStatusReport) {
        self.reports.borrow_mut().push(report);
    }
}

/// Upper-layer stub collecting reassembled SDUs as raw bytes.
#[derive(Clone, Default)]
pub struct SduCollector {
    pub sdus: Rc<RefCell<Vec<Packet>>>,
}

impl SduCollector {
    pub fn new() -> Self {
        SduCollector::default()
    }

    pub fn count(&self) -> usize {
        self.sdus.borrow().len()
    }

    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.sdus.borrow().iter().map(|p| p.bytes().to_vec()).collect()
    }
}

impl RlcSapUser for SduCollector {
    fn receive_pdcp_pdu(&self, sdu: Packet) {
        self.sdus.borrow_mut().push(sdu);
    }
}

/// One UM entity wired to recording stubs.
pub fn build_entity(cfg: RlcUmConfig, scheduler: &Scheduler) -> (RlcUm, MockMac, SduCollector) {
    let logger = init_logging();
    let mac = MockMac::new();
    let collector = SduCollector::new();
    let rlc = RlcUm::new(
        cfg,
        scheduler,
        Rc::new(mac.clone()),
        Rc::new(collector.clone()),
        &logger,
    );
    (rlc, mac, collector)
}

/// A PDCP-encapsulated IPv4 SDU of `size` bytes in total.
pub fn build_sdu(ect: u8, sn: u16, size: usize) -> Packet {
    let ecn = if ect == 1 { Ecn::Ect1 } else { Ecn::Ect0 };
    build_sdu_with_ecn(ect, sn, size, ecn)
}

pub fn build_sdu_with_ecn(ect: u8, sn: u16, size: usize, ecn: Ecn) -> Packet {
    assert!(size >= 22, "SDU must cover the PDCP and IPv4 headers");
    let mut data = Vec::with_capacity(size);
    data.extend_from_slice(&PdcpHeader::new(ect, sn).encode());
    data.extend_from_slice(&[0x45, ecn.apply(0), 0, 0]); // version/IHL, TOS
    data.resize(size, 0);
    Packet::new(data)
}

/// Hand-build a UM data PDU the way the transmitter would, for feeding the
/// receive path directly.
pub fn make_pdu(
    sn: u16,
    first_aligned: bool,
    last_aligned: bool,
    elements: &[&[u8]],
    sent_at: SimTime,
) -> Packet {
    assert!(!elements.is_empty());
    let mut header = RlcHeader::new();
    header.set_sequence_number(SequenceNumber10::new(sn));
    header.set_framing_info(FramingInfo::new(first_aligned, last_aligned));
    for element in &elements[..elements.len() - 1] {
        header.push_extension_bit(true);
        header.push_length_indicator(element.len() as u16);
    }
    header.push_extension_bit(false);

    let mut data = header.encode();
    for element in elements {
        data.extend_from_slice(element);
    }
    let mut pdu = Packet::new(data);
    pdu.set_sender_time(sent_at);
    pdu
}
