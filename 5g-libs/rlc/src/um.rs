//! The RLC UM entity, TS36.322, 5.1.2.
//!
//! Transmit side: SDUs admitted through the DualPI² AQM, segmented and
//! concatenated into each MAC opportunity.  Receive side: reordering window
//! over three state variables, a single reordering timer, reassembly.

use crate::header::{FramingInfo, MAX_LENGTH_INDICATOR, RlcHeader};
use crate::reassembly::Reassembler;
use crate::sap::{
    BufferStatusReport, MacSapProvider, ReceivePduParams, RlcSapUser, TransmitPduParams,
    TxOpportunity,
};
use crate::sequence::SequenceNumber10;
use dualpi2::{Dualpi2, Dualpi2Config, Dualpi2Stats, QueueItem, QueueMode, TrafficClass};
use packet::{Packet, SduStatus};
use pdcp::PdcpHeader;
use sim::{EventId, Scheduler};
use slog::{Logger, debug, info, trace, warn};
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::net::Ipv4Addr;
use std::rc::Rc;
use std::time::Duration;

const FIXED_HEADER_LEN: usize = 2;
const WINDOW_SIZE: u16 = 512; // half the SN space, TS36.322, 7.2
const RBS_REREPORT_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Clone, Debug)]
pub struct RlcUmConfig {
    pub rnti: u16,
    pub lcid: u8,
    /// Admission ceiling for the transmit buffer, in bytes.
    pub max_tx_buffer_size: usize,
    /// t-Reordering, TS36.322, 7.3.
    pub reordering_timer: Duration,
    /// Check the head-of-line delay budget when SDUs arrive from PDCP.
    pub enable_pdcp_discarding: bool,
    /// 0 means the packet delay budget is the discard budget.
    pub discard_timer_ms: u64,
    pub packet_delay_budget_ms: u64,
    /// AQM knobs.  The queue limit is re-derived from `max_tx_buffer_size`
    /// at construction.
    pub aqm: Dualpi2Config,
}

impl Default for RlcUmConfig {
    fn default() -> Self {
        RlcUmConfig {
            rnti: 1,
            lcid: 1,
            max_tx_buffer_size: 10 * 1024,
            reordering_timer: Duration::from_millis(100),
            enable_pdcp_discarding: true,
            discard_timer_ms: 0,
            packet_delay_budget_ms: 100,
            aqm: Dualpi2Config::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RlcUmCounters {
    pub tx_pdus: u64,
    pub rx_pdus: u64,
    /// SDUs refused at admission: buffer full or over the delay budget.
    pub tx_sdu_drops: u64,
    /// Sum of PDU transit delays, for a mean over `rx_pdus`.
    pub rx_delay_total: Duration,
}

/// Cloneable handle to one UM entity.  Timers hold weak references, so the
/// entity dies with its last handle.
#[derive(Clone)]
pub struct RlcUm {
    state: Rc<RefCell<UmState>>,
}

struct UmState {
    cfg: RlcUmConfig,
    scheduler: Scheduler,
    logger: Logger,
    aqm: Dualpi2,
    mac: Rc<dyn MacSapProvider>,
    upper: Rc<dyn RlcSapUser>,
    dest: Ipv4Addr,
    // transmit state, TS36.322, 7.1
    sequence_number: SequenceNumber10, // VT(US)
    // receive state
    rx_buffer: BTreeMap<u16, Packet>,
    vr_ur: SequenceNumber10,
    vr_ux: SequenceNumber10,
    vr_uh: SequenceNumber10,
    expected_sn: SequenceNumber10,
    reassembler: Reassembler,
    reordering_timer: EventId,
    rbs_timer: EventId,
    counters: RlcUmCounters,
}

impl RlcUm {
    pub fn new(
        cfg: RlcUmConfig,
        scheduler: &Scheduler,
        mac: Rc<dyn MacSapProvider>,
        upper: Rc<dyn RlcSapUser>,
        logger: &Logger,
    ) -> Self {
        let mut aqm_cfg = cfg.aqm.clone();
        // Queue limit in accordance with max_tx_buffer_size: one mean-sized
        // packet per slot in packet mode, the byte ceiling itself otherwise.
        aqm_cfg.queue_limit = match aqm_cfg.mode {
            QueueMode::Packets => cfg.max_tx_buffer_size / aqm_cfg.mean_packet_size,
            QueueMode::Bytes => cfg.max_tx_buffer_size,
        };
        let aqm = Dualpi2::new(aqm_cfg, scheduler, logger);
        RlcUm {
            state: Rc::new(RefCell::new(UmState {
                cfg,
                scheduler: scheduler.clone(),
                logger: logger.clone(),
                aqm,
                mac,
                upper,
                dest: Ipv4Addr::UNSPECIFIED,
                sequence_number: SequenceNumber10::new(0),
                rx_buffer: BTreeMap::new(),
                vr_ur: SequenceNumber10::new(0),
                vr_ux: SequenceNumber10::new(0),
                vr_uh: SequenceNumber10::new(0),
                expected_sn: SequenceNumber10::new(0),
                reassembler: Reassembler::new(),
                reordering_timer: EventId::default(),
                rbs_timer: EventId::default(),
                counters: RlcUmCounters::default(),
            })),
        }
    }

    /// PDCP hands down one SDU.  A buffer status report follows every
    /// attempt, accepted or not.
    pub fn transmit_pdcp_pdu(&self, sdu: Packet) {
        let (report, mac) = {
            let mut s = self.state.borrow_mut();
            s.admit_sdu(sdu);
            (s.buffer_status(), s.mac.clone())
        };
        mac.report_buffer_status(report);
        self.state.borrow().rbs_timer.cancel();
    }

    /// MAC grants a transmit opportunity; build and hand over exactly one
    /// PDU if there is data.
    pub fn notify_tx_opportunity(&self, txop: TxOpportunity) {
        let (params, mac, rearm) = {
            let mut s = self.state.borrow_mut();
            let Some(params) = s.assemble_pdu(&txop) else {
                return;
            };
            let rearm = !s.aqm.is_empty();
            (params, s.mac.clone(), rearm)
        };
        mac.transmit_pdu(params);
        if rearm {
            self.state.borrow().rbs_timer.cancel();
            UmState::arm_rbs_timer(&self.state);
        }
    }

    /// MAC delivers one PDU from the peer entity.
    pub fn receive_pdu(&self, params: ReceivePduParams) {
        UmState::handle_receive(&self.state, params);
    }

    /// HARQ failures carry no meaning without retransmission.
    pub fn notify_harq_failure(&self) {}

    pub fn aqm(&self) -> Dualpi2 {
        self.state.borrow().aqm.clone()
    }

    pub fn aqm_stats(&self) -> Dualpi2Stats {
        self.state.borrow().aqm.stats()
    }

    pub fn counters(&self) -> RlcUmCounters {
        self.state.borrow().counters
    }

    pub fn reordering_timer_pending(&self) -> bool {
        self.state.borrow().reordering_timer.is_pending()
    }

    /// (VR(UR), VR(UX), VR(UH)) raw values.
    pub fn receiver_window(&self) -> (u16, u16, u16) {
        let s = self.state.borrow();
        (s.vr_ur.value(), s.vr_ux.value(), s.vr_uh.value())
    }
}

impl UmState {
    fn admit_sdu(&mut self, sdu: Packet) {
        let now = self.scheduler.now();
        let aqm_bytes = self.aqm.queue_size_bytes();

        if aqm_bytes + sdu.len() > self.cfg.max_tx_buffer_size {
            info!(self.logger, "AQM buffer full, RLC SDU discarded";
                "buffered" => aqm_bytes, "size" => sdu.len());
            self.counters.tx_sdu_drops += 1;
            return;
        }

        if self.cfg.enable_pdcp_discarding {
            let discard_budget_ms = if self.cfg.discard_timer_ms > 0 {
                self.cfg.discard_timer_ms
            } else {
                self.cfg.packet_delay_budget_ms
            };
            let hol_delay_ms = if aqm_bytes > 0 {
                (now - self.aqm.head_of_line_timestamp()).as_millis() as u64
            } else {
                0
            };
            if hol_delay_ms > discard_budget_ms {
                info!(self.logger, "Head-of-line delay over budget, RLC SDU discarded";
                    "hol_ms" => hol_delay_ms, "budget_ms" => discard_budget_ms);
                self.counters.tx_sdu_drops += 1;
                return;
            }
        }

        let mut sdu = sdu;
        sdu.set_sdu_status(SduStatus::FullSdu);
        let class = if self.is_l4s(&sdu) {
            TrafficClass::L4S
        } else {
            TrafficClass::Classic
        };
        trace!(self.logger, "Admitting RLC SDU";
            "l4s" => class == TrafficClass::L4S, "size" => sdu.len());
        self.aqm
            .enqueue(QueueItem::new(sdu, self.dest, 0, class, now));
    }

    fn is_l4s(&self, sdu: &Packet) -> bool {
        match PdcpHeader::decode(sdu.bytes()) {
            Ok(header) => header.is_l4s(),
            Err(_) => {
                warn!(self.logger, "PDCP header not found, classifying as Classic");
                false
            }
        }
    }

    fn assemble_pdu(&mut self, txop: &TxOpportunity) -> Option<TransmitPduParams> {
        if txop.bytes <= FIXED_HEADER_LEN {
            // Stingy MAC: nothing fits beyond the fixed header.
            debug!(self.logger, "Tx opportunity too small"; "bytes" => txop.bytes);
            return None;
        }
        if self.aqm.is_empty() {
            trace!(self.logger, "No data pending in the AQM");
            return None;
        }
        let now = self.scheduler.now();

        let mut header = RlcHeader::new();
        let mut data_field: Vec<Packet> = Vec::new();
        let mut next_segment_size = txop.bytes - FIXED_HEADER_LEN;
        let mut next_segment_id: usize = 1;

        let item = self.aqm.dequeue()?;
        let class = item.class();
        let mut enqueue_time = item.enqueue_time();
        let mut first_segment = Some(item.into_packet());

        while first_segment.as_ref().is_some_and(|p| !p.is_empty()) && next_segment_size > 0 {
            let mut segment = first_segment.take().unwrap();

            if segment.len() > next_segment_size || segment.len() > MAX_LENGTH_INDICATOR {
                // A fragment over 2047 bytes could not be described by an
                // 11-bit length indicator, so it must end the data field.
                let taken = segment.len().min(next_segment_size);
                let mut new_segment = segment.fragment(0, taken);

                // The only place where an SDU is segmented and its status
                // changes.
                match segment.sdu_status() {
                    Some(SduStatus::FullSdu) => {
                        new_segment.set_sdu_status(SduStatus::FirstSegment);
                        segment.set_sdu_status(SduStatus::LastSegment);
                    }
                    Some(SduStatus::LastSegment) => {
                        new_segment.set_sdu_status(SduStatus::MiddleSegment);
                    }
                    _ => {}
                }
                segment.remove_at_start(taken);

                if !segment.is_empty() {
                    // Hand the remainder back to the front of its queue.
                    self.aqm
                        .requeue(QueueItem::new(segment, self.dest, 0, class, enqueue_time));
                } else {
                    // The whole SDU fit after all; undo the split status.
                    match new_segment.sdu_status() {
                        Some(SduStatus::FirstSegment) => {
                            new_segment.set_sdu_status(SduStatus::FullSdu)
                        }
                        Some(SduStatus::MiddleSegment) => {
                            new_segment.set_sdu_status(SduStatus::LastSegment)
                        }
                        _ => {}
                    }
                }

                next_segment_size -= new_segment.len();
                next_segment_id += 1;
                header.push_extension_bit(false);
                data_field.push(new_segment);
            } else if next_segment_size - segment.len() <= FIXED_HEADER_LEN || self.aqm.is_empty()
            {
                // No room for another element after this one.
                next_segment_size -= segment.len();
                next_segment_id += 1;
                header.push_extension_bit(false);
                data_field.push(segment);
            } else {
                // Concatenate: this element gets a length indicator, which
                // costs two then one octet alternately as units pack in
                // pairs.
                header.push_extension_bit(true);
                header.push_length_indicator(segment.len() as u16);
                let li_cost = if next_segment_id % 2 == 1 { 2 } else { 1 };
                next_segment_size -= li_cost + segment.len();
                next_segment_id += 1;
                data_field.push(segment);

                let Some(item) = self.aqm.dequeue() else { break };
                enqueue_time = item.enqueue_time();
                first_segment = Some(item.into_packet());
            }
        }

        // FI reflects the boundary status of the first and last fragment.
        let first_status = data_field
            .first()
            .unwrap()
            .sdu_status()
            .expect("SDU status tag missing");
        let last_status = data_field
            .last()
            .unwrap()
            .sdu_status()
            .expect("SDU status tag missing");
        header.set_framing_info(FramingInfo::new(
            matches!(first_status, SduStatus::FullSdu | SduStatus::FirstSegment),
            matches!(last_status, SduStatus::FullSdu | SduStatus::LastSegment),
        ));
        header.set_sequence_number(self.sequence_number);
        let sn = self.sequence_number.value();
        self.sequence_number += 1;

        let mut fragments = data_field.into_iter();
        let mut pdu = fragments.next().unwrap();
        pdu.clear_sdu_status();
        for fragment in fragments {
            pdu.append(fragment);
        }
        pdu.prepend(&header.encode());
        pdu.set_sender_time(now);

        self.counters.tx_pdus += 1;
        debug!(self.logger, "RLC PDU built";
            "sn" => sn, "bytes" => pdu.len(), "rnti" => self.cfg.rnti, "lcid" => self.cfg.lcid);

        Some(TransmitPduParams {
            pdu,
            rnti: self.cfg.rnti,
            lcid: self.cfg.lcid,
            layer: txop.layer,
            harq_process_id: txop.harq_id,
            component_carrier_id: txop.component_carrier_id,
        })
    }

    fn buffer_status(&self) -> BufferStatusReport {
        let bytes = self.aqm.queue_size_bytes();
        let (tx_queue_size, tx_hol_delay_ms) = if bytes != 0 {
            let hol = self.scheduler.now() - self.aqm.head_of_line_timestamp();
            // Data in the AQM plus an estimated two header octets per SDU.
            (bytes + 2 * self.aqm.packet_count(), hol.as_millis() as u64)
        } else {
            (0, 0)
        };
        BufferStatusReport {
            rnti: self.cfg.rnti,
            lcid: self.cfg.lcid,
            tx_queue_size,
            tx_hol_delay_ms,
            retx_queue_size: 0,
            retx_hol_delay_ms: 0,
            status_pdu_size: 0,
        }
    }

    fn handle_receive(state: &Rc<RefCell<UmState>>, params: ReceivePduParams) {
        let mut deliveries = Vec::new();
        let (upper, rearm) = {
            let mut s = state.borrow_mut();
            let rearm = s.on_pdu(params, &mut deliveries);
            (s.upper.clone(), rearm)
        };
        for sdu in deliveries {
            upper.receive_pdcp_pdu(sdu);
        }
        if rearm {
            UmState::arm_reordering_timer(state);
        }
    }

    // 5.1.2.2.2/5.1.2.2.3: place or discard the PDU, advance the window,
    // reassemble, and decide the reordering timer.  Returns whether the
    // timer must be (re)started.
    fn on_pdu(&mut self, params: ReceivePduParams, deliveries: &mut Vec<Packet>) -> bool {
        let now = self.scheduler.now();
        let sender_time = params
            .packet
            .sender_time()
            .expect("sender timestamp tag missing");
        let delay = now - sender_time;
        self.counters.rx_pdus += 1;
        self.counters.rx_delay_total += delay;
        trace!(self.logger, "RLC PDU received";
            "bytes" => params.packet.len(), "delay_us" => delay.as_micros() as u64);

        let header = match RlcHeader::decode(params.packet.bytes()) {
            Ok(header) => header,
            Err(e) => {
                warn!(self.logger, "Undecodable RLC PDU discarded"; "error" => %e);
                return false;
            }
        };
        let mut sn = header.sequence_number();

        let window_base = self.vr_uh - WINDOW_SIZE;
        self.vr_ur.set_modulus_base(window_base);
        self.vr_uh.set_modulus_base(window_base);
        sn.set_modulus_base(window_base);

        let duplicate =
            self.vr_ur < sn && sn < self.vr_uh && self.rx_buffer.contains_key(&sn.value());
        let below_window = (self.vr_uh - WINDOW_SIZE) <= sn && sn < self.vr_ur;
        if duplicate || below_window {
            debug!(self.logger, "PDU discarded"; "sn" => sn.value());
            return false;
        }
        self.rx_buffer.insert(sn.value(), params.packet);

        if !self.is_inside_reordering_window(sn) {
            self.vr_uh = sn + 1;
            self.reassemble_outside_window(deliveries);
            if !self.is_inside_reordering_window(self.vr_ur) {
                self.vr_ur = self.vr_uh - WINDOW_SIZE;
            }
        }

        if self.rx_buffer.contains_key(&self.vr_ur.value()) {
            let old_vr_ur = self.vr_ur;
            let mut next_missing = self.vr_ur.value() + 1;
            while self.rx_buffer.contains_key(&next_missing) {
                next_missing += 1;
            }
            self.vr_ur.set(next_missing);
            let new_vr_ur = self.vr_ur;
            self.reassemble_interval(old_vr_ur, new_vr_ur, deliveries);
        }

        // VR(UH) may have moved; refresh the bases for the timer rules.
        let window_base = self.vr_uh - WINDOW_SIZE;
        self.vr_ur.set_modulus_base(window_base);
        self.vr_ux.set_modulus_base(window_base);
        self.vr_uh.set_modulus_base(window_base);

        if self.reordering_timer.is_pending() {
            let vr_ux = self.vr_ux;
            if vr_ux <= self.vr_ur
                || (!self.is_inside_reordering_window(vr_ux) && vr_ux != self.vr_uh)
            {
                debug!(self.logger, "Reordering timer stopped");
                self.reordering_timer.cancel();
            }
        }
        !self.reordering_timer.is_pending() && self.vr_uh > self.vr_ur
    }

    fn is_inside_reordering_window(&mut self, mut sn: SequenceNumber10) -> bool {
        let window_base = self.vr_uh - WINDOW_SIZE;
        self.vr_uh.set_modulus_base(window_base);
        sn.set_modulus_base(window_base);
        (self.vr_uh - WINDOW_SIZE) <= sn && sn < self.vr_uh
    }

    /// Reassemble every buffered PDU that fell out of the window, in
    /// ascending raw SN order.
    fn reassemble_outside_window(&mut self, deliveries: &mut Vec<Packet>) {
        while let Some((&sn, _)) = self.rx_buffer.first_key_value() {
            if self.is_inside_reordering_window(SequenceNumber10::new(sn)) {
                break;
            }
            let packet = self.rx_buffer.remove(&sn).unwrap();
            self.reassemble_and_deliver(packet, deliveries);
        }
    }

    fn reassemble_interval(
        &mut self,
        low: SequenceNumber10,
        high: SequenceNumber10,
        deliveries: &mut Vec<Packet>,
    ) {
        let mut sn = low;
        while sn < high {
            if let Some(packet) = self.rx_buffer.remove(&sn.value()) {
                self.reassemble_and_deliver(packet, deliveries);
            }
            sn += 1;
        }
    }

    /// Strip the header, split the data field along the length indicators
    /// and feed the result to the reassembly machine.
    fn reassemble_and_deliver(&mut self, mut packet: Packet, deliveries: &mut Vec<Packet>) {
        let mut header = match RlcHeader::decode(packet.bytes()) {
            Ok(header) => header,
            Err(e) => {
                warn!(self.logger, "Undecodable buffered PDU dropped"; "error" => %e);
                return;
            }
        };
        packet.remove_at_start(header.serialized_size());
        let fi = header.framing_info();
        let sequence_number = header.sequence_number();

        let gap = if sequence_number != self.expected_sn {
            self.expected_sn = sequence_number + 1;
            true
        } else {
            self.expected_sn += 1;
            false
        };

        let mut sdus = VecDeque::new();
        while let Some(li_follows) = header.pop_extension_bit() {
            if !li_follows {
                sdus.push_back(packet);
                break;
            }
            let Some(li) = header.pop_length_indicator() else {
                break;
            };
            let li = li as usize;
            if li >= packet.len() {
                warn!(self.logger, "Length indicator beyond the PDU payload";
                    "li" => li, "remaining" => packet.len());
                sdus.push_back(packet);
                break;
            }
            sdus.push_back(packet.fragment(0, li));
            packet.remove_at_start(li);
        }

        self.reassembler
            .process(fi, gap, sdus, &self.logger, &mut |sdu| deliveries.push(sdu));
    }

    // 5.1.2.2.4: advance VR(UR) to the first missing SN at or above VR(UX),
    // deliver what that unblocks, restart if PDUs are still missing.
    fn expire_reordering_timer(state: &Rc<RefCell<UmState>>) {
        let mut deliveries = Vec::new();
        let (upper, rearm) = {
            let mut s = state.borrow_mut();
            debug!(s.logger, "Reordering timer expired");
            let mut new_vr_ur = s.vr_ux;
            while s.rx_buffer.contains_key(&new_vr_ur.value()) {
                new_vr_ur += 1;
            }
            let old_vr_ur = s.vr_ur;
            s.vr_ur = new_vr_ur;
            s.reassemble_interval(old_vr_ur, new_vr_ur, &mut deliveries);
            (s.upper.clone(), s.vr_uh > s.vr_ur)
        };
        for sdu in deliveries {
            upper.receive_pdcp_pdu(sdu);
        }
        if rearm {
            UmState::arm_reordering_timer(state);
        }
    }

    fn arm_reordering_timer(state: &Rc<RefCell<UmState>>) {
        let (scheduler, timeout) = {
            let s = state.borrow();
            (s.scheduler.clone(), s.cfg.reordering_timer)
        };
        let weak = Rc::downgrade(state);
        let event = scheduler.schedule(timeout, move || {
            if let Some(state) = weak.upgrade() {
                UmState::expire_reordering_timer(&state);
            }
        });
        let mut s = state.borrow_mut();
        s.reordering_timer = event;
        let vr_uh = s.vr_uh;
        s.vr_ux = vr_uh;
        debug!(s.logger, "Reordering timer started"; "vr_ux" => s.vr_ux.value());
    }

    fn on_rbs_timer(state: &Rc<RefCell<UmState>>) {
        let (report, mac) = {
            let s = state.borrow();
            if s.aqm.is_empty() {
                return;
            }
            (s.buffer_status(), s.mac.clone())
        };
        mac.report_buffer_status(report);
        UmState::arm_rbs_timer(state);
    }

    fn arm_rbs_timer(state: &Rc<RefCell<UmState>>) {
        let scheduler = state.borrow().scheduler.clone();
        let weak = Rc::downgrade(state);
        let event = scheduler.schedule(RBS_REREPORT_INTERVAL, move || {
            if let Some(state) = weak.upgrade() {
                UmState::on_rbs_timer(&state);
            }
        });
        state.borrow_mut().rbs_timer = event;
    }
}

impl Drop for UmState {
    fn drop(&mut self) {
        self.reordering_timer.cancel();
        self.rbs_timer.cancel();
        let stats = self.aqm.stats();
        info!(self.logger, "RLC UM AQM lifetime stats";
            "drops" => stats.forced_drop + stats.unforced_classic_drop,
            "marks" => stats.unforced_classic_mark + stats.unforced_l4s_mark);
    }
}
