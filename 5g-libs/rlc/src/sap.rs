//! Service access points between RLC and its MAC and PDCP neighbours.

use packet::Packet;

/// Byte budget and addressing for one MAC transmit opportunity.
#[derive(Clone, Copy, Debug)]
pub struct TxOpportunity {
    pub bytes: usize,
    pub layer: u8,
    pub harq_id: u8,
    pub component_carrier_id: u8,
}

/// One RLC PDU on its way down to MAC.
#[derive(Clone, Debug)]
pub struct TransmitPduParams {
    pub pdu: Packet,
    pub rnti: u16,
    pub lcid: u8,
    pub layer: u8,
    pub harq_process_id: u8,
    pub component_carrier_id: u8,
}

/// One RLC PDU delivered up from MAC.
#[derive(Clone, Debug)]
pub struct ReceivePduParams {
    pub packet: Packet,
    pub rnti: u16,
    pub lcid: u8,
}

/// Buffer occupancy reported to the MAC scheduler.  UM never retransmits,
/// so the retx and status fields stay zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferStatusReport {
    pub rnti: u16,
    pub lcid: u8,
    pub tx_queue_size: usize,
    pub tx_hol_delay_ms: u64,
    pub retx_queue_size: usize,
    pub retx_hol_delay_ms: u64,
    pub status_pdu_size: usize,
}

/// What RLC needs from the MAC below it.
pub trait MacSapProvider {
    fn transmit_pdu(&self, params: TransmitPduParams);
    fn report_buffer_status(&self, report: BufferStatusReport);
}

/// What RLC offers the PDCP layer above it.
pub trait RlcSapUser {
    /// Reassembled SDUs arrive in ascending sequence-number order.
    fn receive_pdcp_pdu(&self, sdu: Packet);
}
