//! lib - byte packets and the tags the radio stack hangs off them

mod ecn;

pub use ecn::Ecn;

use sim::SimTime;

/// How much of an upper-layer SDU a packet carries.  Rewritten only at the
/// single place where SDUs are segmented.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SduStatus {
    FullSdu,
    FirstSegment,
    MiddleSegment,
    LastSegment,
}

/// An opaque byte buffer moving through the stack.
///
/// Fragments inherit the source packet's tags.  The arrival tag is written
/// once, at AQM enqueue, and never rewritten.
#[derive(Clone, Debug, Default)]
pub struct Packet {
    data: Vec<u8>,
    sdu_status: Option<SduStatus>,
    arrival: Option<SimTime>,
    sender_time: Option<SimTime>,
}

impl Packet {
    pub fn new(data: Vec<u8>) -> Self {
        Packet {
            data,
            sdu_status: None,
            arrival: None,
            sender_time: None,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Prepend header bytes.
    pub fn prepend(&mut self, header: &[u8]) {
        let mut data = Vec::with_capacity(header.len() + self.data.len());
        data.extend_from_slice(header);
        data.append(&mut self.data);
        self.data = data;
    }

    /// Append another packet's bytes.  The appended packet's tags are
    /// dropped; the receiving packet keeps its own.
    pub fn append(&mut self, mut other: Packet) {
        self.data.append(&mut other.data);
    }

    /// Copy out `len` bytes starting at `offset` as a new packet carrying
    /// the same tags.
    pub fn fragment(&self, offset: usize, len: usize) -> Packet {
        Packet {
            data: self.data[offset..offset + len].to_vec(),
            ..self.clone()
        }
    }

    pub fn remove_at_start(&mut self, len: usize) {
        self.data.drain(..len);
    }

    pub fn sdu_status(&self) -> Option<SduStatus> {
        self.sdu_status
    }

    pub fn set_sdu_status(&mut self, status: SduStatus) {
        self.sdu_status = Some(status);
    }

    pub fn clear_sdu_status(&mut self) {
        self.sdu_status = None;
    }

    pub fn arrival(&self) -> Option<SimTime> {
        self.arrival
    }

    /// Record the queue arrival time.  A tag already present wins.
    pub fn stamp_arrival(&mut self, time: SimTime) {
        self.arrival.get_or_insert(time);
    }

    pub fn sender_time(&self) -> Option<SimTime> {
        self.sender_time
    }

    pub fn set_sender_time(&mut self, time: SimTime) {
        self.sender_time = Some(time);
    }

    /// Read the ECN codepoint of the IPv4 header starting at `ip_offset`,
    /// or None if the buffer is too short to hold one.
    pub fn ecn(&self, ip_offset: usize) -> Option<Ecn> {
        self.data
            .get(ip_offset + ecn::IPV4_TOS_OFFSET)
            .map(|tos| Ecn::from_tos(*tos))
    }

    /// Rewrite the ECN codepoint in place.  Returns false if the buffer is
    /// too short.
    pub fn set_ecn(&mut self, ip_offset: usize, ecn: Ecn) -> bool {
        match self.data.get_mut(ip_offset + ecn::IPV4_TOS_OFFSET) {
            Some(tos) => {
                *tos = ecn.apply(*tos);
                true
            }
            None => false,
        }
    }
}
