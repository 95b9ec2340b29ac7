//! RLC UM data PDU header codec, TS36.322, 6.2.1.3.
//!
//! Two fixed octets (`DC:1 | RF:1 | P:1 | FI:2 | E:1 | SN[9:8]`, then
//! `SN[7:0]`) followed by 12-bit `(E, LI)` units packed MSB-first, so two
//! length indicators share three octets.

use crate::SequenceNumber10;
use anyhow::{Result, ensure};
use std::collections::VecDeque;
use std::fmt;

/// Largest value an 11-bit length indicator can carry.
pub const MAX_LENGTH_INDICATOR: usize = 2047;

const FIXED_HEADER_LEN: usize = 2;
const NO_FIRST_BYTE: u8 = 0b10;
const NO_LAST_BYTE: u8 = 0b01;

/// Framing Info: whether the data field starts and ends on SDU boundaries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FramingInfo {
    first_byte_aligned: bool,
    last_byte_aligned: bool,
}

impl FramingInfo {
    pub fn new(first_byte_aligned: bool, last_byte_aligned: bool) -> Self {
        FramingInfo {
            first_byte_aligned,
            last_byte_aligned,
        }
    }

    pub fn first_byte_aligned(&self) -> bool {
        self.first_byte_aligned
    }

    pub fn last_byte_aligned(&self) -> bool {
        self.last_byte_aligned
    }

    fn to_bits(self) -> u8 {
        let mut bits = 0;
        if !self.first_byte_aligned {
            bits |= NO_FIRST_BYTE;
        }
        if !self.last_byte_aligned {
            bits |= NO_LAST_BYTE;
        }
        bits
    }

    fn from_bits(bits: u8) -> Self {
        FramingInfo {
            first_byte_aligned: bits & NO_FIRST_BYTE == 0,
            last_byte_aligned: bits & NO_LAST_BYTE == 0,
        }
    }
}

impl Default for FramingInfo {
    fn default() -> Self {
        FramingInfo::new(true, true)
    }
}

impl fmt::Display for FramingInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let first = if self.first_byte_aligned { "F" } else { "!F" };
        let last = if self.last_byte_aligned { "L" } else { "!L" };
        write!(f, "{first}|{last}")
    }
}

/// UM data PDU header under construction or being consumed.
///
/// The transmitter pushes one extension bit per data field element and one
/// length indicator per element that has a successor; the receiver pops them
/// in the same order to walk the data field.
#[derive(Clone, Debug, Default)]
pub struct RlcHeader {
    data_pdu: bool,
    resegmentation: bool,
    poll: bool,
    framing_info: FramingInfo,
    sequence_number: SequenceNumber10,
    extension_bits: VecDeque<bool>,
    length_indicators: VecDeque<u16>,
}

impl RlcHeader {
    pub fn new() -> Self {
        RlcHeader {
            data_pdu: true,
            ..Default::default()
        }
    }

    pub fn sequence_number(&self) -> SequenceNumber10 {
        self.sequence_number
    }

    pub fn set_sequence_number(&mut self, sequence_number: SequenceNumber10) {
        self.sequence_number = sequence_number;
    }

    pub fn framing_info(&self) -> FramingInfo {
        self.framing_info
    }

    pub fn set_framing_info(&mut self, framing_info: FramingInfo) {
        self.framing_info = framing_info;
    }

    /// `true` announces that an (E, LI) unit for the next element follows.
    pub fn push_extension_bit(&mut self, li_follows: bool) {
        self.extension_bits.push_back(li_follows);
    }

    pub fn push_length_indicator(&mut self, length: u16) {
        self.length_indicators.push_back(length & MAX_LENGTH_INDICATOR as u16);
    }

    pub fn pop_extension_bit(&mut self) -> Option<bool> {
        self.extension_bits.pop_front()
    }

    pub fn pop_length_indicator(&mut self) -> Option<u16> {
        self.length_indicators.pop_front()
    }

    pub fn serialized_size(&self) -> usize {
        FIXED_HEADER_LEN + (3 * self.length_indicators.len()).div_ceil(2)
    }

    pub fn encode(&self) -> Vec<u8> {
        let sn = self.sequence_number.value();
        let first_extension = self.extension_bits.front().copied().unwrap_or(false);
        let byte0 = (self.data_pdu as u8) << 7
            | (self.resegmentation as u8) << 6
            | (self.poll as u8) << 5
            | self.framing_info.to_bits() << 3
            | (first_extension as u8) << 2
            | (sn >> 8) as u8;

        let mut out = Vec::with_capacity(self.serialized_size());
        out.push(byte0);
        out.push((sn & 0xff) as u8);

        // Pack the remaining (E, LI) units, 12 bits each, MSB-first.
        let mut acc: u32 = 0;
        let mut pending_bits = 0;
        for (index, li) in self.length_indicators.iter().enumerate() {
            let extension = self.extension_bits.get(index + 1).copied().unwrap_or(false);
            let unit = (extension as u16) << 11 | (li & 0x7ff);
            acc = acc << 12 | unit as u32;
            pending_bits += 12;
            while pending_bits >= 8 {
                out.push((acc >> (pending_bits - 8)) as u8);
                pending_bits -= 8;
            }
        }
        if pending_bits > 0 {
            out.push((acc << (8 - pending_bits)) as u8);
        }
        out
    }

    pub fn decode(data: &[u8]) -> Result<RlcHeader> {
        ensure!(data.len() >= FIXED_HEADER_LEN, "Too short for RLC header");
        let byte0 = data[0];
        let mut header = RlcHeader {
            data_pdu: byte0 & 0x80 != 0,
            resegmentation: byte0 & 0x40 != 0,
            poll: byte0 & 0x20 != 0,
            framing_info: FramingInfo::from_bits((byte0 >> 3) & 0b11),
            sequence_number: SequenceNumber10::new(((byte0 & 0b11) as u16) << 8 | data[1] as u16),
            extension_bits: VecDeque::new(),
            length_indicators: VecDeque::new(),
        };
        header.extension_bits.push_back(byte0 & 0b100 != 0);

        let mut reader = BitReader::new(&data[FIXED_HEADER_LEN..]);
        while *header.extension_bits.back().unwrap() {
            ensure!(
                reader.remaining() >= 12,
                "RLC header truncated in the length indicators"
            );
            let extension = reader.read(1) != 0;
            let li = reader.read(11);
            header.extension_bits.push_back(extension);
            header.length_indicators.push_back(li);
        }
        Ok(header)
    }
}

impl fmt::Display for RlcHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SN={} FI={} LI={:?}",
            self.sequence_number, self.framing_info, self.length_indicators
        )
    }
}

struct BitReader<'a> {
    data: &'a [u8],
    cursor: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        BitReader { data, cursor: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() * 8 - self.cursor
    }

    fn read(&mut self, bits: usize) -> u16 {
        let mut value = 0u16;
        for _ in 0..bits {
            let byte = self.data[self.cursor / 8];
            let bit = (byte >> (7 - self.cursor % 8)) & 1;
            value = value << 1 | bit as u16;
            self.cursor += 1;
        }
        value
    }
}
