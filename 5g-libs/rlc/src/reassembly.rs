//! SDU reassembly from UMD PDU data fields, TS36.322, 5.1.2.2.
//!
//! The FI transition table is encoded as data: one row per
//! (state, gap, framing-info) combination, executed by a single interpreter.

use crate::FramingInfo;
use packet::Packet;
use slog::{Logger, warn};
use std::collections::VecDeque;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReassemblyState {
    /// No partial SDU carried over from the previous PDU.
    WaitingS0Full,
    /// Holding a partially assembled SDU waiting for its continuation.
    WaitingSiSf,
}

#[derive(Clone, Copy)]
struct Transition {
    legal: bool,
    /// Drop the carried partial SDU before anything else.
    discard_s0: bool,
    /// Append the first element to the carried SDU (continuation arrived).
    join_first: bool,
    /// Drop the first element (a stray tail with no head to join).
    discard_first: bool,
    /// Retain the last element as the new partial SDU.
    keep_last: bool,
}

const LEGAL: Transition = Transition {
    legal: true,
    discard_s0: false,
    join_first: false,
    discard_first: false,
    keep_last: false,
};

const ILLEGAL: Transition = Transition {
    legal: false,
    ..LEGAL
};

// Indexed by [state][gap][fi] with fi = first_aligned << 1 | last_aligned.
#[rustfmt::skip]
const TRANSITIONS: [[[Transition; 4]; 2]; 2] = {
    let s0_full = [
        /* !F|!L */ Transition { discard_first: true, keep_last: true, ..LEGAL },
        /* !F| L */ Transition { discard_first: true, ..LEGAL },
        /*  F|!L */ Transition { keep_last: true, ..LEGAL },
        /*  F| L */ LEGAL,
    ];
    [
        // WAITING_S0_FULL behaves identically with and without a gap.
        [s0_full, s0_full],
        [
            // WAITING_SI_SF, no gap: the continuation of S0 must arrive.
            [
                /* !F|!L */ Transition { join_first: true, keep_last: true, ..LEGAL },
                /* !F| L */ Transition { join_first: true, ..LEGAL },
                /*  F|!L */ ILLEGAL,
                /*  F| L */ ILLEGAL,
            ],
            // WAITING_SI_SF, gap: the continuation was lost, drop S0.
            [
                /* !F|!L */ Transition { discard_s0: true, discard_first: true, keep_last: true, ..LEGAL },
                /* !F| L */ Transition { discard_s0: true, discard_first: true, ..LEGAL },
                /*  F|!L */ Transition { discard_s0: true, keep_last: true, ..LEGAL },
                /*  F| L */ Transition { discard_s0: true, ..LEGAL },
            ],
        ],
    ]
};

/// The receive-side reassembly machine.
pub struct Reassembler {
    keep_s0: Option<Packet>,
}

impl Reassembler {
    pub fn new() -> Self {
        Reassembler { keep_s0: None }
    }

    pub fn state(&self) -> ReassemblyState {
        if self.keep_s0.is_some() {
            ReassemblyState::WaitingSiSf
        } else {
            ReassemblyState::WaitingS0Full
        }
    }

    /// Feed one PDU's data field elements.  `gap` says the PDU's SN was not
    /// the one expected.  Completed SDUs are handed to `deliver` in order.
    pub fn process(
        &mut self,
        fi: FramingInfo,
        gap: bool,
        mut sdus: VecDeque<Packet>,
        logger: &Logger,
        deliver: &mut dyn FnMut(Packet),
    ) {
        let state_index = match self.state() {
            ReassemblyState::WaitingS0Full => 0,
            ReassemblyState::WaitingSiSf => 1,
        };
        let fi_index = (fi.first_byte_aligned() as usize) << 1 | fi.last_byte_aligned() as usize;
        let row = TRANSITIONS[state_index][gap as usize][fi_index];

        if !row.legal {
            warn!(logger, "Reassembly transition not possible"; "fi" => %fi);
            return;
        }

        if row.discard_s0 {
            self.keep_s0 = None;
        }

        if row.join_first {
            match (self.keep_s0.take(), sdus.pop_front()) {
                (Some(mut s0), Some(tail)) => {
                    s0.append(tail);
                    if row.keep_last && sdus.is_empty() {
                        // Still not on an SDU boundary: the merged segment
                        // stays as the carried partial SDU.
                        self.keep_s0 = Some(s0);
                    } else {
                        deliver(s0);
                    }
                }
                _ => {
                    warn!(logger, "Reassembly transition with no partial SDU to join");
                }
            }
        }

        if row.discard_first {
            sdus.pop_front();
        }

        while sdus.len() > row.keep_last as usize {
            deliver(sdus.pop_front().unwrap());
        }

        if row.keep_last {
            if let Some(last) = sdus.pop_front() {
                self.keep_s0 = Some(last);
            }
        }
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Reassembler::new()
    }
}
