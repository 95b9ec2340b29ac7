//! lib - RLC Unacknowledged Mode entity over a DualPI² transmit queue
//!
//! The transmit side segments and concatenates PDCP SDUs admitted through a
//! DualPI² AQM; the receive side runs the TS36.322 reordering window and
//! reassembles SDUs with a small two-state machine.

mod header;
mod reassembly;
mod sap;
mod sequence;
mod um;

pub use header::{FramingInfo, RlcHeader};
pub use reassembly::{Reassembler, ReassemblyState};
pub use sap::{
    BufferStatusReport, MacSapProvider, ReceivePduParams, RlcSapUser, TransmitPduParams,
    TxOpportunity,
};
pub use sequence::SequenceNumber10;
pub use um::{RlcUm, RlcUmConfig, RlcUmCounters};
