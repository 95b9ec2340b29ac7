//! lib - DualPI² coupled AQM: two FIFOs, one PI controller
//!
//! Classic traffic is dropped or CE-marked with probability p², L4S traffic
//! is CE-marked with probability k·p or when its head-of-line sojourn climbs
//! over a shallow threshold, per the DualQ coupled AQM of RFC 9332.

mod disc;
mod item;

pub use disc::{Dualpi2, Dualpi2Stats};
pub use item::{QueueItem, TrafficClass};

use std::time::Duration;

/// Unit used for the queue limit and occupancy checks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueMode {
    Packets,
    Bytes,
}

#[derive(Clone, Debug)]
pub struct Dualpi2Config {
    pub mode: QueueMode,
    /// Average packet size used by the byte-mode shallow-queue floor.
    pub mean_packet_size: usize,
    /// Integral gain of the PI controller.
    pub alpha: f64,
    /// Proportional gain of the PI controller.
    pub beta: f64,
    /// Probability update period.
    pub t_update: Duration,
    /// Initial delay before the first probability update.
    pub s_update: Duration,
    /// Queue limit, in packets or bytes according to `mode`.
    pub queue_limit: usize,
    /// Target queuing delay for Classic traffic.
    pub classic_delay_ref: Duration,
    /// Sojourn threshold above which L4S packets are CE-marked.
    pub l4s_threshold: Duration,
    /// Coupling factor between the Classic and L4S probabilities.
    pub k: u32,
    /// Seed for this queue's private random stream, so runs reproduce.
    pub seed: u64,
}

impl Default for Dualpi2Config {
    fn default() -> Self {
        Dualpi2Config {
            mode: QueueMode::Packets,
            mean_packet_size: 1024,
            alpha: 10.0,
            beta: 100.0,
            t_update: Duration::from_millis(16),
            s_update: Duration::ZERO,
            queue_limit: 25,
            classic_delay_ref: Duration::from_millis(15),
            l4s_threshold: Duration::from_millis(1),
            k: 2,
            seed: 1,
        }
    }
}
