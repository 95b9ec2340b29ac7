//! lib - wiring for a downlink RLC-UM / DualPI² run
//!
//! Traffic sources hand PDCP-encapsulated IPv4 SDUs to a transmitting UM
//! entity; a fixed-delay MAC link carries the PDUs to the receiving entity,
//! which delivers reassembled SDUs to a counting sink.

mod channel;
mod scenario;
mod traffic;

pub use channel::MacChannel;
pub use scenario::{Scenario, ScenarioConfig, ScenarioReport};
pub use traffic::{SduSink, TrafficSource};
