// Device abstraction — presence probes and action sinks for attached hardware.

pub mod file_link;
pub mod traits;
