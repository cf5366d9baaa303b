mod monitor;

pub use monitor::{HealthMonitor, ProbeOutcome, PROBE_TIMEOUT};
