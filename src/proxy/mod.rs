mod forwarder;

pub use forwarder::{ForwardError, Forwarder};
