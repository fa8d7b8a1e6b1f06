pub mod buffer;
pub mod connectivity;
pub mod probe;

pub use buffer::CheckBuffer;
pub use connectivity::{ConnectivityMonitor, OutageTracker, Transition};
pub use probe::{ProbeOutcome, ReachabilityProbe, TcpProbe, resolve_target};
