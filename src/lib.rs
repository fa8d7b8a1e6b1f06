//! Connectivity state tracking and speed test scheduling
//!
//! Two long-running loops share one store:
//!
//! - [`monitors::ConnectivityMonitor`] samples reachability on a
//!   midnight-aligned interval and maintains contiguous up/down periods
//! - [`speedtest::SpeedTestScheduler`] runs single-flight throughput tests
//!
//! [`LinkWatch`] wires them together and exposes the read-side entry points.

pub mod clock;
pub mod config;
pub mod monitors;
pub mod notify;
pub mod service;
pub mod settings;
pub mod speedtest;
pub mod storage;
pub mod util;

pub use service::LinkWatch;
