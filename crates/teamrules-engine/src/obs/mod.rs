//! In-process observability.
//!
//! Decision counters and evaluation latency, rendered in Prometheus text
//! format on demand.

pub mod metrics;
