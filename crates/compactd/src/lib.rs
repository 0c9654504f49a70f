//! compactd — the compaction scheduler daemon.
//!
//! Assembles the scheduler subsystems into one process:
//! - Job store (redb)
//! - Tracker recovery
//! - Tenant discovery loop
//! - Maintenance loop (lease expiry + planning)
//! - Prometheus `/metrics` endpoint
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/metrics` | Prometheus exposition |
//! | GET | `/healthz` | Liveness probe |

pub mod daemon;
pub mod http;

pub use daemon::{DaemonOptions, run};
pub use http::build_router;
