//! Resilient domain resolution and global DNS propagation checks.
//!
//! [`resolver::Resolver`] turns a domain into one validated address through an
//! ordered chain of fallback methods. [`propagation::PropagationProber`] asks
//! every server in a [`registry::Registry`] the same question concurrently and
//! classifies how far the answer has spread, and [`monitor::Monitor`] repeats
//! that on an interval while flagging majority changes.

pub mod bench;
pub mod config;
pub mod dns;
pub mod error;
pub mod monitor;
pub mod propagation;
pub mod registry;
pub mod resolver;
pub mod stats;
pub mod transport;

pub use bench::{BenchmarkRecorder, BenchmarkReport};
pub use config::Settings;
pub use dns::{HickoryTransport, RecordType};
pub use error::{Error, QueryError, Result};
pub use monitor::{CancelHandle, Monitor, MonitorSession, MonitorTick};
pub use propagation::{PropagationProber, PropagationSnapshot};
pub use registry::Registry;
pub use resolver::{Resolution, Resolver};
pub use stats::{classify, Classification, PropagationStatus};
pub use transport::{DnsTransport, QueryOutcome, QueryResult, ServerEntry};
