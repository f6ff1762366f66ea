//! Query-log analysis: statement extraction, fingerprinting, clause
//! reference resolution and workload aggregation.

pub mod fingerprint;
pub mod log;
pub mod query_parser;
pub mod workload;

pub use query_parser::{ClauseKind, ClauseReferences, TableColumn};
pub use workload::{ColumnReferenceStats, JointColumns, QueryTemplate, Workload, WorkloadError};
