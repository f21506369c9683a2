//! Scheduler for reconciliation passes: single-shot and polling daemon,
//! plus the Unix control socket that talks to a running daemon.

mod error;
pub mod logging;
pub mod protocol;
mod runner;

pub use error::DaemonError;
pub use logging::init_tracing;
pub use protocol::{
    request_metrics, request_pass, request_status, request_stop, send_request, DaemonRequest,
    DaemonResponse,
};
pub use runner::{
    build_pass_summary, cleanup_prior_scope, run_once_blocking, start_blocking, PassSummary, Runner,
};
