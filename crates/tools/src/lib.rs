//! Developer Tooling: streamer inspection and consistency audits.
//!
//! # Invariants
//! - Tools only read streamer and pool state; they never drive the backend.

mod inspector;

pub use inspector::{PlayerInfo, StreamInspector, StreamSummary, Violation};

pub fn crate_info() -> &'static str {
    concat!("gamestream-tools v", env!("CARGO_PKG_VERSION"))
}
