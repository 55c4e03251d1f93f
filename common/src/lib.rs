//! Common types and definitions shared between the daemon and its tools.

pub mod config;
pub mod ioctl;
pub mod proto;
pub mod scsi;
pub mod types;

pub use config::*;
pub use types::*;
// Note: proto and scsi are NOT re-exported via `pub use *` to avoid flooding
// the crate root with wire-level constants. Use `opticd_common::scsi::*` and
// `opticd_common::proto::*` directly.
