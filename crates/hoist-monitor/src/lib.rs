//! hoist-monitor — the reservation monitor.
//!
//! Polls the external scheduling authority for each configured queue,
//! pages through the scheduled-job listing, batch-reserves whole pages,
//! and inserts every granted job into the job index. Jobs the authority
//! declines were lost to another actor and are silently dropped.
//!
//! The authority protocol is consumed, not implemented here: it is
//! modeled as the [`Authority`] trait with a reqwest-backed
//! [`HttpAuthority`]; tests substitute in-memory fakes.

pub mod authority;
pub mod monitor;

pub use authority::{Authority, AuthorityError, HttpAuthority};
pub use monitor::Monitor;
