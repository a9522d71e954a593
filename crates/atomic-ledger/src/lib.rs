//! `atomic-ledger` — Append-only persistence and chain verification.
//!
//! # Design
//! - One line-delimited file per partition; order defines the chain
//! - Append is a mutex critical section with an fs2 advisory lock
//! - Verification streams: memory is bounded by the largest line plus the
//!   per-trace hash chains, never by file size

pub mod rotation;
pub mod store;
pub mod verify;

pub use rotation::{RotatingLedger, RotationStrategy};
pub use store::{LedgerStats, LedgerStore, QueryFilter, ScanPage, ScanRequest};
pub use verify::{
    ChainVerifier, ForkReport, LineIssue, LineResult, LineStatus, VerificationReport,
    VerifyOptions, MAX_LINE_BYTES,
};
