//! Structured error hierarchy for the atomic ledger.
//!
//! Every fallible operation returns `Result<T, AtomicError>`; the error is a
//! closed enumeration mapped to stable string codes for API consumers.
//! Uses `thiserror` for library errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable error codes — string identifiers that survive refactors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Canonicalization
    NonFiniteNumber,
    UnsupportedType,
    // Value objects
    InvalidHash,
    InvalidTraceId,
    InvalidCursor,
    // Store
    DuplicateAtomic,
    InvalidAtomic,
    // Verification
    LineTooLarge,
    ParseError,
    InvalidGenesis,
    MissingPrev,
    PrevMismatch,
    HashMismatch,
    // Signatures
    InvalidSignature,
    UnsupportedAlgorithm,
    InvalidSignatureFormat,
    SignatureError,
    // Policy
    PolicyTtlExpired,
    PolicyThrottled,
    PolicyCircuitOpen,
    // Infrastructure
    RepositoryError,
}

impl ErrorCode {
    /// The stable wire string, e.g. `DUPLICATE_ATOMIC`.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NonFiniteNumber => "NON_FINITE_NUMBER",
            Self::UnsupportedType => "UNSUPPORTED_TYPE",
            Self::InvalidHash => "INVALID_HASH",
            Self::InvalidTraceId => "INVALID_TRACE_ID",
            Self::InvalidCursor => "INVALID_CURSOR",
            Self::DuplicateAtomic => "DUPLICATE_ATOMIC",
            Self::InvalidAtomic => "INVALID_ATOMIC",
            Self::LineTooLarge => "LINE_TOO_LARGE",
            Self::ParseError => "PARSE_ERROR",
            Self::InvalidGenesis => "INVALID_GENESIS",
            Self::MissingPrev => "MISSING_PREV",
            Self::PrevMismatch => "PREV_MISMATCH",
            Self::HashMismatch => "HASH_MISMATCH",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::UnsupportedAlgorithm => "UNSUPPORTED_ALGORITHM",
            Self::InvalidSignatureFormat => "INVALID_SIGNATURE_FORMAT",
            Self::SignatureError => "SIGNATURE_ERROR",
            Self::PolicyTtlExpired => "POLICY_TTL_EXPIRED",
            Self::PolicyThrottled => "POLICY_THROTTLED",
            Self::PolicyCircuitOpen => "POLICY_CIRCUIT_OPEN",
            Self::RepositoryError => "REPOSITORY_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-readable error envelope.
///
/// All errors crossing the CLI or service boundary are rendered in this form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorEnvelope {
    /// Build an envelope from an `AtomicError`.
    #[must_use]
    pub fn from_error(err: &AtomicError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
            details: err.details(),
        }
    }
}

/// Primary error type for all ledger crates.
#[derive(Error, Debug)]
pub enum AtomicError {
    // Canonicalization
    #[error("non-finite number cannot be canonicalized")]
    NonFiniteNumber,

    #[error("unsupported value type: {kind}")]
    UnsupportedType { kind: String },

    // Value objects
    #[error("invalid hash: {value:?}")]
    InvalidHash { value: String },

    #[error("invalid trace id: {value:?}")]
    InvalidTraceId { value: String },

    #[error("invalid cursor: {value:?}")]
    InvalidCursor { value: String },

    // Store
    #[error("duplicate atomic: hash {hash} already appended")]
    DuplicateAtomic { hash: String },

    #[error("invalid atomic: {reason}")]
    InvalidAtomic { reason: String },

    // Verification
    #[error("line {line} exceeds {limit} bytes")]
    LineTooLarge { line: u64, limit: u64 },

    #[error("parse error: {reason}")]
    Parse { reason: String },

    #[error("genesis atomic must not reference a prev hash")]
    InvalidGenesis,

    #[error("atomic is missing its prev hash")]
    MissingPrev,

    #[error("prev mismatch: expected {expected}, found {found}")]
    PrevMismatch { expected: String, found: String },

    #[error("hash mismatch: stored {stored}, computed {computed}")]
    HashMismatch { stored: String, computed: String },

    // Signatures
    #[error("signature verification failed")]
    InvalidSignature,

    #[error("unsupported signature algorithm: {alg:?}")]
    UnsupportedAlgorithm { alg: String },

    #[error("invalid signature format: {reason}")]
    InvalidSignatureFormat { reason: String },

    #[error("signature error: {reason}")]
    SignatureError { reason: String },

    // Policy
    #[error("ttl expired: {reason}")]
    TtlExpired { reason: String },

    #[error("throttled: retry after {retry_after_ms}ms")]
    Throttled { retry_after_ms: u64 },

    #[error("circuit open: retry after {retry_after_ms}ms")]
    CircuitOpen { retry_after_ms: u64 },

    // Infrastructure
    #[error("repository error: {context}")]
    Repository {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl AtomicError {
    /// Return the stable error code.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NonFiniteNumber => ErrorCode::NonFiniteNumber,
            Self::UnsupportedType { .. } => ErrorCode::UnsupportedType,
            Self::InvalidHash { .. } => ErrorCode::InvalidHash,
            Self::InvalidTraceId { .. } => ErrorCode::InvalidTraceId,
            Self::InvalidCursor { .. } => ErrorCode::InvalidCursor,
            Self::DuplicateAtomic { .. } => ErrorCode::DuplicateAtomic,
            Self::InvalidAtomic { .. } => ErrorCode::InvalidAtomic,
            Self::LineTooLarge { .. } => ErrorCode::LineTooLarge,
            Self::Parse { .. } => ErrorCode::ParseError,
            Self::InvalidGenesis => ErrorCode::InvalidGenesis,
            Self::MissingPrev => ErrorCode::MissingPrev,
            Self::PrevMismatch { .. } => ErrorCode::PrevMismatch,
            Self::HashMismatch { .. } => ErrorCode::HashMismatch,
            Self::InvalidSignature => ErrorCode::InvalidSignature,
            Self::UnsupportedAlgorithm { .. } => ErrorCode::UnsupportedAlgorithm,
            Self::InvalidSignatureFormat { .. } => ErrorCode::InvalidSignatureFormat,
            Self::SignatureError { .. } => ErrorCode::SignatureError,
            Self::TtlExpired { .. } => ErrorCode::PolicyTtlExpired,
            Self::Throttled { .. } => ErrorCode::PolicyThrottled,
            Self::CircuitOpen { .. } => ErrorCode::PolicyCircuitOpen,
            Self::Repository { .. } => ErrorCode::RepositoryError,
        }
    }

    /// Optional structured details for API responses.
    #[must_use]
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::Throttled { retry_after_ms } | Self::CircuitOpen { retry_after_ms } => {
                Some(serde_json::json!({ "retry_after_ms": retry_after_ms }))
            }
            Self::PrevMismatch { expected, found } => Some(serde_json::json!({
                "expected": expected,
                "found": found,
            })),
            Self::HashMismatch { stored, computed } => Some(serde_json::json!({
                "stored": stored,
                "computed": computed,
            })),
            Self::LineTooLarge { line, limit } => Some(serde_json::json!({
                "line": line,
                "limit_bytes": limit,
            })),
            _ => None,
        }
    }

    /// Machine-readable retry hint for policy denials.
    #[must_use]
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::Throttled { retry_after_ms } | Self::CircuitOpen { retry_after_ms } => {
                Some(*retry_after_ms)
            }
            _ => None,
        }
    }

    /// Helpers for common cases.
    pub fn invalid_atomic(reason: impl ToString) -> Self {
        Self::InvalidAtomic {
            reason: reason.to_string(),
        }
    }

    pub fn parse(reason: impl ToString) -> Self {
        Self::Parse {
            reason: reason.to_string(),
        }
    }

    pub fn repository(context: impl ToString, source: std::io::Error) -> Self {
        Self::Repository {
            context: context.to_string(),
            source,
        }
    }
}

/// Alias for `Result<T, AtomicError>`.
pub type Result<T> = std::result::Result<T, AtomicError>;
