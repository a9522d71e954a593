//! Policy evaluation context and result types.
//!
//! `PolicyContext` is the full input to the policy engine.
//! `PolicyDecision` is the output.

use chrono::{DateTime, Utc};
use serde::Serialize;

use atomic_core::atomic::Atomic;
use atomic_core::error::ErrorCode;

/// Everything the engine needs for one evaluation.
#[derive(Debug, Clone)]
pub struct PolicyContext {
    /// Caller-supplied key scoping throttle and breaker state.
    pub key: String,
    pub created_at: Option<DateTime<Utc>>,
    /// Observed execution duration, for the slow-run annotation.
    pub duration_ms: Option<u64>,
    /// Evaluation wall clock; injectable for tests and replay.
    pub now: DateTime<Utc>,
}

impl PolicyContext {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            created_at: None,
            duration_ms: None,
            now: Utc::now(),
        }
    }

    /// Context for gating an atomic before append.
    pub fn for_atomic(atomic: &Atomic, key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            created_at: atomic.created_at(),
            duration_ms: None,
            now: Utc::now(),
        }
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    pub fn duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }
}

/// Whether the gated operation may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

/// Wall-clock cost of evaluating one policy.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyTiming {
    pub policy: String,
    pub elapsed_us: u128,
}

/// Decision returned by the engine.
///
/// `policy_applied` lists the evaluated policies in evaluation order; on a
/// deny it ends with the denying policy.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyDecision {
    pub effect: Effect,
    pub policy_applied: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    /// Advisory labels, e.g. `slow`.
    pub annotations: Vec<String>,
    pub timings: Vec<PolicyTiming>,
}

impl PolicyDecision {
    #[must_use]
    pub fn allow() -> Self {
        Self {
            effect: Effect::Allow,
            policy_applied: Vec::new(),
            code: None,
            reason: None,
            retry_after_ms: None,
            annotations: Vec::new(),
            timings: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_allowed(&self) -> bool {
        self.effect == Effect::Allow
    }

    pub(crate) fn deny_with(
        &mut self,
        code: ErrorCode,
        reason: impl Into<String>,
        retry_after_ms: Option<u64>,
    ) {
        self.effect = Effect::Deny;
        self.code = Some(code);
        self.reason = Some(reason.into());
        self.retry_after_ms = retry_after_ms;
    }
}
