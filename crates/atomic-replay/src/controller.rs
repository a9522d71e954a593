//! Deterministic re-execution of recorded atomics.
//!
//! The controller installs a seeded generator and a fixed clock, runs the
//! caller's execution step under that context, then re-hashes and re-signs
//! the result. Byte equality of `hash` and `signature.sig` against the
//! original is the determinism check.

use chrono::{DateTime, Utc};
use ed25519_dalek::SigningKey;
use serde_json::Value;
use tracing::debug;

use atomic_core::atomic::{Atomic, SignatureEnvelope};
use atomic_core::error::Result;
use atomic_canonical::atomic_hash;
use atomic_crypto::signer;
use atomic_policy::{PolicyConfig, PolicyEngine, PolicyKind};

use crate::clock::FixedClock;
use crate::rng::SeededRng;

/// Replay configuration.
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    pub seed: String,
    /// Policy evaluation order to reproduce gating decisions.
    pub policy_order: Vec<PolicyKind>,
    /// Clock base; defaults to the original's `created_at`.
    pub fixed_timestamp: Option<DateTime<Utc>>,
}

impl ReplayOptions {
    #[must_use]
    pub fn new(seed: impl Into<String>) -> Self {
        Self {
            seed: seed.into(),
            policy_order: PolicyKind::DEFAULT_ORDER.to_vec(),
            fixed_timestamp: None,
        }
    }
}

/// Field-by-field comparison of a replayed atomic against the original.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayReport {
    pub hash_match: bool,
    pub signature_match: bool,
    pub status_match: bool,
    pub output_match: bool,
}

impl ReplayReport {
    /// True when the replay reproduced the original byte-for-byte.
    #[must_use]
    pub fn deterministic(&self) -> bool {
        self.hash_match && self.signature_match && self.status_match && self.output_match
    }
}

/// Re-executes one atomic under a pinned random/clock context.
pub struct ReplayController {
    options: ReplayOptions,
}

impl ReplayController {
    #[must_use]
    pub fn new(options: ReplayOptions) -> Self {
        Self { options }
    }

    /// Policy engine wired with this replay's evaluation order.
    #[must_use]
    pub fn policy_engine(&self, config: PolicyConfig) -> PolicyEngine {
        PolicyEngine::with_order(config, self.options.policy_order.clone())
    }

    /// Replay with a no-op execution step: re-hash and re-sign only.
    pub fn replay(&self, original: &Atomic, sk: Option<&SigningKey>) -> Result<ReplayReport> {
        self.replay_with(original, sk, |_, _, _| Ok(()))
    }

    /// Replay the original through `execute`, then compare.
    ///
    /// `execute` receives the stripped atomic plus the seeded generator and
    /// fixed clock; a deterministic executor must produce identical `status`
    /// and `output` from them.
    pub fn replay_with<F>(
        &self,
        original: &Atomic,
        sk: Option<&SigningKey>,
        execute: F,
    ) -> Result<ReplayReport>
    where
        F: FnOnce(&mut Atomic, &mut SeededRng, &FixedClock) -> Result<()>,
    {
        let base = self
            .options
            .fixed_timestamp
            .or_else(|| original.created_at())
            .unwrap_or(DateTime::UNIX_EPOCH);
        let mut rng = SeededRng::from_seed(&self.options.seed);
        let clock = FixedClock::new(base);

        let mut replayed = original.clone();
        replayed.clear_signing_fields();
        execute(&mut replayed, &mut rng, &clock)?;

        let replayed = match sk {
            Some(sk) => signer::sign_at(&replayed, sk, clock.now())?,
            None => {
                let hash = atomic_hash(&replayed)?;
                replayed.set_hash(&hash);
                replayed
            }
        };

        let expected_hash = match original.hash() {
            Some(stored) => stored.to_ascii_lowercase(),
            None => atomic_hash(original)?.to_lowercase(),
        };
        let hash_match = replayed
            .hash()
            .is_some_and(|h| h.eq_ignore_ascii_case(&expected_hash));
        let signature_match = signatures_match(original.signature(), replayed.signature());
        let status_match = original.get("status") == replayed.get("status");
        let output_match = original.get("output") == replayed.get("output");

        let report = ReplayReport {
            hash_match,
            signature_match,
            status_match,
            output_match,
        };
        debug!(deterministic = report.deterministic(), "replay finished");
        Ok(report)
    }
}

/// Byte equality of the detached signatures, ignoring `signed_at`.
fn signatures_match(original: Option<&Value>, replayed: Option<&Value>) -> bool {
    match (original, replayed) {
        (None, None) => true,
        (Some(a), Some(b)) => match (sig_hex(a), sig_hex(b)) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(&b),
            _ => false,
        },
        _ => false,
    }
}

fn sig_hex(value: &Value) -> Option<String> {
    match value {
        Value::String(raw) => Some(raw.clone()),
        Value::Object(_) => SignatureEnvelope::from_value(value).ok().map(|e| e.sig),
        _ => None,
    }
}
