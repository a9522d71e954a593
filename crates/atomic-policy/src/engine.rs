//! Policy evaluation engine — core decision loop.
//!
//! Evaluates the configured policies against a `PolicyContext` in a
//! deterministic order with short-circuit-deny semantics: the first deny
//! wins; otherwise the decision is allow with every evaluated policy listed.
//!
//! Throttle and breaker state is in-process only and keyed by the
//! caller-supplied context key.

use std::time::Instant;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use tracing::debug;

use atomic_core::error::ErrorCode;

use crate::evaluation::{PolicyContext, PolicyDecision, PolicyTiming};
use crate::rules::{BreakerConfig, PolicyConfig, PolicyKind, ThrottleConfig};

enum Outcome {
    Allow,
    Annotate(&'static str),
    Deny {
        code: ErrorCode,
        reason: String,
        retry_after_ms: Option<u64>,
    },
}

#[derive(Debug)]
struct ThrottleWindow {
    window_start: DateTime<Utc>,
    count: u32,
}

#[derive(Debug, Default)]
struct BreakerState {
    errors: u32,
    broken_until: Option<DateTime<Utc>>,
}

/// Gate evaluator with per-key throttle and breaker state.
pub struct PolicyEngine {
    config: PolicyConfig,
    order: Vec<PolicyKind>,
    throttle: DashMap<String, ThrottleWindow>,
    breaker: DashMap<String, BreakerState>,
}

impl PolicyEngine {
    /// Engine with the default TTL → Slow → Throttle → Breaker order.
    #[must_use]
    pub fn new(config: PolicyConfig) -> Self {
        Self::with_order(config, PolicyKind::DEFAULT_ORDER.to_vec())
    }

    /// Engine with an explicit evaluation order.
    #[must_use]
    pub fn with_order(config: PolicyConfig, order: Vec<PolicyKind>) -> Self {
        Self {
            config,
            order,
            throttle: DashMap::new(),
            breaker: DashMap::new(),
        }
    }

    /// Evaluate every configured policy in order.
    ///
    /// A throttle allow consumes one slot of the key's window; denials are
    /// expected control-flow outcomes, not errors.
    pub fn evaluate(&self, ctx: &PolicyContext) -> PolicyDecision {
        let mut decision = PolicyDecision::allow();
        for kind in &self.order {
            let started = Instant::now();
            let outcome = match kind {
                PolicyKind::Ttl => match self.config.ttl {
                    Some(ttl) => eval_ttl(ttl, ctx),
                    None => continue,
                },
                PolicyKind::Slow => match self.config.slow {
                    Some(slow) => eval_slow(slow, ctx),
                    None => continue,
                },
                PolicyKind::Throttle => match self.config.throttle {
                    Some(throttle) => self.eval_throttle(throttle, ctx),
                    None => continue,
                },
                PolicyKind::CircuitBreaker => match self.config.breaker {
                    Some(breaker) => self.eval_breaker(breaker, ctx),
                    None => continue,
                },
            };
            decision.policy_applied.push(kind.as_str().to_string());
            decision.timings.push(PolicyTiming {
                policy: kind.as_str().to_string(),
                elapsed_us: started.elapsed().as_micros(),
            });
            match outcome {
                Outcome::Allow => {}
                Outcome::Annotate(label) => decision.annotations.push(label.to_string()),
                Outcome::Deny {
                    code,
                    reason,
                    retry_after_ms,
                } => {
                    debug!(key = %ctx.key, policy = kind.as_str(), %code, "policy denied");
                    decision.deny_with(code, reason, retry_after_ms);
                    break;
                }
            }
        }
        decision
    }

    /// Count one failure against a key. The breaker trips on the next
    /// evaluation once the threshold is reached.
    pub fn record_error(&self, key: &str) {
        let mut entry = self.breaker.entry(key.to_string()).or_default();
        entry.errors = entry.errors.saturating_add(1);
    }

    /// Reset a key's failure history and close its breaker.
    pub fn record_success(&self, key: &str) {
        if let Some(mut entry) = self.breaker.get_mut(key) {
            entry.errors = 0;
            entry.broken_until = None;
        }
    }

    fn eval_throttle(&self, config: ThrottleConfig, ctx: &PolicyContext) -> Outcome {
        let window_ms = config.window.as_millis() as i64;
        let mut entry = self
            .throttle
            .entry(ctx.key.clone())
            .or_insert_with(|| ThrottleWindow {
                window_start: ctx.now,
                count: 0,
            });
        let elapsed = ctx
            .now
            .signed_duration_since(entry.window_start)
            .num_milliseconds();
        if elapsed > window_ms {
            entry.window_start = ctx.now;
            entry.count = 0;
        }
        if entry.count >= config.max_requests {
            let remaining = ctx
                .now
                .signed_duration_since(entry.window_start)
                .num_milliseconds();
            let retry = (window_ms - remaining).max(0) as u64;
            return Outcome::Deny {
                code: ErrorCode::PolicyThrottled,
                reason: format!(
                    "{} requests within {}ms window",
                    entry.count, window_ms
                ),
                retry_after_ms: Some(retry),
            };
        }
        entry.count += 1;
        Outcome::Allow
    }

    fn eval_breaker(&self, config: BreakerConfig, ctx: &PolicyContext) -> Outcome {
        let timeout_ms = config.timeout.as_millis() as i64;
        let mut entry = self.breaker.entry(ctx.key.clone()).or_default();
        if let Some(until) = entry.broken_until {
            if until > ctx.now {
                let retry = until.signed_duration_since(ctx.now).num_milliseconds().max(0) as u64;
                return Outcome::Deny {
                    code: ErrorCode::PolicyCircuitOpen,
                    reason: "circuit breaker open".to_string(),
                    retry_after_ms: Some(retry),
                };
            }
            // Timeout elapsed: close the breaker and forget the history.
            entry.broken_until = None;
            entry.errors = 0;
        }
        if entry.errors >= config.error_threshold {
            entry.broken_until = Some(ctx.now + ChronoDuration::milliseconds(timeout_ms));
            return Outcome::Deny {
                code: ErrorCode::PolicyCircuitOpen,
                reason: format!("{} consecutive errors tripped the breaker", entry.errors),
                retry_after_ms: Some(timeout_ms.max(0) as u64),
            };
        }
        Outcome::Allow
    }
}

fn eval_ttl(ttl: std::time::Duration, ctx: &PolicyContext) -> Outcome {
    let Some(created) = ctx.created_at else {
        return Outcome::Deny {
            code: ErrorCode::PolicyTtlExpired,
            reason: "NO_CREATED_AT".to_string(),
            retry_after_ms: None,
        };
    };
    let age_ms = ctx
        .now
        .signed_duration_since(created)
        .num_milliseconds()
        .max(0) as u64;
    let ttl_ms = ttl.as_millis() as u64;
    if age_ms > ttl_ms {
        return Outcome::Deny {
            code: ErrorCode::PolicyTtlExpired,
            reason: format!("age {age_ms}ms exceeds ttl {ttl_ms}ms"),
            retry_after_ms: None,
        };
    }
    Outcome::Allow
}

fn eval_slow(slow: std::time::Duration, ctx: &PolicyContext) -> Outcome {
    let slow_ms = slow.as_millis() as u64;
    match ctx.duration_ms {
        Some(duration) if duration > slow_ms => Outcome::Annotate("slow"),
        _ => Outcome::Allow,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn now() -> DateTime<Utc> {
        "2024-05-01T12:00:00Z".parse().unwrap()
    }

    fn ctx_with_age(ms: i64) -> PolicyContext {
        PolicyContext::new("key")
            .created_at(now() - ChronoDuration::milliseconds(ms))
            .at(now())
    }

    #[test]
    fn test_ttl_expired_denies() {
        // ttl 60s, record created 120s ago
        let engine = PolicyEngine::new(PolicyConfig::default().ttl("60s").unwrap());
        let decision = engine.evaluate(&ctx_with_age(120_000));
        assert!(!decision.is_allowed());
        assert_eq!(decision.code, Some(ErrorCode::PolicyTtlExpired));
    }

    #[test]
    fn test_ttl_boundary() {
        let engine = PolicyEngine::new(PolicyConfig::default().ttl("1s").unwrap());
        assert!(engine.evaluate(&ctx_with_age(999)).is_allowed());
        assert!(engine.evaluate(&ctx_with_age(1000)).is_allowed());
        assert!(!engine.evaluate(&ctx_with_age(1001)).is_allowed());
    }

    #[test]
    fn test_ttl_missing_created_at() {
        let engine = PolicyEngine::new(PolicyConfig::default().ttl("60s").unwrap());
        let decision = engine.evaluate(&PolicyContext::new("key").at(now()));
        assert!(!decision.is_allowed());
        assert_eq!(decision.code, Some(ErrorCode::PolicyTtlExpired));
        assert_eq!(decision.reason.as_deref(), Some("NO_CREATED_AT"));
    }

    #[test]
    fn test_slow_annotates_without_denying() {
        let engine = PolicyEngine::new(PolicyConfig::default().slow("100ms").unwrap());
        let fast = engine.evaluate(&PolicyContext::new("key").duration_ms(50).at(now()));
        assert!(fast.is_allowed());
        assert!(fast.annotations.is_empty());

        let slow = engine.evaluate(&PolicyContext::new("key").duration_ms(150).at(now()));
        assert!(slow.is_allowed());
        assert_eq!(slow.annotations, vec!["slow"]);
    }

    #[test]
    fn test_throttle_denies_over_limit_with_retry_hint() {
        let engine = PolicyEngine::new(PolicyConfig::default().throttle(2, "1s").unwrap());
        let ctx = PolicyContext::new("tenant:acme").at(now());
        assert!(engine.evaluate(&ctx).is_allowed());
        assert!(engine.evaluate(&ctx).is_allowed());
        let denied = engine.evaluate(&ctx);
        assert!(!denied.is_allowed());
        assert_eq!(denied.code, Some(ErrorCode::PolicyThrottled));
        assert_eq!(denied.retry_after_ms, Some(1000));
    }

    #[test]
    fn test_throttle_window_resets() {
        let engine = PolicyEngine::new(PolicyConfig::default().throttle(1, "1s").unwrap());
        let ctx = PolicyContext::new("key").at(now());
        assert!(engine.evaluate(&ctx).is_allowed());
        assert!(!engine.evaluate(&ctx).is_allowed());
        // Past the window the count starts over.
        let later = PolicyContext::new("key").at(now() + ChronoDuration::milliseconds(1001));
        assert!(engine.evaluate(&later).is_allowed());
    }

    #[test]
    fn test_throttle_keys_are_isolated() {
        let engine = PolicyEngine::new(PolicyConfig::default().throttle(1, "1s").unwrap());
        assert!(engine.evaluate(&PolicyContext::new("a").at(now())).is_allowed());
        assert!(engine.evaluate(&PolicyContext::new("b").at(now())).is_allowed());
        assert!(!engine.evaluate(&PolicyContext::new("a").at(now())).is_allowed());
    }

    #[test]
    fn test_breaker_trips_after_threshold() {
        let engine = PolicyEngine::new(PolicyConfig::default().breaker(3, "500ms").unwrap());
        let ctx = PolicyContext::new("key").at(now());
        assert!(engine.evaluate(&ctx).is_allowed());
        for _ in 0..3 {
            engine.record_error("key");
        }
        let denied = engine.evaluate(&ctx);
        assert!(!denied.is_allowed());
        assert_eq!(denied.code, Some(ErrorCode::PolicyCircuitOpen));
        assert_eq!(denied.retry_after_ms, Some(500));

        // Still broken within the timeout.
        let soon = PolicyContext::new("key").at(now() + ChronoDuration::milliseconds(200));
        let still = engine.evaluate(&soon);
        assert!(!still.is_allowed());
        assert_eq!(still.retry_after_ms, Some(300));
    }

    #[test]
    fn test_breaker_closes_after_timeout() {
        let engine = PolicyEngine::new(PolicyConfig::default().breaker(1, "500ms").unwrap());
        engine.record_error("key");
        assert!(!engine.evaluate(&PolicyContext::new("key").at(now())).is_allowed());
        let later = PolicyContext::new("key").at(now() + ChronoDuration::milliseconds(501));
        assert!(engine.evaluate(&later).is_allowed());
    }

    #[test]
    fn test_record_success_resets_history() {
        let engine = PolicyEngine::new(PolicyConfig::default().breaker(2, "500ms").unwrap());
        engine.record_error("key");
        engine.record_success("key");
        engine.record_error("key");
        // One error after the reset stays under the threshold of two.
        assert!(engine.evaluate(&PolicyContext::new("key").at(now())).is_allowed());
    }

    #[test]
    fn test_allow_is_order_insensitive() {
        let config = PolicyConfig::default()
            .ttl("1h")
            .unwrap()
            .slow("10s")
            .unwrap()
            .throttle(100, "1s")
            .unwrap()
            .breaker(5, "1s")
            .unwrap();
        let forward = PolicyEngine::new(config.clone());
        let reversed = PolicyEngine::with_order(
            config,
            PolicyKind::DEFAULT_ORDER.iter().rev().copied().collect(),
        );
        let ctx = ctx_with_age(10);

        let a = forward.evaluate(&ctx);
        let b = reversed.evaluate(&ctx);
        assert!(a.is_allowed() && b.is_allowed());
        let mut applied_a = a.policy_applied.clone();
        let mut applied_b = b.policy_applied.clone();
        applied_a.sort();
        applied_b.sort();
        assert_eq!(applied_a, applied_b);
        assert_eq!(a.timings.len(), 4);
    }

    #[test]
    fn test_deny_short_circuits_later_policies() {
        let config = PolicyConfig::default()
            .ttl("1s")
            .unwrap()
            .throttle(100, "1s")
            .unwrap();
        let engine = PolicyEngine::new(config);
        let decision = engine.evaluate(&ctx_with_age(5_000));
        assert!(!decision.is_allowed());
        // Evaluation stopped at the denying policy.
        assert_eq!(decision.policy_applied, vec!["ttl"]);
    }

    #[test]
    fn test_unconfigured_policies_are_not_applied() {
        let engine = PolicyEngine::new(PolicyConfig::default().ttl("1h").unwrap());
        let decision = engine.evaluate(&ctx_with_age(10));
        assert_eq!(decision.policy_applied, vec!["ttl"]);
    }
}
