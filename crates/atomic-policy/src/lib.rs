//! `atomic-policy` — Gate atomics by age, rate, and failure history.
//!
//! # Usage
//! ```rust,no_run
//! use atomic_policy::{PolicyConfig, PolicyContext, PolicyEngine};
//!
//! let config = PolicyConfig::default().ttl("60s").unwrap();
//! let engine = PolicyEngine::new(config);
//! let decision = engine.evaluate(&PolicyContext::new("tenant:acme"));
//! assert!(!decision.is_allowed()); // no created_at
//! ```

pub mod engine;
pub mod evaluation;
pub mod rules;

pub use engine::PolicyEngine;
pub use evaluation::{Effect, PolicyContext, PolicyDecision, PolicyTiming};
pub use rules::{parse_duration, BreakerConfig, PolicyConfig, PolicyKind, ThrottleConfig};
