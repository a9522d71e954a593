//! Policy configuration and duration parsing.

use std::fmt;
use std::time::Duration;

use atomic_core::error::{AtomicError, Result};

/// The four gate policies, in their default evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    Ttl,
    Slow,
    Throttle,
    CircuitBreaker,
}

impl PolicyKind {
    /// Default evaluation order.
    pub const DEFAULT_ORDER: [PolicyKind; 4] = [
        PolicyKind::Ttl,
        PolicyKind::Slow,
        PolicyKind::Throttle,
        PolicyKind::CircuitBreaker,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ttl => "ttl",
            Self::Slow => "slow",
            Self::Throttle => "throttle",
            Self::CircuitBreaker => "circuit_breaker",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PolicyKind {
    type Err = AtomicError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ttl" => Ok(Self::Ttl),
            "slow" => Ok(Self::Slow),
            "throttle" => Ok(Self::Throttle),
            "circuit_breaker" => Ok(Self::CircuitBreaker),
            other => Err(AtomicError::parse(format!("unknown policy {other:?}"))),
        }
    }
}

/// Sliding-window rate limit.
#[derive(Debug, Clone, Copy)]
pub struct ThrottleConfig {
    pub max_requests: u32,
    pub window: Duration,
}

/// Failure-history gate.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub error_threshold: u32,
    pub timeout: Duration,
}

/// Which policies are active, and their parameters.
#[derive(Debug, Clone, Default)]
pub struct PolicyConfig {
    pub ttl: Option<Duration>,
    pub slow: Option<Duration>,
    pub throttle: Option<ThrottleConfig>,
    pub breaker: Option<BreakerConfig>,
}

impl PolicyConfig {
    /// Maximum record age, e.g. `"60s"` or `"1500"` (bare ms).
    pub fn ttl(mut self, spec: &str) -> Result<Self> {
        self.ttl = Some(parse_duration(spec)?);
        Ok(self)
    }

    /// Advisory slow-run threshold; annotates, never denies.
    pub fn slow(mut self, spec: &str) -> Result<Self> {
        self.slow = Some(parse_duration(spec)?);
        Ok(self)
    }

    pub fn throttle(mut self, max_requests: u32, window: &str) -> Result<Self> {
        self.throttle = Some(ThrottleConfig {
            max_requests,
            window: parse_duration(window)?,
        });
        Ok(self)
    }

    pub fn breaker(mut self, error_threshold: u32, timeout: &str) -> Result<Self> {
        self.breaker = Some(BreakerConfig {
            error_threshold,
            timeout: parse_duration(timeout)?,
        });
        Ok(self)
    }
}

/// Parse `<n>(ms|s|m|h)`; a bare integer is milliseconds.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let trimmed = input.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);
    let count: u64 = digits
        .parse()
        .map_err(|_| AtomicError::parse(format!("invalid duration {input:?}")))?;
    let millis = match unit {
        "" | "ms" => count,
        "s" => count * 1_000,
        "m" => count * 60_000,
        "h" => count * 3_600_000,
        _ => return Err(AtomicError::parse(format!("invalid duration unit {unit:?}"))),
    };
    Ok(Duration::from_millis(millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_units() {
        assert_eq!(parse_duration("250").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn test_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("10d").is_err());
        assert!(parse_duration("-5s").is_err());
    }

    #[test]
    fn test_config_builders() {
        let config = PolicyConfig::default()
            .ttl("60s")
            .unwrap()
            .throttle(10, "1s")
            .unwrap()
            .breaker(3, "500ms")
            .unwrap();
        assert_eq!(config.ttl, Some(Duration::from_secs(60)));
        assert_eq!(config.throttle.unwrap().max_requests, 10);
        assert_eq!(config.breaker.unwrap().timeout, Duration::from_millis(500));
        assert!(config.slow.is_none());
    }

    #[test]
    fn test_policy_kind_roundtrip() {
        for kind in PolicyKind::DEFAULT_ORDER {
            assert_eq!(kind.as_str().parse::<PolicyKind>().unwrap(), kind);
        }
        assert!("unknown".parse::<PolicyKind>().is_err());
    }
}
