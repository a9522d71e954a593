//! Streaming line-by-line ledger verification.
//!
//! Reads one line at a time and never loads the whole file: memory stays
//! proportional to the largest line plus the per-trace hash chains kept for
//! fork detection. Verification is interruptible between lines via a shared
//! cancel flag.

use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ed25519_dalek::VerifyingKey;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use atomic_core::atomic::Atomic;
use atomic_core::error::{AtomicError, ErrorCode, Result};
use atomic_core::ids::TraceId;
use atomic_canonical::atomic_hash;
use atomic_crypto::signer;

/// Hard cap on a single ledger line.
pub const MAX_LINE_BYTES: usize = 10 * 1024 * 1024;

/// Verification settings.
#[derive(Default)]
pub struct VerifyOptions {
    /// Only verify lines belonging to this trace.
    pub trace_id: Option<TraceId>,
    /// Enforce the prev-hash chain across lines.
    pub check_prev_chain: bool,
    /// Halt at the first hard error (unsigned is not a hard error).
    pub stop_on_error: bool,
    /// External key; overrides envelope keys and enables legacy signatures.
    pub public_key: Option<VerifyingKey>,
}

/// Outcome classification for one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineStatus {
    Valid,
    Invalid,
    Unsigned,
}

/// Per-line verification verdict.
#[derive(Debug, Clone, Serialize)]
pub struct LineResult {
    /// 1-based physical line number.
    pub line: u64,
    pub status: LineStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

/// One hard error, also present in `results`.
#[derive(Debug, Clone, Serialize)]
pub struct LineIssue {
    pub line: u64,
    pub code: ErrorCode,
    pub message: String,
}

/// A hash appearing more than once in a trace's chain.
#[derive(Debug, Clone, Serialize)]
pub struct ForkReport {
    pub trace_id: String,
    pub hash: String,
    pub lines: Vec<u64>,
}

/// Full verification summary.
#[derive(Debug, Default, Serialize)]
pub struct VerificationReport {
    pub total: u64,
    pub valid: u64,
    pub invalid: u64,
    pub unsigned: u64,
    pub errors: Vec<LineIssue>,
    pub results: Vec<LineResult>,
    pub forks: Vec<ForkReport>,
    pub interrupted: bool,
}

impl VerificationReport {
    /// True when nothing hard failed. Unsigned lines are warnings.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.invalid == 0 && self.forks.is_empty()
    }
}

/// Streaming verifier over a single ledger file.
#[derive(Default)]
pub struct ChainVerifier {
    opts: VerifyOptions,
    cancel: Option<Arc<AtomicBool>>,
}

impl ChainVerifier {
    #[must_use]
    pub fn new(opts: VerifyOptions) -> Self {
        Self { opts, cancel: None }
    }

    /// Attach a cancel flag, checked between lines.
    #[must_use]
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Verify a ledger file from disk.
    pub fn verify_file(&self, path: &Path) -> Result<VerificationReport> {
        let file = std::fs::File::open(path)
            .map_err(|e| AtomicError::repository("open ledger for verification", e))?;
        let report = self.verify_reader(std::io::BufReader::new(file))?;
        info!(
            path = %path.display(),
            total = report.total,
            valid = report.valid,
            invalid = report.invalid,
            unsigned = report.unsigned,
            "ledger verification finished"
        );
        Ok(report)
    }

    /// Verify any line-delimited source.
    pub fn verify_reader<R: BufRead>(&self, mut reader: R) -> Result<VerificationReport> {
        let mut report = VerificationReport::default();
        // Expected prev value: the hash of the last parsed line. None until
        // the first line is seen, which is the genesis position.
        let mut prev_hash: Option<String> = None;
        // trace id → (hash, line) sequence, for fork detection.
        let mut chains: BTreeMap<String, Vec<(String, u64)>> = BTreeMap::new();
        let mut buf = Vec::new();
        let mut line_no: u64 = 0;

        loop {
            if self.is_cancelled() {
                report.interrupted = true;
                break;
            }
            line_no += 1;
            let fits = match read_line_capped(&mut reader, &mut buf)
                .map_err(|e| AtomicError::repository("read ledger line", e))?
            {
                None => break,
                Some(fits) => fits,
            };

            if !fits {
                report.total += 1;
                let stop = self.record_failure(
                    &mut report,
                    line_no,
                    None,
                    AtomicError::LineTooLarge {
                        line: line_no,
                        limit: MAX_LINE_BYTES as u64,
                    },
                );
                if stop {
                    break;
                }
                continue;
            }

            if buf.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            let atomic = match parse_line(&buf) {
                Ok(atomic) => atomic,
                Err(e) => {
                    report.total += 1;
                    if self.record_failure(&mut report, line_no, None, e) {
                        break;
                    }
                    continue;
                }
            };
            let trace = atomic.trace_id().map(str::to_string);

            if let Some(wanted) = &self.opts.trace_id {
                if trace.as_deref() != Some(wanted.as_str()) {
                    continue;
                }
            }
            report.total += 1;

            // The hash this line contributes to the chain: the stored one, or
            // the recomputed one for unhashed lines.
            let computed = match atomic_hash(&atomic) {
                Ok(hash) => hash.to_lowercase(),
                Err(e) => {
                    if self.record_failure(&mut report, line_no, trace.clone(), e) {
                        break;
                    }
                    continue;
                }
            };
            let line_hash = atomic
                .hash()
                .map(|h| h.to_ascii_lowercase())
                .unwrap_or_else(|| computed.clone());

            let verdict = self.check_line(&atomic, prev_hash.as_deref(), &computed);
            // The chain expectation advances for every parsed line, even a
            // failed one, so a single bad line does not cascade.
            prev_hash = Some(line_hash.clone());

            match verdict {
                Err(e) => {
                    if self.record_failure(&mut report, line_no, trace, e) {
                        break;
                    }
                }
                Ok(signed) => {
                    if let Some(trace) = &trace {
                        chains
                            .entry(trace.clone())
                            .or_default()
                            .push((line_hash.clone(), line_no));
                    }
                    let status = if signed {
                        report.valid += 1;
                        LineStatus::Valid
                    } else {
                        report.unsigned += 1;
                        LineStatus::Unsigned
                    };
                    report.results.push(LineResult {
                        line: line_no,
                        status,
                        code: None,
                        message: (!signed).then(|| "missing hash or signature".to_string()),
                        hash: Some(line_hash),
                        trace_id: trace,
                    });
                }
            }
        }

        report.forks = detect_forks(&chains);
        Ok(report)
    }

    /// Run the per-line checks. `Ok(true)` = valid, `Ok(false)` = unsigned.
    fn check_line(
        &self,
        atomic: &Atomic,
        prev_hash: Option<&str>,
        computed: &str,
    ) -> Result<bool> {
        if self.opts.check_prev_chain {
            match (prev_hash, atomic.prev()) {
                (None, Some(_)) => return Err(AtomicError::InvalidGenesis),
                (Some(_), None) => return Err(AtomicError::MissingPrev),
                (Some(expected), Some(found)) if !found.eq_ignore_ascii_case(expected) => {
                    return Err(AtomicError::PrevMismatch {
                        expected: expected.to_string(),
                        found: found.to_string(),
                    })
                }
                _ => {}
            }
        }

        if let Some(stored) = atomic.hash() {
            if !stored.eq_ignore_ascii_case(computed) {
                return Err(AtomicError::HashMismatch {
                    stored: stored.to_string(),
                    computed: computed.to_string(),
                });
            }
        }

        // Missing hash or signature is a warning, never a hard error.
        if atomic.hash().is_none() || atomic.signature().is_none() {
            return Ok(false);
        }

        // A legacy bare-hex signature is only checkable with an external key.
        let legacy_unverifiable = matches!(atomic.signature(), Some(Value::String(_)))
            && self.opts.public_key.is_none();
        if !legacy_unverifiable {
            match signer::verify(atomic, self.opts.public_key.as_ref()) {
                Ok(true) => {}
                Ok(false) => return Err(AtomicError::InvalidSignature),
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    /// Record a hard error; returns true when the pass should halt.
    fn record_failure(
        &self,
        report: &mut VerificationReport,
        line: u64,
        trace_id: Option<String>,
        error: AtomicError,
    ) -> bool {
        debug!(line, code = %error.code(), "line failed verification");
        report.invalid += 1;
        report.errors.push(LineIssue {
            line,
            code: error.code(),
            message: error.to_string(),
        });
        report.results.push(LineResult {
            line,
            status: LineStatus::Invalid,
            code: Some(error.code()),
            message: Some(error.to_string()),
            hash: None,
            trace_id,
        });
        self.opts.stop_on_error
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

fn parse_line(raw: &[u8]) -> Result<Atomic> {
    let value: Value = serde_json::from_slice(raw).map_err(|e| AtomicError::parse(e))?;
    Atomic::from_value(value).map_err(|e| AtomicError::parse(e))
}

/// Read one line, never buffering more than the cap.
///
/// Returns `None` at end of input, `Some(true)` for a line within the cap,
/// `Some(false)` for an oversized line (its bytes are discarded).
fn read_line_capped<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Option<bool>> {
    buf.clear();
    let mut seen_any = false;
    let mut over = false;
    loop {
        let chunk = reader.fill_buf()?;
        if chunk.is_empty() {
            if !seen_any {
                return Ok(None);
            }
            break;
        }
        seen_any = true;
        let (part, consumed, done) = match chunk.iter().position(|&b| b == b'\n') {
            Some(pos) => (&chunk[..pos], pos + 1, true),
            None => (chunk, chunk.len(), false),
        };
        if !over {
            if buf.len() + part.len() > MAX_LINE_BYTES {
                over = true;
                buf.clear();
            } else {
                buf.extend_from_slice(part);
            }
        }
        reader.consume(consumed);
        if done {
            break;
        }
    }
    Ok(Some(!over))
}

fn detect_forks(chains: &BTreeMap<String, Vec<(String, u64)>>) -> Vec<ForkReport> {
    let mut forks = Vec::new();
    for (trace, sequence) in chains {
        let mut by_hash: BTreeMap<&str, Vec<u64>> = BTreeMap::new();
        for (hash, line) in sequence {
            by_hash.entry(hash.as_str()).or_default().push(*line);
        }
        for (hash, lines) in by_hash {
            if lines.len() > 1 {
                forks.push(ForkReport {
                    trace_id: trace.clone(),
                    hash: hash.to_string(),
                    lines,
                });
            }
        }
    }
    forks
}
