//! Durable append-only persistence.
//!
//! One store owns one line-delimited file. Append is a critical section: the
//! duplicate check, line-count read, and write happen under the store mutex,
//! with an fs2 advisory lock guarding against other processes. Files are only
//! ever extended; nothing is deleted in place.

use std::collections::{BTreeMap, HashSet};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::Serialize;
use tracing::{debug, warn};

use atomic_core::atomic::{Atomic, EntityType};
use atomic_core::error::{AtomicError, Result};
use atomic_core::ids::{ContentHash, Cursor, TraceId};
use atomic_canonical::atomic_hash;

/// Page request for [`LedgerStore::scan`].
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub limit: usize,
    /// 0-based line index to open at.
    pub cursor: Cursor,
    pub status: Option<String>,
    pub entity_type: Option<EntityType>,
}

impl Default for ScanRequest {
    fn default() -> Self {
        Self {
            limit: 50,
            cursor: Cursor::new(0),
            status: None,
            entity_type: None,
        }
    }
}

/// One page of scan results.
#[derive(Debug, Clone, Serialize)]
pub struct ScanPage {
    pub items: Vec<Atomic>,
    /// First line index not yet returned, when more lines remain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<Cursor>,
    pub has_more: bool,
}

/// Match-all filter for [`LedgerStore::query`].
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub trace_id: Option<TraceId>,
    pub entity_type: Option<EntityType>,
    pub owner_id: Option<String>,
    pub tenant_id: Option<String>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
}

/// Aggregate counts over one ledger file.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LedgerStats {
    pub total: u64,
    pub by_type: BTreeMap<String, u64>,
    pub by_status: BTreeMap<String, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest_timestamp: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct StoreState {
    indexed: bool,
    /// Count of non-blank lines in the file.
    lines: u64,
    /// Lowercased stored hashes, for duplicate detection and fast misses.
    hashes: HashSet<String>,
    last_hash: Option<ContentHash>,
}

/// Append-only store over one ledger file.
pub struct LedgerStore {
    path: PathBuf,
    state: Mutex<StoreState>,
}

impl LedgerStore {
    /// Open a store, creating parent directories as needed. The file itself
    /// is created lazily on first append.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| AtomicError::repository("create ledger directory", e))?;
            }
        }
        Ok(Self {
            path,
            state: Mutex::new(StoreState::default()),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one atomic, computing its hash when absent.
    ///
    /// Returns the 1-based line count after the write.
    ///
    /// # Errors
    /// `INVALID_ATOMIC` on missing required fields, `DUPLICATE_ATOMIC` when
    /// the hash is already in this file, `REPOSITORY_ERROR` on I/O failure.
    pub fn append(&self, atomic: &Atomic) -> Result<Cursor> {
        let mut state = self.lock_state()?;
        self.ensure_index(&mut state)?;

        atomic.validate_for_append()?;

        let mut record = atomic.clone();
        let hash = match record.hash() {
            Some(stored) => ContentHash::parse(stored)?,
            None => {
                let computed = atomic_hash(&record)?;
                record.set_hash(&computed);
                computed
            }
        };

        let key = hash.to_lowercase();
        if state.hashes.contains(&key) {
            return Err(AtomicError::DuplicateAtomic { hash: key });
        }

        let line = record.to_json()?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| AtomicError::repository("open ledger file", e))?;
        file.lock_exclusive()
            .map_err(|e| AtomicError::repository("lock ledger file", e))?;
        let outcome = write_line(&file, &line);
        let _ = FileExt::unlock(&file);
        outcome?;

        state.lines += 1;
        state.hashes.insert(key);
        state.last_hash = Some(hash.clone());
        debug!(path = %self.path.display(), line = state.lines, hash = %hash, "appended atomic");
        Ok(Cursor::new(state.lines))
    }

    /// Hash of the most recently appended atomic, for chain construction.
    pub fn last_hash(&self) -> Result<Option<ContentHash>> {
        let mut state = self.lock_state()?;
        self.ensure_index(&mut state)?;
        Ok(state.last_hash.clone())
    }

    /// Linear scan for an atomic by stored hash.
    pub fn find_by_hash(&self, hash: &ContentHash) -> Result<Option<Atomic>> {
        {
            let mut state = self.lock_state()?;
            self.ensure_index(&mut state)?;
            if !state.hashes.contains(&hash.to_lowercase()) {
                return Ok(None);
            }
        }
        for entry in self.iter_parsed()? {
            let (_, atomic) = entry;
            if atomic
                .hash()
                .is_some_and(|h| h.eq_ignore_ascii_case(hash.as_str()))
            {
                return Ok(Some(atomic));
            }
        }
        Ok(None)
    }

    /// Page through the file from a 0-based line cursor.
    ///
    /// Malformed lines are skipped without aborting; they still advance the
    /// cursor, which indexes physical lines.
    pub fn scan(&self, req: &ScanRequest) -> Result<ScanPage> {
        let mut page = ScanPage {
            items: Vec::new(),
            next_cursor: None,
            has_more: false,
        };
        if !self.path.exists() {
            return Ok(page);
        }

        let reader = self.reader()?;
        let start = req.cursor.to_number();
        for (idx, line) in reader.lines().enumerate() {
            let idx = idx as u64;
            let line = line.map_err(|e| AtomicError::repository("read ledger line", e))?;
            if idx < start {
                continue;
            }
            if page.items.len() == req.limit {
                page.next_cursor = Some(Cursor::new(idx));
                page.has_more = true;
                break;
            }
            if line.trim().is_empty() {
                continue;
            }
            let atomic = match Atomic::from_json(&line) {
                Ok(atomic) => atomic,
                Err(e) => {
                    warn!(line = idx + 1, error = %e, "skipping malformed ledger line");
                    continue;
                }
            };
            if let Some(et) = req.entity_type {
                if atomic.entity_type() != Some(et.as_str()) {
                    continue;
                }
            }
            if let Some(status) = &req.status {
                if atomic.status_label() != Some(status.as_str()) {
                    continue;
                }
            }
            page.items.push(atomic);
        }
        Ok(page)
    }

    /// Linear scan with AND semantics across the provided filters.
    pub fn query(&self, filter: &QueryFilter) -> Result<Vec<Atomic>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut matches = Vec::new();
        for (_, atomic) in self.iter_parsed()? {
            if let Some(trace) = &filter.trace_id {
                if atomic.trace_id() != Some(trace.as_str()) {
                    continue;
                }
            }
            if let Some(et) = filter.entity_type {
                if atomic.entity_type() != Some(et.as_str()) {
                    continue;
                }
            }
            if let Some(owner) = &filter.owner_id {
                if atomic.owner_id() != Some(owner.as_str()) {
                    continue;
                }
            }
            if let Some(tenant) = &filter.tenant_id {
                if atomic.tenant_id() != Some(tenant.as_str()) {
                    continue;
                }
            }
            if filter.from_date.is_some() || filter.to_date.is_some() {
                let Some(created) = atomic.created_at() else {
                    continue;
                };
                if filter.from_date.is_some_and(|from| created < from) {
                    continue;
                }
                if filter.to_date.is_some_and(|to| created > to) {
                    continue;
                }
            }
            matches.push(atomic);
        }
        Ok(matches)
    }

    /// Aggregate counts and timestamp bounds.
    pub fn stats(&self) -> Result<LedgerStats> {
        let mut stats = LedgerStats::default();
        if !self.path.exists() {
            return Ok(stats);
        }
        for (_, atomic) in self.iter_parsed()? {
            stats.total += 1;
            if let Some(et) = atomic.entity_type() {
                *stats.by_type.entry(et.to_string()).or_default() += 1;
            }
            if let Some(status) = atomic.status_label() {
                *stats.by_status.entry(status.to_string()).or_default() += 1;
            }
            if let Some(created) = atomic.created_at() {
                stats.oldest_timestamp = Some(match stats.oldest_timestamp {
                    Some(oldest) if oldest <= created => oldest,
                    _ => created,
                });
                stats.newest_timestamp = Some(match stats.newest_timestamp {
                    Some(newest) if newest >= created => newest,
                    _ => created,
                });
            }
        }
        Ok(stats)
    }

    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, StoreState>> {
        self.state.lock().map_err(|e| {
            AtomicError::repository("store lock poisoned", std::io::Error::other(e.to_string()))
        })
    }

    fn reader(&self) -> Result<BufReader<std::fs::File>> {
        let file = std::fs::File::open(&self.path)
            .map_err(|e| AtomicError::repository("open ledger file", e))?;
        Ok(BufReader::new(file))
    }

    /// All parseable atomics with their 1-based line numbers.
    fn iter_parsed(&self) -> Result<Vec<(u64, Atomic)>> {
        let mut parsed = Vec::new();
        if !self.path.exists() {
            return Ok(parsed);
        }
        for (idx, line) in self.reader()?.lines().enumerate() {
            let line = line.map_err(|e| AtomicError::repository("read ledger line", e))?;
            if line.trim().is_empty() {
                continue;
            }
            match Atomic::from_json(&line) {
                Ok(atomic) => parsed.push((idx as u64 + 1, atomic)),
                Err(e) => warn!(line = idx + 1, error = %e, "skipping malformed ledger line"),
            }
        }
        Ok(parsed)
    }

    fn ensure_index(&self, state: &mut StoreState) -> Result<()> {
        if state.indexed {
            return Ok(());
        }
        if self.path.exists() {
            for (idx, line) in self.reader()?.lines().enumerate() {
                let line = line.map_err(|e| AtomicError::repository("read ledger line", e))?;
                if line.trim().is_empty() {
                    continue;
                }
                state.lines += 1;
                match Atomic::from_json(&line) {
                    Ok(atomic) => {
                        if let Some(hash) = atomic.hash() {
                            let lower = hash.to_ascii_lowercase();
                            state.last_hash = Some(ContentHash::new_unchecked(lower.clone()));
                            state.hashes.insert(lower);
                        }
                    }
                    Err(e) => {
                        warn!(line = idx + 1, error = %e, "unparseable line while indexing")
                    }
                }
            }
        }
        state.indexed = true;
        Ok(())
    }
}

fn write_line(mut file: &std::fs::File, line: &str) -> Result<()> {
    file.write_all(line.as_bytes())
        .and_then(|()| file.write_all(b"\n"))
        .and_then(|()| file.flush())
        .map_err(|e| AtomicError::repository("append ledger line", e))
}
