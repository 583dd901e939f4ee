//! Disk-backed option chain cache
//!
//! One record per underlying, named from the symbol and provider id. Each
//! record maps expiration to the resolved chain. Expired chains are pruned
//! on every load.

use anyhow::Context;
use chrono::NaiveDate;
use common::{Clock, InstrumentRef, Ts};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, error, info};

use super::types::ChainMap;
use crate::errors::{ChainError, ChainResult};

/// Bumped whenever the record layout changes
const RECORD_VERSION: u32 = 1;
const RECORD_SUFFIX: &str = "optionchains";
const RECORD_EXTENSION: &str = "bin";

/// On-disk unit: all cached chains of one underlying
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChainStoreRecord {
    version: u32,
    underlying_symbol: String,
    underlying_con_id: i64,
    saved_at: Ts,
    chains: ChainMap,
}

/// Persistent chain cache rooted at one directory.
///
/// The directory is owned by a single process; `lock` serialises
/// read-merge-write cycles per underlying inside that process.
pub struct ChainStore {
    dir: PathBuf,
    clock: Arc<dyn Clock>,
    locks: Mutex<FxHashMap<i64, Arc<AsyncMutex<()>>>>,
}

impl std::fmt::Debug for ChainStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainStore")
            .field("dir", &self.dir)
            .field("today", &self.clock.today())
            .finish()
    }
}

impl ChainStore {
    /// Open (and create if needed) a store directory
    pub fn new(dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create chain store directory {}", dir.display()))?;

        Ok(Self {
            dir,
            clock,
            locks: Mutex::new(FxHashMap::default()),
        })
    }

    /// Store directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Today's date as seen by this store
    #[must_use]
    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Deterministic record location for an underlying
    #[must_use]
    pub fn record_path(&self, underlying: &InstrumentRef) -> PathBuf {
        let symbol: String = underlying
            .symbol
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        self.dir.join(format!(
            "{symbol}_{}_{RECORD_SUFFIX}.{RECORD_EXTENSION}",
            underlying.con_id
        ))
    }

    /// Serialise load/save cycles for one underlying
    pub async fn lock(&self, underlying: &InstrumentRef) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(underlying.con_id).or_default())
        };
        lock.lock_owned().await
    }

    /// Load the cached chains of `underlying`, dropping expired ones.
    ///
    /// A missing record is created empty. A record that exists but cannot
    /// be decoded is reported as [`ChainError::PersistenceCorrupt`] and left
    /// untouched on disk.
    pub fn load(&self, underlying: &InstrumentRef) -> ChainResult<ChainMap> {
        let path = self.record_path(underlying);

        let Some(record) = self.read_record(&path)? else {
            debug!(symbol = %underlying.symbol, path = %path.display(), "No chain record, creating empty one");
            let empty = ChainMap::new();
            self.save(underlying, &empty)?;
            return Ok(empty);
        };

        let mut chains = record.chains;
        let before = chains.len();
        let today = self.clock.today();
        chains.retain(|expiration, _| common::dates::days_to_expiration(*expiration, today) >= 0);

        let pruned = before - chains.len();
        if pruned > 0 {
            info!(
                symbol = %underlying.symbol,
                pruned,
                remaining = chains.len(),
                "Pruned expired option chains"
            );
            self.save(underlying, &chains)?;
        }

        Ok(chains)
    }

    /// Overwrite the record of `underlying` with `chains`. Expired entries
    /// are never written.
    pub fn save(&self, underlying: &InstrumentRef, chains: &ChainMap) -> ChainResult<()> {
        let path = self.record_path(underlying);
        let today = self.clock.today();
        let live: ChainMap = chains
            .iter()
            .filter(|(expiration, _)| common::dates::days_to_expiration(**expiration, today) >= 0)
            .map(|(expiration, chain)| (*expiration, chain.clone()))
            .collect();
        if live.len() < chains.len() {
            debug!(
                symbol = %underlying.symbol,
                skipped = chains.len() - live.len(),
                "Not persisting expired option chains"
            );
        }

        let record = ChainStoreRecord {
            version: RECORD_VERSION,
            underlying_symbol: underlying.symbol.clone(),
            underlying_con_id: underlying.con_id,
            saved_at: Ts::now(),
            chains: live,
        };

        let bytes = bincode::serialize(&record)
            .map_err(|e| ChainError::Serialization(e.to_string()))?;

        // Write-then-rename so a crash never leaves a half-written record
        let tmp = path.with_extension(format!("{RECORD_EXTENSION}.tmp"));
        fs::write(&tmp, &bytes).map_err(|source| ChainError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| ChainError::Io {
            path: path.clone(),
            source,
        })?;

        debug!(
            symbol = %underlying.symbol,
            chains = record.chains.len(),
            bytes = bytes.len(),
            "Saved option chain record"
        );
        Ok(())
    }

    fn read_record(&self, path: &Path) -> ChainResult<Option<ChainStoreRecord>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ChainError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let record: ChainStoreRecord = bincode::deserialize(&bytes).map_err(|e| {
            error!(path = %path.display(), error = %e, "Chain record is corrupt");
            ChainError::PersistenceCorrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        })?;

        if record.version != RECORD_VERSION {
            error!(
                path = %path.display(),
                version = record.version,
                expected = RECORD_VERSION,
                "Chain record has unsupported version"
            );
            return Err(ChainError::PersistenceCorrupt {
                path: path.to_path_buf(),
                reason: format!(
                    "record version {} (expected {RECORD_VERSION})",
                    record.version
                ),
            });
        }

        Ok(Some(record))
    }
}
