//! Durable record of how many fungible rewards were materialized per session.
//!
//! The ledger is scoped to the remote session identity. Claims are counted in
//! memory as rewards land in the world, flushed only when the world is saved,
//! and reloaded (dropping unflushed claims) whenever the world is torn down,
//! so the ledger always agrees with the last saved world.

use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fs;
use std::hash::Hasher;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use thiserror::Error;
use twox_hash::XxHash64;

use crate::constants::{LEDGER_FILE_PREFIX, LEDGER_IDENTITY_MAX_LEN};

/// Claimed count per reward name.
pub type ClaimMap = BTreeMap<String, u32>;

/// One persisted ledger record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimLedgerEntry {
    pub reward_name: String,
    pub claimed_count: u32,
}

/// Trait for abstracting ledger persistence.
/// Platform-specific implementations should provide this.
pub trait LedgerStorage {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Load the claims of `identity`; `Ok(None)` when nothing was ever saved.
    ///
    /// # Errors
    ///
    /// Returns an error if stored claims exist but cannot be read.
    fn load_claims(&self, identity: &str) -> Result<Option<ClaimMap>, Self::Error>;

    /// Replace the stored claims of `identity`.
    ///
    /// # Errors
    ///
    /// Returns an error if the claims cannot be written.
    fn save_claims(&self, identity: &str, claims: &ClaimMap) -> Result<(), Self::Error>;

    /// Remove the stored claims of `identity`.
    ///
    /// # Errors
    ///
    /// Returns an error if the claims exist but cannot be removed.
    fn delete_claims(&self, identity: &str) -> Result<(), Self::Error>;
}

/// Failure reading or writing a ledger file.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("ledger file {path} is corrupt: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("ledger storage unavailable")]
    Unavailable,
}

fn sanitize_identity(identity: &str) -> String {
    let sanitized: String = identity
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(LEDGER_IDENTITY_MAX_LEN)
        .collect();
    if sanitized.is_empty() {
        "anonymous".to_string()
    } else {
        sanitized
    }
}

fn identity_digest(identity: &str) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(identity.as_bytes());
    hasher.finish()
}

/// File name holding the ledger of `identity`.
///
/// The identity is sanitized to `[A-Za-z0-9_-]`, truncated, and suffixed with
/// a digest of the full identity so truncated prefixes never collide.
#[must_use]
pub fn ledger_file_name(identity: &str) -> String {
    format!(
        "{LEDGER_FILE_PREFIX}_{}-{:016x}.json",
        sanitize_identity(identity),
        identity_digest(identity)
    )
}

/// Ledger files stored as flat JSON `name -> count` maps in one directory.
#[derive(Debug, Clone)]
pub struct FileLedgerStorage {
    dir: PathBuf,
}

impl FileLedgerStorage {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn path_for(&self, identity: &str) -> PathBuf {
        self.dir.join(ledger_file_name(identity))
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl LedgerStorage for FileLedgerStorage {
    type Error = LedgerError;

    fn load_claims(&self, identity: &str) -> Result<Option<ClaimMap>, Self::Error> {
        let path = self.path_for(identity);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(LedgerError::Io { path, source }),
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|source| LedgerError::Parse { path, source })
    }

    fn save_claims(&self, identity: &str, claims: &ClaimMap) -> Result<(), Self::Error> {
        let path = self.path_for(identity);
        let io_err = |source| LedgerError::Io {
            path: path.clone(),
            source,
        };
        fs::create_dir_all(&self.dir).map_err(io_err)?;
        let json = serde_json::to_string_pretty(claims).map_err(|source| LedgerError::Parse {
            path: path.clone(),
            source,
        })?;
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, json).map_err(io_err)?;
        fs::rename(&staging, &path).map_err(io_err)
    }

    fn delete_claims(&self, identity: &str) -> Result<(), Self::Error> {
        let path = self.path_for(identity);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(LedgerError::Io { path, source }),
        }
    }
}

/// In-memory ledger storage shared between clones, for hosts without a disk and for tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedgerStorage {
    saves: Rc<RefCell<BTreeMap<String, ClaimMap>>>,
    unavailable: Rc<Cell<bool>>,
}

impl MemoryLedgerStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail, simulating a broken disk.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.set(unavailable);
    }

    #[must_use]
    pub fn stored(&self, identity: &str) -> Option<ClaimMap> {
        self.saves.borrow().get(identity).cloned()
    }

    fn check(&self) -> Result<(), LedgerError> {
        if self.unavailable.get() {
            Err(LedgerError::Unavailable)
        } else {
            Ok(())
        }
    }
}

impl LedgerStorage for MemoryLedgerStorage {
    type Error = LedgerError;

    fn load_claims(&self, identity: &str) -> Result<Option<ClaimMap>, Self::Error> {
        self.check()?;
        Ok(self.stored(identity))
    }

    fn save_claims(&self, identity: &str, claims: &ClaimMap) -> Result<(), Self::Error> {
        self.check()?;
        self.saves
            .borrow_mut()
            .insert(identity.to_string(), claims.clone());
        Ok(())
    }

    fn delete_claims(&self, identity: &str) -> Result<(), Self::Error> {
        self.check()?;
        self.saves.borrow_mut().remove(identity);
        Ok(())
    }
}

/// Claims of the connected session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimLedger {
    identity: String,
    claims: ClaimMap,
    dirty: bool,
}

impl ClaimLedger {
    /// Empty ledger for `identity`.
    #[must_use]
    pub fn empty(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            claims: ClaimMap::new(),
            dirty: false,
        }
    }

    /// Load the ledger of `identity`. A missing or unreadable ledger starts empty.
    pub fn load<S: LedgerStorage>(storage: &S, identity: impl Into<String>) -> Self {
        let mut ledger = Self::empty(identity);
        ledger.reload(storage);
        ledger
    }

    /// Replace in-memory claims with the stored ones, discarding unflushed claims.
    pub fn reload<S: LedgerStorage>(&mut self, storage: &S) {
        self.claims = match storage.load_claims(&self.identity) {
            Ok(Some(claims)) => claims,
            Ok(None) => ClaimMap::new(),
            Err(err) => {
                log::warn!(
                    "claim ledger for '{}' unreadable, starting empty: {err}",
                    self.identity
                );
                ClaimMap::new()
            }
        };
        self.dirty = false;
    }

    /// Write the claims. On failure the in-memory claims stay authoritative.
    ///
    /// # Errors
    ///
    /// Returns the storage error when the claims cannot be written.
    pub fn flush<S: LedgerStorage>(&mut self, storage: &S) -> Result<(), S::Error> {
        storage.save_claims(&self.identity, &self.claims)?;
        self.dirty = false;
        Ok(())
    }

    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    #[must_use]
    pub fn claimed(&self, reward_name: &str) -> u32 {
        self.claims.get(reward_name).copied().unwrap_or(0)
    }

    /// Record one more materialized reward, returning the new count.
    pub fn claim(&mut self, reward_name: &str) -> u32 {
        let count = self.claims.entry(reward_name.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        self.dirty = true;
        *count
    }

    /// Whether claims changed since the last load or flush.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[must_use]
    pub fn entries(&self) -> Vec<ClaimLedgerEntry> {
        self.claims
            .iter()
            .map(|(reward_name, claimed_count)| ClaimLedgerEntry {
                reward_name: reward_name.clone(),
                claimed_count: *claimed_count,
            })
            .collect()
    }
}
