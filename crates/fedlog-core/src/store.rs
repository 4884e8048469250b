//! Durable log store for federation records
//!
//! One LMDB database maps a big-endian record index to the opaque command
//! string. Indices are gapless and ascending; records are only ever
//! appended or purged, never rewritten.

use crate::{Error, Result};
use heed::byteorder::BigEndian;
use heed::types::{Str, U64};
use heed::{Database, Env, EnvOpenOptions};
use std::path::Path;
use std::sync::Arc;

/// Name of the LMDB database holding the replicated records
const RECORDS_DB: &str = "records";

/// Durable, indexed, append-only store of replicated commands
#[derive(Clone)]
pub struct LogStore {
    /// LMDB environment
    env: Arc<Env>,
    /// index -> command
    records: Database<U64<BigEndian>, Str>,
}

impl LogStore {
    /// Open (or bootstrap) the log store at `path`.
    ///
    /// Idempotent: creates the directory, environment and records database
    /// if they do not exist, and is safe on an already-initialized store.
    pub fn open<P: AsRef<Path>>(path: P, map_size: usize) -> Result<Self> {
        std::fs::create_dir_all(path.as_ref())?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(1)
                .open(path.as_ref())?
        };
        let env = Arc::new(env);

        let mut wtxn = env.write_txn()?;
        let records = env.create_database(&mut wtxn, Some(RECORDS_DB))?;
        wtxn.commit()?;

        Ok(Self { env, records })
    }

    /// Append a command, assigning it `last_index + 1`.
    ///
    /// Index assignment and the write commit in a single transaction, so a
    /// failed append never advances the index.
    pub fn append(&self, command: &str) -> Result<u64> {
        let mut wtxn = self.env.write_txn()?;

        let index = match self.records.last(&wtxn)? {
            Some((last, _)) => last + 1,
            None => 1,
        };

        self.records.put(&mut wtxn, &index, command)?;
        wtxn.commit()?;

        Ok(index)
    }

    /// Point lookup of the command at `index`
    pub fn get(&self, index: u64) -> Result<String> {
        let rtxn = self.env.read_txn()?;

        match self.records.get(&rtxn, &index)? {
            Some(command) => Ok(command.to_string()),
            None => Err(Error::not_found(format!("log record {index}"))),
        }
    }

    /// Index of the most recent record, or 0 when the log is empty.
    ///
    /// Used at startup to recover the in-memory index after a restart.
    pub fn last_index(&self) -> Result<u64> {
        let rtxn = self.env.read_txn()?;

        Ok(self.records.last(&rtxn)?.map(|(index, _)| index).unwrap_or(0))
    }

    /// Delete every record with index <= `floor`, returning how many were
    /// removed.
    ///
    /// The caller is responsible for computing a floor that no zone still
    /// needs; this is a plain bounded range delete.
    pub fn purge_through(&self, floor: u64) -> Result<usize> {
        let mut wtxn = self.env.write_txn()?;
        let deleted = self.records.delete_range(&mut wtxn, &(..=floor))?;
        wtxn.commit()?;

        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TEST_MAP_SIZE: usize = 10 * 1024 * 1024;

    fn open_store(dir: &TempDir) -> LogStore {
        LogStore::open(dir.path(), TEST_MAP_SIZE).unwrap()
    }

    #[test]
    fn test_append_assigns_sequential_indices() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        assert_eq!(store.append("CREATE zone").unwrap(), 1);
        assert_eq!(store.append("UPDATE zone").unwrap(), 2);
        assert_eq!(store.append("DELETE zone").unwrap(), 3);
        assert_eq!(store.last_index().unwrap(), 3);
    }

    #[test]
    fn test_get_returns_command() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.append("first").unwrap();
        store.append("second").unwrap();

        assert_eq!(store.get(1).unwrap(), "first");
        assert_eq!(store.get(2).unwrap(), "second");
    }

    #[test]
    fn test_get_missing_index() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let err = store.get(42).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_empty_log_last_index_is_zero() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        assert_eq!(store.last_index().unwrap(), 0);
    }

    #[test]
    fn test_reopen_recovers_last_index() {
        let dir = TempDir::new().unwrap();

        {
            let store = open_store(&dir);
            for i in 0..5 {
                store.append(&format!("cmd-{i}")).unwrap();
            }
        }

        // bootstrap is idempotent; reopening sees the same log
        let store = open_store(&dir);
        assert_eq!(store.last_index().unwrap(), 5);
        assert_eq!(store.get(3).unwrap(), "cmd-2");
    }

    #[test]
    fn test_purge_through() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        for i in 0..10 {
            store.append(&format!("cmd-{i}")).unwrap();
        }

        let deleted = store.purge_through(4).unwrap();
        assert_eq!(deleted, 4);

        assert!(matches!(store.get(4), Err(Error::NotFound(_))));
        assert_eq!(store.get(5).unwrap(), "cmd-4");
        // last_index survives purge
        assert_eq!(store.last_index().unwrap(), 10);
    }

    #[test]
    fn test_purge_zero_floor_is_noop() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.append("only").unwrap();
        assert_eq!(store.purge_through(0).unwrap(), 0);
        assert_eq!(store.get(1).unwrap(), "only");
    }
}
